mod number;
mod raw_token;
pub mod token;

use logos::{Lexer as LogosLexer, Logos};
use number::Number;
use raw_token::RawToken;
use std::collections::VecDeque;
use std::ops::Range;
use thiserror::Error;
pub use token::{Lexeme, Token};

/// A lexing or parsing failure with its source position.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub file: String,
    pub row: i32,
    pub col: i32,
    pub span: Range<usize>,
    pub message: String,
}

pub struct Lexer<'source> {
    inner: LogosLexer<'source, RawToken>,
    file: &'source str,
    line_starts: Vec<usize>,
    token_queue: VecDeque<Lexeme>,
    finished: bool,
}

/// Splits `source` into lexemes terminated by [`Token::Eof`].
pub fn tokenize(source: &str, file: &str) -> Result<Vec<Lexeme>, SyntaxError> {
    let mut lexer = Lexer::new(source, file);
    let mut lexemes = Vec::new();
    loop {
        let lexeme = lexer.next_lexeme()?;
        let eof = lexeme.token == Token::Eof;
        lexemes.push(lexeme);
        if eof {
            return Ok(lexemes);
        }
    }
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source str, file: &'source str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Lexer {
            inner: RawToken::lexer(source),
            file,
            line_starts,
            token_queue: VecDeque::new(),
            finished: false,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, SyntaxError> {
        self.next_lexeme().map(|lexeme| lexeme.token)
    }

    pub fn next_lexeme(&mut self) -> Result<Lexeme, SyntaxError> {
        if let Some(lexeme) = self.token_queue.pop_front() {
            return Ok(lexeme);
        }
        if self.finished {
            return Ok(self.eof());
        }

        match self.inner.next() {
            Some(Ok(raw_token)) => {
                let span = self.inner.span();
                self.convert_token(raw_token, span)?;
                self.token_queue
                    .pop_front()
                    .map_or_else(|| self.next_lexeme(), Ok)
            }
            Some(Err(error)) => {
                let span = self.inner.span();
                let (offset, message) = match error.at {
                    Some(at) => (span.end + at, error.message),
                    None => (span.start, self.unknown_char_message()),
                };
                Err(self.error(offset..offset + 1, message))
            }
            None => {
                self.finished = true;
                Ok(self.eof())
            }
        }
    }

    fn unknown_char_message(&self) -> String {
        let byte = self.inner.slice().as_bytes().first().copied().unwrap_or(0);
        if (33..=126).contains(&byte) && !byte.is_ascii_alphanumeric() {
            "Invalid token".to_string()
        } else {
            format!("Invalid codepoint: \\x{:02X}", byte)
        }
    }

    fn eof(&self) -> Lexeme {
        let end = self.inner.source().len();
        self.lexeme(Token::Eof, end..end)
    }

    fn position(&self, offset: usize) -> (i32, i32) {
        let line = self.line_starts.partition_point(|&start| start <= offset);
        let line_start = self.line_starts[line.saturating_sub(1)];
        (line as i32, (offset - line_start) as i32 + 1)
    }

    fn lexeme(&self, token: Token, span: Range<usize>) -> Lexeme {
        let (row, col) = self.position(span.start);
        Lexeme {
            token,
            row,
            col,
            span,
        }
    }

    fn error(&self, span: Range<usize>, message: String) -> SyntaxError {
        let (row, col) = self.position(span.start);
        SyntaxError {
            file: self.file.to_string(),
            row,
            col,
            span,
            message,
        }
    }

    fn push(&mut self, token: Token, span: Range<usize>) {
        let lexeme = self.lexeme(token, span);
        self.token_queue.push_back(lexeme);
    }

    fn convert_token(&mut self, raw: RawToken, span: Range<usize>) -> Result<(), SyntaxError> {
        let token = match raw {
            RawToken::NumberWord(word) => return self.convert_number(word, span),
            RawToken::Identifier(name) => Token::Identifier(name),
            RawToken::String(s) => Token::String(s),
            RawToken::Char(c) => Token::Integer(c as u64),

            RawToken::If => Token::If,
            RawToken::Else => Token::Else,
            RawToken::While => Token::While,
            RawToken::For => Token::For,
            RawToken::Incl => Token::Incl,
            RawToken::Excl => Token::Excl,
            RawToken::Step => Token::Step,
            RawToken::Return => Token::Return,
            RawToken::Continue => Token::Continue,
            RawToken::Break => Token::Break,
            RawToken::Try => Token::Try,
            RawToken::Catch => Token::Catch,
            RawToken::Silently => Token::Silently,
            RawToken::As => Token::As,
            RawToken::Throw => Token::Throw,
            RawToken::Sizeof => Token::Sizeof,
            RawToken::Typeof => Token::Typeof,
            RawToken::Scopeof => Token::Scopeof,
            RawToken::Include => Token::Include,
            RawToken::New => Token::New,
            RawToken::Scoped => Token::Scoped,
            RawToken::Delete => Token::Delete,
            RawToken::Move => Token::Move,
            RawToken::Defer => Token::Defer,
            RawToken::This => Token::This,
            RawToken::S8 => Token::S8,
            RawToken::S16 => Token::S16,
            RawToken::S32 => Token::S32,
            RawToken::S64 => Token::S64,
            RawToken::U8 => Token::U8,
            RawToken::U16 => Token::U16,
            RawToken::U32 => Token::U32,
            RawToken::U64 => Token::U64,
            RawToken::F32 => Token::F32,
            RawToken::F64 => Token::F64,
            RawToken::Bool => Token::Bool,
            RawToken::Void => Token::Void,
            RawToken::Type => Token::Type,
            RawToken::Struct => Token::Struct,
            RawToken::Const => Token::Const,
            RawToken::Extern => Token::Extern,
            RawToken::Inline => Token::Inline,
            RawToken::True => Token::True,
            RawToken::False => Token::False,
            RawToken::Null => Token::Null,

            RawToken::LParen => Token::LParen,
            RawToken::RParen => Token::RParen,
            RawToken::LBracket => Token::LBracket,
            RawToken::RBracket => Token::RBracket,
            RawToken::LBrace => Token::LBrace,
            RawToken::RBrace => Token::RBrace,
            RawToken::MinusArrow => Token::MinusArrow,
            RawToken::TildeArrow => Token::TildeArrow,
            RawToken::EqualsArrow => Token::EqualsArrow,
            RawToken::ReverseArrow => Token::ReverseArrow,
            RawToken::Comma => Token::Comma,
            RawToken::Colon => Token::Colon,
            RawToken::Semicolon => Token::Semicolon,
            RawToken::Dot => Token::Dot,
            RawToken::Plus => Token::Plus,
            RawToken::Minus => Token::Minus,
            RawToken::Slash => Token::Slash,
            RawToken::Percent => Token::Percent,
            RawToken::Star => Token::Star,
            RawToken::Hat => Token::Hat,
            RawToken::Ampersand => Token::Ampersand,
            RawToken::Pipe => Token::Pipe,
            RawToken::Question => Token::Question,
            RawToken::PlusPlus => Token::PlusPlus,
            RawToken::MinusMinus => Token::MinusMinus,
            RawToken::HatHat => Token::HatHat,
            RawToken::AmpAmp => Token::AmpAmp,
            RawToken::PipePipe => Token::PipePipe,
            RawToken::EqualEqual => Token::EqualEqual,
            RawToken::NotEqual => Token::NotEqual,
            RawToken::Less => Token::Less,
            RawToken::Greater => Token::Greater,
            RawToken::LessEqual => Token::LessEqual,
            RawToken::GreaterEqual => Token::GreaterEqual,
            RawToken::ShiftLeft => Token::ShiftLeft,
            RawToken::ShiftRight => Token::ShiftRight,
            RawToken::Equal => Token::Equal,
            RawToken::PlusEqual => Token::PlusEqual,
            RawToken::MinusEqual => Token::MinusEqual,
            RawToken::StarEqual => Token::StarEqual,
            RawToken::SlashEqual => Token::SlashEqual,
            RawToken::PercentEqual => Token::PercentEqual,
            RawToken::AmpEqual => Token::AmpEqual,
            RawToken::PipeEqual => Token::PipeEqual,
            RawToken::HatEqual => Token::HatEqual,
            RawToken::HatHatEqual => Token::HatHatEqual,
            RawToken::ShiftLeftEqual => Token::ShiftLeftEqual,
            RawToken::ShiftRightEqual => Token::ShiftRightEqual,
            RawToken::QuestionEqual => Token::QuestionEqual,
            RawToken::Tilde => Token::Tilde,
            RawToken::Bang => Token::Bang,
            RawToken::Ellipsis => Token::Ellipsis,
            RawToken::At => Token::At,
            RawToken::PlusAt => Token::PlusAt,
            RawToken::QuestionTilde => Token::QuestionTilde,
            RawToken::Hash => Token::Hash,
            RawToken::Dollar => Token::Dollar,
            RawToken::ColonColon => Token::ColonColon,
        };
        self.push(token, span);
        Ok(())
    }

    /// Numeric words become integers or floats; anything else is split at
    /// dots into identifiers, so `1.x` reads as `1` `.` `x`.
    fn convert_number(&mut self, word: String, span: Range<usize>) -> Result<(), SyntaxError> {
        match number::classify(&word) {
            Ok(Some(Number::Integer(value))) => self.push(Token::Integer(value), span),
            Ok(Some(Number::Float(value))) => self.push(Token::Float(value), span),
            Ok(None) => {
                let mut start = span.start;
                for (i, part) in word.split('.').enumerate() {
                    if i > 0 {
                        self.push(Token::Dot, start - 1..start);
                    }
                    if !part.is_empty() {
                        self.push(Token::Identifier(part.to_string()), start..start + part.len());
                    }
                    start += part.len() + 1;
                }
            }
            Err(message) => return Err(self.error(span, message)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source, "test.paw")
            .expect("lexing should succeed")
            .into_iter()
            .map(|lexeme| lexeme.token)
            .collect()
    }

    fn lex_error(source: &str) -> SyntaxError {
        tokenize(source, "test.paw").expect_err("lexing should fail")
    }

    #[test]
    fn test_declaration() {
        let source = "s32 x = 0x1F;";
        let expected_tokens = vec![
            Token::S32,
            Token::Identifier("x".to_string()),
            Token::Equal,
            Token::Integer(31),
            Token::Semicolon,
            Token::Eof,
        ];
        assert_eq!(tokens(source), expected_tokens);
    }

    #[test]
    fn test_function_literal() {
        let source = "s32<-(s32 a) f = new => { return a * 2; };";
        let mut lexer = Lexer::new(source, "test.paw");
        let expected_tokens = vec![
            Token::S32,
            Token::ReverseArrow,
            Token::LParen,
            Token::S32,
            Token::Identifier("a".to_string()),
            Token::RParen,
            Token::Identifier("f".to_string()),
            Token::Equal,
            Token::New,
            Token::EqualsArrow,
            Token::LBrace,
            Token::Return,
            Token::Identifier("a".to_string()),
            Token::Star,
            Token::Integer(2),
            Token::Semicolon,
            Token::RBrace,
            Token::Semicolon,
            Token::Eof,
        ];
        for expected in expected_tokens {
            assert_eq!(lexer.next_token().unwrap(), expected);
        }
    }

    #[test]
    fn test_longest_symbol_match() {
        assert_eq!(
            tokens("a<<=b ?~ c ^^= d +@ e ::f"),
            vec![
                Token::Identifier("a".to_string()),
                Token::ShiftLeftEqual,
                Token::Identifier("b".to_string()),
                Token::QuestionTilde,
                Token::Identifier("c".to_string()),
                Token::HatHatEqual,
                Token::Identifier("d".to_string()),
                Token::PlusAt,
                Token::Identifier("e".to_string()),
                Token::ColonColon,
                Token::Identifier("f".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_bases() {
        assert_eq!(
            tokens("0 017 0b101 42 0XfF"),
            vec![
                Token::Integer(0),
                Token::Integer(15),
                Token::Integer(5),
                Token::Integer(42),
                Token::Integer(255),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_float_forms() {
        assert_eq!(
            tokens("3.5 .25 1.5e-3 2E+2 0x1.8p3"),
            vec![
                Token::Float(3.5),
                Token::Float(0.25),
                Token::Float(1.5e-3),
                Token::Float(200.0),
                Token::Float(12.0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_just_below_max() {
        assert_eq!(
            tokens("18446744073709551615"),
            vec![Token::Integer(u64::MAX), Token::Eof]
        );
    }

    #[test]
    fn test_integer_overflow() {
        let error = lex_error("18446744073709551616");
        assert!(error.message.contains("out of range"), "got: {}", error.message);
    }

    #[test]
    fn test_float_overflow() {
        let error = lex_error("9.9e999");
        assert!(error.message.contains("out of range"), "got: {}", error.message);
    }

    #[test]
    fn test_member_access_after_number_word() {
        assert_eq!(
            tokens("1.x"),
            vec![
                Token::Identifier("1".to_string()),
                Token::Dot,
                Token::Identifier("x".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            tokens(r#""a\tb\x41é\101\"""#),
            vec![Token::String("a\tbA\u{e9}A\"".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_char_literal() {
        assert_eq!(
            tokens(r"'A' '\n'"),
            vec![Token::Integer(65), Token::Integer(10), Token::Eof]
        );
        assert_eq!(lex_error("''").message, "Empty char literal");
        assert_eq!(lex_error("'ab'").message, "Multiple characters in char literal");
    }

    #[test]
    fn test_bad_escapes() {
        assert_eq!(lex_error(r#""\q""#).message, "Invalid escape code");
        assert_eq!(lex_error(r#""\xZ1""#).message, "Not a valid digit");
        assert_eq!(lex_error("\"abc").message, "Unterminated string literal");
    }

    #[test]
    fn test_invalid_characters() {
        assert_eq!(lex_error("a ` b").message, "Invalid token");
        assert_eq!(lex_error("a \u{1} b").message, "Invalid codepoint: \\x01");
    }

    #[test]
    fn test_positions() {
        let lexemes = tokenize("s32 x;\n  x = 1;", "pos.paw").unwrap();
        let positions: Vec<(i32, i32)> = lexemes.iter().map(|l| (l.row, l.col)).collect();
        assert_eq!(
            positions,
            vec![(1, 1), (1, 5), (1, 6), (2, 3), (2, 5), (2, 7), (2, 8), (2, 9)]
        );

        let error = lex_error("s32 x;\n   `");
        assert_eq!((error.row, error.col), (2, 4));
        assert_eq!(error.file, "test.paw");
    }
}
