//! Recursive-descent parser that writes position-annotated postfix bytecode.
//!
//! Statements and operands are parsed top-down; infix expressions go through
//! a shunting-yard pass over serialized operand fragments (see `expr.rs`).

mod expr;
mod operand;
#[cfg(test)]
mod tests;

use std::mem::discriminant;

use crate::lexer::{Lexeme, SyntaxError, Token, tokenize};
use crate::vm::bytecode::{BytecodeWriter, CaptureMode, Opcode};
use crate::vm::strings::{StrId, StringPool};

pub type ParseResult<T> = Result<T, SyntaxError>;

/// Lexes and parses `source` into a bytecode buffer.
pub fn compile(source: &str, file: &str, strings: &mut StringPool) -> ParseResult<Vec<u8>> {
    let tokens = tokenize(source, file)?;
    tracing::debug!(file, tokens = tokens.len(), "lexed");
    let bytes = parse(tokens, file, strings)?;
    tracing::debug!(file, bytes = bytes.len(), "parsed");
    Ok(bytes)
}

/// Consumes the whole token stream. The output starts with the file name and
/// ends with `End`.
pub fn parse(tokens: Vec<Lexeme>, file: &str, strings: &mut StringPool) -> ParseResult<Vec<u8>> {
    let mut parser = Parser::new(tokens, file, strings);
    let mut buf = BytecodeWriter::new();
    let file_id = parser.strings.intern(file);
    buf.str(file_id);
    while !parser.at_eof() {
        parser.parse_command(&mut buf)?;
    }
    buf.end();
    Ok(buf.into_bytes())
}

pub struct Parser<'a> {
    tokens: Vec<Lexeme>,
    pos: usize,
    file: String,
    strings: &'a mut StringPool,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<Lexeme>, file: &str, strings: &'a mut StringPool) -> Self {
        Parser {
            tokens,
            pos: 0,
            file: file.to_string(),
            strings,
        }
    }

    // ----- token queue -----

    fn peek(&self) -> Lexeme {
        match self.tokens.get(self.pos).or_else(|| self.tokens.last()) {
            Some(lexeme) => lexeme.clone(),
            None => Lexeme {
                token: Token::Eof,
                row: 1,
                col: 1,
                span: 0..0,
            },
        }
    }

    fn at_eof(&self) -> bool {
        self.peek().token == Token::Eof
    }

    fn pop(&mut self) -> Lexeme {
        let lexeme = self.peek();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        lexeme
    }

    /// Consumes the next token if it has the same kind as `token`.
    fn expect(&mut self, token: &Token) -> Option<Lexeme> {
        let next = self.tokens.get(self.pos)?;
        if discriminant(&next.token) != discriminant(token) {
            return None;
        }
        if *token == Token::Eof {
            return None;
        }
        Some(self.pop())
    }

    fn expect_identifier(&mut self) -> Option<(StrId, Lexeme)> {
        match self.tokens.get(self.pos) {
            Some(Lexeme {
                token: Token::Identifier(name),
                ..
            }) => {
                let id = self.strings.intern(name);
                Some((id, self.pop()))
            }
            _ => None,
        }
    }

    fn expect_string(&mut self) -> Option<(StrId, Lexeme)> {
        match self.tokens.get(self.pos) {
            Some(Lexeme {
                token: Token::String(text),
                ..
            }) => {
                let id = self.strings.intern(text);
                Some((id, self.pop()))
            }
            _ => None,
        }
    }

    /// Builds an error located at the offending (consumed) token.
    fn fail<T>(&mut self, message: &str) -> ParseResult<T> {
        let at = self.pop();
        Err(self.error_at(&at, message))
    }

    fn error_at(&self, at: &Lexeme, message: &str) -> SyntaxError {
        SyntaxError {
            file: self.file.clone(),
            row: at.row,
            col: at.col,
            span: at.span.clone(),
            message: message.to_string(),
        }
    }

    fn require(&mut self, token: &Token, message: &str) -> ParseResult<Lexeme> {
        match self.expect(token) {
            Some(lexeme) => Ok(lexeme),
            None => self.fail(message),
        }
    }

    fn require_identifier(&mut self) -> ParseResult<StrId> {
        match self.expect_identifier() {
            Some((id, _)) => Ok(id),
            None => self.fail("Expected identifier"),
        }
    }

    /// `[=]`, `[~]` or `[$]`; absent means no capture.
    fn parse_capture_mode(&mut self) -> ParseResult<CaptureMode> {
        if self.expect(&Token::LBracket).is_none() {
            return Ok(CaptureMode::None);
        }
        let mode = if self.expect(&Token::Equal).is_some() {
            CaptureMode::CopyPerCall
        } else if self.expect(&Token::Tilde).is_some() {
            CaptureMode::CopyOnce
        } else if self.expect(&Token::Dollar).is_some() {
            CaptureMode::Shared
        } else {
            return self.fail("Expected '=', `~` or '$'");
        };
        self.require(&Token::RBracket, "Expected ']'")?;
        Ok(mode)
    }

    // ----- commands -----

    /// `=> command` or `{ commands }`, followed by `End`. `start` is the
    /// already consumed opener, if any.
    fn parse_codeblock(&mut self, buf: &mut BytecodeWriter, start: Option<Lexeme>) -> ParseResult<()> {
        let opener = match start {
            Some(lexeme) => Some(lexeme.token),
            None => {
                if self.expect(&Token::EqualsArrow).is_some() {
                    Some(Token::EqualsArrow)
                } else if self.expect(&Token::LBrace).is_some() {
                    Some(Token::LBrace)
                } else {
                    None
                }
            }
        };
        match opener {
            Some(Token::EqualsArrow) => self.parse_command(buf)?,
            Some(Token::LBrace) => {
                while self.expect(&Token::RBrace).is_none() {
                    if self.at_eof() {
                        return self.fail("Expected '}'");
                    }
                    self.parse_command(buf)?;
                }
            }
            _ => return self.fail("Expected '=>' or '{'"),
        }
        buf.end();
        Ok(())
    }

    fn parse_pushed_codeblock(&mut self, buf: &mut BytecodeWriter) -> ParseResult<()> {
        buf.push();
        self.parse_codeblock(buf, None)?;
        buf.pop();
        Ok(())
    }

    pub fn parse_command(&mut self, buf: &mut BytecodeWriter) -> ParseResult<()> {
        if let Some(tok) = self.expect(&Token::If) {
            return self.parse_if(buf, tok);
        }
        if let Some(tok) = self.expect(&Token::While) {
            buf.op(Opcode::While, tok.row, tok.col);
            self.parse_expression(buf, false)?;
            buf.push();
            if self.expect(&Token::Semicolon).is_some() {
                buf.end();
            } else {
                self.parse_codeblock(buf, None)?;
            }
            buf.pop();
            return Ok(());
        }
        if let Some(tok) = self.expect(&Token::For) {
            return self.parse_for(buf, tok);
        }
        if let Some(tok) = self.expect(&Token::Return) {
            buf.op(Opcode::Return, tok.row, tok.col);
            if self.expect(&Token::Semicolon).is_some() {
                buf.bool(false);
            } else {
                buf.bool(true);
                self.parse_expression(buf, false)?;
                self.require(&Token::Semicolon, "Expected ';'")?;
            }
            return Ok(());
        }
        if let Some(tok) = self.expect(&Token::Continue) {
            buf.op(Opcode::Continue, tok.row, tok.col);
            self.require(&Token::Semicolon, "Expected ';'")?;
            return Ok(());
        }
        if let Some(tok) = self.expect(&Token::Break) {
            buf.op(Opcode::Break, tok.row, tok.col);
            self.require(&Token::Semicolon, "Expected ';'")?;
            return Ok(());
        }
        if let Some(tok) = self.expect(&Token::Try) {
            return self.parse_try(buf, tok);
        }
        if let Some(tok) = self.expect(&Token::Throw) {
            buf.op(Opcode::Throw, tok.row, tok.col);
            self.parse_expression(buf, false)?;
            if self.expect(&Token::As).is_some() {
                let Some((message, _)) = self.expect_string() else {
                    return self.fail("Expected a string literal");
                };
                buf.bool(true).str(message);
            } else {
                buf.bool(false);
            }
            self.require(&Token::Semicolon, "Expected ';'")?;
            return Ok(());
        }
        let opener = self
            .expect(&Token::EqualsArrow)
            .or_else(|| self.expect(&Token::LBrace));
        if let Some(tok) = opener {
            buf.op(Opcode::Codeblock, tok.row, tok.col);
            buf.push();
            self.parse_codeblock(buf, Some(tok))?;
            buf.pop();
            return Ok(());
        }
        if self.expect(&Token::Semicolon).is_some() {
            return Ok(());
        }
        let at = self.peek();
        buf.op(Opcode::Expr, at.row, at.col);
        let require_semicolon = self.parse_expression(buf, false)?;
        if require_semicolon {
            self.require(&Token::Semicolon, "Expected ';'")?;
        }
        Ok(())
    }

    /// `if c {..} [else if c {..}]* [else {..}]`. An `else if` is stored as an
    /// else block holding the nested `if`.
    fn parse_if(&mut self, buf: &mut BytecodeWriter, tok: Lexeme) -> ParseResult<()> {
        buf.op(Opcode::If, tok.row, tok.col);
        self.parse_expression(buf, false)?;
        self.parse_pushed_codeblock(buf)?;
        if self.expect(&Token::Else).is_none() {
            buf.bool(false);
            return Ok(());
        }
        buf.bool(true);
        if let Some(nested) = self.expect(&Token::If) {
            buf.push();
            self.parse_if(buf, nested)?;
            buf.end();
            buf.pop();
            return Ok(());
        }
        self.parse_pushed_codeblock(buf)
    }

    /// `for T i: lo [incl|excl] => hi [incl|excl] [step s] body`.
    /// Both bounds are inclusive unless marked `excl`.
    fn parse_for(&mut self, buf: &mut BytecodeWriter, tok: Lexeme) -> ParseResult<()> {
        buf.op(Opcode::For, tok.row, tok.col);
        self.parse_expression(buf, true)?;
        let name = self.require_identifier()?;
        buf.str(name);
        self.require(&Token::Colon, "Expected ':'")?;
        self.parse_expression(buf, false)?;
        let lo_excl = self.parse_bound_mode();
        buf.bool(lo_excl);
        self.require(&Token::EqualsArrow, "Expected '=>'")?;
        self.parse_expression(buf, false)?;
        let hi_excl = self.parse_bound_mode();
        buf.bool(hi_excl);
        if self.expect(&Token::Step).is_some() {
            buf.bool(true);
            self.parse_expression(buf, false)?;
        } else {
            buf.bool(false);
        }
        self.parse_pushed_codeblock(buf)
    }

    fn parse_bound_mode(&mut self) -> bool {
        if self.expect(&Token::Excl).is_some() {
            return true;
        }
        self.expect(&Token::Incl);
        false
    }

    fn parse_try(&mut self, buf: &mut BytecodeWriter, tok: Lexeme) -> ParseResult<()> {
        buf.op(Opcode::Try, tok.row, tok.col);
        self.parse_pushed_codeblock(buf)?;
        if self.expect(&Token::Catch).is_none() {
            buf.bool(false);
            return Ok(());
        }
        buf.bool(true);
        let mut silently = self.expect(&Token::Silently).is_some();
        buf.bool(silently);
        if self.expect(&Token::As).is_some() {
            silently = false;
            let name = self.require_identifier()?;
            buf.bool(true).str(name);
        } else {
            buf.bool(false);
        }
        if silently && self.expect(&Token::Semicolon).is_some() {
            buf.push().end().pop();
            return Ok(());
        }
        self.parse_pushed_codeblock(buf)
    }
}
