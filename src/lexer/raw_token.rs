use logos::Logos;

/// Error produced by a token callback. `at` is an offset into the remainder
/// that followed the opening delimiter; `None` means "the token itself".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LexError {
    pub message: String,
    pub at: Option<usize>,
}

impl LexError {
    fn at(at: usize, message: &str) -> Self {
        LexError {
            message: message.to_string(),
            at: Some(at),
        }
    }
}

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(error = LexError)]
#[logos(skip r"[ \t\r\n]+")]
pub enum RawToken {
    // Keywords
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("incl")]
    Incl,
    #[token("excl")]
    Excl,
    #[token("step")]
    Step,
    #[token("return")]
    Return,
    #[token("continue")]
    Continue,
    #[token("break")]
    Break,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("silently")]
    Silently,
    #[token("as")]
    As,
    #[token("throw")]
    Throw,
    #[token("sizeof")]
    Sizeof,
    #[token("typeof")]
    Typeof,
    #[token("scopeof")]
    Scopeof,
    #[token("include")]
    Include,
    #[token("new")]
    New,
    #[token("scoped")]
    Scoped,
    #[token("delete")]
    Delete,
    #[token("move")]
    Move,
    #[token("defer")]
    Defer,
    #[token("this")]
    This,
    #[token("s8")]
    S8,
    #[token("s16")]
    S16,
    #[token("s32")]
    S32,
    #[token("s64")]
    S64,
    #[token("u8")]
    U8,
    #[token("u16")]
    U16,
    #[token("u32")]
    U32,
    #[token("u64")]
    U64,
    #[token("f32")]
    F32,
    #[token("f64")]
    F64,
    #[token("bool")]
    Bool,
    #[token("void")]
    Void,
    #[token("type")]
    Type,
    #[token("struct")]
    Struct,
    #[token("const")]
    Const,
    #[token("extern")]
    Extern,
    #[token("inline")]
    Inline,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    // Identifiers and literals
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),
    /// A word starting with a digit (or `.digit`); classified by the wrapper.
    #[regex(r"[0-9]", lex_number_word)]
    #[regex(r"\.[0-9]", lex_number_word)]
    NumberWord(String),
    #[token("\"", lex_string)]
    String(String),
    #[token("'", lex_char)]
    Char(u32),

    // Operators and punctuation
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("->")]
    MinusArrow,
    #[token("~>")]
    TildeArrow,
    #[token("=>")]
    EqualsArrow,
    #[token("<-")]
    ReverseArrow,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(";")]
    Semicolon,
    #[token(".")]
    Dot,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("*")]
    Star,
    #[token("^")]
    Hat,
    #[token("&")]
    Ampersand,
    #[token("|")]
    Pipe,
    #[token("?")]
    Question,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("^^")]
    HatHat,
    #[token("&&")]
    AmpAmp,
    #[token("||")]
    PipePipe,
    #[token("==")]
    EqualEqual,
    #[token("!=")]
    NotEqual,
    #[token("<")]
    Less,
    #[token(">")]
    Greater,
    #[token("<=")]
    LessEqual,
    #[token(">=")]
    GreaterEqual,
    #[token("<<")]
    ShiftLeft,
    #[token(">>")]
    ShiftRight,
    #[token("=")]
    Equal,
    #[token("+=")]
    PlusEqual,
    #[token("-=")]
    MinusEqual,
    #[token("*=")]
    StarEqual,
    #[token("/=")]
    SlashEqual,
    #[token("%=")]
    PercentEqual,
    #[token("&=")]
    AmpEqual,
    #[token("|=")]
    PipeEqual,
    #[token("^=")]
    HatEqual,
    #[token("^^=")]
    HatHatEqual,
    #[token("<<=")]
    ShiftLeftEqual,
    #[token(">>=")]
    ShiftRightEqual,
    #[token("?=")]
    QuestionEqual,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("...")]
    Ellipsis,
    #[token("@")]
    At,
    #[token("+@")]
    PlusAt,
    #[token("?~")]
    QuestionTilde,
    #[token("#")]
    Hash,
    #[token("$")]
    Dollar,
    #[token("::")]
    ColonColon,
}

/// Extends a numeric word: alphanumerics, a single `.`, and one sign right
/// after the first exponent marker.
fn lex_number_word(lex: &mut logos::Lexer<RawToken>) -> String {
    let mut dot_allowed = !lex.slice().starts_with('.');
    let mut can_have_sign = true;
    let mut can_be_sign = false;
    let mut len = 0;
    for &c in lex.remainder().as_bytes() {
        let mut just_set = false;
        if matches!(c, b'e' | b'E' | b'p' | b'P') && can_have_sign {
            can_be_sign = true;
            can_have_sign = false;
            just_set = true;
        }
        let accepted = c.is_ascii_alphanumeric()
            || c == b'_'
            || (c == b'.' && dot_allowed)
            || (matches!(c, b'+' | b'-') && can_be_sign);
        if !accepted {
            break;
        }
        if c == b'.' {
            dot_allowed = false;
        }
        if can_be_sign && !just_set {
            can_be_sign = false;
        }
        len += 1;
    }
    lex.bump(len);
    lex.slice().to_string()
}

fn lex_string(lex: &mut logos::Lexer<RawToken>) -> Result<String, LexError> {
    let (value, consumed) = scan_quoted(lex.remainder(), '"')?;
    lex.bump(consumed);
    Ok(value)
}

fn lex_char(lex: &mut logos::Lexer<RawToken>) -> Result<u32, LexError> {
    if lex.remainder().starts_with('\'') {
        return Err(LexError::at(0, "Empty char literal"));
    }
    let (value, consumed) = scan_quoted(lex.remainder(), '\'')?;
    let mut chars = value.chars();
    let first = chars.next().map(|c| c as u32).unwrap_or(0);
    if chars.next().is_some() {
        return Err(LexError::at(consumed - 1, "Multiple characters in char literal"));
    }
    lex.bump(consumed);
    Ok(first)
}

/// Decodes a quoted literal body up to and including `quote`.
/// Returns the decoded text and the number of bytes consumed.
fn scan_quoted(input: &str, quote: char) -> Result<(String, usize), LexError> {
    let mut out = String::new();
    let mut i = 0;
    loop {
        let Some(c) = input[i..].chars().next() else {
            return Err(LexError::at(i, "Unterminated string literal"));
        };
        if c == quote {
            return Ok((out, i + 1));
        }
        if c == '\\' {
            i = decode_escape(input.as_bytes(), i + 1, &mut out)?;
        } else {
            out.push(c);
            i += c.len_utf8();
        }
    }
}

fn decode_escape(bytes: &[u8], i: usize, out: &mut String) -> Result<usize, LexError> {
    let Some(&c) = bytes.get(i) else {
        return Err(LexError::at(i, "Unterminated string literal"));
    };
    let simple = match c {
        b'a' => Some('\x07'),
        b'b' => Some('\x08'),
        b'e' => Some('\x1b'),
        b'f' => Some('\x0c'),
        b'n' | b'\n' => Some('\n'),
        b'r' => Some('\r'),
        b't' => Some('\t'),
        b'v' => Some('\x0b'),
        b'"' => Some('"'),
        b'\\' => Some('\\'),
        b'\'' => Some('\''),
        _ => None,
    };
    if let Some(ch) = simple {
        out.push(ch);
        return Ok(i + 1);
    }
    let (radix, max_digits, start) = match c {
        b'x' => (16, 2, i + 1),
        b'u' => (16, 4, i + 1),
        b'U' => (16, 8, i + 1),
        b'0'..=b'7' => (8, 3, i),
        _ => return Err(LexError::at(i, "Invalid escape code")),
    };
    let mut value: u32 = 0;
    let mut j = start;
    for _ in 0..max_digits {
        match bytes.get(j).and_then(|&b| (b as char).to_digit(radix)) {
            Some(digit) => {
                value = value.wrapping_mul(radix).wrapping_add(digit);
                j += 1;
            }
            None if radix == 8 => break,
            None => return Err(LexError::at(j, "Not a valid digit")),
        }
    }
    match char::from_u32(value) {
        Some(ch) => out.push(ch),
        None => return Err(LexError::at(start, "Invalid escape code")),
    }
    Ok(j)
}
