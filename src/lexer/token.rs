use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    If,
    Else,
    While,
    For,
    Incl,
    Excl,
    Step,
    Return,
    Continue,
    Break,
    Try,
    Catch,
    Silently,
    As,
    Throw,
    Sizeof,
    Typeof,
    Scopeof,
    Include,
    New,
    Scoped,
    Delete,
    Move,
    Defer,
    This,
    S8,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    Void,
    Type,
    Struct,
    Const,
    Extern,
    Inline,
    True,
    False,
    Null,

    // Identifiers and literals
    Identifier(String),
    Integer(u64),
    Float(f64),
    String(String),

    // Operators and punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    MinusArrow,
    TildeArrow,
    EqualsArrow,
    ReverseArrow,
    Comma,
    Colon,
    Semicolon,
    Dot,
    Plus,
    Minus,
    Slash,
    Percent,
    Star,
    Hat,
    Ampersand,
    Pipe,
    Question,
    PlusPlus,
    MinusMinus,
    HatHat,
    AmpAmp,
    PipePipe,
    EqualEqual,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    ShiftLeft,
    ShiftRight,
    Equal,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    PercentEqual,
    AmpEqual,
    PipeEqual,
    HatEqual,
    HatHatEqual,
    ShiftLeftEqual,
    ShiftRightEqual,
    QuestionEqual,
    Tilde,
    Bang,
    Ellipsis,
    At,
    PlusAt,
    QuestionTilde,
    Hash,
    Dollar,
    ColonColon,

    Eof,
}

/// A token together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub row: i32,
    pub col: i32,
    pub span: Range<usize>,
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            // Keywords
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::For => write!(f, "for"),
            Token::Incl => write!(f, "incl"),
            Token::Excl => write!(f, "excl"),
            Token::Step => write!(f, "step"),
            Token::Return => write!(f, "return"),
            Token::Continue => write!(f, "continue"),
            Token::Break => write!(f, "break"),
            Token::Try => write!(f, "try"),
            Token::Catch => write!(f, "catch"),
            Token::Silently => write!(f, "silently"),
            Token::As => write!(f, "as"),
            Token::Throw => write!(f, "throw"),
            Token::Sizeof => write!(f, "sizeof"),
            Token::Typeof => write!(f, "typeof"),
            Token::Scopeof => write!(f, "scopeof"),
            Token::Include => write!(f, "include"),
            Token::New => write!(f, "new"),
            Token::Scoped => write!(f, "scoped"),
            Token::Delete => write!(f, "delete"),
            Token::Move => write!(f, "move"),
            Token::Defer => write!(f, "defer"),
            Token::This => write!(f, "this"),
            Token::S8 => write!(f, "s8"),
            Token::S16 => write!(f, "s16"),
            Token::S32 => write!(f, "s32"),
            Token::S64 => write!(f, "s64"),
            Token::U8 => write!(f, "u8"),
            Token::U16 => write!(f, "u16"),
            Token::U32 => write!(f, "u32"),
            Token::U64 => write!(f, "u64"),
            Token::F32 => write!(f, "f32"),
            Token::F64 => write!(f, "f64"),
            Token::Bool => write!(f, "bool"),
            Token::Void => write!(f, "void"),
            Token::Type => write!(f, "type"),
            Token::Struct => write!(f, "struct"),
            Token::Const => write!(f, "const"),
            Token::Extern => write!(f, "extern"),
            Token::Inline => write!(f, "inline"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Null => write!(f, "null"),

            // Identifiers and literals
            Token::Identifier(name) => write!(f, "{}", name),
            Token::Integer(i) => write!(f, "{}", i),
            Token::Float(x) => write!(f, "{}", x),
            Token::String(s) => write!(f, "\"{}\"", s.escape_default()),

            // Operators and punctuation
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::MinusArrow => write!(f, "->"),
            Token::TildeArrow => write!(f, "~>"),
            Token::EqualsArrow => write!(f, "=>"),
            Token::ReverseArrow => write!(f, "<-"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Semicolon => write!(f, ";"),
            Token::Dot => write!(f, "."),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Star => write!(f, "*"),
            Token::Hat => write!(f, "^"),
            Token::Ampersand => write!(f, "&"),
            Token::Pipe => write!(f, "|"),
            Token::Question => write!(f, "?"),
            Token::PlusPlus => write!(f, "++"),
            Token::MinusMinus => write!(f, "--"),
            Token::HatHat => write!(f, "^^"),
            Token::AmpAmp => write!(f, "&&"),
            Token::PipePipe => write!(f, "||"),
            Token::EqualEqual => write!(f, "=="),
            Token::NotEqual => write!(f, "!="),
            Token::Less => write!(f, "<"),
            Token::Greater => write!(f, ">"),
            Token::LessEqual => write!(f, "<="),
            Token::GreaterEqual => write!(f, ">="),
            Token::ShiftLeft => write!(f, "<<"),
            Token::ShiftRight => write!(f, ">>"),
            Token::Equal => write!(f, "="),
            Token::PlusEqual => write!(f, "+="),
            Token::MinusEqual => write!(f, "-="),
            Token::StarEqual => write!(f, "*="),
            Token::SlashEqual => write!(f, "/="),
            Token::PercentEqual => write!(f, "%="),
            Token::AmpEqual => write!(f, "&="),
            Token::PipeEqual => write!(f, "|="),
            Token::HatEqual => write!(f, "^="),
            Token::HatHatEqual => write!(f, "^^="),
            Token::ShiftLeftEqual => write!(f, "<<="),
            Token::ShiftRightEqual => write!(f, ">>="),
            Token::QuestionEqual => write!(f, "?="),
            Token::Tilde => write!(f, "~"),
            Token::Bang => write!(f, "!"),
            Token::Ellipsis => write!(f, "..."),
            Token::At => write!(f, "@"),
            Token::PlusAt => write!(f, "+@"),
            Token::QuestionTilde => write!(f, "?~"),
            Token::Hash => write!(f, "#"),
            Token::Dollar => write!(f, "$"),
            Token::ColonColon => write!(f, "::"),

            Token::Eof => write!(f, "<EOF>"),
        }
    }
}
