use std::rc::Rc;
use strum::{Display, FromRepr};

use super::strings::StrId;

// ========== 노드 정의 ==========

/// 바이트코드 노드. 모든 노드는 opcode, i32 row, i32 col, 피연산자 순으로 기록된다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum Opcode {
    End,

    // commands
    If,
    While,
    For,
    Return,
    Continue,
    Break,
    Try,
    Throw,
    Codeblock,
    Expr,

    // suffix unary operators
    Const,
    SuffixIncrement,
    SuffixDecrement,
    Pointer,
    Array,
    Call,
    Function,
    GetSize,
    GetLength,
    GetScope,
    WalkStruct,

    // prefix unary operators
    PrefixIncrement,
    PrefixDecrement,
    Address,
    Dereference,
    ArithPlus,
    ArithNegate,
    LogicNegate,
    BinaryNegate,

    // operands
    Integer,
    Float,
    String,
    Type,
    Truthy,
    Null,
    Variable,
    Paren,
    Defer,
    Varargs,
    Sizeof,
    Typeof,
    Scopeof,
    New,
    Delete,
    Move,
    Ternary,
    Decl,
    Include,

    // binary operators
    Power,
    Multiplication,
    Division,
    Modulo,
    Addition,
    Subtraction,
    ShiftLeft,
    ShiftRight,
    Elvis,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equals,
    NotEquals,
    BitAnd,
    BitOr,
    BitXor,
    LogicalAnd,
    LogicalOr,
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    PowAssign,
    ModAssign,
    ShlAssign,
    ShrAssign,
    AndAssign,
    OrAssign,
    XorAssign,
    ElvisAssign,
    Cast,
    Bitcast,
}

/// 연산자가 소스에서 어떤 모양으로 쓰였는지 (에러 메시지 렌더링용)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorFormat {
    Prefix,
    Suffix,
    Binary,
    Array,
    Call,
    Function,
    Member,
}

impl Opcode {
    /// 이항 연산자의 (우선순위, 우결합 여부)
    pub fn binary_info(self) -> Option<(u8, bool)> {
        use Opcode::*;
        let info = match self {
            Cast | Bitcast => (14, false),
            Power => (13, false),
            Multiplication | Division | Modulo => (12, false),
            Addition | Subtraction => (11, false),
            ShiftLeft | ShiftRight => (10, false),
            Less | Greater | LessEqual | GreaterEqual => (9, false),
            Equals | NotEquals => (8, false),
            BitAnd => (7, false),
            BitXor => (6, false),
            BitOr => (5, false),
            LogicalAnd => (4, false),
            LogicalOr => (3, false),
            Elvis => (2, false),
            Assign | AddAssign | SubAssign | MulAssign | DivAssign | PowAssign | ModAssign
            | ShlAssign | ShrAssign | AndAssign | OrAssign | XorAssign | ElvisAssign => (1, true),
            _ => return None,
        };
        Some(info)
    }

    /// 복합 대입 연산자가 내부적으로 수행하는 연산
    pub fn compound_base(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            AddAssign => Addition,
            SubAssign => Subtraction,
            MulAssign => Multiplication,
            DivAssign => Division,
            PowAssign => Power,
            ModAssign => Modulo,
            ShlAssign => ShiftLeft,
            ShrAssign => ShiftRight,
            AndAssign => BitAnd,
            OrAssign => BitOr,
            XorAssign => BitXor,
            ElvisAssign => Elvis,
            _ => return None,
        })
    }

    pub fn is_operator(self) -> bool {
        self.operator_format().is_some()
    }

    pub fn operator_format(self) -> Option<OperatorFormat> {
        use Opcode::*;
        if self.binary_info().is_some() {
            return Some(OperatorFormat::Binary);
        }
        Some(match self {
            PrefixIncrement | PrefixDecrement | Address | Dereference | ArithPlus
            | ArithNegate | LogicNegate | BinaryNegate => OperatorFormat::Prefix,
            Const | SuffixIncrement | SuffixDecrement | Pointer | WalkStruct => {
                OperatorFormat::Suffix
            }
            Array => OperatorFormat::Array,
            Call => OperatorFormat::Call,
            Function => OperatorFormat::Function,
            GetSize | GetLength | GetScope => OperatorFormat::Member,
            _ => return None,
        })
    }

    /// 연산자의 소스 표기
    pub fn symbol(self) -> &'static str {
        use Opcode::*;
        match self {
            Cast => "->",
            Bitcast => "~>",
            Power => "^^",
            Multiplication => "*",
            Division => "/",
            Modulo => "%",
            Addition | ArithPlus => "+",
            Subtraction | ArithNegate => "-",
            ShiftLeft => "<<",
            ShiftRight => ">>",
            Less => "<",
            Greater => ">",
            LessEqual => "<=",
            GreaterEqual => ">=",
            Equals => "==",
            NotEquals => "!=",
            BitAnd => "&",
            BitXor => "^",
            BitOr => "|",
            LogicalAnd => "&&",
            LogicalOr => "||",
            Elvis => "?",
            Assign => "=",
            AddAssign => "+=",
            SubAssign => "-=",
            MulAssign => "*=",
            DivAssign => "/=",
            PowAssign => "^^=",
            ModAssign => "%=",
            ShlAssign => "<<=",
            ShrAssign => ">>=",
            AndAssign => "&=",
            OrAssign => "|=",
            XorAssign => "^=",
            ElvisAssign => "?=",
            PrefixIncrement | SuffixIncrement => "++",
            PrefixDecrement | SuffixDecrement => "--",
            Address => "$",
            Dereference | Pointer => "#",
            LogicNegate => "!",
            BinaryNegate => "~",
            Const => " const",
            WalkStruct => ".",
            Array => "[",
            Call => "(",
            Function => "<-",
            GetSize => "::size",
            GetLength => "::length",
            GetScope => "::scope",
            _ => "?",
        }
    }
}

/// 함수 생성 시 주변 변수를 어떻게 붙잡을지
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub enum CaptureMode {
    None,
    Shared,
    CopyPerCall,
    CopyOnce,
}

/// `new` 뒤에 오는 초기화 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr)]
#[repr(u8)]
pub enum AllocForm {
    None,
    Scalar,
    Struct,
    Function,
    Array,
}

// ========== 청크 ==========

/// 한 컴파일 단위의 바이트코드. 함수 본문은 청크 안의 (entry, len) 구간으로 참조된다.
#[derive(Debug)]
pub struct Chunk {
    pub bytes: Vec<u8>,
}

impl Chunk {
    pub fn new(bytes: Vec<u8>) -> Rc<Self> {
        Rc::new(Chunk { bytes })
    }
}

// ========== 쓰기 ==========

#[derive(Debug, Default)]
pub struct BytecodeWriter {
    bytes: Vec<u8>,
    marks: Vec<usize>,
}

impl BytecodeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// 노드 헤더 (opcode, row, col)
    pub fn op(&mut self, op: Opcode, row: i32, col: i32) -> &mut Self {
        self.u8(op as u8).i32(row).i32(col)
    }

    pub fn end(&mut self) -> &mut Self {
        self.u8(Opcode::End as u8)
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.u8(value as u8)
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn f64(&mut self, value: f64) -> &mut Self {
        self.u64(value.to_bits())
    }

    pub fn str(&mut self, id: StrId) -> &mut Self {
        self.u32(id.0)
    }

    /// 길이 접두 블록 시작. 길이는 `pop`에서 채운다.
    pub fn push(&mut self) -> &mut Self {
        self.marks.push(self.bytes.len());
        self.u32(0)
    }

    pub fn pop(&mut self) -> &mut Self {
        if let Some(off) = self.marks.pop() {
            let len = (self.bytes.len() - off - 4) as u32;
            self.bytes[off..off + 4].copy_from_slice(&len.to_le_bytes());
        }
        self
    }

    pub fn merge(&mut self, other: BytecodeWriter) -> &mut Self {
        self.bytes.extend_from_slice(&other.bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

// ========== 읽기 ==========

/// 청크 위의 커서. 구간을 벗어난 읽기는 0(`End`)을 돌려준다.
#[derive(Debug, Clone)]
pub struct BytecodeReader {
    chunk: Rc<Chunk>,
    end: usize,
    pos: usize,
}

impl BytecodeReader {
    pub fn new(chunk: Rc<Chunk>) -> Self {
        let end = chunk.bytes.len();
        BytecodeReader { chunk, end, pos: 0 }
    }

    pub fn slice(chunk: Rc<Chunk>, start: usize, len: usize) -> Self {
        let end = (start + len).min(chunk.bytes.len());
        BytecodeReader {
            chunk,
            end,
            pos: start,
        }
    }

    pub fn chunk(&self) -> &Rc<Chunk> {
        &self.chunk
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) -> &mut Self {
        self.pos = pos;
        self
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.end
    }

    pub fn finish(&mut self) {
        self.pos = self.end;
    }

    fn read<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if self.pos + N <= self.end {
            out.copy_from_slice(&self.chunk.bytes[self.pos..self.pos + N]);
        }
        self.pos += N;
        out
    }

    pub fn u8(&mut self) -> u8 {
        self.read::<1>()[0]
    }

    pub fn bool(&mut self) -> bool {
        self.u8() != 0
    }

    pub fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.read())
    }

    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.read())
    }

    pub fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.read())
    }

    pub fn f64(&mut self) -> f64 {
        f64::from_bits(self.u64())
    }

    pub fn str(&mut self) -> StrId {
        StrId(self.u32())
    }

    pub fn opcode(&mut self) -> Opcode {
        Opcode::from_repr(self.u8()).unwrap_or(Opcode::End)
    }

    pub fn capture_mode(&mut self) -> CaptureMode {
        CaptureMode::from_repr(self.u8()).unwrap_or(CaptureMode::None)
    }

    pub fn alloc_form(&mut self) -> AllocForm {
        AllocForm::from_repr(self.u8()).unwrap_or(AllocForm::None)
    }

    /// 길이 접두 블록 안으로 들어가는 서브 리더를 만들고, 자신은 블록 뒤로 건너뛴다.
    pub fn enter(&mut self) -> BytecodeReader {
        let len = self.u32() as usize;
        let start = self.pos;
        self.pos += len;
        BytecodeReader {
            chunk: self.chunk.clone(),
            end: (start + len).min(self.end),
            pos: start,
        }
    }

    /// 블록 하나를 읽지 않고 건너뛴다. 건너뛴 블록의 (시작, 길이)를 돌려준다.
    pub fn skip(&mut self) -> (usize, usize) {
        let len = self.u32() as usize;
        let start = self.pos;
        self.pos += len;
        (start, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_patches_length() {
        let mut w = BytecodeWriter::new();
        w.op(Opcode::If, 1, 2).push();
        w.u64(7).end();
        w.pop().bool(false);
        let chunk = Chunk::new(w.into_bytes());
        let mut r = BytecodeReader::new(chunk);
        assert_eq!(r.opcode(), Opcode::If);
        assert_eq!((r.i32(), r.i32()), (1, 2));
        let mut inner = r.enter();
        assert_eq!(inner.u64(), 7);
        assert_eq!(inner.opcode(), Opcode::End);
        assert!(inner.at_end());
        assert!(!r.bool());
        assert!(r.at_end());
    }

    #[test]
    fn test_reading_past_end_yields_end() {
        let mut r = BytecodeReader::new(Chunk::new(vec![Opcode::Expr as u8]));
        assert_eq!(r.opcode(), Opcode::Expr);
        assert_eq!(r.opcode(), Opcode::End);
        assert_eq!(r.u64(), 0);
    }

    #[test]
    fn test_binary_info_matches_precedence_table() {
        assert_eq!(Opcode::Cast.binary_info(), Some((14, false)));
        assert_eq!(Opcode::Elvis.binary_info(), Some((2, false)));
        assert_eq!(Opcode::ElvisAssign.binary_info(), Some((1, true)));
        assert_eq!(Opcode::Call.binary_info(), None);
        assert_eq!(Opcode::AddAssign.compound_base(), Some(Opcode::Addition));
    }
}
