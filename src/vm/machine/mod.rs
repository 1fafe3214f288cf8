// machine 모듈 - 인터프리터
//
// 바이트코드 노드를 재귀적으로 실행한다. 식은 후위 표기 스택 머신으로, 명령은
// 블록 단위로 실행된다. 변수는 렉시컬 레벨 스택에, 호출은 프레임 스택에 쌓인다.

use std::cmp::Reverse;
use std::ops::Range;
use std::path::Path;

use strum::Display;
use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::lexer::SyntaxError;
use crate::parser;
use crate::runtime_io::{RuntimeIo, SourceLoader};
use crate::types::{DeferTarget, TypeCache, TypeId, TypeKind};
use crate::vm::bytecode::{BytecodeReader, Chunk};
use crate::vm::disasm::disassemble;
use crate::vm::fault;
use crate::vm::function::FunctionTable;
use crate::vm::heap::{AllocId, Allocation, Cleanup, Heap};
use crate::vm::jit::StubCompiler;
use crate::vm::scope::{Frame, Scopes};
use crate::vm::strings::{StrId, StringPool};
use crate::vm::symbols::SymbolTable;
use crate::vm::value::{Origin, Slot, Variable};

// 서브모듈
mod call;
mod expr;
mod ops;
mod stmt;
mod structs;

#[cfg(test)]
mod tests;

// ========== 타입 정의 ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum VmErrorKind {
    Syntax,
    Runtime,
    Fault,
    Thrown,
}

/// 에러 발생 시점의 호출 프레임 (안쪽부터)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub name: String,
    pub file: String,
    pub row: i32,
    pub col: i32,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct VmError {
    pub kind: VmErrorKind,
    pub message: String,
    pub frames: Vec<TraceFrame>,
    /// `throw`로 던진 값
    pub payload: Option<Variable>,
    /// 구문 에러의 소스 구간
    pub span: Option<Range<usize>>,
}

pub type VmResult<T> = Result<T, VmError>;

pub fn err(kind: VmErrorKind, message: impl Into<String>) -> VmError {
    VmError {
        kind,
        message: message.into(),
        frames: Vec::new(),
        payload: None,
        span: None,
    }
}

impl VmError {
    /// `Error: msg` 다음 줄부터 프레임마다 `  in name at file (row:col)`
    pub fn report(&self) -> String {
        let mut out = format!("Error: {}", self.message);
        for frame in &self.frames {
            out.push_str(&format!(
                "\n  in {} at {} ({}:{})",
                frame.name, frame.file, frame.row, frame.col
            ));
        }
        out
    }
}

impl From<SyntaxError> for VmError {
    fn from(e: SyntaxError) -> Self {
        VmError {
            kind: VmErrorKind::Syntax,
            message: e.message,
            frames: vec![TraceFrame {
                name: "<syntax>".to_string(),
                file: e.file,
                row: e.row,
                col: e.col,
            }],
            payload: None,
            span: Some(e.span),
        }
    }
}

/// 명령 실행 후 제어 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Return,
    Continue,
    Break,
}

// ========== VM ==========

pub struct Vm {
    pub types: TypeCache,
    pub strings: StringPool,
    pub heap: Heap,
    pub scopes: Scopes,
    pub frames: Vec<Frame>,
    pub functions: FunctionTable,
    pub config: RuntimeConfig,
    pub io: Box<dyn RuntimeIo>,
    pub loader: Box<dyn SourceLoader>,
    pub symbols: SymbolTable,
    stubs: Option<StubCompiler>,
    state: State,
    state_var: Option<Variable>,
    pending_error: Option<VmError>,
}

impl Vm {
    /// 스텁이 VM 주소를 기억하므로 항상 Box 안에서 만든다.
    pub fn new(
        config: RuntimeConfig,
        io: Box<dyn RuntimeIo>,
        loader: Box<dyn SourceLoader>,
        symbols: SymbolTable,
    ) -> Box<Vm> {
        let mut strings = StringPool::new();
        let memory = strings.intern("<memory>");
        let types = TypeCache::new();
        let void = types.void();
        let mut vm = Box::new(Vm {
            types,
            strings,
            heap: Heap::new(),
            scopes: Scopes::new(),
            frames: vec![Frame::new(StrId::GLOBAL, memory, 0)],
            functions: FunctionTable::new(),
            config,
            io,
            loader,
            symbols,
            stubs: None,
            state: State::Running,
            state_var: None,
            pending_error: None,
        });
        vm.scopes.push();
        vm.scopes
            .declare(StrId::RESULT, Variable::slot(void, Slot::new(0)));
        vm
    }

    // ========== 에러 ==========

    /// 폴트 복구 구간이 남긴 폴트를 에러로 올린다.
    pub(crate) fn check_fault(&self) -> VmResult<()> {
        match fault::take_pending() {
            Some(address) => Err(self.fault_error(address)),
            None => Ok(()),
        }
    }

    pub(crate) fn fault_error(&self, address: usize) -> VmError {
        self.error_of(
            VmErrorKind::Fault,
            format!("Invalid memory access at {:#x}", address),
        )
    }

    /// 현재 호출 스택을 붙인 런타임 에러
    pub fn error(&self, message: impl Into<String>) -> VmError {
        self.error_of(VmErrorKind::Runtime, message)
    }

    pub fn error_of(&self, kind: VmErrorKind, message: impl Into<String>) -> VmError {
        let mut e = err(kind, message);
        e.frames = self.trace();
        e
    }

    fn trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                name: self.strings.resolve(frame.name).to_string(),
                file: self.strings.resolve(frame.file).to_string(),
                row: frame.row,
                col: frame.col,
            })
            .collect()
    }

    pub fn log_error(&mut self, e: &VmError) {
        let report = e.report();
        self.io.write_error_line(&report);
    }

    /// 네이티브 프레임 안에서 생긴 에러를 보관한다. 먼저 보관된 에러가 우선한다.
    pub(crate) fn park_error(&mut self, e: VmError) {
        if self.pending_error.is_none() {
            self.pending_error = Some(e);
        }
    }

    pub(crate) fn take_parked(&mut self) -> VmResult<()> {
        match self.pending_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ========== 프레임 / 레벨 ==========

    pub fn frame(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.base)
    }

    pub fn top_level(&self) -> usize {
        self.scopes.depth().saturating_sub(1)
    }

    pub fn restore_position(&mut self, (row, col): (i32, i32)) {
        let frame = self.frame_mut();
        frame.row = row;
        frame.col = col;
    }

    pub fn set_position(&mut self, row: i32, col: i32) -> (i32, i32) {
        let frame = self.frame_mut();
        let saved = (frame.row, frame.col);
        frame.row = row;
        frame.col = col;
        saved
    }

    pub fn current_file(&self) -> &str {
        self.strings.resolve(self.frame().file)
    }

    pub fn push_level(&mut self) {
        self.scopes.push();
    }

    /// 가장 안쪽 레벨을 닫는다.
    ///
    /// 구조체 할당(소멸자 있음)을 먼저, 나머지를 나중에, 각각 최신 것부터 해제한 뒤
    /// 변수를 선언 순서대로 놓는다.
    pub fn pop_level(&mut self) {
        let Some(mut level) = self.scopes.pop() else {
            return;
        };
        let mut order: Vec<(bool, u64, AllocId)> = level
            .allocs
            .drain(..)
            .filter_map(|id| {
                let a = self.heap.get(id)?;
                Some((a.cleanup != Cleanup::Struct, a.seq, id))
            })
            .collect();
        order.sort_by_key(|&(plain, seq, _)| (plain, Reverse(seq)));
        let depth = self.scopes.depth();
        for (_, _, id) in order {
            if let Some(allocation) = self.heap.take(id) {
                self.finalize(allocation, depth);
            }
        }
        drop(level.drain_vars());
    }

    /// 프레임과 레벨을 주어진 깊이까지 되돌린다 (try, 최상위 실행 종료).
    pub fn unwind_to(&mut self, depth: usize, frames: usize) {
        let frames = frames.max(1);
        if self.frames.len() > frames {
            tracing::debug!(from = self.frames.len(), to = frames, "unwinding frames");
            self.frames.truncate(frames);
        }
        while self.scopes.depth() > depth {
            self.pop_level();
        }
    }

    // ========== 할당 ==========

    pub fn allocate(&mut self, size: u64, ty: TypeId, scoped: bool, cleanup: Cleanup) -> VmResult<u64> {
        let level = if scoped { self.top_level() } else { 0 };
        let Some((id, addr)) = self.heap.allocate(size, ty, level, cleanup) else {
            return Err(self.error(format!("Cannot allocate {} bytes", size)));
        };
        self.scopes.add_alloc(level, id);
        Ok(addr as u64)
    }

    /// 해제 직전 정리. 소멸자 에러는 로그로 남기고 삼킨다.
    fn finalize(&mut self, allocation: Allocation, depth: usize) {
        match allocation.cleanup {
            Cleanup::Struct => {
                let frames = self.frames.len();
                if let Err(e) = self.destruct(allocation.ty, allocation.addr) {
                    tracing::warn!(error = %e.message, "destructor failed");
                    self.log_error(&e);
                    self.unwind_to(depth, frames);
                    self.state = State::Running;
                }
            }
            Cleanup::Function(id) => {
                self.functions.release(id);
            }
            Cleanup::None => {}
        }
        self.heap.release(allocation);
    }

    /// `delete(x)`: 추적 중인 할당이면 바로 해제한다.
    pub fn free(&mut self, addr: u64) {
        let Some(id) = self.heap.find(addr) else {
            return;
        };
        if let Some(level) = self.heap.get(id).map(|a| a.level) {
            self.scopes.remove_alloc(level, id);
        }
        if let Some(allocation) = self.heap.take(id) {
            let depth = self.scopes.depth();
            self.finalize(allocation, depth);
        }
    }

    /// `move(x) => [level]`
    pub fn move_allocation(&mut self, addr: u64, level: usize) {
        let Some(id) = self.heap.find(addr) else {
            return;
        };
        if let Some(old) = self.heap.get(id).map(|a| a.level) {
            self.scopes.remove_alloc(old, id);
        }
        self.heap.set_level(id, level);
        self.scopes.add_alloc(level, id);
    }

    // ========== 변수 ==========

    /// 이름으로 변수를 찾는다. const 변수는 rvalue로 나온다.
    pub fn load(&self, name: StrId) -> Option<Variable> {
        let var = self.scopes.lookup(name, self.base())?;
        let mut var = if self.types.get(var.ty).is_const() {
            var.to_rvalue(&self.types)
        } else {
            var.clone()
        };
        if var.origin.is_none() {
            var.origin = Some(Origin { name, this: None });
        }
        Some(var)
    }

    pub fn require(&self, name: StrId) -> VmResult<Variable> {
        self.load(name).ok_or_else(|| {
            self.error(format!("Variable '{}' not found", self.strings.resolve(name)))
        })
    }

    /// 가장 안쪽 레벨에 변수를 만든다. 돌려주는 값은 항상 lvalue다.
    pub fn store(&mut self, name: StrId, var: Variable) -> VmResult<Variable> {
        if !self.scopes.declare(name, var.clone()) {
            return Err(self.error(format!(
                "Variable '{}' already exists in the current scope",
                self.strings.resolve(name)
            )));
        }
        Ok(var)
    }

    /// 새 저장 칸을 가진 변수
    pub fn fresh(&self, ty: TypeId, bits: u64) -> Variable {
        let var = Variable::slot(ty, Slot::new(0));
        var.store(&self.types, bits);
        var
    }

    // ========== 타입 ==========

    pub fn void_value(&self) -> Variable {
        Variable::rvalue(self.types.void(), 0)
    }

    pub fn type_value(&self, ty: TypeId) -> Variable {
        Variable::rvalue(self.types.type_type(), ty.to_bits())
    }

    pub fn kind_of(&self, var: &Variable) -> TypeKind {
        self.types.kind(var.ty)
    }

    pub fn display_type(&self, ty: TypeId) -> String {
        self.types.display(ty, &self.strings)
    }

    /// 지연 이름을 현재 스코프의 타입 변수로 바꾼다.
    pub fn resolve_type(&mut self, id: TypeId) -> VmResult<TypeId> {
        let type_type = self.types.type_type();
        let const_type = self.types.constant(type_type);
        let base = self.base();
        let scopes = &self.scopes;
        let mut lookup = |name: StrId| match scopes.lookup(name, base) {
            None => DeferTarget::Missing,
            Some(var) if var.ty != type_type && var.ty != const_type => DeferTarget::NotAType,
            Some(var) => DeferTarget::Type(TypeId::from_bits(var.raw_bits(8))),
        };
        match self.types.resolve_defers(id, &mut lookup) {
            Ok(resolved) => Ok(resolved),
            Err(e) => Err(self.error(e.describe(&self.strings))),
        }
    }

    /// 값을 타입으로 꺼낸다.
    pub fn expect_type(&self, var: &Variable) -> VmResult<TypeId> {
        if self.kind_of(var) != TypeKind::Type {
            return Err(self.error("Not a type"));
        }
        Ok(var.as_type(&self.types))
    }

    pub fn truthy(&mut self, var: &Variable) -> VmResult<bool> {
        let ty = self.types.get(var.ty);
        let truth = match ty.kind {
            TypeKind::Type => {
                let resolved = self.resolve_type(var.as_type(&self.types))?;
                self.types.kind(resolved) != TypeKind::Void
            }
            TypeKind::Float32 | TypeKind::Float64 => var.as_f64(&self.types) != 0.0,
            _ => var.bits(&self.types) != 0,
        };
        Ok(truth)
    }

    /// 타입 변환. `bitcast`면 비트를 그대로 옮긴다.
    pub fn cast(&mut self, target: TypeId, var: &Variable, bitcast: bool) -> VmResult<Variable> {
        let target = self.resolve_type(target)?;
        let to = self.types.get(target);
        let from = self.types.get(var.ty);
        let bits = var.bits(&self.types);
        let out = if bitcast {
            bits
        } else if to.kind.is_float() {
            let value = var.as_f64(&self.types);
            match to.kind {
                TypeKind::Float32 => (value as f32).to_bits() as u64,
                _ => value.to_bits(),
            }
        } else if from.kind.is_float() && to.kind.is_integer() {
            let value = var.as_f64(&self.types);
            if to.is_unsigned() {
                value as u64
            } else {
                value as i64 as u64
            }
        } else {
            bits
        };
        let out = crate::vm::value::extend(out, to);
        Ok(Variable::rvalue(target, out))
    }

    // ========== 실행 ==========

    /// 소스 한 단위를 컴파일해 실행한다. `@RESULT@`는 에러가 나도 갱신된다.
    pub fn execute_source(&mut self, source: &str, file: &str) -> VmResult<()> {
        let frame_index = self.frames.len() - 1;
        let saved_file = self.frame().file;
        let mut result = self.void_value();
        let outcome = self.execute_inner(source, file, &mut result);
        self.state = State::Running;
        self.state_var = None;
        let bits = result.bits(&self.types);
        let outcome = outcome.and_then(|()| self.check_fault());
        let stored = Variable::slot(result.ty, Slot::new(bits));
        if let Some(slot) = self.scopes.lookup_mut(StrId::RESULT, 0) {
            *slot = stored;
        }
        if let Some(frame) = self.frames.get_mut(frame_index) {
            frame.file = saved_file;
        }
        outcome
    }

    fn execute_inner(&mut self, source: &str, file: &str, result: &mut Variable) -> VmResult<()> {
        let bytes = parser::compile(source, file, &mut self.strings)?;
        if self.config.dump_bytecode {
            tracing::debug!(file, "\n{}", disassemble(&bytes, &self.strings));
        }
        let mut reader = BytecodeReader::new(Chunk::new(bytes));
        let file_id = reader.str();
        self.frame_mut().file = file_id;

        while !reader.at_end() {
            let Some(value) = self.exec_command(&mut reader)? else {
                break;
            };
            match self.state {
                State::Running => *result = value,
                State::Return => {
                    if let Some(var) = self.state_var.take() {
                        *result = var;
                    }
                    self.state = State::Running;
                    break;
                }
                State::Continue => return Err(self.error("'continue' outside of loop")),
                State::Break => return Err(self.error("'break' outside of loop")),
            }
        }
        Ok(())
    }

    /// 현재 파일 기준 상대 경로
    pub fn resolve_path(&self, name: &str) -> String {
        match Path::new(self.current_file()).parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name).to_string_lossy().into_owned(),
            _ => name.to_string(),
        }
    }

    pub fn execute_file(&mut self, path: &str) -> VmResult<()> {
        let (resolved, source) = self.load_source(path)?;
        self.execute_source(&source, &resolved)
    }

    /// 실행 중인 파일 기준으로 경로를 풀고 소스를 읽는다. include와 run_file이 같이 쓴다.
    pub(crate) fn load_source(&self, path: &str) -> VmResult<(String, String)> {
        let resolved = self.resolve_path(path);
        if !self.loader.exists(&resolved) {
            return Err(self.error(format!("File '{}' not found", resolved)));
        }
        match self.loader.load(&resolved) {
            Ok(source) => Ok((resolved, source)),
            Err(e) => Err(self.error(format!("Cannot open '{}' for reading: {}", resolved, e))),
        }
    }

    /// 최상위로 돌아간다 (전역 레벨과 전역 프레임만 남김).
    pub fn reset(&mut self) {
        self.unwind_to(1, 1);
        self.state = State::Running;
        self.state_var = None;
        self.pending_error = None;
    }

    /// 모든 레벨을 닫는다. 컨텍스트 종료 시에만 쓴다.
    pub fn shutdown(&mut self) {
        let file = self.strings.intern("<context destroy>");
        self.frames.truncate(1);
        self.frame_mut().file = file;
        while self.scopes.depth() > 0 {
            self.pop_level();
        }
    }

    fn stub_compiler(&mut self) -> VmResult<&mut StubCompiler> {
        if self.stubs.is_none() {
            self.stubs = Some(StubCompiler::new()?);
        }
        self.stubs
            .as_mut()
            .ok_or_else(|| err(VmErrorKind::Runtime, "JIT unavailable"))
    }
}
