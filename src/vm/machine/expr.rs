// expr 모듈 - 식 평가
//
// 식은 `End`로 끝나는 후위 표기 노드열이다. 피연산자 노드는 값을 스택에 쌓고,
// 연산자 노드는 ops.rs의 표를 따라 스택 꼭대기를 소비한다.

use crate::types::{TypeId, TypeKind};
use crate::vm::bytecode::{AllocForm, BytecodeReader, Opcode};
use crate::vm::fault;
use crate::vm::heap::Cleanup;
use crate::vm::stack::ensure_sufficient_stack;
use crate::vm::strings::StrId;
use crate::vm::symbols::SymbolResolver;
use crate::vm::value::{Origin, Variable, write_raw};

use super::{Vm, VmResult};

impl Vm {
    // ========== 진입점 ==========

    /// 식 하나를 `End`까지 평가한다. 첫 노드가 `End`이면 빈 식(None)이다.
    pub(crate) fn eval(&mut self, r: &mut BytecodeReader) -> VmResult<Option<Variable>> {
        ensure_sufficient_stack(|| self.eval_nodes(r))
    }

    fn eval_nodes(&mut self, r: &mut BytecodeReader) -> VmResult<Option<Variable>> {
        let mut stack: Vec<Variable> = Vec::new();
        loop {
            let op = r.opcode();
            if op == Opcode::End {
                return Ok(stack.pop());
            }
            let row = r.i32();
            let col = r.i32();
            let saved = self.set_position(row, col);
            self.exec_node(op, r, &mut stack)?;
            self.check_fault()?;
            if stack.len() > self.config.max_stack {
                return Err(self.error(format!(
                    "Expression stack overflow (max {} values)",
                    self.config.max_stack
                )));
            }
            self.restore_position(saved);
        }
    }

    /// 값이 반드시 있어야 하는 식
    pub(crate) fn eval_value(&mut self, r: &mut BytecodeReader) -> VmResult<Variable> {
        match self.eval(r)? {
            Some(var) => Ok(var),
            None => Err(self.error("Expected a value")),
        }
    }

    fn exec_node(&mut self, op: Opcode, r: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<()> {
        let value = match op {
            Opcode::Integer => {
                let value = r.u64();
                let ty = if value < 1 << 31 {
                    self.types.primitive(TypeKind::Int32)
                } else if value < 1 << 63 {
                    self.types.primitive(TypeKind::Int64)
                } else {
                    let s64 = self.types.primitive(TypeKind::Int64);
                    self.types.unsign(s64)
                };
                Variable::rvalue(ty, value)
            }
            Opcode::Float => {
                let ty = self.types.primitive(TypeKind::Float64);
                Variable::rvalue(ty, r.u64())
            }
            Opcode::String => {
                let id = r.str();
                let ty = self.string_type();
                Variable::rvalue(ty, self.strings.ptr(id) as u64)
            }
            Opcode::Type => {
                let ty = self.eval_type_node(r)?;
                self.type_value(ty)
            }
            Opcode::Truthy => {
                let ty = self.bool_type();
                Variable::rvalue(ty, r.bool() as u64)
            }
            Opcode::Null => {
                let void = self.types.void();
                let ty = self.types.pointer(void);
                Variable::rvalue(ty, 0)
            }
            Opcode::Variable => {
                let name = r.str();
                self.require(name)?
            }
            Opcode::Paren => self.eval_value(r)?,
            Opcode::Defer => {
                let name = r.str();
                let ty = self.types.deferred(name);
                self.type_value(ty)
            }
            Opcode::Varargs => self.vararg_at(r)?,
            Opcode::Sizeof => self.eval_sizeof(r)?,
            Opcode::Typeof => {
                let var = self.eval_value(r)?;
                self.type_value(var.ty)
            }
            Opcode::Scopeof => {
                let level = if r.bool() {
                    let name = r.str();
                    match self.scopes.level_of(name, self.base()) {
                        Some(level) => level,
                        None => {
                            return Err(self.error(format!(
                                "Variable '{}' not found",
                                self.strings.resolve(name)
                            )));
                        }
                    }
                } else {
                    self.top_level()
                };
                let s32 = self.types.primitive(TypeKind::Int32);
                Variable::rvalue(s32, level as u64)
            }
            Opcode::New => self.eval_new(r)?,
            Opcode::Delete => {
                let var = self.eval_value(r)?;
                match self.kind_of(&var) {
                    TypeKind::Pointer | TypeKind::Struct | TypeKind::Function => {}
                    _ => return Err(self.error("Not a pointer, struct or function")),
                }
                let addr = var.bits(&self.types);
                self.free(addr);
                self.void_value()
            }
            Opcode::Move => {
                let var = self.eval_value(r)?;
                let level = self.eval_value(r)?;
                if !self.kind_of(&level).is_integer() {
                    return Err(self.error("Level is not an integer"));
                }
                let max = self.scopes.depth().saturating_sub(1) as i64;
                let level = (level.bits(&self.types) as i64).clamp(0, max) as usize;
                let addr = var.bits(&self.types);
                self.move_allocation(addr, level);
                var
            }
            Opcode::Ternary => {
                let cond = self.eval_value(r)?;
                let truth = self.truthy(&cond)?;
                let mut yes = r.enter();
                let mut no = r.enter();
                let branch = if truth { &mut yes } else { &mut no };
                self.eval_value(branch)?
            }
            Opcode::Decl => self.eval_decl(r, stack)?,
            Opcode::Include => {
                let path = r.str();
                self.include(path)?
            }
            op if op.is_operator() => return self.apply_operator(op, r, stack),
            other => return Err(self.error(format!("Unexpected node '{}'", other))),
        };
        stack.push(value);
        Ok(())
    }

    // ========== 자주 쓰는 타입 ==========

    /// `const s8#`
    pub(crate) fn string_type(&mut self) -> TypeId {
        let s8 = self.types.primitive(TypeKind::Int8);
        let chars = self.types.constant(s8);
        self.types.pointer(chars)
    }

    /// `u8`
    pub(crate) fn bool_type(&mut self) -> TypeId {
        let s8 = self.types.primitive(TypeKind::Int8);
        self.types.unsign(s8)
    }

    pub(crate) fn u64_type(&mut self) -> TypeId {
        let s64 = self.types.primitive(TypeKind::Int64);
        self.types.unsign(s64)
    }

    /// 문자열을 인터닝해 `const s8#` 값으로 만든다.
    pub(crate) fn string_value(&mut self, text: &str) -> Variable {
        let id = self.strings.intern(text);
        let ty = self.string_type();
        Variable::rvalue(ty, self.strings.ptr(id) as u64)
    }

    // ========== 피연산자 ==========

    fn eval_type_node(&mut self, r: &mut BytecodeReader) -> VmResult<TypeId> {
        let is_const = r.bool();
        let Some(kind) = TypeKind::from_repr(r.u8()) else {
            return Err(self.error("Unknown type kind"));
        };
        let ty = if kind == TypeKind::Struct {
            self.eval_struct_type(r)?
        } else {
            let unsigned = r.bool();
            let ty = self.types.primitive(kind);
            if unsigned { self.types.unsign(ty) } else { ty }
        };
        Ok(if is_const { self.types.constant(ty) } else { ty })
    }

    fn vararg_at(&mut self, r: &mut BytecodeReader) -> VmResult<Variable> {
        let index = self.eval_value(r)?;
        let Some(varargs) = self.frame().varargs.clone() else {
            return Err(self.error("No varargs available in current context"));
        };
        if !self.kind_of(&index).is_integer() {
            return Err(self.error("Index must be an integer"));
        }
        let index = index.bits(&self.types) as i64;
        match usize::try_from(index).ok().and_then(|i| varargs.get(i)) {
            Some(var) => Ok(var.clone()),
            None => Err(self.error("Vararg index out of bounds")),
        }
    }

    fn eval_sizeof(&mut self, r: &mut BytecodeReader) -> VmResult<Variable> {
        let size = if r.bool() {
            match &self.frame().varargs {
                Some(varargs) => varargs.len() as u64,
                None => return Err(self.error("No varargs available in current context")),
            }
        } else {
            let var = self.eval_value(r)?;
            if self.kind_of(&var) == TypeKind::Type {
                let ty = self.resolve_type(var.as_type(&self.types))?;
                self.types.get(ty).size
            } else {
                self.types.get(var.ty).size
            }
        };
        let ty = self.u64_type();
        Ok(Variable::rvalue(ty, size))
    }

    // ========== 선언 ==========

    /// `T name [(P = U, ...)] [{ body }]`. 타입은 스택 꼭대기에 이미 있다.
    fn eval_decl(&mut self, r: &mut BytecodeReader, stack: &mut Vec<Variable>) -> VmResult<Variable> {
        let is_extern = r.bool();
        let name = r.str();
        let Some(ty_var) = stack.pop() else {
            return Err(self.error("Not a type"));
        };
        let declared = self.expect_type(&ty_var)?;

        let symbol = if is_extern {
            let text = self.strings.resolve(name);
            match self.symbols.resolve(text) {
                Some(addr) => Some(addr),
                None => return Err(self.error(format!("Cannot find symbol '{}'", text))),
            }
        } else {
            None
        };

        // 제네릭 매개변수는 타입 해석 동안만 보이는 임시 레벨에 둔다.
        self.push_level();
        let resolved = match self.bind_generics(r) {
            Ok(()) => self.resolve_type(declared),
            Err(e) => Err(e),
        };
        self.pop_level();
        let resolved = resolved?;

        let kind = self.types.kind(resolved);
        let var = match symbol {
            Some(addr) if kind == TypeKind::Function => self.fresh(resolved, addr as u64),
            Some(addr) => Variable::at(resolved, addr as *mut u8),
            None if kind == TypeKind::Type => {
                let void = self.types.void();
                self.fresh(resolved, void.to_bits())
            }
            None => self.fresh(resolved, 0),
        };
        let mut var = self.store(name, var)?;

        if r.bool() {
            if kind != TypeKind::Function {
                return Err(self.error("Cannot attach code to a non-function variable"));
            }
            let capture = r.capture_mode();
            let chunk = r.chunk().clone();
            let (entry, len) = r.skip();
            let addr = self.generate_function(chunk, entry, len, capture, resolved, name, true)?;
            var.store(&self.types, addr);
        }
        var.origin = Some(Origin { name, this: None });
        Ok(var)
    }

    fn bind_generics(&mut self, r: &mut BytecodeReader) -> VmResult<()> {
        while r.bool() {
            let name = r.str();
            let value = self.eval_value(r)?;
            if self.kind_of(&value) != TypeKind::Type {
                return Err(self.error(format!(
                    "Parameter '{}' is not a type",
                    self.strings.resolve(name)
                )));
            }
            let var = self.fresh(value.ty, value.bits(&self.types));
            self.store(name, var)?;
        }
        Ok(())
    }

    // ========== new ==========

    fn eval_new(&mut self, r: &mut BytecodeReader) -> VmResult<Variable> {
        let scoped = r.bool();
        let ty_var = self.eval_value(r)?;
        let ty = self.expect_type(&ty_var)?;
        let ty = self.resolve_type(ty)?;
        let form = r.alloc_form();

        let (kind, size, value_size) = {
            let t = self.types.get(ty);
            (t.kind, t.size, t.value_size())
        };
        let out_ty = match kind {
            TypeKind::Struct | TypeKind::Function => ty,
            _ => self.types.pointer(ty),
        };

        let addr = match form {
            AllocForm::None => match kind {
                TypeKind::Function => return Err(self.error("Allocating an empty function")),
                TypeKind::Struct => {
                    let addr = self.allocate(size, ty, scoped, Cleanup::Struct)?;
                    self.init_struct(ty, addr);
                    addr
                }
                _ => self.allocate(value_size, ty, scoped, Cleanup::None)?,
            },
            AllocForm::Scalar => {
                let value = self.eval_value(r)?;
                match kind {
                    TypeKind::Function => {
                        return Err(
                            self.error("Cannot allocate a function using the scalar initializer")
                        );
                    }
                    TypeKind::Struct => {
                        let addr = self.allocate(size, ty, scoped, Cleanup::Struct)?;
                        let source = value.bits(&self.types);
                        if source != 0 {
                            unsafe { fault::copy_guarded(source as *const u8, addr as *mut u8, size as usize) };
                        }
                        addr
                    }
                    _ => {
                        let addr = self.allocate(value_size, ty, scoped, Cleanup::None)?;
                        let converted = self.cast(ty, &value, false)?;
                        unsafe { write_raw(addr as *mut u8, value_size, converted.bits(&self.types)) };
                        addr
                    }
                }
            }
            AllocForm::Array => self.new_array(r, ty, scoped)?,
            AllocForm::Function => {
                if kind != TypeKind::Function {
                    return Err(self.error("Not a function"));
                }
                let capture = r.capture_mode();
                let chunk = r.chunk().clone();
                let (entry, len) = r.skip();
                self.generate_function(chunk, entry, len, capture, ty, StrId::ANONYMOUS, scoped)?
            }
            AllocForm::Struct => {
                if kind != TypeKind::Struct {
                    return Err(self.error("Not a struct"));
                }
                let addr = self.allocate(size, ty, scoped, Cleanup::Struct)?;
                self.init_struct(ty, addr);
                while r.bool() {
                    let name = r.str();
                    let value = self.eval_value(r)?;
                    self.override_field(ty, addr, name, &value)?;
                }
                self.construct(ty, addr)?;
                addr
            }
        };
        Ok(Variable::rvalue(out_ty, addr))
    }

    /// `new [T](n) { a, b, ... }`. 앞쪽 원소만 초기화하고 남는 초기값은 버린다.
    fn new_array(&mut self, r: &mut BytecodeReader, ty: TypeId, scoped: bool) -> VmResult<u64> {
        let count = self.eval_value(r)?;
        if !self.kind_of(&count).is_integer() {
            return Err(self.error("Array size is not an integer"));
        }
        let count = (count.bits(&self.types) as i64).max(0) as u64;
        let (kind, size, value_size) = {
            let t = self.types.get(ty);
            (t.kind, t.size, t.value_size())
        };
        let stride = if kind == TypeKind::Struct { size } else { value_size };
        let Some(total) = stride.checked_mul(count) else {
            return Err(self.error(format!("Cannot allocate {} elements", count)));
        };
        let addr = self.allocate(total, ty, scoped, Cleanup::None)?;

        let mut index = 0u64;
        while let Some(value) = self.eval(r)? {
            if index < count {
                let at = addr + index * stride;
                if kind == TypeKind::Struct {
                    let source = value.bits(&self.types);
                    if source != 0 {
                        unsafe { fault::copy_guarded(source as *const u8, at as *mut u8, size as usize) };
                    }
                } else {
                    let converted = self.cast(ty, &value, false)?;
                    unsafe { write_raw(at as *mut u8, value_size, converted.bits(&self.types)) };
                }
            }
            index += 1;
        }
        Ok(addr)
    }

    // ========== include ==========

    fn include(&mut self, path: StrId) -> VmResult<Variable> {
        let name = self.strings.resolve(path).to_string();
        let (resolved, source) = self.load_source(&name)?;
        tracing::debug!(file = %resolved, "include");
        self.execute_source(&source, &resolved)?;
        let result = self.scopes.lookup(StrId::RESULT, 0).cloned();
        Ok(match result {
            Some(var) => var.to_rvalue(&self.types),
            None => self.void_value(),
        })
    }
}
