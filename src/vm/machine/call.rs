// call 모듈 - 함수 호출과 함수 생성
//
// 함수 값은 코드 주소다. 함수 표에 등록된 스텁 주소면 스크립트 함수로 실행하고,
// 아니면 네이티브 함수로 보고 ffi로 호출한다. 네이티브 쪽에서 스텁을 부르면
// `native_entry`를 거쳐 다시 `execute_function`으로 들어온다.

use std::rc::Rc;

use crate::types::{Param, TypeId, TypeKind};
use crate::vm::bytecode::{BytecodeReader, CaptureMode, Chunk};
use crate::vm::fault;
use crate::vm::ffi::{NativeArg, marshal_and_call};
use crate::vm::function::{Callee, ScriptFunction};
use crate::vm::heap::Cleanup;
use crate::vm::jit::{StubClass, StubSignature, VarargEntry, VarargTag};
use crate::vm::scope::Frame;
use crate::vm::stack::ensure_sufficient_stack;
use crate::vm::strings::StrId;
use crate::vm::value::{Variable, extend};

use super::{State, Vm, VmErrorKind, VmResult};

impl Vm {
    // ========== 호출 ==========

    /// 함수 값을 인자들로 호출한다.
    pub fn execute_function(&mut self, function: &Variable, args: Vec<Variable>) -> VmResult<Variable> {
        if self.kind_of(function) != TypeKind::Function {
            return Err(self.error("Attempt to call a non-function value"));
        }
        let (ret, params, lvalue_return) = {
            let t = self.types.get(function.ty);
            (
                t.return_type().unwrap_or_else(|| self.types.void()),
                t.params().to_vec(),
                t.lvalue_return(),
            )
        };
        let variadic = self.types.is_variadic(function.ty);
        let fixed = if variadic { params.len() - 1 } else { params.len() };
        if variadic && args.len() < fixed {
            return Err(self.error(format!(
                "Non-matching number of arguments (expected >={}, got {})",
                fixed,
                args.len()
            )));
        }
        if !variadic && args.len() != fixed {
            return Err(self.error(format!(
                "Non-matching number of arguments (expected {}, got {})",
                fixed,
                args.len()
            )));
        }

        let mut converted = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let value = if i < fixed {
                self.cast(params[i].ty, arg, false)?
            } else {
                arg.to_rvalue(&self.types)
            };
            converted.push(value);
        }

        let addr = function.bits(&self.types);
        if addr == 0 {
            return Err(self.error("Calling an unset function"));
        }
        match self.functions.classify(addr) {
            Callee::Native(target) => self.call_native(target, ret, lvalue_return, fixed, &converted),
            Callee::Script(id) => {
                let call = ScriptCall {
                    id,
                    this: function.origin.and_then(|o| o.this),
                    name: function.origin.map(|o| o.name),
                    ret,
                    lvalue_return,
                    params: &params,
                    fixed,
                };
                self.call_script(call, converted)
            }
        }
    }

    fn call_native(
        &mut self,
        target: u64,
        ret: TypeId,
        lvalue_return: bool,
        fixed: usize,
        args: &[Variable],
    ) -> VmResult<Variable> {
        if lvalue_return {
            return Err(self.error("Cannot call a native assignable function"));
        }
        let native: Vec<NativeArg> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                let bits = arg.bits(&self.types);
                match self.kind_of(arg) {
                    // 가변 인자 자리의 float는 C 규칙대로 double로 올린다.
                    TypeKind::Float32 if i < fixed => NativeArg::Float32(f32::from_bits(bits as u32)),
                    TypeKind::Float32 => NativeArg::Float64(f32::from_bits(bits as u32) as f64),
                    TypeKind::Float64 => NativeArg::Float64(f64::from_bits(bits)),
                    _ => NativeArg::Int(bits),
                }
            })
            .collect();

        let raw = match fault::guarded(|| unsafe { marshal_and_call(target, &native) }) {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(self.error_of(VmErrorKind::Fault, e.to_string())),
            Err(address) => {
                // 폴트 전에 콜백이 남긴 에러보다 폴트가 먼저다.
                let _ = self.take_parked();
                return Err(self.fault_error(address));
            }
        };
        self.take_parked()?;

        let t = self.types.get(ret);
        let bits = match t.kind {
            TypeKind::Void => 0,
            TypeKind::Float32 => raw.float & 0xFFFF_FFFF,
            TypeKind::Float64 => raw.float,
            _ => extend(raw.int, t),
        };
        Ok(Variable::rvalue(ret, bits))
    }

    fn call_script(&mut self, call: ScriptCall<'_>, args: Vec<Variable>) -> VmResult<Variable> {
        ensure_sufficient_stack(|| self.enter_script(call, args))
    }

    fn enter_script(&mut self, call: ScriptCall<'_>, args: Vec<Variable>) -> VmResult<Variable> {
        if self.frames.len() >= self.config.max_frames {
            return Err(self.error(format!(
                "Stack overflow (max {} frames)",
                self.config.max_frames
            )));
        }
        let Some(function) = self.functions.get(call.id) else {
            return Err(self.error("Calling an unset function"));
        };
        let name = call.name.unwrap_or(function.name);
        let file = function.file;
        let chunk = function.chunk.clone();
        let (entry, len) = (function.entry, function.len);
        let capture = function.capture;
        let captured = function.captured.clone();

        let depth = self.scopes.depth();
        self.frames.push(Frame::new(name, file, depth));
        self.push_level();

        for (captured_name, var) in &captured {
            let var = match capture {
                CaptureMode::CopyPerCall => self.fresh(var.ty, var.bits(&self.types)),
                _ => var.clone(),
            };
            self.scopes.declare(*captured_name, var);
        }

        for (param, arg) in call.params.iter().zip(&args).take(call.fixed) {
            let Some(param_name) = param.name else {
                continue;
            };
            if captured.iter().any(|(n, _)| *n == param_name) {
                return Err(self.error(format!(
                    "Cannot create parameter '{}' because a variable of the same name was captured",
                    self.strings.resolve(param_name)
                )));
            }
            let var = self.fresh(arg.ty, arg.bits(&self.types));
            if !self.scopes.declare(param_name, var) {
                return Err(self.error(format!(
                    "Duplicate parameter name '{}'",
                    self.strings.resolve(param_name)
                )));
            }
        }

        if let Some((struct_ty, addr)) = call.this {
            let this_ty = self.types.constant(struct_ty);
            let this = self.fresh(this_ty, addr);
            self.scopes.declare(StrId::THIS, this);
        }
        if call.params.len() > call.fixed {
            self.frame_mut().varargs = Some(Rc::new(args[call.fixed..].to_vec()));
        }

        tracing::trace!(function = self.strings.resolve(name), depth = self.frames.len(), "call");
        let mut body = BytecodeReader::slice(chunk, entry, len);
        self.exec_block(&mut body, false)?;

        let state = self.state;
        self.state = State::Running;
        let returned = self.state_var.take();
        let result = match state {
            State::Return => {
                let value = returned.unwrap_or_else(|| self.void_value());
                if call.lvalue_return {
                    if !value.is_lvalue() {
                        return Err(self.error("Return value is not assignable"));
                    }
                    if value.ty != call.ret {
                        return Err(self.error(format!(
                            "Types {} and {} aren't the same",
                            self.display_type(value.ty),
                            self.display_type(call.ret)
                        )));
                    }
                    value
                } else {
                    self.cast(call.ret, &value, false)?
                }
            }
            State::Running => {
                if self.types.kind(call.ret) != TypeKind::Void {
                    return Err(self.error("No return specified in a non-void return function"));
                }
                self.void_value()
            }
            State::Break => return Err(self.error("'break' outside of loop")),
            State::Continue => return Err(self.error("'continue' outside of loop")),
        };

        while self.scopes.depth() > depth {
            self.pop_level();
        }
        self.frames.pop();
        Ok(result)
    }

    // ========== 함수 생성 ==========

    /// 본문 구간으로 스크립트 함수를 만들고 호출 가능한 스텁 주소를 돌려준다.
    ///
    /// 캡처 없는 함수는 본문 위치로 캐시되어 한 번만 만들어진다. `scoped`면 현재
    /// 레벨이, 아니면 전역 레벨이 함수를 소유한다.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn generate_function(
        &mut self,
        chunk: Rc<Chunk>,
        entry: usize,
        len: usize,
        capture: CaptureMode,
        ty: TypeId,
        name: StrId,
        scoped: bool,
    ) -> VmResult<u64> {
        let ty = self.resolve_type(ty)?;
        if self.types.kind(ty) != TypeKind::Function {
            return Err(self.error("Not a function"));
        }
        let key = (Rc::as_ptr(&chunk) as usize, entry);
        if capture == CaptureMode::None {
            if let Some(stub) = self.functions.cached(key) {
                return Ok(stub);
            }
        }

        let (id, stub) = match self.functions.reuse(ty) {
            Some(found) => found,
            None => {
                let id = self.functions.next_id();
                let signature = self.stub_signature(ty);
                let vm = self as *mut Vm as usize;
                let stub = self
                    .stub_compiler()?
                    .compile(vm, &signature, ty.to_bits(), id as u64)?;
                (id, stub)
            }
        };

        let captured = match capture {
            CaptureMode::None => Vec::new(),
            CaptureMode::Shared => self.scopes.visible_from(self.base()),
            CaptureMode::CopyOnce | CaptureMode::CopyPerCall => self
                .scopes
                .visible_from(self.base())
                .into_iter()
                .map(|(n, var)| (n, self.fresh(var.ty, var.bits(&self.types))))
                .collect(),
        };

        let file = self.frame().file;
        self.functions.insert(
            id,
            ScriptFunction {
                name,
                file,
                chunk,
                entry,
                len,
                capture,
                captured,
                ty,
                stub,
                cache_key: (capture == CaptureMode::None).then_some(key),
            },
        );
        let level = if scoped { self.top_level() } else { 0 };
        let allocation = self.heap.track(stub, ty, level, Cleanup::Function(id));
        self.scopes.add_alloc(level, allocation);
        tracing::trace!(id, stub, "function generated");
        Ok(stub)
    }

    fn stub_signature(&self, ty: TypeId) -> StubSignature {
        let class = |id: TypeId| match self.types.kind(id) {
            TypeKind::Float32 => StubClass::Float32,
            TypeKind::Float64 => StubClass::Float64,
            _ => StubClass::Int,
        };
        let t = self.types.get(ty);
        let ret = t
            .return_type()
            .filter(|&r| self.types.kind(r) != TypeKind::Void)
            .map(class);
        StubSignature {
            params: t.params().iter().map(|p| class(p.ty)).collect(),
            ret,
        }
    }

    /// 스텁에서 들어온 호출. `args`는 매개변수마다 8바이트 칸이다.
    pub(crate) fn native_entry(&mut self, ty: TypeId, stub_id: u32, args: *const u64) -> VmResult<u64> {
        let params: Vec<Param> = self.types.get(ty).params().to_vec();
        let mut values = Vec::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            let raw = if args.is_null() { 0 } else { unsafe { *args.add(i) } };
            match self.types.kind(param.ty) {
                TypeKind::Varargs => self.collect_varargs(raw as *const VarargEntry, &mut values),
                TypeKind::Float32 => values.push(Variable::rvalue(param.ty, raw & 0xFFFF_FFFF)),
                _ => {
                    let bits = extend(raw, self.types.get(param.ty));
                    values.push(Variable::rvalue(param.ty, bits));
                }
            }
        }
        let Some(stub) = self.functions.get(stub_id).map(|f| f.stub) else {
            return Err(self.error("Calling an unset function"));
        };
        let function = Variable::rvalue(ty, stub);
        let result = self.execute_function(&function, values)?;
        Ok(result.bits(&self.types))
    }

    fn collect_varargs(&mut self, mut entry: *const VarargEntry, out: &mut Vec<Variable>) {
        if entry.is_null() {
            return;
        }
        let s64 = self.types.primitive(TypeKind::Int64);
        let f64_ty = self.types.primitive(TypeKind::Float64);
        loop {
            let item = unsafe { *entry };
            match item.tag {
                t if t == VarargTag::Integer as u32 => out.push(Variable::rvalue(s64, item.value)),
                t if t == VarargTag::Float as u32 => out.push(Variable::rvalue(f64_ty, item.value)),
                _ => break,
            }
            entry = unsafe { entry.add(1) };
        }
    }
}

/// 스크립트 함수 호출에 필요한 정보
struct ScriptCall<'a> {
    id: u32,
    this: Option<(TypeId, u64)>,
    name: Option<StrId>,
    ret: TypeId,
    lvalue_return: bool,
    params: &'a [Param],
    fixed: usize,
}
