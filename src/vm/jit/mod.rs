// JIT 스텁 모듈
//
// 스크립트 함수를 네이티브 코드에 넘기려면 C ABI로 호출 가능한 주소가 필요하다.
// Cranelift로 함수 타입마다 작은 스텁을 만든다. 스텁은 인자를 스택 배열에 모아
// `paw_call_driver(vm, type_id, stub_id, args)`를 부르고, 반환값을 선언된 타입으로
// 돌려준다.

use cranelift::prelude::*;
use cranelift_codegen::settings;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module as ClifModule};

use crate::vm::machine::{VmErrorKind, VmResult, err};

mod runtime;

pub use runtime::{VarargEntry, VarargTag, paw_call_driver};

/// 스텁 인자/반환 한 칸의 레지스터 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StubClass {
    Int,
    Float32,
    Float64,
}

impl StubClass {
    fn clif_type(self) -> Type {
        match self {
            StubClass::Int => types::I64,
            StubClass::Float32 => types::F32,
            StubClass::Float64 => types::F64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StubSignature {
    pub params: Vec<StubClass>,
    pub ret: Option<StubClass>,
}

fn jit_error(what: &str, e: impl std::fmt::Display) -> crate::vm::machine::VmError {
    err(VmErrorKind::Runtime, format!("JIT: {}: {}", what, e))
}

/// 스텁 생성기. 컨텍스트마다 하나씩, 처음 필요할 때 만든다.
pub struct StubCompiler {
    module: JITModule,
    ctx: codegen::Context,
    builder_ctx: FunctionBuilderContext,
    driver: FuncId,
    compiled: usize,
}

impl StubCompiler {
    pub fn new() -> VmResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("opt_level", "speed")
            .map_err(|e| jit_error("opt_level", e))?;

        let isa_builder = cranelift_codegen::isa::lookup(target_lexicon::HOST)
            .map_err(|e| jit_error("ISA lookup", e))?;
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| jit_error("ISA", e))?;

        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        builder.symbol("paw_call_driver", paw_call_driver as *const u8);
        let mut module = JITModule::new(builder);

        // (vm, type_id, stub_id, args) -> u64
        let ptr = module.target_config().pointer_type();
        let mut sig = module.make_signature();
        sig.params.push(AbiParam::new(ptr));
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(types::I64));
        sig.params.push(AbiParam::new(ptr));
        sig.returns.push(AbiParam::new(types::I64));
        let driver = module
            .declare_function("paw_call_driver", Linkage::Import, &sig)
            .map_err(|e| jit_error("declare driver", e))?;

        tracing::debug!("stub compiler ready");
        Ok(StubCompiler {
            module,
            ctx: codegen::Context::new(),
            builder_ctx: FunctionBuilderContext::new(),
            driver,
            compiled: 0,
        })
    }

    /// 스텁 하나를 컴파일하고 코드 주소를 돌려준다.
    pub fn compile(&mut self, vm: usize, signature: &StubSignature, type_id: u64, stub_id: u64) -> VmResult<u64> {
        let ptr = self.module.target_config().pointer_type();
        let mut sig = self.module.make_signature();
        for class in &signature.params {
            sig.params.push(AbiParam::new(class.clif_type()));
        }
        if let Some(ret) = signature.ret {
            sig.returns.push(AbiParam::new(ret.clif_type()));
        }

        self.module.clear_context(&mut self.ctx);
        self.ctx.func.signature = sig.clone();
        {
            let module = &mut self.module;
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_ctx);
            let block = builder.create_block();
            builder.append_block_params_for_function_params(block);
            builder.switch_to_block(block);
            builder.seal_block(block);

            // 인자들을 8바이트 칸 배열로
            let slot_size = (signature.params.len().max(1) * 8) as u32;
            let slot = builder.create_sized_stack_slot(StackSlotData::new(
                StackSlotKind::ExplicitSlot,
                slot_size,
                4,
            ));
            let params = builder.block_params(block).to_vec();
            for (i, value) in params.into_iter().enumerate() {
                builder.ins().stack_store(value, slot, (i * 8) as i32);
            }
            let args = builder.ins().stack_addr(ptr, slot, 0);
            let vm_ptr = builder.ins().iconst(ptr, vm as i64);
            let ty = builder.ins().iconst(types::I64, type_id as i64);
            let id = builder.ins().iconst(types::I64, stub_id as i64);

            let driver = module.declare_func_in_func(self.driver, builder.func);
            let call = builder.ins().call(driver, &[vm_ptr, ty, id, args]);
            let result = builder.inst_results(call)[0];

            match signature.ret {
                None => {
                    builder.ins().return_(&[]);
                }
                Some(StubClass::Int) => {
                    builder.ins().return_(&[result]);
                }
                Some(StubClass::Float64) => {
                    let value = builder.ins().bitcast(types::F64, MemFlags::new(), result);
                    builder.ins().return_(&[value]);
                }
                Some(StubClass::Float32) => {
                    let narrow = builder.ins().ireduce(types::I32, result);
                    let value = builder.ins().bitcast(types::F32, MemFlags::new(), narrow);
                    builder.ins().return_(&[value]);
                }
            }
            builder.finalize();
        }

        let name = format!("paw_stub_{}", self.compiled);
        self.compiled += 1;
        let func = self
            .module
            .declare_function(&name, Linkage::Local, &sig)
            .map_err(|e| jit_error("declare stub", e))?;
        self.module
            .define_function(func, &mut self.ctx)
            .map_err(|e| jit_error("define stub", e))?;
        self.module.clear_context(&mut self.ctx);
        self.module
            .finalize_definitions()
            .map_err(|e| jit_error("finalize stub", e))?;

        let code = self.module.get_finalized_function(func);
        tracing::trace!(stub_id, params = signature.params.len(), "stub compiled");
        Ok(code as u64)
    }
}
