// 스텁이 호출하는 런타임 진입점

use crate::types::TypeId;
use crate::vm::fault;
use crate::vm::machine::Vm;

/// 가변 인자 배열의 항목 태그
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarargTag {
    End = 0,
    Integer = 1,
    Float = 2,
}

/// 네이티브 쪽이 가변 인자를 넘길 때 쓰는 16바이트 항목. `End` 태그로 끝난다.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct VarargEntry {
    pub tag: u32,
    pub value: u64,
}

impl VarargEntry {
    pub fn int(value: i64) -> Self {
        VarargEntry {
            tag: VarargTag::Integer as u32,
            value: value as u64,
        }
    }

    pub fn float(value: f64) -> Self {
        VarargEntry {
            tag: VarargTag::Float as u32,
            value: value.to_bits(),
        }
    }

    pub fn end() -> Self {
        VarargEntry {
            tag: VarargTag::End as u32,
            value: 0,
        }
    }
}

/// 모든 스텁의 공통 드라이버.
///
/// 에러는 네이티브 프레임을 넘어 전파할 수 없으므로 VM에 보관하고 0을 돌려준다.
/// 네이티브 호출이 끝나면 VM이 보관된 에러를 다시 올린다.
pub extern "C" fn paw_call_driver(vm: *mut Vm, type_id: u64, stub_id: u64, args: *const u64) -> u64 {
    if vm.is_null() {
        return 0;
    }
    let vm = unsafe { &mut *vm };
    match fault::unguarded(|| vm.native_entry(TypeId::from_bits(type_id), stub_id as u32, args)) {
        Ok(bits) => bits,
        Err(error) => {
            vm.park_error(error);
            0
        }
    }
}
