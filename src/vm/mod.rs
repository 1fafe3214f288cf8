pub mod bytecode; // 바이트코드 노드와 리더/라이터
pub mod disasm; // 디스어셈블러
pub mod fault; // 하드웨어 폴트 복구
pub mod ffi; // 네이티브 호출 (아웃바운드)
pub mod function;
pub mod heap; // 레벨 단위 할당 추적
pub mod jit; // 네이티브 진입 스텁 (인바운드)
pub mod machine; // machine/ 디렉토리
pub mod scope;
pub mod stack; // 재귀용 스택 확보
pub mod strings; // 문자열 인터닝
pub mod symbols;
pub mod value;

pub use machine::{Vm, VmError, VmErrorKind, VmResult, err};
