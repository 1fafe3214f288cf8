// ffi 모듈 - 네이티브 함수 호출 (스크립트 -> C)
//
// 인자를 호스트 호출 규약의 레지스터/스택 배치로 나눈 뒤 인라인 어셈블리로 호출한다.
// 지원 대상은 x86_64 (System V, Windows x64)뿐이다.

#[cfg(target_arch = "x86_64")]
mod x86_64;

use thiserror::Error;

/// 인자 하나의 전달 방식
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeArg {
    Int(u64),
    Float32(f32),
    Float64(f64),
}

/// 호출 직후의 rax / xmm0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawReturn {
    pub int: u64,
    pub float: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FfiError {
    #[error("Native calls are not supported on this architecture")]
    Unsupported,
    #[error("Cannot call a null native function")]
    NullTarget,
}

/// 레지스터에 들어갈 값과 스택으로 넘칠 값
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FfiFrame {
    pub ints: [u64; 6],
    pub floats: [u64; 8],
    pub stack: Vec<u64>,
}

impl FfiFrame {
    /// System V: 정수와 실수 레지스터를 따로 센다.
    pub fn system_v(args: &[NativeArg]) -> Self {
        let mut frame = FfiFrame::default();
        let (mut next_int, mut next_float) = (0, 0);
        for arg in args {
            match *arg {
                NativeArg::Int(bits) if next_int < 6 => {
                    frame.ints[next_int] = bits;
                    next_int += 1;
                }
                NativeArg::Float32(value) if next_float < 8 => {
                    frame.floats[next_float] = value.to_bits() as u64;
                    next_float += 1;
                }
                NativeArg::Float64(value) if next_float < 8 => {
                    frame.floats[next_float] = value.to_bits();
                    next_float += 1;
                }
                other => frame.stack.push(stack_bits(other)),
            }
        }
        frame
    }

    /// Windows x64: 위치 기반 4칸. 가변 인자를 위해 실수는 정수 레지스터에도 복사한다.
    pub fn windows(args: &[NativeArg]) -> Self {
        let mut frame = FfiFrame::default();
        for (i, arg) in args.iter().enumerate() {
            if i >= 4 {
                frame.stack.push(stack_bits(*arg));
                continue;
            }
            let bits = stack_bits(*arg);
            frame.ints[i] = bits;
            if !matches!(arg, NativeArg::Int(_)) {
                frame.floats[i] = bits;
            }
        }
        frame
    }

    pub fn for_host(args: &[NativeArg]) -> Self {
        if cfg!(windows) {
            Self::windows(args)
        } else {
            Self::system_v(args)
        }
    }
}

fn stack_bits(arg: NativeArg) -> u64 {
    match arg {
        NativeArg::Int(bits) => bits,
        NativeArg::Float32(value) => value.to_bits() as u64,
        NativeArg::Float64(value) => value.to_bits(),
    }
}

/// `target`을 `args`로 호출한다.
///
/// # Safety
/// `target`은 인자 배치와 맞는 C ABI 함수여야 한다.
pub unsafe fn marshal_and_call(target: u64, args: &[NativeArg]) -> Result<RawReturn, FfiError> {
    if target == 0 {
        return Err(FfiError::NullTarget);
    }
    let frame = FfiFrame::for_host(args);
    tracing::trace!(target, args = args.len(), stack = frame.stack.len(), "native call");
    call_frame(target, &frame)
}

#[cfg(target_arch = "x86_64")]
fn call_frame(target: u64, frame: &FfiFrame) -> Result<RawReturn, FfiError> {
    Ok(unsafe { x86_64::raw_call(target, frame) })
}

#[cfg(not(target_arch = "x86_64"))]
fn call_frame(_target: u64, _frame: &FfiFrame) -> Result<RawReturn, FfiError> {
    Err(FfiError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_system_v_classification() {
        let mut args = vec![NativeArg::Float64(1.5)];
        args.extend((0..7).map(|i| NativeArg::Int(i)));
        let frame = FfiFrame::system_v(&args);
        assert_eq!(frame.ints, [0, 1, 2, 3, 4, 5]);
        assert_eq!(frame.floats[0], 1.5f64.to_bits());
        assert_eq!(frame.stack, vec![6]);
    }

    #[test]
    fn test_windows_positional_slots() {
        let args = [
            NativeArg::Int(7),
            NativeArg::Float32(2.0),
            NativeArg::Int(8),
            NativeArg::Int(9),
            NativeArg::Float64(0.5),
        ];
        let frame = FfiFrame::windows(&args);
        assert_eq!(frame.ints[..4], [7, 2.0f32.to_bits() as u64, 8, 9]);
        assert_eq!(frame.floats[1], 2.0f32.to_bits() as u64);
        assert_eq!(frame.stack, vec![0.5f64.to_bits()]);
    }

    extern "C" fn add_mixed(a: i64, b: f64, c: i32, d: f32) -> f64 {
        a as f64 + b + c as f64 + d as f64
    }

    extern "C" fn sum_many(a: i64, b: i64, c: i64, d: i64, e: i64, f: i64, g: i64, h: i64) -> i64 {
        a + b + c + d + e + f + g + h
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_calls_through_asm() {
        let ret = unsafe {
            marshal_and_call(
                add_mixed as usize as u64,
                &[
                    NativeArg::Int(1),
                    NativeArg::Float64(2.5),
                    NativeArg::Int(3),
                    NativeArg::Float32(0.5),
                ],
            )
        };
        assert_eq!(ret.map(|r| f64::from_bits(r.float)), Ok(7.0));

        let args: Vec<NativeArg> = (1..=8).map(NativeArg::Int).collect();
        let ret = unsafe { marshal_and_call(sum_many as usize as u64, &args) };
        assert_eq!(ret.map(|r| r.int), Ok(36));
    }

    #[test]
    fn test_null_target() {
        assert_eq!(unsafe { marshal_and_call(0, &[]) }, Err(FfiError::NullTarget));
    }
}
