use std::arch::asm;

use super::{FfiFrame, RawReturn};

/// System V x86_64.
///
/// r12에 원래 rsp를 보관하고, red zone(128바이트)을 건너뛴 뒤 스택 인자를 복사해
/// 16바이트 정렬된 상태로 호출한다. `al`에는 가변 인자용 벡터 레지스터 상한(8)을 둔다.
#[cfg(not(windows))]
pub(super) unsafe fn raw_call(target: u64, frame: &FfiFrame) -> RawReturn {
    let int: u64;
    let float: f64;
    unsafe {
        asm!(
            "mov r12, rsp",
            "sub rsp, 128",
            "lea rax, [rcx*8]",
            "sub rsp, rax",
            "and rsp, -16",
            "xor r11, r11",
            "2:",
            "cmp r11, rcx",
            "jae 3f",
            "mov rax, [r15 + r11*8]",
            "mov [rsp + r11*8], rax",
            "inc r11",
            "jmp 2b",
            "3:",
            "movsd xmm0, [r14]",
            "movsd xmm1, [r14 + 8]",
            "movsd xmm2, [r14 + 16]",
            "movsd xmm3, [r14 + 24]",
            "movsd xmm4, [r14 + 32]",
            "movsd xmm5, [r14 + 40]",
            "movsd xmm6, [r14 + 48]",
            "movsd xmm7, [r14 + 56]",
            "mov rdi, [r13]",
            "mov rsi, [r13 + 8]",
            "mov rdx, [r13 + 16]",
            "mov rcx, [r13 + 24]",
            "mov r8, [r13 + 32]",
            "mov r9, [r13 + 40]",
            "mov eax, 8",
            "call r10",
            "mov rsp, r12",
            in("r10") target,
            in("r13") frame.ints.as_ptr(),
            in("r14") frame.floats.as_ptr(),
            in("r15") frame.stack.as_ptr(),
            in("rcx") frame.stack.len(),
            out("r12") _,
            lateout("rax") int,
            lateout("xmm0") float,
            clobber_abi("C"),
        );
    }
    RawReturn {
        int,
        float: float.to_bits(),
    }
}

/// Windows x64.
///
/// 인자 4칸은 rcx/rdx/r8/r9와 xmm0-3에 위치별로 들어가고, 그 위에 32바이트
/// shadow space를 둔 뒤 나머지 인자를 쌓는다.
#[cfg(windows)]
pub(super) unsafe fn raw_call(target: u64, frame: &FfiFrame) -> RawReturn {
    let int: u64;
    let float: f64;
    unsafe {
        asm!(
            "mov r12, rsp",
            "lea rax, [rcx*8 + 32]",
            "sub rsp, rax",
            "and rsp, -16",
            "xor r11, r11",
            "2:",
            "cmp r11, rcx",
            "jae 3f",
            "mov rax, [r15 + r11*8]",
            "mov [rsp + r11*8 + 32], rax",
            "inc r11",
            "jmp 2b",
            "3:",
            "movsd xmm0, [r14]",
            "movsd xmm1, [r14 + 8]",
            "movsd xmm2, [r14 + 16]",
            "movsd xmm3, [r14 + 24]",
            "mov rcx, [r13]",
            "mov rdx, [r13 + 8]",
            "mov r8, [r13 + 16]",
            "mov r9, [r13 + 24]",
            "call r10",
            "mov rsp, r12",
            in("r10") target,
            in("r13") frame.ints.as_ptr(),
            in("r14") frame.floats.as_ptr(),
            in("r15") frame.stack.as_ptr(),
            in("rcx") frame.stack.len(),
            out("r12") _,
            lateout("rax") int,
            lateout("xmm0") float,
            clobber_abi("C"),
        );
    }
    RawReturn {
        int,
        float: float.to_bits(),
    }
}
