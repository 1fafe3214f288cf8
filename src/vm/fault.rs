// fault 모듈 - 네이티브 메모리 폴트 처리
//
// 스크립트 실행 중 `guarded` 구간에서 난 SIGSEGV/SIGBUS는 구간 입구로 되돌아가
// 대기 중인 폴트로 남는다. 인터프리터가 이를 `VmErrorKind::Fault`로 올린다.
// 그 밖의 폴트는 호스트 콜백(스크립트 밖일 때만) 또는 stderr에 알린 뒤 abort한다.
// 복구는 x86_64 리눅스에서만 한다. 다른 플랫폼에서는 모든 폴트가 abort로 끝난다.

use std::cell::Cell;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 폴트 정보. `in_script`는 인터프리터가 스크립트를 실행 중이었는지를 뜻한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFault {
    pub address: usize,
    pub in_script: bool,
}

pub type FaultHandler = fn(NativeFault);

static FAULT_HANDLER: AtomicUsize = AtomicUsize::new(0);
static INSTALL: Once = Once::new();

thread_local! {
    // 폴트는 일으킨 스레드에서 처리되므로 스레드별로 둔다.
    static IN_SCRIPT: Cell<bool> = const { Cell::new(false) };
    // 인터프리터가 아직 에러로 올리지 않은 폴트 주소
    static PENDING: Cell<Option<usize>> = const { Cell::new(None) };
}

pub fn set_handler(handler: Option<FaultHandler>) {
    let raw = handler.map_or(0, |f| f as usize);
    FAULT_HANDLER.store(raw, Ordering::SeqCst);
}

/// 스크립트 실행 구간 표시. 드롭될 때 이전 상태로 돌린다.
pub struct ScriptGuard {
    previous: bool,
}

impl ScriptGuard {
    pub fn enter() -> Self {
        install();
        ScriptGuard {
            previous: IN_SCRIPT.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for ScriptGuard {
    fn drop(&mut self) {
        IN_SCRIPT.with(|flag| flag.set(self.previous));
    }
}

// ========== 복구 구간 ==========

/// 대기 중인 폴트 주소를 꺼낸다.
pub fn take_pending() -> Option<usize> {
    PENDING.with(Cell::take)
}

fn set_pending(address: usize) {
    PENDING.with(|pending| {
        if pending.get().is_none() {
            pending.set(Some(address));
        }
    });
}

/// 폴트가 나도 돌아오는 메모리 복사. 실패하면 `dst`는 건드리지 않은 것으로 보고
/// 폴트를 대기열에 남긴다.
///
/// # Safety
/// 폴트 외의 방식으로 잘못될 수 있는 영역(겹치는 영역, 러스트가 소유한 값)을
/// 넘기면 안 된다.
pub unsafe fn copy_guarded(src: *const u8, dst: *mut u8, len: usize) {
    if len == 0 {
        return;
    }
    if let Err(address) = guarded(|| unsafe { std::ptr::copy_nonoverlapping(src, dst, len) }) {
        set_pending(address);
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod recover {
    use std::cell::Cell;
    use std::ffi::c_void;

    /// 구간 입구의 스택 포인터. 콜리 세이브 레지스터는 그 아래에 저장돼 있다.
    #[repr(C)]
    pub(super) struct JumpBuf {
        pub(super) sp: usize,
    }

    thread_local! {
        pub(super) static GUARD: Cell<*mut JumpBuf> = const { Cell::new(std::ptr::null_mut()) };
        pub(super) static ADDRESS: Cell<usize> = const { Cell::new(0) };
    }

    // paw_guarded_call(body, data, buf): body(data)를 부르고 0을 돌려준다.
    // 폴트가 나면 시그널 핸들러가 rsp를 buf.sp로, rip를 paw_fault_landing으로 바꾸고
    // 같은 에필로그를 거쳐 1을 돌려준다.
    std::arch::global_asm!(
        ".text",
        ".globl paw_guarded_call",
        ".type paw_guarded_call,@function",
        ".p2align 4",
        "paw_guarded_call:",
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 8",
        "mov [rdx], rsp",
        "mov rax, rdi",
        "mov rdi, rsi",
        "call rax",
        "xor eax, eax",
        ".Lpaw_guard_exit:",
        "add rsp, 8",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
        ".globl paw_fault_landing",
        ".type paw_fault_landing,@function",
        "paw_fault_landing:",
        "mov eax, 1",
        "jmp .Lpaw_guard_exit",
    );

    unsafe extern "C" {
        fn paw_guarded_call(body: extern "C" fn(*mut c_void), data: *mut c_void, buf: *mut JumpBuf) -> u64;
        pub(super) fn paw_fault_landing();
    }

    struct Payload<F, R> {
        body: Option<F>,
        out: Option<R>,
    }

    extern "C" fn trampoline<F: FnOnce() -> R, R>(data: *mut c_void) {
        let payload = unsafe { &mut *(data as *mut Payload<F, R>) };
        if let Some(body) = payload.body.take() {
            payload.out = Some(body());
        }
    }

    pub(super) fn guarded<F: FnOnce() -> R, R>(f: F) -> Result<R, usize> {
        let mut payload = Payload { body: Some(f), out: None };
        let mut buf = JumpBuf { sp: 0 };
        let previous = GUARD.with(|guard| guard.replace(&mut buf));
        let faulted = unsafe {
            paw_guarded_call(
                trampoline::<F, R>,
                &mut payload as *mut Payload<F, R> as *mut c_void,
                &mut buf,
            )
        };
        GUARD.with(|guard| guard.set(previous));
        match payload.out {
            Some(out) if faulted == 0 => Ok(out),
            _ => Err(ADDRESS.with(Cell::get)),
        }
    }

    pub(super) fn unguarded<R>(f: impl FnOnce() -> R) -> R {
        let previous = GUARD.with(|guard| guard.replace(std::ptr::null_mut()));
        let out = f();
        GUARD.with(|guard| guard.set(previous));
        out
    }

    /// 살아 있는 구간이 있으면 시그널 컨텍스트를 구간 출구로 돌린다.
    pub(super) fn redirect(address: usize, context: *mut c_void) -> bool {
        let buf = GUARD.with(Cell::get);
        if buf.is_null() || context.is_null() {
            return false;
        }
        ADDRESS.with(|slot| slot.set(address));
        unsafe {
            let uc = context as *mut libc::ucontext_t;
            let gregs = &mut (*uc).uc_mcontext.gregs;
            gregs[libc::REG_RSP as usize] = (*buf).sp as libc::greg_t;
            gregs[libc::REG_RIP as usize] = paw_fault_landing as *const () as usize as libc::greg_t;
        }
        true
    }
}

/// `f`를 폴트 복구 구간 안에서 실행한다. 폴트가 나면 `f`의 나머지는 버려지고
/// (그 안의 값은 드롭되지 않는다) 폴트 주소가 돌아온다.
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, usize> {
    recover::guarded(f)
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
pub fn guarded<R>(f: impl FnOnce() -> R) -> Result<R, usize> {
    Ok(f())
}

/// 바깥 복구 구간을 잠시 끈다. 네이티브 코드가 스크립트로 다시 들어올 때 쓴다.
/// 그 안의 폴트가 바깥 구간까지 러스트 프레임을 건너뛰지 않게 한다.
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub fn unguarded<R>(f: impl FnOnce() -> R) -> R {
    recover::unguarded(f)
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
pub fn unguarded<R>(f: impl FnOnce() -> R) -> R {
    f()
}

// ========== 복구할 수 없는 폴트 ==========

fn report(address: usize) -> ! {
    let fault = NativeFault {
        address,
        in_script: IN_SCRIPT.with(Cell::get),
    };
    let raw = FAULT_HANDLER.load(Ordering::SeqCst);
    if raw != 0 && !fault.in_script {
        let handler: FaultHandler = unsafe { std::mem::transmute::<usize, FaultHandler>(raw) };
        handler(fault);
    } else {
        write_default(fault);
    }
    std::process::abort()
}

#[cfg(unix)]
fn write_default(fault: NativeFault) {
    // 시그널 핸들러 안이므로 할당 없이 고정 버퍼에 쓴다.
    let mut buf = [0u8; 96];
    let prefix: &[u8] = if fault.in_script {
        b"Segmentation fault in script at 0x"
    } else {
        b"Segmentation fault at 0x"
    };
    let mut len = prefix.len();
    buf[..len].copy_from_slice(prefix);
    for shift in (0..16).rev() {
        let nibble = (fault.address >> (shift * 4)) & 0xF;
        buf[len] = b"0123456789abcdef"[nibble];
        len += 1;
    }
    buf[len] = b'\n';
    len += 1;
    unsafe { libc::write(2, buf.as_ptr() as *const libc::c_void, len) };
}

#[cfg(not(unix))]
fn write_default(fault: NativeFault) {
    eprintln!("Segmentation fault at 0x{:016x}", fault.address);
}

#[cfg(unix)]
extern "C" fn on_signal(_signal: libc::c_int, info: *mut libc::siginfo_t, context: *mut libc::c_void) {
    let address = if info.is_null() {
        0
    } else {
        unsafe { (*info).si_addr() as usize }
    };
    if !recover_in_script(address, context) {
        report(address)
    }
}

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
fn recover_in_script(address: usize, context: *mut libc::c_void) -> bool {
    IN_SCRIPT.with(Cell::get) && recover::redirect(address, context)
}

#[cfg(all(unix, not(all(target_os = "linux", target_arch = "x86_64"))))]
fn recover_in_script(_address: usize, _context: *mut libc::c_void) -> bool {
    false
}

/// 프로세스 전체에 한 번만 설치된다.
pub fn install() {
    INSTALL.call_once(|| {
        #[cfg(unix)]
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_signal as *const () as libc::sighandler_t;
            action.sa_flags = libc::SA_SIGINFO;
            libc::sigemptyset(&mut action.sa_mask);
            for signal in [libc::SIGSEGV, libc::SIGBUS] {
                if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                    tracing::warn!(signal, "failed to install fault handler");
                }
            }
        }
        tracing::debug!("fault handler installed");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_flag() {
        assert!(!IN_SCRIPT.with(Cell::get));
        {
            let _outer = ScriptGuard::enter();
            {
                let _inner = ScriptGuard::enter();
                assert!(IN_SCRIPT.with(Cell::get));
            }
            assert!(IN_SCRIPT.with(Cell::get));
        }
        assert!(!IN_SCRIPT.with(Cell::get));
    }

    #[test]
    fn test_guarded_returns_value() {
        assert_eq!(guarded(|| 6 * 7), Ok(42));
        assert_eq!(take_pending(), None);
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn test_bad_read_becomes_pending() {
        let _script = ScriptGuard::enter();
        let mut out = [0xAAu8; 4];
        unsafe { copy_guarded(16 as *const u8, out.as_mut_ptr(), 4) };
        assert_eq!(take_pending(), Some(16));
        assert_eq!(take_pending(), None);
        assert_eq!(out, [0xAA; 4]);

        // 복구 뒤에도 구간은 계속 쓸 수 있다.
        let src = [1u8, 2, 3, 4];
        unsafe { copy_guarded(src.as_ptr(), out.as_mut_ptr(), 4) };
        assert_eq!(take_pending(), None);
        assert_eq!(out, src);
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn test_nested_guard_keeps_outer() {
        let _script = ScriptGuard::enter();
        let outer = guarded(|| guarded(|| unsafe { std::ptr::read_volatile(32 as *const u32) }));
        assert_eq!(outer, Ok(Err(32)));
    }
}
