// stack 모듈 - 깊은 재귀를 위한 네이티브 스택 확보
//
// 스크립트 호출 하나가 네이티브 스택을 수십 KB 쓰므로, 재귀 진입점마다
// 남은 스택을 확인하고 모자라면 새 구간을 붙인다.

/// 남아 있어야 하는 최소 스택 (100KB)
const RED_ZONE: usize = 100 * 1024;

/// 모자랄 때 새로 붙이는 스택 크기 (1MB)
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// 남은 스택이 `RED_ZONE`보다 적으면 스택을 늘린 뒤 `f`를 실행한다.
#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(n: u32) -> u32 {
        ensure_sufficient_stack(|| {
            let pad = std::hint::black_box([0u8; 1024]);
            if n == 0 { 0 } else { depth(n - 1) + 1 + pad[0] as u32 }
        })
    }

    #[test]
    fn test_deep_recursion_grows_stack() {
        assert_eq!(depth(20_000), 20_000);
    }
}
