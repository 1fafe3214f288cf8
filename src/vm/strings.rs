use std::collections::HashMap;

/// 인터닝된 문자열 핸들. 바이트코드에는 u32로 기록된다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrId(pub u32);

impl StrId {
    pub const THIS: StrId = StrId(0);
    pub const VARARGS: StrId = StrId(1);
    pub const RESULT: StrId = StrId(2);
    pub const SUPER: StrId = StrId(3);
    pub const NEW: StrId = StrId(4);
    pub const DELETE: StrId = StrId(5);
    pub const GLOBAL: StrId = StrId(6);
    pub const ANONYMOUS: StrId = StrId(7);
}

const WELL_KNOWN: [&str; 8] = [
    "this",
    "...",
    "@RESULT@",
    "super",
    "new",
    "delete",
    "<global>",
    "<anonymous>",
];

/// 런타임 전체에서 공유하는 문자열 풀.
///
/// 각 항목은 NUL로 끝나는 고정 버퍼에 보관되므로 `ptr()`이 돌려주는 주소는
/// 풀이 살아있는 동안 유효하다. 스크립트의 문자열 리터럴(`const s8#`)이 이 주소를 가리킨다.
#[derive(Debug)]
pub struct StringPool {
    strings: Vec<Box<str>>,
    lookup: HashMap<Box<str>, StrId>,
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StringPool {
    pub fn new() -> Self {
        let mut pool = StringPool {
            strings: Vec::new(),
            lookup: HashMap::new(),
        };
        for name in WELL_KNOWN {
            pool.intern(name);
        }
        pool
    }

    pub fn intern(&mut self, text: &str) -> StrId {
        if let Some(&id) = self.lookup.get(text) {
            return id;
        }
        let id = StrId(self.strings.len() as u32);
        let mut stored = String::with_capacity(text.len() + 1);
        stored.push_str(text);
        stored.push('\0');
        self.strings.push(stored.into_boxed_str());
        self.lookup.insert(text.into(), id);
        id
    }

    pub fn get(&self, text: &str) -> Option<StrId> {
        self.lookup.get(text).copied()
    }

    /// NUL을 제외한 문자열
    pub fn resolve(&self, id: StrId) -> &str {
        match self.strings.get(id.0 as usize) {
            Some(s) => &s[..s.len() - 1],
            None => "",
        }
    }

    /// NUL로 끝나는 안정된 주소
    pub fn ptr(&self, id: StrId) -> *const u8 {
        match self.strings.get(id.0 as usize) {
            Some(s) => s.as_ptr(),
            None => std::ptr::null(),
        }
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let mut pool = StringPool::new();
        let a = pool.intern("hello");
        let ptr = pool.ptr(a);
        for i in 0..1000 {
            pool.intern(&format!("filler{}", i));
        }
        assert_eq!(pool.intern("hello"), a);
        assert_eq!(pool.ptr(a), ptr);
        assert_eq!(pool.resolve(a), "hello");
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 6) };
        assert_eq!(bytes, b"hello\0");
    }

    #[test]
    fn test_well_known_ids() {
        let pool = StringPool::new();
        assert_eq!(pool.resolve(StrId::THIS), "this");
        assert_eq!(pool.resolve(StrId::RESULT), "@RESULT@");
        assert_eq!(pool.get("<anonymous>"), Some(StrId::ANONYMOUS));
    }
}
