// symbols 모듈 - `extern` 선언이 찾는 네이티브 심볼

use std::collections::HashMap;

/// 이름으로 네이티브 심볼 주소를 찾는다.
pub trait SymbolResolver {
    fn resolve(&self, name: &str) -> Option<usize>;
}

/// 프로세스 심볼 테이블 + 추가로 연 공유 라이브러리
pub struct ProcessSymbols {
    #[cfg(unix)]
    process: Option<libloading::os::unix::Library>,
    #[cfg(windows)]
    process: Option<libloading::os::windows::Library>,
    libraries: Vec<libloading::Library>,
}

impl ProcessSymbols {
    pub fn new() -> Self {
        #[cfg(unix)]
        let process = Some(libloading::os::unix::Library::this());
        #[cfg(windows)]
        let process = libloading::os::windows::Library::this().ok();
        ProcessSymbols {
            process,
            libraries: Vec::new(),
        }
    }

    /// 공유 라이브러리를 열어 검색 대상에 추가한다.
    pub fn open(&mut self, path: &str) -> Result<(), libloading::Error> {
        let library = unsafe { libloading::Library::new(path)? };
        self.libraries.push(library);
        Ok(())
    }
}

impl Default for ProcessSymbols {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolResolver for ProcessSymbols {
    fn resolve(&self, name: &str) -> Option<usize> {
        if let Some(process) = &self.process {
            let found = unsafe { process.get::<*const ()>(name.as_bytes()) };
            if let Ok(symbol) = found {
                return Some(*symbol as usize);
            }
        }
        self.libraries.iter().find_map(|library| {
            let symbol = unsafe { library.get::<*const ()>(name.as_bytes()) }.ok()?;
            Some(*symbol as usize)
        })
    }
}

/// 호스트가 등록한 심볼이 먼저, 없으면 fallback 리졸버를 쓴다.
pub struct SymbolTable {
    registered: HashMap<String, usize>,
    fallback: Box<dyn SymbolResolver>,
}

impl SymbolTable {
    pub fn new(fallback: Box<dyn SymbolResolver>) -> Self {
        SymbolTable {
            registered: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, name: &str, address: usize) {
        self.registered.insert(name.to_string(), address);
    }

    pub fn set_fallback(&mut self, fallback: Box<dyn SymbolResolver>) {
        self.fallback = fallback;
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new(Box::new(ProcessSymbols::new()))
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, name: &str) -> Option<usize> {
        self.registered
            .get(name)
            .copied()
            .or_else(|| self.fallback.resolve(name))
            .filter(|&addr| addr != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    impl SymbolResolver for Nothing {
        fn resolve(&self, _: &str) -> Option<usize> {
            None
        }
    }

    #[test]
    fn test_registered_symbols_win() {
        let mut table = SymbolTable::new(Box::new(Nothing));
        assert_eq!(table.resolve("answer"), None);
        table.register("answer", 0x42);
        assert_eq!(table.resolve("answer"), Some(0x42));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_symbols_find_libc() {
        let symbols = ProcessSymbols::new();
        assert!(symbols.resolve("malloc").is_some());
        assert!(symbols.resolve("definitely_not_a_symbol_4711").is_none());
    }
}
