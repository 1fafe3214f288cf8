use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::rc::Rc;

/// Abstraction over runtime output so the VM stays pure w.r.t. environment.
pub trait RuntimeIo {
    fn write(&mut self, s: &str);
    fn write_line(&mut self, s: &str);
    /// Diagnostics (error reports, destructor failures).
    fn write_error_line(&mut self, s: &str);
}

/// Default I/O that talks to process stdout/stderr (CLI use).
pub struct StdIo;

impl RuntimeIo for StdIo {
    fn write(&mut self, s: &str) {
        use std::io::Write;
        print!("{}", s);
        let _ = std::io::stdout().flush();
    }
    fn write_line(&mut self, s: &str) {
        println!("{}", s);
    }
    fn write_error_line(&mut self, s: &str) {
        eprintln!("{}", s);
    }
}

/// Buffer-based I/O for tests. Clones share the same buffers, so a test can
/// keep one handle and give the other to the runtime.
#[derive(Clone, Default)]
pub struct BufferIo {
    output: Rc<RefCell<String>>,
    errors: Rc<RefCell<String>>,
}

impl BufferIo {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn output(&self) -> String {
        self.output.borrow().clone()
    }
    pub fn errors(&self) -> String {
        self.errors.borrow().clone()
    }
    pub fn drain_output(&self) -> String {
        std::mem::take(&mut *self.output.borrow_mut())
    }
    pub fn clear(&self) {
        self.output.borrow_mut().clear();
        self.errors.borrow_mut().clear();
    }
}

impl RuntimeIo for BufferIo {
    fn write(&mut self, s: &str) {
        self.output.borrow_mut().push_str(s);
    }
    fn write_line(&mut self, s: &str) {
        let mut out = self.output.borrow_mut();
        out.push_str(s);
        out.push('\n');
    }
    fn write_error_line(&mut self, s: &str) {
        let mut out = self.errors.borrow_mut();
        out.push_str(s);
        out.push('\n');
    }
}

/// Where `include` and `run_file` read source text from.
pub trait SourceLoader {
    fn load(&self, path: &str) -> io::Result<String>;
    fn exists(&self, path: &str) -> bool;
}

pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn load(&self, path: &str) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
    fn exists(&self, path: &str) -> bool {
        Path::new(path).is_file()
    }
}

/// In-memory file set, keyed by the path the runtime asks for.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_file(mut self, path: &str, source: &str) -> Self {
        self.insert(path, source);
        self
    }
    pub fn insert(&mut self, path: &str, source: &str) {
        self.files.insert(normalize(path), source.to_string());
    }
}

fn normalize(path: &str) -> String {
    path.strip_prefix("./").unwrap_or(path).to_string()
}

impl SourceLoader for MemoryLoader {
    fn load(&self, path: &str) -> io::Result<String> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "No such file or directory"))
    }
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }
}
