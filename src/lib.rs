pub mod config;
pub mod lexer;
pub mod parser;
pub mod runtime_io;
pub mod types;
pub mod vm;

use ariadne::{Color, Label, Report, ReportKind, Source};

pub use config::RuntimeConfig;
pub use runtime_io::{BufferIo, FsLoader, MemoryLoader, RuntimeIo, SourceLoader, StdIo};
pub use vm::fault::{FaultHandler, NativeFault};
pub use vm::symbols::{ProcessSymbols, SymbolResolver};
pub use vm::{VmError, VmErrorKind, VmResult};

use vm::fault::{self, ScriptGuard};
use vm::symbols::SymbolTable;
use vm::value::Variable;
use vm::Vm;

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub span: std::ops::Range<usize>,
}

impl Diagnostic {
    /// Syntax errors carry a byte span; runtime errors have none to point at.
    pub fn from_error(e: &VmError) -> Option<Self> {
        let span = e.span.clone()?;
        Some(Diagnostic {
            message: e.message.clone(),
            span,
        })
    }

    pub fn format(&self, path: &str, src: &str, kind: &str, code: usize) -> String {
        let mut buffer = Vec::new();
        Report::build(ReportKind::Error, (path, self.span.clone()))
            .with_config(ariadne::Config::new().with_index_type(ariadne::IndexType::Byte))
            .with_code(code)
            .with_message(kind)
            .with_label(
                Label::new((path, self.span.clone()))
                    .with_message(&self.message)
                    .with_color(Color::Red),
            )
            .finish()
            .write((path, Source::from(src)), &mut buffer)
            .ok();
        String::from_utf8_lossy(&buffer).to_string()
    }
}

/// Plain values that `get_value`/`set_value` can move in and out of globals.
pub trait Scalar: Sized {
    const SIZE: usize;
    fn from_bits(bits: u64) -> Self;
    fn to_bits(self) -> u64;
}

macro_rules! int_scalar {
    ($($t:ty),*) => {$(
        impl Scalar for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            fn from_bits(bits: u64) -> Self {
                bits as $t
            }
            fn to_bits(self) -> u64 {
                self as u64
            }
        }
    )*};
}

int_scalar!(i8, i16, i32, i64, u8, u16, u32, u64);

impl Scalar for f32 {
    const SIZE: usize = 4;
    fn from_bits(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
    fn to_bits(self) -> u64 {
        f32::to_bits(self) as u64
    }
}

impl Scalar for f64 {
    const SIZE: usize = 8;
    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }
}

/// An embedded runtime instance.
///
/// Globals survive between `run` calls. Dropping the context closes every
/// level, running pending destructors.
pub struct Context {
    vm: Box<Vm>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let vm = Vm::new(
            config,
            Box::new(StdIo),
            Box::new(FsLoader),
            SymbolTable::default(),
        );
        Context { vm }
    }

    pub fn with_io(mut self, io: impl RuntimeIo + 'static) -> Self {
        self.vm.io = Box::new(io);
        self
    }

    pub fn with_loader(mut self, loader: impl SourceLoader + 'static) -> Self {
        self.vm.loader = Box::new(loader);
        self
    }

    /// Replaces the resolver consulted after registered symbols.
    pub fn with_symbols(mut self, resolver: impl SymbolResolver + 'static) -> Self {
        self.vm.symbols.set_fallback(Box::new(resolver));
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.vm.config
    }

    /// Runs source text as the file `<memory>`.
    pub fn run(&mut self, code: &str) -> Result<(), VmError> {
        let _guard = ScriptGuard::enter();
        let outcome = self.vm.execute_source(code, "<memory>");
        self.vm.reset();
        outcome
    }

    /// Runs a file, relative to the directory of the file currently executing.
    pub fn run_file(&mut self, path: &str) -> Result<(), VmError> {
        let _guard = ScriptGuard::enter();
        let outcome = self.vm.execute_file(path);
        self.vm.reset();
        outcome
    }

    /// Compiles without running and returns the disassembly.
    pub fn disassemble(&mut self, code: &str, file: &str) -> Result<String, VmError> {
        let bytes = parser::compile(code, file, &mut self.vm.strings)?;
        Ok(vm::disasm::disassemble(&bytes, &self.vm.strings))
    }

    fn global(&self, name: &str) -> Option<&Variable> {
        let id = self.vm.strings.get(name)?;
        self.vm.scopes.lookup(id, 0)
    }

    /// Copies the raw `value_size` bytes of a global into `out`.
    pub fn get(&self, name: &str, out: &mut [u8]) -> bool {
        let Some(var) = self.global(name) else {
            return false;
        };
        let size = self.vm.types.get(var.ty).value_size() as usize;
        if out.len() < size {
            return false;
        }
        let bits = var.bits(&self.vm.types);
        out[..size].copy_from_slice(&bits.to_le_bytes()[..size]);
        true
    }

    /// Overwrites a global from raw bytes. Fails for const globals.
    pub fn set(&mut self, name: &str, bytes: &[u8]) -> bool {
        let Some(var) = self.global(name) else {
            return false;
        };
        let ty = self.vm.types.get(var.ty);
        let size = ty.value_size() as usize;
        if ty.is_const() || bytes.len() < size || size > 8 {
            return false;
        }
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(&bytes[..size]);
        var.store(&self.vm.types, u64::from_le_bytes(buf));
        true
    }

    pub fn get_value<T: Scalar>(&self, name: &str) -> Option<T> {
        let mut buf = [0u8; 8];
        let size = self.global_size(name)?;
        if size != T::SIZE || !self.get(name, &mut buf[..size]) {
            return None;
        }
        Some(T::from_bits(u64::from_le_bytes(buf)))
    }

    pub fn set_value<T: Scalar>(&mut self, name: &str, value: T) -> bool {
        if self.global_size(name) != Some(T::SIZE) {
            return false;
        }
        self.set(name, &value.to_bits().to_le_bytes()[..T::SIZE])
    }

    fn global_size(&self, name: &str) -> Option<usize> {
        let var = self.global(name)?;
        Some(self.vm.types.get(var.ty).value_size() as usize)
    }

    /// Renders the value of a global the way `print_variable` shows it.
    pub fn render(&self, name: &str) -> Option<String> {
        let var = self.global(name)?;
        Some(var.render(&self.vm.types, &self.vm.strings))
    }

    /// Writes `type name = value` through the runtime's I/O.
    pub fn print_variable(&mut self, name: &str) -> bool {
        let (Some(ty), Some(value)) = (self.type_of(name), self.render(name)) else {
            return false;
        };
        self.vm.io.write_line(&format!("{} {} = {}", ty, name, value));
        true
    }

    pub fn print_type(&mut self, name: &str) -> bool {
        let Some(ty) = self.type_of(name) else {
            return false;
        };
        self.vm.io.write_line(&ty);
        true
    }

    pub fn type_of(&self, name: &str) -> Option<String> {
        let var = self.global(name)?;
        Some(self.vm.display_type(var.ty))
    }

    /// Makes `address` visible to `extern` declarations under `name`.
    pub fn register_symbol(&mut self, name: &str, address: usize) {
        self.vm.symbols.register(name, address);
    }

    /// Installs the process-wide callback for native memory faults.
    pub fn on_fault(&mut self, handler: FaultHandler) {
        fault::install();
        fault::set_handler(Some(handler));
    }

    /// Prints `Error: msg` and one `  in name at file (row:col)` line per frame.
    pub fn log_error(&mut self, e: &VmError) {
        self.vm.log_error(e);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.vm.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn context() -> (Context, BufferIo) {
        let io = BufferIo::new();
        let ctx = Context::new().with_io(io.clone());
        (ctx, io)
    }

    #[test]
    fn test_globals_persist_between_runs() {
        let (mut ctx, _) = context();
        ctx.run("s32 counter = 40;").unwrap();
        ctx.run("counter += 2;").unwrap();
        assert_eq!(ctx.get_value::<i32>("counter"), Some(42));
    }

    #[test]
    fn test_set_value_is_seen_by_script() {
        let (mut ctx, _) = context();
        ctx.run("f64 scale = 1.0;").unwrap();
        assert!(ctx.set_value("scale", 2.5f64));
        ctx.run("f64 doubled = scale * 2.0;").unwrap();
        assert_eq!(ctx.get_value::<f64>("doubled"), Some(5.0));
        assert_eq!(ctx.get_value::<i32>("doubled"), None);
        assert!(!ctx.set_value("missing", 1i32));
    }

    #[test]
    fn test_result_holds_last_value() {
        let (mut ctx, _) = context();
        ctx.run("s64 x = 3; x * 7;").unwrap();
        assert_eq!(ctx.get_value::<i64>("@RESULT@"), Some(21));
    }

    #[test]
    fn test_type_of_and_print_variable() {
        let (mut ctx, io) = context();
        ctx.run("u8 flag = 1;").unwrap();
        assert_eq!(ctx.type_of("flag").as_deref(), Some("u8"));
        assert!(ctx.print_variable("flag"));
        assert_eq!(io.output(), "u8 flag = 1\n");
        assert_eq!(ctx.type_of("nothing"), None);
    }

    #[test]
    fn test_error_is_returned_and_stack_reset() {
        let (mut ctx, io) = context();
        let e = ctx.run("s32 x = 1;\nmissing + 1;").unwrap_err();
        assert_eq!(e.kind, VmErrorKind::Runtime);
        assert_eq!(e.message, "Variable 'missing' not found");
        ctx.log_error(&e);
        assert!(io.errors().starts_with("Error: Variable 'missing' not found"));
        assert!(io.errors().contains("at <memory> (2:1)"));
        ctx.run("x;").unwrap();
    }

    #[test]
    fn test_syntax_error_renders_diagnostic() {
        let (mut ctx, _) = context();
        let source = "s32 x = (1 + 2;";
        let e = ctx.run(source).unwrap_err();
        assert_eq!(e.kind, VmErrorKind::Syntax);
        let diagnostic = Diagnostic::from_error(&e).unwrap();
        let text = diagnostic.format("<memory>", source, "Syntax error", 1);
        assert!(text.contains("Expected ')'"));
    }

    #[test]
    fn test_run_file_through_memory_loader() {
        let loader = MemoryLoader::new().with_file("lib/answer.paw", "s32 answer = 6 * 7;");
        let mut ctx = Context::new().with_io(BufferIo::new()).with_loader(loader);
        ctx.run_file("lib/answer.paw").unwrap();
        assert_eq!(ctx.get_value::<i32>("answer"), Some(42));
    }

    #[test]
    fn test_missing_file_matches_include() {
        let (mut ctx, _) = context();
        let e = ctx.run_file("lib/missing.paw").unwrap_err();
        assert_eq!(e.kind, VmErrorKind::Runtime);
        assert_eq!(e.message, "File 'lib/missing.paw' not found");

        let e = ctx.run("include \"lib/missing.paw\";").unwrap_err();
        assert_eq!(e.kind, VmErrorKind::Runtime);
        assert_eq!(e.message, "File 'lib/missing.paw' not found");
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn test_bad_pointer_is_catchable() {
        let (mut ctx, _) = context();
        ctx.run(
            "s32 ok = 0;\n\
             s32# p = 16 -> s32#;\n\
             try { #p; } catch silently { ok = 1; }\n\
             try { #p = 5; } catch silently { ok += 10; }",
        )
        .unwrap();
        assert_eq!(ctx.get_value::<i32>("ok"), Some(11));
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn test_uncaught_fault_is_returned() {
        let (mut ctx, io) = context();
        let e = ctx.run("s32# p = 16 -> s32#;\ns32 x = #p;").unwrap_err();
        assert_eq!(e.kind, VmErrorKind::Fault);
        assert_eq!(e.message, "Invalid memory access at 0x10");
        assert!(io.errors().is_empty());

        // 폴트 뒤에도 컨텍스트는 계속 쓸 수 있다.
        ctx.run("s32 after = 3;").unwrap();
        assert_eq!(ctx.get_value::<i32>("after"), Some(3));
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    extern "C" fn read_at(addr: i64) -> i64 {
        unsafe { std::ptr::read_volatile(addr as *const i64) }
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn test_native_fault_is_catchable() {
        let (mut ctx, _) = context();
        ctx.register_symbol("read_at", read_at as usize);
        ctx.run(
            "extern s64 <- (s64 a) read_at;\n\
             s32 caught = 0;\n\
             try { read_at(24); } catch silently { caught = 1; }",
        )
        .unwrap();
        assert_eq!(ctx.get_value::<i32>("caught"), Some(1));

        let e = ctx.run("read_at(24);").unwrap_err();
        assert_eq!(e.kind, VmErrorKind::Fault);
        assert_eq!(e.message, "Invalid memory access at 0x18");
    }
}
