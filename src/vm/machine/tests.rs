//! VM 테스트 모듈

use super::*;
use crate::runtime_io::{BufferIo, MemoryLoader};
use pretty_assertions::assert_eq;

struct Harness {
    vm: Box<Vm>,
    io: BufferIo,
}

fn harness() -> Harness {
    harness_with(RuntimeConfig::default(), MemoryLoader::new())
}

fn harness_with(config: RuntimeConfig, loader: MemoryLoader) -> Harness {
    let io = BufferIo::new();
    let vm = Vm::new(
        config,
        Box::new(io.clone()),
        Box::new(loader),
        SymbolTable::default(),
    );
    Harness { vm, io }
}

impl Harness {
    fn run(&mut self, source: &str) -> VmResult<()> {
        let outcome = self.vm.execute_source(source, "test.paw");
        self.vm.reset();
        outcome
    }

    fn exec(&mut self, source: &str) {
        if let Err(e) = self.run(source) {
            panic!("script failed: {}", e.report());
        }
    }

    fn var(&self, name: &str) -> Variable {
        let id = self.vm.strings.get(name).unwrap();
        self.vm.load(id).unwrap()
    }

    fn int(&self, name: &str) -> i64 {
        self.var(name).bits(&self.vm.types) as i64
    }

    fn float(&self, name: &str) -> f64 {
        self.var(name).as_f64(&self.vm.types)
    }

    fn type_name(&self, name: &str) -> String {
        self.vm.display_type(self.var(name).ty)
    }
}

// ========== 식 테스트 ==========

#[test]
fn test_precedence() {
    let mut h = harness();
    h.exec("s32 r = 3 + 4 * 2; s32 q = (3 + 4) * 2;");
    assert_eq!(h.int("r"), 11);
    assert_eq!(h.int("q"), 14);
}

#[test]
fn test_numeric_promotion() {
    let mut h = harness();
    h.exec(
        "f64 half = 1.0 / 2.0;
         s32 neg = -7 / 2;
         s32 p = 2 ^^ 10;
         u64 big = 18446744073709551615;
         u8 bigger = big > 0;
         s64 wide = 2147483648;",
    );
    assert_eq!(h.float("half"), 0.5);
    assert_eq!(h.int("neg"), -3);
    assert_eq!(h.int("p"), 1024);
    assert_eq!(h.int("bigger"), 1);
    assert_eq!(h.int("wide"), 2147483648);
}

#[test]
fn test_division_by_zero() {
    let mut h = harness();
    let e = h.run("s32 z = 0; s32 r = 1 / z;").unwrap_err();
    assert_eq!(e.kind, VmErrorKind::Runtime);
    assert_eq!(e.message, "Division by zero");
}

#[test]
fn test_ternary_and_elvis() {
    let mut h = harness();
    h.exec("s32 t = if 1 < 2 => [10; 20]; s32 e = 0 ? 5; s32 k = 3 ? 5;");
    assert_eq!(h.int("t"), 10);
    assert_eq!(h.int("e"), 5);
    assert_eq!(h.int("k"), 3);
}

#[test]
fn test_address_and_dereference() {
    let mut h = harness();
    h.exec("s32 x = 5; s32# p = $x; #p = 7; s32 y = #p + 1;");
    assert_eq!(h.int("x"), 7);
    assert_eq!(h.int("y"), 8);
}

#[test]
fn test_sizeof() {
    let mut h = harness();
    h.exec("u64 a = sizeof(s64); u64 b = sizeof(1.0); u64 c = sizeof(u8);");
    assert_eq!(h.int("a"), 8);
    assert_eq!(h.int("b"), 8);
    assert_eq!(h.int("c"), 1);
}

#[test]
fn test_result_holds_last_value() {
    let mut h = harness();
    h.exec("s32 x = 4; x * 5;");
    assert_eq!(h.int("@RESULT@"), 20);
}

// ========== 변수 ==========

#[test]
fn test_redeclaration_fails() {
    let mut h = harness();
    let e = h.run("s32 x; s32 x;").unwrap_err();
    assert_eq!(e.message, "Variable 'x' already exists in the current scope");
}

#[test]
fn test_missing_variable_reports_position() {
    let mut h = harness();
    let e = h.run("s32 x = 1;\nx + missing;").unwrap_err();
    assert_eq!(e.message, "Variable 'missing' not found");
    assert_eq!(e.frames[0].name, "<global>");
    assert_eq!(e.frames[0].file, "test.paw");
    assert_eq!((e.frames[0].row, e.frames[0].col), (2, 5));
}

#[test]
fn test_generic_declaration() {
    let mut h = harness();
    h.exec("defer(E)# p (E = s16);");
    assert_eq!(h.type_name("p"), "s16#");
}

// ========== 제어 흐름 ==========

#[test]
fn test_while_break_continue() {
    let mut h = harness();
    h.exec(
        "s32 i = 0; s32 odd = 0;
         while i < 10 {
             i += 1;
             if i % 2 == 0 => continue;
             if i > 7 => break;
             odd += i;
         }",
    );
    assert_eq!(h.int("odd"), 16);
    assert_eq!(h.int("i"), 9);
}

#[test]
fn test_for_directions_and_bounds() {
    let mut h = harness();
    h.exec(
        "s64 up = 0; s64 down = 0; s64 down_excl = 0; s64 lo_excl = 0;
         for s32 i: 1 => 5 { up = up * 10 + i; }
         for s32 i: 1 => 5 step -1 { down = down * 10 + i; }
         for s32 i: 1 => 5 excl step -1 { down_excl = down_excl * 10 + i; }
         for s32 i: 1 excl => 5 { lo_excl = lo_excl * 10 + i; }",
    );
    assert_eq!(h.int("up"), 12345);
    assert_eq!(h.int("down"), 54321);
    assert_eq!(h.int("down_excl"), 4321);
    assert_eq!(h.int("lo_excl"), 2345);
}

#[test]
fn test_for_stops_on_wrap() {
    let mut h = harness();
    h.exec("s32 n = 0; for u8 i: 250 => 255 { n += 1; }");
    assert_eq!(h.int("n"), 6);
}

#[test]
fn test_break_outside_loop() {
    let mut h = harness();
    let e = h.run("continue;").unwrap_err();
    assert_eq!(e.message, "'continue' outside of loop");
}

// ========== 함수 ==========

#[test]
fn test_function_calls_and_recursion() {
    let mut h = harness();
    h.exec(
        "s32 <- (s32 a, s32 b) add { return a + b; }
         s32 <- (s32 n) fib { if n < 2 => return n; return fib(n - 1) + fib(n - 2); }
         s32 r = add(2, 3);
         s32 f = fib(10);",
    );
    assert_eq!(h.int("r"), 5);
    assert_eq!(h.int("f"), 55);
}

#[test]
fn test_argument_count_mismatch() {
    let mut h = harness();
    h.exec("s32 <- (s32 a, s32 b) add { return a + b; }");
    let e = h.run("add(1);").unwrap_err();
    assert_eq!(e.message, "Non-matching number of arguments (expected 2, got 1)");
}

#[test]
fn test_missing_return() {
    let mut h = harness();
    let e = h.run("s32 <- () none { } none();").unwrap_err();
    assert_eq!(e.message, "No return specified in a non-void return function");
    assert_eq!(e.frames[0].name, "none");
    assert_eq!(e.frames[1].name, "<global>");
}

#[test]
fn test_varargs() {
    let mut h = harness();
    h.exec(
        "u64 <- (s32 first, ...) count { return sizeof(...); }
         f64 <- (s32 first, ...) second { return ...[1]; }
         u64 n = count(1, 2, 3.5);
         u64 none = count(1);
         f64 v = second(1, 2, 3.5);",
    );
    assert_eq!(h.int("n"), 2);
    assert_eq!(h.int("none"), 0);
    assert_eq!(h.float("v"), 3.5);
}

#[test]
fn test_stack_overflow() {
    let config = RuntimeConfig {
        max_frames: 16,
        ..RuntimeConfig::default()
    };
    let mut h = harness_with(config, MemoryLoader::new());
    let e = h.run("void <- () forever { forever(); } forever();").unwrap_err();
    assert_eq!(e.message, "Stack overflow (max 16 frames)");
    assert_eq!(h.vm.frames.len(), 1);
}

#[test]
fn test_deep_recursion_within_default_frames() {
    let mut h = harness();
    h.exec(
        "s32 <- (s32 n) down { if n == 0 => return 0; return down(n - 1) + 1; }
         s32 depth = down(1000);",
    );
    assert_eq!(h.int("depth"), 1000);
}

#[test]
fn test_default_frame_limit_is_an_error() {
    let mut h = harness();
    let e = h.run("void <- () forever { forever(); } forever();").unwrap_err();
    assert_eq!(e.message, "Stack overflow (max 1024 frames)");
    assert_eq!(h.vm.frames.len(), 1);
}

#[test]
fn test_capture_modes() {
    let mut h = harness();
    h.exec(
        "s32 <- () shared_counter {
             s32 v = 1;
             s32 <- () get [$] { return v; }
             v = 2;
             return get();
         }
         s32 <- () copied_counter {
             s32 v = 1;
             s32 <- () get [~] { return v; }
             v = 2;
             return get();
         }
         s32 a = shared_counter();
         s32 b = copied_counter();",
    );
    assert_eq!(h.int("a"), 2);
    assert_eq!(h.int("b"), 1);
}

// ========== 예외 ==========

#[test]
fn test_throw_and_catch_payload() {
    let mut h = harness();
    h.exec("s32 caught = 0; try { throw 7; } catch silently as e { caught = e; }");
    assert_eq!(h.int("caught"), 7);
    assert_eq!(h.io.errors(), "");
    h.exec("try { throw 8; } catch as e { caught = e; }");
    assert_eq!(h.int("caught"), 8);
    assert!(h.io.errors().starts_with("Error: 8"));
}

#[test]
fn test_catch_logging() {
    let mut h = harness();
    h.exec("try { throw 1 as \"loud\"; } catch { }");
    assert!(h.io.errors().starts_with("Error: loud"));
    h.io.clear();
    h.exec("try { throw 1 as \"quiet\"; } catch silently;");
    assert_eq!(h.io.errors(), "");
}

#[test]
fn test_uncaught_throw() {
    let mut h = harness();
    let e = h.run("throw 1 as \"boom\";").unwrap_err();
    assert_eq!(e.kind, VmErrorKind::Thrown);
    assert_eq!(e.message, "boom");
}

#[test]
fn test_throw_unwinds_allocations() {
    let mut h = harness();
    h.exec(
        "s32 <- () deep {
             {
                 s32# a = new scoped [s32]{1};
                 {
                     s32# b = new scoped [s32]{2};
                     { throw 5; }
                 }
             }
             return 0;
         }",
    );
    let live = h.vm.heap.len();
    h.exec("s32 caught = 0; try { deep(); } catch as e { caught = e; }");
    assert_eq!(h.int("caught"), 5);
    assert_eq!(h.vm.heap.len(), live);
    assert_eq!(h.vm.scopes.depth(), 1);
}

// ========== 할당 ==========

const TRACKED: &str = "s32 calls = 0;
     s64 order = 0;
     type Tracked = struct {
         s32 tag;
         void <- () delete { calls += 1; order = order * 10 + this.tag; }
     };";

#[test]
fn test_unwinding_runs_each_destructor_once() {
    let mut h = harness();
    h.exec(TRACKED);
    h.exec(
        "void <- () nested {
             Tracked a = new scoped [Tracked]{.tag = 1};
             {
                 Tracked b = new scoped [Tracked]{.tag = 2};
                 {
                     Tracked c = new scoped [Tracked]{.tag = 3};
                     throw 9;
                 }
             }
         }
         try { nested(); } catch silently;",
    );
    assert_eq!(h.int("calls"), 3);
    assert_eq!(h.int("order"), 321);
    h.exec("{ }");
    assert_eq!(h.int("calls"), 3);
}

#[test]
fn test_same_level_released_newest_first() {
    let mut h = harness();
    h.exec(TRACKED);
    h.exec(
        "{
             Tracked a = new scoped [Tracked]{.tag = 1};
             Tracked b = new scoped [Tracked]{.tag = 2};
             Tracked c = new scoped [Tracked]{.tag = 3};
         }",
    );
    assert_eq!(h.int("order"), 321);
}

#[test]
fn test_moved_allocation_dies_with_outer_level() {
    let mut h = harness();
    h.exec(TRACKED);
    h.exec(
        "{
             Tracked outer = new scoped [Tracked]{.tag = 1};
             {
                 Tracked kept = new scoped [Tracked]{.tag = 7};
                 Tracked gone = new scoped [Tracked]{.tag = 2};
                 move(kept) => [scopeof(outer)];
             }
             order = order * 10;
         }",
    );
    assert_eq!(h.int("order"), 2071);
    assert_eq!(h.int("calls"), 3);
}

#[test]
fn test_scoped_allocation_released() {
    let mut h = harness();
    let live = h.vm.heap.len();
    h.exec("{ s32# p = new scoped [s32]{5}; }");
    assert_eq!(h.vm.heap.len(), live);
}

#[test]
fn test_move_survives_inner_scope() {
    let mut h = harness();
    let live = h.vm.heap.len();
    h.exec(
        "s32# keep;
         { s32# p = new scoped [s32]{9}; keep = move(p) => [0]; }
         s32 kept = #keep;",
    );
    assert_eq!(h.int("kept"), 9);
    assert_eq!(h.vm.heap.len(), live + 1);
    h.exec("delete(keep);");
    assert_eq!(h.vm.heap.len(), live);
}

#[test]
fn test_array_allocation() {
    let mut h = harness();
    h.exec(
        "s32# arr = new [s32](3){10, 20, 30};
         s32 third = arr[2];
         s32 second = #(arr + 1);
         u64 len = arr::length;
         u64 size = arr::size;",
    );
    assert_eq!(h.int("third"), 30);
    assert_eq!(h.int("second"), 20);
    assert_eq!(h.int("len"), 3);
    assert_eq!(h.int("size"), 12);
}

// ========== 구조체 ==========

#[test]
fn test_struct_defaults_and_overrides() {
    let mut h = harness();
    h.exec(
        "type Point = struct { s32 x = 4; s32 y; };
         Point p = new [Point];
         Point q = new [Point]{.y = 9};
         s32 a = p.x + p.y;
         s32 b = q.x + q.y;",
    );
    assert_eq!(h.int("a"), 4);
    assert_eq!(h.int("b"), 13);
}

#[test]
fn test_unknown_field_override() {
    let mut h = harness();
    h.exec("type Point = struct { s32 x; };");
    let e = h.run("new [Point]{.z = 1};").unwrap_err();
    assert_eq!(e.message, "Field 'z' doesn't exist");
}

#[test]
fn test_constructor_and_destructor() {
    let mut h = harness();
    h.exec(
        "s32 destroyed = 0;
         type Counter = struct {
             s32 value = 10;
             void <- () new { this.value = this.value * 2; }
             void <- () delete { destroyed = destroyed + this.value; }
         };
         Counter c = new [Counter]{.value = 4};
         s32 v = c.value;
         { Counter d = new scoped [Counter]{.value = 1}; }",
    );
    assert_eq!(h.int("v"), 8);
    assert_eq!(h.int("destroyed"), 2);
}

#[test]
fn test_inline_embedding() {
    let mut h = harness();
    h.exec(
        "type Base = struct { s32 a = 1; };
         type Derived = struct { inline Base; s32 b = 2; };
         Derived d = new [Derived];
         s32 sum = d.a + d.b;",
    );
    assert_eq!(h.int("sum"), 3);
}

#[test]
fn test_structural_types_are_interned() {
    let mut h = harness();
    h.exec("type A = struct { s32 x; }; type B = struct { s32 x; };");
    assert_eq!(h.int("A"), h.int("B"));
}

// ========== include ==========

#[test]
fn test_include_returns_result() {
    let loader = MemoryLoader::new().with_file("lib.paw", "s32 shared = 5;\nshared * 2;");
    let mut h = harness_with(RuntimeConfig::default(), loader);
    h.exec("s32 r = include \"lib.paw\";");
    assert_eq!(h.int("r"), 10);
    assert_eq!(h.int("shared"), 5);
}

#[test]
fn test_include_missing_file() {
    let mut h = harness();
    let e = h.run("include \"nope.paw\";").unwrap_err();
    assert_eq!(e.message, "File 'nope.paw' not found");
}

// ========== 네이티브 브리지 ==========

#[cfg(all(target_arch = "x86_64", unix))]
extern "C" fn twice(x: i64) -> i64 {
    x * 2
}

#[cfg(all(target_arch = "x86_64", unix))]
#[test]
fn test_extern_call() {
    let mut h = harness();
    h.vm.symbols.register("twice", twice as usize);
    h.exec("extern s64 <- (s64 x) twice; s64 r = twice(21);");
    assert_eq!(h.int("r"), 42);
}

#[cfg(all(target_arch = "x86_64", unix))]
#[test]
fn test_script_function_through_native_pointer() {
    let mut h = harness();
    h.exec(
        "f64 <- (s32 a, f64 b) mix { return a * b + 0.5; }
         f64 direct = mix(3, 2.0);",
    );
    let addr = h.var("mix").bits(&h.vm.types) as usize;
    let native: extern "C" fn(i32, f64) -> f64 = unsafe { std::mem::transmute(addr) };
    assert_eq!(native(3, 2.0), h.float("direct"));
}
