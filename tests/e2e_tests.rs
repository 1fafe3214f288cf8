//! Runs every `tests/programs/*.paw` and compares what it prints with the
//! sibling `.out` file. Programs print through host functions that are
//! handed to the runtime as native symbols.
#![cfg(all(target_arch = "x86_64", unix))]

use pawscript::{BufferIo, Context};
use std::cell::RefCell;
use std::ffi::{CStr, c_char};
use std::fs;
use std::path::{Path, PathBuf};

thread_local! {
    static PRINTED: RefCell<String> = const { RefCell::new(String::new()) };
}

extern "C" fn print_int(v: i64) {
    PRINTED.with(|out| out.borrow_mut().push_str(&format!("{}\n", v)));
}

extern "C" fn print_float(v: f64) {
    PRINTED.with(|out| out.borrow_mut().push_str(&format!("{}\n", v)));
}

extern "C" fn print_str(s: *const c_char) {
    let text = if s.is_null() {
        "(null)".to_string()
    } else {
        unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
    };
    PRINTED.with(|out| out.borrow_mut().push_str(&format!("{}\n", text)));
}

const PRELUDE: &str = "
extern void <- (s64 v) print_int;
extern void <- (f64 v) print_float;
extern void <- (const s8# s) print_str;
";

fn get_test_programs() -> Vec<PathBuf> {
    let test_dir = PathBuf::from("tests/programs");
    let mut programs = vec![];
    if let Ok(entries) = fs::read_dir(&test_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("paw") {
                programs.push(path);
            }
        }
    }
    programs.sort();
    programs
}

fn context() -> (Context, BufferIo) {
    let io = BufferIo::new();
    let mut ctx = Context::new().with_io(io.clone());
    ctx.register_symbol("print_int", print_int as usize);
    ctx.register_symbol("print_float", print_float as usize);
    ctx.register_symbol("print_str", print_str as usize);
    (ctx, io)
}

/// Printed lines, followed by `Error: ...` reports when the program fails.
fn run_test_program(path: &Path) -> String {
    PRINTED.with(|out| out.borrow_mut().clear());
    let (mut ctx, io) = context();
    ctx.run(PRELUDE).expect("prelude should declare the host functions");

    let path_str = path.to_string_lossy().to_string();
    if let Err(e) = ctx.run_file(&path_str) {
        ctx.log_error(&e);
    }
    drop(ctx);

    let mut output = PRINTED.with(|out| out.borrow().clone());
    output.push_str(&io.output());
    for line in io.errors().lines().filter(|l| l.starts_with("Error: ")) {
        output.push_str(line);
        output.push('\n');
    }
    output
}

fn expected_output(path: &Path) -> String {
    fs::read_to_string(path.with_extension("out")).unwrap_or_default()
}

#[test]
fn test_e2e_all_programs() {
    let programs = get_test_programs();
    assert!(!programs.is_empty(), "no programs under tests/programs/");

    let mut failed = vec![];
    for path in &programs {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        let actual = run_test_program(path);
        let expected = expected_output(path);
        if actual == expected {
            println!("{} ... ok", name);
        } else {
            println!("{} ... FAILED\n--- expected\n{}--- actual\n{}", name, expected, actual);
            failed.push(name);
        }
    }

    println!("\n{} passed, {} failed", programs.len() - failed.len(), failed.len());
    assert!(failed.is_empty(), "failing programs: {:?}", failed);
}

macro_rules! test_program {
    ($test_name:ident, $filename:literal) => {
        #[test]
        fn $test_name() {
            let _ = include_str!(concat!("programs/", $filename));
            let path = PathBuf::from(concat!("tests/programs/", $filename));
            pretty_assertions::assert_eq!(run_test_program(&path), expected_output(&path));
        }
    };
}

test_program!(test_arith, "arith.paw");
test_program!(test_loops, "loops.paw");
test_program!(test_functions, "functions.paw");
test_program!(test_closures, "closures.paw");
test_program!(test_structs, "structs.paw");
test_program!(test_memory, "memory.paw");
test_program!(test_exceptions, "exceptions.paw");
test_program!(test_include, "include.paw");
test_program!(test_uncaught, "uncaught.paw");
