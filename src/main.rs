use pawscript::{Context, Diagnostic, RuntimeConfig, VmError, VmErrorKind};
use std::env;
use std::process::ExitCode;

mod repl;

const USAGE: &str = "usage: paw [run|disasm] <file> [--config <file.json>] [--dump]\n       paw repl [--config <file.json>]";

fn init_logging(dump: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    // --dump widens the default filter so the debug-level disassembly shows up
    let default = if dump { "warn,pawscript=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("PAW_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let formatter = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(formatter)
        .with(filter)
        .init();
}

fn load_config(path: Option<&str>) -> Result<RuntimeConfig, String> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    RuntimeConfig::from_json(&text).map_err(|e| format!("{}: {}", path, e))
}

/// Syntax errors get an ariadne report; everything else the frame trace.
pub(crate) fn report(ctx: &mut Context, e: &VmError, path: &str, src: &str) {
    if e.kind == VmErrorKind::Syntax {
        if let Some(diagnostic) = Diagnostic::from_error(e) {
            let file = e.frames.first().map_or(path, |f| f.file.as_str());
            // errors from included files fall back to the frame trace
            if file == path {
                eprint!("{}", diagnostic.format(path, src, "Syntax error", 1));
                return;
            }
        }
    }
    ctx.log_error(e);
}

fn main() -> ExitCode {
    // subcommands: run (default) / disasm / repl
    let mut args = env::args().skip(1).collect::<Vec<String>>();
    let mut subcmd = "run".to_string();
    if let Some(first) = args.first() {
        if ["run", "disasm", "repl"].contains(&first.as_str()) {
            subcmd = first.clone();
            args.remove(0);
        }
    }
    let mut input_path: Option<String> = None;
    let mut config_path: Option<String> = None;
    let mut dump = false;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                config_path = args.get(i + 1).cloned();
                i += 1;
            }
            "--dump" => dump = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                return ExitCode::SUCCESS;
            }
            p => input_path = Some(p.to_string()),
        }
        i += 1;
    }
    init_logging(dump);

    let mut config = match load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("paw: cannot read config {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.dump_bytecode |= dump;

    if subcmd == "repl" {
        return repl::run(Context::with_config(config));
    }

    let Some(path) = input_path else {
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    };
    let src = match std::fs::read_to_string(&path) {
        Ok(src) => src,
        Err(e) => {
            eprintln!("paw: cannot read {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let mut ctx = Context::with_config(config);
    let outcome = match subcmd.as_str() {
        "disasm" => ctx.disassemble(&src, &path).map(|text| print!("{}", text)),
        _ => ctx.run_file(&path),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&mut ctx, &e, &path, &src);
            ExitCode::FAILURE
        }
    }
}
