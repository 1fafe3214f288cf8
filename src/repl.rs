use std::path::PathBuf;
use std::process::ExitCode;

use pawscript::Context;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

const HELP: &str = "\
:help          show this message
:type <name>   print the type of a global
:quit          leave the REPL
Statements end with ';'. Unclosed braces continue on the next line.";

fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".paw_history"))
}

/// Brace depth of a chunk of input, ignoring string and char literals.
fn brace_depth(text: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

pub fn run(mut ctx: Context) -> ExitCode {
    println!("PawScript REPL. Type :help for commands, Ctrl+D to exit.");
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("paw: cannot start line editor: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let history = history_path();
    if let Some(path) = &history {
        let _ = rl.load_history(path);
    }

    let mut pending = String::new();
    loop {
        let prompt = if pending.is_empty() { "paw> " } else { "...> " };
        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("paw: {}", e);
                break;
            }
        };

        if pending.is_empty() {
            match line.trim() {
                "" => continue,
                ":quit" | ":exit" => break,
                ":help" => {
                    println!("{}", HELP);
                    continue;
                }
                command if command.starts_with(":type") => {
                    let name = command.trim_start_matches(":type").trim();
                    match ctx.type_of(name) {
                        Some(ty) => println!("{}", ty),
                        None => println!("Variable '{}' not found", name),
                    }
                    continue;
                }
                _ => {}
            }
        }

        pending.push_str(&line);
        pending.push('\n');
        if brace_depth(&pending) > 0 {
            continue;
        }
        let _ = rl.add_history_entry(pending.trim_end());
        let source = std::mem::take(&mut pending);

        match ctx.run(&source) {
            Ok(()) => {
                let shown = ctx.type_of("@RESULT@").filter(|ty| ty != "void");
                if let (Some(ty), Some(value)) = (shown, ctx.render("@RESULT@")) {
                    println!("= {} ({})", value, ty);
                }
            }
            Err(e) => crate::report(&mut ctx, &e, "<memory>", &source),
        }
    }

    if let Some(path) = &history {
        if let Err(e) = rl.save_history(path) {
            tracing::debug!(error = %e, "history not saved");
        }
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brace_depth_ignores_literals() {
        assert_eq!(brace_depth("if (x) {"), 1);
        assert_eq!(brace_depth("s8# s = \"{\";"), 0);
        assert_eq!(brace_depth("while (1) { if (y) { } "), 1);
        assert_eq!(brace_depth("}"), -1);
    }
}
