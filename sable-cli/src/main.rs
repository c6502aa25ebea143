//! Command-line front end: compile a Sable program, then print its
//! generated module or evaluate it.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};

use sable_core::ir;
use sable_core::stdlib;
use sable_core::{CoreError, Session};

#[derive(Parser, Debug)]
#[command(version, about = "Compile and run Sable programs")]
struct Cli {
    /// Entry source file (.sbl).
    input: Option<PathBuf>,

    /// Standard library root (defaults to `SABLE_STDLIB`, then a
    /// `stdlib/` directory next to the executable).
    #[arg(long, value_name = "PATH")]
    stdlib: Option<PathBuf>,

    /// What to do with the compiled module.
    #[arg(long, value_enum, default_value_t = Mode::Run)]
    emit: Mode,

    /// List the available standard-library modules and exit.
    #[arg(long)]
    list_std: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Print the generated module as text.
    Ir,
    /// Evaluate the module and exit with the program's exit code.
    Run,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(cli: Cli) -> Result<ExitCode> {
    let stdlib_root = cli.stdlib.clone().unwrap_or_else(stdlib::default_root);

    if cli.list_std {
        for name in stdlib::modules(&stdlib_root)? {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let input = cli.input.clone().context("no input file given")?;
    let mut session = Session::new(stdlib_root);
    let module = match session.compile_file(&input) {
        Ok(module) => module,
        Err(error) => bail!(render(&session, &error)),
    };

    match cli.emit {
        Mode::Ir => {
            print!("{module}");
            Ok(ExitCode::SUCCESS)
        }
        Mode::Run => {
            let outcome = ir::run(&module, "main")?;
            print!("{}", outcome.stdout);
            Ok(ExitCode::from((outcome.exit_code & 0xff) as u8))
        }
    }
}

/// Format an error chain as `path:line:col: error: message` lines, one
/// per level, so a failure inside an import shows both the importing
/// statement and the root cause.
fn render(session: &Session, error: &CoreError) -> String {
    let mut lines = Vec::new();
    let mut current: Option<&CoreError> = Some(error);
    while let Some(err) = current {
        match err.diagnostic() {
            Some(d) => match session.sources().locate(d.span) {
                Some((path, line, col)) => {
                    lines.push(format!("{}:{line}:{col}: {d}", path.display()))
                }
                None => lines.push(d.to_string()),
            },
            None => lines.push(err.to_string()),
        }
        current = std::error::Error::source(err).and_then(|s| {
            s.downcast_ref::<CoreError>()
                .or_else(|| s.downcast_ref::<Box<CoreError>>().map(Box::as_ref))
        });
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::fs;

    fn sable() -> Command {
        Command::cargo_bin("sable").expect("binary")
    }

    #[test]
    fn runs_a_program_and_propagates_the_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("main.sbl");
        fs::write(&path, "print(41)\nexit(41)\n").expect("write");

        sable()
            .arg(&path)
            .assert()
            .code(41)
            .stdout(predicate::eq("41\n"));
    }

    #[test]
    fn emits_textual_ir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("main.sbl");
        fs::write(&path, "exit(0)\n").expect("write");

        sable()
            .arg(&path)
            .args(["--emit", "ir"])
            .assert()
            .success()
            .stdout(predicate::str::contains("main"));
    }

    #[test]
    fn reports_errors_with_source_locations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("main.sbl");
        fs::write(&path, "print(missing)\n").expect("write");

        sable()
            .arg(&path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("main.sbl:1:"))
            .stderr(predicate::str::contains("missing"));
    }

    #[test]
    fn import_failures_show_both_locations() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("broken.sbl"), "func f(\n").expect("write");
        let main = dir.path().join("main.sbl");
        fs::write(&main, "import \"broken.sbl\" as b\n").expect("write");

        sable()
            .arg(&main)
            .assert()
            .failure()
            .stderr(predicate::str::contains("main.sbl:1:"))
            .stderr(predicate::str::contains("broken.sbl:1:"));
    }

    #[test]
    fn resolves_std_imports_against_the_given_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let std_dir = dir.path().join("std");
        fs::create_dir(&std_dir).expect("mkdir");
        fs::write(
            std_dir.join("mathx.sbl"),
            "export func square(n: int) -> int\n    return n * n\n",
        )
        .expect("write");
        let main = dir.path().join("main.sbl");
        fs::write(&main, "import mathx\nexit(mathx.square(6))\n").expect("write");

        sable()
            .arg(&main)
            .arg("--stdlib")
            .arg(&std_dir)
            .assert()
            .code(36);
    }

    #[test]
    fn lists_standard_library_modules() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("math.sbl"), "").expect("write");
        fs::write(dir.path().join("fmt.sbl"), "").expect("write");

        sable()
            .arg("--list-std")
            .arg("--stdlib")
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::eq("fmt\nmath\n"));
    }
}
