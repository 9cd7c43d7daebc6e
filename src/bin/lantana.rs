use std::{fs, path::PathBuf};

use clap::{Parser, Subcommand};

use lantana::{analyze, parse_source, Interpreter, LantanaError, Repl};

#[derive(Parser)]
#[command(author, version, about = "Lantana language interpreter")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a Lantana script file
    Run { script: PathBuf },
    /// Start an interactive REPL session
    Repl,
    /// Evaluate a snippet of Lantana code
    Eval { source: String },
    /// Parse a script and report warnings without running it
    Check { script: PathBuf },
}

fn main() -> Result<(), LantanaError> {
    let args = Args::parse();
    match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => {
            let source = fs::read_to_string(&script)?;
            run_source(&source)
        }
        Command::Repl => {
            let mut repl = Repl::new();
            repl.run()
        }
        Command::Eval { source } => run_source(&source),
        Command::Check { script } => {
            let source = fs::read_to_string(&script)?;
            let program = parse_source(&source).map_err(LantanaError::from)?;
            for warning in analyze(&program) {
                eprintln!("{warning}");
            }
            Ok(())
        }
    }
}

fn run_source(source: &str) -> Result<(), LantanaError> {
    let program = parse_source(source).map_err(LantanaError::from)?;
    for warning in analyze(&program) {
        eprintln!("{warning}");
    }
    let interpreter = Interpreter::new();
    interpreter.run(&program)?;
    interpreter.stop_tasks();
    Ok(())
}
