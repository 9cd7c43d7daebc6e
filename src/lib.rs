//! Core library for the Lantana scripting language: lexing, parsing, a
//! tree-walking evaluator over a reference-counted variable store, and the
//! concurrency layer behind `parallel` and `schedule` blocks.

pub mod analyzer;
pub mod ast;
pub mod diagnostics;
pub mod environment;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod tasks;
pub mod value;

pub use analyzer::analyze;
pub use diagnostics::{Diagnostic, DiagnosticKind, LantanaError, SourceSpan};
pub use lexer::tokenize;
pub use parser::{parse, parse_source};
pub use repl::Repl;
pub use runtime::{Console, Interpreter, StdConsole};
pub use value::Value;
