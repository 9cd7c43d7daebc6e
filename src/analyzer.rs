//! Pre-execution lint pass: warns when a block binds the same name more
//! than once, which the shared-table scoping silently overwrites.

use indexmap::IndexSet;

use crate::ast::{Block, Program, Stmt, StmtKind};
use crate::diagnostics::{Diagnostic, DiagnosticKind};

pub fn analyze(program: &Program) -> Vec<Diagnostic> {
    let mut warnings = Vec::new();
    check_statements(&program.body, &mut warnings);
    warnings
}

fn check_statements(statements: &[Stmt], warnings: &mut Vec<Diagnostic>) {
    let mut bound: IndexSet<&str> = IndexSet::new();
    for stmt in statements {
        match &stmt.kind {
            StmtKind::Let { name, .. } | StmtKind::Assign { name, .. } => {
                if !bound.insert(name.as_str()) {
                    warnings.push(
                        Diagnostic::new(
                            DiagnosticKind::Warning,
                            format!("`{name}` is bound more than once in this block"),
                        )
                        .with_line(stmt.line),
                    );
                }
            }
            StmtKind::Function(decl) => {
                if !bound.insert(decl.name.as_str()) {
                    warnings.push(
                        Diagnostic::new(
                            DiagnosticKind::Warning,
                            format!("function `{}` shadows an earlier binding", decl.name),
                        )
                        .with_line(stmt.line),
                    );
                }
                check_block(&decl.body, warnings);
            }
            StmtKind::If {
                then_branch,
                else_branch,
                ..
            } => {
                check_block(then_branch, warnings);
                if let Some(else_branch) = else_branch {
                    check_block(else_branch, warnings);
                }
            }
            StmtKind::While { body, .. }
            | StmtKind::For { body, .. }
            | StmtKind::Parallel { body }
            | StmtKind::Schedule { body, .. } => check_block(body, warnings),
            StmtKind::Class { name, methods } => {
                if !bound.insert(name.as_str()) {
                    warnings.push(
                        Diagnostic::new(
                            DiagnosticKind::Warning,
                            format!("class `{name}` shadows an earlier binding"),
                        )
                        .with_line(stmt.line),
                    );
                }
                for method in methods {
                    check_block(&method.body, warnings);
                }
            }
            StmtKind::Return(_) | StmtKind::Expr(_) => {}
        }
    }
}

fn check_block(block: &Block, warnings: &mut Vec<Diagnostic>) {
    check_statements(&block.statements, warnings);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn warnings_for(source: &str) -> Vec<Diagnostic> {
        let program = parse_source(source).expect("source should parse");
        analyze(&program)
    }

    #[test]
    fn clean_program_has_no_warnings() {
        let warnings = warnings_for("let a = 1;\nlet b = 2;\nprint(a + b);");
        assert!(warnings.is_empty());
    }

    #[test]
    fn rebinding_in_same_block_warns() {
        let warnings = warnings_for("let a = 1;\nlet a = 2;");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].is_warning());
        assert!(warnings[0].message.contains('a'));
        assert_eq!(warnings[0].line, Some(2));
    }

    #[test]
    fn nested_blocks_are_checked_independently() {
        let warnings = warnings_for("let a = 1;\nif (a) { let a = 2; }");
        assert!(warnings.is_empty());

        let warnings = warnings_for("while (1) { x = 1; x = 2; }");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn function_shadowing_a_variable_warns() {
        let warnings = warnings_for("let f = 1;\nfunction f() { return 2; }");
        assert_eq!(warnings.len(), 1);
    }
}
