use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lantana::{
    diagnostics::{DiagnosticKind, LantanaError},
    lexer::{tokenize, TokenKind},
    runtime::{Console, Interpreter},
    value::Value,
};

/// Console that records output lines and replays canned input.
#[derive(Default)]
struct CaptureConsole {
    lines: Mutex<Vec<String>>,
    input: Mutex<VecDeque<String>>,
}

impl CaptureConsole {
    fn with_input(lines: &[&str]) -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
            input: Mutex::new(lines.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Console for CaptureConsole {
    fn write_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }

    fn read_line(&self, _prompt: &str) -> std::io::Result<String> {
        Ok(self.input.lock().unwrap().pop_front().unwrap_or_default())
    }
}

fn eval(source: &str) -> Value {
    Interpreter::new()
        .eval_source(source)
        .expect("evaluation should succeed")
}

fn eval_error(source: &str) -> LantanaError {
    match Interpreter::new().eval_source(source) {
        Ok(value) => panic!("expected error, received value {value}"),
        Err(err) => err,
    }
}

fn expect_kind(err: &LantanaError, kind: DiagnosticKind) {
    match err {
        LantanaError::Diagnostic(diag) => assert_eq!(diag.kind, kind, "got: {diag}"),
        other => panic!("expected diagnostic, got {other}"),
    }
}

fn expect_int(value: &Value) -> i64 {
    value
        .as_number()
        .unwrap_or_else(|| panic!("expected Number, found {}", value.type_name()))
}

fn eval_with_console(source: &str) -> (Value, Vec<String>) {
    let console = Arc::new(CaptureConsole::default());
    let interpreter = Interpreter::with_console(console.clone());
    let value = interpreter
        .eval_source(source)
        .expect("evaluation should succeed");
    (value, console.lines())
}

#[test]
fn assignment_lexes_to_four_tokens_plus_eof() {
    let tokens = tokenize("x = 10;").expect("lexing should succeed");
    let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Identifier,
            TokenKind::Assign,
            TokenKind::Number,
            TokenKind::Semicolon,
            TokenKind::Eof,
        ]
    );
    assert_eq!(tokens[2].lexeme, "10");
}

#[test]
fn string_lexemes_keep_their_quotes() {
    let tokens = tokenize("\"hello\"").expect("lexing should succeed");
    assert_eq!(tokens[0].kind, TokenKind::Str);
    assert_eq!(tokens[0].lexeme, "\"hello\"");
    // The quote markers are gone once the literal becomes a value.
    assert_eq!(eval("\"hello\";").to_string(), "hello");
}

#[test]
fn unterminated_string_is_a_lex_error() {
    let err = eval_error("let s = \"oops;");
    expect_kind(&err, DiagnosticKind::Lex);
}

#[test]
fn stored_value_round_trips_through_the_environment() {
    let value = eval("let x = 42;\nx;");
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn missing_closing_brace_is_a_distinct_parse_error() {
    let err = eval_error("if (1) { print(1);");
    match err {
        LantanaError::Diagnostic(diag) => {
            assert_eq!(diag.kind, DiagnosticKind::Parse);
            assert!(diag.message.contains("unterminated block"), "got: {diag}");
        }
        other => panic!("expected diagnostic, got {other}"),
    }
}

#[test]
fn keyword_diagnostics_use_source_spelling() {
    let err = eval_error("for (v [1, 2]) { print(v); }");
    match err {
        LantanaError::Diagnostic(diag) => {
            assert_eq!(diag.kind, DiagnosticKind::Parse);
            assert!(diag.message.contains("`in`"), "got: {diag}");
        }
        other => panic!("expected diagnostic, got {other}"),
    }
}

#[test]
fn schedule_without_timing_clause_is_a_parse_error() {
    let err = eval_error("schedule { print(1); };");
    expect_kind(&err, DiagnosticKind::Parse);
}

#[test]
fn operators_share_one_precedence_level_and_right_associate() {
    // 10 - 2 - 3 parses as 10 - (2 - 3) because the right operand
    // re-enters the full expression parser.
    assert_eq!(expect_int(&eval("10 - 2 - 3")), 11);
    assert_eq!(expect_int(&eval("2 + 3 * 4")), 14);
    assert_eq!(expect_int(&eval("2 * 3 + 4")), 14);
}

#[test]
fn division_by_zero_is_fatal_for_any_left_operand() {
    expect_kind(&eval_error("10 / 0;"), DiagnosticKind::DivisionByZero);
    expect_kind(
        &eval_error("let a = 0;\nlet b = 7;\nb / a;"),
        DiagnosticKind::DivisionByZero,
    );
}

#[test]
fn plus_concatenates_when_either_side_is_not_a_number() {
    assert_eq!(eval("\"ab\" + 1;").to_string(), "ab1");
    assert_eq!(eval("1 + \"ab\";").to_string(), "1ab");
}

#[test]
fn comparisons_are_numeric_only() {
    assert_eq!(eval("2 < 3").to_string(), "true");
    assert_eq!(eval("3 != 3").to_string(), "false");
    expect_kind(&eval_error("\"a\" < 1;"), DiagnosticKind::TypeMismatch);
}

#[test]
fn for_loop_visits_list_elements_in_order() {
    let (_, lines) = eval_with_console("for (v in [1, 2, 3]) { print(v); }");
    assert_eq!(lines, vec!["1", "2", "3"]);
}

#[test]
fn for_loop_iterates_string_characters() {
    let (_, lines) = eval_with_console("for (c in \"ab\") { print(c); }");
    assert_eq!(lines, vec!["a", "b"]);
}

#[test]
fn for_loop_variable_persists_after_the_loop() {
    let value = eval("for (v in [1, 2, 3]) { print(v); }\nv;");
    assert_eq!(expect_int(&value), 3);
}

#[test]
fn iterating_a_number_is_a_type_mismatch() {
    expect_kind(
        &eval_error("for (v in 5) { print(v); }"),
        DiagnosticKind::TypeMismatch,
    );
}

#[test]
fn function_declaration_and_call() {
    let value = eval("function double(n) { return n * 2; }\ndouble(21);");
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn function_without_return_yields_null() {
    let value = eval("function noop() { let a = 1; }\nnoop();");
    assert_eq!(value.to_string(), "null");
}

#[test]
fn return_escapes_nested_control_structures() {
    let source = "function pick(n) {
    while (1) {
        if (n > 2) {
            return 99;
        }
        return 7;
    }
}
pick(5);";
    assert_eq!(expect_int(&eval(source)), 99);
}

#[test]
fn recursion_works_through_the_function_table() {
    let source = "function fact(n) {
    if (n <= 1) {
        return 1;
    }
    return n * fact(n - 1);
}
fact(5);";
    assert_eq!(expect_int(&eval(source)), 120);
}

#[test]
fn calls_restore_the_environment_snapshot() {
    // Mutations to outer names inside a call are discarded on return.
    let source = "let g = 1;
function clobber() {
    g = 99;
    return g;
}
let seen = clobber();
print(seen);
g;";
    let (value, lines) = eval_with_console(source);
    assert_eq!(lines, vec!["99"]);
    assert_eq!(expect_int(&value), 1);
}

#[test]
fn arity_mismatch_is_fatal() {
    expect_kind(
        &eval_error("function f(a, b) { return a; }\nf(1);"),
        DiagnosticKind::ArityMismatch,
    );
}

#[test]
fn calling_an_unknown_name_is_an_undefined_reference() {
    expect_kind(&eval_error("nope(1);"), DiagnosticKind::UndefinedReference);
}

#[test]
fn lambdas_are_first_class_callables() {
    let value = eval("let add = (a, b) => a + b;\nadd(2, 3);");
    assert_eq!(expect_int(&value), 5);
}

#[test]
fn classes_and_method_calls() {
    let source = "class Counter {
    value() {
        return 42;
    }
}
let c = new Counter();
c.value();";
    assert_eq!(expect_int(&eval(source)), 42);
}

#[test]
fn methods_reach_sibling_methods_through_self() {
    let source = "class Greeter {
    name() {
        return \"world\";
    }
    greet() {
        return \"hello \" + self.name();
    }
}
let g = new Greeter();
g.greet();";
    assert_eq!(eval(source).to_string(), "hello world");
}

#[test]
fn unknown_class_and_unknown_method_fail() {
    expect_kind(
        &eval_error("let x = new Ghost();"),
        DiagnosticKind::UndefinedReference,
    );
    expect_kind(
        &eval_error("class C { m() { return 1; } }\nlet c = new C();\nc.missing();"),
        DiagnosticKind::UndefinedReference,
    );
}

#[test]
fn free_then_read_is_an_undefined_reference() {
    expect_kind(
        &eval_error("let x = 5;\nfree(x);\nx;"),
        DiagnosticKind::UndefinedReference,
    );
}

#[test]
fn freed_name_can_be_reallocated() {
    let value = eval("let x = 5;\nfree(x);\nx = 7;\nx;");
    assert_eq!(expect_int(&value), 7);
}

#[test]
fn freeing_an_unknown_name_fails() {
    expect_kind(&eval_error("free(ghost);"), DiagnosticKind::UndefinedReference);
}

#[test]
fn assigning_null_still_allocates() {
    let value = eval("let x = null;\nx;");
    assert_eq!(value.to_string(), "null");
}

#[test]
fn len_and_range_builtins() {
    assert_eq!(expect_int(&eval("len(\"abc\");")), 3);
    assert_eq!(expect_int(&eval("len([1, 2]);")), 2);
    assert_eq!(eval("range(3);").to_string(), "[0, 1, 2]");
    assert_eq!(eval("range(2, 5);").to_string(), "[2, 3, 4]");
    expect_kind(&eval_error("len(5);"), DiagnosticKind::TypeMismatch);
}

#[test]
fn input_builtin_reads_from_the_console() {
    let console = Arc::new(CaptureConsole::with_input(&["Ada"]));
    let interpreter = Interpreter::with_console(console);
    let value = interpreter
        .eval_source("let name = input(\"? \");\nname;")
        .expect("evaluation should succeed");
    assert_eq!(value.to_string(), "Ada");
}

#[test]
fn parallel_block_runs_every_statement_before_run_returns() {
    let (_, mut lines) = eval_with_console("parallel { print(1); print(2); }");
    // Interleaving between siblings is unspecified; only completion is
    // guaranteed.
    lines.sort();
    assert_eq!(lines, vec!["1", "2"]);
}

#[test]
fn nested_parallel_statements_finish_before_run_returns() {
    // The inner block's tasks are submitted from a pool worker after the
    // first join pass has started; they must still be joined.
    let source = "parallel {
    parallel {
        for (v in range(400000)) {
            y = v;
        }
        print(\"done\");
    }
}";
    let (_, lines) = eval_with_console(source);
    assert_eq!(lines, vec!["done"]);
}

#[test]
fn parallel_task_errors_surface_after_the_join() {
    let err = eval_error("parallel { x = 10 / 0; }");
    expect_kind(&err, DiagnosticKind::DivisionByZero);
}

#[test]
fn scheduled_task_ticks_until_stopped() {
    let console = Arc::new(CaptureConsole::default());
    let interpreter = Interpreter::with_console(console.clone());
    interpreter
        .eval_source("schedule { print(\"tick\"); } every 1;")
        .expect("evaluation should succeed");

    std::thread::sleep(Duration::from_millis(2500));
    interpreter.stop_tasks();
    // Let a sleeping worker observe the cleared flag at its wake-up.
    std::thread::sleep(Duration::from_millis(1500));

    let after_stop = console.lines().len();
    assert!(after_stop >= 2, "expected at least 2 ticks, saw {after_stop}");

    std::thread::sleep(Duration::from_millis(1200));
    assert_eq!(console.lines().len(), after_stop, "ticks continued after stop");
}

#[test]
fn delayed_task_runs_once_after_the_interval() {
    let console = Arc::new(CaptureConsole::default());
    let interpreter = Interpreter::with_console(console.clone());
    interpreter
        .eval_source("schedule { print(\"late\"); } after 1;")
        .expect("evaluation should succeed");

    assert!(console.lines().is_empty(), "body ran before the delay");
    std::thread::sleep(Duration::from_millis(2000));
    assert_eq!(console.lines(), vec!["late"]);
    interpreter.stop_tasks();
}

#[test]
fn stop_builtin_clears_the_running_flag() {
    let interpreter = Interpreter::new();
    assert!(interpreter.is_running());
    interpreter
        .eval_source("stop();")
        .expect("evaluation should succeed");
    assert!(!interpreter.is_running());
}

#[test]
fn environment_reference_counts_and_deleted_names() {
    let interpreter = Interpreter::new();
    let env = interpreter.environment();
    let mut env = env.lock().unwrap();

    env.allocate("x", Value::number(1));
    env.allocate("x", Value::number(2));
    assert_eq!(env.reference_count("x"), Some(2));

    env.deallocate("x").expect("first deallocate");
    assert_eq!(env.reference_count("x"), Some(1));
    env.deallocate("x").expect("second deallocate");
    assert!(env.get("x").is_err(), "deleted name must not be readable");
    assert!(env.update("x", Value::number(3)).is_err());

    // Reallocation clears the deleted mark and starts a fresh count.
    env.allocate("x", Value::number(9));
    assert_eq!(env.reference_count("x"), Some(1));
    assert_eq!(env.get("x").expect("reallocated name").as_number(), Some(9));
}

#[test]
fn expression_statement_semicolon_is_optional() {
    assert_eq!(expect_int(&eval("1 + 2")), 3);
    assert_eq!(expect_int(&eval("1 + 2;")), 3);
}

#[test]
fn comments_run_to_end_of_line() {
    let value = eval("# a comment\nlet x = 1; # trailing\nx;");
    assert_eq!(expect_int(&value), 1);
}
