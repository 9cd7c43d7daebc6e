use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use indexmap::IndexMap;

use crate::ast::{
    BinaryOp, Block, Expr, ExprKind, FunctionDecl, Literal, Program, ScheduleKind, Stmt, StmtKind,
};
use crate::diagnostics::{Diagnostic, DiagnosticKind, LantanaError, Result};
use crate::environment::{Environment, EnvironmentRef};
use crate::parser;
use crate::tasks::{self, TaskHandle, WorkerPool};
use crate::value::{FunctionValue, InstanceValue, MethodTable, Value, ValueKind};

const HELP_TEXT: &str = "built-in functions:
  print(args...)   write the arguments to the output sink
  input(prompt?)   read one line from the input source
  free(name)       deallocate a variable by name
  len(value)       length of a string or list
  range(a, b?)     list of numbers in [0, a) or [a, b)
  stop()           clear the running flag; scheduled tasks wind down
  help()           this text";

/// Output sink and line input, swappable so tests can capture output.
pub trait Console: Send + Sync {
    fn write_line(&self, line: &str);
    fn read_line(&self, prompt: &str) -> std::io::Result<String>;
}

pub struct StdConsole;

impl Console for StdConsole {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }

    fn read_line(&self, prompt: &str) -> std::io::Result<String> {
        use std::io::Write;
        let mut stdout = std::io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;
        let mut buffer = String::new();
        std::io::stdin().read_line(&mut buffer)?;
        Ok(buffer.trim_end_matches(['\r', '\n']).to_string())
    }
}

enum Flow {
    Next,
    NextValue(Value),
    // Travels upward through enclosing blocks until a call boundary (or
    // the top level) absorbs it.
    Return(Value),
}

// Shared between the main loop, pool workers, and timer threads. Locks
// are taken per operation, never across a statement.
struct RuntimeState {
    env: EnvironmentRef,
    functions: Mutex<IndexMap<String, FunctionValue>>,
    classes: Mutex<IndexMap<String, MethodTable>>,
    console: Arc<dyn Console>,
    running: AtomicBool,
    pool: WorkerPool,
    pending: Mutex<Vec<TaskHandle>>,
}

pub struct Interpreter {
    state: Arc<RuntimeState>,
}

impl Clone for Interpreter {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_console(Arc::new(StdConsole))
    }

    pub fn with_console(console: Arc<dyn Console>) -> Self {
        Self {
            state: Arc::new(RuntimeState {
                env: Environment::new(),
                functions: Mutex::new(IndexMap::new()),
                classes: Mutex::new(IndexMap::new()),
                console,
                running: AtomicBool::new(true),
                pool: WorkerPool::new(),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn environment(&self) -> EnvironmentRef {
        Arc::clone(&self.state.env)
    }

    /// Clears the running flag; scheduled tasks observe it cooperatively.
    pub fn stop_tasks(&self) {
        self.state.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    pub fn eval_source(&self, source: &str) -> Result<Value> {
        let program = parser::parse_source(source).map_err(LantanaError::from)?;
        self.run(&program)
    }

    /// Executes every top-level statement, then joins all parallel task
    /// handles, surfacing the first task error.
    pub fn run(&self, program: &Program) -> Result<Value> {
        let mut last = Value::null();
        let mut outcome = Ok(());
        for stmt in &program.body {
            match self.execute_statement(stmt) {
                Ok(Flow::Next) => {}
                Ok(Flow::NextValue(value)) => last = value,
                Ok(Flow::Return(value)) => {
                    last = value;
                    break;
                }
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        let join_outcome = self.join_pending();
        outcome?;
        join_outcome?;
        Ok(last)
    }

    fn join_pending(&self) -> Result<()> {
        let mut first_error = None;
        // A joined task may itself have submitted more parallel work, so
        // keep draining until a full pass leaves the vector empty.
        loop {
            let handles: Vec<TaskHandle> = {
                let mut pending = self.lock_pending();
                pending.drain(..).collect()
            };
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(err) = handle.join() {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn lock_env(&self) -> MutexGuard<'_, Environment> {
        self.state.env.lock().expect("environment lock poisoned")
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<TaskHandle>> {
        self.state.pending.lock().expect("pending-task lock poisoned")
    }

    fn execute_block(&self, block: &Block) -> Result<Flow> {
        let mut last = Flow::Next;
        for stmt in &block.statements {
            match self.execute_statement(stmt)? {
                Flow::Return(value) => return Ok(Flow::Return(value)),
                flow => last = flow,
            }
        }
        Ok(last)
    }

    fn execute_statement(&self, stmt: &Stmt) -> Result<Flow> {
        match &stmt.kind {
            StmtKind::Let { name, value } | StmtKind::Assign { name, value } => {
                let value = self.evaluate(value)?;
                self.lock_env().allocate(name, value);
                Ok(Flow::Next)
            }
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute_block(else_branch)
                } else {
                    Ok(Flow::Next)
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    if let Flow::Return(value) = self.execute_block(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Next)
            }
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                let items = self.iterable_items(iterable)?;
                for item in items {
                    self.lock_env().allocate(binding, item);
                    if let Flow::Return(value) = self.execute_block(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
                Ok(Flow::Next)
            }
            StmtKind::Function(decl) => {
                self.declare_function(decl);
                Ok(Flow::Next)
            }
            StmtKind::Return(expr) => {
                let value = self.evaluate(expr)?;
                Ok(Flow::Return(value))
            }
            StmtKind::Class { name, methods } => {
                let mut table = IndexMap::new();
                for method in methods {
                    table.insert(method.name.clone(), function_value(method));
                }
                self.state
                    .classes
                    .lock()
                    .expect("class registry lock poisoned")
                    .insert(name.clone(), Arc::new(table));
                Ok(Flow::Next)
            }
            StmtKind::Parallel { body } => {
                self.submit_parallel(body);
                Ok(Flow::Next)
            }
            StmtKind::Schedule {
                body,
                interval,
                kind,
            } => {
                self.spawn_schedule(body, interval, *kind, stmt.line)?;
                Ok(Flow::Next)
            }
            StmtKind::Expr(expr) => {
                let value = self.evaluate(expr)?;
                Ok(Flow::NextValue(value))
            }
        }
    }

    fn declare_function(&self, decl: &FunctionDecl) {
        let function = function_value(decl);
        self.state
            .functions
            .lock()
            .expect("function table lock poisoned")
            .insert(decl.name.clone(), function.clone());
        self.lock_env()
            .allocate(&decl.name, Value::function(function));
    }

    // Each direct child statement becomes one pool task; submission does
    // not block. Handles are joined at the end of `run`.
    fn submit_parallel(&self, body: &Block) {
        let mut handles = Vec::with_capacity(body.statements.len());
        for stmt in &body.statements {
            let task = self.clone();
            let stmt = stmt.clone();
            handles.push(
                self.state
                    .pool
                    .submit(move || task.execute_statement(&stmt).map(|_| ())),
            );
        }
        self.lock_pending().extend(handles);
    }

    // A body error is reported to stderr and terminates that task only.
    fn spawn_schedule(
        &self,
        body: &Block,
        interval: &Expr,
        kind: ScheduleKind,
        line: u32,
    ) -> Result<()> {
        let value = self.evaluate(interval)?;
        let seconds = value.as_number().ok_or_else(|| {
            Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                format!(
                    "schedule interval must be a number, got {}",
                    value.type_name()
                ),
            )
            .with_line(line)
        })?;
        let pause = Duration::from_secs(seconds.max(0) as u64);
        let task = self.clone();
        let body = body.clone();
        let _ = tasks::spawn_timer(format!("lantana-timer-{line}"), move || match kind {
            ScheduleKind::Recurring => {
                while task.is_running() {
                    if let Err(err) = task.execute_block(&body) {
                        eprintln!("scheduled task failed: {err}");
                        return;
                    }
                    std::thread::sleep(pause);
                }
            }
            ScheduleKind::Delayed => {
                std::thread::sleep(pause);
                if task.is_running() {
                    if let Err(err) = task.execute_block(&body) {
                        eprintln!("scheduled task failed: {err}");
                    }
                }
            }
        });
        Ok(())
    }

    fn iterable_items(&self, iterable: &Expr) -> Result<Vec<Value>> {
        let value = self.evaluate(iterable)?;
        match &*value.0 {
            ValueKind::List(values) => Ok(values.clone()),
            ValueKind::Str(s) => Ok(s.chars().map(|c| Value::string(c.to_string())).collect()),
            _ => Err(Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                format!("cannot iterate over a {}", value.type_name()),
            )
            .with_line(iterable.line)
            .into()),
        }
    }

    fn evaluate(&self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(Literal::Number(n)) => Ok(Value::number(*n)),
            ExprKind::Literal(Literal::Str(raw)) => {
                Ok(Value::string(raw[1..raw.len() - 1].to_string()))
            }
            ExprKind::Null => Ok(Value::null()),
            ExprKind::Identifier(name) => self
                .lock_env()
                .get(name)
                .map_err(|diag| diag.with_line(expr.line).into()),
            ExprKind::List(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.evaluate(element)?);
                }
                Ok(Value::list(values))
            }
            ExprKind::Binary { op, left, right } => {
                let lhs = self.evaluate(left)?;
                let rhs = self.evaluate(right)?;
                self.apply_binary(*op, lhs, rhs, expr.line)
            }
            ExprKind::Call { name, args } => self.evaluate_call(name, args, expr.line),
            ExprKind::Lambda { params, body } => {
                // One-return block, so lambdas share the function call path.
                let block = Block {
                    statements: vec![Stmt {
                        kind: StmtKind::Return((**body).clone()),
                        span: body.span,
                        line: body.line,
                    }],
                };
                Ok(Value::function(FunctionValue {
                    name: None,
                    params: params.clone(),
                    body: Arc::new(block),
                }))
            }
            ExprKind::New { class_name } => {
                let methods = self
                    .state
                    .classes
                    .lock()
                    .expect("class registry lock poisoned")
                    .get(class_name)
                    .cloned()
                    .ok_or_else(|| {
                        Diagnostic::new(
                            DiagnosticKind::UndefinedReference,
                            format!("unknown class `{class_name}`"),
                        )
                        .with_line(expr.line)
                    })?;
                Ok(Value::instance(class_name.clone(), methods))
            }
            ExprKind::MethodCall {
                target,
                method,
                args,
            } => {
                let receiver = self.evaluate(target)?;
                let instance = as_instance(&receiver, expr.line)?;
                let function = resolve_method(&instance, method, expr.line)?;
                let values = self.evaluate_args(args)?;
                self.call_function(&function, values, Some(receiver.clone()), expr.line)
            }
            ExprKind::MemberAccess { target, member } => {
                let receiver = self.evaluate(target)?;
                let instance = as_instance(&receiver, expr.line)?;
                let function = resolve_method(&instance, member, expr.line)?;
                Ok(Value::function(function))
            }
        }
    }

    // `+` concatenates when either side is not a number; every other
    // operator and all comparisons are numeric-only.
    fn apply_binary(&self, op: BinaryOp, lhs: Value, rhs: Value, line: u32) -> Result<Value> {
        if op == BinaryOp::Add && !(lhs.is_number() && rhs.is_number()) {
            return Ok(Value::string(format!("{lhs}{rhs}")));
        }
        let (a, b) = match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(Diagnostic::new(
                    DiagnosticKind::TypeMismatch,
                    format!(
                        "operator `{}` requires numbers, got {} and {}",
                        op.symbol(),
                        lhs.type_name(),
                        rhs.type_name()
                    ),
                )
                .with_line(line)
                .into())
            }
        };
        let result = match op {
            BinaryOp::Add => Value::number(a.wrapping_add(b)),
            BinaryOp::Sub => Value::number(a.wrapping_sub(b)),
            BinaryOp::Mul => Value::number(a.wrapping_mul(b)),
            BinaryOp::Div => {
                if b == 0 {
                    return Err(Diagnostic::new(
                        DiagnosticKind::DivisionByZero,
                        format!("cannot divide {a} by zero"),
                    )
                    .with_line(line)
                    .into());
                }
                Value::number(a.wrapping_div(b))
            }
            BinaryOp::Less => Value::bool(a < b),
            BinaryOp::Greater => Value::bool(a > b),
            BinaryOp::LessEqual => Value::bool(a <= b),
            BinaryOp::GreaterEqual => Value::bool(a >= b),
            BinaryOp::Equal => Value::bool(a == b),
            BinaryOp::NotEqual => Value::bool(a != b),
        };
        Ok(result)
    }

    // Resolution order: declared function, first-class callable, built-in.
    fn evaluate_call(&self, name: &str, args: &[Expr], line: u32) -> Result<Value> {
        let declared = {
            let functions = self
                .state
                .functions
                .lock()
                .expect("function table lock poisoned");
            functions.get(name).cloned()
        };
        if let Some(function) = declared {
            let values = self.evaluate_args(args)?;
            return self.call_function(&function, values, None, line);
        }

        let callable = {
            let env = self.lock_env();
            if env.exists(name) {
                env.get(name).ok()
            } else {
                None
            }
        };
        if let Some(value) = callable {
            if let ValueKind::Function(function) = &*value.0 {
                let function = function.clone();
                let values = self.evaluate_args(args)?;
                return self.call_function(&function, values, None, line);
            }
        }

        self.call_builtin(name, args, line)
    }

    fn evaluate_args(&self, args: &[Expr]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.evaluate(arg)?);
        }
        Ok(values)
    }

    // The whole environment table is copied on entry and put back on
    // exit, success or error.
    fn call_function(
        &self,
        function: &FunctionValue,
        args: Vec<Value>,
        receiver: Option<Value>,
        line: u32,
    ) -> Result<Value> {
        if args.len() != function.params.len() {
            let name = function.name.as_deref().unwrap_or("<lambda>");
            return Err(Diagnostic::new(
                DiagnosticKind::ArityMismatch,
                format!(
                    "`{name}` expects {} argument(s), got {}",
                    function.params.len(),
                    args.len()
                ),
            )
            .with_line(line)
            .into());
        }
        let snapshot = {
            let mut env = self.lock_env();
            let snapshot = env.snapshot();
            if let Some(receiver) = receiver {
                env.allocate("self", receiver);
            }
            for (param, arg) in function.params.iter().zip(args) {
                env.allocate(param, arg);
            }
            snapshot
        };
        let flow = self.execute_block(&function.body);
        self.lock_env().restore(snapshot);
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::null()),
        }
    }

    fn call_builtin(&self, name: &str, args: &[Expr], line: u32) -> Result<Value> {
        match name {
            "free" => self.builtin_free(args, line),
            "print" => {
                let values = self.evaluate_args(args)?;
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                self.state.console.write_line(&rendered.join(" "));
                Ok(Value::null())
            }
            "input" => {
                let values = self.evaluate_args(args)?;
                let prompt = values.first().map(|v| v.to_string()).unwrap_or_default();
                let text = self.state.console.read_line(&prompt)?;
                Ok(Value::string(text))
            }
            "len" => {
                let values = self.evaluate_args(args)?;
                let [value] = values.as_slice() else {
                    return Err(arity_error("len", 1, values.len(), line));
                };
                match &*value.0 {
                    ValueKind::Str(s) => Ok(Value::number(s.chars().count() as i64)),
                    ValueKind::List(items) => Ok(Value::number(items.len() as i64)),
                    _ => Err(Diagnostic::new(
                        DiagnosticKind::TypeMismatch,
                        format!("len() takes a string or list, got {}", value.type_name()),
                    )
                    .with_line(line)
                    .into()),
                }
            }
            "range" => {
                let values = self.evaluate_args(args)?;
                let bounds: Vec<i64> = values
                    .iter()
                    .map(|v| {
                        v.as_number().ok_or_else(|| {
                            LantanaError::from(
                                Diagnostic::new(
                                    DiagnosticKind::TypeMismatch,
                                    format!("range() takes numbers, got {}", v.type_name()),
                                )
                                .with_line(line),
                            )
                        })
                    })
                    .collect::<Result<_>>()?;
                let (start, end) = match bounds.as_slice() {
                    [end] => (0, *end),
                    [start, end] => (*start, *end),
                    _ => return Err(arity_error("range", 2, bounds.len(), line)),
                };
                Ok(Value::list((start..end).map(Value::number).collect()))
            }
            "stop" => {
                self.stop_tasks();
                Ok(Value::null())
            }
            "help" => {
                self.state.console.write_line(HELP_TEXT);
                Ok(Value::null())
            }
            _ => Err(Diagnostic::new(
                DiagnosticKind::UndefinedReference,
                format!("`{name}` is not a function"),
            )
            .with_line(line)
            .into()),
        }
    }

    // The argument names the binding and is never evaluated.
    fn builtin_free(&self, args: &[Expr], line: u32) -> Result<Value> {
        let [arg] = args else {
            return Err(arity_error("free", 1, args.len(), line));
        };
        let ExprKind::Identifier(name) = &arg.kind else {
            return Err(Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                "free() takes a variable name",
            )
            .with_line(line)
            .into());
        };
        self.lock_env()
            .deallocate(name)
            .map_err(|diag| LantanaError::from(diag.with_line(line)))?;
        Ok(Value::null())
    }
}

fn function_value(decl: &FunctionDecl) -> FunctionValue {
    FunctionValue {
        name: Some(decl.name.clone()),
        params: decl.params.clone(),
        body: Arc::new(decl.body.clone()),
    }
}

fn as_instance(value: &Value, line: u32) -> Result<InstanceValue> {
    match &*value.0 {
        ValueKind::Instance(instance) => Ok(instance.clone()),
        _ => Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("{} has no methods", value.type_name()),
        )
        .with_line(line)
        .into()),
    }
}

fn resolve_method(instance: &InstanceValue, name: &str, line: u32) -> Result<FunctionValue> {
    instance.methods.get(name).cloned().ok_or_else(|| {
        LantanaError::from(
            Diagnostic::new(
                DiagnosticKind::UndefinedReference,
                format!("class `{}` has no method `{name}`", instance.class_name),
            )
            .with_line(line),
        )
    })
}

fn arity_error(name: &str, expected: usize, got: usize, line: u32) -> LantanaError {
    Diagnostic::new(
        DiagnosticKind::ArityMismatch,
        format!("`{name}` expects at most {expected} argument(s), got {got}"),
    )
    .with_line(line)
    .into()
}
