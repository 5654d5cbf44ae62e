//! In-process executor: loads class images and interprets them.

use super::ast::{BinaryOp, UnaryOp};
use super::image::{CONSTRUCTOR, ClassImage, Expr, MethodImage, Place, Stmt};
use super::types::{OBJECT, PRINT_STREAM, STRING, Type};
use crate::collab::{ClassArtifact, Executor, Invocation, RedefineOutcome, StackFrame};
use crate::config::{LocalExecutorConfig, RedefinePolicy};
use crate::error::ExecutorError;
use crate::wrap::ENTRY_METHOD;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const UNRESOLVED: &str = "java.lang.Unresolved";
const NULL_POINTER: &str = "java.lang.NullPointerException";
const ARITHMETIC: &str = "java.lang.ArithmeticException";
const STACK_OVERFLOW: &str = "java.lang.StackOverflowError";
const MAX_DEPTH: usize = 200;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i32),
    Bool(bool),
    Null,
    Str(Arc<str>),
    /// Index into the heap.
    Ref(usize),
}

impl Value {
    fn default_for(ty: &Type) -> Self {
        match ty {
            Type::Int => Self::Int(0),
            Type::Boolean => Self::Bool(false),
            _ => Self::Null,
        }
    }
}

#[derive(Debug)]
struct Object {
    class: String,
    fields: HashMap<String, Value>,
}

#[derive(Debug, Default)]
struct State {
    classes: HashMap<String, Arc<ClassImage>>,
    statics: HashMap<String, HashMap<String, Value>>,
    initialized: HashSet<String>,
    heap: Vec<Object>,
    output: String,
}

enum Fault {
    Throw(Value, Vec<StackFrame>),
    Stopped,
    Internal(String),
}

type Exec<T> = Result<T, Fault>;

enum Flow {
    Normal,
    Return(Value),
}

/// Interprets class images in the current process.
pub struct LocalExecutor {
    config: LocalExecutorConfig,
    state: Mutex<State>,
    cancelled: AtomicBool,
}

impl LocalExecutor {
    pub fn new(config: LocalExecutorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Text printed through `System.out` since the last call.
    pub fn take_output(&self) -> String {
        self.lock().map(|mut state| std::mem::take(&mut state.output)).unwrap_or_default()
    }

    pub fn is_loaded(&self, class_name: &str) -> bool {
        self.lock().is_ok_and(|state| state.classes.contains_key(class_name))
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, ExecutorError> {
        self.state
            .lock()
            .map_err(|_| ExecutorError::Transport("executor state poisoned".to_string()))
    }

    fn decode(classes: &[ClassArtifact]) -> Result<Vec<ClassImage>, ExecutorError> {
        classes
            .iter()
            .map(|artifact| {
                ClassImage::from_bytes(&artifact.bytes)
                    .map_err(|error| ExecutorError::Protocol(format!("bad class {}: {error}", artifact.class_name)))
            })
            .collect()
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(LocalExecutorConfig::default())
    }
}

impl Executor for LocalExecutor {
    fn load(&self, classes: &[ClassArtifact]) -> Result<(), ExecutorError> {
        let images = Self::decode(classes)?;
        let mut state = self.lock()?;
        for image in images {
            log::trace!("loading {}", image.name);
            let statics = image
                .fields
                .iter()
                .filter(|field| field.is_static)
                .map(|field| (field.name.clone(), Value::default_for(&field.ty)))
                .collect();
            state.statics.insert(image.name.clone(), statics);
            state.initialized.remove(&image.name);
            state.classes.insert(image.name.clone(), Arc::new(image));
        }
        Ok(())
    }

    fn redefine(&self, classes: &[ClassArtifact]) -> Result<RedefineOutcome, ExecutorError> {
        let images = Self::decode(classes)?;
        let mut state = self.lock()?;
        for image in &images {
            let Some(loaded) = state.classes.get(&image.name) else {
                return Err(ExecutorError::NotLoaded(image.name.clone()));
            };
            let reason = match self.config.redefine {
                RedefinePolicy::Never => Some("redefinition is disabled"),
                RedefinePolicy::ShapePreserving if loaded.shape() != image.shape() => {
                    Some("fields or method signatures changed")
                }
                RedefinePolicy::ShapePreserving => None,
            };
            if let Some(reason) = reason {
                return Ok(RedefineOutcome::Unsupported {
                    class_name: image.name.clone(),
                    reason: reason.to_string(),
                });
            }
        }
        for image in images {
            log::trace!("redefining {}", image.name);
            state.classes.insert(image.name.clone(), Arc::new(image));
        }
        Ok(RedefineOutcome::Redefined)
    }

    fn invoke(&self, class_name: &str) -> Result<Invocation, ExecutorError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let mut state = self.lock()?;
        if !state.classes.contains_key(class_name) {
            return Err(ExecutorError::NotLoaded(class_name.to_string()));
        }
        let mut machine = Machine {
            state: &mut state,
            cancelled: &self.cancelled,
            steps: 0,
            max_steps: self.config.max_steps,
            stack: Vec::new(),
        };
        let result = machine
            .invoke_static(class_name, ENTRY_METHOD, "()", Vec::new())
            .and_then(|value| machine.display(&value));
        match result {
            Ok(display) => Ok(Invocation::Returned(Some(display))),
            Err(Fault::Throw(exception, frames)) => Ok(machine.thrown(&exception, frames)),
            Err(Fault::Stopped) => Ok(Invocation::Stopped),
            Err(Fault::Internal(message)) => Err(ExecutorError::Protocol(message)),
        }
    }

    fn cancel(&self) -> Result<(), ExecutorError> {
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct Frame {
    this: Option<Value>,
    locals: Vec<(String, Value)>,
}

struct Machine<'a> {
    state: &'a mut State,
    cancelled: &'a AtomicBool,
    steps: u64,
    max_steps: Option<u64>,
    stack: Vec<StackFrame>,
}

impl Machine<'_> {
    fn tick(&mut self) -> Exec<()> {
        self.steps += 1;
        if self.cancelled.load(Ordering::Relaxed) || self.max_steps.is_some_and(|max| self.steps > max) {
            return Err(Fault::Stopped);
        }
        Ok(())
    }

    fn allocate(&mut self, class: &str, fields: HashMap<String, Value>) -> Value {
        self.state.heap.push(Object {
            class: class.to_string(),
            fields,
        });
        Value::Ref(self.state.heap.len() - 1)
    }

    fn object(&self, index: usize) -> Exec<&Object> {
        self.state
            .heap
            .get(index)
            .ok_or_else(|| Fault::Internal(format!("dangling reference {index}")))
    }

    fn throw_new(&mut self, class: &str, message: Option<String>) -> Fault {
        let message = message.map_or(Value::Null, |message| Value::Str(message.into()));
        let exception = self.allocate(class, HashMap::from([("message".to_string(), message)]));
        Fault::Throw(exception, self.stack.iter().rev().cloned().collect())
    }

    fn thrown(&self, exception: &Value, frames: Vec<StackFrame>) -> Invocation {
        let Value::Ref(index) = exception else {
            return Invocation::Threw {
                class_name: NULL_POINTER.to_string(),
                message: None,
                frames,
            };
        };
        let Some(object) = self.state.heap.get(*index) else {
            return Invocation::Stopped;
        };
        if object.class == UNRESOLVED {
            if let Some(Value::Int(id)) = object.fields.get("id") {
                return Invocation::Unresolved { snippet: *id as u32 };
            }
        }
        let message = match object.fields.get("message") {
            Some(Value::Str(message)) => Some(message.to_string()),
            _ => None,
        };
        Invocation::Threw {
            class_name: object.class.clone(),
            message,
            frames,
        }
    }

    fn class(&self, name: &str) -> Exec<Arc<ClassImage>> {
        self.state
            .classes
            .get(name)
            .cloned()
            .ok_or_else(|| Fault::Internal(format!("class {name} is not loaded")))
    }

    /// Runs static initializers the first time a class is used.
    fn initialize(&mut self, name: &str) -> Exec<()> {
        if is_builtin(name) || !self.state.initialized.insert(name.to_string()) {
            return Ok(());
        }
        let image = self.class(name)?;
        for field in image.fields.iter().filter(|field| field.is_static) {
            if let Some(init) = &field.init {
                let mut frame = Frame {
                    this: None,
                    locals: Vec::new(),
                };
                let value = self.eval_expr(&mut frame, init)?;
                self.set_static(name, &field.name, value);
            }
        }
        Ok(())
    }

    fn get_static(&mut self, class: &str, name: &str) -> Exec<Value> {
        if class == "java.lang.System" && name == "out" {
            return Ok(self.out());
        }
        self.initialize(class)?;
        self.state
            .statics
            .get(class)
            .and_then(|fields| fields.get(name))
            .cloned()
            .ok_or_else(|| Fault::Internal(format!("no static field {class}.{name}")))
    }

    fn set_static(&mut self, class: &str, name: &str, value: Value) {
        self.state
            .statics
            .entry(class.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    fn out(&mut self) -> Value {
        let existing = self
            .state
            .statics
            .get("java.lang.System")
            .and_then(|fields| fields.get("out"))
            .cloned();
        match existing {
            Some(out) => out,
            None => {
                let out = self.allocate(PRINT_STREAM, HashMap::new());
                self.set_static("java.lang.System", "out", out.clone());
                out
            }
        }
    }

    fn invoke_static(&mut self, class: &str, method: &str, descriptor: &str, arguments: Vec<Value>) -> Exec<Value> {
        if is_builtin(class) {
            return self.native(class, method, None, arguments);
        }
        self.initialize(class)?;
        let image = self.class(class)?;
        let body = image
            .method(method, descriptor)
            .ok_or_else(|| Fault::Internal(format!("no method {class}.{method}{descriptor}")))?;
        self.run(class, body, None, arguments)
    }

    fn invoke_virtual(&mut self, target: Value, method: &str, descriptor: &str, arguments: Vec<Value>) -> Exec<Value> {
        let class = match &target {
            Value::Null => return Err(self.throw_new(NULL_POINTER, None)),
            Value::Ref(index) => self.object(*index)?.class.clone(),
            Value::Str(_) => STRING.to_string(),
            Value::Int(_) | Value::Bool(_) => OBJECT.to_string(),
        };
        if !is_builtin(&class) {
            let image = self.class(&class)?;
            if let Some(body) = image.method(method, descriptor) {
                return self.run(&class, body, Some(target), arguments);
            }
        }
        self.native(&class, method, Some(target), arguments)
    }

    fn run(&mut self, class: &str, method: &MethodImage, this: Option<Value>, arguments: Vec<Value>) -> Exec<Value> {
        self.tick()?;
        self.stack.push(StackFrame {
            class_name: class.to_string(),
            method: method.name.clone(),
        });
        if self.stack.len() > MAX_DEPTH {
            let fault = self.throw_new(STACK_OVERFLOW, None);
            self.stack.pop();
            return Err(fault);
        }
        let mut frame = Frame {
            this,
            locals: method.parameters.iter().cloned().zip(arguments).collect(),
        };
        let flow = self.exec_block(&mut frame, &method.body);
        self.stack.pop();
        match flow? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
        }
    }

    fn construct(&mut self, class: &str, descriptor: &str, arguments: Vec<Value>) -> Exec<Value> {
        if is_builtin(class) {
            let fields = match (class, arguments.first()) {
                (UNRESOLVED, Some(id)) => HashMap::from([("id".to_string(), id.clone())]),
                (_, Some(message)) => HashMap::from([("message".to_string(), message.clone())]),
                (_, None) => HashMap::from([("message".to_string(), Value::Null)]),
            };
            return Ok(self.allocate(class, fields));
        }
        self.initialize(class)?;
        let image = self.class(class)?;
        let fields = image
            .fields
            .iter()
            .filter(|field| !field.is_static)
            .map(|field| (field.name.clone(), Value::default_for(&field.ty)))
            .collect();
        let object = self.allocate(class, fields);
        for field in image.fields.iter().filter(|field| !field.is_static) {
            if let Some(init) = &field.init {
                let mut frame = Frame {
                    this: Some(object.clone()),
                    locals: Vec::new(),
                };
                let value = self.eval_expr(&mut frame, init)?;
                self.set_field(&object, &field.name, value)?;
            }
        }
        if let Some(constructor) = image.method(CONSTRUCTOR, descriptor) {
            self.run(class, constructor, Some(object.clone()), arguments)?;
        }
        Ok(object)
    }

    fn get_field(&mut self, target: &Value, name: &str) -> Exec<Value> {
        let Value::Ref(index) = target else {
            return Err(self.throw_new(NULL_POINTER, None));
        };
        self.object(*index)?
            .fields
            .get(name)
            .cloned()
            .ok_or_else(|| Fault::Internal(format!("no field {name}")))
    }

    fn set_field(&mut self, target: &Value, name: &str, value: Value) -> Exec<()> {
        let Value::Ref(index) = target else {
            return Err(self.throw_new(NULL_POINTER, None));
        };
        match self.state.heap.get_mut(*index) {
            Some(object) => {
                object.fields.insert(name.to_string(), value);
                Ok(())
            }
            None => Err(Fault::Internal(format!("dangling reference {index}"))),
        }
    }

    fn exec_block(&mut self, frame: &mut Frame, statements: &[Stmt]) -> Exec<Flow> {
        let depth = frame.locals.len();
        let mut flow = Ok(Flow::Normal);
        for statement in statements {
            flow = self.exec_stmt(frame, statement);
            if !matches!(flow, Ok(Flow::Normal)) {
                break;
            }
        }
        frame.locals.truncate(depth);
        flow
    }

    fn exec_stmt(&mut self, frame: &mut Frame, statement: &Stmt) -> Exec<Flow> {
        self.tick()?;
        match statement {
            Stmt::Local { name, ty, init } => {
                let value = match init {
                    Some(init) => self.eval_expr(frame, init)?,
                    None => Value::default_for(ty),
                };
                frame.locals.push((name.clone(), value));
            }
            Stmt::Expr(expr) => {
                self.eval_expr(frame, expr)?;
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => self.eval_expr(frame, value)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                let branch = if self.eval_condition(frame, condition)? { then } else { otherwise };
                return self.exec_block(frame, branch);
            }
            Stmt::While { condition, body } => {
                while self.eval_condition(frame, condition)? {
                    self.tick()?;
                    if let Flow::Return(value) = self.exec_block(frame, body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Stmt::Block(statements) => return self.exec_block(frame, statements),
            Stmt::Throw(expr) => {
                let exception = self.eval_expr(frame, expr)?;
                if exception == Value::Null {
                    return Err(self.throw_new(NULL_POINTER, None));
                }
                return Err(Fault::Throw(exception, self.stack.iter().rev().cloned().collect()));
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_condition(&mut self, frame: &mut Frame, condition: &Expr) -> Exec<bool> {
        match self.eval_expr(frame, condition)? {
            Value::Bool(value) => Ok(value),
            other => Err(Fault::Internal(format!("condition evaluated to {other:?}"))),
        }
    }

    fn eval_arguments(&mut self, frame: &mut Frame, arguments: &[Expr]) -> Exec<Vec<Value>> {
        arguments.iter().map(|argument| self.eval_expr(frame, argument)).collect()
    }

    fn eval_expr(&mut self, frame: &mut Frame, expr: &Expr) -> Exec<Value> {
        match expr {
            Expr::Int(value) => Ok(Value::Int(*value)),
            Expr::Str(text) => Ok(Value::Str(text.as_str().into())),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::Null => Ok(Value::Null),
            Expr::This => frame
                .this
                .clone()
                .ok_or_else(|| Fault::Internal("no receiver in a static context".to_string())),
            Expr::Local(name) => frame
                .locals
                .iter()
                .rev()
                .find(|(local, _)| local == name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| Fault::Internal(format!("no local {name}"))),
            Expr::StaticField { class, name } => self.get_static(class, name),
            Expr::Field { target, name } => {
                let target = self.eval_expr(frame, target)?;
                self.get_field(&target, name)
            }
            Expr::StaticCall {
                class,
                method,
                descriptor,
                arguments,
            } => {
                let arguments = self.eval_arguments(frame, arguments)?;
                self.invoke_static(class, method, descriptor, arguments)
            }
            Expr::VirtualCall {
                target,
                method,
                descriptor,
                arguments,
            } => {
                let target = self.eval_expr(frame, target)?;
                let arguments = self.eval_arguments(frame, arguments)?;
                self.invoke_virtual(target, method, descriptor, arguments)
            }
            Expr::New {
                class,
                descriptor,
                arguments,
            } => {
                let arguments = self.eval_arguments(frame, arguments)?;
                self.construct(class, descriptor, arguments)
            }
            Expr::Unary { op, operand } => match (op, self.eval_expr(frame, operand)?) {
                (UnaryOp::Negate, Value::Int(value)) => Ok(Value::Int(value.wrapping_neg())),
                (UnaryOp::Not, Value::Bool(value)) => Ok(Value::Bool(!value)),
                (op, value) => Err(Fault::Internal(format!("bad operand {value:?} for {op:?}"))),
            },
            Expr::Binary { op, lhs, rhs } => self.eval_binary(frame, *op, lhs, rhs),
            Expr::Concat { lhs, rhs } => {
                let lhs = self.eval_expr(frame, lhs)?;
                let rhs = self.eval_expr(frame, rhs)?;
                let text = format!("{}{}", self.stringify(&lhs)?, self.stringify(&rhs)?);
                Ok(Value::Str(text.into()))
            }
            Expr::Assign { target, value } => match target {
                Place::Local(name) => {
                    let value = self.eval_expr(frame, value)?;
                    match frame.locals.iter_mut().rev().find(|(local, _)| local == name) {
                        Some((_, slot)) => *slot = value.clone(),
                        None => return Err(Fault::Internal(format!("no local {name}"))),
                    }
                    Ok(value)
                }
                Place::StaticField { class, name } => {
                    let value = self.eval_expr(frame, value)?;
                    self.initialize(class)?;
                    self.set_static(class, name, value.clone());
                    Ok(value)
                }
                Place::Field { target, name } => {
                    let object = self.eval_expr(frame, target)?;
                    let value = self.eval_expr(frame, value)?;
                    self.set_field(&object, name, value.clone())?;
                    Ok(value)
                }
            },
        }
    }

    fn eval_binary(&mut self, frame: &mut Frame, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Exec<Value> {
        let lhs = self.eval_expr(frame, lhs)?;
        match (op, &lhs) {
            (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
            (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
            _ => {}
        }
        let rhs = self.eval_expr(frame, rhs)?;
        let value = match (op, lhs, rhs) {
            (BinaryOp::Equal, lhs, rhs) => Value::Bool(lhs == rhs),
            (BinaryOp::NotEqual, lhs, rhs) => Value::Bool(lhs != rhs),
            (BinaryOp::And | BinaryOp::Or, _, Value::Bool(rhs)) => Value::Bool(rhs),
            (BinaryOp::Divide | BinaryOp::Remainder, Value::Int(_), Value::Int(0)) => {
                return Err(self.throw_new(ARITHMETIC, Some("/ by zero".to_string())));
            }
            (op, Value::Int(lhs), Value::Int(rhs)) => match op {
                BinaryOp::Add => Value::Int(lhs.wrapping_add(rhs)),
                BinaryOp::Subtract => Value::Int(lhs.wrapping_sub(rhs)),
                BinaryOp::Multiply => Value::Int(lhs.wrapping_mul(rhs)),
                BinaryOp::Divide => Value::Int(lhs.wrapping_div(rhs)),
                BinaryOp::Remainder => Value::Int(lhs.wrapping_rem(rhs)),
                BinaryOp::Less => Value::Bool(lhs < rhs),
                BinaryOp::LessOrEqual => Value::Bool(lhs <= rhs),
                BinaryOp::Greater => Value::Bool(lhs > rhs),
                BinaryOp::GreaterOrEqual => Value::Bool(lhs >= rhs),
                op => return Err(Fault::Internal(format!("bad int operator {op}"))),
            },
            (op, lhs, rhs) => return Err(Fault::Internal(format!("bad operands {lhs:?} {op} {rhs:?}"))),
        };
        Ok(value)
    }

    fn native(&mut self, class: &str, method: &str, this: Option<Value>, arguments: Vec<Value>) -> Exec<Value> {
        let argument = |index: usize| arguments.get(index).cloned().unwrap_or(Value::Null);
        let int = |index: usize| match arguments.get(index) {
            Some(Value::Int(value)) => *value,
            _ => 0,
        };
        let this = this.unwrap_or(Value::Null);
        let value = match (class, method) {
            ("java.lang.Math", "max") => Value::Int(int(0).max(int(1))),
            ("java.lang.Math", "min") => Value::Int(int(0).min(int(1))),
            ("java.lang.Math", "abs") => Value::Int(int(0).wrapping_abs()),
            (PRINT_STREAM, "println") => {
                let text = match arguments.first() {
                    Some(value) => self.stringify(value)?,
                    None => String::new(),
                };
                self.state.output.push_str(&text);
                self.state.output.push('\n');
                Value::Null
            }
            (PRINT_STREAM, "print") => {
                let text = self.stringify(&argument(0))?;
                self.state.output.push_str(&text);
                Value::Null
            }
            (STRING, "length") => match &this {
                Value::Str(text) => Value::Int(text.encode_utf16().count() as i32),
                _ => return Err(self.throw_new(NULL_POINTER, None)),
            },
            (STRING, "isEmpty") => match &this {
                Value::Str(text) => Value::Bool(text.is_empty()),
                _ => return Err(self.throw_new(NULL_POINTER, None)),
            },
            (_, "getMessage") => self.get_field(&this, "message")?,
            (_, "toString") => Value::Str(self.builtin_string(&this)?.into()),
            (_, "equals") => Value::Bool(this == argument(0)),
            (_, "hashCode") => Value::Int(hash_code(&this)),
            _ => return Err(Fault::Internal(format!("no native method {class}.{method}"))),
        };
        Ok(value)
    }

    /// `String.valueOf` semantics, calling user `toString` overrides.
    fn stringify(&mut self, value: &Value) -> Exec<String> {
        if let Value::Ref(index) = value {
            let class = self.object(*index)?.class.clone();
            if !is_builtin(&class) {
                let image = self.class(&class)?;
                if let Some(method) = image.method("toString", "()") {
                    let text = self.run(&class, method, Some(value.clone()), Vec::new())?;
                    return match text {
                        Value::Str(text) => Ok(text.to_string()),
                        _ => Ok("null".to_string()),
                    };
                }
            }
        }
        self.builtin_string(value)
    }

    fn builtin_string(&self, value: &Value) -> Exec<String> {
        let text = match value {
            Value::Int(value) => value.to_string(),
            Value::Bool(value) => value.to_string(),
            Value::Null => "null".to_string(),
            Value::Str(text) => text.to_string(),
            Value::Ref(index) => {
                let object = self.object(*index)?;
                match object.fields.get("message") {
                    Some(Value::Str(message)) if is_builtin(&object.class) => format!("{}: {message}", object.class),
                    _ if is_builtin(&object.class) && object.class != OBJECT => object.class.clone(),
                    _ => {
                        let simple = object.class.rsplit('.').next().unwrap_or(&object.class);
                        format!("{simple}@{:x}", hash_code(value))
                    }
                }
            }
        };
        Ok(text)
    }

    /// How a returned value is shown: strings quoted.
    fn display(&mut self, value: &Value) -> Exec<String> {
        match value {
            Value::Str(text) => Ok(format!("{:?}", text.as_ref())),
            value => self.stringify(value),
        }
    }
}

fn is_builtin(class: &str) -> bool {
    class.starts_with("java.")
}

fn hash_code(value: &Value) -> i32 {
    match value {
        Value::Int(value) => *value,
        Value::Bool(true) => 1231,
        Value::Bool(false) => 1237,
        Value::Null => 0,
        Value::Str(text) => text
            .encode_utf16()
            .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(i32::from(unit))),
        Value::Ref(index) => (*index as i32).wrapping_mul(0x2f6b_4c1d).wrapping_add(0x1b6d_3586) & 0x7fff_ffff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jot::image::{FieldImage, MethodImage};

    fn artifact(image: &ClassImage) -> ClassArtifact {
        ClassArtifact {
            unit: image.name.clone(),
            class_name: image.name.clone(),
            bytes: image.to_bytes().unwrap(),
        }
    }

    fn entry(class: &str, body: Vec<Stmt>) -> ClassImage {
        ClassImage {
            name: class.into(),
            fields: vec![FieldImage {
                name: "count".into(),
                ty: Type::Int,
                is_static: true,
                init: None,
            }],
            methods: vec![MethodImage {
                name: ENTRY_METHOD.into(),
                descriptor: "()".into(),
                parameters: Vec::new(),
                ret: Type::object(),
                is_static: true,
                body,
            }],
        }
    }

    fn bump(class: &str, by: i32) -> Vec<Stmt> {
        vec![Stmt::Return(Some(Expr::Assign {
            target: Place::StaticField {
                class: class.into(),
                name: "count".into(),
            },
            value: Box::new(Expr::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr::StaticField {
                    class: class.into(),
                    name: "count".into(),
                }),
                rhs: Box::new(Expr::Int(by)),
            }),
        }))]
    }

    #[test]
    fn redefinition_keeps_static_state() {
        let executor = LocalExecutor::default();
        executor.load(&[artifact(&entry("REPL.$Rivet$1", bump("REPL.$Rivet$1", 1)))]).unwrap();
        assert_eq!(executor.invoke("REPL.$Rivet$1").unwrap(), Invocation::Returned(Some("1".into())));
        let outcome = executor
            .redefine(&[artifact(&entry("REPL.$Rivet$1", bump("REPL.$Rivet$1", 10)))])
            .unwrap();
        assert_eq!(outcome, RedefineOutcome::Redefined);
        assert_eq!(executor.invoke("REPL.$Rivet$1").unwrap(), Invocation::Returned(Some("11".into())));
    }

    #[test]
    fn shape_changes_are_not_redefined() {
        let executor = LocalExecutor::default();
        executor.load(&[artifact(&entry("REPL.$Rivet$1", Vec::new()))]).unwrap();
        let mut changed = entry("REPL.$Rivet$1", Vec::new());
        changed.fields[0].ty = Type::string();
        let outcome = executor.redefine(&[artifact(&changed)]).unwrap();
        assert!(matches!(outcome, RedefineOutcome::Unsupported { .. }));
        assert!(matches!(
            executor.redefine(&[artifact(&entry("REPL.$Rivet$2", Vec::new()))]),
            Err(ExecutorError::NotLoaded(_))
        ));
    }

    #[test]
    fn unresolved_and_arithmetic_faults() {
        let executor = LocalExecutor::default();
        let stub = entry(
            "REPL.$Rivet$1",
            vec![Stmt::Throw(Expr::New {
                class: UNRESOLVED.into(),
                descriptor: "(int)".into(),
                arguments: vec![Expr::Int(7)],
            })],
        );
        let divide = entry(
            "REPL.$Rivet$2",
            vec![Stmt::Return(Some(Expr::Binary {
                op: BinaryOp::Divide,
                lhs: Box::new(Expr::Int(1)),
                rhs: Box::new(Expr::Int(0)),
            }))],
        );
        executor.load(&[artifact(&stub), artifact(&divide)]).unwrap();
        assert_eq!(executor.invoke("REPL.$Rivet$1").unwrap(), Invocation::Unresolved { snippet: 7 });
        let Invocation::Threw {
            class_name,
            message,
            frames,
        } = executor.invoke("REPL.$Rivet$2").unwrap()
        else {
            panic!("expected an exception");
        };
        assert_eq!(class_name, ARITHMETIC);
        assert_eq!(message.as_deref(), Some("/ by zero"));
        assert_eq!(frames[0].method, ENTRY_METHOD);
    }

    #[test]
    fn step_budget_stops_loops() {
        let executor = LocalExecutor::new(LocalExecutorConfig {
            max_steps: Some(1_000),
            ..LocalExecutorConfig::default()
        });
        let spin = entry(
            "REPL.$Rivet$1",
            vec![Stmt::While {
                condition: Expr::Bool(true),
                body: Vec::new(),
            }],
        );
        executor.load(&[artifact(&spin)]).unwrap();
        assert_eq!(executor.invoke("REPL.$Rivet$1").unwrap(), Invocation::Stopped);
    }

    #[test]
    fn printing_and_string_display() {
        let executor = LocalExecutor::default();
        let print = entry(
            "REPL.$Rivet$1",
            vec![
                Stmt::Expr(Expr::VirtualCall {
                    target: Box::new(Expr::StaticField {
                        class: "java.lang.System".into(),
                        name: "out".into(),
                    }),
                    method: "println".into(),
                    descriptor: "(java.lang.Object)".into(),
                    arguments: vec![Expr::Concat {
                        lhs: Box::new(Expr::Str("n=".into())),
                        rhs: Box::new(Expr::Int(3)),
                    }],
                }),
                Stmt::Return(Some(Expr::Str("done".into()))),
            ],
        );
        executor.load(&[artifact(&print)]).unwrap();
        assert_eq!(executor.invoke("REPL.$Rivet$1").unwrap(), Invocation::Returned(Some("\"done\"".into())));
        assert_eq!(executor.take_output(), "n=3\n");
        assert_eq!(executor.take_output(), "");
    }
}
