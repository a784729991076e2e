//! Tree-walking evaluator.

use std::collections::HashMap;
use std::rc::Rc;

use super::ast::{BinOp, Expr, FunctionDef, Stmt, Target};
use super::builtins;
use super::console::Console;
use super::fault::{Fault, FaultKind};
use super::namespace::Namespace;
use super::net::HttpAccess;
use super::ops;
use super::value::{dispose, Value};

/// Maximum nesting of user function calls.
pub const MAX_CALL_DEPTH: usize = 200;

/// Control-flow outcome of a statement.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Evaluates code against one namespace.
///
/// Top-level assignments bind into the namespace; assignments inside a
/// function bind into that call's locals.
pub struct Interpreter<'a> {
    globals: &'a mut Namespace,
    console: &'a Console,
    net: &'a HttpAccess,
    frames: Vec<HashMap<String, Value>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(globals: &'a mut Namespace, console: &'a Console, net: &'a HttpAccess) -> Self {
        Self {
            globals,
            console,
            net,
            frames: Vec::new(),
        }
    }

    pub fn write(&self, text: &str) {
        self.console.write(text);
    }

    pub fn net(&self) -> &HttpAccess {
        self.net
    }

    pub fn run_program(&mut self, program: &[Stmt]) -> Result<(), Fault> {
        // placement of return/break/continue is checked by the parser
        self.exec_block(program).map(|_| ())
    }

    pub fn eval_expression(&mut self, expr: &Expr) -> Result<Value, Fault> {
        self.eval(expr)
    }

    // ── Statements ──────────────────────────────────

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, Fault> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, Fault> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Assign(target, expr) => {
                let value = self.eval(expr)?;
                self.assign(target, value)?;
            }
            Stmt::AugAssign(target, op, expr) => self.aug_assign(target, *op, expr)?,
            Stmt::Def(def) => self.bind(&def.name, Value::Function(Rc::clone(def))),
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            Stmt::While(cond, body) => {
                while self.eval(cond)?.truthy() {
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::For(name, iterable, body) => {
                let items = ops::iterate(&self.eval(iterable)?)?;
                for item in items {
                    self.bind(name, item);
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn bind(&mut self, name: &str, value: Value) {
        match self.frames.last_mut() {
            Some(locals) => {
                if let Some(old) = locals.insert(name.to_string(), value) {
                    dispose(old);
                }
            }
            None => self.globals.set(name, value),
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            Target::Index(container, index) => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                ops::set_item(&container, index, value)
            }
        }
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, expr: &Expr) -> Result<(), Fault> {
        match target {
            Target::Name(name) => {
                // the result binds locally, so the current value must be local too
                if let Some(locals) = self.frames.last() {
                    if !locals.contains_key(name.as_str()) {
                        return Err(Fault::new(
                            FaultKind::NameError,
                            format!(
                                "cannot access local variable '{name}' where it is not associated with a value"
                            ),
                        ));
                    }
                }
                let current = self.lookup(name)?;
                let rhs = self.eval(expr)?;
                let updated = combine(op, &current, &rhs)?;
                self.bind(name, updated);
            }
            Target::Index(container, index) => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                let current = ops::get_item(&container, &index)?;
                let rhs = self.eval(expr)?;
                let updated = combine(op, &current, &rhs)?;
                ops::set_item(&container, index, updated)?;
            }
        }
        Ok(())
    }

    // ── Expressions ─────────────────────────────────

    fn lookup(&self, name: &str) -> Result<Value, Fault> {
        if let Some(value) = self.frames.last().and_then(|locals| locals.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        builtins::lookup(name)
            .map(Value::Builtin)
            .ok_or_else(|| Fault::undefined(name))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, Fault> {
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(i) => Ok(Value::Int(*i)),
            Expr::Float(f) => Ok(Value::Float(*f)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::list(values))
            }
            Expr::Dict(pairs) => {
                let mut entries = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    entries.push((self.eval(key)?, self.eval(value)?));
                }
                ops::dict_from_pairs(entries)
            }
            Expr::Unary(op, operand) => ops::unary(*op, &self.eval(operand)?),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                ops::binary(*op, &lhs, &rhs)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (op, expr) in rest {
                    let right = self.eval(expr)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if lhs.truthy() {
                    self.eval(rhs)
                } else {
                    Ok(lhs)
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if lhs.truthy() {
                    Ok(lhs)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Call(callee, args) => {
                let callee = self.eval(callee)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(&callee, args)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                ops::get_item(&target, &index)
            }
            Expr::Slice(target, start, end) => {
                let target = self.eval(target)?;
                let start = start.as_deref().map(|e| self.eval(e)).transpose()?;
                let end = end.as_deref().map(|e| self.eval(e)).transpose()?;
                ops::slice(&target, start.as_ref(), end.as_ref())
            }
            Expr::Attr(target, name) => builtins::bind_method(&self.eval(target)?, name),
        }
    }

    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, Fault> {
        match callee {
            Value::Function(def) => self.call_function(def, args),
            Value::Builtin(builtin) => (builtin.func)(self, args),
            Value::Method(method) => builtins::call_method(method, args),
            other => Err(Fault::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, def: &Rc<FunctionDef>, args: Vec<Value>) -> Result<Value, Fault> {
        if args.len() != def.params.len() {
            return Err(Fault::type_error(format!(
                "{}() takes {} positional argument{} but {} {} given",
                def.name,
                def.params.len(),
                if def.params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" },
            )));
        }
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(Fault::new(
                FaultKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        let locals = def.params.iter().cloned().zip(args).collect();
        self.frames.push(locals);
        let outcome = self.exec_block(&def.body);
        if let Some(locals) = self.frames.pop() {
            locals.into_values().for_each(dispose);
        }
        match outcome? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }
}

/// `x op= y`. Lists extend in place, so aliases observe the change.
fn combine(op: BinOp, current: &Value, rhs: &Value) -> Result<Value, Fault> {
    if let (BinOp::Add, Value::List(items), Value::List(_)) = (op, current, rhs) {
        let extra = ops::iterate(rhs)?;
        items.borrow_mut().extend(extra);
        return Ok(current.clone());
    }
    ops::binary(op, current, rhs)
}
