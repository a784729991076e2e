//! The execution kernel: one persistent namespace, code evaluation with
//! captured output, and introspection.
//!
//! [`ExecutionKernel`] is single-threaded (`!Send`); the protocol server
//! reaches it through [`worker::KernelHandle`], which owns it on a
//! dedicated thread.

pub mod ast;
pub mod builtins;
pub mod console;
pub mod fault;
pub mod interp;
pub mod lexer;
pub mod namespace;
pub mod net;
pub mod ops;
pub mod parser;
pub mod server;
pub mod value;
pub mod worker;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::debug;

use console::Console;
use fault::{Fault, FaultKind};
use interp::Interpreter;
use namespace::Namespace;
use net::HttpAccess;

pub use worker::KernelHandle;

/// Summaries longer than this are cut to `SUMMARY_LIMIT - 3` characters
/// plus `...`.
pub const SUMMARY_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub summary: String,
}

/// A variable's value as sent over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "value", rename_all = "lowercase")]
pub enum VariableValue {
    /// Lossless JSON encoding.
    Json(serde_json::Value),
    /// Textual representation, for values JSON cannot carry.
    Repr(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("Variable '{0}' not found")]
    NotFound(String),
    /// The worker thread owning the kernel has stopped.
    #[error("kernel unavailable")]
    Unavailable,
}

#[derive(Default)]
pub struct ExecutionKernel {
    namespace: Namespace,
    console: Console,
    net: HttpAccess,
}

impl ExecutionKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `code` against the namespace and returns everything it wrote.
    ///
    /// A lone expression has its non-`None` value echoed; anything else runs
    /// as a statement sequence. Faults (and panics) become an
    /// `Error: <Kind>: <message>` line in the output; statements that ran
    /// before the fault keep their effects.
    pub fn execute(&mut self, code: &str) -> ExecutionResult {
        let capture = self.console.capture();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(code)));
        let mut output = capture.finish();
        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(fault)) => Some(fault),
            Err(payload) => Some(Fault::new(FaultKind::InternalError, panic_message(&*payload))),
        };
        if let Some(fault) = fault {
            debug!(kind = %fault.kind, "execution fault");
            output.push_str(&fault.diagnostic());
        }
        ExecutionResult {
            output,
            vars: self.namespace.visible_names(),
        }
    }

    fn run(&mut self, code: &str) -> Result<(), Fault> {
        let mut interp = Interpreter::new(&mut self.namespace, &self.console, &self.net);
        match parser::parse_expression(code) {
            Ok(expr) => {
                let value = interp.eval_expression(&expr)?;
                if !value.is_none() {
                    self.console.write(&format!("{}\n", value.repr()));
                }
            }
            Err(_) => {
                let program = parser::parse_program(code)?;
                interp.run_program(&program)?;
            }
        }
        Ok(())
    }

    pub fn list_vars(&self) -> Vec<VariableDescriptor> {
        self.namespace
            .visible_entries()
            .map(|(name, value)| VariableDescriptor {
                name: name.to_string(),
                type_name: value.type_name().to_string(),
                summary: summarize(&value.repr()),
            })
            .collect()
    }

    /// Looks up any binding, internal names included.
    pub fn get_var(&self, name: &str) -> Result<VariableValue, KernelError> {
        let value = self
            .namespace
            .get(name)
            .ok_or_else(|| KernelError::NotFound(name.to_string()))?;
        Ok(match value.to_json() {
            Some(json) => VariableValue::Json(json),
            None => VariableValue::Repr(value.repr()),
        })
    }

    pub fn reset(&mut self) {
        self.namespace.clear();
    }
}

fn summarize(text: &str) -> String {
    if text.chars().count() <= SUMMARY_LIMIT {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(SUMMARY_LIMIT - 3).collect();
    cut.push_str("...");
    cut
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "interpreter panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expression_is_auto_printed() {
        let mut kernel = ExecutionKernel::new();
        let result = kernel.execute("2+2");
        assert_eq!(result.output, "4\n");
        assert!(result.vars.is_empty());
    }

    #[test]
    fn test_assignment_prints_nothing() {
        let mut kernel = ExecutionKernel::new();
        let result = kernel.execute("x = 2 + 2");
        assert_eq!(result.output, "");
        assert_eq!(result.vars, vec!["x"]);
        assert_eq!(kernel.get_var("x").unwrap(), VariableValue::Json(json!(4)));
    }

    #[test]
    fn test_none_result_is_not_echoed() {
        let mut kernel = ExecutionKernel::new();
        assert_eq!(kernel.execute("print('hi')").output, "hi\n");
        assert_eq!(kernel.execute("None").output, "");
        assert_eq!(kernel.execute("'s'").output, "'s'\n");
    }

    #[test]
    fn test_namespace_persists_across_calls() {
        let mut kernel = ExecutionKernel::new();
        kernel.execute("def double(n) { return n * 2 }");
        kernel.execute("y = double(21)");
        assert_eq!(kernel.execute("y").output, "42\n");
        assert_eq!(kernel.execute("x = 1").vars, vec!["double", "y", "x"]);
    }

    #[test]
    fn test_fault_is_contained() {
        let mut kernel = ExecutionKernel::new();
        let result = kernel.execute("a = 1\nprint('before')\nb = 1 / 0\nc = 2");
        assert_eq!(
            result.output,
            "before\nError: ZeroDivisionError: division by zero\n"
        );
        assert_eq!(result.vars, vec!["a"]);
    }

    #[test]
    fn test_syntax_error_is_a_fault() {
        let mut kernel = ExecutionKernel::new();
        let result = kernel.execute("x = = 1");
        assert!(result.output.starts_with("Error: SyntaxError: "));
        assert!(result.vars.is_empty());
    }

    #[test]
    fn test_overlong_expression_is_a_syntax_error() {
        let mut kernel = ExecutionKernel::new();
        let result = kernel.execute(&format!("1{}", "+1".repeat(100_000)));
        assert_eq!(
            result.output,
            "Error: SyntaxError: expression too complex (line 1)\n"
        );
        assert_eq!(kernel.execute("1+1").output, "2\n");
    }

    #[test]
    fn test_empty_code() {
        let mut kernel = ExecutionKernel::new();
        let result = kernel.execute("");
        assert_eq!(result.output, "");
        assert!(result.vars.is_empty());
    }

    #[test]
    fn test_internal_names_are_hidden() {
        let mut kernel = ExecutionKernel::new();
        kernel.execute("_secret = 1; visible = 2");
        let names: Vec<_> = kernel.list_vars().into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["visible"]);
        assert_eq!(kernel.execute("_secret + visible").output, "3\n");
        assert!(kernel.get_var("_secret").is_ok());
    }

    #[test]
    fn test_list_vars_descriptors() {
        let mut kernel = ExecutionKernel::new();
        kernel.execute("n = 3\nname = 'bob'\nxs = [1, 'a']");
        let vars = kernel.list_vars();
        assert_eq!(
            vars[1],
            VariableDescriptor {
                name: "name".to_string(),
                type_name: "str".to_string(),
                summary: "'bob'".to_string(),
            }
        );
        assert_eq!(vars[2].type_name, "list");
        assert_eq!(vars[2].summary, "[1, 'a']");
    }

    #[test]
    fn test_summary_truncation() {
        let mut kernel = ExecutionKernel::new();
        kernel.execute("big = 'x' * 500");
        let vars = kernel.list_vars();
        assert_eq!(vars[0].summary.chars().count(), 100);
        assert!(vars[0].summary.ends_with("..."));
        assert_eq!(summarize("short"), "short");
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut kernel = ExecutionKernel::new();
        kernel.execute("x = 1");
        kernel.reset();
        kernel.reset();
        assert!(kernel.list_vars().is_empty());
        let result = kernel.execute("x");
        assert_eq!(result.output, "Error: NameError: name 'x' is not defined\n");
    }

    #[test]
    fn test_get_var_falls_back_to_repr() {
        let mut kernel = ExecutionKernel::new();
        kernel.execute("def f() { pass }\nnan = float('nan')");
        assert_eq!(
            kernel.get_var("f").unwrap(),
            VariableValue::Repr("<function f>".to_string())
        );
        assert_eq!(
            kernel.get_var("nan").unwrap(),
            VariableValue::Repr("nan".to_string())
        );
        assert_eq!(
            kernel.get_var("missing").unwrap_err().to_string(),
            "Variable 'missing' not found"
        );
    }

    #[test]
    fn test_variable_value_wire_shape() {
        let json_value = serde_json::to_value(VariableValue::Json(json!([1, 2]))).unwrap();
        assert_eq!(json_value, json!({"encoding": "json", "value": [1, 2]}));
        let repr_value = serde_json::to_value(VariableValue::Repr("<function f>".into())).unwrap();
        assert_eq!(repr_value, json!({"encoding": "repr", "value": "<function f>"}));
    }

    #[test]
    fn test_independent_kernels() {
        let mut a = ExecutionKernel::new();
        let mut b = ExecutionKernel::new();
        a.execute("x = 1");
        assert!(b.execute("y = 2").vars == vec!["y"]);
        assert_eq!(a.list_vars().len(), 1);
    }
}
