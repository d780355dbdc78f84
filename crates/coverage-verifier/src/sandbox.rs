//! Contract with the code-execution sandbox.
//!
//! Instrumented code runs as the body of a function taking `args`, with an
//! `output` variable whose final value is returned. The sandbox binds the
//! context's coverage-global, runs the unit, and leaves whatever the
//! initializer and probes registered in the context.

use async_trait::async_trait;
use serde_json::Value;

use crate::result::VerifyResult;
use crate::runtime::ExecutionContext;

/// Name of the parameter the wrapped code receives its arguments under.
pub const ARGS_PARAM: &str = "args";

/// How the wrapped body is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Plain function call
    #[default]
    Sync,
    /// Async function; the result is awaited
    Async,
}

impl ExecutionMode {
    /// Mode for a case's `isAsync` flag
    pub fn from_async_flag(is_async: bool) -> Self {
        if is_async {
            Self::Async
        } else {
            Self::Sync
        }
    }
}

/// Function body ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableUnit {
    /// Wrapped body text
    pub body: String,
    /// Parameter name holding the caller's arguments
    pub param: &'static str,
    /// Invocation mode
    pub mode: ExecutionMode,
}

impl ExecutableUnit {
    /// Wrap instrumented code so it returns its `output` variable.
    pub fn wrap(instrumented: &str, mode: ExecutionMode) -> Self {
        Self {
            body: format!("{{ var output;\n{instrumented}\nreturn output;\n}}"),
            param: ARGS_PARAM,
            mode,
        }
    }
}

/// Executes wrapped instrumented code.
#[async_trait]
pub trait ExecutionSandbox: Send + Sync {
    /// Run `unit` with `args`, with the coverage-global bound from `context`.
    ///
    /// Returns the unit's return value. A throw inside the program is a
    /// [`crate::VerifyError::Execution`].
    async fn execute(
        &self,
        unit: &ExecutableUnit,
        args: &Value,
        context: &mut ExecutionContext,
    ) -> VerifyResult<Value>;
}

#[async_trait]
impl<T: ExecutionSandbox + ?Sized> ExecutionSandbox for &T {
    async fn execute(
        &self,
        unit: &ExecutableUnit,
        args: &Value,
        context: &mut ExecutionContext,
    ) -> VerifyResult<Value> {
        (**self).execute(unit, args, context).await
    }
}
