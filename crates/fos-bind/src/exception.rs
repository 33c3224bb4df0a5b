//! Exception Bridge
//!
//! Script exceptions and engine failures caught at the native boundary end
//! up here, exactly once each, in whichever handler the environment has
//! installed.

use std::fmt;

use rquickjs::convert::Coerced;
use rquickjs::{CaughtError, Exception};

use crate::env::Shared;

/// A script-level exception with whatever location the engine knows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptException {
    pub message: String,
    pub script: Option<String>,
    pub line: Option<u32>,
    pub stack: Option<String>,
}

/// File name QuickJS gives every script run through `run_script`
const ENGINE_SCRIPT_NAME: &str = "eval_script";

impl ScriptException {
    fn from_exception(exception: &Exception<'_>, script: Option<&str>) -> Self {
        let mut stack = exception.stack().filter(|stack| !stack.is_empty());
        if let (Some(name), Some(trace)) = (script, stack.as_mut()) {
            *trace = trace.replace(&format!("{ENGINE_SCRIPT_NAME}:"), &format!("{name}:"));
        }

        let location = stack.as_deref().and_then(stack_location);
        Self {
            message: exception.message().unwrap_or_default(),
            script: script
                .map(str::to_string)
                .or_else(|| location.as_ref().map(|(file, _)| file.clone())),
            line: location.map(|(_, line)| line),
            stack,
        }
    }

    fn from_thrown(value: &rquickjs::Value<'_>, script: Option<&str>) -> Self {
        Self {
            message: stringify(value),
            script: script.map(str::to_string),
            ..Self::default()
        }
    }
}

/// File and line of the innermost script frame of a stack trace.
///
/// Frames read `at name (file:line:column)`, or `at file:line:column` for
/// compile errors; native frames have no location and are skipped.
fn stack_location(stack: &str) -> Option<(String, u32)> {
    stack.lines().find_map(|frame| {
        let frame = frame.trim().strip_prefix("at ")?;
        let location = match frame.rfind('(') {
            Some(open) => frame[open + 1..].strip_suffix(')')?,
            None => frame,
        };

        let mut parts = location.rsplitn(3, ':');
        let _column = parts.next()?;
        let line = parts.next()?.parse().ok()?;
        let file = parts.next()?;
        Some((file.to_string(), line))
    })
}

/// Message of an exception QuickJS raised because it ran out of memory or
/// stack, rather than because script threw
fn engine_failure(exception: &Exception<'_>) -> Option<String> {
    let name = exception.get::<_, String>("name").ok()?;
    let message = exception.message()?;

    let fatal = match name.as_str() {
        "InternalError" => message == "out of memory" || message == "stack overflow",
        "RangeError" => message == "Maximum call stack size exceeded",
        _ => false,
    };
    fatal.then_some(message)
}

impl fmt::Display for ScriptException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.script, self.line) {
            (Some(script), Some(line)) => write!(f, "{}:{}: {}", script, line, self.message),
            (Some(script), None) => write!(f, "{}: {}", script, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Receives everything the bridge reports
pub trait ExceptionHandler: Send + Sync {
    /// A script threw
    fn on_exception(&self, exception: &ScriptException);

    /// The engine failed in a way script cannot observe (allocation, stack)
    fn on_engine_error(&self, message: &str);
}

/// Logs every report as an error
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn on_exception(&self, exception: &ScriptException) {
        match &exception.stack {
            Some(stack) => tracing::error!("[JS] Uncaught exception: {}\n{}", exception, stack),
            None => tracing::error!("[JS] Uncaught exception: {}", exception),
        }
    }

    fn on_engine_error(&self, message: &str) {
        tracing::error!("[JS] Engine error: {}", message);
    }
}

fn stringify(value: &rquickjs::Value<'_>) -> String {
    value
        .get::<Coerced<String>>()
        .map(|Coerced(s)| s)
        .unwrap_or_else(|_| "<unprintable value>".to_string())
}

/// Forward a caught failure to the installed handler, if any
pub(crate) fn report(shared: &Shared, caught: CaughtError<'_>, script: Option<&str>) {
    let Some(handler) = shared.exception_handler() else {
        return;
    };

    match caught {
        CaughtError::Exception(exception) => match engine_failure(&exception) {
            Some(message) => handler.on_engine_error(&message),
            None => handler.on_exception(&ScriptException::from_exception(&exception, script)),
        },
        CaughtError::Value(value) => {
            handler.on_exception(&ScriptException::from_thrown(&value, script));
        }
        CaughtError::Error(err) => handler.on_engine_error(&err.to_string()),
    }
}

/// One-line description of a caught failure
pub(crate) fn describe(caught: CaughtError<'_>) -> String {
    match caught {
        CaughtError::Exception(exception) => exception.message().unwrap_or_default(),
        CaughtError::Value(value) => stringify(&value),
        CaughtError::Error(err) => err.to_string(),
    }
}
