//! Console Bridge
//!
//! Implements console.log, console.info, console.warn, console.error,
//! console.debug and console.assert on top of a pluggable `Console`.

use std::rc::Rc;

use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};

use crate::env::Shared;

/// Console message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Log,
    Info,
    Warn,
    Error,
    Debug,
    Assert,
}

impl MessageKind {
    /// Name of the `console` method
    pub fn method(self) -> &'static str {
        match self {
            MessageKind::Log => "log",
            MessageKind::Info => "info",
            MessageKind::Warn => "warn",
            MessageKind::Error => "error",
            MessageKind::Debug => "debug",
            MessageKind::Assert => "assert",
        }
    }
}

/// Receives console output from scripts
pub trait Console: Send + Sync {
    fn message(&self, kind: MessageKind, text: &str);
}

/// Forwards console output to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn message(&self, kind: MessageKind, text: &str) {
        match kind {
            MessageKind::Error => tracing::error!("[JS] {}", text),
            MessageKind::Assert => tracing::error!("[JS] Assertion failed: {}", text),
            MessageKind::Warn => tracing::warn!("[JS] {}", text),
            MessageKind::Debug => tracing::debug!("[JS] {}", text),
            MessageKind::Log | MessageKind::Info => tracing::info!("[JS] {}", text),
        }
    }
}

/// Install the `console` object into the global object
pub(crate) fn install_console(ctx: &Ctx<'_>, shared: &Rc<Shared>) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;

    for kind in [
        MessageKind::Log,
        MessageKind::Info,
        MessageKind::Warn,
        MessageKind::Error,
        MessageKind::Debug,
    ] {
        let shared = shared.clone();
        let method = Function::new(ctx.clone(), move |ctx: Ctx, args: Rest<Value>| {
            emit(&shared, kind, &join(&ctx, &args.0));
        })?
        .with_name(kind.method())?;
        console.set(kind.method(), method)?;
    }

    let shared = shared.clone();
    let assert = Function::new(ctx.clone(), move |ctx: Ctx, args: Rest<Value>| {
        let passed = args
            .0
            .first()
            .and_then(|condition| condition.get::<Coerced<bool>>().ok())
            .is_some_and(|Coerced(b)| b);
        if passed {
            return;
        }

        // the condition itself is not part of the message
        let text = join(&ctx, args.0.get(1..).unwrap_or_default());
        emit(&shared, MessageKind::Assert, &text);
    })?
    .with_name("assert")?;
    console.set("assert", assert)?;

    ctx.globals().set("console", console)?;

    Ok(())
}

fn emit(shared: &Shared, kind: MessageKind, text: &str) {
    if let Some(console) = shared.console() {
        console.message(kind, text);
    }
}

/// ToString each value and join with single spaces
fn join(ctx: &Ctx<'_>, values: &[Value<'_>]) -> String {
    let mut output = String::new();

    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            output.push(' ');
        }
        match value.get::<Coerced<String>>() {
            Ok(Coerced(s)) => output.push_str(&s),
            Err(_) => {
                // toString threw; drop the pending exception
                let _ = ctx.catch();
                output.push_str("[unprintable]");
            }
        }
    }

    output
}
