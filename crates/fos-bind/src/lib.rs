//! fOS Native Bindings
//!
//! Exposes native functions, class namespaces and plain-data structs to the
//! QuickJS runtime, and lets native code call back into script.
//!
//! Features:
//! - Type-directed conversion (`Decode` / `Encode`)
//! - Native functions with checked arity
//! - Scoped (`Local`) and durable (`Persistent`) value handles
//! - Field-by-field value types
//! - Ordered binding providers
//! - Exception and console bridges
//! - `Uint8Array` / `ArrayBuffer` shared memory

mod bindings;
mod call;
mod config;
mod console;
mod convert;
mod env;
mod error;
mod exception;
mod memory;
mod value;
mod value_type;

pub use bindings::{BindingRegistry, ClassBinding, Module};
pub use call::{IntoNativeFunction, NativeFunction};
pub use config::BindConfig;
pub use console::{Console, MessageKind, TracingConsole};
pub use convert::{Decode, Encode, EncodeArgs};
pub use env::{Capabilities, Environment};
pub use error::{BindError, Result};
pub use exception::{DefaultExceptionHandler, ExceptionHandler, ScriptException};
pub use memory::{ArrayBuffer, Uint8Array};
pub use value::{Local, Persistent, PropertyKey, Scope, foreach, vec_from_array};
pub use value_type::{ValueType, decode_value_type, encode_value_type};

pub use rquickjs;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
