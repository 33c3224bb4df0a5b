//! Call Adapter
//!
//! Type erasure for native functions. Any `Fn(A0, .., An) -> R` whose
//! arguments decode and whose result encodes becomes a `NativeFunction`,
//! which installs into the engine as a trampoline that checks the argument
//! count, decodes left to right, calls, and encodes the result.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Value};

use crate::convert::{Decode, Encode};
use crate::error::{BindError, Result};
use crate::value::Scope;

/// A native function callable from script.
///
/// `Args` is the tuple of parameter types; it only exists to keep the
/// per-arity impls apart.
pub trait IntoNativeFunction<Args>: 'static {
    /// Number of declared parameters
    const ARITY: usize;

    /// Decode `args`, call, and encode the result.
    ///
    /// Callers guarantee `args.len() >= ARITY`.
    fn call_native<'js>(&self, scope: &Scope<'js>, args: &[Value<'js>]) -> Result<Value<'js>>;
}

macro_rules! count {
    () => (0usize);
    ($head:ident $($tail:ident)*) => (1usize + count!($($tail)*));
}

macro_rules! impl_native_fn {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg),*> IntoNativeFunction<($($arg,)*)> for Func
        where
            Func: Fn($($arg),*) -> Ret + 'static,
            Ret: for<'js> Encode<'js>,
            $($arg: for<'js> Decode<'js>,)*
        {
            const ARITY: usize = count!($($arg)*);

            #[allow(non_snake_case, unused_variables, unused_mut)]
            fn call_native<'js>(&self, scope: &Scope<'js>, args: &[Value<'js>]) -> Result<Value<'js>> {
                let mut supplied = args.iter().cloned();
                $(
                    let value = supplied.next().ok_or(BindError::NotEnoughArguments {
                        expected: Self::ARITY,
                        actual: args.len(),
                    })?;
                    let $arg = $arg::decode(scope, value)?;
                )*
                (self)($($arg),*).encode(scope)
            }
        }
    };
}

impl_native_fn!();
impl_native_fn!(A0);
impl_native_fn!(A0, A1);
impl_native_fn!(A0, A1, A2);
impl_native_fn!(A0, A1, A2, A3);
impl_native_fn!(A0, A1, A2, A3, A4);
impl_native_fn!(A0, A1, A2, A3, A4, A5);
impl_native_fn!(A0, A1, A2, A3, A4, A5, A6);
impl_native_fn!(A0, A1, A2, A3, A4, A5, A6, A7);

/// Object-safe view of an `IntoNativeFunction`
trait Invoke {
    fn invoke<'js>(&self, scope: &Scope<'js>, args: &[Value<'js>]) -> Result<Value<'js>>;
}

struct Typed<F, Args> {
    f: F,
    _args: PhantomData<fn() -> Args>,
}

impl<F, Args> Invoke for Typed<F, Args>
where
    F: IntoNativeFunction<Args>,
{
    fn invoke<'js>(&self, scope: &Scope<'js>, args: &[Value<'js>]) -> Result<Value<'js>> {
        self.f.call_native(scope, args)
    }
}

/// Type-erased native function with its exposed name
#[derive(Clone)]
pub struct NativeFunction {
    name: String,
    arity: usize,
    callable: Arc<dyn Invoke>,
}

impl NativeFunction {
    pub fn new<F, Args>(name: impl Into<String>, f: F) -> Self
    where
        F: IntoNativeFunction<Args>,
        Args: 'static,
    {
        Self {
            name: name.into(),
            arity: F::ARITY,
            callable: Arc::new(Typed {
                f,
                _args: PhantomData,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Run the function with script-supplied arguments.
    ///
    /// Extra arguments are ignored; missing ones fail before anything is
    /// decoded.
    pub fn invoke<'js>(&self, scope: &Scope<'js>, args: &[Value<'js>]) -> Result<Value<'js>> {
        tracing::trace!(function = %self.name, supplied = args.len(), "Native call");

        if args.len() < self.arity {
            return Err(BindError::NotEnoughArguments {
                expected: self.arity,
                actual: args.len(),
            });
        }

        self.callable.invoke(scope, args)
    }

    /// Create the engine function object for this entry point
    pub(crate) fn to_function<'js>(&self, scope: &Scope<'js>) -> Result<Function<'js>> {
        let native = self.clone();
        let shared = scope.shared().clone();

        let function = Function::new(
            scope.ctx().clone(),
            move |ctx: Ctx<'js>, args: Rest<Value<'js>>| -> rquickjs::Result<Value<'js>> {
                let scope = Scope::new(ctx.clone(), shared.clone());
                native.invoke(&scope, &args.0).map_err(|err| err.throw(&ctx))
            },
        )?
        .with_name(&self.name)?;

        Ok(function)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}
