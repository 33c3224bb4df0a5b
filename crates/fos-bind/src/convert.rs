//! Value Conversion
//!
//! Type-directed conversion between native values and engine values.
//! Dispatch happens on the static Rust type only; the runtime tag of the
//! engine value is never inspected, so mismatches coerce instead of failing.

use rquickjs::Value;
use rquickjs::convert::Coerced;

use crate::error::Result;
use crate::value::{Local, Persistent, Scope};

/// Convert an engine value into a native value
pub trait Decode<'js>: Sized {
    fn decode(scope: &Scope<'js>, value: Value<'js>) -> Result<Self>;
}

/// Convert a native value into an engine value
pub trait Encode<'js> {
    fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>>;
}

impl<'js, T: Encode<'js> + ?Sized> Encode<'js> for &T {
    fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>> {
        (**self).encode(scope)
    }
}

// ============================================================================
// INTEGERS
// ============================================================================

// Integers go through ToInt32/ToInt64 and then wrap with `as`; there is no
// range check. Anything wider than 53 bits loses precision on the way out.
macro_rules! impl_integer {
    ($via:ty => $($ty:ty),*) => {
        $(
            impl<'js> Decode<'js> for $ty {
                fn decode(_scope: &Scope<'js>, value: Value<'js>) -> Result<Self> {
                    let Coerced(n) = value.get::<Coerced<$via>>()?;
                    Ok(n as $ty)
                }
            }
        )*
    };
}

impl_integer!(i32 => i8, i16, i32, u8, u16);
impl_integer!(i64 => u32, i64, u64, isize, usize);

macro_rules! impl_encode_int {
    ($($ty:ty),*) => {
        $(
            impl<'js> Encode<'js> for $ty {
                fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>> {
                    Ok(Value::new_int(scope.ctx().clone(), *self as i32))
                }
            }
        )*
    };
}

macro_rules! impl_encode_number {
    ($($ty:ty),*) => {
        $(
            impl<'js> Encode<'js> for $ty {
                fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>> {
                    Ok(Value::new_number(scope.ctx().clone(), *self as f64))
                }
            }
        )*
    };
}

impl_encode_int!(i8, i16, i32, u8, u16);
impl_encode_number!(u32, i64, u64, isize, usize);

// ============================================================================
// FLOATS
// ============================================================================

macro_rules! impl_float {
    ($($ty:ty),*) => {
        $(
            impl<'js> Decode<'js> for $ty {
                fn decode(_scope: &Scope<'js>, value: Value<'js>) -> Result<Self> {
                    let Coerced(n) = value.get::<Coerced<f64>>()?;
                    Ok(n as $ty)
                }
            }

            impl<'js> Encode<'js> for $ty {
                fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>> {
                    Ok(Value::new_float(scope.ctx().clone(), *self as f64))
                }
            }
        )*
    };
}

impl_float!(f32, f64);

// ============================================================================
// BOOL, STRINGS, UNIT
// ============================================================================

/// Truthiness coercion: `0`, `""`, `null` and `undefined` decode to `false`.
impl<'js> Decode<'js> for bool {
    fn decode(_scope: &Scope<'js>, value: Value<'js>) -> Result<Self> {
        let Coerced(b) = value.get::<Coerced<bool>>()?;
        Ok(b)
    }
}

impl<'js> Encode<'js> for bool {
    fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>> {
        Ok(Value::new_bool(scope.ctx().clone(), *self))
    }
}

/// Always a fresh owned copy of the ToString result.
impl<'js> Decode<'js> for String {
    fn decode(_scope: &Scope<'js>, value: Value<'js>) -> Result<Self> {
        let Coerced(s) = value.get::<Coerced<String>>()?;
        Ok(s)
    }
}

impl<'js> Encode<'js> for String {
    fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>> {
        self.as_str().encode(scope)
    }
}

// Encode only. A borrowed `&str` cannot be decoded because the engine string
// it would point into is not owned by the caller.
impl<'js> Encode<'js> for str {
    fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>> {
        let s = rquickjs::String::from_str(scope.ctx().clone(), self)?;
        Ok(s.into_value())
    }
}

impl<'js> Decode<'js> for () {
    fn decode(_scope: &Scope<'js>, _value: Value<'js>) -> Result<Self> {
        Ok(())
    }
}

impl<'js> Encode<'js> for () {
    fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>> {
        Ok(Value::new_undefined(scope.ctx().clone()))
    }
}

// ============================================================================
// HANDLES
// ============================================================================

impl<'js> Decode<'js> for Local<'js> {
    fn decode(scope: &Scope<'js>, value: Value<'js>) -> Result<Self> {
        Ok(scope.wrap(value))
    }
}

impl<'js> Encode<'js> for Local<'js> {
    fn encode(&self, _scope: &Scope<'js>) -> Result<Value<'js>> {
        Ok(self.value().clone())
    }
}

/// Roots the value, so native functions can keep script callbacks.
impl<'js> Decode<'js> for Persistent {
    fn decode(scope: &Scope<'js>, value: Value<'js>) -> Result<Self> {
        Ok(Persistent::new(&scope.wrap(value)))
    }
}

/// Fails with `EmptyHandle` when the handle is empty.
impl<'js> Encode<'js> for Persistent {
    fn encode(&self, scope: &Scope<'js>) -> Result<Value<'js>> {
        Ok(self.to_local(scope)?.into_value())
    }
}

impl<'js> Decode<'js> for Value<'js> {
    fn decode(_scope: &Scope<'js>, value: Value<'js>) -> Result<Self> {
        Ok(value)
    }
}

impl<'js> Encode<'js> for Value<'js> {
    fn encode(&self, _scope: &Scope<'js>) -> Result<Value<'js>> {
        Ok(self.clone())
    }
}

// ============================================================================
// ARGUMENT LISTS
// ============================================================================

/// Positional arguments for a native-to-script call
pub trait EncodeArgs<'js> {
    fn encode_args(self, scope: &Scope<'js>) -> Result<Vec<Value<'js>>>;
}

macro_rules! impl_encode_args {
    ($($arg:ident),*) => {
        impl<'js, $($arg: Encode<'js>),*> EncodeArgs<'js> for ($($arg,)*) {
            #[allow(non_snake_case, unused_variables)]
            fn encode_args(self, scope: &Scope<'js>) -> Result<Vec<Value<'js>>> {
                let ($($arg,)*) = self;
                Ok(vec![$($arg.encode(scope)?),*])
            }
        }
    };
}

impl_encode_args!();
impl_encode_args!(A0);
impl_encode_args!(A0, A1);
impl_encode_args!(A0, A1, A2);
impl_encode_args!(A0, A1, A2, A3);
impl_encode_args!(A0, A1, A2, A3, A4);
impl_encode_args!(A0, A1, A2, A3, A4, A5);
impl_encode_args!(A0, A1, A2, A3, A4, A5, A6);
impl_encode_args!(A0, A1, A2, A3, A4, A5, A6, A7);

impl<'js> EncodeArgs<'js> for Vec<Local<'js>> {
    fn encode_args(self, _scope: &Scope<'js>) -> Result<Vec<Value<'js>>> {
        Ok(self.into_iter().map(Local::into_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindConfig, BindingRegistry, Environment};

    fn env() -> Environment {
        Environment::initialize(BindConfig::default(), &BindingRegistry::new()).unwrap()
    }

    fn round_trip<T>(value: T) -> T
    where
        T: for<'js> Encode<'js> + for<'js> Decode<'js>,
    {
        let env = env();
        env.scope(|scope| scope.local(&value).unwrap().decode::<T>().unwrap())
    }

    #[test]
    fn test_primitive_round_trips() {
        assert!(round_trip(true));
        assert!(!round_trip(false));
        assert_eq!(round_trip(-100i8), -100);
        assert_eq!(round_trip(-30000i16), -30000);
        assert_eq!(round_trip(i32::MIN), i32::MIN);
        assert_eq!(round_trip(200u8), 200);
        assert_eq!(round_trip(60000u16), 60000);
        assert_eq!(round_trip(u32::MAX), u32::MAX);
        assert_eq!(round_trip(-(1i64 << 40)), -(1i64 << 40));
        assert_eq!(round_trip(1u64 << 52), 1u64 << 52);
        assert_eq!(round_trip(12345usize), 12345);
        assert_eq!(round_trip(0.5f32), 0.5);
        assert_eq!(round_trip(-3.25f64), -3.25);
        assert_eq!(round_trip(String::from("héllo")), "héllo");
    }

    #[test]
    fn test_integer_wraps() {
        let env = env();
        env.scope(|scope| {
            let big = scope.local(300).unwrap();
            assert_eq!(big.decode::<u8>().unwrap(), 44);

            let negative = scope.local(-1).unwrap();
            assert_eq!(negative.decode::<u16>().unwrap(), u16::MAX);

            let fraction = scope.local(7.9).unwrap();
            assert_eq!(fraction.decode::<i32>().unwrap(), 7);
        });
    }

    #[test]
    fn test_coercion_is_permissive() {
        let env = env();
        env.scope(|scope| {
            assert_eq!(scope.local("42").unwrap().decode::<i32>().unwrap(), 42);
            assert_eq!(scope.local(23).unwrap().decode::<String>().unwrap(), "23");
            assert!(!scope.local(0).unwrap().decode::<bool>().unwrap());
            assert!(scope.local("x").unwrap().decode::<bool>().unwrap());
            assert!(!scope.undefined().decode::<bool>().unwrap());
        });
    }

    #[test]
    fn test_unit_encodes_undefined() {
        let env = env();
        env.scope(|scope| {
            assert!(scope.local(()).unwrap().is_undefined());
        });
    }

    #[test]
    fn test_handle_identity() {
        let env = env();
        env.scope(|scope| {
            let obj = scope.object().unwrap();
            let again = scope.local(&obj).unwrap();
            assert!(again.strictly_equals(&obj).unwrap());
        });
    }

    #[test]
    fn test_encode_args() {
        let env = env();
        env.scope(|scope| {
            let args = (1, "two", 3.5, true).encode_args(scope).unwrap();
            assert_eq!(args.len(), 4);
            assert!(args[1].is_string());
            assert!(().encode_args(scope).unwrap().is_empty());
        });
    }
}
