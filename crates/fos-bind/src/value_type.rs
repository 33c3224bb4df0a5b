//! Value Types
//!
//! Plain structs marshalled field by field. A `ValueType<T>` lists typed
//! getter/setter pairs; decoding default-constructs `T` and fills each field
//! from the property with the same name, encoding builds a fresh plain object
//! with exactly those properties in registration order.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use rquickjs::{Object, Value};

use crate::convert::{Decode, Encode};
use crate::error::{BindError, Result};
use crate::value::{Scope, type_of};

/// Type-erased accessor for one field of `T`
trait FieldAccess<T>: Send + Sync {
    fn name(&self) -> &str;
    fn read<'js>(&self, scope: &Scope<'js>, target: &T) -> Result<Value<'js>>;
    fn write<'js>(&self, scope: &Scope<'js>, target: &mut T, value: Value<'js>) -> Result<()>;
}

struct Field<T, F, G, S> {
    name: String,
    get: G,
    set: S,
    _marker: PhantomData<fn(&T) -> F>,
}

impl<T, F, G, S> FieldAccess<T> for Field<T, F, G, S>
where
    F: for<'js> Decode<'js> + for<'js> Encode<'js>,
    G: Fn(&T) -> F + Send + Sync,
    S: Fn(&mut T, F) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn read<'js>(&self, scope: &Scope<'js>, target: &T) -> Result<Value<'js>> {
        (self.get)(target).encode(scope)
    }

    fn write<'js>(&self, scope: &Scope<'js>, target: &mut T, value: Value<'js>) -> Result<()> {
        let field = F::decode(scope, value)?;
        (self.set)(target, field);
        Ok(())
    }
}

/// Marshalling descriptor for a plain struct
pub struct ValueType<T> {
    name: String,
    fields: Vec<Box<dyn FieldAccess<T>>>,
}

impl<T: 'static> ValueType<T> {
    /// Start a descriptor exposed under `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field read with `get` and written with `set`
    pub fn field<F, G, S>(mut self, name: impl Into<String>, get: G, set: S) -> Self
    where
        F: for<'js> Decode<'js> + for<'js> Encode<'js> + 'static,
        G: Fn(&T) -> F + Send + Sync + 'static,
        S: Fn(&mut T, F) + Send + Sync + 'static,
    {
        self.fields.push(Box::new(Field {
            name: name.into(),
            get,
            set,
            _marker: PhantomData,
        }));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field names in registration order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name())
    }

    pub(crate) fn into_registered(self) -> Result<RegisteredValueType> {
        if self.fields.is_empty() {
            return Err(BindError::EmptyValueType(self.name));
        }

        Ok(RegisteredValueType {
            id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            name: self.name.clone(),
            descriptor: Arc::new(self),
        })
    }

    fn decode_object<'js>(&self, scope: &Scope<'js>, value: Value<'js>) -> Result<T>
    where
        T: Default,
    {
        let object = value
            .as_object()
            .ok_or_else(|| BindError::NotAnObject(type_of(&value)))?;

        let mut target = T::default();
        for field in &self.fields {
            let property: Value<'js> = object.get(field.name())?;
            field.write(scope, &mut target, property)?;
        }

        Ok(target)
    }

    fn encode_object<'js>(&self, scope: &Scope<'js>, source: &T) -> Result<Value<'js>> {
        let object = Object::new(scope.ctx().clone())?;
        for field in &self.fields {
            object.set(field.name(), field.read(scope, source)?)?;
        }

        Ok(object.into_value())
    }
}

impl<T> fmt::Debug for ValueType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueType")
            .field("name", &self.name)
            .field("fields", &self.fields.iter().map(|field| field.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// A validated descriptor waiting to be installed in an environment
pub(crate) struct RegisteredValueType {
    pub(crate) id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) name: String,
    descriptor: Arc<dyn Any + Send + Sync>,
}

// ============================================================================
// VALUE TYPE TABLE
// ============================================================================

/// Registered descriptors of one environment, keyed by Rust type
#[derive(Default)]
pub(crate) struct ValueTypes {
    table: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ValueTypes {
    pub(crate) fn install(&self, entries: Vec<RegisteredValueType>) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        for entry in entries {
            tracing::debug!(name = %entry.name, rust_type = entry.type_name, "Installed value type");
            table.insert(entry.id, entry.descriptor);
        }
    }

    pub(crate) fn get<T: 'static>(&self) -> Result<Arc<ValueType<T>>> {
        let descriptor = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or(BindError::NotRegistered(std::any::type_name::<T>()))?;

        descriptor
            .downcast::<ValueType<T>>()
            .map_err(|_| BindError::NotRegistered(std::any::type_name::<T>()))
    }

    pub(crate) fn clear(&self) {
        self.table.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Decode a registered value type. Used by [`value_type!`](crate::value_type).
pub fn decode_value_type<'js, T: Default + 'static>(scope: &Scope<'js>, value: Value<'js>) -> Result<T> {
    // The table lock is released before any field decoder runs script code.
    let descriptor = scope.shared().value_types.get::<T>()?;
    descriptor.decode_object(scope, value)
}

/// Encode a registered value type. Used by [`value_type!`](crate::value_type).
pub fn encode_value_type<'js, T: 'static>(scope: &Scope<'js>, source: &T) -> Result<Value<'js>> {
    let descriptor = scope.shared().value_types.get::<T>()?;
    descriptor.encode_object(scope, source)
}

/// Implement `Decode` and `Encode` for plain structs through their
/// registered `ValueType` descriptor.
///
/// The struct must implement `Default`.
///
/// ```ignore
/// #[derive(Default)]
/// struct Vec2 { x: f32, y: f32 }
/// fos_bind::value_type!(Vec2);
/// ```
#[macro_export]
macro_rules! value_type {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl<'js> $crate::Decode<'js> for $ty {
                fn decode(
                    scope: &$crate::Scope<'js>,
                    value: $crate::rquickjs::Value<'js>,
                ) -> $crate::Result<Self> {
                    $crate::decode_value_type(scope, value)
                }
            }

            impl<'js> $crate::Encode<'js> for $ty {
                fn encode(
                    &self,
                    scope: &$crate::Scope<'js>,
                ) -> $crate::Result<$crate::rquickjs::Value<'js>> {
                    $crate::encode_value_type(scope, self)
                }
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindConfig, BindingRegistry, Environment, Module};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Point {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Label {
        text: String,
        size: u32,
    }

    #[derive(Debug, Default)]
    struct Unbound {
        _id: i32,
    }

    crate::value_type!(Point, Label, Unbound);

    fn point_type() -> ValueType<Point> {
        ValueType::new("Point")
            .field("x", |p: &Point| p.x, |p: &mut Point, v| p.x = v)
            .field("y", |p: &Point| p.y, |p: &mut Point, v| p.y = v)
    }

    fn env() -> Environment {
        let mut registry = BindingRegistry::new();
        registry
            .register("shapes", |module: &mut Module| {
                module.expose_value_type(point_type())?;
                module.expose_value_type(
                    ValueType::<Label>::new("Label")
                        .field("text", |l: &Label| l.text.clone(), |l: &mut Label, v| l.text = v)
                        .field("size", |l: &Label| l.size, |l: &mut Label, v| l.size = v),
                )?;
                Ok(())
            })
            .unwrap();
        Environment::initialize(BindConfig::default(), &registry).unwrap()
    }

    #[test]
    fn test_field_names_keep_order() {
        let names: Vec<_> = point_type().field_names().map(str::to_string).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn test_empty_value_type_rejected() {
        let result = ValueType::<Point>::new("Nothing").into_registered();
        assert!(matches!(result, Err(BindError::EmptyValueType(name)) if name == "Nothing"));
    }

    #[test]
    fn test_round_trip() {
        let env = env();
        env.scope(|scope| {
            let label = Label {
                text: "caption".into(),
                size: 12,
            };
            let encoded = scope.local(&label).unwrap();
            assert_eq!(encoded.get("text").unwrap().decode::<String>().unwrap(), "caption");
            assert_eq!(encoded.decode::<Label>().unwrap(), label);

            let point = Point { x: 1.5, y: -2.0 };
            assert_eq!(scope.local(&point).unwrap().decode::<Point>().unwrap(), point);
        });
    }

    #[test]
    fn test_encoded_object_has_exactly_registered_fields() {
        let env = env();
        env.scope(|scope| {
            let encoded = scope.local(Point { x: 1.0, y: 2.0 }).unwrap();

            let mut keys = Vec::new();
            encoded
                .for_each(|key, _| {
                    keys.push(key.decode::<String>().unwrap());
                    true
                })
                .unwrap();
            assert_eq!(keys, vec!["x", "y"]);
        });
    }

    #[test]
    fn test_missing_properties_use_engine_coercion() {
        let env = env();
        env.scope(|scope| {
            scope.run_script("var partial = { text: 'only text' };", None);
            let label: Label = scope.global_property("partial").unwrap().decode().unwrap();
            assert_eq!(label.text, "only text");
            assert_eq!(label.size, 0);
        });
    }

    #[test]
    fn test_unregistered_type() {
        let env = env();
        env.scope(|scope| {
            let result = scope.local(Unbound::default());
            assert!(matches!(result, Err(BindError::NotRegistered(_))));

            let obj = scope.object().unwrap();
            assert!(matches!(obj.decode::<Unbound>(), Err(BindError::NotRegistered(_))));
        });
    }

    #[test]
    fn test_decode_primitive_fails() {
        let env = env();
        env.scope(|scope| {
            let number = scope.local(3).unwrap();
            assert!(matches!(number.decode::<Point>(), Err(BindError::NotAnObject("number"))));
        });
    }

    #[test]
    fn test_table_cleared() {
        let table = ValueTypes::default();
        table.install(vec![point_type().into_registered().unwrap()]);
        assert_eq!(table.len(), 1);
        assert!(table.get::<Point>().is_ok());

        table.clear();
        assert_eq!(table.len(), 0);
        assert!(matches!(table.get::<Point>(), Err(BindError::NotRegistered(_))));
    }
}
