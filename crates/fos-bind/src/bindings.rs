//! Binding Registry
//!
//! Providers are registered by name on a `BindingRegistry`, in the order
//! they should run. When an environment starts, each provider fills the
//! shared `Module` exactly once, and the module is then installed on the
//! namespace object.

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;

use crate::call::{IntoNativeFunction, NativeFunction};
use crate::error::{BindError, Result};
use crate::value::Local;
use crate::value_type::{RegisteredValueType, ValueType};

/// A named grouping object with static functions attached.
///
/// Only a namespace: no constructor, prototype or instances.
pub struct ClassBinding {
    name: String,
    functions: Vec<NativeFunction>,
}

impl ClassBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    /// Attach a class-level function
    pub fn function<F, Args>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: IntoNativeFunction<Args>,
        Args: 'static,
    {
        self.functions.push(NativeFunction::new(name, f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn functions(&self) -> &[NativeFunction] {
        &self.functions
    }
}

impl fmt::Debug for ClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassBinding")
            .field("name", &self.name)
            .field("functions", &self.functions)
            .finish()
    }
}

/// Everything the providers expose, collected before installation
#[derive(Default)]
pub struct Module {
    names: HashSet<String>,
    functions: Vec<NativeFunction>,
    classes: Vec<ClassBinding>,
    value_types: Vec<RegisteredValueType>,
    value_type_ids: HashSet<TypeId>,
    deinitializers: Vec<Box<dyn FnOnce()>>,
}

impl Module {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn claim(&mut self, name: &str) -> Result<()> {
        if !self.names.insert(name.to_string()) {
            return Err(BindError::DuplicateBinding(name.to_string()));
        }
        Ok(())
    }

    /// Install `f` under `name` on the namespace object
    pub fn expose_function<F, Args>(&mut self, name: impl Into<String>, f: F) -> Result<&mut Self>
    where
        F: IntoNativeFunction<Args>,
        Args: 'static,
    {
        let function = NativeFunction::new(name, f);
        self.claim(function.name())?;
        self.functions.push(function);
        Ok(self)
    }

    /// Install a class grouping object on the namespace object
    pub fn expose_class(&mut self, class: ClassBinding) -> Result<&mut Self> {
        let mut seen = HashSet::new();
        for function in &class.functions {
            if !seen.insert(function.name()) {
                return Err(BindError::DuplicateBinding(format!(
                    "{}.{}",
                    class.name,
                    function.name()
                )));
            }
        }

        self.claim(&class.name)?;
        self.classes.push(class);
        Ok(self)
    }

    /// Register the marshalling descriptor of a plain struct
    pub fn expose_value_type<T: 'static>(&mut self, value_type: ValueType<T>) -> Result<&mut Self> {
        let registered = value_type.into_registered()?;
        if !self.value_type_ids.insert(registered.id) {
            return Err(BindError::AlreadyRegistered(registered.type_name));
        }

        self.value_types.push(registered);
        Ok(self)
    }

    /// Run `callback` when the environment is deinitialized
    pub fn on_deinitialize(&mut self, callback: impl FnOnce() + 'static) -> &mut Self {
        self.deinitializers.push(Box::new(callback));
        self
    }

    /// Set every function and class on `namespace`
    pub(crate) fn install(&self, namespace: &Local<'_>) -> Result<()> {
        let scope = namespace.scope();

        for function in &self.functions {
            namespace.set(function.name(), function.to_function(scope)?.into_value())?;
        }

        for class in &self.classes {
            let object = scope.object()?;
            for function in &class.functions {
                object.set(function.name(), function.to_function(scope)?.into_value())?;
            }
            namespace.set(class.name(), object)?;
        }

        Ok(())
    }

    pub(crate) fn take_value_types(&mut self) -> Vec<RegisteredValueType> {
        self.value_type_ids.clear();
        std::mem::take(&mut self.value_types)
    }

    pub(crate) fn take_deinitializers(&mut self) -> Vec<Box<dyn FnOnce()>> {
        std::mem::take(&mut self.deinitializers)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("functions", &self.functions)
            .field("classes", &self.classes)
            .field("value_types", &self.value_types.len())
            .field("deinitializers", &self.deinitializers.len())
            .finish()
    }
}

type Provider = Box<dyn Fn(&mut Module) -> Result<()>>;

/// Ordered list of named binding providers
#[derive(Default)]
pub struct BindingRegistry {
    providers: Vec<(String, Provider)>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider; names must be unique
    pub fn register(
        &mut self,
        name: impl Into<String>,
        provider: impl Fn(&mut Module) -> Result<()> + 'static,
    ) -> Result<&mut Self> {
        let name = name.into();
        if self.providers.iter().any(|(existing, _)| *existing == name) {
            return Err(BindError::DuplicateProvider(name));
        }

        self.providers.push((name, Box::new(provider)));
        Ok(self)
    }

    /// Provider names in run order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Run every provider once, in registration order
    pub(crate) fn populate(&self, module: &mut Module) -> Result<()> {
        for (name, provider) in &self.providers {
            tracing::debug!(provider = %name, "Running binding provider");
            provider(module)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_duplicate_provider() {
        let mut registry = BindingRegistry::new();
        registry.register("math", |_: &mut Module| Ok(())).unwrap();
        let result = registry.register("math", |_: &mut Module| Ok(()));
        assert!(matches!(result, Err(BindError::DuplicateProvider(name)) if name == "math"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_providers_run_in_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = BindingRegistry::new();

        for name in ["first", "second", "third"] {
            let order = order.clone();
            registry
                .register(name, move |_: &mut Module| {
                    order.lock().unwrap().push(name);
                    Ok(())
                })
                .unwrap();
        }

        let mut module = Module::new();
        registry.populate(&mut module).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_duplicate_binding_names() {
        let mut module = Module::new();
        module.expose_function("sum", |a: i32, b: i32| a + b).unwrap();

        let result = module.expose_function("sum", |a: f64, b: f64| a + b);
        assert!(matches!(result, Err(BindError::DuplicateBinding(name)) if name == "sum"));

        let result = module.expose_class(ClassBinding::new("sum"));
        assert!(matches!(result, Err(BindError::DuplicateBinding(_))));

        let class = ClassBinding::new("Math")
            .function("abs", |a: f64| a.abs())
            .function("abs", |a: i32| a.abs());
        let result = module.expose_class(class);
        assert!(matches!(result, Err(BindError::DuplicateBinding(name)) if name == "Math.abs"));
    }

    #[derive(Default)]
    struct Size {
        w: u32,
    }

    #[test]
    fn test_duplicate_value_type() {
        let mut module = Module::new();
        let size = || ValueType::<Size>::new("Size").field("w", |s: &Size| s.w, |s: &mut Size, v| s.w = v);

        module.expose_value_type(size()).unwrap();
        let result = module.expose_value_type(size());
        assert!(matches!(result, Err(BindError::AlreadyRegistered(_))));

        let result = module.expose_value_type(ValueType::<Size>::new("Empty"));
        assert!(matches!(result, Err(BindError::EmptyValueType(_))));
    }

    #[test]
    fn test_deinitializers_collected() {
        let mut module = Module::new();
        module.on_deinitialize(|| {}).on_deinitialize(|| {});
        assert_eq!(module.take_deinitializers().len(), 2);
        assert!(module.take_deinitializers().is_empty());
    }
}
