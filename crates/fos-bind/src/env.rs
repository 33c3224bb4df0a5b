//! Binding Environment
//!
//! Owns the QuickJS runtime and context, the installed bindings, and the
//! handlers the exception and console bridges report to.

use std::cell::{Cell, OnceCell};
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::{Arc, PoisonError, RwLock};

use rquickjs::{Context, Runtime};

use crate::bindings::{BindingRegistry, Module};
use crate::config::BindConfig;
use crate::console::{self, Console, TracingConsole};
use crate::error::{BindError, Result};
use crate::exception::{DefaultExceptionHandler, ExceptionHandler};
use crate::value::{Comparators, Roots, Scope};
use crate::value_type::ValueTypes;

/// Backend-dependent operations and whether they are available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `Local::construct`
    pub construct: bool,
    /// `Local::equals` and `Local::strictly_equals`
    pub equality: bool,
    /// `Local::has_own_property` tells own from inherited properties
    pub own_properties: bool,
}

pub(crate) const QUICKJS_CAPABILITIES: Capabilities = Capabilities {
    construct: true,
    equality: true,
    own_properties: true,
};

/// State shared between the environment and the functions it installed
#[derive(Default)]
pub(crate) struct Shared {
    exception_handler: RwLock<Option<Arc<dyn ExceptionHandler>>>,
    console: RwLock<Option<Arc<dyn Console>>>,
    pub(crate) value_types: ValueTypes,
    pub(crate) roots: Roots,
    pub(crate) comparators: OnceCell<Comparators>,
}

impl Shared {
    pub(crate) fn exception_handler(&self) -> Option<Arc<dyn ExceptionHandler>> {
        self.exception_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_exception_handler(&self, handler: Option<Arc<dyn ExceptionHandler>>) {
        *self
            .exception_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub(crate) fn console(&self) -> Option<Arc<dyn Console>> {
        self.console
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_console(&self, console: Option<Arc<dyn Console>>) {
        *self.console.write().unwrap_or_else(PoisonError::into_inner) = console;
    }
}

/// A running engine with bindings installed.
///
/// Confined to the thread that created it. Teardown releases every
/// `Persistent` still holding a value from it; those handles are empty
/// afterwards.
pub struct Environment {
    // context is released before the runtime
    context: Context,
    runtime: Runtime,
    shared: Rc<Shared>,
    config: BindConfig,
    deinitializers: Vec<Box<dyn FnOnce()>>,
    entered: Cell<usize>,
    torn_down: bool,
    _not_send: PhantomData<*const ()>,
}

impl Environment {
    /// Create the engine, run every provider in `registry` once and install
    /// the resulting bindings on the namespace object.
    pub fn initialize(config: BindConfig, registry: &BindingRegistry) -> Result<Self> {
        let runtime = Runtime::new()?;
        if let Some(limit) = config.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(size) = config.max_stack_size {
            runtime.set_max_stack_size(size);
        }
        if let Some(threshold) = config.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }

        let context = Context::full(&runtime)?;

        let shared = Rc::new(Shared::default());
        shared.set_exception_handler(Some(Arc::new(DefaultExceptionHandler)));
        shared.set_console(Some(Arc::new(TracingConsole)));

        let mut module = Module::new();
        registry.populate(&mut module)?;

        let env = Self {
            context,
            runtime,
            shared,
            config,
            deinitializers: module.take_deinitializers(),
            entered: Cell::new(0),
            torn_down: false,
            _not_send: PhantomData,
        };

        env.install(&module)?;
        env.shared.value_types.install(module.take_value_types());

        tracing::info!(
            namespace = %env.config.namespace,
            providers = registry.len(),
            value_types = env.shared.value_types.len(),
            "Binding environment initialized"
        );

        Ok(env)
    }

    fn install(&self, module: &Module) -> Result<()> {
        let install_console = self.config.install_console;
        let namespace = self.config.namespace.clone();

        self.scope(|scope| -> Result<()> {
            Comparators::install(scope)?;
            if install_console {
                console::install_console(scope.ctx(), scope.shared())?;
            }

            let object = scope.object()?;
            module.install(&object)?;
            scope.global().set(namespace.as_str(), object)
        })
    }

    /// Run deinitializers, clear value types and outstanding handles, then
    /// release the engine
    pub fn deinitialize(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if self.entered.get() > 0 {
            tracing::warn!(depth = self.entered.get(), "Deinitializing while context is entered");
            self.entered.set(0);
        }

        let deinitializers = std::mem::take(&mut self.deinitializers);
        tracing::debug!(count = deinitializers.len(), "Running deinitializers");
        for deinitialize in deinitializers {
            deinitialize();
        }

        self.shared.value_types.clear();

        let released = self.shared.roots.release_all();
        tracing::debug!(count = released, "Released outstanding handles");

        tracing::info!(namespace = %self.config.namespace, "Binding environment deinitialized");
    }

    pub fn config(&self) -> &BindConfig {
        &self.config
    }

    /// Operations the QuickJS backend supports
    pub fn capabilities(&self) -> Capabilities {
        QUICKJS_CAPABILITIES
    }

    /// Mark the context as entered by the current thread.
    ///
    /// QuickJS needs no lock here; the environment cannot leave its thread.
    pub fn enter_context(&self) {
        self.entered.set(self.entered.get() + 1);
    }

    /// Undo one `enter_context`
    pub fn exit_context(&self) -> Result<()> {
        match self.entered.get() {
            0 => Err(BindError::ContextNotEntered),
            depth => {
                self.entered.set(depth - 1);
                Ok(())
            }
        }
    }

    pub fn is_entered(&self) -> bool {
        self.entered.get() > 0
    }

    /// Enter the engine and run `f` with a fresh scope
    pub fn scope<R>(&self, f: impl for<'js> FnOnce(&Scope<'js>) -> R) -> R {
        self.context.with(|ctx| {
            let scope = Scope::new(ctx, self.shared.clone());
            f(&scope)
        })
    }

    /// Run `source` as global code, reporting failures to the exception handler
    pub fn run_script(&self, source: &str, name: Option<&str>) {
        self.scope(|scope| scope.run_script(source, name));
    }

    pub fn set_exception_handler(&self, handler: Arc<dyn ExceptionHandler>) {
        self.shared.set_exception_handler(Some(handler));
    }

    pub fn set_default_exception_handler(&self) {
        self.shared
            .set_exception_handler(Some(Arc::new(DefaultExceptionHandler)));
    }

    /// Drop all exception reports
    pub fn clear_exception_handler(&self) {
        self.shared.set_exception_handler(None);
    }

    pub fn set_console(&self, console: Arc<dyn Console>) {
        self.shared.set_console(Some(console));
    }

    pub fn set_default_console(&self) {
        self.shared.set_console(Some(Arc::new(TracingConsole)));
    }

    /// Drop all console output
    pub fn clear_console(&self) {
        self.shared.set_console(None);
    }

    /// Run a full garbage collection cycle
    pub fn run_gc(&self) {
        self.runtime.run_gc();
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_initialize_empty() {
        let env = Environment::initialize(BindConfig::default(), &BindingRegistry::new()).unwrap();
        assert_eq!(env.capabilities(), QUICKJS_CAPABILITIES);

        env.scope(|scope| {
            let namespace = scope.global_property("Module").unwrap();
            assert_eq!(namespace.type_of(), "object");
            assert_eq!(scope.global_property("console").unwrap().type_of(), "object");
        });
    }

    #[test]
    fn test_custom_namespace_without_console() {
        let config = BindConfig {
            install_console: false,
            ..BindConfig::default().with_namespace("Native")
        };
        let env = Environment::initialize(config, &BindingRegistry::new()).unwrap();

        env.scope(|scope| {
            assert_eq!(scope.global_property("Native").unwrap().type_of(), "object");
            assert!(scope.global_property("Module").unwrap().is_undefined());
            assert!(scope.global_property("console").unwrap().is_undefined());
        });
    }

    #[test]
    fn test_enter_exit_context() {
        let env = Environment::initialize(BindConfig::default(), &BindingRegistry::new()).unwrap();
        assert!(!env.is_entered());
        assert!(matches!(env.exit_context(), Err(BindError::ContextNotEntered)));

        env.enter_context();
        env.enter_context();
        assert!(env.is_entered());
        env.exit_context().unwrap();
        assert!(env.is_entered());
        env.exit_context().unwrap();
        assert!(!env.is_entered());
    }

    #[test]
    fn test_deinitializers_run_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = BindingRegistry::new();
        let counter = runs.clone();
        registry
            .register("cleanup", move |module: &mut Module| {
                let counter = counter.clone();
                module.on_deinitialize(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                Ok(())
            })
            .unwrap();

        let env = Environment::initialize(BindConfig::default(), &registry).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        env.deinitialize();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // a second bring-up runs the provider again
        let env = Environment::initialize(BindConfig::default(), &registry).unwrap();
        drop(env);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_provider_aborts_initialize() {
        let mut registry = BindingRegistry::new();
        registry
            .register("broken", |module: &mut Module| {
                module.expose_function("f", || 1)?;
                module.expose_function("f", || 2)?;
                Ok(())
            })
            .unwrap();

        let result = Environment::initialize(BindConfig::default(), &registry);
        assert!(matches!(result, Err(BindError::DuplicateBinding(_))));
    }

    #[test]
    fn test_run_gc() {
        let env = Environment::initialize(BindConfig::default(), &BindingRegistry::new()).unwrap();
        env.run_script("var garbage = []; for (var i = 0; i < 100; i++) garbage.push({ i: i }); garbage = null;", None);
        env.run_gc();
    }
}
