//! Value Handles
//!
//! `Scope`, `Local` and `Persistent`: the handle types native code uses to
//! hold on to JavaScript values.
//!
//! QuickJS reference counts its values. A `Local<'js>` is tied to the `'js`
//! lifetime of the context entry that produced it, so the borrow checker
//! rejects keeping one past its scope. A `Persistent` owns an independent
//! engine reference and stays valid until it is reset or dropped, or until
//! its `Environment` is torn down. Teardown releases every outstanding root
//! and the handles holding them read as empty from then on.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use rquickjs::function::Args;
use rquickjs::{Array, CatchResultExt, CaughtError, Ctx, Filter, Function, Object, Value};

use crate::convert::{Decode, Encode, EncodeArgs};
use crate::env::{Capabilities, QUICKJS_CAPABILITIES, Shared};
use crate::error::{BindError, Result};
use crate::exception;

/// Classify a raw engine value with the fixed `typeof` cascade.
///
/// `null` is an object here, just like the native `typeof`.
pub(crate) fn type_of(value: &Value<'_>) -> &'static str {
    if value.is_undefined() {
        "undefined"
    } else if value.is_bool() {
        "boolean"
    } else if value.is_number() {
        "number"
    } else if value.is_string() {
        "string"
    } else if value.is_function() {
        "function"
    } else {
        "object"
    }
}

// ============================================================================
// SCOPE
// ============================================================================

/// An active entry into the engine.
///
/// Every `Local` is created through a scope and cannot outlive it.
#[derive(Clone)]
pub struct Scope<'js> {
    ctx: Ctx<'js>,
    shared: Rc<Shared>,
}

impl<'js> Scope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>, shared: Rc<Shared>) -> Self {
        Self { ctx, shared }
    }

    /// Underlying QuickJS context
    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    pub(crate) fn shared(&self) -> &Rc<Shared> {
        &self.shared
    }

    /// Operations this backend supports
    pub fn capabilities(&self) -> Capabilities {
        QUICKJS_CAPABILITIES
    }

    /// Run `f` inside a nested scope.
    pub fn nested<R>(&self, f: impl FnOnce(&Scope<'js>) -> R) -> R {
        let inner = self.clone();
        f(&inner)
    }

    pub(crate) fn wrap(&self, value: Value<'js>) -> Local<'js> {
        Local {
            scope: self.clone(),
            value,
        }
    }

    /// The `undefined` value
    pub fn undefined(&self) -> Local<'js> {
        self.wrap(Value::new_undefined(self.ctx.clone()))
    }

    /// The `null` value
    pub fn null(&self) -> Local<'js> {
        self.wrap(Value::new_null(self.ctx.clone()))
    }

    /// A fresh empty object
    pub fn object(&self) -> Result<Local<'js>> {
        let object = Object::new(self.ctx.clone())?;
        Ok(self.wrap(object.into_value()))
    }

    /// A fresh empty array
    pub fn array(&self) -> Result<Local<'js>> {
        let array = Array::new(self.ctx.clone())?;
        Ok(self.wrap(array.into_value()))
    }

    /// Encode a native value into a local handle
    pub fn local<T: Encode<'js>>(&self, value: T) -> Result<Local<'js>> {
        Ok(self.wrap(value.encode(self)?))
    }

    /// The global object
    pub fn global(&self) -> Local<'js> {
        self.wrap(self.ctx.globals().into_value())
    }

    /// A property of the global object
    pub fn global_property(&self, name: &str) -> Result<Local<'js>> {
        self.global().get(name)
    }

    /// Compile and run `source` as global code.
    ///
    /// Nothing is returned: a thrown exception or compile error is reported
    /// to the installed exception handler. QuickJS compiles every script
    /// under the same file name, so `name` only labels the report and its
    /// stack trace.
    pub fn run_script(&self, source: &str, name: Option<&str>) {
        tracing::debug!(script = name.unwrap_or("<anonymous>"), len = source.len(), "Running script");

        let mut options = rquickjs::context::EvalOptions::default();
        options.strict = false;

        if let Err(caught) = self
            .ctx
            .eval_with_options::<(), _>(source, options)
            .catch(&self.ctx)
        {
            self.report(caught, name);
        }
    }

    pub(crate) fn report(&self, caught: CaughtError<'js>, script: Option<&str>) {
        exception::report(&self.shared, caught, script);
    }

    /// Settle a native-to-script call: exceptions go to the handler and the
    /// call yields `undefined`.
    pub(crate) fn guard(&self, result: rquickjs::Result<Value<'js>>) -> Value<'js> {
        match result.catch(&self.ctx) {
            Ok(value) => value,
            Err(caught) => {
                self.report(caught, None);
                Value::new_undefined(self.ctx.clone())
            }
        }
    }

    /// Settle an internal call: exceptions become a `BindError`.
    pub(crate) fn check<T>(&self, result: rquickjs::Result<T>) -> Result<T> {
        result
            .catch(&self.ctx)
            .map_err(|caught| BindError::Script(exception::describe(caught)))
    }
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").finish_non_exhaustive()
    }
}

// ============================================================================
// PROPERTY KEYS
// ============================================================================

/// A key usable with `Local::get` and `Local::set`.
///
/// Integer keys use indexed access; strings and handles use named access.
/// Integers outside the `u32` index range (negative or too wide) name the
/// property by their decimal string, as script would.
pub trait PropertyKey<'js> {
    fn get_from(&self, object: &Object<'js>) -> Result<Value<'js>>;
    fn set_on(&self, object: &Object<'js>, value: Value<'js>) -> Result<()>;
}

macro_rules! impl_index_key {
    ($($ty:ty),*) => {
        $(
            impl<'js> PropertyKey<'js> for $ty {
                fn get_from(&self, object: &Object<'js>) -> Result<Value<'js>> {
                    match u32::try_from(*self) {
                        Ok(index) => Ok(object.get::<u32, Value<'js>>(index)?),
                        Err(_) => self.to_string().get_from(object),
                    }
                }

                fn set_on(&self, object: &Object<'js>, value: Value<'js>) -> Result<()> {
                    match u32::try_from(*self) {
                        Ok(index) => Ok(object.set(index, value)?),
                        Err(_) => self.to_string().set_on(object, value),
                    }
                }
            }
        )*
    };
}

impl_index_key!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl<'js> PropertyKey<'js> for &str {
    fn get_from(&self, object: &Object<'js>) -> Result<Value<'js>> {
        Ok(object.get::<&str, Value<'js>>(self)?)
    }

    fn set_on(&self, object: &Object<'js>, value: Value<'js>) -> Result<()> {
        Ok(object.set(*self, value)?)
    }
}

impl<'js> PropertyKey<'js> for String {
    fn get_from(&self, object: &Object<'js>) -> Result<Value<'js>> {
        self.as_str().get_from(object)
    }

    fn set_on(&self, object: &Object<'js>, value: Value<'js>) -> Result<()> {
        self.as_str().set_on(object, value)
    }
}

impl<'js> PropertyKey<'js> for &String {
    fn get_from(&self, object: &Object<'js>) -> Result<Value<'js>> {
        self.as_str().get_from(object)
    }

    fn set_on(&self, object: &Object<'js>, value: Value<'js>) -> Result<()> {
        self.as_str().set_on(object, value)
    }
}

impl<'js> PropertyKey<'js> for Local<'js> {
    fn get_from(&self, object: &Object<'js>) -> Result<Value<'js>> {
        let name: String = self.decode()?;
        name.get_from(object)
    }

    fn set_on(&self, object: &Object<'js>, value: Value<'js>) -> Result<()> {
        let name: String = self.decode()?;
        name.set_on(object, value)
    }
}

impl<'js> PropertyKey<'js> for &Local<'js> {
    fn get_from(&self, object: &Object<'js>) -> Result<Value<'js>> {
        <Local<'js> as PropertyKey<'js>>::get_from(self, object)
    }

    fn set_on(&self, object: &Object<'js>, value: Value<'js>) -> Result<()> {
        <Local<'js> as PropertyKey<'js>>::set_on(self, object, value)
    }
}

// ============================================================================
// LOCAL
// ============================================================================

/// Scoped handle to a JavaScript value
#[derive(Clone)]
pub struct Local<'js> {
    scope: Scope<'js>,
    value: Value<'js>,
}

impl<'js> Local<'js> {
    /// Scope this handle belongs to
    pub fn scope(&self) -> &Scope<'js> {
        &self.scope
    }

    /// Raw engine value
    pub fn value(&self) -> &Value<'js> {
        &self.value
    }

    pub fn into_value(self) -> Value<'js> {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn is_undefined(&self) -> bool {
        self.value.is_undefined()
    }

    pub fn is_true(&self) -> bool {
        self.value.as_bool() == Some(true)
    }

    pub fn is_false(&self) -> bool {
        self.value.as_bool() == Some(false)
    }

    /// One of "undefined", "boolean", "number", "string", "function" or "object"
    pub fn type_of(&self) -> &'static str {
        type_of(&self.value)
    }

    /// Convert to a native value
    pub fn decode<T: Decode<'js>>(&self) -> Result<T> {
        T::decode(&self.scope, self.value.clone())
    }

    fn as_object(&self) -> Result<&Object<'js>> {
        self.value
            .as_object()
            .ok_or_else(|| BindError::NotAnObject(self.type_of()))
    }

    /// Whether `name` is an own (not inherited) property.
    ///
    /// Non-objects have no own properties. Non-enumerable properties count.
    pub fn has_own_property(&self, name: &str) -> Result<bool> {
        let Some(object) = self.value.as_object() else {
            return Ok(false);
        };

        for key in object.own_keys::<String>(Filter::new().string()) {
            if self.scope.check(key)? == name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Read a property
    pub fn get<K: PropertyKey<'js>>(&self, key: K) -> Result<Local<'js>> {
        let value = key.get_from(self.as_object()?)?;
        Ok(self.scope.wrap(value))
    }

    /// Write a property
    pub fn set<K: PropertyKey<'js>, V: Encode<'js>>(&self, key: K, value: V) -> Result<()> {
        let value = value.encode(&self.scope)?;
        key.set_on(self.as_object()?, value)
    }

    /// Call method `name` with this value as the receiver
    pub fn call<R: Decode<'js>>(&self, name: &str, args: impl EncodeArgs<'js>) -> Result<R> {
        let method: Value<'js> = self.as_object()?.get(name)?;
        let args = args.encode_args(&self.scope)?;
        let result = self.call_with(&method, self.value.clone(), args)?;
        R::decode(&self.scope, result)
    }

    /// Call this value as a function with the global object as `this`
    pub fn invoke(&self, args: impl EncodeArgs<'js>) -> Result<Local<'js>> {
        let args = args.encode_args(&self.scope)?;
        let global = self.scope.ctx().globals().into_value();
        let result = self.call_with(&self.value, global, args)?;
        Ok(self.scope.wrap(result))
    }

    /// Call this value as a constructor (`new value(...args)`)
    pub fn construct(&self, args: impl EncodeArgs<'js>) -> Result<Local<'js>> {
        let constructor = self
            .value
            .as_constructor()
            .ok_or_else(|| BindError::NotAConstructor(self.type_of()))?;

        let args = args.encode_args(&self.scope)?;
        let mut construct_args = Args::new(self.scope.ctx().clone(), args.len());
        construct_args.push_args(args)?;

        let result = self
            .scope
            .guard(construct_args.construct::<Value<'js>>(constructor));
        Ok(self.scope.wrap(result))
    }

    fn call_with(
        &self,
        function: &Value<'js>,
        this: Value<'js>,
        args: Vec<Value<'js>>,
    ) -> Result<Value<'js>> {
        let function = function
            .as_function()
            .ok_or_else(|| BindError::NotAFunction(type_of(function)))?;

        let mut call_args = Args::new(self.scope.ctx().clone(), args.len());
        call_args.this(this)?;
        for arg in args {
            call_args.push_arg(arg)?;
        }

        Ok(self.scope.guard(function.call_arg::<Value<'js>>(call_args)))
    }

    /// Loose equality (`==`)
    pub fn equals(&self, other: &Local<'js>) -> Result<bool> {
        self.compare(|comparators| &comparators.loose, other)
    }

    /// Strict equality (`===`)
    pub fn strictly_equals(&self, other: &Local<'js>) -> Result<bool> {
        self.compare(|comparators| &comparators.strict, other)
    }

    fn compare(
        &self,
        pick: impl FnOnce(&Comparators) -> &Persistent,
        other: &Local<'js>,
    ) -> Result<bool> {
        let comparators = self
            .scope
            .shared
            .comparators
            .get()
            .ok_or(BindError::EmptyHandle)?;
        let local = pick(comparators).to_local(&self.scope)?;
        let compare = local
            .value
            .as_function()
            .ok_or_else(|| BindError::NotAFunction(local.type_of()))?;

        self.scope
            .check(compare.call((self.value.clone(), other.value.clone())))
    }

    /// Visit own enumerable properties, see [`foreach`]
    pub fn for_each<F>(&self, visit: F) -> Result<()>
    where
        F: FnMut(Local<'js>, Local<'js>) -> bool,
    {
        foreach(self, visit)
    }
}

impl fmt::Debug for Local<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Local")
            .field("type", &self.type_of())
            .field("value", &self.value)
            .finish()
    }
}

/// Visit the own enumerable properties of `object` in engine order.
///
/// Stops at the first `false` returned by `visit`.
pub fn foreach<'js, F>(object: &Local<'js>, mut visit: F) -> Result<()>
where
    F: FnMut(Local<'js>, Local<'js>) -> bool,
{
    let target = object.as_object()?;
    let scope = object.scope();

    for key in target.keys::<String>() {
        let key = key?;
        let value: Value<'js> = target.get(key.as_str())?;
        if !visit(scope.local(key.as_str())?, scope.wrap(value)) {
            break;
        }
    }

    Ok(())
}

/// Decode an array-like value element by element.
///
/// `length` is read once up front.
pub fn vec_from_array<'js, T: Decode<'js>>(array: &Local<'js>) -> Result<Vec<T>> {
    let length: u32 = array.get("length")?.decode()?;

    let mut items = Vec::with_capacity(length as usize);
    for index in 0..length {
        items.push(array.get(index)?.decode()?);
    }

    Ok(items)
}

// ============================================================================
// PERSISTENT
// ============================================================================

type Root = rquickjs::Persistent<Value<'static>>;
type Slot = Rc<RefCell<Option<Root>>>;

/// Every root an environment has handed out, so teardown can release the
/// ones still held before the engine goes away
#[derive(Default)]
pub(crate) struct Roots {
    slots: RefCell<Vec<Weak<RefCell<Option<Root>>>>>,
}

impl Roots {
    fn track(&self, root: Root) -> Slot {
        let slot = Rc::new(RefCell::new(Some(root)));

        let mut slots = self.slots.borrow_mut();
        if slots.len() == slots.capacity() {
            slots.retain(|weak| weak.strong_count() > 0);
        }
        slots.push(Rc::downgrade(&slot));

        slot
    }

    /// Release every root still held; returns how many there were
    pub(crate) fn release_all(&self) -> usize {
        let slots = std::mem::take(&mut *self.slots.borrow_mut());

        let mut released = 0;
        for slot in slots.iter().filter_map(Weak::upgrade) {
            let root = slot.borrow_mut().take();
            if root.is_some() {
                released += 1;
            }
        }
        released
    }
}

/// `==` and `===`, compiled once per environment
pub(crate) struct Comparators {
    loose: Persistent,
    strict: Persistent,
}

impl Comparators {
    pub(crate) fn install<'js>(scope: &Scope<'js>) -> Result<()> {
        let compile = |source: &str| -> Result<Persistent> {
            let function: Function<'js> = scope.check(scope.ctx().eval(source))?;
            Ok(Persistent::new(&scope.wrap(function.into_value())))
        };

        let comparators = Comparators {
            loose: compile("(function (a, b) { return a == b; })")?,
            strict: compile("(function (a, b) { return a === b; })")?,
        };
        // a second install keeps the first pair
        let _ = scope.shared.comparators.set(comparators);
        Ok(())
    }
}

/// Durable handle to a JavaScript value.
///
/// Clones share the same engine reference. The empty state is distinct from
/// holding `undefined`. A handle that outlives its environment is released
/// at teardown and reads as empty afterwards.
#[derive(Clone, Default)]
pub struct Persistent {
    slot: Option<Slot>,
}

impl Persistent {
    /// An empty handle
    pub fn empty() -> Self {
        Self::default()
    }

    /// Root the value behind `local`
    pub fn new(local: &Local<'_>) -> Self {
        let root = rquickjs::Persistent::save(local.scope.ctx(), local.value.clone());
        Self {
            slot: Some(local.scope.shared.roots.track(root)),
        }
    }

    /// Release the held reference, if any
    pub fn reset(&mut self) {
        self.slot = None;
    }

    /// Replace the held reference with `local`
    pub fn reset_to(&mut self, local: &Local<'_>) {
        *self = Self::new(local);
    }

    pub fn is_empty(&self) -> bool {
        self.slot
            .as_ref()
            .is_none_or(|slot| slot.borrow().is_none())
    }

    /// Materialize a scoped handle
    pub fn to_local<'js>(&self, scope: &Scope<'js>) -> Result<Local<'js>> {
        let root = self
            .slot
            .as_ref()
            .and_then(|slot| slot.borrow().clone())
            .ok_or(BindError::EmptyHandle)?;
        let value = root.restore(scope.ctx())?;
        Ok(scope.wrap(value))
    }
}

impl fmt::Debug for Persistent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistent")
            .field("empty", &self.is_empty())
            .finish()
    }
}
