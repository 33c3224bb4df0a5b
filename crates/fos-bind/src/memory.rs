//! Shared Memory
//!
//! Byte buffers that live in the engine and are kept alive from native code:
//! a `Uint8Array` and a raw `ArrayBuffer`. Native code reads the engine's
//! bytes in place and writes into them directly; script sees every write.

use std::ptr::NonNull;
use std::slice;

use crate::error::{BindError, Result};
use crate::value::{Local, Persistent, Scope};

fn check_range(capacity: usize, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(BindError::OutOfBounds {
            offset,
            len,
            capacity,
        }),
    }
}

/// A detached buffer leaves a `TypeError` pending; drop it
fn detached(scope: &Scope<'_>) -> BindError {
    let _ = scope.ctx().catch();
    BindError::DetachedBuffer
}

fn copy_into(target: NonNull<u8>, capacity: usize, offset: usize, bytes: &[u8]) -> Result<()> {
    check_range(capacity, offset, bytes.len())?;

    // SAFETY: `target` addresses `capacity` live bytes owned by the engine,
    // the range was checked above and no script runs during the copy.
    let target = unsafe { slice::from_raw_parts_mut(target.as_ptr(), capacity) };
    target[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
}

/// An engine `Uint8Array` rooted from native code
#[derive(Debug, Clone)]
pub struct Uint8Array {
    handle: Persistent,
    len: usize,
}

impl Uint8Array {
    /// A zero-filled array of `len` bytes
    pub fn new(scope: &Scope<'_>, len: usize) -> Result<Self> {
        Self::from_vec(scope, vec![0; len])
    }

    /// An array holding a copy of `bytes`
    pub fn from_bytes(scope: &Scope<'_>, bytes: &[u8]) -> Result<Self> {
        Self::from_vec(scope, bytes.to_vec())
    }

    fn from_vec(scope: &Scope<'_>, bytes: Vec<u8>) -> Result<Self> {
        let len = bytes.len();
        let array = rquickjs::TypedArray::<u8>::new(scope.ctx().clone(), bytes)?;
        Ok(Self {
            handle: Persistent::new(&scope.wrap(array.into_value())),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn persistent(&self) -> &Persistent {
        &self.handle
    }

    pub fn to_local<'js>(&self, scope: &Scope<'js>) -> Result<Local<'js>> {
        self.handle.to_local(scope)
    }

    fn typed<'js>(&self, scope: &Scope<'js>) -> Result<rquickjs::TypedArray<'js, u8>> {
        let local = self.to_local(scope)?;
        Ok(rquickjs::TypedArray::<u8>::from_value(local.into_value())?)
    }

    /// Run `f` over the engine's bytes, without copying
    pub fn with_bytes<R>(&self, scope: &Scope<'_>, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let array = self.typed(scope)?;
        match array.as_bytes() {
            Some(bytes) => Ok(f(bytes)),
            None => Err(detached(scope)),
        }
    }

    /// Copy the contents out
    pub fn read(&self, scope: &Scope<'_>) -> Result<Vec<u8>> {
        self.with_bytes(scope, <[u8]>::to_vec)
    }

    /// Copy `bytes` in at `offset`
    pub fn write(&self, scope: &Scope<'_>, offset: usize, bytes: &[u8]) -> Result<()> {
        let array = self.typed(scope)?;
        let raw = array.as_raw().ok_or_else(|| detached(scope))?;
        copy_into(raw.ptr, raw.len, offset, bytes)
    }
}

/// An engine `ArrayBuffer` rooted from native code
#[derive(Debug, Clone)]
pub struct ArrayBuffer {
    handle: Persistent,
    len: usize,
}

impl ArrayBuffer {
    /// A zero-filled buffer of `len` bytes
    pub fn new(scope: &Scope<'_>, len: usize) -> Result<Self> {
        let buffer = rquickjs::ArrayBuffer::new(scope.ctx().clone(), vec![0u8; len])?;
        Ok(Self {
            handle: Persistent::new(&scope.wrap(buffer.into_value())),
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn persistent(&self) -> &Persistent {
        &self.handle
    }

    pub fn to_local<'js>(&self, scope: &Scope<'js>) -> Result<Local<'js>> {
        self.handle.to_local(scope)
    }

    fn buffer<'js>(&self, scope: &Scope<'js>) -> Result<rquickjs::ArrayBuffer<'js>> {
        let local = self.to_local(scope)?;
        let kind = local.type_of();
        rquickjs::ArrayBuffer::from_value(local.into_value()).ok_or(BindError::NotAnObject(kind))
    }

    /// Run `f` over the engine's bytes, without copying
    pub fn with_bytes<R>(&self, scope: &Scope<'_>, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let buffer = self.buffer(scope)?;
        match buffer.as_bytes() {
            Some(bytes) => Ok(f(bytes)),
            None => Err(detached(scope)),
        }
    }

    pub fn read(&self, scope: &Scope<'_>) -> Result<Vec<u8>> {
        self.with_bytes(scope, <[u8]>::to_vec)
    }

    pub fn write(&self, scope: &Scope<'_>, offset: usize, bytes: &[u8]) -> Result<()> {
        let buffer = self.buffer(scope)?;
        let raw = buffer.as_raw().ok_or_else(|| detached(scope))?;
        copy_into(raw.ptr, raw.len, offset, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindConfig, BindingRegistry, Environment};

    fn env() -> Environment {
        Environment::initialize(BindConfig::default(), &BindingRegistry::new()).unwrap()
    }

    #[test]
    fn test_uint8_array() {
        let env = env();
        let array = env.scope(|scope| Uint8Array::from_bytes(scope, &[1, 2, 3, 255]).unwrap());
        assert_eq!(array.len(), 4);

        env.scope(|scope| {
            let local = array.to_local(scope).unwrap();
            scope.global().set("bytes", &local).unwrap();
            scope.run_script("bytes[1] = bytes[0] + bytes[3];", None);

            // 1 + 255 wraps in a Uint8Array
            assert_eq!(array.read(scope).unwrap(), vec![1, 0, 3, 255]);
            assert_eq!(scope.global_property("bytes").unwrap().type_of(), "object");
        });
    }

    #[test]
    fn test_write_out_of_bounds() {
        let env = env();
        let array = env.scope(|scope| Uint8Array::new(scope, 2).unwrap());

        env.scope(|scope| {
            let result = array.write(scope, 1, &[7, 8]);
            assert!(matches!(
                result,
                Err(BindError::OutOfBounds { offset: 1, len: 2, capacity: 2 })
            ));
            array.write(scope, 1, &[7]).unwrap();
            assert_eq!(array.read(scope).unwrap(), vec![0, 7]);
        });
    }

    #[test]
    fn test_array_buffer_shared_with_script() {
        let env = env();
        let buffer = env.scope(|scope| ArrayBuffer::new(scope, 8).unwrap());
        assert!(!buffer.is_empty());

        env.scope(|scope| {
            buffer.write(scope, 0, &[10, 20]).unwrap();
            scope.global().set("buffer", buffer.to_local(scope).unwrap()).unwrap();
            scope.run_script(
                "var view = new Uint8Array(buffer);
                 view[7] = view[0] + view[1];
                 var size = buffer.byteLength;",
                None,
            );

            let size: usize = scope.global_property("size").unwrap().decode().unwrap();
            assert_eq!(size, 8);
            assert_eq!(buffer.read(scope).unwrap(), vec![10, 20, 0, 0, 0, 0, 0, 30]);
        });
    }

    #[test]
    fn test_script_writes_visible_in_place() {
        let env = env();
        let array = env.scope(|scope| Uint8Array::new(scope, 4).unwrap());

        env.scope(|scope| {
            scope.global().set("shared", array.to_local(scope).unwrap()).unwrap();
            scope.run_script("for (var i = 0; i < shared.length; i++) shared[i] = i * 2;", None);

            let sum = array
                .with_bytes(scope, |bytes| bytes.iter().map(|b| *b as u32).sum::<u32>())
                .unwrap();
            assert_eq!(sum, 12);

            array.write(scope, 2, &[9, 9]).unwrap();
            scope.run_script("var tail = shared[2] + shared[3];", None);
            assert_eq!(scope.global_property("tail").unwrap().decode::<i32>().unwrap(), 18);
        });
    }

    #[test]
    fn test_detached_buffer() {
        let env = env();
        let buffer = env.scope(|scope| ArrayBuffer::new(scope, 4).unwrap());

        env.scope(|scope| {
            scope.global().set("buffer", buffer.to_local(scope).unwrap()).unwrap();
            scope.run_script("buffer.transfer(0);", None);

            assert!(matches!(buffer.read(scope), Err(BindError::DetachedBuffer)));
            assert!(matches!(buffer.write(scope, 0, &[1]), Err(BindError::DetachedBuffer)));

            // nothing stays pending afterwards
            scope.run_script("var after = 1;", None);
            assert_eq!(scope.global_property("after").unwrap().decode::<i32>().unwrap(), 1);
        });
    }
}
