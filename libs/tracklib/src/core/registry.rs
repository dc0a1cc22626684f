// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Opaque tokens that keep host objects alive while native code refers to them.
//!
//! Native callbacks carry a single client-data word. The registry hands out a
//! [`HandleToken`] for an `Arc<T>` and holds a strong reference until the
//! token is released, so whatever the native side calls back into is still
//! there when the callback lands, on whichever thread it lands.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{BridgeError, Result};

/// Process-wide counter so tokens from different registries never collide.
static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(0);

/// Opaque, fixed-size identifier of one pinned registry entry.
///
/// Tokens are pointer-sized and never zero, so a token converts losslessly to
/// a non-null client-data pointer and a null pointer never resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct HandleToken(NonZeroUsize);

impl HandleToken {
    fn mint() -> Self {
        Self(NonZeroUsize::MIN.saturating_add(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)))
    }

    /// Raw token value.
    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Encode the token as the client-data word passed to native code.
    pub fn as_client_data(self) -> *mut c_void {
        std::ptr::without_provenance_mut(self.0.get())
    }

    /// Decode a client-data word handed back by native code.
    ///
    /// Returns `None` for a null pointer. Any other value yields a token, which
    /// may or may not be live; [`HandleRegistry::resolve`] decides that.
    pub fn from_client_data(client_data: *mut c_void) -> Option<Self> {
        NonZeroUsize::new(client_data.addr()).map(Self)
    }
}

impl fmt::Display for HandleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token table mapping live tokens to pinned objects.
///
/// The table is the only structure touched concurrently by both the issuing
/// side and native callbacks, so every operation takes the internal lock.
pub struct HandleRegistry<T: ?Sized> {
    name: &'static str,
    entries: Mutex<HashMap<HandleToken, Arc<T>>>,
}

impl<T: ?Sized> HandleRegistry<T> {
    /// Create an empty registry. `name` only shows up in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Pin `object` until [`release`](Self::release) is called with the
    /// returned token. Never fails.
    pub fn pin(&self, object: Arc<T>) -> HandleToken {
        let token = HandleToken::mint();
        self.entries.lock().insert(token, object);
        tracing::trace!("[{}] pinned {}", self.name, token);
        token
    }

    /// Look up the object behind `token`. Safe from any thread.
    pub fn resolve(&self, token: HandleToken) -> Result<Arc<T>> {
        self.entries
            .lock()
            .get(&token)
            .cloned()
            .ok_or(BridgeError::InvalidToken(token))
    }

    /// Resolve a raw client-data word.
    pub fn resolve_client_data(&self, client_data: *mut c_void) -> Option<Arc<T>> {
        HandleToken::from_client_data(client_data).and_then(|token| self.resolve(token).ok())
    }

    /// Drop the registry's reference to the object behind `token`.
    ///
    /// Only the minting owner releases, exactly once. Releasing an unknown or
    /// already released token is a lifetime bug and asserts in debug builds.
    pub fn release(&self, token: HandleToken) -> Result<Arc<T>> {
        let removed = self.entries.lock().remove(&token);
        debug_assert!(
            removed.is_some(),
            "[{}] release of {} which is not pinned (double release?)",
            self.name,
            token
        );
        match removed {
            Some(object) => {
                tracing::trace!("[{}] released {}", self.name, token);
                Ok(object)
            }
            None => {
                tracing::error!("[{}] release of unpinned token {}", self.name, token);
                Err(BridgeError::InvalidToken(token))
            }
        }
    }

    /// Resolve and release in one step.
    ///
    /// For terminal callbacks, where the callback itself ends the token's
    /// lifetime. A token that is already gone is reported as `InvalidToken`
    /// without asserting, so two racing callbacks settle exactly once.
    pub fn take(&self, token: HandleToken) -> Result<Arc<T>> {
        self.entries
            .lock()
            .remove(&token)
            .ok_or(BridgeError::InvalidToken(token))
    }

    pub fn contains(&self, token: HandleToken) -> bool {
        self.entries.lock().contains_key(&token)
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<T: ?Sized> fmt::Debug for HandleRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("name", &self.name)
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_resolve_until_release() {
        let registry = HandleRegistry::new("test");
        let token = registry.pin(Arc::new(42u32));

        assert_eq!(*registry.resolve(token).unwrap(), 42);
        assert_eq!(*registry.resolve(token).unwrap(), 42);

        let released = registry.release(token).unwrap();
        assert_eq!(*released, 42);

        assert!(matches!(
            registry.resolve(token),
            Err(BridgeError::InvalidToken(t)) if t == token
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pin_keeps_object_alive() {
        let registry = HandleRegistry::new("test");
        let object = Arc::new(String::from("anchor"));
        let weak = Arc::downgrade(&object);

        let token = registry.pin(object);
        assert!(weak.upgrade().is_some());

        drop(registry.release(token).unwrap());
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_never_minted_token_is_invalid() {
        let registry: HandleRegistry<u32> = HandleRegistry::new("test");
        let foreign = HandleRegistry::new("other").pin(Arc::new(1u32));
        assert!(registry.resolve(foreign).is_err());
    }

    #[test]
    fn test_tokens_unique_across_registries() {
        let a = HandleRegistry::new("a");
        let b = HandleRegistry::new("b");
        let ta = a.pin(Arc::new(1u8));
        let tb = b.pin(Arc::new(2u8));
        assert_ne!(ta, tb);
        assert!(b.resolve(ta).is_err());
    }

    #[test]
    fn test_client_data_round_trip() {
        let registry = HandleRegistry::new("test");
        let token = registry.pin(Arc::new(7i64));
        let client_data = token.as_client_data();

        assert!(!client_data.is_null());
        assert_eq!(HandleToken::from_client_data(client_data), Some(token));
        assert_eq!(*registry.resolve_client_data(client_data).unwrap(), 7);
        assert!(HandleToken::from_client_data(std::ptr::null_mut()).is_none());
    }

    #[test]
    fn test_client_data_word_is_the_token_value() {
        let registry = HandleRegistry::new("test");
        let token = registry.pin(Arc::new(()));
        assert_eq!(token.as_client_data().addr(), token.get());

        let high = std::ptr::without_provenance_mut::<c_void>(usize::MAX);
        assert_eq!(HandleToken::from_client_data(high).unwrap().get(), usize::MAX);
    }

    #[test]
    fn test_trait_objects() {
        let registry: HandleRegistry<dyn fmt::Debug + Send + Sync> = HandleRegistry::new("dyn");
        let token = registry.pin(Arc::new("hello"));
        assert_eq!(format!("{:?}", registry.resolve(token).unwrap()), "\"hello\"");
    }

    #[test]
    fn test_concurrent_pin_resolve_release() {
        let registry = Arc::new(HandleRegistry::new("concurrent"));
        let workers: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for j in 0..200u32 {
                        let token = registry.pin(Arc::new(i * 1000 + j));
                        assert_eq!(*registry.resolve(token).unwrap(), i * 1000 + j);
                        registry.release(token).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_take_settles_once() {
        let registry = HandleRegistry::new("test");
        let token = registry.pin(Arc::new(5u16));
        assert_eq!(*registry.take(token).unwrap(), 5);
        assert!(matches!(registry.take(token), Err(BridgeError::InvalidToken(_))));
        assert!(!registry.contains(token));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "double release")]
    fn test_double_release_asserts_in_debug() {
        let registry = HandleRegistry::new("test");
        let token = registry.pin(Arc::new(()));
        registry.release(token).unwrap();
        let _ = registry.release(token);
    }
}
