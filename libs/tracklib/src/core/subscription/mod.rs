// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Standing listener registrations for named engine event streams.
//!
//! A [`Subscription`] owns one pinned listener for as long as it is active.
//! Every event the engine delivers for it is decoded into the stream's value
//! type and fanned out to an [`ObserverSet`].

mod observable_map;
mod observers;

use std::ffi::{c_char, c_void, CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use serde::de::DeserializeOwned;

pub use observable_map::{ObservableMap, SimilarityTransform};
pub use observers::{Observer, ObserverId, ObserverSet};

use crate::core::engine::NativeEngine;
use crate::core::registry::{HandleRegistry, HandleToken};
use crate::core::{BridgeError, Result};

/// Every listener the engine currently holds a token for.
static LISTENERS: LazyLock<HandleRegistry<dyn ListenerSink>> =
    LazyLock::new(|| HandleRegistry::new("listeners"));

/// Type-erased receiving end of a listener.
trait ListenerSink: Send + Sync {
    fn deliver(&self, event_json: &str);
    fn deactivate(&self);
    fn is_active(&self) -> bool;
}

struct Listener<T> {
    stream: String,
    active: AtomicBool,
    observers: Arc<ObserverSet<T>>,
    _value: PhantomData<fn() -> T>,
}

impl<T> ListenerSink for Listener<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn deliver(&self, event_json: &str) {
        if !self.is_active() {
            tracing::trace!("Event on '{}' after unsubscribe dropped", self.stream);
            return;
        }
        match serde_json::from_str::<T>(event_json) {
            Ok(value) => {
                self.observers.notify_while(&value, || self.is_active());
            }
            Err(e) => tracing::warn!("Undecodable event on '{}' dropped: {}", self.stream, e),
        }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Listener callback handed to the engine with every registration.
///
/// # Safety
///
/// `event_json` must be null or point to a NUL-terminated string valid for
/// the duration of the call.
pub(crate) unsafe extern "C" fn listener_callback(event_json: *const c_char, client_data: *mut c_void) {
    let delivered = catch_unwind(AssertUnwindSafe(|| unsafe { deliver(event_json, client_data) }));
    if delivered.is_err() {
        tracing::error!("Panic while delivering a stream event; contained at the native boundary");
    }
}

unsafe fn deliver(event_json: *const c_char, client_data: *mut c_void) {
    // Unknown tokens are the normal teardown race.
    let Some(listener) = LISTENERS.resolve_client_data(client_data) else {
        tracing::trace!("Event for unknown listener {:p} dropped", client_data);
        return;
    };
    if event_json.is_null() {
        tracing::warn!("Listener callback with null payload dropped");
        return;
    }
    match unsafe { CStr::from_ptr(event_json) }.to_str() {
        Ok(event) => listener.deliver(event),
        Err(e) => tracing::warn!("Non UTF-8 event payload dropped: {}", e),
    }
}

/// Registers listeners against one engine session.
#[derive(Clone)]
pub struct SubscriptionChannel {
    engine: Arc<dyn NativeEngine>,
}

impl SubscriptionChannel {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    /// Start feeding `observers` with the events of `stream`.
    ///
    /// Fails with [`BridgeError::RegistrationFailed`] if the engine refuses
    /// the listener or is already destroyed; the token is released right
    /// away in that case.
    pub fn subscribe<T>(&self, stream: &str, observers: Arc<ObserverSet<T>>) -> Result<Subscription>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let stream_c = CString::new(stream)
            .map_err(|e| BridgeError::Payload(format!("stream name '{}': {}", stream, e)))?;
        if self.engine.is_destroyed() {
            tracing::debug!("Not subscribing to '{}': engine session destroyed", stream);
            return Err(BridgeError::RegistrationFailed {
                stream: stream.to_owned(),
            });
        }

        let listener: Arc<dyn ListenerSink> = Arc::new(Listener {
            stream: stream.to_owned(),
            active: AtomicBool::new(true),
            observers,
            _value: PhantomData,
        });
        let token = LISTENERS.pin(Arc::clone(&listener));

        if !self
            .engine
            .add_listener(&stream_c, listener_callback, token.as_client_data())
        {
            listener.deactivate();
            let _ = LISTENERS.release(token);
            tracing::warn!("Engine refused listener for '{}'", stream);
            return Err(BridgeError::RegistrationFailed {
                stream: stream.to_owned(),
            });
        }

        tracing::debug!("Subscribed to '{}' with token {}", stream, token);
        Ok(Subscription {
            engine: Arc::clone(&self.engine),
            stream: stream.to_owned(),
            stream_c,
            token,
            listener,
            released: false,
        })
    }
}

/// One active listener registration. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    engine: Arc<dyn NativeEngine>,
    stream: String,
    stream_c: CString,
    token: HandleToken,
    listener: Arc<dyn ListenerSink>,
    released: bool,
}

impl Subscription {
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn token(&self) -> HandleToken {
        self.token
    }

    pub fn is_active(&self) -> bool {
        self.listener.is_active()
    }

    /// Stop delivery and release the listener.
    ///
    /// Returns `true` if the engine confirmed the removal. A destroyed engine
    /// is not contacted.
    pub fn unsubscribe(mut self) -> bool {
        self.teardown()
    }

    fn teardown(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;

        // Inactive first: a callback the engine fires from inside
        // remove_listener must not reach observers.
        self.listener.deactivate();

        let removed = if self.engine.is_destroyed() {
            tracing::debug!(
                "Engine session destroyed; not removing listener for '{}'",
                self.stream
            );
            false
        } else {
            let removed = self.engine.remove_listener(
                &self.stream_c,
                listener_callback,
                self.token.as_client_data(),
            );
            if !removed {
                tracing::warn!("Engine did not confirm removal of listener for '{}'", self.stream);
            }
            removed
        };

        let _ = LISTENERS.release(self.token);
        tracing::debug!("Unsubscribed from '{}'", self.stream);
        removed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("stream", &self.stream)
            .field("token", &self.token)
            .field("active", &self.is_active())
            .finish()
    }
}
