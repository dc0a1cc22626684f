// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The native engine as seen from the bridge.
//!
//! The engine speaks C: requests are NUL-terminated JSON, callbacks are plain
//! function pointers and every registration carries one opaque client-data
//! word that the engine hands back verbatim. The bridge always passes a
//! [`HandleToken`](crate::core::registry::HandleToken) in that word.

mod library;
mod loopback;

use std::ffi::{c_char, c_void, CStr};

pub use library::{NativeLibraryEngine, TRACKLIB_ENGINE_ABI_VERSION};
pub use loopback::{CommandRecord, ListenerRecord, LoopbackEngine, LoopbackReply};

/// Terminal callback for a dispatched command.
///
/// Exactly one of `error_json` / `result_json` is meaningful; either may be
/// null. `client_data` is the word passed at dispatch time.
pub type CommandCallback = unsafe extern "C" fn(
    error_json: *const c_char,
    result_json: *const c_char,
    client_data: *mut c_void,
);

/// Repeatable callback for one event of a subscribed stream.
pub type ListenerCallback = unsafe extern "C" fn(event_json: *const c_char, client_data: *mut c_void);

/// Contract the native engine upholds for the bridge.
///
/// Implementations may invoke callbacks on any thread, including the calling
/// thread before the dispatching call returns.
pub trait NativeEngine: Send + Sync {
    /// Queue a command. Returns `false` when the engine refuses it
    /// synchronously, in which case `callback` is never invoked.
    fn push_command(
        &self,
        request_json: &CStr,
        callback: CommandCallback,
        client_data: *mut c_void,
    ) -> bool;

    /// Process a command on the engine's synchronous path.
    fn process_command(
        &self,
        request_json: &CStr,
        callback: CommandCallback,
        client_data: *mut c_void,
    ) -> bool {
        self.push_command(request_json, callback, client_data)
    }

    /// Start delivering events of `stream` to `callback` with `client_data`.
    fn add_listener(
        &self,
        stream: &CStr,
        callback: ListenerCallback,
        client_data: *mut c_void,
    ) -> bool;

    /// Stop delivering events registered with the same triple.
    fn remove_listener(
        &self,
        stream: &CStr,
        callback: ListenerCallback,
        client_data: *mut c_void,
    ) -> bool;

    /// Whether the engine session has been torn down. Queried before any
    /// teardown-time native call.
    fn is_destroyed(&self) -> bool;
}
