// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-process engine that records every native call and lets the host drive
//! the callbacks by hand.
//!
//! Used for tests and for running the host without a native build. Commands
//! are queued until completed (or answered inline by a responder), listeners
//! receive whatever [`LoopbackEngine::emit`] sends, and [`destroy`] cancels
//! in-flight commands the way a real engine session does on teardown.
//!
//! [`destroy`]: LoopbackEngine::destroy

use std::collections::VecDeque;
use std::ffi::{c_void, CStr, CString};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::{CommandCallback, ListenerCallback, NativeEngine};

/// How a responder answers a command.
#[derive(Debug, Clone)]
pub enum LoopbackReply {
    /// Invoke the callback with this result payload.
    Success(Value),
    /// Invoke the callback with this error payload.
    Failure(Value),
    /// Leave the command queued for a later `complete_*` call.
    Queue,
}

type Responder = Box<dyn Fn(&CommandRecord) -> LoopbackReply + Send + Sync>;

/// One dispatched command as the engine received it.
#[derive(Debug, Clone)]
pub struct CommandRecord {
    request_json: String,
    callback: CommandCallback,
    client_data: usize,
    synchronous: bool,
}

impl CommandRecord {
    pub fn request_json(&self) -> &str {
        &self.request_json
    }

    /// Parsed request, `Value::Null` if it was not JSON.
    pub fn request(&self) -> Value {
        serde_json::from_str(&self.request_json).unwrap_or(Value::Null)
    }

    /// The request's `name` field.
    pub fn name(&self) -> Option<String> {
        self.request()
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }

    pub fn client_data(&self) -> *mut c_void {
        self.client_data as *mut c_void
    }

    /// Whether it came in through `process_command`.
    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Invoke the command callback. Can be called any number of times, which
    /// is how a faulty engine is simulated.
    pub fn complete(&self, error_json: Option<&str>, result_json: Option<&str>) {
        let error = error_json.and_then(to_cstring);
        let result = result_json.and_then(to_cstring);
        unsafe {
            (self.callback)(
                error.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
                result.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
                self.client_data(),
            )
        }
    }

    /// Invoke the callback with a cancellation marker for this command.
    pub fn cancel(&self) {
        let marker = serde_json::json!({
            "kind": "Canceled",
            "commandName": self.name(),
        });
        self.complete(Some(&marker.to_string()), None);
    }
}

/// One listener registration as the engine received it.
#[derive(Debug, Clone)]
pub struct ListenerRecord {
    stream: String,
    callback: ListenerCallback,
    client_data: usize,
}

impl ListenerRecord {
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn client_data(&self) -> *mut c_void {
        self.client_data as *mut c_void
    }

    /// Invoke the listener callback, whether or not the registration is still
    /// live.
    pub fn invoke(&self, event_json: &str) {
        if let Some(event) = to_cstring(event_json) {
            unsafe { (self.callback)(event.as_ptr(), self.client_data()) }
        }
    }
}

fn to_cstring(s: &str) -> Option<CString> {
    match CString::new(s) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::warn!("Loopback payload contains an interior NUL: {}", e);
            None
        }
    }
}

#[derive(Default)]
struct LoopbackState {
    commands: VecDeque<CommandRecord>,
    dispatched: Vec<CommandRecord>,
    listeners: Vec<ListenerRecord>,
    removed: Vec<ListenerRecord>,
    refused: Vec<ListenerRecord>,
}

/// [`NativeEngine`] living entirely inside the host process.
pub struct LoopbackEngine {
    state: Mutex<LoopbackState>,
    responder: RwLock<Option<Responder>>,
    destroyed: AtomicBool,
    reject_commands: AtomicBool,
    reject_listeners: AtomicBool,
    remove_calls: AtomicUsize,
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState::default()),
            responder: RwLock::new(None),
            destroyed: AtomicBool::new(false),
            reject_commands: AtomicBool::new(false),
            reject_listeners: AtomicBool::new(false),
            remove_calls: AtomicUsize::new(0),
        }
    }

    /// Answer commands inline, before the dispatching call returns.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&CommandRecord) -> LoopbackReply + Send + Sync + 'static,
    {
        *self.responder.write() = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        *self.responder.write() = None;
    }

    /// Refuse every following dispatch synchronously.
    pub fn set_reject_commands(&self, reject: bool) {
        self.reject_commands.store(reject, Ordering::SeqCst);
    }

    /// Refuse every following listener registration synchronously.
    pub fn set_reject_listeners(&self, reject: bool) {
        self.reject_listeners.store(reject, Ordering::SeqCst);
    }

    /// Commands waiting for a terminal callback.
    pub fn pending_commands(&self) -> usize {
        self.state.lock().commands.len()
    }

    /// Every command accepted so far, in dispatch order.
    pub fn dispatched(&self) -> Vec<CommandRecord> {
        self.state.lock().dispatched.clone()
    }

    /// Remove the oldest pending command without completing it.
    pub fn take_next(&self) -> Option<CommandRecord> {
        self.state.lock().commands.pop_front()
    }

    /// Complete the oldest pending command. Returns `false` if none is queued.
    pub fn complete_next(&self, error_json: Option<&str>, result_json: Option<&str>) -> bool {
        // Callback runs without the state lock; it may re-enter the engine.
        match self.take_next() {
            Some(record) => {
                record.complete(error_json, result_json);
                true
            }
            None => false,
        }
    }

    /// Complete the oldest pending command with a result payload.
    pub fn succeed_next(&self, result: &Value) -> bool {
        self.complete_next(None, Some(&result.to_string()))
    }

    /// Complete the oldest pending command with an error payload.
    pub fn fail_next(&self, error: &Value) -> bool {
        self.complete_next(Some(&error.to_string()), None)
    }

    /// Live registrations for `stream`.
    pub fn listeners(&self, stream: &str) -> Vec<ListenerRecord> {
        self.state
            .lock()
            .listeners
            .iter()
            .filter(|l| l.stream == stream)
            .cloned()
            .collect()
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Registrations removed through `remove_listener`, oldest first.
    pub fn removed_listeners(&self) -> Vec<ListenerRecord> {
        self.state.lock().removed.clone()
    }

    /// Registrations `add_listener` turned down, oldest first.
    pub fn refused_listeners(&self) -> Vec<ListenerRecord> {
        self.state.lock().refused.clone()
    }

    /// How many times `remove_listener` was called, successful or not.
    pub fn remove_listener_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    /// Deliver `event_json` to every listener of `stream`. Returns the number
    /// of callbacks invoked.
    pub fn emit(&self, stream: &str, event_json: &str) -> usize {
        let targets = self.listeners(stream);
        for listener in &targets {
            listener.invoke(event_json);
        }
        targets.len()
    }

    /// Serialize `event` and [`emit`](Self::emit) it.
    pub fn emit_value(&self, stream: &str, event: &Value) -> usize {
        self.emit(stream, &event.to_string())
    }

    /// Tear the session down: pending commands are canceled through their
    /// callbacks and listeners stop receiving events.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = {
            let mut state = self.state.lock();
            state.listeners.clear();
            std::mem::take(&mut state.commands)
        };
        tracing::debug!(
            "Loopback engine destroyed, canceling {} in-flight command(s)",
            pending.len()
        );
        for record in pending {
            record.cancel();
        }
    }

    fn dispatch(
        &self,
        request_json: &CStr,
        callback: CommandCallback,
        client_data: *mut c_void,
        synchronous: bool,
    ) -> bool {
        if self.is_destroyed() || self.reject_commands.load(Ordering::SeqCst) {
            return false;
        }
        let record = CommandRecord {
            request_json: request_json.to_string_lossy().into_owned(),
            callback,
            client_data: client_data as usize,
            synchronous,
        };
        self.state.lock().dispatched.push(record.clone());

        let reply = self
            .responder
            .read()
            .as_ref()
            .map_or(LoopbackReply::Queue, |respond| respond(&record));
        match reply {
            LoopbackReply::Success(result) => record.complete(None, Some(&result.to_string())),
            LoopbackReply::Failure(error) => record.complete(Some(&error.to_string()), None),
            LoopbackReply::Queue => self.state.lock().commands.push_back(record),
        }
        true
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopbackEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LoopbackEngine")
            .field("pending_commands", &state.commands.len())
            .field("listeners", &state.listeners.len())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl NativeEngine for LoopbackEngine {
    fn push_command(
        &self,
        request_json: &CStr,
        callback: CommandCallback,
        client_data: *mut c_void,
    ) -> bool {
        self.dispatch(request_json, callback, client_data, false)
    }

    fn process_command(
        &self,
        request_json: &CStr,
        callback: CommandCallback,
        client_data: *mut c_void,
    ) -> bool {
        self.dispatch(request_json, callback, client_data, true)
    }

    fn add_listener(
        &self,
        stream: &CStr,
        callback: ListenerCallback,
        client_data: *mut c_void,
    ) -> bool {
        let record = ListenerRecord {
            stream: stream.to_string_lossy().into_owned(),
            callback,
            client_data: client_data as usize,
        };
        let mut state = self.state.lock();
        if self.is_destroyed() || self.reject_listeners.load(Ordering::SeqCst) {
            state.refused.push(record);
            return false;
        }
        state.listeners.push(record);
        true
    }

    fn remove_listener(
        &self,
        stream: &CStr,
        _callback: ListenerCallback,
        client_data: *mut c_void,
    ) -> bool {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let stream = stream.to_string_lossy();
        let mut state = self.state.lock();
        let position = state
            .listeners
            .iter()
            .position(|l| l.stream == stream && l.client_data == client_data as usize);
        match position {
            Some(index) => {
                let record = state.listeners.remove(index);
                state.removed.push(record);
                true
            }
            None => false,
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}
