// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-flight command exchanges and the single native entry point that
//! settles them.

use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::LazyLock;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::payload::{self, CommandError, CommandResponse};
use super::CommandOutcome;
use crate::core::registry::{HandleRegistry, HandleToken};

/// Every command the engine currently owns a token for.
pub(super) static PENDING_COMMANDS: LazyLock<HandleRegistry<PendingExchange>> =
    LazyLock::new(|| HandleRegistry::new("commands"));

/// One request/response exchange. Leaves `Pending` at most once.
pub(super) struct PendingExchange {
    command: String,
    waiter: Mutex<Option<oneshot::Sender<CommandOutcome>>>,
}

impl PendingExchange {
    pub(super) fn new(command: String, waiter: oneshot::Sender<CommandOutcome>) -> Self {
        Self {
            command,
            waiter: Mutex::new(Some(waiter)),
        }
    }

    /// Apply the terminal transition. Returns `false` if it already happened.
    fn settle(&self, outcome: CommandOutcome) -> bool {
        let Some(waiter) = self.waiter.lock().take() else {
            return false;
        };
        if waiter.send(outcome).is_err() {
            tracing::debug!(
                "Command '{}' settled after its caller stopped waiting",
                self.command
            );
        }
        true
    }
}

/// Command callback handed to the engine with every dispatch.
///
/// # Safety
///
/// `error_json` and `result_json` must each be null or point to a
/// NUL-terminated string valid for the duration of the call.
pub(crate) unsafe extern "C" fn command_callback(
    error_json: *const c_char,
    result_json: *const c_char,
    client_data: *mut c_void,
) {
    let delivered = catch_unwind(AssertUnwindSafe(|| unsafe {
        deliver(error_json, result_json, client_data)
    }));
    if delivered.is_err() {
        tracing::error!("Panic while settling a command callback; contained at the native boundary");
    }
}

unsafe fn deliver(error_json: *const c_char, result_json: *const c_char, client_data: *mut c_void) {
    let Some(token) = HandleToken::from_client_data(client_data) else {
        tracing::warn!("Command callback with null client data ignored");
        return;
    };

    // The terminal callback ends the token's lifetime, whatever the payload.
    let exchange = match PENDING_COMMANDS.take(token) {
        Ok(exchange) => exchange,
        Err(_) => {
            tracing::warn!(
                "Command callback for stale token {} ignored (engine invoked it more than once?)",
                token
            );
            return;
        }
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| unsafe {
        interpret(&exchange.command, error_json, result_json)
    }))
    .unwrap_or_else(|_| {
        tracing::error!("Panic while interpreting payload of '{}'", exchange.command);
        CommandOutcome::Failed(CommandError::internal(
            &exchange.command,
            "payload interpretation panicked",
        ))
    });

    if !exchange.settle(outcome) {
        tracing::warn!("Command '{}' settled twice; second outcome dropped", exchange.command);
    }
}

unsafe fn interpret(
    command: &str,
    error_json: *const c_char,
    result_json: *const c_char,
) -> CommandOutcome {
    if !error_json.is_null() {
        let raw = match unsafe { CStr::from_ptr(error_json) }.to_str() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("Error payload of '{}' is not UTF-8: {}", command, e);
                return CommandOutcome::Failed(CommandError::malformed(command, e));
            }
        };
        match payload::parse_error(raw) {
            Ok(Some(error)) if error.is_cancellation() => {
                tracing::debug!("Command '{}' canceled by the engine", command);
                return CommandOutcome::Canceled {
                    command: command.to_owned(),
                };
            }
            Ok(Some(error)) => return CommandOutcome::Failed(error.for_command(command)),
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Malformed error payload for '{}': {}", command, e);
                return CommandOutcome::Failed(CommandError::malformed(command, e));
            }
        }
    }

    if result_json.is_null() {
        return CommandOutcome::Succeeded(CommandResponse::new(None));
    }
    match unsafe { CStr::from_ptr(result_json) }.to_str() {
        Ok(raw) => CommandOutcome::Succeeded(CommandResponse::new(Some(raw.to_owned()))),
        Err(e) => {
            tracing::error!("Result payload of '{}' is not UTF-8: {}", command, e);
            CommandOutcome::Failed(CommandError::malformed(command, e))
        }
    }
}

pub(super) fn is_pinned(token: HandleToken) -> bool {
    PENDING_COMMANDS.contains(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::sync::Arc;

    fn pin(command: &str) -> (HandleToken, oneshot::Receiver<CommandOutcome>) {
        let (tx, rx) = oneshot::channel();
        let token = PENDING_COMMANDS.pin(Arc::new(PendingExchange::new(command.to_owned(), tx)));
        (token, rx)
    }

    fn invoke(token: HandleToken, error: Option<&str>, result: Option<&str>) {
        let error = error.map(|s| CString::new(s).unwrap());
        let result = result.map(|s| CString::new(s).unwrap());
        unsafe {
            command_callback(
                error.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
                result.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
                token.as_client_data(),
            )
        }
    }

    #[test]
    fn test_callback_releases_token() {
        let (token, mut rx) = pin("Ping");
        invoke(token, None, Some("1"));
        assert!(!is_pinned(token));
        match rx.try_recv().unwrap() {
            CommandOutcome::Succeeded(response) => assert_eq!(response.raw(), Some("1")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_malformed_error_payload_fails_and_releases() {
        let (token, mut rx) = pin("Track");
        invoke(token, Some("{not json"), None);
        assert!(!is_pinned(token));
        match rx.try_recv().unwrap() {
            CommandOutcome::Failed(error) => {
                assert_eq!(error.kind, "MalformedPayload");
                assert_eq!(error.command_name.as_deref(), Some("Track"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_null_error_payload_is_success() {
        let (token, mut rx) = pin("Ping");
        invoke(token, Some("null"), None);
        assert!(matches!(
            rx.try_recv().unwrap(),
            CommandOutcome::Succeeded(response) if response.is_empty()
        ));
    }

    #[test]
    fn test_second_invocation_is_ignored() {
        let (token, mut rx) = pin("Ping");
        invoke(token, None, Some("\"first\""));
        invoke(token, Some(r#"{"kind":"Late"}"#), None);
        match rx.try_recv().unwrap() {
            CommandOutcome::Succeeded(response) => assert_eq!(response.raw(), Some("\"first\"")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_null_client_data_is_ignored() {
        unsafe { command_callback(std::ptr::null(), std::ptr::null(), std::ptr::null_mut()) };
    }
}
