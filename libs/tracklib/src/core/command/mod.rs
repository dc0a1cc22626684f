// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! One-shot request/response exchanges with the native engine.
//!
//! Each [`CommandChannel::execute`] pins a fresh exchange, hands its token to
//! the engine together with the global command callback, and returns a
//! [`PendingCommand`] that resolves exactly once. The engine's terminal
//! callback releases the token.

mod exchange;
mod payload;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

pub use payload::{CommandError, CommandRequest, CommandResponse, CANCELED_KIND};

use crate::core::config::BridgeConfig;
use crate::core::engine::NativeEngine;
use crate::core::registry::HandleToken;
use crate::core::{BridgeError, Result};
use exchange::{command_callback, PendingExchange, PENDING_COMMANDS};

/// Terminal state of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Succeeded(CommandResponse),
    Failed(CommandError),
    /// The engine session was stopped or destroyed mid-command.
    Canceled { command: String },
}

impl CommandOutcome {
    pub fn is_canceled(&self) -> bool {
        matches!(self, CommandOutcome::Canceled { .. })
    }

    /// `Failed` becomes [`BridgeError::Command`] carrying the engine's error
    /// itself, `Canceled` becomes [`BridgeError::Canceled`].
    pub fn into_result(self) -> Result<CommandResponse> {
        match self {
            CommandOutcome::Succeeded(response) => Ok(response),
            CommandOutcome::Failed(error) => Err(BridgeError::Command(error)),
            CommandOutcome::Canceled { command } => Err(BridgeError::Canceled { command }),
        }
    }
}

/// Awaitable side of one in-flight command.
#[must_use = "dropping a PendingCommand discards the command's outcome"]
pub struct PendingCommand {
    command: String,
    token: HandleToken,
    receiver: oneshot::Receiver<CommandOutcome>,
}

impl PendingCommand {
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn token(&self) -> HandleToken {
        self.token
    }

    /// Whether the engine still holds the exchange's token.
    pub fn is_in_flight(&self) -> bool {
        exchange::is_pinned(self.token)
    }

    /// Block the current thread until the outcome arrives.
    ///
    /// Must not run on a thread that delivers engine callbacks, nor inside an
    /// async runtime.
    pub fn wait_blocking(self) -> Result<CommandOutcome> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BridgeError::BlockingInAsyncContext);
        }
        let command = self.command;
        Ok(self
            .receiver
            .blocking_recv()
            .unwrap_or_else(|_| abandoned(&command)))
    }
}

impl Future for PendingCommand {
    type Output = CommandOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| abandoned(&this.command)))
    }
}

fn abandoned(command: &str) -> CommandOutcome {
    tracing::error!("Exchange for '{}' dropped without a terminal callback", command);
    CommandOutcome::Failed(CommandError::internal(
        command,
        "exchange dropped without a terminal callback",
    ))
}

/// Issues commands against one engine session.
#[derive(Clone)]
pub struct CommandChannel {
    engine: Arc<dyn NativeEngine>,
    timeout: Option<Duration>,
}

impl CommandChannel {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        Self {
            engine,
            timeout: None,
        }
    }

    /// Channel whose [`execute_as`](Self::execute_as) waits at most
    /// `commands.timeout_ms`.
    pub fn from_config(engine: Arc<dyn NativeEngine>, config: &BridgeConfig) -> Self {
        Self::new(engine).with_timeout(config.commands.timeout())
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn engine(&self) -> &Arc<dyn NativeEngine> {
        &self.engine
    }

    /// Dispatch `request` and return the awaitable outcome.
    ///
    /// Fails with [`BridgeError::DispatchRejected`] when the engine session
    /// is already destroyed or the engine refuses the command; no token stays
    /// pinned in that case.
    pub fn execute(&self, request: &CommandRequest) -> Result<PendingCommand> {
        self.dispatch(request, false)
    }

    /// Execute and decode the result as `T`, bounded by the channel timeout.
    pub async fn execute_as<T: DeserializeOwned>(&self, request: &CommandRequest) -> Result<T> {
        let outcome = match self.timeout {
            Some(timeout) => self.execute_with_timeout(request, timeout).await?,
            None => self.execute(request)?.await,
        };
        outcome.into_result()?.decode()
    }

    /// Execute and wait at most `timeout`.
    ///
    /// On timeout the exchange stays pinned: the engine still owns the token
    /// and its eventual callback releases it.
    pub async fn execute_with_timeout(
        &self,
        request: &CommandRequest,
        timeout: Duration,
    ) -> Result<CommandOutcome> {
        let pending = self.execute(request)?;
        tokio::time::timeout(timeout, pending)
            .await
            .map_err(|_| {
                tracing::warn!("Command '{}' timed out after {:?}", request.name(), timeout);
                BridgeError::Timeout {
                    command: request.name().to_owned(),
                    elapsed: timeout,
                }
            })
    }

    /// Execute through the engine's synchronous entry point and block until
    /// the outcome arrives.
    ///
    /// A failed command surfaces as its own [`CommandError`]; a canceled one
    /// as [`BridgeError::Canceled`].
    pub fn execute_blocking(&self, request: &CommandRequest) -> Result<CommandResponse> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BridgeError::BlockingInAsyncContext);
        }
        self.dispatch(request, true)?.wait_blocking()?.into_result()
    }

    fn dispatch(&self, request: &CommandRequest, synchronous: bool) -> Result<PendingCommand> {
        let command = request.name().to_owned();
        if self.engine.is_destroyed() {
            tracing::debug!("Not dispatching '{}': engine session destroyed", command);
            return Err(BridgeError::DispatchRejected { command });
        }
        let request_json = request.to_c_string()?;

        let (sender, receiver) = oneshot::channel();
        let token = PENDING_COMMANDS.pin(Arc::new(PendingExchange::new(command.clone(), sender)));

        // The callback may fire on another thread before this call returns.
        let accepted = if synchronous {
            self.engine
                .process_command(&request_json, command_callback, token.as_client_data())
        } else {
            self.engine
                .push_command(&request_json, command_callback, token.as_client_data())
        };

        if !accepted {
            // Still pinned unless the engine answered before refusing.
            if PENDING_COMMANDS.take(token).is_err() {
                tracing::warn!("Engine answered command '{}' and then rejected it", command);
            }
            tracing::warn!("Engine rejected command '{}'", command);
            return Err(BridgeError::DispatchRejected { command });
        }

        tracing::trace!("Dispatched '{}' with token {}", command, token);
        Ok(PendingCommand {
            command,
            token,
            receiver,
        })
    }
}
