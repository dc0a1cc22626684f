// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod frames;
pub mod logging;
pub mod registry;
pub mod subscription;

pub use error::{BridgeError, Result};
