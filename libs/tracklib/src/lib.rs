// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Interop bridge between a host application and a separately compiled native
//! tracking engine.
//!
//! The engine only understands opaque client-data words, C function pointers
//! and raw memory. This crate turns that into:
//!
//! - [`HandleRegistry`]: opaque tokens that keep a host object alive while
//!   native code refers to it.
//! - [`CommandChannel`]: one-shot request/response exchanges resolved by a
//!   single global callback trampoline.
//! - [`SubscriptionChannel`]: standing listeners for named event streams.
//! - [`FrameTransferBuffer`]: staging buffers that hand vertically mirrored
//!   pixel data to the consumer.

pub mod core;

pub use core::{
    command::{
        CommandChannel, CommandError, CommandOutcome, CommandRequest, CommandResponse,
        PendingCommand,
    },
    config::{BridgeConfig, CommandsConfig, FramesConfig, LoggingConfig},
    engine::{LoopbackEngine, NativeEngine, NativeLibraryEngine},
    error::{BridgeError, Result},
    frames::{
        ExtrinsicData, FrameTransferBuffer, Image, ImageSource, IntrinsicData, PendingFrame,
        RawImage, TransferableFrame,
    },
    logging::init_logging,
    registry::{HandleRegistry, HandleToken},
    subscription::{
        ObservableMap, ObserverSet, SimilarityTransform, Subscription, SubscriptionChannel,
    },
};
