// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Staging buffers for handing camera frames to the engine.

use std::fmt;

use crate::core::config::FramesConfig;
use crate::core::{BridgeError, Result};

/// Two equally sized pixel buffers: `input` is filled by the frame producer,
/// `output` receives the vertically mirrored copy.
///
/// Both buffers are always exactly `width * height * bytes_per_pixel` bytes.
/// They are allocated on the first [`ensure_capacity`](Self::ensure_capacity)
/// and reallocated only when the dimensions change.
pub struct FrameTransferBuffer {
    input: Vec<u8>,
    output: Vec<u8>,
    dimensions: Option<(u32, u32)>,
    bytes_per_pixel: usize,
    max_dimension: u32,
    disposed: bool,
}

impl FrameTransferBuffer {
    /// RGBA8 buffer with the default dimension limit.
    pub fn new() -> Self {
        Self::with_limits(4, FramesConfig::DEFAULT_MAX_DIMENSION)
    }

    pub fn with_limits(bytes_per_pixel: usize, max_dimension: u32) -> Self {
        Self {
            input: Vec::new(),
            output: Vec::new(),
            dimensions: None,
            bytes_per_pixel,
            max_dimension,
            disposed: false,
        }
    }

    pub fn from_config(config: &FramesConfig) -> Self {
        Self::with_limits(config.bytes_per_pixel, config.max_dimension)
    }

    /// Size both buffers for a `width` x `height` frame.
    ///
    /// Same dimensions as last time: nothing happens. Otherwise both buffers
    /// are replaced by fresh allocations of the exact new size.
    pub fn ensure_capacity(&mut self, width: u32, height: u32) -> Result<()> {
        self.check_live()?;
        if self.dimensions == Some((width, height)) {
            return Ok(());
        }

        let requested = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(self.bytes_per_pixel))
            .ok_or(BridgeError::OutOfMemory {
                requested: usize::MAX,
            })?;
        if width > self.max_dimension || height > self.max_dimension {
            tracing::error!(
                "Frame {}x{} exceeds the {} pixel dimension limit",
                width,
                height,
                self.max_dimension
            );
            return Err(BridgeError::OutOfMemory { requested });
        }

        // Allocate both before dropping the old ones.
        let input = allocate(requested)?;
        let output = allocate(requested)?;
        self.input = input;
        self.output = output;
        self.dimensions = Some((width, height));
        tracing::debug!("Frame transfer buffers resized to {}x{}", width, height);
        Ok(())
    }

    /// Copy input row `height - 1 - r` into output row `r` for every row and
    /// return the output.
    pub fn mirror_into(&mut self) -> Result<&[u8]> {
        self.check_live()?;
        let row = self.row_bytes();
        if row > 0 {
            for (dst, src) in self
                .output
                .chunks_exact_mut(row)
                .zip(self.input.chunks_exact(row).rev())
            {
                dst.copy_from_slice(src);
            }
        }
        Ok(&self.output)
    }

    pub fn width(&self) -> u32 {
        self.dimensions.map_or(0, |(w, _)| w)
    }

    pub fn height(&self) -> u32 {
        self.dimensions.map_or(0, |(_, h)| h)
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// Bytes in one row.
    pub fn row_bytes(&self) -> usize {
        self.width() as usize * self.bytes_per_pixel
    }

    /// Bytes in each buffer.
    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub fn is_allocated(&self) -> bool {
        self.dimensions.is_some()
    }

    pub fn input(&self) -> Result<&[u8]> {
        self.check_live()?;
        Ok(&self.input)
    }

    pub fn input_mut(&mut self) -> Result<&mut [u8]> {
        self.check_live()?;
        Ok(&mut self.input)
    }

    pub fn output(&self) -> Result<&[u8]> {
        self.check_live()?;
        Ok(&self.output)
    }

    /// Start of the input buffer, for native code to write into. Valid until
    /// the next reallocation or disposal.
    pub fn input_ptr(&mut self) -> Result<*mut u8> {
        self.check_live()?;
        Ok(self.input.as_mut_ptr())
    }

    /// Start of the output buffer. Valid until the next reallocation or
    /// disposal.
    pub fn output_ptr(&self) -> Result<*const u8> {
        self.check_live()?;
        Ok(self.output.as_ptr())
    }

    /// Free both buffers. Further use fails with
    /// [`BridgeError::UseAfterDispose`]; disposing again does nothing.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.input = Vec::new();
        self.output = Vec::new();
        self.dimensions = None;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn check_live(&self) -> Result<()> {
        if self.disposed {
            tracing::error!("FrameTransferBuffer used after dispose");
            return Err(BridgeError::UseAfterDispose("FrameTransferBuffer"));
        }
        Ok(())
    }
}

fn allocate(len: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| BridgeError::OutOfMemory { requested: len })?;
    buffer.resize(len, 0);
    Ok(buffer)
}

impl Default for FrameTransferBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FrameTransferBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameTransferBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("bytes_per_pixel", &self.bytes_per_pixel)
            .field("disposed", &self.disposed)
            .finish()
    }
}
