//! Frames produced for the engine and the producer that builds them.

use serde::{Deserialize, Serialize};

use super::FrameTransferBuffer;
use crate::core::{BridgeError, Result};

/// Pinhole camera intrinsics. Owned by exactly one frame at a time.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntrinsicData {
    pub focal_length: [f32; 2],
    pub principal_point: [f32; 2],
    pub resolution: [u32; 2],
}

/// Camera pose in world space. Owned by exactly one frame at a time.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtrinsicData {
    pub position: [f32; 3],
    /// Unit quaternion, `[x, y, z, w]`.
    pub rotation: [f32; 4],
}

/// Owned, mirrored pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: usize,
    pub pixels: Vec<u8>,
}

/// One frame ready for the engine. Owns its pixels and metadata.
#[derive(Debug, PartialEq)]
pub struct TransferableFrame {
    pub image: Image,
    pub intrinsics: Option<IntrinsicData>,
    pub extrinsics: Option<ExtrinsicData>,
    /// Capture time in seconds.
    pub timestamp: f64,
}

/// Camera image the producer reads from.
pub trait ImageSource {
    /// `false` when the capture produced nothing usable.
    fn is_valid(&self) -> bool;

    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Capture time in seconds.
    fn timestamp(&self) -> f64;

    /// Write the image, scaled to `width` x `height`, into `dst`, which holds
    /// exactly `width * height * bytes_per_pixel` bytes.
    fn convert_into(&self, dst: &mut [u8], width: u32, height: u32, bytes_per_pixel: usize) -> Result<()>;
}

/// Tightly packed image already in memory.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: usize,
    pub pixels: Vec<u8>,
    pub timestamp: f64,
}

impl ImageSource for RawImage {
    fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * self.bytes_per_pixel
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Nearest-neighbour resample.
    fn convert_into(&self, dst: &mut [u8], width: u32, height: u32, bytes_per_pixel: usize) -> Result<()> {
        if bytes_per_pixel != self.bytes_per_pixel {
            return Err(BridgeError::Payload(format!(
                "cannot convert {} to {} bytes per pixel",
                self.bytes_per_pixel, bytes_per_pixel
            )));
        }
        let (src_w, src_h) = (self.width as usize, self.height as usize);
        let (dst_w, dst_h) = (width as usize, height as usize);
        if dst.len() != dst_w * dst_h * bytes_per_pixel {
            return Err(BridgeError::Payload(format!(
                "destination holds {} bytes, {}x{} needs {}",
                dst.len(),
                width,
                height,
                dst_w * dst_h * bytes_per_pixel
            )));
        }
        for y in 0..dst_h {
            let sy = y * src_h / dst_h;
            for x in 0..dst_w {
                let sx = x * src_w / dst_w;
                let src = (sy * src_w + sx) * bytes_per_pixel;
                let out = (y * dst_w + x) * bytes_per_pixel;
                dst[out..out + bytes_per_pixel].copy_from_slice(&self.pixels[src..src + bytes_per_pixel]);
            }
        }
        Ok(())
    }
}

/// Gathers one camera image and its metadata, then produces a
/// [`TransferableFrame`] through the shared transfer buffer.
pub struct PendingFrame<'a, S: ImageSource> {
    buffer: &'a mut FrameTransferBuffer,
    source: Option<S>,
    intrinsics: Option<IntrinsicData>,
    extrinsics: Option<ExtrinsicData>,
    target_size: Option<(u32, u32)>,
}

impl<'a, S: ImageSource> PendingFrame<'a, S> {
    pub fn new(buffer: &'a mut FrameTransferBuffer, source: Option<S>) -> Self {
        Self {
            buffer,
            source,
            intrinsics: None,
            extrinsics: None,
            target_size: None,
        }
    }

    pub fn with_intrinsics(mut self, intrinsics: IntrinsicData) -> Self {
        self.intrinsics = Some(intrinsics);
        self
    }

    pub fn with_extrinsics(mut self, extrinsics: ExtrinsicData) -> Self {
        self.extrinsics = Some(extrinsics);
        self
    }

    /// Resample to this size instead of the source's.
    pub fn with_target_size(mut self, width: u32, height: u32) -> Self {
        self.target_size = Some((width, height));
        self
    }

    pub fn intrinsics(&self) -> Option<&IntrinsicData> {
        self.intrinsics.as_ref()
    }

    pub fn extrinsics(&self) -> Option<&ExtrinsicData> {
        self.extrinsics.as_ref()
    }

    /// Hand back the metadata the producer still owns.
    pub fn into_metadata(self) -> (Option<IntrinsicData>, Option<ExtrinsicData>) {
        (self.intrinsics, self.extrinsics)
    }

    /// Produce the frame.
    ///
    /// `Ok(None)` when there is no valid image; the metadata stays with the
    /// producer. On success the metadata moves into the frame.
    pub fn evaluate(&mut self) -> Result<Option<TransferableFrame>> {
        let Some(source) = self.source.as_ref().filter(|s| s.is_valid()) else {
            tracing::trace!("No valid camera image; frame skipped");
            return Ok(None);
        };
        let (width, height) = self
            .target_size
            .unwrap_or((source.width(), source.height()));

        self.buffer.ensure_capacity(width, height)?;
        let bytes_per_pixel = self.buffer.bytes_per_pixel();
        source.convert_into(self.buffer.input_mut()?, width, height, bytes_per_pixel)?;
        let pixels = self.buffer.mirror_into()?.to_vec();

        Ok(Some(TransferableFrame {
            image: Image {
                width,
                height,
                bytes_per_pixel,
                pixels,
            },
            intrinsics: self.intrinsics.take(),
            extrinsics: self.extrinsics.take(),
            timestamp: source.timestamp(),
        }))
    }
}
