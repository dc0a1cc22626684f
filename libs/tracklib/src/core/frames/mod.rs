//! Camera frame staging and hand-off.
//!
//! The engine and the host disagree on the vertical image origin, so every
//! frame goes through a [`FrameTransferBuffer`] that flips it row by row
//! before the pixels move into a [`TransferableFrame`].

mod transfer_buffer;
mod transferable;

pub use transfer_buffer::FrameTransferBuffer;
pub use transferable::{
    ExtrinsicData, Image, ImageSource, IntrinsicData, PendingFrame, RawImage, TransferableFrame,
};
