//! Frame staging and hand-off.

use tracklib::{
    BridgeConfig, BridgeError, ExtrinsicData, FrameTransferBuffer, IntrinsicData, PendingFrame,
    RawImage,
};

#[test]
fn test_mirror_two_by_two() {
    let mut buffer = FrameTransferBuffer::new();
    buffer.ensure_capacity(2, 2).unwrap();

    let row_a = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let row_b = [9u8, 10, 11, 12, 13, 14, 15, 16];
    let input = buffer.input_mut().unwrap();
    input[..8].copy_from_slice(&row_a);
    input[8..].copy_from_slice(&row_b);

    let output = buffer.mirror_into().unwrap();
    assert_eq!(&output[..8], &row_b);
    assert_eq!(&output[8..], &row_a);
}

#[test]
fn test_same_dimensions_keep_buffer_identity() {
    let mut buffer = FrameTransferBuffer::new();
    buffer.ensure_capacity(64, 48).unwrap();
    let input = buffer.input_ptr().unwrap();
    let output = buffer.output_ptr().unwrap();

    buffer.ensure_capacity(64, 48).unwrap();
    assert_eq!(buffer.input_ptr().unwrap(), input);
    assert_eq!(buffer.output_ptr().unwrap(), output);
}

#[test]
fn test_new_dimensions_reallocate_both_buffers() {
    let mut buffer = FrameTransferBuffer::new();
    buffer.ensure_capacity(64, 48).unwrap();
    let input = buffer.input_ptr().unwrap();
    let output = buffer.output_ptr().unwrap();

    buffer.ensure_capacity(32, 24).unwrap();
    assert_ne!(buffer.input_ptr().unwrap(), input);
    assert_ne!(buffer.output_ptr().unwrap(), output);
    assert_eq!(buffer.len(), 32 * 24 * 4);
    assert_eq!(buffer.output().unwrap().len(), 32 * 24 * 4);
    assert_eq!((buffer.width(), buffer.height()), (32, 24));
}

#[test]
fn test_configured_limits() {
    let config = BridgeConfig::from_yaml("frames:\n  bytes_per_pixel: 3\n  max_dimension: 100\n")
        .unwrap();
    let mut buffer = FrameTransferBuffer::from_config(&config.frames);
    buffer.ensure_capacity(10, 10).unwrap();
    assert_eq!(buffer.len(), 300);
    assert!(matches!(
        buffer.ensure_capacity(101, 1),
        Err(BridgeError::OutOfMemory { .. })
    ));
}

#[test]
fn test_dispose_then_use() {
    let mut buffer = FrameTransferBuffer::new();
    buffer.ensure_capacity(2, 2).unwrap();
    buffer.dispose();
    assert!(matches!(
        buffer.mirror_into(),
        Err(BridgeError::UseAfterDispose("FrameTransferBuffer"))
    ));
}

#[test]
fn test_frame_production_transfers_ownership() {
    let mut buffer = FrameTransferBuffer::new();
    let source = RawImage {
        width: 1,
        height: 2,
        bytes_per_pixel: 4,
        pixels: vec![1, 1, 1, 1, 2, 2, 2, 2],
        timestamp: 3.25,
    };
    let mut producer = PendingFrame::new(&mut buffer, Some(source))
        .with_intrinsics(IntrinsicData {
            focal_length: [600.0, 600.0],
            principal_point: [0.5, 1.0],
            resolution: [1, 2],
        })
        .with_extrinsics(ExtrinsicData {
            position: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        });

    let frame = producer.evaluate().unwrap().unwrap();
    assert_eq!(frame.image.pixels, vec![2, 2, 2, 2, 1, 1, 1, 1]);
    assert_eq!(frame.timestamp, 3.25);
    assert!(frame.intrinsics.is_some());
    assert!(frame.extrinsics.is_some());

    // Metadata was moved, so a second evaluation carries none.
    let again = producer.evaluate().unwrap().unwrap();
    assert!(again.intrinsics.is_none());
    assert!(again.extrinsics.is_none());
}
