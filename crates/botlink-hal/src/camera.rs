//! Camera frames and the latest-frame slot.

use std::io::Cursor;
use std::sync::Arc;

use botlink_types::BridgeError;
use image::{ImageFormat, RgbImage};
use tokio::sync::watch;

/// A raw RGB24 image frame delivered by the device camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Row-major RGB24 pixel data, `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl CameraFrame {
    /// A uniformly coloured frame.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self { width, height, data }
    }

    /// View the frame as an [`RgbImage`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HardwareFault`] when the buffer length does not
    /// match the frame dimensions.
    pub fn to_image(&self) -> Result<RgbImage, BridgeError> {
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            BridgeError::HardwareFault {
                component: "camera".to_string(),
                details: format!(
                    "frame buffer of {} bytes does not match {}x{}",
                    self.data.len(),
                    self.width,
                    self.height
                ),
            }
        })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.into_raw(),
        }
    }

    /// Encode the frame as PNG.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::HardwareFault`] for an inconsistent buffer and
    /// [`BridgeError::Serialization`] when the encoder fails.
    pub fn encode_png(&self) -> Result<Vec<u8>, BridgeError> {
        let image = self.to_image()?;
        let mut buf = Cursor::new(Vec::new());
        image
            .write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| BridgeError::Serialization(format!("png encode failed: {e}")))?;
        Ok(buf.into_inner())
    }
}

/// Holds the most recently captured frame.
///
/// Writers replace the frame; readers always get whatever was stored last
/// and never wait for a new one.
#[derive(Debug)]
pub struct FrameSlot {
    tx: watch::Sender<Option<Arc<CameraFrame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn store(&self, frame: Arc<CameraFrame>) {
        self.tx.send_replace(Some(frame));
    }

    pub fn latest(&self) -> Option<Arc<CameraFrame>> {
        self.tx.borrow().clone()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_frame_has_rgb24_layout() {
        let frame = CameraFrame::solid(2, 2, [1, 2, 3]);
        assert_eq!(frame.data.len(), 12);
        assert_eq!(&frame.data[..6], &[1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn encode_png_produces_png_signature() {
        let frame = CameraFrame::solid(8, 4, [200, 10, 10]);
        let png = frame.encode_png().unwrap();
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }

    #[test]
    fn inconsistent_buffer_is_rejected() {
        let frame = CameraFrame {
            width: 4,
            height: 4,
            data: vec![0u8; 5],
        };
        assert!(matches!(frame.encode_png(), Err(BridgeError::HardwareFault { .. })));
    }

    #[test]
    fn frame_slot_keeps_latest() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        slot.store(Arc::new(CameraFrame::solid(1, 1, [0, 0, 0])));
        slot.store(Arc::new(CameraFrame::solid(2, 1, [0, 0, 0])));
        assert_eq!(slot.latest().unwrap().width, 2);
        // Reading does not consume.
        assert!(slot.latest().is_some());
    }
}
