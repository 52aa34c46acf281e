use std::path::Path;

use image::DynamicImage;

use crate::error::Result;

/// One decoded image from the camera stream.
///
/// Produced once per successful read cycle by [`FrameReader`](super::FrameReader).
/// Frames are moved, never shared: the capture thread hands each one to the
/// [`FrameChannel`](crate::FrameChannel), and the consumer takes it out.
#[derive(Debug, Clone)]
pub struct Frame {
    image: DynamicImage,
    encoded_len: usize,
    sequence: u64,
}

impl Frame {
    pub fn new(image: DynamicImage, encoded_len: usize, sequence: u64) -> Self {
        Self {
            image,
            encoded_len,
            sequence,
        }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    /// Size of the payload as it arrived on the wire (the length prefix value).
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }

    /// Position of this frame in its connection's stream, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Write the frame to disk; the format is picked from the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.image.save(path)?;
        tracing::info!(path = %path.display(), sequence = self.sequence, "frame saved");
        Ok(())
    }
}
