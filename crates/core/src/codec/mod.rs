//! Length-prefixed image stream codec.
//!
//! The camera pushes frames over a plain TCP connection. Each frame is a
//! 4-byte little-endian length followed by that many bytes of an encoded
//! image file (JPEG or PNG):
//!
//! ```text
//! +----------------+---------------------------------+
//! | u32 LE length  |  `length` bytes of image file   |
//! +----------------+---------------------------------+
//! ```
//!
//! A length of zero is an explicit end-of-stream marker.
//!
//! Only decoding is implemented for images; the camera does the encoding.
//! The same prefix framing carries JSON messages on the control channel
//! (see [`crate::discovery::BeaconDiscovery`]), which is why
//! [`read_prefixed`] / [`write_prefixed`] operate on raw bytes.

pub mod frame;

use std::io::{self, Cursor, Read, Write};

use image::{DynamicImage, ImageReader};

pub use frame::Frame;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Length prefix value that marks a graceful end of stream.
pub const END_OF_STREAM: u32 = 0;

/// Default upper bound on a single frame's encoded size (64 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Why a stream stopped producing frames.
#[derive(Debug, thiserror::Error)]
pub enum StreamFault {
    /// The connection closed in the middle of a prefix or payload.
    #[error("short read: connection closed mid-frame")]
    ShortRead,

    /// Any other socket error.
    #[error("stream I/O error: {0}")]
    Io(io::Error),

    /// The payload was not a decodable image.
    #[error("frame decode failed: {0}")]
    Decode(#[from] image::ImageError),

    /// The length prefix exceeds the configured maximum.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    Oversized { len: usize, max: usize },
}

impl From<io::Error> for StreamFault {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::ShortRead
        } else {
            Self::Io(e)
        }
    }
}

/// Outcome of one read cycle on the image stream.
///
/// Keeps "the camera said goodbye" apart from "the stream broke", even though
/// the session reacts to both the same way.
#[derive(Debug)]
pub enum StreamEvent {
    Frame(Frame),
    EndOfStream,
    Fault(StreamFault),
}

/// Read a single `u32` little-endian length prefix.
pub fn read_length_prefix<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; LENGTH_PREFIX_LEN];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read one length-prefixed payload.
///
/// Returns `Ok(None)` for the zero-length end-of-stream marker.
pub fn read_prefixed<R: Read>(reader: &mut R, max_len: usize) -> Result<Option<Vec<u8>>, StreamFault> {
    let len = read_length_prefix(reader)?;
    if len == END_OF_STREAM {
        return Ok(None);
    }

    let len = len as usize;
    if len > max_len {
        return Err(StreamFault::Oversized { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(payload))
}

/// Write one length-prefixed payload. An empty payload writes the end-of-stream marker.
pub fn write_prefixed<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds u32 length prefix"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Decode an image-file payload, sniffing the container format from its magic bytes.
pub fn decode(payload: &[u8]) -> Result<DynamicImage, image::ImageError> {
    let image = ImageReader::new(Cursor::new(payload))
        .with_guessed_format()?
        .decode()?;
    Ok(image)
}

/// Pulls [`StreamEvent`]s off a byte stream.
///
/// Wraps any [`Read`] (normally a buffered `TcpStream`) and numbers frames
/// in arrival order.
pub struct FrameReader<R> {
    inner: R,
    max_frame_len: usize,
    next_sequence: u64,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_frame_len(inner, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(inner: R, max_frame_len: usize) -> Self {
        Self {
            inner,
            max_frame_len,
            next_sequence: 0,
        }
    }

    /// Number of frames successfully decoded so far.
    pub fn frames_read(&self) -> u64 {
        self.next_sequence
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Block until the next frame, the end-of-stream marker, or a fault.
    pub fn next_event(&mut self) -> StreamEvent {
        let payload = match read_prefixed(&mut self.inner, self.max_frame_len) {
            Ok(Some(payload)) => payload,
            Ok(None) => return StreamEvent::EndOfStream,
            Err(fault) => return StreamEvent::Fault(fault),
        };

        match decode(&payload) {
            Ok(image) => {
                let frame = Frame::new(image, payload.len(), self.next_sequence);
                self.next_sequence += 1;
                tracing::trace!(
                    sequence = frame.sequence(),
                    bytes = frame.encoded_len(),
                    width = frame.width(),
                    height = frame.height(),
                    "frame decoded"
                );
                StreamEvent::Frame(frame)
            }
            Err(e) => StreamEvent::Fault(StreamFault::Decode(e)),
        }
    }
}
