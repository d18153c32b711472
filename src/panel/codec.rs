use bytes::Bytes;
use std::io::Cursor;

/// Image formats a panel can be streamed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub const ALL: [ImageFormat; 2] = [ImageFormat::Png, ImageFormat::Jpeg];

    /// Parse the stream extension used in `/mfd/mfd.<ext>` (`mpng`, `mjpeg`).
    pub fn from_stream_extension(ext: &str) -> Option<Self> {
        match ext {
            "mpng" => Some(Self::Png),
            "mjpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }

    /// Subtype used in `Content-Type: image/<subtype>`.
    pub fn subtype(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }
}

/// A raw RGBA8 frame pushed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    /// A frame filled with a single RGBA colour.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self { width, height, pixels }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("frame is {width}x{height} but holds {len} bytes")]
    BadDimensions { width: u32, height: u32, len: usize },
    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
}

/// Turns raw frames into encoded image bytes.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame, format: ImageFormat) -> Result<Bytes, EncodeError>;
}

/// [`FrameEncoder`] backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageEncoder;

impl FrameEncoder for ImageEncoder {
    fn encode(&self, frame: &Frame, format: ImageFormat) -> Result<Bytes, EncodeError> {
        let rgba = image::RgbaImage::from_raw(frame.width, frame.height, frame.pixels.clone())
            .ok_or(EncodeError::BadDimensions {
                width: frame.width,
                height: frame.height,
                len: frame.pixels.len(),
            })?;

        let mut out = Cursor::new(Vec::new());
        match format {
            ImageFormat::Png => rgba.write_to(&mut out, image::ImageFormat::Png)?,
            // JPEG has no alpha channel.
            ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(rgba)
                .to_rgb8()
                .write_to(&mut out, image::ImageFormat::Jpeg)?,
        }
        Ok(Bytes::from(out.into_inner()))
    }
}
