//! Frame types and errors shared across the capture pipeline

use thiserror::Error;

/// Colorspace of a converted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// Single luma channel, 1 byte per pixel
    Grayscale,
    /// Interleaved R, G, B, 3 bytes per pixel
    Rgb,
}

impl ColorSpace {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ColorSpace::Grayscale => 1,
            ColorSpace::Rgb => 3,
        }
    }
}

/// Pixel formats the capture hardware can deliver
///
/// Only `Uyvy8` is convertible; the others exist so the upstream
/// collaborator can be told apart before capture starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 4:2:2 8-bit, macropixel [U, Y0, V, Y1]
    Uyvy8,
    /// Packed 4:2:2 10-bit (128 bits per 6 pixels)
    Yuv10,
    /// Packed BGRA 8-bit
    Bgra8,
}

impl PixelFormat {
    /// Row stride in bytes for a row of `width` pixels
    pub fn row_bytes(self, width: u32) -> u32 {
        match self {
            PixelFormat::Uyvy8 => width * 2,
            PixelFormat::Yuv10 => (width + 47) / 48 * 128,
            PixelFormat::Bgra8 => width * 4,
        }
    }
}

/// Errors surfaced at the capture boundary
#[derive(Debug, Error)]
pub enum VideoError {
    #[error("frame geometry mismatch: {width}x{height} {format:?} with {row_bytes} row bytes, {len} bytes supplied")]
    BadGeometry {
        width: u32,
        height: u32,
        row_bytes: u32,
        format: PixelFormat,
        len: usize,
    },
    #[error("unsupported pixel format {0:?}, capture must deliver Uyvy8")]
    UnsupportedFormat(PixelFormat),
}

/// One raw frame borrowed from the capture hardware.
///
/// Owns a release token for the vendor's buffer: the hook runs exactly once
/// when the `RawFrame` is dropped, which the session does only after the
/// conversion barrier, so no worker can still be reading the data.
pub struct RawFrame {
    width: u32,
    height: u32,
    row_bytes: u32,
    format: PixelFormat,
    data: *const u8,
    len: usize,
    release: Option<Box<dyn FnOnce() + Send>>,
}

// SAFETY: the data pointer is read-only for the lifetime of the frame and
// the release hook is Send; the frame moves between threads as a whole.
unsafe impl Send for RawFrame {}

impl RawFrame {
    /// Wrap a vendor buffer.
    ///
    /// Validates geometry: `row_bytes` must match the format's stride for
    /// `width`, `len` must be exactly `row_bytes * height`, and 4:2:2
    /// formats need an even width (whole macropixels per row).
    ///
    /// # Safety
    /// `data` must point to `len` readable bytes that stay valid until
    /// `release` is invoked.
    pub unsafe fn from_raw_parts(
        data: *const u8,
        len: usize,
        width: u32,
        height: u32,
        row_bytes: u32,
        format: PixelFormat,
        release: impl FnOnce() + Send + 'static,
    ) -> Result<Self, VideoError> {
        let stride_ok = row_bytes == format.row_bytes(width);
        let macropixel_ok = format != PixelFormat::Uyvy8 || width % 2 == 0;
        let size_ok = len == row_bytes as usize * height as usize;

        if width == 0 || height == 0 || !stride_ok || !macropixel_ok || !size_ok {
            // the buffer is still handed back to the vendor
            release();
            return Err(VideoError::BadGeometry {
                width,
                height,
                row_bytes,
                format,
                len,
            });
        }

        Ok(RawFrame {
            width,
            height,
            row_bytes,
            format,
            data,
            len,
            release: Some(Box::new(release)),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_bytes(&self) -> u32 {
        self.row_bytes
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn total_bytes(&self) -> usize {
        self.len
    }

    pub fn bytes(&self) -> &[u8] {
        // SAFETY: validated at construction, valid until the release hook runs
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// One fully converted frame.
///
/// The pixel buffer is exactly `height * row_bytes` bytes and never mutated
/// after construction; producer and consumer share it through `Arc`.
#[derive(Debug)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    row_bytes: u32,
    colorspace: ColorSpace,
    pixels: Box<[u8]>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, row_bytes: u32, colorspace: ColorSpace) -> Self {
        let pixels = vec![0u8; height as usize * row_bytes as usize].into_boxed_slice();
        VideoFrame {
            width,
            height,
            row_bytes,
            colorspace,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn row_bytes(&self) -> u32 {
        self.row_bytes
    }

    pub fn colorspace(&self) -> ColorSpace {
        self.colorspace
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}
