//! Frame buffer types.
//!
//! A [`HardwareImage`] is a filled slot taken out of a hardware pool; it is
//! handed back to the pool on release. Consumers never see it directly, they
//! get a [`FrameBuffer`] that borrows from the lease holding the image, so a
//! frame cannot outlive its release.

/// Pixel layout of an image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Three-plane YUV 4:2:0 with per-plane strides.
    Yuv420,
    /// Single-plane 8-bit luma.
    Gray8,
}

impl PixelFormat {
    /// Number of planes a buffer of this format carries.
    pub fn plane_count(self) -> usize {
        match self {
            PixelFormat::Yuv420 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Memory backing a single plane.
#[derive(Clone)]
pub struct PlaneBuffer {
    pub data: Vec<u8>,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

/// A filled buffer slot taken out of a hardware pool.
pub struct HardwareImage {
    slot: usize,
    format: PixelFormat,
    width: u32,
    height: u32,
    timestamp_nanos: i64,
    planes: Vec<PlaneBuffer>,
}

impl HardwareImage {
    pub fn new(
        slot: usize,
        format: PixelFormat,
        width: u32,
        height: u32,
        timestamp_nanos: i64,
        planes: Vec<PlaneBuffer>,
    ) -> Self {
        Self {
            slot,
            format,
            width,
            height,
            timestamp_nanos,
            planes,
        }
    }

    /// Index of the pool slot this image occupies.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    /// Takes the plane memory back out, used by pools to recycle it.
    pub fn into_planes(self) -> Vec<PlaneBuffer> {
        self.planes
    }

    /// Borrows the image as a consumer-facing view.
    pub fn view(&self) -> FrameBuffer<'_> {
        FrameBuffer {
            format: self.format,
            width: self.width,
            height: self.height,
            timestamp_nanos: self.timestamp_nanos,
            planes: self
                .planes
                .iter()
                .map(|p| PlaneView {
                    data: &p.data,
                    row_stride: p.row_stride,
                    pixel_stride: p.pixel_stride,
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for HardwareImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareImage")
            .field("slot", &self.slot)
            .field("format", &self.format)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_nanos", &self.timestamp_nanos)
            .finish()
    }
}

/// Borrowed view of one plane.
#[derive(Debug, Clone, Copy)]
pub struct PlaneView<'a> {
    pub data: &'a [u8],
    pub row_stride: usize,
    pub pixel_stride: usize,
}

/// Borrowed view over hardware-owned memory, valid for the duration of one
/// consumer call.
#[derive(Debug, Clone)]
pub struct FrameBuffer<'a> {
    format: PixelFormat,
    width: u32,
    height: u32,
    timestamp_nanos: i64,
    planes: Vec<PlaneView<'a>>,
}

impl<'a> FrameBuffer<'a> {
    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Sensor timestamp in nanoseconds.
    #[inline]
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    #[inline]
    pub fn planes(&self) -> &[PlaneView<'a>] {
        &self.planes
    }

    /// Validates that plane count and plane sizes match the dimensions.
    pub fn is_valid(&self) -> bool {
        if self.planes.len() != self.format.plane_count() {
            return false;
        }
        let (w, h) = (self.width as usize, self.height as usize);
        self.planes.iter().enumerate().all(|(i, p)| {
            // Chroma planes of 4:2:0 are subsampled by two in each direction.
            let (pw, ph) = if i == 0 { (w, h) } else { (w.div_ceil(2), h.div_ceil(2)) };
            let row_bytes = pw * p.pixel_stride;
            p.row_stride >= row_bytes
                && p.data.len() >= p.row_stride * ph.saturating_sub(1) + row_bytes
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_image(width: u32, height: u32) -> HardwareImage {
        let plane = PlaneBuffer {
            data: vec![0u8; (width * height) as usize],
            row_stride: width as usize,
            pixel_stride: 1,
        };
        HardwareImage::new(0, PixelFormat::Gray8, width, height, 42, vec![plane])
    }

    #[test]
    fn test_view_reflects_image() {
        let image = gray_image(640, 480);
        let view = image.view();

        assert_eq!(view.width(), 640);
        assert_eq!(view.height(), 480);
        assert_eq!(view.timestamp_nanos(), 42);
        assert_eq!(view.planes().len(), 1);
        assert!(view.is_valid());
    }

    #[test]
    fn test_view_invalid_plane_size() {
        let plane = PlaneBuffer {
            data: vec![0u8; 100],
            row_stride: 640,
            pixel_stride: 1,
        };
        let image = HardwareImage::new(0, PixelFormat::Gray8, 640, 480, 0, vec![plane]);

        assert!(!image.view().is_valid());
    }

    #[test]
    fn test_yuv_plane_count() {
        assert_eq!(PixelFormat::Yuv420.plane_count(), 3);
        let image = gray_image(4, 4);
        let view = image.view();
        assert_eq!(view.format(), PixelFormat::Gray8);
    }
}
