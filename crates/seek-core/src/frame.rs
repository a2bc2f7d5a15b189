//! Frame types: raw sensor buffer, visible region and corrected output.

use image::{GrayImage, ImageBuffer, Luma};

/// Rectangle of image pixels inside a raw sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Raw buffer dimensions plus the visible region inside them.
///
/// The visible region is fixed at construction and always lies inside the
/// raw bounds; `new` is a `const fn` so model constants are checked at
/// compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    raw_width: usize,
    raw_height: usize,
    roi: Roi,
}

impl FrameGeometry {
    pub const fn new(raw_width: usize, raw_height: usize, roi: Roi) -> Self {
        assert!(roi.width > 0 && roi.height > 0, "visible region must not be empty");
        assert!(roi.x + roi.width <= raw_width, "visible region exceeds raw width");
        assert!(roi.y + roi.height <= raw_height, "visible region exceeds raw height");
        Self {
            raw_width,
            raw_height,
            roi,
        }
    }

    pub const fn raw_width(&self) -> usize {
        self.raw_width
    }

    pub const fn raw_height(&self) -> usize {
        self.raw_height
    }

    pub const fn roi(&self) -> Roi {
        self.roi
    }

    /// Number of `u16` samples in a raw frame.
    pub const fn raw_len(&self) -> usize {
        self.raw_width * self.raw_height
    }

    /// Visible (width, height).
    pub const fn visible_size(&self) -> (usize, usize) {
        (self.roi.width, self.roi.height)
    }

    pub const fn visible_len(&self) -> usize {
        self.roi.width * self.roi.height
    }
}

/// The sensor's raw output, including metadata rows and columns.
///
/// One owned backing buffer; the visible region is addressed through
/// [`FrameGeometry::roi`] rather than a second aliasing buffer.
#[derive(Debug, Clone)]
pub struct RawFrame {
    geometry: FrameGeometry,
    data: Vec<u16>,
}

impl RawFrame {
    pub fn new(geometry: FrameGeometry) -> Self {
        Self {
            geometry,
            data: vec![0; geometry.raw_len()],
        }
    }

    pub fn geometry(&self) -> FrameGeometry {
        self.geometry
    }

    pub fn samples(&self) -> &[u16] {
        &self.data
    }

    /// Mutable access for the transport to fill in place.
    pub fn samples_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }

    /// Sample at a flat offset into the raw buffer (metadata fields).
    pub fn sample(&self, offset: usize) -> Option<u16> {
        self.data.get(offset).copied()
    }

    /// Sample at visible coordinates.
    pub fn visible(&self, x: usize, y: usize) -> Option<u16> {
        let roi = self.geometry.roi;
        if x >= roi.width || y >= roi.height {
            return None;
        }
        self.sample((roi.y + y) * self.geometry.raw_width + roi.x + x)
    }

    /// Rows of the visible region, top to bottom.
    pub fn visible_rows(&self) -> impl Iterator<Item = &[u16]> + '_ {
        let roi = self.geometry.roi;
        self.data
            .chunks_exact(self.geometry.raw_width)
            .skip(roi.y)
            .take(roi.height)
            .map(move |row| &row[roi.x..roi.x + roi.width])
    }

    /// Copy the visible region into `dst`, which must hold exactly
    /// `visible_len()` samples.
    pub fn copy_visible_into(&self, dst: &mut [u16]) -> Result<(), FrameError> {
        let roi = self.geometry.roi;
        let expected = self.geometry.visible_len();
        if dst.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: dst.len(),
            });
        }
        for (dst_row, src_row) in dst.chunks_exact_mut(roi.width).zip(self.visible_rows()) {
            dst_row.copy_from_slice(src_row);
        }
        Ok(())
    }

    pub fn visible_to_vec(&self) -> Vec<u16> {
        let mut out = Vec::with_capacity(self.geometry.visible_len());
        for row in self.visible_rows() {
            out.extend_from_slice(row);
        }
        out
    }
}

/// A corrected single-channel 16-bit frame at visible resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    /// Row-major samples (width * height).
    pub data: Vec<u16>,
}

impl Frame {
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, 0)
    }

    pub fn filled(width: usize, height: usize, value: u16) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    pub fn from_vec(width: usize, height: usize, data: Vec<u16>) -> Result<Self, FrameError> {
        if data.len() != width * height {
            return Err(FrameError::InvalidLength {
                expected: width * height,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn get(&self, x: usize, y: usize) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }

    pub fn row(&self, y: usize) -> Option<&[u16]> {
        if y >= self.height {
            return None;
        }
        self.data.get(y * self.width..(y + 1) * self.width)
    }

    /// Smallest and largest sample, `None` for an empty frame.
    pub fn min_max(&self) -> Option<(u16, u16)> {
        let min = self.data.iter().copied().min()?;
        let max = self.data.iter().copied().max()?;
        Some((min, max))
    }

    /// Average sample value.
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| f64::from(v)).sum::<f64>() / self.data.len() as f64
    }

    /// Convert into an `image` buffer for encoding or display.
    pub fn to_image(&self) -> Option<ImageBuffer<Luma<u16>, Vec<u16>>> {
        let width = u32::try_from(self.width).ok()?;
        let height = u32::try_from(self.height).ok()?;
        ImageBuffer::from_raw(width, height, self.data.clone())
    }

    /// Min-max stretch to 8 bits for viewing. A flat frame maps to black.
    pub fn to_gray8(&self) -> Option<GrayImage> {
        let width = u32::try_from(self.width).ok()?;
        let height = u32::try_from(self.height).ok()?;
        let (min, max) = self.min_max().unwrap_or((0, 0));
        let span = u32::from(max - min).max(1);
        let data = self
            .data
            .iter()
            .map(|&v| (u32::from(v - min) * 255 / span) as u8)
            .collect();
        GrayImage::from_raw(width, height, data)
    }

    pub fn from_image(image: ImageBuffer<Luma<u16>, Vec<u16>>) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            data: image.into_raw(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame size mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    SizeMismatch {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: FrameGeometry = FrameGeometry::new(
        4,
        3,
        Roi {
            x: 1,
            y: 1,
            width: 2,
            height: 2,
        },
    );

    fn numbered() -> RawFrame {
        let mut raw = RawFrame::new(GEOMETRY);
        for (i, s) in raw.samples_mut().iter_mut().enumerate() {
            *s = i as u16;
        }
        raw
    }

    #[test]
    fn test_geometry_lengths() {
        assert_eq!(GEOMETRY.raw_len(), 12);
        assert_eq!(GEOMETRY.visible_len(), 4);
        assert_eq!(GEOMETRY.visible_size(), (2, 2));
    }

    #[test]
    #[should_panic(expected = "visible region exceeds raw width")]
    fn test_geometry_rejects_roi_outside_raw() {
        let _ = FrameGeometry::new(
            4,
            4,
            Roi {
                x: 3,
                y: 0,
                width: 2,
                height: 1,
            },
        );
    }

    #[test]
    fn test_visible_addressing() {
        let raw = numbered();
        // Raw layout (4 wide): row 1 = 4..8, row 2 = 8..12
        assert_eq!(raw.visible(0, 0), Some(5));
        assert_eq!(raw.visible(1, 0), Some(6));
        assert_eq!(raw.visible(0, 1), Some(9));
        assert_eq!(raw.visible(2, 0), None);
        assert_eq!(raw.visible(0, 2), None);
    }

    #[test]
    fn test_visible_rows_and_copy() {
        let raw = numbered();
        let rows: Vec<&[u16]> = raw.visible_rows().collect();
        assert_eq!(rows, vec![&[5u16, 6][..], &[9u16, 10][..]]);

        let mut dst = vec![0u16; 4];
        raw.copy_visible_into(&mut dst).unwrap();
        assert_eq!(dst, vec![5, 6, 9, 10]);
        assert_eq!(raw.visible_to_vec(), dst);
    }

    #[test]
    fn test_copy_visible_rejects_wrong_length() {
        let raw = numbered();
        let mut dst = vec![0u16; 3];
        assert!(raw.copy_visible_into(&mut dst).is_err());
    }

    #[test]
    fn test_metadata_sample_outside_roi() {
        let raw = numbered();
        assert_eq!(raw.sample(1), Some(1));
        assert_eq!(raw.sample(12), None);
    }

    #[test]
    fn test_frame_stats() {
        let frame = Frame::from_vec(2, 2, vec![1, 2, 3, 6]).unwrap();
        assert_eq!(frame.min_max(), Some((1, 6)));
        assert!((frame.mean() - 3.0).abs() < f64::EPSILON);
        assert_eq!(frame.get(1, 1), Some(6));
        assert_eq!(frame.row(1), Some(&[3u16, 6][..]));
        assert_eq!(Frame::default().min_max(), None);
    }

    #[test]
    fn test_inconsistent_frame_accessors_return_none() {
        let frame = Frame {
            width: 4,
            height: 2,
            data: vec![1, 2, 3],
        };
        assert_eq!(frame.row(0), None);
        assert_eq!(frame.row(1), None);
        assert_eq!(frame.get(3, 1), None);
    }

    #[test]
    fn test_frame_image_conversion() {
        let frame = Frame::from_vec(3, 1, vec![0, 0x1234, 0xFFFF]).unwrap();
        let image = frame.to_image().unwrap();
        assert_eq!(image.dimensions(), (3, 1));
        assert_eq!(Frame::from_image(image), frame);
    }

    #[test]
    fn test_gray8_stretch() {
        let frame = Frame::from_vec(3, 1, vec![100, 150, 200]).unwrap();
        let gray = frame.to_gray8().unwrap();
        assert_eq!(gray.as_raw(), &vec![0u8, 127, 255]);

        let flat = Frame::filled(2, 2, 0x4000).to_gray8().unwrap();
        assert!(flat.as_raw().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_frame_from_vec_invalid_length() {
        assert!(Frame::from_vec(2, 2, vec![0; 3]).is_err());
    }
}
