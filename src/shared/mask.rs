//! 1-bit shape masks
//!
//! Masks are built here without touching the server and handed to the shape
//! engine for upload. Bits are stored LSB-first with rows padded to 32 bits,
//! which is what nearly every X server expects for depth-1 images.

/// Bytes per pixel of the ARGB frames the masks are derived from
pub const BYTES_PER_PIXEL: usize = 4;

/// Alpha byte position inside a pixel in the frame buffers the application hands us (RGBA)
pub const RGBA_ALPHA_OFFSET: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMask {
    width: u32,
    height: u32,
    stride: usize,
    bits: Vec<u8>,
}

impl ShapeMask {
    fn empty(width: u32, height: u32) -> Self {
        let stride = padded_stride(width, 32);
        Self {
            width,
            height,
            stride,
            bits: vec![0; stride * height as usize],
        }
    }

    /// Every pixel set
    pub fn full(width: u32, height: u32) -> Self {
        let mut mask = Self::empty(width, height);
        let full_bytes = (width / 8) as usize;
        let tail_bits = width % 8;
        if mask.stride == 0 {
            return mask;
        }

        for row in mask.bits.chunks_mut(mask.stride) {
            row[..full_bytes].fill(0xff);
            if tail_bits != 0 {
                row[full_bytes] = (1u8 << tail_bits) - 1;
            }
        }
        mask
    }

    /// Pixels with a non-zero alpha byte are set
    ///
    /// `pixels` is row-major with `BYTES_PER_PIXEL` bytes per pixel and no row
    /// padding. A short buffer leaves the missing pixels unset.
    pub fn from_alpha(width: u32, height: u32, pixels: &[u8], alpha_offset: usize) -> Self {
        let mut mask = Self::empty(width, height);
        let row_bytes = width as usize * BYTES_PER_PIXEL;
        if row_bytes == 0 {
            return mask;
        }

        for (y, row) in pixels.chunks(row_bytes).take(height as usize).enumerate() {
            for (x, pixel) in row.chunks_exact(BYTES_PER_PIXEL).enumerate() {
                if pixel[alpha_offset] != 0 {
                    mask.set(x as u32, y as u32);
                }
            }
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn set(&mut self, x: u32, y: u32) {
        let index = y as usize * self.stride + (x / 8) as usize;
        self.bits[index] |= 1 << (x % 8);
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let index = y as usize * self.stride + (x / 8) as usize;
        self.bits[index] & (1 << (x % 8)) != 0
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Every set pixel of `self` is also set in `other`
    pub fn is_subset_of(&self, other: &ShapeMask) -> bool {
        (0..self.height).all(|y| (0..self.width).all(|x| !self.get(x, y) || other.get(x, y)))
    }

    /// Copy of `self` sized like `bounds`, keeping only pixels set in both
    pub fn clipped_to(&self, bounds: &ShapeMask) -> ShapeMask {
        if self.width == bounds.width && self.height == bounds.height {
            let bits = self
                .bits
                .iter()
                .zip(&bounds.bits)
                .map(|(a, b)| a & b)
                .collect();
            return ShapeMask { bits, ..self.clone() };
        }

        let mut clipped = ShapeMask::empty(bounds.width, bounds.height);
        for y in 0..bounds.height.min(self.height) {
            for x in 0..bounds.width.min(self.width) {
                if self.get(x, y) && bounds.get(x, y) {
                    clipped.set(x, y);
                }
            }
        }
        clipped
    }

    /// Rows re-packed for the server's bitmap format
    ///
    /// Returns the row stride in bytes and the image data.
    pub fn encode(&self, scanline_pad_bits: u8, msb_first: bool) -> (usize, Vec<u8>) {
        let stride = padded_stride(self.width, scanline_pad_bits);
        let used = self.width.div_ceil(8) as usize;
        let mut data = vec![0u8; stride * self.height as usize];
        if used == 0 {
            return (stride, data);
        }

        for (src, dst) in self.bits.chunks(self.stride).zip(data.chunks_mut(stride)) {
            dst[..used].copy_from_slice(&src[..used]);
            if msb_first {
                dst[..used].iter_mut().for_each(|b| *b = b.reverse_bits());
            }
        }
        (stride, data)
    }
}

fn padded_stride(width: u32, pad_bits: u8) -> usize {
    let pad_bytes = (pad_bits as usize / 8).max(1);
    let used = width.div_ceil(8) as usize;
    used.div_ceil(pad_bytes) * pad_bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgba(width: u32, height: u32, alpha: impl Fn(u32, u32) -> u8) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height) as usize * BYTES_PER_PIXEL);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[10, 20, 30, alpha(x, y)]);
            }
        }
        pixels
    }

    #[test]
    fn test_full_mask_sets_exactly_the_window() {
        let mask = ShapeMask::full(37, 3);
        assert_eq!(mask.count_set(), 37 * 3);
        assert!(mask.get(36, 2));
        assert!(!mask.get(37, 2));
    }

    #[test]
    fn test_full_mask_is_idempotent() {
        assert_eq!(ShapeMask::full(250, 180), ShapeMask::full(250, 180));
    }

    #[test]
    fn test_from_alpha_marks_opaque_pixels() {
        let pixels = rgba(10, 4, |x, y| if x == y { 255 } else if x == 9 { 1 } else { 0 });
        let mask = ShapeMask::from_alpha(10, 4, &pixels, RGBA_ALPHA_OFFSET);

        assert!(mask.get(0, 0));
        assert!(mask.get(3, 3));
        assert!(mask.get(9, 1));
        assert!(!mask.get(1, 0));
        assert_eq!(mask.count_set(), 4 + 4);
    }

    #[test]
    fn test_from_alpha_short_buffer_is_transparent() {
        let pixels = rgba(8, 1, |_, _| 255);
        let mask = ShapeMask::from_alpha(8, 5, &pixels, RGBA_ALPHA_OFFSET);
        assert_eq!(mask.count_set(), 8);
        assert!(!mask.get(0, 1));
    }

    #[test]
    fn test_input_mask_is_subset_of_bounding() {
        let bounding = ShapeMask::full(33, 17);
        let pixels = rgba(33, 17, |x, y| ((x * 7 + y * 3) % 5) as u8);
        let input = ShapeMask::from_alpha(33, 17, &pixels, RGBA_ALPHA_OFFSET);
        assert!(input.is_subset_of(&bounding));
    }

    #[test]
    fn test_clip_to_smaller_bounds() {
        let big = ShapeMask::full(64, 64);
        let bounds = ShapeMask::full(20, 10);
        let clipped = big.clipped_to(&bounds);
        assert_eq!((clipped.width(), clipped.height()), (20, 10));
        assert_eq!(clipped, bounds);
        assert!(clipped.is_subset_of(&bounds));
    }

    #[test]
    fn test_encode_lsb_32bit_pad() {
        let mask = ShapeMask::full(9, 2);
        let (stride, data) = mask.encode(32, false);
        assert_eq!(stride, 4);
        assert_eq!(data, vec![0xff, 0x01, 0, 0, 0xff, 0x01, 0, 0]);
    }

    #[test]
    fn test_encode_msb_8bit_pad() {
        let mask = ShapeMask::full(9, 2);
        let (stride, data) = mask.encode(8, true);
        assert_eq!(stride, 2);
        assert_eq!(data, vec![0xff, 0x80, 0xff, 0x80]);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn alpha_mask_stays_within_bounding(
            width in 1u32..48,
            height in 1u32..24,
            seed in any::<u64>(),
        ) {
            let len = (width * height) as usize * BYTES_PER_PIXEL;
            let pixels: Vec<u8> = (0..len)
                .map(|i| (seed.rotate_left((i % 64) as u32) as u8) & 0x03)
                .collect();
            let bounding = ShapeMask::full(width, height);
            let input = ShapeMask::from_alpha(width, height, &pixels, RGBA_ALPHA_OFFSET)
                .clipped_to(&bounding);
            prop_assert!(input.is_subset_of(&bounding));
            prop_assert!(input.count_set() <= bounding.count_set());
        }
    }
}
