//! Decoded frames and pixel format conversion.

use bytes::Bytes;

use crate::VideoError;

/// A decoded picture in packed RGB24.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    rgb: Bytes,
}

impl VideoFrame {
    /// Wrap packed RGB24 pixels.  `rgb` must hold exactly `width * height * 3`
    /// bytes.
    pub fn rgb24(width: u32, height: u32, rgb: impl Into<Bytes>) -> Result<Self, VideoError> {
        let rgb = rgb.into();
        let expected = width as usize * height as usize * 3;
        if width == 0 || height == 0 || rgb.len() != expected {
            return Err(VideoError::Decode(format!(
                "rgb24 {width}x{height} needs {expected} bytes, got {}",
                rgb.len()
            )));
        }
        Ok(Self { width, height, rgb })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    /// Convert to planar I420 (BT.601, limited range).  Chroma is averaged
    /// over each 2×2 block; odd edges use the pixels available.
    pub fn to_i420(&self) -> I420Frame {
        let (w, h) = (self.width as usize, self.height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let mut data = vec![0u8; w * h + 2 * cw * ch];
        let (y_plane, chroma) = data.split_at_mut(w * h);
        let (u_plane, v_plane) = chroma.split_at_mut(cw * ch);

        for row in 0..h {
            for col in 0..w {
                let (r, g, b) = self.pixel(col, row);
                y_plane[row * w + col] = clamp(((66 * r + 129 * g + 25 * b + 128) >> 8) + 16);
            }
        }

        for crow in 0..ch {
            for ccol in 0..cw {
                let (mut r, mut g, mut b, mut n) = (0, 0, 0, 0);
                for row in (crow * 2)..((crow * 2 + 2).min(h)) {
                    for col in (ccol * 2)..((ccol * 2 + 2).min(w)) {
                        let (pr, pg, pb) = self.pixel(col, row);
                        r += pr;
                        g += pg;
                        b += pb;
                        n += 1;
                    }
                }
                let (r, g, b) = (r / n, g / n, b / n);
                u_plane[crow * cw + ccol] = clamp(((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128);
                v_plane[crow * cw + ccol] = clamp(((112 * r - 94 * g - 18 * b + 128) >> 8) + 128);
            }
        }

        I420Frame {
            width: self.width,
            height: self.height,
            pts: 0,
            data,
        }
    }

    fn pixel(&self, col: usize, row: usize) -> (i32, i32, i32) {
        let at = (row * self.width as usize + col) * 3;
        (
            i32::from(self.rgb[at]),
            i32::from(self.rgb[at + 1]),
            i32::from(self.rgb[at + 2]),
        )
    }
}

fn clamp(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// A planar YUV 4:2:0 picture ready for the transport's encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct I420Frame {
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp on the owning track's 90 kHz clock.
    pub pts: u64,
    data: Vec<u8>,
}

impl I420Frame {
    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn chroma_len(&self) -> usize {
        (self.width as usize).div_ceil(2) * (self.height as usize).div_ceil(2)
    }

    pub fn y(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    pub fn u(&self) -> &[u8] {
        let start = self.luma_len();
        &self.data[start..start + self.chroma_len()]
    }

    pub fn v(&self) -> &[u8] {
        &self.data[self.luma_len() + self.chroma_len()..]
    }

    /// All three planes back to back.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
