use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::RgbImage;

use super::backend::{CaptureError, Encoder, EncoderFactory};
use super::frame::{PixelFormat, RawImage};

/// Builds JPEG encoders for a given quality
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegEncoderFactory;

impl EncoderFactory for JpegEncoderFactory {
    fn construct(&self, quality: u8) -> Result<Box<dyn Encoder>, CaptureError> {
        Ok(Box::new(JpegEncoder::new(quality)))
    }
}

/// JPEG encoder with a fixed quality.
///
/// Sources that already deliver MJPEG are passed through untouched; the
/// camera applies its own compression in that case.
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    fn encode_rgb(&self, rgb: Vec<u8>, width: u32, height: u32) -> Result<Bytes, CaptureError> {
        let image = RgbImage::from_raw(width, height, rgb).ok_or_else(|| {
            CaptureError::Encode(format!("buffer too small for {}x{} RGB", width, height))
        })?;

        let mut out = Vec::with_capacity((width * height / 4) as usize);
        ImageJpegEncoder::new_with_quality(&mut out, self.quality)
            .encode_image(&image)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;

        Ok(Bytes::from(out))
    }
}

impl Encoder for JpegEncoder {
    fn quality(&self) -> u8 {
        self.quality
    }

    fn encode(&mut self, image: &RawImage<'_>) -> Result<Bytes, CaptureError> {
        let started = Instant::now();

        let encoded = match image.format {
            PixelFormat::Mjpeg => Bytes::copy_from_slice(image.data),
            PixelFormat::Rgb24 => self.encode_rgb(image.data.to_vec(), image.width, image.height)?,
            PixelFormat::Yuyv4 => {
                let rgb = yuyv_to_rgb(image.data, image.width, image.height)?;
                self.encode_rgb(rgb, image.width, image.height)?
            }
        };

        metrics::histogram!("encode_time_us").record(started.elapsed().as_micros() as f64);
        Ok(encoded)
    }
}

/// Convert packed YUYV 4:2:2 into RGB24 (BT.601, studio swing).
pub fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, CaptureError> {
    let pixels = (width * height) as usize;
    if data.len() < pixels * 2 {
        return Err(CaptureError::Encode(format!(
            "YUYV buffer of {} bytes is short for {}x{}",
            data.len(),
            width,
            height
        )));
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for chunk in data[..pixels * 2].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        push_rgb(&mut rgb, y0, u, v);
        push_rgb(&mut rgb, y1, u, v);
    }

    Ok(rgb)
}

fn push_rgb(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;

    let r = (298 * c + 409 * e + 128) >> 8;
    let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
    let b = (298 * c + 516 * d + 128) >> 8;

    out.push(r.clamp(0, 255) as u8);
    out.push(g.clamp(0, 255) as u8);
    out.push(b.clamp(0, 255) as u8);
}
