use anyhow::{anyhow, Result};
use image::{ImageFormat, RgbImage};
use v4l::format::FourCC;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::application::ports::{FrameSource, ReadError};

/// Settings used to open a capture device.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub camera_path: String,
    pub fourcc: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Local camera read through V4L2 MMAP buffers. Yields MJPG or YUYV frames as RGB.
pub struct V4l2Source {
    stream: Option<Stream<'static>>,
    _device: Device,
    fourcc: FourCC,
    width: u32,
    height: u32,
}

impl V4l2Source {
    /// Opens the device, negotiates the format and starts an MMAP stream.
    pub fn open(cfg: &CaptureConfig) -> Result<Self> {
        let device = Device::with_path(&cfg.camera_path)?;

        let mut fmt = device.format()?;
        let b = cfg.fourcc.as_bytes();
        if b.len() != 4 {
            return Err(anyhow!("FourCC must be 4 characters, got {:?}", cfg.fourcc));
        }
        fmt.fourcc = FourCC::new(&[b[0], b[1], b[2], b[3]]);
        fmt.width = cfg.width;
        fmt.height = cfg.height;

        // the driver may snap to the nearest supported values
        let actual = device.set_format(&fmt)?;

        let mut params = device.params()?;
        params.interval.numerator = 1;
        params.interval.denominator = cfg.fps.max(1);
        let _ = device.set_params(&params);

        let stream = Stream::with_buffers(&device, v4l::buffer::Type::VideoCapture, 4)?;

        tracing::info!(
            path = %cfg.camera_path,
            width = actual.width,
            height = actual.height,
            fourcc = %actual.fourcc,
            fps = cfg.fps,
            "Camera opened"
        );

        Ok(Self {
            stream: Some(stream),
            _device: device,
            fourcc: actual.fourcc,
            width: actual.width,
            height: actual.height,
        })
    }

    fn decode(fourcc: &str, data: &[u8], width: u32, height: u32) -> Result<RgbImage> {
        match fourcc {
            "MJPG" => Ok(image::load_from_memory_with_format(data, ImageFormat::Jpeg)?.to_rgb8()),
            "YUYV" => Ok(yuyv_to_rgb(data, width, height)),
            other => Err(anyhow!("camera format {other} not supported")),
        }
    }
}

impl FrameSource for V4l2Source {
    fn read(&mut self) -> Result<RgbImage, ReadError> {
        let stream = self.stream.as_mut().ok_or(ReadError::EndOfStream)?;
        let (data, _) = stream
            .next()
            .map_err(|e| ReadError::Failed(format!("dequeue: {e}")))?;
        let fourcc = self
            .fourcc
            .str()
            .map_err(|_| ReadError::Failed("invalid FourCC".into()))?;
        Self::decode(fourcc, data, self.width, self.height).map_err(|e| ReadError::Failed(e.to_string()))
    }

    fn close(&mut self) {
        // dropping the stream unmaps the buffers and stops capture
        self.stream = None;
    }
}

/// Converts a YUYV (YUV 4:2:2) buffer to an RgbImage.
fn yuyv_to_rgb(yuyv: &[u8], w: u32, h: u32) -> RgbImage {
    let mut out = RgbImage::new(w, h);
    if w == 0 {
        return out;
    }

    // each 4-byte block holds 2 pixels: [Y0, U, Y1, V]
    for (i, chunk) in yuyv.chunks_exact(4).enumerate() {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        let pixel_idx = i as u32 * 2;
        let (x, y) = (pixel_idx % w, pixel_idx / w);
        if y >= h {
            break;
        }
        out.put_pixel(x, y, bt601(chunk[0] as f32, u, v));
        if x + 1 < w {
            out.put_pixel(x + 1, y, bt601(chunk[2] as f32, u, v));
        }
    }
    out
}

fn bt601(y: f32, u: f32, v: f32) -> image::Rgb<u8> {
    image::Rgb([
        (y + 1.402 * v).clamp(0.0, 255.0) as u8,
        (y - 0.344136 * u - 0.714136 * v).clamp(0.0, 255.0) as u8,
        (y + 1.772 * u).clamp(0.0, 255.0) as u8,
    ])
}
