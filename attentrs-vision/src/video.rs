use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// A live frame source with a fixed frame size.
pub trait VideoSource {
    /// Frame width and height in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Block until the next frame is available.
    fn frame(&mut self) -> Result<RgbImage>;
}

/// V4L2 capture device.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {}", device))?;
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB, fallback to YUYV, else accept existing format
        let desired = Format::new(fmt.width, fmt.height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(fmt.width, fmt.height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        log::info!(
            "camera {} streaming {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }
}

impl VideoSource for Camera {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!(
            "captured frame: seq={} len={}",
            meta.sequence,
            data.len()
        );
        decode_frame(self.fourcc, self.width, self.height, data)
    }
}

/// Convert a raw capture buffer into an RGB frame.
pub fn decode_frame(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Result<RgbImage> {
    let mut buf = match &fourcc.repr {
        b"RGB3" => data.to_vec(),
        b"YUYV" => yuyv_to_rgb(width, height, data)?,
        b"GREY" => grey_to_rgb(width, height, data)?,
        _ => anyhow::bail!("unsupported pixel format {:?}", fourcc),
    };
    let expected = (width * height * 3) as usize;
    if buf.len() < expected {
        anyhow::bail!(
            "buffer too small: got {}, expected {} ({:?})",
            buf.len(),
            expected,
            fourcc
        );
    }
    buf.truncate(expected);
    RgbImage::from_raw(width, height, buf).context("failed to build image buffer")
}

fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}
