//! V4L2 camera backend via the `v4l` crate.

use std::io;
use std::path::Path;

use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use crate::capture::{CameraBackend, CameraStream, CaptureConstraints, CaptureError};
use crate::frame::{self, Frame};

/// Raw captures tried per still before settling for a dark frame.
const STILL_ATTEMPTS: usize = 3;

/// Highest `/dev/videoN` index probed by [`list_devices`].
const MAX_VIDEO_NODES: u32 = 16;

/// A V4L2 node that can deliver stills.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    /// Card name reported by the driver.
    pub card: String,
    pub driver: String,
    pub bus: String,
    /// FourCCs the device advertises that this backend can convert.
    pub formats: Vec<String>,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpeg,
    /// Packed RGB24.
    Rgb3,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"RGB3" => Some(Self::Rgb3),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Opens V4L2 capture devices on request.
pub struct V4l2Backend {
    device_path: String,
    warmup_frames: usize,
}

impl V4l2Backend {
    /// Backend for a fixed device path (e.g., "/dev/video0").
    pub fn new(device_path: impl Into<String>, warmup_frames: usize) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames,
        }
    }
}

fn map_open_error(device_path: &str, e: io::Error) -> CaptureError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => {
            CaptureError::PermissionDenied(format!("{device_path}: {e}"))
        }
        _ if e.to_string().contains("busy") || e.raw_os_error() == Some(16) => {
            CaptureError::DeviceUnavailable(format!("{device_path}: device busy"))
        }
        _ => CaptureError::DeviceUnavailable(format!("{device_path}: {e}")),
    }
}

impl CameraBackend for V4l2Backend {
    fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CameraStream>, CaptureError> {
        let device_path = self.device_path.as_str();
        if !Path::new(device_path).exists() {
            return Err(CaptureError::DeviceUnavailable(format!("{device_path}: no such device")));
        }

        let device = Device::with_path(device_path).map_err(|e| map_open_error(device_path, e))?;

        let caps = device.query_caps().map_err(|e| {
            CaptureError::DeviceUnavailable(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{device_path}: not a video capture device"
            )));
        }

        // V4L2 has no notion of facing; the configured device is used as-is.
        tracing::debug!(facing = ?constraints.facing, "facing mode not selectable on V4L2");

        let mut fmt = device
            .format()
            .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to get format: {e}")))?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.width;
        fmt.height = constraints.height;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| CaptureError::DeviceUnavailable(format!("failed to set format: {e}")))?;

        let pixel_format = PixelFormat::from_fourcc(negotiated.fourcc).ok_or_else(|| {
            CaptureError::DeviceUnavailable(format!(
                "unsupported pixel format: {} (need YUYV, MJPG, RGB3, or GREY)",
                negotiated.fourcc
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = %negotiated.fourcc,
            "negotiated format"
        );

        let stream = V4l2Stream {
            device,
            device_path: device_path.to_string(),
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        };

        // Discard warmup frames for AGC/AE stabilization
        if self.warmup_frames > 0 {
            tracing::debug!(count = self.warmup_frames, "discarding warmup frames");
            stream.discard(self.warmup_frames)?;
        }

        Ok(Box::new(stream))
    }
}

/// A V4L2 device that has been opened and format-negotiated.
struct V4l2Stream {
    device: Device,
    device_path: String,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

fn dequeue_failed(e: io::Error) -> CaptureError {
    CaptureError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
}

impl V4l2Stream {
    fn mmap(&self) -> Result<MmapStream<'_>, CaptureError> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
            CaptureError::CaptureFailed(format!("failed to create mmap stream: {e}"))
        })
    }

    fn discard(&self, count: usize) -> Result<(), CaptureError> {
        let mut stream = self.mmap()?;
        for _ in 0..count {
            stream.next().map_err(dequeue_failed)?;
        }
        Ok(())
    }

    /// Convert a raw buffer to RGB8 based on the negotiated format.
    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CaptureError> {
        let pixels = self.width as usize * self.height as usize;
        match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)
                .map_err(|e| CaptureError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height)
                .map_err(|e| CaptureError::CaptureFailed(format!("GREY conversion failed: {e}"))),
            PixelFormat::Rgb3 => {
                if buf.len() < pixels * 3 {
                    return Err(CaptureError::CaptureFailed(format!(
                        "RGB3 buffer too short: expected {}, got {}",
                        pixels * 3,
                        buf.len()
                    )));
                }
                Ok(buf[..pixels * 3].to_vec())
            }
            PixelFormat::Mjpeg => {
                let decoded = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                    .map_err(|e| CaptureError::CaptureFailed(format!("MJPG decode failed: {e}")))?
                    .to_rgb8();
                if decoded.width() != self.width || decoded.height() != self.height {
                    return Err(CaptureError::CaptureFailed(format!(
                        "MJPG frame is {}x{}, expected {}x{}",
                        decoded.width(),
                        decoded.height(),
                        self.width,
                        self.height
                    )));
                }
                Ok(decoded.into_raw())
            }
        }
    }
}

impl CameraStream for V4l2Stream {
    /// Capture one still, skipping dark frames for up to a few attempts.
    fn grab(&self) -> Result<Frame, CaptureError> {
        let mut stream = self.mmap()?;
        let mut last = None;

        for _ in 0..STILL_ATTEMPTS {
            let (buf, meta) = stream.next().map_err(dequeue_failed)?;
            let rgb = self.buf_to_rgb(buf)?;
            let frame = Frame::from_rgb(rgb, self.width, self.height, meta.sequence)
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

            if !frame.is_dark() {
                return Ok(frame);
            }
            tracing::debug!(seq = meta.sequence, "skipping dark frame");
            last = Some(frame);
        }

        last.ok_or_else(|| CaptureError::CaptureFailed("no frame captured".into()))
    }

    fn release(self: Box<Self>) {
        // Closing the device fd ends streaming and frees the camera.
        let stream = *self;
        drop(stream);
    }

    fn describe(&self) -> String {
        self.device_path.clone()
    }
}

/// Open `path` and describe it, or say why it cannot serve stills.
fn probe_device(path: &str) -> Result<DeviceInfo, String> {
    let dev = Device::with_path(path).map_err(|e| format!("open failed: {e}"))?;
    let caps = dev
        .query_caps()
        .map_err(|e| format!("query_caps failed: {e}"))?;
    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        return Err("no video capture capability".into());
    }

    let formats: Vec<String> = dev
        .enum_formats()
        .unwrap_or_default()
        .into_iter()
        .filter(|desc| PixelFormat::from_fourcc(desc.fourcc).is_some())
        .map(|desc| desc.fourcc.to_string())
        .collect();
    if formats.is_empty() {
        return Err("no convertible pixel format".into());
    }

    Ok(DeviceInfo {
        path: path.to_string(),
        card: caps.card,
        driver: caps.driver,
        bus: caps.bus,
        formats,
    })
}

/// Enumerate `/dev/video0` through `/dev/video15`, keeping nodes that can
/// deliver frames in a format this backend converts.
pub fn list_devices() -> Vec<DeviceInfo> {
    (0..MAX_VIDEO_NODES)
        .map(|i| format!("/dev/video{i}"))
        .filter(|path| Path::new(path).exists())
        .filter_map(|path| match probe_device(&path) {
            Ok(info) => Some(info),
            Err(reason) => {
                tracing::debug!(device = %path, %reason, "skipping video node");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_unavailable() {
        let backend = V4l2Backend::new("/dev/video-does-not-exist", 0);
        let err = backend.open(&CaptureConstraints::default()).err().unwrap();
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_permission_error_maps_to_denied() {
        let err = map_open_error("/dev/video0", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
    }

    #[test]
    fn test_busy_error_maps_to_unavailable() {
        let err = map_open_error("/dev/video0", io::Error::from_raw_os_error(16));
        assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_fourcc_mapping() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpeg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"H264")), None);
    }

    #[test]
    fn test_probe_missing_node_reports_reason() {
        let reason = probe_device("/dev/video-does-not-exist").unwrap_err();
        assert!(reason.starts_with("open failed"), "{reason}");
    }
}
