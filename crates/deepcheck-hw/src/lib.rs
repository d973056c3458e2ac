//! deepcheck-hw: camera capture lifecycle and frame conversion.
//!
//! The [`CaptureManager`] owns the only live camera stream and guarantees it
//! is released on every exit path. The V4L2 backend lives in [`camera`] and
//! is only built on Linux.

#[cfg(target_os = "linux")]
pub mod camera;
pub mod capture;
pub mod frame;

#[cfg(target_os = "linux")]
pub use camera::{list_devices, DeviceInfo, V4l2Backend};
pub use capture::{
    CameraBackend, CameraStream, CaptureConstraints, CaptureError, CaptureManager, CaptureSession,
    FacingMode,
};
pub use frame::Frame;
