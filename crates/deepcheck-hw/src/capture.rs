//! Camera lifecycle: `Inactive → start → Active → stop/teardown → Inactive`.
//!
//! The [`CaptureManager`] is the only owner of a live [`CaptureSession`].
//! A session releases its stream exactly once, either through
//! [`CaptureManager::stop`] or when it is dropped.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::frame::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("camera unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

/// Which way the requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacingMode {
    /// Front camera, pointed at the person operating the device.
    User,
    Environment,
}

/// Constraints passed to the backend when the camera is requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub facing: FacingMode,
    /// Ideal width; the backend may negotiate something else.
    pub width: u32,
    /// Ideal height; the backend may negotiate something else.
    pub height: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            facing: FacingMode::User,
            width: 1280,
            height: 720,
        }
    }
}

/// Platform access to a camera. Opening may block, so the manager calls it
/// from a blocking task.
pub trait CameraBackend: Send + Sync {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn CameraStream>, CaptureError>;
}

/// A live camera stream handed out by a [`CameraBackend`].
pub trait CameraStream: Send {
    /// Grab one still frame at the negotiated resolution.
    fn grab(&self) -> Result<Frame, CaptureError>;

    /// Give the device back to the platform. Called exactly once.
    fn release(self: Box<Self>);

    /// Human-readable device identifier for logs.
    fn describe(&self) -> String;
}

/// An active camera capture. Created only by the [`CaptureManager`].
pub struct CaptureSession {
    stream: Option<Box<dyn CameraStream>>,
    started_at: Instant,
}

impl CaptureSession {
    fn new(stream: Box<dyn CameraStream>) -> Self {
        Self {
            stream: Some(stream),
            started_at: Instant::now(),
        }
    }

    /// Grab a still frame without affecting the session.
    pub fn grab_frame(&self) -> Result<Frame, CaptureError> {
        match &self.stream {
            Some(stream) => stream.grab(),
            None => Err(CaptureError::CaptureFailed("session already released".into())),
        }
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    fn release(&mut self) -> bool {
        let Some(stream) = self.stream.take() else {
            return false;
        };
        let device = stream.describe();
        stream.release();
        tracing::info!(
            device = %device,
            active_ms = self.started_at.elapsed().as_millis() as u64,
            "camera released"
        );
        true
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns the camera for the workflow and enforces scoped acquisition.
pub struct CaptureManager {
    backend: Arc<dyn CameraBackend>,
    constraints: CaptureConstraints,
    session: Option<CaptureSession>,
}

impl CaptureManager {
    pub fn new(backend: Arc<dyn CameraBackend>, constraints: CaptureConstraints) -> Self {
        Self {
            backend,
            constraints,
            session: None,
        }
    }

    /// Request the camera. No-op if a session is already active.
    ///
    /// Failures are terminal for this attempt; nothing is retried and no
    /// device resources are held afterwards.
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        if self.session.is_some() {
            tracing::debug!("camera already active");
            return Ok(());
        }

        let backend = Arc::clone(&self.backend);
        let constraints = self.constraints.clone();
        tracing::info!(
            facing = ?constraints.facing,
            width = constraints.width,
            height = constraints.height,
            "requesting camera"
        );

        // The session is built inside the blocking task so that a cancelled
        // start still releases the stream when the result is dropped.
        let session = tokio::task::spawn_blocking(move || {
            backend.open(&constraints).map(CaptureSession::new)
        })
        .await
        .map_err(|e| CaptureError::DeviceUnavailable(format!("camera task failed: {e}")))?;

        match session {
            Ok(session) => {
                self.session = Some(session);
                tracing::info!("camera active");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "camera request refused");
                Err(err)
            }
        }
    }

    /// Release the camera. Idempotent; returns whether a session was released.
    pub fn stop(&mut self) -> bool {
        match self.session.take() {
            Some(mut session) => session.release(),
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// The active session, if any.
    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    pub fn constraints(&self) -> &CaptureConstraints {
        &self.constraints
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! In-memory camera for exercising the lifecycle without hardware.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Counts opens and releases so tests can check the at-most-once rule.
    #[derive(Default)]
    pub struct FakeCamera {
        opens: AtomicUsize,
        releases: Arc<AtomicUsize>,
        refuse_with: Mutex<Option<CaptureError>>,
        fail_grab: Arc<Mutex<bool>>,
    }

    impl FakeCamera {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Make every following `open` fail with `err`.
        pub fn refuse(&self, err: CaptureError) {
            *self.refuse_with.lock().unwrap() = Some(err);
        }

        pub fn fail_grabs(&self, fail: bool) {
            *self.fail_grab.lock().unwrap() = fail;
        }

        pub fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }
    }

    impl CameraBackend for FakeCamera {
        fn open(
            &self,
            constraints: &CaptureConstraints,
        ) -> Result<Box<dyn CameraStream>, CaptureError> {
            if let Some(err) = self.refuse_with.lock().unwrap().clone() {
                return Err(err);
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeStream {
                width: constraints.width.min(8),
                height: constraints.height.min(8),
                releases: Arc::clone(&self.releases),
                fail_grab: Arc::clone(&self.fail_grab),
            }))
        }
    }

    struct FakeStream {
        width: u32,
        height: u32,
        releases: Arc<AtomicUsize>,
        fail_grab: Arc<Mutex<bool>>,
    }

    impl CameraStream for FakeStream {
        fn grab(&self) -> Result<Frame, CaptureError> {
            if *self.fail_grab.lock().unwrap() {
                return Err(CaptureError::CaptureFailed("fake grab failure".into()));
            }
            let data = vec![180u8; (self.width * self.height * 3) as usize];
            Frame::from_rgb(data, self.width, self.height, 0)
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))
        }

        fn release(self: Box<Self>) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }

        fn describe(&self) -> String {
            "fake0".into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeCamera;
    use super::*;

    fn manager(camera: &Arc<FakeCamera>) -> CaptureManager {
        CaptureManager::new(camera.clone(), CaptureConstraints::default())
    }

    #[tokio::test]
    async fn test_start_stop_releases_once() {
        let camera = FakeCamera::new();
        let mut mgr = manager(&camera);
        mgr.start().await.unwrap();
        assert!(mgr.is_active());
        assert!(mgr.stop());
        assert!(!mgr.stop(), "second stop is a no-op");
        assert_eq!(camera.opens(), 1);
        assert_eq!(camera.releases(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_keeps_single_session() {
        let camera = FakeCamera::new();
        let mut mgr = manager(&camera);
        mgr.start().await.unwrap();
        mgr.start().await.unwrap();
        assert_eq!(camera.opens(), 1);
        drop(mgr);
        assert_eq!(camera.releases(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_active_session() {
        let camera = FakeCamera::new();
        {
            let mut mgr = manager(&camera);
            mgr.start().await.unwrap();
        }
        assert_eq!(camera.releases(), 1);
    }

    #[tokio::test]
    async fn test_grab_does_not_release() {
        let camera = FakeCamera::new();
        let mut mgr = manager(&camera);
        mgr.start().await.unwrap();
        let frame = mgr.session().unwrap().grab_frame().unwrap();
        assert_eq!(frame.data.len(), (frame.width * frame.height * 3) as usize);
        assert!(mgr.is_active());
        assert_eq!(camera.releases(), 0);
        mgr.stop();
        assert_eq!(camera.releases(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_holds_nothing() {
        let camera = FakeCamera::new();
        camera.refuse(CaptureError::PermissionDenied("EACCES".into()));
        let mut mgr = manager(&camera);
        let err = mgr.start().await.unwrap_err();
        assert!(matches!(err, CaptureError::PermissionDenied(_)));
        assert!(!mgr.is_active());
        assert_eq!(camera.opens(), 0);
        assert_eq!(camera.releases(), 0);
    }

    #[tokio::test]
    async fn test_restart_after_stop_opens_again() {
        let camera = FakeCamera::new();
        let mut mgr = manager(&camera);
        for _ in 0..3 {
            mgr.start().await.unwrap();
            mgr.stop();
        }
        assert_eq!(camera.opens(), 3);
        assert_eq!(camera.releases(), 3);
    }
}
