//! Capture → submit → verdict → reset state machine.
//!
//! User actions are methods on [`WorkflowController`]. Asynchronous
//! completions (analysis verdicts, progress ticks) arrive as
//! [`WorkflowEvent`]s on a single queue owned by the controller and are
//! applied by [`WorkflowController::step`]. Every event carries the
//! [`AttemptToken`] it was issued for; only events matching the attempt
//! currently in `Submitting` change state. Late completions from reset or
//! superseded attempts are dropped without a trace in the UI.

use std::fmt;

use deepcheck_hw::{CaptureError, CaptureManager};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::client::{AnalysisClient, AnalysisError};
use crate::progress::{ProgressPresenter, ProgressSchedule};
use crate::source::{self, InvalidInput, UploadedFile, DEFAULT_MAX_UPLOAD_BYTES};
use crate::types::{AnalysisRequest, AnalysisResult, AttemptToken, CanonicalImage};
use crate::view::WorkflowView;

/// Which image source the chooser is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Camera,
    Upload,
}

/// Exactly one of these is live at a time.
#[derive(Debug, Clone)]
pub enum WorkflowState {
    Idle,
    CaptureActive,
    Submitting {
        image: CanonicalImage,
        token: AttemptToken,
    },
    Resolved {
        image: CanonicalImage,
        result: AnalysisResult,
    },
    Failed(AnalysisError),
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::CaptureActive => "capturing",
            WorkflowState::Submitting { .. } => "submitting",
            WorkflowState::Resolved { .. } => "resolved",
            WorkflowState::Failed(_) => "failed",
        }
    }
}

/// Non-fatal problem shown alongside the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    InvalidInput(InvalidInput),
    Capture(CaptureError),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::InvalidInput(e) => write!(f, "{e}"),
            Notice::Capture(e) => write!(f, "{e}"),
        }
    }
}

/// Asynchronous completions routed back to the controller.
#[derive(Debug)]
pub enum WorkflowEvent {
    Progress {
        token: AttemptToken,
        percent: u8,
    },
    Completed {
        token: AttemptToken,
        outcome: Result<AnalysisResult, AnalysisError>,
    },
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error("no active capture session")]
    NotCapturing,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),
}

/// Tunables for the controller.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub max_upload_bytes: usize,
    pub progress: ProgressSchedule,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            progress: ProgressSchedule::default(),
        }
    }
}

pub struct WorkflowController {
    state: WorkflowState,
    mode: SourceMode,
    /// Token of the most recently issued attempt.
    token: AttemptToken,
    progress: Option<u8>,
    notice: Option<Notice>,
    capture: CaptureManager,
    client: AnalysisClient,
    settings: WorkflowSettings,
    presenter: Option<ProgressPresenter>,
    events_tx: mpsc::UnboundedSender<WorkflowEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkflowEvent>,
}

impl WorkflowController {
    pub fn new(
        capture: CaptureManager,
        client: AnalysisClient,
        settings: WorkflowSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: WorkflowState::Idle,
            mode: SourceMode::Camera,
            token: AttemptToken::default(),
            progress: None,
            notice: None,
            capture,
            client,
            settings,
            presenter: None,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    /// Token of the latest attempt; zero before the first submission.
    pub fn current_token(&self) -> AttemptToken {
        self.token
    }

    /// Displayed percentage while submitting (100 once resolved).
    pub fn progress(&self) -> Option<u8> {
        self.progress
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_active()
    }

    /// Image being analysed or shown with its verdict.
    pub fn preview(&self) -> Option<&CanonicalImage> {
        match &self.state {
            WorkflowState::Submitting { image, .. } | WorkflowState::Resolved { image, .. } => {
                Some(image)
            }
            _ => None,
        }
    }

    /// Everything the display layer needs, as one snapshot.
    pub fn view(&self) -> WorkflowView<'_> {
        WorkflowView::project(self)
    }

    fn reject(&self, action: &'static str) -> WorkflowError {
        WorkflowError::InvalidTransition {
            action,
            state: self.state.name(),
        }
    }

    /// Switch between camera and upload. Leaving camera mode releases the camera.
    pub fn select_mode(&mut self, mode: SourceMode) -> Result<(), WorkflowError> {
        match self.state {
            WorkflowState::Idle | WorkflowState::CaptureActive | WorkflowState::Failed(_) => {}
            _ => return Err(self.reject("switch source")),
        }
        if mode != SourceMode::Camera && self.capture.stop() {
            tracing::info!("camera stopped on source switch");
        }
        if matches!(self.state, WorkflowState::CaptureActive) && !self.capture.is_active() {
            self.state = WorkflowState::Idle;
        }
        if matches!(self.state, WorkflowState::Failed(_)) {
            self.state = WorkflowState::Idle;
        }
        self.mode = mode;
        self.notice = None;
        Ok(())
    }

    /// Request the camera. On refusal the state is unchanged and the
    /// error is kept as a notice; the user may try again.
    pub async fn start_capture(&mut self) -> Result<(), WorkflowError> {
        if !matches!(self.state, WorkflowState::Idle | WorkflowState::Failed(_)) {
            return Err(self.reject("start camera"));
        }
        self.mode = SourceMode::Camera;
        self.notice = None;

        match self.capture.start().await {
            Ok(()) => {
                self.state = WorkflowState::CaptureActive;
                Ok(())
            }
            Err(err) => {
                self.notice = Some(Notice::Capture(err.clone()));
                Err(err.into())
            }
        }
    }

    /// Release the camera without taking a picture.
    pub fn stop_capture(&mut self) -> Result<(), WorkflowError> {
        if !matches!(self.state, WorkflowState::CaptureActive) {
            return Err(self.reject("stop camera"));
        }
        self.capture.stop();
        self.state = WorkflowState::Idle;
        self.notice = None;
        Ok(())
    }

    /// Take a still, release the camera, and submit it.
    pub fn capture(&mut self) -> Result<AttemptToken, WorkflowError> {
        if !matches!(self.state, WorkflowState::CaptureActive) {
            return Err(self.reject("capture"));
        }
        let Some(session) = self.capture.session() else {
            return Err(WorkflowError::NotCapturing);
        };
        let still = source::from_frame(session, self.settings.max_upload_bytes);

        // The camera is not needed once a still is taken, or once taking one failed.
        self.capture.stop();

        match still {
            Ok(image) => Ok(self.begin_submission(image)),
            Err(err) => {
                tracing::warn!(error = %err, "still capture failed");
                self.state = WorkflowState::Idle;
                self.notice = Some(Notice::Capture(err.clone()));
                Err(err.into())
            }
        }
    }

    /// Validate and submit an uploaded file. A rejected file leaves the
    /// state as it was and raises a notice.
    pub fn upload(&mut self, file: UploadedFile) -> Result<AttemptToken, WorkflowError> {
        if matches!(self.state, WorkflowState::Resolved { .. }) {
            return Err(self.reject("upload"));
        }
        let image = match source::from_file(file, self.settings.max_upload_bytes) {
            Ok(image) => image,
            Err(err) => {
                tracing::warn!(error = %err, "upload rejected");
                self.notice = Some(Notice::InvalidInput(err.clone()));
                return Err(err.into());
            }
        };

        if self.capture.stop() {
            tracing::info!("camera stopped for upload");
        }
        self.mode = SourceMode::Upload;
        Ok(self.begin_submission(image))
    }

    fn begin_submission(&mut self, image: CanonicalImage) -> AttemptToken {
        self.cancel_progress();
        self.token = self.token.next();
        let token = self.token;

        if let WorkflowState::Submitting { token: previous, .. } = &self.state {
            tracing::info!(previous = %previous, token = %token, "superseding in-flight attempt");
        }
        tracing::info!(
            token = %token,
            mime = %image.mime(),
            bytes = image.len(),
            "submission started"
        );

        self.state = WorkflowState::Submitting {
            image: image.clone(),
            token,
        };
        self.notice = None;
        self.progress = Some(0);

        let tx = self.events_tx.clone();
        self.presenter = Some(ProgressPresenter::start(&self.settings.progress, move |percent| {
            let _ = tx.send(WorkflowEvent::Progress { token, percent });
        }));

        let client = self.client.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = client.submit(AnalysisRequest { token, image }).await;
            let _ = tx.send(WorkflowEvent::Completed { token, outcome });
        });

        token
    }

    fn cancel_progress(&mut self) {
        if let Some(presenter) = self.presenter.take() {
            presenter.cancel();
        }
    }

    fn is_current(&self, token: AttemptToken) -> bool {
        matches!(&self.state, WorkflowState::Submitting { token: t, .. } if *t == token)
    }

    /// Apply one completion. Returns whether anything visible changed.
    pub fn apply(&mut self, event: WorkflowEvent) -> bool {
        match event {
            WorkflowEvent::Progress { token, percent } => {
                if !self.is_current(token) {
                    tracing::trace!(token = %token, "dropping stale progress tick");
                    return false;
                }
                if percent >= 100 || self.progress.is_some_and(|p| percent <= p) {
                    return false;
                }
                tracing::debug!(token = %token, percent, "progress");
                self.progress = Some(percent);
                true
            }
            WorkflowEvent::Completed { token, outcome } => {
                let image = match std::mem::replace(&mut self.state, WorkflowState::Idle) {
                    WorkflowState::Submitting { image, token: t } if t == token => image,
                    other => {
                        self.state = other;
                        tracing::debug!(
                            token = %token,
                            current = %self.token,
                            "discarding stale completion"
                        );
                        return false;
                    }
                };
                self.cancel_progress();

                match outcome {
                    Ok(result) => {
                        tracing::info!(
                            token = %token,
                            authentic = result.is_authentic(),
                            confidence = result.confidence(),
                            emotion = result.emotion(),
                            "analysis resolved"
                        );
                        self.progress = Some(100);
                        self.state = WorkflowState::Resolved { image, result };
                    }
                    Err(err) => {
                        tracing::warn!(token = %token, error = %err, "analysis failed");
                        self.progress = None;
                        self.state = WorkflowState::Failed(err);
                    }
                }
                true
            }
        }
    }

    /// Wait for the next completion and apply it.
    pub async fn step(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => self.apply(event),
            None => false,
        }
    }

    /// Apply every completion already queued without waiting.
    pub fn poll_events(&mut self) -> bool {
        let mut changed = false;
        while let Ok(event) = self.events_rx.try_recv() {
            changed |= self.apply(event);
        }
        changed
    }

    /// Drive events until the current attempt is resolved or failed.
    pub async fn settle(&mut self) -> &WorkflowState {
        while matches!(self.state, WorkflowState::Submitting { .. }) {
            self.step().await;
        }
        &self.state
    }

    /// Back to the camera chooser: releases the camera, abandons any
    /// in-flight attempt, and clears the image, verdict, progress, and notice.
    pub fn reset(&mut self) {
        let released = self.capture.stop();
        self.cancel_progress();
        if let WorkflowState::Submitting { token, .. } = &self.state {
            tracing::info!(token = %token, "abandoning in-flight attempt");
        }
        self.state = WorkflowState::Idle;
        self.mode = SourceMode::Camera;
        self.progress = None;
        self.notice = None;
        tracing::info!(camera_released = released, "workflow reset");
    }
}

impl Drop for WorkflowController {
    fn drop(&mut self) {
        self.cancel_progress();
        if self.capture.stop() {
            tracing::info!("camera released on teardown");
        }
    }
}
