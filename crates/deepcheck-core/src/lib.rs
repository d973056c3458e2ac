//! deepcheck-core: capture/analyze/present workflow.
//!
//! Normalises camera stills and uploaded files into a [`CanonicalImage`],
//! submits it to the remote analysis service, and drives the
//! [`WorkflowController`] state machine that the front end renders.

pub mod client;
pub mod progress;
pub mod source;
pub mod types;
pub mod view;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{AnalysisClient, AnalysisError, AnalysisTransport, HttpTransport};
pub use progress::{ProgressPresenter, ProgressSchedule, ProgressStep};
pub use source::{InvalidInput, UploadedFile};
pub use types::{AnalysisRequest, AnalysisResult, AttemptToken, CanonicalImage, ImageMime};
pub use view::{ResultView, WorkflowView};
pub use workflow::{
    Notice, SourceMode, WorkflowController, WorkflowError, WorkflowEvent, WorkflowSettings,
    WorkflowState,
};
