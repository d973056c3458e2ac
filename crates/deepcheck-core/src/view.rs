//! Display-ready projections of workflow state.

use crate::client::AnalysisError;
use crate::types::{AnalysisResult, CanonicalImage};
use crate::workflow::{Notice, SourceMode, WorkflowController, WorkflowState};

const AUTHENTIC_HEADLINE: &str = "Authentic Image";
const AUTHENTIC_SUMMARY: &str = "This image appears to be an authentic, unaltered photograph.";
const DEEPFAKE_HEADLINE: &str = "Deepfake Detected";
const DEEPFAKE_SUMMARY: &str = "Signs of manipulation were detected in this image.";

/// How a verdict is shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultView {
    pub headline: &'static str,
    pub summary: &'static str,
    pub is_authentic: bool,
    pub confidence_percent: u8,
    pub emotion: String,
    /// UTC, `YYYY-MM-DD HH:MM:SS UTC`.
    pub analyzed_at: String,
}

impl From<&AnalysisResult> for ResultView {
    fn from(result: &AnalysisResult) -> Self {
        let (headline, summary) = if result.is_authentic() {
            (AUTHENTIC_HEADLINE, AUTHENTIC_SUMMARY)
        } else {
            (DEEPFAKE_HEADLINE, DEEPFAKE_SUMMARY)
        };
        Self {
            headline,
            summary,
            is_authentic: result.is_authentic(),
            confidence_percent: result.confidence_percent(),
            emotion: result.emotion().to_string(),
            analyzed_at: result
                .timestamp()
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string(),
        }
    }
}

/// Snapshot of everything the front end renders.
#[derive(Debug)]
pub struct WorkflowView<'a> {
    pub state: &'static str,
    pub mode: SourceMode,
    pub capturing: bool,
    pub preview: Option<&'a CanonicalImage>,
    pub progress: Option<u8>,
    pub notice: Option<&'a Notice>,
    pub result: Option<ResultView>,
    pub error: Option<&'a AnalysisError>,
}

impl<'a> WorkflowView<'a> {
    pub(crate) fn project(controller: &'a WorkflowController) -> Self {
        let state = controller.state();
        let (result, error) = match state {
            WorkflowState::Resolved { result, .. } => (Some(ResultView::from(result)), None),
            WorkflowState::Failed(err) => (None, Some(err)),
            _ => (None, None),
        };
        Self {
            state: state.name(),
            mode: controller.mode(),
            capturing: controller.is_capturing(),
            preview: controller.preview(),
            progress: controller.progress(),
            notice: controller.notice(),
            result,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn result(is_authentic: bool, confidence: f32) -> AnalysisResult {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        AnalysisResult::new(is_authentic, confidence, "happy".into(), at)
    }

    #[test]
    fn test_authentic_view() {
        let view = ResultView::from(&result(true, 0.95));
        assert_eq!(view.headline, "Authentic Image");
        assert_eq!(view.summary, AUTHENTIC_SUMMARY);
        assert_eq!(view.confidence_percent, 95);
        assert_eq!(view.emotion, "happy");
        assert_eq!(view.analyzed_at, "2024-03-09 14:05:07 UTC");
    }

    #[test]
    fn test_deepfake_view() {
        let view = ResultView::from(&result(false, 0.876));
        assert_eq!(view.headline, "Deepfake Detected");
        assert_eq!(view.summary, DEEPFAKE_SUMMARY);
        assert!(!view.is_authentic);
        assert_eq!(view.confidence_percent, 88);
    }

    #[test]
    fn test_confidence_rounds_half_up() {
        assert_eq!(ResultView::from(&result(true, 0.5)).confidence_percent, 50);
        assert_eq!(ResultView::from(&result(true, 1.0)).confidence_percent, 100);
        assert_eq!(ResultView::from(&result(true, 0.0)).confidence_percent, 0);
    }
}
