use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Raster types accepted for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Png,
    Jpeg,
}

impl ImageMime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMime::Png => "image/png",
            ImageMime::Jpeg => "image/jpeg",
        }
    }

    /// Map a declared content type (e.g. `"image/jpeg; q=0.9"`) to an accepted type.
    pub fn from_declared(declared: &str) -> Option<Self> {
        let essence = declared.split(';').next().unwrap_or("").trim();
        if essence.eq_ignore_ascii_case("image/png") {
            Some(ImageMime::Png)
        } else if essence.eq_ignore_ascii_case("image/jpeg") {
            Some(ImageMime::Jpeg)
        } else {
            None
        }
    }
}

impl fmt::Display for ImageMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded image ready for transmission, independent of where it came from.
///
/// Content is shared behind an `Arc`, so clones held for preview do not copy
/// the bytes. There is no way to mutate it after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct CanonicalImage {
    bytes: Arc<[u8]>,
    mime: ImageMime,
}

impl CanonicalImage {
    pub(crate) fn new(bytes: Vec<u8>, mime: ImageMime) -> Self {
        Self {
            bytes: bytes.into(),
            mime,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> ImageMime {
        self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Text-safe form sent to the service: `data:<mime>;base64,<payload>`.
    pub fn to_data_uri(&self) -> String {
        let payload = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{payload}", self.mime)
    }
}

impl fmt::Debug for CanonicalImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalImage")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Identifies one submission attempt. Strictly increasing per controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttemptToken(u64);

impl AttemptToken {
    pub fn next(self) -> Self {
        AttemptToken(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One image plus the attempt it was submitted under.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub token: AttemptToken,
    pub image: CanonicalImage,
}

/// Verdict returned by the analysis service.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    is_authentic: bool,
    confidence: f32,
    emotion: String,
    timestamp: DateTime<Utc>,
    prediction_label: Option<String>,
    analysis_id: Option<Uuid>,
}

impl AnalysisResult {
    pub(crate) fn new(
        is_authentic: bool,
        confidence: f32,
        emotion: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            is_authentic,
            confidence,
            emotion,
            timestamp,
            prediction_label: None,
            analysis_id: None,
        }
    }

    pub(crate) fn with_service_metadata(
        mut self,
        prediction_label: Option<String>,
        analysis_id: Option<Uuid>,
    ) -> Self {
        self.prediction_label = prediction_label;
        self.analysis_id = analysis_id;
        self
    }

    pub fn is_authentic(&self) -> bool {
        self.is_authentic
    }

    /// Confidence in the verdict, in [0, 1].
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Confidence as a whole percentage, rounded half away from zero.
    pub fn confidence_percent(&self) -> u8 {
        (self.confidence * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn emotion(&self) -> &str {
        &self.emotion
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Raw class label reported by the service ("real" / "fake"), if any.
    pub fn prediction_label(&self) -> Option<&str> {
        self.prediction_label.as_deref()
    }

    /// Server-side record id, if the service returned one.
    pub fn analysis_id(&self) -> Option<Uuid> {
        self.analysis_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_mime_mapping() {
        assert_eq!(ImageMime::from_declared("image/png"), Some(ImageMime::Png));
        assert_eq!(ImageMime::from_declared("IMAGE/JPEG"), Some(ImageMime::Jpeg));
        assert_eq!(ImageMime::from_declared("image/jpeg; charset=binary"), Some(ImageMime::Jpeg));
        assert_eq!(ImageMime::from_declared("image/jpg"), None);
        assert_eq!(ImageMime::from_declared("image/gif"), None);
        assert_eq!(ImageMime::from_declared("text/plain"), None);
    }

    #[test]
    fn test_data_uri_format() {
        let image = CanonicalImage::new(vec![1, 2, 3], ImageMime::Png);
        assert_eq!(image.to_data_uri(), "data:image/png;base64,AQID");
    }

    #[test]
    fn test_debug_omits_bytes() {
        let image = CanonicalImage::new(vec![0xAB; 64], ImageMime::Jpeg);
        let dbg = format!("{image:?}");
        assert!(dbg.contains("len: 64"));
        assert!(!dbg.contains("171"));
    }

    #[test]
    fn test_token_increments() {
        let t = AttemptToken::default();
        assert_eq!(t.next().value(), 1);
        assert!(t.next().next() > t.next());
        assert_eq!(t.next().to_string(), "#1");
    }

    #[test]
    fn test_confidence_percent_rounding() {
        let at = DateTime::from_timestamp(0, 0).unwrap();
        let r = AnalysisResult::new(true, 0.95, "neutral".into(), at);
        assert_eq!(r.confidence_percent(), 95);
        let r = AnalysisResult::new(false, 0.8765, "happy".into(), at);
        assert_eq!(r.confidence_percent(), 88);
    }
}
