//! Test doubles shared by the unit tests in this crate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Url;
use tokio::sync::oneshot;

use crate::client::{AnalysisTransport, AnalyzeRequest, TransportError, TransportResponse};
use crate::types::{CanonicalImage, ImageMime};

pub type Reply = Result<TransportResponse, TransportError>;

struct Slot {
    tx: Option<oneshot::Sender<Reply>>,
    rx: Option<oneshot::Receiver<Reply>>,
}

impl Slot {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

/// Transport whose replies are released by the test, keyed by the image
/// being submitted, so completion order is fully under test control.
#[derive(Default)]
pub struct ScriptedTransport {
    slots: Mutex<HashMap<String, Slot>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sender that completes the request carrying `image`. Dropping it
    /// without sending surfaces as a transport failure.
    pub fn responder(&self, image: &CanonicalImage) -> oneshot::Sender<Reply> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(image.to_data_uri())
            .or_insert_with(Slot::new)
            .tx
            .take()
            .expect("responder requested twice for the same image")
    }

    /// Data URIs received so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisTransport for ScriptedTransport {
    async fn post_json(
        &self,
        _endpoint: &Url,
        body: &AnalyzeRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.requests.lock().unwrap().push(body.image.clone());
        let rx = self
            .slots
            .lock()
            .unwrap()
            .entry(body.image.clone())
            .or_insert_with(Slot::new)
            .rx
            .take();
        let Some(rx) = rx else {
            return Err(TransportError("duplicate request for the same image".into()));
        };
        rx.await
            .map_err(|_| TransportError("connection dropped".into()))?
    }
}

pub fn reply_json(body: &str) -> Reply {
    reply_status(200, body)
}

pub fn reply_status(status: u16, body: &str) -> Reply {
    Ok(TransportResponse {
        status,
        body: body.to_string(),
    })
}

/// Verdict body in the service's wire format.
pub fn verdict(is_real: bool, confidence: &str) -> Reply {
    let body = serde_json::json!({
        "isReal": is_real,
        "confidence": confidence,
        "emotion": "neutral",
        "timestamp": "2024-01-01T00:00:00Z",
    });
    reply_json(&body.to_string())
}

/// Small distinct image per seed.
pub fn png_image(seed: u8) -> CanonicalImage {
    CanonicalImage::new(vec![0x89, b'P', b'N', b'G', seed], ImageMime::Png)
}
