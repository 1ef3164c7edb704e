/// Text-generation contract used by the orchestrator.
use std::path::PathBuf;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

use crate::schema::gossip::GossipContext;

/// Speaker used when the name buffer is empty.
pub const DEFAULT_SPEAKER: &str = "Ace";

/// Neutral lines written when a generation attempt fails.
pub const FALLBACK_LINES: &[&str] = &[
    "(...the villager zones out for a moment...)",
    "...(the wind rustles; nobody answers)...",
    "(silence)",
];

/// Everything one generation attempt may use. Built per attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub speaker: String,
    pub gossip: Option<GossipContext>,
    /// Screenshot files to attach, if any were captured.
    pub images: Vec<PathBuf>,
}

impl GenerationRequest {
    pub fn new(speaker: Option<&str>) -> Self {
        Self {
            speaker: speaker.unwrap_or(DEFAULT_SPEAKER).to_string(),
            gossip: None,
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no API key configured")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("backend returned no content")]
    EmptyResponse,
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation worker exited without a result")]
    WorkerLost,
    #[error("{0}")]
    Backend(String),
}

/// Produces one dialogue line (tagged text) for a request.
pub trait Generator: Send + Sync {
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

impl<F> Generator for F
where
    F: Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync,
{
    fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self(request)
    }
}

/// Pick one of [`FALLBACK_LINES`].
pub fn fallback_line<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    FALLBACK_LINES.choose(rng).copied().unwrap_or("(silence)")
}
