use std::time::Duration;

/// Extensions accepted at upload intake. The server is the authority and
/// may still reject files; this list is a UX filter only.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] =
    &["pdf", "doc", "docx", "txt", "md", "csv", "xlsx", "pptx"];

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Quorum backend
    pub api_base_url: String,
    /// Ambient session token, if the host has one established
    pub session_token: Option<String>,
    /// Transfers dispatched per batch
    pub max_concurrent_uploads: usize,
    /// Poll cadence while specific items are known to be mid-flight
    pub fast_poll_interval: Duration,
    /// Poll cadence for coarse "anything active?" badges
    pub ambient_poll_interval: Duration,
    /// File extensions accepted at intake, lower-case without the dot
    pub allowed_extensions: Vec<String>,
}

impl Config {
    /// Load configuration from the environment or use defaults
    pub fn load_or_default() -> Self {
        let api_base_url = std::env::var("QUORUM_API_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        let session_token = std::env::var("QUORUM_SESSION_TOKEN").ok();

        Self {
            api_base_url,
            session_token,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            session_token: None,
            max_concurrent_uploads: 2,
            fast_poll_interval: Duration::from_secs(5),
            ambient_poll_interval: Duration::from_secs(20),
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}
