use thiserror::Error;

/// Failure taxonomy for the whole engine.
///
/// Client calls, the renderer, and the voice pipeline all report through
/// this one enum so the notifier can turn a failure into actionable text
/// without string matching.
#[derive(Debug, Error)]
pub enum AssistError {
    #[error("no API token configured")]
    Configuration,

    #[error("analysis service unreachable: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("analysis service returned HTTP {status}")]
    Http { status: u16 },

    #[error("malformed response from analysis service: {0}")]
    Protocol(String),

    #[error("issue span {start}..{end} crosses a node boundary")]
    RangeMapping { start: usize, end: usize },

    #[error("microphone unavailable: {0}")]
    Device(String),
}

impl AssistError {
    /// One-line, user-facing text for a notification. Distinguishes
    /// "unreachable" from "bad credential" from "timed out" so the user
    /// knows what to fix.
    pub fn notification_text(&self) -> String {
        match self {
            AssistError::Configuration => {
                "Writing assistant is not configured. Set your API token in settings.".to_string()
            }
            AssistError::Network(_) => {
                "Writing assistant service is unreachable. Is the local server running?".to_string()
            }
            AssistError::Timeout(secs) => {
                format!("Writing assistant request timed out after {}s.", secs)
            }
            AssistError::Http { status: 401 } => {
                "Writing assistant rejected your API token. Check it in settings.".to_string()
            }
            AssistError::Http { status } => {
                format!("Writing assistant service returned an error (HTTP {}).", status)
            }
            AssistError::Protocol(_) => {
                "Writing assistant service sent an unexpected response.".to_string()
            }
            AssistError::RangeMapping { .. } => {
                "Some annotations could not be placed.".to_string()
            }
            AssistError::Device(reason) => {
                format!("Microphone unavailable: {}", reason)
            }
        }
    }
}
