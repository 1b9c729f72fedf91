use crate::error::AssistError;
use crate::settings::Settings;
use log::debug;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Credential header expected by every authenticated endpoint.
pub const AUTH_HEADER: &str = "X-Local-Auth";

/// One problem the analysis service found, addressed as a half-open
/// character range `[start, end)` into the checked text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub start: usize,
    pub end: usize,
    pub message: String,
    #[serde(default)]
    pub replacements: Vec<String>,
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceHealth {
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteMode {
    Fix,
    Concise,
    Formal,
    Friendly,
}

impl RewriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewriteMode::Fix => "fix",
            RewriteMode::Concise => "concise",
            RewriteMode::Formal => "formal",
            RewriteMode::Friendly => "friendly",
        }
    }
}

impl std::str::FromStr for RewriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fix" => Ok(RewriteMode::Fix),
            "concise" => Ok(RewriteMode::Concise),
            "formal" => Ok(RewriteMode::Formal),
            "friendly" => Ok(RewriteMode::Friendly),
            other => Err(format!(
                "unknown rewrite mode '{}' (expected fix, concise, formal or friendly)",
                other
            )),
        }
    }
}

impl std::fmt::Display for RewriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passive tone readout for the toolbar.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneReport {
    pub sentiment: String,
    pub formality: String,
    pub confidence: f64,
}

#[derive(Serialize)]
struct CheckRequest<'a> {
    text: &'a str,
    language: &'a str,
}

#[derive(Deserialize)]
struct CheckResponse {
    issues: Vec<Issue>,
}

#[derive(Serialize)]
struct RewriteRequest<'a> {
    text: &'a str,
    mode: RewriteMode,
}

#[derive(Deserialize)]
struct RewriteResponse {
    text: String,
}

#[derive(Serialize)]
struct ToneRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ToneLabels {
    sentiment: String,
    formality: String,
}

#[derive(Deserialize)]
struct ToneResponse {
    labels: ToneLabels,
    confidence: f64,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
}

/// HTTP client for the local analysis service.
///
/// Every authenticated call fails fast with `Configuration` when no token
/// is set, without a network attempt. All calls share builder-level
/// connect and request timeouts; this layer never retries.
pub struct AssistClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    timeout_secs: u64,
}

impl AssistClient {
    pub fn new(settings: &Settings) -> Result<Self, AssistError> {
        let timeout_secs = settings.request_timeout_secs.max(1);
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(timeout_secs))
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AssistError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: settings.endpoint.trim_end_matches('/').to_string(),
            api_token: settings.api_token.clone(),
            timeout_secs,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn require_token(&self) -> Result<(), AssistError> {
        if self.api_token.trim().is_empty() {
            return Err(AssistError::Configuration);
        }
        Ok(())
    }

    fn send_error(&self, e: reqwest::Error) -> AssistError {
        if e.is_timeout() {
            AssistError::Timeout(self.timeout_secs)
        } else {
            AssistError::Network(e.to_string())
        }
    }

    fn check_status(response: &reqwest::Response) -> Result<(), AssistError> {
        let status = response.status();
        if !status.is_success() {
            return Err(AssistError::Http {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// `GET /health`: unauthenticated liveness probe.
    pub async fn health(&self) -> Result<ServiceHealth, AssistError> {
        let url = self.url("/health");
        debug!("Checking service health at {}", url);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::check_status(&response)?;
        response
            .json::<ServiceHealth>()
            .await
            .map_err(|e| AssistError::Protocol(e.to_string()))
    }

    /// `POST /api/check`: grammar/style issues for `text`. Empty or
    /// whitespace-only text short-circuits to no issues without a request.
    pub async fn check(&self, text: &str, language: &str) -> Result<Vec<Issue>, AssistError> {
        self.require_token()?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let url = self.url("/api/check");
        debug!("Checking {} chars against {}", text.chars().count(), url);

        let response = self
            .http
            .post(&url)
            .header(AUTH_HEADER, &self.api_token)
            .json(&CheckRequest { text, language })
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::check_status(&response)?;

        let parsed = response
            .json::<CheckResponse>()
            .await
            .map_err(|e| AssistError::Protocol(e.to_string()))?;

        for issue in &parsed.issues {
            if issue.start >= issue.end {
                return Err(AssistError::Protocol(format!(
                    "issue has empty or inverted span {}..{}",
                    issue.start, issue.end
                )));
            }
        }

        debug!("Service reported {} issues", parsed.issues.len());
        Ok(parsed.issues)
    }

    /// `POST /api/rewrite`: rewrite `text` in the given mode.
    pub async fn rewrite(&self, text: &str, mode: RewriteMode) -> Result<String, AssistError> {
        self.require_token()?;

        let url = self.url("/api/rewrite");
        debug!("Rewriting {} chars with mode '{}'", text.chars().count(), mode);

        let response = self
            .http
            .post(&url)
            .header(AUTH_HEADER, &self.api_token)
            .json(&RewriteRequest { text, mode })
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::check_status(&response)?;

        let parsed = response
            .json::<RewriteResponse>()
            .await
            .map_err(|e| AssistError::Protocol(e.to_string()))?;
        Ok(parsed.text)
    }

    /// `POST /api/tone`: sentiment/formality readout for `text`.
    pub async fn tone(&self, text: &str) -> Result<ToneReport, AssistError> {
        self.require_token()?;

        let url = self.url("/api/tone");
        debug!("Analyzing tone of {} chars", text.chars().count());

        let response = self
            .http
            .post(&url)
            .header(AUTH_HEADER, &self.api_token)
            .json(&ToneRequest { text })
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::check_status(&response)?;

        let parsed = response
            .json::<ToneResponse>()
            .await
            .map_err(|e| AssistError::Protocol(e.to_string()))?;
        Ok(ToneReport {
            sentiment: parsed.labels.sentiment,
            formality: parsed.labels.formality,
            confidence: parsed.confidence,
        })
    }

    /// `POST /api/transcribe`: multipart WAV upload, transcribed text back.
    pub async fn transcribe(
        &self,
        wav_data: Vec<u8>,
        language: &str,
    ) -> Result<String, AssistError> {
        self.require_token()?;

        let url = self.url("/api/transcribe");
        debug!("Uploading {} bytes of audio to {}", wav_data.len(), url);

        let audio_part = Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| AssistError::Protocol(format!("failed to build audio part: {}", e)))?;
        let form = Form::new()
            .part("audio", audio_part)
            .text("language", language.to_string());

        let response = self
            .http
            .post(&url)
            .header(AUTH_HEADER, &self.api_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        Self::check_status(&response)?;

        let parsed = response
            .json::<TranscribeResponse>()
            .await
            .map_err(|e| AssistError::Protocol(e.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}
