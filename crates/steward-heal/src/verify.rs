//! Verification polling after a remediation action.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use steward_core::{Result, StewardError};

use crate::playbook::{CheckType, Verification};

/// What a probe observed.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

/// Fetches a URL for verification and endpoint checks.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<ProbeResponse>;
}

/// HTTP probe over reqwest.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("steward/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StewardError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn fetch(&self, url: &str) -> Result<ProbeResponse> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StewardError::Handler(probe_error(url, &e)))?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok(ProbeResponse { status, body })
    }
}

fn probe_error(url: &str, e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("GET {url} timed out")
    } else {
        format!("GET {url} failed: {e}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub passed: bool,
    pub attempts: u32,
    pub last_observation: Option<String>,
}

/// Does one response satisfy the check?
pub fn check_passes(verification: &Verification, response: &ProbeResponse) -> bool {
    match verification.check {
        CheckType::None => true,
        CheckType::HttpStatus => {
            let expected = verification
                .expected
                .as_deref()
                .and_then(|s| s.trim().parse::<u16>().ok())
                .unwrap_or(200);
            response.status == expected
        }
        CheckType::BodyContains => verification
            .expected
            .as_deref()
            .is_some_and(|needle| response.body.contains(needle)),
    }
}

/// Poll up to `retries + 1` times, sleeping `backoff_ms` between attempts,
/// until the check passes. Probe errors count as failed attempts.
pub async fn verify(
    verification: &Verification,
    fallback_url: Option<&str>,
    probe: &dyn Probe,
) -> VerifyResult {
    if verification.check == CheckType::None {
        return VerifyResult {
            passed: true,
            attempts: 0,
            last_observation: None,
        };
    }
    let Some(url) = verification.url.as_deref().or(fallback_url) else {
        return VerifyResult {
            passed: false,
            attempts: 0,
            last_observation: Some("no URL to verify against".into()),
        };
    };

    let max = verification.retries + 1;
    let mut last = None;
    for attempt in 1..=max {
        match probe.fetch(url).await {
            Ok(resp) if check_passes(verification, &resp) => {
                tracing::debug!("🔍 Verified {} on attempt {}", url, attempt);
                return VerifyResult {
                    passed: true,
                    attempts: attempt,
                    last_observation: Some(format!("HTTP {}", resp.status)),
                };
            }
            Ok(resp) => last = Some(format!("HTTP {}", resp.status)),
            Err(e) => last = Some(e.to_string()),
        }
        if attempt < max && verification.backoff_ms > 0 {
            tokio::time::sleep(Duration::from_millis(verification.backoff_ms)).await;
        }
    }

    tracing::warn!("🔍 Verification of {} failed after {} attempts", url, max);
    VerifyResult {
        passed: false,
        attempts: max,
        last_observation: last,
    }
}
