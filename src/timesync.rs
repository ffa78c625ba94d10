//! ==============================================================================
//! timesync.rs - time reference client
//! ==============================================================================
//!
//! purpose:
//!     asks a remote time service for the current wall-clock time and turns
//!     its iso-8601-ish answer into the `YYYY-MM-DD HH:MM:SS` form the sink
//!     stores.
//!
//! contract:
//!     - `fetch()` never errors: any failure (link down, transport error,
//!       non-200, bad json, missing/empty `dateTime`) is `None`.
//!     - `normalize()` is pure.
//!     - `sync()` is the caller-side wait: retry `fetch()` under a policy
//!       (unbounded by default) until a usable time comes back.
//!
//! ==============================================================================

use serde::Deserialize;
use std::sync::Arc;

use crate::domain::NormalizedTime;
use crate::network::NetworkLink;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
struct TimeResponse {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
}

#[derive(Clone)]
pub struct TimeClient {
    http: reqwest::Client,
    url: String,
    link: Arc<dyn NetworkLink>,
}

impl TimeClient {
    pub fn new(http: reqwest::Client, url: impl Into<String>, link: Arc<dyn NetworkLink>) -> Self {
        Self {
            http,
            url: url.into(),
            link,
        }
    }

    /// one round-trip to the time service
    pub async fn fetch(&self) -> Option<String> {
        if !self.link.connected() {
            tracing::debug!("time fetch skipped: network not connected");
            return None;
        }

        let response = match self.http.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("time service request failed: {}", e);
                return None;
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            tracing::debug!("time service returned HTTP {}", status.as_u16());
            return None;
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("time service body unreadable: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<TimeResponse>(&body) {
            Ok(TimeResponse { date_time: Some(raw) }) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
            Ok(_) => {
                tracing::debug!("time service payload has no dateTime");
                None
            }
            Err(e) => {
                tracing::debug!("time service payload is not json: {}", e);
                None
            }
        }
    }

    /// keep fetching until a time is available or the policy gives up
    pub async fn sync(&self, policy: &RetryPolicy) -> Option<NormalizedTime> {
        policy
            .retry_until_some(|attempt| async move {
                let normalized = self.fetch().await.and_then(|raw| normalize(&raw));
                if normalized.is_none() {
                    if warn_on_attempt(attempt) {
                        tracing::warn!(attempt, url = %self.url, "HTTP error getting time, still retrying");
                    } else {
                        tracing::debug!(attempt, "time not available yet");
                    }
                }
                normalized
            })
            .await
    }
}

/// failed attempts between repeated warnings while time sync keeps retrying
const WARN_EVERY: u32 = 50;

fn warn_on_attempt(attempt: u32) -> bool {
    attempt == 1 || attempt % WARN_EVERY == 0
}

/// `2025-10-23T00:14:59.6799641` -> `2025-10-23 00:14:59`
///
/// replaces the date/time separator, cuts any fraction at the first `.`,
/// and drops a trailing `Z` or numeric utc offset.
pub fn normalize(raw: &str) -> Option<NormalizedTime> {
    let mut s = raw.trim().replacen(['T', 't'], " ", 1);

    if let Some(dot) = s.find('.') {
        s.truncate(dot);
    }
    if s.ends_with(['Z', 'z']) {
        s.pop();
    }
    // "YYYY-MM-DD HH:MM:SS" is 19 bytes; anything signed after it is an offset
    if s.len() > 19 && s.is_char_boundary(19) && s[19..].starts_with(['+', '-']) {
        s.truncate(19);
    }

    NormalizedTime::new(s.trim_end())
}
