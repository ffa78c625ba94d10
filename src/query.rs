//! ==============================================================================
//! query.rs - percent-encoding and the request target builder
//! ==============================================================================
//!
//! purpose:
//!     every value that ends up in a request url goes through `QueryBuilder`,
//!     which always encodes. there is no way to append a raw string.
//!
//! encoding:
//!     unreserved = A-Z a-z 0-9 - _ . ~ (kept as-is)
//!     everything else, byte by byte, becomes %XX (uppercase hex).
//!
//! ==============================================================================

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Url;
use thiserror::Error;

/// everything except the unreserved set gets escaped
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid base url '{0}'")]
    InvalidBase(String),
    #[error("base url '{0}' carries a fragment")]
    Fragment(String),
    #[error("empty parameter name")]
    EmptyKey,
}

pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, QUERY_COMPONENT).to_string()
}

/// inverse of `percent_encode`; `None` when the result is not utf-8.
/// malformed escapes pass through unchanged.
pub fn percent_decode(encoded: &str) -> Option<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

/// ordered key/value query builder
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    base: String,
    pairs: Vec<(String, String)>,
}

impl QueryBuilder {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            pairs: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((key.into(), value.into()));
        self
    }

    pub fn params<'a>(mut self, params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.pairs
            .extend(params.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    /// the encoded query string, without the leading `?`
    pub fn encoded_query(&self) -> Result<String, QueryError> {
        let mut parts = Vec::with_capacity(self.pairs.len());
        for (k, v) in &self.pairs {
            if k.is_empty() {
                return Err(QueryError::EmptyKey);
            }
            parts.push(format!("{}={}", percent_encode(k), percent_encode(v)));
        }
        Ok(parts.join("&"))
    }

    pub fn build(&self) -> Result<Url, QueryError> {
        let mut url = Url::parse(&self.base).map_err(|e| QueryError::InvalidBase(format!("{}: {}", self.base, e)))?;
        if url.cannot_be_a_base() {
            return Err(QueryError::InvalidBase(self.base.clone()));
        }
        // a fragment would swallow anything appended after it
        if url.fragment().is_some() {
            return Err(QueryError::Fragment(self.base.clone()));
        }

        let query = self.encoded_query()?;
        if query.is_empty() {
            return Ok(url);
        }

        let combined = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
            _ => query,
        };
        url.set_query(Some(&combined));
        Ok(url)
    }
}
