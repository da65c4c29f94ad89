use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::request::RequestKey;
use crate::response::{find_header, Response, ResponseSource, CACHE_DATE_HEADER};

/// One stored response. Immutable once written; a refetch replaces it whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntry {
    pub url: String,
    pub method: String,
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// `None` for entries pre-cached at install, which carry no stamp.
    pub cached_at: Option<DateTime<Utc>>,
}

impl CachedEntry {
    /// Copy a response as-is, without a timestamp.
    pub fn unstamped(key: &RequestKey, response: &Response) -> Self {
        Self {
            url: key.url.clone(),
            method: key.method.clone(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: None,
        }
    }

    /// Copy a response and stamp it with `now`.
    pub fn stamped(key: &RequestKey, response: &Response, now: DateTime<Utc>) -> Self {
        let mut entry = Self::unstamped(key, response);
        entry.headers.retain(|(name, _)| name != CACHE_DATE_HEADER);
        entry.headers.push((
            CACHE_DATE_HEADER.to_string(),
            now.timestamp_millis().to_string(),
        ));
        entry.cached_at = Some(now);
        entry
    }

    /// Recover the stamp from the header when the field is missing, e.g. for
    /// entries written by an older worker.
    pub fn stored_at(&self) -> Option<DateTime<Utc>> {
        self.cached_at.or_else(|| {
            find_header(&self.headers, CACHE_DATE_HEADER)
                .and_then(|v| v.parse::<i64>().ok())
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        })
    }

    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.stored_at().map(|at| now - at)
    }

    /// Fresh when `now - stored_at < max_age`. Unstamped entries are never
    /// fresh. A stamp in the future (clock skew) counts as fresh.
    pub fn is_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        match self.age(now) {
            Some(age) => age.to_std().map(|age| age < max_age).unwrap_or(true),
            None => false,
        }
    }

    pub fn to_response(&self, source: ResponseSource) -> Response {
        Response {
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            source,
        }
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = match self.age(now) {
            Some(age) => age.num_minutes(),
            None => return "unstamped".to_string(),
        };
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
