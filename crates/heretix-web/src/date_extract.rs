//! Best-effort publication-date extraction from a fetched document, with a
//! confidence tied to how reliable the signal that produced it tends to be.
//!
//! Grounded on `heretix_wel/date_extract.py`'s `CONFIDENCE_MAP`: JSON-LD
//! structured data is trusted most, followed by OpenGraph meta tags, visible
//! `<time>` elements, URL date segments, body-text date mentions, and
//! finally HTTP `Last-Modified` headers as a last resort.

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

pub const CONFIDENCE_JSONLD: f64 = 1.0;
pub const CONFIDENCE_OG: f64 = 0.9;
pub const CONFIDENCE_TIME_TAG: f64 = 0.8;
pub const CONFIDENCE_URL: f64 = 0.7;
pub const CONFIDENCE_BODY: f64 = 0.6;
pub const CONFIDENCE_HEADER: f64 = 0.4;

pub const JSONLD_DATE_KEYS: &[&str] = &["datePublished", "dateModified", "uploadDate"];
pub const OG_DATE_KEYS: &[&str] = &["article:published_time", "og:updated_time"];

static URL_DATE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(\d{4})[/-](\d{2})[/-](\d{2})/").expect("static url-date pattern is valid"));

static BODY_DATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{4})-(\d{2})-(\d{2})\b").expect("static body-date pattern is valid")
});

/// Every signal a caller may have extracted from a fetched page, used in
/// descending order of trust.
#[derive(Debug, Default, Clone)]
pub struct DateSources {
    pub jsonld_dates: Vec<(String, String)>,
    pub og_meta: Vec<(String, String)>,
    pub time_tag: Option<String>,
    pub url: Option<String>,
    pub body_text: Option<String>,
    pub header_last_modified: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DateConfidence {
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
}

/// Extracts the most trustworthy date signal available, in descending
/// confidence order, stopping at the first that parses.
pub fn extract_date(sources: &DateSources) -> Option<DateConfidence> {
    for (key, value) in &sources.jsonld_dates {
        if JSONLD_DATE_KEYS.contains(&key.as_str()) {
            if let Some(ts) = parse_rfc3339_ish(value) {
                return Some(DateConfidence { timestamp: ts, confidence: CONFIDENCE_JSONLD });
            }
        }
    }
    for (key, value) in &sources.og_meta {
        if OG_DATE_KEYS.contains(&key.as_str()) {
            if let Some(ts) = parse_rfc3339_ish(value) {
                return Some(DateConfidence { timestamp: ts, confidence: CONFIDENCE_OG });
            }
        }
    }
    if let Some(time) = &sources.time_tag {
        if let Some(ts) = parse_rfc3339_ish(time) {
            return Some(DateConfidence { timestamp: ts, confidence: CONFIDENCE_TIME_TAG });
        }
    }
    if let Some(url) = &sources.url {
        if let Some(caps) = URL_DATE_REGEX.captures(url) {
            if let Some(ts) = ymd_to_utc(&caps[1], &caps[2], &caps[3]) {
                return Some(DateConfidence { timestamp: ts, confidence: CONFIDENCE_URL });
            }
        }
    }
    if let Some(body) = &sources.body_text {
        if let Some(caps) = BODY_DATE_REGEX.captures(body) {
            if let Some(ts) = ymd_to_utc(&caps[1], &caps[2], &caps[3]) {
                return Some(DateConfidence { timestamp: ts, confidence: CONFIDENCE_BODY });
            }
        }
    }
    if let Some(header) = &sources.header_last_modified {
        if let Some(ts) = parse_rfc3339_ish(header).or_else(|| parse_http_date(header)) {
            return Some(DateConfidence { timestamp: ts, confidence: CONFIDENCE_HEADER });
        }
    }
    None
}

fn parse_rfc3339_ish(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn ymd_to_utc(y: &str, m: &str, d: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)?;
    Some(DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0)?, Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_jsonld_over_url() {
        let sources = DateSources {
            jsonld_dates: vec![("datePublished".to_string(), "2024-03-15T00:00:00Z".to_string())],
            url: Some("https://example.com/2020/01/01/story".to_string()),
            ..Default::default()
        };
        let found = extract_date(&sources).unwrap();
        assert_eq!(found.confidence, CONFIDENCE_JSONLD);
        assert_eq!(found.timestamp.format("%Y").to_string(), "2024");
    }

    #[test]
    fn falls_back_to_url_date() {
        let sources = DateSources {
            url: Some("https://example.com/2021/06/30/story".to_string()),
            ..Default::default()
        };
        let found = extract_date(&sources).unwrap();
        assert_eq!(found.confidence, CONFIDENCE_URL);
    }

    #[test]
    fn no_signal_returns_none() {
        assert!(extract_date(&DateSources::default()).is_none());
    }
}
