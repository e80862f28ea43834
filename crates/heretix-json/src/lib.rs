//! Tolerant extraction of a probability judgement from an LLM's raw text
//! response.
//!
//! Models rarely return clean JSON: they wrap it in `<think>` reasoning,
//! fence it in markdown, or drift from the requested schema under load.
//! This crate strips the wrapping noise first, then tries a strict parse
//! against the expected schema before falling back to a lenient one that
//! tolerates field aliases and percentage strings. The repair ladder
//! mirrors `heretix_extraction`'s approach to salvaging malformed model
//! output rather than rejecting it outright.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JsonError {
    #[error("no JSON object found in response")]
    NoJsonFound,
    #[error("JSON object is not well-formed: {0}")]
    Malformed(String),
    #[error("response is missing a usable probability field")]
    MissingProbability,
}

/// A judgement extracted from a model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedJudgement {
    pub prob: f64,
    pub has_citation_or_url: bool,
}

#[derive(Debug, Deserialize)]
struct StrictJudgement {
    probability: f64,
    #[serde(default)]
    has_citation_or_url: bool,
}

/// Reasoning-wrapper tags models emit before their actual answer. Stripped
/// repeatedly (not just once) since some models nest or repeat them.
const THINK_TAGS: &[&str] = &["think", "thinking", "reasoning", "reflection", "scratchpad", "thought"];

static THINK_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = THINK_TAGS.join("|");
    Regex::new(&format!(r"(?is)<({alternation})>.*?</\1>")).expect("static think-tag pattern is valid")
});

static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static code-fence pattern is valid")
});

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://[^\s\)\]\}\"']+").expect("static url pattern is valid"));

/// Extracts a probability judgement from a raw model response, tolerating
/// reasoning wrappers, markdown fences, and schema drift.
pub fn extract_judgement(raw: &str) -> Result<ExtractedJudgement, JsonError> {
    let stripped = strip_think_tags(raw);
    let unfenced = strip_code_fence(&stripped);
    let candidate = extract_balanced_object(&unfenced).ok_or(JsonError::NoJsonFound)?;

    let value: Value =
        serde_json::from_str(&candidate).map_err(|e| JsonError::Malformed(e.to_string()))?;

    let judgement = match serde_json::from_value::<StrictJudgement>(value.clone()) {
        Ok(strict) => ExtractedJudgement {
            prob: strict.probability.clamp(0.0, 1.0),
            has_citation_or_url: strict.has_citation_or_url,
        },
        Err(_) => extract_lenient(&value)?,
    };

    let has_citation_or_url = judgement.has_citation_or_url || has_citation_or_url(raw);
    Ok(ExtractedJudgement {
        prob: judgement.prob,
        has_citation_or_url,
    })
}

/// Strips every recognized reasoning-wrapper tag pair, repeating until a
/// fixed point so nested or repeated wrappers are fully removed.
fn strip_think_tags(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = THINK_TAG_RE.replace_all(&current, "").into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

fn strip_code_fence(raw: &str) -> String {
    if let Some(caps) = CODE_FENCE_RE.captures(raw) {
        caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_else(|| raw.to_string())
    } else {
        raw.to_string()
    }
}

/// Scans for the first `{` and returns the substring up to its matching
/// `}`, respecting string quoting and escapes so braces inside string
/// values don't throw off the count.
fn extract_balanced_object(s: &str) -> Option<String> {
    let bytes: Vec<char> = s.chars().collect();
    let start = bytes.iter().position(|&c| c == '{')?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = i + 1;
                    return Some(bytes[start..end].iter().collect());
                }
            }
            _ => {}
        }
    }
    None
}

fn has_citation_or_url(raw: &str) -> bool {
    URL_RE.is_match(raw) || raw.to_lowercase().contains("[citation")
}

fn extract_lenient(value: &Value) -> Result<ExtractedJudgement, JsonError> {
    let obj = value.as_object().ok_or(JsonError::MissingProbability)?;

    let prob_value = ["probability", "prob", "p", "confidence"]
        .iter()
        .find_map(|key| obj.get(*key))
        .ok_or(JsonError::MissingProbability)?;

    let prob = coerce_prob(prob_value).ok_or(JsonError::MissingProbability)?;

    let has_citation_or_url = obj
        .get("has_citation_or_url")
        .or_else(|| obj.get("citation"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(ExtractedJudgement {
        prob: prob.clamp(0.0, 1.0),
        has_citation_or_url,
    })
}

fn coerce_prob(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(pct) = trimmed.strip_suffix('%') {
                pct.trim().parse::<f64>().ok().map(|p| p / 100.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_clean_json() {
        let raw = r#"{"probability": 0.82, "has_citation_or_url": true}"#;
        let j = extract_judgement(raw).unwrap();
        assert_eq!(j.prob, 0.82);
        assert!(j.has_citation_or_url);
    }

    #[test]
    fn strips_think_tags_and_fences() {
        let raw = "<think>let me reason about this...</think>\n```json\n{\"probability\": 0.4}\n```";
        let j = extract_judgement(raw).unwrap();
        assert_eq!(j.prob, 0.4);
    }

    #[test]
    fn strips_other_reasoning_tag_variants() {
        let raw = "<scratchpad>hmm</scratchpad><reflection>nested <think>x</think> thought</reflection>{\"probability\": 0.3}";
        let j = extract_judgement(raw).unwrap();
        assert_eq!(j.prob, 0.3);
    }

    #[test]
    fn tolerates_prose_around_json() {
        let raw = "Sure, here is my answer:\n{\"probability\": 0.6, \"has_citation_or_url\": false}\nHope that helps.";
        let j = extract_judgement(raw).unwrap();
        assert_eq!(j.prob, 0.6);
    }

    #[test]
    fn lenient_path_accepts_aliases_and_percentages() {
        let raw = r#"{"prob": "73%"}"#;
        let j = extract_judgement(raw).unwrap();
        assert!((j.prob - 0.73).abs() < 1e-9);
    }

    #[test]
    fn detects_url_even_without_flag() {
        let raw = r#"{"probability": 0.5} see https://example.com/source"#;
        let j = extract_judgement(raw).unwrap();
        assert!(j.has_citation_or_url);
    }

    #[test]
    fn no_json_found_errors() {
        let raw = "I cannot determine a probability.";
        assert!(matches!(extract_judgement(raw), Err(JsonError::NoJsonFound)));
    }

    #[test]
    fn clamps_out_of_range_probability() {
        let raw = r#"{"probability": 1.5}"#;
        let j = extract_judgement(raw).unwrap();
        assert_eq!(j.prob, 1.0);
    }
}
