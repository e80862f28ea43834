//! Request/config validation.
//!
//! Grounded on the teacher's closed-field-set + strict/lenient dual-mode
//! validation pattern: every field a run request can set is checked against
//! a fixed, named bound before the pipeline ever sees it, so an out-of-range
//! `K`/`R`/timeout fails fast as a typed [`heretix_types::TypesError`]
//! instead of surfacing as a confusing downstream panic or silent
//! misbehavior.

use heretix_types::{Claim, RunConfig, TypesError};

pub const MIN_TEMPLATES: usize = 1;
pub const MAX_TEMPLATES: usize = 20;
pub const MIN_REPLICATES: usize = 1;
pub const MAX_REPLICATES: usize = 20;
pub const MIN_BOOTSTRAP_ITERS: usize = 100;
pub const MAX_BOOTSTRAP_ITERS: usize = 20_000;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;
pub const MIN_WEB_DOCS: usize = 1;
pub const MAX_WEB_DOCS: usize = 32;

fn bound_usize(field: &'static str, value: usize, min: usize, max: usize) -> Result<(), TypesError> {
    if value < min || value > max {
        return Err(TypesError::InvalidConfig {
            field,
            reason: format!("must be between {min} and {max}, got {value}"),
        });
    }
    Ok(())
}

/// Validates a [`RunConfig`] against fixed, named bounds. Called at every
/// entry point (CLI, HTTP, pipeline) before a run is started.
pub fn validate_run_config(config: &RunConfig) -> Result<(), Vec<TypesError>> {
    let mut errors = Vec::new();

    if let Err(e) = bound_usize("k_templates", config.k_templates, MIN_TEMPLATES, MAX_TEMPLATES) {
        errors.push(e);
    }
    if let Err(e) = bound_usize("r_replicates", config.r_replicates, MIN_REPLICATES, MAX_REPLICATES) {
        errors.push(e);
    }
    if let Err(e) = bound_usize("bootstrap_iters", config.bootstrap_iters, MIN_BOOTSTRAP_ITERS, MAX_BOOTSTRAP_ITERS) {
        errors.push(e);
    }
    if let Err(e) = bound_usize("web_doc_count", config.web_doc_count, MIN_WEB_DOCS, MAX_WEB_DOCS) {
        errors.push(e);
    }
    if config.request_timeout_ms < MIN_REQUEST_TIMEOUT_MS || config.request_timeout_ms > MAX_REQUEST_TIMEOUT_MS {
        errors.push(TypesError::InvalidConfig {
            field: "request_timeout_ms",
            reason: format!(
                "must be between {MIN_REQUEST_TIMEOUT_MS} and {MAX_REQUEST_TIMEOUT_MS}, got {}",
                config.request_timeout_ms
            ),
        });
    }
    if config.max_concurrency == 0 {
        errors.push(TypesError::InvalidConfig {
            field: "max_concurrency",
            reason: "must be at least 1".to_string(),
        });
    }
    if config.provider.trim().is_empty() {
        errors.push(TypesError::InvalidConfig { field: "provider", reason: "must not be empty".to_string() });
    }
    if config.model.trim().is_empty() {
        errors.push(TypesError::InvalidConfig { field: "model", reason: "must not be empty".to_string() });
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validates a claim string, wrapping [`Claim::new`]'s own checks. A thin
/// pass-through kept here so every boundary validates claims and configs
/// through the same module.
pub fn validate_claim(text: &str) -> Result<Claim, TypesError> {
    Claim::new(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> RunConfig {
        RunConfig::default()
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_run_config(&base_config()).is_ok());
    }

    #[test]
    fn rejects_zero_templates() {
        let mut config = base_config();
        config.k_templates = 0;
        let errors = validate_run_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, TypesError::InvalidConfig { field: "k_templates", .. })));
    }

    #[test]
    fn rejects_excessive_bootstrap_iters() {
        let mut config = base_config();
        config.bootstrap_iters = 1_000_000;
        let errors = validate_run_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, TypesError::InvalidConfig { field: "bootstrap_iters", .. })));
    }

    #[test]
    fn rejects_empty_provider() {
        let mut config = base_config();
        config.provider = "  ".to_string();
        let errors = validate_run_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, TypesError::InvalidConfig { field: "provider", .. })));
    }

    #[test]
    fn collects_multiple_errors_at_once() {
        let mut config = base_config();
        config.k_templates = 0;
        config.r_replicates = 0;
        let errors = validate_run_config(&config).unwrap_err();
        assert!(errors.len() >= 2);
    }

    #[test]
    fn rejects_empty_claim() {
        assert!(validate_claim("   ").is_err());
    }
}
