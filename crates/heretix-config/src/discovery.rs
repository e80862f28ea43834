use std::collections::HashMap;
use std::env;
use std::path::Path;

use camino::Utf8PathBuf;
use heretix_types::{Lens, RunConfig};
use serde::Deserialize;
use thiserror::Error;

use crate::overrides::CliOverrides;
use crate::source::ConfigSource;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, #[source] source: toml::de::Error },
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required field: provider and model must be set (CLI, env, or config file)")]
    MissingRequired,
}

/// Optional, file-shaped mirror of `RunConfig`: every field absent unless
/// the TOML file sets it.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    lens: Option<String>,
    k_templates: Option<usize>,
    r_replicates: Option<usize>,
    bootstrap_iters: Option<usize>,
    seed: Option<u64>,
    provider: Option<String>,
    model: Option<String>,
    max_concurrency: Option<usize>,
    request_timeout_ms: Option<u64>,
    web_doc_count: Option<usize>,
    cache_dir: Option<String>,
    artifact_dir: Option<String>,
    max_prompt_chars: Option<usize>,
}

fn parse_lens(value: &str) -> Result<Lens, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "rpl" => Ok(Lens::Rpl),
        "wel" => Ok(Lens::Wel),
        "both" => Ok(Lens::Both),
        other => Err(ConfigError::InvalidValue { field: "lens", value: other.to_string() }),
    }
}

/// Discovers and loads `RunConfig`, looking for `heretix.toml` in the
/// current directory.
pub fn discover(cli: &CliOverrides) -> Result<(RunConfig, HashMap<&'static str, ConfigSource>), ConfigError> {
    let start_dir = env::current_dir().unwrap_or_else(|_| ".".into());
    discover_from(&start_dir, cli)
}

/// Path-driven variant of [`discover`], for tests that shouldn't depend on
/// the process's current directory.
pub fn discover_from(
    start_dir: &Path,
    cli: &CliOverrides,
) -> Result<(RunConfig, HashMap<&'static str, ConfigSource>), ConfigError> {
    let mut config = RunConfig::default();
    let mut sources: HashMap<&'static str, ConfigSource> = HashMap::new();
    for field in RUN_CONFIG_FIELDS {
        sources.insert(field, ConfigSource::Defaults);
    }

    let config_path = cli
        .config_path
        .clone()
        .map(Utf8PathBuf::from)
        .or_else(|| env::var("HERETIX_CONFIG").ok().map(Utf8PathBuf::from))
        .or_else(|| {
            let candidate = start_dir.join("heretix.toml");
            candidate.exists().then(|| Utf8PathBuf::from_path_buf(candidate).ok()).flatten()
        });

    if let Some(path) = &config_path {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_string(), source })?;
        let file: FileConfig = toml::from_str(&text)
            .map_err(|source| ConfigError::Parse { path: path.to_string(), source })?;
        apply_file(&file, &mut config, &mut sources, path)?;
    }

    apply_env(&mut config, &mut sources)?;
    apply_cli(cli, &mut config, &mut sources)?;

    if config.provider.trim().is_empty() || config.model.trim().is_empty() {
        return Err(ConfigError::MissingRequired);
    }

    Ok((config, sources))
}

const RUN_CONFIG_FIELDS: [&str; 13] = [
    "lens",
    "k_templates",
    "r_replicates",
    "bootstrap_iters",
    "seed",
    "provider",
    "model",
    "max_concurrency",
    "request_timeout_ms",
    "web_doc_count",
    "cache_dir",
    "artifact_dir",
    "max_prompt_chars",
];

fn apply_file(
    file: &FileConfig,
    config: &mut RunConfig,
    sources: &mut HashMap<&'static str, ConfigSource>,
    path: &Utf8PathBuf,
) -> Result<(), ConfigError> {
    let src = ConfigSource::ConfigFile(path.clone());
    if let Some(lens) = &file.lens {
        config.lens = parse_lens(lens)?;
        sources.insert("lens", src.clone());
    }
    macro_rules! take {
        ($field:ident) => {
            if let Some(v) = file.$field.clone() {
                config.$field = v;
                sources.insert(stringify!($field), src.clone());
            }
        };
    }
    take!(k_templates);
    take!(r_replicates);
    take!(bootstrap_iters);
    take!(seed);
    take!(provider);
    take!(model);
    take!(max_concurrency);
    take!(request_timeout_ms);
    take!(web_doc_count);
    if let Some(v) = file.cache_dir.clone() {
        config.cache_dir = Some(v);
        sources.insert("cache_dir", src.clone());
    }
    if let Some(v) = file.artifact_dir.clone() {
        config.artifact_dir = Some(v);
        sources.insert("artifact_dir", src.clone());
    }
    if let Some(v) = file.max_prompt_chars {
        config.max_prompt_chars = Some(v);
        sources.insert("max_prompt_chars", src);
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn apply_env(config: &mut RunConfig, sources: &mut HashMap<&'static str, ConfigSource>) -> Result<(), ConfigError> {
    if let Some(v) = env_var("HERETIX_LENS") {
        config.lens = parse_lens(&v)?;
        sources.insert("lens", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_PROVIDER") {
        config.provider = v;
        sources.insert("provider", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_MODEL") {
        config.model = v;
        sources.insert("model", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_K_TEMPLATES") {
        config.k_templates = parse_num(&v, "k_templates")?;
        sources.insert("k_templates", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_R_REPLICATES") {
        config.r_replicates = parse_num(&v, "r_replicates")?;
        sources.insert("r_replicates", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_BOOTSTRAP_ITERS") {
        config.bootstrap_iters = parse_num(&v, "bootstrap_iters")?;
        sources.insert("bootstrap_iters", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_SEED") {
        config.seed = Some(parse_num(&v, "seed")?);
        sources.insert("seed", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_MAX_CONCURRENCY") {
        config.max_concurrency = parse_num(&v, "max_concurrency")?;
        sources.insert("max_concurrency", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_REQUEST_TIMEOUT_MS") {
        config.request_timeout_ms = parse_num(&v, "request_timeout_ms")?;
        sources.insert("request_timeout_ms", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_WEB_DOC_COUNT") {
        config.web_doc_count = parse_num(&v, "web_doc_count")?;
        sources.insert("web_doc_count", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_CACHE_DIR") {
        config.cache_dir = Some(v);
        sources.insert("cache_dir", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_ARTIFACT_DIR") {
        config.artifact_dir = Some(v);
        sources.insert("artifact_dir", ConfigSource::Env);
    }
    if let Some(v) = env_var("HERETIX_MAX_PROMPT_CHARS") {
        config.max_prompt_chars = Some(parse_num(&v, "max_prompt_chars")?);
        sources.insert("max_prompt_chars", ConfigSource::Env);
    }
    Ok(())
}

fn parse_num<T: std::str::FromStr>(value: &str, field: &'static str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue { field, value: value.to_string() })
}

fn apply_cli(
    cli: &CliOverrides,
    config: &mut RunConfig,
    sources: &mut HashMap<&'static str, ConfigSource>,
) -> Result<(), ConfigError> {
    macro_rules! take {
        ($field:ident) => {
            if let Some(v) = cli.$field.clone() {
                config.$field = v;
                sources.insert(stringify!($field), ConfigSource::Cli);
            }
        };
    }
    take!(lens);
    take!(k_templates);
    take!(r_replicates);
    take!(bootstrap_iters);
    take!(provider);
    take!(model);
    take!(max_concurrency);
    take!(request_timeout_ms);
    take!(web_doc_count);
    if let Some(v) = cli.seed {
        config.seed = Some(v);
        sources.insert("seed", ConfigSource::Cli);
    }
    if let Some(v) = cli.cache_dir.clone() {
        config.cache_dir = Some(v);
        sources.insert("cache_dir", ConfigSource::Cli);
    }
    if let Some(v) = cli.artifact_dir.clone() {
        config.artifact_dir = Some(v);
        sources.insert("artifact_dir", ConfigSource::Cli);
    }
    if let Some(v) = cli.max_prompt_chars {
        config.max_prompt_chars = Some(v);
        sources.insert("max_prompt_chars", ConfigSource::Cli);
    }
    Ok(())
}
