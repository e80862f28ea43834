//! `run`/`describe` command-line interface over the claim-verification
//! pipeline.
//!
//! Mirrors the teacher's CLI composition: a clap-derive `Cli`, one function
//! per subcommand that wires collaborators together and calls into the
//! library crates, and an `ExitCode` mapped from whatever the pipeline
//! returns rather than a bare `std::process::exit` scattered through
//! command bodies.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use heretix_config::{CliOverrides, discover};
use heretix_error_reporter::HeretixError;
use heretix_llm::{LlmBackend, MockBackend};
use heretix_pipeline::Pipeline;
use heretix_prompt_template::{PROMPT_VERSION, rpl_bundle};
use heretix_ratelimit::RateLimiter;
use heretix_sampler::build_plan;
use heretix_seed::{SeedParams, resolve_seed, rotation_offset};
use heretix_store::{ArtifactStore, DisabledArtifactStore, LocalArtifactStore};
use heretix_types::{Lens, RunConfig};
use heretix_utils::exit_codes::ExitCode;
use heretix_web::retrieval::{HttpSearchRetriever, WebRetriever};

#[derive(Debug, Parser)]
#[command(name = "heretix", about = "Claim-verification pipeline: sample a model prior, optionally fuse it with web evidence")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a claim through the pipeline and write the resulting record to `--out`.
    Run(RunArgs),
    /// Print the planned sampling sequence, rotation offset, and derived seed without calling any provider.
    Describe(DescribeArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Baseline,
    WebInformed,
}

impl ModeArg {
    fn into_lens(self) -> Lens {
        match self {
            ModeArg::Baseline => Lens::Rpl,
            ModeArg::WebInformed => Lens::Both,
        }
    }
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Claim text to verify.
    pub claim: String,
    /// Path to a `heretix.toml` config file.
    #[arg(long)]
    pub config: PathBuf,
    /// Prompt version to request; repeatable. Informational only today, since
    /// exactly one prompt bank (`PROMPT_VERSION`) is built in.
    #[arg(long = "prompt-version")]
    pub prompt_version: Vec<String>,
    /// Where to write the resulting `RunRecord` JSON.
    #[arg(long)]
    pub out: PathBuf,
    /// Use the deterministic mock backend instead of a real provider.
    #[arg(long)]
    pub mock: bool,
    /// Resolve configuration and print the plan, but don't run the pipeline.
    #[arg(long)]
    pub dry_run: bool,
    /// Which lens(es) to exercise. Overrides the config file's `lens` field.
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
}

#[derive(Debug, Parser)]
pub struct DescribeArgs {
    /// Path to a `heretix.toml` config file.
    #[arg(long)]
    pub config: PathBuf,
    /// Claim the plan would be built for; defaults to a placeholder since
    /// `describe` never calls a provider.
    #[arg(long, default_value = "example claim")]
    pub claim: String,
}

fn overrides_from_run_args(args: &RunArgs) -> CliOverrides {
    CliOverrides {
        config_path: Some(args.config.to_string_lossy().into_owned()),
        lens: args.mode.map(ModeArg::into_lens),
        ..Default::default()
    }
}

/// Builds the `LlmBackend` for a run: the deterministic mock when `--mock`
/// is set, otherwise a provider backend constructed from environment
/// variables named after `config.provider`.
fn build_backend(mock: bool, config: &RunConfig) -> Result<Arc<dyn LlmBackend>, HeretixError> {
    if mock {
        return Ok(Arc::new(MockBackend::new()));
    }
    let llm_config = heretix_llm::LlmConfig {
        provider: config.provider.clone(),
        fallback_provider: None,
        anthropic: Some(heretix_llm::AnthropicSettings {
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
            base_url: None,
            model: Some(config.model.clone()),
            max_tokens: None,
            temperature: None,
        }),
        openrouter: Some(heretix_llm::OpenRouterSettings {
            api_key_env: Some("OPENROUTER_API_KEY".to_string()),
            base_url: None,
            model: Some(config.model.clone()),
            max_tokens: None,
            temperature: None,
            budget: None,
        }),
    };
    let backend = heretix_llm::from_config(&llm_config).map_err(HeretixError::from)?;
    Ok(Arc::from(backend))
}

fn build_retriever(config: &RunConfig) -> Option<Arc<dyn WebRetriever>> {
    let endpoint = std::env::var("HERETIX_SEARCH_ENDPOINT").ok()?;
    if matches!(config.lens, Lens::Rpl) {
        return None;
    }
    let api_key = std::env::var("HERETIX_SEARCH_API_KEY").ok();
    Some(Arc::new(HttpSearchRetriever::new(endpoint, api_key)))
}

fn build_store(config: &RunConfig) -> Arc<dyn ArtifactStore> {
    match &config.artifact_dir {
        Some(dir) => Arc::new(LocalArtifactStore::new(dir.clone())),
        None => Arc::new(DisabledArtifactStore),
    }
}

/// Runs the `run` subcommand, returning the process exit code.
pub async fn run(args: RunArgs) -> ExitCode {
    let overrides = overrides_from_run_args(&args);
    let (config, _sources) = match discover(&overrides) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::CONFIG_ERROR;
        }
    };

    if args.dry_run {
        println!("{}", describe_plan(&args.claim, &config));
        return ExitCode::SUCCESS;
    }

    let backend = match build_backend(args.mock, &config) {
        Ok(backend) => backend,
        Err(e) => {
            tracing::error!(error = %e, "failed to construct model backend");
            return ExitCode::CONFIG_ERROR;
        }
    };

    let limiter = Arc::new(RateLimiter::new(config.max_concurrency.max(1) as u32 * 60));
    let cache = config
        .cache_dir
        .as_ref()
        .map(|dir| Arc::new(heretix_cache::SampleCache::new(dir.clone(), Duration::from_secs(7 * 24 * 3600))));
    let retriever = build_retriever(&config);
    let store = build_store(&config);

    let pipeline = Pipeline::new(backend, limiter, cache, retriever, store, args.mock);

    match pipeline.run(&args.claim, &config).await {
        Ok(record) => match write_record(&args.out, &record) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "failed to write output record");
                ExitCode::CONFIG_ERROR
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::CONFIG_ERROR
        }
    }
}

fn write_record(path: &PathBuf, record: &heretix_types::RunRecord) -> std::io::Result<()> {
    let bytes = heretix_store::emit_jcs(record).map_err(std::io::Error::other)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

/// Runs the `describe` subcommand: resolves configuration and prints the
/// planned template rotation, sampling sequence, and derived seed, without
/// ever constructing a model backend.
pub async fn describe(args: DescribeArgs) -> ExitCode {
    let overrides = CliOverrides { config_path: Some(args.config.to_string_lossy().into_owned()), ..Default::default() };
    let (config, sources) = match discover(&overrides) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::CONFIG_ERROR;
        }
    };

    println!("{}", describe_plan(&args.claim, &config));
    for (field, source) in sources {
        println!("  {field}: {source:?}");
    }
    ExitCode::SUCCESS
}

/// Renders the planned sampling sequence, rotation offset, and derived seed
/// for `claim` under `config`, the same preview `describe` prints, reusable
/// from `run --dry-run`.
fn describe_plan(claim: &str, config: &RunConfig) -> String {
    use heretix_rpl::{CENTER, TRIM};

    let bundle = rpl_bundle(claim);
    let template_hashes: Vec<String> = bundle.templates.iter().map(|t| t.hash.clone()).collect();
    let offset = rotation_offset(claim, &config.model, PROMPT_VERSION, bundle.templates.len());
    let seed = resolve_seed(
        config.seed,
        claim,
        &config.provider,
        &config.model,
        PROMPT_VERSION,
        &template_hashes,
        SeedParams { k: config.k_templates as u32, r: config.r_replicates as u32, center: CENTER, trim: TRIM, b: config.bootstrap_iters as u32 },
    );
    let n_draws = config.k_templates * config.r_replicates;
    let plan = build_plan(claim, &config.model, PROMPT_VERSION, bundle.templates.len(), n_draws);

    let mut out = format!(
        "provider={} model={} lens={:?} k_templates={} r_replicates={} rotation_offset={} derived_seed={}\nplanned sequence ({} draws):",
        config.provider, config.model, config.lens, config.k_templates, config.r_replicates, offset, seed, plan.len()
    );
    for draw in &plan {
        out.push_str(&format!("\n  template={} ({}) replicate={}", draw.template_idx, bundle.templates[draw.template_idx].id, draw.replicate_idx));
    }
    out
}

/// Parses arguments and dispatches to the matching subcommand. `main.rs`
/// maps the returned `ExitCode` to a process exit status.
pub async fn run_cli() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Describe(args) => describe(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_arg_maps_to_the_expected_lens() {
        assert!(matches!(ModeArg::Baseline.into_lens(), Lens::Rpl));
        assert!(matches!(ModeArg::WebInformed.into_lens(), Lens::Both));
    }

    #[test]
    fn describe_plan_reports_the_configured_draw_count() {
        let config = RunConfig { k_templates: 2, r_replicates: 3, ..RunConfig::default() };
        let plan = describe_plan("the sky is blue", &config);
        assert!(plan.contains("6 draws"));
    }

    #[test]
    fn describe_plan_is_deterministic() {
        let config = RunConfig::default();
        let a = describe_plan("claim", &config);
        let b = describe_plan("claim", &config);
        assert_eq!(a, b);
    }
}
