use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use heretix::http::{AppState, router};
use heretix_cache::SampleCache;
use heretix_config::discover;
use heretix_gate::{AnonymousUserProvider, CurrentUserProvider, UnlimitedUsageGate, UsageGate};
use heretix_llm::{AnthropicSettings, LlmBackend, LlmConfig, OpenRouterSettings};
use heretix_pipeline::Pipeline;
use heretix_ratelimit::RateLimiter;
use heretix_store::{ArtifactStore, DisabledArtifactStore, LocalArtifactStore};
use heretix_utils::exit_codes::ExitCode;
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "heretix")]
struct TopLevel {
    #[command(subcommand)]
    command: TopCommand,
}

#[derive(Debug, Subcommand)]
enum TopCommand {
    Run(heretix_cli::RunArgs),
    Describe(heretix_cli::DescribeArgs),
    /// Serve `POST /checks/run` and `GET /healthz` over HTTP.
    Serve(ServeArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long)]
    config: std::path::PathBuf,
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() {
    heretix_utils::logging::init_tracing(std::env::var_os("RUST_LOG").is_some()).ok();

    let cli = TopLevel::parse();
    let exit_code = match cli.command {
        TopCommand::Run(args) => heretix_cli::run(args).await,
        TopCommand::Describe(args) => heretix_cli::describe(args).await,
        TopCommand::Serve(args) => serve(args).await,
    };
    std::process::exit(exit_code.as_i32());
}

async fn serve(args: ServeArgs) -> ExitCode {
    let overrides = heretix_config::CliOverrides {
        config_path: Some(args.config.to_string_lossy().into_owned()),
        ..Default::default()
    };
    let (config, _sources) = match discover(&overrides) {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::CONFIG_ERROR;
        }
    };

    let llm_config = LlmConfig {
        provider: config.provider.clone(),
        fallback_provider: None,
        anthropic: Some(AnthropicSettings {
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
            base_url: None,
            model: Some(config.model.clone()),
            max_tokens: None,
            temperature: None,
        }),
        openrouter: Some(OpenRouterSettings {
            api_key_env: Some("OPENROUTER_API_KEY".to_string()),
            base_url: None,
            model: Some(config.model.clone()),
            max_tokens: None,
            temperature: None,
            budget: None,
        }),
    };
    let backend: Arc<dyn LlmBackend> = match heretix_llm::from_config(&llm_config) {
        Ok(backend) => Arc::from(backend),
        Err(e) => {
            tracing::error!(error = %e, "failed to construct model backend");
            return ExitCode::CONFIG_ERROR;
        }
    };

    let limiter = Arc::new(RateLimiter::new(config.max_concurrency.max(1) as u32 * 60));
    let cache = config
        .cache_dir
        .as_ref()
        .map(|dir| Arc::new(SampleCache::new(dir.clone(), Duration::from_secs(7 * 24 * 3600))));
    let store: Arc<dyn ArtifactStore> = match &config.artifact_dir {
        Some(dir) => Arc::new(LocalArtifactStore::new(dir.clone())),
        None => Arc::new(DisabledArtifactStore),
    };

    let pipeline = Arc::new(Pipeline::new(backend, limiter, cache, None, store, false));
    let usage_gate: Arc<dyn UsageGate> = Arc::new(UnlimitedUsageGate);
    let user_provider: Arc<dyn CurrentUserProvider> = Arc::new(AnonymousUserProvider);

    let state = AppState { pipeline, default_config: config, usage_gate, user_provider };
    let app = router(state);

    let listener = match TcpListener::bind(args.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %args.addr, "failed to bind HTTP listener");
            return ExitCode::CONFIG_ERROR;
        }
    };
    tracing::info!(addr = %args.addr, "heretix HTTP server listening");
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "HTTP server exited with an error");
        return ExitCode::CONFIG_ERROR;
    }
    ExitCode::SUCCESS
}
