use heretix_types::Lens;

/// Highest-precedence overrides, typically parsed from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<String>,
    pub lens: Option<Lens>,
    pub k_templates: Option<usize>,
    pub r_replicates: Option<usize>,
    pub bootstrap_iters: Option<usize>,
    pub seed: Option<u64>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_concurrency: Option<usize>,
    pub request_timeout_ms: Option<u64>,
    pub web_doc_count: Option<usize>,
    pub cache_dir: Option<String>,
    pub artifact_dir: Option<String>,
    pub max_prompt_chars: Option<usize>,
}
