use camino::Utf8PathBuf;

/// Where a single `RunConfig` field's value came from, for `describe`-style
/// introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    ConfigFile(Utf8PathBuf),
    Defaults,
}
