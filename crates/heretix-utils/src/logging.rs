//! Structured logging setup shared by the CLI and HTTP server.

use std::io::IsTerminal;

use tracing_subscriber::{
    EnvFilter,
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

fn use_color() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initializes the global tracing subscriber. `RUST_LOG` overrides the
/// default filter; `verbose` only changes the fallback when `RUST_LOG` is
/// unset.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "heretix=debug,info" } else { "heretix=info,warn" })
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(verbose).with_ansi(use_color()).compact())
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_does_not_panic() {
        let _ = init_tracing(false);
    }
}
