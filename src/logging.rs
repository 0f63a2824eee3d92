use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    /// Filter for the stderr layer. `RUST_LOG` only applies at normal
    /// verbosity; `-v`/`-q` always win.
    fn filter(self) -> EnvFilter {
        match self {
            Verbosity::Quiet => EnvFilter::new("off"),
            Verbosity::Verbose => EnvFilter::new("qvm=debug"),
            Verbosity::Normal => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("qvm=warn")),
        }
    }
}

/// Install the global tracing subscriber. Logs go to stderr so they never
/// mix with forwarded remote stdout.
pub fn init(verbosity: Verbosity) {
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity == Verbosity::Verbose)
        .with_filter(verbosity.filter());

    tracing_subscriber::registry().with(terminal_layer).init();
}
