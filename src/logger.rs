use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "evogen=info";

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub json: bool,
}

/// Installs the global subscriber. `RUST_LOG` wins over `--verbose`.
/// Calling it twice is harmless; the second install is ignored.
pub fn init(opts: LogOptions) {
    let fallback = if opts.verbose {
        "evogen=debug"
    } else {
        DEFAULT_DIRECTIVE
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = if opts.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

/// Indents every line of `text`; used when echoing compiler transcripts.
pub fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|l| format!("{pad}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}
