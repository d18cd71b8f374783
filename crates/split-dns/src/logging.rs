use anyhow::Context;
use std::fs::File;
use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_subscriber::{
    filter::filter_fn, fmt::layer, layer::SubscriberExt, registry::LookupSpan,
    util::SubscriberInitExt, EnvFilter, Layer,
};

pub const LOGGING_ENV: &str = "SPLIT_DNS_LOG";
pub const LOGGING_FILE_ENV: &str = "SPLIT_DNS_LOG_FILE";

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Builds a filter from `directives`, e.g. `split_dns=debug`. Unparsable directives are skipped.
fn level_filter(directives: Option<&str>, default: LevelFilter) -> EnvFilter {
    let builder = EnvFilter::builder().with_default_directive(default.into());
    match directives {
        Some(directives) => builder.parse_lossy(directives),
        None => builder.parse_lossy(""),
    }
}

fn env_filter(env_var: &str, default: LevelFilter) -> EnvFilter {
    let directives = std::env::var(env_var).ok();
    level_filter(directives.as_deref(), default)
}

/// Filter decisions (matched rules, fallbacks) go to stdout at INFO; anything more verbose
/// also names its source location
fn stdout_layer<S>() -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    layer()
        .with_target(false)
        .with_filter(LevelFilter::INFO)
        .and_then(
            layer()
                .with_line_number(true)
                .with_file(true)
                .with_filter(filter_fn(|metadata| metadata.level() > &LevelFilter::INFO)),
        )
        .with_filter(env_filter(LOGGING_ENV, LevelFilter::INFO))
        .boxed()
}

fn file_layer<S>(log_file: File) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    layer()
        .pretty()
        .with_writer(log_file)
        .with_ansi(false)
        .with_filter(env_filter(LOGGING_FILE_ENV, LevelFilter::TRACE))
        .boxed()
}

fn open_log_file(path: &Path) -> anyhow::Result<File> {
    File::options()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open the log file '{}'", path.display()))
}

/// Installs the global subscriber. Without `log_file` only stdout is written to.
pub fn setup_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let file = log_file.map(open_log_file).transpose()?.map(file_layer);

    tracing_subscriber::registry()
        .with(stdout_layer())
        .with(file)
        .try_init()
        .context("failed to initialize tracing_subscriber")
}
