//! Logging initialization for the `fims-query-cli` binary
//!
//! Log lines go to stderr so stdout only carries command output. `RUST_LOG`
//! overrides the configured level.

use std::fs;
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::settings::Settings;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the file writer flushing. Must be kept alive for the duration of the program.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_logging(settings: &Settings) -> anyhow::Result<LoggingGuard> {
    let (file_layer, file_guard) = match settings.log_file.as_deref() {
        Some(path) => {
            let (writer, guard) = create_file_writer(path)?;
            (Some(format_layer(settings.log_json, writer, false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_env_filter(&settings.log_level))
        .with(format_layer(settings.log_json, std::io::stderr, true))
        .with(file_layer)
        .init();

    tracing::debug!(
        level = %settings.log_level,
        json = settings.log_json,
        file = ?settings.log_file,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.to_ascii_lowercase();
        EnvFilter::new(format!("fims_query={},fims_query_cli={}", level, level))
    })
}

/// JSON lines or human readable output to `writer`.
fn format_layer<S, W>(json: bool, writer: W, ansi: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);

    if json {
        layer
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed()
    } else {
        layer.boxed()
    }
}

fn create_file_writer(path: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Log file path has no file name: {}", path.display()))?;

    fs::create_dir_all(directory)?;
    let appender = tracing_appender::rolling::never(directory, file_name);

    Ok(tracing_appender::non_blocking(appender))
}
