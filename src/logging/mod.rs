//! Structured logging, following the shape of the teacher's `logging`
//! module: a custom [`tracing_subscriber`] formatter plus a small set of
//! `log_*!` macros call sites use instead of talking to `tracing` directly.

use std::sync::Once;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

static INIT: Once = Once::new();

/// Compact event formatter: `LEVEL TIMESTAMP target: message`.
///
/// The teacher's formatter additionally prints pid/tid/file/line; this one
/// keeps only what call sites in this crate actually rely on, to avoid
/// carrying fields (thread name plumbing, `function` guesswork) nothing
/// downstream reads.
pub struct CompactFormatter;

impl<S, N> FormatEvent<S, N> for CompactFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now().to_rfc3339();
        let level = event.metadata().level();
        let target = event.metadata().target();
        write!(writer, "{level:<5} {now} {target}: ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Initialize the global tracing subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init_logger(level: &str, enable_file_logging: bool, directory: &str, file_prefix: &str) {
    use tracing_subscriber::layer::SubscriberExt;

    INIT.call_once(|| {
        let env_filter = tracing_subscriber::EnvFilter::try_new(level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let _ = tracing_log::LogTracer::init();

        let console_layer = tracing_subscriber::fmt::layer().event_format(CompactFormatter);
        let registry = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer);

        if enable_file_logging {
            let _ = std::fs::create_dir_all(directory);
            let file_appender = tracing_appender::rolling::daily(directory, file_prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // Leak the guard: logging must stay alive for the process
            // lifetime, matching the teacher's own non-blocking setup.
            Box::leak(Box::new(guard));

            let file_layer = tracing_subscriber::fmt::layer()
                .event_format(CompactFormatter)
                .with_writer(non_blocking)
                .with_ansi(false);
            let _ = tracing::subscriber::set_global_default(registry.with(file_layer));
        } else {
            let _ = tracing::subscriber::set_global_default(registry);
        }
    });
}

/// Emits a structured one-line summary for a completed transaction, the
/// way the teacher's `log_transaction` does for its `ProxyLog`.
pub fn log_transaction(message_id: u32, method: &str, url: &str, status: u16, duration_ms: u64) {
    tracing::info!(
        message_id,
        method,
        url,
        status,
        duration_ms,
        "transaction complete"
    );
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}
