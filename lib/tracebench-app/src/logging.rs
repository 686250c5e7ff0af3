//! Logging.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr as _,
    sync::OnceLock,
};

use chrono::{
    format::{DelayedFormat, Item, StrftimeItems},
    Utc,
};
use chrono_tz::Tz;
use tracebench_error::{generic_error, GenericError};
use tracing::{field, level_filters::LevelFilter, Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    field::VisitOutput,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, FormattedFields},
    layer::SubscriberExt as _,
    registry::LookupSpan,
    util::SubscriberInitExt as _,
    EnvFilter, Layer,
};

const LOG_LEVEL_ENV: &str = "TRACEBENCH_LOG_LEVEL";
const LOG_FORMAT_JSON_ENV: &str = "TRACEBENCH_LOG_FORMAT_JSON";
const LOG_FILE_ENV: &str = "TRACEBENCH_LOG_FILE";

const APP_NAME: &str = "TRACEBENCH";

/// Keeps the background log file writer alive.
///
/// Dropping the guard flushes any buffered log lines to the log file, so it must be held until the process is about
/// to exit.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

/// Initializes the logging subsystem for `tracing`.
///
/// Filtering directives are read from `TRACEBENCH_LOG_LEVEL`, falling back to `default_level` (or `INFO`) when unset.
/// If `TRACEBENCH_LOG_FORMAT_JSON` is `true` or `1`, console output is JSON; otherwise a pipe-delimited,
/// human-readable format is used. If `TRACEBENCH_LOG_FILE` is set, every event is additionally written to that file
/// through a non-blocking writer.
///
/// # Errors
///
/// If the logging subsystem was already initialized, or the log file path is unusable, an error will be returned.
pub fn initialize_logging(default_level: Option<LevelFilter>) -> Result<LoggingGuard, GenericError> {
    let is_json = std::env::var(LOG_FORMAT_JSON_ENV)
        .map(|s| s.trim().to_lowercase())
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false);

    let (file_layer, file_guard) = match std::env::var(LOG_FILE_ENV) {
        Ok(path) if !path.trim().is_empty() => {
            let (directory, file_name) = split_log_file_path(Path::new(path.trim()))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::Layer::new()
                .with_writer(writer)
                .with_ansi(false)
                .event_format(PipeFormatter::new())
                .with_filter(build_level_filter(default_level));
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    if is_json {
        tracing_subscriber::registry()
            .with(file_layer)
            .with(initialize_tracing_json().with_filter(build_level_filter(default_level)))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(file_layer)
            .with(initialize_tracing_pretty().with_filter(build_level_filter(default_level)))
            .try_init()?;
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn build_level_filter(default_level: Option<LevelFilter>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level.unwrap_or(LevelFilter::INFO).into())
        .with_env_var(LOG_LEVEL_ENV)
        .from_env_lossy()
}

fn split_log_file_path(path: &Path) -> Result<(PathBuf, PathBuf), GenericError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| generic_error!("Log file path '{}' has no file name.", path.display()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    Ok((directory, PathBuf::from(file_name)))
}

fn initialize_tracing_json<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::Layer::new()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
}

fn initialize_tracing_pretty<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::Layer::new().event_format(PipeFormatter::new())
}

/// Pipe-delimited event formatter.
///
/// Lines look like `2024-12-31 23:59:59 UTC | TRACEBENCH | INFO | (src/pipeline.rs:120) | run{test_case=a} |
/// stage:hardware | Stage failed.`. The span and field sections are omitted when empty.
struct PipeFormatter {
    app_name: &'static str,
}

impl PipeFormatter {
    fn new() -> Self {
        Self { app_name: APP_NAME }
    }
}

impl<S, N> FormatEvent<S, N> for PipeFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} | {} | {} | ",
            get_delayed_format_now(),
            self.app_name,
            metadata.level()
        )?;

        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            write!(writer, "({}:{})", file, line)?;
        } else {
            write!(writer, "(unknown:0)")?;
        }

        if let Some(scope) = ctx.event_scope() {
            let mut wrote_any = false;
            for span in scope.from_root() {
                let prefix = if wrote_any { " " } else { " | " };
                let extensions = span.extensions();
                match extensions.get::<FormattedFields<N>>() {
                    Some(fields) if !fields.is_empty() => write!(writer, "{}{}{{{}}}", prefix, span.name(), fields)?,
                    _ => write!(writer, "{}{}", prefix, span.name())?,
                }
                wrote_any = true;
            }
        }

        let mut v = PipeFieldVisitor::new(writer.by_ref());
        event.record(&mut v);
        v.finish()?;

        writeln!(writer)
    }
}

/// Writes event fields as `key:value,key2:value2`, followed by the message.
///
/// Write errors are latched: once a write fails, later writes are skipped and the error is returned from `finish`.
struct PipeFieldVisitor<'writer> {
    writer: Writer<'writer>,
    fields_written: usize,
    message: String,
    last_result: fmt::Result,
}

impl<'writer> PipeFieldVisitor<'writer> {
    fn new(writer: Writer<'writer>) -> Self {
        Self {
            writer,
            fields_written: 0,
            message: String::new(),
            last_result: Ok(()),
        }
    }

    fn try_write(&mut self, field: &field::Field, f: impl FnOnce(&mut dyn fmt::Write) -> fmt::Result) {
        if self.last_result.is_err() {
            return;
        }

        if field.name() == "message" {
            // The message always comes last.
            self.last_result = f(&mut self.message);
        } else {
            let prefix = if self.fields_written == 0 { " | " } else { "," };

            self.last_result = write!(self.writer, "{}{}:", prefix, field.name());
            if self.last_result.is_err() {
                return;
            }

            self.last_result = f(&mut self.writer);
            if self.last_result.is_ok() {
                self.fields_written += 1;
            }
        }
    }
}

impl field::Visit for PipeFieldVisitor<'_> {
    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        self.try_write(field, |w| write!(w, "{:?}", value));
    }

    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.try_write(field, |w| write!(w, "{}", value));
    }
}

impl VisitOutput<fmt::Result> for PipeFieldVisitor<'_> {
    fn finish(mut self) -> fmt::Result {
        self.last_result?;

        if !self.message.is_empty() {
            write!(self.writer, " | {}", self.message)
        } else {
            Ok(())
        }
    }
}

fn get_delayed_format_now() -> DelayedFormat<impl Iterator<Item = &'static Item<'static>> + Clone> {
    // Falls back to UTC if the system timezone cannot be determined.
    static SYSTEM_TZ: OnceLock<Tz> = OnceLock::new();
    let system_tz = SYSTEM_TZ.get_or_init(|| {
        iana_time_zone::get_timezone()
            .map_err(|_| ())
            .and_then(|raw_tz| Tz::from_str(&raw_tz).map_err(|_| ()))
            .unwrap_or(Tz::UTC)
    });

    static FORMAT_ITEMS: OnceLock<Vec<Item<'static>>> = OnceLock::new();
    let format_items = FORMAT_ITEMS.get_or_init(|| StrftimeItems::new("%Y-%m-%d %H:%M:%S %Z").collect());

    let now = Utc::now().with_timezone(system_tz);
    now.format_with_items(format_items.iter())
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use tracing::{info, info_span};
    use tracing_subscriber::layer::SubscriberExt as _;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture<F: FnOnce()>(f: F) -> String {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::registry().with(
            tracing_subscriber::fmt::Layer::new()
                .with_ansi(false)
                .with_writer(move || writer.clone())
                .event_format(PipeFormatter::new()),
        );

        tracing::subscriber::with_default(subscriber, f);
        buffer.contents()
    }

    #[test]
    fn formats_fields_before_message() {
        let output = capture(|| info!(stage = "hardware", rows = 3, "Stage completed."));

        assert!(output.contains(" | TRACEBENCH | INFO | ("));
        assert!(output.ends_with(" | stage:hardware,rows:3 | Stage completed.\n"));
    }

    #[test]
    fn includes_enclosing_span_fields() {
        let output = capture(|| {
            let span = info_span!("run", test_case = "round=1");
            let _entered = span.enter();
            info!("Collecting.");
        });

        assert!(output.contains(" | run{test_case=\"round=1\"} | Collecting."));
    }

    #[test]
    fn log_file_path_is_split_into_directory_and_name() {
        let (directory, name) = split_log_file_path(Path::new("/var/log/tracebench.log")).unwrap();
        assert_eq!(directory, PathBuf::from("/var/log"));
        assert_eq!(name, PathBuf::from("tracebench.log"));

        let (directory, _) = split_log_file_path(Path::new("tracebench.log")).unwrap();
        assert_eq!(directory, PathBuf::from("."));
    }
}
