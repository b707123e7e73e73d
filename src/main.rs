//! CUPS backend executable entry point

use std::path::PathBuf;
use std::{env, fmt, process};

use tracing::{debug, error, Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use captusb::backend::{self, CUPS_BACKEND_FAILED, CUPS_BACKEND_OK};
use captusb::error::{BackendError, PrintError};
use captusb::info::BACKEND_NAME;
use captusb::stop::{install_signal_handlers, StopSource};

/// Formats events as CUPS backend log lines: `LEVEL: message`
///
/// CUPS knows the prefixes `DEBUG`, `INFO`, `WARN`, `ERROR` and `CRIT`;
/// `tracing`'s error level is reserved for fatal conditions here, so it
/// maps to `CRIT`.
struct CupsLogFormat;

impl<S, N> FormatEvent<S, N> for CupsLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let level = *event.metadata().level();
        let prefix = if level == Level::ERROR {
            "CRIT"
        } else if level == Level::WARN {
            "WARN"
        } else if level == Level::INFO {
            "INFO"
        } else {
            "DEBUG"
        };
        write!(writer, "{prefix}: ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .event_format(CupsLogFormat)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .init();
}

fn report_failure(error: &BackendError) {
    match error {
        BackendError::Protocol(e) | BackendError::Print(PrintError::Protocol(e)) => {
            error!("Protocol fault ({e})");
        }
        BackendError::Transport(e) => error!("USB backend error ({e})"),
        BackendError::Print(PrintError::PageStream(e)) => {
            error!("Invalid raster format ({e})");
        }
        BackendError::SpoolFile(e) => error!("Failed to open input file ({e})"),
    }
}

fn run() -> i32 {
    init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() != 1 && args.len() != 6 && args.len() != 7 {
        let prog = args.first().map_or(BACKEND_NAME, String::as_str);
        println!("Usage: {prog} job-id user title copies options [file]");
        return CUPS_BACKEND_FAILED;
    }
    debug!("{BACKEND_NAME} version {}", env!("CARGO_PKG_VERSION"));

    let stop = StopSource::new();
    if let Err(e) = install_signal_handlers(&stop) {
        error!("Failed to install signal handlers ({e})");
        return CUPS_BACKEND_FAILED;
    }

    if args.len() == 1 {
        return match backend::report_devices() {
            Ok(()) => CUPS_BACKEND_OK,
            Err(e) => {
                report_failure(&e);
                CUPS_BACKEND_FAILED
            }
        };
    }

    let Ok(uri) = env::var("DEVICE_URI") else {
        error!("Failed to get target device uri");
        return CUPS_BACKEND_FAILED;
    };
    let final_content_type = env::var("FINAL_CONTENT_TYPE").ok();
    if final_content_type.is_none() {
        error!("Content type is not defined");
        return CUPS_BACKEND_FAILED;
    }
    let content_type = env::var("CONTENT_TYPE").ok();
    let Some(kind) =
        backend::resolve_job_kind(final_content_type.as_deref(), content_type.as_deref())
    else {
        error!("Unsupported content type");
        return CUPS_BACKEND_FAILED;
    };

    let input = (args.len() == 7).then(|| PathBuf::from(&args[6]));
    match backend::run_job(&stop.token(), &uri, kind, input.as_deref()) {
        Ok(true) => CUPS_BACKEND_OK,
        Ok(false) => CUPS_BACKEND_FAILED,
        Err(e) => {
            report_failure(&e);
            CUPS_BACKEND_FAILED
        }
    }
}

fn main() {
    process::exit(run());
}
