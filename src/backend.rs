//! Backend orchestration
//!
//! Top-level job flow: discover printers, select the target by URI, open a
//! session and run the requested command. Invoked from `main` after the
//! CUPS argument and environment surface has been parsed.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::connection::{UsbBackend, UsbPrinterDevice};
use crate::controller::PrintController;
use crate::error::BackendError;
use crate::page::PageStream;
use crate::reporter::{Reason, ReasonReporter};
use crate::session::PrinterSession;
use crate::stop::StopToken;

/// Exit code for success, including clean cancellation
pub const CUPS_BACKEND_OK: i32 = 0;
/// Exit code for any unrecoverable failure
pub const CUPS_BACKEND_FAILED: i32 = 1;

/// MIME type of a spooled raster job
pub const RASTER_CONTENT_TYPE: &str = "application/vnd.cups-raster";
/// MIME type of a printer maintenance command job
pub const COMMAND_CONTENT_TYPE: &str = "application/vnd.cups-command";

#[cfg(not(test))]
const DISCOVER_RETRY: Duration = Duration::from_secs(5);
#[cfg(test)]
const DISCOVER_RETRY: Duration = Duration::from_millis(50);

/// What kind of job the spooler handed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Page data to print
    Raster,
    /// Maintenance cleaning command
    Clean,
}

/// Decide the job kind from the spooler's content type variables
///
/// `FINAL_CONTENT_TYPE` is authoritative; an unrecognised value falls back
/// to `CONTENT_TYPE`, which is only accepted for command jobs. `None`
/// means the job must be rejected.
#[must_use]
pub fn resolve_job_kind(
    final_content_type: Option<&str>,
    content_type: Option<&str>,
) -> Option<JobKind> {
    match final_content_type? {
        RASTER_CONTENT_TYPE => Some(JobKind::Raster),
        COMMAND_CONTENT_TYPE => Some(JobKind::Clean),
        _ => (content_type? == COMMAND_CONTENT_TYPE).then_some(JobKind::Clean),
    }
}

/// Discovery mode: report every attached CAPT v1 printer on stdout
///
/// # Errors
/// Returns an error if the USB subsystem cannot be initialized or
/// enumerated; individual unprobeable devices are skipped.
pub fn report_devices() -> Result<(), BackendError> {
    let usb = UsbBackend::new()?;
    let printers = usb.printers()?;
    debug!("Discovered {} printer devices", printers.len());
    for device in printers {
        match device.probe() {
            Ok(info) if info.is_capt_printer() => println!("{}", info.report_line()),
            Ok(info) => {
                debug!("Skipping non-CAPT v1 printer ({})", info.device_id);
            }
            Err(e) => {
                debug!(
                    "Failed to probe device {:04x}:{:04x}: {e}, skipping",
                    device.vendor_id(),
                    device.product_id()
                );
            }
        }
    }
    Ok(())
}

fn find_by_uri(printers: Vec<UsbPrinterDevice>, uri: &str) -> Option<UsbPrinterDevice> {
    printers.into_iter().find(|device| match device.probe() {
        Ok(info) => info.is_capt_printer() && info.has_uri(uri),
        Err(e) => {
            debug!(
                "Failed to probe device {:04x}:{:04x}: {e}, skipping",
                device.vendor_id(),
                device.product_id()
            );
            false
        }
    })
}

/// Run one print or clean job against the printer addressed by `uri`
///
/// Blocks until the target device appears (reporting
/// `connecting-to-device` meanwhile), reserves it, runs the job and
/// releases it again. Returns `true` on success and on cancellation.
///
/// # Errors
/// Returns an error on USB failures, protocol faults and unreadable spool
/// data. Release failures after an observed cancellation are demoted to
/// debug logs.
pub fn run_job(
    cancel: &StopToken,
    uri: &str,
    kind: JobKind,
    input: Option<&Path>,
) -> Result<bool, BackendError> {
    let mut reporter = ReasonReporter::new(io::stderr());
    let usb = UsbBackend::new()?;

    let device = loop {
        let printers = usb.printers()?;
        debug!("Discovered {} printer devices", printers.len());
        if let Some(device) = find_by_uri(printers, uri) {
            break device;
        }
        if cancel.stop_requested() {
            return Ok(true);
        }
        reporter.set_reason(Reason::ConnectingToDevice, true);
        info!("Printer not found, retrying...");
        cancel.sleep_for(DISCOVER_RETRY);
        if cancel.stop_requested() {
            return Ok(true);
        }
    };
    reporter.set_reason(Reason::ConnectingToDevice, false);

    let transport = device.open_transport()?;
    let mut session = PrinterSession::new(transport, &mut reporter);
    session.reserve_unit()?;
    info!("Unit reserved");
    let mut controller = PrintController::new(session);

    let ok = match kind {
        JobKind::Raster => {
            let reader: Box<dyn Read> = match input {
                Some(path) => Box::new(File::open(path).map_err(BackendError::SpoolFile)?),
                None => Box::new(io::stdin()),
            };
            let mut source = PageStream::new(BufReader::new(reader));
            controller.print(cancel, &mut source)?
        }
        JobKind::Clean => controller.clean(cancel)?,
    };

    let session = controller.session_mut();
    let released = session.go_offline().and_then(|()| session.release_unit());
    match released {
        Ok(()) => info!("Unit released"),
        // Cancellation may race the device going away; release stays
        // best-effort on that path.
        Err(e) if cancel.stop_requested() => {
            debug!("Release after cancellation failed: {e}");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_content_type_wins() {
        assert_eq!(
            resolve_job_kind(Some(RASTER_CONTENT_TYPE), None),
            Some(JobKind::Raster)
        );
        assert_eq!(
            resolve_job_kind(Some(RASTER_CONTENT_TYPE), Some("text/plain")),
            Some(JobKind::Raster)
        );
    }

    #[test]
    fn command_jobs_fall_back_to_content_type() {
        assert_eq!(
            resolve_job_kind(Some(COMMAND_CONTENT_TYPE), None),
            Some(JobKind::Clean)
        );
        assert_eq!(
            resolve_job_kind(Some("application/pdf"), Some(COMMAND_CONTENT_TYPE)),
            Some(JobKind::Clean)
        );
    }

    #[test]
    fn unknown_content_types_are_rejected() {
        assert_eq!(resolve_job_kind(None, Some(COMMAND_CONTENT_TYPE)), None);
        assert_eq!(resolve_job_kind(Some("application/pdf"), None), None);
        assert_eq!(
            resolve_job_kind(Some("application/pdf"), Some(RASTER_CONTENT_TYPE)),
            None
        );
    }
}
