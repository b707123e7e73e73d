//! The print-session state machine
//!
//! [`PrintController`] drives a [`PrinterSession`] through a whole job:
//! waiting for readiness, negotiating the page slot, submitting each page
//! and reacting to the printer's reprint-current / reprint-prev / proceed
//! signals, under door-opens, jams and host cancellation.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::connection::Transport;
use crate::error::{PrintError, ProtocolError};
use crate::page::{BufferedPage, PageSource};
use crate::session::{PrinterSession, POLL_INTERVAL};
use crate::status::{status_message, EngineStatus, ReprintStatus, StatusWord};
use crate::stop::StopToken;

#[cfg(not(test))]
const RETRY_DELAY: Duration = Duration::from_secs(1);
#[cfg(test)]
const RETRY_DELAY: Duration = Duration::from_millis(10);

// The engine reports stale status for a moment after going online.
#[cfg(not(test))]
const ENGINE_SETTLE_DELAY: Duration = Duration::from_secs(1);
#[cfg(test)]
const ENGINE_SETTLE_DELAY: Duration = Duration::from_millis(10);

#[cfg(not(test))]
const CLEANING_START_DELAY: Duration = Duration::from_secs(2);
#[cfg(test)]
const CLEANING_START_DELAY: Duration = Duration::from_millis(20);

/// Result of running the per-page state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page (and any demanded reprints) was accepted by the device
    Succeeded,
    /// Cancellation was observed; the job ends successfully
    Cancelled,
    /// The device reported a terminal condition
    Failed(StatusWord),
}

/// Drives a printer session through a print or clean job
pub struct PrintController<'r, T: Transport> {
    session: PrinterSession<'r, T>,
}

impl<'r, T: Transport> PrintController<'r, T> {
    /// Take over a session for the duration of a job
    pub fn new(session: PrinterSession<'r, T>) -> Self {
        Self { session }
    }

    /// Access the underlying session (reservation lifecycle)
    pub fn session_mut(&mut self) -> &mut PrinterSession<'r, T> {
        &mut self.session
    }

    /// Poll until the device is ready or cancellation is observed
    ///
    /// Acknowledges latched errors between polls and logs the current
    /// condition once per tick.
    ///
    /// # Errors
    /// Returns an error if a status exchange fails.
    pub fn wait_ready(&mut self, cancel: &StopToken) -> Result<StatusWord, ProtocolError> {
        let mut status = self.session.get_status()?;
        while !cancel.stop_requested() && !status.ready() {
            if status.clear_error_needed() {
                debug!("Acknowledging latched error");
                self.session.clear_error(&mut status)?;
            }
            info!("Stopped ({})", status_message(status));
            cancel.sleep_for(POLL_INTERVAL);
            status = self.session.get_status()?;
        }
        Ok(status)
    }

    /// Bring the device online with `page` as the expected slot
    ///
    /// Loops readiness and online negotiation until the device accepts the
    /// slot or cancellation is observed.
    ///
    /// # Errors
    /// Returns an error if an exchange fails.
    pub fn prepare_before_print(
        &mut self,
        cancel: &StopToken,
        page: u32,
    ) -> Result<(), ProtocolError> {
        loop {
            let status = self.wait_ready(cancel)?;
            if cancel.stop_requested() {
                return Ok(());
            }
            if !status.online() || u32::from(status.start) != page & 0xFF {
                if !self.session.go_online(page)? {
                    warn!("GoOnline failed, retrying...");
                    cancel.sleep_for(RETRY_DELAY);
                    continue;
                }
            }
            return Ok(());
        }
    }

    /// Submit one page, honouring reprint requests
    ///
    /// `prev` must be the previously accepted page while one exists; the
    /// device may demand its verbatim resend until the current page has
    /// been accepted.
    ///
    /// # Errors
    /// Returns an error if an exchange fails.
    pub fn write_page(
        &mut self,
        cancel: &StopToken,
        page: &BufferedPage,
        prev: Option<&BufferedPage>,
    ) -> Result<PageOutcome, ProtocolError> {
        let mut reprint = ReprintStatus::None;
        while !cancel.stop_requested() {
            let p = match prev {
                Some(prev) if reprint == ReprintStatus::Prev => prev,
                _ => page,
            };
            self.prepare_before_print(cancel, p.page_number)?;
            if cancel.stop_requested() {
                return Ok(PageOutcome::Cancelled);
            }
            if reprint == ReprintStatus::None {
                info!("Writing page {}", p.page_number + 1);
            } else {
                info!("Retrying page {}", p.page_number + 1);
            }
            if self
                .session
                .write_video_data(cancel, &p.params, p.data())?
            {
                if prev.is_some() && reprint == ReprintStatus::Prev {
                    // The resend was accepted; go back to the page that
                    // was interrupted.
                    reprint = ReprintStatus::None;
                    continue;
                }
                return Ok(PageOutcome::Succeeded);
            }
            let Some(status) = self.session.wait_print_end(cancel)? else {
                return Ok(PageOutcome::Cancelled);
            };
            if status.video_data_error() || status.fatal_error() {
                return Ok(PageOutcome::Failed(status));
            }
            reprint = status.reprint();
            cancel.sleep_for(RETRY_DELAY);
        }
        Ok(PageOutcome::Cancelled)
    }

    /// Wait for the final page to leave the engine
    ///
    /// The device may still demand reprints after the last submission; they
    /// are serviced until it reports a terminal condition. Returns the
    /// status on failure, `None` on completion or cancellation.
    fn wait_last_page(
        &mut self,
        cancel: &StopToken,
        page: &BufferedPage,
    ) -> Result<Option<StatusWord>, ProtocolError> {
        while !cancel.stop_requested() {
            cancel.sleep_for(POLL_INTERVAL);
            let Some(status) = self.session.wait_print_end(cancel)? else {
                return Ok(None);
            };
            if status.video_data_error() || status.fatal_error() {
                return Ok(Some(status));
            }
            if status.reprint() == ReprintStatus::None {
                break;
            }
            if let PageOutcome::Failed(status) = self.write_page(cancel, page, None)? {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }

    /// Print every page yielded by `source`
    ///
    /// Returns `true` on success and on cancellation, `false` when the
    /// device reported a terminal condition.
    ///
    /// # Errors
    /// Returns an error if an exchange fails or the page stream is
    /// unreadable.
    pub fn print(
        &mut self,
        cancel: &StopToken,
        source: &mut dyn PageSource,
    ) -> Result<bool, PrintError> {
        let mut page_number: u32 = 0;
        let mut previous: Option<BufferedPage> = None;
        while !cancel.stop_requested() {
            let Some(params) = source.next_page()? else {
                break;
            };
            let current = BufferedPage::from_source(page_number, params, source)?;
            self.session.reporter().page(page_number + 1);

            match self.write_page(cancel, &current, previous.as_ref())? {
                PageOutcome::Failed(status) => {
                    debug!("Page write failed with status {status:?}");
                    error!("Failed to write page ({})", status_message(status));
                    return Ok(false);
                }
                PageOutcome::Cancelled => return Ok(true),
                PageOutcome::Succeeded => {
                    previous = Some(current);
                    page_number += 1;
                }
            }
        }

        info!("Waiting for last page...");
        if let Some(last) = &previous {
            if let Some(status) = self.wait_last_page(cancel, last)? {
                debug!("Last page failed with status {status:?}");
                error!("Failed to write page ({})", status_message(status));
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Run a drum cleaning cycle
    ///
    /// Returns `true` on success and on cancellation, `false` on a fatal
    /// device condition.
    ///
    /// # Errors
    /// Returns an error if an exchange fails.
    pub fn clean(&mut self, cancel: &StopToken) -> Result<bool, ProtocolError> {
        while !cancel.stop_requested() {
            self.prepare_before_print(cancel, 0)?;
            if cancel.stop_requested() {
                break;
            }
            cancel.sleep_for(ENGINE_SETTLE_DELAY);
            self.session.cleaning()?;
            info!("Cleaning...");
            cancel.sleep_for(CLEANING_START_DELAY);

            let status = self.session.get_status()?;
            if status.fatal_error() {
                error!("Unknown fatal error");
                return Ok(false);
            }
            if !status.engine.contains(EngineStatus::CLEANING) {
                warn!("Cleaning failed ({})", status_message(status));
                continue;
            }
            self.session.wait_print_end(cancel)?;
            break;
        }
        Ok(true)
    }
}
