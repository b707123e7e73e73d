//! Printer session: framed CAPT operations over a transport
//!
//! [`PrinterSession`] owns the transport for the lifetime of a job and
//! exposes the blocking protocol operations the controller drives:
//! reservation, readiness, error clearing, page submission and the
//! cleaning command. Every status poll fans out to the reason reporter.

use std::time::Duration;

use tracing::debug;

use crate::commands::{self, CaptCommand, ReplyHeader, HEADER_LEN};
use crate::connection::Transport;
use crate::error::{ProtocolError, TransportError};
use crate::page::PageParams;
use crate::reporter::ReasonReporter;
use crate::status::{ReprintStatus, StatusWord, STATUS_LEN};
use crate::stop::StopToken;

/// Cadence of status polls while waiting on the engine
#[cfg(not(test))]
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Shortened under test so the state-machine suites run in milliseconds
#[cfg(test)]
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

// Video data is pushed in bounded chunks with a status poll in between,
// so an engine error surfaces before the whole page has been streamed.
const VIDEO_CHUNK: usize = 0x4000;

/// Exclusive protocol session with one printer
pub struct PrinterSession<'r, T: Transport> {
    transport: T,
    reporter: &'r mut ReasonReporter,
    reserved: bool,
}

impl<'r, T: Transport> PrinterSession<'r, T> {
    /// Start a session over `transport`
    pub fn new(transport: T, reporter: &'r mut ReasonReporter) -> Self {
        Self {
            transport,
            reporter,
            reserved: false,
        }
    }

    /// The reporter this session feeds
    pub fn reporter(&mut self) -> &mut ReasonReporter {
        &mut *self.reporter
    }

    /// Claim the device for exclusive use
    ///
    /// # Errors
    /// Returns an error if the device refuses or the exchange fails.
    pub fn reserve_unit(&mut self) -> Result<(), ProtocolError> {
        self.command(CaptCommand::ReserveUnit)?;
        self.reserved = true;
        Ok(())
    }

    /// Release the reservation taken by [`reserve_unit`](Self::reserve_unit)
    ///
    /// # Errors
    /// Returns an error if the exchange fails.
    pub fn release_unit(&mut self) -> Result<(), ProtocolError> {
        self.command(CaptCommand::ReleaseUnit)?;
        self.reserved = false;
        Ok(())
    }

    /// Hand the device the next expected page slot
    ///
    /// Returns `false` if the device refuses; the caller retries after a
    /// delay.
    ///
    /// # Errors
    /// Returns an error if the exchange fails.
    pub fn go_online(&mut self, page: u32) -> Result<bool, ProtocolError> {
        let slot = (page & 0xFF) as u8;
        let reply = self.transact(CaptCommand::GoOnline { slot })?;
        Ok(result_byte(commands::GO_ONLINE, &reply)? == 0)
    }

    /// Take the unit offline
    ///
    /// # Errors
    /// Returns an error if the exchange fails.
    pub fn go_offline(&mut self) -> Result<(), ProtocolError> {
        self.command(CaptCommand::GoOffline)
    }

    /// Poll the extended status once
    ///
    /// Side effect: updates the reason reporter from the fresh status.
    ///
    /// # Errors
    /// Returns an error if the exchange fails or the reply is malformed.
    pub fn get_status(&mut self) -> Result<StatusWord, ProtocolError> {
        let reply = self.transact(CaptCommand::ExtendedStatusRequest)?;
        let status = StatusWord::try_from(reply.as_slice())?;
        self.reporter.update(status);
        Ok(status)
    }

    /// Acknowledge a latched engine error
    ///
    /// The device answers with a fresh status word, stored into `status`.
    ///
    /// # Errors
    /// Returns an error if the exchange fails or the reply is malformed.
    pub fn clear_error(&mut self, status: &mut StatusWord) -> Result<(), ProtocolError> {
        let reply = self.transact(CaptCommand::ClearError)?;
        *status = StatusWord::try_from(reply.as_slice())?;
        Ok(())
    }

    /// Issue the maintenance cleaning command
    ///
    /// # Errors
    /// Returns an error if the exchange fails.
    pub fn cleaning(&mut self) -> Result<(), ProtocolError> {
        self.command(CaptCommand::Cleaning)
    }

    /// Submit one page: parameters, then the compressed video data
    ///
    /// A status poll is interleaved before every chunk (and once more
    /// before the end-of-page marker, so even an empty page checks the
    /// device once). Returns `false` when the device signals a fatal,
    /// video-data or reprint condition mid-transfer, or when cancellation
    /// is observed; the caller then consults
    /// [`wait_print_end`](Self::wait_print_end).
    ///
    /// # Errors
    /// Returns an error if an exchange fails.
    pub fn write_video_data(
        &mut self,
        cancel: &StopToken,
        params: &PageParams,
        data: &[u8],
    ) -> Result<bool, ProtocolError> {
        self.send(CaptCommand::PageParams(params))?;
        let mut chunks = data.chunks(VIDEO_CHUNK);
        loop {
            let status = self.get_status()?;
            if cancel.stop_requested()
                || status.fatal_error()
                || status.video_data_error()
                || !status.ready()
                || status.reprint() != ReprintStatus::None
            {
                debug!("Transfer interrupted by device state {status:?}");
                return Ok(false);
            }
            let Some(chunk) = chunks.next() else {
                break;
            };
            self.send(CaptCommand::VideoData(chunk))?;
        }
        self.send(CaptCommand::VideoEnd)?;
        Ok(true)
    }

    /// Block until the device finishes printing or fails
    ///
    /// Returns `None` once cancellation is observed.
    ///
    /// # Errors
    /// Returns an error if a status exchange fails.
    pub fn wait_print_end(
        &mut self,
        cancel: &StopToken,
    ) -> Result<Option<StatusWord>, ProtocolError> {
        loop {
            if cancel.stop_requested() {
                return Ok(None);
            }
            let status = self.get_status()?;
            if status.fatal_error() || status.video_data_error() {
                return Ok(Some(status));
            }
            if !status.is_printing()
                && !status
                    .basic
                    .contains(crate::status::BasicStatus::IM_DATA_BUSY)
            {
                return Ok(Some(status));
            }
            cancel.sleep_for(POLL_INTERVAL);
        }
    }

    fn send(&mut self, command: CaptCommand<'_>) -> Result<(), ProtocolError> {
        let bytes: Vec<u8> = command.try_into()?;
        self.transport.write(&bytes)?;
        self.transport.flush()?;
        Ok(())
    }

    /// Send a command and read its echoed reply payload.
    fn transact(&mut self, command: CaptCommand<'_>) -> Result<Vec<u8>, ProtocolError> {
        let opcode = command.opcode();
        self.send(command)?;

        let mut raw_header = [0u8; HEADER_LEN];
        self.read_exact(&mut raw_header)?;
        let header = ReplyHeader::parse(raw_header)?;
        if header.opcode != opcode {
            return Err(ProtocolError::UnexpectedReply {
                expected: opcode,
                actual: header.opcode,
            });
        }
        if header.payload_len > STATUS_LEN {
            return Err(ProtocolError::MalformedReply {
                reason: format!("oversized reply payload of {}B", header.payload_len),
            });
        }
        let mut payload = vec![0u8; header.payload_len];
        self.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// Send a control command whose reply is a single result byte.
    fn command(&mut self, command: CaptCommand<'_>) -> Result<(), ProtocolError> {
        let opcode = command.opcode();
        let reply = self.transact(command)?;
        let code = result_byte(opcode, &reply)?;
        if code != 0 {
            return Err(ProtocolError::Rejected { opcode, code });
        }
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.transport.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(TransportError::ShortRead.into());
            }
            filled += n;
        }
        Ok(())
    }
}

fn result_byte(opcode: u16, payload: &[u8]) -> Result<u8, ProtocolError> {
    payload
        .first()
        .copied()
        .ok_or_else(|| ProtocolError::MalformedReply {
            reason: format!("empty reply to command {opcode:#06x}"),
        })
}

impl<T: Transport> Drop for PrinterSession<'_, T> {
    fn drop(&mut self) {
        // Reservation must not outlive the session, whatever the exit path.
        if self.reserved {
            let _ = self.release_unit();
        }
    }
}
