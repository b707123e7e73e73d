//! Error types for the CAPT backend
//!
//! Each layer gets its own precise error type:
//!
//! - [`TransportError`]: USB communication and device errors
//! - [`ProtocolError`]: malformed or unexpected CAPT replies
//! - [`PageStreamError`]: errors while decoding the spooled page stream
//! - [`PrintError`]: errors that can occur while driving a print job

use thiserror::Error;

/// USB communication errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// USB communication error from the rusb library
    ///
    /// Wraps errors from the underlying rusb USB library, including
    /// timeouts, permission problems, pipe errors and disconnects.
    /// See [`rusb::Error`] for all possible variants.
    #[error(transparent)]
    Usb(#[from] rusb::Error),

    /// The device reply ended before the requested byte count was read
    #[error("device closed the bulk pipe mid-reply")]
    ShortRead,

    /// The IEEE-1284 device-id reply did not carry a valid length prefix
    #[error("malformed IEEE-1284 device id reply")]
    BadDeviceId,
}

/// Protocol flow errors
///
/// Returned when the printer answers a CAPT command with something the
/// backend cannot interpret. These are fatal to the job.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Transport failure underneath a framed exchange
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The reply opcode did not echo the command opcode
    #[error("unexpected reply opcode {actual:#06x} (expected {expected:#06x})")]
    UnexpectedReply {
        /// Opcode of the command that was sent
        expected: u16,
        /// Opcode found in the reply header
        actual: u16,
    },

    /// The reply frame header or payload had an impossible shape
    #[error("malformed reply frame: {reason}")]
    MalformedReply {
        /// What was wrong with the frame
        reason: String,
    },

    /// The device refused a command that has no refusal semantics
    #[error("command {opcode:#06x} rejected by device (code {code:#04x})")]
    Rejected {
        /// Opcode of the rejected command
        opcode: u16,
        /// Result byte returned by the device
        code: u8,
    },

    /// A command payload would not fit the frame length field
    #[error("command {opcode:#06x} payload of {len}B exceeds the frame limit")]
    PayloadTooLarge {
        /// Opcode of the oversized command
        opcode: u16,
        /// Payload length that was requested
        len: usize,
    },
}

/// Page stream decoding errors
///
/// Returned by [`PageStream`](crate::page::PageStream) when the spooled
/// data does not form a valid sequence of compressed pages.
#[derive(Error, Debug)]
pub enum PageStreamError {
    /// I/O error on the spool file or stdin
    #[error("page stream read error: {0}")]
    Io(#[from] std::io::Error),

    /// A page header did not start with the stream magic
    #[error("bad page stream magic")]
    BadMagic,

    /// The stream ended in the middle of a page header
    #[error("truncated page header")]
    Truncated,

    /// The page parameters violate the geometry invariants
    #[error("invalid page parameters: {reason}")]
    InvalidParams {
        /// Which invariant failed
        reason: String,
    },
}

/// Print job errors
///
/// Returned by [`PrintController::print`](crate::controller::PrintController::print).
#[derive(Error, Debug)]
pub enum PrintError {
    /// Protocol flow error while talking to the device
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The spooled page stream was unreadable
    #[error(transparent)]
    PageStream(#[from] PageStreamError),
}

/// Top-level backend errors
///
/// Everything the orchestrator can fail with; `main` maps these to CRIT
/// log lines and the backend-failed exit code.
#[derive(Error, Debug)]
pub enum BackendError {
    /// USB subsystem or device access failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol fault outside the page write loop
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Failure while driving the print job
    #[error(transparent)]
    Print(#[from] PrintError),

    /// The spool file handed over by the spooler could not be opened
    #[error("failed to open input file: {0}")]
    SpoolFile(#[source] std::io::Error),
}
