//! Trait defining the bidirectional printer byte stream

use crate::error::TransportError;

/// Bidirectional bulk byte stream to one printer
///
/// Every call blocks up to the transport's I/O timeout; a timeout is an
/// error, not a short result. The session owns the transport exclusively
/// for its lifetime.
pub trait Transport {
    /// Read whatever the device has pending, up to `buf.len()` bytes
    ///
    /// # Errors
    /// Returns an error on timeout or device failure.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `data` to the device
    ///
    /// # Errors
    /// Returns an error on timeout or device failure.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Push any buffered bytes out to the device
    ///
    /// # Errors
    /// Returns an error on timeout or device failure.
    fn flush(&mut self) -> Result<(), TransportError>;
}
