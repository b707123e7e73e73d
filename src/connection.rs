//! Printer transports
//!
//! [`Transport`] is the byte-stream seam between the protocol session and
//! the hardware. The only production implementation is USB bulk transfer
//! via [`UsbTransport`]; tests substitute scripted in-memory transports.

mod transport;
mod usb;

pub use transport::Transport;
pub use usb::{UsbBackend, UsbPrinterDevice, UsbTransport};
