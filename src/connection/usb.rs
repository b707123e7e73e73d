//! USB transport for CAPT printers
//!
//! Enumeration finds every USB printer-class interface with a bulk
//! endpoint pair; [`UsbPrinterDevice::probe`] reads the IEEE-1284 device
//! id and serial so the orchestrator can filter for CAPT v1 devices, and
//! [`UsbPrinterDevice::open_transport`] claims the interface for the
//! duration of a job.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use tracing::debug;

use super::Transport;
use crate::error::TransportError;
use crate::info::PrinterInfo;

// USB printer class, bidirectional protocol.
const CLASS_PRINTER: u8 = 0x07;
const SUBCLASS_PRINTER: u8 = 0x01;
const PROTOCOL_BIDIRECTIONAL: u8 = 0x02;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Owner of the libusb context
pub struct UsbBackend {
    context: Context,
}

impl UsbBackend {
    /// Initialize the USB subsystem
    ///
    /// # Errors
    /// Returns an error if the libusb context cannot be created.
    pub fn new() -> Result<Self, TransportError> {
        Ok(Self {
            context: Context::new()?,
        })
    }

    /// Enumerate every attached USB printer-class device
    ///
    /// Devices that fail descriptor reads are skipped with a debug log;
    /// a single broken device must not hide the others.
    ///
    /// # Errors
    /// Returns an error if the device list itself cannot be read.
    pub fn printers(&self) -> Result<Vec<UsbPrinterDevice>, TransportError> {
        let mut printers = Vec::new();
        let devices = self.context.devices()?;
        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!("Failed to read device descriptor: {e}, skipping");
                    continue;
                }
            };
            for config_index in 0..descriptor.num_configurations() {
                let Ok(config) = device.config_descriptor(config_index) else {
                    debug!(
                        "Failed to read config descriptor of {:04x}:{:04x}, skipping",
                        descriptor.vendor_id(),
                        descriptor.product_id()
                    );
                    continue;
                };
                let Some(found) = find_printer_interface(&config) else {
                    continue;
                };
                printers.push(UsbPrinterDevice {
                    device: device.clone(),
                    vendor_id: descriptor.vendor_id(),
                    product_id: descriptor.product_id(),
                    config_value: config.number(),
                    interface: found.interface,
                    alt_setting: found.alt_setting,
                    endpoint_in: found.endpoint_in,
                    endpoint_out: found.endpoint_out,
                });
            }
        }
        Ok(printers)
    }
}

struct PrinterInterface {
    interface: u8,
    alt_setting: u8,
    endpoint_in: u8,
    endpoint_out: u8,
}

fn find_printer_interface(config: &rusb::ConfigDescriptor) -> Option<PrinterInterface> {
    for interface in config.interfaces() {
        for alt in interface.descriptors() {
            if alt.class_code() != CLASS_PRINTER
                || alt.sub_class_code() != SUBCLASS_PRINTER
                || alt.protocol_code() != PROTOCOL_BIDIRECTIONAL
            {
                continue;
            }
            let mut endpoint_in = None;
            let mut endpoint_out = None;
            for endpoint in alt.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In => endpoint_in = Some(endpoint.address()),
                    Direction::Out => endpoint_out = Some(endpoint.address()),
                }
            }
            if let (Some(endpoint_in), Some(endpoint_out)) = (endpoint_in, endpoint_out) {
                return Some(PrinterInterface {
                    interface: alt.interface_number(),
                    alt_setting: alt.setting_number(),
                    endpoint_in,
                    endpoint_out,
                });
            }
        }
    }
    None
}

/// One discovered USB printer, not yet opened
pub struct UsbPrinterDevice {
    device: Device<Context>,
    vendor_id: u16,
    product_id: u16,
    config_value: u8,
    interface: u8,
    alt_setting: u8,
    endpoint_in: u8,
    endpoint_out: u8,
}

impl UsbPrinterDevice {
    /// USB vendor id of the device
    #[must_use]
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    /// USB product id of the device
    #[must_use]
    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    /// Briefly open the device and fetch its identity
    ///
    /// Reads the IEEE-1284 device-id string via the printer-class control
    /// request and the serial number string descriptor, then closes the
    /// handle again.
    ///
    /// # Errors
    /// Returns an error if the device cannot be opened or the replies are
    /// malformed.
    pub fn probe(&self) -> Result<PrinterInfo, TransportError> {
        let handle = self.device.open()?;
        let device_id = self.fetch_device_id(&handle)?;
        let serial = fetch_serial(&handle).unwrap_or_default();
        Ok(PrinterInfo::parse(&device_id, &serial))
    }

    fn fetch_device_id(&self, handle: &DeviceHandle<Context>) -> Result<String, TransportError> {
        let request_type = rusb::request_type(
            Direction::In,
            rusb::RequestType::Class,
            rusb::Recipient::Interface,
        );
        let mut buf = [0u8; 1024];
        let n = handle.read_control(
            request_type,
            0, // GET_DEVICE_ID
            u16::from(self.config_value),
            (u16::from(self.interface) << 8) | u16::from(self.alt_setting),
            &mut buf,
            PROBE_TIMEOUT,
        )?;
        if n < 2 {
            return Err(TransportError::BadDeviceId);
        }
        // Big-endian length prefix, counting itself.
        let length = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
        if length < 2 || length > n {
            return Err(TransportError::BadDeviceId);
        }
        Ok(String::from_utf8_lossy(&buf[2..length]).into_owned())
    }

    /// Open the device for a print job
    ///
    /// Claims the printer interface with automatic kernel driver handling
    /// and resets the device so a previous job's state cannot leak in.
    ///
    /// # Errors
    /// Returns an error if opening, claiming or resetting fails.
    pub fn open_transport(&self) -> Result<UsbTransport, TransportError> {
        let mut handle = self.device.open()?;

        // Auto-detach and reattach kernel driver when claiming/releasing
        handle.set_auto_detach_kernel_driver(true)?;
        handle.claim_interface(self.interface)?;

        if let Err(e) = handle.set_alternate_setting(self.interface, self.alt_setting) {
            // NOTE: Since we handle the failed alternate setting call we
            // propagate the original error instead of a possible cleanup one.
            let _ = handle.release_interface(self.interface);
            return Err(e.into());
        }
        handle.reset()?;
        debug!(
            "Device {:04x}:{:04x} opened",
            self.vendor_id, self.product_id
        );

        Ok(UsbTransport {
            handle,
            interface: self.interface,
            endpoint_in: self.endpoint_in,
            endpoint_out: self.endpoint_out,
            timeout: IO_TIMEOUT,
        })
    }
}

fn fetch_serial(handle: &DeviceHandle<Context>) -> Option<String> {
    let language = *handle.read_languages(PROBE_TIMEOUT).ok()?.first()?;
    let descriptor = handle.device().device_descriptor().ok()?;
    handle
        .read_serial_number_string(language, &descriptor, PROBE_TIMEOUT)
        .ok()
}

/// Claimed USB connection to one printer
///
/// Releases the interface (and thereby reattaches the kernel driver) when
/// dropped, on every exit path.
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    interface: u8,
    endpoint_in: u8,
    endpoint_out: u8,
    timeout: Duration,
}

impl Transport for UsbTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.handle.read_bulk(self.endpoint_in, buf, self.timeout)?;
        debug!("Received {n} bytes from device");
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut written = 0;
        while written < data.len() {
            let n = self
                .handle
                .write_bulk(self.endpoint_out, &data[written..], self.timeout)?;
            debug!("Sent {n} bytes to device");
            written += n;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        // Bulk writes are issued unbuffered.
        Ok(())
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}
