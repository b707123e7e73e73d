//! Printer identity and device URIs
//!
//! Parses IEEE-1284 device-id strings, decides whether a device speaks
//! CAPT v1, and builds/matches the backend-specific device URIs that CUPS
//! hands back through `DEVICE_URI`.

use std::fmt::Write as _;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

/// Name under which this backend registers with CUPS
pub const BACKEND_NAME: &str = "captusb";

// Characters that must not appear raw in the model path segment.
const MODEL_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'%')
    .add(b'/')
    .add(b'&')
    .add(b'+');

/// Identity of one discovered printer
///
/// Built from the raw IEEE-1284 device-id string and the USB serial number.
/// The raw string is kept verbatim for the discovery report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrinterInfo {
    /// Raw device-id string as returned by the device
    pub device_id: String,
    /// `MFG`/`MANUFACTURER` value
    pub manufacturer: String,
    /// `MDL`/`MODEL` value
    pub model: String,
    /// `DES`/`DESCRIPTION` value
    pub description: String,
    /// USB serial number
    pub serial: String,
    /// `CMD`/`COMMAND SET` value
    pub command_set: String,
    /// `VER` value
    pub cmd_version: String,
}

impl PrinterInfo {
    /// Parse a semicolon-delimited device-id string
    ///
    /// Recognised keys: `MFG`/`MANUFACTURER`, `MDL`/`MODEL`,
    /// `DES`/`DESCRIPTION`, `CMD`/`COMMAND SET`, `VER`. Keys are
    /// case-sensitive, whitespace is significant, unknown keys are ignored.
    #[must_use]
    pub fn parse(device_id: &str, serial: &str) -> Self {
        let mut info = Self {
            device_id: device_id.to_owned(),
            serial: serial.to_owned(),
            ..Self::default()
        };
        for entry in device_id.split(';') {
            let Some((key, value)) = entry.split_once(':') else {
                continue;
            };
            match key {
                "MFG" | "MANUFACTURER" => info.manufacturer = value.to_owned(),
                "MDL" | "MODEL" => info.model = value.to_owned(),
                "DES" | "DESCRIPTION" => info.description = value.to_owned(),
                "CMD" | "COMMAND SET" => info.command_set = value.to_owned(),
                "VER" => info.cmd_version = value.to_owned(),
                _ => {}
            }
        }
        info
    }

    /// Whether this device speaks CAPT protocol version 1
    #[must_use]
    pub fn is_capt_printer(&self) -> bool {
        self.command_set == "CAPT" && self.cmd_version.starts_with('1')
    }

    /// Build the device URI for this printer
    ///
    /// The URI must differ from the one issued by the stock CUPS usb
    /// backend, otherwise CUPS hides one of the two in the web UI.
    #[must_use]
    pub fn make_uri(&self) -> String {
        format!(
            "{BACKEND_NAME}://{}/{}?drv=capt&serial={}",
            self.manufacturer,
            utf8_percent_encode(&self.model, MODEL_ESCAPES),
            self.serial
        )
    }

    /// Whether `uri` addresses this printer
    ///
    /// The scheme, manufacturer and percent-decoded model must match
    /// exactly; the query must contain a `serial` token equal to the
    /// device's serial number. Other query tokens are ignored.
    #[must_use]
    pub fn has_uri(&self, uri: &str) -> bool {
        let prefix = format!("{BACKEND_NAME}://{}/", self.manufacturer);
        let Some(rest) = uri.strip_prefix(&prefix) else {
            return false;
        };
        let Some((model_part, query)) = rest.split_once('?') else {
            return false;
        };
        let Ok(model) = percent_decode_str(model_part).decode_utf8() else {
            return false;
        };
        if model != self.model {
            return false;
        }
        query.split('&').any(|token| {
            token
                .split_once('=')
                .is_some_and(|(k, v)| k == "serial" && v == self.serial)
        })
    }

    /// One discovery report line in the CUPS backend format
    ///
    /// Fields: device-class, uri, device-make-and-model, device-info,
    /// device-id, device-location. The backend name inside the
    /// make-and-model string keeps the two usb backends distinguishable in
    /// the web UI.
    #[must_use]
    pub fn report_line(&self) -> String {
        let mut line = String::new();
        let _ = write!(
            line,
            "direct {} \"{} {} ({BACKEND_NAME})\" \"{} {}\" \"{}\" \"\"",
            self.make_uri(),
            self.manufacturer,
            self.model,
            self.manufacturer,
            self.model,
            self.device_id
        );
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_spaces_encode_to_percent_20() {
        let info = PrinterInfo {
            manufacturer: "Canon".into(),
            model: "LBP 810".into(),
            serial: "0123".into(),
            ..PrinterInfo::default()
        };
        let uri = info.make_uri();
        assert_eq!(uri, "captusb://Canon/LBP%20810?drv=capt&serial=0123");
        assert!(info.has_uri(&uri));
    }

    #[test]
    fn report_line_shape() {
        let info = PrinterInfo {
            device_id: "MFG:Canon;MDL:LBP3200;CMD:CAPT;VER:1.0".into(),
            manufacturer: "Canon".into(),
            model: "LBP3200".into(),
            serial: "98765432".into(),
            command_set: "CAPT".into(),
            cmd_version: "1.0".into(),
            ..PrinterInfo::default()
        };
        assert_eq!(
            info.report_line(),
            "direct captusb://Canon/LBP3200?drv=capt&serial=98765432 \
             \"Canon LBP3200 (captusb)\" \"Canon LBP3200\" \
             \"MFG:Canon;MDL:LBP3200;CMD:CAPT;VER:1.0\" \"\""
        );
    }
}
