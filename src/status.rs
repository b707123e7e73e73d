//! Printer status parsing and types
//!
//! This module provides the typed view over the 10-byte extended status
//! word returned by CAPT v1 printers, plus the pure predicates the print
//! loop branches on and the human-readable status message.

use bitflags::bitflags;

use crate::error::ProtocolError;

bitflags! {
/// Basic device state flags (byte 0 of the extended status)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicStatus: u8 {
    /// Command processor wedged; only a unit reset recovers
    const CMD_BUSY = 0b1 << 0;
    /// Unrecoverable controller error
    const ERROR_BIT = 0b1 << 1;
    /// Video data for a previous page still buffered
    const IM_DATA_BUSY = 0b1 << 2;
    /// Unit is offline (no page slot handed out)
    const OFFLINE = 0b1 << 3;
    /// No host holds a reservation
    const UNIT_FREE = 0b1 << 4;
    /// Engine cannot accept new work
    const NOT_READY = 0b1 << 5;
    const _ = !0;
}
}

bitflags! {
/// Latched condition flags (byte 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedStatus: u8 {
    /// A cleared engine error is still latched and must be acknowledged
    const ERROR_LATCHED = 0b1 << 0;
    const _ = !0;
}
}

bitflags! {
/// Auxiliary progress flags (byte 2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxStatus: u8 {
    /// Controller is busy with a command
    const PRINTER_BUSY = 0b1 << 0;
    /// A sheet is moving through the paper path
    const PAPER_DELIVERY = 0b1 << 1;
    /// Fuser safe timer running, sheet not yet ejected
    const SAFE_TIMER = 0b1 << 2;
    const _ = !0;
}
}

bitflags! {
/// Video controller flags (byte 3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerStatus: u8 {
    /// Compressed stream failed to decode
    const INVALID_DATA = 0b1 << 0;
    /// Page data ended without an end-of-page marker
    const MISSING_EOP = 0b1 << 1;
    /// Host supplied data slower than the engine consumed it
    const UNDERRUN = 0b1 << 2;
    /// Host supplied more data than the page geometry allows
    const OVERRUN = 0b1 << 3;
    /// Controller lost contact with the print engine
    const ENGINE_COMM_ERROR = 0b1 << 4;
    /// Engine reset sequence is running
    const ENGINE_RESET_IN_PROGRESS = 0b1 << 5;
    /// Device requests retransmission of the current page
    const REPRINT_CURRENT = 0b1 << 6;
    /// Device requests retransmission of the previous page
    const REPRINT_PREV = 0b1 << 7;
    const _ = !0;
}
}

bitflags! {
/// Print engine flags (byte 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus: u8 {
    /// A cover or cartridge door is open
    const DOOR_OPEN = 0b1 << 0;
    /// Toner cartridge missing
    const NO_CARTRIDGE = 0b1 << 1;
    /// Paper jam
    const JAM = 0b1 << 2;
    /// Input tray empty
    const NO_PRINT_PAPER = 0b1 << 3;
    /// Engine warming up or recovering
    const WAITING = 0b1 << 4;
    /// Drum cleaning cycle running
    const CLEANING = 0b1 << 5;
    /// Engine self-test page printing
    const TEST_PRINTING = 0b1 << 6;
    /// Hardware failure; servicing required
    const SERVICE_CALL = 0b1 << 7;
    const _ = !0;
}
}

/// Reprint request parsed from the controller flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprintStatus {
    /// No retransmission requested
    None,
    /// Resubmit the page currently being written
    Current,
    /// Resubmit the previously accepted page
    Prev,
}

/// Length of the extended status word on the wire
pub const STATUS_LEN: usize = 10;

/// The extended status word
///
/// A plain 10-byte value returned by every status poll. Predicates are pure
/// functions over it; pass it by copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusWord {
    /// Basic device state
    pub basic: BasicStatus,
    /// Latched conditions
    pub changed: ChangedStatus,
    /// Auxiliary progress flags
    pub aux: AuxStatus,
    /// Video controller flags
    pub controller: ControllerStatus,
    /// One bit per input tray with paper available
    pub paper_available: u8,
    /// Print engine flags
    pub engine: EngineStatus,
    /// Page slot the device expects next
    pub start: u8,
    /// Pages currently rendering
    pub printing: u8,
    /// Pages ejected from the engine
    pub shipped: u8,
    /// Pages completed
    pub printed: u8,
}

impl Default for StatusWord {
    fn default() -> Self {
        Self::from_bytes([0; STATUS_LEN])
    }
}

impl StatusWord {
    /// Parse a status word from its wire representation
    #[must_use]
    pub fn from_bytes(raw: [u8; STATUS_LEN]) -> Self {
        Self {
            basic: BasicStatus::from_bits_retain(raw[0]),
            changed: ChangedStatus::from_bits_retain(raw[1]),
            aux: AuxStatus::from_bits_retain(raw[2]),
            controller: ControllerStatus::from_bits_retain(raw[3]),
            paper_available: raw[4],
            engine: EngineStatus::from_bits_retain(raw[5]),
            start: raw[6],
            printing: raw[7],
            shipped: raw[8],
            printed: raw[9],
        }
    }

    /// Serialize the status word back to its wire representation
    #[must_use]
    pub fn to_bytes(self) -> [u8; STATUS_LEN] {
        [
            self.basic.bits(),
            self.changed.bits(),
            self.aux.bits(),
            self.controller.bits(),
            self.paper_available,
            self.engine.bits(),
            self.start,
            self.printing,
            self.shipped,
            self.printed,
        ]
    }

    /// Device accepts new work
    #[must_use]
    pub fn ready(self) -> bool {
        !self.basic.intersects(
            BasicStatus::NOT_READY | BasicStatus::CMD_BUSY | BasicStatus::ERROR_BIT,
        )
    }

    /// A reservation is active and the unit is online
    #[must_use]
    pub fn online(self) -> bool {
        !self
            .basic
            .intersects(BasicStatus::OFFLINE | BasicStatus::UNIT_FREE)
    }

    /// Controller reports an unrecoverable condition
    #[must_use]
    pub fn fatal_error(self) -> bool {
        self.basic
            .intersects(BasicStatus::CMD_BUSY | BasicStatus::ERROR_BIT)
    }

    /// The submitted video data was rejected
    #[must_use]
    pub fn video_data_error(self) -> bool {
        self.controller.intersects(
            ControllerStatus::INVALID_DATA
                | ControllerStatus::MISSING_EOP
                | ControllerStatus::UNDERRUN
                | ControllerStatus::OVERRUN,
        )
    }

    /// Hardware failure requiring service
    #[must_use]
    pub fn service_call(self) -> bool {
        self.engine.contains(EngineStatus::SERVICE_CALL)
    }

    /// A cleared error is still latched and must be acknowledged
    #[must_use]
    pub fn clear_error_needed(self) -> bool {
        self.changed.contains(ChangedStatus::ERROR_LATCHED)
    }

    /// A sheet is moving through the engine
    #[must_use]
    pub fn is_printing(self) -> bool {
        self.aux
            .intersects(AuxStatus::PAPER_DELIVERY | AuxStatus::SAFE_TIMER)
            || self.engine.contains(EngineStatus::TEST_PRINTING)
    }

    /// At least one input tray reports paper
    #[must_use]
    pub fn paper_present(self) -> bool {
        self.paper_available != 0
    }

    /// Retransmission request signalled by the video controller
    #[must_use]
    pub fn reprint(self) -> ReprintStatus {
        if self.controller.contains(ControllerStatus::REPRINT_PREV) {
            ReprintStatus::Prev
        } else if self.controller.contains(ControllerStatus::REPRINT_CURRENT) {
            ReprintStatus::Current
        } else {
            ReprintStatus::None
        }
    }
}

impl TryFrom<&[u8]> for StatusWord {
    type Error = ProtocolError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; STATUS_LEN] =
            value
                .try_into()
                .map_err(|_| ProtocolError::MalformedReply {
                    reason: format!("status payload of {}B", value.len()),
                })?;
        Ok(Self::from_bytes(raw))
    }
}

/// Map a status word to its user-facing one-liner
///
/// The conditions are tested in a fixed priority order; the first match
/// wins. A service call dominates every other condition, a fatal error
/// dominates everything below it.
#[must_use]
pub fn status_message(status: StatusWord) -> &'static str {
    if status.service_call() {
        return "Service call";
    }
    if status.fatal_error() {
        return "Unknown fatal error";
    }
    if status.video_data_error() {
        return "Video data error";
    }
    let waiting = status.engine.contains(EngineStatus::WAITING)
        || status
            .controller
            .contains(ControllerStatus::ENGINE_RESET_IN_PROGRESS);
    if waiting {
        return "Waiting";
    }
    if status.engine.contains(EngineStatus::DOOR_OPEN) {
        return "Door open";
    }
    if status.engine.contains(EngineStatus::JAM) {
        return "Paper jam";
    }
    if status.engine.contains(EngineStatus::NO_CARTRIDGE) {
        return "No cartridge";
    }
    if status.engine.contains(EngineStatus::CLEANING) {
        return "Cleaning";
    }
    if status.is_printing() {
        return "Printing";
    }
    if status.engine.contains(EngineStatus::NO_PRINT_PAPER) || !status.paper_present() {
        return "Out of paper";
    }
    if !status.ready() {
        return "Not ready";
    }
    "Ready"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_word_round_trips_through_bytes() {
        let raw = [0x21, 0x01, 0x02, 0x48, 0x80, 0x04, 0x03, 0x01, 0x02, 0x02];
        let status = StatusWord::from_bytes(raw);
        assert_eq!(status.to_bytes(), raw);
        assert_eq!(status.start, 0x03);
        assert!(status.basic.contains(BasicStatus::NOT_READY));
        assert!(status.engine.contains(EngineStatus::JAM));
    }

    #[test]
    fn reprint_prev_wins_over_current() {
        let mut status = StatusWord::default();
        assert_eq!(status.reprint(), ReprintStatus::None);
        status.controller = ControllerStatus::REPRINT_CURRENT;
        assert_eq!(status.reprint(), ReprintStatus::Current);
        status.controller = ControllerStatus::REPRINT_CURRENT | ControllerStatus::REPRINT_PREV;
        assert_eq!(status.reprint(), ReprintStatus::Prev);
    }

    #[test]
    fn unknown_bits_are_retained() {
        let raw = [0xC0, 0xFE, 0xF8, 0x00, 0x00, 0x00, 0, 0, 0, 0];
        let status = StatusWord::from_bytes(raw);
        assert_eq!(status.to_bytes(), raw);
    }

    #[test]
    fn short_payload_is_rejected() {
        assert!(StatusWord::try_from(&[0u8; 4][..]).is_err());
        assert!(StatusWord::try_from(&[0u8; STATUS_LEN][..]).is_ok());
    }
}
