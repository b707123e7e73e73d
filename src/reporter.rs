//! Spooler state reporting
//!
//! CUPS learns about printer conditions through `STATE: +reason` /
//! `STATE: -reason` lines on stderr and about job progress through
//! `PAGE: page-number <n>` lines. [`ReasonReporter`] owns the set of
//! currently raised reasons and emits exactly one line per transition.

use std::collections::HashSet;
use std::io::Write;

use crate::status::{ControllerStatus, EngineStatus, StatusWord};

/// Printer state reason understood by the spooler UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Reason {
    /// Input tray is empty
    MediaEmptyError,
    /// The job cannot continue until paper is loaded
    MediaNeededError,
    /// Paper jam
    MediaJamError,
    /// Toner cartridge missing or empty
    TonerEmptyError,
    /// A cover or door is open
    DoorOpenError,
    /// Hardware failure (service call)
    OtherError,
    /// Unclassified fatal controller error
    UnknownError,
    /// Engine is warming up or recovering
    Resuming,
    /// Waiting for the target device to appear
    ConnectingToDevice,
}

/// Tracks raised reasons and writes `STATE:`/`PAGE:` lines to a sink
///
/// The set always mirrors what has been emitted: a reason is in the set iff
/// its `+` line has been written and its `-` line has not. Dropping the
/// reporter lowers every remaining reason.
pub struct ReasonReporter {
    sink: Box<dyn Write + Send>,
    active: HashSet<Reason>,
}

impl ReasonReporter {
    /// Create a reporter writing to `sink`
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            active: HashSet::new(),
        }
    }

    /// Recompute the reason set from a fresh status word
    ///
    /// A service call or fatal error collapses the set to a single dominant
    /// reason so the spooler displays one condition; otherwise each engine
    /// bit maps to its reason. Calling this twice with the same status
    /// emits nothing the second time.
    pub fn update(&mut self, status: StatusWord) {
        let service = status.service_call();
        let fatal = status.fatal_error();
        if service || fatal {
            let dominant = if service {
                Reason::OtherError
            } else {
                Reason::UnknownError
            };
            for reason in self.active.clone() {
                if reason != dominant {
                    self.set_reason(reason, false);
                }
            }
            self.set_reason(Reason::OtherError, service);
            self.set_reason(Reason::UnknownError, fatal && !service);
            return;
        }
        self.set_reason(Reason::OtherError, false);
        self.set_reason(Reason::UnknownError, false);

        let no_paper = status.engine.contains(EngineStatus::NO_PRINT_PAPER);
        self.set_reason(Reason::MediaEmptyError, no_paper);
        self.set_reason(Reason::MediaNeededError, no_paper);
        self.set_reason(
            Reason::MediaJamError,
            status.engine.contains(EngineStatus::JAM),
        );
        self.set_reason(
            Reason::TonerEmptyError,
            status.engine.contains(EngineStatus::NO_CARTRIDGE),
        );
        self.set_reason(
            Reason::DoorOpenError,
            status.engine.contains(EngineStatus::DOOR_OPEN),
        );

        let waiting = status.engine.contains(EngineStatus::WAITING)
            || status
                .controller
                .contains(ControllerStatus::ENGINE_RESET_IN_PROGRESS);
        self.set_reason(Reason::Resuming, waiting);
    }

    /// Raise or lower a single reason; emits only on transition
    pub fn set_reason(&mut self, reason: Reason, set: bool) {
        if set == self.active.contains(&reason) {
            return;
        }
        let sign = if set { '+' } else { '-' };
        let _ = writeln!(self.sink, "STATE: {sign}{reason}");
        let _ = self.sink.flush();
        if set {
            self.active.insert(reason);
        } else {
            self.active.remove(&reason);
        }
    }

    /// Report the start of page `page` (1-based)
    pub fn page(&mut self, page: u32) {
        let _ = writeln!(self.sink, "PAGE: page-number {page}");
        let _ = self.sink.flush();
    }

    /// Lower every raised reason
    pub fn clear(&mut self) {
        for reason in std::mem::take(&mut self.active) {
            let _ = writeln!(self.sink, "STATE: -{reason}");
        }
        let _ = self.sink.flush();
    }
}

impl Drop for ReasonReporter {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_labels_are_kebab_case() {
        assert_eq!(Reason::MediaJamError.to_string(), "media-jam-error");
        assert_eq!(Reason::OtherError.to_string(), "other-error");
        assert_eq!(
            Reason::ConnectingToDevice.to_string(),
            "connecting-to-device"
        );
    }
}
