//! CUPS USB backend for Canon CAPT v1 laser printers
//!
//! Canon's CAPT v1 printers are host-based: the spooler filter renders and
//! compresses every page, and this backend drives the wire protocol that
//! turns those pages into ejected sheets. The interesting part is not the
//! data path but the conversation — reserving the unit, polling status,
//! clearing latched errors, and honouring the printer's demands to resend
//! the current or even the previous page after a jam or engine hiccup.
//!
//! # Structure
//!
//! - [`status`] — typed view over the extended status word
//! - [`reporter`] — `STATE:`/`PAGE:` lines for the spooler
//! - [`connection`] — the [`Transport`](connection::Transport) seam and
//!   its USB implementation
//! - [`session`] — framed CAPT operations over a transport
//! - [`controller`] — the per-page write state machine
//! - [`page`] — page parameters and the spooled page stream
//! - [`info`] — device identity and `captusb://` URIs
//! - [`backend`] — discovery and job orchestration
//! - [`stop`] — cooperative cancellation
//!
//! The binary target wires these together behind the CUPS backend
//! command-line and environment contract.

pub mod backend;
mod commands;
pub mod connection;
pub mod controller;
pub mod error;
pub mod info;
pub mod page;
pub mod reporter;
pub mod session;
pub mod status;
pub mod stop;
