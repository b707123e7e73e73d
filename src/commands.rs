//! CAPT v1 command framing
//!
//! Every exchange with the printer is a frame: a little-endian `u16`
//! opcode, a little-endian `u16` total length (header included) and the
//! payload. Replies echo the command opcode. Video data frames are
//! one-way; control commands answer with a single result byte, status
//! requests with the 10-byte extended status word.

use crate::error::ProtocolError;
use crate::page::PageParams;

/// Claim the command channel for this host
pub(crate) const RESERVE_UNIT: u16 = 0xA1A1;
/// Release the command channel
pub(crate) const RELEASE_UNIT: u16 = 0xA1A2;
/// Hand the device the next expected page slot
pub(crate) const GO_ONLINE: u16 = 0xA1A3;
/// Take the unit offline
pub(crate) const GO_OFFLINE: u16 = 0xA1A4;
/// Acknowledge a latched engine error
pub(crate) const CLEAR_ERROR: u16 = 0xA1A5;
/// Start a drum cleaning cycle
pub(crate) const CLEANING: u16 = 0xA1A6;
/// Request the extended status word
pub(crate) const EXTENDED_STATUS: u16 = 0xA0A1;
/// Page parameter block preceding the video data
pub(crate) const PAGE_PARAMS: u16 = 0xC0A0;
/// One chunk of compressed video data
pub(crate) const VIDEO_DATA: u16 = 0xC0A1;
/// End-of-page marker
pub(crate) const VIDEO_END: u16 = 0xC0A2;

/// Frame header length on the wire
pub(crate) const HEADER_LEN: usize = 4;

pub(crate) enum CaptCommand<'a> {
    ReserveUnit,
    ReleaseUnit,
    GoOnline { slot: u8 },
    GoOffline,
    ClearError,
    Cleaning,
    ExtendedStatusRequest,
    PageParams(&'a PageParams),
    VideoData(&'a [u8]),
    VideoEnd,
}

impl CaptCommand<'_> {
    pub(crate) fn opcode(&self) -> u16 {
        use CaptCommand::*;
        match self {
            ReserveUnit => RESERVE_UNIT,
            ReleaseUnit => RELEASE_UNIT,
            GoOnline { .. } => GO_ONLINE,
            GoOffline => GO_OFFLINE,
            ClearError => CLEAR_ERROR,
            Cleaning => CLEANING,
            ExtendedStatusRequest => EXTENDED_STATUS,
            PageParams(_) => PAGE_PARAMS,
            VideoData(_) => VIDEO_DATA,
            VideoEnd => VIDEO_END,
        }
    }
}

impl TryFrom<CaptCommand<'_>> for Vec<u8> {
    type Error = ProtocolError;

    fn try_from(value: CaptCommand<'_>) -> Result<Self, Self::Error> {
        use CaptCommand::*;
        let opcode = value.opcode();
        match value {
            GoOnline { slot } => frame(opcode, &[slot, 0x00]),
            PageParams(params) => frame(opcode, &params.to_bytes()),
            VideoData(data) => frame(opcode, data),
            ReserveUnit | ReleaseUnit | GoOffline | ClearError | Cleaning
            | ExtendedStatusRequest | VideoEnd => frame(opcode, &[]),
        }
    }
}

/// Wrap `payload` in a frame header; the declared length always matches
/// the emitted bytes, so an oversized payload is an error rather than a
/// desynchronized stream.
pub(crate) fn frame(opcode: u16, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let total = u16::try_from(HEADER_LEN + payload.len()).map_err(|_| {
        ProtocolError::PayloadTooLarge {
            opcode,
            len: payload.len(),
        }
    })?;
    let mut bytes = Vec::with_capacity(usize::from(total));
    bytes.extend_from_slice(&opcode.to_le_bytes());
    bytes.extend_from_slice(&total.to_le_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Parsed reply frame header
pub(crate) struct ReplyHeader {
    pub opcode: u16,
    pub payload_len: usize,
}

impl ReplyHeader {
    /// Parse and sanity-check the 4 header bytes of a reply
    pub(crate) fn parse(raw: [u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let opcode = u16::from_le_bytes([raw[0], raw[1]]);
        let total = usize::from(u16::from_le_bytes([raw[2], raw[3]]));
        let Some(payload_len) = total.checked_sub(HEADER_LEN) else {
            return Err(ProtocolError::MalformedReply {
                reason: format!("frame length {total} shorter than its header"),
            });
        };
        Ok(Self {
            opcode,
            payload_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::Resolution;

    #[test]
    fn frames_carry_opcode_and_total_length() {
        let bytes: Vec<u8> = CaptCommand::GoOnline { slot: 3 }.try_into().unwrap();
        assert_eq!(bytes, [0xA3, 0xA1, 0x06, 0x00, 0x03, 0x00]);

        let bytes: Vec<u8> = CaptCommand::ReserveUnit.try_into().unwrap();
        assert_eq!(bytes, [0xA1, 0xA1, 0x04, 0x00]);
    }

    #[test]
    fn video_data_frames_wrap_the_chunk() {
        let chunk = [0xAA_u8; 16];
        let bytes: Vec<u8> = CaptCommand::VideoData(&chunk).try_into().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 16);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 20);
        assert_eq!(&bytes[HEADER_LEN..], &chunk);
    }

    #[test]
    fn oversized_payloads_are_rejected() {
        // Largest payload a frame can declare, then one byte more.
        let max = usize::from(u16::MAX) - HEADER_LEN;
        let data = vec![0u8; max + 1];
        assert!(matches!(
            frame(VIDEO_DATA, &data[..max]),
            Ok(bytes) if bytes.len() == HEADER_LEN + max
        ));
        assert!(matches!(
            frame(VIDEO_DATA, &data),
            Err(ProtocolError::PayloadTooLarge { opcode: VIDEO_DATA, len }) if len == max + 1
        ));
    }

    #[test]
    fn page_params_frame_length_matches_serialization() {
        let params = PageParams {
            paper_size_code: 1,
            toner_density: 8,
            mode: 0,
            resolution: Resolution::Dpi600,
            smooth_enable: true,
            toner_saving: false,
            margin_left: 16,
            margin_top: 16,
            image_line_bytes: 620,
            image_lines: 7016,
            paper_width: 4960,
            paper_height: 7016,
        };
        let bytes: Vec<u8> = CaptCommand::PageParams(&params).try_into().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + params.to_bytes().len());
    }

    #[test]
    fn reply_header_rejects_undersized_length() {
        assert!(ReplyHeader::parse([0xA1, 0xA0, 0x02, 0x00]).is_err());
        let header = ReplyHeader::parse([0xA1, 0xA0, 0x0E, 0x00]).unwrap();
        assert_eq!(header.opcode, 0xA0A1);
        assert_eq!(header.payload_len, 10);
    }
}
