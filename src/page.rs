//! Page data model and the spooled page stream
//!
//! The raster pipeline (decode, crop, SCoA compression) runs upstream in
//! the spooler filter; the backend receives a stream of already-compressed
//! pages. [`PageSource`] is the pull interface the print loop consumes,
//! [`PageStream`] decodes the filter's framing, and [`BufferedPage`] holds
//! one page fully in memory so the device can demand a verbatim resend.

use std::io::{self, Read};

use crate::error::PageStreamError;

/// Print resolution selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// 300 dpi
    Dpi300,
    /// 600 dpi
    Dpi600,
}

impl Resolution {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Dpi300 => 0x00,
            Self::Dpi600 => 0x01,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Dpi300),
            0x01 => Some(Self::Dpi600),
            _ => None,
        }
    }
}

/// Per-page print parameters
///
/// Geometry fields are in dots at the page resolution; the image must
/// already be cropped to the printable area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    /// Engine paper size code
    pub paper_size_code: u8,
    /// Toner density, engine units
    pub toner_density: u8,
    /// Engine mode byte
    pub mode: u8,
    /// Print resolution
    pub resolution: Resolution,
    /// Edge smoothing enabled
    pub smooth_enable: bool,
    /// Toner saving enabled
    pub toner_saving: bool,
    /// Left margin in dots
    pub margin_left: u16,
    /// Top margin in dots
    pub margin_top: u16,
    /// Bytes per raster line
    pub image_line_bytes: u16,
    /// Number of raster lines
    pub image_lines: u16,
    /// Printable width in dots
    pub paper_width: u16,
    /// Printable height in dots
    pub paper_height: u16,
}

/// Serialized length of a parameter block
pub(crate) const PARAMS_LEN: usize = 18;

impl PageParams {
    pub(crate) fn to_bytes(self) -> [u8; PARAMS_LEN] {
        let mut flags = 0u8;
        if self.smooth_enable {
            flags |= 0b1;
        }
        if self.toner_saving {
            flags |= 0b1 << 1;
        }
        let mut bytes = [0u8; PARAMS_LEN];
        bytes[0] = self.paper_size_code;
        bytes[1] = self.toner_density;
        bytes[2] = self.mode;
        bytes[3] = self.resolution.code();
        bytes[4] = flags;
        bytes[6..8].copy_from_slice(&self.margin_left.to_le_bytes());
        bytes[8..10].copy_from_slice(&self.margin_top.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.image_line_bytes.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.image_lines.to_le_bytes());
        bytes[14..16].copy_from_slice(&self.paper_width.to_le_bytes());
        bytes[16..18].copy_from_slice(&self.paper_height.to_le_bytes());
        bytes
    }

    pub(crate) fn from_bytes(bytes: [u8; PARAMS_LEN]) -> Result<Self, PageStreamError> {
        let resolution =
            Resolution::from_code(bytes[3]).ok_or_else(|| PageStreamError::InvalidParams {
                reason: format!("resolution code {:#04x}", bytes[3]),
            })?;
        let word = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let params = Self {
            paper_size_code: bytes[0],
            toner_density: bytes[1],
            mode: bytes[2],
            resolution,
            smooth_enable: bytes[4] & 0b1 != 0,
            toner_saving: bytes[4] & 0b10 != 0,
            margin_left: word(6),
            margin_top: word(8),
            image_line_bytes: word(10),
            image_lines: word(12),
            paper_width: word(14),
            paper_height: word(16),
        };
        params.validate()?;
        Ok(params)
    }

    // The upstream filter crops the raster to the printable area; a stream
    // that violates these bounds would overrun the engine.
    fn validate(&self) -> Result<(), PageStreamError> {
        if u32::from(self.image_line_bytes) * 8 < u32::from(self.paper_width) {
            return Err(PageStreamError::InvalidParams {
                reason: format!(
                    "line of {}B cannot cover {} dots",
                    self.image_line_bytes, self.paper_width
                ),
            });
        }
        if self.image_lines > self.paper_height {
            return Err(PageStreamError::InvalidParams {
                reason: format!(
                    "{} lines exceed page height {}",
                    self.image_lines, self.paper_height
                ),
            });
        }
        Ok(())
    }
}

/// Producer of compressed pages
///
/// `next_page` yields the parameters of the next page, after which the
/// [`Read`] impl serves that page's compressed bytes until exhaustion.
pub trait PageSource: Read {
    /// Advance to the next page, if any
    ///
    /// # Errors
    /// Returns an error if the underlying stream is unreadable or
    /// malformed.
    fn next_page(&mut self) -> Result<Option<PageParams>, PageStreamError>;
}

/// One compressed page, fully buffered
///
/// Held until the following page has been accepted by the device, because
/// the printer may demand a verbatim resend of the previous page. At most
/// two of these are ever live (current and previous).
#[derive(Debug)]
pub struct BufferedPage {
    /// Zero-based page number; doubles as the device page slot (mod 256)
    pub page_number: u32,
    /// Parameters the page was produced with
    pub params: PageParams,
    data: Vec<u8>,
}

impl BufferedPage {
    /// Buffer the current page of `source`
    ///
    /// # Errors
    /// Returns an error if reading the page data fails.
    pub fn from_source(
        page_number: u32,
        params: PageParams,
        source: &mut dyn PageSource,
    ) -> Result<Self, PageStreamError> {
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        Ok(Self {
            page_number,
            params,
            data,
        })
    }

    /// The compressed page data, from the start
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

const PAGE_MAGIC: [u8; 4] = *b"CPT1";

/// Decoder for the filter's framed page stream
///
/// Each page is a `CPT1` magic, an 18-byte parameter block and a
/// little-endian `u32` byte count, followed by that many bytes of
/// compressed data. Zero-length pages are legal.
pub struct PageStream<R: Read> {
    inner: R,
    /// Bytes of the current page not yet consumed.
    remaining: u64,
}

impl<R: Read> PageStream<R> {
    /// Wrap a spool file or stdin
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
        }
    }
}

impl<R: Read> Read for PageStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let want = usize::try_from(self.remaining.min(buf.len() as u64)).unwrap_or(buf.len());
        let n = self.inner.read(&mut buf[..want])?;
        if n == 0 && want > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "page data ended early",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

impl<R: Read> PageSource for PageStream<R> {
    fn next_page(&mut self) -> Result<Option<PageParams>, PageStreamError> {
        // Skip whatever the consumer left of the previous page.
        if self.remaining > 0 {
            io::copy(self, &mut io::sink())?;
        }

        let mut magic = [0u8; 4];
        match read_exact_or_eof(&mut self.inner, &mut magic)? {
            HeaderRead::Eof => return Ok(None),
            HeaderRead::Partial => return Err(PageStreamError::Truncated),
            HeaderRead::Full => {}
        }
        if magic != PAGE_MAGIC {
            return Err(PageStreamError::BadMagic);
        }

        let mut header = [0u8; PARAMS_LEN + 4];
        self.inner
            .read_exact(&mut header)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => PageStreamError::Truncated,
                _ => PageStreamError::Io(e),
            })?;
        let mut raw_params = [0u8; PARAMS_LEN];
        raw_params.copy_from_slice(&header[..PARAMS_LEN]);
        let params = PageParams::from_bytes(raw_params)?;
        let len = u32::from_le_bytes([
            header[PARAMS_LEN],
            header[PARAMS_LEN + 1],
            header[PARAMS_LEN + 2],
            header[PARAMS_LEN + 3],
        ]);
        self.remaining = u64::from(len);
        Ok(Some(params))
    }
}

enum HeaderRead {
    Full,
    Partial,
    Eof,
}

// Distinguishes a clean end-of-stream from a header cut short.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<HeaderRead> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(if filled == 0 {
                HeaderRead::Eof
            } else {
                HeaderRead::Partial
            });
        }
        filled += n;
    }
    Ok(HeaderRead::Full)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> PageParams {
        PageParams {
            paper_size_code: 0x01,
            toner_density: 0x08,
            mode: 0x00,
            resolution: Resolution::Dpi600,
            smooth_enable: false,
            toner_saving: true,
            margin_left: 16,
            margin_top: 16,
            image_line_bytes: 620,
            image_lines: 7016,
            paper_width: 4960,
            paper_height: 7016,
        }
    }

    fn encode_page(params: PageParams, data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PAGE_MAGIC);
        bytes.extend_from_slice(&params.to_bytes());
        bytes.extend_from_slice(&u32::try_from(data.len()).unwrap().to_le_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn params_round_trip() {
        let params = test_params();
        assert_eq!(
            PageParams::from_bytes(params.to_bytes()).unwrap(),
            params
        );
    }

    #[test]
    fn params_geometry_is_validated() {
        let mut params = test_params();
        params.image_line_bytes = 619; // 4952 dots < 4960
        assert!(PageParams::from_bytes(params.to_bytes()).is_err());

        let mut params = test_params();
        params.image_lines = params.paper_height + 1;
        assert!(PageParams::from_bytes(params.to_bytes()).is_err());
    }

    #[test]
    fn stream_yields_pages_then_none() {
        let params = test_params();
        let mut spool = encode_page(params, b"first");
        spool.extend_from_slice(&encode_page(params, b"second!"));
        let mut stream = PageStream::new(&spool[..]);

        assert_eq!(stream.next_page().unwrap(), Some(params));
        let page = BufferedPage::from_source(0, params, &mut stream).unwrap();
        assert_eq!(page.data(), b"first");

        assert_eq!(stream.next_page().unwrap(), Some(params));
        let page = BufferedPage::from_source(1, params, &mut stream).unwrap();
        assert_eq!(page.data(), b"second!");

        assert_eq!(stream.next_page().unwrap(), None);
    }

    #[test]
    fn empty_stream_is_a_clean_end() {
        let mut stream = PageStream::new(&[][..]);
        assert_eq!(stream.next_page().unwrap(), None);
    }

    #[test]
    fn zero_length_page_is_legal() {
        let spool = encode_page(test_params(), b"");
        let mut stream = PageStream::new(&spool[..]);
        let params = stream.next_page().unwrap().unwrap();
        let page = BufferedPage::from_source(0, params, &mut stream).unwrap();
        assert!(page.data().is_empty());
        assert_eq!(stream.next_page().unwrap(), None);
    }

    #[test]
    fn unread_page_data_is_skipped() {
        let params = test_params();
        let mut spool = encode_page(params, b"leftover");
        spool.extend_from_slice(&encode_page(params, b"next"));
        let mut stream = PageStream::new(&spool[..]);
        stream.next_page().unwrap();
        // Consumer never reads the first page's data.
        assert_eq!(stream.next_page().unwrap(), Some(params));
        let page = BufferedPage::from_source(1, params, &mut stream).unwrap();
        assert_eq!(page.data(), b"next");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut spool = encode_page(test_params(), b"x");
        spool[0] = b'X';
        let mut stream = PageStream::new(&spool[..]);
        assert!(matches!(
            stream.next_page(),
            Err(PageStreamError::BadMagic)
        ));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let spool = encode_page(test_params(), b"data");
        let mut stream = PageStream::new(&spool[..7]);
        assert!(matches!(
            stream.next_page(),
            Err(PageStreamError::Truncated)
        ));
    }
}
