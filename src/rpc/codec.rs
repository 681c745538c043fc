//! Newline-delimited JSON codec for the host/sidecar stdio streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so that an unterminated or oversized message from a misbehaving
//! peer cannot exhaust memory.
//!
//! Use [`FrameCodec`] with [`tokio_util::codec::FramedRead`] for the inbound
//! direction and [`tokio_util::codec::FramedWrite`] for the outbound one.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum accepted line length: 10 MiB.
///
/// File contents travel inside `read_file` results and `apply_diff` params,
/// so the limit is well above a typical source file.
pub const MAX_LINE_BYTES: usize = 10 * 1_048_576;

/// One line taken off the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundLine {
    /// A complete UTF-8 line with its terminator stripped.
    Text(String),
    /// A line that was dropped, with the reason. The stream stays usable.
    Rejected(String),
}

/// Line codec for JSON-RPC frames.
///
/// # Decoder
///
/// A line longer than the limit, or one that is not valid UTF-8, decodes to
/// [`InboundLine::Rejected`]. Its bytes are discarded and decoding resumes at
/// the next newline. Rejections must stay items: after a decoder error
/// `FramedRead` leaves already-buffered frames undecoded until the next read.
/// Only I/O failures are errors, mapped to [`AppError::Transport`].
///
/// # Encoder
///
/// Outbound strings are written as `item\n`. Callers must hand in compact
/// JSON; a string that already contains `\n` is rejected because it would
/// split one frame into two.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    fn decoded(
        &self,
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<InboundLine>> {
        match decoded {
            Ok(line) => Ok(line.map(InboundLine::Text)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(InboundLine::Rejected(format!(
                "line too long: exceeded {} bytes",
                self.max_length
            )))),
            Err(LinesCodecError::Io(err)) if err.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(InboundLine::Rejected(format!("invalid utf-8: {err}"))))
            }
            Err(e) => Err(map_codec_error(e, self.max_length)),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = InboundLine;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode(src);
        self.decoded(decoded)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let decoded = self.inner.decode_eof(src);
        self.decoded(decoded)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        if item.contains('\n') {
            return Err(AppError::Protocol(
                "outbound frame contains a raw newline".into(),
            ));
        }
        self.inner
            .encode(item, dst)
            .map_err(|e| map_codec_error(e, self.max_length))
    }
}

fn map_codec_error(e: LinesCodecError, max_length: usize) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {max_length} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Transport(io_err.to_string()),
    }
}
