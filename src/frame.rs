//! Length-prefixed JSON framing between the stdio host and its shell.
//!
//! On the wire a frame is a 4-byte body length in native byte order followed
//! by the UTF-8 JSON body. The shell writes frames to the host's stdin and
//! reads them from its stdout, so nothing else may ever be written to stdout.
//!
//! The two directions carry different traffic and get different caps: the
//! host sends scripts and approval requests ([`MAX_OUTBOUND`]), the shell
//! sends page messages, which may embed whole PSBTs ([`MAX_INBOUND`]).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Read, Write};

/// Largest body the host writes.
pub const MAX_OUTBOUND: usize = 8 * 1_048_576;
/// Largest body the host accepts from the shell.
pub const MAX_INBOUND: usize = 64 * 1_048_576;

const PREFIX: usize = 4;

/// One frame body, already checked against the cap of its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: Vec<u8>,
}

impl Frame {
    /// Serializes `msg` for the shell. Bodies over [`MAX_OUTBOUND`] are
    /// refused with [`io::ErrorKind::InvalidInput`].
    pub fn encode<T: Serialize>(msg: &T) -> io::Result<Self> {
        let body = serde_json::to_vec(msg)?;
        if body.len() > MAX_OUTBOUND {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("outgoing frame of {} bytes exceeds {MAX_OUTBOUND}", body.len()),
            ));
        }
        Ok(Self { body })
    }

    /// Reads the next frame, or `None` when the stream ends cleanly between
    /// frames. A stream cut inside a frame is
    /// [`io::ErrorKind::UnexpectedEof`]. `limit` is clamped to
    /// [`MAX_INBOUND`]; an oversized length is refused before its body is
    /// read.
    pub fn read_from<R: Read>(reader: &mut R, limit: usize) -> io::Result<Option<Self>> {
        let mut prefix = [0u8; PREFIX];
        let mut filled = 0;
        while filled < PREFIX {
            match reader.read(&mut prefix[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended inside a length prefix",
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        let len = u32::from_ne_bytes(prefix) as usize;
        if len > limit.min(MAX_INBOUND) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("incoming frame of {len} bytes is too large"),
            ));
        }
        let mut body = vec![0u8; len];
        reader.read_exact(&mut body)?;
        Ok(Some(Self { body }))
    }

    /// The body as text. Frames carry UTF-8 only.
    pub fn text(&self) -> io::Result<&str> {
        std::str::from_utf8(&self.body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn parse<T: DeserializeOwned>(&self) -> io::Result<T> {
        serde_json::from_str(self.text()?).map_err(io::Error::from)
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Prefix and body, ready for a single write.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PREFIX + self.body.len());
        out.extend_from_slice(&(self.body.len() as u32).to_ne_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())?;
        writer.flush()
    }
}
