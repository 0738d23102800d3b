//! Envelope messages and their byte-level serialization.
//!
//! The envelope is a tagged union of requests and responses. Scalars are
//! little-endian; strings and buffers are length-prefixed. Version tokens
//! are opaque and compared byte-wise only.

use std::fmt::{self, Display};

/// Protocol status codes carried by [`Response::Error`].
pub mod status {
    /// The supplied version token does not match the master's current one.
    pub const VERSION_MISMATCH: u32 = 1;
    /// The peer sent bytes the receiver could not decode.
    pub const CODEC: u32 = 2;
    /// Any other server-side failure.
    pub const INTERNAL: u32 = 3;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Fetch a chunk of the serialized weights starting at `position`.
    GetWeights {
        version: Option<String>,
        position: u64,
    },
    /// Stream a replacement weight buffer; `complete` marks the last chunk.
    SetWeights {
        version: Option<String>,
        buffer: Vec<u8>,
        complete: bool,
    },
    /// Stream a weight delta; applied once `complete` arrives.
    UpdWeights {
        version: Option<String>,
        buffer: Vec<u8>,
        complete: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    GetWeights {
        version: String,
        buffer: Vec<u8>,
        complete: bool,
    },
    SetWeights {
        version: String,
    },
    UpdWeights {
        version: String,
    },
    Success,
    Error {
        status: u32,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Request(Request),
    Response(Response),
}

/// Decode failure: the bytes do not describe a valid envelope.
#[derive(Debug)]
pub struct ProtoError(String);

impl ProtoError {
    fn new(what: impl Into<String>) -> Self {
        Self(what.into())
    }
}

impl Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ProtoError {}

pub type DecodeResult<T> = Result<T, ProtoError>;

const ENVELOPE_REQUEST: u8 = 0;
const ENVELOPE_RESPONSE: u8 = 1;

const REQ_GET_WEIGHTS: u8 = 0;
const REQ_SET_WEIGHTS: u8 = 1;
const REQ_UPD_WEIGHTS: u8 = 2;

const RESP_GET_WEIGHTS: u8 = 0;
const RESP_SET_WEIGHTS: u8 = 1;
const RESP_UPD_WEIGHTS: u8 = 2;
const RESP_SUCCESS: u8 = 3;
const RESP_ERROR: u8 = 4;

impl Envelope {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Envelope::Request(req) => {
                out.push(ENVELOPE_REQUEST);
                req.encode(out);
            }
            Envelope::Response(resp) => {
                out.push(ENVELOPE_RESPONSE);
                resp.encode(out);
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> DecodeResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let envelope = match cursor.u8()? {
            ENVELOPE_REQUEST => Envelope::Request(Request::decode(&mut cursor)?),
            ENVELOPE_RESPONSE => Envelope::Response(Response::decode(&mut cursor)?),
            kind => return Err(ProtoError::new(format!("unknown envelope kind {kind}"))),
        };
        cursor.finish()?;
        Ok(envelope)
    }
}

impl Request {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Request::GetWeights { version, position } => {
                out.push(REQ_GET_WEIGHTS);
                put_opt_string(out, version.as_deref());
                out.extend_from_slice(&position.to_le_bytes());
            }
            Request::SetWeights {
                version,
                buffer,
                complete,
            } => {
                out.push(REQ_SET_WEIGHTS);
                put_opt_string(out, version.as_deref());
                put_bytes(out, buffer);
                out.push(*complete as u8);
            }
            Request::UpdWeights {
                version,
                buffer,
                complete,
            } => {
                out.push(REQ_UPD_WEIGHTS);
                put_opt_string(out, version.as_deref());
                put_bytes(out, buffer);
                out.push(*complete as u8);
            }
        }
    }

    fn decode(cursor: &mut Cursor) -> DecodeResult<Self> {
        match cursor.u8()? {
            REQ_GET_WEIGHTS => Ok(Request::GetWeights {
                version: cursor.opt_string()?,
                position: cursor.u64()?,
            }),
            REQ_SET_WEIGHTS => Ok(Request::SetWeights {
                version: cursor.opt_string()?,
                buffer: cursor.bytes()?,
                complete: cursor.bool()?,
            }),
            REQ_UPD_WEIGHTS => Ok(Request::UpdWeights {
                version: cursor.opt_string()?,
                buffer: cursor.bytes()?,
                complete: cursor.bool()?,
            }),
            kind => Err(ProtoError::new(format!("unknown request kind {kind}"))),
        }
    }
}

impl Response {
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Response::GetWeights {
                version,
                buffer,
                complete,
            } => {
                out.push(RESP_GET_WEIGHTS);
                put_string(out, version);
                put_bytes(out, buffer);
                out.push(*complete as u8);
            }
            Response::SetWeights { version } => {
                out.push(RESP_SET_WEIGHTS);
                put_string(out, version);
            }
            Response::UpdWeights { version } => {
                out.push(RESP_UPD_WEIGHTS);
                put_string(out, version);
            }
            Response::Success => out.push(RESP_SUCCESS),
            Response::Error { status, message } => {
                out.push(RESP_ERROR);
                out.extend_from_slice(&status.to_le_bytes());
                put_string(out, message);
            }
        }
    }

    fn decode(cursor: &mut Cursor) -> DecodeResult<Self> {
        match cursor.u8()? {
            RESP_GET_WEIGHTS => Ok(Response::GetWeights {
                version: cursor.string()?,
                buffer: cursor.bytes()?,
                complete: cursor.bool()?,
            }),
            RESP_SET_WEIGHTS => Ok(Response::SetWeights {
                version: cursor.string()?,
            }),
            RESP_UPD_WEIGHTS => Ok(Response::UpdWeights {
                version: cursor.string()?,
            }),
            RESP_SUCCESS => Ok(Response::Success),
            RESP_ERROR => Ok(Response::Error {
                status: cursor.u32()?,
                message: cursor.string()?,
            }),
            kind => Err(ProtoError::new(format!("unknown response kind {kind}"))),
        }
    }
}

fn put_string(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn put_opt_string(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(v) => {
            out.push(1);
            put_string(out, v);
        }
        None => out.push(0),
    }
}

fn put_bytes(out: &mut Vec<u8>, value: &[u8]) {
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(ProtoError::new("truncated envelope"));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn u8(&mut self) -> DecodeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> DecodeResult<bool> {
        Ok(self.u8()? != 0)
    }

    fn u32(&mut self) -> DecodeResult<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64(&mut self) -> DecodeResult<u64> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self) -> DecodeResult<String> {
        let len = self.u32()? as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtoError::new("invalid utf-8 string"))
    }

    fn opt_string(&mut self) -> DecodeResult<Option<String>> {
        match self.u8()? {
            0 => Ok(None),
            _ => Ok(Some(self.string()?)),
        }
    }

    fn bytes(&mut self) -> DecodeResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn finish(self) -> DecodeResult<()> {
        if !self.bytes.is_empty() {
            return Err(ProtoError::new("trailing bytes after envelope"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(envelope: Envelope) {
        let mut buf = Vec::new();
        envelope.encode(&mut buf);
        assert_eq!(Envelope::decode(&buf).unwrap(), envelope);
    }

    #[test]
    fn test_request_round_trips() {
        round_trip(Envelope::Request(Request::GetWeights {
            version: None,
            position: 0,
        }));
        round_trip(Envelope::Request(Request::GetWeights {
            version: Some("abc-7".into()),
            position: u64::MAX,
        }));
        round_trip(Envelope::Request(Request::SetWeights {
            version: None,
            buffer: vec![1, 2, 3],
            complete: true,
        }));
        round_trip(Envelope::Request(Request::UpdWeights {
            version: Some("v".into()),
            buffer: Vec::new(),
            complete: false,
        }));
    }

    #[test]
    fn test_response_round_trips() {
        round_trip(Envelope::Response(Response::GetWeights {
            version: "deadbeef-1".into(),
            buffer: vec![0; 1024],
            complete: false,
        }));
        round_trip(Envelope::Response(Response::SetWeights {
            version: "v2".into(),
        }));
        round_trip(Envelope::Response(Response::UpdWeights {
            version: "v3".into(),
        }));
        round_trip(Envelope::Response(Response::Success));
        round_trip(Envelope::Response(Response::Error {
            status: status::VERSION_MISMATCH,
            message: "stale version".into(),
        }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Envelope::decode(&[]).is_err());
        assert!(Envelope::decode(&[9]).is_err());
        assert!(Envelope::decode(&[0, 9]).is_err());

        // Truncated string length.
        let mut buf = Vec::new();
        Envelope::Response(Response::SetWeights {
            version: "version".into(),
        })
        .encode(&mut buf);
        buf.truncate(buf.len() - 2);
        assert!(Envelope::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut buf = Vec::new();
        Envelope::Response(Response::Success).encode(&mut buf);
        buf.push(0);
        assert!(Envelope::decode(&buf).is_err());
    }
}
