//! Length-prefixed JSON frame protocol.
//!
//! Each frame is a big-endian `u32` byte length followed by a JSON
//! payload. Requests carry `{op, args}`; responses carry
//! `{success, data, error}`. An unrecognised operation produces the
//! distinguished `unknown operation: <op>` error string that clients
//! treat as "downgrade to direct mode".

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DaemonError, Result};

/// Upper bound on a single frame, to keep a corrupt peer from wedging us.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Error-string prefix for the unknown-operation sentinel.
pub const UNKNOWN_OPERATION_PREFIX: &str = "unknown operation: ";

/// A request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub op: String,
    #[serde(default)]
    pub args: Value,
}

impl Request {
    /// Builds a request with serializable arguments.
    pub fn new(op: impl Into<String>, args: impl Serialize) -> Result<Self> {
        Ok(Self {
            op: op.into(),
            args: serde_json::to_value(args)?,
        })
    }
}

/// A response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Success response carrying op-specific data.
    pub fn ok(data: impl Serialize) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).unwrap_or(Value::Null),
            error: None,
        }
    }

    /// Failure response with an error message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(message.into()),
        }
    }

    /// The distinguished response for an unrecognised operation.
    pub fn unknown_operation(op: &str) -> Self {
        Self::err(format!("{UNKNOWN_OPERATION_PREFIX}{op}"))
    }

    /// Returns `true` if the error string is the unknown-operation sentinel.
    pub fn is_unknown_operation(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with(UNKNOWN_OPERATION_PREFIX))
    }
}

/// Writes one length-prefixed frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, frame: &T) -> Result<()> {
    let payload = serde_json::to_vec(frame)?;
    let len = payload.len() as u32;
    if len > MAX_FRAME_LEN {
        return Err(DaemonError::Wire(format!("frame too large: {len} bytes")));
    }
    writer
        .write_all(&len.to_be_bytes())
        .and_then(|()| writer.write_all(&payload))
        .and_then(|()| writer.flush())
        .map_err(|e| DaemonError::Wire(e.to_string()))?;
    Ok(())
}

/// Reads one length-prefixed frame. Returns `None` on clean EOF.
pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(DaemonError::Wire(e.to_string())),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(DaemonError::Wire(format!("frame too large: {len} bytes")));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .map_err(|e| DaemonError::Wire(e.to_string()))?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_roundtrip() {
        let request = Request::new("create", json!({"title": "Hi"})).unwrap();

        let mut buf = Vec::new();
        write_frame(&mut buf, &request).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let back: Request = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(back.op, "create");
        assert_eq!(back.args["title"], "Hi");
    }

    #[test]
    fn multiple_frames_in_sequence() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Response::ok(json!({"n": 1}))).unwrap();
        write_frame(&mut buf, &Response::ok(json!({"n": 2}))).unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let first: Response = read_frame(&mut cursor).unwrap().unwrap();
        let second: Response = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(first.data["n"], 1);
        assert_eq!(second.data["n"], 2);

        let eof: Option<Response> = read_frame(&mut cursor).unwrap();
        assert!(eof.is_none());
    }

    #[test]
    fn eof_mid_prefix_is_clean() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let got: Option<Request> = read_frame(&mut cursor).unwrap();
        assert!(got.is_none());
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_frame::<_, Request>(&mut cursor).unwrap_err();
        assert!(matches!(err, DaemonError::Wire(_)));
    }

    #[test]
    fn unknown_operation_sentinel() {
        let response = Response::unknown_operation("frobnicate");
        assert!(!response.success);
        assert!(response.is_unknown_operation());
        assert_eq!(
            response.error.as_deref(),
            Some("unknown operation: frobnicate")
        );

        let normal = Response::err("issue not found: bd-1");
        assert!(!normal.is_unknown_operation());
    }
}
