//! Line-delimited JSON codec.
//!
//! Each protocol message is encoded as a single JSON object terminated by a
//! newline. Decoding is strict: a line that does not match the expected shape
//! is reported as [`ProtocolError::Malformed`] and the caller drops it.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors produced while encoding or decoding protocol lines.
#[derive(Error, Debug)]
pub enum ProtocolError
{
    /// The line is not valid JSON or does not match the expected message shape.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// A message could not be serialized.
    #[error("Failed to encode message: {0}")]
    Encode(String),
}

/// Encode a message as a JSON line (including the trailing newline).
///
/// ## Example
///
/// ```rust
/// use debugbox_protocol::{encode_line, Inbound, ResumeDecision};
///
/// let line = encode_line(&Inbound::Decision(ResumeDecision::Continue)).unwrap();
/// assert_eq!(line, "{\"decision\":\"continue\"}\n");
/// ```
///
/// ## Errors
///
/// Returns [`ProtocolError::Encode`] if `serde_json` rejects the value.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError>
{
    let mut line = serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decode a single line into a message.
///
/// Surrounding whitespace (including the line terminator) is ignored.
///
/// ## Errors
///
/// Returns [`ProtocolError::Malformed`] for blank lines, invalid JSON, or JSON
/// that does not describe a `T`.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError>
{
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Malformed("empty line".to_string()));
    }
    serde_json::from_str(trimmed).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::messages::{
        BreakpointSpec, BreakpointsRequest, Inbound, MemoryRequest, Outbound, Reply, ReplyEnvelope, Request,
        RequestEnvelope, Response, ResumeDecision,
    };

    #[test]
    fn test_decode_request_line()
    {
        let line = r#"{"request":{"id":7,"request":{"endpoint":"memory","call":{"op":"read","segment":4096,"offset":16,"length":4}}}}"#;
        let inbound: Inbound = decode_line(line).unwrap();
        assert_eq!(
            inbound,
            Inbound::Request(RequestEnvelope {
                id: 7,
                request: Request::Memory(MemoryRequest::Read {
                    segment: 0x1000,
                    offset: 0x10,
                    length: 4,
                }),
            })
        );
    }

    #[test]
    fn test_decode_breakpoint_defaults()
    {
        let line = r#"{"request":{"id":1,"request":{"endpoint":"breakpoints","call":{"op":"add","spec":{"type":"interrupt","number":33}}}}}"#;
        let inbound: Inbound = decode_line(line).unwrap();
        let Inbound::Request(envelope) = inbound else {
            panic!("expected a request");
        };
        assert_eq!(
            envelope.request,
            Request::Breakpoints(BreakpointsRequest::Add {
                spec: BreakpointSpec::Interrupt {
                    number: 0x21,
                    ah: None,
                    once: false,
                },
            })
        );
    }

    #[test]
    fn test_decode_decision()
    {
        let inbound: Inbound = decode_line("{\"decision\":\"break\"}\r\n").unwrap();
        assert_eq!(inbound, Inbound::Decision(ResumeDecision::Break));
    }

    #[test]
    fn test_encode_reply_is_single_line()
    {
        let outbound = Outbound::Reply(ReplyEnvelope {
            id: 3,
            response: Response::Ok(Reply::Bytes(vec![0, 1, 2])),
        });
        let line = encode_line(&outbound).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_line::<Outbound>(&line).unwrap(), outbound);
    }

    #[test]
    fn test_unknown_endpoint_is_malformed()
    {
        let line = r#"{"request":{"id":1,"request":{"endpoint":"video","call":{"op":"dump"}}}}"#;
        assert!(matches!(decode_line::<Inbound>(line), Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_blank_and_garbage_lines_are_malformed()
    {
        assert!(matches!(decode_line::<Inbound>("   \n"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(decode_line::<Inbound>("step_in"), Err(ProtocolError::Malformed(_))));
    }
}
