//! JSON-RPC 2.0 messages and `Content-Length` framing
//!
//! Both peers frame each message as
//! `Content-Length: <n>\r\n\r\n<n bytes of UTF-8 JSON>`. Payloads are opaque:
//! `params`, `result` and error `data` are carried as raw JSON values.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CONTENT_LENGTH: &str = "content-length";

/// Standard JSON-RPC error codes
pub mod codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Request identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id
    Number(i64),
    /// String id
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Optional error payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create an error object without data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Method-not-found error for `method`
    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Unhandled method {}", method))
    }

    /// Internal error with the given message
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

impl From<BridgeError> for RpcError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Rpc(rpc) => rpc,
            other => RpcError::internal(other.to_string()),
        }
    }
}

/// One JSON-RPC message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Call expecting a response
    Request {
        /// Request id
        id: RequestId,
        /// Method name
        method: String,
        /// Parameters; `None` means the call carries no params at all
        params: Option<Value>,
    },
    /// Fire-and-forget call
    Notification {
        /// Method name
        method: String,
        /// Parameters; `None` means the call carries no params at all
        params: Option<Value>,
    },
    /// Reply to a request
    Response {
        /// Id of the request being answered
        id: RequestId,
        /// Result value or error object
        result: std::result::Result<Value, RpcError>,
    },
}

impl Message {
    /// Method name of a request or notification
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Notification { method, .. } => Some(method),
            Message::Response { .. } => None,
        }
    }

    /// Encode as a JSON value
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("jsonrpc".to_string(), Value::from("2.0"));

        match self {
            Message::Request { id, method, params } => {
                object.insert("id".to_string(), id_to_value(id));
                object.insert("method".to_string(), Value::from(method.as_str()));
                if let Some(params) = params {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Message::Notification { method, params } => {
                object.insert("method".to_string(), Value::from(method.as_str()));
                if let Some(params) = params {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Message::Response { id, result } => {
                object.insert("id".to_string(), id_to_value(id));
                match result {
                    Ok(value) => {
                        object.insert("result".to_string(), value.clone());
                    }
                    Err(err) => {
                        // RpcError always serializes
                        let err = serde_json::to_value(err).unwrap_or(Value::Null);
                        object.insert("error".to_string(), err);
                    }
                }
            }
        }

        Value::Object(object)
    }

    /// Decode from a JSON value.
    ///
    /// A `"params": null` member is read as "no params".
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(BridgeError::Serialization(
                "JSON-RPC message is not an object".to_string(),
            ));
        };

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<RequestId>(raw)?),
        };
        let params = match object.remove("params") {
            None | Some(Value::Null) => None,
            Some(params) => Some(params),
        };

        match (object.remove("method"), id) {
            (Some(Value::String(method)), Some(id)) => Ok(Message::Request { id, method, params }),
            (Some(Value::String(method)), None) => Ok(Message::Notification { method, params }),
            (Some(_), _) => Err(BridgeError::Serialization(
                "JSON-RPC method is not a string".to_string(),
            )),
            (None, Some(id)) => {
                let result = match object.remove("error") {
                    Some(err) if !err.is_null() => Err(serde_json::from_value::<RpcError>(err)?),
                    _ => Ok(object.remove("result").unwrap_or(Value::Null)),
                };
                Ok(Message::Response { id, result })
            }
            (None, None) => Err(BridgeError::Serialization(
                "JSON-RPC message has neither method nor id".to_string(),
            )),
        }
    }
}

fn id_to_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(n) => Value::from(*n),
        RequestId::String(s) => Value::from(s.as_str()),
    }
}

/// Largest body accepted from a peer
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Read one framed message.
///
/// Returns `Ok(None)` on a clean end of stream before a header starts.
/// A malformed header is a `Connection` error: the stream cannot be
/// resynchronized after it. A bad body is a `Serialization` error and the
/// next message can still be read.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut saw_header = false;

    loop {
        line.clear();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            if saw_header {
                return Err(BridgeError::Connection(
                    "Stream ended inside a message header".to_string(),
                ));
            }
            return Ok(None);
        }

        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            if saw_header {
                break;
            }
            // Tolerate stray blank lines between messages
            continue;
        }
        saw_header = true;

        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let length = value.trim().parse::<usize>().map_err(|_| {
                    BridgeError::Connection(format!("Invalid Content-Length: {}", value.trim()))
                })?;
                if length > MAX_CONTENT_LENGTH {
                    return Err(BridgeError::Connection(format!(
                        "Content-Length {} exceeds the {} byte limit",
                        length, MAX_CONTENT_LENGTH
                    )));
                }
                content_length = Some(length);
            }
        }
    }

    let length = content_length.ok_or_else(|| {
        BridgeError::Connection("Message header without Content-Length".to_string())
    })?;

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;

    let value: Value = serde_json::from_slice(&body)?;
    Message::from_value(value).map(Some)
}

/// Write one framed message and flush
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(&message.to_value())?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[test]
    fn test_request_without_params_omits_member() {
        let message = Message::Request {
            id: RequestId::Number(1),
            method: "build/shutdown".to_string(),
            params: None,
        };

        let value = message.to_value();
        assert!(value.get("params").is_none());
        assert_eq!(value["method"], "build/shutdown");
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn test_null_params_read_as_absent() {
        let value = json!({"jsonrpc": "2.0", "method": "build/exit", "params": null});
        let message = Message::from_value(value).unwrap();
        assert_eq!(
            message,
            Message::Notification {
                method: "build/exit".to_string(),
                params: None
            }
        );
    }

    #[test]
    fn test_classify_messages() {
        let request = Message::from_value(json!({"jsonrpc": "2.0", "id": "a", "method": "m", "params": [1]})).unwrap();
        assert!(matches!(request, Message::Request { id: RequestId::String(_), .. }));

        let response = Message::from_value(json!({"jsonrpc": "2.0", "id": 3, "result": null})).unwrap();
        assert_eq!(
            response,
            Message::Response {
                id: RequestId::Number(3),
                result: Ok(Value::Null)
            }
        );

        let error = Message::from_value(json!({
            "jsonrpc": "2.0",
            "id": 4,
            "error": {"code": -32601, "message": "nope"}
        }))
        .unwrap();
        match error {
            Message::Response { result: Err(err), .. } => assert_eq!(err.code, codes::METHOD_NOT_FOUND),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_messages() {
        assert!(Message::from_value(json!([1, 2])).is_err());
        assert!(Message::from_value(json!({"jsonrpc": "2.0"})).is_err());
        assert!(Message::from_value(json!({"jsonrpc": "2.0", "method": 5})).is_err());
    }

    #[tokio::test]
    async fn test_framing() {
        let message = Message::Notification {
            method: "build/logMessage".to_string(),
            params: Some(json!({"type": 3, "message": "héllo"})),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &message).await.unwrap();
        write_message(&mut buf, &message).await.unwrap();

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("Content-Length: "));

        let mut reader = BufReader::new(buf.as_slice());
        assert_eq!(read_message(&mut reader).await.unwrap(), Some(message.clone()));
        assert_eq!(read_message(&mut reader).await.unwrap(), Some(message));
        assert_eq!(read_message(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","method":"x"}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{}",
            body.len(),
            body
        );

        let mut reader = BufReader::new(raw.as_bytes());
        let message = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(message.method(), Some("x"));
    }

    #[tokio::test]
    async fn test_read_truncated_header() {
        let mut reader = BufReader::new("Content-Length: 10\r\n".as_bytes());
        assert!(read_message(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_content_length_rejected() {
        let raw = "Content-Length: 9223372036854775807\r\n\r\n{}";
        let mut reader = BufReader::new(raw.as_bytes());
        assert!(matches!(
            read_message(&mut reader).await,
            Err(BridgeError::Connection(_))
        ));

        let raw = format!("Content-Length: {}\r\n\r\n{{}}", MAX_CONTENT_LENGTH + 1);
        let mut reader = BufReader::new(raw.as_bytes());
        assert!(matches!(
            read_message(&mut reader).await,
            Err(BridgeError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_header_errors_are_fatal_body_errors_are_not() {
        let mut reader = BufReader::new("Content-Length: ten\r\n\r\n{}".as_bytes());
        assert!(matches!(
            read_message(&mut reader).await,
            Err(BridgeError::Connection(_))
        ));

        let mut reader = BufReader::new("Content-Type: text\r\n\r\n{}".as_bytes());
        assert!(matches!(
            read_message(&mut reader).await,
            Err(BridgeError::Connection(_))
        ));

        // A broken body is skipped whole, so the next message still parses
        let good = r#"{"jsonrpc":"2.0","method":"after"}"#;
        let raw = format!("Content-Length: 5\r\n\r\nnot{{}}Content-Length: {}\r\n\r\n{}", good.len(), good);
        let mut reader = BufReader::new(raw.as_bytes());
        assert!(matches!(
            read_message(&mut reader).await,
            Err(BridgeError::Serialization(_))
        ));
        let next = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(next.method(), Some("after"));
    }
}
