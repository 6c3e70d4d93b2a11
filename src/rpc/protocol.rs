//! JSON-RPC 2.0 protocol types.
//!
//! Implements the JSON-RPC 2.0 envelopes used on the wire. Parameters are
//! always positional; a keyed `params` object is rejected by [`Request::positional`].
//! See: https://www.jsonrpc.org/specification

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved notification a caller sends to cancel one of its in-flight requests.
pub const CANCEL_REQUEST_METHOD: &str = "$/cancelRequest";

/// Prefix shared by every reserved method name. Handlers cannot be registered under it.
pub const RESERVED_PREFIX: &str = "$/";

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// Domain error that carried no code of its own.
pub const UNKNOWN_ERROR: i32 = -32001;
/// The call was cancelled through `$/cancelRequest` (or its connection went away).
pub const REQUEST_CANCELLED: i32 = -32800;

const VERSION: &str = "2.0";

/// Request identifier. Callers may use integers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{n}"),
            Id::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Id {
    fn from(n: i64) -> Self {
        Id::Number(n)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

/// JSON-RPC 2.0 request object. Always carries an id and expects exactly one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: Id,
    pub method: String,
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 notification: a request without an id.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response object.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// `None` only for errors raised before an id could be read (parse errors).
    pub id: Option<Id>,
    pub outcome: Result<Value, RpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    /// Error code (see standard codes above)
    pub code: i32,
    /// Short error description
    pub message: String,
    /// Optional additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any message that can travel on a connection, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = Some(serde_json::to_value(data).unwrap_or(Value::Null));
        self
    }

    pub fn parse_error(details: impl fmt::Display) -> Self {
        Self::new(PARSE_ERROR, format!("Parse error: {details}"))
    }

    pub fn invalid_request(details: impl fmt::Display) -> Self {
        Self::new(INVALID_REQUEST, format!("Invalid request: {details}"))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(details: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, details)
    }

    pub fn internal_error(details: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, details)
    }

    pub fn cancelled() -> Self {
        Self::new(REQUEST_CANCELLED, "Request cancelled")
    }
}

impl Response {
    /// Create a success response with the given result.
    pub fn success(id: Id, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: Ok(result),
        }
    }

    /// Create an error response.
    pub fn error(id: Id, error: RpcError) -> Self {
        Self {
            id: Some(id),
            outcome: Err(error),
        }
    }

    /// Answer a frame that could not be decoded, echoing its id when it had one.
    pub fn rejected(err: &DecodeError) -> Self {
        Self {
            id: err.id().cloned(),
            outcome: Err(err.to_rpc_error()),
        }
    }
}

impl Request {
    pub fn new(id: impl Into<Id>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: Some(Value::Array(params)),
        }
    }

    /// The positional parameters of this request.
    pub fn positional(&self) -> Result<Vec<Value>, RpcError> {
        positional(self.params.as_ref())
    }
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params: Some(Value::Array(params)),
        }
    }

    pub fn positional(&self) -> Result<Vec<Value>, RpcError> {
        positional(self.params.as_ref())
    }
}

/// Absent params mean "no arguments"; anything but an array is refused.
fn positional(params: Option<&Value>) -> Result<Vec<Value>, RpcError> {
    match params {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => Ok(values.clone()),
        Some(Value::Object(_)) => Err(RpcError::invalid_params(
            "params must be a positional array, not an object",
        )),
        Some(other) => Err(RpcError::invalid_params(format!(
            "params must be a positional array, got {other}"
        ))),
    }
}

/// Flat wire shape shared by every message kind. Classification happens after parsing.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// Why an incoming text frame could not be turned into a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The text is not JSON at all.
    #[error("malformed JSON: {0}")]
    Json(#[source] serde_json::Error),
    /// Valid JSON whose fields do not have JSON-RPC types.
    #[error("{source}")]
    Structure {
        id: Option<Id>,
        #[source]
        source: serde_json::Error,
    },
    #[error("jsonrpc must be \"2.0\", got {version}")]
    Version { id: Option<Id>, version: String },
    #[error("{reason}")]
    Shape { id: Option<Id>, reason: &'static str },
}

impl DecodeError {
    /// The id of the offending message, when one could be read.
    pub fn id(&self) -> Option<&Id> {
        match self {
            DecodeError::Json(_) => None,
            DecodeError::Structure { id, .. }
            | DecodeError::Version { id, .. }
            | DecodeError::Shape { id, .. } => id.as_ref(),
        }
    }

    /// Parse error for unreadable text, invalid request for everything else.
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            DecodeError::Json(e) => RpcError::parse_error(e),
            other => RpcError::invalid_request(other),
        }
    }
}

impl Message {
    /// Decode a single JSON-RPC message from its text form.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
        let Value::Object(map) = value else {
            return Err(DecodeError::Shape {
                id: None,
                reason: "message must be a JSON object",
            });
        };

        let id = map.get("id").and_then(|id| Id::deserialize(id).ok());
        let shape = |reason: &'static str| DecodeError::Shape {
            id: id.clone(),
            reason,
        };

        match map.get("jsonrpc") {
            Some(Value::String(v)) if v == VERSION => {}
            Some(other) => {
                return Err(DecodeError::Version {
                    id: id.clone(),
                    version: other.to_string(),
                });
            }
            None => return Err(shape("missing \"jsonrpc\" member")),
        }

        // `"result": null` is a valid outcome, so presence is read from the object.
        let has_result = map.contains_key("result");
        let wire: WireMessage =
            serde_json::from_value(Value::Object(map)).map_err(|source| DecodeError::Structure {
                id: id.clone(),
                source,
            })?;

        match (wire.method, wire.id) {
            (Some(method), _) if method.is_empty() => Err(shape("method must not be empty")),
            (Some(method), Some(id)) => Ok(Message::Request(Request {
                id,
                method,
                params: wire.params,
            })),
            (Some(method), None) => Ok(Message::Notification(Notification {
                method,
                params: wire.params,
            })),
            (None, id) => match (has_result, wire.error) {
                (true, Some(_)) => Err(shape("response must not carry both result and error")),
                (false, Some(error)) => Ok(Message::Response(Response {
                    id,
                    outcome: Err(error),
                })),
                (true, None) if id.is_some() => Ok(Message::Response(Response {
                    id,
                    outcome: Ok(wire.result.unwrap_or(Value::Null)),
                })),
                (true, None) => Err(shape("result response must carry an id")),
                (false, None) => Err(shape("message has no method, result or error")),
            },
        }
    }

    /// Encode this message into its text form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let wire = match self {
            Message::Request(req) => WireMessage {
                jsonrpc: VERSION.to_string(),
                method: Some(req.method.clone()),
                params: Some(req.params.clone().unwrap_or(Value::Array(Vec::new()))),
                id: Some(req.id.clone()),
                result: None,
                error: None,
            },
            Message::Notification(note) => WireMessage {
                jsonrpc: VERSION.to_string(),
                method: Some(note.method.clone()),
                params: Some(note.params.clone().unwrap_or(Value::Array(Vec::new()))),
                id: None,
                result: None,
                error: None,
            },
            Message::Response(resp) => {
                let (result, error) = match &resp.outcome {
                    Ok(value) => (Some(value.clone()), None),
                    Err(err) => (None, Some(err.clone())),
                };
                WireMessage {
                    jsonrpc: VERSION.to_string(),
                    method: None,
                    params: None,
                    id: resp.id.clone(),
                    result,
                    error,
                }
            }
        };

        let mut value = serde_json::to_value(wire)?;
        // Error responses without a known id must still carry `"id": null`.
        if let (Message::Response(Response { id: None, .. }), Value::Object(map)) =
            (self, &mut value)
        {
            map.insert("id".to_string(), Value::Null);
        }
        serde_json::to_string(&value)
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Notification> for Message {
    fn from(note: Notification) -> Self {
        Message::Notification(note)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_request() {
        let json = r#"{"jsonrpc":"2.0","method":"InitializeAsync","params":["/tmp",{}],"id":1}"#;
        let msg = Message::decode(json).unwrap();

        match msg {
            Message::Request(req) => {
                assert_eq!(req.method, "InitializeAsync");
                assert_eq!(req.id, Id::Number(1));
                assert_eq!(req.positional().unwrap().len(), 2);
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_notification() {
        let json = r#"{"jsonrpc":"2.0","method":"$/cancelRequest","params":{"id":"abc"}}"#;
        let msg = Message::decode(json).unwrap();

        match msg {
            Message::Notification(note) => {
                assert_eq!(note.method, CANCEL_REQUEST_METHOD);
                assert_eq!(note.params, Some(json!({"id": "abc"})));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_response_with_null_result() {
        let json = r#"{"jsonrpc":"2.0","id":"x","result":null}"#;
        let msg = Message::decode(json).unwrap();
        assert_eq!(
            msg,
            Message::Response(Response::success(Id::from("x"), Value::Null))
        );
    }

    fn rejection(json: &str) -> Response {
        Response::rejected(&Message::decode(json).unwrap_err())
    }

    #[test]
    fn test_rejects_wrong_version() {
        let json = r#"{"jsonrpc":"1.0","method":"ping","id":5}"#;
        assert!(matches!(
            Message::decode(json),
            Err(DecodeError::Version { version, .. }) if version == "\"1.0\""
        ));

        let resp = rejection(json);
        assert_eq!(resp.id, Some(Id::Number(5)));
        assert_eq!(resp.outcome.unwrap_err().code, INVALID_REQUEST);
    }

    #[test]
    fn test_missing_version_is_invalid_request() {
        let resp = rejection(r#"{"method":"ping","id":"a"}"#);
        assert_eq!(resp.id, Some(Id::from("a")));
        assert_eq!(resp.outcome.unwrap_err().code, INVALID_REQUEST);
    }

    #[test]
    fn test_non_string_method_is_invalid_request() {
        let json = r#"{"jsonrpc":"2.0","id":6,"method":7}"#;
        assert!(matches!(Message::decode(json), Err(DecodeError::Structure { .. })));

        let resp = rejection(json);
        assert_eq!(resp.id, Some(Id::Number(6)));
        assert_eq!(resp.outcome.unwrap_err().code, INVALID_REQUEST);
    }

    #[test]
    fn test_rejects_shapeless_message() {
        let resp = rejection(r#"{"jsonrpc":"2.0"}"#);
        assert_eq!(resp.id, None);
        assert_eq!(resp.outcome.unwrap_err().code, INVALID_REQUEST);

        let resp = rejection("[1, 2]");
        assert_eq!(resp.outcome.unwrap_err().code, INVALID_REQUEST);
    }

    #[test]
    fn test_id_without_outcome_is_not_a_response() {
        let json = r#"{"jsonrpc":"2.0","id":1}"#;
        assert!(matches!(Message::decode(json), Err(DecodeError::Shape { .. })));

        let resp = rejection(json);
        assert_eq!(resp.id, Some(Id::Number(1)));
        assert_eq!(resp.outcome.unwrap_err().code, INVALID_REQUEST);
    }

    #[test]
    fn test_unreadable_text_is_parse_error() {
        assert!(matches!(Message::decode("{not json"), Err(DecodeError::Json(_))));

        let resp = rejection("{not json");
        assert_eq!(resp.id, None);
        assert_eq!(resp.outcome.unwrap_err().code, PARSE_ERROR);
    }

    #[test]
    fn test_keyed_params_are_invalid() {
        let req = Request {
            id: Id::Number(3),
            method: "ListEnvironmentsAsync".into(),
            params: Some(json!({"limit": 10})),
        };
        let err = req.positional().unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn test_missing_params_are_empty() {
        let req = Request {
            id: Id::Number(3),
            method: "GetVersionAsync".into(),
            params: None,
        };
        assert!(req.positional().unwrap().is_empty());
    }

    #[test]
    fn test_serialize_success_response() {
        let resp = Response::success(Id::Number(1), json!("ok"));
        let json = Message::from(resp).encode().unwrap();

        assert!(json.contains(r#""jsonrpc":"2.0""#));
        assert!(json.contains(r#""result":"ok""#));
        assert!(json.contains(r#""id":1"#));
        assert!(!json.contains("error"));
    }

    #[test]
    fn test_serialize_error_response() {
        let resp = Response::error(Id::from("abc"), RpcError::method_not_found("Unknown"));
        let json = Message::from(resp).encode().unwrap();

        assert!(json.contains(r#""code":-32601"#));
        assert!(json.contains("Method not found"));
        assert!(!json.contains("result"));
    }

    #[test]
    fn test_parse_error_has_null_id() {
        let err = Message::decode("{").unwrap_err();
        let json = Message::from(Response::rejected(&err)).encode().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], json!(PARSE_ERROR));
    }

    #[test]
    fn test_notification_always_sends_params_array() {
        let note = Notification {
            method: "$/invokeProxy/1/onCompleted".into(),
            params: None,
        };
        let value: Value = serde_json::from_str(&Message::from(note).encode().unwrap()).unwrap();
        assert_eq!(value["params"], json!([]));
        assert!(value.get("id").is_none());
    }
}
