//! Translation between HTTP bodies and commands.
//!
//! A request body is a JSON object with a reserved `ten` header:
//!
//! ```json
//! {"ten": {"name": "test", "dest": "test_extension", "id": "abc"}, "count": 2}
//! ```
//!
//! `ten.name` is required. Every other top-level field becomes the command
//! payload.

use exthost_runtime::{Command, RuntimeError};
use http::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Command name that stops the host instead of being routed.
pub const CLOSE_APP: &str = "close_app";

const HEADER: &str = "ten";

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    #[serde(default)]
    dest: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// What a well-formed request asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum IngressRequest {
    /// Route a command and answer with its result.
    Command(Command),
    /// Stop the host.
    Close,
}

/// Coarse classification of a failed request.
///
/// Responses carry only the class; details stay in the server log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    BadRequest,
    NotFound,
    Unavailable,
    Timeout,
    Internal,
}

impl FailureClass {
    pub fn status(self) -> StatusCode {
        match self {
            FailureClass::BadRequest => StatusCode::BAD_REQUEST,
            FailureClass::NotFound => StatusCode::NOT_FOUND,
            FailureClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            FailureClass::Timeout => StatusCode::GATEWAY_TIMEOUT,
            FailureClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(self) -> &'static str {
        match self {
            FailureClass::BadRequest => "bad request",
            FailureClass::NotFound => "not found",
            FailureClass::Unavailable => "service unavailable",
            FailureClass::Timeout => "timeout",
            FailureClass::Internal => "internal error",
        }
    }

    /// Classify a failed send.
    pub fn of(error: &RuntimeError) -> Self {
        match error {
            RuntimeError::NoRoute { .. } | RuntimeError::ExtensionNotFound(_) => {
                FailureClass::NotFound
            }
            RuntimeError::LifecycleViolation { .. } => FailureClass::Unavailable,
            RuntimeError::Timeout { .. } => FailureClass::Timeout,
            RuntimeError::DuplicateId { .. } => FailureClass::BadRequest,
            _ => FailureClass::Internal,
        }
    }
}

/// Parse a request body into a command.
///
/// Without `ten.dest` the command goes to `default_target`, or is left for
/// the router to reject when there is none.
pub fn parse_request(
    body: &[u8],
    default_target: Option<&str>,
) -> Result<IngressRequest, FailureClass> {
    let value: Value = serde_json::from_slice(body).map_err(|_| FailureClass::BadRequest)?;
    let Value::Object(mut fields) = value else {
        return Err(FailureClass::BadRequest);
    };
    let header = fields.remove(HEADER).ok_or(FailureClass::BadRequest)?;
    let header: Header = serde_json::from_value(header).map_err(|_| FailureClass::BadRequest)?;
    if header.name.is_empty() {
        return Err(FailureClass::BadRequest);
    }
    if header.name == CLOSE_APP {
        return Ok(IngressRequest::Close);
    }

    let payload = if fields.is_empty() {
        Value::Null
    } else {
        Value::Object(fields)
    };
    let mut cmd = Command::new(header.name).with_payload(payload);
    if let Some(id) = header.id {
        cmd = cmd.with_id(id);
    }
    if let Some(dest) = header.dest.as_deref().or(default_target) {
        cmd = cmd.with_dest(dest);
    }
    Ok(IngressRequest::Command(cmd))
}

/// Rebuild a request body from a command. Used by clients and tests.
pub fn request_body(cmd: &Command) -> Value {
    let mut header = Map::new();
    header.insert("name".to_string(), Value::String(cmd.name.clone()));
    if let Some(dest) = &cmd.dest {
        header.insert("dest".to_string(), Value::String(dest.clone()));
    }
    if let Some(id) = &cmd.id {
        header.insert("id".to_string(), Value::String(id.to_string()));
    }

    let mut body = match &cmd.payload {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    body.insert(HEADER.to_string(), Value::Object(header));
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use exthost_runtime::{CommandId, LifecycleState};
    use serde_json::json;

    fn parse(body: Value, target: Option<&str>) -> Result<IngressRequest, FailureClass> {
        parse_request(body.to_string().as_bytes(), target)
    }

    #[test]
    fn minimal_request_uses_default_target() {
        let req = parse(json!({"ten": {"name": "test"}}), Some("test_extension")).unwrap();
        let IngressRequest::Command(cmd) = req else {
            panic!("expected a command");
        };
        assert_eq!(cmd.name, "test");
        assert_eq!(cmd.dest.as_deref(), Some("test_extension"));
        assert_eq!(cmd.payload, Value::Null);
        assert!(cmd.id.is_none());
    }

    #[test]
    fn header_fields_and_payload() {
        let req = parse(
            json!({"ten": {"name": "hello", "dest": "responder", "id": "abc"}, "count": 2}),
            Some("test_extension"),
        )
        .unwrap();
        let IngressRequest::Command(cmd) = req else {
            panic!("expected a command");
        };
        assert_eq!(cmd.dest.as_deref(), Some("responder"));
        assert_eq!(cmd.id, Some(CommandId::from("abc")));
        assert_eq!(cmd.payload, json!({"count": 2}));
    }

    #[test]
    fn close_app_is_not_routed() {
        assert_eq!(
            parse(json!({"ten": {"name": "close_app"}}), None).unwrap(),
            IngressRequest::Close
        );
    }

    #[test]
    fn malformed_requests_are_bad_requests() {
        assert_eq!(
            parse_request(b"{not json", None),
            Err(FailureClass::BadRequest)
        );
        for body in [
            json!([1, 2]),
            json!({"name": "test"}),
            json!({"ten": {}}),
            json!({"ten": {"name": 3}}),
            json!({"ten": {"name": ""}}),
        ] {
            assert_eq!(parse(body, None), Err(FailureClass::BadRequest));
        }
    }

    #[test]
    fn request_body_inverts_parse() {
        let cmd = Command::new("hello")
            .with_dest("responder")
            .with_payload(json!({"count": 2}));
        let body = request_body(&cmd).to_string();
        let IngressRequest::Command(parsed) = parse_request(body.as_bytes(), None).unwrap() else {
            panic!("expected a command");
        };
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn failure_classes() {
        let id = CommandId::from("x");
        assert_eq!(
            FailureClass::of(&RuntimeError::NoRoute {
                from: "ingress".to_string(),
                command: "test".to_string(),
            }),
            FailureClass::NotFound
        );
        assert_eq!(
            FailureClass::of(&RuntimeError::LifecycleViolation {
                extension: "a".to_string(),
                state: LifecycleState::Stopping,
                operation: "dispatch",
            }),
            FailureClass::Unavailable
        );
        assert_eq!(
            FailureClass::of(&RuntimeError::Timeout {
                id: id.clone(),
                after: std::time::Duration::from_secs(1),
            }),
            FailureClass::Timeout
        );
        assert_eq!(
            FailureClass::of(&RuntimeError::Cancelled { id }),
            FailureClass::Internal
        );
        assert_eq!(FailureClass::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
