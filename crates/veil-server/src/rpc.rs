use serde::{Deserialize, Serialize};

use veil_engine::EngineError;
use veil_store::StoreError;

/// One request frame from a client.
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: Option<serde_json::Value>,
}

/// Response frame: `{ id, success, result?, error?: { code, message } }`.
#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub id: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Error object; `code` is a stable string clients switch on.
#[derive(Debug, Serialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

pub const PARSE_ERROR: &str = "PARSE_ERROR";
pub const METHOD_NOT_FOUND: &str = "METHOD_NOT_FOUND";
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const NOT_FOUND: &str = "NOT_FOUND";
pub const FORBIDDEN: &str = "FORBIDDEN";
pub const RECOGNITION_CONFLICT: &str = "RECOGNITION_CONFLICT";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

impl RpcResponse {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(
        id: Option<serde_json::Value>,
        code: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(RpcError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn method_not_found(id: Option<serde_json::Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(id: Option<serde_json::Value>, msg: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, msg)
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error")
    }

    /// Map an engine failure onto the wire taxonomy. Store internals are
    /// summarized, never serialized verbatim.
    pub fn engine_error(id: Option<serde_json::Value>, e: &EngineError) -> Self {
        match e {
            EngineError::NotFound(msg) => Self::error(id, NOT_FOUND, msg.clone()),
            EngineError::Forbidden(msg) => Self::error(id, FORBIDDEN, msg.clone()),
            EngineError::RecognitionConflict(msg) => {
                Self::error(id, RECOGNITION_CONFLICT, msg.clone())
            }
            EngineError::Store(_) => Self::error(id, INTERNAL_ERROR, "internal error"),
        }
    }

    pub fn store_error(id: Option<serde_json::Value>, e: StoreError) -> Self {
        Self::engine_error(id, &EngineError::from(e))
    }
}

/// Extract a required string param.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing required parameter: {key}"))
}

/// Extract an optional string param.
pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// Extract an optional unsigned param, clamped to u32.
pub fn optional_u32(params: &serde_json::Value, key: &str) -> Option<u32> {
    params
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v.min(u64::from(u32::MAX)) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request() {
        let json = r#"{"method":"whisper.send","params":{"receiver_id":"user_b","content":"hi"},"id":1}"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "whisper.send");
        assert!(req.params.is_some());
        assert_eq!(req.id, Some(serde_json::json!(1)));
    }

    #[test]
    fn success_response_omits_error() {
        let resp = RpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({"ok": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn error_response_carries_string_code() {
        let resp = RpcResponse::error(Some(serde_json::json!(1)), FORBIDDEN, "nope");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "FORBIDDEN");
        assert_eq!(json["error"]["message"], "nope");
        assert!(json.get("result").is_none() || json["result"].is_null());
    }

    #[test]
    fn engine_errors_map_to_codes() {
        let cases = [
            (EngineError::NotFound("x".into()), NOT_FOUND),
            (EngineError::Forbidden("x".into()), FORBIDDEN),
            (
                EngineError::RecognitionConflict("x".into()),
                RECOGNITION_CONFLICT,
            ),
            (EngineError::Store("sqlite exploded".into()), INTERNAL_ERROR),
        ];
        for (err, code) in cases {
            let resp = RpcResponse::engine_error(None, &err);
            assert_eq!(resp.error.as_ref().unwrap().code, code);
        }
    }

    #[test]
    fn internal_error_hides_store_detail() {
        let resp = RpcResponse::engine_error(None, &EngineError::Store("disk I/O error".into()));
        assert_eq!(resp.error.as_ref().unwrap().message, "internal error");
    }

    #[test]
    fn parse_error_has_no_id() {
        let resp = RpcResponse::parse_error();
        assert!(resp.id.is_none());
        assert_eq!(resp.error.as_ref().unwrap().code, "PARSE_ERROR");
        assert!(!resp.success);
    }

    #[test]
    fn param_helpers() {
        let params = serde_json::json!({"name": "test", "limit": 5});
        assert_eq!(require_str(&params, "name").unwrap(), "test");
        assert!(require_str(&params, "missing").is_err());
        assert!(require_str(&params, "limit").is_err());
        assert_eq!(optional_str(&params, "name"), Some("test"));
        assert_eq!(optional_u32(&params, "limit"), Some(5));
        assert_eq!(optional_u32(&params, "missing"), None);
    }
}
