//! Verification protocol
//!
//! JSON-RPC 2.0 messages exchanged with the verification server, and the
//! wire form of contracts they carry.
//!
//! # Methods
//!
//! | method               | params                         | result           |
//! |----------------------|--------------------------------|------------------|
//! | `session/connect`    | `{reset}`                      | `{session}`      |
//! | `module/load`        | `{session, path}`              | `{module}`       |
//! | `contract/verify`    | `{session, module, function, setup, execution, postconditions}` | `{status, diagnostic?}` |
//! | `session/disconnect` | `{session}`                    | `{}`             |

mod message;
pub mod transport;

pub use message::{
    decode_contract, decode_request, ArgumentMessage, ContractMessage, ExecutionMessage, LocatorMessage,
    ModuleHandle, PostconditionMessage, SetupMessage, ValueMessage, VerifyRequest,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Maximum message size in either direction (16 MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub const METHOD_CONNECT: &str = "session/connect";
pub const METHOD_LOAD_MODULE: &str = "module/load";
pub const METHOD_VERIFY: &str = "contract/verify";
pub const METHOD_DISCONNECT: &str = "session/disconnect";

const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;

/// Request envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest<P> {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: P,
}

impl<P: Serialize> RpcRequest<P> {
    pub fn new(id: u64, method: &str, params: P) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self)
            .map_err(|e| ProtocolError::malformed(format!("cannot encode request: {e}")))
    }
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<u64>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Parse a response to request `expected_id` and decode its result
    pub fn decode<R: DeserializeOwned>(text: &str, expected_id: u64) -> Result<R, ProtocolError> {
        let response: RpcResponse = serde_json::from_str(text)
            .map_err(|e| ProtocolError::malformed(format!("invalid JSON-RPC response: {e}")))?;

        // a null id is only legitimate when the server could not read the request's id
        let id_matches = match (response.id, &response.error) {
            (Some(id), _) => id == expected_id,
            (None, Some(error)) => matches!(error.code, PARSE_ERROR | INVALID_REQUEST),
            (None, None) => false,
        };
        if !id_matches {
            return Err(ProtocolError::malformed(format!(
                "response id {:?} does not match request id {expected_id}",
                response.id
            )));
        }
        if let Some(error) = response.error {
            return Err(ProtocolError::Server {
                code: error.code,
                message: error.message,
            });
        }

        let result = response
            .result
            .ok_or_else(|| ProtocolError::malformed("response has neither result nor error"))?;
        serde_json::from_value(result)
            .map_err(|e| ProtocolError::malformed(format!("unexpected result shape: {e}")))
    }
}

/// `session/connect` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectParams {
    pub reset: bool,
}

/// `session/connect` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectResult {
    pub session: String,
}

/// `module/load` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadModuleParams {
    pub session: String,
    pub path: String,
}

/// `module/load` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadModuleResult {
    pub module: ModuleHandle,
}

/// `contract/verify` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyParams {
    pub session: String,
    #[serde(flatten)]
    pub request: VerifyRequest,
}

/// `session/disconnect` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectParams {
    pub session: String,
}
