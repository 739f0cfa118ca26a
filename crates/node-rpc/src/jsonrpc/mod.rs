//! Typed JSON-RPC requests and the wire envelope around them.

pub mod hex;
pub mod methods;
pub mod subscription;

use {
    crate::error::{Error, ProtocolError, RpcFault},
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::{borrow::Cow, fmt},
};

pub use self::subscription::{RpcSubscription, SubscriptionNotification};

pub type RequestId = u64;

/// Method name and positional parameters of one RPC call. The id is only
/// assigned by the transport when the call is sent.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcCall {
    pub method: Cow<'static, str>,
    pub params: Vec<Value>,
}

impl RpcCall {
    pub fn new(method: impl Into<Cow<'static, str>>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Serializes the call into a request envelope carrying `id`.
    pub fn to_json(&self, id: RequestId) -> String {
        let envelope = Envelope {
            jsonrpc: "2.0",
            method: &self.method,
            params: &self.params,
            id,
        };
        // Serializing borrowed strings and JSON values can't fail.
        serde_json::to_string(&envelope).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: &'a [Value],
    id: RequestId,
}

/// A decoded response to a request.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcResponse {
    /// `result` is `None` when the member is absent or `null`.
    Success {
        id: RequestId,
        result: Option<Value>,
    },
    Error {
        id: RequestId,
        fault: RpcFault,
    },
}

impl RpcResponse {
    pub fn id(&self) -> RequestId {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => *id,
        }
    }

    pub fn fault(&self) -> Option<&RpcFault> {
        match self {
            Self::Success { .. } => None,
            Self::Error { fault, .. } => Some(fault),
        }
    }

    pub fn from_str(text: &str) -> Result<Self, ProtocolError> {
        match Incoming::from_str(text)? {
            Incoming::Response(response) => Ok(response),
            Incoming::Notification(notification) => Err(ProtocolError::MalformedResponse(
                format!("unexpected notification for {}", notification.subscription),
            )),
        }
    }
}

/// Anything a node can push over a connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    Response(RpcResponse),
    Notification(SubscriptionNotification),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RawFault>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<RawNotificationParams>,
}

#[derive(Deserialize)]
struct RawFault {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct RawNotificationParams {
    subscription: String,
    #[serde(default)]
    result: Value,
}

impl Incoming {
    pub fn from_str(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawMessage = serde_json::from_str(text)
            .map_err(|err| ProtocolError::MalformedResponse(format!("{err}: {}", text.trim())))?;

        if let (Some(method), Some(params)) = (&raw.method, raw.params) {
            if method.ends_with("_subscription") {
                return Ok(Self::Notification(SubscriptionNotification {
                    subscription: params.subscription,
                    result: params.result,
                }));
            }
        }

        let id = match raw.id {
            Some(Value::Number(number)) => number
                .as_u64()
                .ok_or_else(|| ProtocolError::UnexpectedId(Value::Number(number)))?,
            Some(other) => return Err(ProtocolError::UnexpectedId(other)),
            None => {
                return Err(ProtocolError::MalformedResponse(format!(
                    "response without id: {}",
                    text.trim()
                )));
            }
        };

        Ok(Self::Response(match raw.error {
            Some(fault) => RpcResponse::Error {
                id,
                fault: RpcFault {
                    code: fault.code,
                    message: fault.message,
                    data: fault.data,
                },
            },
            None => RpcResponse::Success {
                id,
                result: raw.result,
            },
        }))
    }
}

type Parser<T> = Box<dyn Fn(Option<Value>) -> Result<T, ProtocolError> + Send + Sync>;

/// A typed RPC request: the call plus the function decoding its result.
pub struct RpcRequest<T> {
    call: RpcCall,
    parser: Parser<T>,
}

impl<T: 'static> RpcRequest<T> {
    /// A request whose result must be present.
    pub fn new<F>(method: impl Into<Cow<'static, str>>, params: Vec<Value>, parse: F) -> Self
    where
        F: Fn(Value) -> Result<T, ProtocolError> + Send + Sync + 'static,
    {
        Self {
            call: RpcCall::new(method, params),
            parser: Box::new(move |result| parse(result.ok_or(ProtocolError::MissingResult)?)),
        }
    }

    /// A request whose result may legitimately be `null` (unknown
    /// transaction, missing block, ...).
    pub fn nullable<F>(
        method: impl Into<Cow<'static, str>>,
        params: Vec<Value>,
        parse: F,
    ) -> RpcRequest<Option<T>>
    where
        F: Fn(Value) -> Result<T, ProtocolError> + Send + Sync + 'static,
    {
        RpcRequest {
            call: RpcCall::new(method, params),
            parser: Box::new(move |result| result.map(&parse).transpose()),
        }
    }
}

impl<T> RpcRequest<T> {
    pub fn call(&self) -> &RpcCall {
        &self.call
    }

    pub fn method(&self) -> &str {
        &self.call.method
    }

    /// Decodes the raw `result` member of a successful response.
    pub fn parse(&self, result: Option<Value>) -> Result<T, ProtocolError> {
        (self.parser)(result)
    }

    /// Decodes a response, turning a node fault into [`Error::Rpc`].
    pub fn parse_response(&self, response: RpcResponse) -> Result<T, Error> {
        match response {
            RpcResponse::Success { result, .. } => Ok(self.parse(result)?),
            RpcResponse::Error { fault, .. } => Err(Error::Rpc(fault)),
        }
    }
}

impl<T> fmt::Debug for RpcRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRequest")
            .field("method", &self.call.method)
            .field("params", &self.call.params)
            .finish()
    }
}

/// Parser for requests returning arbitrary JSON or a `serde` type.
pub fn deserialize<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value.clone()).map_err(|_| ProtocolError::InvalidShape {
        expected: std::any::type_name::<T>(),
        value,
    })
}
