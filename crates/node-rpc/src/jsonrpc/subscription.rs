use {
    super::{RpcRequest, hex},
    crate::{error::ProtocolError, models::BlockHeader},
    serde_json::{Value, json},
};

/// A push notification for an active subscription. Its identifier space is
/// unrelated to request ids.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionNotification {
    pub subscription: String,
    pub result: Value,
}

type Parser<T> = Box<dyn Fn(Value) -> Result<T, ProtocolError> + Send + Sync>;

/// A standing push channel: the `eth_subscribe` parameters plus the decoder
/// for every notification payload.
pub struct RpcSubscription<T> {
    params: Vec<Value>,
    parser: Parser<T>,
}

impl<T: 'static> RpcSubscription<T> {
    pub fn new<F>(params: Vec<Value>, parse: F) -> Self
    where
        F: Fn(Value) -> Result<T, ProtocolError> + Send + Sync + 'static,
    {
        Self {
            params,
            parser: Box::new(parse),
        }
    }
}

impl<T> RpcSubscription<T> {
    pub fn parse(&self, result: Value) -> Result<T, ProtocolError> {
        (self.parser)(result)
    }

    /// The `eth_subscribe` call establishing this subscription. Its result is
    /// the subscription identifier.
    pub fn subscribe_request(&self) -> RpcRequest<String> {
        RpcRequest::new("eth_subscribe", self.params.clone(), |value| {
            value.as_str().map(str::to_owned).ok_or(ProtocolError::InvalidShape {
                expected: "subscription id",
                value,
            })
        })
    }
}

impl RpcSubscription<BlockHeader> {
    /// Notifies about every new chain head.
    pub fn new_heads() -> Self {
        Self::new(vec![json!("newHeads")], super::deserialize)
    }
}

/// Convenience for subscriptions that only care about the head number.
pub fn new_head_numbers() -> RpcSubscription<u64> {
    RpcSubscription::new(vec![json!("newHeads")], |value| {
        let number = value.get("number").cloned().ok_or(ProtocolError::InvalidShape {
            expected: "block header",
            value,
        })?;
        hex::u64_quantity(number)
    })
}
