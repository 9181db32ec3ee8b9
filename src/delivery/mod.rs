//! Delivery gateway contract.
//!
//! The transports (SMTP, SMS provider, push) live behind this seam. The
//! pipeline only needs `send(request) -> receipt`.

mod stream_gateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::DispatchContext;
use crate::domain::routing::DeliveryRequest;

pub use stream_gateway::StreamDeliveryGateway;

/// Gateway answer for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Delivery id assigned by the gateway, if any
    pub id: Option<String>,
    pub status: String,
    pub success: bool,
}

impl DeliveryReceipt {
    pub fn accepted(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            status: status.into(),
            success: true,
        }
    }

    pub fn rejected(status: impl Into<String>) -> Self {
        Self {
            id: None,
            status: status.into(),
            success: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Template {0} is not valid for sending")]
    TemplateNotSendable(String),
}

/// External delivery gateway.
///
/// A returned receipt with `success == false` counts as a failed route just
/// like an `Err`.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    async fn send(
        &self,
        ctx: &DispatchContext,
        request: &DeliveryRequest,
    ) -> Result<DeliveryReceipt, GatewayError>;
}
