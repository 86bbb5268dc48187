//! Notification sink
//!
//! Published after commit, outside any lock. Delivery is fire-and-forget:
//! a failed publish is logged by the caller and never rolls anything back.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use types::ids::UserId;
use types::order::Side;
use types::risk::RiskAlert;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    OrderExecuted {
        user_id: UserId,
        symbol: String,
        quantity: u32,
        side: Side,
        avg_price: Decimal,
    },
    RiskAlert {
        user_id: UserId,
        alert: RiskAlert,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification channel closed")]
    ChannelClosed,

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

pub trait Notifier: Send + Sync {
    fn publish(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Publishes onto an unbounded channel drained by an async consumer
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn publish(&self, notification: Notification) -> Result<(), NotifyError> {
        self.tx
            .send(notification)
            .map_err(|_| NotifyError::ChannelClosed)
    }
}
