use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::queue::QueueItem;

/// Body of `POST /payments`.
#[derive(Debug, Deserialize)]
pub struct PaymentIntake {
    #[serde(rename = "correlationId")]
    pub correlation_id: Uuid,
    #[serde(deserialize_with = "exact_amount")]
    pub amount: Decimal,
}

/// Reads the amount as written. Numbers a `Decimal` cannot hold without
/// rounding are rejected rather than approximated.
fn exact_amount<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    let raw = number.to_string();
    Decimal::from_str_exact(&raw)
        .map_err(|e| serde::de::Error::custom(format!("amount {raw} is not an exact decimal: {e}")))
}

/// A payment attempt travelling through the queue graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub correlation_id: Uuid,
    pub amount: Decimal,
    pub enqueued_at: OffsetDateTime,
    pub reprocess_count: u32,
}

impl Message {
    pub fn new(correlation_id: Uuid, amount: Decimal, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id,
            amount,
            enqueued_at: now,
            reprocess_count: 0,
        }
    }
}

impl QueueItem for Message {
    fn item_id(&self) -> Uuid {
        self.id
    }
}
