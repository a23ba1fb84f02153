use crate::core::errors::ExchangeError;
use crate::core::types::{Diff, PriceLevel, Snapshot};
use serde::Deserialize;
use serde_json::Value;

/// Payload of a book channel notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookUpdate {
    Snapshot(Snapshot),
    Diff(Diff),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookMessage {
    pub instrument: String,
    pub update: BookUpdate,
}

/// Wire shape, tagged by `type`
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawBookMessage {
    #[serde(alias = "partial")]
    Snapshot {
        #[serde(alias = "instrument_name", alias = "symbol")]
        instrument: String,
        #[serde(alias = "change_id")]
        seq: u64,
        #[serde(default)]
        bids: Vec<PriceLevel>,
        #[serde(default)]
        asks: Vec<PriceLevel>,
    },
    #[serde(alias = "change", alias = "update")]
    Diff {
        #[serde(alias = "instrument_name", alias = "symbol")]
        instrument: String,
        #[serde(alias = "change_id")]
        seq: u64,
        #[serde(alias = "prev_change_id")]
        prev_seq: u64,
        #[serde(default)]
        bids: Vec<PriceLevel>,
        #[serde(default)]
        asks: Vec<PriceLevel>,
    },
}

impl BookMessage {
    /// Validate and decode a notification payload
    pub fn from_value(value: &Value) -> Result<Self, ExchangeError> {
        let raw = RawBookMessage::deserialize(value).map_err(|e| {
            ExchangeError::DeserializationError(format!("Invalid book payload: {}", e))
        })?;

        let message = match raw {
            RawBookMessage::Snapshot {
                instrument,
                seq,
                bids,
                asks,
            } => Self {
                instrument,
                update: BookUpdate::Snapshot(Snapshot { seq, bids, asks }),
            },
            RawBookMessage::Diff {
                instrument,
                seq,
                prev_seq,
                bids,
                asks,
            } => {
                if seq < prev_seq {
                    return Err(ExchangeError::DeserializationError(format!(
                        "Invalid book payload: seq {} precedes prev_seq {}",
                        seq, prev_seq
                    )));
                }
                Self {
                    instrument,
                    update: BookUpdate::Diff(Diff {
                        seq,
                        prev_seq,
                        bids,
                        asks,
                    }),
                }
            }
        };

        if message.instrument.is_empty() {
            return Err(ExchangeError::DeserializationError(
                "Invalid book payload: empty instrument".to_string(),
            ));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_decode_diff() {
        let message = BookMessage::from_value(&json!({
            "type": "diff",
            "instrument": "BTC-PERP",
            "seq": 3,
            "prev_seq": 2,
            "bids": [["10", "1"]],
        }))
        .unwrap();

        assert_eq!(message.instrument, "BTC-PERP");
        let BookUpdate::Diff(diff) = message.update else {
            panic!("expected diff");
        };
        assert_eq!(diff.prev_seq, 2);
        assert_eq!(diff.bids, vec![PriceLevel::new(dec!(10), dec!(1))]);
        assert!(diff.asks.is_empty());
    }

    #[test]
    fn test_decode_snapshot_with_aliases() {
        let message = BookMessage::from_value(&json!({
            "type": "partial",
            "instrument_name": "ETH-PERP",
            "change_id": 42,
            "asks": [[2000.5, 3]],
        }))
        .unwrap();

        assert_eq!(
            message.update,
            BookUpdate::Snapshot(Snapshot {
                seq: 42,
                bids: Vec::new(),
                asks: vec![PriceLevel::new(dec!(2000.5), dec!(3))],
            })
        );
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let cases = [
            json!({"type": "trade", "instrument": "X", "seq": 1}),
            json!({"type": "diff", "instrument": "X", "seq": 1}),
            json!({"type": "diff", "instrument": "X", "seq": 1, "prev_seq": 2}),
            json!({"type": "snapshot", "instrument": "", "seq": 1}),
            json!({"type": "snapshot", "instrument": "X", "seq": 1, "bids": [["1", "-2"]]}),
            json!(["not", "an", "object"]),
        ];
        for case in cases {
            assert!(
                matches!(
                    BookMessage::from_value(&case),
                    Err(ExchangeError::DeserializationError(_))
                ),
                "accepted {}",
                case
            );
        }
    }
}
