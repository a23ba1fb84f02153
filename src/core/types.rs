use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Typed errors for the value types in this module
#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),
    #[error("Invalid price: {0}")]
    InvalidPrice(#[from] rust_decimal::Error),
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),
}

/// Type-safe symbol representation with validation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    /// Create a new symbol with validation
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Result<Self, TypesError> {
        let base = base.into();
        let quote = quote.into();

        if base.is_empty() || quote.is_empty() {
            return Err(TypesError::InvalidSymbol(
                "Base and quote assets cannot be empty".to_string(),
            ));
        }

        Ok(Self { base, quote })
    }

    /// Concatenated form, e.g. `BTCUSDT`
    pub fn as_pair(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Type-safe price representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(#[serde(with = "rust_decimal::serde::str")] pub Decimal);

impl Price {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn parse(s: &str) -> Result<Self, TypesError> {
        Ok(Self(s.parse()?))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe quantity representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(#[serde(with = "rust_decimal::serde::str")] pub Decimal);

impl Quantity {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn parse(s: &str) -> Result<Self, TypesError> {
        let value: Decimal = s.parse()?;
        if value.is_sign_negative() && !value.is_zero() {
            return Err(TypesError::InvalidQuantity(format!(
                "quantity cannot be negative: {}",
                s
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One side entry of a book update. A zero size removes the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLevel {
    pub price: Price,
    pub size: Quantity,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self {
            price: Price(price),
            size: Quantity(size),
        }
    }
}

/// Exchanges send levels as `[price, size]` with either strings or bare numbers,
/// some prefix an action label.
#[derive(Deserialize)]
#[serde(untagged)]
enum LevelNumber {
    Text(String),
    Number(serde_json::Number),
}

impl LevelNumber {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for PriceLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut parts = Vec::<LevelNumber>::deserialize(deserializer)?.into_iter();
        let (price, size, action) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(price), Some(size), None, None) => (price, size, None),
            // Action-tagged form: ["new" | "change" | "delete", price, size]
            (Some(action), Some(price), Some(size), None) => {
                (price, size, Some(action.into_string()))
            }
            _ => return Err(de::Error::invalid_length(2, &"a [price, size] pair")),
        };

        let price = Price::parse(&price.into_string()).map_err(de::Error::custom)?;
        let size = match action.as_deref() {
            Some("delete") => Quantity(Decimal::ZERO),
            Some("new" | "change") | None => {
                Quantity::parse(&size.into_string()).map_err(de::Error::custom)?
            }
            Some(other) => {
                return Err(de::Error::custom(format!("unknown level action: {}", other)))
            }
        };
        Ok(Self { price, size })
    }
}

impl Serialize for PriceLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.price, self.size).serialize(serializer)
    }
}

/// Incremental book update, valid only on top of sequence `prev_seq`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub seq: u64,
    pub prev_seq: u64,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

/// Full book state as of `seq`, usually pulled over REST
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(alias = "lastUpdateId", alias = "change_id")]
    pub seq: u64,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub price: Price,
    pub quantity: Quantity,
}

/// Point-in-time view of a synchronized book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: Symbol,
    /// Descending by price
    pub bids: Vec<OrderBookEntry>,
    /// Ascending by price
    pub asks: Vec<OrderBookEntry>,
    pub last_update_id: u64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&OrderBookEntry> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderBookEntry> {
        self.asks.first()
    }
}
