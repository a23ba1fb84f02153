use crate::core::errors::ExchangeError;
use crate::core::types::Symbol;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Default)]
struct Entries {
    by_instrument: HashMap<String, Symbol>,
    by_symbol: HashMap<Symbol, String>,
}

/// Instrument name registry, loaded once and read many times
///
/// Owned by whichever component resolves venue instrument names, typically
/// shared behind an `Arc` between a [`crate::orderbook::BookFeed`] and a
/// snapshot source.
#[derive(Debug, Default)]
pub struct SymbolStore {
    entries: OnceLock<Entries>,
}

impl SymbolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an already loaded store
    pub fn from_entries<I>(entries: I) -> Result<Self, ExchangeError>
    where
        I: IntoIterator<Item = (String, Symbol)>,
    {
        let store = Self::new();
        store.load(entries)?;
        Ok(store)
    }

    /// Populate the store; a second load is rejected
    pub fn load<I>(&self, entries: I) -> Result<(), ExchangeError>
    where
        I: IntoIterator<Item = (String, Symbol)>,
    {
        let mut loaded = Entries::default();
        for (instrument, symbol) in entries {
            if instrument.is_empty() {
                return Err(ExchangeError::InvalidParameters(
                    "instrument name cannot be empty".to_string(),
                ));
            }
            if let Some(existing) = loaded.by_instrument.get(&instrument) {
                if existing != &symbol {
                    return Err(ExchangeError::InvalidParameters(format!(
                        "instrument {} maps to both {} and {}",
                        instrument, existing, symbol
                    )));
                }
            }
            loaded.by_symbol.insert(symbol.clone(), instrument.clone());
            loaded.by_instrument.insert(instrument, symbol);
        }

        self.entries.set(loaded).map_err(|_| {
            ExchangeError::ConfigurationError("symbol store already loaded".to_string())
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.get().is_some()
    }

    /// Symbol for a venue instrument name
    pub fn resolve(&self, instrument: &str) -> Option<Symbol> {
        self.entries.get()?.by_instrument.get(instrument).cloned()
    }

    /// Venue instrument name for a symbol
    pub fn instrument(&self, symbol: &Symbol) -> Option<&str> {
        self.entries
            .get()?
            .by_symbol
            .get(symbol)
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.get().map_or(0, |e| e.by_instrument.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(instrument: &str, base: &str, quote: &str) -> (String, Symbol) {
        (instrument.to_string(), Symbol::new(base, quote).unwrap())
    }

    #[test]
    fn test_resolve_both_ways() {
        let store = SymbolStore::from_entries([
            entry("BTC-PERPETUAL", "BTC", "USD"),
            entry("ETH-PERPETUAL", "ETH", "USD"),
        ])
        .unwrap();

        let btc = Symbol::new("BTC", "USD").unwrap();
        assert_eq!(store.resolve("BTC-PERPETUAL"), Some(btc.clone()));
        assert_eq!(store.instrument(&btc), Some("BTC-PERPETUAL"));
        assert_eq!(store.resolve("SOL-PERPETUAL"), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_load_once() {
        let store = SymbolStore::new();
        assert!(!store.is_loaded());
        assert!(store.resolve("BTC-PERPETUAL").is_none());

        store.load([entry("BTC-PERPETUAL", "BTC", "USD")]).unwrap();
        assert!(matches!(
            store.load([entry("ETH-PERPETUAL", "ETH", "USD")]),
            Err(ExchangeError::ConfigurationError(_))
        ));
        assert_eq!(store.resolve("ETH-PERPETUAL"), None);
    }

    #[test]
    fn test_conflicting_entries_rejected() {
        let result = SymbolStore::from_entries([
            entry("BTC-PERPETUAL", "BTC", "USD"),
            entry("BTC-PERPETUAL", "BTC", "USDC"),
        ]);
        assert!(matches!(result, Err(ExchangeError::InvalidParameters(_))));
    }
}
