pub mod symbol_store;

pub use symbol_store::SymbolStore;
