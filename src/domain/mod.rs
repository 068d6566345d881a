// Domain-specific error types
pub mod errors;

// Instrument catalog
pub mod instrument;

// Auxiliary market data (AUM, market cap, shares, FX)
pub mod market_data;

// Fixed-point money
pub mod money;

// Port interfaces
pub mod ports;

// Wallet and positions
pub mod position;

// Ticker canonicalization
pub mod ticker;
