// Fund statistics feeds (AUM, shares outstanding)
pub mod feeds;

// Shared retrying HTTP client
pub mod http_client_factory;

// Persisted per-ticker metrics files
pub mod metrics_store;

// Test/mock doubles for the broker and feeds
pub mod mock;

// T-Invest REST adapter
pub mod tinvest;
