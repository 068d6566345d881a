//! HTTP client construction.
//!
//! Two traffic profiles share one builder. Broker RPC gets the full
//! deadline and retry budget because a failed call costs the whole
//! tick; the fund-stats feeds get a tighter profile so a slow fund page
//! can only delay a tick, never eat it — their data is optional and a
//! gap in the snapshot is an acceptable outcome.

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientProfile {
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    min_backoff: Duration,
    max_backoff: Duration,
}

impl ClientProfile {
    /// Brokerage RPC traffic.
    pub fn broker() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_retries: 3,
            min_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }

    /// Fund-stats pages and endpoints. Best-effort data: give up early.
    pub fn feed() -> Self {
        Self {
            call_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
            max_retries: 2,
            min_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
        }
    }

    /// The deadline reported in timeout errors.
    pub fn call_timeout_ms(&self) -> u64 {
        self.call_timeout.as_millis() as u64
    }

    pub fn build(self) -> ClientWithMiddleware {
        let backoff = ExponentialBackoff::builder()
            .retry_bounds(self.min_backoff, self.max_backoff)
            .build_with_max_retries(self.max_retries);

        let inner = match Client::builder()
            .user_agent(concat!("tinvest-balancer/", env!("CARGO_PKG_VERSION")))
            .timeout(self.call_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
        {
            Ok(client) => client,
            // Builder failure means a broken TLS backend; a bare client
            // still lets the daemon limp along without custom deadlines.
            Err(_) => Client::new(),
        };

        ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(backoff))
            .build()
    }
}
