//! Robust, retrying wrapper around Alloy providers.
//!
//! This module exposes [`RobustProvider`], a small wrapper around Alloy's
//! [`RootProvider`](alloy::providers::RootProvider) that adds:
//! * bounded per-call timeouts
//! * retries driven by an explicit [`RetryPolicy`]
//! * transparent failover between a primary and one or more fallback providers
//!
//! It covers the RPC surface the alert pipeline needs: log filter management
//! (`eth_newFilter`, `eth_getFilterChanges`, `eth_getFilterLogs`, `eth_uninstallFilter`),
//! `eth_getLogs` and transaction receipts. [`RobustProvider<Ethereum>`] implements
//! [`LogSource`](crate::LogSource), which is how the rest of the crate consumes it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use alloy::providers::ProviderBuilder;
//! use event_alerts::robust_provider::RobustProviderBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let http = ProviderBuilder::new().connect("http://localhost:8545").await?;
//! let http_fallback = ProviderBuilder::new().connect("http://localhost:8546").await?;
//!
//! let robust = RobustProviderBuilder::new(http)
//!     .fallback(http_fallback)
//!     .call_timeout(Duration::from_secs(30))
//!     .build()
//!     .await?;
//! # Ok(()) }
//! ```

pub mod builder;
pub mod error;
pub mod provider;
pub mod provider_conversion;
pub mod retry;

pub use builder::*;
pub use error::Error;
pub use provider::RobustProvider;
pub use provider_conversion::{IntoRobustProvider, IntoRootProvider};
pub use retry::{Backoff, RetryPolicy};
