//! Event-Alerts turns on-chain contract activity into chat alerts.
//!
//! The pipeline has three stages:
//!
//! 1. An [`EventPoller`], built via [`EventPollerBuilder`], keeps log filters installed on a node for
//!    one set of events ([`EventGroup`]s) and polls them on a fixed interval. Each transaction is
//!    processed at most once within the window of its [`TxnDeduper`].
//! 2. The logs of every new transaction are decoded ([`LogDecoder`]) and split into
//!    [`ExecutionContext`]s: one per Tractor blueprint execution, delimited by its begin and end
//!    markers, plus one outer context for everything else. An [`AlertFormatter`] turns contexts
//!    into [`OutboundMessage`]s.
//! 3. An [`OutboundQueue`] delivers messages per channel through a [`ChannelSink`], batching them
//!    under the channel's payload limit and requeueing failures behind newer messages.
//!
//! # Ordering
//!
//! Within one poller, contexts are emitted in block order, then log-index order. Within one
//! channel, messages are delivered in enqueue order except for retried messages, which move behind
//! everything enqueued after them. There is no ordering across pollers or across channels.
//!
//! # Duplicates
//!
//! Nodes may return the same log twice, especially after filters are recreated. The poller drops
//! transactions its dedup cache has seen; the cache is bounded, so a transaction resurfacing after
//! more than `capacity` newer ones would be processed again.
//!
//! # Failures
//!
//! Only invalid configuration is returned as an error when building. Once running, RPC failures,
//! undecodable logs, unpaired markers and refused sends are logged and the affected unit of work is
//! skipped or retried; loops end only on cancellation.
//!
//! # Robust providers
//!
//! The [`robust_provider`] module provides [`robust_provider::RobustProvider`], a wrapper that
//! bounds, retries and fails over RPC calls across multiple endpoints. It implements
//! [`LogSource`], the capability the pipeline consumes.

#[macro_use]
mod logging;

pub mod events;
pub mod outbound;
pub mod robust_provider;
pub mod splitter;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod decoder;
mod dedup;
mod error;
mod filter_source;
mod log_source;
mod monitor;
mod poller;
mod registry;
mod types;

pub use decoder::LogDecoder;
pub use dedup::{DEFAULT_DEDUP_CAPACITY, TxnDeduper};
pub use error::PipelineError;
pub use events::{EventGroup, EventKind};
pub use filter_source::{
    DEFAULT_FILTER_CREATION_DELAY, DEFAULT_FILTER_CREATION_RETRIES, FilterHandle, LogFilterSource,
};
pub use log_source::{FilterId, LogSource};
pub use monitor::{AlertFormatter, spawn_alert_task};
pub use outbound::{
    ChannelConfig, ChannelId, ChannelSink, DispatchReport, OutboundMessage, OutboundQueue,
    OutboundQueueBuilder, SendError, Truncation,
};
pub use poller::{
    DEFAULT_POLL_INTERVAL, DEFAULT_STREAM_BUFFER_CAPACITY, EventPoller, EventPollerBuilder,
    PollerControl, PollerHandle, PollerStatus,
};
pub use registry::{EventRegistry, EventSignature, RegistryError};
pub use splitter::context_for_log_index;
pub use types::{
    ContextKind, CorrelationKey, DecodedLog, ExecutionContext, PollerState, RawLog, TxnEventBatch,
    TxnReceipt,
};
