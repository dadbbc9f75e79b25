//! Declarative async query / data-loader built on the signal core (spec
//! §4.7): a reactive key function plus a fetcher produces a data/loading/
//! error triple with in-flight dedup, staleness, retry, and stale-response
//! discard via a per-query generation counter.
//!
//! [`QueryClient`] is the cross-query cache; [`use_query`] resolves one
//! through [`reactive_core::Injector`] unless a caller supplies its own
//! (spec §9's "query client ownership" split between an app-wide singleton
//! and a standalone local client for tests).

pub mod client;
pub mod error;
pub mod query;

pub use client::QueryClient;
pub use error::QueryError;
pub use query::{use_query, QueryFetcher, QueryFuture, QueryHandle, QueryOptions};

/// Commonly used types for declaring queries.
pub mod prelude {
    pub use crate::{use_query, QueryClient, QueryError, QueryHandle, QueryOptions};
}
