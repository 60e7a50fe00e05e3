//! HTTP fetch utilities and the durable dedup store for jobwatch.

pub mod dedup;
pub mod fetch;

pub use dedup::{DayCount, DedupStore, MemoryDedupStore, SourceCount, SqliteDedupStore, StoreError};
pub use fetch::{
    classify_reqwest_error, classify_status, BackoffPolicy, FetchError, FetchedResponse,
    HttpClientConfig, HttpFetcher, RetryDisposition, UserAgentPool, DEFAULT_USER_AGENTS,
};

pub const CRATE_NAME: &str = "jobwatch-storage";
