//! Remote HTTP client with bounded retries, plus the relational snapshot store.

pub mod http;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod pg;
pub mod repo;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use http::{
    classify_status, ApiError, BackoffPolicy, ClientConfig, HttpMethod, HttpTransport,
    ReqwestTransport, RetryDisposition, RetryingClient, Sleeper, TokioSleeper,
};
pub use pg::PgStore;
pub use repo::{SnapshotStore, SnapshotWrite, StoreError};

pub const CRATE_NAME: &str = "onefocus-storage";
