/// Maximum number of documents accumulated before a bulk write is issued
pub const DEFAULT_MAX_BULK_ITEMS: usize = 100;

/// Bulk write attempts before the batch is abandoned
pub const FLUSH_MAX_RETRIES: u32 = 3;

/// Delay between bulk write attempts (seconds)
pub const FLUSH_RETRY_DELAY_SECS: u64 = 2;

/// Per-request HTTP timeout for the document store and identity service (seconds)
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Progress update interval (tick every N records)
pub const PROGRESS_INTERVAL: u64 = 100;

/// Connector name reported to the identity service
pub const CONNECTOR_NAME: &str = "bugzilla";

/// Data source section consulted in the project map
pub const PROJECT_SOURCE: &str = "its";
