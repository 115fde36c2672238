//! Scarab: issue tracker enrichment and bulk indexing pipeline
//!
//! This crate turns raw issue tracker records into flat analytics documents
//! and bulk-loads them into an Elasticsearch-style index:
//!
//! 1. **Read Pass** -- Stream newline-delimited raw records from disk without
//!    loading the whole file
//! 2. **Enrich Pass** -- Flatten each record into a single-level document:
//!    parse timestamps, count comments, resolve author identities and
//!    affiliations, attach the project name
//! 3. **Index Pass** -- Accumulate documents into bulk batches and write them
//!    to the index with bounded retries
//!
//! # Architecture
//!
//! - **Streaming input** -- Records are read one line at a time; malformed
//!   lines are skipped with a warning
//! - **Pluggable enrichment** -- The [`enrich::Enricher`] trait separates
//!   full issue enrichment from the pass-through review feed
//! - **Identity resolution** -- Either a deterministic local hasher with an
//!   optional domain-to-organization map, or a remote identity service over
//!   HTTP; lookups are memoized per run
//! - **Bounded retry** -- Bulk writes retry a fixed number of times with a
//!   delay before the run aborts
//!
//! # Key Modules
//!
//! - [`source`] -- Streaming NDJSON record reader
//! - [`models`] -- Core data types (RawRecord, FieldValue, BulkDoc)
//! - [`dates`] -- Lenient timestamp parsing and day arithmetic
//! - [`identity`] -- Identity extraction and resolution services
//! - [`projects`] -- Origin-plus-product to project name mapping
//! - [`enrich`] -- Issue enrichment and the raw review feed
//! - [`indexer`] -- Batch accumulation and bulk flushing
//! - [`store`] -- HTTP client for the document store
//! - [`config`] -- Constants for batching, retries, and timeouts
//!
//! # Example Usage
//!
//! ```bash
//! # Create the index and install field mappings
//! scarab init --index-url http://localhost:9200/bugzilla
//!
//! # Enrich and index issue records
//! scarab run -i bugzilla.json --index-url http://localhost:9200/bugzilla \
//!     --projects-file projects.json
//!
//! # Feed raw review records without enrichment
//! scarab run -i reviews.json --index-url http://localhost:9200/gerrit --kind reviews
//! ```

pub mod config;
pub mod dates;
pub mod enrich;
pub mod identity;
pub mod indexer;
pub mod models;
pub mod projects;
pub mod source;
pub mod store;
