use crate::config;
use crate::enrich::Enricher;
use crate::models::{BulkDoc, RawRecord};
use crate::store::DocumentStore;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Accumulator for one bulk request: alternating action and document lines.
struct Batch {
    buffer: String,
    len: usize,
    max_items: usize,
}

impl Batch {
    fn new(max_items: usize) -> Self {
        Self {
            buffer: String::new(),
            len: 0,
            max_items,
        }
    }

    /// Appends the action/document line pair for one document. The action
    /// line is serialized, not spliced, so ids cannot corrupt the framing.
    fn add(&mut self, doc: &BulkDoc) -> Result<()> {
        let action = serde_json::to_string(&json!({"index": {"_id": doc.id}}))?;
        let body = serde_json::to_string(&doc.body)?;
        self.buffer.push_str(&action);
        self.buffer.push('\n');
        self.buffer.push_str(&body);
        self.buffer.push('\n');
        self.len += 1;
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.len >= self.max_items
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn drain(&mut self) -> String {
        self.len = 0;
        std::mem::take(&mut self.buffer)
    }
}

/// Tuning knobs for one indexing run.
pub struct IndexerOptions {
    pub max_bulk_items: usize,
    /// Write attempts per flush; values below one are treated as one.
    pub flush_retries: u32,
    pub retry_delay_secs: u64,
    /// Enrich and count but send nothing to the store.
    pub dry_run: bool,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            max_bulk_items: config::DEFAULT_MAX_BULK_ITEMS,
            flush_retries: config::FLUSH_MAX_RETRIES,
            retry_delay_secs: config::FLUSH_RETRY_DELAY_SECS,
            dry_run: false,
        }
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub processed: u64,
    pub indexed: u64,
    pub dropped: u64,
    pub flushes: u64,
}

/// Streams raw records through an enricher into the store in bounded batches.
pub struct BatchIndexer {
    store: DocumentStore,
    enricher: Arc<dyn Enricher>,
    options: IndexerOptions,
}

impl BatchIndexer {
    pub fn new(store: DocumentStore, enricher: Arc<dyn Enricher>, options: IndexerOptions) -> Self {
        Self {
            store,
            enricher,
            options,
        }
    }

    /// Enriches and indexes every record in input order. A batch is flushed
    /// when it reaches the configured size, and once more at end of input
    /// when documents remain; an exhausted input issues no flush at all.
    pub async fn index_all(
        &self,
        records: impl Iterator<Item = RawRecord>,
    ) -> Result<IndexStats> {
        let mut stats = IndexStats::default();
        let mut batch = Batch::new(self.options.max_bulk_items);
        let spinner = make_spinner();

        for record in records {
            stats.processed += 1;
            if stats.processed % config::PROGRESS_INTERVAL == 0 {
                spinner.set_message(format!("{} records", stats.processed));
            }

            let Some(doc) = self.enricher.enrich(&record).await? else {
                stats.dropped += 1;
                continue;
            };
            batch.add(&doc)?;
            stats.indexed += 1;

            if batch.is_full() {
                self.flush(&mut batch, &mut stats).await?;
            }
        }

        if !batch.is_empty() {
            self.flush(&mut batch, &mut stats).await?;
        }

        spinner.finish_and_clear();
        Ok(stats)
    }

    async fn flush(&self, batch: &mut Batch, stats: &mut IndexStats) -> Result<()> {
        let items = batch.len;
        let body = batch.drain();
        stats.flushes += 1;
        debug!(items, flush = stats.flushes, "Flushing batch");

        if self.options.dry_run {
            return Ok(());
        }

        let delay = tokio::time::Duration::from_secs(self.options.retry_delay_secs);
        let max_retries = self.options.flush_retries.max(1);
        for attempt in 1..=max_retries {
            match self
                .store
                .bulk(self.enricher.entity_type(), body.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_retries => {
                    warn!(attempt, error = %e, "Bulk write failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "Bulk write failed after {max_retries} attempts ({items} documents)"
                        )
                    });
                }
            }
        }

        bail!("Bulk write failed after {max_retries} attempts ({items} documents)");
    }
}

fn make_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::IssueEnricher;
    use serde_json::Value;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn issue(uuid: &str, bug_id: Option<&str>) -> RawRecord {
        let mut data = json!({
            "bug_status": [{"__text__": "NEW"}],
            "product": [{"__text__": "Foo"}],
            "component": [{"__text__": "Bar"}],
            "creation_ts": [{"__text__": "2013-06-25 11:57:23 +0000"}],
            "delta_ts": [{"__text__": "2013-06-26 11:57:23 +0000"}]
        });
        if let Some(id) = bug_id {
            data["bug_id"] = json!([{"__text__": id}]);
        }
        serde_json::from_value(json!({
            "uuid": uuid,
            "origin": "https://bugs.example.com",
            "data": data
        }))
        .unwrap()
    }

    fn indexer(server_url: &str, options: IndexerOptions) -> BatchIndexer {
        let store = DocumentStore::new(&format!("{server_url}/bugzilla"), 5).unwrap();
        BatchIndexer::new(store, Arc::new(IssueEnricher::new(None, None)), options)
    }

    fn options(max_bulk_items: usize) -> IndexerOptions {
        IndexerOptions {
            max_bulk_items,
            retry_delay_secs: 0,
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // Batch accumulator
    // -----------------------------------------------------------------------

    #[test]
    fn batch_builds_line_pairs() {
        let mut batch = Batch::new(10);
        batch
            .add(&BulkDoc {
                id: "a1".to_string(),
                body: json!({"bug_id": "42"}),
            })
            .unwrap();

        assert!(!batch.is_empty());
        assert!(!batch.is_full());
        let body = batch.drain();
        assert!(batch.is_empty());

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        let doc: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(action["index"]["_id"], json!("a1"));
        assert_eq!(doc["bug_id"], json!("42"));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn batch_escapes_hostile_ids() {
        // An id with quotes and newlines must not break the line framing.
        let mut batch = Batch::new(10);
        batch
            .add(&BulkDoc {
                id: "a\"1\n2".to_string(),
                body: json!({}),
            })
            .unwrap();
        let body = batch.drain();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], json!("a\"1\n2"));
    }

    #[test]
    fn batch_full_at_max_items() {
        let mut batch = Batch::new(2);
        batch
            .add(&BulkDoc {
                id: "a".to_string(),
                body: json!({}),
            })
            .unwrap();
        assert!(!batch.is_full());
        batch
            .add(&BulkDoc {
                id: "b".to_string(),
                body: json!({}),
            })
            .unwrap();
        assert!(batch.is_full());
    }

    // -----------------------------------------------------------------------
    // Flush behavior
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn five_records_at_max_two_flush_three_times() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bugzilla/issues/_bulk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let records = (0..5).map(|i| issue(&format!("u{i}"), Some("42")));
        let stats = indexer(&server.uri(), options(2))
            .index_all(records)
            .await
            .unwrap();

        assert_eq!(stats.processed, 5);
        assert_eq!(stats.indexed, 5);
        assert_eq!(stats.flushes, 3);
        assert_eq!(stats.dropped, 0);

        // Batch sizes 2, 2, 1: four lines, four lines, two lines.
        let requests = server.received_requests().await.unwrap();
        let sizes: Vec<usize> = requests
            .iter()
            .map(|r| String::from_utf8_lossy(&r.body).lines().count())
            .collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn empty_input_issues_no_flush() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bugzilla/issues/_bulk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let stats = indexer(&server.uri(), options(2))
            .index_all(std::iter::empty())
            .await
            .unwrap();
        assert_eq!(stats, IndexStats::default());
    }

    #[tokio::test]
    async fn dropped_records_do_not_occupy_batch_slots() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bugzilla/issues/_bulk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let records = vec![
            issue("u1", Some("1")),
            issue("u2", None), // dropped: no bug_id
            issue("u3", Some("3")),
        ];
        let stats = indexer(&server.uri(), options(2))
            .index_all(records.into_iter())
            .await
            .unwrap();

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.indexed, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.flushes, 1);
    }

    #[tokio::test]
    async fn flush_failures_are_retried_then_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bugzilla/issues/_bulk"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let records = vec![issue("u1", Some("1"))];
        let result = indexer(&server.uri(), options(1))
            .index_all(records.into_iter())
            .await;

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn transient_failure_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bugzilla/issues/_bulk"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/bugzilla/issues/_bulk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let records = vec![issue("u1", Some("1"))];
        let stats = indexer(&server.uri(), options(1))
            .index_all(records.into_iter())
            .await
            .unwrap();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.indexed, 1);
    }

    #[tokio::test]
    async fn zero_retry_option_still_attempts_one_write() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bugzilla/issues/_bulk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let opts = IndexerOptions {
            max_bulk_items: 1,
            flush_retries: 0,
            retry_delay_secs: 0,
            ..Default::default()
        };
        let records = vec![issue("u1", Some("1"))];
        let stats = indexer(&server.uri(), opts)
            .index_all(records.into_iter())
            .await
            .unwrap();
        assert_eq!(stats.flushes, 1);
        assert_eq!(stats.indexed, 1);
    }

    #[tokio::test]
    async fn dry_run_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let opts = IndexerOptions {
            max_bulk_items: 2,
            dry_run: true,
            ..Default::default()
        };
        let records = (0..5).map(|i| issue(&format!("u{i}"), Some("42")));
        let stats = indexer(&server.uri(), opts).index_all(records).await.unwrap();

        assert_eq!(stats.indexed, 5);
        assert_eq!(stats.flushes, 3);
    }

    #[tokio::test]
    async fn enrichment_defects_abort_the_run() {
        let server = MockServer::start().await;
        let mut record = issue("u1", Some("1"));
        record.data.remove("bug_status");

        let result = indexer(&server.uri(), options(2))
            .index_all(vec![record].into_iter())
            .await;
        assert!(result.is_err());
    }
}
