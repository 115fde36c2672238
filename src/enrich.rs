use crate::config;
use crate::dates;
use crate::identity::{Identity, IdentityService};
use crate::models::{BulkDoc, FieldValue, RawRecord, WrappedEntry};
use crate::projects::ProjectMap;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use url::Url;

/// Fields stored verbatim in the index so aggregations group on exact values.
const NOT_ANALYZED_FIELDS: &[&str] = &[
    "product",
    "component",
    "assigned_to",
    "author_org_name",
    "author_domain",
    "author_name",
    "origin",
];

/// A per-record-kind transform feeding the batch indexer.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Entity type segment of the bulk URL, e.g. `issues`.
    fn entity_type(&self) -> &'static str;

    /// Field mapping document installed at index creation; an empty object
    /// when the kind declares none.
    fn index_mappings(&self) -> Value;

    /// Transforms one raw record into a bulk document. `Ok(None)` drops the
    /// record with a warning and the run continues; errors are defects and
    /// abort the run.
    async fn enrich(&self, record: &RawRecord) -> Result<Option<BulkDoc>>;
}

/// Flattened analytics document for one issue.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedIssue {
    // Crawler bookkeeping, copied verbatim; null when the crawler omitted it.
    #[serde(rename = "metadata__updated_on")]
    pub updated_on: Option<Value>,
    #[serde(rename = "metadata__timestamp")]
    pub timestamp: Option<Value>,
    pub uuid: String,
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter: Option<String>,
    pub bug_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub component: String,
    pub product: String,
    pub creation_ts: String,
    pub delta_ts: String,
    /// Full offset-carrying rendering of `delta_ts`, kept for date histograms.
    pub changeddate_date: String,
    pub number_of_comments: u64,
    pub time_to_last_update_days: f64,
    pub url: String,
    #[serde(flatten)]
    pub identity: Option<IdentityFields>,
    #[serde(flatten)]
    pub project: Option<ProjectFields>,
}

/// Identity enrichment fields. The group appears only when an identity
/// service is configured; individual lookups that found nothing stay null.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentityFields {
    pub assigned_to_uuid: Option<String>,
    pub assigned_to_name: Option<String>,
    pub assigned_to_org_name: Option<String>,
    pub reporter_uuid: Option<String>,
    pub reporter_name: Option<String>,
    pub reporter_org_name: Option<String>,
    pub reporter_domain: Option<String>,
    pub author_uuid: Option<String>,
    pub author_name: Option<String>,
    pub author_org_name: Option<String>,
    pub author_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectFields {
    pub project: Option<String>,
}

/// Full enrichment for issue records: field unwrapping, date normalization,
/// derived metrics, and identity/project lookups.
pub struct IssueEnricher {
    identities: Option<Arc<dyn IdentityService>>,
    projects: Option<ProjectMap>,
}

impl IssueEnricher {
    pub fn new(identities: Option<Arc<dyn IdentityService>>, projects: Option<ProjectMap>) -> Self {
        Self {
            identities,
            projects,
        }
    }

    /// Transforms one raw issue into its flat document. Records without a
    /// `bug_id` field are dropped; any other missing or unusable mandatory
    /// field is a defect.
    pub async fn enrich_issue(&self, record: &RawRecord) -> Result<Option<EnrichedIssue>> {
        if !record.data.contains_key("bug_id") {
            warn!(uuid = %record.uuid, origin = %record.origin, "Dropped issue without bug_id");
            return Ok(None);
        }

        let bug_id = unwrap_text(record, "bug_id")?.to_string();
        let status = unwrap_text(record, "bug_status")?.to_string();
        let component = unwrap_text(record, "component")?.to_string();
        let product = unwrap_text(record, "product")?.to_string();

        let creation = dates::parse_date(unwrap_text(record, "creation_ts")?)
            .with_context(|| format!("Bad creation_ts in record {}", record.uuid))?;
        let updated = dates::parse_date(unwrap_text(record, "delta_ts")?)
            .with_context(|| format!("Bad delta_ts in record {}", record.uuid))?;

        let summary = record
            .data
            .get("short_desc")
            .and_then(|v| v.text())
            .map(str::to_string);
        let number_of_comments = record
            .data
            .get("long_desc")
            .map(|v| v.entries().len() as u64)
            .unwrap_or(0);

        let url = issue_url(&record.origin, &bug_id)
            .with_context(|| format!("Bad origin in record {}", record.uuid))?;

        let identity = match &self.identities {
            Some(service) => Some(resolve_people(record, service.as_ref()).await?),
            None => None,
        };
        let project = self.projects.as_ref().map(|map| ProjectFields {
            project: map.resolve(record).map(str::to_string),
        });

        Ok(Some(EnrichedIssue {
            updated_on: record.updated_on.clone(),
            timestamp: record.timestamp.clone(),
            uuid: record.uuid.clone(),
            origin: record.origin.clone(),
            assigned_to: display_name(record, "assigned_to"),
            reporter: display_name(record, "reporter"),
            bug_id,
            status,
            summary,
            component,
            product,
            creation_ts: dates::iso_wall_time(&creation),
            delta_ts: dates::iso_wall_time(&updated),
            changeddate_date: updated.to_rfc3339(),
            number_of_comments,
            time_to_last_update_days: dates::time_diff_days(&creation, &updated),
            url,
            identity,
            project,
        }))
    }
}

#[async_trait]
impl Enricher for IssueEnricher {
    fn entity_type(&self) -> &'static str {
        "issues"
    }

    fn index_mappings(&self) -> Value {
        let mut properties = Map::new();
        for field in NOT_ANALYZED_FIELDS {
            properties.insert(
                (*field).to_string(),
                json!({"type": "string", "index": "not_analyzed"}),
            );
        }
        json!({ "properties": properties })
    }

    async fn enrich(&self, record: &RawRecord) -> Result<Option<BulkDoc>> {
        let Some(issue) = self.enrich_issue(record).await? else {
            return Ok(None);
        };
        let body = serde_json::to_value(&issue).context("Failed to serialize enriched issue")?;
        Ok(Some(BulkDoc {
            id: issue.uuid,
            body,
        }))
    }
}

/// Pass-through transform for code review records. The only enrichment is
/// the `ocean-unique-id` field combining the review number with its origin.
pub struct ReviewFeeder;

#[async_trait]
impl Enricher for ReviewFeeder {
    fn entity_type(&self) -> &'static str {
        "reviews"
    }

    fn index_mappings(&self) -> Value {
        json!({})
    }

    async fn enrich(&self, record: &RawRecord) -> Result<Option<BulkDoc>> {
        let Some(number) = review_number(record) else {
            warn!(uuid = %record.uuid, origin = %record.origin, "Dropped review without number");
            return Ok(None);
        };
        let id = format!("{}_{}", number, record.origin);
        let mut body = serde_json::to_value(record).context("Failed to serialize review")?;
        if let Some(fields) = body.as_object_mut() {
            fields.insert("ocean-unique-id".to_string(), Value::String(id.clone()));
        }
        Ok(Some(BulkDoc { id, body }))
    }
}

/// All person identities appearing in one record, for pre-registration with
/// the identity service. Every activity event and comment carries its own
/// author fields; records without comments fall back to their assignment
/// fields.
pub fn issue_identities(record: &RawRecord) -> Vec<Identity> {
    let mut found = Vec::new();

    if let Some(activity) = record.data.get("activity") {
        for event in activity.entries() {
            found.push(Identity::from_fragment(&entry_fields(event)));
        }
    }

    if let Some(comments) = record.data.get("long_desc") {
        for comment in comments.entries() {
            found.push(Identity::from_fragment(&entry_fields(comment)));
        }
    } else if let Some(value) = record.data.get("assigned_to") {
        found.push(Identity::from_wrapped(value));
    } else if let Some(value) = record.data.get("reporter") {
        found.push(Identity::from_wrapped(value));
    } else if let Some(value) = record.data.get("qa_contact") {
        found.push(Identity::from_wrapped(value));
    }

    found
}

async fn resolve_people(
    record: &RawRecord,
    service: &dyn IdentityService,
) -> Result<IdentityFields> {
    let mut fields = IdentityFields::default();

    if let Some(value) = record.data.get("assigned_to") {
        let identity = Identity::from_wrapped(value);
        let uuid = service
            .resolve_uuid(&identity, config::CONNECTOR_NAME)
            .await?;
        let enrollments = service.enrollments(&uuid).await?;
        fields.assigned_to_org_name = enrollments.first().map(|e| e.organization.name.clone());
        fields.assigned_to_name = identity.name;
        fields.assigned_to_uuid = Some(uuid);
    }

    if let Some(value) = record.data.get("reporter") {
        let identity = Identity::from_wrapped(value);
        let uuid = service
            .resolve_uuid(&identity, config::CONNECTOR_NAME)
            .await?;
        let enrollments = service.enrollments(&uuid).await?;
        fields.reporter_org_name = enrollments.first().map(|e| e.organization.name.clone());
        fields.reporter_domain = identity.email_domain().map(str::to_string);
        fields.reporter_name = identity.name;
        fields.reporter_uuid = Some(uuid);
    }

    fields.author_uuid = fields.reporter_uuid.clone();
    fields.author_name = fields.reporter_name.clone();
    fields.author_org_name = fields.reporter_org_name.clone();
    fields.author_domain = fields.reporter_domain.clone();

    Ok(fields)
}

/// The sequence[0].`__text__` unwrap every scalar tracker field goes through.
fn unwrap_text<'a>(record: &'a RawRecord, field: &str) -> Result<&'a str> {
    record
        .data
        .get(field)
        .with_context(|| format!("Missing field '{field}' in record {}", record.uuid))?
        .text()
        .with_context(|| format!("Field '{field}' has no text in record {}", record.uuid))
}

/// Display name from a people field, only when entry 0 carries one.
fn display_name(record: &RawRecord, field: &str) -> Option<String> {
    record.data.get(field)?.entries().first()?.name.clone()
}

/// Canonical issue URL rebuilt from the origin's scheme and host, so
/// per-product origins all point at the tracker root.
fn issue_url(origin: &str, bug_id: &str) -> Result<String> {
    let parsed = Url::parse(origin).with_context(|| format!("Unparseable origin: {origin}"))?;
    let mut netloc = parsed.host_str().unwrap_or_default().to_string();
    if let Some(port) = parsed.port() {
        netloc = format!("{netloc}:{port}");
    }
    Ok(format!(
        "{}//{}/show_bug.cgi?id={}",
        parsed.scheme(),
        netloc,
        bug_id
    ))
}

fn entry_fields(entry: &WrappedEntry) -> HashMap<String, FieldValue> {
    serde_json::from_value(Value::Object(entry.extra.clone())).unwrap_or_default()
}

/// Review identifier from `data.number`, whichever shape the crawler stored:
/// a wrapped entry, a bare string, or a bare JSON number.
fn review_number(record: &RawRecord) -> Option<String> {
    match record.data.get("number")? {
        FieldValue::Scalar(number) => Some(number.clone()),
        FieldValue::Raw(Value::Number(number)) => Some(number.to_string()),
        value => value.text().map(str::to_string),
    }
}
