use crate::models::FieldValue;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::RwLock;

/// A unified person identity extracted from tracker author fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
}

impl Identity {
    /// Builds an identity from whichever author-like keys a fragment carries.
    ///
    /// Keys are applied in a fixed order; when several are present, the later
    /// one wins for the fields it writes. Wrapped keys (`reporter`,
    /// `assigned_to`, `who`, `qa_contact`) take element 0 of the list: its
    /// `__text__` becomes the username (and the email when it contains `@`),
    /// its `name` attribute the display name. `Who` is a bare username
    /// scalar; `changed_by` a bare display-name scalar. Malformed shapes and
    /// missing nested keys contribute nothing.
    pub fn from_fragment(fields: &HashMap<String, FieldValue>) -> Identity {
        let mut identity = Identity::default();
        if let Some(value) = fields.get("reporter") {
            identity.apply_wrapped(value);
        }
        if let Some(value) = fields.get("assigned_to") {
            identity.apply_wrapped(value);
        }
        if let Some(value) = fields.get("who") {
            identity.apply_wrapped(value);
        }
        if let Some(FieldValue::Scalar(user)) = fields.get("Who") {
            identity.apply_user(user);
        }
        if let Some(value) = fields.get("qa_contact") {
            identity.apply_wrapped(value);
        }
        if let Some(FieldValue::Scalar(name)) = fields.get("changed_by") {
            identity.name = Some(name.clone());
        }
        identity
    }

    /// Identity from a single wrapped people field (element 0 of the list),
    /// for callers that already know which field they hold.
    pub fn from_wrapped(value: &FieldValue) -> Identity {
        let mut identity = Identity::default();
        identity.apply_wrapped(value);
        identity
    }

    fn apply_wrapped(&mut self, value: &FieldValue) {
        let Some(entry) = value.entries().first() else {
            return;
        };
        if let Some(text) = entry.text.as_deref() {
            self.apply_user(text);
        }
        if let Some(name) = entry.name.as_deref() {
            self.name = Some(name.to_string());
        }
    }

    fn apply_user(&mut self, user: &str) {
        self.username = Some(user.to_string());
        if user.contains('@') {
            self.email = Some(user.to_string());
        }
    }

    /// Domain of the identity's email: the text after the first `@`,
    /// `None` when there is no email or no `@`.
    pub fn email_domain(&self) -> Option<&str> {
        self.email.as_deref()?.split('@').nth(1)
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.username.is_none()
    }
}

/// An organization affiliation reported by the identity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub organization: Organization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
}

/// Maps identities to stable unique ids and organization affiliations.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn resolve_uuid(&self, identity: &Identity, source: &str) -> Result<String>;
    async fn enrollments(&self, uuid: &str) -> Result<Vec<Enrollment>>;
}

/// Registry-backed resolver used when no external identity service is
/// configured. Ids are content hashes of the JSON-encoded source and
/// identity, so repeated runs agree on them.
pub struct LocalIdentityService {
    domain_orgs: HashMap<String, String>,
    resolved: RwLock<HashMap<String, Identity>>,
}

impl LocalIdentityService {
    pub fn new() -> Self {
        Self {
            domain_orgs: HashMap::new(),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Loads a `{"example.com": "Example Corp"}` domain-to-organization map.
    pub fn with_domain_map(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read domain map: {}", path.display()))?;
        let domain_orgs: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid domain map: {}", path.display()))?;
        Ok(Self {
            domain_orgs,
            resolved: RwLock::new(HashMap::new()),
        })
    }
}

impl Default for LocalIdentityService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityService for LocalIdentityService {
    async fn resolve_uuid(&self, identity: &Identity, source: &str) -> Result<String> {
        // Hash the JSON encoding; escaping keeps field boundaries unambiguous.
        let canonical = serde_json::to_vec(&(source, identity))
            .context("Failed to encode identity for hashing")?;
        let uuid = format!("{:x}", Sha256::digest(&canonical));
        self.resolved
            .write()
            .await
            .insert(uuid.clone(), identity.clone());
        Ok(uuid)
    }

    async fn enrollments(&self, uuid: &str) -> Result<Vec<Enrollment>> {
        let resolved = self.resolved.read().await;
        let Some(identity) = resolved.get(uuid) else {
            return Ok(Vec::new());
        };
        let Some(domain) = identity.email_domain() else {
            return Ok(Vec::new());
        };
        match self.domain_orgs.get(domain) {
            Some(org) => Ok(vec![Enrollment {
                organization: Organization { name: org.clone() },
            }]),
            None => Ok(Vec::new()),
        }
    }
}

/// Client for an external identity service speaking
/// `POST /identities` and `GET /enrollments/{uuid}`.
pub struct HttpIdentityService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ResolveRequest<'a> {
    #[serde(flatten)]
    identity: &'a Identity,
    source: &'a str,
}

#[derive(Deserialize)]
struct ResolveResponse {
    uuid: String,
}

impl HttpIdentityService {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build identity service client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityService for HttpIdentityService {
    async fn resolve_uuid(&self, identity: &Identity, source: &str) -> Result<String> {
        let url = format!("{}/identities", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&ResolveRequest { identity, source })
            .send()
            .await
            .with_context(|| format!("Identity request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("Identity service rejected request: {url}"))?;
        let body: ResolveResponse = response
            .json()
            .await
            .context("Invalid identity service response")?;
        Ok(body.uuid)
    }

    async fn enrollments(&self, uuid: &str) -> Result<Vec<Enrollment>> {
        let url = format!("{}/enrollments/{uuid}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Enrollment request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("Identity service rejected request: {url}"))?;
        let body: Vec<Enrollment> = response
            .json()
            .await
            .context("Invalid enrollment response")?;
        Ok(body)
    }
}
