use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Wall-clock time to establish the transport connection, in milliseconds
pub const CONNECT_TIME: &str = "connect_time";
/// Wall-clock time of the probe call, in milliseconds
pub const RESPONSE_TIME: &str = "response_time";
/// Numeric response code of the probe call
pub const STATUS: &str = "status";
/// Whole days until the peer's leaf certificate expires
pub const CERTIFICATE_EXPIRATION: &str = "certificate_expiration";

/// Tag carrying the target identifier
pub const TAG_TARGET: &str = "target";
/// Tag carrying the prober identifier
pub const TAG_PROBER: &str = "prober";
/// Tag carrying the agent's host name
pub const TAG_HOST: &str = "host";
/// Tag carrying the agent's region
pub const TAG_REGION: &str = "region";

/// One observation produced by a prober
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    name: String,
    value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fields: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<BTreeMap<String, String>>,
}

impl MetricRecord {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
            fields: None,
            tags: None,
        }
    }

    /// Attach an auxiliary field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Attach a tag, replacing any previous value
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Attach a tag unless the record already carries one with that name
    pub fn with_default_tag(mut self, name: &str, value: &str) -> Self {
        let tags = self.tags.get_or_insert_with(BTreeMap::new);
        if !tags.contains_key(name) {
            tags.insert(name.to_string(), value.to_string());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn fields(&self) -> Option<&BTreeMap<String, serde_json::Value>> {
        self.fields.as_ref()
    }

    pub fn tags(&self) -> Option<&BTreeMap<String, String>> {
        self.tags.as_ref()
    }

    /// Look up a single tag
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .as_ref()
            .and_then(|tags| tags.get(name))
            .map(String::as_str)
    }
}
