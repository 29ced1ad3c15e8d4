use serde::{Deserialize, Serialize};

/// A monitored entity grouping one or more probers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// Freeform identifier of the target
    pub id: String,

    /// Human readable name of the target
    #[serde(default)]
    pub name: String,

    /// Probers that run against this target, in scan order
    #[serde(default)]
    pub probers: Vec<ProberDescriptor>,
}

impl Target {
    /// Create a target without probers
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            probers: Vec::new(),
        }
    }

    /// Append a prober descriptor
    pub fn with_prober(mut self, descriptor: ProberDescriptor) -> Self {
        self.probers.push(descriptor);
        self
    }
}

/// Declarative configuration of one prober.
///
/// The `context` document is owned by the prober kind: the constructor
/// registered for `kind` decodes it into its own typed settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProberDescriptor {
    /// Freeform identifier of the prober, unique within its target
    pub id: String,

    /// Registered prober kind, e.g. `basic_http_prober`
    #[serde(alias = "name")]
    pub kind: String,

    /// Kind-specific settings
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ProberDescriptor {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            context,
        }
    }
}
