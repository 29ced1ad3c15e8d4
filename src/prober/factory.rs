use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::http::{HTTP_PROBER_ALIAS, HTTP_PROBER_KIND, HttpProber};
use super::{Prober, ProberError};
use crate::target::ProberDescriptor;

/// Builds an un-initialized prober from its descriptor
pub type ProberConstructor =
    Arc<dyn Fn(&ProberDescriptor) -> Result<Box<dyn Prober>, ProberError> + Send + Sync>;

/// Registry of prober kinds.
///
/// Constructors must not perform I/O; probers only touch the network from
/// `connect` onwards.
#[derive(Clone, Default)]
pub struct ProberFactory {
    constructors: HashMap<String, ProberConstructor>,
}

impl ProberFactory {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in prober kinds
    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        for kind in [HTTP_PROBER_KIND, HTTP_PROBER_ALIAS] {
            factory.register(kind, |descriptor| {
                let prober = HttpProber::from_descriptor(descriptor)?;
                Ok(Box::new(prober) as Box<dyn Prober>)
            });
        }
        factory
    }

    /// Register a constructor for `kind`, replacing any previous one
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&ProberDescriptor) -> Result<Box<dyn Prober>, ProberError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
        self
    }

    /// Construct a fresh prober for the descriptor
    pub fn create(&self, descriptor: &ProberDescriptor) -> Result<Box<dyn Prober>, ProberError> {
        let constructor = self
            .constructors
            .get(&descriptor.kind)
            .ok_or_else(|| ProberError::UnsupportedProberKind(descriptor.kind.clone()))?;
        constructor(descriptor)
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl fmt::Debug for ProberFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProberFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}
