//! Capabilities and the name-keyed registry.
//!
//! A capability is any plug-in that implements [`Capability`]. The registry also holds
//! registered chains so that a selection can name either; the invoker dispatches on
//! [`Handler`].

mod index;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chain::Chain;

pub use index::{description_words, name_parts, tokenize, CapabilityIndex};

/// Failure reported by a capability's own code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CapabilityError {
    pub message: String,
}

impl CapabilityError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A named unit of work with a uniform invocation contract.
///
/// `execute` is blocking; the invoker runs it on a bounded worker pool with a deadline.
pub trait Capability: Send + Sync {
    /// Unique name.
    fn name(&self) -> &str;
    /// What the capability does; indexed for selection.
    fn description(&self) -> &str;
    /// Hint on how to call it (argument shape).
    fn usage(&self) -> &str {
        ""
    }
    /// Run the capability.
    fn execute(&self, args: &Value) -> Result<String, CapabilityError>;
}

type CapabilityFn = dyn Fn(&Value) -> Result<String, CapabilityError> + Send + Sync;

/// Closure-backed capability.
///
/// ```
/// use dispatchlite_agent::capability::{Capability, FnCapability};
/// let echo = FnCapability::new("echo", "Repeat the input back", |args| {
///     Ok(args.as_str().unwrap_or_default().to_string())
/// });
/// assert_eq!(echo.execute(&serde_json::json!("hi")).unwrap(), "hi");
/// ```
pub struct FnCapability {
    name: String,
    description: String,
    usage: String,
    func: Box<CapabilityFn>,
}

impl FnCapability {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value) -> Result<String, CapabilityError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            usage: String::new(),
            func: Box::new(func),
        }
    }

    #[must_use]
    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }
}

impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn usage(&self) -> &str {
        &self.usage
    }

    fn execute(&self, args: &Value) -> Result<String, CapabilityError> {
        (self.func)(args)
    }
}

impl std::fmt::Debug for FnCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCapability")
            .field("name", &self.name)
            .finish()
    }
}

/// Cloneable description of a registered entry, used for prompts and scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
    pub usage: String,
    /// True when the entry is a registered chain.
    #[serde(default)]
    pub is_chain: bool,
}

impl CapabilityInfo {
    /// One catalogue line for oracle prompts.
    pub fn catalogue_line(&self) -> String {
        if self.usage.is_empty() {
            format!("- **{}**: {}", self.name, self.description)
        } else {
            format!("- **{}**: {} (usage: {})", self.name, self.description, self.usage)
        }
    }
}

/// Render a capability catalogue, or "None" when empty.
pub fn render_catalogue(infos: &[CapabilityInfo]) -> String {
    if infos.is_empty() {
        return "None".to_string();
    }
    infos
        .iter()
        .map(CapabilityInfo::catalogue_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// What a registry name resolves to.
#[derive(Clone)]
pub enum Handler {
    Capability(Arc<dyn Capability>),
    Chain(Arc<dyn Chain>),
}

impl Handler {
    fn info(&self) -> CapabilityInfo {
        match self {
            Handler::Capability(c) => CapabilityInfo {
                name: c.name().to_string(),
                description: c.description().to_string(),
                usage: c.usage().to_string(),
                is_chain: false,
            },
            Handler::Chain(c) => CapabilityInfo {
                name: c.name().to_string(),
                description: c.description().to_string(),
                usage: String::new(),
                is_chain: true,
            },
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: Vec<(CapabilityInfo, Handler)>,
    positions: HashMap<String, usize>,
    index: CapabilityIndex,
}

impl RegistryInner {
    fn insert(&mut self, handler: Handler) {
        let info = handler.info();
        if let Some(&pos) = self.positions.get(&info.name) {
            self.entries[pos] = (info, handler);
            let entries = self
                .entries
                .iter()
                .enumerate()
                .map(|(i, (info, _))| (i, info.name.as_str(), info.description.as_str()));
            let mut index = CapabilityIndex::new();
            index.rebuild(entries);
            self.index = index;
        } else {
            let pos = self.entries.len();
            self.index.add(pos, &info.name, &info.description);
            self.positions.insert(info.name.clone(), pos);
            self.entries.push((info, handler));
        }
    }
}

/// Name-keyed registry of capabilities and chains with a keyword index.
///
/// Shared between selector, invoker and facade behind an `Arc`; safe to extend while
/// requests are in flight.
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<RegistryInner>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a capability. A capability with the same name is replaced in place.
    pub fn register(&self, capability: Arc<dyn Capability>) {
        tracing::debug!(capability = %capability.name(), "Registering capability");
        self.write().insert(Handler::Capability(capability));
    }

    /// Register a chain under its own name.
    pub fn register_chain(&self, chain: Arc<dyn Chain>) {
        tracing::debug!(chain = %chain.name(), "Registering chain");
        self.write().insert(Handler::Chain(chain));
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        let inner = self.read();
        inner
            .positions
            .get(name)
            .map(|&pos| inner.entries[pos].1.clone())
    }

    /// Capability lookup (chains excluded).
    pub fn capability(&self, name: &str) -> Option<Arc<dyn Capability>> {
        match self.get(name)? {
            Handler::Capability(c) => Some(c),
            Handler::Chain(_) => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().positions.contains_key(name)
    }

    pub fn info(&self, name: &str) -> Option<CapabilityInfo> {
        let inner = self.read();
        inner
            .positions
            .get(name)
            .map(|&pos| inner.entries[pos].0.clone())
    }

    /// All entries in registration order.
    pub fn infos(&self) -> Vec<CapabilityInfo> {
        self.read().entries.iter().map(|(i, _)| i.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.read()
            .entries
            .iter()
            .map(|(i, _)| i.name.clone())
            .collect()
    }

    /// Candidate subset for `request` from the keyword index; every entry when no token matches.
    pub fn candidates(&self, request: &str) -> Vec<CapabilityInfo> {
        let inner = self.read();
        let hits = inner.index.lookup(request);
        if hits.is_empty() {
            return inner.entries.iter().map(|(i, _)| i.clone()).collect();
        }
        hits.into_iter()
            .map(|pos| inner.entries[pos].0.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("entries", &self.names())
            .finish()
    }
}
