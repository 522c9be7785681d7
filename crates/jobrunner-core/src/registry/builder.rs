//! Registry construction and lookup.
//!
//! # Fail-fast
//! - Handlers are registered on `RegistryBuilder` at startup.
//! - `build()` checks "expected targets ⊆ registered targets" and freezes the
//!   result into a `Registry`, which has no way to add handlers afterwards.
//! - "Is this callable allowed?" is therefore a structural question: only
//!   registered targets resolve.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::handler::{Handler, JobHandler, TypedHandler, TypedJob};
use super::Signature;
use crate::error::JobError;

/// Errors raised while building a registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for target '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("invalid target name '{0}': use letters, digits, '_', '.', ':' or '-'")]
    InvalidTarget(String),

    #[error("invalid signature for target '{target}': {reason}")]
    InvalidSignature { target: String, reason: String },

    #[error("missing targets: {0:?}. These targets were expected but not registered.")]
    MissingTargets(Vec<String>),
}

/// One approved target: name, handler, accepted arguments.
#[derive(Clone)]
pub struct RegistryEntry {
    target: String,
    handler: Arc<dyn JobHandler>,
    signature: Signature,
}

impl RegistryEntry {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn handler(&self) -> &Arc<dyn JobHandler> {
        &self.handler
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("target", &self.target)
            .field("handler", &"dyn JobHandler")
            .field("signature", &self.signature)
            .finish()
    }
}

/// Mutable during initialization only.
///
/// ```ignore
/// let registry = Registry::builder()
///     .register_typed::<GenerateReport, _>(ReportHandler)?
///     .register("echo", handler_fn(echo), Signature::any())?
///     .expect_targets(&["report", "echo"])
///     .build()?;
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, RegistryEntry>,
    expected: Option<Vec<String>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        target: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        signature: Signature,
    ) -> Result<Self, RegistryError> {
        let target = target.into();
        if !is_valid_target(&target) {
            return Err(RegistryError::InvalidTarget(target));
        }
        if let Err(reason) = signature.check() {
            return Err(RegistryError::InvalidSignature { target, reason });
        }
        if self.entries.contains_key(&target) {
            return Err(RegistryError::AlreadyRegistered(target));
        }
        self.entries.insert(
            target.clone(),
            RegistryEntry {
                target,
                handler,
                signature,
            },
        );
        Ok(self)
    }

    /// Register a typed handler under `T::TARGET` with `T::signature()`.
    pub fn register_typed<T: TypedJob, H: Handler<T> + 'static>(
        self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.register(
            T::TARGET,
            Arc::new(TypedHandler::<T, H>::new(handler)),
            T::signature(),
        )
    }

    /// Targets that must be present when `build()` runs.
    pub fn expect_targets(mut self, targets: &[&str]) -> Self {
        self.expected = Some(targets.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Registry, RegistryError> {
        if let Some(expected) = &self.expected {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.entries.contains_key(*t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(RegistryError::MissingTargets(missing));
            }
        }
        Ok(Registry {
            entries: self.entries,
        })
    }
}

fn is_valid_target(target: &str) -> bool {
    !target.is_empty()
        && target
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
}

/// Frozen set of approved targets. Read-only; share it as `Arc<Registry>`.
#[derive(Debug)]
pub struct Registry {
    entries: HashMap<String, RegistryEntry>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn resolve(&self, target: &str) -> Result<&RegistryEntry, JobError> {
        self.entries
            .get(target)
            .ok_or_else(|| JobError::UnknownTarget(target.to_string()))
    }

    pub fn contains(&self, target: &str) -> bool {
        self.entries.contains_key(target)
    }

    /// Registered target names, sorted.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        targets.sort_unstable();
        targets
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
