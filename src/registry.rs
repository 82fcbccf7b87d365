//! Name-keyed catalogs of pluggable implementations with single selection.
//!
//! A [`Registry`] maps unique names to implementation descriptors and tracks
//! at most one "currently selected" entry. Registration never overwrites:
//! a colliding name is rejected and the existing entry retained. Enumeration
//! is insertion-ordered and stable, so a configuration UI can present the
//! catalog in a deterministic order.
//!
//! The registry does selection bookkeeping only. Constructing the active
//! instance on selection and disposing it on deselection is the
//! orchestrator's job, triggered by observing a selection change — the
//! registry itself never touches instance lifecycles.
//!
//! Descriptors for the two catalogs used by the loop are boxed factory
//! closures taking a TOML parameter table, so the same registered
//! implementation can be instantiated with different parameters per run.
//!
//! # Thread Safety
//!
//! `Registry` carries no internal lock. When shared across threads it must
//! be guarded by a single external mutex covering map and selection
//! together, preserving the "selected implies present" invariant atomically;
//! [`crate::system::ControlSystem`] does exactly that.

use std::collections::HashMap;
use std::sync::Arc;
use toml::Value;
use tracing::warn;

use crate::core::{Analyzer, Controller};
use crate::error::{AppResult, ControlError};

/// Factory producing a fresh analyzer instance from a parameter table.
pub type AnalyzerFactory =
    Box<dyn Fn(&Value) -> AppResult<Arc<dyn Analyzer>> + Send + Sync>;

/// Factory producing a fresh controller instance from a parameter table.
pub type ControllerFactory =
    Box<dyn Fn(&Value) -> AppResult<Arc<dyn Controller>> + Send + Sync>;

/// Catalog of registered analyzer factories.
pub type AnalyzerRegistry = Registry<AnalyzerFactory>;

/// Catalog of registered controller factories.
pub type ControllerRegistry = Registry<ControllerFactory>;

/// A generic named-implementation catalog with single-selection semantics.
pub struct Registry<D> {
    entries: HashMap<String, D>,
    // Insertion order of `entries` keys, for stable enumeration.
    order: Vec<String>,
    selected: Option<String>,
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> Registry<D> {
    /// Creates an empty registry with nothing selected.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            selected: None,
        }
    }

    /// Registers a descriptor under a unique name.
    ///
    /// Fails with [`ControlError::DuplicateName`] if the name is already
    /// present; the existing entry is retained and the registry left
    /// unchanged.
    pub fn register(&mut self, name: impl Into<String>, descriptor: D) -> AppResult<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            warn!(%name, "duplicate registration rejected");
            return Err(ControlError::DuplicateName(name));
        }
        self.order.push(name.clone());
        self.entries.insert(name, descriptor);
        Ok(())
    }

    /// Registered names in insertion order.
    pub fn list(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Selects an entry by name, or clears the selection with `None`.
    ///
    /// Fails with [`ControlError::UnknownName`] if the name is not present;
    /// the previous selection is left unchanged. Selection bookkeeping only:
    /// no instance is constructed or destroyed here.
    pub fn select(&mut self, name: Option<&str>) -> AppResult<()> {
        match name {
            None => {
                self.selected = None;
                Ok(())
            }
            Some(name) => {
                if !self.entries.contains_key(name) {
                    return Err(ControlError::UnknownName(name.to_string()));
                }
                self.selected = Some(name.to_string());
                Ok(())
            }
        }
    }

    /// Currently selected name, if any. Always a registered name.
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Descriptor registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<&D> {
        self.entries.get(name)
    }

    /// Descriptor of the currently selected entry, if any.
    pub fn selected_descriptor(&self) -> Option<&D> {
        self.selected.as_deref().and_then(|n| self.entries.get(n))
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
