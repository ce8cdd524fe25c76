//! # Table Field Catalog
//!
//! Resolves a target (`logs`, `logs-*`, `a,b`) to physical tables and tells
//! which attributes each one has. Field sets only matter when a target spans
//! more than one table.

use crate::error::{AggError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Attributes of one physical table. The flag says whether the attribute
/// can be grouped and aggregated on (full-text fields cannot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFields {
    pub name: String,
    pub fields: BTreeMap<String, bool>,
}

impl TableFields {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: &str, aggregatable: bool) -> Self {
        self.fields.insert(field.to_string(), aggregatable);
        self
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn is_aggregatable(&self, field: &str) -> bool {
        self.fields.get(field).copied().unwrap_or(false)
    }
}

// =============================================================================
// Core Trait
// =============================================================================

#[async_trait::async_trait]
pub trait FieldCatalog: Send + Sync {
    /// Physical tables behind `target`, in a stable order. An empty list
    /// means nothing matched.
    async fn resolve(&self, target: &str) -> Result<Vec<TableFields>>;
}

#[async_trait::async_trait]
impl<T: FieldCatalog + ?Sized> FieldCatalog for Arc<T> {
    async fn resolve(&self, target: &str) -> Result<Vec<TableFields>> {
        (**self).resolve(target).await
    }
}

// =============================================================================
// In-memory catalog
// =============================================================================

/// A fixed table list, used offline and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tables: Vec<TableFields>,
}

impl StaticCatalog {
    pub fn new(tables: Vec<TableFields>) -> Self {
        Self { tables }
    }
}

#[async_trait::async_trait]
impl FieldCatalog for StaticCatalog {
    async fn resolve(&self, target: &str) -> Result<Vec<TableFields>> {
        let matchers = target
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(pattern_regex)
            .collect::<Result<Vec<_>>>()?;
        Ok(self
            .tables
            .iter()
            .filter(|t| matchers.iter().any(|m| m.is_match(&t.name)))
            .cloned()
            .collect())
    }
}

/// Anchored regex for a table pattern where `*` matches any run of characters.
pub fn pattern_regex(pattern: &str) -> Result<Regex> {
    let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
    Regex::new(&format!("^{}$", body)).map_err(|e| AggError::Catalog(e.to_string()))
}
