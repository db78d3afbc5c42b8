use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use fragdb_core::{
    Department, Fragment, GatewayResult, IdFormat, LogicalTable, PartitionDef, PartitionLayout,
};
use serde::{Deserialize, Serialize};

/// One configured partition. An empty `departments` list means the
/// partition holds the whole table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub id: u32,
    pub name: String,
    pub table: LogicalTable,
    #[serde(default)]
    pub departments: Vec<String>,
}

impl PartitionConfig {
    fn to_def(&self) -> GatewayResult<PartitionDef> {
        let fragment = if self.departments.is_empty() {
            Fragment::Whole
        } else {
            Fragment::Departments(
                self.departments
                    .iter()
                    .map(|raw| Department::parse(raw))
                    .collect::<GatewayResult<BTreeSet<_>>>()?,
            )
        };
        Ok(PartitionDef::new(self.id, self.name.clone(), self.table, fragment))
    }
}

impl From<&PartitionDef> for PartitionConfig {
    fn from(def: &PartitionDef) -> Self {
        let departments = match &def.fragment {
            Fragment::Whole => Vec::new(),
            Fragment::Departments(set) => set.iter().map(ToString::to_string).collect(),
        };
        Self {
            id: def.id.0,
            name: def.name.clone(),
            table: def.table,
            departments,
        }
    }
}

/// Gateway configuration.
///
/// Every field has a default; a JSON file only needs to name what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Identifier of this gateway instance, attached to log lines.
    pub node_id: String,
    /// Default timeout for operations in milliseconds.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    /// Partition mapping. Defaults to the standard seven-site layout.
    pub partitions: Vec<PartitionConfig>,
    pub student_ids: IdFormat,
    pub class_ids: IdFormat,
    /// Records whose per-record average is below this are reported as failing.
    pub failure_threshold: f64,
    pub default_page_size: usize,
    /// Rows returned by the scholarship ranking when the caller names no limit.
    pub scholarship_top: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            partitions: PartitionLayout::standard()
                .partitions()
                .iter()
                .map(PartitionConfig::from)
                .collect(),
            student_ids: IdFormat::student(),
            class_ids: IdFormat::class(),
            failure_threshold: 5.0,
            default_page_size: 20,
            scholarship_top: 10,
        }
    }
}

impl GatewayConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or an invalid partition layout.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw).context("parsing gateway config")?;
        config.layout().context("validating partition layout")?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not parse.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("loading {}", path.display()))
    }

    /// Builds and validates the partition layout.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` for malformed departments or an
    /// inconsistent mapping.
    pub fn layout(&self) -> GatewayResult<PartitionLayout> {
        let defs = self
            .partitions
            .iter()
            .map(PartitionConfig::to_def)
            .collect::<GatewayResult<Vec<_>>>()?;
        PartitionLayout::new(defs)
    }
}
