//! Identifier format for globally numbered entities (`SV001`, `L07`, ...).

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// `prefix` followed by a zero-padded decimal counter of at least `width` digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdFormat {
    pub prefix: String,
    pub width: usize,
}

impl IdFormat {
    pub fn new(prefix: impl Into<String>, width: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width,
        }
    }

    /// Student ids: `SV` + 3 digits.
    #[must_use]
    pub fn student() -> Self {
        Self::new("SV", 3)
    }

    /// Class ids: `L` + 2 digits.
    #[must_use]
    pub fn class() -> Self {
        Self::new("L", 2)
    }

    /// The numeric suffix of `id`, or `None` if it does not follow this format.
    #[must_use]
    pub fn parse(&self, id: &str) -> Option<u64> {
        let digits = id.strip_prefix(self.prefix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    #[must_use]
    pub fn format(&self, n: u64) -> String {
        format!("{}{:0width$}", self.prefix, n, width = self.width)
    }

    /// One past the largest counter among `ids`; starts at 1.
    ///
    /// Ids that do not follow the format are ignored.
    ///
    /// # Errors
    ///
    /// `ValidationFailed` once the largest counter is `u64::MAX`.
    pub fn next_after<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> GatewayResult<String> {
        let max = ids.into_iter().filter_map(|id| self.parse(id)).max().unwrap_or(0);
        max.checked_add(1)
            .map(|n| self.format(n))
            .ok_or_else(|| GatewayError::validation(format!("{} id counter is exhausted", self.prefix)))
    }
}
