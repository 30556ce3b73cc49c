//! Declarative mapping rules from artifact properties to locations.

use serde::{Deserialize, Serialize};

use crate::filter::{Filter, FilterError};

/// A location mapping rule: descriptors matching `filter` are stored at
/// `output` after `${variable}` substitution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingRule {
    /// LDAP-style filter text.
    pub filter: String,
    /// Location template.
    pub output: String,
}

impl MappingRule {
    /// Create a rule.
    pub fn new(filter: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            output: output.into(),
        }
    }

    /// Parse the filter text.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if the filter is malformed.
    pub fn parse_filter(&self) -> Result<Filter, FilterError> {
        Filter::parse(&self.filter)
    }

    /// Rules installed in every newly created repository.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "(& (classifier=osgi.bundle))",
                "${repoUrl}/plugins/${id}_${version}.jar",
            ),
            Self::new("(& (classifier=binary))", "${repoUrl}/binary/${id}_${version}"),
            Self::new(
                "(& (classifier=org.eclipse.update.feature))",
                "${repoUrl}/features/${id}_${version}.jar",
            ),
        ]
    }
}
