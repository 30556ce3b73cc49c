//! Rule-based artifact location mapping.
//!
//! A [`LocationMapper`] is built from a repository's ordered rule list and is
//! immutable afterwards; the repository rebuilds it whenever its rules change.

use std::collections::BTreeMap;

use depot_schema::{ArtifactDescriptor, Filter, MappingRule};
use url::Url;

/// Compiled mapping rules.
#[derive(Debug, Clone, Default)]
pub struct LocationMapper {
    rules: Vec<(Filter, String)>,
}

impl LocationMapper {
    /// Compile `rules`, skipping any whose filter does not parse.
    pub fn new(rules: &[MappingRule]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|rule| match rule.parse_filter() {
                Ok(filter) => Some((filter, rule.output.clone())),
                Err(e) => {
                    tracing::warn!(filter = %rule.filter, error = %e, "Skipping invalid mapping rule");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Number of usable rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` when no rule compiled.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Location of `descriptor` under `base`, using its key, format and
    /// public properties.
    pub fn map(&self, base: &str, descriptor: &ArtifactDescriptor) -> Option<Url> {
        let key = descriptor.key();
        self.resolve(
            base,
            key.classifier(),
            key.id(),
            key.version().as_str(),
            descriptor.format(),
            descriptor.properties(),
        )
    }

    /// Evaluate the rules in order against the property bag and substitute
    /// the first match's output template.
    ///
    /// Returns `None` when no rule matches or the result is not a valid URL.
    pub fn resolve(
        &self,
        base: &str,
        classifier: &str,
        id: &str,
        version: &str,
        format: Option<&str>,
        properties: &BTreeMap<String, String>,
    ) -> Option<Url> {
        let mut bag: BTreeMap<String, String> = properties
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();
        bag.insert("repourl".into(), base.trim_end_matches('/').to_string());
        bag.insert("classifier".into(), classifier.to_string());
        bag.insert("id".into(), id.to_string());
        bag.insert("version".into(), version.to_string());
        if let Some(format) = format {
            bag.insert("format".into(), format.to_string());
        }

        let (_, output) = self.rules.iter().find(|(filter, _)| filter.matches(&bag))?;
        let resolved = substitute(output, &bag);
        match Url::parse(&resolved) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::debug!(location = %resolved, error = %e, "Mapped location is not a URL");
                None
            }
        }
    }
}

/// Replace `${name}` tokens with bag values. Names are case-insensitive and
/// unknown names expand to nothing. An unterminated token is kept verbatim.
fn substitute(template: &str, bag: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        if let Some(value) = bag.get(&after[..end].to_lowercase()) {
            out.push_str(value);
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}
