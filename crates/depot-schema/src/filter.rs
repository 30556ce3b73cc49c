//! LDAP-style filter expressions used by mapping rules.
//!
//! Supported syntax: `(attr=value)`, presence `(attr=*)`, wildcards
//! `(attr=foo*bar)`, ordering `(attr<=value)` / `(attr>=value)`, approximate
//! `(attr~=value)` and the `&`, `|`, `!` combinators. A backslash escapes the
//! next character in a value. Attribute names are case-insensitive.

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

/// Filter parse failures, carrying the character offset of the problem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Input ended in the middle of an expression.
    #[error("Unexpected end of filter '{0}'")]
    UnexpectedEnd(String),

    /// A character appeared where it is not allowed.
    #[error("Unexpected '{found}' at offset {offset} in filter '{filter}'")]
    Unexpected {
        /// The full filter text.
        filter: String,
        /// The offending character.
        found: char,
        /// Character offset.
        offset: usize,
    },

    /// An attribute name was empty.
    #[error("Missing attribute name at offset {offset} in filter '{filter}'")]
    MissingAttribute {
        /// The full filter text.
        filter: String,
        /// Character offset.
        offset: usize,
    },

    /// Characters followed the closing parenthesis.
    #[error("Trailing characters after filter '{0}'")]
    Trailing(String),
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// All sub-filters match. An empty list matches everything.
    And(Vec<Filter>),
    /// Any sub-filter matches.
    Or(Vec<Filter>),
    /// The sub-filter does not match.
    Not(Box<Filter>),
    /// The attribute is present.
    Present(String),
    /// The attribute equals the value exactly.
    Equal(String, String),
    /// The attribute matches a wildcard pattern. Segments are the literal
    /// text between unescaped `*`.
    Substring(String, Vec<String>),
    /// The attribute is less than or equal to the value.
    LessEq(String, String),
    /// The attribute is greater than or equal to the value.
    GreaterEq(String, String),
    /// Case- and whitespace-insensitive equality.
    Approx(String, String),
}

impl Filter {
    /// Parse filter text.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if the text is not a well-formed filter.
    pub fn parse(text: &str) -> Result<Self, FilterError> {
        let mut parser = Parser {
            text,
            chars: text.chars().collect(),
            pos: 0,
        };
        parser.skip_ws();
        let filter = parser.filter()?;
        parser.skip_ws();
        if parser.pos < parser.chars.len() {
            return Err(FilterError::Trailing(text.to_string()));
        }
        Ok(filter)
    }

    /// Evaluate against a property bag whose keys are lowercase.
    pub fn matches(&self, bag: &BTreeMap<String, String>) -> bool {
        match self {
            Self::And(list) => list.iter().all(|f| f.matches(bag)),
            Self::Or(list) => list.iter().any(|f| f.matches(bag)),
            Self::Not(inner) => !inner.matches(bag),
            Self::Present(attr) => bag.contains_key(attr),
            Self::Equal(attr, value) => bag.get(attr).is_some_and(|v| v == value),
            Self::Substring(attr, segments) => {
                bag.get(attr).is_some_and(|v| wildcard_match(v, segments))
            }
            Self::LessEq(attr, value) => bag
                .get(attr)
                .is_some_and(|v| compare(v, value) != std::cmp::Ordering::Greater),
            Self::GreaterEq(attr, value) => bag
                .get(attr)
                .is_some_and(|v| compare(v, value) != std::cmp::Ordering::Less),
            Self::Approx(attr, value) => bag
                .get(attr)
                .is_some_and(|v| normalize_approx(v) == normalize_approx(value)),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.chars.get(self.pos).is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, want: char) -> Result<(), FilterError> {
        match self.peek() {
            Some(c) if c == want => {
                self.pos += 1;
                Ok(())
            }
            Some(found) => Err(self.unexpected(found)),
            None => Err(FilterError::UnexpectedEnd(self.text.to_string())),
        }
    }

    fn unexpected(&self, found: char) -> FilterError {
        FilterError::Unexpected {
            filter: self.text.to_string(),
            found,
            offset: self.pos,
        }
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some('!') => {
                self.pos += 1;
                self.skip_ws();
                let inner = self.filter()?;
                self.skip_ws();
                Filter::Not(Box::new(inner))
            }
            Some(_) => self.item()?,
            None => return Err(FilterError::UnexpectedEnd(self.text.to_string())),
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut out = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('(') => out.push(self.filter()?),
                Some(')') => return Ok(out),
                Some(found) => return Err(self.unexpected(found)),
                None => return Err(FilterError::UnexpectedEnd(self.text.to_string())),
            }
        }
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.pos += 1;
        }
        let attr: String = self.chars[start..self.pos].iter().collect();
        let attr = attr.trim().to_lowercase();
        if attr.is_empty() {
            return Err(FilterError::MissingAttribute {
                filter: self.text.to_string(),
                offset: start,
            });
        }

        let op = match self.peek() {
            Some('=') => {
                self.pos += 1;
                '='
            }
            Some(c @ ('<' | '>' | '~')) => {
                self.pos += 1;
                self.expect('=')?;
                c
            }
            Some(found) => return Err(self.unexpected(found)),
            None => return Err(FilterError::UnexpectedEnd(self.text.to_string())),
        };

        let segments = self.value()?;
        let filter = match op {
            '<' => Filter::LessEq(attr, segments.join("*")),
            '>' => Filter::GreaterEq(attr, segments.join("*")),
            '~' => Filter::Approx(attr, segments.join("*")),
            _ if segments.len() == 1 => {
                Filter::Equal(attr, segments.into_iter().next().unwrap_or_default())
            }
            _ if segments.len() == 2 && segments.iter().all(String::is_empty) => {
                Filter::Present(attr)
            }
            _ => Filter::Substring(attr, segments),
        };
        Ok(filter)
    }

    /// Read a value up to the closing parenthesis, split on unescaped `*`.
    fn value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut segments = vec![String::new()];
        loop {
            match self.peek() {
                Some(')') => return Ok(segments),
                Some('(') => return Err(self.unexpected('(')),
                Some('\\') => {
                    self.pos += 1;
                    let escaped = self
                        .peek()
                        .ok_or_else(|| FilterError::UnexpectedEnd(self.text.to_string()))?;
                    if let Some(last) = segments.last_mut() {
                        last.push(escaped);
                    }
                    self.pos += 1;
                }
                Some('*') => {
                    segments.push(String::new());
                    self.pos += 1;
                }
                Some(c) => {
                    if let Some(last) = segments.last_mut() {
                        last.push(c);
                    }
                    self.pos += 1;
                }
                None => return Err(FilterError::UnexpectedEnd(self.text.to_string())),
            }
        }
    }
}

fn wildcard_match(value: &str, segments: &[String]) -> bool {
    let Some((first, rest)) = segments.split_first() else {
        return value.is_empty();
    };
    let Some(mut remaining) = value.strip_prefix(first.as_str()) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return remaining.is_empty();
    };
    for segment in middle {
        match remaining.find(segment.as_str()) {
            Some(idx) => remaining = &remaining[idx + segment.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last.as_str())
}

/// Numeric when both sides are numbers, semantic-version when both parse,
/// plain string order otherwise.
fn compare(actual: &str, wanted: &str) -> std::cmp::Ordering {
    if let (Ok(a), Ok(b)) = (actual.trim().parse::<f64>(), wanted.trim().parse::<f64>()) {
        return a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal);
    }
    if let (Ok(a), Ok(b)) = (
        semver::Version::parse(actual.trim()),
        semver::Version::parse(wanted.trim()),
    ) {
        return a.cmp(&b);
    }
    actual.cmp(wanted)
}

fn normalize_approx(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn parses_default_rule_filters() {
        let filter = Filter::parse("(& (classifier=osgi.bundle))").unwrap();
        assert_eq!(
            filter,
            Filter::And(vec![Filter::Equal(
                "classifier".into(),
                "osgi.bundle".into()
            )])
        );
        assert!(filter.matches(&bag(&[("classifier", "osgi.bundle")])));
        assert!(!filter.matches(&bag(&[("classifier", "binary")])));
    }

    #[test]
    fn attribute_names_are_case_insensitive() {
        let filter = Filter::parse("(Classifier=binary)").unwrap();
        assert!(filter.matches(&bag(&[("classifier", "binary")])));
    }

    #[test]
    fn presence_wildcards_and_negation() {
        let props = bag(&[("format", "packed"), ("id", "org.example.core")]);
        assert!(Filter::parse("(format=*)").unwrap().matches(&props));
        assert!(Filter::parse("(id=org.*.core)").unwrap().matches(&props));
        assert!(Filter::parse("(id=*core)").unwrap().matches(&props));
        assert!(!Filter::parse("(id=*util)").unwrap().matches(&props));
        assert!(Filter::parse("(!(missing=*))").unwrap().matches(&props));
        assert!(
            Filter::parse("(|(format=zip)(format=packed))")
                .unwrap()
                .matches(&props)
        );
    }

    #[test]
    fn ordering_and_approximate() {
        let props = bag(&[("version", "1.10.0"), ("size", "42"), ("name", "Hello World")]);
        assert!(Filter::parse("(version>=1.9.0)").unwrap().matches(&props));
        assert!(Filter::parse("(size<=100)").unwrap().matches(&props));
        assert!(!Filter::parse("(size>=100)").unwrap().matches(&props));
        assert!(Filter::parse("(name~=helloworld)").unwrap().matches(&props));
    }

    #[test]
    fn escaped_star_is_literal() {
        let filter = Filter::parse(r"(id=a\*b)").unwrap();
        assert_eq!(filter, Filter::Equal("id".into(), "a*b".into()));
    }

    #[test]
    fn rejects_malformed_filters() {
        assert!(Filter::parse("(classifier=binary").is_err());
        assert!(Filter::parse("classifier=binary").is_err());
        assert!(Filter::parse("(=binary)").is_err());
        assert!(Filter::parse("(a=b)extra").is_err());
        assert!(Filter::parse("(a<b)").is_err());
    }
}
