//! Acceptable-status sets
//!
//! Target APIs are inconsistent about which code they return for the same
//! situation, so expectations are always a set: exact codes (`404`) and
//! families (`"4xx"`) can be mixed, e.g. `[200, 404]` for a lookup of a
//! missing id.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DefinitionError;

/// One member of a status set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPattern", into = "RawPattern")]
pub enum StatusPattern {
    /// A single status code
    Code(u16),
    /// Every code in `N00..=N99`
    Family(u8),
}

impl StatusPattern {
    pub fn matches(&self, status: u16) -> bool {
        match self {
            StatusPattern::Code(code) => *code == status,
            StatusPattern::Family(family) => status / 100 == u16::from(*family),
        }
    }

    pub fn parse(text: &str) -> Result<Self, DefinitionError> {
        let text = text.trim();
        let lower = text.to_ascii_lowercase();
        if let Some(prefix) = lower.strip_suffix("xx") {
            return match prefix.parse::<u8>() {
                Ok(family @ 1..=5) => Ok(StatusPattern::Family(family)),
                _ => Err(DefinitionError::InvalidStatus(text.to_string())),
            };
        }
        let code = lower
            .parse::<u16>()
            .map_err(|_| DefinitionError::InvalidStatus(text.to_string()))?;
        Self::code(code)
    }

    fn code(code: u16) -> Result<Self, DefinitionError> {
        if (100..=599).contains(&code) {
            Ok(StatusPattern::Code(code))
        } else {
            Err(DefinitionError::InvalidStatus(code.to_string()))
        }
    }
}

impl fmt::Display for StatusPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusPattern::Code(code) => write!(f, "{}", code),
            StatusPattern::Family(family) => write!(f, "{}xx", family),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Code(u16),
    Text(String),
}

impl TryFrom<RawPattern> for StatusPattern {
    type Error = DefinitionError;

    fn try_from(raw: RawPattern) -> Result<Self, Self::Error> {
        match raw {
            RawPattern::Code(code) => StatusPattern::code(code),
            RawPattern::Text(text) => StatusPattern::parse(&text),
        }
    }
}

impl From<StatusPattern> for RawPattern {
    fn from(pattern: StatusPattern) -> Self {
        match pattern {
            StatusPattern::Code(code) => RawPattern::Code(code),
            StatusPattern::Family(_) => RawPattern::Text(pattern.to_string()),
        }
    }
}

/// Set of acceptable statuses; YAML accepts a single pattern or a list
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "Vec<StatusPattern>")]
pub struct StatusSet(Vec<StatusPattern>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(StatusPattern),
    Many(Vec<StatusPattern>),
}

impl From<OneOrMany> for StatusSet {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(pattern) => StatusSet(vec![pattern]),
            OneOrMany::Many(patterns) => StatusSet(patterns),
        }
    }
}

impl From<StatusSet> for Vec<StatusPattern> {
    fn from(set: StatusSet) -> Self {
        set.0
    }
}

impl StatusSet {
    pub fn new(patterns: Vec<StatusPattern>) -> Self {
        Self(patterns)
    }

    /// Any 2xx status
    pub fn success() -> Self {
        Self(vec![StatusPattern::Family(2)])
    }

    /// Every status from 1xx to 5xx
    pub fn any() -> Self {
        Self((1..=5).map(StatusPattern::Family).collect())
    }

    pub fn codes(codes: &[u16]) -> Self {
        Self(codes.iter().copied().map(StatusPattern::Code).collect())
    }

    pub fn contains(&self, status: u16) -> bool {
        self.0.iter().any(|p| p.matches(status))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn patterns(&self) -> &[StatusPattern] {
        &self.0
    }
}

impl FromIterator<u16> for StatusSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self(iter.into_iter().map(StatusPattern::Code).collect())
    }
}

impl fmt::Display for StatusSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("200", 200, true ; "exact code")]
    #[test_case("4xx", 429, true ; "family member")]
    #[test_case("4XX", 404, true ; "family uppercase")]
    #[test_case("4xx", 500, false ; "other family")]
    #[test_case("204", 200, false ; "different code")]
    fn test_pattern_matches(text: &str, status: u16, expected: bool) {
        let pattern = StatusPattern::parse(text).unwrap();
        assert_eq!(pattern.matches(status), expected);
    }

    #[test_case("9xx" ; "family out of range")]
    #[test_case("abc" ; "not a number")]
    #[test_case("99" ; "code too small")]
    #[test_case("600" ; "code too large")]
    fn test_invalid_patterns(text: &str) {
        assert!(StatusPattern::parse(text).is_err());
    }

    #[test]
    fn test_yaml_single_and_list() {
        let single: StatusSet = serde_yaml::from_str("200").unwrap();
        assert!(single.contains(200));
        assert!(!single.contains(201));

        let mixed: StatusSet = serde_yaml::from_str("[200, 201, '4xx']").unwrap();
        assert!(mixed.contains(201));
        assert!(mixed.contains(401));
        assert!(!mixed.contains(500));
        assert_eq!(mixed.to_string(), "[200, 201, 4xx]");
    }

    #[test]
    fn test_yaml_rejects_bad_code() {
        let parsed: Result<StatusSet, _> = serde_yaml::from_str("[200, 700]");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_any_covers_everything() {
        let any = StatusSet::any();
        for status in [100, 200, 302, 404, 429, 503] {
            assert!(any.contains(status));
        }
    }

    #[test]
    fn test_json_serialization_is_a_list() {
        let set = StatusSet::new(vec![StatusPattern::Code(204), StatusPattern::Family(4)]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json, serde_json::json!([204, "4xx"]));
    }
}
