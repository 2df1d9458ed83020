//! Step identifiers and pattern matching over them.
//!
//! A step is addressed as `<channel>://<namespace>/<version>/<short_name>`.
//! Consumer-facing references may add a `#<table>` suffix; the step graph
//! itself only accepts bare step identifiers.

use crate::errors::MalformedIdentifierError;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::str::FromStr;

/// The closed set of channels a step can belong to.
///
/// The channel decides which runner executes the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Raw snapshot of upstream source files.
    Snapshot,
    /// Cleaned data: snapshots parsed into tables with minimal changes.
    Meadow,
    /// Curated data: harmonized and documented tables.
    Garden,
    /// Published data: tables prepared for the public-facing database.
    Grapher,
    /// Exported data: derived outputs for external consumers.
    Export,
}

impl Channel {
    /// All channels, in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::Snapshot,
        Self::Meadow,
        Self::Garden,
        Self::Grapher,
        Self::Export,
    ];

    /// Returns the URI scheme of the channel.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Meadow => "meadow",
            Self::Garden => "garden",
            Self::Grapher => "grapher",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = MalformedIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| MalformedIdentifierError::new(s, format!("unknown channel '{s}'")))
    }
}

/// Version segment of a step identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Version {
    /// The moving `latest` marker.
    Latest,
    /// An explicit token, usually an ISO date (`2024-03-01`) or a semantic version.
    Token(String),
}

impl Version {
    /// Returns the version as written in identifiers.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Latest => "latest",
            Self::Token(t) => t,
        }
    }

    /// Returns true for the `latest` marker.
    #[must_use]
    pub const fn is_latest(&self) -> bool {
        matches!(self, Self::Latest)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical address of a step.
///
/// Equality, hashing and ordering all go through the canonical string, which
/// is equivalent to comparing every field.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepIdentifier {
    channel: Channel,
    namespace: String,
    version: Version,
    short_name: String,
    canonical: String,
}

impl StepIdentifier {
    /// Builds an identifier from parts, validating each segment.
    pub fn new(
        channel: Channel,
        namespace: impl Into<String>,
        version: impl Into<String>,
        short_name: impl Into<String>,
    ) -> Result<Self, MalformedIdentifierError> {
        let namespace = namespace.into();
        let version = version.into();
        let short_name = short_name.into();
        let canonical = format!("{channel}://{namespace}/{version}/{short_name}");

        validate_segment(&canonical, "namespace", &namespace)?;
        validate_segment(&canonical, "version", &version)?;
        validate_segment(&canonical, "short name", &short_name)?;

        let version = if version == "latest" {
            Version::Latest
        } else {
            Version::Token(version)
        };

        Ok(Self {
            channel,
            namespace,
            version,
            short_name,
            canonical,
        })
    }

    /// Parses a bare step identifier. A `#table` suffix is rejected.
    pub fn parse(input: &str) -> Result<Self, MalformedIdentifierError> {
        if input.contains('#') {
            return Err(MalformedIdentifierError::new(
                input,
                "table selectors are not allowed in step references",
            ));
        }

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| MalformedIdentifierError::new(input, "missing '<channel>://' prefix"))?;
        let channel: Channel = scheme
            .parse()
            .map_err(|_| MalformedIdentifierError::new(input, format!("unknown channel '{scheme}'")))?;

        let segments: Vec<&str> = rest.split('/').collect();
        let [namespace, version, short_name] = segments.as_slice() else {
            return Err(MalformedIdentifierError::new(
                input,
                format!(
                    "expected '<namespace>/<version>/<short_name>', found {} segment(s)",
                    segments.len()
                ),
            ));
        };

        Self::new(channel, *namespace, *version, *short_name)
    }

    /// Returns the channel.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the version.
    #[must_use]
    pub const fn version(&self) -> &Version {
        &self.version
    }

    /// Returns the short name.
    #[must_use]
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Directory holding the step's artifacts, relative to the steps root.
    #[must_use]
    pub fn relative_dir(&self) -> PathBuf {
        [self.channel.as_str(), &self.namespace, self.version.as_str()]
            .iter()
            .collect()
    }
}

fn validate_segment(
    input: &str,
    what: &str,
    segment: &str,
) -> Result<(), MalformedIdentifierError> {
    if segment.is_empty() {
        return Err(MalformedIdentifierError::new(input, format!("empty {what}")));
    }
    if let Some(bad) = segment.chars().find(|c| !is_allowed_char(*c)) {
        return Err(MalformedIdentifierError::new(
            input,
            format!("invalid character '{bad}' in {what}"),
        ));
    }
    if segment.chars().all(|c| c == '.') {
        return Err(MalformedIdentifierError::new(
            input,
            format!("{what} cannot be '{segment}'"),
        ));
    }
    Ok(())
}

const fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

impl PartialEq for StepIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for StepIdentifier {}

impl Hash for StepIdentifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for StepIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StepIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for StepIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for StepIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StepIdentifier({})", self.canonical)
    }
}

impl FromStr for StepIdentifier {
    type Err = MalformedIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StepIdentifier {
    type Error = MalformedIdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StepIdentifier> for String {
    fn from(value: StepIdentifier) -> Self {
        value.canonical
    }
}

/// A consumer-facing reference: a step plus an optional table selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableReference {
    /// The referenced step.
    pub step: StepIdentifier,
    /// The selected table, when a `#table` suffix was given.
    pub table: Option<String>,
}

impl TableReference {
    /// Parses `<step>[#<table>]`.
    pub fn parse(input: &str) -> Result<Self, MalformedIdentifierError> {
        let (step, table) = match input.split_once('#') {
            Some((step, table)) => {
                if table.is_empty() {
                    return Err(MalformedIdentifierError::new(input, "empty table name"));
                }
                validate_segment(input, "table name", table)?;
                (step, Some(table.to_string()))
            }
            None => (input, None),
        };

        Ok(Self {
            step: StepIdentifier::parse(step)?,
            table,
        })
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}#{table}", self.step),
            None => write!(f, "{}", self.step),
        }
    }
}

/// A user-supplied step selector.
///
/// In the default mode the pattern is a case-insensitive regular expression
/// searched anywhere in the canonical string, so a plain substring works as
/// expected. Patterns that are not valid regular expressions are matched as
/// literal substrings. In exact mode the pattern must equal the canonical
/// string.
#[derive(Debug, Clone)]
pub struct StepPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Search(Regex),
}

impl StepPattern {
    /// Compiles a search pattern.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .or_else(|_| {
                RegexBuilder::new(&regex::escape(pattern))
                    .case_insensitive(true)
                    .build()
            });

        let matcher = match regex {
            Ok(regex) => Matcher::Search(regex),
            // An escaped literal always compiles unless it exceeds the size limit.
            Err(_) => Matcher::Exact(pattern.to_lowercase()),
        };

        Self {
            source: pattern.to_string(),
            matcher,
        }
    }

    /// Builds a pattern that only matches the exact canonical string.
    #[must_use]
    pub fn exact(pattern: &str) -> Self {
        Self {
            source: pattern.to_string(),
            matcher: Matcher::Exact(pattern.to_string()),
        }
    }

    /// Returns the pattern as given by the user.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the step matches.
    #[must_use]
    pub fn matches(&self, step: &StepIdentifier) -> bool {
        match &self.matcher {
            Matcher::Exact(s) => step.as_str() == s || step.as_str().to_lowercase() == *s,
            Matcher::Search(re) => re.is_match(step.as_str()),
        }
    }

    /// Returns every matching step. An empty result is not an error.
    pub fn select<'a>(
        &self,
        steps: impl IntoIterator<Item = &'a StepIdentifier>,
    ) -> BTreeSet<StepIdentifier> {
        steps
            .into_iter()
            .filter(|s| self.matches(s))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn id(s: &str) -> StepIdentifier {
        StepIdentifier::parse(s).unwrap()
    }

    #[test]
    fn test_parse_fields() {
        let step = id("garden://who/2024-03-01/life_expectancy");

        assert_eq!(step.channel(), Channel::Garden);
        assert_eq!(step.namespace(), "who");
        assert_eq!(step.version(), &Version::Token("2024-03-01".into()));
        assert_eq!(step.short_name(), "life_expectancy");
        assert_eq!(step.to_string(), "garden://who/2024-03-01/life_expectancy");
    }

    #[test]
    fn test_parse_latest() {
        let step = id("meadow://un/latest/population");
        assert!(step.version().is_latest());
        assert_eq!(step.relative_dir(), PathBuf::from("meadow/un/latest"));
    }

    #[test]
    fn test_canonical_round_trip() {
        let raw = "export://owid/1.2.0/covid.v2";
        let step = id(raw);
        let again: StepIdentifier = step.to_string().parse().unwrap();
        assert_eq!(step, again);

        let json = serde_json::to_string(&step).unwrap();
        assert_eq!(json, format!("\"{raw}\""));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "garden/who/2024/x",
            "garden://who/2024",
            "garden://who/2024/x/y",
            "garden://who//x",
            "garden://w ho/2024/x",
            "garden://who/2024/x$",
            "bronze://who/2024/x",
            "garden://who/2024/x#table",
        ] {
            assert!(StepIdentifier::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_rejects_dot_segments() {
        for bad in [
            "garden://../../x",
            "garden://./2024/x",
            "garden://who/../x",
            "garden://who/2024/..",
            "garden://who/.../x",
        ] {
            let err = StepIdentifier::parse(bad).unwrap_err();
            assert!(err.reason.contains("cannot be"), "{bad}: {}", err.reason);
        }

        let dotted = StepIdentifier::parse("garden://who/2024.03/gho.v2").unwrap();
        assert_eq!(dotted.relative_dir(), PathBuf::from("garden/who/2024.03"));
    }

    #[test]
    fn test_malformed_reports_reason() {
        let err = StepIdentifier::parse("garden://who/2024/x!").unwrap_err();
        assert_eq!(err.input, "garden://who/2024/x!");
        assert!(err.reason.contains("'!'"));
    }

    #[test]
    fn test_table_reference() {
        let r = TableReference::parse("garden://who/2024/x#deaths").unwrap();
        assert_eq!(r.step, id("garden://who/2024/x"));
        assert_eq!(r.table.as_deref(), Some("deaths"));
        assert_eq!(r.to_string(), "garden://who/2024/x#deaths");

        assert!(TableReference::parse("garden://who/2024/x#").is_err());
        assert!(TableReference::parse("garden://who/2024/x").unwrap().table.is_none());
    }

    #[test]
    fn test_ordering_is_lexicographic_on_canonical_form() {
        let mut steps = vec![
            id("meadow://a/2024/x"),
            id("garden://b/2024/x"),
            id("garden://a/2024/y"),
        ];
        steps.sort();
        let names: Vec<_> = steps.iter().map(StepIdentifier::as_str).collect();
        assert_eq!(names, ["garden://a/2024/y", "garden://b/2024/x", "meadow://a/2024/x"]);
    }

    #[test]
    fn test_pattern_substring_case_insensitive() {
        let steps = [id("garden://who/2024/Life_Expectancy"), id("garden://un/2024/population")];
        let matched = StepPattern::new("life_exp").select(&steps);
        assert_eq!(matched.len(), 1);
        assert!(matched.contains(&steps[0]));
    }

    #[test]
    fn test_pattern_invalid_regex_falls_back_to_literal() {
        let steps = [id("garden://who/2024/x"), id("garden://un/2024/y")];
        let pattern = StepPattern::new("who/2024/x(");
        assert!(pattern.select(&steps).is_empty());

        let pattern = StepPattern::new("(who");
        assert!(pattern.select(&steps).is_empty());

        let pattern = StepPattern::new("who/2024");
        assert_eq!(pattern.select(&steps).len(), 1);
    }

    #[test]
    fn test_pattern_exact() {
        let steps = [id("garden://who/2024/x"), id("garden://who/2024/xy")];
        let matched = StepPattern::exact("garden://who/2024/x").select(&steps);
        assert_eq!(matched.into_iter().collect::<Vec<_>>(), vec![steps[0].clone()]);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let steps = [id("garden://who/2024/x")];
        assert!(StepPattern::new("nothing-like-this").select(&steps).is_empty());
    }
}
