//! Match predicate builder.
//!
//! A [`MatchRule`] is a conjunction of `field == value` pairs; a
//! [`MatchPredicate`] is a disjunction of rules. The predicate compiles to a
//! single Elasticsearch `bool` query:
//!
//! ```json
//! { "bool": {
//!     "should": [
//!       { "bool": { "filter": [ { "match_phrase": { "event_category": "ips" } }, ... ] } },
//!       ...
//!     ],
//!     "minimum_should_match": 1
//! } }
//! ```

use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::error::{Result, SyncError};

/// A non-empty conjunction of field equality checks.
///
/// Fields are kept sorted so the generated query is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>")]
pub struct MatchRule {
    fields: BTreeMap<String, String>,
}

impl MatchRule {
    /// Build a rule from `(field, value)` pairs. An empty rule would match
    /// every document, so it is rejected.
    pub fn new<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::try_from(fields)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// True iff every field of the rule is present in `source` with an equal value.
    pub fn matches(&self, source: &Map<String, Value>) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| match source.get(field) {
                Some(Value::String(s)) => s == expected,
                Some(Value::Number(n)) => n.to_string() == *expected,
                Some(Value::Bool(b)) => b.to_string() == *expected,
                _ => false,
            })
    }

    fn to_query(&self) -> Value {
        let clauses: Vec<Value> = self
            .fields
            .iter()
            .map(|(field, value)| json!({ "match_phrase": { field: value } }))
            .collect();
        json!({ "bool": { "filter": clauses } })
    }
}

impl TryFrom<BTreeMap<String, String>> for MatchRule {
    type Error = SyncError;

    fn try_from(fields: BTreeMap<String, String>) -> Result<Self> {
        if fields.is_empty() {
            return Err(SyncError::InvalidRule(
                "a match rule needs at least one field".to_string(),
            ));
        }
        if let Some((field, _)) = fields.iter().find(|(k, _)| k.trim().is_empty()) {
            return Err(SyncError::InvalidRule(format!(
                "empty field name in rule ('{}')",
                field
            )));
        }
        Ok(Self { fields })
    }
}

/// A disjunction of [`MatchRule`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchPredicate {
    rules: Vec<MatchRule>,
}

impl MatchPredicate {
    /// Combine `rules` into one predicate. At least one rule is required.
    pub fn build(rules: &[MatchRule]) -> Result<Self> {
        if rules.is_empty() {
            return Err(SyncError::InvalidRule(
                "at least one match rule is required".to_string(),
            ));
        }
        Ok(Self {
            rules: rules.to_vec(),
        })
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    /// True iff `source` satisfies at least one rule.
    pub fn matches(&self, source: &Map<String, Value>) -> bool {
        self.rules.iter().any(|rule| rule.matches(source))
    }

    /// Render the predicate as an Elasticsearch query object.
    pub fn to_query(&self) -> Value {
        let should: Vec<Value> = self.rules.iter().map(MatchRule::to_query).collect();
        json!({
            "bool": {
                "should": should,
                "minimum_should_match": 1
            }
        })
    }
}

/// The Junos rule set used when the configuration names none.
pub fn default_rules() -> Vec<MatchRule> {
    let rules: [&[(&str, &str)]; 6] = [
        &[
            ("event_category", "antivirus"),
            ("source_zone", "business-Wired"),
        ],
        &[
            ("event_category", "apptrack"),
            ("application", "BITTORRENT"),
            ("event_type", "APPTRACK_SESSION_CLOSE"),
            ("reason", "Closed by junos-dynapp"),
        ],
        &[
            ("event_category", "webfilter"),
            ("category", "Enhanced_Personals_and_Dating"),
            ("event_type", "WEBIFLTER_URL_BLOCKED"),
            ("source_zone", "crew-Wired"),
            ("url", "edge.microsoft.com"),
        ],
        &[
            ("event_category", "webfilter"),
            ("category", "TELEGRAM"),
            ("event_type", "WEBIFLTER_URL_PERMITTED"),
            ("source_zone", "crew-Wired"),
            ("url", "tools.dvdvideosoft.com/stat.jso"),
        ],
        &[
            ("event_category", "firewall"),
            ("reason", "Closed by junos-dynapp"),
            ("event_type", "RT_FLOW_SESSION_CLOSE"),
            ("source_zone", "crew-Wired"),
        ],
        &[
            ("event_category", "ips"),
            ("event_type", "IDP_ATTACK_LOG_EVENT"),
            ("source_zone", "crew-Wired"),
            ("threat_severity", "HIGH"),
        ],
    ];

    rules
        .iter()
        .map(|pairs| MatchRule {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        })
        .collect()
}
