//! Boolean must/must-not filters over point payloads.
//!
//! A filter holds `must` clauses (all have to match) and `must_not` clauses
//! (none may match). Each clause names a payload key and a match spec:
//! exact value, set membership, substring, prefix, glob, or numeric range.
//! A clause whose key is absent from the payload never matches.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::payload::{Payload, value_number, value_text};

/// Boolean filter applied to point payloads during search.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<Condition>,
}

/// One clause: a payload key and how to match its value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub key: String,

    #[serde(flatten)]
    pub spec: MatchSpec,
}

/// How a condition matches a payload value.
///
/// Untagged: the JSON field name (`value`, `any`, `contains`, `prefix`,
/// `glob`, `range`) selects the variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MatchSpec {
    /// Exact value equality.
    Value { value: Value },

    /// Membership in a set of values.
    Any { any: Vec<Value> },

    /// Substring match on string values.
    Contains { contains: String },

    /// Prefix match on string values.
    Prefix { prefix: String },

    /// Glob match on string values (`*` and `?` wildcards).
    Glob { glob: String },

    /// Numeric range on number values.
    Range { range: RangeSpec },
}

/// Inclusive/exclusive numeric bounds; unset bounds are unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RangeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<f64>,
}

impl Filter {
    /// Filter with only `must` clauses.
    #[must_use]
    pub fn must(conditions: Vec<Condition>) -> Self {
        Self {
            must: conditions,
            must_not: Vec::new(),
        }
    }

    /// True when the filter has no clauses at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    /// Evaluates the filter against a payload.
    #[must_use]
    pub fn matches(&self, payload: &Payload) -> bool {
        self.must.iter().all(|c| c.matches(payload))
            && !self.must_not.iter().any(|c| c.matches(payload))
    }
}

impl Condition {
    /// Convenience constructor for an exact-value clause.
    pub fn value(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            spec: MatchSpec::Value { value },
        }
    }

    fn matches(&self, payload: &Payload) -> bool {
        let Some(actual) = payload.get(&self.key) else {
            return false;
        };

        match &self.spec {
            MatchSpec::Value { value } => actual == value,
            MatchSpec::Any { any } => any.contains(actual),
            MatchSpec::Contains { contains } => {
                value_text(actual).is_some_and(|s| s.contains(contains.as_str()))
            }
            MatchSpec::Prefix { prefix } => {
                value_text(actual).is_some_and(|s| s.starts_with(prefix.as_str()))
            }
            MatchSpec::Glob { glob } => value_text(actual).is_some_and(|s| glob_match(glob, s)),
            MatchSpec::Range { range } => value_number(actual).is_some_and(|n| range.contains(n)),
        }
    }
}

impl RangeSpec {
    fn contains(&self, n: f64) -> bool {
        self.gt.is_none_or(|gt| n > gt)
            && self.gte.is_none_or(|gte| n >= gte)
            && self.lt.is_none_or(|lt| n < lt)
            && self.lte.is_none_or(|lte| n <= lte)
    }
}

/// Matches `text` against a glob `pattern` with `*` and `?` wildcards.
///
/// Iterative backtracking over byte positions; patterns and text are matched
/// byte-wise, which is correct for the path-like strings filters target.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}
