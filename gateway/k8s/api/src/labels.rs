//! Kubernetes label selectors, evaluated against the labels of admitted objects.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type Map = BTreeMap<String, String>;

/// Selects objects by their labels. An empty selector selects every object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_labels: Option<Map>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    match_expressions: Option<Vec<Requirement>>,
}

/// A single `matchExpressions` entry.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Requirement {
    key: String,
    operator: Operator,
    #[serde(default)]
    values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

// === impl Selector ===

impl Selector {
    pub fn with_labels<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            match_labels: Some(
                labels
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            match_expressions: None,
        }
    }

    pub fn with_requirements(requirements: impl IntoIterator<Item = Requirement>) -> Self {
        Self {
            match_labels: None,
            match_expressions: Some(requirements.into_iter().collect()),
        }
    }

    /// Objects without labels are matched as if their labels were empty.
    pub fn matches(&self, labels: Option<&Map>) -> bool {
        let empty = Map::new();
        let labels = labels.unwrap_or(&empty);

        let exact = self
            .match_labels
            .iter()
            .flatten()
            .all(|(k, v)| labels.get(k) == Some(v));
        exact
            && self
                .match_expressions
                .iter()
                .flatten()
                .all(|req| req.matches(labels))
    }
}

// === impl Requirement ===

impl Requirement {
    pub fn new<'a>(
        key: impl ToString,
        operator: Operator,
        values: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values: values.into_iter().map(ToString::to_string).collect(),
        }
    }

    fn matches(&self, labels: &Map) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => value.map_or(true, |v| !self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}
