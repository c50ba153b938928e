use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The label which holds the `host:port` of a target.
pub const ADDRESS_LABEL: &str = "__address__";

/// Prefix for labels provided by service discovery. Labels with this prefix
/// are available during relabeling only.
pub const META_LABEL_PREFIX: &str = "__meta_";

/// LabelSet is a collection of label names and values which identify one
/// target. Ordered, so serialized output is stable.
pub type LabelSet = BTreeMap<String, String>;

/// TargetGroup is a set of targets with a common label set (production,
/// test, staging etc.), discovered from the same source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetGroup {
    /// Source is an identifier that describes a group of targets, consumers
    /// use it to tell which group is replaced by a new one.
    pub source: String,

    /// Targets is a list of targets identified by a label set. Each target
    /// is uniquely identifiable in the group by its address label.
    #[serde(default)]
    pub targets: Vec<LabelSet>,

    /// Labels is a set of labels that is common across all targets in the group.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: LabelSet,
}

impl TargetGroup {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            targets: vec![],
            labels: LabelSet::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Returns the address of every target, in order. Targets without an
    /// address are skipped.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .filter_map(|labels| labels.get(ADDRESS_LABEL).map(String::as_str))
    }
}
