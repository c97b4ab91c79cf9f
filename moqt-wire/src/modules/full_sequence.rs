use serde::Serialize;

/// Location of an object within a track.
///
/// Ordered lexicographically by (group, subgroup, object). Forwarding
/// preferences that do not use subgroups leave the subgroup at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FullSequence {
    pub group: u64,
    pub subgroup: u64,
    pub object: u64,
}

impl FullSequence {
    pub const fn new(group: u64, object: u64) -> Self {
        Self {
            group,
            subgroup: 0,
            object,
        }
    }

    pub const fn with_subgroup(group: u64, subgroup: u64, object: u64) -> Self {
        Self {
            group,
            subgroup,
            object,
        }
    }

    pub fn next(&self) -> Self {
        Self {
            group: self.group,
            subgroup: self.subgroup,
            object: self.object + 1,
        }
    }
}

impl std::fmt::Display for FullSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.subgroup, self.object)
    }
}

/// Namespace-qualified track identifier. Equality and hashing are
/// element-wise over the namespace tuple and the name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FullTrackName {
    pub namespace: Vec<String>,
    pub name: String,
}

impl FullTrackName {
    pub fn new(namespace: Vec<String>, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for FullTrackName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace.join("/"), self.name)
    }
}
