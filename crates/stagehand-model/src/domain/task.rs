use serde::{Deserialize, Serialize};

/// A task a plugin declares it implements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescription {
    pub plugin: String,
    /// Slash-delimited task path.
    pub name: String,
    pub short: String,
    /// Task paths that must run before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
}

impl TaskDescription {
    pub fn new<I, S>(
        plugin: impl Into<String>,
        name: impl Into<String>,
        short: impl Into<String>,
        requires: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            plugin: plugin.into(),
            name: name.into(),
            short: short.into(),
            requires: requires.into_iter().map(Into::into).collect(),
        }
    }
}
