use serde::{Deserialize, Serialize};

use crate::domain::task::TaskDescription;

/// Documentation for a top-level goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalDescription {
    pub name: String,
    /// Plugin that described the goal; empty for goals built into the master.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plugin: String,
    pub short: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl GoalDescription {
    pub fn new(name: impl Into<String>, short: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin: String::new(),
            short: short.into(),
            aliases: Vec::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = plugin.into();
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `name` is this goal's name or one of its aliases.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    /// Full task path for a task nested directly under this goal.
    pub fn task_name(&self, name: &str) -> String {
        format!("/{}/{}", self.name, name.trim_matches('/'))
    }

    /// Describe a task rooted at this goal, owned by the goal's plugin.
    pub fn task<I, S>(&self, name: &str, short: impl Into<String>, requires: I) -> TaskDescription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TaskDescription::new(&self.plugin, self.task_name(name), short, requires)
    }
}

/// Goals every master knows about, independent of loaded plugins.
pub fn builtin_goals() -> Vec<GoalDescription> {
    vec![
        GoalDescription::new("build", "Syntax check and prepare for development."),
        GoalDescription::new("deploy", "Deploy software to a remote server."),
        GoalDescription::new("generate", "Perform code generation tasks."),
        GoalDescription::new("info", "Describe information about the project."),
        GoalDescription::new("init", "Initialize a new project directory."),
        GoalDescription::new("install", "Install software and assets locally."),
        GoalDescription::new("lint", "Check files and data for errors and anti-patterns.")
            .with_aliases(["analyze"]),
        GoalDescription::new("release", "Mint and publish a release."),
        GoalDescription::new("request", "Request the merger of a code patch.")
            .with_aliases(["pull-request", "pr", "merge-request", "mr"]),
        GoalDescription::new("test", "Run tests."),
    ]
}
