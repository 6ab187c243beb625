use std::{collections::BTreeMap, sync::Arc};

use serde::Deserialize;
use stagehand_model::TaskPath;
use stagehand_store::{Kv, LayeredKv, MemoryKv, Value};

use crate::error::TaskError;

pub type Properties = serde_json::Map<String, serde_json::Value>;

/// In-memory run configuration, as produced by a configuration loader.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub goals: BTreeMap<String, TaskConfig>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

/// Settings of a goal or of a task nested below one.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub enabled_plugins: Vec<String>,
    #[serde(default)]
    pub disabled_plugins: Vec<String>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    pub name: String,
    /// Shell command that starts the plugin process.
    pub command: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginConfig> {
        self.plugins.iter().find(|p| p.name == name)
    }

    /// Build the property store for one task, target and plugin.
    ///
    /// Layers, least specific first: global, plugin, goal, goal target, then each nested
    /// task on the path followed by its target.
    pub fn to_kv(
        &self,
        task: &TaskPath,
        target: Option<&str>,
        plugin: Option<&str>,
    ) -> Result<LayeredKv, TaskError> {
        let mut layers = vec![layer(&self.properties)];

        if let Some(p) = plugin.and_then(|name| self.plugin(name)) {
            layers.push(layer(&p.properties));
        }

        for level in self.levels(task) {
            layers.push(layer(&level.properties));
            if let Some(t) = target.and_then(|t| level.targets.get(t)) {
                layers.push(layer(&t.properties));
            }
        }

        Ok(LayeredKv::new(layers)?)
    }

    /// Whether `plugin` may take part in `task`.
    ///
    /// The most specific level whose lists mention the plugin decides. A non-empty enabled
    /// list that omits the plugin disables it at that level.
    pub fn plugin_enabled(&self, task: &TaskPath, plugin: &str) -> bool {
        let mut enabled = true;
        for level in self.levels(task) {
            if level.disabled_plugins.iter().any(|p| p == plugin) {
                enabled = false;
            } else if level.enabled_plugins.iter().any(|p| p == plugin) {
                enabled = true;
            } else if !level.enabled_plugins.is_empty() {
                enabled = false;
            }
        }
        enabled
    }

    /// Goal then nested task settings along `task`, stopping at the first missing level.
    fn levels(&self, task: &TaskPath) -> Vec<&TaskConfig> {
        let mut out = Vec::new();
        let Some(goal) = self.goals.get(task.goal()) else {
            return out;
        };
        out.push(goal);

        let mut current = goal;
        for name in task.tasks() {
            match current.tasks.get(name) {
                Some(next) => {
                    out.push(next);
                    current = next;
                }
                None => break,
            }
        }
        out
    }
}

fn layer(props: &Properties) -> Arc<dyn Kv> {
    Arc::new(MemoryKv::with_values(props.iter().filter_map(|(k, v)| {
        Value::from_json(v.clone()).map(|v| (k.clone(), v))
    })))
}

#[cfg(test)]
mod tests {
    use stagehand_store::KvExt;

    use super::*;

    const CONFIG: &str = r#"{
        "properties": { "release": { "draft": true }, "level": "global" },
        "plugins": [
            { "name": "github", "command": "stagehand-github", "properties": { "level": "plugin" } },
            { "name": "changelog", "command": "stagehand-changelog" }
        ],
        "goals": {
            "release": {
                "properties": { "level": "goal" },
                "disabledPlugins": ["changelog"],
                "targets": { "prod": { "properties": { "level": "goal-target" } } },
                "tasks": {
                    "mint": {
                        "properties": { "release": { "tag": "v1.2.3" } },
                        "enabledPlugins": ["changelog"],
                        "targets": { "prod": { "properties": { "level": "task-target" } } }
                    },
                    "publish": { "enabledPlugins": ["github"] }
                }
            }
        }
    }"#;

    fn path(p: &str) -> TaskPath {
        TaskPath::parse(p).unwrap()
    }

    #[test]
    fn layers_resolve_most_specific_first() {
        let cfg = Config::from_json(CONFIG).unwrap();

        let kv = cfg.to_kv(&path("/release"), None, None).unwrap();
        assert_eq!(kv.get_string("level"), "goal");
        assert!(kv.get_bool("release.draft"));

        let kv = cfg.to_kv(&path("/release"), Some("prod"), Some("github")).unwrap();
        assert_eq!(kv.get_string("level"), "goal-target");

        let kv = cfg
            .to_kv(&path("/release/mint"), Some("prod"), Some("github"))
            .unwrap();
        assert_eq!(kv.get_string("level"), "task-target");
        assert_eq!(kv.get_string("release.tag"), "v1.2.3");

        let kv = cfg.to_kv(&path("/lint"), None, Some("github")).unwrap();
        assert_eq!(kv.get_string("level"), "plugin");
    }

    #[test]
    fn plugin_lists_most_specific_wins() {
        let cfg = Config::from_json(CONFIG).unwrap();

        assert!(cfg.plugin_enabled(&path("/lint"), "changelog"));
        assert!(!cfg.plugin_enabled(&path("/release"), "changelog"));
        assert!(cfg.plugin_enabled(&path("/release/mint"), "changelog"));
        assert!(!cfg.plugin_enabled(&path("/release/mint"), "github"));
        assert!(cfg.plugin_enabled(&path("/release/publish"), "github"));
    }

    #[test]
    fn plugins_are_listed_with_commands() {
        let cfg = Config::from_json(CONFIG).unwrap();
        assert_eq!(cfg.plugin("github").map(|p| p.command.as_str()), Some("stagehand-github"));
        assert!(cfg.plugin("jira").is_none());
    }
}
