use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Normalized slash-delimited task path, e.g. `/release/mint/changelog`.
///
/// The first segment is the goal name; the remaining segments name nested tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskPath {
    segments: Vec<String>,
}

impl TaskPath {
    /// Parse and clean a path: repeated slashes and `.` segments are dropped, `..` pops.
    pub fn parse(path: &str) -> Result<Self, ModelError> {
        let mut segments: Vec<String> = Vec::new();
        for part in path.split('/') {
            match part.trim() {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                p => segments.push(p.to_string()),
            }
        }
        if segments.is_empty() {
            return Err(ModelError::EmptyPath);
        }
        Ok(Self { segments })
    }

    pub fn goal(&self) -> &str {
        &self.segments[0]
    }

    /// Nested task names below the goal.
    pub fn tasks(&self) -> &[String] {
        &self.segments[1..]
    }

    pub fn is_goal(&self) -> bool {
        self.segments.len() == 1
    }

    pub fn join(&self, name: &str) -> Result<Self, ModelError> {
        Self::parse(&format!("{self}/{name}"))
    }

    /// Path of the enclosing task, `None` for a goal.
    pub fn parent(&self) -> Option<Self> {
        if self.is_goal() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Whether `self` is `other` or nested below it.
    pub fn starts_with(&self, other: &TaskPath) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.segments {
            write!(f, "/{s}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for TaskPath {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaskPath> for String {
    fn from(value: TaskPath) -> Self {
        value.to_string()
    }
}
