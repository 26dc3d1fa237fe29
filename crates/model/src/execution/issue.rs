use serde::{Deserialize, Serialize};
use std::fmt;

/// A configuration or validation problem found before a stage starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub group: String,
    pub config: Option<String>,
    pub code: String,
    pub message: String,
}

impl ConfigIssue {
    pub fn new(group: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigIssue {
            group: group.into(),
            config: None,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn for_config(
        group: impl Into<String>,
        config: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ConfigIssue {
            config: Some(config.into()),
            ..ConfigIssue::new(group, code, message)
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.config {
            Some(config) => write!(
                f,
                "[{}] {}.{}: {}",
                self.code, self.group, config, self.message
            ),
            None => write!(f, "[{}] {}: {}", self.code, self.group, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_config_path() {
        let issue = ConfigIssue::for_config("TABLE", "threads", "TABLE_01", "must be positive");
        assert_eq!(issue.to_string(), "[TABLE_01] TABLE.threads: must be positive");
    }
}
