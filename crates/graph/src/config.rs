//! Graph settings
//!
//! Settings are carried by every node built from a [`NodeBuilder`] and by
//! child lists. They can be loaded from environment variables on top of a
//! base value (file, database or `Default`).
//!
//! Supported environment variables:
//! - `WRLDBLDR_GRAPH_RERUN_RULES_ON_RESUME`: `true`/`false`
//! - `WRLDBLDR_GRAPH_MAX_WAIT_RESCANS`: rescan limit for `wait_for_tasks` (range: 1-1000000)
//!
//! [`NodeBuilder`]: crate::node::NodeBuilder

use serde::{Deserialize, Serialize};

const ENV_RERUN_RULES_ON_RESUME: &str = "WRLDBLDR_GRAPH_RERUN_RULES_ON_RESUME";
const ENV_MAX_WAIT_RESCANS: &str = "WRLDBLDR_GRAPH_MAX_WAIT_RESCANS";

const MIN_WAIT_RESCANS: u32 = 1;
const MAX_WAIT_RESCANS: u32 = 1_000_000;

fn default_max_wait_rescans() -> u32 {
    10_000
}

/// Behavioural switches for nodes and lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSettings {
    /// Re-run every rule when a node leaves the paused state.
    ///
    /// Off by default: values set while paused are treated as already
    /// validated (hydration), and callers re-run rules explicitly when needed.
    #[serde(default)]
    rerun_rules_on_resume: bool,

    /// Upper bound on `wait_for_tasks` rescans before giving up.
    #[serde(default = "default_max_wait_rescans")]
    max_wait_rescans: u32,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            rerun_rules_on_resume: false,
            max_wait_rescans: default_max_wait_rescans(),
        }
    }
}

impl GraphSettings {
    #[inline]
    pub fn rerun_rules_on_resume(&self) -> bool {
        self.rerun_rules_on_resume
    }

    #[inline]
    pub fn max_wait_rescans(&self) -> u32 {
        self.max_wait_rescans
    }

    pub fn with_rerun_rules_on_resume(mut self, enabled: bool) -> Self {
        self.rerun_rules_on_resume = enabled;
        self
    }

    pub fn with_max_wait_rescans(mut self, limit: u32) -> Self {
        self.max_wait_rescans = limit.clamp(MIN_WAIT_RESCANS, MAX_WAIT_RESCANS);
        self
    }

    /// Default settings with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().apply_env_overrides()
    }

    /// Apply environment variable overrides on top of `self`.
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup(ENV_RERUN_RULES_ON_RESUME) {
            match val.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => {
                    self.rerun_rules_on_resume = true;
                    tracing::info!(enabled = true, "Applied {} environment variable", ENV_RERUN_RULES_ON_RESUME);
                }
                "0" | "false" | "no" | "off" => {
                    self.rerun_rules_on_resume = false;
                    tracing::info!(enabled = false, "Applied {} environment variable", ENV_RERUN_RULES_ON_RESUME);
                }
                _ => {
                    tracing::warn!(
                        val = %val,
                        "{} is not a valid boolean, ignoring",
                        ENV_RERUN_RULES_ON_RESUME
                    );
                }
            }
        }

        if let Some(val) = lookup(ENV_MAX_WAIT_RESCANS) {
            if let Ok(limit) = val.trim().parse::<u32>() {
                if (MIN_WAIT_RESCANS..=MAX_WAIT_RESCANS).contains(&limit) {
                    self.max_wait_rescans = limit;
                    tracing::info!(limit, "Applied {} environment variable", ENV_MAX_WAIT_RESCANS);
                } else {
                    tracing::warn!(
                        limit,
                        "{} out of range [{}, {}], ignoring",
                        ENV_MAX_WAIT_RESCANS,
                        MIN_WAIT_RESCANS,
                        MAX_WAIT_RESCANS
                    );
                }
            } else {
                tracing::warn!(
                    val = %val,
                    "{} is not a valid u32, ignoring",
                    ENV_MAX_WAIT_RESCANS
                );
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_do_not_rerun_rules() {
        let settings = GraphSettings::default();
        assert!(!settings.rerun_rules_on_resume());
        assert_eq!(settings.max_wait_rescans(), 10_000);
    }

    #[test]
    fn overrides_are_applied() {
        let settings = GraphSettings::default().apply_overrides(lookup(&[
            (ENV_RERUN_RULES_ON_RESUME, "true"),
            (ENV_MAX_WAIT_RESCANS, "50"),
        ]));
        assert!(settings.rerun_rules_on_resume());
        assert_eq!(settings.max_wait_rescans(), 50);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let settings = GraphSettings::default().apply_overrides(lookup(&[
            (ENV_RERUN_RULES_ON_RESUME, "maybe"),
            (ENV_MAX_WAIT_RESCANS, "0"),
        ]));
        assert_eq!(settings, GraphSettings::default());
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let settings: GraphSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, GraphSettings::default());

        let settings: GraphSettings =
            serde_json::from_str(r#"{"rerunRulesOnResume": true}"#).unwrap();
        assert!(settings.rerun_rules_on_resume());
    }
}
