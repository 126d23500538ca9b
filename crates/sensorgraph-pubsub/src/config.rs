use sensorgraph_query::CompilerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine settings. Every field has a default, so a partial JSON file (or
/// none at all) is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget for one entity-state lookup while matching a filtered
    /// subscription.
    pub state_timeout_ms: u64,
    /// Version segments accepted in front of a topic path.
    pub topic_prefixes: Vec<String>,
    #[serde(flatten)]
    pub compiler: CompilerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            state_timeout_ms: 2000,
            topic_prefixes: vec!["v1.0".to_string(), "v1.1".to_string()],
            compiler: CompilerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn state_timeout(&self) -> Duration {
        Duration::from_millis(self.state_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"state_timeout_ms": 50, "max_navigation_depth": 2}"#)
                .unwrap();
        assert_eq!(config.state_timeout(), Duration::from_millis(50));
        assert_eq!(config.compiler.max_navigation_depth, 2);
        assert_eq!(config.topic_prefixes, vec!["v1.0", "v1.1"]);
    }
}
