use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{env_optional, KnowledgeConfig, TargetConfig};

pub(crate) const DEFAULT_MAX_TURNS: usize = 5;
pub(crate) const DEFAULT_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct RelayConfig {
    #[serde(default)]
    pub(crate) targets: Vec<TargetConfig>,
    #[serde(default)]
    pub(crate) knowledge: Option<KnowledgeConfig>,
    /// Project root for file tools. Defaults to the workspace itself.
    #[serde(default)]
    pub(crate) project_root: Option<String>,
    #[serde(default)]
    pub(crate) max_turns: Option<usize>,
    #[serde(default)]
    pub(crate) timeout_ms: Option<u64>,
}

pub(crate) fn config_file_path(workspace: &Path) -> PathBuf {
    workspace.join("config.json")
}

pub(crate) fn load_config(workspace: &Path) -> RelayConfig {
    let path = config_file_path(workspace);
    let mut config = match std::fs::read_to_string(&path) {
        Ok(data) => match serde_json::from_str(&data) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("[config] {} is not valid JSON: {e}", path.display());
                RelayConfig::default()
            }
        },
        Err(_) => RelayConfig::default(),
    };

    // Env overrides win over the file.
    if let Some(url) = env_optional("TOOLRELAY_KNOWLEDGE_URL") {
        let timeout_ms = config.knowledge.as_ref().and_then(|k| k.timeout_ms);
        config.knowledge = Some(KnowledgeConfig { url, timeout_ms });
    }
    if let Some(root) = env_optional("TOOLRELAY_PROJECT_ROOT") {
        config.project_root = Some(root);
    }
    config
}

impl RelayConfig {
    pub(crate) fn find_target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub(crate) fn project_root(&self, workspace: &Path) -> PathBuf {
        match &self.project_root {
            Some(root) => PathBuf::from(root),
            None => workspace.to_path_buf(),
        }
    }

    pub(crate) fn effective_max_turns(&self, override_turns: Option<usize>) -> usize {
        override_turns
            .or(self.max_turns)
            .unwrap_or(DEFAULT_MAX_TURNS)
    }

    pub(crate) fn effective_timeout_ms(&self, override_ms: Option<u64>) -> u64 {
        override_ms.or(self.timeout_ms).unwrap_or(DEFAULT_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_workspace(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("toolrelay_test")
            .join(format!("cfg_{}_{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_config_yields_defaults() {
        let ws = temp_workspace("missing");
        let cfg = load_config(&ws);
        assert!(cfg.targets.is_empty());
        assert_eq!(cfg.effective_max_turns(None), DEFAULT_MAX_TURNS);
        assert_eq!(cfg.effective_timeout_ms(None), DEFAULT_TIMEOUT_MS);
        std::fs::remove_dir_all(&ws).ok();
    }

    #[test]
    fn file_config_parses_targets() {
        let ws = temp_workspace("targets");
        std::fs::write(
            config_file_path(&ws),
            r#"{
                "targets": [
                    { "name": "local", "model": "llama3", "supports_native_tools": false },
                    { "name": "big", "model": "gpt-x", "supports_native_tools": true }
                ],
                "max_turns": 8
            }"#,
        )
        .unwrap();
        let cfg = load_config(&ws);
        assert_eq!(cfg.targets.len(), 2);
        assert!(cfg.find_target("big").unwrap().supports_native_tools);
        assert!(!cfg.find_target("local").unwrap().supports_native_tools);
        assert_eq!(cfg.effective_max_turns(None), 8);
        assert_eq!(cfg.effective_max_turns(Some(2)), 2);
        std::fs::remove_dir_all(&ws).ok();
    }
}
