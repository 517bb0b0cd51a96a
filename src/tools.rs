use std::collections::HashMap;
use std::path::PathBuf;

use crate::{
    EditTool, KnowledgeClient, KnowledgeConfig, KnowledgeSearchTool, KnowledgeSourcesTool,
    ListTool, ReadTool, RunTool, SearchTool, ToolInvocation,
};

/// Shared state handed to executors: the project root boundary, the shell
/// timeout, and the lazily-established knowledge client.
pub(crate) struct ToolContext {
    pub(crate) root: PathBuf,
    pub(crate) command_timeout_ms: u64,
    knowledge_config: Option<KnowledgeConfig>,
    knowledge: Option<KnowledgeClient>,
}

impl ToolContext {
    pub(crate) fn new(
        root: PathBuf,
        command_timeout_ms: u64,
        knowledge_config: Option<KnowledgeConfig>,
    ) -> Self {
        ToolContext {
            root,
            command_timeout_ms,
            knowledge_config,
            knowledge: None,
        }
    }

    /// The knowledge client is created on first use, not at startup; a
    /// dispatch that never touches knowledge tools never opens a session.
    pub(crate) fn knowledge(&mut self) -> Result<&mut KnowledgeClient, String> {
        if self.knowledge.is_none() {
            let cfg = self
                .knowledge_config
                .clone()
                .ok_or("knowledge service is not configured")?;
            self.knowledge = Some(KnowledgeClient::new(&cfg));
        }
        match self.knowledge.as_mut() {
            Some(client) => Ok(client),
            None => Err("knowledge client unavailable".to_string()),
        }
    }
}

/// One capability: takes a parsed invocation, returns result text. Failures
/// are folded into `[ERROR] ...` text, never raised; the model reads them on
/// its next turn.
pub(crate) trait ToolExecutor {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// Attribute summary for the protocol instructions, e.g. `path, pattern`.
    fn usage(&self) -> &'static str;
    fn run(&self, inv: &ToolInvocation, ctx: &mut ToolContext) -> String;
}

/// Name → executor mapping, registered once at startup. Adding a tool is a
/// registration, not a new match arm.
pub(crate) struct ToolRegistry {
    executors: Vec<Box<dyn ToolExecutor>>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub(crate) fn standard() -> Self {
        let mut registry = ToolRegistry {
            executors: Vec::new(),
            index: HashMap::new(),
        };
        registry.register(Box::new(ReadTool));
        registry.register(Box::new(ListTool));
        registry.register(Box::new(SearchTool));
        registry.register(Box::new(RunTool));
        registry.register(Box::new(EditTool));
        registry.register(Box::new(KnowledgeSearchTool));
        registry.register(Box::new(KnowledgeSourcesTool));
        registry
    }

    pub(crate) fn register(&mut self, executor: Box<dyn ToolExecutor>) {
        let name = executor.name();
        if self.index.contains_key(name) {
            eprintln!("[tools] duplicate registration for '{name}' ignored");
            return;
        }
        self.index.insert(name, self.executors.len());
        self.executors.push(executor);
    }

    pub(crate) fn execute(&self, inv: &ToolInvocation, ctx: &mut ToolContext) -> String {
        match self.index.get(inv.name.as_str()) {
            Some(&idx) => self.executors[idx].run(inv, ctx),
            None => format!(
                "[ERROR] unknown tool '{}'. Available tools: {}",
                inv.name,
                self.names().join(", ")
            ),
        }
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.executors.iter().map(|e| e.name()).collect()
    }

    pub(crate) fn catalog(&self) -> Vec<(&'static str, &'static str, &'static str)> {
        self.executors
            .iter()
            .map(|e| (e.name(), e.usage(), e.description()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> ToolContext {
        ToolContext::new(std::env::temp_dir(), 5_000, None)
    }

    #[test]
    fn standard_registry_has_the_closed_tool_set() {
        let registry = ToolRegistry::standard();
        assert_eq!(
            registry.names(),
            vec![
                "read",
                "list",
                "search",
                "run",
                "edit",
                "knowledge_search",
                "knowledge_sources"
            ]
        );
    }

    #[test]
    fn unknown_tool_returns_error_text() {
        let registry = ToolRegistry::standard();
        let inv = ToolInvocation {
            name: "teleport".to_string(),
            attributes: Vec::new(),
            body: None,
        };
        let out = registry.execute(&inv, &mut test_context());
        assert!(out.starts_with("[ERROR] unknown tool 'teleport'"));
        assert!(out.contains("read"));
    }

    #[test]
    fn knowledge_without_config_is_an_error_string() {
        let mut ctx = test_context();
        let err = match ctx.knowledge() {
            Ok(_) => panic!("expected an error without knowledge config"),
            Err(e) => e,
        };
        assert!(err.contains("not configured"));
    }
}
