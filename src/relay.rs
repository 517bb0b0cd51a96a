use std::path::PathBuf;

use serde_json::json;

use crate::{
    append_log_entry, entry, parse_invocations, truncate_text, RelayReport, ToolContext,
    ToolInvocation, ToolRegistry, Transport,
};

pub(crate) const MAX_TURNS_EXHAUSTED_MARKER: &str =
    "[relay] maximum turns reached without a final answer";

const MAX_TOOL_OUTPUT_CHARS: usize = 8_000;

const CONTINUE_INSTRUCTION: &str = "Continue using these tool results. Emit more <tool /> tags if \
you need anything else, or reply with your final answer and no tags when you are done.";

pub(crate) struct RelayOptions {
    pub(crate) max_turns: usize,
    pub(crate) timeout_ms: u64,
    pub(crate) session: String,
    pub(crate) log_dir: Option<PathBuf>,
}

/// Protocol instructions sent on turn zero, ahead of the user's request.
/// The tool list comes from the registry so the text never drifts from what
/// is actually registered.
pub(crate) fn protocol_instructions(registry: &ToolRegistry) -> String {
    let mut text = String::from(
        "You do not have native function calling. To use a tool, include a tag in your reply:\n\n  \
         <tool name=\"TOOL\" attr=\"value\" />\n\n\
         The edit tool uses a block form whose body carries the payload:\n\n  \
         <tool name=\"edit\" path=\"FILE\">\n  OLD: text to replace\n  NEW: replacement text\n  </tool>\n\n\
         Attribute values are double-quoted and must not contain double quotes.\n\n\
         Available tools:\n",
    );
    for (name, usage, description) in registry.catalog() {
        text.push_str(&format!("- {name} {usage}\n  {description}\n"));
    }
    text.push_str(
        "\nEach tool result arrives on the next turn inside a <tool_result name=\"...\"> block.\n\
         When you have everything you need, reply with your final answer and no tool tags.",
    );
    text
}

/// Run one relay session over an existing transport. The conversation is
/// created here and torn down on every exit path; teardown failures are
/// logged and never override the session result.
pub(crate) fn run_relay(
    transport: &mut dyn Transport,
    registry: &ToolRegistry,
    ctx: &mut ToolContext,
    request_text: &str,
    options: &RelayOptions,
) -> Result<RelayReport, String> {
    let handle = transport
        .create_conversation()
        .map_err(|e| format!("conversation create failed: {e}"))?;
    let result = drive_turns(transport, &handle, registry, ctx, request_text, options);
    if let Err(e) = transport.destroy(&handle) {
        eprintln!("[relay] conversation teardown failed (ignored): {e}");
    }
    result
}

fn drive_turns(
    transport: &mut dyn Transport,
    handle: &str,
    registry: &ToolRegistry,
    ctx: &mut ToolContext,
    request_text: &str,
    options: &RelayOptions,
) -> Result<RelayReport, String> {
    let mut prompt = format!(
        "{}\n\n## Request\n\n{request_text}",
        protocol_instructions(registry)
    );
    let mut tool_calls_total = 0usize;
    let mut turn = 0usize;

    while turn < options.max_turns {
        log_turn(options, "prompt", &prompt, turn);
        let reply = transport
            .send(handle, &prompt, options.timeout_ms)
            .map_err(|e| format!("relay failed on turn {turn}: {e}"))?;
        log_turn(options, "reply", &reply, turn);
        turn += 1;

        let invocations = parse_invocations(&reply);
        if invocations.is_empty() {
            return Ok(RelayReport {
                final_text: reply,
                turns: turn,
                tool_calls: tool_calls_total,
            });
        }

        tool_calls_total += invocations.len();
        let results = execute_invocations(&invocations, registry, ctx, options);
        prompt = format!("{results}\n\n{CONTINUE_INSTRUCTION}");
    }

    eprintln!(
        "[relay] turn budget of {} exhausted for session {}",
        options.max_turns, options.session
    );
    Ok(RelayReport {
        final_text: MAX_TURNS_EXHAUSTED_MARKER.to_string(),
        turns: options.max_turns,
        tool_calls: tool_calls_total,
    })
}

/// Execute parsed invocations in document order and render the labeled
/// result blocks fed back to the model.
fn execute_invocations(
    invocations: &[ToolInvocation],
    registry: &ToolRegistry,
    ctx: &mut ToolContext,
    options: &RelayOptions,
) -> String {
    let mut blocks = Vec::with_capacity(invocations.len());
    for inv in invocations {
        eprintln!("[relay] executing tool '{}'", inv.name);
        let output = registry.execute(inv, ctx);
        let output = truncate_text(&output, MAX_TOOL_OUTPUT_CHARS);
        if let Some(dir) = &options.log_dir {
            append_log_entry(
                dir,
                &entry(
                    &options.session,
                    "tool",
                    &output,
                    Some(json!({ "tool": inv.name })),
                ),
            );
        }
        blocks.push(format!(
            "<tool_result name=\"{}\">\n{output}\n</tool_result>",
            inv.name
        ));
    }
    blocks.join("\n\n")
}

fn log_turn(options: &RelayOptions, role: &str, text: &str, turn: usize) {
    if let Some(dir) = &options.log_dir {
        append_log_entry(
            dir,
            &entry(&options.session, role, text, Some(json!({ "turn": turn }))),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportError;
    use std::path::Path;

    /// Scripted transport: returns canned replies in order and records the
    /// calls it saw.
    struct FakeTransport {
        replies: Vec<String>,
        sent: Vec<String>,
        destroyed: bool,
        fail_send: Option<TransportError>,
    }

    impl FakeTransport {
        fn scripted(replies: &[&str]) -> Self {
            FakeTransport {
                replies: replies.iter().map(|s| s.to_string()).collect(),
                sent: Vec::new(),
                destroyed: false,
                fail_send: None,
            }
        }
    }

    impl Transport for FakeTransport {
        fn create_conversation(&mut self) -> Result<String, TransportError> {
            Ok("conv-1".to_string())
        }

        fn send(
            &mut self,
            _handle: &str,
            text: &str,
            _timeout_ms: u64,
        ) -> Result<String, TransportError> {
            if let Some(err) = &self.fail_send {
                return Err(err.clone());
            }
            self.sent.push(text.to_string());
            if self.replies.is_empty() {
                return Err(TransportError::Other("script exhausted".to_string()));
            }
            Ok(self.replies.remove(0))
        }

        fn destroy(&mut self, _handle: &str) -> Result<(), String> {
            self.destroyed = true;
            Ok(())
        }
    }

    fn options(max_turns: usize) -> RelayOptions {
        RelayOptions {
            max_turns,
            timeout_ms: 1_000,
            session: "test".to_string(),
            log_dir: None,
        }
    }

    fn test_ctx(root: &Path) -> ToolContext {
        ToolContext::new(root.to_path_buf(), 5_000, None)
    }

    fn fixture_root(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir()
            .join("toolrelay_test")
            .join(format!("relay_{}_{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn reply_without_tags_ends_in_one_turn() {
        let root = fixture_root("plain");
        let mut transport = FakeTransport::scripted(&["The answer is 42."]);
        let registry = ToolRegistry::standard();
        let report = run_relay(
            &mut transport,
            &registry,
            &mut test_ctx(&root),
            "what is the answer?",
            &options(5),
        )
        .unwrap();
        assert_eq!(report.final_text, "The answer is 42.");
        assert_eq!(report.turns, 1);
        assert_eq!(report.tool_calls, 0);
        assert!(transport.destroyed);
        // Turn zero carries the protocol instructions and the request.
        assert!(transport.sent[0].contains("<tool name=\"TOOL\""));
        assert!(transport.sent[0].contains("what is the answer?"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn persistent_tagging_exhausts_the_budget() {
        let root = fixture_root("budget");
        let tagged = r#"<tool name="list" pattern="*.nope" />"#;
        let mut transport = FakeTransport::scripted(&[tagged, tagged, tagged, tagged, tagged]);
        let registry = ToolRegistry::standard();
        let report = run_relay(
            &mut transport,
            &registry,
            &mut test_ctx(&root),
            "loop forever",
            &options(5),
        )
        .unwrap();
        assert_eq!(report.final_text, MAX_TURNS_EXHAUSTED_MARKER);
        assert_eq!(report.turns, 5);
        assert_eq!(report.tool_calls, 5);
        assert_eq!(transport.sent.len(), 5);
        assert!(transport.destroyed);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn tool_results_feed_the_next_turn() {
        let root = fixture_root("roundtrip");
        std::fs::write(root.join("config.txt"), "threshold = 7\n").unwrap();
        let mut transport = FakeTransport::scripted(&[
            r#"Let me check. <tool name="read" path="config.txt" />"#,
            "The threshold is 7.",
        ]);
        let registry = ToolRegistry::standard();
        let report = run_relay(
            &mut transport,
            &registry,
            &mut test_ctx(&root),
            "what is the threshold?",
            &options(5),
        )
        .unwrap();
        assert_eq!(report.final_text, "The threshold is 7.");
        assert_eq!(report.turns, 2);
        assert_eq!(report.tool_calls, 1);
        // The second prompt carries the labeled result and the continuation.
        assert!(transport.sent[1].contains("<tool_result name=\"read\">"));
        assert!(transport.sent[1].contains("threshold = 7"));
        assert!(transport.sent[1].contains("final answer"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn executor_errors_are_returned_to_the_model_not_fatal() {
        let root = fixture_root("tool_err");
        let mut transport = FakeTransport::scripted(&[
            r#"<tool name="read" path="missing.txt" />"#,
            "Could not find it.",
        ]);
        let registry = ToolRegistry::standard();
        let report = run_relay(
            &mut transport,
            &registry,
            &mut test_ctx(&root),
            "read missing",
            &options(5),
        )
        .unwrap();
        assert_eq!(report.final_text, "Could not find it.");
        assert!(transport.sent[1].contains("[ERROR]"));
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn transport_failure_is_fatal_but_still_tears_down() {
        let root = fixture_root("fatal");
        let mut transport = FakeTransport::scripted(&[]);
        transport.fail_send = Some(TransportError::Timeout { timeout_ms: 1_000 });
        let registry = ToolRegistry::standard();
        let err = run_relay(
            &mut transport,
            &registry,
            &mut test_ctx(&root),
            "hello",
            &options(5),
        )
        .unwrap_err();
        assert!(err.contains("timed out after 1000ms"), "got: {err}");
        assert!(transport.destroyed);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn instructions_list_every_registered_tool() {
        let registry = ToolRegistry::standard();
        let text = protocol_instructions(&registry);
        for name in registry.names() {
            assert!(text.contains(&format!("- {name} ")), "missing {name}");
        }
    }
}
