use std::path::Path;

use chrono::Utc;

use crate::{
    load_config, log_dir_path, resolve_mode, run_relay, DispatchMode, DispatchReport,
    HttpTransport, RelayOptions, ToolContext, ToolRegistry, Transport,
};

pub(crate) struct DispatchRequest {
    pub(crate) target: String,
    pub(crate) prompt: String,
    pub(crate) mode: String,
    pub(crate) max_turns: Option<usize>,
    pub(crate) timeout_ms: Option<u64>,
    pub(crate) log: bool,
}

/// Run one dispatch against one target. Mode resolution happens before any
/// conversation is created; an unknown mode or target fails the whole
/// dispatch with no network traffic.
pub(crate) fn run_dispatch(
    workspace: &Path,
    request: &DispatchRequest,
) -> Result<DispatchReport, Box<dyn std::error::Error>> {
    let requested = DispatchMode::parse(&request.mode).ok_or_else(|| {
        format!(
            "unknown mode '{}' (expected plain, native, or relay)",
            request.mode
        )
    })?;
    let config = load_config(workspace);
    let target = config
        .find_target(&request.target)
        .ok_or_else(|| format!("unknown target '{}' in config", request.target))?
        .clone();

    let decision = resolve_mode(requested, &target);
    if let Some(note) = &decision.note {
        eprintln!("[dispatch] {note}");
    }
    let timeout_ms = config.effective_timeout_ms(request.timeout_ms);

    match decision.effective {
        DispatchMode::Plain | DispatchMode::Native => {
            let native = decision.effective == DispatchMode::Native;
            let mut transport = HttpTransport::new(&target, native);
            let final_text = single_round_trip(&mut transport, &request.prompt, timeout_ms)?;
            Ok(DispatchReport {
                target: target.name,
                final_text,
                effective_mode: decision.effective,
                fallback_note: decision.note,
                turns: 1,
                tool_calls: 0,
            })
        }
        DispatchMode::Relay => {
            let registry = ToolRegistry::standard();
            let mut ctx = ToolContext::new(
                config.project_root(workspace),
                timeout_ms,
                config.knowledge.clone(),
            );
            let options = RelayOptions {
                max_turns: config.effective_max_turns(request.max_turns),
                timeout_ms,
                session: format!("{}-{}", target.name, Utc::now().timestamp_millis()),
                log_dir: request.log.then(|| log_dir_path(workspace)),
            };
            let mut transport = HttpTransport::new(&target, false);
            let report = run_relay(
                &mut transport,
                &registry,
                &mut ctx,
                &request.prompt,
                &options,
            )?;
            Ok(DispatchReport {
                target: target.name,
                final_text: report.final_text,
                effective_mode: DispatchMode::Relay,
                fallback_note: decision.note,
                turns: report.turns,
                tool_calls: report.tool_calls,
            })
        }
    }
}

/// Plain and native modes are one round-trip: create, send, destroy.
/// Teardown failures are advisory here too.
fn single_round_trip(
    transport: &mut dyn Transport,
    prompt: &str,
    timeout_ms: u64,
) -> Result<String, String> {
    let handle = transport
        .create_conversation()
        .map_err(|e| format!("conversation create failed: {e}"))?;
    let result = transport
        .send(&handle, prompt, timeout_ms)
        .map_err(|e| e.to_string());
    if let Err(e) = transport.destroy(&handle) {
        eprintln!("[dispatch] conversation teardown failed (ignored): {e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_workspace(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("toolrelay_test")
            .join(format!("dispatch_{}_{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn request(mode: &str, target: &str) -> DispatchRequest {
        DispatchRequest {
            target: target.to_string(),
            prompt: "hi".to_string(),
            mode: mode.to_string(),
            max_turns: None,
            timeout_ms: None,
            log: false,
        }
    }

    #[test]
    fn invalid_mode_fails_before_any_session() {
        let ws = temp_workspace("badmode");
        let err = run_dispatch(&ws, &request("turbo", "anything")).unwrap_err();
        assert!(err.to_string().contains("unknown mode 'turbo'"));
        std::fs::remove_dir_all(&ws).ok();
    }

    #[test]
    fn unknown_target_fails_before_any_session() {
        let ws = temp_workspace("badtarget");
        let err = run_dispatch(&ws, &request("relay", "ghost")).unwrap_err();
        assert!(err.to_string().contains("unknown target 'ghost'"));
        std::fs::remove_dir_all(&ws).ok();
    }
}
