use std::io::Read;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::{
    build_external_command, kill_process_tree, subprocess_output_text, ToolContext, ToolExecutor,
    ToolInvocation,
};

/// Destructive command fragments refused before any process is spawned.
/// Matching is case-insensitive substring search over the whole command line.
const DENYLIST: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm --recursive",
    "mkfs",
    "dd if=",
    "format c:",
    "git reset --hard",
    "git push --force",
    "git push -f",
];

pub(crate) fn denylist_hit(command: &str) -> Option<&'static str> {
    let lowered = command.to_lowercase();
    DENYLIST.iter().copied().find(|n| lowered.contains(*n))
}

pub(crate) struct RunTool;

impl ToolExecutor for RunTool {
    fn name(&self) -> &'static str {
        "run"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the project root. Destructive commands are blocked."
    }

    fn usage(&self) -> &'static str {
        r#"command="cargo test 2>&1 | tail -20""#
    }

    fn run(&self, inv: &ToolInvocation, ctx: &mut ToolContext) -> String {
        let Some(command) = inv.attr("command") else {
            return "[ERROR] run requires a command attribute".to_string();
        };
        run_command(command, &ctx.root, ctx.command_timeout_ms)
    }
}

pub(crate) fn run_command(command: &str, cwd: &std::path::Path, timeout_ms: u64) -> String {
    if let Some(needle) = denylist_hit(command) {
        return format!("[BLOCKED] refusing to run: command contains denylisted fragment '{needle}'");
    }

    let args = vec!["-c".to_string(), command.to_string()];
    let mut child = match build_external_command("sh", &args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return format!("[ERROR] cannot start shell: {e}"),
    };

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let readers = [
        spawn_reader(child.stdout.take(), Arc::clone(&stdout_buf)),
        spawn_reader(child.stderr.take(), Arc::clone(&stderr_buf)),
    ];

    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    kill_process_tree(&mut child);
                    return format!("[ERROR] command timed out after {timeout_ms}ms: {command}");
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                kill_process_tree(&mut child);
                return format!("[ERROR] wait failed: {e}");
            }
        }
    };

    // Readers finish at pipe EOF. The join is bounded because a detached
    // grandchild can hold the pipe open indefinitely.
    drain_readers(readers, Duration::from_millis(1_000));
    let stdout = buffer_text(&stdout_buf);
    let stderr = buffer_text(&stderr_buf);

    if status.success() {
        subprocess_output_text(stdout.trim_end(), stderr.trim_end(), false)
    } else {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        format!(
            "[ERROR] command exited with {code}\n{}",
            subprocess_output_text(stdout.trim_end(), stderr.trim_end(), true)
        )
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
    buf: Arc<Mutex<Vec<u8>>>,
) -> Option<std::thread::JoinHandle<()>> {
    let mut pipe = pipe?;
    Some(std::thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut guard) = buf.lock() {
                        guard.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    }))
}

/// Join the reader threads, giving up after `budget` so a pipe held open by
/// a detached grandchild cannot stall the result.
fn drain_readers(readers: [Option<std::thread::JoinHandle<()>>; 2], budget: Duration) {
    let deadline = Instant::now() + budget;
    for handle in readers.into_iter().flatten() {
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if handle.is_finished() {
            let _ = handle.join();
        }
    }
}

fn buffer_text(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    match buf.lock() {
        Ok(guard) => String::from_utf8_lossy(&guard).to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylist_is_case_insensitive() {
        assert_eq!(denylist_hit("RM -RF /tmp/x"), Some("rm -rf"));
        assert_eq!(denylist_hit("git PUSH --FORCE origin main"), Some("git push --force"));
        assert_eq!(denylist_hit("echo rm is fine"), None);
    }

    #[test]
    fn blocked_command_never_spawns() {
        let root = std::env::temp_dir();
        let marker = root.join(format!("relay_blocked_{}", std::process::id()));
        let cmd = format!("rm -rf /tmp/nothing; touch {}", marker.display());
        let out = run_command(&cmd, &root, 5_000);
        assert!(out.starts_with("[BLOCKED]"), "got: {out}");
        assert!(!marker.exists());
    }

    #[test]
    fn stdout_is_returned() {
        let out = run_command("echo hello", &std::env::temp_dir(), 5_000);
        assert_eq!(out, "hello");
    }

    #[test]
    fn failing_command_reports_exit_code() {
        let out = run_command("echo oops >&2; exit 3", &std::env::temp_dir(), 5_000);
        assert!(out.starts_with("[ERROR] command exited with 3"), "got: {out}");
        assert!(out.contains("oops"));
    }

    #[cfg(unix)]
    #[test]
    fn large_fast_output_is_captured_in_full() {
        // Well past the pipe buffer; the tail must survive the reader join.
        let out = run_command("seq 1 20000", &std::env::temp_dir(), 10_000);
        assert!(out.starts_with("1\n2\n"), "head clipped: {}", &out[..20.min(out.len())]);
        assert!(out.ends_with("\n20000"), "tail clipped, got ...{}", &out[out.len().saturating_sub(20)..]);
    }

    #[test]
    fn no_output_success_is_described() {
        let out = run_command("true", &std::env::temp_dir(), 5_000);
        assert_eq!(out, "Command executed.");
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_command() {
        let start = std::time::Instant::now();
        let out = run_command("sleep 10", &std::env::temp_dir(), 300);
        assert!(out.contains("timed out after 300ms"), "got: {out}");
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
    }
}
