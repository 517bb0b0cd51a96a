use std::env;
use std::path::PathBuf;
use std::process::Command as ProcessCommand;

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Trim text to `max_chars`, appending an explicit truncation notice.
/// Output below the cap passes through untouched.
pub(crate) fn truncate_text(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n[truncated: {total} chars total, showing first {max_chars}]")
}

/// Optional wrapper prepended to every external command, e.g. a sandbox
/// runner. Parsed with shell quoting rules.
pub(crate) fn command_wrapper() -> Option<Vec<String>> {
    env_optional("TOOLRELAY_COMMAND_WRAPPER")
        .and_then(|raw| shlex::split(&raw))
        .filter(|parts| !parts.is_empty())
}

pub(crate) fn build_external_command(program: &str, args: &[String]) -> ProcessCommand {
    let mut cmd = if let Some(wrapper) = command_wrapper() {
        let mut c = ProcessCommand::new(&wrapper[0]);
        c.args(&wrapper[1..]).arg(program).args(args);
        c
    } else {
        let mut c = ProcessCommand::new(program);
        c.args(args);
        c
    };

    // Process group isolation: the child becomes its own process group leader
    // so we can kill the entire tree without affecting the parent.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    cmd
}

/// Kill a child process and its entire process group.
/// On Unix, sends SIGTERM first for graceful shutdown, then SIGKILL.
#[cfg(unix)]
pub(crate) fn kill_process_tree(child: &mut std::process::Child) {
    let pid = child.id() as i32;
    unsafe {
        libc::kill(-pid, libc::SIGTERM);
    }
    std::thread::sleep(std::time::Duration::from_millis(500));
    match child.try_wait() {
        Ok(Some(_)) => {}
        _ => unsafe {
            libc::killpg(pid, libc::SIGKILL);
        },
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
pub(crate) fn kill_process_tree(child: &mut std::process::Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Build primary output text for subprocess results, surfacing stderr when relevant.
pub(crate) fn subprocess_output_text(stdout: &str, stderr: &str, is_error: bool) -> String {
    if is_error {
        // On failure, combine stdout and stderr so the model sees the full picture
        let mut out = String::new();
        if !stdout.is_empty() {
            out.push_str(stdout);
        }
        if !stderr.is_empty() {
            if !out.is_empty() {
                out.push_str("\n--- stderr ---\n");
            }
            out.push_str(stderr);
        }
        if out.is_empty() {
            "Command failed with no output.".to_string()
        } else {
            out
        }
    } else if stdout.is_empty() && !stderr.is_empty() {
        // Some tools write informational output to stderr even on success
        stderr.to_string()
    } else if stdout.is_empty() {
        "Command executed.".to_string()
    } else {
        stdout.to_string()
    }
}

pub(crate) fn resolve_workspace(cli: Option<PathBuf>) -> PathBuf {
    if let Some(path) = cli {
        return path;
    }
    if let Some(value) = env_optional("TOOLRELAY_WORKSPACE") {
        return PathBuf::from(value);
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_passthrough_below_cap() {
        assert_eq!(truncate_text("short", 100), "short");
    }

    #[test]
    fn truncate_text_appends_notice() {
        let out = truncate_text(&"x".repeat(50), 10);
        assert!(out.starts_with("xxxxxxxxxx\n[truncated: 50 chars total"));
    }

    #[test]
    fn subprocess_output_prefers_stdout() {
        assert_eq!(subprocess_output_text("out", "err", false), "out");
        assert_eq!(subprocess_output_text("", "err", false), "err");
        assert_eq!(subprocess_output_text("", "", false), "Command executed.");
    }

    #[test]
    fn subprocess_output_combines_on_error() {
        let out = subprocess_output_text("partial", "boom", true);
        assert!(out.contains("partial"));
        assert!(out.contains("--- stderr ---"));
        assert!(out.contains("boom"));
    }
}
