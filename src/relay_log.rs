use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::RelayLogEntry;

pub(crate) fn log_dir_path(workspace: &Path) -> PathBuf {
    workspace.join("logs")
}

fn log_file_path(dir: &Path) -> PathBuf {
    dir.join(format!("relay-{}.jsonl", Utc::now().format("%Y-%m-%d")))
}

/// Append one transcript entry to the day's log file. Logging is advisory;
/// failures are reported to stderr and swallowed.
pub(crate) fn append_log_entry(dir: &Path, entry: &RelayLogEntry) {
    if let Err(e) = try_append(dir, entry) {
        eprintln!("[relay] transcript log write failed: {e}");
    }
}

fn try_append(dir: &Path, entry: &RelayLogEntry) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(dir)?;
    let line = serde_json::to_string(entry)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path(dir))?;
    writeln!(file, "{line}")?;
    Ok(())
}

pub(crate) fn entry(session: &str, role: &str, text: &str, meta: Option<serde_json::Value>) -> RelayLogEntry {
    RelayLogEntry {
        session: Some(session.to_string()),
        role: role.to_string(),
        text: text.to_string(),
        meta,
        ts_utc: Some(Utc::now().timestamp()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_append_as_jsonl_lines() {
        let dir = std::env::temp_dir()
            .join("toolrelay_test")
            .join(format!("log_{}", std::process::id()));
        append_log_entry(&dir, &entry("s1", "prompt", "first", None));
        append_log_entry(
            &dir,
            &entry("s1", "reply", "second", Some(serde_json::json!({"turn": 1}))),
        );
        let content = std::fs::read_to_string(log_file_path(&dir)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: RelayLogEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.role, "reply");
        assert_eq!(parsed.meta.unwrap()["turn"], 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
