use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::{
    build_external_command, subprocess_output_text, ToolContext, ToolExecutor, ToolInvocation,
};

const MAX_READ_BYTES: u64 = 200_000;
const MAX_LIST_ENTRIES: usize = 200;
const MAX_LIST_DEPTH: usize = 8;

/// Resolve a tool-supplied path against the project root and refuse anything
/// that lands outside it. Nonexistent targets are resolved via their parent
/// so edits can create files without opening an escape hatch.
pub(crate) fn resolve_in_root(root: &Path, raw: &str) -> Result<PathBuf, String> {
    let root_canon = fs::canonicalize(root)
        .map_err(|e| format!("project root {} is unusable: {e}", root.display()))?;
    let candidate = {
        let p = PathBuf::from(raw);
        if p.is_absolute() {
            p
        } else {
            root_canon.join(p)
        }
    };

    let resolved = if candidate.exists() {
        fs::canonicalize(&candidate).map_err(|e| format!("cannot resolve {raw}: {e}"))?
    } else {
        let parent = candidate
            .parent()
            .ok_or_else(|| format!("path outside the project root: {raw}"))?;
        let parent_canon = fs::canonicalize(parent)
            .map_err(|_| format!("path outside the project root: {raw}"))?;
        match candidate.file_name() {
            Some(name) => parent_canon.join(name),
            None => parent_canon,
        }
    };

    if resolved.starts_with(&root_canon) {
        Ok(resolved)
    } else {
        Err(format!("path outside the project root: {raw}"))
    }
}

fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

// === read ===

pub(crate) struct ReadTool;

impl ToolExecutor for ReadTool {
    fn name(&self) -> &'static str {
        "read"
    }

    fn description(&self) -> &'static str {
        "Read a file inside the project root."
    }

    fn usage(&self) -> &'static str {
        r#"path="relative/or/absolute/file""#
    }

    fn run(&self, inv: &ToolInvocation, ctx: &mut ToolContext) -> String {
        let Some(raw) = inv.attr("path") else {
            return "[ERROR] read requires a path attribute".to_string();
        };
        let path = match resolve_in_root(&ctx.root, raw) {
            Ok(p) => p,
            Err(e) => return format!("[ERROR] {e}"),
        };
        match read_bounded(&path) {
            Ok((text, clipped)) => {
                if clipped {
                    format!("{text}\n[truncated: file exceeds {MAX_READ_BYTES} bytes]")
                } else if text.is_empty() {
                    format!("{raw} is empty.")
                } else {
                    text
                }
            }
            Err(e) => format!("[ERROR] cannot read {raw}: {e}"),
        }
    }
}

fn read_bounded(path: &Path) -> Result<(String, bool), std::io::Error> {
    let file = fs::File::open(path)?;
    let len = file.metadata()?.len();
    let mut buf = Vec::new();
    file.take(MAX_READ_BYTES).read_to_end(&mut buf)?;
    Ok((String::from_utf8_lossy(&buf).to_string(), len > MAX_READ_BYTES))
}

// === list ===

pub(crate) struct ListTool;

impl ToolExecutor for ListTool {
    fn name(&self) -> &'static str {
        "list"
    }

    fn description(&self) -> &'static str {
        "List files under the project root matching a glob pattern."
    }

    fn usage(&self) -> &'static str {
        r#"pattern="*.rs" path="optional/subdir""#
    }

    fn run(&self, inv: &ToolInvocation, ctx: &mut ToolContext) -> String {
        let pattern_raw = inv.attr("pattern").unwrap_or("*");
        let pattern = match glob::Pattern::new(pattern_raw) {
            Ok(p) => p,
            Err(e) => return format!("[ERROR] invalid pattern '{pattern_raw}': {e}"),
        };
        let base = match inv.attr("path") {
            Some(raw) => match resolve_in_root(&ctx.root, raw) {
                Ok(p) => p,
                Err(e) => return format!("[ERROR] {e}"),
            },
            None => ctx.root.clone(),
        };

        // Match bare patterns against file names, pathed patterns against the
        // path relative to the listing base.
        let match_full_path = pattern_raw.contains('/');
        let mut matches = Vec::new();
        let mut clipped = false;
        for entry in walkdir::WalkDir::new(&base)
            .max_depth(MAX_LIST_DEPTH)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = relative_display(&base, entry.path());
            let hit = if match_full_path {
                pattern.matches(&rel)
            } else {
                pattern.matches(&entry.file_name().to_string_lossy())
            };
            if !hit {
                continue;
            }
            if matches.len() >= MAX_LIST_ENTRIES {
                clipped = true;
                break;
            }
            matches.push(rel);
        }

        if matches.is_empty() {
            return "No matches.".to_string();
        }
        matches.sort();
        let mut out = matches.join("\n");
        if clipped {
            out.push_str(&format!(
                "\n[truncated: more than {MAX_LIST_ENTRIES} matches]"
            ));
        }
        out
    }
}

// === search ===

pub(crate) struct SearchTool;

impl ToolExecutor for SearchTool {
    fn name(&self) -> &'static str {
        "search"
    }

    fn description(&self) -> &'static str {
        "Search file contents under the project root for a pattern."
    }

    fn usage(&self) -> &'static str {
        r#"pattern="regex or text" path="optional/subdir""#
    }

    fn run(&self, inv: &ToolInvocation, ctx: &mut ToolContext) -> String {
        let Some(pattern) = inv.attr("pattern") else {
            return "[ERROR] search requires a pattern attribute".to_string();
        };
        let base = match inv.attr("path") {
            Some(raw) => match resolve_in_root(&ctx.root, raw) {
                Ok(p) => p,
                Err(e) => return format!("[ERROR] {e}"),
            },
            None => ctx.root.clone(),
        };
        search_contents(pattern, &base)
    }
}

/// Delegate to ripgrep when present, plain grep otherwise. Exit status 1 with
/// no output means no matches for both tools.
fn search_contents(pattern: &str, base: &Path) -> String {
    let rg_args: Vec<String> = [
        "--line-number",
        "--no-heading",
        "--color",
        "never",
        "--max-count",
        "200",
        "-e",
        pattern,
        ".",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let output = match build_external_command("rg", &rg_args)
        .current_dir(base)
        .output()
    {
        Ok(out) => out,
        Err(_) => {
            let grep_args: Vec<String> = ["-rn", "-I", "-e", pattern, "."]
                .iter()
                .map(|s| s.to_string())
                .collect();
            match build_external_command("grep", &grep_args)
                .current_dir(base)
                .output()
            {
                Ok(out) => out,
                Err(e) => return format!("[ERROR] search failed to start: {e}"),
            }
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    match output.status.code() {
        Some(0) => stdout.trim_end().to_string(),
        Some(1) if stdout.trim().is_empty() => "No matches.".to_string(),
        _ => format!(
            "[ERROR] search failed: {}",
            subprocess_output_text(stdout.trim(), stderr.trim(), true)
        ),
    }
}

// === edit ===

pub(crate) struct EditTool;

impl ToolExecutor for EditTool {
    fn name(&self) -> &'static str {
        "edit"
    }

    fn description(&self) -> &'static str {
        "Replace one exact occurrence of OLD: text with NEW: text in a file. Block form only."
    }

    fn usage(&self) -> &'static str {
        r#"path="file" with body: OLD: <text to replace> NEW: <replacement>"#
    }

    fn run(&self, inv: &ToolInvocation, ctx: &mut ToolContext) -> String {
        let Some(raw) = inv.attr("path") else {
            return "[ERROR] edit requires a path attribute".to_string();
        };
        let Some(body) = inv.body.as_deref() else {
            return "[ERROR] edit requires a block body with OLD: and NEW: sections".to_string();
        };
        let (old, new) = match parse_edit_body(body) {
            Ok(parts) => parts,
            Err(e) => return format!("[ERROR] {e}"),
        };
        let path = match resolve_in_root(&ctx.root, raw) {
            Ok(p) => p,
            Err(e) => return format!("[ERROR] {e}"),
        };
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return format!("[ERROR] cannot read {raw}: {e}"),
        };

        // The old text must pin down exactly one location or the file is
        // left untouched.
        match content.matches(&old).count() {
            0 => format!("[ERROR] old text not found in {raw}; file unchanged"),
            1 => {
                let updated = content.replacen(&old, &new, 1);
                match fs::write(&path, updated) {
                    Ok(()) => format!("Edited {raw}."),
                    Err(e) => format!("[ERROR] cannot write {raw}: {e}"),
                }
            }
            n => format!(
                "[ERROR] old text appears {n} times in {raw}; edit refused, make it unique"
            ),
        }
    }
}

/// Split an edit body into old and new text. The old section starts at the
/// first line beginning `OLD:` and runs until a line beginning `NEW:`.
pub(crate) fn parse_edit_body(body: &str) -> Result<(String, String), String> {
    let mut old_lines: Vec<&str> = Vec::new();
    let mut new_lines: Vec<&str> = Vec::new();
    // 0 = before OLD:, 1 = collecting old, 2 = collecting new
    let mut state = 0u8;

    for line in body.lines() {
        match state {
            0 => {
                if let Some(rest) = line.strip_prefix("OLD:") {
                    state = 1;
                    let rest = rest.strip_prefix(' ').unwrap_or(rest);
                    if !rest.is_empty() {
                        old_lines.push(rest);
                    }
                }
            }
            1 => {
                if let Some(rest) = line.strip_prefix("NEW:") {
                    state = 2;
                    let rest = rest.strip_prefix(' ').unwrap_or(rest);
                    if !rest.is_empty() {
                        new_lines.push(rest);
                    }
                } else {
                    old_lines.push(line);
                }
            }
            _ => new_lines.push(line),
        }
    }

    match state {
        0 => Err("edit body is missing an OLD: section".to_string()),
        1 => Err("edit body is missing a NEW: section".to_string()),
        _ => {
            let old = old_lines.join("\n");
            if old.is_empty() {
                Err("edit body OLD: section is empty".to_string())
            } else {
                Ok((old, new_lines.join("\n")))
            }
        }
    }
}
