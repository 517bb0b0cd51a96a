use crate::ToolInvocation;

// === Tag parser ===
// Extracts tool invocations from free-form model output. Two shapes:
//   <tool name="read" path="x" />
//   <tool name="edit" path="x"> ...body... </tool>
// Pure text-to-structure; no filesystem or network access here.

const OPEN_MARKER: &str = "<tool";
const CLOSE_MARKER: &str = "</tool>";

/// Scan model output for tool tags, in document order. Tag-like text that
/// does not parse (no name attribute, unterminated block) is skipped, not an
/// error: models emit tag-shaped prose incidentally.
pub(crate) fn parse_invocations(text: &str) -> Vec<ToolInvocation> {
    let mut out = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(OPEN_MARKER) {
        let after = &rest[start + OPEN_MARKER.len()..];
        // `<toolbox>` etc. is not a tag: the marker must be followed by
        // whitespace or the end of the opening tag.
        let boundary = matches!(after.chars().next(), Some(c) if c.is_whitespace() || c == '>' || c == '/');
        if !boundary {
            rest = after;
            continue;
        }
        let Some(head) = scan_opening(after) else {
            // No closing '>' for the opening tag; skip past the marker.
            rest = after;
            continue;
        };

        let mut attributes = parse_attributes(head.attrs);
        let name = match take_name(&mut attributes) {
            Some(name) => name,
            None => {
                // Not a tool call; resume after the opening tag.
                rest = &after[head.end..];
                continue;
            }
        };

        if head.self_closing {
            out.push(ToolInvocation {
                name,
                attributes,
                body: None,
            });
            rest = &after[head.end..];
            continue;
        }

        // Block form: the body runs to the matching close marker.
        let body_rest = &after[head.end..];
        let Some(close) = body_rest.find(CLOSE_MARKER) else {
            rest = body_rest;
            continue;
        };
        let body = strip_leading_newline(&body_rest[..close]).to_string();
        out.push(ToolInvocation {
            name,
            attributes,
            body: Some(body),
        });
        rest = &body_rest[close + CLOSE_MARKER.len()..];
    }

    out
}

struct OpeningTag<'a> {
    /// Attribute text between the marker and the closing '>'.
    attrs: &'a str,
    /// Byte offset just past the '>' in the scanned slice.
    end: usize,
    self_closing: bool,
}

/// Find the end of the opening tag, honoring double-quoted attribute values.
fn scan_opening(after: &str) -> Option<OpeningTag<'_>> {
    let mut in_quotes = false;
    for (idx, ch) in after.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '>' if !in_quotes => {
                let raw = &after[..idx];
                let trimmed = raw.trim_end();
                let self_closing = trimmed.ends_with('/');
                let attrs = if self_closing {
                    &trimmed[..trimmed.len() - 1]
                } else {
                    trimmed
                };
                return Some(OpeningTag {
                    attrs,
                    end: idx + 1,
                    self_closing,
                });
            }
            _ => {}
        }
    }
    None
}

/// Tolerant `key="value"` scan. Malformed fragments are skipped rather than
/// failing the whole tag.
fn parse_attributes(head: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let chars: Vec<char> = head.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if !(chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
            i += 1;
            continue;
        }
        let key_start = i;
        while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
            i += 1;
        }
        let key: String = chars[key_start..i].iter().collect();

        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() || chars[i] != '=' {
            continue;
        }
        i += 1;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() || chars[i] != '"' {
            continue;
        }
        i += 1;
        let value_start = i;
        while i < chars.len() && chars[i] != '"' {
            i += 1;
        }
        if i >= chars.len() {
            // Unterminated value; drop the fragment.
            break;
        }
        let value: String = chars[value_start..i].iter().collect();
        i += 1;
        pairs.push((key, value));
    }

    pairs
}

fn take_name(attributes: &mut Vec<(String, String)>) -> Option<String> {
    let pos = attributes.iter().position(|(k, _)| k == "name")?;
    let (_, value) = attributes.remove(pos);
    if value.trim().is_empty() {
        return None;
    }
    Some(value)
}

fn strip_leading_newline(body: &str) -> &str {
    body.strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body)
}
