//! Error decoration: YAML-path trails and source excerpts
//!
//! Errors surfaced from step execution are wrapped twice: once with the
//! YAML path of the offending block (`steps[2].request.body`), and once with
//! an excerpt of the scenario document underlining the located line. The
//! wrappers compose and render through the error's `Display`.

use colored::Colorize;

use crate::common::Error;
use crate::schema::ScenarioSource;

/// Wrap `err` with a YAML path segment
pub fn with_path(err: Error, path: impl Into<String>) -> Error {
    Error::WithPath {
        path: path.into(),
        source: Box::new(err),
    }
}

/// Wrap `err` with a YAML path segment and a message
pub fn wrap_path(err: Error, path: impl Into<String>, message: impl Into<String>) -> Error {
    Error::WrapPath {
        path: path.into(),
        message: message.into(),
        source: Box::new(err),
    }
}

/// Collect the full path trail from nested wrappers, outermost first
pub fn path_trail(err: &Error) -> Option<String> {
    fn collect(err: &Error, out: &mut Vec<String>) {
        match err {
            Error::WithPath { path, source } => {
                out.push(path.clone());
                collect(source, out);
            }
            Error::WrapPath { path, source, .. } => {
                out.push(path.clone());
                collect(source, out);
            }
            Error::Annotated { source, .. } | Error::TemplateExecute { source, .. } => {
                collect(source, out)
            }
            _ => {}
        }
    }

    let mut segments = Vec::new();
    collect(err, &mut segments);
    if segments.is_empty() {
        return None;
    }
    let mut trail = String::new();
    for segment in segments {
        if !trail.is_empty() && !segment.starts_with('[') {
            trail.push('.');
        }
        trail.push_str(&segment);
    }
    Some(trail)
}

/// Annotate `err` with an excerpt of the scenario source locating the
/// error's path trail. Returns `err` unchanged when there is no node, no
/// trail, or the path cannot be located.
pub fn with_node_and_colored(err: Error, node: Option<&ScenarioSource>, colored: bool) -> Error {
    let Some(node) = node else { return err };
    let Some(trail) = path_trail(&err) else { return err };
    let Some(line) = locate(&node.text, &trail) else { return err };
    let excerpt = render_excerpt(&node.text, line, colored);
    Error::Annotated {
        excerpt,
        source: Box::new(err),
    }
}

#[derive(Debug, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_trail(trail: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    for part in trail.split('.') {
        let mut rest = part;
        while let Some(open) = rest.find('[') {
            let key = &rest[..open];
            if !key.is_empty() {
                out.push(Segment::Key(key.to_string()));
            }
            let Some(close) = rest.find(']') else { break };
            if let Ok(idx) = rest[open + 1..close].parse::<usize>() {
                out.push(Segment::Index(idx));
            }
            rest = &rest[close + 1..];
        }
        if !rest.contains('[') && !rest.is_empty() {
            out.push(Segment::Key(rest.to_string()));
        }
    }
    out
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Leading indentation plus any `- ` sequence markers stripped, yielding the
/// column and text of the line's key content.
fn key_content(line: &str) -> (usize, &str) {
    let mut indent = indent_of(line);
    let mut rest = &line[indent..];
    while let Some(stripped) = rest.strip_prefix("- ") {
        indent += 2;
        rest = stripped;
    }
    (indent, rest)
}

fn is_item_line(line: &str) -> bool {
    let trimmed = line.trim_start_matches(' ');
    trimmed.starts_with("- ") || trimmed == "-"
}

/// Best-effort scan for the line a YAML path points at.
///
/// Works on the block-style documents the loader reads; flow-style or
/// unconventional layouts simply fail to locate, which degrades to an
/// unannotated error.
fn locate(text: &str, trail: &str) -> Option<usize> {
    let lines: Vec<&str> = text.lines().collect();
    let segments = parse_trail(trail);

    let mut start = 0;
    let mut end = lines.len();
    let mut found = None;

    for segment in &segments {
        match segment {
            Segment::Key(key) => {
                let mut matched = None;
                for i in start..end {
                    let (indent, content) = key_content(lines[i]);
                    if content.starts_with(key.as_str())
                        && content[key.len()..].starts_with(':')
                    {
                        matched = Some((i, indent));
                        break;
                    }
                }
                let (i, indent) = matched?;
                found = Some(i);
                start = i + 1;
                end = block_end(&lines, i + 1, end, indent);
            }
            Segment::Index(n) => {
                let mut item_indent = None;
                let mut count = 0;
                let mut matched = None;
                for i in start..end {
                    if !is_item_line(lines[i]) {
                        continue;
                    }
                    let indent = indent_of(lines[i]);
                    let expected = *item_indent.get_or_insert(indent);
                    if indent != expected {
                        continue;
                    }
                    if count == *n {
                        matched = Some((i, indent));
                        break;
                    }
                    count += 1;
                }
                let (i, indent) = matched?;
                found = Some(i);
                start = i;
                end = item_end(&lines, i, end, indent);
            }
        }
    }
    found
}

/// End of the block owned by a key at `indent`: the next non-blank line at
/// or left of that indent which is not a sequence item.
fn block_end(lines: &[&str], from: usize, limit: usize, indent: usize) -> usize {
    for (offset, line) in lines[from..limit].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if indent_of(line) <= indent && !is_item_line(line) {
            return from + offset;
        }
    }
    limit
}

/// End of a sequence item starting at `from`: the next item or outdented
/// line.
fn item_end(lines: &[&str], from: usize, limit: usize, indent: usize) -> usize {
    for (offset, line) in lines[from + 1..limit].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_indent = indent_of(line);
        if line_indent < indent {
            return from + 1 + offset;
        }
        if line_indent == indent && is_item_line(line) {
            return from + 1 + offset;
        }
    }
    limit
}

fn render_excerpt(text: &str, line: usize, colored: bool) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let first = line.saturating_sub(2);
    let last = (line + 2).min(lines.len().saturating_sub(1));
    let width = (last + 1).to_string().len();

    let mut out = String::new();
    for i in first..=last {
        let marker = if i == line { ">" } else { " " };
        let number = format!("{:>width$}", i + 1);
        let body = if i == line && colored {
            lines[i].red().to_string()
        } else {
            lines[i].to_string()
        };
        out.push_str(&format!("{marker} {number} | {body}\n"));
    }
    out.pop();
    out
}
