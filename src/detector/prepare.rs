//! Source preparation before text reaches a detector.
//!
//! Comment stripping keeps every newline so finding lines stay valid against
//! the sample's own numbering. Blank-line collapsing shifts lines, so it
//! records a map back to the original numbering.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareOptions {
    pub strip_comments: bool,
    pub collapse_blank_lines: bool,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            strip_comments: true,
            collapse_blank_lines: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSource {
    pub text: String,
    /// `line_map[i]` is the original 1-based line of prepared line `i + 1`.
    line_map: Option<Vec<u32>>,
}

impl PreparedSource {
    /// Map a line reported against the prepared text back to the sample.
    /// Lines outside the prepared text are returned unchanged.
    pub fn original_line(&self, line: u32) -> u32 {
        match &self.line_map {
            Some(map) if line >= 1 => map.get(line as usize - 1).copied().unwrap_or(line),
            _ => line,
        }
    }
}

pub fn prepare(source: &str, options: &PrepareOptions) -> PreparedSource {
    let text = if options.strip_comments {
        strip_comments(source)
    } else {
        source.to_string()
    };
    if options.collapse_blank_lines {
        let (text, map) = collapse_blank_lines(&text);
        PreparedSource {
            text,
            line_map: Some(map),
        }
    } else {
        PreparedSource {
            text,
            line_map: None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Code,
    LineComment,
    BlockComment,
    Str,
    Char,
}

/// Remove `//` and `/* */` comments, leaving string and char literals intact
/// and every newline in place.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                '"' => {
                    state = State::Str;
                    out.push(c);
                }
                '\'' => {
                    state = State::Char;
                    out.push(c);
                }
                _ => out.push(c),
            },
            State::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '\n' {
                    out.push('\n');
                } else if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
            State::Str | State::Char => {
                out.push(c);
                let close = if state == State::Str { '"' } else { '\'' };
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == close || c == '\n' {
                    state = State::Code;
                }
            }
        }
    }
    out
}

/// Drop whitespace-only lines, returning the new text and the line map.
pub fn collapse_blank_lines(text: &str) -> (String, Vec<u32>) {
    let mut kept = Vec::new();
    let mut map = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if !line.trim().is_empty() {
            kept.push(line);
            map.push(i as u32 + 1);
        }
    }
    let mut out = kept.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    (out, map)
}
