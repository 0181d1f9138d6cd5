//! Lenient JSON recovery for language-model output.
//!
//! Models asked for a JSON object often return something close to one:
//!
//! - wrapped in markdown fences (`` ```json ... ``` ``) or preceded by a
//!   sentence of prose
//! - trailing commas before `}` or `]`
//! - bare object keys (`{urgency_level: "low"}`)
//! - cut off mid-structure (missing closing quotes, brackets or braces)
//!
//! [`repair_json`] fixes these in a single pass that tracks string state
//! and bracket nesting. It is not a JSON parser; whatever it produces still
//! goes through `serde_json`.
//!
//! ```ignore
//! use triage_core::json_repair::parse_with_repair;
//!
//! let value = parse_with_repair("```json\n{is_complex: true,}\n```")?;
//! assert_eq!(value["is_complex"], true);
//! ```

use serde_json::Value;

/// Repair common LLM JSON defects. Valid JSON keeps its meaning; only
/// whitespace before closing brackets may change.
pub fn repair_json(input: &str) -> String {
    Repairer::default().run(extract_payload(input))
}

/// Parse `input` as JSON, repairing it first if the strict parse fails.
pub fn parse_with_repair(input: &str) -> Result<Value, serde_json::Error> {
    if let Ok(value) = serde_json::from_str(input) {
        return Ok(value);
    }
    serde_json::from_str(&repair_json(input))
}

/// Drop prose before the first `{`/`[` and a closing fence after the payload.
fn extract_payload(input: &str) -> &str {
    let text = input.trim();
    let Some(start) = text.find(['{', '[']) else {
        return text;
    };
    let body = &text[start..];
    match body.rfind("```") {
        Some(end) if body[end + 3..].trim().is_empty() => body[..end].trim_end(),
        _ => body,
    }
}

#[derive(Default)]
struct Repairer {
    out: String,
    /// Expected closers for the currently open structures.
    closers: Vec<char>,
    in_string: bool,
    escaped: bool,
}

impl Repairer {
    fn run(mut self, input: &str) -> String {
        let chars: Vec<char> = input.chars().collect();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if self.in_string {
                self.out.push(c);
                if self.escaped {
                    self.escaped = false;
                } else if c == '\\' {
                    self.escaped = true;
                } else if c == '"' {
                    self.in_string = false;
                }
                i += 1;
                continue;
            }

            match c {
                '"' => {
                    self.in_string = true;
                    self.out.push(c);
                }
                '{' => {
                    self.closers.push('}');
                    self.out.push(c);
                }
                '[' => {
                    self.closers.push(']');
                    self.out.push(c);
                }
                '}' | ']' => {
                    self.drop_trailing_comma();
                    if self.closers.last() == Some(&c) {
                        self.closers.pop();
                    }
                    self.out.push(c);
                }
                c if self.expects_key() && is_ident_start(c) => {
                    let start = i;
                    while i < chars.len() && is_ident_char(chars[i]) {
                        i += 1;
                    }
                    let ident: String = chars[start..i].iter().collect();
                    let next = chars[i..].iter().find(|ch| !ch.is_whitespace());
                    if next == Some(&':') {
                        self.out.push('"');
                        self.out.push_str(&ident);
                        self.out.push('"');
                    } else {
                        self.out.push_str(&ident);
                    }
                    continue;
                }
                _ => self.out.push(c),
            }
            i += 1;
        }

        self.finish()
    }

    /// True when the next token inside an object must be a key.
    fn expects_key(&self) -> bool {
        self.closers.last() == Some(&'}')
            && matches!(self.out.trim_end().chars().last(), Some('{') | Some(','))
    }

    fn drop_trailing_comma(&mut self) {
        let trimmed_len = self.out.trim_end().len();
        self.out.truncate(trimmed_len);
        if self.out.ends_with(',') {
            self.out.pop();
        }
    }

    /// Close whatever the input left open.
    fn finish(mut self) -> String {
        if self.in_string {
            if self.escaped {
                self.out.pop();
            }
            self.out.push('"');
        }
        self.drop_trailing_comma();
        if self.out.ends_with(':') {
            self.out.push_str(" null");
        }
        while let Some(closer) = self.closers.pop() {
            self.drop_trailing_comma();
            self.out.push(closer);
        }
        self.out
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-'
}
