//! Backreference substitution for rule templates.
//!
//! `$N` tokens are replaced by numbered groups and `:name` tokens by named
//! groups. Both passes substitute the longest token first so `$1` never
//! eats the prefix of `$12` and `:id` never eats the prefix of `:idx`.
//! Groups that did not participate in the match render as the empty string.

use regex::{Captures, Regex};

/// Render `template` against a successful match of `regex`.
pub fn render(template: &str, regex: &Regex, caps: &Captures<'_>, named: bool) -> String {
    if template.is_empty() {
        return String::new();
    }

    let mut result = template.to_string();

    if named {
        let mut names: Vec<&str> = regex.capture_names().flatten().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()));
        for name in names {
            let value = caps.name(name).map_or("", |m| m.as_str());
            result = result.replace(&format!(":{name}"), value);
        }
    }

    for index in (1..caps.len()).rev() {
        let value = caps.get(index).map_or("", |m| m.as_str());
        result = result.replace(&format!("${index}"), value);
    }

    result
}
