//! Source path to URL matcher compilation.
//!
//! # Responsibilities
//! - Split a function source path into directory, name and extension
//! - Turn `[name]` segments into named captures
//! - Make `index` files and the source extension optional in requests
//!
//! # Design Decisions
//! - Patterns are anchored at both ends
//! - A case-insensitive twin is compiled up front so probing never rebuilds regexes
//! - One trailing `/` is tolerated so the matcher agrees with path normalization

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

/// Matches an escaped `[name]` segment inside an escaped directory path.
static ESCAPED_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\\\[(\w+)\\\]").expect("segment pattern is valid")
});

/// Matches a whole `[name]` filename stem.
static SEGMENT_STEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\w+)\]$").expect("stem pattern is valid"));

/// A dynamic segment matches one path segment without `/` or `.`.
const SEGMENT_CAPTURE: &str = "[^/.]+";

/// Error produced while compiling a single source file.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{0:?} cannot be split into a name and an extension")]
    MissingExtension(String),

    #[error("{path:?} does not use a function extension (.{ext})")]
    UnsupportedExtension { path: String, ext: String },

    #[error("{path:?} produced an invalid matcher: {source}")]
    Pattern {
        path: String,
        #[source]
        source: regex::Error,
    },
}

/// A compiled request matcher for one function source file.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    regex: Regex,
    folded: Regex,
    groups: Vec<String>,
}

impl CompiledPattern {
    /// The regex source.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Names of the dynamic segments, in path order.
    pub fn group_names(&self) -> &[String] {
        &self.groups
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Case-insensitive match, used only to classify failed lookups.
    pub fn is_match_ignore_case(&self, path: &str) -> bool {
        self.folded.is_match(path)
    }

    /// Match and collect the dynamic segment values.
    pub fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.regex.captures(path)?;
        let values = self
            .groups
            .iter()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect();
        Some(values)
    }
}

/// Split a filename into stem and extension at the last dot.
fn split_filename(filename: &str) -> Option<(&str, &str)> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some((stem, ext))
}

/// Whether `source` names an `index` file with one of `extensions`.
pub fn is_index_source(source: &str, extensions: &[String]) -> bool {
    let filename = source.rsplit('/').next().unwrap_or(source);
    match split_filename(filename) {
        Some((stem, ext)) => {
            stem.eq_ignore_ascii_case("index") && has_extension(ext, extensions)
        }
        None => false,
    }
}

fn has_extension(ext: &str, extensions: &[String]) -> bool {
    extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

/// Compile a `/`-separated source path (e.g. `api/blog/[slug]/edit.js`) into a matcher.
pub fn compile_source_path(
    source: &str,
    extensions: &[String],
) -> Result<CompiledPattern, CompileError> {
    let (dir, filename) = match source.rsplit_once('/') {
        Some((dir, filename)) => (dir, filename),
        None => ("", source),
    };

    let (stem, ext) = split_filename(filename)
        .ok_or_else(|| CompileError::MissingExtension(source.to_string()))?;
    if !has_extension(ext, extensions) {
        return Err(CompileError::UnsupportedExtension {
            path: source.to_string(),
            ext: ext.to_string(),
        });
    }

    let optional_ext = format!("(?:{})?", regex::escape(&format!(".{ext}")));
    let file_part = if stem.eq_ignore_ascii_case("index") {
        format!("(?:/{}{})?", regex::escape(stem), optional_ext)
    } else if let Some(caps) = SEGMENT_STEM.captures(stem) {
        format!("/(?P<{}>{}){}", &caps[1], SEGMENT_CAPTURE, optional_ext)
    } else {
        format!("/{}{}", regex::escape(stem), optional_ext)
    };

    let dir_part = if dir.is_empty() {
        String::new()
    } else {
        let escaped = regex::escape(dir);
        let replacement = format!("(?P<${{1}}>{SEGMENT_CAPTURE})");
        format!("/{}", ESCAPED_SEGMENT.replace_all(&escaped, replacement.as_str()))
    };

    let source_regex = format!("^{dir_part}{file_part}/?$");
    let pattern_error = |source| CompileError::Pattern {
        path: dir_and_file(dir, filename),
        source,
    };

    let regex = Regex::new(&source_regex).map_err(pattern_error)?;
    let folded = RegexBuilder::new(&source_regex)
        .case_insensitive(true)
        .build()
        .map_err(pattern_error)?;
    let groups = regex
        .capture_names()
        .flatten()
        .map(str::to_string)
        .collect();

    Ok(CompiledPattern { regex, folded, groups })
}

fn dir_and_file(dir: &str, filename: &str) -> String {
    if dir.is_empty() {
        filename.to_string()
    } else {
        format!("{dir}/{filename}")
    }
}
