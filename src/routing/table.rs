//! Function route table compilation.
//!
//! # Responsibilities
//! - Discover function source files under `<root>/<namespace>`
//! - Compile each file into a `FunctionRoute`
//! - Bind a handler reference per route
//! - Order routes so specific paths are tried first
//!
//! # Design Decisions
//! - Path components starting with `_` or `.` are invisible
//! - A file that fails to compile is reported and left out; the scan continues
//! - Non-index routes: longest source path first; index routes last, shortest first
//! - Ties break lexicographically so the order never depends on directory listing order

use std::cmp::Ordering;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::FunctionsConfig;
use crate::routing::pattern::{compile_source_path, is_index_source, CompileError, CompiledPattern};

/// What serves a matched route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerRef {
    /// Source file is present and readable; the function backend executes it.
    Ready { source: PathBuf },
    /// Source file could not be loaded. Requests get a deterministic 500.
    Failed { reason: String },
}

impl HandlerRef {
    pub fn is_ready(&self) -> bool {
        matches!(self, HandlerRef::Ready { .. })
    }
}

/// One compiled function route.
#[derive(Debug, Clone)]
pub struct FunctionRoute {
    source_path: String,
    matcher: CompiledPattern,
    handler: HandlerRef,
}

impl FunctionRoute {
    pub fn new(source_path: String, matcher: CompiledPattern, handler: HandlerRef) -> Self {
        Self {
            source_path,
            matcher,
            handler,
        }
    }

    /// Source path relative to the project root, `/`-separated.
    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    pub fn matcher(&self) -> &CompiledPattern {
        &self.matcher
    }

    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }
}

/// Immutable, ordered set of function routes.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    pub(crate) namespace: String,
    pub(crate) extensions: Vec<String>,
    pub(crate) routes: Vec<FunctionRoute>,
}

impl RouteTable {
    pub fn routes(&self) -> &[FunctionRoute] {
        &self.routes
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Result of one compilation pass.
#[derive(Debug)]
pub struct Compiled {
    pub table: RouteTable,
    /// Files that were left out, with the reason.
    pub errors: Vec<CompileError>,
}

/// Compiles a function source tree into a `RouteTable`.
#[derive(Debug, Clone)]
pub struct TableCompiler {
    root: PathBuf,
    namespace: String,
    extensions: Vec<String>,
    bind_handlers: bool,
}

impl TableCompiler {
    pub fn new(root: impl Into<PathBuf>, namespace: impl Into<String>, extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            namespace: namespace.into(),
            extensions,
            bind_handlers: true,
        }
    }

    pub fn from_config(config: &FunctionsConfig) -> Self {
        Self::new(&config.root_dir, &config.namespace, config.extensions.clone())
    }

    /// Skip opening source files; every route gets a `Ready` handler.
    pub fn without_handlers(mut self) -> Self {
        self.bind_handlers = false;
        self
    }

    /// Directory holding the function sources.
    pub fn function_dir(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }

    /// Scan the function directory and compile every eligible file.
    pub fn compile(&self) -> io::Result<Compiled> {
        let paths = self.discover()?;
        if paths.is_empty() {
            tracing::debug!(dir = %self.function_dir().display(), "No functions found");
        } else {
            tracing::debug!(count = paths.len(), "Identified functions");
        }
        Ok(self.compile_paths(paths))
    }

    /// Compile an explicit list of `/`-separated source paths.
    pub fn compile_paths<I, S>(&self, paths: I) -> Compiled
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sources: Vec<String> = paths.into_iter().map(Into::into).collect();
        sources.sort_by(|a, b| route_order(a, b, &self.extensions));

        let mut routes = Vec::with_capacity(sources.len());
        let mut errors = Vec::new();

        for source in sources {
            match compile_source_path(&source, &self.extensions) {
                Ok(matcher) => {
                    let handler = self.bind_handler(&source);
                    if let HandlerRef::Failed { reason } = &handler {
                        tracing::warn!(source = %source, reason = %reason, "Failed to load function");
                    }
                    routes.push(FunctionRoute::new(source, matcher, handler));
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Skipping function source");
                    errors.push(e);
                }
            }
        }

        Compiled {
            table: RouteTable {
                namespace: self.namespace.clone(),
                extensions: self.extensions.clone(),
                routes,
            },
            errors,
        }
    }

    fn bind_handler(&self, source: &str) -> HandlerRef {
        let path = self.root.join(source);
        if !self.bind_handlers {
            return HandlerRef::Ready { source: path };
        }
        match fs::File::open(&path) {
            Ok(_) => HandlerRef::Ready { source: path },
            Err(e) => HandlerRef::Failed {
                reason: e.to_string(),
            },
        }
    }

    /// List eligible source files relative to the project root.
    pub fn discover(&self) -> io::Result<Vec<String>> {
        let dir = self.function_dir();
        let mut found = Vec::new();
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(found),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e),
        }
        self.walk(&dir, &self.namespace, &mut found)?;
        Ok(found)
    }

    fn walk(&self, dir: &Path, prefix: &str, found: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                tracing::warn!(path = %entry.path().display(), "Skipping non UTF-8 path");
                continue;
            };
            if is_ignored(name) {
                continue;
            }

            let relative = format!("{prefix}/{name}");
            let meta = match fs::metadata(entry.path()) {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if meta.is_dir() {
                self.walk(&entry.path(), &relative, found)?;
            } else if meta.is_file() && self.is_function_file(name) {
                found.push(relative);
            }
        }
        Ok(())
    }

    fn is_function_file(&self, filename: &str) -> bool {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// `_` and `.` prefixes hide a file or a whole directory.
fn is_ignored(component: &str) -> bool {
    component.starts_with('_') || component.starts_with('.')
}

fn route_order(a: &str, b: &str, extensions: &[String]) -> Ordering {
    match (is_index_source(a, extensions), is_index_source(b, extensions)) {
        (false, false) => b.len().cmp(&a.len()).then_with(|| a.cmp(b)),
        (true, true) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler(root: &Path) -> TableCompiler {
        TableCompiler::new(root, "api", vec!["js".into(), "ts".into()])
    }

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "export default () => {}").unwrap();
    }

    fn sources(table: &RouteTable) -> Vec<&str> {
        table.routes().iter().map(|r| r.source_path()).collect()
    }

    #[test]
    fn discovery_skips_hidden_and_private_entries() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "api/hello.js");
        touch(dir.path(), "api/_helper.js");
        touch(dir.path(), "api/.secret.ts");
        touch(dir.path(), "api/_lib/util.js");
        touch(dir.path(), "api/.cache/x.js");
        touch(dir.path(), "api/nested/ok.ts");
        touch(dir.path(), "api/nested/_skip/deep.ts");
        touch(dir.path(), "api/notes.md");

        let mut found = compiler(dir.path()).discover().unwrap();
        found.sort();
        assert_eq!(found, ["api/hello.js", "api/nested/ok.ts"]);
    }

    #[test]
    fn missing_function_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let compiled = compiler(dir.path()).compile().unwrap();
        assert!(compiled.table.is_empty());
        assert!(compiled.errors.is_empty());
    }

    #[test]
    fn ordering_puts_longer_paths_first_and_index_last() {
        let compiled = compiler(Path::new("/nonexistent"))
            .without_handlers()
            .compile_paths([
                "api/index.js",
                "api/a.js",
                "api/blog/[slug].js",
                "api/blog/index.js",
                "api/blog/[slug]/edit.js",
                "api/b.js",
            ]);
        assert_eq!(
            sources(&compiled.table),
            [
                "api/blog/[slug]/edit.js",
                "api/blog/[slug].js",
                "api/a.js",
                "api/b.js",
                "api/index.js",
                "api/blog/index.js",
            ]
        );
    }

    #[test]
    fn ordering_is_independent_of_input_order() {
        let paths = ["api/zz.js", "api/aa.js", "api/mm.ts", "api/x/index.js", "api/index.ts"];
        let c = compiler(Path::new("/nonexistent")).without_handlers();
        let forward = c.compile_paths(paths);
        let backward = c.compile_paths(paths.iter().rev().copied());
        assert_eq!(sources(&forward.table), sources(&backward.table));
        assert_eq!(sources(&forward.table)[0], "api/aa.js");
    }

    #[test]
    fn bad_files_are_reported_without_aborting() {
        let compiled = compiler(Path::new("/nonexistent"))
            .without_handlers()
            .compile_paths(["api/ok.js", "api/[id]/[id].js", "api/noext"]);
        assert_eq!(sources(&compiled.table), ["api/ok.js"]);
        assert_eq!(compiled.errors.len(), 2);
    }

    #[test]
    fn unreadable_sources_get_failed_handlers() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "api/present.js");

        let compiled = compiler(dir.path()).compile_paths(["api/present.js", "api/gone.js"]);
        let by_source = |s: &str| {
            compiled
                .table
                .routes()
                .iter()
                .find(|r| r.source_path() == s)
                .unwrap()
                .handler()
                .clone()
        };
        assert!(by_source("api/present.js").is_ready());
        assert!(matches!(by_source("api/gone.js"), HandlerRef::Failed { .. }));
    }
}
