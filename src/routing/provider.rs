//! Route table rebuild policy.
//!
//! # Responsibilities
//! - Hand the dispatcher a route table snapshot per request
//! - Compile once, per request, or on filesystem changes (`ReloadMode`)
//! - Watch the function directory and swap in fresh tables
//!
//! # Design Decisions
//! - Snapshots are `Arc<RouteTable>`; a request keeps the table it started with
//! - Per-request compilation runs on the blocking pool, never on the async task
//! - A failed recompile in watch mode keeps serving the previous table
//! - Watch events are handled off the notify thread, which may add a watch
//!   for a function directory created after startup

use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

use crate::config::ReloadMode;
use crate::observability::metrics;
use crate::routing::table::{RouteTable, TableCompiler};

/// Error setting up a route table provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to compile function routes: {0}")]
    Compile(#[from] io::Error),

    #[error("failed to watch function directory: {0}")]
    Watch(#[from] notify::Error),
}

/// Source of route table snapshots.
pub enum RouteTableProvider {
    /// Compiled once at startup.
    Fixed(Arc<RouteTable>),
    /// Compiled for every lookup.
    PerRequest(TableCompiler),
    /// Compiled at startup and after every change under the function directory.
    Watched {
        current: Arc<ArcSwap<RouteTable>>,
        _watcher: WatchHandle,
    },
}

impl std::fmt::Debug for RouteTableProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteTableProvider::Fixed(table) => f.debug_tuple("Fixed").field(&table.len()).finish(),
            RouteTableProvider::PerRequest(_) => f.write_str("PerRequest"),
            RouteTableProvider::Watched { current, .. } => {
                f.debug_tuple("Watched").field(&current.load().len()).finish()
            }
        }
    }
}

impl RouteTableProvider {
    /// Build a provider for the given reload mode.
    pub fn build(compiler: TableCompiler, mode: ReloadMode) -> Result<Self, ProviderError> {
        match mode {
            ReloadMode::Startup => Ok(Self::fixed(compile_logged(&compiler)?)),
            ReloadMode::PerRequest => Ok(RouteTableProvider::PerRequest(compiler)),
            ReloadMode::Watch => {
                let current = Arc::new(ArcSwap::from_pointee(compile_logged(&compiler)?));
                let watcher = FunctionWatcher::new(compiler, current.clone()).run()?;
                Ok(RouteTableProvider::Watched {
                    current,
                    _watcher: watcher,
                })
            }
        }
    }

    /// Wrap an already compiled table.
    pub fn fixed(table: RouteTable) -> Self {
        RouteTableProvider::Fixed(Arc::new(table))
    }

    /// Current route table snapshot.
    pub async fn current(&self) -> io::Result<Arc<RouteTable>> {
        match self {
            RouteTableProvider::Fixed(table) => Ok(table.clone()),
            RouteTableProvider::Watched { current, .. } => Ok(current.load_full()),
            RouteTableProvider::PerRequest(compiler) => {
                let compiler = compiler.clone();
                let table = tokio::task::spawn_blocking(move || compile_logged(&compiler))
                    .await
                    .map_err(io::Error::other)??;
                Ok(Arc::new(table))
            }
        }
    }
}

fn compile_logged(compiler: &TableCompiler) -> io::Result<RouteTable> {
    let compiled = compiler.compile()?;
    metrics::record_route_table(compiled.table.len(), compiled.errors.len());
    Ok(compiled.table)
}

/// Recompiles the route table when the function directory changes.
pub struct FunctionWatcher {
    compiler: TableCompiler,
    target: Arc<ArcSwap<RouteTable>>,
}

/// Keeps a running `FunctionWatcher` alive. Dropping it stops the watch.
pub type WatchHandle = Arc<Mutex<RecommendedWatcher>>;

impl FunctionWatcher {
    pub fn new(compiler: TableCompiler, target: Arc<ArcSwap<RouteTable>>) -> Self {
        Self { compiler, target }
    }

    /// Start watching. Events are handled on a dedicated thread that ends
    /// when the returned handle is dropped.
    pub fn run(self) -> Result<WatchHandle, notify::Error> {
        let dir = self.compiler.function_dir();
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();

        let mut watcher =
            RecommendedWatcher::new(tx, Config::default().with_poll_interval(Duration::from_secs(2)))?;

        let watch_path = existing_ancestor(&dir);
        // Watching an ancestor recursively could cover a whole dependency tree.
        let covers_dir = if watch_path == dir {
            watcher.watch(&dir, RecursiveMode::Recursive)?;
            true
        } else {
            tracing::warn!(dir = %dir.display(), "Function directory missing; watching for its creation");
            watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;
            false
        };
        tracing::info!(path = %watch_path.display(), "Function watcher started");

        let handle = Arc::new(Mutex::new(watcher));
        let worker = WatchWorker {
            compiler: self.compiler,
            target: self.target,
            watcher: Arc::downgrade(&handle),
            dir,
            watching_parent: !covers_dir,
            covers_dir,
        };
        std::thread::Builder::new()
            .name("function-watcher".into())
            .spawn(move || worker.run(rx))
            .map_err(notify::Error::io)?;

        Ok(handle)
    }
}

struct WatchWorker {
    compiler: TableCompiler,
    target: Arc<ArcSwap<RouteTable>>,
    watcher: Weak<Mutex<RecommendedWatcher>>,
    dir: PathBuf,
    /// The parent is watched because the directory was missing at startup.
    watching_parent: bool,
    /// A recursive watch on the function directory is registered.
    covers_dir: bool,
}

impl WatchWorker {
    fn run(mut self, rx: mpsc::Receiver<notify::Result<Event>>) {
        // Ends once the watcher, and with it the sender, is dropped.
        for res in rx {
            match res {
                Ok(event) => {
                    if event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove() {
                        self.track_dir();
                        self.recompile();
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            }
        }
        tracing::debug!(dir = %self.dir.display(), "Function watcher stopped");
    }

    /// Register the recursive watch once the directory exists, and forget it
    /// when the directory goes away so a re-creation is picked up again.
    fn track_dir(&mut self) {
        if !self.watching_parent {
            return;
        }
        let exists = self.dir.is_dir();
        if self.covers_dir && !exists {
            tracing::info!(dir = %self.dir.display(), "Function directory removed");
            self.covers_dir = false;
        } else if !self.covers_dir && exists {
            let Some(watcher) = self.watcher.upgrade() else {
                return;
            };
            let mut watcher = watcher.lock().unwrap_or_else(PoisonError::into_inner);
            match watcher.watch(&self.dir, RecursiveMode::Recursive) {
                Ok(()) => {
                    tracing::info!(dir = %self.dir.display(), "Function directory created, watching it");
                    self.covers_dir = true;
                }
                Err(e) => tracing::error!(dir = %self.dir.display(), error = %e, "Failed to watch function directory"),
            }
        }
    }

    fn recompile(&self) {
        match compile_logged(&self.compiler) {
            Ok(table) => {
                tracing::info!(routes = table.len(), "Function change detected, routes recompiled");
                self.target.store(Arc::new(table));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to recompile routes. Keeping current table.");
            }
        }
    }
}

/// The function directory may not exist yet; watch the closest parent that does.
fn existing_ancestor(dir: &Path) -> PathBuf {
    dir.ancestors()
        .find(|p| p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
