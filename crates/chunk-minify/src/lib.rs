//! Bundler chunk minification on a lazily started pool of worker cells.
//!
//! [`MinifyPlugin::render_chunk`] is called once per rendered chunk. The first
//! call of a build starts a pool of `ddc-cell-minify` workers (or a bounded set
//! of blocking threads), concurrent calls share it, and it is shut down as soon
//! as the last in-flight chunk is done.
//!
//! Minify options are the build author's, layered over defaults derived from
//! the bundler's output settings: a source map is produced whenever the output
//! asks for one, `es` output is minified as a module and `cjs` output gets
//! top-level mangling. When a name cache is configured, top-level renames are
//! shared across chunks and kept stable once chosen.

mod config;
mod error;
mod name_cache;
mod options;
mod output;
mod plugin;
mod pool;
mod process_pool;
mod session;
mod thread_pool;

pub use cell_minify_proto::{MinifyOptions, MinifyOutput, MinifyTask, NameCache};
pub use error::{Error, Result};
pub use name_cache::{load_name_cache, merge_name_cache, name_cache_from_value, save_name_cache};
pub use options::{
    OutputFormat, OutputOptions, PluginOptions, RenderedChunk, SourcemapOption, WorkerBackend,
    default_options, effective_options,
};
pub use output::{RenderedOutput, shape_result};
pub use plugin::MinifyPlugin;
pub use pool::{BackendFactory, BackendPool, PoolFactory, ShutdownReport, WorkerPool};
pub use process_pool::{
    ProcessPool, ProcessPoolFactory, SHUTDOWN_GRACE, WORKER_BINARY, WorkerConnection,
    find_worker_binary,
};
pub use session::Session;
pub use thread_pool::{ThreadPool, ThreadPoolFactory};
