//! The bundler-facing plugin.

use std::path::PathBuf;

use camino::Utf8PathBuf;
use cell_minify_proto::{MinifyTask, NameCache};
use tracing::debug;

use crate::name_cache::{load_name_cache, merge_name_cache};
use crate::options::{
    OutputOptions, PluginOptions, RenderedChunk, WorkerBackend, effective_options,
};
use crate::output::{RenderedOutput, shape_result};
use crate::pool::{BackendFactory, PoolFactory};
use crate::process_pool::ProcessPoolFactory;
use crate::session::Session;
use crate::thread_pool::ThreadPoolFactory;
use crate::{Error, Result};

/// Minifies every rendered chunk of a build on a shared, lazily started pool.
///
/// Create one per build output and call [`render_chunk`](Self::render_chunk)
/// for every chunk, concurrently if you like.
pub struct MinifyPlugin<F: PoolFactory = BackendFactory> {
    options: PluginOptions,
    session: Session<F>,
}

impl MinifyPlugin {
    /// Create a plugin using the backend selected in `options`.
    pub fn new(options: PluginOptions) -> Result<Self> {
        let factory = match options.backend() {
            WorkerBackend::Process => BackendFactory::Process(ProcessPoolFactory::new(
                options.worker_path.as_ref().map(PathBuf::from),
            )),
            WorkerBackend::Thread => BackendFactory::Thread(ThreadPoolFactory),
        };
        Self::with_factory(options, factory)
    }
}

impl<F: PoolFactory> MinifyPlugin<F> {
    /// Create a plugin running tasks on pools made by `factory`.
    ///
    /// Name caching is switched on when `options.minify.name_cache` is set or
    /// a `name_cache_file` is configured. Entries from the file win over
    /// inline ones.
    pub fn with_factory(options: PluginOptions, factory: F) -> Result<Self> {
        let mut session = Session::new(factory, options.max_workers());

        let name_cache_file = options.name_cache_file.as_deref().map(Utf8PathBuf::from);
        let from_file = name_cache_file.as_deref().map(load_name_cache).transpose()?;

        let seed = match (options.minify.name_cache.as_ref(), from_file) {
            (Some(inline), Some(from_file)) => Some(merge_name_cache(&from_file, inline)),
            (Some(inline), None) => Some(inline.clone()),
            (None, from_file) => from_file,
        };
        if let Some(seed) = seed {
            debug!(
                vars = seed.vars.len(),
                props = seed.props.len(),
                "tracking name cache"
            );
            session = session.with_name_cache(seed);
        }
        if let Some(path) = name_cache_file {
            session = session.with_name_cache_file(path);
        }

        Ok(Self { options, session })
    }

    pub fn name(&self) -> &'static str {
        "minify"
    }

    /// Minify one rendered chunk.
    ///
    /// Options are the build author's, layered over the defaults implied by
    /// `output`. Returns the code alone, or code and map when a source map
    /// was asked for.
    pub async fn render_chunk(
        &self,
        code: &str,
        chunk: &RenderedChunk,
        output: &OutputOptions,
    ) -> Result<RenderedOutput> {
        let options = effective_options(&self.options.minify, output);
        let source_map_requested = options.source_map.unwrap_or(false);

        debug!(
            file_name = %chunk.file_name,
            is_entry = chunk.is_entry,
            len = code.len(),
            "minifying chunk"
        );

        let task = MinifyTask {
            code: code.to_string(),
            options,
        };
        let minified = self
            .session
            .submit(task)
            .await
            .map_err(|source| Error::Chunk {
                file_name: chunk.file_name.clone(),
                source: Box::new(source),
            })?;

        Ok(shape_result(minified, source_map_requested))
    }

    /// Accumulated name cache, if name caching is on.
    pub fn name_cache(&self) -> Option<NameCache> {
        self.session.name_cache()
    }

    pub fn session(&self) -> &Session<F> {
        &self.session
    }

    pub fn options(&self) -> &PluginOptions {
        &self.options
    }
}
