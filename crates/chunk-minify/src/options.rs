//! Plugin options, bundler output settings, and option defaulting.

use cell_minify_proto::MinifyOptions;
use facet::Facet;

/// Options supplied by the build author.
///
/// Everything under `minify` goes to the minifier untouched. The other fields
/// configure how work gets distributed.
#[derive(Debug, Clone, Default, Facet)]
#[facet(rename_all = "snake_case")]
pub struct PluginOptions {
    /// Maximum number of workers running at once.
    /// Defaults to the available parallelism minus one (at least one).
    #[facet(default)]
    pub max_workers: Option<usize>,

    /// Where tasks run: separate worker processes or in-process blocking threads
    #[facet(default)]
    pub worker: Option<WorkerBackend>,

    /// Explicit path to the `ddc-cell-minify` executable
    #[facet(default)]
    pub worker_path: Option<String>,

    /// File the name cache is loaded from and saved to between builds
    #[facet(default)]
    pub name_cache_file: Option<String>,

    /// Options passed through to the minifier
    #[facet(default)]
    pub minify: MinifyOptions,
}

impl PluginOptions {
    pub fn max_workers(&self) -> usize {
        self.max_workers
            .filter(|&n| n > 0)
            .unwrap_or_else(default_max_workers)
    }

    pub fn backend(&self) -> WorkerBackend {
        self.worker.unwrap_or_default()
    }
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(1)
}

/// Where minify tasks run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Facet)]
#[facet(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerBackend {
    /// `ddc-cell-minify` child processes
    #[default]
    Process,
    /// Tokio's blocking thread pool inside the build process
    Thread,
}

/// Module format of the bundle being written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// ECMAScript modules
    Es,
    /// CommonJS
    Cjs,
    Amd,
    Iife,
    Umd,
    System,
}

/// Source map setting of the bundle being written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourcemapOption {
    #[default]
    Disabled,
    /// Separate `.map` file
    Enabled,
    /// Map appended to the chunk as a data URL
    Inline,
    /// Map written without a reference comment
    Hidden,
}

impl SourcemapOption {
    pub fn is_requested(self) -> bool {
        !matches!(self, SourcemapOption::Disabled)
    }
}

/// The bundler's resolved output options, as far as minification cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputOptions {
    pub format: OutputFormat,
    pub sourcemap: SourcemapOption,
}

impl OutputOptions {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            sourcemap: SourcemapOption::Disabled,
        }
    }

    pub fn with_sourcemap(mut self, sourcemap: SourcemapOption) -> Self {
        self.sourcemap = sourcemap;
        self
    }
}

/// Metadata about the chunk being rendered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedChunk {
    pub file_name: String,
    pub is_entry: bool,
}

impl RenderedChunk {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            is_entry: false,
        }
    }
}

/// Defaults implied by the bundler's output settings.
pub fn default_options(output: &OutputOptions) -> MinifyOptions {
    let mut defaults = MinifyOptions {
        source_map: Some(output.sourcemap.is_requested()),
        ..Default::default()
    };

    match output.format {
        OutputFormat::Es => defaults.module = Some(true),
        OutputFormat::Cjs => defaults.toplevel = Some(true),
        OutputFormat::Amd | OutputFormat::Iife | OutputFormat::Umd | OutputFormat::System => {}
    }

    defaults
}

/// The options a task actually runs with: the build author's options layered
/// over the defaults from [`default_options`].
pub fn effective_options(user: &MinifyOptions, output: &OutputOptions) -> MinifyOptions {
    overlay(default_options(output), user)
}

/// Fields set in `top` win, everything else comes from `base`.
fn overlay(base: MinifyOptions, top: &MinifyOptions) -> MinifyOptions {
    MinifyOptions {
        compress: top.compress.or(base.compress),
        mangle: top.mangle.or(base.mangle),
        module: top.module.or(base.module),
        toplevel: top.toplevel.or(base.toplevel),
        source_map: top.source_map.or(base.source_map),
        keep_fnames: top.keep_fnames.or(base.keep_fnames),
        keep_classnames: top.keep_classnames.or(base.keep_classnames),
        comments: top.comments.or(base.comments),
        drop_console: top.drop_console.or(base.drop_console),
        drop_debugger: top.drop_debugger.or(base.drop_debugger),
        name_cache: top.name_cache.clone().or(base.name_cache),
    }
}
