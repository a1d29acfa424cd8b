//! JavaScript chunk minification using OXC.
//!
//! This is what a `ddc-cell-minify` worker (or an in-process blocking thread)
//! runs for every task. It parses the chunk, compresses and mangles it, prints
//! it back out and optionally produces a source map.

use std::path::PathBuf;

use cell_minify_proto::{MinifyOptions, MinifyOutput, MinifyTask};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::minifier::{
    CompressOptions, MangleOptions, MangleOptionsKeepNames, Minifier, MinifierOptions,
};
use oxc::parser::Parser;
use oxc::span::SourceType;
use tracing::debug;

mod names;

/// Source name recorded in produced source maps. The bundler remaps it onto
/// the chunk's real sources.
const SOURCE_MAP_SOURCE: &str = "chunk.js";

#[derive(Debug, thiserror::Error)]
pub enum MinifyError {
    /// The chunk is not valid JavaScript
    #[error("parse error: {0}")]
    Parse(String),
}

/// Minify options with every default filled in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub compress: bool,
    pub mangle: bool,
    pub module: bool,
    pub toplevel: bool,
    pub source_map: bool,
    pub keep_fnames: bool,
    pub keep_classnames: bool,
    pub comments: bool,
    pub drop_console: bool,
    pub drop_debugger: bool,
}

impl Resolved {
    pub fn from_options(options: &MinifyOptions) -> Self {
        Self {
            compress: options.compress.unwrap_or(true),
            mangle: options.mangle.unwrap_or(true),
            module: options.module.unwrap_or(false),
            toplevel: options.toplevel.unwrap_or(false),
            source_map: options.source_map.unwrap_or(false),
            keep_fnames: options.keep_fnames.unwrap_or(false),
            keep_classnames: options.keep_classnames.unwrap_or(false),
            comments: options.comments.unwrap_or(false),
            drop_console: options.drop_console.unwrap_or(false),
            drop_debugger: options.drop_debugger.unwrap_or(true),
        }
    }

    /// Whether names declared at the top level get shortened.
    /// Module scope is private to the module, so ES modules always qualify.
    pub fn mangles_top_level(&self) -> bool {
        self.mangle && (self.toplevel || self.module)
    }
}

/// Minify one chunk.
pub fn minify(task: &MinifyTask) -> Result<MinifyOutput, MinifyError> {
    let resolved = Resolved::from_options(&task.options);
    let code = task.code.as_str();

    let allocator = Allocator::default();
    let source_type = if resolved.module {
        SourceType::mjs()
    } else {
        SourceType::cjs()
    };
    let parser_result = Parser::new(&allocator, code, source_type).parse();

    if parser_result.panicked || !parser_result.errors.is_empty() {
        let first_error = parser_result
            .errors
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "parser panicked".to_string());
        return Err(MinifyError::Parse(first_error));
    }

    let mut program = parser_result.program;

    let options = MinifierOptions {
        mangle: resolved.mangle.then(|| MangleOptions {
            top_level: resolved.mangles_top_level(),
            keep_names: MangleOptionsKeepNames {
                function: resolved.keep_fnames,
                class: resolved.keep_classnames,
            },
            ..MangleOptions::default()
        }),
        compress: resolved.compress.then(|| CompressOptions {
            drop_console: resolved.drop_console,
            drop_debugger: resolved.drop_debugger,
            ..CompressOptions::smallest()
        }),
    };
    let minified = Minifier::new(options).minify(&allocator, &mut program);
    let mut scoping = minified.scoping;

    // Renames only make sense to share when top-level names are mangled
    let name_cache = task.options.name_cache.as_ref().map(|cache| {
        match scoping.as_mut() {
            Some(scoping) if resolved.mangles_top_level() => {
                names::sync_name_cache(scoping, cache)
            }
            _ => cache.clone(),
        }
    });

    let comments = if resolved.comments {
        CommentOptions::default()
    } else {
        CommentOptions::disabled()
    };

    let printed = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments,
            source_map_path: resolved
                .source_map
                .then(|| PathBuf::from(SOURCE_MAP_SOURCE)),
            ..CodegenOptions::default()
        })
        .with_scoping(scoping)
        .build(&program);

    let source_map = if resolved.source_map {
        printed.map.map(|map| map.to_json_string())
    } else {
        None
    };

    debug!(
        input_len = code.len(),
        output_len = printed.code.len(),
        has_map = source_map.is_some(),
        "minified chunk"
    );

    // Nothing left to print (e.g. a chunk of pure declarations that all got
    // dropped) still needs to be valid output
    let code = if printed.code.is_empty() {
        task.code.clone()
    } else {
        printed.code
    };

    Ok(MinifyOutput {
        code,
        source_map,
        name_cache,
    })
}
