//! What `render_chunk` hands back to the bundler.

use cell_minify_proto::MinifyOutput;

/// Minified chunk, with its source map when one was asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderedOutput {
    /// Just the code
    Code(String),
    /// Code plus a source map (JSON)
    WithMap { code: String, map: String },
}

impl RenderedOutput {
    pub fn code(&self) -> &str {
        match self {
            RenderedOutput::Code(code) | RenderedOutput::WithMap { code, .. } => code,
        }
    }

    pub fn map(&self) -> Option<&str> {
        match self {
            RenderedOutput::Code(_) => None,
            RenderedOutput::WithMap { map, .. } => Some(map),
        }
    }

    pub fn into_code(self) -> String {
        match self {
            RenderedOutput::Code(code) | RenderedOutput::WithMap { code, .. } => code,
        }
    }
}

/// Pick the shape of the result.
///
/// A map is only passed on when one was requested and the minifier actually
/// produced a non-empty one.
pub fn shape_result(output: MinifyOutput, source_map_requested: bool) -> RenderedOutput {
    match output.source_map {
        Some(map) if source_map_requested && !map.is_empty() => RenderedOutput::WithMap {
            code: output.code,
            map,
        },
        _ => RenderedOutput::Code(output.code),
    }
}
