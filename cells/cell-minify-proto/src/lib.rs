//! Wire protocol for the dodeca chunk minify cell
//!
//! Defines the typed envelope exchanged between the host and `ddc-cell-minify`
//! workers. Options travel as plain data and are decoded by ordinary
//! deserialization on the worker side.

use facet::Facet;
use std::collections::HashMap;

mod frame;

pub use frame::{Chunk, FRAME_MAGIC, FrameReader, HEADER_LEN, MAX_FRAME_LEN, write_frame};

/// Cross-chunk record of identifier renames.
///
/// `vars` holds renames of variables, `props` holds renames of property names.
/// Both map an original identifier to the replacement chosen for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(rename_all = "snake_case")]
pub struct NameCache {
    #[facet(default)]
    pub vars: HashMap<String, String>,

    #[facet(default)]
    pub props: HashMap<String, String>,
}

impl NameCache {
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.props.is_empty()
    }
}

/// Options forwarded to the minifier.
///
/// Every field is optional: `None` means "not specified", so defaults computed
/// by the host can be layered underneath whatever the build author wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
#[facet(rename_all = "snake_case")]
pub struct MinifyOptions {
    /// Run the compressor (dead code elimination, constant folding, ...)
    #[facet(default)]
    pub compress: Option<bool>,

    /// Shorten local identifiers
    #[facet(default)]
    pub mangle: Option<bool>,

    /// Parse as an ES module (enables module-only syntax and optimizations)
    #[facet(default)]
    pub module: Option<bool>,

    /// Also mangle names declared in the top-level scope
    #[facet(default)]
    pub toplevel: Option<bool>,

    /// Produce a source map alongside the code
    #[facet(default)]
    pub source_map: Option<bool>,

    /// Keep function names when mangling
    #[facet(default)]
    pub keep_fnames: Option<bool>,

    /// Keep class names when mangling
    #[facet(default)]
    pub keep_classnames: Option<bool>,

    /// Keep comments in the output
    #[facet(default)]
    pub comments: Option<bool>,

    /// Remove `console.*` calls
    #[facet(default)]
    pub drop_console: Option<bool>,

    /// Remove `debugger` statements
    #[facet(default)]
    pub drop_debugger: Option<bool>,

    /// Renames to honor and extend
    #[facet(default)]
    pub name_cache: Option<NameCache>,
}

/// One unit of work: a chunk's source text and the options to minify it with.
#[derive(Debug, Clone, Facet)]
pub struct MinifyTask {
    pub code: String,
    pub options: MinifyOptions,
}

/// What a worker hands back for a successful task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct MinifyOutput {
    /// Minified code
    pub code: String,
    /// Source map (v3 JSON), when one was requested and produced
    pub source_map: Option<String>,
    /// The name cache after this task, when the task carried one
    pub name_cache: Option<NameCache>,
}

/// Messages sent by the host to a worker
#[derive(Debug, Clone, Facet)]
#[repr(u8)]
pub enum HostMessage {
    /// Minify a chunk and reply with `Done` or `Failed` carrying the same id
    Minify { id: u64, task: MinifyTask },
}

/// Messages sent by a worker to the host
#[derive(Debug, Clone, Facet)]
#[repr(u8)]
pub enum WorkerMessage {
    /// Successfully minified the chunk
    Done { id: u64, output: MinifyOutput },
    /// The minifier rejected the chunk
    Failed { id: u64, message: String },
}

impl HostMessage {
    /// Encode into a complete frame (marker, length prefix, payload).
    pub fn to_frame(&self) -> Result<Vec<u8>, EncodeError> {
        let payload = facet_postcard::to_vec(self).map_err(|_| EncodeError::Serialize)?;
        frame::frame_payload(&payload)
    }

    /// Decode from a frame payload (marker and length prefix already stripped).
    pub fn from_payload(bytes: &[u8]) -> Result<Self, DecodeError> {
        facet_postcard::from_bytes(bytes).map_err(|_| DecodeError::Deserialize)
    }
}

impl WorkerMessage {
    /// Encode into a complete frame (marker, length prefix, payload).
    pub fn to_frame(&self) -> Result<Vec<u8>, EncodeError> {
        let payload = facet_postcard::to_vec(self).map_err(|_| EncodeError::Serialize)?;
        frame::frame_payload(&payload)
    }

    /// Decode from a frame payload (marker and length prefix already stripped).
    pub fn from_payload(bytes: &[u8]) -> Result<Self, DecodeError> {
        facet_postcard::from_bytes(bytes).map_err(|_| DecodeError::Deserialize)
    }

    pub fn id(&self) -> u64 {
        match self {
            WorkerMessage::Done { id, .. } | WorkerMessage::Failed { id, .. } => *id,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to serialize message")]
    Serialize,

    #[error("frame of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to deserialize message")]
    Deserialize,

    #[error("frame of {0} bytes exceeds the frame size limit")]
    TooLarge(usize),

    #[error("stream ended in the middle of a frame")]
    Truncated,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
