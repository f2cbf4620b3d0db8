//! Audio source capability and the handle the engine passes around.
//!
//! A source produces one PCM frame per `read()`. An empty frame means end of
//! stream. Sources are shared between the registry (which owns them) and the
//! read pool (which borrows them for one tick), so both methods take `&self`
//! and implementations keep their own interior state.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Errors a producer can report from `read()`.
///
/// The mixer treats every variant as end of stream.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("producer failed: {0}")]
    Producer(String),

    #[error("source already closed")]
    Closed,
}

/// Descriptive information about a source, for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub title: Option<String>,
    pub url: Option<String>,
    pub duration_secs: Option<f64>,
}

/// A producer of fixed-format PCM frames.
pub trait AudioSource: Send + Sync {
    /// Produce the next frame. `Ok` with an empty buffer is end of stream;
    /// a buffer shorter than a full frame is the final partial frame.
    fn read(&self) -> Result<Bytes, SourceError>;

    /// Release resources. Must be idempotent.
    fn cleanup(&self);

    fn metadata(&self) -> SourceMetadata {
        SourceMetadata::default()
    }
}

/// Identity of one registered source instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared handle to a source. Equality and hashing use the handle's id, so
/// two clones of the same handle are the same source.
#[derive(Clone)]
pub struct SourceHandle {
    id: SourceId,
    inner: Arc<dyn AudioSource>,
}

impl SourceHandle {
    pub fn new(source: impl AudioSource + 'static) -> Self {
        Self::from_arc(Arc::new(source))
    }

    pub fn from_arc(inner: Arc<dyn AudioSource>) -> Self {
        Self {
            id: SourceId::new(),
            inner,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn read(&self) -> Result<Bytes, SourceError> {
        self.inner.read()
    }

    pub fn cleanup(&self) {
        self.inner.cleanup()
    }

    pub fn metadata(&self) -> SourceMetadata {
        self.inner.metadata()
    }
}

impl PartialEq for SourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SourceHandle {}

impl std::hash::Hash for SourceHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle").field("id", &self.id).finish()
    }
}

/// Which registry collection a source belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Background ambience, any number concurrently
    Layer,
    /// The current "now playing" queue item
    Queue,
    /// The single text-to-speech slot
    Tts,
    /// One-shot button sounds
    Button,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Layer => "layer",
            Category::Queue => "queue",
            Category::Tts => "tts",
            Category::Button => "button",
        };
        f.write_str(name)
    }
}
