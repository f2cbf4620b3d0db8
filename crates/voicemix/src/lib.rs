//! voicemix: realtime audio mixing and source routing for voice connections.
//!
//! A voice transport wants exactly one 20ms PCM frame every 20ms. This crate
//! produces those frames from a changing set of concurrent producers:
//!
//! - **Sources** ([`source`]): anything implementing [`AudioSource`]
//! - **Registry** ([`registry`]): background layers, a playback queue, a TTS
//!   slot and one-shot button sounds, all safe to edit during playback
//! - **Mixer** ([`mixer`]): per-tick parallel reads with a deadline, wide
//!   summing, clipping, and retirement of finished sources
//! - **Routing** ([`routing`]): a node graph that decides which prepared
//!   sources are audible
//! - **Sessions** ([`session`]): one of each of the above per connection
//! - **Tick driver** ([`tick`]): a paced thread feeding a [`FrameSink`]
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voicemix::{FrameMixer, MixerConfig, SourceHandle, SourceRegistry, ToneSource};
//!
//! let registry = Arc::new(SourceRegistry::new());
//! let mixer = FrameMixer::new(registry.clone(), MixerConfig::default()).unwrap();
//! registry.add_to_queue(SourceHandle::new(ToneSource::default()));
//! let frame = mixer.read();
//! assert_eq!(frame.len(), voicemix::FRAME_SIZE);
//! ```

pub mod frame;
pub mod graph;
pub mod mixer;
pub mod read_pool;
pub mod registry;
pub mod routing;
pub mod session;
pub mod source;
pub mod telemetry;
pub mod tick;
pub mod tone;
pub mod volume;

pub use frame::{silence, FRAME_SIZE};
pub use graph::{GraphEdge, GraphNode, NodeKind, SoundGraph};
pub use mixer::{EventKind, FrameMixer, MixerConfig, MixerEvent, MixerStatsSnapshot};
pub use registry::{ButtonId, LayerId, SourceRegistry};
pub use routing::{GraphExecutor, MediaRequest, MediaResolver, ResolveError, RoutingError};
pub use session::{Session, SessionError, SessionManager};
pub use source::{AudioSource, Category, SourceError, SourceHandle, SourceMetadata};
pub use tick::{FrameSink, MemorySink, TickDriver, WavSink};
pub use tone::{MultiToneSource, ToneResolver, ToneSource};
pub use volume::{VolumeControl, VolumeSource};
