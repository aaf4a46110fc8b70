// src/core/protocol/mod.rs

//! The control-stream wire protocol: message types and framing.

pub mod codec;
pub mod message;

pub use codec::{ControlCodec, FrameCodec, MAX_FRAME_BYTES, NodeSideCodec, RelayCodec};
pub use message::{
    AssetType, BufferState, Capabilities, ControllerMessage, DvrNotReadyReason, DvrSettings,
    Fingerprint, GeoLocation, LoadMetrics, NodeMessage, OperationalMode, RelayMessage,
    StorageInfo, StreamStats, StreamStatus,
};
