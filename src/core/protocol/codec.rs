// src/core/protocol/codec.rs

//! Length-prefixed JSON framing for the control stream and the peer relay.
//!
//! Each frame is a 4-byte big-endian length followed by one serialized
//! message. The codec is generic over the inbound and outbound message types
//! so the same implementation serves both ends of a stream.

use crate::core::FoghornError;
use crate::core::protocol::{ControllerMessage, NodeMessage, RelayMessage};
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Hard cap on a single frame. A node update for a busy edge is a few KiB;
/// anything near this limit is a protocol violation, not data.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const LEN_PREFIX_BYTES: usize = 4;

/// A codec decoding `Rx` frames and encoding `Tx` frames.
#[derive(Debug)]
pub struct FrameCodec<Rx, Tx> {
    _marker: PhantomData<(Rx, Tx)>,
}

impl<Rx, Tx> Default for FrameCodec<Rx, Tx> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Rx, Tx> FrameCodec<Rx, Tx> {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Server side of a node control stream.
pub type ControlCodec = FrameCodec<NodeMessage, ControllerMessage>;
/// Node side of a control stream; used by tests and the embedded node driver.
pub type NodeSideCodec = FrameCodec<ControllerMessage, NodeMessage>;
/// Both ends of a controller-to-controller relay connection.
pub type RelayCodec = FrameCodec<RelayMessage, RelayMessage>;

impl<Rx: DeserializeOwned, Tx> Decoder for FrameCodec<Rx, Tx> {
    type Item = Rx;
    type Error = FoghornError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX_BYTES {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_PREFIX_BYTES];
        len_bytes.copy_from_slice(&src[..LEN_PREFIX_BYTES]);
        let frame_len = u32::from_be_bytes(len_bytes) as usize;

        if frame_len > MAX_FRAME_BYTES {
            return Err(FoghornError::Protocol(format!(
                "frame of {frame_len} bytes exceeds the {MAX_FRAME_BYTES} byte limit"
            )));
        }

        if src.len() < LEN_PREFIX_BYTES + frame_len {
            // Reserve what we already know is coming to avoid repeated growth.
            src.reserve(LEN_PREFIX_BYTES + frame_len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX_BYTES);
        let body = src.split_to(frame_len);
        let message = serde_json::from_slice(&body)?;
        Ok(Some(message))
    }
}

impl<Rx, Tx: Serialize> Encoder<Tx> for FrameCodec<Rx, Tx> {
    type Error = FoghornError;

    fn encode(&mut self, item: Tx, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > MAX_FRAME_BYTES {
            return Err(FoghornError::Protocol(format!(
                "refusing to encode a {} byte frame",
                body.len()
            )));
        }
        dst.reserve(LEN_PREFIX_BYTES + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}
