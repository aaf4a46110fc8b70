// tests/unit_codec_test.rs

//! Frame codec behavior: round-trips, split delivery, and the frame cap.

use bytes::{BufMut, BytesMut};
use foghorn::core::FoghornError;
use foghorn::core::protocol::{
    ControlCodec, ControllerMessage, MAX_FRAME_BYTES, NodeMessage, NodeSideCodec, OperationalMode,
};
use tokio_util::codec::{Decoder, Encoder};

fn roundtrip_node_message(message: NodeMessage) -> NodeMessage {
    let mut node_side = NodeSideCodec::new();
    let mut control_side = ControlCodec::new();
    let mut buf = BytesMut::new();
    node_side.encode(message, &mut buf).unwrap();
    control_side.decode(&mut buf).unwrap().unwrap()
}

#[test]
fn test_heartbeat_roundtrip() {
    let decoded = roundtrip_node_message(NodeMessage::Heartbeat);
    assert!(matches!(decoded, NodeMessage::Heartbeat));
}

#[test]
fn test_register_roundtrip_preserves_fields() {
    let decoded = roundtrip_node_message(NodeMessage::Register {
        node_id: "edge-7".to_string(),
        fingerprint: None,
        enrollment_token: Some("tok".to_string()),
        cpu_cores: 16,
        memory_gb: 64,
        disk_gb: 2000,
        requested_mode: Some(OperationalMode::Draining),
        roles: vec!["edge".to_string(), "storage".to_string()],
    });
    match decoded {
        NodeMessage::Register {
            node_id,
            enrollment_token,
            requested_mode,
            roles,
            ..
        } => {
            assert_eq!(node_id, "edge-7");
            assert_eq!(enrollment_token.as_deref(), Some("tok"));
            assert_eq!(requested_mode, Some(OperationalMode::Draining));
            assert_eq!(roles.len(), 2);
        }
        other => panic!("wrong variant {other:?}"),
    }
}

#[test]
fn test_controller_message_roundtrip() {
    let mut control_side = ControlCodec::new();
    let mut node_side = NodeSideCodec::new();
    let mut buf = BytesMut::new();
    control_side
        .encode(
            ControllerMessage::DvrStopRequest {
                dvr_hash: "abc123".to_string(),
            },
            &mut buf,
        )
        .unwrap();
    let decoded = node_side.decode(&mut buf).unwrap().unwrap();
    assert!(matches!(
        decoded,
        ControllerMessage::DvrStopRequest { dvr_hash } if dvr_hash == "abc123"
    ));
}

#[test]
fn test_partial_frames_wait_for_more_bytes() {
    let mut node_side = NodeSideCodec::new();
    let mut control_side = ControlCodec::new();
    let mut full = BytesMut::new();
    node_side.encode(NodeMessage::Heartbeat, &mut full).unwrap();

    // Deliver one byte at a time; the decoder must stay incomplete until the
    // last byte arrives.
    let mut partial = BytesMut::new();
    let bytes: Vec<u8> = full.to_vec();
    for (i, byte) in bytes.iter().enumerate() {
        partial.put_u8(*byte);
        let decoded = control_side.decode(&mut partial).unwrap();
        if i + 1 < bytes.len() {
            assert!(decoded.is_none(), "decoded early at byte {i}");
        } else {
            assert!(matches!(decoded, Some(NodeMessage::Heartbeat)));
        }
    }
}

#[test]
fn test_two_frames_in_one_buffer_decode_in_order() {
    let mut node_side = NodeSideCodec::new();
    let mut control_side = ControlCodec::new();
    let mut buf = BytesMut::new();
    node_side
        .encode(
            NodeMessage::DvrReadyRequest {
                dvr_hash: "first".to_string(),
            },
            &mut buf,
        )
        .unwrap();
    node_side.encode(NodeMessage::Heartbeat, &mut buf).unwrap();

    let first = control_side.decode(&mut buf).unwrap().unwrap();
    assert!(matches!(
        first,
        NodeMessage::DvrReadyRequest { dvr_hash } if dvr_hash == "first"
    ));
    let second = control_side.decode(&mut buf).unwrap().unwrap();
    assert!(matches!(second, NodeMessage::Heartbeat));
    assert!(control_side.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_oversized_frame_is_a_protocol_error() {
    let mut control_side = ControlCodec::new();
    let mut buf = BytesMut::new();
    buf.put_u32((MAX_FRAME_BYTES + 1) as u32);
    buf.put_slice(b"whatever");
    let err = control_side.decode(&mut buf).unwrap_err();
    assert!(matches!(err, FoghornError::Protocol(_)));
}

#[test]
fn test_garbage_payload_is_a_protocol_error() {
    let mut control_side = ControlCodec::new();
    let mut buf = BytesMut::new();
    let garbage = b"not json at all";
    buf.put_u32(garbage.len() as u32);
    buf.put_slice(garbage);
    let err = control_side.decode(&mut buf).unwrap_err();
    assert!(matches!(err, FoghornError::Protocol(_)));
}
