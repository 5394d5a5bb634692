// ============================
// classroom-backend-lib/src/relay.rs
// ============================
//! Signaling relay.
//!
//! Forwards session-negotiation payloads (offer / answer / ICE candidate)
//! between peers without inspecting them. Delivery is fire-and-forget and
//! at-most-once: a vanished target or room is a silent drop, because
//! signaling is inherently racy with disconnects and the media layer is
//! expected to renegotiate.

use classroom_common::{ConnectionId, RoomId, ServerEvent};
use tracing::debug;

use crate::outbound::{Dispatched, Outbound};
use crate::room::RoomRegistry;

/// Route one signaling event: an explicit target wins, otherwise the
/// payload goes to everyone in the room except the sender.
pub(crate) fn relay(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: Option<&RoomId>,
    target: Option<ConnectionId>,
    event: ServerEvent,
) -> Dispatched {
    if let Some(target) = target {
        return Dispatched::send(vec![Outbound::single(target, event)]);
    }

    let Some(room_id) = room_id else {
        debug!(%sender, "signaling frame with neither target nor room");
        return Dispatched::none();
    };

    let Some(room) = registry.get(room_id) else {
        debug!(%sender, %room_id, "signaling frame for unknown room");
        return Dispatched::none();
    };

    let recipients = room.connections_except(sender);
    drop(room);

    Dispatched::send(vec![Outbound::to_all(recipients, event)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use classroom_common::{Participant, Role};
    use serde_json::json;
    use uuid::Uuid;

    fn join(registry: &RoomRegistry, room: &str, name: &str) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        registry.get_or_create(&room.to_string()).add(Participant {
            connection_id,
            user_id: format!("uid-{name}"),
            user_name: name.to_string(),
            user_role: Role::Student,
            joined_at: Utc::now(),
            audio_enabled: true,
            video_enabled: false,
            hand_raised: false,
            bandwidth: "medium".to_string(),
            connection_quality: "good".to_string(),
        });
        connection_id
    }

    #[test]
    fn targeted_relay_is_exact_passthrough() {
        let registry = RoomRegistry::new();
        let a = join(&registry, "r1", "a");
        let b = join(&registry, "r1", "b");

        let payload = json!({"sdp": "v=0\r\no=- 1 1 IN IP4 0.0.0.0"});
        let dispatched = relay(
            &registry,
            a,
            None,
            Some(b),
            ServerEvent::WebrtcOffer {
                offer: payload.clone(),
                from_connection_id: a,
            },
        );

        assert_eq!(dispatched.outbound.len(), 1);
        assert_eq!(dispatched.outbound[0].recipients, vec![b]);
        match &dispatched.outbound[0].event {
            ServerEvent::WebrtcOffer {
                offer,
                from_connection_id,
            } => {
                assert_eq!(offer, &payload);
                assert_eq!(*from_connection_id, a);
            },
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn broadcast_relay_excludes_sender() {
        let registry = RoomRegistry::new();
        let room_id = "r1".to_string();
        let a = join(&registry, "r1", "a");
        let b = join(&registry, "r1", "b");
        let c = join(&registry, "r1", "c");

        let dispatched = relay(
            &registry,
            a,
            Some(&room_id),
            None,
            ServerEvent::WebrtcIceCandidate {
                candidate: json!({"candidate": "candidate:0 1 UDP"}),
                from_connection_id: a,
            },
        );

        assert_eq!(dispatched.outbound[0].recipients, vec![b, c]);
    }

    #[test]
    fn unknown_room_is_a_silent_drop() {
        let registry = RoomRegistry::new();
        let a = Uuid::new_v4();
        let room_id = "ghost".to_string();

        let dispatched = relay(
            &registry,
            a,
            Some(&room_id),
            None,
            ServerEvent::WebrtcAnswer {
                answer: json!({}),
                from_connection_id: a,
            },
        );

        assert!(dispatched.outbound.is_empty());
        assert!(dispatched.rejection.is_none());
    }

    #[test]
    fn frame_without_target_or_room_is_dropped() {
        let registry = RoomRegistry::new();
        let a = Uuid::new_v4();

        let dispatched = relay(
            &registry,
            a,
            None,
            None,
            ServerEvent::WebrtcAnswer {
                answer: json!({}),
                from_connection_id: a,
            },
        );

        assert!(dispatched.outbound.is_empty());
    }
}
