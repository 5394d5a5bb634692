// ================
// crates/common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between live class clients and the coordinator.
//! This module defines the WebSocket protocol events and supporting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier of a scheduled live class room, stable for the session's lifetime.
pub type RoomId = String;

/// Identifier of one physical client connection. A user who reconnects gets a
/// new one.
pub type ConnectionId = Uuid;

/// Role claimed by a participant at join time, immutable for the connection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Instructor,
    Student,
}

/// Media track a participant can toggle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

/// The slide currently shown in a room, last write wins.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSlide {
    pub url: String,
    pub index: u32,
}

/// One connected client in a room, as seen on the wire.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub user_name: String,
    pub user_role: Role,
    pub joined_at: DateTime<Utc>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub hand_raised: bool,
    pub bandwidth: String,
    pub connection_quality: String,
}

/// Events sent from client to coordinator.
///
/// Tagged with the kebab-case socket event name; unknown or non-conforming
/// frames are answered with [`ServerEvent::MalformedEvent`] rather than
/// tearing down the stream.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinClass {
        room_id: RoomId,
        user_id: String,
        user_name: String,
        user_role: Role,
    },
    #[serde(rename_all = "camelCase")]
    LeaveClass {
        room_id: RoomId,
        user_id: String,
    },
    /// Session negotiation payloads are opaque to the coordinator. A missing
    /// target means "everyone in the room except me".
    #[serde(rename_all = "camelCase")]
    WebrtcOffer {
        #[serde(default)]
        room_id: Option<RoomId>,
        #[serde(default)]
        target_connection_id: Option<ConnectionId>,
        #[serde(default)]
        offer: Value,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcAnswer {
        #[serde(default)]
        room_id: Option<RoomId>,
        #[serde(default)]
        target_connection_id: Option<ConnectionId>,
        #[serde(default)]
        answer: Value,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcIceCandidate {
        #[serde(default)]
        room_id: Option<RoomId>,
        #[serde(default)]
        target_connection_id: Option<ConnectionId>,
        #[serde(default)]
        candidate: Value,
    },
    #[serde(rename_all = "camelCase")]
    BandwidthUpdate {
        room_id: RoomId,
        bandwidth: String,
        connection_quality: String,
    },
    #[serde(rename_all = "camelCase")]
    ToggleMedia {
        room_id: RoomId,
        media_type: MediaType,
        enabled: bool,
    },
    #[serde(rename_all = "camelCase")]
    ChangeSlide {
        room_id: RoomId,
        slide_url: String,
        slide_index: u32,
    },
    #[serde(rename_all = "camelCase")]
    StartScreenShare {
        room_id: RoomId,
    },
    #[serde(rename_all = "camelCase")]
    StopScreenShare {
        room_id: RoomId,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        room_id: RoomId,
        message: String,
        user_name: String,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    RaiseHand {
        room_id: RoomId,
        user_id: String,
        user_name: String,
        raised: bool,
    },
    #[serde(rename_all = "camelCase")]
    StartPoll {
        room_id: RoomId,
        #[serde(default)]
        poll: Value,
    },
    #[serde(rename_all = "camelCase")]
    SubmitPollResponse {
        room_id: RoomId,
        #[serde(default)]
        poll_id: String,
        #[serde(default)]
        response: Value,
        user_id: String,
        user_name: String,
    },
    #[serde(rename_all = "camelCase")]
    EndPoll {
        room_id: RoomId,
        #[serde(default)]
        poll_id: String,
        #[serde(default)]
        results: Value,
    },
    #[serde(rename_all = "camelCase")]
    StartRecording {
        room_id: RoomId,
        #[serde(default)]
        initiated_by: String,
    },
    #[serde(rename_all = "camelCase")]
    RecordingChunk {
        room_id: RoomId,
        #[serde(default)]
        chunk: String,
    },
    #[serde(rename_all = "camelCase")]
    StopRecording {
        room_id: RoomId,
        #[serde(default)]
        initiated_by: String,
    },
    #[serde(rename_all = "camelCase")]
    MuteAll {
        room_id: RoomId,
    },
    #[serde(rename_all = "camelCase")]
    MuteStudent {
        room_id: RoomId,
        student_connection_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    RemoveStudent {
        room_id: RoomId,
        student_connection_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    EndClass {
        room_id: RoomId,
    },
}

impl ClientEvent {
    /// Wire name of the event, used for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::JoinClass { .. } => "join-class",
            ClientEvent::LeaveClass { .. } => "leave-class",
            ClientEvent::WebrtcOffer { .. } => "webrtc-offer",
            ClientEvent::WebrtcAnswer { .. } => "webrtc-answer",
            ClientEvent::WebrtcIceCandidate { .. } => "webrtc-ice-candidate",
            ClientEvent::BandwidthUpdate { .. } => "bandwidth-update",
            ClientEvent::ToggleMedia { .. } => "toggle-media",
            ClientEvent::ChangeSlide { .. } => "change-slide",
            ClientEvent::StartScreenShare { .. } => "start-screen-share",
            ClientEvent::StopScreenShare { .. } => "stop-screen-share",
            ClientEvent::ChatMessage { .. } => "chat-message",
            ClientEvent::RaiseHand { .. } => "raise-hand",
            ClientEvent::StartPoll { .. } => "start-poll",
            ClientEvent::SubmitPollResponse { .. } => "submit-poll-response",
            ClientEvent::EndPoll { .. } => "end-poll",
            ClientEvent::StartRecording { .. } => "start-recording",
            ClientEvent::RecordingChunk { .. } => "recording-chunk",
            ClientEvent::StopRecording { .. } => "stop-recording",
            ClientEvent::MuteAll { .. } => "mute-all",
            ClientEvent::MuteStudent { .. } => "mute-student",
            ClientEvent::RemoveStudent { .. } => "remove-student",
            ClientEvent::EndClass { .. } => "end-class",
        }
    }
}

/// Events sent from coordinator to clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Snapshot sent to a participant right after joining.
    #[serde(rename_all = "camelCase")]
    RoomState {
        participants: Vec<Participant>,
        current_slide: Option<CurrentSlide>,
        instructor: Option<Participant>,
        is_recording: bool,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        participant: Participant,
        total_participants: usize,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        user_id: String,
        user_name: String,
        total_participants: usize,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcOffer {
        offer: Value,
        from_connection_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcAnswer {
        answer: Value,
        from_connection_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    WebrtcIceCandidate {
        candidate: Value,
        from_connection_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantBandwidthUpdate {
        user_id: String,
        user_name: String,
        bandwidth: String,
        connection_quality: String,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantMediaChanged {
        user_id: String,
        user_name: String,
        media_type: MediaType,
        enabled: bool,
    },
    #[serde(rename_all = "camelCase")]
    SlideChanged {
        slide_url: String,
        slide_index: u32,
    },
    #[serde(rename_all = "camelCase")]
    ScreenShareStarted {
        instructor_connection_id: ConnectionId,
        instructor_name: String,
    },
    ScreenShareStopped,
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        message: String,
        user_name: String,
        user_id: String,
    },
    #[serde(rename_all = "camelCase")]
    HandRaised {
        user_id: String,
        user_name: String,
        raised: bool,
    },
    #[serde(rename_all = "camelCase")]
    NewPoll {
        poll: Value,
    },
    #[serde(rename_all = "camelCase")]
    PollResponse {
        poll_id: String,
        response: Value,
        user_id: String,
        user_name: String,
    },
    #[serde(rename_all = "camelCase")]
    PollEnded {
        poll_id: String,
        results: Value,
    },
    #[serde(rename_all = "camelCase")]
    RecordingStarted {
        initiated_by: String,
    },
    #[serde(rename_all = "camelCase")]
    RecordingStopped {
        recording_url: String,
        initiated_by: String,
    },
    MuteAllCommand,
    ForceMute,
    #[serde(rename_all = "camelCase")]
    RemovedFromClass {
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    ClassEnded {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    MalformedEvent {
        detail: String,
    },
}

/// A delivered frame: the event plus the server clock at fan-out time.
///
/// `sentAt` is assigned by the coordinator and is distinct from any
/// client-supplied time field, so receivers share one ordering reference.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ServerEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_wire_names() {
        let json = r#"{
            "event": "join-class",
            "roomId": "physics-101",
            "userId": "u1",
            "userName": "Ada",
            "userRole": "instructor"
        }"#;

        let parsed: ClientEvent = serde_json::from_str(json).unwrap();
        match parsed {
            ClientEvent::JoinClass {
                room_id,
                user_id,
                user_name,
                user_role,
            } => {
                assert_eq!(room_id, "physics-101");
                assert_eq!(user_id, "u1");
                assert_eq!(user_name, "Ada");
                assert_eq!(user_role, Role::Instructor);
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn signaling_target_defaults_to_broadcast() {
        let json = r#"{"event":"webrtc-offer","roomId":"r1","offer":{"sdp":"v=0"}}"#;
        let parsed: ClientEvent = serde_json::from_str(json).unwrap();
        match parsed {
            ClientEvent::WebrtcOffer {
                room_id,
                target_connection_id,
                offer,
            } => {
                assert_eq!(room_id.as_deref(), Some("r1"));
                assert!(target_connection_id.is_none());
                assert_eq!(offer["sdp"], "v=0");
            },
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn envelope_flattens_event() {
        let envelope = Envelope {
            sent_at: Utc::now(),
            event: ServerEvent::SlideChanged {
                slide_url: "s2.png".to_string(),
                slide_index: 1,
            },
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event"], "slide-changed");
        assert_eq!(value["slideUrl"], "s2.png");
        assert_eq!(value["slideIndex"], 1);
        assert!(value["sentAt"].is_string());
    }

    #[test]
    fn unknown_event_is_an_error_not_a_panic() {
        let json = r#"{"event":"warp-drive","roomId":"r1"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }
}
