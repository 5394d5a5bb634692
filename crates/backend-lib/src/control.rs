// ============================
// classroom-backend-lib/src/control.rs
// ============================
//! Room control state machine.
//!
//! Every action here is instructor-only: the issuing connection must be a
//! participant with the instructor role, otherwise the action is a
//! wire-silent no-op that is still observable through the returned
//! [`Rejection`] and the logs. Recording follows
//! `not-recording --start--> recording --stop--> not-recording`, with
//! chunks accepted only while recording and handed off to the store once
//! the in-memory buffer crosses the configured threshold.

use chrono::Utc;
use classroom_common::{ConnectionId, CurrentSlide, Role, RoomId, ServerEvent};
use metrics::counter;
use tracing::debug;

use crate::metrics::RECORDING_FLUSHES;
use crate::outbound::{Dispatched, Outbound, Rejection};
use crate::persist::PersistOp;
use crate::room::{Room, RoomRegistry};

const REMOVED_REASON: &str = "Removed by instructor";
const CLASS_ENDED_MESSAGE: &str = "The class has been ended by the instructor";

fn require_instructor(
    room: &Room,
    sender: ConnectionId,
    event: &'static str,
) -> Result<(), Rejection> {
    match room.find(sender) {
        Some(p) if p.user_role == Role::Instructor => Ok(()),
        _ => Err(Rejection::unauthorized(event)),
    }
}

pub(crate) fn change_slide(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
    slide_url: String,
    slide_index: u32,
) -> Dispatched {
    let Some(mut room) = registry.get_mut(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "change-slide") {
        return Dispatched::rejected(rejection);
    }

    let now = Utc::now();
    room.set_current_slide(CurrentSlide {
        url: slide_url.clone(),
        index: slide_index,
    });
    let recipients = room.connections_except(sender);
    drop(room);

    Dispatched::send(vec![Outbound::to_all(
        recipients,
        ServerEvent::SlideChanged {
            slide_url: slide_url.clone(),
            slide_index,
        },
    )])
    .with_persist(PersistOp::SlideShown {
        room_id: room_id.clone(),
        url: slide_url,
        index: slide_index,
        at: now,
    })
}

pub(crate) fn start_screen_share(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
) -> Dispatched {
    let Some(room) = registry.get(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "start-screen-share") {
        return Dispatched::rejected(rejection);
    }

    let instructor_name = room
        .find(sender)
        .map(|p| p.user_name.clone())
        .unwrap_or_default();
    let recipients = room.connections_except(sender);
    drop(room);

    Dispatched::send(vec![Outbound::to_all(
        recipients,
        ServerEvent::ScreenShareStarted {
            instructor_connection_id: sender,
            instructor_name,
        },
    )])
}

pub(crate) fn stop_screen_share(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
) -> Dispatched {
    let Some(room) = registry.get(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "stop-screen-share") {
        return Dispatched::rejected(rejection);
    }

    let recipients = room.connections_except(sender);
    drop(room);

    Dispatched::send(vec![Outbound::to_all(
        recipients,
        ServerEvent::ScreenShareStopped,
    )])
}

pub(crate) fn start_poll(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
    poll: serde_json::Value,
) -> Dispatched {
    let Some(room) = registry.get(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "start-poll") {
        return Dispatched::rejected(rejection);
    }

    let recipients = room.connections_except(sender);
    drop(room);

    Dispatched::send(vec![Outbound::to_all(
        recipients,
        ServerEvent::NewPoll { poll },
    )])
}

pub(crate) fn end_poll(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
    poll_id: String,
    results: serde_json::Value,
) -> Dispatched {
    let Some(room) = registry.get(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "end-poll") {
        return Dispatched::rejected(rejection);
    }

    // results echo back to everyone, the instructor included
    let recipients = room.connections();
    drop(room);

    Dispatched::send(vec![Outbound::to_all(
        recipients,
        ServerEvent::PollEnded { poll_id, results },
    )])
}

pub(crate) fn start_recording(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
    initiated_by: String,
) -> Dispatched {
    let Some(mut room) = registry.get_mut(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "start-recording") {
        return Dispatched::rejected(rejection);
    }

    let now = Utc::now();
    // replaces any stale state, discarding a leftover chunk buffer
    room.start_recording(room_id, now);
    let recipients = room.connections_except(sender);
    drop(room);

    Dispatched::send(vec![Outbound::to_all(
        recipients,
        ServerEvent::RecordingStarted { initiated_by },
    )])
    .with_persist(PersistOp::RecordingStarted {
        room_id: room_id.clone(),
        at: now,
    })
}

/// Buffer one opaque media chunk. Not instructor-gated: chunks come from
/// whichever client captures the media. Dropped unless recording.
pub(crate) fn recording_chunk(
    registry: &RoomRegistry,
    room_id: &RoomId,
    chunk: String,
    flush_bytes: usize,
) -> Dispatched {
    if chunk.is_empty() {
        return Dispatched::none();
    }
    let Some(mut room) = registry.get_mut(room_id) else {
        return Dispatched::none();
    };
    let Some(recording) = room.recording_mut() else {
        debug!(%room_id, "dropping chunk, room is not recording");
        return Dispatched::none();
    };

    recording.push_chunk(&chunk);
    if recording.buffered_bytes() < flush_bytes {
        return Dispatched::none();
    }

    // bounded buffer: hand the bytes off to the store and start over
    let bytes = recording.take_buffer();
    let artifact = recording.artifact.clone();
    drop(room);
    counter!(RECORDING_FLUSHES).increment(1);

    Dispatched::none().with_persist(PersistOp::RecordingData {
        room_id: room_id.clone(),
        artifact,
        bytes,
    })
}

pub(crate) fn stop_recording(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
    initiated_by: String,
) -> Dispatched {
    let Some(mut room) = registry.get_mut(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "stop-recording") {
        return Dispatched::rejected(rejection);
    }
    let Some(mut recording) = room.stop_recording() else {
        debug!(%room_id, "stop-recording while not recording");
        return Dispatched::none();
    };

    let recipients = room.connections_except(sender);
    drop(room);

    let now = Utc::now();
    let artifact = recording.artifact.clone();
    let mut dispatched = Dispatched::send(vec![Outbound::to_all(
        recipients,
        ServerEvent::RecordingStopped {
            recording_url: artifact.clone(),
            initiated_by,
        },
    )]);

    let bytes = recording.take_buffer();
    if !bytes.is_empty() {
        dispatched = dispatched.with_persist(PersistOp::RecordingData {
            room_id: room_id.clone(),
            artifact: artifact.clone(),
            bytes,
        });
    }

    dispatched.with_persist(PersistOp::RecordingStopped {
        room_id: room_id.clone(),
        artifact,
        at: now,
    })
}

pub(crate) fn mute_all(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
) -> Dispatched {
    let Some(mut room) = registry.get_mut(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "mute-all") {
        return Dispatched::rejected(rejection);
    }

    let students = room.mute_all_students();
    drop(room);

    Dispatched::send(
        students
            .into_iter()
            .map(|student| Outbound::single(student, ServerEvent::MuteAllCommand))
            .collect(),
    )
}

pub(crate) fn mute_student(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
    student: ConnectionId,
) -> Dispatched {
    let Some(mut room) = registry.get_mut(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "mute-student") {
        return Dispatched::rejected(rejection);
    }
    let Some(target) = room.find_mut(student) else {
        return Dispatched::none();
    };

    target.audio_enabled = false;
    drop(room);

    Dispatched::send(vec![Outbound::single(student, ServerEvent::ForceMute)])
}

pub(crate) fn remove_student(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
    student: ConnectionId,
) -> Dispatched {
    let Some(mut room) = registry.get_mut(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "remove-student") {
        return Dispatched::rejected(rejection);
    }
    let Some(removed) = room.remove_by_connection(student) else {
        return Dispatched::none();
    };

    let remaining = room.connections();
    let total = room.len();
    let emptied = room.is_empty();
    drop(room);

    if emptied {
        registry.remove_if_empty(room_id);
    }

    Dispatched::send(vec![
        Outbound::single(
            student,
            ServerEvent::RemovedFromClass {
                reason: REMOVED_REASON.to_string(),
            },
        ),
        Outbound::to_all(
            remaining,
            ServerEvent::UserLeft {
                user_id: removed.user_id.clone(),
                user_name: removed.user_name.clone(),
                total_participants: total,
            },
        ),
    ])
    .with_persist(PersistOp::ParticipantLeft {
        room_id: room_id.clone(),
        user_id: removed.user_id,
        at: Utc::now(),
    })
}

pub(crate) fn end_class(
    registry: &RoomRegistry,
    sender: ConnectionId,
    room_id: &RoomId,
) -> Dispatched {
    let Some(room) = registry.get(room_id) else {
        return Dispatched::none();
    };
    if let Err(rejection) = require_instructor(&room, sender, "end-class") {
        return Dispatched::rejected(rejection);
    }

    // terminal notice goes to everyone, then the room is gone immediately;
    // nobody gets to acknowledge
    let recipients = room.connections();
    drop(room);
    registry.remove(room_id);

    Dispatched::send(vec![Outbound::to_all(
        recipients,
        ServerEvent::ClassEnded {
            message: CLASS_ENDED_MESSAGE.to_string(),
        },
    )])
    .with_persist(PersistOp::MarkEnded {
        room_id: room_id.clone(),
        at: Utc::now(),
    })
}
