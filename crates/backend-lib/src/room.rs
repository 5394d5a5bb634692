// ============================
// classroom-backend-lib/src/room.rs
// ============================
//! Room registry and per-room participant directory.
//!
//! The registry is the sole source of truth for "is this room live" during
//! the process lifetime. A room exists iff it has at least one connected
//! participant; the last participant leaving deletes the entry. All
//! mutation happens on the coordinator's single event stream, so the
//! per-room state needs no locking of its own; the `DashMap` shards only
//! guard against the read-only introspection surface.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use classroom_common::{ConnectionId, CurrentSlide, Participant, Role, RoomId};
use dashmap::mapref::one::{Ref, RefMut};
use dashmap::DashMap;
use metrics::{counter, gauge};

use crate::metrics::{ROOMS_ACTIVE, ROOMS_CREATED, ROOMS_DELETED};

/// Last self-reported link quality for one participant. Advisory only.
#[derive(Debug, Clone)]
pub struct BandwidthSample {
    pub bandwidth: String,
    pub connection_quality: String,
}

/// Recording state, present only while a recording is active.
#[derive(Debug)]
pub struct RecordingState {
    pub started_at: DateTime<Utc>,
    /// Artifact reference fixed at start, e.g. `recordings/{room}-{ms}.webm`
    pub artifact: String,
    buffered: Vec<u8>,
}

impl RecordingState {
    pub fn new(room_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            artifact: format!(
                "recordings/{}-{}.webm",
                room_id,
                started_at.timestamp_millis()
            ),
            buffered: Vec::new(),
        }
    }

    /// Buffer an opaque media chunk.
    pub fn push_chunk(&mut self, chunk: &str) {
        self.buffered.extend_from_slice(chunk.as_bytes());
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered.len()
    }

    /// Take the buffered bytes, leaving the buffer empty.
    pub fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffered)
    }
}

/// One live class room. Ephemeral, process-scoped.
#[derive(Debug, Default)]
pub struct Room {
    participants: Vec<Participant>,
    /// Weak reference into `participants`; cleared when that participant is
    /// removed, never auto-reassigned. A new instructor claims the slot by
    /// joining while it is empty.
    instructor: Option<ConnectionId>,
    current_slide: Option<CurrentSlide>,
    recording: Option<RecordingState>,
    bandwidth_stats: HashMap<ConnectionId, BandwidthSample>,
}

impl Room {
    /// Append a participant, preserving join order. The first
    /// instructor-role participant while the slot is empty claims it.
    pub fn add(&mut self, participant: Participant) {
        if participant.user_role == Role::Instructor && self.instructor.is_none() {
            self.instructor = Some(participant.connection_id);
        }
        self.participants.push(participant);
    }

    /// Remove and return the participant for a connection, if present.
    /// Clears the instructor reference and the bandwidth sample for it.
    pub fn remove_by_connection(&mut self, connection_id: ConnectionId) -> Option<Participant> {
        let idx = self
            .participants
            .iter()
            .position(|p| p.connection_id == connection_id)?;

        if self.instructor == Some(connection_id) {
            self.instructor = None;
        }
        self.bandwidth_stats.remove(&connection_id);

        Some(self.participants.remove(idx))
    }

    pub fn find(&self, connection_id: ConnectionId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.connection_id == connection_id)
    }

    pub fn find_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.connection_id == connection_id)
    }

    pub fn find_all(&self, predicate: impl Fn(&Participant) -> bool) -> Vec<&Participant> {
        self.participants.iter().filter(|p| predicate(p)).collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Roster snapshot in join order.
    pub fn roster(&self) -> Vec<Participant> {
        self.participants.clone()
    }

    /// The instructor participant, if the slot is claimed and still present.
    pub fn instructor(&self) -> Option<&Participant> {
        self.instructor.and_then(|id| self.find(id))
    }

    pub fn instructor_connection(&self) -> Option<ConnectionId> {
        self.instructor
    }

    pub fn current_slide(&self) -> Option<&CurrentSlide> {
        self.current_slide.as_ref()
    }

    pub fn set_current_slide(&mut self, slide: CurrentSlide) {
        self.current_slide = Some(slide);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn recording(&self) -> Option<&RecordingState> {
        self.recording.as_ref()
    }

    pub fn recording_mut(&mut self) -> Option<&mut RecordingState> {
        self.recording.as_mut()
    }

    /// Start a recording, discarding any stale buffer from a previous one.
    pub fn start_recording(&mut self, room_id: &str, at: DateTime<Utc>) -> &RecordingState {
        self.recording.insert(RecordingState::new(room_id, at))
    }

    pub fn stop_recording(&mut self) -> Option<RecordingState> {
        self.recording.take()
    }

    pub fn record_bandwidth(&mut self, connection_id: ConnectionId, sample: BandwidthSample) {
        self.bandwidth_stats.insert(connection_id, sample);
    }

    pub fn bandwidth_of(&self, connection_id: ConnectionId) -> Option<&BandwidthSample> {
        self.bandwidth_stats.get(&connection_id)
    }

    /// Connection ids of everyone in the room, join order.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.participants.iter().map(|p| p.connection_id).collect()
    }

    /// Connection ids of everyone except the given sender.
    pub fn connections_except(&self, sender: ConnectionId) -> Vec<ConnectionId> {
        self.participants
            .iter()
            .map(|p| p.connection_id)
            .filter(|id| *id != sender)
            .collect()
    }

    /// Disable audio for every student, returning their connection ids.
    pub fn mute_all_students(&mut self) -> Vec<ConnectionId> {
        self.participants
            .iter_mut()
            .filter(|p| p.user_role == Role::Student)
            .map(|p| {
                p.audio_enabled = false;
                p.connection_id
            })
            .collect()
    }

    /// Connection ids of every student participant.
    pub fn student_connections(&self) -> Vec<ConnectionId> {
        self.participants
            .iter()
            .filter(|p| p.user_role == Role::Student)
            .map(|p| p.connection_id)
            .collect()
    }
}

/// Process-wide mapping of room id to room state.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Room>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Get the room, creating it empty if absent.
    pub fn get_or_create(&self, room_id: &RoomId) -> RefMut<'_, RoomId, Room> {
        let entry = self.rooms.entry(room_id.clone());
        let is_new = matches!(&entry, dashmap::mapref::entry::Entry::Vacant(_));
        let room = entry.or_default();

        if is_new {
            counter!(ROOMS_CREATED).increment(1);
            gauge!(ROOMS_ACTIVE).increment(1.0);
        }

        room
    }

    pub fn get(&self, room_id: &str) -> Option<Ref<'_, RoomId, Room>> {
        self.rooms.get(room_id)
    }

    pub fn get_mut(&self, room_id: &str) -> Option<RefMut<'_, RoomId, Room>> {
        self.rooms.get_mut(room_id)
    }

    /// Remove a room regardless of occupancy (end-class path).
    pub fn remove(&self, room_id: &str) -> Option<Room> {
        let removed = self.rooms.remove(room_id).map(|(_, room)| room);
        if removed.is_some() {
            counter!(ROOMS_DELETED).increment(1);
            gauge!(ROOMS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Remove the room only when its occupancy is zero. Returns whether the
    /// entry was removed.
    pub fn remove_if_empty(&self, room_id: &str) -> bool {
        let removed = self
            .rooms
            .remove_if(room_id, |_, room| room.is_empty())
            .is_some();
        if removed {
            counter!(ROOMS_DELETED).increment(1);
            gauge!(ROOMS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Room ids containing the given connection. The same connection may
    /// have joined several rooms; disconnect cleanup visits each.
    pub fn rooms_of_connection(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        self.rooms
            .iter()
            .filter(|entry| entry.value().find(connection_id).is_some())
            .map(|entry| entry.key().clone())
            .collect()
    }

    // Read-only introspection surface, consumed by the REST layer.

    pub fn active_rooms(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn roster(&self, room_id: &str) -> Option<Vec<Participant>> {
        self.rooms.get(room_id).map(|room| room.roster())
    }

    pub fn is_active(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
