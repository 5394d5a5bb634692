// ============================
// classroom-backend-lib/src/coordinator.rs
// ============================
//! The session coordinator actor.
//!
//! All inbound events for every room funnel through one mpsc queue and are
//! handled to completion in arrival order, so registry and directory
//! mutation is free of data races by construction. Handlers return a
//! [`Dispatched`] describing the frames to fan out and the durable updates
//! to apply; delivery is synchronous `try_send` (never blocks the stream)
//! and persistence is spawned fire-and-forget (store latency or failure
//! never stalls the live path).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use classroom_common::{
    ClientEvent, ConnectionId, Envelope, MediaType, Participant, Role, RoomId, ServerEvent,
};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::control;
use crate::metrics::{EVENTS_DISPATCHED, PERSIST_FAILURES, WS_ACTIVE, WS_CONNECTIONS};
use crate::outbound::{self, Dispatched, Outbound};
use crate::persist::{PersistOp, SessionStore};
use crate::relay;
use crate::room::{BandwidthSample, RoomRegistry};

/// Message sent *into* the actor
#[derive(Debug)]
pub enum CoordinatorMsg {
    Connect {
        connection_id: ConnectionId,
        tx: mpsc::Sender<Envelope>,
    },
    Event {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
}

/// Handle that connections and the REST layer keep.
#[derive(Clone)]
pub struct CoordinatorHandle {
    cmd_tx: mpsc::UnboundedSender<CoordinatorMsg>,
}

impl CoordinatorHandle {
    pub fn connect(&self, connection_id: ConnectionId, tx: mpsc::Sender<Envelope>) {
        self.send(CoordinatorMsg::Connect { connection_id, tx });
    }

    pub fn event(&self, connection_id: ConnectionId, event: ClientEvent) {
        self.send(CoordinatorMsg::Event {
            connection_id,
            event,
        });
    }

    pub fn disconnect(&self, connection_id: ConnectionId) {
        self.send(CoordinatorMsg::Disconnect { connection_id });
    }

    fn send(&self, msg: CoordinatorMsg) {
        if self.cmd_tx.send(msg).is_err() {
            warn!("coordinator event stream is closed");
        }
    }
}

/// The mutable half of the coordinator: registry, per-connection links and
/// the event dispatcher. Kept separate from the actor shell so tests can
/// drive it without a transport or a spawned task.
pub struct CoordinatorState {
    registry: Arc<RoomRegistry>,
    links: HashMap<ConnectionId, mpsc::Sender<Envelope>>,
    recording_flush_bytes: usize,
}

impl CoordinatorState {
    pub fn new(registry: Arc<RoomRegistry>, recording_flush_bytes: usize) -> Self {
        Self {
            registry,
            links: HashMap::new(),
            recording_flush_bytes,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Register the outbound link for a new physical connection.
    pub fn connect(&mut self, connection_id: ConnectionId, tx: mpsc::Sender<Envelope>) {
        self.links.insert(connection_id, tx);
        counter!(WS_CONNECTIONS).increment(1);
        gauge!(WS_ACTIVE).increment(1.0);
    }

    /// Dispatch one inbound event to its handler by kind.
    pub fn handle_event(&mut self, sender: ConnectionId, event: ClientEvent) -> Dispatched {
        counter!(EVENTS_DISPATCHED, "kind" => event.kind()).increment(1);

        match event {
            ClientEvent::JoinClass {
                room_id,
                user_id,
                user_name,
                user_role,
            } => self.join_class(sender, room_id, user_id, user_name, user_role),
            ClientEvent::LeaveClass { room_id, .. } => self.remove_participant(&room_id, sender),
            ClientEvent::WebrtcOffer {
                room_id,
                target_connection_id,
                offer,
            } => relay::relay(
                &self.registry,
                sender,
                room_id.as_ref(),
                target_connection_id,
                ServerEvent::WebrtcOffer {
                    offer,
                    from_connection_id: sender,
                },
            ),
            ClientEvent::WebrtcAnswer {
                room_id,
                target_connection_id,
                answer,
            } => relay::relay(
                &self.registry,
                sender,
                room_id.as_ref(),
                target_connection_id,
                ServerEvent::WebrtcAnswer {
                    answer,
                    from_connection_id: sender,
                },
            ),
            ClientEvent::WebrtcIceCandidate {
                room_id,
                target_connection_id,
                candidate,
            } => relay::relay(
                &self.registry,
                sender,
                room_id.as_ref(),
                target_connection_id,
                ServerEvent::WebrtcIceCandidate {
                    candidate,
                    from_connection_id: sender,
                },
            ),
            ClientEvent::BandwidthUpdate {
                room_id,
                bandwidth,
                connection_quality,
            } => self.bandwidth_update(sender, &room_id, bandwidth, connection_quality),
            ClientEvent::ToggleMedia {
                room_id,
                media_type,
                enabled,
            } => self.toggle_media(sender, &room_id, media_type, enabled),
            ClientEvent::ChangeSlide {
                room_id,
                slide_url,
                slide_index,
            } => control::change_slide(&self.registry, sender, &room_id, slide_url, slide_index),
            ClientEvent::StartScreenShare { room_id } => {
                control::start_screen_share(&self.registry, sender, &room_id)
            },
            ClientEvent::StopScreenShare { room_id } => {
                control::stop_screen_share(&self.registry, sender, &room_id)
            },
            ClientEvent::ChatMessage {
                room_id,
                message,
                user_name,
                user_id,
            } => self.chat_message(&room_id, message, user_name, user_id),
            ClientEvent::RaiseHand {
                room_id, raised, ..
            } => self.raise_hand(sender, &room_id, raised),
            ClientEvent::StartPoll { room_id, poll } => {
                control::start_poll(&self.registry, sender, &room_id, poll)
            },
            ClientEvent::SubmitPollResponse {
                room_id,
                poll_id,
                response,
                user_id,
                user_name,
            } => self.submit_poll_response(&room_id, poll_id, response, user_id, user_name),
            ClientEvent::EndPoll {
                room_id,
                poll_id,
                results,
            } => control::end_poll(&self.registry, sender, &room_id, poll_id, results),
            ClientEvent::StartRecording {
                room_id,
                initiated_by,
            } => control::start_recording(&self.registry, sender, &room_id, initiated_by),
            ClientEvent::RecordingChunk { room_id, chunk } => control::recording_chunk(
                &self.registry,
                &room_id,
                chunk,
                self.recording_flush_bytes,
            ),
            ClientEvent::StopRecording {
                room_id,
                initiated_by,
            } => control::stop_recording(&self.registry, sender, &room_id, initiated_by),
            ClientEvent::MuteAll { room_id } => control::mute_all(&self.registry, sender, &room_id),
            ClientEvent::MuteStudent {
                room_id,
                student_connection_id,
            } => control::mute_student(&self.registry, sender, &room_id, student_connection_id),
            ClientEvent::RemoveStudent {
                room_id,
                student_connection_id,
            } => control::remove_student(&self.registry, sender, &room_id, student_connection_id),
            ClientEvent::EndClass { room_id } => {
                control::end_class(&self.registry, sender, &room_id)
            },
        }
    }

    /// Disconnect is the only cancellation signal: same-tick removal from
    /// every room the connection had joined, then the link is dropped.
    pub fn handle_disconnect(&mut self, connection_id: ConnectionId) -> Dispatched {
        if self.links.remove(&connection_id).is_some() {
            gauge!(WS_ACTIVE).decrement(1.0);
        }

        let mut dispatched = Dispatched::none();
        for room_id in self.registry.rooms_of_connection(connection_id) {
            let removal = self.remove_participant(&room_id, connection_id);
            dispatched.outbound.extend(removal.outbound);
            dispatched.persist.extend(removal.persist);
        }
        dispatched
    }

    /// Stamp and fan out every resolved frame.
    pub fn deliver(&self, outbound: &[Outbound]) {
        for out in outbound {
            outbound::deliver(&self.links, out);
        }
    }

    fn join_class(
        &mut self,
        sender: ConnectionId,
        room_id: RoomId,
        user_id: String,
        user_name: String,
        user_role: Role,
    ) -> Dispatched {
        let now = Utc::now();
        let participant = Participant {
            connection_id: sender,
            user_id: user_id.clone(),
            user_name: user_name.clone(),
            user_role,
            joined_at: now,
            audio_enabled: true,
            video_enabled: false,
            hand_raised: false,
            bandwidth: "medium".to_string(),
            connection_quality: "good".to_string(),
        };

        let created = !self.registry.is_active(&room_id);
        let mut room = self.registry.get_or_create(&room_id);
        room.add(participant.clone());

        let snapshot = ServerEvent::RoomState {
            participants: room.roster(),
            current_slide: room.current_slide().cloned(),
            instructor: room.instructor().cloned(),
            is_recording: room.is_recording(),
        };
        let others = room.connections_except(sender);
        let total = room.len();
        drop(room);

        info!(%room_id, %user_name, role = ?user_role, "participant joined");

        let mut dispatched = Dispatched::send(vec![
            Outbound::to_all(
                others,
                ServerEvent::UserJoined {
                    participant,
                    total_participants: total,
                },
            ),
            Outbound::single(sender, snapshot),
        ]);

        if created {
            dispatched = dispatched.with_persist(PersistOp::MarkLive {
                room_id: room_id.clone(),
                at: now,
            });
        }

        dispatched.with_persist(PersistOp::ParticipantJoined {
            room_id,
            user_id,
            name: user_name,
            role: user_role,
            at: now,
        })
    }

    /// Shared removal path for leave-class and disconnect: detach, notify
    /// the rest, persist the departure, delete the room when it empties.
    fn remove_participant(&mut self, room_id: &RoomId, sender: ConnectionId) -> Dispatched {
        let Some(mut room) = self.registry.get_mut(room_id) else {
            return Dispatched::none();
        };
        let Some(removed) = room.remove_by_connection(sender) else {
            return Dispatched::none();
        };

        let remaining = room.connections();
        let total = room.len();
        let emptied = room.is_empty();
        drop(room);

        if emptied {
            self.registry.remove_if_empty(room_id);
        }

        info!(%room_id, user_name = %removed.user_name, "participant left");

        Dispatched::send(vec![Outbound::to_all(
            remaining,
            ServerEvent::UserLeft {
                user_id: removed.user_id.clone(),
                user_name: removed.user_name.clone(),
                total_participants: total,
            },
        )])
        .with_persist(PersistOp::ParticipantLeft {
            room_id: room_id.clone(),
            user_id: removed.user_id,
            at: Utc::now(),
        })
    }

    fn bandwidth_update(
        &mut self,
        sender: ConnectionId,
        room_id: &RoomId,
        bandwidth: String,
        connection_quality: String,
    ) -> Dispatched {
        let Some(mut room) = self.registry.get_mut(room_id) else {
            return Dispatched::none();
        };
        let Some(participant) = room.find_mut(sender) else {
            return Dispatched::none();
        };

        participant.bandwidth = bandwidth.clone();
        participant.connection_quality = connection_quality.clone();
        let user_id = participant.user_id.clone();
        let user_name = participant.user_name.clone();

        room.record_bandwidth(
            sender,
            BandwidthSample {
                bandwidth: bandwidth.clone(),
                connection_quality: connection_quality.clone(),
            },
        );
        let instructor = room.instructor_connection();
        drop(room);

        // advisory data goes to the instructor only; without one it is lost
        match instructor {
            Some(instructor) => Dispatched::send(vec![Outbound::single(
                instructor,
                ServerEvent::ParticipantBandwidthUpdate {
                    user_id,
                    user_name,
                    bandwidth,
                    connection_quality,
                },
            )]),
            None => Dispatched::none(),
        }
    }

    fn toggle_media(
        &mut self,
        sender: ConnectionId,
        room_id: &RoomId,
        media_type: MediaType,
        enabled: bool,
    ) -> Dispatched {
        let Some(mut room) = self.registry.get_mut(room_id) else {
            return Dispatched::none();
        };
        let Some(participant) = room.find_mut(sender) else {
            return Dispatched::none();
        };

        match media_type {
            MediaType::Audio => participant.audio_enabled = enabled,
            MediaType::Video => participant.video_enabled = enabled,
        }
        let user_id = participant.user_id.clone();
        let user_name = participant.user_name.clone();
        let recipients = room.connections();
        drop(room);

        Dispatched::send(vec![Outbound::to_all(
            recipients,
            ServerEvent::ParticipantMediaChanged {
                user_id,
                user_name,
                media_type,
                enabled,
            },
        )])
    }

    fn chat_message(
        &mut self,
        room_id: &RoomId,
        message: String,
        user_name: String,
        user_id: String,
    ) -> Dispatched {
        let Some(room) = self.registry.get(room_id) else {
            return Dispatched::none();
        };
        // inclusive: the sender sees its own echo, keeping chat history
        // consistent for everyone
        let recipients = room.connections();
        drop(room);

        Dispatched::send(vec![Outbound::to_all(
            recipients,
            ServerEvent::ChatMessage {
                message,
                user_name,
                user_id,
            },
        )])
    }

    fn raise_hand(&mut self, sender: ConnectionId, room_id: &RoomId, raised: bool) -> Dispatched {
        let Some(mut room) = self.registry.get_mut(room_id) else {
            return Dispatched::none();
        };
        let Some(participant) = room.find_mut(sender) else {
            return Dispatched::none();
        };

        participant.hand_raised = raised;
        let user_id = participant.user_id.clone();
        let user_name = participant.user_name.clone();
        let recipients = room.connections_except(sender);
        drop(room);

        Dispatched::send(vec![Outbound::to_all(
            recipients,
            ServerEvent::HandRaised {
                user_id,
                user_name,
                raised,
            },
        )])
    }

    fn submit_poll_response(
        &mut self,
        room_id: &RoomId,
        poll_id: String,
        response: serde_json::Value,
        user_id: String,
        user_name: String,
    ) -> Dispatched {
        let Some(room) = self.registry.get(room_id) else {
            return Dispatched::none();
        };
        let Some(instructor) = room.instructor_connection() else {
            return Dispatched::none();
        };
        drop(room);

        Dispatched::send(vec![Outbound::single(
            instructor,
            ServerEvent::PollResponse {
                poll_id,
                response,
                user_id,
                user_name,
            },
        )])
    }
}

/// The actor shell: owns the state and the store, drains the command queue.
pub struct Coordinator {
    state: CoordinatorState,
    store: Arc<dyn SessionStore>,
}

impl Coordinator {
    pub fn new(state: CoordinatorState, store: Arc<dyn SessionStore>) -> Self {
        Self { state, store }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoordinatorMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                CoordinatorMsg::Connect { connection_id, tx } => {
                    self.state.connect(connection_id, tx);
                },
                CoordinatorMsg::Event {
                    connection_id,
                    event,
                } => {
                    let dispatched = self.state.handle_event(connection_id, event);
                    self.finish(dispatched);
                },
                CoordinatorMsg::Disconnect { connection_id } => {
                    let dispatched = self.state.handle_disconnect(connection_id);
                    self.finish(dispatched);
                },
            }
        }
    }

    fn finish(&self, dispatched: Dispatched) {
        self.state.deliver(&dispatched.outbound);

        for op in dispatched.persist {
            let store = self.store.clone();
            let room_id = op.room_id().to_string();
            tokio::spawn(async move {
                if let Err(err) = store.apply(op).await {
                    warn!(%room_id, %err, "session store update failed");
                    counter!(PERSIST_FAILURES).increment(1);
                }
            });
        }
    }
}

/// Spawn the coordinator actor and return its handle.
pub fn spawn_coordinator(
    registry: Arc<RoomRegistry>,
    store: Arc<dyn SessionStore>,
    recording_flush_bytes: usize,
) -> CoordinatorHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let actor = Coordinator::new(
        CoordinatorState::new(registry, recording_flush_bytes),
        store,
    );

    tokio::spawn(actor.run(cmd_rx));

    CoordinatorHandle { cmd_tx }
}
