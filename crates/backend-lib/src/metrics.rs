// ==============
// classroom-backend-lib/src/metrics.rs
// ==============
//! Central place for metric keys
pub const WS_CONNECTIONS: &str = "live.ws.connections";
pub const WS_ACTIVE: &str = "live.ws.active";
pub const ROOMS_ACTIVE: &str = "live.rooms.active";
pub const ROOMS_CREATED: &str = "live.rooms.created";
pub const ROOMS_DELETED: &str = "live.rooms.deleted";
pub const EVENTS_DISPATCHED: &str = "live.events.dispatched";
pub const EVENTS_MALFORMED: &str = "live.events.malformed";
pub const REJECTED_UNAUTHORIZED: &str = "live.rejected.unauthorized";
pub const FANOUT_DELIVERED: &str = "live.fanout.delivered";
pub const FANOUT_DROPPED: &str = "live.fanout.dropped";
pub const PERSIST_FAILURES: &str = "live.persist.failures";
pub const RECORDING_FLUSHES: &str = "live.recording.flushes";
