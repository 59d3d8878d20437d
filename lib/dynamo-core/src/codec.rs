//! Wire codec for lifecycle events
//!
//! Events travel as MessagePack maps with named fields. The model types are
//! converted through private wire structs so that the event kind stays a
//! plain integer code on the wire and unknown codes are rejected explicitly.

use crate::backend::Backend;
use crate::error::{DecodeError, EncodeError};
use crate::event::{EventKind, Lifecycle, LifecycleEvent};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct WireEvent {
    kind: u8,
    emitted_at: i64,
    backend: Option<WireBackend>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireBackend {
    name: String,
    host: String,
    port: u16,
    groups: Vec<String>,
    last_seen: i64,
    current_players: u32,
    max_players: u32,
}

impl From<&Backend> for WireBackend {
    fn from(backend: &Backend) -> Self {
        Self {
            name: backend.name.clone(),
            host: backend.host.clone(),
            port: backend.port,
            groups: backend.groups.iter().cloned().collect(),
            last_seen: backend.last_seen,
            current_players: backend.current_players,
            max_players: backend.max_players,
        }
    }
}

impl From<WireBackend> for Backend {
    fn from(wire: WireBackend) -> Self {
        Self {
            name: wire.name,
            host: wire.host,
            port: wire.port,
            groups: wire.groups.into_iter().collect(),
            last_seen: wire.last_seen,
            current_players: wire.current_players,
            max_players: wire.max_players,
        }
    }
}

impl WireBackend {
    // Unregister carries only the key
    fn key_only(name: &str) -> Self {
        Self {
            name: name.to_string(),
            host: String::new(),
            port: 0,
            groups: Vec::new(),
            last_seen: 0,
            current_players: 0,
            max_players: 0,
        }
    }
}

/// Serialize an event for publishing
pub fn encode(event: &LifecycleEvent) -> Result<Vec<u8>, EncodeError> {
    let backend = match &event.action {
        Lifecycle::Unregister(name) => WireBackend::key_only(name),
        Lifecycle::Register(backend)
        | Lifecycle::Heartbeat(backend)
        | Lifecycle::OccupancyIncrease(backend)
        | Lifecycle::OccupancyDecrease(backend) => WireBackend::from(backend),
    };
    let wire = WireEvent {
        kind: event.kind().code(),
        emitted_at: event.emitted_at,
        backend: Some(backend),
    };
    Ok(rmp_serde::to_vec_named(&wire)?)
}

/// Parse a received payload. Never panics on hostile input.
pub fn decode(bytes: &[u8]) -> Result<LifecycleEvent, DecodeError> {
    let wire: WireEvent = rmp_serde::from_slice(bytes)?;
    let kind = EventKind::from_code(wire.kind).ok_or(DecodeError::UnknownKind(wire.kind))?;
    let backend = wire.backend.ok_or(DecodeError::MissingBackend(kind))?;

    let action = match kind {
        EventKind::Register => Lifecycle::Register(backend.into()),
        EventKind::Heartbeat => Lifecycle::Heartbeat(backend.into()),
        EventKind::Unregister => Lifecycle::Unregister(backend.name),
        EventKind::OccupancyIncrease => Lifecycle::OccupancyIncrease(backend.into()),
        EventKind::OccupancyDecrease => Lifecycle::OccupancyDecrease(backend.into()),
    };

    Ok(LifecycleEvent {
        emitted_at: wire.emitted_at,
        action,
    })
}
