//! Relay envelope decoding.
//!
//! Turns one JSON envelope from the upstream relay into zero or more
//! ingestion events. Transport and compression are the listener's concern;
//! this module only sees the decoded JSON text.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Coords, IngestEvent, SystemAddress, SystemPatch};

/// Schemas whose messages describe star systems.
pub const SYSTEM_SCHEMAS: &[&str] = &[
    "https://eddn.edcd.io/schemas/journal/1",
    "https://eddn.edcd.io/schemas/fssallbodiesfound/1",
    "https://eddn.edcd.io/schemas/navroute/1",
    "https://eddn.edcd.io/schemas/approachsettlement/1",
    "https://eddn.edcd.io/schemas/codexentry/1",
    "https://eddn.edcd.io/schemas/fssbodysignals/1",
    "https://eddn.edcd.io/schemas/fssdiscoveryscan/1",
    "https://eddn.edcd.io/schemas/fsssignaldiscovered/1",
    "https://eddn.edcd.io/schemas/navbeaconscan/1",
    "https://eddn.edcd.io/schemas/scanbarycentre/1",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("envelope is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("envelope has neither message.timestamp nor header.gatewayTimestamp")]
    MissingTimestamp,

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "$schemaRef", default)]
    schema_ref: String,
    #[serde(default)]
    header: Header,
    #[serde(default)]
    message: Value,
}

#[derive(Debug, Default, Deserialize)]
struct Header {
    #[serde(rename = "gatewayTimestamp", default)]
    gateway_timestamp: Option<String>,
}

/// Classification of one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// System observations to hand to the arbiter.
    Systems(Vec<IngestEvent>),
    /// A schema this planner does not track.
    Ignored { schema: String },
}

/// Decode a single envelope.
pub fn decode_envelope(raw: &str) -> Result<FeedMessage, FeedError> {
    let envelope: Envelope =
        serde_json::from_str(raw).map_err(|err| FeedError::InvalidJson(err.to_string()))?;

    if !SYSTEM_SCHEMAS.contains(&envelope.schema_ref.as_str()) {
        return Ok(FeedMessage::Ignored {
            schema: envelope.schema_ref,
        });
    }

    let timestamp = message_timestamp(&envelope)?;
    let mut events = Vec::new();
    collect_events(&envelope.message, timestamp, &mut events);
    Ok(FeedMessage::Systems(events))
}

/// Prefer the observer's own timestamp; fall back to the gateway's.
fn message_timestamp(envelope: &Envelope) -> Result<DateTime<Utc>, FeedError> {
    let raw = envelope
        .message
        .get("timestamp")
        .and_then(Value::as_str)
        .or(envelope.header.gateway_timestamp.as_deref())
        .ok_or(FeedError::MissingTimestamp)?;
    parse_timestamp(raw)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, FeedError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| FeedError::InvalidTimestamp(raw.to_string()))
}

fn collect_events(body: &Value, timestamp: DateTime<Utc>, out: &mut Vec<IngestEvent>) {
    // NavRoute carries a list of systems instead of a single one.
    if let Some(route) = body.get("Route").and_then(Value::as_array) {
        for item in route {
            if item.get("SystemAddress").is_some() {
                collect_events(item, timestamp, out);
            }
        }
        return;
    }

    let name = body
        .get("StarSystem")
        .or_else(|| body.get("System"))
        .and_then(Value::as_str)
        .map(str::to_string);

    out.push(IngestEvent {
        address: parse_address(body.get("SystemAddress")),
        timestamp,
        patch: SystemPatch {
            name,
            coords: parse_star_pos(body.get("StarPos")),
            requires_permit: None,
            sells_tritium: None,
        },
    });
}

fn parse_address(value: Option<&Value>) -> Option<SystemAddress> {
    match value? {
        Value::Number(n) => n.as_u64().filter(|address| *address != 0),
        _ => None,
    }
}

/// `StarPos` must be exactly three numbers; anything else leaves the
/// position untouched. Non-finite values are passed through so the arbiter
/// can reject the event as malformed.
fn parse_star_pos(value: Option<&Value>) -> Option<Coords> {
    let items = value?.as_array()?;
    if items.len() != 3 {
        return None;
    }
    let x = items[0].as_f64()?;
    let y = items[1].as_f64()?;
    let z = items[2].as_f64()?;
    Some(Coords::new(x, y, z))
}
