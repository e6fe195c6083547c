use prost::Message as ProstMessage;

use super::FleetEvent;
use crate::error::FabricError;
use crate::proto::FleetEnvelope;

/// Wrap `event` for publishing.
pub fn encode(origin: &str, sequence: u64, event: &FleetEvent) -> Result<Vec<u8>, FabricError> {
    let envelope = FleetEnvelope {
        origin: origin.to_string(),
        sequence,
        timestamp: chrono::Utc::now().timestamp_millis(),
        payload: serde_json::to_vec(event)?,
    };
    let mut buf = Vec::with_capacity(envelope.encoded_len());
    envelope.encode(&mut buf)?;
    Ok(buf)
}

/// Unwrap a received frame into its envelope header and event.
pub fn decode(frame: &[u8]) -> Result<(FleetEnvelope, FleetEvent), FabricError> {
    let envelope = FleetEnvelope::decode(frame)?;
    let event = serde_json::from_slice(&envelope.payload)?;
    Ok((envelope, event))
}
