//! Protobuf messages exchanged between fleet nodes.
//!
//! Declared with prost derives instead of generated from .proto files; the fleet
//! only has one message type and its schema is kept here.

/// Frame carried by every fabric transport.
#[derive(Clone, PartialEq, prost::Message)]
pub struct FleetEnvelope {
    /// Node id of the publisher.
    #[prost(string, tag = "1")]
    pub origin: String,
    /// Per-origin publish counter, starting at 1.
    #[prost(uint64, tag = "2")]
    pub sequence: u64,
    /// Publish time, unix milliseconds.
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    /// JSON-encoded fleet event.
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
}
