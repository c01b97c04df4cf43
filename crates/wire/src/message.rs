use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire envelope for everything that travels between tiers.
///
/// The payload is MessagePack so task bodies stay compact on the hop-heavy
/// paths (a task can cross three tiers before it runs). `topic` names the
/// service being addressed (e.g. "kosmos.service.node"); `correlation_id`
/// matches replies to the request that caused them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Service topic this message is addressed to.
    pub topic: String,

    /// MessagePack-encoded payload bytes.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,

    /// When this message was created.
    pub timestamp: DateTime<Utc>,

    /// Matches a reply to its request.
    pub correlation_id: Uuid,

    /// Schema version, checked before decoding the payload.
    #[serde(default = "default_version")]
    pub version: u16,
}

/// Version assumed for envelopes that omit the field.
fn default_version() -> u16 {
    1
}

impl Message {
    /// Wrap a payload in a fresh envelope with a new correlation id.
    pub fn new<T: Serialize>(
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic: topic.into(),
            payload: rmp_serde::to_vec(payload)?,
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            version: 1,
        })
    }

    /// Wrap a payload as the reply to `request`, echoing its topic and
    /// correlation id so the requester can match it.
    pub fn reply<T: Serialize>(
        request: &Message,
        payload: &T,
    ) -> Result<Self, rmp_serde::encode::Error> {
        Ok(Self {
            topic: request.topic.clone(),
            payload: rmp_serde::to_vec(payload)?,
            timestamp: Utc::now(),
            correlation_id: request.correlation_id,
            version: 1,
        })
    }

    /// Decode the payload into the expected type.
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, rmp_serde::decode::Error> {
        rmp_serde::from_slice(&self.payload)
    }

    /// Serialize the whole envelope to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize an envelope from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Serde helper so `Vec<u8>` is written as raw MessagePack bytes rather
/// than a sequence of integers.
mod serde_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let bytes: &[u8] = Deserialize::deserialize(d)?;
        Ok(bytes.to_vec())
    }
}
