//! Wire envelope and read-index codecs
//!
//! The envelope is the only log payload the coordinator owns: a fixed64
//! request id plus opaque payload bytes, encoded with bincode's fixed-width
//! integer layout so the bytes are deterministic across peers. Read-index
//! request contexts and the commit index returned to readers are 8-byte
//! big-endian values.

use serde::{Deserialize, Serialize};

use crate::error::{ReplError, ReplResult};

/// Wrapper giving each proposal a registry-unique id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    pub payload: Vec<u8>,
}

pub fn encode_envelope(envelope: &RequestEnvelope) -> ReplResult<Vec<u8>> {
    bincode::serialize(envelope).map_err(|source| ReplError::Serialization {
        operation: "request envelope",
        source,
    })
}

pub fn decode_envelope(data: &[u8]) -> ReplResult<RequestEnvelope> {
    bincode::deserialize(data).map_err(|source| ReplError::Serialization {
        operation: "request envelope",
        source,
    })
}

/// Encode a read-request id as the engine's read-index request context.
pub fn encode_read_ctx(id: u64) -> Vec<u8> {
    id.to_be_bytes().to_vec()
}

pub fn decode_read_ctx(data: &[u8]) -> ReplResult<u64> {
    decode_be_u64(data, "read-index request context")
}

/// Encode the commit index handed back to a parked reader.
pub fn encode_index(index: u64) -> Vec<u8> {
    index.to_be_bytes().to_vec()
}

pub fn decode_index(data: &[u8]) -> ReplResult<u64> {
    decode_be_u64(data, "read-index commit index")
}

fn decode_be_u64(data: &[u8], what: &str) -> ReplResult<u64> {
    let bytes: [u8; 8] = data.try_into().map_err(|_| ReplError::Internal {
        message: format!("{what}: expected 8 bytes, got {}", data.len()),
    })?;
    Ok(u64::from_be_bytes(bytes))
}
