//! Wire-level payload layout (spec §6.3): the byte framing a real broker
//! would exchange over the network or persist verbatim in the log. Encoding
//! is `checksum:u32 | metadata_len:u32 | metadata | payload`, with
//! `metadata` itself MessagePack-encoded so it can evolve without a framing
//! version bump.

use crate::error::DispatchError;
use crate::model::MessageMetadata;

/// Encode one message's metadata and payload into the on-wire byte layout.
/// The checksum covers `payload` only, matching what a producer computes
/// and a consumer re-verifies (spec §4.2).
pub fn encode(metadata: &MessageMetadata, payload: &[u8]) -> Result<Vec<u8>, DispatchError> {
    let metadata_bytes = rmp_serde::to_vec(metadata).map_err(|e| DispatchError::Codec(e.to_string()))?;
    let checksum = crc32c::crc32c(payload);

    let mut out = Vec::with_capacity(4 + 4 + metadata_bytes.len() + payload.len());
    out.extend_from_slice(&checksum.to_be_bytes());
    out.extend_from_slice(&(metadata_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&metadata_bytes);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Decode one wire-framed message, verifying its checksum. A framing or
/// checksum failure is treated as a poison entry by the compactor and
/// replicator (spec §4.6, §4.7): non-retriable, to be skipped or deleted
/// rather than retried.
pub fn decode(bytes: &[u8]) -> Result<(MessageMetadata, Vec<u8>), DispatchError> {
    if bytes.len() < 8 {
        return Err(DispatchError::Codec("frame shorter than the fixed header".into()));
    }
    let checksum = u32::from_be_bytes(bytes[0..4].try_into().unwrap());
    let metadata_len = u32::from_be_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let metadata_start = 8;
    let payload_start = metadata_start + metadata_len;
    if bytes.len() < payload_start {
        return Err(DispatchError::Codec("metadata_len overruns the frame".into()));
    }

    let metadata: MessageMetadata =
        rmp_serde::from_slice(&bytes[metadata_start..payload_start]).map_err(|e| DispatchError::Codec(e.to_string()))?;
    let payload = bytes[payload_start..].to_vec();

    if crc32c::crc32c(&payload) != checksum {
        return Err(DispatchError::ChecksumError { producer: metadata.producer_name.clone(), seq_id: metadata.sequence_id });
    }
    Ok((metadata, payload))
}
