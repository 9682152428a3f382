//! Decoded wire types consumed and produced by the scheduler core.
//!
//! Framing, compression, and encryption all live in the transport layer.
//! By the time a batch reaches this crate it has been decompressed and
//! decrypted; the header below is the already-parsed fixed-layout header,
//! and [`Response`] is handed back for the transport to encode.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of request carried by a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Ad-bid matching request.
    BidRequest,
    /// Diagnostic echo request.
    EchoRequest,
}

/// Compression codec tag from the wire header.
///
/// The codec itself is applied by the transport layer; the core only
/// carries the tag through so responses can be encoded symmetrically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompressorTag {
    #[default]
    None,
    Zlib,
    Lz4,
}

/// Admission outcome attached to a pooled object and echoed in the
/// response header so the client knows to back off and retry.
///
/// Overload is never an error: a runnable carrying `MaxOfType` or
/// `MaxTotal` was still admitted and stays queued until a slot frees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdmissionStatus {
    /// Within all ceilings.
    #[default]
    None,
    /// Too many live objects of this runnable's kind.
    MaxOfType,
    /// Too many live objects across the whole pool.
    MaxTotal,
}

impl AdmissionStatus {
    /// True when the client should retry later.
    pub fn is_overloaded(&self) -> bool {
        !matches!(self, AdmissionStatus::None)
    }

    /// Label used for metrics and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionStatus::None => "none",
            AdmissionStatus::MaxOfType => "max_of_type",
            AdmissionStatus::MaxTotal => "max_total",
        }
    }
}

/// Decoded fixed-layout request header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestHeader {
    pub message_type: MessageType,
    /// Payload size after decompression.
    pub uncompressed_len: u32,
    /// Payload size on the wire.
    pub compressed_len: u32,
    pub compressor: CompressorTag,
    /// Request per-row diagnostic detail in the response.
    pub diagnostics: bool,
    /// Overload signal slot, filled by the admission pools.
    pub status: AdmissionStatus,
}

impl RequestHeader {
    /// Header for an uncompressed batch of `len` bytes.
    pub fn for_batch(message_type: MessageType, len: usize) -> Self {
        Self {
            message_type,
            uncompressed_len: len as u32,
            compressed_len: len as u32,
            compressor: CompressorTag::None,
            diagnostics: false,
            status: AdmissionStatus::None,
        }
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.compressor == CompressorTag::None
            && self.uncompressed_len != self.compressed_len
        {
            return Err(ProtocolError::SizeMismatch {
                uncompressed: self.uncompressed_len,
                compressed: self.compressed_len,
            });
        }
        Ok(())
    }
}

/// Batch response, one line per request row, index-aligned to the order
/// the rows arrived in regardless of internal processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub lines: Vec<String>,
}

impl Response {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("uncompressed size {uncompressed} != compressed size {compressed} with no compressor")]
    SizeMismatch { uncompressed: u32, compressed: u32 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_for_batch_is_valid() {
        let header = RequestHeader::for_batch(MessageType::BidRequest, 42);
        assert!(header.validate().is_ok());
        assert_eq!(header.uncompressed_len, 42);
        assert!(!header.diagnostics);
    }

    #[test]
    fn uncompressed_size_mismatch_rejected() {
        let mut header = RequestHeader::for_batch(MessageType::EchoRequest, 10);
        header.compressed_len = 7;
        assert!(header.validate().is_err());
    }

    #[test]
    fn admission_status_overload_flags() {
        assert!(!AdmissionStatus::None.is_overloaded());
        assert!(AdmissionStatus::MaxOfType.is_overloaded());
        assert!(AdmissionStatus::MaxTotal.is_overloaded());
    }
}
