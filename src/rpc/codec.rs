//! JSON message codec for tonic.
//!
//! tonic owns the length-prefixed framing, compression flags and size
//! limits; this codec only turns one frame payload into a JSON value and
//! back.

use bytes::{Buf, BufMut};
use serde_json::Value;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

/// Largest message accepted from the backend (4 MiB, gRPC default).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Content type announced on every call.
pub const CONTENT_TYPE: &str = "application/grpc+json";

/// Messages are `serde_json::Value` in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Encode = Value;
    type Decode = Value;
    type Encoder = JsonEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    type Item = Value;
    type Error = Status;

    fn encode(&mut self, item: Value, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        let payload = serde_json::to_vec(&item)
            .map_err(|e| Status::internal(format!("failed to encode request message: {e}")))?;
        dst.put_slice(&payload);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    type Item = Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Value>, Status> {
        let payload = src.copy_to_bytes(src.remaining());
        serde_json::from_slice(&payload)
            .map(Some)
            .map_err(|e| Status::internal(format!("failed to decode response message: {e}")))
    }
}
