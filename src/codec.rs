//! Conversion between prost messages and the byte messages carried by a call.

use bytes::Bytes;
use prost::Message;

use crate::call::CallError;
use crate::error::RpcError;

pub fn encode<M: Message>(message: &M) -> Bytes {
    Bytes::from(message.encode_to_vec())
}

pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M, RpcError> {
    Ok(M::decode(bytes)?)
}

/// Decode a request at the handler boundary, where malformed input fails the call.
pub(crate) fn decode_request<M: Message + Default>(bytes: &[u8]) -> Result<M, CallError> {
    M::decode(bytes).map_err(|err| CallError::internal(format!("failed to decode request: {err}")))
}
