//! Request/response header codec.
//!
//! Out of scope per spec §1 ("header codec" is an external collaborator),
//! but a concrete default is needed to make the crate independently
//! testable. [`BinHeaderCodec`] is a small, fixed-size, checksummed binary
//! encoding; anything satisfying [`HeaderCodec`] can be substituted.

use crate::bulk::BulkHandle;
use crate::error::RpcError;

/// Fields carried at the front of every request buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestHeader {
    /// RPC id (registry key), looked up on the target.
    pub id: u32,
    /// Nonce echoed back verbatim in the matching response header.
    pub cookie: u32,
    /// Opaque bulk handle, forwarded to the target untouched.
    pub bulk: Option<BulkHandle>,
}

impl RequestHeader {
    pub fn new(id: u32, bulk: Option<BulkHandle>) -> Self {
        Self {
            id,
            cookie: 0,
            bulk,
        }
    }
}

/// Fields carried at the front of every response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseHeader {
    /// Echo of the request's cookie, used to match a response to its
    /// request on a single-shot exchange.
    pub cookie: u32,
}

/// Encode/decode/verify for request and response headers.
///
/// Implementors reserve a fixed number of bytes at the start of the handle's
/// input/output buffers; [`Handle::input_buf`](crate::handle::Handle::input_buf)
/// and [`Handle::output_buf`](crate::handle::Handle::output_buf) return views
/// offset past that reservation.
pub trait HeaderCodec: Send + Sync {
    fn request_size(&self) -> usize;
    fn response_size(&self) -> usize;

    fn encode_request(&self, buf: &mut [u8], header: &RequestHeader) -> crate::error::Result<()>;
    fn decode_request(&self, buf: &[u8]) -> crate::error::Result<RequestHeader>;
    fn verify_request(&self, header: &RequestHeader) -> crate::error::Result<()>;

    fn encode_response(&self, buf: &mut [u8], header: &ResponseHeader) -> crate::error::Result<()>;
    fn decode_response(&self, buf: &[u8]) -> crate::error::Result<ResponseHeader>;
    fn verify_response(&self, header: &ResponseHeader) -> crate::error::Result<()>;
}

/// Magic byte identifying this codec's wire format, to reject
/// cross-version or garbage headers in `verify`.
const MAGIC: u8 = 0xB5;

/// `BinHeaderCodec`'s fixed request header layout:
/// `[magic:1][checksum:1][id:4][cookie:4][has_bulk:1][bulk:8]` = 19 bytes.
const REQUEST_HEADER_SIZE: usize = 19;
/// `[magic:1][checksum:1][cookie:4]` = 6 bytes.
const RESPONSE_HEADER_SIZE: usize = 6;

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// A small, dependency-free binary header codec: fixed-size fields, a magic
/// byte, and a wrapping additive checksum over the fields that follow it.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinHeaderCodec;

impl HeaderCodec for BinHeaderCodec {
    fn request_size(&self) -> usize {
        REQUEST_HEADER_SIZE
    }

    fn response_size(&self) -> usize {
        RESPONSE_HEADER_SIZE
    }

    fn encode_request(&self, buf: &mut [u8], header: &RequestHeader) -> crate::error::Result<()> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return Err(RpcError::SizeError);
        }
        buf[2..6].copy_from_slice(&header.id.to_le_bytes());
        buf[6..10].copy_from_slice(&header.cookie.to_le_bytes());
        match header.bulk {
            Some(bulk) => {
                buf[10] = 1;
                buf[11..19].copy_from_slice(&bulk.0.to_le_bytes());
            }
            None => {
                buf[10] = 0;
                buf[11..19].fill(0);
            }
        }
        buf[1] = checksum(&buf[2..19]);
        buf[0] = MAGIC;
        Ok(())
    }

    fn decode_request(&self, buf: &[u8]) -> crate::error::Result<RequestHeader> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return Err(RpcError::SizeError);
        }
        if buf[0] != MAGIC {
            return Err(RpcError::ProtocolError("bad request header magic"));
        }
        if buf[1] != checksum(&buf[2..19]) {
            return Err(RpcError::ChecksumError);
        }
        let id = u32::from_le_bytes(buf[2..6].try_into().unwrap());
        let cookie = u32::from_le_bytes(buf[6..10].try_into().unwrap());
        let bulk = if buf[10] != 0 {
            Some(BulkHandle(u64::from_le_bytes(buf[11..19].try_into().unwrap())))
        } else {
            None
        };
        Ok(RequestHeader { id, cookie, bulk })
    }

    fn verify_request(&self, header: &RequestHeader) -> crate::error::Result<()> {
        if header.id == 0 {
            return Err(RpcError::ProtocolError("request header carries id 0"));
        }
        Ok(())
    }

    fn encode_response(&self, buf: &mut [u8], header: &ResponseHeader) -> crate::error::Result<()> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return Err(RpcError::SizeError);
        }
        buf[2..6].copy_from_slice(&header.cookie.to_le_bytes());
        buf[1] = checksum(&buf[2..6]);
        buf[0] = MAGIC;
        Ok(())
    }

    fn decode_response(&self, buf: &[u8]) -> crate::error::Result<ResponseHeader> {
        if buf.len() < RESPONSE_HEADER_SIZE {
            return Err(RpcError::SizeError);
        }
        if buf[0] != MAGIC {
            return Err(RpcError::ProtocolError("bad response header magic"));
        }
        if buf[1] != checksum(&buf[2..6]) {
            return Err(RpcError::ChecksumError);
        }
        let cookie = u32::from_le_bytes(buf[2..6].try_into().unwrap());
        Ok(ResponseHeader { cookie })
    }

    fn verify_response(&self, _header: &ResponseHeader) -> crate::error::Result<()> {
        Ok(())
    }
}
