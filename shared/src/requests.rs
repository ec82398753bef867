//! Fixed-layout request records.
//!
//! The structs mirror the `#[repr(C)]` layout the driver reads, but they are
//! never reinterpreted as bytes: `Wire::encode` places each field at its
//! offset and zeroes the padding, so nothing uninitialised crosses over.

use core::mem::size_of;

/// A record with a fixed byte layout on the wire.
pub trait Wire: Sized {
    /// Exact encoded length.
    const LEN: usize;

    /// Write `self` into `out[..Self::LEN]`.
    ///
    /// # Panics
    /// If `out` is shorter than `Self::LEN`.
    fn encode(&self, out: &mut [u8]);

    /// Inverse of [`Wire::encode`]. `None` when `raw.len() != Self::LEN`.
    fn decode(raw: &[u8]) -> Option<Self>;
}

#[inline]
fn put_u64(out: &mut [u8], at: usize, v: u64) {
    out[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn put_i32(out: &mut [u8], at: usize, v: i32) {
    out[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

#[inline]
fn get_u64(raw: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&raw[at..at + 8]);
    u64::from_le_bytes(b)
}

#[inline]
fn get_i32(raw: &[u8], at: usize) -> i32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&raw[at..at + 4]);
    i32::from_le_bytes(b)
}

/// Read `size` bytes at `address` of `process_id` into the buffer living at
/// `response` in the caller's address space.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadRequest {
    pub process_id: u64,
    pub address: u64,
    pub response: u64,
    pub size: i32,
}

impl Wire for ReadRequest {
    const LEN: usize = 32;

    fn encode(&self, out: &mut [u8]) {
        let out = &mut out[..Self::LEN];
        out.fill(0);
        put_u64(out, 0, self.process_id);
        put_u64(out, 8, self.address);
        put_u64(out, 16, self.response);
        put_i32(out, 24, self.size);
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        (raw.len() == Self::LEN).then(|| Self {
            process_id: get_u64(raw, 0),
            address: get_u64(raw, 8),
            response: get_u64(raw, 16),
            size: get_i32(raw, 24),
        })
    }
}

/// Copy `size` bytes from the caller's buffer at `source` to `address` of
/// `process_id`. `auxiliary` is passed through untouched (zero today).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteRequest {
    pub process_id: u64,
    pub address: u64,
    pub source: u64,
    pub size: i32,
    pub auxiliary: u64,
}

impl Wire for WriteRequest {
    const LEN: usize = 40;

    fn encode(&self, out: &mut [u8]) {
        let out = &mut out[..Self::LEN];
        out.fill(0);
        put_u64(out, 0, self.process_id);
        put_u64(out, 8, self.address);
        put_u64(out, 16, self.source);
        put_i32(out, 24, self.size);
        put_u64(out, 32, self.auxiliary);
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        (raw.len() == Self::LEN).then(|| Self {
            process_id: get_u64(raw, 0),
            address: get_u64(raw, 8),
            source: get_u64(raw, 16),
            size: get_i32(raw, 24),
            auxiliary: get_u64(raw, 32),
        })
    }
}

/// `GET_BASE` shares the read layout: no address, 8-byte response.
pub type BaseRequest = ReadRequest;

impl ReadRequest {
    /// Request for the main image base of `process_id`.
    pub const fn base_of(process_id: u64, response: u64) -> Self {
        Self {
            process_id,
            address: 0,
            response,
            size: crate::constants::BASE_RESPONSE_LEN as i32,
        }
    }
}

/// Base address returned in the output buffer of `GET_BASE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseResponse {
    pub base: u64,
}

impl Wire for BaseResponse {
    const LEN: usize = crate::constants::BASE_RESPONSE_LEN;

    fn encode(&self, out: &mut [u8]) {
        put_u64(out, 0, self.base);
    }

    fn decode(raw: &[u8]) -> Option<Self> {
        (raw.len() == Self::LEN).then(|| Self { base: get_u64(raw, 0) })
    }
}

// The driver reads these as C structs; keep the encoded length in sync.
const _: () = assert!(size_of::<ReadRequest>() == ReadRequest::LEN);
const _: () = assert!(size_of::<WriteRequest>() == WriteRequest::LEN);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_layout() {
        let req = ReadRequest {
            process_id: 0x1122,
            address: 0x0040_0000,
            response: 0xDEAD_BEEF,
            size: 16,
        };
        let mut buf = [0xFFu8; ReadRequest::LEN];
        req.encode(&mut buf);

        assert_eq!(&buf[0..8], &0x1122u64.to_le_bytes());
        assert_eq!(&buf[16..24], &0xDEAD_BEEFu64.to_le_bytes());
        assert_eq!(&buf[24..28], &16i32.to_le_bytes());
        assert_eq!(&buf[28..32], &[0, 0, 0, 0], "padding must be zeroed");
        assert_eq!(ReadRequest::decode(&buf), Some(req));
    }

    #[test]
    fn write_request_keeps_auxiliary_after_padding() {
        let req = WriteRequest {
            process_id: 7,
            address: 0x0050_0000,
            source: 0x1000,
            size: 4,
            auxiliary: 0xAB,
        };
        let mut buf = [0u8; WriteRequest::LEN];
        req.encode(&mut buf);

        assert_eq!(&buf[28..32], &[0, 0, 0, 0]);
        assert_eq!(&buf[32..40], &0xABu64.to_le_bytes());
        assert_eq!(WriteRequest::decode(&buf), Some(req));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(ReadRequest::decode(&[0u8; 31]).is_none());
        assert!(WriteRequest::decode(&[0u8; 32]).is_none());
    }

    #[test]
    fn base_request_asks_for_eight_bytes() {
        let req = BaseRequest::base_of(42, 0x2000);
        assert_eq!(req.size, 8);
        assert_eq!(req.address, 0);
    }

    #[test]
    fn base_response_is_one_le_word() {
        let mut buf = [0u8; BaseResponse::LEN];
        BaseResponse { base: 0x1_4000_0000 }.encode(&mut buf);
        assert_eq!(buf, 0x1_4000_0000u64.to_le_bytes());
        assert_eq!(BaseResponse::decode(&buf[..7]), None);
    }
}
