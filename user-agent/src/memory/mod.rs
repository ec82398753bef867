//! Typed access to an attached process's memory through the control channel.
//!
//! Key responsibilities:
//! - raw reads and writes with the address guard and pinned transfer buffers
//! - fixed-width values, vectors, matrices and strings on top of them
//! - pointer-chain resolution
//! - masked pattern scans over large regions
//!
//! Guarded operations never reach the component: reads hand back zeroes
//! and writes do nothing. Only a failed write is an error.

pub mod pinned;
pub mod scan;
pub mod value;

use log::Level;
use serde::Serialize;
use shared::{constants, ioctl, is_valid_address, ReadRequest, WriteRequest};
use thiserror::Error;

use crate::channel::{ChannelError, ControlChannel, Device};
use crate::memdrv_log;
use pinned::PinnedBuffer;
pub use scan::{Signature, SignatureError};
pub use value::{Matrix4, RemoteValue, Vec2, Vec3, Vec4};

/// The attached process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Target {
    pub process_id: u64,
    pub base: u64,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("control channel is not connected")]
    NotConnected,

    #[error("write of {size} bytes at {address:#x} failed: {source}")]
    WriteFailed { address: u64, size: usize, #[source] source: ChannelError },

    #[error("base address query failed: {0}")]
    BaseQuery(#[source] ChannelError),

    #[error("process {process_id} not found (base {base:#x})")]
    NoProcess { process_id: u64, base: u64 },

    #[error("transfer of {size} bytes exceeds the request size limit")]
    TooLarge { size: usize },
}

/// Outcome of a raw read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRead {
    /// The component filled the buffer.
    Data(Vec<u8>),
    /// Guard tripped; no request was issued.
    Guarded(Vec<u8>),
    /// The request failed.
    Failed,
}

impl RawRead {
    /// Bytes for both the filled and the guarded case.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            RawRead::Data(b) | RawRead::Guarded(b) => Some(b),
            RawRead::Failed => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Normal,
    /// Bypass page protection on the target side.
    Protected,
}

impl WriteMode {
    fn code(self) -> u32 {
        match self {
            WriteMode::Normal => ioctl::WRITE,
            WriteMode::Protected => ioctl::WRITE_PROTECTED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// One byte per char, ASCII only.
    Narrow,
    /// UTF-16LE.
    Wide,
}

/// Ask the component for a process's base address.
pub(crate) fn query_base<D: Device>(
    channel: &ControlChannel<D>,
    process_id: u64,
) -> Result<u64, MemoryError> {
    if !channel.is_connected() {
        return Err(MemoryError::NotConnected);
    }
    let mut buffer = PinnedBuffer::zeroed(constants::BASE_RESPONSE_LEN);
    let request = ReadRequest::base_of(process_id, buffer.address());
    // SAFETY: `buffer` outlives the call and is only read afterwards.
    unsafe { channel.execute(ioctl::GET_BASE, &request) }.map_err(MemoryError::BaseQuery)?;
    Ok(<u64 as RemoteValue>::from_le(&buffer.into_vec()))
}

/// Borrowing view over a session's channel and attached process.
pub struct RemoteMemory<'a, D: Device> {
    channel: &'a ControlChannel<D>,
    target: Option<Target>,
    scan_block_size: u64,
}

impl<'a, D: Device> RemoteMemory<'a, D> {
    pub fn new(channel: &'a ControlChannel<D>, target: Option<Target>, scan_block_size: u64) -> Self {
        Self { channel, target, scan_block_size }
    }

    pub fn target(&self) -> Option<Target> {
        self.target
    }

    pub fn is_attached(&self) -> bool {
        self.target.is_some()
    }

    /// Attached and the address is in the user-space window.
    fn guard(&self, address: u64) -> Option<Target> {
        self.target.filter(|_| is_valid_address(address))
    }

    // ────────────────────────────────────────────────────────────────────
    // Raw transfers
    // ────────────────────────────────────────────────────────────────────

    pub fn read_raw(&self, address: u64, size: usize) -> RawRead {
        let Some(target) = self.guard(address) else {
            memdrv_log!(Level::Trace, "memory", "read of {} bytes at {:#x} guarded", size, address);
            return RawRead::Guarded(vec![0; size]);
        };
        let Ok(len) = i32::try_from(size) else {
            memdrv_log!(Level::Error, "memory", "read of {} bytes exceeds the request limit", size);
            return RawRead::Failed;
        };

        let mut buffer = PinnedBuffer::zeroed(size);
        let request = ReadRequest {
            process_id: target.process_id,
            address,
            response: buffer.address(),
            size: len,
        };
        // SAFETY: `buffer` is heap-backed, never resized, and only read after
        // the call returns.
        match unsafe { self.channel.execute(ioctl::READ, &request) } {
            Ok(()) => RawRead::Data(buffer.into_vec()),
            Err(e) => {
                memdrv_log!(Level::Debug, "memory", "read at {:#x} failed: {}", address, e);
                RawRead::Failed
            }
        }
    }

    /// Zeroes when guarded, `None` on failure.
    pub fn read_bytes(&self, address: u64, size: usize) -> Option<Vec<u8>> {
        self.read_raw(address, size).into_bytes()
    }

    pub fn write_bytes(&self, address: u64, bytes: &[u8], mode: WriteMode) -> Result<(), MemoryError> {
        let Some(target) = self.guard(address) else {
            memdrv_log!(Level::Trace, "memory", "write at {:#x} guarded", address);
            return Ok(());
        };
        let size = i32::try_from(bytes.len()).map_err(|_| MemoryError::TooLarge { size: bytes.len() })?;

        let request = WriteRequest {
            process_id: target.process_id,
            address,
            source: bytes.as_ptr() as u64,
            size,
            auxiliary: 0,
        };
        // SAFETY: `bytes` is borrowed for the whole call.
        unsafe { self.channel.execute(mode.code(), &request) }.map_err(|source| {
            memdrv_log!(Level::Error, "memory", "write at {:#x} failed: {}", address, source);
            MemoryError::WriteFailed { address, size: bytes.len(), source }
        })
    }

    // ────────────────────────────────────────────────────────────────────
    // Typed values
    // ────────────────────────────────────────────────────────────────────

    /// Default value when guarded or when the read fails.
    pub fn read<T: RemoteValue>(&self, address: u64) -> T {
        match self.read_raw(address, T::SIZE) {
            RawRead::Data(bytes) => T::from_le(&bytes),
            RawRead::Guarded(_) | RawRead::Failed => T::default(),
        }
    }

    pub fn write<T: RemoteValue>(&self, address: u64, value: &T) -> Result<(), MemoryError> {
        self.write_with(address, value, WriteMode::Normal)
    }

    pub fn write_with<T: RemoteValue>(
        &self,
        address: u64,
        value: &T,
        mode: WriteMode,
    ) -> Result<(), MemoryError> {
        self.write_bytes(address, &value.to_le(), mode)
    }

    // ────────────────────────────────────────────────────────────────────
    // Strings
    // ────────────────────────────────────────────────────────────────────

    /// Read `len` characters. Narrow strings stop at the first NUL; wide
    /// strings keep the full length.
    pub fn read_string(&self, address: u64, len: usize, encoding: Encoding) -> String {
        match encoding {
            Encoding::Narrow => {
                let Some(bytes) = self.read_bytes(address, len) else {
                    return String::new();
                };
                bytes
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| if b.is_ascii() { b as char } else { '?' })
                    .collect()
            }
            Encoding::Wide => {
                let Some(bytes) = self.read_bytes(address, len.saturating_mul(2)) else {
                    return String::new();
                };
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }

    /// Write `text` followed by its terminator in a single request.
    pub fn write_string(
        &self,
        address: u64,
        text: &str,
        encoding: Encoding,
        mode: WriteMode,
    ) -> Result<(), MemoryError> {
        let bytes: Vec<u8> = match encoding {
            Encoding::Narrow => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .chain([0])
                .collect(),
            Encoding::Wide => text
                .encode_utf16()
                .chain([0])
                .flat_map(u16::to_le_bytes)
                .collect(),
        };
        self.write_bytes(address, &bytes, mode)
    }

    // ────────────────────────────────────────────────────────────────────
    // Pointer chains
    // ────────────────────────────────────────────────────────────────────

    /// Follow a pointer chain.
    ///
    /// `offsets[0]` is dereferenced as an absolute address, each middle
    /// offset is added to the running value and dereferenced, the last one
    /// is only added. A null link or an out-of-range result yields 0, as
    /// does a chain shorter than two entries.
    pub fn resolve(&self, offsets: &[u64]) -> u64 {
        let [first, middle @ .., last] = offsets else {
            return 0;
        };

        let mut address = self.read::<u64>(*first);
        for &offset in middle {
            if address == 0 {
                return 0;
            }
            address = self.read::<u64>(address.wrapping_add(offset));
        }

        let resolved = address.wrapping_add(*last);
        if is_valid_address(resolved) { resolved } else { 0 }
    }

    // ────────────────────────────────────────────────────────────────────
    // Scanning
    // ────────────────────────────────────────────────────────────────────

    /// First address in `[start, start + size)` matching `pattern` under
    /// `mask`. A block that trips the guard ends the scan like a failed read;
    /// its zero fill is never searched.
    pub fn scan(
        &self,
        start: u64,
        size: u64,
        pattern: &[u8],
        mask: &str,
        alignment: usize,
    ) -> Option<u64> {
        self.guard(start)?;
        scan::scan_region(
            |address, len| match self.read_raw(address, len) {
                RawRead::Data(bytes) => Some(bytes),
                RawRead::Guarded(_) | RawRead::Failed => None,
            },
            start,
            size,
            pattern,
            mask,
            alignment,
            self.scan_block_size,
        )
    }

    pub fn scan_signature(&self, start: u64, size: u64, signature: &Signature) -> Option<u64> {
        self.scan(start, size, &signature.bytes, &signature.mask, 1)
    }
}

impl<D: Device> std::fmt::Debug for RemoteMemory<'_, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMemory")
            .field("target", &self.target)
            .field("scan_block_size", &self.scan_block_size)
            .finish()
    }
}
