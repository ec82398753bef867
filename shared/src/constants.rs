/// Lowest address (exclusive) the client will ever put in a request.
pub const MIN_VALID_ADDRESS: u64 = 0x10_0000;
/// Highest address (exclusive) the client will ever put in a request.
pub const MAX_VALID_ADDRESS: u64 = 0x7F_FFFF_FFFF_FFFF;

/// Cheap client-side guard. Says nothing about what is actually mapped in the
/// remote process.
#[inline]
pub const fn is_valid_address(address: u64) -> bool {
    address > MIN_VALID_ADDRESS && address < MAX_VALID_ADDRESS
}

/// Size of the base address returned by `GET_BASE`.
pub const BASE_RESPONSE_LEN: usize = 8;

/// Bases at or below this value are treated as "process not found".
pub const MIN_PROCESS_BASE: u64 = 100;
