//! Control codes understood by the privileged component.
//!
//! Layout follows the usual `CTL_CODE` packing:
//! `device << 16 | access << 14 | function << 2 | method`.

/// `FILE_DEVICE_UNKNOWN`.
pub const DEVICE_UNKNOWN: u32 = 0x22;
/// `METHOD_BUFFERED`.
pub const METHOD_BUFFERED: u32 = 0;
/// `FILE_ANY_ACCESS`.
pub const ACCESS_ANY: u32 = 0;

/// Pack a control code.
pub const fn ctl_code(device: u32, function: u32, method: u32, access: u32) -> u32 {
    (device << 16) | (access << 14) | (function << 2) | method
}

const fn buffered(function: u32) -> u32 {
    ctl_code(DEVICE_UNKNOWN, function, METHOD_BUFFERED, ACCESS_ANY)
}

/// Write that first lifts page protection on the remote side.
///
/// Issuing this in quick succession is known to destabilise the remote
/// system; callers rate-limit it.
pub const WRITE_PROTECTED: u32 = buffered(0x823);
pub const WRITE: u32 = buffered(0x824);
pub const READ: u32 = buffered(0x825);
pub const GET_BASE: u32 = buffered(0x826);
/// Module-base lookups. Which module each one targets is decided by the
/// driver build; the client only forwards them.
pub const GET_MODULE_BASE_PRIMARY: u32 = buffered(0x827);
pub const GET_MODULE_BASE_SECONDARY: u32 = buffered(0x828);
/// Reserved for a driver-side scan. Not issued by this client.
pub const SCAN: u32 = buffered(0x829);

/// Every code above, in function-number order.
pub const ALL: [u32; 7] = [
    WRITE_PROTECTED,
    WRITE,
    READ,
    GET_BASE,
    GET_MODULE_BASE_PRIMARY,
    GET_MODULE_BASE_SECONDARY,
    SCAN,
];

/// Human-readable name for logs.
pub fn name(code: u32) -> &'static str {
    match code {
        WRITE_PROTECTED => "WRITE_PROTECTED",
        WRITE => "WRITE",
        READ => "READ",
        GET_BASE => "GET_BASE",
        GET_MODULE_BASE_PRIMARY => "GET_MODULE_BASE_PRIMARY",
        GET_MODULE_BASE_SECONDARY => "GET_MODULE_BASE_SECONDARY",
        SCAN => "SCAN",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_ctl_code_packing() {
        assert_eq!(READ, 0x0022_2094);
        assert_eq!(WRITE, 0x0022_2090);
        assert_eq!(WRITE_PROTECTED, 0x0022_208C);
        assert_eq!(GET_BASE, 0x0022_2098);
    }

    #[test]
    fn codes_are_distinct() {
        for (i, a) in ALL.iter().enumerate() {
            for b in &ALL[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn names_cover_every_code() {
        assert!(ALL.iter().all(|&c| name(c) != "UNKNOWN"));
        assert_eq!(name(0xDEAD), "UNKNOWN");
    }
}
