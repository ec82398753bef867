//! Wire contract with the privileged component.
//!
//! Everything here is plain data: control codes, the fixed request layouts
//! and the address window the user-mode side accepts. The crate is `no_std`
//! so the driver build can share it.

#![cfg_attr(not(test), no_std)]

pub mod constants;
pub mod ioctl;
pub mod requests;

pub use constants::{is_valid_address, MAX_VALID_ADDRESS, MIN_VALID_ADDRESS};
pub use requests::{BaseRequest, BaseResponse, ReadRequest, Wire, WriteRequest};
