//! `Device` over `CreateFileW` / `DeviceIoControl`.

use std::{ffi::OsStr, io, os::windows::ffi::OsStrExt, ptr};

use windows_sys::Win32::{
    Foundation::{CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE},
    Storage::FileSystem::{
        CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
    },
    System::IO::DeviceIoControl,
};

use super::Device;

/// The real endpoint, e.g. `\\.\MemDrv`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Device;

/// Owned endpoint handle.
#[derive(Debug)]
pub struct DeviceHandle(HANDLE);

// The handle is only used from the thread that owns the channel at a time.
unsafe impl Send for DeviceHandle {}

impl Device for Win32Device {
    type Handle = DeviceHandle;

    fn open(&self, path: &str) -> io::Result<DeviceHandle> {
        // Build null-terminated UTF-16 string for Win32 API
        let wide: Vec<u16> = OsStr::new(path).encode_wide().chain(Some(0)).collect();

        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            return Err(io::Error::last_os_error());
        }
        Ok(DeviceHandle(handle))
    }

    fn close(&self, handle: DeviceHandle) {
        unsafe { CloseHandle(handle.0) };
    }

    unsafe fn control(
        &self,
        handle: &DeviceHandle,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> io::Result<usize> {
        let out_ptr = if output.is_empty() { ptr::null_mut() } else { output.as_mut_ptr().cast() };
        let mut returned: u32 = 0;

        let ok = unsafe {
            DeviceIoControl(
                handle.0,
                code,
                input.as_ptr().cast(),
                input.len() as u32,
                out_ptr,
                output.len() as u32,
                &mut returned,
                ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(returned as usize)
    }
}
