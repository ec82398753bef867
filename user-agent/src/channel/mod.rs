//! Control channel to the privileged component.
//!
//! A [`Device`] opens the component's endpoint and executes one synchronous
//! control request at a time. [`ControlChannel`] adds the connected /
//! disposed state and the typed request helpers on top.
//!
//! Requests carry raw addresses of caller buffers which the privileged side
//! reads from or writes into directly, so every execute path is `unsafe`:
//! the caller keeps those buffers alive and untouched until the call returns.

#[cfg(windows)]
pub mod win32;

use std::io;

use log::Level;
use shared::{ioctl, Wire};
use thiserror::Error;

use crate::memdrv_log;
use crate::notify::Notifier;

/// Endpoint open/close plus control-request execution.
pub trait Device {
    type Handle;

    /// Open `path` for read/write with read/write sharing.
    fn open(&self, path: &str) -> io::Result<Self::Handle>;

    fn close(&self, handle: Self::Handle);

    /// Execute `code` with `input`, filling `output`. Returns the number of
    /// output bytes the component reported.
    ///
    /// # Safety
    /// Buffer addresses carried inside `input` must point at memory that
    /// stays valid, and is not otherwise accessed, until this returns.
    unsafe fn control(
        &self,
        handle: &Self::Handle,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> io::Result<usize>;
}

/// Probe `path` without keeping anything open. Used to detect a component
/// left resident by an earlier run.
pub fn can_connect_to<D: Device>(device: &D, path: &str) -> bool {
    match device.open(path) {
        Ok(handle) => {
            device.close(handle);
            true
        }
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Disposed,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("control channel is not connected")]
    NotConnected,

    #[error("control channel was disposed")]
    Disposed,

    #[error("cannot open endpoint {path}: {source}")]
    Open { path: String, #[source] source: io::Error },

    #[error("control request {name} ({code:#x}) failed: {source}")]
    Request { code: u32, name: &'static str, #[source] source: io::Error },

    #[error("control request {name} returned {got} bytes, expected {expected}")]
    ShortResponse { name: &'static str, expected: usize, got: usize },
}

pub struct ControlChannel<D: Device> {
    device: D,
    endpoint: String,
    handle: Option<D::Handle>,
    disposed: bool,
    events: Notifier<ChannelEvent>,
}

impl<D: Device> ControlChannel<D> {
    pub fn new(device: D, endpoint: impl Into<String>) -> Self {
        Self {
            device,
            endpoint: endpoint.into(),
            handle: None,
            disposed: false,
            events: Notifier::new("channel"),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn events(&mut self) -> &mut Notifier<ChannelEvent> {
        &mut self.events
    }

    /// Open the endpoint. A no-op when already connected; reconnecting is the
    /// caller's job (disconnect first).
    pub fn connect(&mut self) -> Result<(), ChannelError> {
        if self.disposed {
            return Err(ChannelError::Disposed);
        }
        if self.handle.is_some() {
            return Ok(());
        }

        let handle = self.device.open(&self.endpoint).map_err(|source| {
            memdrv_log!(Level::Error, "channel", "open {} failed: {}", self.endpoint, source);
            ChannelError::Open { path: self.endpoint.clone(), source }
        })?;
        self.handle = Some(handle);
        memdrv_log!(Level::Info, "channel", "connected to {}", self.endpoint);
        self.events.emit(ChannelEvent::Connected);
        Ok(())
    }

    /// Close the handle if open and announce the disconnect.
    pub fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.device.close(handle);
            memdrv_log!(Level::Info, "channel", "disconnected from {}", self.endpoint);
        }
        self.events.emit(ChannelEvent::Disconnected);
    }

    /// Release everything. Safe to call any number of times.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if self.handle.is_some() {
            self.disconnect();
        }
        self.disposed = true;
        self.events.emit(ChannelEvent::Disposed);
    }

    /// Issue `code` with raw input and output buffers.
    ///
    /// # Safety
    /// See [`Device::control`].
    pub unsafe fn execute_raw(
        &self,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, ChannelError> {
        if self.disposed {
            return Err(ChannelError::Disposed);
        }
        let handle = self.handle.as_ref().ok_or(ChannelError::NotConnected)?;

        // SAFETY: forwarded from the caller.
        let outcome = unsafe { self.device.control(handle, code, input, output) };
        outcome.map_err(|source| {
            let name = ioctl::name(code);
            memdrv_log!(Level::Debug, "channel", "{} ({:#x}) rejected: {}", name, code, source);
            ChannelError::Request { code, name, source }
        })
    }

    /// Issue `code` with a fixed-layout request and no output payload.
    ///
    /// # Safety
    /// See [`Device::control`].
    pub unsafe fn execute<R: Wire>(&self, code: u32, request: &R) -> Result<(), ChannelError> {
        let mut input = vec![0u8; R::LEN];
        request.encode(&mut input);
        // SAFETY: forwarded from the caller.
        unsafe { self.execute_raw(code, &input, &mut []) }.map(|_| ())
    }

    /// Issue `code` and decode a fixed-layout response.
    ///
    /// # Safety
    /// See [`Device::control`].
    pub unsafe fn execute_for<R: Wire, O: Wire>(
        &self,
        code: u32,
        request: &R,
    ) -> Result<O, ChannelError> {
        let mut input = vec![0u8; R::LEN];
        request.encode(&mut input);
        let mut output = vec![0u8; O::LEN];

        // SAFETY: forwarded from the caller.
        let got = unsafe { self.execute_raw(code, &input, &mut output) }?;
        let short = || ChannelError::ShortResponse { name: ioctl::name(code), expected: O::LEN, got };
        if got != O::LEN {
            return Err(short());
        }
        O::decode(&output).ok_or_else(short)
    }
}

impl<D: Device> Drop for ControlChannel<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<D: Device> std::fmt::Debug for ControlChannel<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .field("disposed", &self.disposed)
            .finish()
    }
}
