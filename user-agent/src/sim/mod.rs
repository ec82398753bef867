//! In-process stand-ins for the service manager and the privileged component.
//!
//! A [`SimWorld`] holds shared state: registered services, open endpoint
//! handles, and simulated target processes with mapped memory regions.
//! [`SimulatedScm`] and [`SimulatedDevice`] are cheap handles onto it that
//! implement the same traits as the native backends, so the whole stack
//! (lifecycle, channel, session, memory) runs unchanged on any host.
//!
//! Key responsibilities:
//! - service registration and state transitions, with fault knobs
//! - endpoint reachability (running service or resident component)
//! - READ / WRITE / WRITE_PROTECTED / GET_BASE against simulated memory
//! - a log of every request code issued

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use shared::{ioctl, ReadRequest, Wire, WriteRequest};

use crate::channel::Device;
use crate::config::ServiceConfig;
use crate::service::{
    ManagedService, ServiceBackend, ServiceSnapshot, ServiceState, ERROR_INVALID_IMAGE_HASH,
};

const ERROR_INVALID_FUNCTION: i32 = 1;
const ERROR_FILE_NOT_FOUND: i32 = 2;
const ERROR_INVALID_HANDLE: i32 = 6;
const ERROR_GEN_FAILURE: i32 = 31;
const ERROR_INVALID_PARAMETER: i32 = 87;
const ERROR_PARTIAL_COPY: i32 = 299;
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;

fn os_error(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct SimService {
    endpoint: String,
    state: ServiceState,
    can_stop: bool,
}

#[derive(Debug)]
struct Region {
    bytes: Vec<u8>,
    read_only: bool,
}

#[derive(Debug, Default)]
struct SimProcess {
    base: u64,
    regions: BTreeMap<u64, Region>,
}

impl SimProcess {
    /// Region fully containing `[address, address + len)`, with the offset into it.
    fn locate(&self, address: u64, len: usize) -> Option<(u64, usize)> {
        let (&start, region) = self.regions.range(..=address).next_back()?;
        let offset = usize::try_from(address - start).ok()?;
        let end = offset.checked_add(len)?;
        (end <= region.bytes.len()).then_some((start, offset))
    }

    fn read(&self, address: u64, len: usize) -> Option<&[u8]> {
        let (start, offset) = self.locate(address, len)?;
        Some(&self.regions[&start].bytes[offset..offset + len])
    }

    fn write(&mut self, address: u64, data: &[u8], bypass: bool) -> io::Result<()> {
        let (start, offset) = self
            .locate(address, data.len())
            .ok_or_else(|| os_error(ERROR_PARTIAL_COPY))?;
        let region = self.regions.get_mut(&start).ok_or_else(|| os_error(ERROR_PARTIAL_COPY))?;
        if region.read_only && !bypass {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        region.bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Faults {
    reject_unsigned: bool,
    fail_start: bool,
    hang: bool,
    fail_delete: bool,
    reject_requests: usize,
}

#[derive(Debug, Default)]
struct World {
    services: HashMap<String, SimService>,
    resident: HashSet<String>,
    processes: HashMap<u64, SimProcess>,
    handles: HashSet<u64>,
    next_handle: u64,
    requests: Vec<u32>,
    starts: usize,
    faults: Faults,
}

impl World {
    fn reachable(&self, path: &str) -> bool {
        self.resident.contains(path)
            || self
                .services
                .values()
                .any(|s| s.endpoint == path && s.state == ServiceState::Running)
    }
}

/// Shared simulated host. Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct SimWorld {
    inner: Arc<Mutex<World>>,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        lock(&self.inner)
    }

    pub fn scm(&self) -> SimulatedScm {
        SimulatedScm { world: Arc::clone(&self.inner) }
    }

    pub fn device(&self) -> SimulatedDevice {
        SimulatedDevice { world: Arc::clone(&self.inner) }
    }

    /// Make `endpoint` openable without any service running, as if a
    /// previous run left the component loaded.
    pub fn make_resident(&self, endpoint: &str) {
        self.lock().resident.insert(endpoint.to_owned());
    }

    pub fn add_process(&self, process_id: u64, base: u64) {
        self.lock().processes.entry(process_id).or_default().base = base;
    }

    /// Map `bytes` at `address` in `process_id`, creating the process if needed.
    pub fn map(&self, process_id: u64, address: u64, bytes: Vec<u8>) {
        self.map_region(process_id, address, bytes, false);
    }

    /// Like [`map`](Self::map) but plain writes are refused.
    pub fn map_read_only(&self, process_id: u64, address: u64, bytes: Vec<u8>) {
        self.map_region(process_id, address, bytes, true);
    }

    fn map_region(&self, process_id: u64, address: u64, bytes: Vec<u8>, read_only: bool) {
        self.lock()
            .processes
            .entry(process_id)
            .or_default()
            .regions
            .insert(address, Region { bytes, read_only });
    }

    /// Read simulated memory directly, bypassing the request path.
    pub fn peek(&self, process_id: u64, address: u64, len: usize) -> Option<Vec<u8>> {
        let world = self.lock();
        world.processes.get(&process_id)?.read(address, len).map(<[u8]>::to_vec)
    }

    pub fn service_state(&self, name: &str) -> Option<ServiceState> {
        self.lock().services.get(name).map(|s| s.state)
    }

    pub fn service_exists(&self, name: &str) -> bool {
        self.lock().services.contains_key(name)
    }

    pub fn set_can_stop(&self, name: &str, can_stop: bool) {
        if let Some(s) = self.lock().services.get_mut(name) {
            s.can_stop = can_stop;
        }
    }

    /// Number of start requests that actually reached the service manager.
    pub fn start_count(&self) -> usize {
        self.lock().starts
    }

    pub fn reject_unsigned(&self, on: bool) {
        self.lock().faults.reject_unsigned = on;
    }

    pub fn fail_start(&self, on: bool) {
        self.lock().faults.fail_start = on;
    }

    /// Leave start/stop in their pending states.
    pub fn hang_transitions(&self, on: bool) {
        self.lock().faults.hang = on;
    }

    pub fn fail_delete(&self, on: bool) {
        self.lock().faults.fail_delete = on;
    }

    /// Fail the next `count` control requests with a device error.
    pub fn reject_next_requests(&self, count: usize) {
        self.lock().faults.reject_requests = count;
    }

    pub fn open_handles(&self) -> usize {
        self.lock().handles.len()
    }

    /// Codes of every control request issued so far, in order.
    pub fn requests(&self) -> Vec<u32> {
        self.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.lock().requests.clear();
    }
}

fn lock(world: &Mutex<World>) -> MutexGuard<'_, World> {
    // A panicking test thread must not wedge the rest of the world.
    world.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ────────────────────────────────────────────────────────────────────────────
// Service manager
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimulatedScm {
    world: Arc<Mutex<World>>,
}

#[derive(Debug)]
pub struct SimulatedService {
    name: String,
    world: Arc<Mutex<World>>,
}

impl ServiceBackend for SimulatedScm {
    type Service = SimulatedService;

    fn create_or_open(&self, cfg: &ServiceConfig) -> io::Result<Self::Service> {
        let mut world = lock(&self.world);
        world.services.entry(cfg.name.clone()).or_insert_with(|| SimService {
            endpoint: cfg.endpoint.clone(),
            state: ServiceState::Stopped,
            can_stop: true,
        });
        Ok(SimulatedService { name: cfg.name.clone(), world: Arc::clone(&self.world) })
    }
}

impl SimulatedService {
    fn with<T>(&self, f: impl FnOnce(&mut Faults, &mut usize, &mut SimService) -> io::Result<T>) -> io::Result<T> {
        let mut guard = lock(&self.world);
        let World { services, faults, starts, .. } = &mut *guard;
        let service = services
            .get_mut(&self.name)
            .ok_or_else(|| os_error(ERROR_SERVICE_DOES_NOT_EXIST))?;
        f(faults, starts, service)
    }
}

impl ManagedService for SimulatedService {
    fn query(&self) -> io::Result<ServiceSnapshot> {
        self.with(|_, _, s| Ok(ServiceSnapshot { state: s.state, can_stop: s.can_stop }))
    }

    fn start(&self) -> io::Result<()> {
        self.with(|faults, starts, s| {
            if faults.reject_unsigned {
                return Err(os_error(ERROR_INVALID_IMAGE_HASH));
            }
            if faults.fail_start {
                return Err(os_error(ERROR_GEN_FAILURE));
            }
            *starts += 1;
            s.state = if faults.hang { ServiceState::StartPending } else { ServiceState::Running };
            Ok(())
        })
    }

    fn stop(&self) -> io::Result<()> {
        self.with(|faults, _, s| {
            s.state = if faults.hang { ServiceState::StopPending } else { ServiceState::Stopped };
            Ok(())
        })
    }

    fn delete(&self) -> io::Result<()> {
        let mut world = lock(&self.world);
        if world.faults.fail_delete {
            return Err(os_error(ERROR_GEN_FAILURE));
        }
        world
            .services
            .remove(&self.name)
            .map(|_| ())
            .ok_or_else(|| os_error(ERROR_SERVICE_DOES_NOT_EXIST))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Privileged component
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    world: Arc<Mutex<World>>,
}

#[derive(Debug)]
pub struct SimHandle(u64);

fn invalid_request() -> io::Error {
    os_error(ERROR_INVALID_PARAMETER)
}

fn size_of_request(size: i32) -> io::Result<usize> {
    usize::try_from(size).map_err(|_| invalid_request())
}

impl Device for SimulatedDevice {
    type Handle = SimHandle;

    fn open(&self, path: &str) -> io::Result<SimHandle> {
        let mut world = lock(&self.world);
        if !world.reachable(path) {
            return Err(os_error(ERROR_FILE_NOT_FOUND));
        }
        world.next_handle += 1;
        let id = world.next_handle;
        world.handles.insert(id);
        Ok(SimHandle(id))
    }

    fn close(&self, handle: SimHandle) {
        lock(&self.world).handles.remove(&handle.0);
    }

    unsafe fn control(
        &self,
        handle: &SimHandle,
        code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> io::Result<usize> {
        let mut world = lock(&self.world);
        if !world.handles.contains(&handle.0) {
            return Err(os_error(ERROR_INVALID_HANDLE));
        }
        world.requests.push(code);
        if world.faults.reject_requests > 0 {
            world.faults.reject_requests -= 1;
            return Err(os_error(ERROR_GEN_FAILURE));
        }

        match code {
            ioctl::READ => {
                let req = ReadRequest::decode(input).ok_or_else(invalid_request)?;
                let len = size_of_request(req.size)?;
                let process = world.processes.get(&req.process_id).ok_or_else(invalid_request)?;
                let data = process
                    .read(req.address, len)
                    .ok_or_else(|| os_error(ERROR_PARTIAL_COPY))?;
                // SAFETY: the caller guarantees `response` addresses `size`
                // writable bytes that stay live for this call.
                unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), req.response as *mut u8, len) };
                Ok(0)
            }
            ioctl::WRITE | ioctl::WRITE_PROTECTED => {
                let req = WriteRequest::decode(input).ok_or_else(invalid_request)?;
                let len = size_of_request(req.size)?;
                let process = world.processes.get_mut(&req.process_id).ok_or_else(invalid_request)?;
                let source: &[u8] = if len == 0 {
                    &[]
                } else {
                    // SAFETY: the caller guarantees `source` addresses `size`
                    // readable bytes that stay live for this call.
                    unsafe { std::slice::from_raw_parts(req.source as *const u8, len) }
                };
                process.write(req.address, source, code == ioctl::WRITE_PROTECTED)?;
                Ok(0)
            }
            ioctl::GET_BASE => {
                let req = ReadRequest::decode(input).ok_or_else(invalid_request)?;
                let base = world.processes.get(&req.process_id).map_or(0, |p| p.base);
                let bytes = base.to_le_bytes();
                if req.response != 0 {
                    let len = size_of_request(req.size)?.min(bytes.len());
                    // SAFETY: as for READ.
                    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), req.response as *mut u8, len) };
                }
                // Also answer through the output buffer when one is given.
                let returned = bytes.len().min(output.len());
                output[..returned].copy_from_slice(&bytes[..returned]);
                Ok(returned)
            }
            _ => Err(os_error(ERROR_INVALID_FUNCTION)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = r"\\.\MemDrv";

    #[test]
    fn endpoint_follows_service_state() {
        let world = SimWorld::new();
        let scm = world.scm();
        let device = world.device();
        let svc = scm.create_or_open(&ServiceConfig::new("MemDrv", "x.sys", ENDPOINT)).unwrap();

        assert!(device.open(ENDPOINT).is_err());
        svc.start().unwrap();
        let h = device.open(ENDPOINT).unwrap();
        device.close(h);
        svc.stop().unwrap();
        assert!(device.open(ENDPOINT).is_err());
    }

    #[test]
    fn regions_bound_reads_and_honor_read_only() {
        let mut p = SimProcess::default();
        p.regions.insert(0x1000, Region { bytes: vec![1, 2, 3, 4], read_only: true });

        assert_eq!(p.read(0x1001, 3), Some(&[2u8, 3, 4][..]));
        assert!(p.read(0x1002, 3).is_none());
        assert!(p.read(0x0FFF, 1).is_none());

        assert!(p.write(0x1000, &[9], false).is_err());
        p.write(0x1000, &[9], true).unwrap();
        assert_eq!(p.read(0x1000, 1), Some(&[9u8][..]));
    }

    #[test]
    fn closed_handles_are_rejected() {
        let world = SimWorld::new();
        world.make_resident(ENDPOINT);
        let device = world.device();
        let h = device.open(ENDPOINT).unwrap();
        let stale = SimHandle(h.0);
        device.close(h);
        let err = unsafe { device.control(&stale, ioctl::READ, &[], &mut []) }.unwrap_err();
        assert_eq!(err.raw_os_error(), Some(ERROR_INVALID_HANDLE));
        assert!(world.requests().is_empty());
    }
}
