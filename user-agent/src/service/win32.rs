//! `ServiceBackend` on top of the Windows service control manager.

use std::{
    ffi::{OsStr, OsString},
    io,
};

use log::Level;
use windows_service::{
    service::{
        Service, ServiceAccess, ServiceControlAccept, ServiceErrorControl, ServiceInfo,
        ServiceStartType, ServiceState as ScmState, ServiceType,
    },
    service_manager::{ServiceManager, ServiceManagerAccess},
};

use super::{ManagedService, ServiceBackend, ServiceSnapshot, ServiceState};
use crate::config::ServiceConfig;
use crate::memdrv_log;

/// Rights requested on the service object: all of them, for create and open alike.
fn service_access() -> ServiceAccess {
    ServiceAccess::all()
}

/// Flatten `windows_service::Error` so the OS error code survives.
fn to_io(err: windows_service::Error) -> io::Error {
    match err {
        windows_service::Error::Winapi(e) => e,
        other => io::Error::other(other.to_string()),
    }
}

/// Local service control manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScmBackend;

/// Open service handle; closed by `windows_service` on drop.
pub struct ScmService {
    service: Service,
}

impl ServiceBackend for ScmBackend {
    type Service = ScmService;

    fn create_or_open(&self, cfg: &ServiceConfig) -> io::Result<ScmService> {
        let manager = ServiceManager::local_computer(
            None::<&str>,
            ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE,
        )
        .map_err(to_io)?;

        let info = ServiceInfo {
            name: OsString::from(&cfg.name),
            display_name: OsString::from(&cfg.display_name),
            service_type: ServiceType::KERNEL_DRIVER,
            start_type: ServiceStartType::OnDemand,
            error_control: ServiceErrorControl::Normal,
            executable_path: cfg.binary.clone(),
            launch_arguments: vec![],
            dependencies: vec![],
            account_name: None,
            account_password: None,
        };

        let service = match manager.create_service(&info, service_access()) {
            Ok(service) => service,
            Err(e) => {
                memdrv_log!(Level::Debug, "scm", "create '{}' failed ({}), opening existing", cfg.name, e);
                manager.open_service(&cfg.name, service_access()).map_err(to_io)?
            }
        };
        Ok(ScmService { service })
    }
}

impl ManagedService for ScmService {
    fn query(&self) -> io::Result<ServiceSnapshot> {
        let status = self.service.query_status().map_err(to_io)?;
        let state = match status.current_state {
            ScmState::Stopped => ServiceState::Stopped,
            ScmState::StartPending => ServiceState::StartPending,
            ScmState::StopPending => ServiceState::StopPending,
            ScmState::Running => ServiceState::Running,
            ScmState::ContinuePending | ScmState::PausePending | ScmState::Paused => ServiceState::Paused,
        };
        Ok(ServiceSnapshot {
            state,
            can_stop: status.controls_accepted.contains(ServiceControlAccept::STOP),
        })
    }

    fn start(&self) -> io::Result<()> {
        self.service.start::<&OsStr>(&[]).map_err(to_io)
    }

    fn stop(&self) -> io::Result<()> {
        self.service.stop().map(|_| ()).map_err(to_io)
    }

    fn delete(&self) -> io::Result<()> {
        self.service.delete().map_err(to_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_is_opened_with_full_access() {
        let access = service_access();
        for right in [
            ServiceAccess::QUERY_STATUS,
            ServiceAccess::START,
            ServiceAccess::STOP,
            ServiceAccess::DELETE,
            ServiceAccess::QUERY_CONFIG,
            ServiceAccess::CHANGE_CONFIG,
        ] {
            assert!(access.contains(right), "missing {right:?}");
        }
    }
}
