//! Device connection handle.
//!
//! A `DeviceHandle` owns one open session with one device. It is `Closed -> Open` via
//! [`DeviceHandle::open`] and `Open -> Closed` via [`DeviceHandle::close`] (or drop). Every other
//! operation needs an open handle and fails with `NotConnected` otherwise.
//!
//! The handle is synchronous and does no locking. Callers that share it across threads must
//! serialize access themselves.

mod enumeration;
pub mod errors;
mod file_ops;
mod mutation_ops;


pub use errors::{Aborted, ErrorKind, MtpError};
pub use file_ops::{TRANSFER_CHUNK_SIZE, TransferProgressFn};

use log::{debug, info, warn};
use serde::Serialize;

use super::transport::{DeviceSession, Transport};
use super::types::{DeviceDescriptor, DeviceSummary, ObjectId};
use crate::config::EngineConfig;
use errors::{map_connect_error, map_query_error};

/// Object id that stands for the device itself in error reports about summary queries.
const DEVICE_OBJECT_ID: &str = "DEVICE";

/// How the handle walks folders. Chosen once per handle at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumerationStrategy {
    /// One round trip returns metadata for all children of a folder.
    Bulk,
    /// List child ids, then query each child.
    PerObject,
}

impl EnumerationStrategy {
    fn select(device_supports_bulk: bool, bulk_enabled: bool) -> Self {
        if device_supports_bulk && bulk_enabled {
            Self::Bulk
        } else {
            Self::PerObject
        }
    }
}

/// An open session with one portable device.
pub struct DeviceHandle {
    device_id: String,
    /// None once closed.
    session: Option<Box<dyn DeviceSession>>,
    summary: DeviceSummary,
    strategy: EnumerationStrategy,
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("device_id", &self.device_id)
            .field("open", &self.session.is_some())
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Lists attached devices without opening sessions.
///
/// Returns an empty vector if discovery fails.
pub fn list_devices(transport: &dyn Transport) -> Vec<DeviceDescriptor> {
    match transport.list_devices() {
        Ok(devices) => {
            debug!("Found {} portable device(s)", devices.len());
            devices
        }
        Err(e) => {
            warn!("Failed to enumerate portable devices: {}", e);
            Vec::new()
        }
    }
}

impl DeviceHandle {
    /// Opens a session with the device named by `device_id` and reads its summary.
    ///
    /// Never retries. A missing device fails with `DeviceNotFound`, anything else with a
    /// `Connection` kind error.
    pub fn open(transport: &dyn Transport, device_id: &str, config: &EngineConfig) -> Result<Self, MtpError> {
        info!(
            "Opening device {} as {} {}.{}.{}",
            device_id,
            config.client.name,
            config.client.major_version,
            config.client.minor_version,
            config.client.revision
        );

        let mut session = transport
            .connect(device_id, &config.client)
            .map_err(|e| map_connect_error(e, device_id))?;

        let mut summary = match session.device_summary() {
            Ok(summary) => summary,
            Err(e) => {
                if let Err(close_err) = session.close() {
                    debug!("Closing half-open session to {} failed: {}", device_id, close_err);
                }
                return Err(map_connect_error(e, device_id));
            }
        };

        let supports_bulk = session.supports_bulk_properties();
        summary.supports_bulk_properties = supports_bulk;
        let strategy = EnumerationStrategy::select(supports_bulk, config.bulk_enumeration);

        if let Some(storage_error) = &summary.storage_error {
            warn!("Device {} opened without storage list: {}", device_id, storage_error);
        }
        info!(
            "Device {} opened: {} ({} storages, strategy={:?})",
            device_id,
            summary.model.as_deref().unwrap_or("unknown model"),
            summary.storages.len(),
            strategy
        );

        Ok(Self {
            device_id: device_id.to_string(),
            session: Some(session),
            summary,
            strategy,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Summary as of the last successful open or refresh.
    pub fn summary(&self) -> &DeviceSummary {
        &self.summary
    }

    pub fn supports_bulk_properties(&self) -> bool {
        self.summary.supports_bulk_properties
    }

    pub fn strategy(&self) -> EnumerationStrategy {
        self.strategy
    }

    /// Re-reads the storage list and capacities.
    ///
    /// Object ids issued earlier stay valid. On failure, including an unreadable storage list,
    /// the previous summary is kept.
    pub fn refresh(&mut self) -> Result<&DeviceSummary, MtpError> {
        let (device_id, session) = self.session_parts()?;
        let mut summary = session
            .device_summary()
            .map_err(|e| map_query_error(e, device_id, &ObjectId::from(DEVICE_OBJECT_ID)))?;
        if let Some(storage_error) = summary.storage_error.take() {
            warn!("Refresh of device {} failed to read storages: {}", device_id, storage_error);
            return Err(MtpError::Query {
                device_id: device_id.to_string(),
                object_id: DEVICE_OBJECT_ID.to_string(),
                message: storage_error,
            });
        }
        summary.supports_bulk_properties = session.supports_bulk_properties();

        debug!("Refreshed device {}: {} storages", device_id, summary.storages.len());
        self.summary = summary;
        Ok(&self.summary)
    }

    /// Ends the session. Safe to call repeatedly and after failed operations.
    pub fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        match session.close() {
            Ok(()) => info!("Device {} closed", self.device_id),
            // The session is dropped either way
            Err(e) => warn!("Error while closing device {}: {}", self.device_id, e),
        }
    }

    /// Splits the handle into its id and live session, or fails if closed.
    fn session_parts(&mut self) -> Result<(&str, &mut (dyn DeviceSession + 'static)), MtpError> {
        match self.session.as_deref_mut() {
            Some(session) => Ok((&self.device_id, session)),
            None => Err(MtpError::NotConnected {
                device_id: self.device_id.clone(),
            }),
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

// Remaining impl blocks are in submodules:
// - enumeration.rs: enumerate, filesystem
// - file_ops.rs: get_file, put_file
// - mutation_ops.rs: create_folder, delete_object

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtp::transport::TransportErrorKind;
    use crate::mtp::virtual_device::VirtualDevice;
    use crate::mtp::types::DeviceKind;

    fn config(bulk: bool) -> EngineConfig {
        EngineConfig {
            client: Default::default(),
            bulk_enumeration: bulk,
        }
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(EnumerationStrategy::select(true, true), EnumerationStrategy::Bulk);
        assert_eq!(EnumerationStrategy::select(true, false), EnumerationStrategy::PerObject);
        assert_eq!(EnumerationStrategy::select(false, true), EnumerationStrategy::PerObject);
    }

    #[test]
    fn test_open_reads_summary() {
        let device = VirtualDevice::new("mtp-1-5").with_model("Kobo Libra 2").with_bulk(true);
        device.add_storage("s1", "Internal storage", 1_000, 400);

        let handle = DeviceHandle::open(&device, "mtp-1-5", &config(true)).unwrap();
        assert!(handle.is_open());
        assert_eq!(handle.device_id(), "mtp-1-5");
        assert_eq!(handle.summary().model.as_deref(), Some("Kobo Libra 2"));
        assert_eq!(handle.summary().storages.len(), 1);
        assert!(handle.supports_bulk_properties());
        assert_eq!(handle.strategy(), EnumerationStrategy::Bulk);
    }

    #[test]
    fn test_open_passes_client_info() {
        let device = VirtualDevice::new("mtp-1-5");
        let mut cfg = config(true);
        cfg.client.name = "Library".to_string();
        let _handle = DeviceHandle::open(&device, "mtp-1-5", &cfg).unwrap();
        assert_eq!(device.last_client().map(|c| c.name), Some("Library".to_string()));
    }

    #[test]
    fn test_open_unknown_device_fails_with_not_found() {
        let device = VirtualDevice::new("mtp-1-5");
        let err = DeviceHandle::open(&device, "mtp-9-9", &config(true)).unwrap_err();
        assert_eq!(
            err,
            MtpError::DeviceNotFound {
                device_id: "mtp-9-9".to_string()
            }
        );
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_open_refused_fails_with_connection_error() {
        let device = VirtualDevice::new("mtp-1-5");
        device.fail_connect(TransportErrorKind::AccessDenied);
        let err = DeviceHandle::open(&device, "mtp-1-5", &config(true)).unwrap_err();
        assert!(matches!(err, MtpError::AccessDenied { .. }));
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn test_bulk_disabled_by_config() {
        let device = VirtualDevice::new("mtp-1-5").with_bulk(true);
        let handle = DeviceHandle::open(&device, "mtp-1-5", &config(false)).unwrap();
        assert!(handle.supports_bulk_properties());
        assert_eq!(handle.strategy(), EnumerationStrategy::PerObject);
    }

    #[test]
    fn test_close_is_idempotent() {
        let device = VirtualDevice::new("mtp-1-5");
        let mut handle = DeviceHandle::open(&device, "mtp-1-5", &config(true)).unwrap();
        handle.close();
        handle.close();
        assert!(!handle.is_open());
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_drop_closes_session() {
        let device = VirtualDevice::new("mtp-1-5");
        {
            let _handle = DeviceHandle::open(&device, "mtp-1-5", &config(true)).unwrap();
        }
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_operations_on_closed_handle_fail() {
        let device = VirtualDevice::new("mtp-1-5");
        device.add_storage("s1", "Internal storage", 1_000, 400);
        let mut handle = DeviceHandle::open(&device, "mtp-1-5", &config(true)).unwrap();
        handle.close();

        let err = handle.refresh().unwrap_err();
        assert!(matches!(err, MtpError::NotConnected { .. }));
        let err = handle.enumerate(&ObjectId::from("s1"), |_, _| Ok(true)).unwrap_err();
        assert!(matches!(err, MtpError::NotConnected { .. }));
        let err = handle.create_folder(&ObjectId::from("s1"), "Books").unwrap_err();
        assert!(matches!(err, MtpError::NotConnected { .. }));
    }

    #[test]
    fn test_refresh_picks_up_new_capacity() {
        let device = VirtualDevice::new("mtp-1-5");
        device.add_storage("s1", "Internal storage", 1_000, 400);
        let mut handle = DeviceHandle::open(&device, "mtp-1-5", &config(true)).unwrap();
        assert_eq!(handle.summary().total_free_space(), 400);

        device.set_free_space("s1", 150);
        // Summary is a snapshot until refreshed
        assert_eq!(handle.summary().total_free_space(), 400);
        let summary = handle.refresh().unwrap();
        assert_eq!(summary.total_free_space(), 150);
    }

    #[test]
    fn test_refresh_failure_keeps_previous_summary() {
        let device = VirtualDevice::new("mtp-1-5");
        device.add_storage("s1", "Internal storage", 1_000, 400);
        let mut handle = DeviceHandle::open(&device, "mtp-1-5", &config(true)).unwrap();

        device.fail_summary(TransportErrorKind::Other);
        let err = handle.refresh().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(handle.summary().total_capacity(), 1_000);
        assert!(handle.is_open());
    }

    #[test]
    fn test_open_with_unreadable_storage_list_still_opens() {
        let device = VirtualDevice::new("mtp-1-5").with_kind(DeviceKind::MediaPlayer);
        device.add_storage("s1", "Internal storage", 1_000, 400);
        device.fail_storage_query("storage busy");

        let handle = DeviceHandle::open(&device, "mtp-1-5", &config(true)).unwrap();
        assert!(handle.is_open());
        assert_eq!(handle.summary().kind, DeviceKind::MediaPlayer);
        assert!(handle.summary().storages.is_empty());
        assert_eq!(handle.summary().storage_error.as_deref(), Some("storage busy"));
    }

    #[test]
    fn test_refresh_with_unreadable_storage_list_fails_and_keeps_summary() {
        let device = VirtualDevice::new("mtp-1-5");
        device.add_storage("s1", "Internal storage", 1_000, 400);
        let mut handle = DeviceHandle::open(&device, "mtp-1-5", &config(true)).unwrap();

        device.fail_storage_query("storage busy");
        let err = handle.refresh().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Query);
        assert!(matches!(err, MtpError::Query { ref message, .. } if message == "storage busy"));

        let summary = handle.summary();
        assert_eq!(summary.storages.len(), 1);
        assert_eq!(summary.storage_error, None);
        assert_eq!(summary.total_capacity(), 1_000);
        assert!(handle.is_open());
    }

    #[test]
    fn test_list_devices() {
        let device = VirtualDevice::new("mtp-1-5").with_manufacturer("Kobo");
        let devices = list_devices(&device);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "mtp-1-5");
        assert_eq!(devices[0].display_name(), "Kobo device");
    }
}
