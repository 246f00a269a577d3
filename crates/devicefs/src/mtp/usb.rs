//! Transport for real MTP devices over USB, built on mtp-rs.
//!
//! mtp-rs is async. The engine is synchronous, so every round trip is driven to completion
//! with `block_on` on a private current-thread tokio runtime. Don't call into a `UsbTransport`
//! from inside another tokio runtime; use `spawn_blocking` or a plain thread.
//!
//! Object ids are `"{storage_id}"` for storage roots and `"{storage_id}:{handle}"` for objects.

use bytes::Bytes;
use log::{debug, info, warn};
use mtp_rs::ptp::{AccessCapability, ObjectFormatCode, ResponseCode};
use mtp_rs::{MtpDevice, MtpDeviceBuilder, NewObjectInfo, ObjectHandle, StorageId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use super::transport::{DeviceSession, NewObject, Transport, TransportError, TransportErrorKind, UploadId};
use super::types::{DeviceDescriptor, DeviceKind, DeviceSummary, ObjectId, ObjectMetadata, StorageInfo, StorageType};
use crate::config::ClientInfo;

/// Default timeout for one MTP round trip (30 seconds - some devices are slow).
const MTP_TIMEOUT_SECS: u64 = 30;

/// Runs one mtp-rs future to completion with a timeout.
fn run<T>(
    runtime: &Runtime,
    timeout: Duration,
    future: impl Future<Output = Result<T, mtp_rs::Error>>,
) -> Result<T, TransportError> {
    runtime
        .block_on(async { tokio::time::timeout(timeout, future).await })
        .map_err(|_| TransportError::new(TransportErrorKind::Timeout, "device did not answer in time"))?
        .map_err(map_mtp_error)
}

/// Maps mtp_rs errors to transport errors.
fn map_mtp_error(e: mtp_rs::Error) -> TransportError {
    match e {
        mtp_rs::Error::NoDevice => TransportError::not_found("no such device"),
        mtp_rs::Error::Disconnected | mtp_rs::Error::SessionNotOpen => TransportError::disconnected(),
        mtp_rs::Error::Timeout => TransportError::new(TransportErrorKind::Timeout, "device timed out"),
        mtp_rs::Error::Cancelled => TransportError::other("operation cancelled"),
        mtp_rs::Error::Protocol { code, operation } => {
            let message = format!("{:?} during {:?}", code, operation);
            let kind = match code {
                ResponseCode::DeviceBusy => TransportErrorKind::Busy,
                ResponseCode::StoreFull => TransportErrorKind::StorageFull,
                ResponseCode::StoreReadOnly | ResponseCode::AccessDenied => TransportErrorKind::AccessDenied,
                ResponseCode::InvalidObjectHandle | ResponseCode::InvalidParentObject => TransportErrorKind::NotFound,
                _ => TransportErrorKind::Other,
            };
            TransportError::new(kind, message)
        }
        mtp_rs::Error::InvalidData { message } => {
            TransportError::other(format!("invalid data from device: {}", message))
        }
        mtp_rs::Error::Io(io_err) => TransportError::other(format!("I/O error: {}", io_err)),
        mtp_rs::Error::Usb(usb_err) => {
            let msg = usb_err.to_string();
            let lower = msg.to_lowercase();
            if lower.contains("exclusive access") || lower.contains("device or resource busy") {
                TransportError::new(
                    TransportErrorKind::AccessDenied,
                    format!("another process owns the device: {}", msg),
                )
            } else {
                TransportError::other(format!("USB error: {}", msg))
            }
        }
    }
}

/// Parses a device ID to extract location_id.
///
/// Format: "mtp-{location_id}"
fn parse_device_id(device_id: &str) -> Option<u64> {
    device_id.strip_prefix("mtp-")?.parse().ok()
}

/// Splits an object id into storage id and object handle (None for the storage root).
fn parse_object_id(id: &ObjectId) -> Option<(u32, Option<u32>)> {
    match id.as_str().split_once(':') {
        Some((storage, handle)) => Some((storage.parse().ok()?, Some(handle.parse().ok()?))),
        None => Some((id.as_str().parse().ok()?, None)),
    }
}

fn object_id(storage_id: u32, handle: ObjectHandle) -> ObjectId {
    ObjectId::new(format!("{}:{}", storage_id, handle.0))
}

/// Parent id as the device reports it. Objects directly in a storage point at the storage root.
fn parent_object_id(storage_id: u32, parent: ObjectHandle) -> ObjectId {
    if parent == ObjectHandle::ROOT || parent.0 == u32::MAX {
        ObjectId::new(storage_id.to_string())
    } else {
        object_id(storage_id, parent)
    }
}

fn bad_id(id: &ObjectId) -> TransportError {
    TransportError::not_found(format!("not an MTP object id: {}", id))
}

/// Converts an MTP date to Unix seconds. Dates before 1970 clamp to 0.
fn convert_mtp_datetime(dt: mtp_rs::ptp::DateTime) -> u64 {
    // Days from civil date (proleptic Gregorian)
    let (y, m, d) = (i64::from(dt.year), i64::from(dt.month), i64::from(dt.day));
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146_097 + doe - 719_468;

    let secs = days * 86_400 + i64::from(dt.hour) * 3600 + i64::from(dt.minute) * 60 + i64::from(dt.second);
    u64::try_from(secs).unwrap_or(0)
}

fn convert_storage_type(storage_type: impl std::fmt::Debug) -> StorageType {
    match format!("{:?}", storage_type).as_str() {
        "FixedRom" => StorageType::FixedRom,
        "FixedRam" => StorageType::FixedRam,
        "RemovableRom" => StorageType::RemovableRom,
        "RemovableRam" => StorageType::RemovableRam,
        _ => StorageType::Unknown,
    }
}

fn convert_object_info(storage_id: u32, parent_id: Option<ObjectId>, info: &mtp_rs::ObjectInfo) -> ObjectMetadata {
    let is_folder = info.format == ObjectFormatCode::Association;
    ObjectMetadata {
        id: object_id(storage_id, info.handle),
        parent_id,
        name: info.filename.clone(),
        nominal_name: Some(info.filename.clone()),
        persistent_id: None,
        is_folder,
        size: if is_folder { 0 } else { info.size },
        modified: info.modified.map(convert_mtp_datetime),
        created: info.created.map(convert_mtp_datetime),
        is_hidden: info.filename.starts_with('.'),
        is_system: false,
        can_delete: true,
    }
}

/// MTP devices attached over USB.
pub struct UsbTransport {
    runtime: Arc<Runtime>,
    timeout: Duration,
}

impl UsbTransport {
    pub fn new() -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| TransportError::other(format!("failed to start runtime: {}", e)))?;
        Ok(Self {
            runtime: Arc::new(runtime),
            timeout: Duration::from_secs(MTP_TIMEOUT_SECS),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Transport for UsbTransport {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let devices = MtpDevice::list_devices().map_err(map_mtp_error)?;
        Ok(devices
            .into_iter()
            .map(|d| {
                let id = format!("mtp-{}", d.location_id);
                debug!(
                    "MTP device: id={}, vendor={:04x}, product={:04x}",
                    id, d.vendor_id, d.product_id
                );
                // mtp-rs doesn't expose string descriptors without opening the device
                DeviceDescriptor {
                    id,
                    manufacturer: None,
                    product: None,
                    serial_number: None,
                }
            })
            .collect())
    }

    fn connect(&self, device_id: &str, client: &ClientInfo) -> Result<Box<dyn DeviceSession>, TransportError> {
        let location_id = parse_device_id(device_id)
            .ok_or_else(|| TransportError::not_found(format!("bad device id {}", device_id)))?;
        debug!(
            "Opening MTP device location_id={} for {} (timeout={:?})",
            location_id, client.name, self.timeout
        );

        let timeout = self.timeout;
        let device = run(&self.runtime, timeout, async move {
            MtpDeviceBuilder::new().timeout(timeout).open_by_location(location_id).await
        })?;
        info!(
            "MTP device opened: {} {}",
            device.device_info().manufacturer,
            device.device_info().model
        );

        Ok(Box::new(UsbSession {
            runtime: Arc::clone(&self.runtime),
            timeout,
            device: Some(device),
            download: None,
            uploads: HashMap::new(),
            next_upload: 0,
        }))
    }
}

/// Download in progress, kept so sequential `read_chunk` calls continue one stream.
struct ActiveDownload {
    object_id: ObjectId,
    position: u64,
    stream: mtp_rs::FileDownload,
    pending: Bytes,
}

struct PendingUpload {
    object: NewObject,
    chunks: Vec<Bytes>,
    staged: u64,
}

struct UsbSession {
    runtime: Arc<Runtime>,
    timeout: Duration,
    /// None once closed. Dropping an `MtpDevice` closes its session.
    device: Option<MtpDevice>,
    download: Option<ActiveDownload>,
    uploads: HashMap<UploadId, PendingUpload>,
    next_upload: u64,
}

impl UsbSession {
    fn device(&self) -> Result<&MtpDevice, TransportError> {
        self.device.as_ref().ok_or_else(TransportError::disconnected)
    }

    fn list(&mut self, folder_id: &ObjectId) -> Result<Vec<ObjectMetadata>, TransportError> {
        let (storage_id, handle) = parse_object_id(folder_id).ok_or_else(|| bad_id(folder_id))?;
        let device = self.device()?;
        let infos = run(&self.runtime, self.timeout, async move {
            let storage = device.storage(StorageId(storage_id)).await?;
            storage.list_objects(handle.map(ObjectHandle)).await
        })?;

        Ok(infos
            .iter()
            .map(|info| convert_object_info(storage_id, Some(folder_id.clone()), info))
            .collect())
    }

    fn storage_root_metadata(&self, storage_id: u32) -> Result<ObjectMetadata, TransportError> {
        let device = self.device()?;
        let description = run(&self.runtime, self.timeout, async move {
            let storage = device.storage(StorageId(storage_id)).await?;
            Ok(storage.info().description.clone())
        })?;
        let id = ObjectId::new(storage_id.to_string());
        let mut root = ObjectMetadata::folder(id.clone(), id, &description);
        root.parent_id = None;
        root.can_delete = false;
        Ok(root)
    }

    /// Continues the active download, or starts a new one positioned at `offset`.
    fn download_at(&mut self, object_id: &ObjectId, offset: u64) -> Result<&mut ActiveDownload, TransportError> {
        let resumable = self
            .download
            .as_ref()
            .is_some_and(|d| &d.object_id == object_id && d.position == offset);
        if !resumable {
            let (storage_id, handle) = parse_object_id(object_id).ok_or_else(|| bad_id(object_id))?;
            let handle = handle.ok_or_else(|| bad_id(object_id))?;
            let device = self.device()?;
            let stream = run(&self.runtime, self.timeout * 10, async move {
                let storage = device.storage(StorageId(storage_id)).await?;
                storage.download_stream(ObjectHandle(handle)).await
            })?;
            self.download = Some(ActiveDownload {
                object_id: object_id.clone(),
                position: 0,
                stream,
                pending: Bytes::new(),
            });
        }

        let runtime = Arc::clone(&self.runtime);
        let timeout = self.timeout;
        let download = self.download.as_mut().ok_or_else(|| TransportError::other("no active download"))?;
        // Streams only go forward, skip to the requested offset
        while download.position < offset {
            if download.pending.is_empty() {
                match next_chunk(&runtime, timeout, &mut download.stream)? {
                    Some(chunk) => download.pending = chunk,
                    None => break,
                }
            }
            let skip = (offset - download.position).min(download.pending.len() as u64) as usize;
            let _ = download.pending.split_to(skip);
            download.position += skip as u64;
        }
        Ok(download)
    }
}

fn next_chunk(
    runtime: &Runtime,
    timeout: Duration,
    stream: &mut mtp_rs::FileDownload,
) -> Result<Option<Bytes>, TransportError> {
    runtime
        .block_on(async { tokio::time::timeout(timeout, stream.next_chunk()).await })
        .map_err(|_| TransportError::new(TransportErrorKind::Timeout, "device did not answer in time"))?
        .transpose()
        .map_err(map_mtp_error)
}

impl DeviceSession for UsbSession {
    fn device_summary(&mut self) -> Result<DeviceSummary, TransportError> {
        let device = self.device()?;
        let info = device.device_info();
        let mut summary = DeviceSummary {
            protocol: Some("MTP".to_string()),
            kind: DeviceKind::Unknown,
            friendly_name: (!info.model.is_empty()).then(|| info.model.clone()),
            manufacturer: (!info.manufacturer.is_empty()).then(|| info.manufacturer.clone()),
            model: (!info.model.is_empty()).then(|| info.model.clone()),
            serial_number: (!info.serial_number.is_empty()).then(|| info.serial_number.clone()),
            firmware_version: None,
            has_storage: true,
            storages: Vec::new(),
            storage_error: None,
            supports_bulk_properties: true,
        };

        let storages = run(&self.runtime, self.timeout, async move {
            let list = device.storages().await?;
            Ok(list
                .iter()
                .map(|storage| {
                    let info = storage.info();
                    StorageInfo {
                        id: ObjectId::new(storage.id().0.to_string()),
                        name: None,
                        description: Some(info.description.clone()),
                        filesystem: None,
                        storage_type: convert_storage_type(&info.storage_type),
                        capacity: info.max_capacity,
                        free_space: info.free_space_bytes,
                        capacity_objects: 0,
                        free_objects: 0,
                        read_write: matches!(info.access_capability, AccessCapability::ReadWrite),
                    }
                })
                .collect::<Vec<_>>())
        });
        match storages {
            Ok(storages) => summary.storages = storages,
            Err(e) if e.is_disconnect() => return Err(e),
            Err(e) => {
                warn!("Failed to read storages: {}", e);
                summary.storage_error = Some(e.to_string());
            }
        }
        Ok(summary)
    }

    fn supports_bulk_properties(&self) -> bool {
        // list_objects returns full object info for a whole folder in one call
        true
    }

    fn query_children(&mut self, folder_id: &ObjectId) -> Result<Vec<ObjectId>, TransportError> {
        Ok(self.list(folder_id)?.into_iter().map(|m| m.id).collect())
    }

    fn query_metadata(&mut self, object_id: &ObjectId) -> Result<ObjectMetadata, TransportError> {
        let (storage_id, handle) = parse_object_id(object_id).ok_or_else(|| bad_id(object_id))?;
        let Some(handle) = handle else {
            return self.storage_root_metadata(storage_id);
        };
        let device = self.device()?;
        let info = run(&self.runtime, self.timeout, async move {
            let storage = device.storage(StorageId(storage_id)).await?;
            storage.get_object_info(ObjectHandle(handle)).await
        })?;
        let parent = parent_object_id(storage_id, info.parent);
        Ok(convert_object_info(storage_id, Some(parent), &info))
    }

    fn query_metadata_bulk(&mut self, folder_id: &ObjectId) -> Result<Vec<ObjectMetadata>, TransportError> {
        self.list(folder_id)
    }

    fn read_chunk(&mut self, object_id: &ObjectId, offset: u64, buf: &mut [u8]) -> Result<usize, TransportError> {
        let runtime = Arc::clone(&self.runtime);
        let timeout = self.timeout;
        let download = self.download_at(object_id, offset)?;
        if download.pending.is_empty() {
            match next_chunk(&runtime, timeout, &mut download.stream)? {
                Some(chunk) => download.pending = chunk,
                None => return Ok(0),
            }
        }
        let len = download.pending.len().min(buf.len());
        buf[..len].copy_from_slice(&download.pending.split_to(len));
        download.position += len as u64;
        Ok(len)
    }

    fn begin_upload(&mut self, object: &NewObject) -> Result<UploadId, TransportError> {
        parse_object_id(&object.parent_id).ok_or_else(|| bad_id(&object.parent_id))?;
        self.next_upload += 1;
        let upload = UploadId(self.next_upload);
        self.uploads.insert(
            upload,
            PendingUpload {
                object: object.clone(),
                chunks: Vec::new(),
                staged: 0,
            },
        );
        Ok(upload)
    }

    fn write_chunk(&mut self, upload: UploadId, offset: u64, data: &[u8]) -> Result<usize, TransportError> {
        let pending = self
            .uploads
            .get_mut(&upload)
            .ok_or_else(|| TransportError::not_found(format!("upload {}", upload.0)))?;
        if offset != pending.staged {
            return Err(TransportError::other(format!(
                "write at {} but {} bytes staged",
                offset, pending.staged
            )));
        }
        // MTP sends an object in one operation, so chunks are buffered until commit
        pending.chunks.push(Bytes::copy_from_slice(data));
        pending.staged += data.len() as u64;
        Ok(data.len())
    }

    fn commit_upload(&mut self, upload: UploadId) -> Result<ObjectId, TransportError> {
        let pending = self
            .uploads
            .remove(&upload)
            .ok_or_else(|| TransportError::not_found(format!("upload {}", upload.0)))?;
        let (storage_id, parent_handle) =
            parse_object_id(&pending.object.parent_id).ok_or_else(|| bad_id(&pending.object.parent_id))?;
        let object_info = NewObjectInfo::file(&pending.object.name, pending.object.size);
        let data_stream = futures_util::stream::iter(
            pending
                .chunks
                .into_iter()
                .map(Ok::<_, std::io::Error>)
                .collect::<Vec<_>>(),
        );

        let device = self.device()?;
        let handle = run(&self.runtime, self.timeout * 10, async move {
            let storage = device.storage(StorageId(storage_id)).await?;
            storage
                .upload(parent_handle.map(ObjectHandle), object_info, data_stream)
                .await
        })?;
        Ok(object_id(storage_id, handle))
    }

    fn abort_upload(&mut self, upload: UploadId) -> Result<(), TransportError> {
        // Nothing reached the device yet
        self.uploads.remove(&upload);
        Ok(())
    }

    fn create_child(&mut self, parent_id: &ObjectId, name: &str) -> Result<ObjectId, TransportError> {
        let (storage_id, parent_handle) = parse_object_id(parent_id).ok_or_else(|| bad_id(parent_id))?;
        let device = self.device()?;
        let handle = run(&self.runtime, self.timeout, async move {
            let storage = device.storage(StorageId(storage_id)).await?;
            storage.create_folder(parent_handle.map(ObjectHandle), name).await
        })?;
        Ok(object_id(storage_id, handle))
    }

    fn delete(&mut self, object_id: &ObjectId) -> Result<(), TransportError> {
        let (storage_id, handle) = parse_object_id(object_id).ok_or_else(|| bad_id(object_id))?;
        let handle = handle
            .ok_or_else(|| TransportError::new(TransportErrorKind::AccessDenied, "storage roots can't be deleted"))?;
        let device = self.device()?;
        run(&self.runtime, self.timeout, async move {
            let storage = device.storage(StorageId(storage_id)).await?;
            storage.delete(ObjectHandle(handle)).await
        })?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.download = None;
        self.uploads.clear();
        if self.device.take().is_some() {
            debug!("MTP session closed");
        }
        Ok(())
    }
}
