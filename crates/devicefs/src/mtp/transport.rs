//! The device-protocol collaborator the engine drives.
//!
//! A `Transport` finds devices and opens sessions. A `DeviceSession` performs single round trips:
//! listings, metadata queries, chunk reads and writes, object creation and deletion. Sessions do
//! no traversal, chunking, or progress reporting; that all lives in `connection`.
//!
//! Implementations:
//! - `VirtualDevice`: in-memory device with fault injection (tests, demos)
//! - `UsbTransport`: real MTP devices over USB (feature `usb`)

use super::types::{DeviceDescriptor, DeviceSummary, ObjectId, ObjectMetadata};
use crate::config::ClientInfo;
use std::fmt;

/// Why a single round trip failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The object or device doesn't exist (anymore).
    NotFound,
    /// A folder still has children.
    NotEmpty,
    /// The object is in use.
    Busy,
    AccessDenied,
    StorageFull,
    /// The session is gone. Nothing else will work on it.
    Disconnected,
    /// The device doesn't implement this operation.
    Unsupported,
    Timeout,
    Other,
}

/// Error from a single transport round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, message)
    }

    pub fn disconnected() -> Self {
        Self::new(TransportErrorKind::Disconnected, "device disconnected")
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(TransportErrorKind::Unsupported, format!("{} is not supported", operation))
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Other, message)
    }

    pub fn is_disconnect(&self) -> bool {
        self.kind == TransportErrorKind::Disconnected
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Handle of an upload staged with `DeviceSession::begin_upload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadId(pub u64);

/// Properties of an object about to be created by an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObject {
    pub parent_id: ObjectId,
    pub name: String,
    /// Declared size in bytes. The device reserves space for exactly this much.
    pub size: u64,
}

/// Entry point of a device protocol: discovery and session establishment.
pub trait Transport: Send + Sync {
    /// Lists attached devices without opening sessions.
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError>;

    /// Opens a session with the device named by `device_id`.
    fn connect(&self, device_id: &str, client: &ClientInfo) -> Result<Box<dyn DeviceSession>, TransportError>;
}

/// One open connection to one device.
///
/// Every method is one blocking round trip. Timeouts, if any, are the implementation's business.
pub trait DeviceSession: Send {
    /// Reads identity, capabilities, and the storage list.
    ///
    /// Implementations should report a failed storage query through `storage_error`
    /// rather than failing the whole call.
    fn device_summary(&mut self) -> Result<DeviceSummary, TransportError>;

    /// Whether `query_metadata_bulk` is available.
    fn supports_bulk_properties(&self) -> bool;

    /// Lists the ids of the direct children of a folder or storage root.
    fn query_children(&mut self, folder_id: &ObjectId) -> Result<Vec<ObjectId>, TransportError>;

    fn query_metadata(&mut self, object_id: &ObjectId) -> Result<ObjectMetadata, TransportError>;

    /// Returns metadata for all direct children of a folder in one round trip.
    fn query_metadata_bulk(&mut self, folder_id: &ObjectId) -> Result<Vec<ObjectMetadata>, TransportError> {
        let _ = folder_id;
        Err(TransportError::unsupported("bulk property retrieval"))
    }

    /// Reads up to `buf.len()` bytes of an object's content starting at `offset`.
    ///
    /// Returns the number of bytes read. Zero means end of content.
    fn read_chunk(&mut self, object_id: &ObjectId, offset: u64, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Stages a new file. Nothing is visible on the device until `commit_upload`.
    fn begin_upload(&mut self, object: &NewObject) -> Result<UploadId, TransportError>;

    /// Writes bytes at `offset` of a staged upload.
    ///
    /// Returns how many bytes the device accepted, which may be fewer than `data.len()`.
    fn write_chunk(&mut self, upload: UploadId, offset: u64, data: &[u8]) -> Result<usize, TransportError>;

    /// Finishes a staged upload and returns the device-assigned id.
    fn commit_upload(&mut self, upload: UploadId) -> Result<ObjectId, TransportError>;

    /// Discards a staged upload.
    fn abort_upload(&mut self, upload: UploadId) -> Result<(), TransportError>;

    /// Creates a folder named `name` under `parent_id`.
    fn create_child(&mut self, parent_id: &ObjectId, name: &str) -> Result<ObjectId, TransportError>;

    /// Deletes one object without recursion. Non-empty folders must be rejected with `NotEmpty`.
    fn delete(&mut self, object_id: &ObjectId) -> Result<(), TransportError>;

    /// Ends the session. Called at most once.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
