//! Exposes a portable device (phone, e-reader, camera) as a navigable remote filesystem.
//!
//! Open a [`DeviceHandle`] through a [`Transport`], walk storages with
//! [`DeviceHandle::enumerate`], move file contents with [`DeviceHandle::get_file`] and
//! [`DeviceHandle::put_file`], and create or delete objects. Everything is synchronous and
//! blocking; run long calls on a worker thread if the caller needs to stay responsive.

pub mod config;
mod ignore_poison;
pub mod mtp;

pub use config::{ClientInfo, EngineConfig};
pub use mtp::connection::errors::{Aborted, ErrorKind, MtpError};
pub use mtp::connection::{DeviceHandle, EnumerationStrategy, TRANSFER_CHUNK_SIZE, TransferProgressFn, list_devices};
pub use mtp::transport::{DeviceSession, Transport, TransportError, TransportErrorKind};
pub use mtp::types::{DeviceDescriptor, DeviceKind, DeviceSummary, ObjectId, ObjectMetadata, StorageInfo, StorageType};
pub use mtp::virtual_device::VirtualDevice;

#[cfg(feature = "usb")]
pub use mtp::usb::UsbTransport;
