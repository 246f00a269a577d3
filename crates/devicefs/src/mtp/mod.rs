//! Portable device (MTP) support.
//!
//! # Architecture
//!
//! - `types`: Device, storage, and object types
//! - `transport`: The device-protocol interface the engine drives
//! - `connection`: `DeviceHandle` with enumeration, transfers, and lifecycle operations
//! - `virtual_device`: In-memory device for tests and demos
//! - `usb`: Real devices via mtp-rs (feature `usb`)

pub mod connection;
pub mod transport;
pub mod types;
pub mod virtual_device;

#[cfg(feature = "usb")]
pub mod usb;

pub use connection::{DeviceHandle, EnumerationStrategy, list_devices};
pub use types::{DeviceDescriptor, DeviceKind, DeviceSummary, ObjectId, ObjectMetadata, StorageInfo, StorageType};
