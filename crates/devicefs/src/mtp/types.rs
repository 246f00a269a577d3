//! Device, storage, and object types shared by the engine and its transports.
//!
//! All of these serialize to camelCase JSON so a managing application can hand them
//! straight to its UI layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, device-scoped name of one filesystem entry (file, folder, or storage root).
///
/// Only valid within the session that produced it. Reusing an id after reconnecting is undefined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A device detected by the transport, before opening a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Pass this to `DeviceHandle::open`.
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl DeviceDescriptor {
    /// Returns a display name for the device.
    ///
    /// Prefers product name, falls back to the manufacturer, then to the id.
    pub fn display_name(&self) -> String {
        if let Some(product) = &self.product {
            return product.clone();
        }
        if let Some(manufacturer) = &self.manufacturer {
            return format!("{} device", manufacturer);
        }
        format!("Portable device ({})", self.id)
    }
}

/// What kind of device the transport says this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Camera,
    MediaPlayer,
    Phone,
    Video,
    PersonalInformationManager,
    AudioRecorder,
    Generic,
    #[default]
    Unknown,
}

/// Physical nature of a storage partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    FixedRom,
    FixedRam,
    RemovableRom,
    RemovableRam,
    #[default]
    Unknown,
}

/// Information about one storage partition on the device.
///
/// Phones typically have one or more storages: "Internal Storage", "SD Card", etc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    /// Storage root. Has no parent, and is what `DeviceHandle::enumerate` starts from.
    pub id: ObjectId,
    /// For example, "Internal shared storage".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// For example, "FAT32".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<String>,
    pub storage_type: StorageType,
    /// In bytes.
    pub capacity: u64,
    /// In bytes.
    pub free_space: u64,
    pub capacity_objects: u64,
    pub free_objects: u64,
    pub read_write: bool,
}

impl StorageInfo {
    /// Returns a display name, preferring the name over the description.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or_else(|| self.id.as_str())
    }
}

/// Summary metadata of an open device: identity, capabilities, and storages.
///
/// Reflects the last successful open or refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub kind: DeviceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
    pub has_storage: bool,
    pub storages: Vec<StorageInfo>,
    /// Set when the device answered but its storage list could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_error: Option<String>,
    pub supports_bulk_properties: bool,
}

impl DeviceSummary {
    pub fn storage(&self, id: &ObjectId) -> Option<&StorageInfo> {
        self.storages.iter().find(|s| &s.id == id)
    }

    pub fn total_capacity(&self) -> u64 {
        self.storages.iter().map(|s| s.capacity).sum()
    }

    pub fn total_free_space(&self) -> u64 {
        self.storages.iter().map(|s| s.free_space).sum()
    }
}

/// Metadata of one device object.
///
/// Produced transiently by enumeration and lifecycle calls. The engine never keeps copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub id: ObjectId,
    /// None for storage roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ObjectId>,
    /// Original file name.
    pub name: String,
    /// Object name as the device presents it. Often equal to `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nominal_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
    pub is_folder: bool,
    /// In bytes. Always zero for folders.
    pub size: u64,
    /// Unix timestamp in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
    /// Unix timestamp in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    pub is_hidden: bool,
    pub is_system: bool,
    pub can_delete: bool,
}

impl ObjectMetadata {
    /// Minimal metadata for a file. Flags default to a visible, deletable object.
    pub fn file(id: impl Into<ObjectId>, parent_id: impl Into<ObjectId>, name: &str, size: u64) -> Self {
        Self {
            id: id.into(),
            parent_id: Some(parent_id.into()),
            name: name.to_string(),
            nominal_name: Some(name.to_string()),
            persistent_id: None,
            is_folder: false,
            size,
            modified: None,
            created: None,
            is_hidden: false,
            is_system: false,
            can_delete: true,
        }
    }

    /// Minimal metadata for a folder.
    pub fn folder(id: impl Into<ObjectId>, parent_id: impl Into<ObjectId>, name: &str) -> Self {
        Self {
            is_folder: true,
            ..Self::file(id, parent_id, name, 0)
        }
    }
}
