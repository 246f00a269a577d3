//! Error types for device operations.

use serde::Serialize;

use crate::mtp::transport::{TransportError, TransportErrorKind};
use crate::mtp::types::ObjectId;

/// Broad category of a failure. Every `MtpError` belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Device absent, unreachable, or gone. Fatal to the handle.
    Connection,
    /// A metadata or listing round trip failed.
    Query,
    /// A chunk read or write failed. Fatal to that transfer.
    Transfer,
    Create,
    Delete,
    /// A visitor or progress callback asked to stop.
    Cancelled,
}

/// Returned by a visitor or progress callback to stop the running operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aborted {
    pub reason: Option<String>,
}

impl Aborted {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }
}

/// Error types for device operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum MtpError {
    /// No attached device has this id.
    DeviceNotFound { device_id: String },
    /// The device refused the session.
    AccessDenied { device_id: String, message: String },
    /// Opening the session failed for another reason.
    ConnectionFailed { device_id: String, message: String },
    /// The handle was closed.
    NotConnected { device_id: String },
    /// The device went away mid-operation.
    Disconnected { device_id: String },
    /// A metadata or listing query failed.
    Query {
        device_id: String,
        object_id: String,
        message: String,
    },
    /// Object not found on device.
    ObjectNotFound { device_id: String, object_id: String },
    /// A chunk read or write failed.
    Transfer {
        device_id: String,
        object_id: String,
        message: String,
    },
    /// The object is in use (retryable).
    FileBusy { device_id: String, object_id: String },
    StorageFull { device_id: String },
    /// The byte count moved doesn't match the declared size.
    IncompleteTransfer {
        device_id: String,
        object_id: String,
        expected: u64,
        actual: u64,
    },
    Create {
        device_id: String,
        parent_id: String,
        name: String,
        message: String,
    },
    Delete {
        device_id: String,
        object_id: String,
        message: String,
    },
    /// Deliberate refusal to delete a folder that still has children.
    FolderNotEmpty { device_id: String, object_id: String },
    Cancelled {
        device_id: String,
        operation: String,
        reason: Option<String>,
    },
}

impl MtpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceNotFound { .. }
            | Self::AccessDenied { .. }
            | Self::ConnectionFailed { .. }
            | Self::NotConnected { .. }
            | Self::Disconnected { .. } => ErrorKind::Connection,
            Self::Query { .. } | Self::ObjectNotFound { .. } => ErrorKind::Query,
            Self::Transfer { .. }
            | Self::FileBusy { .. }
            | Self::StorageFull { .. }
            | Self::IncompleteTransfer { .. } => ErrorKind::Transfer,
            Self::Create { .. } => ErrorKind::Create,
            Self::Delete { .. } | Self::FolderNotEmpty { .. } => ErrorKind::Delete,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns true if the operation may succeed if retried.
    ///
    /// The engine itself never retries. This is a hint for the caller's retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FileBusy { .. })
    }

    /// Returns a user-friendly message for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::DeviceNotFound { .. } => "Device not found. It may have been unplugged.".to_string(),
            Self::AccessDenied { .. } => {
                "Read/write access to the device is denied. Unlock the device and allow file access.".to_string()
            }
            Self::ConnectionFailed { message, .. } => format!("Couldn't connect to the device: {}", message),
            Self::NotConnected { .. } => "Device is not connected. Open it again to continue.".to_string(),
            Self::Disconnected { .. } => "Device was disconnected. Reconnect it to continue.".to_string(),
            Self::Query { message, .. } => format!("Couldn't read from the device: {}", message),
            Self::ObjectNotFound { .. } => "File or folder not found. It may have been deleted.".to_string(),
            Self::Transfer { message, .. } => format!("File transfer failed: {}", message),
            Self::FileBusy { .. } => "The file is in use on the device. Wait a moment and try again.".to_string(),
            Self::StorageFull { .. } => "Device storage is full. Free up some space.".to_string(),
            Self::IncompleteTransfer { expected, actual, .. } => {
                format!("Only {} of {} bytes were transferred.", actual, expected)
            }
            Self::Create { name, message, .. } => format!("Couldn't create \"{}\": {}", name, message),
            Self::Delete { message, .. } => format!("Couldn't delete: {}", message),
            Self::FolderNotEmpty { .. } => "Cannot delete the folder as it has children.".to_string(),
            Self::Cancelled { .. } => "Cancelled.".to_string(),
        }
    }
}

impl std::fmt::Display for MtpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceNotFound { device_id } => write!(f, "Device not found: {device_id}"),
            Self::AccessDenied { device_id, message } => {
                write!(f, "Access to device {device_id} denied: {message}")
            }
            Self::ConnectionFailed { device_id, message } => {
                write!(f, "Failed to open device {device_id}: {message}")
            }
            Self::NotConnected { device_id } => write!(f, "Device not connected: {device_id}"),
            Self::Disconnected { device_id } => write!(f, "Device disconnected: {device_id}"),
            Self::Query {
                device_id,
                object_id,
                message,
            } => write!(f, "Query for {object_id} on {device_id} failed: {message}"),
            Self::ObjectNotFound { device_id, object_id } => {
                write!(f, "Object not found on {device_id}: {object_id}")
            }
            Self::Transfer {
                device_id,
                object_id,
                message,
            } => write!(f, "Transfer of {object_id} on {device_id} failed: {message}"),
            Self::FileBusy { device_id, object_id } => write!(f, "Object {object_id} on {device_id} is in use"),
            Self::StorageFull { device_id } => write!(f, "Storage full on device: {device_id}"),
            Self::IncompleteTransfer {
                device_id,
                object_id,
                expected,
                actual,
            } => write!(
                f,
                "Incomplete transfer of {object_id} on {device_id}: {actual} of {expected} bytes"
            ),
            Self::Create {
                device_id,
                parent_id,
                name,
                message,
            } => write!(f, "Failed to create {name} in {parent_id} on {device_id}: {message}"),
            Self::Delete {
                device_id,
                object_id,
                message,
            } => write!(f, "Failed to delete {object_id} on {device_id}: {message}"),
            Self::FolderNotEmpty { device_id, object_id } => {
                write!(f, "Cannot delete {object_id} on {device_id} as it has children")
            }
            Self::Cancelled {
                device_id,
                operation,
                reason,
            } => match reason {
                Some(reason) => write!(f, "{operation} on {device_id} cancelled: {reason}"),
                None => write!(f, "{operation} on {device_id} cancelled"),
            },
        }
    }
}

impl std::error::Error for MtpError {}

/// Maps a failed `connect` round trip.
pub(crate) fn map_connect_error(e: TransportError, device_id: &str) -> MtpError {
    let device_id = device_id.to_string();
    match e.kind {
        TransportErrorKind::NotFound => MtpError::DeviceNotFound { device_id },
        TransportErrorKind::AccessDenied => MtpError::AccessDenied {
            device_id,
            message: e.message,
        },
        TransportErrorKind::Disconnected => MtpError::Disconnected { device_id },
        _ => MtpError::ConnectionFailed {
            device_id,
            message: e.message,
        },
    }
}

/// Maps a failed metadata or listing round trip.
pub(crate) fn map_query_error(e: TransportError, device_id: &str, object_id: &ObjectId) -> MtpError {
    let device_id = device_id.to_string();
    match e.kind {
        TransportErrorKind::Disconnected => MtpError::Disconnected { device_id },
        TransportErrorKind::NotFound => MtpError::ObjectNotFound {
            device_id,
            object_id: object_id.to_string(),
        },
        _ => MtpError::Query {
            device_id,
            object_id: object_id.to_string(),
            message: e.message,
        },
    }
}

/// Maps a failed chunk read/write or upload staging round trip.
pub(crate) fn map_transfer_error(e: TransportError, device_id: &str, object_id: &ObjectId) -> MtpError {
    let device_id = device_id.to_string();
    match e.kind {
        TransportErrorKind::Disconnected => MtpError::Disconnected { device_id },
        TransportErrorKind::Busy => MtpError::FileBusy {
            device_id,
            object_id: object_id.to_string(),
        },
        TransportErrorKind::StorageFull => MtpError::StorageFull { device_id },
        TransportErrorKind::AccessDenied => MtpError::Transfer {
            device_id,
            object_id: object_id.to_string(),
            message: format!("access denied: {}", e.message),
        },
        _ => MtpError::Transfer {
            device_id,
            object_id: object_id.to_string(),
            message: e.message,
        },
    }
}

/// Maps a failed folder creation.
pub(crate) fn map_create_error(e: TransportError, device_id: &str, parent_id: &ObjectId, name: &str) -> MtpError {
    if e.is_disconnect() {
        return MtpError::Disconnected {
            device_id: device_id.to_string(),
        };
    }
    let message = match e.kind {
        TransportErrorKind::NotFound => format!("parent folder doesn't exist: {}", e.message),
        TransportErrorKind::AccessDenied => format!("access denied: {}", e.message),
        _ => e.message,
    };
    MtpError::Create {
        device_id: device_id.to_string(),
        parent_id: parent_id.to_string(),
        name: name.to_string(),
        message,
    }
}

/// Maps a failed deletion.
pub(crate) fn map_delete_error(e: TransportError, device_id: &str, object_id: &ObjectId) -> MtpError {
    let device_id = device_id.to_string();
    match e.kind {
        TransportErrorKind::Disconnected => MtpError::Disconnected { device_id },
        TransportErrorKind::NotEmpty => MtpError::FolderNotEmpty {
            device_id,
            object_id: object_id.to_string(),
        },
        TransportErrorKind::AccessDenied => MtpError::Delete {
            device_id,
            object_id: object_id.to_string(),
            message: "Do not have permission to delete this object".to_string(),
        },
        _ => MtpError::Delete {
            device_id,
            object_id: object_id.to_string(),
            message: e.message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> ObjectId {
        ObjectId::from(s)
    }

    #[test]
    fn test_error_display() {
        let err = MtpError::DeviceNotFound {
            device_id: "mtp-1-5".to_string(),
        };
        assert_eq!(err.to_string(), "Device not found: mtp-1-5");

        let err = MtpError::FolderNotEmpty {
            device_id: "mtp-1-5".to_string(),
            object_id: "o9".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot delete o9 on mtp-1-5 as it has children");
    }

    #[test]
    fn test_every_variant_has_exactly_one_kind() {
        let d = || "dev".to_string();
        let cases = vec![
            (MtpError::DeviceNotFound { device_id: d() }, ErrorKind::Connection),
            (
                MtpError::AccessDenied {
                    device_id: d(),
                    message: "x".to_string(),
                },
                ErrorKind::Connection,
            ),
            (MtpError::NotConnected { device_id: d() }, ErrorKind::Connection),
            (MtpError::Disconnected { device_id: d() }, ErrorKind::Connection),
            (
                MtpError::ObjectNotFound {
                    device_id: d(),
                    object_id: "o".to_string(),
                },
                ErrorKind::Query,
            ),
            (MtpError::StorageFull { device_id: d() }, ErrorKind::Transfer),
            (
                MtpError::IncompleteTransfer {
                    device_id: d(),
                    object_id: "o".to_string(),
                    expected: 10,
                    actual: 4,
                },
                ErrorKind::Transfer,
            ),
            (
                MtpError::Create {
                    device_id: d(),
                    parent_id: "p".to_string(),
                    name: "n".to_string(),
                    message: "m".to_string(),
                },
                ErrorKind::Create,
            ),
            (
                MtpError::FolderNotEmpty {
                    device_id: d(),
                    object_id: "o".to_string(),
                },
                ErrorKind::Delete,
            ),
            (
                MtpError::Cancelled {
                    device_id: d(),
                    operation: "get_file".to_string(),
                    reason: None,
                },
                ErrorKind::Cancelled,
            ),
        ];

        for (err, kind) in cases {
            assert_eq!(err.kind(), kind, "{}", err);
            assert!(!err.to_string().is_empty());
            assert!(!err.user_message().is_empty());
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(
            MtpError::FileBusy {
                device_id: "d".to_string(),
                object_id: "o".to_string()
            }
            .is_retryable()
        );
        assert!(
            !MtpError::Disconnected {
                device_id: "d".to_string()
            }
            .is_retryable()
        );
        assert!(
            !MtpError::StorageFull {
                device_id: "d".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_serialization() {
        let err = MtpError::ObjectNotFound {
            device_id: "mtp-1-5".to_string(),
            object_id: "o3".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"objectNotFound\""), "JSON: {}", json);
        // Tag is camelCase, inner field names stay snake_case
        assert!(json.contains("\"object_id\":\"o3\""), "JSON: {}", json);
    }

    #[test]
    fn test_cancelled_display_with_and_without_reason() {
        let with = MtpError::Cancelled {
            device_id: "d".to_string(),
            operation: "enumerate".to_string(),
            reason: Some("user pressed stop".to_string()),
        };
        assert_eq!(with.to_string(), "enumerate on d cancelled: user pressed stop");

        let without = MtpError::Cancelled {
            device_id: "d".to_string(),
            operation: "enumerate".to_string(),
            reason: None,
        };
        assert_eq!(without.to_string(), "enumerate on d cancelled");
    }

    #[test]
    fn test_map_connect_error() {
        let err = map_connect_error(TransportError::not_found("gone"), "mtp-7");
        assert_eq!(
            err,
            MtpError::DeviceNotFound {
                device_id: "mtp-7".to_string()
            }
        );

        let err = map_connect_error(
            TransportError::new(TransportErrorKind::AccessDenied, "locked"),
            "mtp-7",
        );
        assert!(matches!(err, MtpError::AccessDenied { .. }));

        let err = map_connect_error(TransportError::other("usb stall"), "mtp-7");
        assert!(matches!(err, MtpError::ConnectionFailed { ref message, .. } if message == "usb stall"));
    }

    #[test]
    fn test_disconnect_always_maps_to_disconnected() {
        let e = TransportError::disconnected;
        assert!(matches!(map_query_error(e(), "d", &oid("o")), MtpError::Disconnected { .. }));
        assert!(matches!(map_transfer_error(e(), "d", &oid("o")), MtpError::Disconnected { .. }));
        assert!(matches!(map_create_error(e(), "d", &oid("p"), "n"), MtpError::Disconnected { .. }));
        assert!(matches!(map_delete_error(e(), "d", &oid("o")), MtpError::Disconnected { .. }));
    }

    #[test]
    fn test_map_transfer_error_busy_and_full() {
        let busy = map_transfer_error(TransportError::new(TransportErrorKind::Busy, "in use"), "d", &oid("o"));
        assert!(busy.is_retryable());
        let full = map_transfer_error(
            TransportError::new(TransportErrorKind::StorageFull, "no space"),
            "d",
            &oid("o"),
        );
        assert_eq!(
            full,
            MtpError::StorageFull {
                device_id: "d".to_string()
            }
        );
    }

    #[test]
    fn test_map_delete_error_not_empty() {
        let err = map_delete_error(
            TransportError::new(TransportErrorKind::NotEmpty, "has children"),
            "d",
            &oid("f1"),
        );
        assert_eq!(err.kind(), ErrorKind::Delete);
        assert!(matches!(err, MtpError::FolderNotEmpty { .. }));
    }

    #[test]
    fn test_map_create_error_missing_parent() {
        let err = map_create_error(TransportError::not_found("p9"), "d", &oid("p9"), "Books");
        match err {
            MtpError::Create { message, name, .. } => {
                assert_eq!(name, "Books");
                assert!(message.contains("parent folder doesn't exist"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
