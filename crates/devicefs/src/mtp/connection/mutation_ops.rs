//! Object lifecycle operations: create folder and delete.

use log::{debug, info};

use super::DeviceHandle;
use super::errors::{MtpError, map_create_error, map_delete_error, map_query_error};
use crate::mtp::transport::TransportErrorKind;
use crate::mtp::types::{ObjectId, ObjectMetadata};

impl DeviceHandle {
    /// Creates a folder named `name` under `parent_id` and returns its metadata.
    ///
    /// Fails with `Create` if the parent doesn't exist or the device rejects the name.
    pub fn create_folder(&mut self, parent_id: &ObjectId, name: &str) -> Result<ObjectMetadata, MtpError> {
        let (device_id, session) = self.session_parts()?;
        debug!("create_folder: device={}, parent={}, name={}", device_id, parent_id, name);

        if name.is_empty() || name.contains('/') {
            return Err(MtpError::Create {
                device_id: device_id.to_string(),
                parent_id: parent_id.to_string(),
                name: name.to_string(),
                message: "invalid folder name".to_string(),
            });
        }

        let new_id = session
            .create_child(parent_id, name)
            .map_err(|e| map_create_error(e, device_id, parent_id, name))?;
        let metadata = session
            .query_metadata(&new_id)
            .map_err(|e| map_query_error(e, device_id, &new_id))?;

        info!("Created folder {} in {} on {} as {}", name, parent_id, device_id, new_id);
        Ok(metadata)
    }

    /// Deletes one file or empty folder.
    ///
    /// Never recurses: a folder with children fails with `FolderNotEmpty` and is left untouched.
    /// Deleting an object that is already gone succeeds.
    pub fn delete_object(&mut self, object_id: &ObjectId) -> Result<(), MtpError> {
        let (device_id, session) = self.session_parts()?;
        debug!("delete_object: device={}, object={}", device_id, object_id);

        let metadata = match session.query_metadata(object_id) {
            Ok(metadata) => metadata,
            Err(e) if e.kind == TransportErrorKind::NotFound => {
                debug!("delete_object: {} is already gone", object_id);
                return Ok(());
            }
            Err(e) => return Err(map_delete_error(e, device_id, object_id)),
        };

        if metadata.is_folder {
            let children = session
                .query_children(object_id)
                .map_err(|e| map_delete_error(e, device_id, object_id))?;
            if !children.is_empty() {
                debug!(
                    "delete_object: refusing to delete {} ({} children)",
                    object_id,
                    children.len()
                );
                return Err(MtpError::FolderNotEmpty {
                    device_id: device_id.to_string(),
                    object_id: object_id.to_string(),
                });
            }
        }

        match session.delete(object_id) {
            Ok(()) => {}
            Err(e) if e.kind == TransportErrorKind::NotFound => {
                debug!("delete_object: {} vanished before delete", object_id);
            }
            Err(e) => return Err(map_delete_error(e, device_id, object_id)),
        }

        info!("Deleted {} ({}) on {}", metadata.name, object_id, device_id);
        Ok(())
    }
}
