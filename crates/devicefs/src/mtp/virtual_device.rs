//! In-memory portable device.
//!
//! Implements both `Transport` and `DeviceSession` over a shared tree, so a test can keep a
//! `VirtualDevice` around, open a handle on it, and inspect the tree afterwards. Faults are
//! injected per object or per folder: failing bulk requests, failing metadata queries, failing
//! listings, busy objects, short reads, partial writes, and a disconnect after N round trips.

use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use super::transport::{DeviceSession, NewObject, Transport, TransportError, TransportErrorKind, UploadId};
use super::types::{DeviceDescriptor, DeviceKind, DeviceSummary, ObjectId, ObjectMetadata, StorageInfo, StorageType};
use crate::config::ClientInfo;
use crate::ignore_poison::IgnorePoison;

/// Timestamp given to objects created through a session.
const CREATED_AT: u64 = 1_700_000_000;

struct Node {
    metadata: ObjectMetadata,
    content: Vec<u8>,
}

struct StagedUpload {
    object: NewObject,
    data: Vec<u8>,
}

#[derive(Default)]
struct Faults {
    connect: Option<TransportErrorKind>,
    summary: Option<TransportErrorKind>,
    storage_query: Option<String>,
    bulk: HashSet<ObjectId>,
    metadata: HashSet<ObjectId>,
    listing: HashSet<ObjectId>,
    busy: HashSet<ObjectId>,
    disconnect_after: Option<usize>,
    max_read: Option<usize>,
    max_write: Option<usize>,
    /// Object id -> size reported in metadata instead of the real one.
    declared_sizes: HashMap<ObjectId, u64>,
}

#[derive(Default)]
struct Counters {
    round_trips: usize,
    bulk_requests: usize,
    listing_requests: usize,
    metadata_requests: usize,
    read_requests: usize,
    write_requests: usize,
    aborted_uploads: usize,
    closes: usize,
}

struct State {
    device_id: String,
    summary: DeviceSummary,
    supports_bulk: bool,
    storages: Vec<StorageInfo>,
    nodes: HashMap<ObjectId, Node>,
    /// Listing order of every folder and storage root.
    children: HashMap<ObjectId, Vec<ObjectId>>,
    uploads: HashMap<UploadId, StagedUpload>,
    next_object: u64,
    next_upload: u64,
    disconnected: bool,
    last_client: Option<ClientInfo>,
    faults: Faults,
    counters: Counters,
}

impl State {
    /// Accounts for one round trip and fails if the device is (now) gone.
    fn round_trip(&mut self) -> Result<(), TransportError> {
        self.counters.round_trips += 1;
        if let Some(limit) = self.faults.disconnect_after
            && self.counters.round_trips > limit
        {
            self.disconnected = true;
        }
        if self.disconnected {
            return Err(TransportError::disconnected());
        }
        Ok(())
    }

    fn is_storage(&self, id: &ObjectId) -> bool {
        self.storages.iter().any(|s| &s.id == id)
    }

    fn is_container(&self, id: &ObjectId) -> bool {
        self.is_storage(id) || self.nodes.get(id).is_some_and(|n| n.metadata.is_folder)
    }

    /// Storage root an object lives on.
    fn storage_of(&self, id: &ObjectId) -> Option<ObjectId> {
        let mut current = id.clone();
        loop {
            if self.is_storage(&current) {
                return Some(current);
            }
            current = self.nodes.get(&current)?.metadata.parent_id.clone()?;
        }
    }

    fn storage_mut(&mut self, id: &ObjectId) -> Option<&mut StorageInfo> {
        self.storages.iter_mut().find(|s| &s.id == id)
    }

    fn metadata(&self, id: &ObjectId) -> Result<ObjectMetadata, TransportError> {
        if self.faults.metadata.contains(id) {
            return Err(TransportError::other(format!("property read failed for {}", id)));
        }
        if let Some(storage) = self.storages.iter().find(|s| &s.id == id) {
            let mut root = ObjectMetadata::folder(storage.id.clone(), storage.id.clone(), storage.display_name());
            root.parent_id = None;
            root.can_delete = false;
            return Ok(root);
        }
        let node = self.nodes.get(id).ok_or_else(|| TransportError::not_found(id.as_str()))?;
        let mut metadata = node.metadata.clone();
        if let Some(size) = self.faults.declared_sizes.get(id) {
            metadata.size = *size;
        }
        Ok(metadata)
    }

    fn child_ids(&self, folder_id: &ObjectId) -> Result<Vec<ObjectId>, TransportError> {
        if !self.is_container(folder_id) {
            return Err(TransportError::not_found(folder_id.as_str()));
        }
        Ok(self.children.get(folder_id).cloned().unwrap_or_default())
    }

    fn name_taken(&self, parent_id: &ObjectId, name: &str) -> bool {
        self.children
            .get(parent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
            .any(|n| n.metadata.name == name)
    }

    fn new_object_id(&mut self) -> ObjectId {
        self.next_object += 1;
        ObjectId::new(format!("o{}", self.next_object))
    }

    fn insert(&mut self, metadata: ObjectMetadata, content: Vec<u8>) {
        let id = metadata.id.clone();
        if let Some(parent) = &metadata.parent_id {
            self.children.entry(parent.clone()).or_default().push(id.clone());
        }
        if metadata.is_folder {
            self.children.entry(id.clone()).or_default();
        }
        self.nodes.insert(id, Node { metadata, content });
    }

    fn remove(&mut self, id: &ObjectId) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        if let Some(parent) = &node.metadata.parent_id
            && let Some(siblings) = self.children.get_mut(parent)
        {
            siblings.retain(|c| c != id);
        }
        self.children.remove(id);
        Some(node)
    }
}

/// In-memory device with fault injection. Cloning shares the same tree.
#[derive(Clone)]
pub struct VirtualDevice {
    state: Arc<Mutex<State>>,
}

impl VirtualDevice {
    /// Creates a device with no storages. Bulk retrieval is off until `with_bulk(true)`.
    pub fn new(device_id: &str) -> Self {
        let summary = DeviceSummary {
            protocol: Some("MTP: 1.00".to_string()),
            kind: DeviceKind::Generic,
            friendly_name: Some("Virtual device".to_string()),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(State {
                device_id: device_id.to_string(),
                summary,
                supports_bulk: false,
                storages: Vec::new(),
                nodes: HashMap::new(),
                children: HashMap::new(),
                uploads: HashMap::new(),
                next_object: 0,
                next_upload: 0,
                disconnected: false,
                last_client: None,
                faults: Faults::default(),
                counters: Counters::default(),
            })),
        }
    }

    pub fn with_bulk(self, supported: bool) -> Self {
        self.state.lock_ignore_poison().supports_bulk = supported;
        self
    }

    pub fn with_model(self, model: &str) -> Self {
        self.state.lock_ignore_poison().summary.model = Some(model.to_string());
        self
    }

    pub fn with_manufacturer(self, manufacturer: &str) -> Self {
        self.state.lock_ignore_poison().summary.manufacturer = Some(manufacturer.to_string());
        self
    }

    pub fn with_kind(self, kind: DeviceKind) -> Self {
        self.state.lock_ignore_poison().summary.kind = kind;
        self
    }

    // ========================================================================
    // Tree setup
    // ========================================================================

    pub fn add_storage(&self, id: &str, description: &str, capacity: u64, free_space: u64) {
        let mut state = self.state.lock_ignore_poison();
        let id = ObjectId::from(id);
        state.children.entry(id.clone()).or_default();
        state.storages.push(StorageInfo {
            id,
            name: None,
            description: Some(description.to_string()),
            filesystem: Some("FAT32".to_string()),
            storage_type: StorageType::FixedRam,
            capacity,
            free_space,
            capacity_objects: 0,
            free_objects: 0,
            read_write: true,
        });
    }

    pub fn add_folder(&self, id: &str, parent_id: &str, name: &str) {
        let metadata = ObjectMetadata::folder(id, parent_id, name);
        self.state.lock_ignore_poison().insert(metadata, Vec::new());
    }

    pub fn add_file(&self, id: &str, parent_id: &str, name: &str, content: &[u8]) {
        let metadata = ObjectMetadata::file(id, parent_id, name, content.len() as u64);
        self.state.lock_ignore_poison().insert(metadata, content.to_vec());
    }

    pub fn set_free_space(&self, storage_id: &str, free_space: u64) {
        let mut state = self.state.lock_ignore_poison();
        if let Some(storage) = state.storage_mut(&ObjectId::from(storage_id)) {
            storage.free_space = free_space;
        }
    }

    // ========================================================================
    // Fault injection
    // ========================================================================

    /// Makes `connect` fail.
    pub fn fail_connect(&self, kind: TransportErrorKind) {
        self.state.lock_ignore_poison().faults.connect = Some(kind);
    }

    /// Makes `device_summary` fail.
    pub fn fail_summary(&self, kind: TransportErrorKind) {
        self.state.lock_ignore_poison().faults.summary = Some(kind);
    }

    /// Makes the storage list unreadable. The summary still arrives, with `storage_error` set.
    pub fn fail_storage_query(&self, message: &str) {
        self.state.lock_ignore_poison().faults.storage_query = Some(message.to_string());
    }

    pub fn fail_bulk(&self, folder_id: &str) {
        self.state.lock_ignore_poison().faults.bulk.insert(ObjectId::from(folder_id));
    }

    /// Makes both single and bulk metadata reads involving `object_id` fail.
    pub fn fail_metadata(&self, object_id: &str) {
        self.state.lock_ignore_poison().faults.metadata.insert(ObjectId::from(object_id));
    }

    pub fn fail_listing(&self, folder_id: &str) {
        self.state.lock_ignore_poison().faults.listing.insert(ObjectId::from(folder_id));
    }

    pub fn set_busy(&self, object_id: &str) {
        self.state.lock_ignore_poison().faults.busy.insert(ObjectId::from(object_id));
    }

    /// Every round trip after the first `round_trips` fails with a disconnect.
    pub fn disconnect_after(&self, round_trips: usize) {
        self.state.lock_ignore_poison().faults.disconnect_after = Some(round_trips);
    }

    /// Caps bytes returned per `read_chunk`.
    pub fn limit_reads(&self, max_bytes: usize) {
        self.state.lock_ignore_poison().faults.max_read = Some(max_bytes);
    }

    /// Caps bytes accepted per `write_chunk`.
    pub fn limit_writes(&self, max_bytes: usize) {
        self.state.lock_ignore_poison().faults.max_write = Some(max_bytes);
    }

    /// Also lists an existing object under `folder_id`, the way a confused device can report one
    /// object in two places or a folder inside itself.
    pub fn link_child(&self, folder_id: &str, child_id: &str) {
        self.state
            .lock_ignore_poison()
            .children
            .entry(ObjectId::from(folder_id))
            .or_default()
            .push(ObjectId::from(child_id));
    }

    /// Reports `size` in the object's metadata while keeping the real content.
    pub fn misreport_size(&self, object_id: &str, size: u64) {
        self.state
            .lock_ignore_poison()
            .faults
            .declared_sizes
            .insert(ObjectId::from(object_id), size);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn object(&self, object_id: &str) -> Option<ObjectMetadata> {
        let state = self.state.lock_ignore_poison();
        state.nodes.get(&ObjectId::from(object_id)).map(|n| n.metadata.clone())
    }

    pub fn content(&self, object_id: &str) -> Option<Vec<u8>> {
        let state = self.state.lock_ignore_poison();
        state.nodes.get(&ObjectId::from(object_id)).map(|n| n.content.clone())
    }

    /// Ids of a folder's children in listing order.
    pub fn children(&self, folder_id: &str) -> Vec<ObjectId> {
        let state = self.state.lock_ignore_poison();
        state.children.get(&ObjectId::from(folder_id)).cloned().unwrap_or_default()
    }

    pub fn free_space(&self, storage_id: &str) -> Option<u64> {
        let state = self.state.lock_ignore_poison();
        let id = ObjectId::from(storage_id);
        state.storages.iter().find(|s| s.id == id).map(|s| s.free_space)
    }

    pub fn round_trips(&self) -> usize {
        self.state.lock_ignore_poison().counters.round_trips
    }

    pub fn bulk_requests(&self) -> usize {
        self.state.lock_ignore_poison().counters.bulk_requests
    }

    pub fn listing_requests(&self) -> usize {
        self.state.lock_ignore_poison().counters.listing_requests
    }

    pub fn metadata_requests(&self) -> usize {
        self.state.lock_ignore_poison().counters.metadata_requests
    }

    pub fn read_requests(&self) -> usize {
        self.state.lock_ignore_poison().counters.read_requests
    }

    pub fn write_requests(&self) -> usize {
        self.state.lock_ignore_poison().counters.write_requests
    }

    pub fn pending_uploads(&self) -> usize {
        self.state.lock_ignore_poison().uploads.len()
    }

    pub fn aborted_uploads(&self) -> usize {
        self.state.lock_ignore_poison().counters.aborted_uploads
    }

    pub fn close_count(&self) -> usize {
        self.state.lock_ignore_poison().counters.closes
    }

    /// Client info passed to the last successful `connect`.
    pub fn last_client(&self) -> Option<ClientInfo> {
        self.state.lock_ignore_poison().last_client.clone()
    }
}

impl Transport for VirtualDevice {
    fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let state = self.state.lock_ignore_poison();
        Ok(vec![DeviceDescriptor {
            id: state.device_id.clone(),
            manufacturer: state.summary.manufacturer.clone(),
            product: state.summary.model.clone(),
            serial_number: state.summary.serial_number.clone(),
        }])
    }

    fn connect(&self, device_id: &str, client: &ClientInfo) -> Result<Box<dyn DeviceSession>, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        if device_id != state.device_id {
            return Err(TransportError::not_found(format!("no device {}", device_id)));
        }
        if let Some(kind) = state.faults.connect {
            return Err(TransportError::new(kind, "connection refused"));
        }
        debug!("Virtual device {} connected by {}", device_id, client.name);
        state.last_client = Some(client.clone());
        drop(state);
        Ok(Box::new(self.clone()))
    }
}

impl DeviceSession for VirtualDevice {
    fn device_summary(&mut self) -> Result<DeviceSummary, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        if let Some(kind) = state.faults.summary {
            return Err(TransportError::new(kind, "device properties unavailable"));
        }
        let mut summary = state.summary.clone();
        match &state.faults.storage_query {
            Some(message) => {
                summary.storages = Vec::new();
                summary.storage_error = Some(message.clone());
                summary.has_storage = true;
            }
            None => {
                summary.storages = state.storages.clone();
                summary.has_storage = !state.storages.is_empty();
            }
        }
        summary.supports_bulk_properties = state.supports_bulk;
        Ok(summary)
    }

    fn supports_bulk_properties(&self) -> bool {
        self.state.lock_ignore_poison().supports_bulk
    }

    fn query_children(&mut self, folder_id: &ObjectId) -> Result<Vec<ObjectId>, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        state.counters.listing_requests += 1;
        if state.faults.listing.contains(folder_id) {
            return Err(TransportError::other(format!("cannot enumerate {}", folder_id)));
        }
        state.child_ids(folder_id)
    }

    fn query_metadata(&mut self, object_id: &ObjectId) -> Result<ObjectMetadata, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        state.counters.metadata_requests += 1;
        state.metadata(object_id)
    }

    fn query_metadata_bulk(&mut self, folder_id: &ObjectId) -> Result<Vec<ObjectMetadata>, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        if !state.supports_bulk {
            return Err(TransportError::unsupported("bulk property retrieval"));
        }
        state.round_trip()?;
        state.counters.bulk_requests += 1;
        if state.faults.bulk.contains(folder_id) {
            return Err(TransportError::other(format!("bulk read of {} failed", folder_id)));
        }
        state
            .child_ids(folder_id)?
            .iter()
            .map(|id| state.metadata(id))
            .collect()
    }

    fn read_chunk(&mut self, object_id: &ObjectId, offset: u64, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        state.counters.read_requests += 1;
        if state.faults.busy.contains(object_id) {
            return Err(TransportError::new(TransportErrorKind::Busy, "object in use"));
        }
        let limit = state.faults.max_read.unwrap_or(usize::MAX);
        let node = state
            .nodes
            .get(object_id)
            .ok_or_else(|| TransportError::not_found(object_id.as_str()))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(node.content.len());
        let len = (node.content.len() - start).min(buf.len()).min(limit);
        buf[..len].copy_from_slice(&node.content[start..start + len]);
        Ok(len)
    }

    fn begin_upload(&mut self, object: &NewObject) -> Result<UploadId, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        if !state.is_container(&object.parent_id) {
            return Err(TransportError::not_found(format!("parent {}", object.parent_id)));
        }
        if state.name_taken(&object.parent_id, &object.name) {
            return Err(TransportError::other(format!("{} already exists", object.name)));
        }
        let free = state
            .storage_of(&object.parent_id)
            .and_then(|s| state.storages.iter().find(|st| st.id == s).map(|st| st.free_space))
            .unwrap_or(0);
        if object.size > free {
            return Err(TransportError::new(
                TransportErrorKind::StorageFull,
                format!("{} bytes needed, {} free", object.size, free),
            ));
        }
        state.next_upload += 1;
        let upload = UploadId(state.next_upload);
        state.uploads.insert(
            upload,
            StagedUpload {
                object: object.clone(),
                data: Vec::new(),
            },
        );
        Ok(upload)
    }

    fn write_chunk(&mut self, upload: UploadId, offset: u64, data: &[u8]) -> Result<usize, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        state.counters.write_requests += 1;
        let limit = state.faults.max_write.unwrap_or(usize::MAX);
        let staged = state
            .uploads
            .get_mut(&upload)
            .ok_or_else(|| TransportError::not_found(format!("upload {}", upload.0)))?;
        if offset != staged.data.len() as u64 {
            return Err(TransportError::other(format!(
                "write at {} but {} bytes staged",
                offset,
                staged.data.len()
            )));
        }
        let accepted = data.len().min(limit);
        if staged.data.len() as u64 + accepted as u64 > staged.object.size {
            return Err(TransportError::other("write past declared size"));
        }
        staged.data.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn commit_upload(&mut self, upload: UploadId) -> Result<ObjectId, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        let staged = state
            .uploads
            .get(&upload)
            .ok_or_else(|| TransportError::not_found(format!("upload {}", upload.0)))?;
        if staged.data.len() as u64 != staged.object.size {
            return Err(TransportError::other(format!(
                "{} of {} bytes staged",
                staged.data.len(),
                staged.object.size
            )));
        }
        let Some(staged) = state.uploads.remove(&upload) else {
            return Err(TransportError::not_found(format!("upload {}", upload.0)));
        };

        let id = state.new_object_id();
        let mut metadata = ObjectMetadata::file(
            id.clone(),
            staged.object.parent_id.clone(),
            &staged.object.name,
            staged.object.size,
        );
        metadata.created = Some(CREATED_AT);
        metadata.modified = Some(CREATED_AT);
        if let Some(storage_id) = state.storage_of(&staged.object.parent_id)
            && let Some(storage) = state.storage_mut(&storage_id)
        {
            storage.free_space = storage.free_space.saturating_sub(staged.object.size);
        }
        state.insert(metadata, staged.data);
        Ok(id)
    }

    fn abort_upload(&mut self, upload: UploadId) -> Result<(), TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        if state.uploads.remove(&upload).is_some() {
            state.counters.aborted_uploads += 1;
        }
        Ok(())
    }

    fn create_child(&mut self, parent_id: &ObjectId, name: &str) -> Result<ObjectId, TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        if !state.is_container(parent_id) {
            return Err(TransportError::not_found(format!("parent {}", parent_id)));
        }
        if state.name_taken(parent_id, name) {
            return Err(TransportError::other(format!("{} already exists", name)));
        }
        let id = state.new_object_id();
        let mut metadata = ObjectMetadata::folder(id.clone(), parent_id.clone(), name);
        metadata.created = Some(CREATED_AT);
        metadata.modified = Some(CREATED_AT);
        state.insert(metadata, Vec::new());
        Ok(id)
    }

    fn delete(&mut self, object_id: &ObjectId) -> Result<(), TransportError> {
        let mut state = self.state.lock_ignore_poison();
        state.round_trip()?;
        if state.faults.busy.contains(object_id) {
            return Err(TransportError::new(TransportErrorKind::Busy, "object in use"));
        }
        if state.is_storage(object_id) {
            return Err(TransportError::new(TransportErrorKind::AccessDenied, "storage roots can't be deleted"));
        }
        if state.children.get(object_id).is_some_and(|c| !c.is_empty()) {
            return Err(TransportError::new(TransportErrorKind::NotEmpty, "folder has children"));
        }
        let storage_id = state.storage_of(object_id);
        let node = state
            .remove(object_id)
            .ok_or_else(|| TransportError::not_found(object_id.as_str()))?;
        if let Some(storage_id) = storage_id
            && let Some(storage) = state.storage_mut(&storage_id)
        {
            storage.free_space += node.metadata.size;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock_ignore_poison().counters.closes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> VirtualDevice {
        let device = VirtualDevice::new("mtp-1-5").with_bulk(true);
        device.add_storage("s1", "Internal storage", 1_000, 500);
        device.add_folder("f1", "s1", "Books");
        device.add_file("a", "f1", "a.epub", b"hello");
        device
    }

    fn session(device: &VirtualDevice) -> Box<dyn DeviceSession> {
        device.connect("mtp-1-5", &ClientInfo::default()).unwrap()
    }

    #[test]
    fn test_listing_and_metadata() {
        let device = device();
        let mut session = session(&device);
        assert_eq!(session.query_children(&ObjectId::from("s1")).unwrap(), vec![ObjectId::from("f1")]);
        let root = session.query_metadata(&ObjectId::from("s1")).unwrap();
        assert!(root.is_folder);
        assert_eq!(root.parent_id, None);
        let bulk = session.query_metadata_bulk(&ObjectId::from("f1")).unwrap();
        assert_eq!(bulk.len(), 1);
        assert_eq!(bulk[0].size, 5);
    }

    #[test]
    fn test_unknown_object_is_not_found() {
        let device = device();
        let mut session = session(&device);
        let err = session.query_metadata(&ObjectId::from("nope")).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::NotFound);
    }

    #[test]
    fn test_disconnect_after_limit() {
        let device = device();
        let mut session = session(&device);
        device.disconnect_after(1);
        assert!(session.query_children(&ObjectId::from("s1")).is_ok());
        assert!(session.query_children(&ObjectId::from("s1")).unwrap_err().is_disconnect());
        // Stays gone
        assert!(session.query_metadata(&ObjectId::from("f1")).unwrap_err().is_disconnect());
    }

    #[test]
    fn test_delete_rejects_non_empty_folder() {
        let device = device();
        let mut session = session(&device);
        let err = session.delete(&ObjectId::from("f1")).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::NotEmpty);
        assert!(device.object("a").is_some());
    }

    #[test]
    fn test_upload_updates_free_space() {
        let device = device();
        let mut session = session(&device);
        let upload = session
            .begin_upload(&NewObject {
                parent_id: ObjectId::from("f1"),
                name: "b.txt".to_string(),
                size: 3,
            })
            .unwrap();
        assert_eq!(session.write_chunk(upload, 0, b"abc").unwrap(), 3);
        let id = session.commit_upload(upload).unwrap();
        assert_eq!(device.content(id.as_str()).unwrap(), b"abc");
        assert_eq!(device.free_space("s1"), Some(497));
    }

    #[test]
    fn test_upload_larger_than_free_space() {
        let device = device();
        let mut session = session(&device);
        let err = session
            .begin_upload(&NewObject {
                parent_id: ObjectId::from("f1"),
                name: "big.bin".to_string(),
                size: 501,
            })
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::StorageFull);
    }

    #[test]
    fn test_bulk_unsupported() {
        let device = VirtualDevice::new("mtp-1-5");
        device.add_storage("s1", "Internal storage", 1_000, 500);
        let mut session = session(&device);
        let err = session.query_metadata_bulk(&ObjectId::from("s1")).unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Unsupported);
    }
}
