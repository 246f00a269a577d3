//! Depth-first walk of a storage's object tree.
//!
//! For each folder, all direct children are reported to the visitor first, then the subfolders
//! the visitor approved are descended into in listing order. A parent is therefore always
//! reported before its children, and each subtree finishes before the next sibling's starts.
//!
//! Failure scoping:
//! - Bulk request fails: that folder and everything below it falls back to per-object mode.
//! - One child's metadata fails: logged and skipped.
//! - A folder's listing fails: remembered, the walk goes on, and the first such error is returned.
//! - Device disconnects or the visitor aborts: the walk stops at once.
//! - A folder listed a second time (a device reporting a cycle): reported, not descended into again.

use log::{debug, error, info, warn};
use std::collections::{HashMap, HashSet};

use super::errors::{Aborted, MtpError, map_query_error};
use super::{DeviceHandle, EnumerationStrategy};
use crate::mtp::transport::DeviceSession;
use crate::mtp::types::{ObjectId, ObjectMetadata};

/// A folder waiting to be listed.
struct PendingFolder {
    id: ObjectId,
    /// Depth of the folder's children.
    depth: usize,
    strategy: EnumerationStrategy,
}

/// Mutable state of one `enumerate` call.
struct Walk<'a, F> {
    device_id: &'a str,
    session: &'a mut dyn DeviceSession,
    visitor: F,
    visited: usize,
    skipped: usize,
    fallbacks: usize,
    /// Every folder ever pushed on the stack, the root included.
    queued: HashSet<ObjectId>,
    first_error: Option<MtpError>,
}

impl<F> Walk<'_, F>
where
    F: FnMut(&ObjectMetadata, usize) -> Result<bool, Aborted>,
{
    fn run(&mut self, root: &ObjectId, strategy: EnumerationStrategy) -> Result<(), MtpError> {
        self.queued.insert(root.clone());
        let mut stack = vec![PendingFolder {
            id: root.clone(),
            depth: 0,
            strategy,
        }];

        while let Some(folder) = stack.pop() {
            let Some((children, strategy)) = self.list(&folder)? else {
                continue;
            };

            let mut approved = Vec::new();
            for child in &children {
                let recurse = (self.visitor)(child, folder.depth).map_err(|aborted| MtpError::Cancelled {
                    device_id: self.device_id.to_string(),
                    operation: "enumerate".to_string(),
                    reason: aborted.reason,
                })?;
                self.visited += 1;
                if !child.is_folder || !recurse {
                    continue;
                }
                if self.queued.insert(child.id.clone()) {
                    approved.push(child.id.clone());
                } else {
                    warn!(
                        "Folder {} on {} was already listed, not descending again (cycle in device tree?)",
                        child.id, self.device_id
                    );
                }
            }

            // Reversed so the first approved folder is popped next
            stack.extend(approved.into_iter().rev().map(|id| PendingFolder {
                id,
                depth: folder.depth + 1,
                strategy,
            }));
        }

        Ok(())
    }

    /// Returns the children of a folder and the strategy its subfolders inherit.
    ///
    /// `Ok(None)` means listing failed and the error was recorded. `Err` stops the walk.
    fn list(
        &mut self,
        folder: &PendingFolder,
    ) -> Result<Option<(Vec<ObjectMetadata>, EnumerationStrategy)>, MtpError> {
        if folder.strategy == EnumerationStrategy::Bulk {
            match self.session.query_metadata_bulk(&folder.id) {
                Ok(children) => return Ok(Some((children, EnumerationStrategy::Bulk))),
                Err(e) if e.is_disconnect() => return Err(map_query_error(e, self.device_id, &folder.id)),
                Err(e) => {
                    warn!(
                        "Bulk listing of {} on {} failed, falling back to per-object queries for this subtree: {}",
                        folder.id, self.device_id, e
                    );
                    self.fallbacks += 1;
                }
            }
        }

        let ids = match self.session.query_children(&folder.id) {
            Ok(ids) => ids,
            Err(e) if e.is_disconnect() => return Err(map_query_error(e, self.device_id, &folder.id)),
            Err(e) => {
                error!("Listing {} on {} failed: {}", folder.id, self.device_id, e);
                if self.first_error.is_none() {
                    self.first_error = Some(map_query_error(e, self.device_id, &folder.id));
                }
                return Ok(None);
            }
        };

        let mut children = Vec::with_capacity(ids.len());
        for id in ids {
            match self.session.query_metadata(&id) {
                Ok(metadata) => children.push(metadata),
                Err(e) if e.is_disconnect() => return Err(map_query_error(e, self.device_id, &id)),
                Err(e) => {
                    warn!("Skipping {} on {}: metadata query failed: {}", id, self.device_id, e);
                    self.skipped += 1;
                }
            }
        }
        Ok(Some((children, EnumerationStrategy::PerObject)))
    }
}

impl DeviceHandle {
    /// Walks the tree under `storage_root`, calling `visitor(metadata, depth)` once per object.
    ///
    /// Direct children of the root are at depth 0. For folders the visitor's return value is a
    /// recursion vote: `false` prunes that subtree. Votes on files are ignored. Returning
    /// `Err(Aborted)` stops the walk with `MtpError::Cancelled` and leaves the handle usable.
    pub fn enumerate<F>(&mut self, storage_root: &ObjectId, visitor: F) -> Result<(), MtpError>
    where
        F: FnMut(&ObjectMetadata, usize) -> Result<bool, Aborted>,
    {
        let strategy = self.strategy;
        let (device_id, session) = self.session_parts()?;
        info!("Enumerating {} on {} (strategy={:?})", storage_root, device_id, strategy);

        let mut walk = Walk {
            device_id,
            session,
            visitor,
            visited: 0,
            skipped: 0,
            fallbacks: 0,
            queued: HashSet::new(),
            first_error: None,
        };
        let result = walk.run(storage_root, strategy);

        info!(
            "Enumeration of {} on {} ended: visited={}, skipped={}, bulk_fallbacks={}, ok={}",
            storage_root,
            device_id,
            walk.visited,
            walk.skipped,
            walk.fallbacks,
            result.is_ok() && walk.first_error.is_none()
        );

        result?;
        match walk.first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Like [`enumerate`](Self::enumerate), and also returns every visited object keyed by id.
    pub fn filesystem<F>(
        &mut self,
        storage_root: &ObjectId,
        mut visitor: F,
    ) -> Result<HashMap<ObjectId, ObjectMetadata>, MtpError>
    where
        F: FnMut(&ObjectMetadata, usize) -> Result<bool, Aborted>,
    {
        let mut objects = HashMap::new();
        self.enumerate(storage_root, |metadata, depth| {
            let recurse = visitor(metadata, depth)?;
            objects.insert(metadata.id.clone(), metadata.clone());
            Ok(recurse)
        })?;
        debug!("Filesystem snapshot of {}: {} objects", storage_root, objects.len());
        Ok(objects)
    }
}
