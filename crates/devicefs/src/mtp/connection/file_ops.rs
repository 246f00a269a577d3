//! Chunked file transfers (download and upload) with progress reporting.

use log::{debug, info, warn};
use std::io::{self, Read, Write};

use super::DeviceHandle;
use super::errors::{Aborted, MtpError, map_query_error, map_transfer_error};
use crate::mtp::transport::{DeviceSession, NewObject, UploadId};
use crate::mtp::types::{ObjectId, ObjectMetadata};

/// Progress callback for transfers.
/// Called after each chunk with (bytes_moved_so_far, total_bytes). Returning `Err` cancels the transfer.
///
/// The same pair may arrive more than once (uploads repeat the final pair after commit).
pub type TransferProgressFn<'a> = &'a mut dyn FnMut(u64, u64) -> Result<(), Aborted>;

/// Bytes moved per device round trip (256 KiB).
pub const TRANSFER_CHUNK_SIZE: usize = 256 * 1024;

/// Progress reporting for one transfer.
struct Progress<'a, 'f> {
    callback: Option<TransferProgressFn<'f>>,
    total: u64,
    device_id: &'a str,
    operation: &'static str,
}

impl Progress<'_, '_> {
    fn report(&mut self, done: u64) -> Result<(), MtpError> {
        let Some(callback) = self.callback.as_mut() else {
            return Ok(());
        };
        callback(done, self.total).map_err(|aborted| {
            info!(
                "{} on {} cancelled by caller at {}/{} bytes",
                self.operation, self.device_id, done, self.total
            );
            MtpError::Cancelled {
                device_id: self.device_id.to_string(),
                operation: self.operation.to_string(),
                reason: aborted.reason,
            }
        })
    }
}

/// Reads until `buf` is full or the source is exhausted.
fn read_full<R: Read + ?Sized>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn local_io_error(device_id: &str, object_id: &ObjectId, what: &str, e: io::Error) -> MtpError {
    MtpError::Transfer {
        device_id: device_id.to_string(),
        object_id: object_id.to_string(),
        message: format!("{}: {}", what, e),
    }
}

impl DeviceHandle {
    /// Streams an object's content into `sink`.
    ///
    /// Returns the number of bytes written. Fails with `IncompleteTransfer` if the device delivers
    /// fewer or more bytes than the object's declared size. The sink is flushed on success.
    pub fn get_file<W: Write + ?Sized>(
        &mut self,
        object_id: &ObjectId,
        sink: &mut W,
        progress: Option<TransferProgressFn<'_>>,
    ) -> Result<u64, MtpError> {
        let (device_id, session) = self.session_parts()?;
        debug!("get_file: device={}, object={}", device_id, object_id);

        let metadata = session
            .query_metadata(object_id)
            .map_err(|e| map_query_error(e, device_id, object_id))?;
        if metadata.is_folder {
            return Err(MtpError::Transfer {
                device_id: device_id.to_string(),
                object_id: object_id.to_string(),
                message: format!("{} is a folder", metadata.name),
            });
        }

        let total = metadata.size;
        let mut progress = Progress {
            callback: progress,
            total,
            device_id,
            operation: "get_file",
        };
        let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE];
        let mut done = 0u64;

        loop {
            let read = session
                .read_chunk(object_id, done, &mut buf)
                .map_err(|e| map_transfer_error(e, device_id, object_id))?;
            if read == 0 {
                break;
            }
            if read > buf.len() || done + read as u64 > total {
                return Err(MtpError::IncompleteTransfer {
                    device_id: device_id.to_string(),
                    object_id: object_id.to_string(),
                    expected: total,
                    actual: done + read as u64,
                });
            }

            sink.write_all(&buf[..read])
                .map_err(|e| local_io_error(device_id, object_id, "Failed to write to sink", e))?;
            done += read as u64;
            progress.report(done)?;
        }

        if done != total {
            return Err(MtpError::IncompleteTransfer {
                device_id: device_id.to_string(),
                object_id: object_id.to_string(),
                expected: total,
                actual: done,
            });
        }

        sink.flush()
            .map_err(|e| local_io_error(device_id, object_id, "Failed to flush sink", e))?;

        if total == 0 {
            progress.report(0)?;
        }

        info!("Downloaded {} ({} bytes) from {}", metadata.name, done, device_id);
        Ok(done)
    }

    /// Creates a file named `name` under `parent_id` from exactly `size` bytes of `source`.
    ///
    /// The upload is staged and only becomes visible on commit. On any failure before commit the
    /// staged object is reverted (best effort) and no compensating delete is issued. After commit,
    /// progress is reported once more with the final pair, then the new object's metadata is read.
    /// Cancelling from that final callback has no effect as the file already exists.
    pub fn put_file<R: Read + ?Sized>(
        &mut self,
        parent_id: &ObjectId,
        name: &str,
        source: &mut R,
        size: u64,
        progress: Option<TransferProgressFn<'_>>,
    ) -> Result<ObjectMetadata, MtpError> {
        let (device_id, session) = self.session_parts()?;
        let target = ObjectId::from(format!("{}/{}", parent_id, name));
        debug!("put_file: device={}, target={}, size={}", device_id, target, size);

        if name.is_empty() || name.contains('/') {
            return Err(MtpError::Transfer {
                device_id: device_id.to_string(),
                object_id: target.to_string(),
                message: format!("invalid file name: {:?}", name),
            });
        }

        let upload = session
            .begin_upload(&NewObject {
                parent_id: parent_id.clone(),
                name: name.to_string(),
                size,
            })
            .map_err(|e| map_transfer_error(e, device_id, &target))?;

        let mut progress = Progress {
            callback: progress,
            total: size,
            device_id,
            operation: "put_file",
        };

        let committed = write_upload(session, upload, source, size, &mut progress, &target).and_then(|()| {
            session
                .commit_upload(upload)
                .map_err(|e| map_transfer_error(e, device_id, &target))
        });
        let new_id = match committed {
            Ok(id) => id,
            Err(err) => {
                if let Err(abort_err) = session.abort_upload(upload) {
                    warn!("Failed to revert staged upload of {} on {}: {}", target, device_id, abort_err);
                }
                return Err(err);
            }
        };

        if let Err(MtpError::Cancelled { .. }) = progress.report(size) {
            debug!("put_file: ignoring cancel after commit of {}", new_id);
        }

        let metadata = session
            .query_metadata(&new_id)
            .map_err(|e| map_query_error(e, device_id, &new_id))?;
        info!("Uploaded {} ({} bytes) to {} as {}", name, size, device_id, new_id);
        Ok(metadata)
    }
}

/// Feeds `source` to a staged upload, chunk by chunk.
///
/// A device may accept only part of a chunk; the rest is offered again at the new offset.
fn write_upload<R: Read + ?Sized>(
    session: &mut dyn DeviceSession,
    upload: UploadId,
    source: &mut R,
    size: u64,
    progress: &mut Progress<'_, '_>,
    target: &ObjectId,
) -> Result<(), MtpError> {
    let device_id = progress.device_id;
    let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE];
    let mut done = 0u64;

    loop {
        let read =
            read_full(source, &mut buf).map_err(|e| local_io_error(device_id, target, "Failed to read source", e))?;
        if read == 0 {
            break;
        }
        if done + read as u64 > size {
            return Err(MtpError::Transfer {
                device_id: device_id.to_string(),
                object_id: target.to_string(),
                message: format!("source holds more than the declared {} bytes", size),
            });
        }

        let mut sent = 0;
        while sent < read {
            let written = session
                .write_chunk(upload, done, &buf[sent..read])
                .map_err(|e| map_transfer_error(e, device_id, target))?;
            if written == 0 {
                return Err(MtpError::Transfer {
                    device_id: device_id.to_string(),
                    object_id: target.to_string(),
                    message: format!("device accepted no bytes at offset {}", done),
                });
            }
            let written = written.min(read - sent);
            sent += written;
            done += written as u64;
            progress.report(done)?;
        }
    }

    if done != size {
        return Err(MtpError::IncompleteTransfer {
            device_id: device_id.to_string(),
            object_id: target.to_string(),
            expected: size,
            actual: done,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Hands out at most `step` bytes per read.
    struct Trickle {
        data: Cursor<Vec<u8>>,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let len = buf.len().min(self.step);
            self.data.read(&mut buf[..len])
        }
    }

    #[test]
    fn test_read_full_fills_buffer_from_trickling_source() {
        let mut source = Trickle {
            data: Cursor::new(vec![7u8; 10]),
            step: 3,
        };
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut source, &mut buf).unwrap(), 8);
        assert_eq!(read_full(&mut source, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut source, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_progress_without_callback_is_noop() {
        let mut progress = Progress {
            callback: None,
            total: 10,
            device_id: "d",
            operation: "get_file",
        };
        assert!(progress.report(5).is_ok());
    }

    #[test]
    fn test_progress_abort_becomes_cancelled() {
        let mut stop = |_done: u64, _total: u64| -> Result<(), Aborted> { Err(Aborted::new("stop")) };
        let mut progress = Progress {
            callback: Some(&mut stop),
            total: 10,
            device_id: "d",
            operation: "put_file",
        };
        let err = progress.report(5).unwrap_err();
        assert_eq!(
            err,
            MtpError::Cancelled {
                device_id: "d".to_string(),
                operation: "put_file".to_string(),
                reason: Some("stop".to_string()),
            }
        );
    }

    #[test]
    fn test_chunk_size_is_reasonable() {
        assert!(TRANSFER_CHUNK_SIZE >= 16 * 1024);
        assert!(TRANSFER_CHUNK_SIZE <= 4 * 1024 * 1024);
    }
}
