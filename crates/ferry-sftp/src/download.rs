//! Pipelined download
//!
//! Keeps several READ requests in flight at once. The window opens by one
//! request per full-length reply up to `max_pipeline_depth`, drops back to a
//! single request once the expected end of file has been passed and closes
//! on end of file, error or cancellation. Replies are matched to requests by
//! id in whatever order they arrive.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::local::LocalSink;
use crate::protocol::{FileAttrs, OpenFlags, StatusCode, MIN_READ_SIZE};
use crate::wire::{Reply, Request};
use crate::{Client, Error, Result};

/// Outcome of a transfer that ended without error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Bytes written to the sink (download) or acknowledged by the server
    /// (upload)
    pub bytes_transferred: u64,
    /// The transfer stopped early because its cancellation token fired
    pub interrupted: bool,
}

/// A READ on the wire
#[derive(Debug)]
struct PendingRead {
    id: u32,
    offset: u64,
    len: u32,
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Copy the remote file `remote_path` into `sink`
    ///
    /// With `preserve`, the remote permission bits (or `0o666` when the
    /// server sent none) are applied to the sink after a successful
    /// transfer.
    ///
    /// # Errors
    ///
    /// - `Error::NotRegularFile` if the server reports another file type
    /// - `Error::Status` for the first failed READ
    /// - `Error::LocalIo` if the sink rejects a write
    ///
    /// Outstanding requests are always drained and the handle closed before
    /// any of these is returned.
    pub async fn download<S>(
        &mut self,
        remote_path: &str,
        sink: &mut S,
        preserve: bool,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary>
    where
        S: LocalSink + ?Sized,
    {
        let attrs = self.stat(remote_path).await?;
        if attrs.permissions.is_some() && !attrs.is_regular() {
            error!("Cannot download non-regular file: {}", remote_path);
            return Err(Error::NotRegularFile(remote_path.to_string()));
        }
        let mode = attrs.permissions.map_or(0o666, |perm| perm & 0o777);
        let size = attrs.size.unwrap_or(0);

        let handle = self
            .open(remote_path, OpenFlags(OpenFlags::READ), &FileAttrs::default())
            .await?;

        let mut pending: VecDeque<PendingRead> = VecDeque::new();
        let mut buflen = self.transfer_chunk_size;
        let mut max_req: u32 = 1;
        let mut offset: u64 = 0;
        let mut summary = TransferSummary::default();
        let mut read_error: Option<Error> = None;
        let mut write_error: Option<std::io::Error> = None;

        while !pending.is_empty() || max_req > 0 {
            if cancel.is_cancelled() {
                if !summary.interrupted {
                    debug!("Download of \"{}\" cancelled at offset {}", remote_path, offset);
                }
                summary.interrupted = true;
                if pending.is_empty() {
                    break;
                }
                max_req = 0;
            }

            while pending.len() < max_req as usize {
                let id = self
                    .send(&Request::Read {
                        handle: &handle,
                        offset,
                        len: buflen,
                    })
                    .await?;
                trace!(id, offset, len = buflen, "Request range");
                pending.push_back(PendingRead {
                    id,
                    offset,
                    len: buflen,
                });
                offset += u64::from(buflen);
            }

            let reply = self.recv().await?;
            let id = reply.id().unwrap_or_default();
            let Some(index) = pending.iter().position(|req| req.id == id) else {
                error!("Unexpected reply {}", id);
                return Err(reply.unexpected());
            };

            match reply {
                Reply::Status { code, message, .. } => {
                    if code != StatusCode::Eof && read_error.is_none() {
                        error!("Couldn't read from remote file \"{}\": {}", remote_path, code);
                        read_error = Some(Error::Status { code, message });
                    }
                    max_req = 0;
                    pending.remove(index);
                }
                Reply::Data { data, .. } => {
                    let stopped = read_error.is_some() || write_error.is_some();
                    let Some(req) = pending.get_mut(index) else {
                        return Err(Error::Protocol(format!("Lost track of request {}", id)));
                    };
                    let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
                    if len > req.len {
                        return Err(Error::Protocol(format!(
                            "Received more data than asked for {} > {}",
                            len, req.len
                        )));
                    }
                    // Re-requesting an empty block would never make progress
                    if len == 0 {
                        return Err(Error::Protocol(format!(
                            "Received empty data block for request {}",
                            id
                        )));
                    }
                    trace!(id, offset = req.offset, len, "Received data");

                    if !stopped {
                        match sink.write_at(req.offset, &data).await {
                            Ok(()) => summary.bytes_transferred += u64::from(len),
                            Err(e) => {
                                error!("Couldn't write to local file: {}", e);
                                write_error = Some(e);
                                max_req = 0;
                            }
                        }
                    }

                    if len == req.len {
                        pending.remove(index);
                        if max_req > 0 {
                            if size > 0 && offset > size {
                                // One request at a time after the expected end
                                trace!("Finish at {} ({})", offset, pending.len());
                                max_req = 1;
                            } else if max_req < self.max_pipeline_depth {
                                max_req += 1;
                                trace!("New max_req {}", max_req);
                            }
                        }
                    } else if write_error.is_some() || read_error.is_some() || summary.interrupted {
                        pending.remove(index);
                    } else {
                        // Ask again for the bytes the server left out
                        let rest_offset = req.offset + u64::from(len);
                        let rest_len = req.len - len;
                        let new_id = self
                            .send(&Request::Read {
                                handle: &handle,
                                offset: rest_offset,
                                len: rest_len,
                            })
                            .await?;
                        debug!(
                            "Short data block, re-requesting {} -> {} ({})",
                            rest_offset,
                            rest_offset + u64::from(rest_len) - 1,
                            new_id
                        );
                        req.id = new_id;
                        req.offset = rest_offset;
                        req.len = rest_len;

                        if len < buflen {
                            buflen = len.max(MIN_READ_SIZE);
                        }
                    }
                }
                other => return Err(other.unexpected()),
            }
        }

        debug!(
            "Download of \"{}\" finished, {} bytes",
            remote_path, summary.bytes_transferred
        );

        let closed = self.close(handle).await;
        match (read_error, write_error, closed) {
            (_, _, Err(e)) if e.is_fatal() => return Err(e),
            (Some(e), _, _) => return Err(e),
            (None, Some(e), _) => return Err(Error::LocalIo(e)),
            (None, None, Err(e)) => return Err(e),
            (None, None, Ok(())) => {}
        }

        if summary.interrupted {
            info!("Download of \"{}\" interrupted", remote_path);
        }

        if preserve {
            sink.set_mode(mode)
                .await
                .unwrap_or_else(|e| warn!("Couldn't set mode {:o} on local file: {}", mode, e));
        }

        Ok(summary)
    }
}
