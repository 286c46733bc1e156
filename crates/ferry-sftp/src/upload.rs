//! Pipelined upload
//!
//! WRITE requests go out as fast as the source produces chunks. Replies are
//! only collected when the window is full, for the very first write (so an
//! early failure shows up quickly) and once the source is exhausted.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::local::LocalSource;
use crate::protocol::{FileAttrs, MessageType, OpenFlags, StatusCode};
use crate::wire::{Reply, Request};
use crate::{Client, Error, Result, TransferSummary};

/// A WRITE awaiting its STATUS
#[derive(Debug)]
struct PendingWrite {
    id: u32,
    offset: u64,
    len: u32,
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Copy `source` to the remote file `remote_path`, creating or
    /// truncating it
    ///
    /// `attrs` default to the source's own. Size and ownership are never
    /// sent, permissions are reduced to `0o777` and times are only sent with
    /// `preserve`, which also applies the attributes to the open handle
    /// before it is closed.
    pub async fn upload<S>(
        &mut self,
        source: &mut S,
        remote_path: &str,
        attrs: Option<FileAttrs>,
        preserve: bool,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary>
    where
        S: LocalSource + ?Sized,
    {
        let local = source.attrs().await.map_err(|e| {
            error!("Couldn't stat local source for \"{}\": {}", remote_path, e);
            Error::LocalIo(e)
        })?;
        if !local.is_regular() {
            error!("Local source for \"{}\" is not a regular file", remote_path);
            return Err(Error::NotRegularFile(remote_path.to_string()));
        }

        let mut attrs = attrs.unwrap_or(local);
        attrs.size = None;
        attrs.uid = None;
        attrs.gid = None;
        attrs.permissions = attrs.permissions.map(|perm| perm & 0o777);
        if !preserve {
            attrs.atime = None;
            attrs.mtime = None;
        }

        let flags = OpenFlags(OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC);
        let handle = self.open(remote_path, flags, &attrs).await?;

        let mut pending: VecDeque<PendingWrite> = VecDeque::new();
        let mut buf = vec![0u8; self.transfer_chunk_size as usize];
        let mut offset: u64 = 0;
        let mut writes_sent: u64 = 0;
        let mut summary = TransferSummary::default();
        let mut failure: Option<Error> = None;

        loop {
            if cancel.is_cancelled() && !summary.interrupted {
                debug!("Upload to \"{}\" cancelled at offset {}", remote_path, offset);
                summary.interrupted = true;
            }

            // Simulate EOF on cancellation or error
            let len = if summary.interrupted || failure.is_some() {
                0
            } else {
                match source.read_chunk(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        error!("Couldn't read from local source: {}", e);
                        failure = Some(Error::LocalIo(e));
                        0
                    }
                }
            };

            if len > 0 {
                let data = &buf[..len];
                let id = self
                    .send(&Request::Write {
                        handle: &handle,
                        offset,
                        data,
                    })
                    .await?;
                trace!(id, offset, len, "Sent write");
                pending.push_back(PendingWrite {
                    id,
                    offset,
                    len: u32::try_from(len).unwrap_or(u32::MAX),
                });
                writes_sent += 1;
            } else if pending.is_empty() {
                break;
            }

            let first_write = len > 0 && writes_sent == 1;
            if first_write || len == 0 || pending.len() >= self.max_pipeline_depth as usize {
                let reply = self.recv().await?;
                let (id, code, message) = match reply {
                    Reply::Status { id, code, message } => (id, code, message),
                    other => {
                        error!("Expected STATUS, got {:?}", other.kind());
                        return Err(other.unexpected());
                    }
                };
                let Some(index) = pending.iter().position(|ack| ack.id == id) else {
                    error!("Can't find request for ID {}", id);
                    return Err(Error::UnexpectedReply {
                        kind: MessageType::Status,
                        id,
                    });
                };
                let Some(ack) = pending.remove(index) else {
                    return Err(Error::Protocol(format!("Lost track of request {}", id)));
                };

                trace!(id, offset = ack.offset, len = ack.len, "Write acknowledged");
                if code == StatusCode::Ok {
                    summary.bytes_transferred += u64::from(ack.len);
                } else if failure.is_none() {
                    error!("Couldn't write to remote file \"{}\": {}", remote_path, code);
                    failure = Some(Error::Status { code, message });
                }
            }

            offset += len as u64;
        }

        if preserve {
            // A refused fsetstat is logged by fsetstat and does not fail the upload
            self.fsetstat(&handle, &attrs)
                .await
                .or_else(|e| if e.is_fatal() { Err(e) } else { Ok(()) })?;
        }

        let closed = self.close(handle).await;
        match (failure, closed) {
            (_, Err(e)) if e.is_fatal() => return Err(e),
            (Some(e), _) => return Err(e),
            (None, Err(e)) => return Err(e),
            (None, Ok(())) => {}
        }

        if summary.interrupted {
            info!("Upload to \"{}\" interrupted", remote_path);
        } else {
            debug!(
                "Upload to \"{}\" finished, {} bytes",
                remote_path, summary.bytes_transferred
            );
        }

        Ok(summary)
    }
}
