//! Directory listing
//!
//! OPENDIR, then READDIR on the same handle until the server reports end of
//! directory, then CLOSE. The handle is closed on every path that leaves the
//! connection usable.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::protocol::StatusCode;
use crate::wire::{DirEntry, Reply, Request};
use crate::{Client, Error, Result};

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// List the entries of the remote directory `path`
    ///
    /// NIST 800-53: SI-10 (Information Input Validation)
    /// Implementation: entries whose name contains `/` are dropped. Such
    /// names can turn recursive operations into path traversal
    /// (e.g. `../../../../etc/passwd`).
    ///
    /// When `cancel` fires the listing stops, the handle is closed and an
    /// empty list is returned rather than a partial one.
    pub async fn read_dir(&mut self, path: &str, cancel: &CancellationToken) -> Result<Vec<DirEntry>> {
        let handle = self.opendir(path).await?;
        let mut entries = Vec::new();

        while !cancel.is_cancelled() {
            let reply = self.round_trip(&Request::Readdir { handle: &handle }).await?;

            let batch = match reply {
                Reply::Status {
                    code: StatusCode::Eof,
                    ..
                } => break,
                Reply::Status { code, message, .. } => {
                    error!("Couldn't read directory \"{}\": {}", path, code);
                    self.close_on_cleanup(handle).await?;
                    return Err(Error::Status { code, message });
                }
                Reply::Name { entries, .. } => entries,
                other => return Err(other.unexpected()),
            };

            if batch.is_empty() {
                break;
            }
            debug!("Received {} NAME responses", batch.len());

            for entry in batch {
                if entry.filename.contains('/') {
                    warn!(
                        "Server sent suspect path \"{}\" during readdir of \"{}\"",
                        entry.filename, path
                    );
                    continue;
                }
                entries.push(entry);
            }
        }

        self.close_on_cleanup(handle).await?;

        if cancel.is_cancelled() {
            debug!("Listing of \"{}\" interrupted, discarding {} entries", path, entries.len());
            return Ok(Vec::new());
        }

        Ok(entries)
    }
}
