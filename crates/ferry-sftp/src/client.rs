//! SFTP Client Implementation
//!
//! [`Client`] owns both halves of an established byte stream (for example
//! the stdin/stdout of an `ssh -s sftp` process) and drives the protocol over
//! them: version exchange, request id allocation, strict reply correlation
//! and the single round-trip metadata operations. Directory listing and bulk
//! transfers live in `readdir`, `download` and `upload`.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info};

use crate::extensions::Extensions;
use crate::protocol::{
    FileAttrs, OpenFlags, StatVfs, StatusCode, SFTP_VERSION, VERSION_0_MAX_CHUNK,
};
use crate::wire::{read_frame, write_frame, DirEntry, Handle, Reply, Request};
use crate::{Config, Error, Result};

/// SFTP Client
///
/// Operations take `&mut self`: one connection carries one operation at a
/// time, pipelining happens inside the transfer engines.
pub struct Client<R, W> {
    reader: R,
    writer: W,
    version: u32,
    next_id: u32,
    extensions: Extensions,
    pub(crate) transfer_chunk_size: u32,
    pub(crate) max_pipeline_depth: u32,
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Perform the version exchange over an established stream pair
    ///
    /// # Errors
    ///
    /// `Error::Handshake` if the first reply is not VERSION, transport
    /// errors if the stream fails.
    pub async fn init(mut reader: R, mut writer: W, config: &Config) -> Result<Self> {
        config.validate()?;

        let init = Request::Init {
            version: SFTP_VERSION,
        };
        write_frame(&mut writer, &init.encode(0, SFTP_VERSION)).await?;
        debug!("Sent INIT version {}", SFTP_VERSION);

        let body = read_frame(&mut reader).await?;
        let (version, pairs) = match Reply::decode(&body) {
            Ok(Reply::Version {
                version,
                extensions,
            }) => (version, extensions),
            Ok(other) => {
                error!("Invalid packet back from INIT (type {:?})", other.kind());
                return Err(Error::Handshake(format!(
                    "expected VERSION, got {:?}",
                    other.kind()
                )));
            }
            Err(e) => {
                error!("Invalid packet back from INIT: {}", e);
                return Err(Error::Handshake(e.to_string()));
            }
        };

        debug!("Remote version: {}", version);

        let extensions = Extensions::negotiate(
            pairs.iter().map(|(name, value)| (name.as_str(), value.as_str())),
        );

        let mut transfer_chunk_size = config.transfer_chunk_size;
        if version == 0 {
            // Some filexfer v0 servers don't support large packets
            transfer_chunk_size = transfer_chunk_size.min(VERSION_0_MAX_CHUNK);
        }

        info!(
            version,
            extensions = extensions.0,
            transfer_chunk_size,
            "SFTP session initialized"
        );

        Ok(Self {
            reader,
            writer,
            version,
            next_id: 1,
            extensions,
            transfer_chunk_size,
            max_pipeline_depth: config.max_pipeline_depth,
        })
    }

    /// Negotiated protocol version
    pub fn protocol_version(&self) -> u32 {
        self.version
    }

    /// Extensions advertised by the server
    pub fn extensions(&self) -> Extensions {
        self.extensions
    }

    /// Whether `rename` uses the atomic, overwriting extension
    pub fn has_posix_rename(&self) -> bool {
        self.extensions.has_posix_rename()
    }

    /// Current transfer chunk size
    pub fn transfer_chunk_size(&self) -> u32 {
        self.transfer_chunk_size
    }

    /// Configured transfer window ceiling
    pub fn max_pipeline_depth(&self) -> u32 {
        self.max_pipeline_depth
    }

    /// Give back the underlying streams
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Reserve the next request id. Ids are never reused, so running out of
    /// them ends the session instead of wrapping.
    fn allocate_id(&mut self) -> Result<u32> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| Error::Protocol("Request id space exhausted".into()))?;
        Ok(id)
    }

    /// Send one request under a fresh id and return that id
    pub(crate) async fn send(&mut self, request: &Request<'_>) -> Result<u32> {
        let id = self.allocate_id()?;
        let body = request.encode(id, self.version);
        write_frame(&mut self.writer, &body).await?;
        debug!("Sent message {:?} I:{}", request.message_type(self.version), id);
        Ok(id)
    }

    /// Read the next reply, whatever request it answers
    pub(crate) async fn recv(&mut self) -> Result<Reply> {
        let body = read_frame(&mut self.reader).await?;
        let reply = Reply::decode(&body)?;
        if reply.id().is_none() {
            return Err(Error::Protocol("VERSION received after handshake".into()));
        }
        debug!("Received reply T:{:?} I:{}", reply.kind(), reply.id().unwrap_or_default());
        Ok(reply)
    }

    /// Send a request and read its reply, which must carry the same id
    pub(crate) async fn round_trip(&mut self, request: &Request<'_>) -> Result<Reply> {
        let expected = self.send(request).await?;
        let reply = self.recv().await?;
        let got = reply.id().unwrap_or_default();
        if got != expected {
            error!("ID mismatch ({} != {})", got, expected);
            return Err(Error::IdMismatch { expected, got });
        }
        Ok(reply)
    }

    /// Close `handle` on a cleanup path. A failure status is logged by
    /// `close` and dropped; only errors that end the session are returned.
    pub(crate) async fn close_on_cleanup(&mut self, handle: Handle) -> Result<()> {
        match self.close(handle).await {
            Err(e) if e.is_fatal() => Err(e),
            _ => Ok(()),
        }
    }

    async fn expect_status(&mut self, request: &Request<'_>) -> Result<()> {
        match self.round_trip(request).await? {
            Reply::Status {
                code: StatusCode::Ok,
                ..
            } => Ok(()),
            Reply::Status { code, message, .. } => Err(Error::Status { code, message }),
            other => Err(other.unexpected()),
        }
    }

    async fn expect_handle(&mut self, request: &Request<'_>) -> Result<Handle> {
        match self.round_trip(request).await? {
            Reply::Handle { handle, .. } => Ok(handle),
            Reply::Status { code, message, .. } => Err(Error::Status { code, message }),
            other => Err(other.unexpected()),
        }
    }

    async fn expect_attrs(&mut self, request: &Request<'_>) -> Result<FileAttrs> {
        match self.round_trip(request).await? {
            Reply::Attrs { attrs, .. } => Ok(attrs),
            Reply::Status { code, message, .. } => Err(Error::Status { code, message }),
            other => Err(other.unexpected()),
        }
    }

    async fn expect_name(&mut self, request: &Request<'_>) -> Result<Vec<DirEntry>> {
        match self.round_trip(request).await? {
            Reply::Name { entries, .. } => Ok(entries),
            Reply::Status { code, message, .. } => Err(Error::Status { code, message }),
            other => Err(other.unexpected()),
        }
    }

    async fn expect_single_name(&mut self, request: &Request<'_>) -> Result<String> {
        let mut entries = self.expect_name(request).await?;
        if entries.len() != 1 {
            return Err(Error::Protocol(format!(
                "Got multiple names ({}) from {:?}",
                entries.len(),
                request.message_type(self.version)
            )));
        }
        Ok(entries.remove(0).filename)
    }

    async fn expect_statvfs(&mut self, request: &Request<'_>) -> Result<StatVfs> {
        match self.round_trip(request).await? {
            Reply::ExtendedReply { data, .. } => StatVfs::decode(&mut data.as_slice()),
            Reply::Status { code, message, .. } => Err(Error::Status { code, message }),
            other => Err(other.unexpected()),
        }
    }

    /// Open a remote file
    pub async fn open(&mut self, path: &str, flags: OpenFlags, attrs: &FileAttrs) -> Result<Handle> {
        self.expect_handle(&Request::Open { path, flags, attrs })
            .await
            .inspect_err(|e| error!("Couldn't get handle for \"{}\": {}", path, e))
    }

    /// Open a remote directory for reading
    pub async fn opendir(&mut self, path: &str) -> Result<Handle> {
        self.expect_handle(&Request::Opendir { path })
            .await
            .inspect_err(|e| error!("Couldn't open directory \"{}\": {}", path, e))
    }

    /// Close a handle. Takes ownership so a handle cannot be closed twice.
    pub async fn close(&mut self, handle: Handle) -> Result<()> {
        self.expect_status(&Request::Close { handle: &handle })
            .await
            .inspect_err(|e| error!("Couldn't close file: {}", e))
    }

    /// Attributes of `path`, following symlinks
    pub async fn stat(&mut self, path: &str) -> Result<FileAttrs> {
        self.expect_attrs(&Request::Stat { path })
            .await
            .inspect_err(|e| debug!("Couldn't stat remote file \"{}\": {}", path, e))
    }

    /// Attributes of `path` itself. Version 0 has no LSTAT and falls back
    /// to `stat`.
    pub async fn lstat(&mut self, path: &str) -> Result<FileAttrs> {
        if self.version == 0 {
            info!("Server version does not support lstat operation");
            return self.stat(path).await;
        }

        self.expect_attrs(&Request::Lstat { path })
            .await
            .inspect_err(|e| debug!("Couldn't lstat remote file \"{}\": {}", path, e))
    }

    /// Attributes of an open handle
    pub async fn fstat(&mut self, handle: &Handle) -> Result<FileAttrs> {
        self.expect_attrs(&Request::Fstat { handle })
            .await
            .inspect_err(|e| debug!("Couldn't fstat remote file: {}", e))
    }

    /// Change attributes of `path`
    pub async fn setstat(&mut self, path: &str, attrs: &FileAttrs) -> Result<()> {
        self.expect_status(&Request::Setstat { path, attrs })
            .await
            .inspect_err(|e| error!("Couldn't setstat on \"{}\": {}", path, e))
    }

    /// Change attributes of an open handle
    pub async fn fsetstat(&mut self, handle: &Handle, attrs: &FileAttrs) -> Result<()> {
        self.expect_status(&Request::Fsetstat { handle, attrs })
            .await
            .inspect_err(|e| error!("Couldn't fsetstat: {}", e))
    }

    /// Remove a file
    pub async fn remove(&mut self, path: &str) -> Result<()> {
        debug!("Sending REMOVE \"{}\"", path);

        self.expect_status(&Request::Remove { path })
            .await
            .inspect_err(|e| error!("Couldn't delete file \"{}\": {}", path, e))
    }

    /// Create a directory
    pub async fn mkdir(&mut self, path: &str, attrs: &FileAttrs) -> Result<()> {
        self.expect_status(&Request::Mkdir { path, attrs })
            .await
            .inspect_err(|e| error!("Couldn't create directory \"{}\": {}", path, e))
    }

    /// Remove a directory
    pub async fn rmdir(&mut self, path: &str) -> Result<()> {
        self.expect_status(&Request::Rmdir { path })
            .await
            .inspect_err(|e| error!("Couldn't remove directory \"{}\": {}", path, e))
    }

    /// Rename a file or directory
    ///
    /// With `posix-rename@openssh.com` negotiated an existing `new_path` is
    /// replaced atomically. Without it the plain RENAME is sent and whether
    /// an existing destination is replaced or refused depends on the server;
    /// callers see that difference.
    pub async fn rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let request = if self.has_posix_rename() {
            Request::PosixRename {
                old: old_path,
                new: new_path,
            }
        } else {
            Request::Rename {
                old: old_path,
                new: new_path,
            }
        };

        debug!(
            "Sending {} \"{}\" -> \"{}\"",
            if self.has_posix_rename() { "posix-rename@openssh.com" } else { "RENAME" },
            old_path,
            new_path
        );

        self.expect_status(&request).await.inspect_err(|e| {
            error!(
                "Couldn't rename file \"{}\" to \"{}\": {}",
                old_path, new_path, e
            )
        })
    }

    /// Create `link` pointing at `target`. Needs protocol version 3; older
    /// servers get nothing sent.
    pub async fn symlink(&mut self, target: &str, link: &str) -> Result<()> {
        if self.version < 3 {
            error!("This server does not support the symlink operation");
            return Err(Error::status(StatusCode::OpUnsupported));
        }

        self.expect_status(&Request::Symlink { target, link })
            .await
            .inspect_err(|e| {
                error!("Couldn't symlink file \"{}\" to \"{}\": {}", target, link, e)
            })
    }

    /// Target of the symbolic link at `path`
    pub async fn readlink(&mut self, path: &str) -> Result<String> {
        let target = self
            .expect_single_name(&Request::Readlink { path })
            .await
            .inspect_err(|e| error!("Couldn't readlink \"{}\": {}", path, e))?;
        debug!("READLINK {} -> {}", path, target);
        Ok(target)
    }

    /// Canonical absolute form of `path`
    pub async fn realpath(&mut self, path: &str) -> Result<String> {
        let canonical = self
            .expect_single_name(&Request::Realpath { path })
            .await
            .inspect_err(|e| error!("Couldn't canonicalise \"{}\": {}", path, e))?;
        debug!("REALPATH {} -> {}", path, canonical);
        Ok(canonical)
    }

    /// Filesystem statistics for the filesystem holding `path`
    pub async fn statvfs(&mut self, path: &str) -> Result<StatVfs> {
        if !self.extensions.has_statvfs() {
            error!("Server does not support statvfs@openssh.com extension");
            return Err(Error::Unsupported("statvfs@openssh.com".into()));
        }

        self.expect_statvfs(&Request::Statvfs { path })
            .await
            .inspect_err(|e| error!("Couldn't statvfs \"{}\": {}", path, e))
    }

    /// Filesystem statistics for the filesystem holding an open handle
    pub async fn fstatvfs(&mut self, handle: &Handle) -> Result<StatVfs> {
        if !self.extensions.has_fstatvfs() {
            error!("Server does not support fstatvfs@openssh.com extension");
            return Err(Error::Unsupported("fstatvfs@openssh.com".into()));
        }

        self.expect_statvfs(&Request::Fstatvfs { handle })
            .await
            .inspect_err(|e| error!("Couldn't fstatvfs: {}", e))
    }
}
