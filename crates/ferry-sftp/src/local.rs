//! Local ends of a transfer
//!
//! The download engine writes replies wherever they land in the file, so a
//! sink needs positional writes. The upload engine reads sequentially and
//! needs the source's metadata to validate it and to derive attributes.

use async_trait::async_trait;
use std::io;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::protocol::FileAttrs;

/// Destination of a download
#[async_trait]
pub trait LocalSink: Send {
    /// Write all of `data` starting at `offset`
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Apply permission bits (already masked to `0o777`)
    async fn set_mode(&mut self, mode: u32) -> io::Result<()>;
}

/// Origin of an upload
#[async_trait]
pub trait LocalSource: Send {
    /// Attributes of the source; `permissions` must carry the file type bits
    async fn attrs(&mut self) -> io::Result<FileAttrs>;

    /// Read the next bytes into `buf`, returning 0 at end of file
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
impl LocalSink for File {
    async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.seek(io::SeekFrom::Start(offset)).await?;
        self.write_all(data).await?;
        self.flush().await
    }

    #[cfg(unix)]
    async fn set_mode(&mut self, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        self.set_permissions(std::fs::Permissions::from_mode(mode))
            .await
    }

    #[cfg(not(unix))]
    async fn set_mode(&mut self, mode: u32) -> io::Result<()> {
        let mut perms = self.metadata().await?.permissions();
        perms.set_readonly(mode & 0o200 == 0);
        self.set_permissions(perms).await
    }
}

#[async_trait]
impl LocalSource for File {
    async fn attrs(&mut self) -> io::Result<FileAttrs> {
        let meta = self.metadata().await?;
        Ok(metadata_to_attrs(&meta))
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.read(buf).await {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}

/// Translate local metadata into an SFTP attribute record
#[cfg(unix)]
pub fn metadata_to_attrs(meta: &std::fs::Metadata) -> FileAttrs {
    use std::os::unix::fs::MetadataExt;

    FileAttrs {
        size: Some(meta.size()),
        uid: Some(meta.uid()),
        gid: Some(meta.gid()),
        permissions: Some(meta.mode()),
        atime: Some(meta.atime().clamp(0, i64::from(u32::MAX)) as u32),
        mtime: Some(meta.mtime().clamp(0, i64::from(u32::MAX)) as u32),
        extended: Vec::new(),
    }
}

/// Translate local metadata into an SFTP attribute record
#[cfg(not(unix))]
pub fn metadata_to_attrs(meta: &std::fs::Metadata) -> FileAttrs {
    use crate::protocol::{S_IFDIR, S_IFREG};

    let kind = if meta.is_dir() {
        S_IFDIR | 0o755
    } else if meta.is_file() {
        S_IFREG | 0o644
    } else {
        0
    };
    let perm = if meta.permissions().readonly() {
        kind & !0o222
    } else {
        kind
    };
    let secs = |t: io::Result<std::time::SystemTime>| {
        t.ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs().min(u64::from(u32::MAX)) as u32)
    };

    let atime = secs(meta.accessed());
    let mtime = secs(meta.modified());
    let (atime, mtime) = match (atime, mtime) {
        (Some(a), Some(m)) => (Some(a), Some(m)),
        _ => (None, None),
    };

    FileAttrs {
        size: Some(meta.len()),
        uid: None,
        gid: None,
        permissions: Some(perm),
        atime,
        mtime,
        extended: Vec::new(),
    }
}
