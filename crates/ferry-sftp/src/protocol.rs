//! SFTP Protocol Definitions
//!
//! Message types, status codes, open flags and attribute records as defined
//! in draft-ietf-secsh-filexfer-02 (protocol version 3) and understood by
//! older version 0-2 servers.

use bytes::{BufMut, BytesMut};

/// Highest SFTP protocol version spoken by this client
pub const SFTP_VERSION: u32 = 3;

/// Largest message accepted or produced, in bytes (length prefix excluded)
pub const MAX_MSG_LENGTH: u32 = 256 * 1024;

/// Version 0 servers reject packets larger than this
pub const VERSION_0_MAX_CHUNK: u32 = 20480;

/// Smallest read size the download engine shrinks to
pub const MIN_READ_SIZE: u32 = 512;

/// Extension name for atomic, overwriting rename
pub const EXT_POSIX_RENAME: &str = "posix-rename@openssh.com";

/// Extension name for filesystem statistics by path
pub const EXT_STATVFS: &str = "statvfs@openssh.com";

/// Extension name for filesystem statistics by handle
pub const EXT_FSTATVFS: &str = "fstatvfs@openssh.com";

/// SFTP message types (draft-ietf-secsh-filexfer-02)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Initialize SFTP session
    Init = 1,
    /// Version response
    Version = 2,
    /// Open file
    Open = 3,
    /// Close file
    Close = 4,
    /// Read from file
    Read = 5,
    /// Write to file
    Write = 6,
    /// Get file attributes by path (no symlink follow).
    /// Version 0 servers use this number for STAT.
    Lstat = 7,
    /// Get file attributes by handle
    Fstat = 8,
    /// Set file attributes by path
    Setstat = 9,
    /// Set file attributes by handle
    Fsetstat = 10,
    /// Open directory
    Opendir = 11,
    /// Read directory entries
    Readdir = 12,
    /// Remove file
    Remove = 13,
    /// Create directory
    Mkdir = 14,
    /// Remove directory
    Rmdir = 15,
    /// Get real path
    Realpath = 16,
    /// Get file attributes by path (follow symlinks)
    Stat = 17,
    /// Rename file or directory
    Rename = 18,
    /// Read symbolic link
    Readlink = 19,
    /// Create symbolic link
    Symlink = 20,
    /// Status response
    Status = 101,
    /// Handle response
    Handle = 102,
    /// Data response
    Data = 103,
    /// Name response (for directory listings)
    Name = 104,
    /// Attributes response
    Attrs = 105,
    /// Extended request
    Extended = 200,
    /// Extended reply
    ExtendedReply = 201,
}

impl MessageType {
    /// Whether this type is only ever sent by a server
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            MessageType::Version
                | MessageType::Status
                | MessageType::Handle
                | MessageType::Data
                | MessageType::Name
                | MessageType::Attrs
                | MessageType::ExtendedReply
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Init),
            2 => Ok(MessageType::Version),
            3 => Ok(MessageType::Open),
            4 => Ok(MessageType::Close),
            5 => Ok(MessageType::Read),
            6 => Ok(MessageType::Write),
            7 => Ok(MessageType::Lstat),
            8 => Ok(MessageType::Fstat),
            9 => Ok(MessageType::Setstat),
            10 => Ok(MessageType::Fsetstat),
            11 => Ok(MessageType::Opendir),
            12 => Ok(MessageType::Readdir),
            13 => Ok(MessageType::Remove),
            14 => Ok(MessageType::Mkdir),
            15 => Ok(MessageType::Rmdir),
            16 => Ok(MessageType::Realpath),
            17 => Ok(MessageType::Stat),
            18 => Ok(MessageType::Rename),
            19 => Ok(MessageType::Readlink),
            20 => Ok(MessageType::Symlink),
            101 => Ok(MessageType::Status),
            102 => Ok(MessageType::Handle),
            103 => Ok(MessageType::Data),
            104 => Ok(MessageType::Name),
            105 => Ok(MessageType::Attrs),
            200 => Ok(MessageType::Extended),
            201 => Ok(MessageType::ExtendedReply),
            _ => Err(crate::Error::Protocol(format!(
                "Unknown message type: {}",
                value
            ))),
        }
    }
}

/// SFTP Status codes (RFC draft-ietf-secsh-filexfer)
///
/// Codes outside the version 3 range are kept verbatim in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Success
    Ok,
    /// End of file
    Eof,
    /// No such file or directory
    NoSuchFile,
    /// Permission denied
    PermissionDenied,
    /// General failure
    Failure,
    /// Bad message
    BadMessage,
    /// No connection
    NoConnection,
    /// Connection lost
    ConnectionLost,
    /// Operation not supported
    OpUnsupported,
    /// Any code this client does not know
    Unknown(u32),
}

impl StatusCode {
    /// Human readable description, as printed by OpenSSH's `fx2txt`
    pub fn description(self) -> &'static str {
        match self {
            StatusCode::Ok => "No error",
            StatusCode::Eof => "End of file",
            StatusCode::NoSuchFile => "No such file or directory",
            StatusCode::PermissionDenied => "Permission denied",
            StatusCode::Failure => "Failure",
            StatusCode::BadMessage => "Bad message",
            StatusCode::NoConnection => "No connection",
            StatusCode::ConnectionLost => "Connection lost",
            StatusCode::OpUnsupported => "Operation unsupported",
            StatusCode::Unknown(_) => "Unknown status",
        }
    }
}

impl From<u32> for StatusCode {
    fn from(code: u32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Eof,
            2 => StatusCode::NoSuchFile,
            3 => StatusCode::PermissionDenied,
            4 => StatusCode::Failure,
            5 => StatusCode::BadMessage,
            6 => StatusCode::NoConnection,
            7 => StatusCode::ConnectionLost,
            8 => StatusCode::OpUnsupported,
            other => StatusCode::Unknown(other),
        }
    }
}

impl From<StatusCode> for u32 {
    fn from(code: StatusCode) -> u32 {
        match code {
            StatusCode::Ok => 0,
            StatusCode::Eof => 1,
            StatusCode::NoSuchFile => 2,
            StatusCode::PermissionDenied => 3,
            StatusCode::Failure => 4,
            StatusCode::BadMessage => 5,
            StatusCode::NoConnection => 6,
            StatusCode::ConnectionLost => 7,
            StatusCode::OpUnsupported => 8,
            StatusCode::Unknown(other) => other,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusCode::Unknown(code) => write!(f, "Unknown status {}", code),
            other => f.write_str(other.description()),
        }
    }
}

/// File open flags (draft-ietf-secsh-filexfer-02)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// Open for reading
    pub const READ: u32 = 0x00000001;
    /// Open for writing
    pub const WRITE: u32 = 0x00000002;
    /// Writes go to the end of the file
    pub const APPEND: u32 = 0x00000004;
    /// Create the file if missing
    pub const CREAT: u32 = 0x00000008;
    /// Truncate an existing file
    pub const TRUNC: u32 = 0x00000010;
    /// Fail if the file exists
    pub const EXCL: u32 = 0x00000020;

    /// Check READ flag
    pub fn has_read(&self) -> bool {
        self.0 & Self::READ != 0
    }

    /// Check WRITE flag
    pub fn has_write(&self) -> bool {
        self.0 & Self::WRITE != 0
    }

    /// Check APPEND flag
    pub fn has_append(&self) -> bool {
        self.0 & Self::APPEND != 0
    }

    /// Check EXCL flag
    pub fn has_excl(&self) -> bool {
        self.0 & Self::EXCL != 0
    }

    /// Check CREAT flag
    pub fn has_creat(&self) -> bool {
        self.0 & Self::CREAT != 0
    }

    /// Check TRUNC flag
    pub fn has_trunc(&self) -> bool {
        self.0 & Self::TRUNC != 0
    }
}

/// File type bits of a POSIX mode
pub const S_IFMT: u32 = 0o170000;
/// Regular file
pub const S_IFREG: u32 = 0o100000;
/// Directory
pub const S_IFDIR: u32 = 0o040000;
/// Symbolic link
pub const S_IFLNK: u32 = 0o120000;

/// File attributes (draft-ietf-secsh-filexfer-02)
///
/// Every field is guarded by a presence flag on the wire. A `None` here means
/// the server did not send it.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct FileAttrs {
    /// File size in bytes
    pub size: Option<u64>,
    /// Owner id
    pub uid: Option<u32>,
    /// Group id
    pub gid: Option<u32>,
    /// POSIX mode including type bits
    pub permissions: Option<u32>,
    /// Access time, seconds since the epoch
    pub atime: Option<u32>,
    /// Modification time, seconds since the epoch
    pub mtime: Option<u32>,
    /// Extended name/value pairs
    pub extended: Vec<(String, String)>,
}

impl FileAttrs {
    /// `size` present
    pub const FLAG_SIZE: u32 = 0x00000001;
    /// `uid` and `gid` present
    pub const FLAG_UIDGID: u32 = 0x00000002;
    /// `permissions` present
    pub const FLAG_PERMISSIONS: u32 = 0x00000004;
    /// `atime` and `mtime` present
    pub const FLAG_ACMODTIME: u32 = 0x00000008;
    /// Extended pairs present
    pub const FLAG_EXTENDED: u32 = 0x80000000;

    /// Presence mask for the fields currently set
    pub fn flags(&self) -> u32 {
        let mut flags = 0u32;

        if self.size.is_some() {
            flags |= Self::FLAG_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= Self::FLAG_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= Self::FLAG_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= Self::FLAG_ACMODTIME;
        }
        if !self.extended.is_empty() {
            flags |= Self::FLAG_EXTENDED;
        }

        flags
    }

    /// Encode file attributes into `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.flags());

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
        if !self.extended.is_empty() {
            buf.put_u32(self.extended.len() as u32);
            for (name, value) in &self.extended {
                codec::put_string(buf, name);
                codec::put_string(buf, value);
            }
        }
    }

    /// Encode file attributes to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Decode file attributes from bytes
    pub fn decode(buf: &mut &[u8]) -> crate::Result<Self> {
        let flags = codec::get_u32(buf, "attribute flags")?;
        let mut attrs = FileAttrs::default();

        if flags & Self::FLAG_SIZE != 0 {
            attrs.size = Some(codec::get_u64(buf, "size")?);
        }

        if flags & Self::FLAG_UIDGID != 0 {
            attrs.uid = Some(codec::get_u32(buf, "uid")?);
            attrs.gid = Some(codec::get_u32(buf, "gid")?);
        }

        if flags & Self::FLAG_PERMISSIONS != 0 {
            attrs.permissions = Some(codec::get_u32(buf, "permissions")?);
        }

        if flags & Self::FLAG_ACMODTIME != 0 {
            attrs.atime = Some(codec::get_u32(buf, "atime")?);
            attrs.mtime = Some(codec::get_u32(buf, "mtime")?);
        }

        if flags & Self::FLAG_EXTENDED != 0 {
            let count = codec::get_u32(buf, "extended count")?;
            for _ in 0..count {
                let name = codec::get_string_lossy(buf)?;
                let value = codec::get_string_lossy(buf)?;
                attrs.extended.push((name, value));
            }
        }

        Ok(attrs)
    }

    /// Type bits of the permissions, if present
    fn file_type(&self) -> Option<u32> {
        self.permissions.map(|perm| perm & S_IFMT)
    }

    /// True only when permissions are present and mark a regular file
    pub fn is_regular(&self) -> bool {
        self.file_type() == Some(S_IFREG)
    }

    /// True only when permissions are present and mark a directory
    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(S_IFDIR)
    }

    /// True only when permissions are present and mark a symbolic link
    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(S_IFLNK)
    }
}

/// Filesystem statistics returned by the `statvfs@openssh.com` extensions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatVfs {
    /// File system block size
    pub bsize: u64,
    /// Fundamental block size
    pub frsize: u64,
    /// Size in `frsize` units
    pub blocks: u64,
    /// Free blocks
    pub bfree: u64,
    /// Free blocks for unprivileged users
    pub bavail: u64,
    /// Inodes
    pub files: u64,
    /// Free inodes
    pub ffree: u64,
    /// Free inodes for unprivileged users
    pub favail: u64,
    /// File system id
    pub fsid: u64,
    /// Mount flags
    pub flag: u64,
    /// Maximum filename length
    pub namemax: u64,
}

impl StatVfs {
    /// Read-only mount
    pub const FLAG_RDONLY: u64 = 0x1;
    /// Setuid bits ignored
    pub const FLAG_NOSUID: u64 = 0x2;

    /// Decode the eleven 64-bit fields of an extended reply
    pub fn decode(buf: &mut &[u8]) -> crate::Result<Self> {
        Ok(Self {
            bsize: codec::get_u64(buf, "f_bsize")?,
            frsize: codec::get_u64(buf, "f_frsize")?,
            blocks: codec::get_u64(buf, "f_blocks")?,
            bfree: codec::get_u64(buf, "f_bfree")?,
            bavail: codec::get_u64(buf, "f_bavail")?,
            files: codec::get_u64(buf, "f_files")?,
            ffree: codec::get_u64(buf, "f_ffree")?,
            favail: codec::get_u64(buf, "f_favail")?,
            fsid: codec::get_u64(buf, "f_fsid")?,
            flag: codec::get_u64(buf, "f_flag")?,
            namemax: codec::get_u64(buf, "f_namemax")?,
        })
    }

    /// Encode in wire order
    pub fn encode_into(&self, buf: &mut BytesMut) {
        for field in [
            self.bsize,
            self.frsize,
            self.blocks,
            self.bfree,
            self.bavail,
            self.files,
            self.ffree,
            self.favail,
            self.fsid,
            self.flag,
            self.namemax,
        ] {
            buf.put_u64(field);
        }
    }

    /// Check the read-only flag
    pub fn is_read_only(&self) -> bool {
        self.flag & Self::FLAG_RDONLY != 0
    }

    /// Check the nosuid flag
    pub fn is_nosuid(&self) -> bool {
        self.flag & Self::FLAG_NOSUID != 0
    }
}

/// Helper functions for encoding/decoding SFTP protocol strings
pub mod codec {
    use bytes::{Buf, BufMut, BytesMut};

    fn ensure(buf: &&[u8], needed: usize, what: &str) -> crate::Result<()> {
        if buf.remaining() < needed {
            return Err(crate::Error::Protocol(format!(
                "Insufficient data for {}",
                what
            )));
        }
        Ok(())
    }

    /// Decode a big-endian u8
    pub fn get_u8(buf: &mut &[u8], what: &str) -> crate::Result<u8> {
        ensure(buf, 1, what)?;
        Ok(buf.get_u8())
    }

    /// Decode a big-endian u32
    pub fn get_u32(buf: &mut &[u8], what: &str) -> crate::Result<u32> {
        ensure(buf, 4, what)?;
        Ok(buf.get_u32())
    }

    /// Decode a big-endian u64
    pub fn get_u64(buf: &mut &[u8], what: &str) -> crate::Result<u64> {
        ensure(buf, 8, what)?;
        Ok(buf.get_u64())
    }

    /// Encode a string as SFTP string (length + data)
    pub fn put_string(buf: &mut BytesMut, s: &str) {
        put_bytes(buf, s.as_bytes());
    }

    /// Decode an SFTP string
    pub fn get_string(buf: &mut &[u8]) -> crate::Result<String> {
        let bytes = get_bytes(buf)?;

        String::from_utf8(bytes)
            .map_err(|e| crate::Error::Protocol(format!("Invalid UTF-8 string: {}", e)))
    }

    /// Decode an SFTP string, replacing invalid UTF-8.
    /// Remote filenames are not guaranteed to be UTF-8.
    pub fn get_string_lossy(buf: &mut &[u8]) -> crate::Result<String> {
        let bytes = get_bytes(buf)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Encode bytes as SFTP string (length + data)
    pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
    }

    /// Decode SFTP bytes
    pub fn get_bytes(buf: &mut &[u8]) -> crate::Result<Vec<u8>> {
        ensure(buf, 4, "bytes length")?;
        let len = buf.get_u32() as usize;
        ensure(buf, len, "bytes")?;

        let bytes = &buf[..len];
        buf.advance(len);

        Ok(bytes.to_vec())
    }
}
