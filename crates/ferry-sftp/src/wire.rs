//! Message framing and the typed request/reply vocabulary
//!
//! Every message travels as a 4-byte big-endian length followed by a body
//! whose first byte is the message type. Requests are built from [`Request`]
//! and replies are parsed into [`Reply`], so dispatch on message kinds is a
//! `match` the compiler checks for exhaustiveness.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::protocol::{
    codec, FileAttrs, MessageType, OpenFlags, StatusCode, EXT_FSTATVFS, EXT_POSIX_RENAME,
    EXT_STATVFS, MAX_MSG_LENGTH,
};
use crate::{Error, Result};

/// Opaque server-issued file or directory handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle(pub Vec<u8>);

impl Handle {
    /// Raw handle bytes as sent by the server
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One entry of a NAME reply
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DirEntry {
    /// Bare file name
    pub filename: String,
    /// `ls -l` style display line produced by the server
    pub longname: String,
    /// Attributes sent with the entry
    pub attrs: FileAttrs,
}

/// A client request, one variant per message the client sends
#[derive(Debug, Clone)]
pub enum Request<'a> {
    /// Version exchange; carries the client version instead of an id
    Init { version: u32 },
    /// Open or create a file
    Open { path: &'a str, flags: OpenFlags, attrs: &'a FileAttrs },
    /// Release a handle
    Close { handle: &'a Handle },
    /// Read `len` bytes at `offset`
    Read { handle: &'a Handle, offset: u64, len: u32 },
    /// Write `data` at `offset`
    Write { handle: &'a Handle, offset: u64, data: &'a [u8] },
    /// Attributes without following a final link
    Lstat { path: &'a str },
    /// Attributes of an open handle
    Fstat { handle: &'a Handle },
    /// Change attributes by path
    Setstat { path: &'a str, attrs: &'a FileAttrs },
    /// Change attributes of an open handle
    Fsetstat { handle: &'a Handle, attrs: &'a FileAttrs },
    /// Open a directory for listing
    Opendir { path: &'a str },
    /// Next batch of directory entries
    Readdir { handle: &'a Handle },
    /// Delete a file
    Remove { path: &'a str },
    /// Create a directory
    Mkdir { path: &'a str, attrs: &'a FileAttrs },
    /// Remove a directory
    Rmdir { path: &'a str },
    /// Canonicalize a path
    Realpath { path: &'a str },
    /// Attributes following links
    Stat { path: &'a str },
    /// Plain rename
    Rename { old: &'a str, new: &'a str },
    /// Target of a symbolic link
    Readlink { path: &'a str },
    /// Create a symbolic link at `link` pointing to `target`
    Symlink { target: &'a str, link: &'a str },
    /// `posix-rename@openssh.com`
    PosixRename { old: &'a str, new: &'a str },
    /// `statvfs@openssh.com`
    Statvfs { path: &'a str },
    /// `fstatvfs@openssh.com`
    Fstatvfs { handle: &'a Handle },
}

impl Request<'_> {
    /// Message type used on the wire for the given protocol version
    pub fn message_type(&self, version: u32) -> MessageType {
        match self {
            Request::Init { .. } => MessageType::Init,
            Request::Open { .. } => MessageType::Open,
            Request::Close { .. } => MessageType::Close,
            Request::Read { .. } => MessageType::Read,
            Request::Write { .. } => MessageType::Write,
            Request::Lstat { .. } => MessageType::Lstat,
            Request::Fstat { .. } => MessageType::Fstat,
            Request::Setstat { .. } => MessageType::Setstat,
            Request::Fsetstat { .. } => MessageType::Fsetstat,
            Request::Opendir { .. } => MessageType::Opendir,
            Request::Readdir { .. } => MessageType::Readdir,
            Request::Remove { .. } => MessageType::Remove,
            Request::Mkdir { .. } => MessageType::Mkdir,
            Request::Rmdir { .. } => MessageType::Rmdir,
            Request::Realpath { .. } => MessageType::Realpath,
            // Version 0 numbered STAT like the later LSTAT
            Request::Stat { .. } if version == 0 => MessageType::Lstat,
            Request::Stat { .. } => MessageType::Stat,
            Request::Rename { .. } => MessageType::Rename,
            Request::Readlink { .. } => MessageType::Readlink,
            Request::Symlink { .. } => MessageType::Symlink,
            Request::PosixRename { .. } | Request::Statvfs { .. } | Request::Fstatvfs { .. } => {
                MessageType::Extended
            }
        }
    }

    /// Encode the message body (without length prefix)
    pub fn encode(&self, id: u32, version: u32) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(self.message_type(version) as u8);

        if let Request::Init { version } = self {
            buf.put_u32(*version);
            return buf;
        }
        buf.put_u32(id);

        match self {
            Request::Init { .. } => {}
            Request::Open { path, flags, attrs } => {
                codec::put_string(&mut buf, path);
                buf.put_u32(flags.0);
                attrs.encode_into(&mut buf);
            }
            Request::Close { handle }
            | Request::Fstat { handle }
            | Request::Readdir { handle } => {
                codec::put_bytes(&mut buf, handle.as_bytes());
            }
            Request::Read { handle, offset, len } => {
                codec::put_bytes(&mut buf, handle.as_bytes());
                buf.put_u64(*offset);
                buf.put_u32(*len);
            }
            Request::Write { handle, offset, data } => {
                codec::put_bytes(&mut buf, handle.as_bytes());
                buf.put_u64(*offset);
                codec::put_bytes(&mut buf, data);
            }
            Request::Lstat { path }
            | Request::Opendir { path }
            | Request::Remove { path }
            | Request::Rmdir { path }
            | Request::Realpath { path }
            | Request::Stat { path }
            | Request::Readlink { path } => {
                codec::put_string(&mut buf, path);
            }
            Request::Setstat { path, attrs } | Request::Mkdir { path, attrs } => {
                codec::put_string(&mut buf, path);
                attrs.encode_into(&mut buf);
            }
            Request::Fsetstat { handle, attrs } => {
                codec::put_bytes(&mut buf, handle.as_bytes());
                attrs.encode_into(&mut buf);
            }
            Request::Rename { old, new } => {
                codec::put_string(&mut buf, old);
                codec::put_string(&mut buf, new);
            }
            Request::Symlink { target, link } => {
                codec::put_string(&mut buf, target);
                codec::put_string(&mut buf, link);
            }
            Request::PosixRename { old, new } => {
                codec::put_string(&mut buf, EXT_POSIX_RENAME);
                codec::put_string(&mut buf, old);
                codec::put_string(&mut buf, new);
            }
            Request::Statvfs { path } => {
                codec::put_string(&mut buf, EXT_STATVFS);
                codec::put_string(&mut buf, path);
            }
            Request::Fstatvfs { handle } => {
                codec::put_string(&mut buf, EXT_FSTATVFS);
                codec::put_bytes(&mut buf, handle.as_bytes());
            }
        }

        buf
    }
}

/// A server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Handshake answer with the server version and extension pairs
    Version { version: u32, extensions: Vec<(String, String)> },
    /// Result code of a request
    Status { id: u32, code: StatusCode, message: String },
    /// Newly opened handle
    Handle { id: u32, handle: Handle },
    /// Bytes read from a file
    Data { id: u32, data: Vec<u8> },
    /// Directory entries or a resolved path
    Name { id: u32, entries: Vec<DirEntry> },
    /// File attributes
    Attrs { id: u32, attrs: FileAttrs },
    /// Payload of an extended request
    ExtendedReply { id: u32, data: Vec<u8> },
}

impl Reply {
    /// Parse a message body
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut buf = body;
        let kind = MessageType::try_from(codec::get_u8(&mut buf, "message type")?)?;

        if kind == MessageType::Version {
            let version = codec::get_u32(&mut buf, "version")?;
            let mut extensions = Vec::new();
            while !buf.is_empty() {
                let name = codec::get_string_lossy(&mut buf)?;
                let value = codec::get_string_lossy(&mut buf)?;
                extensions.push((name, value));
            }
            return Ok(Reply::Version { version, extensions });
        }

        let id = codec::get_u32(&mut buf, "request id")?;

        match kind {
            MessageType::Status => {
                let code = StatusCode::from(codec::get_u32(&mut buf, "status code")?);
                // Servers older than version 3 send only the code
                let message = if buf.is_empty() {
                    String::new()
                } else {
                    codec::get_string_lossy(&mut buf)?
                };
                Ok(Reply::Status { id, code, message })
            }
            MessageType::Handle => Ok(Reply::Handle {
                id,
                handle: Handle(codec::get_bytes(&mut buf)?),
            }),
            MessageType::Data => Ok(Reply::Data {
                id,
                data: codec::get_bytes(&mut buf)?,
            }),
            MessageType::Name => {
                let count = codec::get_u32(&mut buf, "name count")?;
                let mut entries = Vec::new();
                for _ in 0..count {
                    let filename = codec::get_string_lossy(&mut buf)?;
                    let longname = codec::get_string_lossy(&mut buf)?;
                    let attrs = FileAttrs::decode(&mut buf)?;
                    entries.push(DirEntry {
                        filename,
                        longname,
                        attrs,
                    });
                }
                Ok(Reply::Name { id, entries })
            }
            MessageType::Attrs => Ok(Reply::Attrs {
                id,
                attrs: FileAttrs::decode(&mut buf)?,
            }),
            MessageType::ExtendedReply => Ok(Reply::ExtendedReply {
                id,
                data: buf.to_vec(),
            }),
            other => Err(Error::Protocol(format!(
                "Received request-only message type {:?}",
                other
            ))),
        }
    }

    /// Message type of this reply
    pub fn kind(&self) -> MessageType {
        match self {
            Reply::Version { .. } => MessageType::Version,
            Reply::Status { .. } => MessageType::Status,
            Reply::Handle { .. } => MessageType::Handle,
            Reply::Data { .. } => MessageType::Data,
            Reply::Name { .. } => MessageType::Name,
            Reply::Attrs { .. } => MessageType::Attrs,
            Reply::ExtendedReply { .. } => MessageType::ExtendedReply,
        }
    }

    /// Request id answered by this reply (VERSION carries none)
    pub fn id(&self) -> Option<u32> {
        match self {
            Reply::Version { .. } => None,
            Reply::Status { id, .. }
            | Reply::Handle { id, .. }
            | Reply::Data { id, .. }
            | Reply::Name { id, .. }
            | Reply::Attrs { id, .. }
            | Reply::ExtendedReply { id, .. } => Some(*id),
        }
    }

    /// Error for a reply the caller cannot use at this point
    pub fn unexpected(&self) -> Error {
        Error::UnexpectedReply {
            kind: self.kind(),
            id: self.id().unwrap_or(0),
        }
    }
}

/// Send one length-prefixed message
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| Error::MessageTooLong(u32::MAX))?;
    if len > MAX_MSG_LENGTH {
        return Err(Error::MessageTooLong(len));
    }

    let mut frame = BytesMut::with_capacity(body.len() + 4);
    frame.put_u32(len);
    frame.put_slice(body);

    writer.write_all(&frame).await?;
    writer.flush().await?;

    trace!(len, "Sent frame");
    Ok(())
}

/// Receive one length-prefixed message body.
///
/// A short read leaves the stream desynchronized, so it is always an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| short_read(e, "length"))?;

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MSG_LENGTH {
        return Err(Error::MessageTooLong(len));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| short_read(e, "body"))?;

    trace!(len, "Received frame");
    Ok(body)
}

fn short_read(err: std::io::Error, part: &str) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed(format!("stream ended while reading message {}", part))
    } else {
        Error::Io(err)
    }
}
