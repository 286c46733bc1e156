//! In-memory SFTP server used to drive the client in tests
//!
//! The server speaks just enough of protocol versions 0-3 to exercise every
//! client operation, records each request it receives and can be told to
//! misbehave in the ways real servers do (short reads, reordered replies,
//! failing writes, refusing to overwrite on rename).

#![allow(dead_code)]

use bytes::{BufMut, BytesMut};
use ferry_sftp::protocol::{
    codec, FileAttrs, MessageType, OpenFlags, StatVfs, StatusCode, S_IFDIR, S_IFLNK, S_IFREG,
};
use ferry_sftp::wire::{read_frame, write_frame};
use ferry_sftp::{CancellationToken, Client, Config};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

pub type TestClient = Client<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Filesystem statistics every statvfs reply carries
pub const TEST_STATVFS: StatVfs = StatVfs {
    bsize: 4096,
    frsize: 4096,
    blocks: 1000,
    bfree: 400,
    bavail: 300,
    files: 500,
    ffree: 200,
    favail: 200,
    fsid: 42,
    flag: StatVfs::FLAG_NOSUID,
    namemax: 255,
};

/// Knobs for server behaviour
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Version announced in the VERSION reply
    pub version: u32,
    /// Extension pairs announced in the VERSION reply
    pub extensions: Vec<(String, String)>,
    /// Upper bound on the payload of a DATA reply
    pub max_read: usize,
    /// Whether a plain RENAME may replace an existing destination
    pub rename_overwrites: bool,
    /// WRITE requests at or beyond this offset fail
    pub fail_write_from: Option<u64>,
    /// Names appended to every directory listing
    pub extra_names: Vec<String>,
    /// Entries per NAME reply
    pub names_per_batch: usize,
    /// Hold READ replies and send them after the next reply
    pub reorder_reads: bool,
    /// Fire the token as soon as a request of this type arrives
    pub cancel_on: Option<(MessageType, CancellationToken)>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            version: 3,
            extensions: Vec::new(),
            max_read: usize::MAX,
            rename_overwrites: false,
            fail_write_from: None,
            extra_names: Vec::new(),
            names_per_batch: 2,
            reorder_reads: false,
            cancel_on: None,
        }
    }
}

impl ServerOptions {
    /// Announce every extension the client knows
    pub fn with_all_extensions(mut self) -> Self {
        self.extensions = vec![
            ("posix-rename@openssh.com".into(), "1".into()),
            ("statvfs@openssh.com".into(), "2".into()),
            ("fstatvfs@openssh.com".into(), "2".into()),
        ];
        self
    }
}

#[derive(Debug, Clone)]
pub enum Node {
    File { data: Vec<u8>, perm: u32, mtime: u32 },
    Dir { perm: u32 },
    Symlink { target: String },
}

impl Node {
    fn attrs(&self) -> FileAttrs {
        match self {
            Node::File { data, perm, mtime } => FileAttrs {
                size: Some(data.len() as u64),
                uid: Some(1000),
                gid: Some(1000),
                permissions: Some(S_IFREG | perm),
                atime: Some(*mtime),
                mtime: Some(*mtime),
                extended: Vec::new(),
            },
            Node::Dir { perm } => FileAttrs {
                size: Some(4096),
                uid: Some(1000),
                gid: Some(1000),
                permissions: Some(S_IFDIR | perm),
                atime: Some(0),
                mtime: Some(0),
                extended: Vec::new(),
            },
            Node::Symlink { target } => FileAttrs {
                size: Some(target.len() as u64),
                permissions: Some(S_IFLNK | 0o777),
                ..FileAttrs::default()
            },
        }
    }
}

#[derive(Debug)]
enum OpenHandle {
    File(String),
    Dir { names: Vec<String>, cursor: usize },
}

/// A request as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logged {
    /// Raw opcode byte
    pub opcode: u8,
    /// Request id (the version for INIT)
    pub id: u32,
}

/// The in-memory server and everything it observed
#[derive(Debug)]
pub struct MemoryServer {
    pub options: ServerOptions,
    pub nodes: BTreeMap<String, Node>,
    pub requests: Vec<Logged>,
    pub open_attrs: Vec<FileAttrs>,
    pub reordered: usize,
    handles: HashMap<Vec<u8>, OpenHandle>,
    next_handle: u32,
    held: Vec<BytesMut>,
}

impl MemoryServer {
    pub fn new(options: ServerOptions) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Dir { perm: 0o755 });
        nodes.insert("/home".to_string(), Node::Dir { perm: 0o755 });
        Self {
            options,
            nodes,
            requests: Vec::new(),
            open_attrs: Vec::new(),
            reordered: 0,
            handles: HashMap::new(),
            next_handle: 1,
            held: Vec::new(),
        }
    }

    pub fn add_file(&mut self, path: &str, data: Vec<u8>, perm: u32) {
        self.nodes.insert(
            path.to_string(),
            Node::File {
                data,
                perm,
                mtime: 1_700_000_000,
            },
        );
    }

    pub fn add_dir(&mut self, path: &str) {
        self.nodes.insert(path.to_string(), Node::Dir { perm: 0o755 });
    }

    pub fn file_data(&self, path: &str) -> Option<&[u8]> {
        match self.nodes.get(path) {
            Some(Node::File { data, .. }) => Some(data),
            _ => None,
        }
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Requests of the given type, in arrival order
    pub fn count(&self, kind: MessageType) -> usize {
        self.requests
            .iter()
            .filter(|r| r.opcode == kind as u8)
            .count()
    }

    /// Serve one connection until the client goes away
    pub async fn serve<S>(mut self, io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(io);

        loop {
            let next = if self.held.is_empty() {
                read_frame(&mut reader).await
            } else {
                match tokio::time::timeout(Duration::from_millis(25), read_frame(&mut reader)).await
                {
                    Ok(frame) => frame,
                    Err(_) => {
                        if !self.flush_held(&mut writer).await {
                            return self;
                        }
                        continue;
                    }
                }
            };

            let Ok(body) = next else {
                return self;
            };

            let (reply, is_read) = self.dispatch(&body);
            if self.options.reorder_reads && is_read {
                if self.held.is_empty() {
                    self.held.push(reply);
                    continue;
                }
                self.reordered += 1;
                if write_frame(&mut writer, &reply).await.is_err() {
                    return self;
                }
                if !self.flush_held(&mut writer).await {
                    return self;
                }
                continue;
            }

            if !self.flush_held(&mut writer).await {
                return self;
            }
            if write_frame(&mut writer, &reply).await.is_err() {
                return self;
            }
        }
    }

    async fn flush_held<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> bool {
        for reply in std::mem::take(&mut self.held) {
            if write_frame(&mut *writer, &reply).await.is_err() {
                return false;
            }
        }
        true
    }

    fn status(&self, id: u32, code: StatusCode) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Status as u8);
        buf.put_u32(id);
        buf.put_u32(code.into());
        if self.options.version >= 3 {
            codec::put_string(&mut buf, code.description());
            codec::put_string(&mut buf, "");
        }
        buf
    }

    fn handle_reply(&mut self, id: u32, open: OpenHandle) -> BytesMut {
        let handle = self.next_handle.to_be_bytes().to_vec();
        self.next_handle += 1;
        self.handles.insert(handle.clone(), open);

        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Handle as u8);
        buf.put_u32(id);
        codec::put_bytes(&mut buf, &handle);
        buf
    }

    fn attrs_reply(id: u32, attrs: &FileAttrs) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Attrs as u8);
        buf.put_u32(id);
        attrs.encode_into(&mut buf);
        buf
    }

    fn name_reply(id: u32, entries: &[(String, FileAttrs)]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Name as u8);
        buf.put_u32(id);
        buf.put_u32(entries.len() as u32);
        for (name, attrs) in entries {
            codec::put_string(&mut buf, name);
            codec::put_string(&mut buf, &format!("-rw-r--r-- 1 user user {}", name));
            attrs.encode_into(&mut buf);
        }
        buf
    }

    fn statvfs_reply(id: u32) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::ExtendedReply as u8);
        buf.put_u32(id);
        TEST_STATVFS.encode_into(&mut buf);
        buf
    }

    fn resolve(&self, path: &str) -> Option<(&str, &Node)> {
        let mut current = path;
        for _ in 0..8 {
            match self.nodes.get_key_value(current) {
                Some((_, Node::Symlink { target })) => current = target,
                Some((key, node)) => return Some((key.as_str(), node)),
                None => return None,
            }
        }
        None
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{}/", dir)
        };
        self.nodes
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    /// Handle one request body. Returns the reply and whether it answers a READ.
    fn dispatch(&mut self, body: &[u8]) -> (BytesMut, bool) {
        let mut buf = body;
        let opcode = codec::get_u8(&mut buf, "type").unwrap();
        let id = codec::get_u32(&mut buf, "id").unwrap();
        self.requests.push(Logged { opcode, id });

        if let Some((kind, token)) = &self.options.cancel_on {
            if *kind as u8 == opcode {
                token.cancel();
            }
        }

        if opcode == MessageType::Init as u8 {
            let mut reply = BytesMut::new();
            reply.put_u8(MessageType::Version as u8);
            reply.put_u32(self.options.version);
            for (name, value) in &self.options.extensions {
                codec::put_string(&mut reply, name);
                codec::put_string(&mut reply, value);
            }
            return (reply, false);
        }

        let kind = MessageType::try_from(opcode).unwrap();
        let reply = match kind {
            MessageType::Open => {
                let path = codec::get_string(&mut buf).unwrap();
                let flags = OpenFlags(codec::get_u32(&mut buf, "flags").unwrap());
                let attrs = FileAttrs::decode(&mut buf).unwrap();
                self.open_attrs.push(attrs.clone());

                if flags.has_write() {
                    let perm = attrs.permissions.unwrap_or(0o644) & 0o7777;
                    let exists = matches!(self.nodes.get(&path), Some(Node::File { .. }));
                    if !exists && !flags.has_creat() {
                        self.status(id, StatusCode::NoSuchFile)
                    } else {
                        if !exists || flags.has_trunc() {
                            self.add_file(&path, Vec::new(), perm);
                        }
                        self.handle_reply(id, OpenHandle::File(path))
                    }
                } else {
                    match self.resolve(&path) {
                        Some((key, Node::File { .. })) => {
                            let key = key.to_string();
                            self.handle_reply(id, OpenHandle::File(key))
                        }
                        Some(_) => self.status(id, StatusCode::Failure),
                        None => self.status(id, StatusCode::NoSuchFile),
                    }
                }
            }
            MessageType::Close => {
                let handle = codec::get_bytes(&mut buf).unwrap();
                let code = if self.handles.remove(&handle).is_some() {
                    StatusCode::Ok
                } else {
                    StatusCode::Failure
                };
                self.status(id, code)
            }
            MessageType::Read => {
                let handle = codec::get_bytes(&mut buf).unwrap();
                let offset = codec::get_u64(&mut buf, "offset").unwrap() as usize;
                let len = codec::get_u32(&mut buf, "len").unwrap() as usize;

                let reply = match self.handles.get(&handle) {
                    Some(OpenHandle::File(path)) => match self.nodes.get(path) {
                        Some(Node::File { data, .. }) if offset < data.len() => {
                            let end = data.len().min(offset + len.min(self.options.max_read));
                            let mut reply = BytesMut::new();
                            reply.put_u8(MessageType::Data as u8);
                            reply.put_u32(id);
                            codec::put_bytes(&mut reply, &data[offset..end]);
                            reply
                        }
                        Some(Node::File { .. }) => self.status(id, StatusCode::Eof),
                        _ => self.status(id, StatusCode::Failure),
                    },
                    _ => self.status(id, StatusCode::Failure),
                };
                return (reply, true);
            }
            MessageType::Write => {
                let handle = codec::get_bytes(&mut buf).unwrap();
                let offset = codec::get_u64(&mut buf, "offset").unwrap();
                let data = codec::get_bytes(&mut buf).unwrap();

                if self.options.fail_write_from.is_some_and(|limit| offset >= limit) {
                    self.status(id, StatusCode::Failure)
                } else if let Some(OpenHandle::File(path)) = self.handles.get(&handle) {
                    let path = path.clone();
                    match self.nodes.get_mut(&path) {
                        Some(Node::File { data: contents, .. }) => {
                            let start = offset as usize;
                            let end = start + data.len();
                            if contents.len() < end {
                                contents.resize(end, 0);
                            }
                            contents[start..end].copy_from_slice(&data);
                            self.status(id, StatusCode::Ok)
                        }
                        _ => self.status(id, StatusCode::Failure),
                    }
                } else {
                    self.status(id, StatusCode::Failure)
                }
            }
            MessageType::Lstat | MessageType::Stat => {
                let path = codec::get_string(&mut buf).unwrap();
                // Version 0 numbers STAT like LSTAT
                let follow = kind == MessageType::Stat || self.options.version == 0;
                let node = if follow {
                    self.resolve(&path).map(|(_, node)| node)
                } else {
                    self.nodes.get(&path)
                };
                match node.map(Node::attrs) {
                    Some(attrs) => Self::attrs_reply(id, &attrs),
                    None => self.status(id, StatusCode::NoSuchFile),
                }
            }
            MessageType::Fstat => {
                let handle = codec::get_bytes(&mut buf).unwrap();
                match self.handles.get(&handle) {
                    Some(OpenHandle::File(path)) => match self.nodes.get(path) {
                        Some(node) => Self::attrs_reply(id, &node.attrs()),
                        None => self.status(id, StatusCode::NoSuchFile),
                    },
                    _ => self.status(id, StatusCode::Failure),
                }
            }
            MessageType::Setstat | MessageType::Fsetstat => {
                let path = if kind == MessageType::Setstat {
                    Some(codec::get_string(&mut buf).unwrap())
                } else {
                    let handle = codec::get_bytes(&mut buf).unwrap();
                    match self.handles.get(&handle) {
                        Some(OpenHandle::File(path)) => Some(path.clone()),
                        _ => None,
                    }
                };
                let attrs = FileAttrs::decode(&mut buf).unwrap();
                match path.as_ref().and_then(|p| self.nodes.get_mut(p)) {
                    Some(Node::File { perm, mtime, .. }) => {
                        if let Some(p) = attrs.permissions {
                            *perm = p & 0o7777;
                        }
                        if let Some(m) = attrs.mtime {
                            *mtime = m;
                        }
                        self.status(id, StatusCode::Ok)
                    }
                    Some(Node::Dir { perm }) => {
                        if let Some(p) = attrs.permissions {
                            *perm = p & 0o7777;
                        }
                        self.status(id, StatusCode::Ok)
                    }
                    Some(Node::Symlink { .. }) => self.status(id, StatusCode::Failure),
                    None => self.status(id, StatusCode::NoSuchFile),
                }
            }
            MessageType::Opendir => {
                let path = codec::get_string(&mut buf).unwrap();
                match self.resolve(&path) {
                    Some((key, Node::Dir { .. })) => {
                        let key = key.to_string();
                        let mut names = self.children(&key);
                        names.extend(self.options.extra_names.iter().cloned());
                        self.handle_reply(id, OpenHandle::Dir { names, cursor: 0 })
                    }
                    Some(_) => self.status(id, StatusCode::Failure),
                    None => self.status(id, StatusCode::NoSuchFile),
                }
            }
            MessageType::Readdir => {
                let handle = codec::get_bytes(&mut buf).unwrap();
                let batch = self.options.names_per_batch.max(1);
                match self.handles.get_mut(&handle) {
                    Some(OpenHandle::Dir { names, cursor }) => {
                        if *cursor >= names.len() {
                            self.status(id, StatusCode::Eof)
                        } else {
                            let end = names.len().min(*cursor + batch);
                            let entries: Vec<(String, FileAttrs)> = names[*cursor..end]
                                .iter()
                                .map(|name| (name.clone(), FileAttrs::default()))
                                .collect();
                            *cursor = end;
                            Self::name_reply(id, &entries)
                        }
                    }
                    _ => self.status(id, StatusCode::Failure),
                }
            }
            MessageType::Remove => {
                let path = codec::get_string(&mut buf).unwrap();
                match self.nodes.get(&path) {
                    Some(Node::File { .. }) | Some(Node::Symlink { .. }) => {
                        self.nodes.remove(&path);
                        self.status(id, StatusCode::Ok)
                    }
                    Some(Node::Dir { .. }) => self.status(id, StatusCode::Failure),
                    None => self.status(id, StatusCode::NoSuchFile),
                }
            }
            MessageType::Mkdir => {
                let path = codec::get_string(&mut buf).unwrap();
                let attrs = FileAttrs::decode(&mut buf).unwrap();
                if self.nodes.contains_key(&path) {
                    self.status(id, StatusCode::Failure)
                } else {
                    let perm = attrs.permissions.unwrap_or(0o777) & 0o7777;
                    self.nodes.insert(path, Node::Dir { perm });
                    self.status(id, StatusCode::Ok)
                }
            }
            MessageType::Rmdir => {
                let path = codec::get_string(&mut buf).unwrap();
                match self.nodes.get(&path) {
                    Some(Node::Dir { .. }) if self.children(&path).is_empty() => {
                        self.nodes.remove(&path);
                        self.status(id, StatusCode::Ok)
                    }
                    Some(_) => self.status(id, StatusCode::Failure),
                    None => self.status(id, StatusCode::NoSuchFile),
                }
            }
            MessageType::Realpath => {
                let path = codec::get_string(&mut buf).unwrap();
                let resolved = match path.as_str() {
                    "" | "." => "/home".to_string(),
                    p if p.starts_with('/') => p.trim_end_matches("/.").to_string(),
                    p => format!("/home/{}", p),
                };
                Self::name_reply(id, &[(resolved, FileAttrs::default())])
            }
            MessageType::Rename => {
                let old = codec::get_string(&mut buf).unwrap();
                let new = codec::get_string(&mut buf).unwrap();
                let code = self.rename(&old, &new, self.options.rename_overwrites);
                self.status(id, code)
            }
            MessageType::Readlink => {
                let path = codec::get_string(&mut buf).unwrap();
                match self.nodes.get(&path) {
                    Some(Node::Symlink { target }) => {
                        Self::name_reply(id, &[(target.clone(), FileAttrs::default())])
                    }
                    Some(_) => self.status(id, StatusCode::Failure),
                    None => self.status(id, StatusCode::NoSuchFile),
                }
            }
            MessageType::Symlink => {
                let target = codec::get_string(&mut buf).unwrap();
                let link = codec::get_string(&mut buf).unwrap();
                if self.nodes.contains_key(&link) {
                    self.status(id, StatusCode::Failure)
                } else {
                    self.nodes.insert(link, Node::Symlink { target });
                    self.status(id, StatusCode::Ok)
                }
            }
            MessageType::Extended => {
                let name = codec::get_string(&mut buf).unwrap();
                let advertised = self.options.extensions.iter().any(|(n, _)| *n == name);
                match name.as_str() {
                    "posix-rename@openssh.com" if advertised => {
                        let old = codec::get_string(&mut buf).unwrap();
                        let new = codec::get_string(&mut buf).unwrap();
                        let code = self.rename(&old, &new, true);
                        self.status(id, code)
                    }
                    "statvfs@openssh.com" | "fstatvfs@openssh.com" if advertised => {
                        Self::statvfs_reply(id)
                    }
                    _ => self.status(id, StatusCode::OpUnsupported),
                }
            }
            _ => self.status(id, StatusCode::BadMessage),
        };

        (reply, false)
    }

    fn rename(&mut self, old: &str, new: &str, overwrite: bool) -> StatusCode {
        if !self.nodes.contains_key(old) {
            return StatusCode::NoSuchFile;
        }
        if self.nodes.contains_key(new) && !overwrite {
            return StatusCode::Failure;
        }
        match self.nodes.remove(old) {
            Some(node) => {
                self.nodes.insert(new.to_string(), node);
                StatusCode::Ok
            }
            None => StatusCode::NoSuchFile,
        }
    }
}

/// A running server task and the client connected to it
pub struct Harness {
    pub client: TestClient,
    pub server: JoinHandle<MemoryServer>,
}

impl Harness {
    /// Close the client side and hand back the server with its request log
    pub async fn finish(self) -> MemoryServer {
        drop(self.client.into_inner());
        self.server.await.unwrap()
    }
}

/// Start `server` and run the version exchange against it
pub async fn connect(server: MemoryServer, config: &Config) -> Harness {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(server.serve(server_io));
    let (reader, writer) = tokio::io::split(client_io);
    let client = Client::init(reader, writer, config).await.unwrap();
    Harness { client, server }
}

/// Deterministic test payload
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Hand-driven server end for tests that need replies no sane server sends
pub struct Peer {
    io: DuplexStream,
}

impl Peer {
    /// Read the next request and check its type. Returns its id (the version
    /// for INIT) and the full body.
    pub async fn expect(&mut self, kind: MessageType) -> (u32, Vec<u8>) {
        let body = read_frame(&mut self.io).await.unwrap();
        assert_eq!(body[0], kind as u8, "expected {:?}", kind);
        let id = u32::from_be_bytes([body[1], body[2], body[3], body[4]]);
        (id, body)
    }

    pub async fn send(&mut self, body: BytesMut) {
        write_frame(&mut self.io, &body).await.unwrap();
    }

    /// Nothing further was sent by the client
    pub async fn assert_idle(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(50), read_frame(&mut self.io)).await;
        assert!(next.is_err(), "client sent an unexpected request");
    }

    /// Next request if one arrives within `wait`
    pub async fn next_within(&mut self, wait: Duration) -> Option<Vec<u8>> {
        tokio::time::timeout(wait, read_frame(&mut self.io))
            .await
            .ok()
            .map(Result::unwrap)
    }

    pub fn into_inner(self) -> DuplexStream {
        self.io
    }
}

/// Build a reply body of `kind` for request `id`
pub fn reply(kind: MessageType, id: u32, fill: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(kind as u8);
    buf.put_u32(id);
    fill(&mut buf);
    buf
}

/// VERSION reply body
pub fn version_reply(version: u32, extensions: &[(&str, &str)]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(MessageType::Version as u8);
    buf.put_u32(version);
    for (name, value) in extensions {
        codec::put_string(&mut buf, name);
        codec::put_string(&mut buf, value);
    }
    buf
}

/// Connect a client to a hand-driven peer announcing `version`
pub async fn scripted(version: u32) -> (TestClient, Peer) {
    scripted_with(version, &Config::default()).await
}

/// Same as [`scripted`] with a custom client configuration
pub async fn scripted_with(version: u32, config: &Config) -> (TestClient, Peer) {
    let (client_io, server_io) = tokio::io::duplex(512 * 1024);
    let (reader, writer) = tokio::io::split(client_io);
    let mut peer = Peer { io: server_io };

    let (client, ()) = tokio::join!(Client::init(reader, writer, config), async {
        peer.expect(MessageType::Init).await;
        peer.send(version_reply(version, &[])).await;
    });

    let Ok(client) = client else {
        panic!("handshake with scripted peer failed");
    };
    (client, peer)
}
