//! In-process fake ensemble for integration tests.
//!
//! Each member is a real TCP listener on loopback speaking the client
//! protocol. All members share one node tree and one session table, so a
//! client failing over from one member to another resumes its session.
//! Hooks let tests break connections, take members down, stop replying and
//! expire sessions.

#![allow(dead_code)]

pub mod tree;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zkpool::{Client, ClientConfig, EventType, KeeperState, SessionState, Version};
use zkpool_proto::{
    encode_frame, ConnectRequest, ConnectResponse, Decode, Decoder, Encode, Encoder, ErrorCode,
    OpCode, ReplyHeader, Request, RequestHeader, Response, SetWatches, WatcherEvent,
    WATCH_EVENT_XID,
};

use self::tree::{Events, Node, Tree};

/// Install a test subscriber; repeated calls are harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Client configuration tuned for loopback tests.
pub fn test_config() -> ClientConfig {
    ClientConfig::local_network()
}

/// Connect a client to every member of `ensemble`.
pub async fn connect(ensemble: &Ensemble) -> Client {
    Client::connect(&ensemble.connection_string(), test_config())
        .await
        .expect("connect to fake ensemble")
}

/// Wait until the client reports `wanted`, or panic after `limit`.
pub async fn wait_for_state(client: &Client, wanted: SessionState, limit: Duration) {
    let mut states = client.state_changes();
    let reached = tokio::time::timeout(limit, async {
        loop {
            if *states.borrow_and_update() == wanted {
                return;
            }
            if states.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    assert!(reached.is_ok(), "client never reached {wanted:?}");
    assert_eq!(client.state(), wanted);
}

/// Poll `condition` until it holds, or panic after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {limit:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait for the client to finish a new handshake after `handshakes_before`.
pub async fn wait_for_reconnect(client: &Client, ensemble: &Ensemble, handshakes_before: usize) {
    wait_until(Duration::from_secs(3), || {
        ensemble.handshakes() > handshakes_before && client.state() == SessionState::Connected
    })
    .await;
}

/// Misbehaviour applied to the next request that is not a ping.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Never answer it.
    Swallow,
    /// Answer it normally, but under this xid.
    ReplyXid(i32),
    /// Answer it with this error code and an empty body.
    ReplyError(ErrorCode),
}

struct SessionEntry {
    password: Vec<u8>,
    expired: bool,
}

struct Conn {
    member: usize,
    session: i64,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    kill: CancellationToken,
}

#[derive(Default)]
struct State {
    tree: Tree,
    next_session: i64,
    sessions: HashMap<i64, SessionEntry>,
    next_conn: u64,
    conns: HashMap<u64, Conn>,
    data_watches: HashMap<String, HashSet<u64>>,
    child_watches: HashMap<String, HashSet<u64>>,
    swallow: bool,
    faults: VecDeque<Fault>,
    pings: usize,
    reassign: bool,
    handshakes: usize,
}

impl State {
    /// Deliver watch notifications for a batch of mutations.
    fn fire(&mut self, events: Events) {
        for (event_type, path) in events {
            let mut targets = HashSet::new();
            if matches!(
                event_type,
                EventType::NodeCreated | EventType::NodeDataChanged | EventType::NodeDeleted
            ) {
                targets.extend(self.data_watches.remove(&path).unwrap_or_default());
            }
            if matches!(
                event_type,
                EventType::NodeChildrenChanged | EventType::NodeDeleted
            ) {
                targets.extend(self.child_watches.remove(&path).unwrap_or_default());
            }
            for conn in targets {
                self.notify(conn, event_type, &path);
            }
        }
    }

    fn notify(&self, conn: u64, event_type: EventType, path: &str) {
        let Some(conn) = self.conns.get(&conn) else {
            return;
        };
        let header = ReplyHeader {
            xid: WATCH_EVENT_XID,
            zxid: -1,
            err: ErrorCode::Ok,
        };
        let event = WatcherEvent {
            event_type,
            state: KeeperState::SyncConnected,
            path: path.to_string(),
        };
        let mut enc = Encoder::new();
        header.encode(&mut enc);
        event.encode(&mut enc);
        let _ = conn.tx.send(encode_frame(&enc.into_bytes()));
    }

    fn reply(&self, conn: u64, xid: i32, err: ErrorCode, body: &Response) {
        let Some(conn) = self.conns.get(&conn) else {
            return;
        };
        let header = ReplyHeader {
            xid,
            zxid: self.tree.zxid(),
            err,
        };
        let mut enc = Encoder::new();
        header.encode(&mut enc);
        body.encode(&mut enc);
        let _ = conn.tx.send(encode_frame(&enc.into_bytes()));
    }

    fn watch(&mut self, child: bool, path: &str, conn: u64) {
        let table = if child {
            &mut self.child_watches
        } else {
            &mut self.data_watches
        };
        table.entry(path.to_string()).or_default().insert(conn);
    }

    fn forget_conn(&mut self, conn: u64) {
        self.conns.remove(&conn);
        for watchers in self
            .data_watches
            .values_mut()
            .chain(self.child_watches.values_mut())
        {
            watchers.remove(&conn);
        }
    }

    fn end_session(&mut self, session: i64) {
        let events = self.tree.drop_ephemerals(session);
        self.fire(events);
        for conn in self.conns.values().filter(|conn| conn.session == session) {
            conn.kill.cancel();
        }
    }

    /// Re-register replayed watches, firing those whose trigger already happened.
    fn replay(&mut self, conn: u64, watches: SetWatches) {
        let relative = watches.relative_zxid;
        for path in watches.data {
            match self.tree.get(&path).map(|node| node.stat.mzxid) {
                None => self.notify(conn, EventType::NodeDeleted, &path),
                Some(mzxid) if mzxid > relative => {
                    self.notify(conn, EventType::NodeDataChanged, &path)
                }
                Some(_) => self.watch(false, &path, conn),
            }
        }
        for path in watches.exist {
            if self.tree.get(&path).is_some() {
                self.notify(conn, EventType::NodeCreated, &path);
            } else {
                self.watch(false, &path, conn);
            }
        }
        for path in watches.child {
            match self.tree.get(&path).map(|node| node.stat.pzxid) {
                None => self.notify(conn, EventType::NodeDeleted, &path),
                Some(pzxid) if pzxid > relative => {
                    self.notify(conn, EventType::NodeChildrenChanged, &path)
                }
                Some(_) => self.watch(true, &path, conn),
            }
        }
    }

    fn handle(&mut self, conn: u64, header: RequestHeader, request: Request) {
        if self.swallow {
            return;
        }
        let Some(session) = self.conns.get(&conn).map(|conn| conn.session) else {
            return;
        };
        let mut xid = header.xid;
        if matches!(request, Request::Ping) {
            self.pings += 1;
        } else {
            match self.faults.pop_front() {
                None => {}
                Some(Fault::Swallow) => return,
                Some(Fault::ReplyXid(bogus)) => xid = bogus,
                Some(Fault::ReplyError(code)) => {
                    self.reply(conn, xid, code, &Response::Empty);
                    return;
                }
            }
        }
        let outcome: Result<(Response, Events), ErrorCode> = match request {
            Request::Ping => Ok((Response::Empty, Vec::new())),
            Request::SetWatches(watches) => {
                self.reply(conn, xid, ErrorCode::Ok, &Response::Empty);
                self.replay(conn, watches);
                return;
            }
            Request::CloseSession => {
                self.sessions.remove(&session);
                let events = self.tree.drop_ephemerals(session);
                self.reply(conn, xid, ErrorCode::Ok, &Response::Empty);
                self.fire(events);
                if let Some(conn) = self.conns.get(&conn) {
                    conn.kill.cancel();
                }
                return;
            }
            Request::Create {
                path,
                data,
                acl,
                mode,
            } => self
                .tree
                .create(&path, &data, &acl, mode, session)
                .map(|(path, stat, events)| {
                    let stat = (header.op != OpCode::Create).then_some(stat);
                    (Response::Create { path, stat }, events)
                }),
            Request::Delete { path, version } => self
                .tree
                .delete(&path, version)
                .map(|events| (Response::Empty, events)),
            Request::Exists { path, watch } => {
                if watch {
                    self.watch(false, &path, conn);
                }
                match self.tree.get(&path) {
                    Some(node) => Ok((Response::Exists { stat: node.stat }, Vec::new())),
                    None => Err(ErrorCode::NoNode),
                }
            }
            Request::GetData { path, watch } => match self.tree.get(&path).cloned() {
                Some(node) => {
                    if watch {
                        self.watch(false, &path, conn);
                    }
                    Ok((
                        Response::GetData {
                            data: node.data,
                            stat: node.stat,
                        },
                        Vec::new(),
                    ))
                }
                None => Err(ErrorCode::NoNode),
            },
            Request::SetData {
                path,
                data,
                version,
            } => self
                .tree
                .set(&path, &data, version)
                .map(|(stat, events)| (Response::SetData { stat }, events)),
            Request::GetChildren { path, watch } => match self.tree.get(&path).cloned() {
                Some(node) => {
                    if watch {
                        self.watch(true, &path, conn);
                    }
                    Ok((
                        Response::GetChildren {
                            children: node.children.into_iter().collect(),
                            stat: node.stat,
                        },
                        Vec::new(),
                    ))
                }
                None => Err(ErrorCode::NoNode),
            },
            Request::Sync { path } => Ok((Response::Sync { path }, Vec::new())),
            Request::Check { .. } => Err(ErrorCode::Unimplemented),
            Request::Multi(txn) => {
                let (results, applied) = self.tree.multi(&txn, session);
                let err = applied.as_ref().err().copied().unwrap_or(ErrorCode::Ok);
                self.reply(conn, xid, err, &Response::Multi(results));
                if let Ok(events) = applied {
                    self.fire(events);
                }
                return;
            }
        };
        match outcome {
            Ok((body, events)) => {
                self.reply(conn, xid, ErrorCode::Ok, &body);
                self.fire(events);
            }
            Err(code) => self.reply(conn, xid, code, &Response::Empty),
        }
    }
}

struct Member {
    address: String,
    down: Arc<AtomicBool>,
}

/// A set of fake members sharing one tree and one session table.
pub struct Ensemble {
    state: Arc<Mutex<State>>,
    members: Vec<Member>,
    tasks: Vec<JoinHandle<()>>,
    root: CancellationToken,
}

impl Ensemble {
    /// Start `size` members listening on loopback.
    pub async fn start(size: usize) -> Self {
        init_tracing();
        let state = Arc::new(Mutex::new(State {
            next_session: 0x1000,
            ..State::default()
        }));
        let root = CancellationToken::new();
        let mut members = Vec::with_capacity(size);
        let mut tasks = Vec::with_capacity(size);
        for index in 0..size {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let address = listener.local_addr().expect("local addr").to_string();
            let down = Arc::new(AtomicBool::new(false));
            tasks.push(tokio::spawn(accept_loop(
                index,
                listener,
                state.clone(),
                down.clone(),
                root.clone(),
            )));
            members.push(Member { address, down });
        }
        Self {
            state,
            members,
            tasks,
            root,
        }
    }

    /// `host:port,host:port,...` for every member.
    pub fn connection_string(&self) -> String {
        self.members
            .iter()
            .map(|member| member.address.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Connection string scoped to `chroot`.
    pub fn connection_string_with_chroot(&self, chroot: &str) -> String {
        format!("{}{chroot}", self.connection_string())
    }

    /// Address of one member.
    pub fn address(&self, member: usize) -> &str {
        &self.members[member].address
    }

    /// Break every open connection. Sessions survive.
    pub fn drop_connections(&self) {
        for conn in self.state.lock().conns.values() {
            conn.kill.cancel();
        }
    }

    /// Take a member down: its connections break and new ones are refused.
    pub fn stop_member(&self, member: usize) {
        self.members[member].down.store(true, Ordering::SeqCst);
        for conn in self
            .state
            .lock()
            .conns
            .values()
            .filter(|conn| conn.member == member)
        {
            conn.kill.cancel();
        }
    }

    /// Bring a member back.
    pub fn start_member(&self, member: usize) {
        self.members[member].down.store(false, Ordering::SeqCst);
    }

    /// Stop answering requests after the handshake (or resume answering).
    pub fn set_swallow(&self, swallow: bool) {
        self.state.lock().swallow = swallow;
    }

    /// Queue a fault for the next non-ping request. Pings stay answered.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Number of pings answered so far.
    pub fn pings(&self) -> usize {
        self.state.lock().pings
    }

    /// Expire a session and say so on its live connections, which stay open.
    pub fn announce_expiry(&self, session: i64) {
        let mut state = self.state.lock();
        if let Some(entry) = state.sessions.get_mut(&session) {
            entry.expired = true;
        }
        let events = state.tree.drop_ephemerals(session);
        state.fire(events);
        let header = ReplyHeader {
            xid: WATCH_EVENT_XID,
            zxid: -1,
            err: ErrorCode::Ok,
        };
        let event = WatcherEvent {
            event_type: EventType::None,
            state: KeeperState::Expired,
            path: String::new(),
        };
        let mut enc = Encoder::new();
        header.encode(&mut enc);
        event.encode(&mut enc);
        let frame = encode_frame(&enc.into_bytes());
        for conn in state.conns.values().filter(|conn| conn.session == session) {
            let _ = conn.tx.send(frame.clone());
        }
    }

    /// Answer every resume handshake with a brand new session.
    pub fn set_reassign_sessions(&self, reassign: bool) {
        self.state.lock().reassign = reassign;
    }

    /// Expire a session as the ensemble would after its timeout.
    pub fn expire_session(&self, session: i64) {
        let mut state = self.state.lock();
        if let Some(entry) = state.sessions.get_mut(&session) {
            entry.expired = true;
        }
        state.end_session(session);
    }

    /// Member index serving `session` right now, if connected.
    pub fn member_of(&self, session: i64) -> Option<usize> {
        self.state
            .lock()
            .conns
            .values()
            .find(|conn| conn.session == session && !conn.kill.is_cancelled())
            .map(|conn| conn.member)
    }

    /// Number of handshakes served so far.
    pub fn handshakes(&self) -> usize {
        self.state.lock().handshakes
    }

    /// Inspect a node without going through a client.
    pub fn node(&self, path: &str) -> Option<Node> {
        self.state.lock().tree.get(path).cloned()
    }

    /// Overwrite a node's data behind every client's back.
    pub fn set_data(&self, path: &str, data: &[u8]) {
        let mut state = self.state.lock();
        let (_, events) = state
            .tree
            .set(path, data, Version::Any)
            .expect("node to overwrite");
        state.fire(events);
    }
}

impl Drop for Ensemble {
    fn drop(&mut self) {
        self.root.cancel();
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn accept_loop(
    member: usize,
    listener: TcpListener,
    state: Arc<Mutex<State>>,
    down: Arc<AtomicBool>,
    root: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            _ = root.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(error) => {
                    tracing::warn!(%error, "fake member accept failed");
                    return;
                }
            },
        };
        if down.load(Ordering::SeqCst) {
            drop(stream);
            continue;
        }
        tokio::spawn(serve(member, stream, state.clone(), root.child_token()));
    }
}

async fn read_frame(reader: &mut OwnedReadHalf) -> Option<Vec<u8>> {
    let length = reader.read_i32().await.ok()?;
    let mut body = vec![0u8; usize::try_from(length).ok()?];
    reader.read_exact(&mut body).await.ok()?;
    Some(body)
}

async fn serve(member: usize, stream: TcpStream, state: Arc<Mutex<State>>, kill: CancellationToken) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let Some(body) = read_frame(&mut reader).await else {
        return;
    };
    let Ok(request) = ConnectRequest::decode(&mut Decoder::new(&body)) else {
        return;
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (response, conn) = {
        let mut state = state.lock();
        state.handshakes += 1;
        let resumed = state
            .sessions
            .get(&request.session_id)
            .map(|entry| !entry.expired && entry.password == request.password);
        let session = match resumed {
            _ if request.session_id == 0 || state.reassign => {
                state.next_session += 1;
                let session = state.next_session;
                let mut password = session.to_be_bytes().to_vec();
                password.extend_from_slice(&session.to_be_bytes());
                state.sessions.insert(
                    session,
                    SessionEntry {
                        password,
                        expired: false,
                    },
                );
                Some(session)
            }
            Some(true) => Some(request.session_id),
            _ => None,
        };
        match session {
            Some(session) => {
                let password = state.sessions[&session].password.clone();
                state.next_conn += 1;
                let conn = state.next_conn;
                state.conns.insert(
                    conn,
                    Conn {
                        member,
                        session,
                        tx,
                        kill: kill.clone(),
                    },
                );
                let response = ConnectResponse {
                    protocol_version: 0,
                    timeout_ms: request.timeout_ms,
                    session_id: session,
                    password,
                    read_only: false,
                };
                (response, Some(conn))
            }
            None => (ConnectResponse::expired(), None),
        }
    };

    let mut enc = Encoder::new();
    response.encode(&mut enc);
    if writer.write_all(&encode_frame(&enc.into_bytes())).await.is_err() {
        if let Some(conn) = conn {
            state.lock().forget_conn(conn);
        }
        return;
    }
    let Some(conn) = conn else {
        return;
    };

    // Drains until the conn entry (and with it the sender) is removed.
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        let body = tokio::select! {
            _ = kill.cancelled() => break,
            body = read_frame(&mut reader) => match body {
                Some(body) => body,
                None => break,
            },
        };
        let mut dec = Decoder::new(&body);
        let decoded = RequestHeader::decode(&mut dec)
            .and_then(|header| Request::decode_body(header.op, &mut dec).map(|request| (header, request)));
        match decoded {
            Ok((header, request)) => state.lock().handle(conn, header, request),
            Err(error) => {
                tracing::warn!(%error, "fake member got a malformed request");
                break;
            }
        }
    }

    state.lock().forget_conn(conn);
    let _ = writer_task.await;
}
