// End-to-end behaviour against a live node on an ephemeral port
use std::fs;
use std::net::TcpListener;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::Receiver;
use nodelink_client::{
    download, upload, ClientConfig, ClientError, Connection, ConnectionState, Message,
    MessageType, Payload, Progress, SenderId, Session,
};
use nodelink_daemon::{DaemonConfig, NodeServer, ServerEvent};
use tempfile::TempDir;

struct Node {
    dir: TempDir,
    addr: String,
    events: Receiver<ServerEvent>,
}

impl Node {
    fn start() -> Node {
        let dir = tempfile::tempdir().unwrap();
        let server = NodeServer::bind(DaemonConfig::ephemeral(dir.path().join("store"))).unwrap();
        let addr = server.local_address().unwrap();
        let events = server.events();
        server.spawn().unwrap();
        Node { dir, addr, events }
    }

    fn config(&self) -> ClientConfig {
        ClientConfig {
            read_timeout: Duration::from_secs(5),
            download_dir: self.dir.path().join("downloads"),
            ..ClientConfig::default()
        }
    }

    fn connect(&self) -> Connection {
        let mut conn = Connection::new(self.config());
        conn.connect(Some(&self.addr)).unwrap();
        conn
    }

    fn store(&self) -> std::path::PathBuf {
        self.dir.path().join("store")
    }

    /// Next event matching `pred`, skipping the rest.
    fn wait_for(&self, pred: impl Fn(&ServerEvent) -> bool) -> ServerEvent {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(left) {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(_) => panic!("node never reported the expected event"),
            }
        }
    }
}

fn wait_until(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition never became true");
        thread::sleep(Duration::from_millis(10));
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

fn write_file(dir: &Path, name: &str, data: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, data).unwrap();
    path
}

#[test]
fn unreachable_node_leaves_connection_disconnected() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut conn = Connection::new(ClientConfig::default());

    let err = conn.connect(Some(&format!(":{}", port))).unwrap_err();

    assert!(matches!(err, ClientError::Dial { .. }), "{:?}", err);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.remote_address(), None);
}

#[test]
fn connect_state_and_close() {
    let node = Node::start();
    let mut conn = node.connect();

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.remote_address().as_deref(), Some(node.addr.as_str()));
    assert!(conn.connected_since().is_some());
    assert!(conn.status_line().contains(&node.addr));
    node.wait_for(|e| matches!(e, ServerEvent::PeerConnected { .. }));

    let again = conn.connect(Some(&node.addr)).unwrap_err();
    assert!(matches!(again, ClientError::AlreadyConnected(_)));

    assert_eq!(conn.disconnect().unwrap(), node.addr);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.remote_address(), None);
    assert!(matches!(conn.disconnect(), Err(ClientError::NotConnected)));
    node.wait_for(|e| matches!(e, ServerEvent::PeerClosed { error: None, .. }));

    // a closed connection can be reopened
    conn.connect(Some(&node.addr)).unwrap();
    assert!(conn.is_connected());
}

#[test]
fn peer_closing_flips_state() {
    let node = Node::start();
    let conn = node.connect();

    // a declared length below two is malformed, the node hangs up
    conn.send_raw(&[1, 0]).unwrap();
    node.wait_for(|e| matches!(e, ServerEvent::PeerClosed { error: Some(_), .. }));

    wait_until(|| conn.state() == ConnectionState::Disconnected);
    assert_eq!(conn.remote_address(), None);
    assert!(matches!(conn.send_raw(b"x"), Err(ClientError::NotConnected)));
}

#[test]
fn auth_frame_reaches_the_node() {
    let node = Node::start();
    let mut session = Session::new(node.config());
    let mut sink = |_: Progress| {};

    let res = session.run_line(&format!("connect {}", node.addr), &mut sink).unwrap();
    assert!(res.is_success(), "{}", res);
    let res = session.run_line("send auth", &mut sink).unwrap();
    assert_eq!(res.to_string(), "[ok] sent 11 bytes (auth)");

    let ServerEvent::FrameReceived { frame, .. } =
        node.wait_for(|e| matches!(e, ServerEvent::FrameReceived { .. }))
    else {
        unreachable!()
    };
    assert_eq!(frame.message_type, MessageType::PresentItself);
    assert_eq!(frame.sender_id, SenderId(u64::MAX));
    assert_eq!(frame.encoded_len(), 11);
    node.wait_for(|e| matches!(e, ServerEvent::PeerPresented { .. }));
}

#[test]
fn upload_then_download_round_trip() {
    let node = Node::start();
    let conn = node.connect();
    let local = tempfile::tempdir().unwrap();
    let data = pattern(10_000);
    let source = write_file(local.path(), "report.bin", &data);

    let mut sent = Vec::new();
    let report = upload(&conn, &source, &mut |p: Progress| sent.push(p)).unwrap();
    assert_eq!(report.size, 10_000);
    assert_eq!(report.chunks, 3);
    assert_eq!(sent.last(), Some(&Progress::ChunkSent { index: 3, total: 3 }));

    node.wait_for(|e| matches!(e, ServerEvent::FileStored { size: 10_000, .. }));
    assert_eq!(fs::read(node.store().join("report.bin")).unwrap(), data);

    let dest = local.path().join("fetched");
    let mut received = Vec::new();
    let mut sink = |p: Progress| received.push(p);
    let report = download(&conn, "report.bin", Some(dest.as_path()), &mut sink).unwrap();

    assert_eq!(report.path, dest.join("report.bin"));
    assert_eq!(report.chunks, 3);
    assert_eq!(fs::read(&report.path).unwrap(), data);
    assert!(received.contains(&Progress::Received {
        received: 10_000,
        expected: 10_000
    }));
    assert!(conn.is_connected());
}

#[test]
fn empty_files_transfer() {
    let node = Node::start();
    let conn = node.connect();
    let local = tempfile::tempdir().unwrap();
    let source = write_file(local.path(), "empty", b"");

    let report = upload(&conn, &source, &mut |_: Progress| {}).unwrap();
    assert_eq!(report.chunks, 0);
    node.wait_for(|e| matches!(e, ServerEvent::FileStored { size: 0, .. }));

    let report = download(&conn, "empty", None, &mut |_: Progress| {}).unwrap();
    assert_eq!(report.path, node.dir.path().join("downloads").join("empty"));
    assert!(fs::read(&report.path).unwrap().is_empty());
}

#[test]
fn missing_file_is_refused_and_connection_survives() {
    let node = Node::start();
    let conn = node.connect();

    let err = download(&conn, "nowhere.txt", None, &mut |_: Progress| {}).unwrap_err();
    assert!(matches!(err, ClientError::Refused { ref name } if name == "nowhere.txt"));
    assert!(conn.is_connected());

    node.wait_for(|e| matches!(e, ServerEvent::RequestRefused { .. }));
    assert!(!node.dir.path().join("downloads").join("nowhere.txt").exists());
}

#[test]
fn traversal_names_never_reach_the_wire() {
    let node = Node::start();
    let conn = node.connect();

    for name in ["../escape", "a/b", ".."] {
        let err = download(&conn, name, None, &mut |_: Progress| {}).unwrap_err();
        assert!(matches!(err, ClientError::Usage(_)), "{}: {:?}", name, err);
    }

    // the first frame the node sees is the one sent afterwards
    conn.send_message(&Message::new(Payload::StatusOk)).unwrap();
    let ServerEvent::FrameReceived { frame, .. } =
        node.wait_for(|e| matches!(e, ServerEvent::FrameReceived { .. }))
    else {
        unreachable!()
    };
    assert_eq!(frame.message_type, MessageType::StatusOk);
}

#[test]
fn oversized_download_is_declined() {
    let node = Node::start();
    let local = tempfile::tempdir().unwrap();
    let source = write_file(local.path(), "big.bin", &pattern(5000));

    let conn = node.connect();
    upload(&conn, &source, &mut |_: Progress| {}).unwrap();
    node.wait_for(|e| matches!(e, ServerEvent::FileStored { .. }));

    let mut small = Connection::new(ClientConfig {
        max_file_size: 1000,
        ..node.config()
    });
    small.connect(Some(&node.addr)).unwrap();
    let err = download(&small, "big.bin", None, &mut |_: Progress| {}).unwrap_err();
    assert!(matches!(err, ClientError::TooLarge { size: 5000, limit: 1000 }));

    // the node was told no and keeps the peer
    let declined = |e: &ServerEvent| {
        matches!(e, ServerEvent::FrameReceived { frame, .. }
            if frame.message_type == MessageType::StatusNotOk)
    };
    let ServerEvent::FrameReceived { frame, .. } = node.wait_for(declined) else {
        unreachable!()
    };
    assert_eq!(frame.payload.len(), 0);
    assert!(small.is_connected());
}

#[test]
fn upload_needs_a_connection() {
    let local = tempfile::tempdir().unwrap();
    let source = write_file(local.path(), "f", b"data");
    let conn = Connection::new(ClientConfig::default());

    let err = upload(&conn, &source, &mut |_: Progress| {}).unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[test]
fn cancel_unblocks_a_pending_read() {
    let node = Node::start();
    let conn = node.connect();
    let cancel = conn.cancel_handle();

    let mut exchange = conn.exchange().unwrap();
    assert!(matches!(conn.exchange(), Err(ClientError::Busy)));

    let started = Instant::now();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        cancel.cancel()
    });
    // the node never speaks first, only cancellation can end this read
    let err = exchange.read_frame().unwrap_err();
    drop(exchange);

    assert!(canceller.join().unwrap());
    assert!(matches!(err, ClientError::ConnectionLost), "{:?}", err);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[test]
fn idle_read_times_out_quietly() {
    let node = Node::start();
    let conn = node.connect();

    let err = conn.read_idle(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, ClientError::TimedOut));
    assert!(conn.is_connected());
}
