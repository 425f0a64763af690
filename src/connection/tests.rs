use std::{
    io,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex},
    sync::{mpsc, watch},
    task::JoinHandle,
    time::timeout,
};

use super::*;
use crate::{
    codec::{FrameError, Header, ProtocolVersion, encode_frame},
    handler::{Handler, HandlerError, ReplyResult, command, general_reply_body},
    message::Message,
    session::{ActiveCommandError, ActiveRequest, SessionKey},
};

const PHONE: &str = "13800138000";
const KEY: &str = "013800138000";

fn device_frame(command_id: u16, serial: u16, body: &[u8]) -> BytesMut {
    let header = Header::new(command_id, PHONE, ProtocolVersion::V2013)
        .expect("valid phone")
        .with_serial(serial);
    encode_frame(header, body).expect("frame encodes")
}

async fn read_messages(
    client: &mut DuplexStream,
    reassembler: &mut StreamReassembler,
    count: usize,
) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut buf = [0_u8; 512];
    while messages.len() < count {
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("frame arrives in time")
            .expect("client read");
        assert_ne!(n, 0, "connection closed early");
        messages.extend(reassembler.feed(&buf[..n]).messages);
    }
    messages
}

fn spawn_connection(
    connection: Connection<DuplexStream>,
) -> JoinHandle<Result<ConnectionStats, ConnectionError>> {
    tokio::spawn(connection.run())
}

#[derive(Default)]
struct Recorder {
    unsupported: Mutex<Vec<u16>>,
    frame_errors: AtomicUsize,
    joined: Mutex<Vec<SessionKey>>,
    closed: AtomicUsize,
}

impl ConnectionObserver for Recorder {
    fn on_unsupported(&self, _id: ConnectionId, message: &Message) {
        self.unsupported
            .lock()
            .expect("lock")
            .push(message.command_id());
    }

    fn on_frame_error(&self, _id: ConnectionId, _error: &FrameError) {
        self.frame_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn on_session_joined(&self, _id: ConnectionId, key: &SessionKey) {
        self.joined.lock().expect("lock").push(key.clone());
    }

    fn on_closed(&self, _id: ConnectionId, _stats: &ConnectionStats) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }
}

#[tokio::test]
async fn registration_is_answered_with_auth_code() {
    let (mut client, server) = duplex(4096);
    let task = spawn_connection(Connection::new(server, HandlerRegistry::with_defaults()));

    client
        .write_all(&device_frame(command::REGISTRATION, 5, &[0; 37]))
        .await
        .expect("write");
    let mut reassembler = StreamReassembler::new();
    let replies = read_messages(&mut client, &mut reassembler, 1).await;

    let reply = &replies[0];
    assert_eq!(reply.command_id(), command::REGISTRATION_REPLY);
    assert_eq!(reply.serial(), 0);
    assert_eq!(reply.phone(), KEY);
    assert_eq!(&reply.body[..3], &[0x00, 0x05, 0x00]);
    assert_eq!(&reply.body[3..], KEY.as_bytes());

    drop(client);
    let stats = task.await.expect("join").expect("clean close");
    assert_eq!(stats.frames_read, 1);
    assert_eq!(stats.replies_written, 1);
}

#[tokio::test]
async fn platform_serial_increments_per_reply() {
    let (mut client, server) = duplex(4096);
    let task = spawn_connection(Connection::new(server, HandlerRegistry::with_defaults()));

    let mut chunk = device_frame(command::HEARTBEAT, 40, &[]);
    chunk.extend_from_slice(&device_frame(command::HEARTBEAT, 41, &[]));
    chunk.extend_from_slice(&device_frame(command::HEARTBEAT, 42, &[]));
    client.write_all(&chunk).await.expect("write");

    let mut reassembler = StreamReassembler::new();
    let replies = read_messages(&mut client, &mut reassembler, 3).await;
    let platform: Vec<_> = replies.iter().map(Message::serial).collect();
    let acked: Vec<_> = replies
        .iter()
        .map(|reply| u16::from_be_bytes([reply.body[0], reply.body[1]]))
        .collect();
    assert_eq!(platform, vec![0, 1, 2]);
    assert_eq!(acked, vec![40, 41, 42]);

    drop(client);
    task.await.expect("join").expect("clean close");
}

#[tokio::test]
async fn unsupported_and_corrupt_frames_are_reported_and_skipped() {
    let (mut client, server) = duplex(4096);
    let recorder = Arc::new(Recorder::default());
    let connection = Connection::new(server, HandlerRegistry::with_defaults())
        .with_shared_observer(recorder.clone());
    let task = spawn_connection(connection);

    let mut chunk = BytesMut::from(&[0x7e, 0x01, 0x02, 0x7e][..]);
    chunk.extend_from_slice(&device_frame(0x0900, 1, &[0xaa]));
    chunk.extend_from_slice(&device_frame(command::HEARTBEAT, 2, &[]));
    client.write_all(&chunk).await.expect("write");

    let mut reassembler = StreamReassembler::new();
    let replies = read_messages(&mut client, &mut reassembler, 1).await;
    assert_eq!(&replies[0].body[..], &[0x00, 0x02, 0x00, 0x02, 0x00]);

    drop(client);
    let stats = task.await.expect("join").expect("clean close");
    assert_eq!(stats.frames_read, 2);
    assert_eq!(stats.frame_errors, 1);
    assert_eq!(*recorder.unsupported.lock().expect("lock"), vec![0x0900]);
    assert_eq!(recorder.frame_errors.load(Ordering::Relaxed), 1);
    assert_eq!(recorder.closed.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn undecodable_body_gets_no_reply() {
    let (mut client, server) = duplex(4096);
    let task = spawn_connection(Connection::new(server, HandlerRegistry::with_defaults()));

    let mut chunk = device_frame(command::LOCATION_REPORT, 1, &[0; 4]);
    chunk.extend_from_slice(&device_frame(command::HEARTBEAT, 2, &[]));
    client.write_all(&chunk).await.expect("write");

    let mut reassembler = StreamReassembler::new();
    let replies = read_messages(&mut client, &mut reassembler, 1).await;
    assert_eq!(&replies[0].body[2..4], &[0x00, 0x02]);

    drop(client);
    let stats = task.await.expect("join").expect("clean close");
    assert_eq!(stats.replies_written, 1);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (_client, server) = duplex(64);
    let connection = Connection::new(server, HandlerRegistry::with_defaults());
    let handle = connection.handle();
    let task = spawn_connection(connection);

    tokio::task::yield_now().await;
    assert!(handle.stop());
    assert!(!handle.stop());
    let stats = task.await.expect("join").expect("clean stop");
    assert_eq!(stats, ConnectionStats::default());
    assert_eq!(handle.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn stopped_connection_never_runs() {
    let (_client, server) = duplex(64);
    let connection = Connection::new(server, HandlerRegistry::with_defaults());
    assert!(connection.handle().stop());
    assert_eq!(connection.state(), ConnectionState::Stopped);
    let stats = connection.run().await.expect("no-op run");
    assert_eq!(stats, ConnectionStats::default());
}

async fn joined_connection() -> (
    DuplexStream,
    SessionDirectory,
    JoinHandle<Result<ConnectionStats, ConnectionError>>,
    StreamReassembler,
) {
    let (directory, table) = SessionDirectory::channel(16);
    tokio::spawn(table.run());
    let (mut client, server) = duplex(4096);
    let task = spawn_connection(
        Connection::new(server, HandlerRegistry::with_defaults()).with_directory(directory.clone()),
    );

    client
        .write_all(&device_frame(command::HEARTBEAT, 1, &[]))
        .await
        .expect("write");
    let mut reassembler = StreamReassembler::new();
    read_messages(&mut client, &mut reassembler, 1).await;
    assert!(
        directory.session(&SessionKey::from(KEY)).await.is_some(),
        "connection joined before replying"
    );
    (client, directory, task, reassembler)
}

#[tokio::test]
async fn active_command_resolves_with_general_reply() {
    let (mut client, directory, task, mut reassembler) = joined_connection().await;

    let caller = tokio::spawn({
        let directory = directory.clone();
        async move {
            directory
                .send_command(ActiveRequest::new(KEY, 0x8201, Vec::new()))
                .await
        }
    });

    let commands = read_messages(&mut client, &mut reassembler, 1).await;
    let sent = &commands[0];
    assert_eq!(sent.command_id(), 0x8201);
    assert_eq!(sent.phone(), KEY);
    assert_eq!(sent.serial(), 1);

    let [hi, lo] = sent.serial().to_be_bytes();
    client
        .write_all(&device_frame(
            command::TERMINAL_REPLY,
            2,
            &[hi, lo, 0x82, 0x01, 0x00],
        ))
        .await
        .expect("write");

    let reply = caller.await.expect("join").expect("device replied");
    assert_eq!(reply.command_id(), command::TERMINAL_REPLY);
    assert_eq!(&reply.body[2..4], &[0x82, 0x01]);

    drop(client);
    let stats = task.await.expect("join").expect("clean close");
    assert_eq!(stats.commands_written, 1);
    assert!(directory.is_empty().await, "connection left on close");
}

#[tokio::test]
async fn second_command_while_first_pending_is_rejected() {
    let (mut client, directory, task, mut reassembler) = joined_connection().await;

    let first = tokio::spawn({
        let directory = directory.clone();
        async move {
            directory
                .send_command(ActiveRequest::new(KEY, 0x8201, Vec::new()))
                .await
        }
    });
    read_messages(&mut client, &mut reassembler, 1).await;

    let second = directory
        .send_command(ActiveRequest::new(KEY, 0x8202, Vec::new()))
        .await;
    assert_eq!(second, Err(ActiveCommandError::InFlight));

    first.abort();
    drop(client);
    task.await.expect("join").expect("clean close");
}

#[tokio::test]
async fn session_join_is_reported_once() {
    let (directory, table) = SessionDirectory::channel(16);
    tokio::spawn(table.run());
    let recorder = Arc::new(Recorder::default());
    let (mut client, server) = duplex(4096);
    let task = spawn_connection(
        Connection::new(server, HandlerRegistry::with_defaults())
            .with_directory(directory.clone())
            .with_shared_observer(recorder.clone()),
    );

    let mut chunk = device_frame(command::HEARTBEAT, 1, &[]);
    chunk.extend_from_slice(&device_frame(command::HEARTBEAT, 2, &[]));
    client.write_all(&chunk).await.expect("write");
    let mut reassembler = StreamReassembler::new();
    read_messages(&mut client, &mut reassembler, 2).await;

    let info = directory
        .session(&SessionKey::from(KEY))
        .await
        .expect("session registered");
    assert_eq!(info.header.serial, 2);
    assert_eq!(
        *recorder.joined.lock().expect("lock"),
        vec![SessionKey::from(KEY)]
    );

    drop(client);
    task.await.expect("join").expect("clean close");
}

type WriteOutcomes = Arc<Mutex<Vec<Result<u16, io::ErrorKind>>>>;

/// Heartbeat handler recording each write outcome by reply serial.
struct RecordingHeartbeat(WriteOutcomes);

impl Handler for RecordingHeartbeat {
    fn command_id(&self) -> u16 { command::HEARTBEAT }

    fn reply_id(&self) -> u16 { command::PLATFORM_REPLY }

    fn build_reply(&self, message: &Message) -> Result<Bytes, HandlerError> {
        Ok(general_reply_body(message, ReplyResult::Success))
    }

    fn on_write(&self, reply: &Message, outcome: Result<(), &io::Error>) {
        self.0
            .lock()
            .expect("lock")
            .push(outcome.map(|()| reply.serial()).map_err(io::Error::kind));
    }
}

fn recording_heartbeat() -> (HandlerRegistry, WriteOutcomes) {
    let outcomes = WriteOutcomes::default();
    let handlers = HandlerRegistry::new().with(RecordingHeartbeat(Arc::clone(&outcomes)));
    (handlers, outcomes)
}

#[tokio::test]
async fn write_hook_sees_written_reply() {
    let (handlers, outcomes) = recording_heartbeat();
    let (mut client, server) = duplex(4096);
    let task = spawn_connection(Connection::new(server, handlers));

    client
        .write_all(&device_frame(command::HEARTBEAT, 7, &[]))
        .await
        .expect("write");
    let mut reassembler = StreamReassembler::new();
    read_messages(&mut client, &mut reassembler, 1).await;

    drop(client);
    task.await.expect("join").expect("clean close");
    assert_eq!(*outcomes.lock().expect("lock"), vec![Ok(0)]);
}

#[tokio::test]
async fn write_hook_sees_failed_write() {
    let (handlers, outcomes) = recording_heartbeat();
    let (mut client, server) = duplex(4096);
    let task = spawn_connection(Connection::new(server, handlers));

    client
        .write_all(&device_frame(command::HEARTBEAT, 7, &[]))
        .await
        .expect("write");
    drop(client);

    let outcome = task.await.expect("join");
    assert!(matches!(outcome, Err(ConnectionError::Write(_))));
    assert_eq!(
        *outcomes.lock().expect("lock"),
        vec![Err(io::ErrorKind::BrokenPipe)]
    );
}

#[test]
fn platform_serial_wraps_after_u16_max() {
    let (_reply_tx, replies) = mpsc::channel(1);
    let (_command_tx, commands) = mpsc::channel(1);
    let (_header_tx, latest_header) = watch::channel(None);
    let mut writer = WritePath {
        id: ConnectionId::new(1),
        sink: FramedWrite::new(tokio::io::sink(), FrameEncoder),
        replies,
        commands,
        latest_header,
        pending: Arc::default(),
        counters: Arc::default(),
        next_serial: u16::MAX - 1,
    };

    let serials: Vec<_> = (0..3).map(|_| writer.take_serial()).collect();
    assert_eq!(serials, vec![u16::MAX - 1, u16::MAX, 0]);
}
