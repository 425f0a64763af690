//! Server behaviour observed from TCP clients.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use jt808::{
    connection::{ConnectionId, ConnectionStats},
    handler::{HandlerRegistry, command},
    hooks::ConnectionObserver,
    message::Message,
    reassembly::StreamReassembler,
    server::{Server, ServerError},
    session::{ActiveRequest, SessionKey},
};
use jt808_testing::{DEFAULT_SESSION_KEY, DeviceFrame};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    task::JoinHandle,
    time::timeout,
};

#[derive(Default)]
struct Journal {
    joined: Mutex<Vec<SessionKey>>,
    refused: Mutex<Vec<SessionKey>>,
    closed: Mutex<Vec<ConnectionStats>>,
}

impl ConnectionObserver for Journal {
    fn on_session_joined(&self, _id: ConnectionId, key: &SessionKey) {
        self.joined.lock().expect("lock").push(key.clone());
    }

    fn on_session_refused(&self, _id: ConnectionId, key: &SessionKey) {
        self.refused.lock().expect("lock").push(key.clone());
    }

    fn on_closed(&self, _id: ConnectionId, stats: &ConnectionStats) {
        self.closed.lock().expect("lock").push(*stats);
    }
}

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
    addr: std::net::SocketAddr,
    directory: jt808::session::SessionDirectory,
}

async fn start(journal: &Arc<Journal>) -> Running {
    let (ready_tx, ready_rx) = oneshot::channel();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let server = Server::new(HandlerRegistry::new)
        .with_shared_observer(journal.clone())
        .ready_signal(ready_tx)
        .bind(([127, 0, 0, 1], 0).into())
        .expect("bind loopback");
    let addr = server.local_addr().expect("bound address");
    let directory = server.directory();
    let task = tokio::spawn(server.run_with_shutdown(async {
        let _ = stop_rx.await;
    }));
    ready_rx.await.expect("server ready");
    Running {
        stop,
        task,
        addr,
        directory,
    }
}

async fn exchange(stream: &mut TcpStream, frame: DeviceFrame) -> Message {
    stream.write_all(&frame.encode()).await.expect("write");
    let mut reassembler = StreamReassembler::new();
    let mut buf = [0_u8; 256];
    loop {
        let n = timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("reply in time")
            .expect("read");
        assert_ne!(n, 0, "server closed the connection");
        if let Some(message) = reassembler.feed(&buf[..n]).messages.pop() {
            return message;
        }
    }
}

#[tokio::test]
async fn second_connection_for_a_live_device_keeps_the_first_registered() {
    let journal = Arc::new(Journal::default());
    let running = start(&journal).await;

    let mut first = TcpStream::connect(running.addr).await.expect("connect");
    exchange(&mut first, DeviceFrame::heartbeat(1)).await;
    let mut second = TcpStream::connect(running.addr).await.expect("connect");
    for serial in 1..=3 {
        let ack = exchange(&mut second, DeviceFrame::heartbeat(serial)).await;
        assert_eq!(ack.command_id(), command::PLATFORM_REPLY);
    }

    assert_eq!(running.directory.len().await, 1);
    assert_eq!(
        *journal.joined.lock().expect("lock"),
        vec![SessionKey::from(DEFAULT_SESSION_KEY)]
    );
    assert_eq!(
        *journal.refused.lock().expect("lock"),
        vec![SessionKey::from(DEFAULT_SESSION_KEY)]
    );

    let caller = tokio::spawn({
        let directory = running.directory.clone();
        async move {
            directory
                .send_command(ActiveRequest::new(DEFAULT_SESSION_KEY, 0x8104, Vec::new()))
                .await
        }
    });
    let mut buf = [0_u8; 256];
    let n = timeout(Duration::from_secs(2), first.read(&mut buf))
        .await
        .expect("command reaches the registered device")
        .expect("read");
    let command = StreamReassembler::new()
        .feed(&buf[..n])
        .messages
        .pop()
        .expect("one command frame");
    first
        .write_all(&DeviceFrame::terminal_reply(2, command.serial(), 0x8104, 0).encode())
        .await
        .expect("write");
    caller.await.expect("join").expect("device replied");

    drop(first);
    drop(second);
    running.stop.send(()).expect("server running");
    running.task.await.expect("join").expect("clean shutdown");
    assert_eq!(journal.closed.lock().expect("lock").len(), 2);
    assert!(running.directory.is_empty().await);
}

#[tokio::test]
async fn shutdown_closes_idle_devices() {
    let journal = Arc::new(Journal::default());
    let running = start(&journal).await;
    let mut device = TcpStream::connect(running.addr).await.expect("connect");
    exchange(&mut device, DeviceFrame::heartbeat(1)).await;

    running.stop.send(()).expect("server running");
    timeout(Duration::from_secs(2), running.task)
        .await
        .expect("shutdown completes with a device connected")
        .expect("join")
        .expect("clean shutdown");

    let mut buf = [0_u8; 8];
    let closed = timeout(Duration::from_secs(2), device.read(&mut buf))
        .await
        .expect("device sees the close");
    assert!(matches!(closed, Ok(0) | Err(_)));
}
