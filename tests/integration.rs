//! End-to-end connection lifecycle tests.
//!
//! Each test plays the HAProxy side of a connection over an in-memory
//! duplex pipe: encode frames, feed them to a worker, and assert on the
//! frames coming back.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use spop_agent::protocol::{flags, Frame, FrameCodec, FramePayload, FrameType, Message};
use spop_agent::{
    worker, AgentConfig, BoxFuture, Handler, HandlerFn, Request, Scope, TypedData,
    DEFAULT_MAX_FRAME_SIZE, SPOP_VERSION,
};

const ENGINE_ID: &str = "engine-1";
const RECV_DEADLINE: Duration = Duration::from_secs(5);

/// The HAProxy side of a connection under test.
struct Peer {
    conn: DuplexStream,
    codec: FrameCodec,
    inbox: VecDeque<Frame>,
}

impl Peer {
    fn new(conn: DuplexStream) -> Self {
        Self {
            conn,
            codec: FrameCodec::new(DEFAULT_MAX_FRAME_SIZE),
            inbox: VecDeque::new(),
        }
    }

    async fn send(&mut self, frame: Frame) {
        let bytes = frame.encode(DEFAULT_MAX_FRAME_SIZE).unwrap();
        self.conn.write_all(&bytes).await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.conn.write_all(bytes).await.unwrap();
    }

    /// Next frame from the agent, or `None` once the agent closes.
    async fn recv(&mut self) -> Option<Frame> {
        loop {
            if let Some(frame) = self.inbox.pop_front() {
                return Some(frame);
            }
            let mut buf = [0u8; 4096];
            let n = timeout(RECV_DEADLINE, self.conn.read(&mut buf))
                .await
                .expect("agent did not respond in time")
                .unwrap();
            if n == 0 {
                return None;
            }
            self.inbox.extend(self.codec.push(&buf[..n]).unwrap());
        }
    }

    async fn hello(&mut self) {
        self.send(Frame::haproxy_hello(
            SPOP_VERSION,
            DEFAULT_MAX_FRAME_SIZE,
            "pipelining",
            false,
            ENGINE_ID,
        ))
        .await;
        let frame = self.recv().await.expect("no hello answer");
        assert_eq!(frame.frame_type(), FrameType::AgentHello);
    }
}

/// Route agent logs through the test harness when `RUST_LOG` asks.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn spawn_worker<H: Handler>(handler: H, config: AgentConfig) -> (Peer, JoinHandle<()>) {
    init_tracing();
    let (agent_side, peer_side) = duplex(64 * 1024);
    let task = tokio::spawn(worker::handle(agent_side, Arc::new(handler), config));
    (Peer::new(peer_side), task)
}

fn echo_score_handler() -> impl Handler {
    HandlerFn(|req: &mut Request| {
        let score = req
            .message("check-client-ip")
            .and_then(|msg| msg.arg("score"))
            .and_then(|v| v.as_u32());
        if let Some(score) = score {
            req.set_var(Scope::Transaction, "ip_score", TypedData::Uint32(score));
        }
    })
}

fn notify_with_score(stream_id: u64, frame_id: u64, score: u32) -> Frame {
    Frame::notify(
        stream_id,
        frame_id,
        vec![Message::new(
            "check-client-ip",
            vec![("score".to_string(), TypedData::Uint32(score))],
        )],
    )
}

#[tokio::test]
async fn test_full_lifecycle() {
    let (mut peer, task) = spawn_worker(echo_score_handler(), AgentConfig::default());

    // Handshake.
    peer.send(Frame::haproxy_hello(
        "1.0,2.0",
        DEFAULT_MAX_FRAME_SIZE,
        "pipelining",
        false,
        ENGINE_ID,
    ))
    .await;

    let hello = peer.recv().await.expect("no agent hello");
    assert!(hello.flags & flags::FIN == flags::FIN);
    match &hello.payload {
        FramePayload::AgentHello {
            version,
            max_frame_size,
            capabilities,
        } => {
            assert_eq!(version, SPOP_VERSION);
            assert_eq!(*max_frame_size, DEFAULT_MAX_FRAME_SIZE);
            assert_eq!(capabilities, "pipelining,async");
        }
        other => panic!("expected agent hello, got {:?}", other),
    }

    // One notify, one ack mirroring its ids.
    peer.send(notify_with_score(1, 1, 42)).await;
    let ack = peer.recv().await.expect("no ack");
    assert_eq!(ack.stream_id, 1);
    assert_eq!(ack.frame_id, 1);
    match &ack.payload {
        FramePayload::AgentAck { actions } => {
            assert_eq!(actions.len(), 1);
            match &actions[0] {
                spop_agent::Action::SetVar { scope, name, value } => {
                    assert_eq!(*scope, Scope::Transaction);
                    assert_eq!(name, "ip_score");
                    assert_eq!(*value, TypedData::Uint32(42));
                }
                other => panic!("expected set-var, got {:?}", other),
            }
        }
        other => panic!("expected ack, got {:?}", other),
    }

    // Teardown.
    peer.send(Frame::haproxy_disconnect(0, "stopping")).await;
    let disco = peer.recv().await.expect("no agent disconnect");
    match &disco.payload {
        FramePayload::AgentDisconnect {
            status_code,
            message,
        } => {
            assert_eq!(*status_code, 0);
            assert_eq!(message, "connection closed by server");
        }
        other => panic!("expected agent disconnect, got {:?}", other),
    }

    drop(peer);
    task.await.unwrap();
}

#[tokio::test]
async fn test_frame_size_negotiation_takes_the_minimum() {
    let (mut peer, _task) = spawn_worker(echo_score_handler(), AgentConfig::default());

    peer.send(Frame::haproxy_hello(SPOP_VERSION, 1024, "", false, ENGINE_ID))
        .await;

    let hello = peer.recv().await.expect("no agent hello");
    match hello.payload {
        FramePayload::AgentHello { max_frame_size, .. } => assert_eq!(max_frame_size, 1024),
        other => panic!("expected agent hello, got {:?}", other),
    }
}

#[tokio::test]
async fn test_healthcheck_closes_after_hello() {
    let (mut peer, task) = spawn_worker(echo_score_handler(), AgentConfig::default());

    peer.send(Frame::haproxy_hello(
        SPOP_VERSION,
        DEFAULT_MAX_FRAME_SIZE,
        "",
        true,
        "probe",
    ))
    .await;

    let hello = peer.recv().await.expect("no hello answer to healthcheck");
    assert_eq!(hello.frame_type(), FrameType::AgentHello);

    // Agent hangs up cleanly, no disconnect frame.
    assert!(peer.recv().await.is_none());
    task.await.unwrap();
}

#[tokio::test]
async fn test_notify_before_hello_is_fatal() {
    let (mut peer, task) = spawn_worker(echo_score_handler(), AgentConfig::default());

    peer.send(notify_with_score(1, 1, 7)).await;

    // No ack, no hello: the agent just closes.
    assert!(peer.recv().await.is_none());
    task.await.unwrap();
}

#[tokio::test]
async fn test_agent_disconnect_mirrors_frame_ids() {
    let (mut peer, _task) = spawn_worker(echo_score_handler(), AgentConfig::default());
    peer.hello().await;

    peer.send(Frame {
        stream_id: 4,
        frame_id: 2,
        flags: flags::FIN,
        payload: FramePayload::HaproxyDisconnect {
            status_code: 0,
            message: "stopping".to_string(),
        },
    })
    .await;

    let disco = peer.recv().await.expect("no agent disconnect");
    assert_eq!(disco.frame_type(), FrameType::AgentDisconnect);
    assert_eq!(disco.stream_id, 4);
    assert_eq!(disco.frame_id, 2);
}

#[tokio::test]
async fn test_disconnect_before_hello_is_fatal() {
    let (mut peer, task) = spawn_worker(echo_score_handler(), AgentConfig::default());

    peer.send(Frame::haproxy_disconnect(0, "early")).await;

    // No agent disconnect is owed to a peer that never shook hands.
    assert!(peer.recv().await.is_none());
    task.await.unwrap();
}

#[tokio::test]
async fn test_undecodable_frame_is_fatal() {
    let (mut peer, task) = spawn_worker(echo_score_handler(), AgentConfig::default());
    peer.hello().await;

    // Valid prefix, body too short for a frame header.
    peer.send_raw(&[0, 0, 0, 2, 3, 0]).await;

    assert!(peer.recv().await.is_none());
    task.await.unwrap();
}

#[tokio::test]
async fn test_duplicate_hello_is_fatal() {
    let (mut peer, task) = spawn_worker(echo_score_handler(), AgentConfig::default());

    peer.hello().await;
    peer.send(Frame::haproxy_hello(
        SPOP_VERSION,
        DEFAULT_MAX_FRAME_SIZE,
        "",
        false,
        ENGINE_ID,
    ))
    .await;

    // Exactly one hello answer ever arrives.
    assert!(peer.recv().await.is_none());
    task.await.unwrap();
}

#[tokio::test]
async fn test_unsupported_version_is_fatal() {
    let (mut peer, task) = spawn_worker(echo_score_handler(), AgentConfig::default());

    peer.send(Frame::haproxy_hello(
        "1.0",
        DEFAULT_MAX_FRAME_SIZE,
        "",
        false,
        ENGINE_ID,
    ))
    .await;

    assert!(peer.recv().await.is_none());
    task.await.unwrap();
}

/// Handler sleeping on messages named "slow", instant otherwise.
struct SpeedHandler;

impl Handler for SpeedHandler {
    fn handle<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if req.message("slow").is_some() {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            req.set_var(Scope::Stream, "done", TypedData::Bool(true));
        })
    }
}

#[tokio::test]
async fn test_pipelined_notifies_ack_out_of_order() {
    let (mut peer, _task) = spawn_worker(SpeedHandler, AgentConfig::default());
    peer.hello().await;

    peer.send(Frame::notify(1, 1, vec![Message::new("slow", vec![])]))
        .await;
    peer.send(Frame::notify(2, 1, vec![Message::new("fast", vec![])]))
        .await;

    // The fast stream overtakes the slow one.
    let first = peer.recv().await.expect("no first ack");
    assert_eq!(first.stream_id, 2);
    let second = peer.recv().await.expect("no second ack");
    assert_eq!(second.stream_id, 1);
}

/// Handler recording an action, then never finishing.
struct StuckHandler;

impl Handler for StuckHandler {
    fn handle<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            req.set_var(Scope::Stream, "partial", TypedData::Bool(true));
            std::future::pending::<()>().await;
        })
    }
}

#[tokio::test]
async fn test_handler_deadline_acks_recorded_actions() {
    let config = AgentConfig::default().with_handler_timeout(Duration::from_millis(50));
    let (mut peer, _task) = spawn_worker(StuckHandler, config);
    peer.hello().await;

    peer.send(Frame::notify(3, 1, vec![Message::new("m", vec![])]))
        .await;

    let ack = peer.recv().await.expect("no ack after deadline");
    assert_eq!(ack.stream_id, 3);
    match ack.payload {
        FramePayload::AgentAck { actions } => {
            assert_eq!(actions.len(), 1);
        }
        other => panic!("expected ack, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_frame_type_is_skipped() {
    let (mut peer, _task) = spawn_worker(echo_score_handler(), AgentConfig::default());
    peer.hello().await;

    // Type byte 42 with FIN, stream 0, frame 0, opaque payload.
    let body = [42u8, 0, 0, 0, 1, 0, 0, 0xAA, 0xBB];
    let mut raw = (body.len() as u32).to_be_bytes().to_vec();
    raw.extend_from_slice(&body);
    peer.send_raw(&raw).await;

    // The connection survives; the next notify is still acked.
    peer.send(notify_with_score(5, 1, 9)).await;
    let ack = peer.recv().await.expect("no ack after unknown frame");
    assert_eq!(ack.stream_id, 5);
}

#[tokio::test]
async fn test_fragmented_notify_is_fatal() {
    let (mut peer, task) = spawn_worker(echo_score_handler(), AgentConfig::default());
    peer.hello().await;

    // NOTIFY without the FIN flag.
    let mut notify = Frame::notify(1, 1, vec![Message::new("m", vec![])]);
    notify.flags = 0;
    peer.send(notify).await;

    assert!(peer.recv().await.is_none());
    task.await.unwrap();
}

#[tokio::test]
async fn test_clean_eof_after_handshake() {
    let (mut peer, task) = spawn_worker(echo_score_handler(), AgentConfig::default());
    peer.hello().await;

    // Peer vanishes without a disconnect frame; the worker treats EOF as
    // a normal close.
    drop(peer);
    timeout(RECV_DEADLINE, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_engine_id_reaches_the_handler() {
    let handler = HandlerFn(|req: &mut Request| {
        let engine = req.engine_id.clone();
        req.set_var(Scope::Process, "engine", TypedData::String(engine));
    });
    let (mut peer, _task) = spawn_worker(handler, AgentConfig::default());
    peer.hello().await;

    peer.send(Frame::notify(1, 1, vec![Message::new("m", vec![])]))
        .await;

    let ack = peer.recv().await.expect("no ack");
    match ack.payload {
        FramePayload::AgentAck { actions } => match &actions[0] {
            spop_agent::Action::SetVar { value, .. } => {
                assert_eq!(*value, TypedData::String(ENGINE_ID.to_string()));
            }
            other => panic!("expected set-var, got {:?}", other),
        },
        other => panic!("expected ack, got {:?}", other),
    }
}
