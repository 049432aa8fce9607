//! Live job feed over a real socket.
//!
//! Jobs are driven directly through the bus so every frame is predictable.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use vodclip_api::{create_router, ApiConfig, AppState};
use vodclip_models::{
    ClipJob, ClipStatus, CodecProfile, DeliveryMode, JobId, RequestedWindow, SnappedWindow,
    WsMessage,
};
use vodclip_progress::ProgressBus;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

struct FeedServer {
    addr: SocketAddr,
    bus: ProgressBus,
    _scratch: TempDir,
}

impl FeedServer {
    fn url(&self, job: &str) -> String {
        format!("ws://{}/api/jobs/{}/ws", self.addr, job)
    }

    fn register(&self, id: &str) -> JobId {
        let job_id = JobId::parse(id).unwrap();
        self.bus
            .register(ClipJob::new(
                job_id.clone(),
                "lecture-01",
                RequestedWindow {
                    start: 12.0,
                    end: 22.0,
                },
                DeliveryMode::Streamed,
                CodecProfile::Remux,
            ))
            .unwrap();
        job_id
    }

    async fn attach(&self, job: &str) -> Socket {
        let (socket, _) = connect_async(self.url(job)).await.unwrap();
        socket
    }
}

async fn serve(tweak: impl FnOnce(&mut ApiConfig)) -> FeedServer {
    let scratch = tempfile::tempdir().unwrap();

    let mut config = ApiConfig::default();
    config.clip.ffmpeg_path = Some(PathBuf::from("/bin/true"));
    config.clip.scratch_dir = scratch.path().to_path_buf();
    tweak(&mut config);

    let state = AppState::new(config).await.unwrap();
    let bus = state.bus.clone();
    let app = create_router(state, None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    FeedServer {
        addr,
        bus,
        _scratch: scratch,
    }
}

async fn next_snapshot(socket: &mut Socket) -> ClipJob {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("frame within timeout")
            .expect("socket still open")
            .unwrap();
        match frame {
            Message::Text(text) => match serde_json::from_str::<WsMessage>(&text).unwrap() {
                WsMessage::Snapshot { job } => return job,
                other => panic!("expected snapshot, got {:?}", other),
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}

async fn expect_closed(socket: &mut Socket) {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("close within timeout");
        match frame {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_unknown_job_rejected_before_upgrade() {
    let server = serve(|_| {}).await;

    match connect_async(server.url("nobody-here")).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 404);
        }
        Err(other) => panic!("expected HTTP rejection, got {:?}", other),
        Ok(_) => panic!("upgrade should have been refused"),
    }

    match connect_async(server.url("bad%20id")).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 400);
        }
        other => panic!("expected HTTP rejection, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_feed_follows_job_until_terminal() {
    let server = serve(|_| {}).await;
    let job_id = server.register("followed");
    let mut socket = server.attach("followed").await;

    let first = next_snapshot(&mut socket).await;
    assert_eq!(first.job_id, job_id);
    assert_eq!(first.status, ClipStatus::Starting);
    assert_eq!(first.event_seq, 0);

    let bus = &server.bus;
    bus.transition(&job_id, ClipStatus::Running).unwrap();
    bus.update(&job_id, |job| {
        job.set_snapped(SnappedWindow::new(10.0, 30.0).unwrap())
    })
    .unwrap();
    bus.update(&job_id, |job| job.record_progress(5_000)).unwrap();
    bus.update(&job_id, |job| job.complete_progress()).unwrap();
    bus.transition(&job_id, ClipStatus::Done).unwrap();

    let mut frames = Vec::new();
    for _ in 0..5 {
        frames.push(next_snapshot(&mut socket).await);
    }
    let seqs: Vec<u64> = frames.iter().map(|job| job.event_seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    let percents: Vec<u8> = frames.iter().map(|job| job.progress.percent).collect();
    assert_eq!(percents, vec![0, 0, 25, 100, 100]);
    assert_eq!(frames[0].status, ClipStatus::Running);
    assert_eq!(frames[4].status, ClipStatus::Done);

    expect_closed(&mut socket).await;
}

#[tokio::test]
async fn test_finished_job_sends_one_snapshot() {
    let server = serve(|_| {}).await;
    let job_id = server.register("already-failed");
    server
        .bus
        .fail(&job_id, "Upstream returned HTTP 404")
        .unwrap();

    let mut socket = server.attach("already-failed").await;
    let only = next_snapshot(&mut socket).await;
    assert_eq!(only.status, ClipStatus::Error);
    assert_eq!(only.error.as_deref(), Some("Upstream returned HTTP 404"));

    expect_closed(&mut socket).await;
}

#[tokio::test]
async fn test_skipped_terminal_snapshot_is_resent() {
    let server = serve(|config| config.progress.subscriber_buffer = 1).await;
    let job_id = server.register("lagging");
    let mut socket = server.attach("lagging").await;

    // Nothing drains the one-slot queue between these calls, so the terminal
    // snapshot finds it full and detaches the subscriber.
    server.bus.transition(&job_id, ClipStatus::Running).unwrap();
    server.bus.fail(&job_id, "FFmpeg failed mid-stream").unwrap();

    let first = next_snapshot(&mut socket).await;
    assert_eq!(first.status, ClipStatus::Starting);

    let mut last = first;
    while !last.is_terminal() {
        last = next_snapshot(&mut socket).await;
    }
    assert_eq!(last.status, ClipStatus::Error);
    assert_eq!(last.event_seq, 2);
    assert_eq!(last.error.as_deref(), Some("FFmpeg failed mid-stream"));

    expect_closed(&mut socket).await;
}
