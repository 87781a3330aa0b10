mod common;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dialup::client::{GenerateClient, UploadClient, http_client};
use dialup::error::ErrorKind;
use dialup::events::{PointerSample, SessionCommand, SessionEvent};
use dialup::indexer::InteractionMode;
use dialup::selection::SelectionController;
use dialup::tasks::session;
use serde_json::json;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use common::{config_for, png_bytes, serve, sweep};

async fn generate(Path((_id, target)): Path<(String, String)>) -> Response {
    match target.as_str() {
        "slow" => {
            tokio::time::sleep(Duration::from_millis(600)).await;
            Json(sweep("slow")).into_response()
        }
        "broken" => Json(json!([])).into_response(),
        "offline" => (StatusCode::SERVICE_UNAVAILABLE, "try later").into_response(),
        other => Json(sweep(other)).into_response(),
    }
}

async fn upstream() -> SocketAddr {
    let app = Router::new()
        .route(
            "/api/v1/uploadFile",
            post(|| async { Json(json!({ "fileId": "img-1" })) }),
        )
        .route("/api/v1/generate/{id}/{target}", get(generate));
    serve(app).await
}

struct Harness {
    cmd_tx: Sender<SessionCommand>,
    events: Receiver<SessionEvent>,
    cancel: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

fn start(addr: SocketAddr) -> Harness {
    let cfg = config_for(addr);
    let http = http_client(&cfg.endpoint).unwrap();
    let upload = UploadClient::from_config(http.clone(), &cfg).unwrap();
    let generate = GenerateClient::from_config(http, &cfg);
    let controller =
        SelectionController::new(cfg.selection.interaction_mode(), cfg.selection.neutral_tolerance);

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (event_tx, events) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(session::run(
        cmd_rx,
        event_tx,
        cancel.clone(),
        upload,
        generate,
        controller,
    ));
    Harness {
        cmd_tx,
        events,
        cancel,
        task,
    }
}

impl Harness {
    async fn send(&self, cmd: SessionCommand) {
        self.cmd_tx.send(cmd).await.unwrap();
    }

    async fn next(&mut self) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("session event in time")
            .expect("session still running")
    }

    async fn quiet_for(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.events.recv()).await.is_err()
    }

    async fn upload(&mut self) {
        self.send(SessionCommand::Upload {
            bytes: png_bytes(32, 24),
            mime_hint: Some("image/png".into()),
        })
        .await;
        match self.next().await {
            SessionEvent::Uploaded { handle, .. } => assert_eq!(handle.as_str(), "img-1"),
            other => panic!("expected upload, got {other:?}"),
        }
    }

    async fn generate(&mut self, target: &str) -> u64 {
        self.send(SessionCommand::Generate {
            target: Some(target.into()),
        })
        .await;
        match self.next().await {
            SessionEvent::GenerationStarted { generation } => generation,
            other => panic!("expected generation start, got {other:?}"),
        }
    }

    async fn shutdown(self) {
        drop(self.cmd_tx);
        self.cancel.cancel();
        self.task.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn upload_generate_and_select() {
    let addr = upstream().await;
    let mut session = start(addr);

    session.upload().await;
    let generation = session.generate("warm").await;
    match session.next().await {
        SessionEvent::Populated {
            generation: populated,
            matrix,
            index,
        } => {
            assert_eq!(populated, generation);
            assert_eq!(matrix.len(), 9);
            assert_eq!(index, 4);
        }
        other => panic!("expected populated, got {other:?}"),
    }

    // right edge, middle row
    session
        .send(SessionCommand::Pointer(PointerSample::new(1.0, 0.0)))
        .await;
    match session.next().await {
        SessionEvent::Selected {
            index, settings, ..
        } => {
            assert_eq!(index, 5);
            assert_eq!((settings.brightness, settings.contrast), (1.0, 0.5));
        }
        other => panic!("expected selection, got {other:?}"),
    }

    // same cell again and a sample outside the disk: nothing to report
    session
        .send(SessionCommand::Pointer(PointerSample::new(0.98, 0.01)))
        .await;
    session
        .send(SessionCommand::Pointer(PointerSample::new(1.5, 1.5)))
        .await;
    assert!(session.quiet_for(Duration::from_millis(200)).await);

    session.shutdown().await;
}

#[tokio::test]
async fn long_pointer_runs_do_not_stall_the_session() {
    let addr = upstream().await;
    let mut session = start(addr);
    session.upload().await;
    session.generate("many").await;
    assert!(matches!(
        session.next().await,
        SessionEvent::Populated { .. }
    ));

    // every sample flips between the two middle-row edges, well past both
    // channel capacities
    let samples: Vec<PointerSample> = (0..40)
        .map(|i| PointerSample::new(if i % 2 == 0 { 1.0 } else { -1.0 }, 0.0))
        .collect();
    let mut indices = Vec::new();
    tokio::time::timeout(
        Duration::from_secs(5),
        session::feed_pointer_samples(&session.cmd_tx, &mut session.events, &samples, |event| {
            if let SessionEvent::Selected { index, .. } = event {
                indices.push(*index);
            }
        }),
    )
    .await
    .expect("samples delivered in time")
    .unwrap();

    while indices.len() < samples.len() {
        match session.next().await {
            SessionEvent::Selected { index, .. } => indices.push(index),
            other => panic!("expected selection, got {other:?}"),
        }
    }
    let expected: Vec<usize> = (0..40).map(|i| if i % 2 == 0 { 5 } else { 3 }).collect();
    assert_eq!(indices, expected);
    session.shutdown().await;
}

#[tokio::test]
async fn generate_without_upload_reports_missing_handle() {
    let addr = upstream().await;
    let mut session = start(addr);

    session
        .send(SessionCommand::Generate { target: None })
        .await;
    match session.next().await {
        SessionEvent::Failed { kind, .. } => assert_eq!(kind, ErrorKind::MissingHandle),
        other => panic!("expected failure, got {other:?}"),
    }
    session.shutdown().await;
}

#[tokio::test]
async fn superseded_generate_response_is_discarded() {
    let addr = upstream().await;
    let mut session = start(addr);
    session.upload().await;

    let _slow = session.generate("slow").await;
    let fast = session.generate("fast").await;
    match session.next().await {
        SessionEvent::Populated {
            generation, matrix, ..
        } => {
            assert_eq!(generation, fast);
            let expected = common::b64(b"fast-1-1");
            assert_eq!(matrix.get(4).unwrap().image.payload(), expected);
        }
        other => panic!("expected populated, got {other:?}"),
    }

    // the slow response lands later and must not replace the matrix
    assert!(session.quiet_for(Duration::from_millis(1000)).await);
    session.shutdown().await;
}

#[tokio::test]
async fn failed_generate_keeps_previous_selection() {
    let addr = upstream().await;
    let mut session = start(addr);
    session.upload().await;

    session.generate("first").await;
    assert!(matches!(
        session.next().await,
        SessionEvent::Populated { .. }
    ));

    for (target, expected) in [
        ("broken", ErrorKind::GenerateIntegrityFailure),
        ("offline", ErrorKind::GenerateTransportFailure),
    ] {
        session.generate(target).await;
        match session.next().await {
            SessionEvent::Failed { kind, .. } => assert_eq!(kind, expected),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    // the first matrix is still selectable
    session
        .send(SessionCommand::Pointer(PointerSample::new(-1.0, 0.0)))
        .await;
    match session.next().await {
        SessionEvent::Selected { index, image, .. } => {
            assert_eq!(index, 3);
            assert_eq!(image.payload(), common::b64(b"first-1-0"));
        }
        other => panic!("expected selection, got {other:?}"),
    }
    session.shutdown().await;
}

#[tokio::test]
async fn orbit_mode_cycles_through_variants() {
    let addr = upstream().await;
    let mut session = start(addr);
    session.upload().await;
    session.generate("orbit").await;
    assert!(matches!(
        session.next().await,
        SessionEvent::Populated { .. }
    ));

    session
        .send(SessionCommand::SetMode(InteractionMode::orbit()))
        .await;
    session
        .send(SessionCommand::Pointer(PointerSample::from_orbit(1.25, 0.25)))
        .await;
    match session.next().await {
        SessionEvent::Selected { index, .. } => assert_eq!(index, 2),
        other => panic!("expected selection, got {other:?}"),
    }
    session.shutdown().await;
}

#[tokio::test]
async fn new_upload_clears_installed_variants() {
    let addr = upstream().await;
    let mut session = start(addr);
    session.upload().await;
    session.generate("before").await;
    assert!(matches!(
        session.next().await,
        SessionEvent::Populated { .. }
    ));

    session.upload().await;
    session
        .send(SessionCommand::Pointer(PointerSample::new(1.0, 0.0)))
        .await;
    assert!(session.quiet_for(Duration::from_millis(200)).await);
    session.shutdown().await;
}
