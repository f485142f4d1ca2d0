use std::convert::Infallible;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Json, Redirect, Response,
    },
    routing::{get, post},
    Form, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use zone_monitor::control::{HealthReport, ZoneSubmission};
use zone_monitor::{CameraId, ControlInterface, StatusReport};

use crate::views;

pub const MJPEG_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Video streams never end on their own; they get this long after shutdown
/// is requested before the server stops waiting for them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    pub control: ControlInterface,
}

#[derive(Debug, Deserialize)]
struct PointForm {
    x: i32,
    y: i32,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Operator pages
        .route("/", get(index))
        .route("/double_feed", get(double_feed))

        // Zone and state
        .route("/add_point", post(add_point))
        .route("/get_status", get(get_status))
        .route("/trigger_alert", get(trigger_alert))
        .route("/reset_cycle", post(reset_cycle))
        .route("/events", get(events))
        .route("/health", get(health))

        // Video
        .route("/video_feed_1", get(video_feed_1))
        .route("/video_feed_2", get(video_feed_2))
        .route("/video_feed/:camera", get(video_feed))

        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(views::index_page(&state.control.get_status()))
}

async fn double_feed(State(state): State<AppState>) -> Html<String> {
    Html(views::double_feed_page(&state.control.get_status()))
}

async fn add_point(
    State(state): State<AppState>,
    Form(point): Form<PointForm>,
) -> Json<ZoneSubmission> {
    Json(state.control.submit_zone_point(point.x, point.y))
}

async fn get_status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.control.get_status())
}

async fn trigger_alert(State(state): State<AppState>) -> Redirect {
    state.control.force_alert();
    Redirect::to("/double_feed")
}

async fn reset_cycle(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.control.reset_cycle())
}

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.control.health())
}

/// One `state` event with the current status on connect, then one per
/// change. Ends when the store goes away.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.control.subscribe();

    let events = stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first {
            rx.changed().await.ok()?;
        }
        let report = rx.borrow_and_update().report();
        match Event::default().event("state").json_data(&report) {
            Ok(event) => Some((Ok(event), (rx, false))),
            Err(e) => {
                tracing::warn!("Failed to encode state event: {e}");
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn video_feed_1(State(state): State<AppState>) -> Result<Response, StatusCode> {
    mjpeg_stream(&state.control, CameraId(1))
}

async fn video_feed_2(State(state): State<AppState>) -> Result<Response, StatusCode> {
    mjpeg_stream(&state.control, CameraId(2))
}

async fn video_feed(
    State(state): State<AppState>,
    Path(camera): Path<u32>,
) -> Result<Response, StatusCode> {
    mjpeg_stream(&state.control, CameraId(camera))
}

fn mjpeg_stream(control: &ControlInterface, camera: CameraId) -> Result<Response, StatusCode> {
    let frames = control.stream(camera).ok_or(StatusCode::NOT_FOUND)?;

    let parts = frames.map(|frame| {
        let mut part = Vec::with_capacity(frame.jpeg.len() + 48);
        part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        part.extend_from_slice(&frame.jpeg);
        part.extend_from_slice(b"\r\n");
        Ok::<_, Infallible>(Bytes::from(part))
    });

    Ok((
        [(header::CONTENT_TYPE, MJPEG_CONTENT_TYPE)],
        Body::from_stream(parts),
    )
        .into_response())
}

pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Control server listening on http://{addr}");

    let (stopping_tx, stopping_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.await;
        let _ = stopping_tx.send(());
    });

    tokio::select! {
        result = server.into_future() => result.context("Control server failed")?,
        _ = async {
            if stopping_rx.await.is_ok() {
                tokio::time::sleep(SHUTDOWN_GRACE).await;
            } else {
                std::future::pending::<()>().await;
            }
        } => info!("Closing remaining video streams"),
    }

    Ok(())
}
