//! HTTP API server: axum router and request handlers.
//!
//! Every handler works on the shared [`LedController`]. Edits return as soon
//! as the pending strip has changed; `POST /api/v1/render` is the only
//! endpoint that waits for the bus.
//!
//! ## Rust concepts
//! - axum extractors: `State`, `Json`, `WebSocketUpgrade`
//! - `Arc` for sharing the controller across async tasks
//! - `tokio::select!` to serve a socket and a channel at once

use crate::brightness::Brightness;
use crate::bus::ClockSpeed;
use crate::color::Color;
use crate::controller::LedController;
use crate::error::LedError;
use crate::events::SubscriptionId;
use crate::render::RenderState;
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

type ApiError = (StatusCode, String);

// ── App State ────────────────────────────────────────────────────────

/// Shared application state, passed to every handler via axum's `State`
/// extractor. Cloning it only bumps the `Arc` count.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<LedController>,
}

// ── OpenAPI Documentation ────────────────────────────────────────────

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        get_strip,
        get_pending_strip,
        put_strip,
        post_pixel,
        post_fill,
        post_clear,
        post_render,
        get_brightness,
        put_brightness,
        get_clock_speed,
        put_clock_speed,
    ),
    components(schemas(
        StripStatus,
        RenderState,
        ClockSpeed,
        Color,
        PixelRequest,
        ColorRequest,
        BrightnessBody,
        ClockSpeedBody,
    )),
    tags(
        (name = "strip", description = "Pixel editing and rendering"),
        (name = "settings", description = "Brightness and bus settings"),
        (name = "system", description = "System status endpoints"),
    ),
    info(
        title = "LED Strip API",
        version = env!("CARGO_PKG_VERSION"),
        description = "HTTP API for controlling an SPI RGB LED strip"
    )
)]
pub struct ApiDoc;

// ── Request/Response types ───────────────────────────────────────────

/// Snapshot of the controller for `GET /api/v1/status`.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StripStatus {
    /// Number of leds on the strip
    pub led_amount: usize,
    /// Bytes per frame on the SPI bus
    pub frame_bytes: usize,
    /// "auto" or 0-100
    #[schema(value_type = String, example = "auto")]
    pub brightness: Brightness,
    pub clock_speed: ClockSpeed,
    pub render_state: RenderState,
    /// Frames waiting behind the one on the bus
    pub pending_writes: usize,
    /// Frames confirmed written since start
    pub frames_written: u64,
    pub automatic_rendering: bool,
    /// Server version
    pub version: String,
}

impl StripStatus {
    pub fn of(controller: &LedController) -> Self {
        let config = controller.config();
        Self {
            led_amount: config.led_amount,
            frame_bytes: config.frame_byte_count(),
            brightness: controller.brightness(),
            clock_speed: controller.clock_speed(),
            render_state: controller.render_state(),
            pending_writes: controller.pending_writes(),
            frames_written: controller.frames_written(),
            automatic_rendering: controller.automatic_rendering(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Channel values outside 0-255 are saturated, not rejected.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ColorRequest {
    #[serde(default)]
    #[schema(example = 255)]
    pub red: i64,
    #[serde(default)]
    #[schema(example = 155)]
    pub green: i64,
    #[serde(default)]
    #[schema(example = 55)]
    pub blue: i64,
}

impl From<&ColorRequest> for Color {
    fn from(req: &ColorRequest) -> Self {
        Color::saturating(req.red, req.green, req.blue)
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PixelRequest {
    /// Zero-based led index
    #[schema(example = 0)]
    pub index: usize,
    #[serde(default)]
    pub red: i64,
    #[serde(default)]
    pub green: i64,
    #[serde(default)]
    pub blue: i64,
}

/// Brightness as "auto" or an integer 0-100. Anything else is rejected with
/// 400 and leaves the brightness unchanged.
#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BrightnessBody {
    #[schema(value_type = String, example = "auto")]
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ClockSpeedBody {
    pub value: ClockSpeed,
}

fn reject(err: LedError) -> ApiError {
    let status = match &err {
        LedError::Device(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedError::EmptyStrip
        | LedError::PixelOutOfRange { .. }
        | LedError::Validation(_)
        | LedError::Brightness(_) => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string())
}

// ── Router ───────────────────────────────────────────────────────────

/// Build the axum router with all API endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(
            SwaggerUi::new("/docs")
                .url("/api-docs/openapi.json", ApiDoc::openapi())
                .config(utoipa_swagger_ui::Config::new(["/api-docs/openapi.json"]).validator_url("none")),
        )
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/strip", get(get_strip).put(put_strip))
        .route("/api/v1/strip/pending", get(get_pending_strip))
        .route("/api/v1/pixel", post(post_pixel))
        .route("/api/v1/fill", post(post_fill))
        .route("/api/v1/clear", post(post_clear))
        .route("/api/v1/render", post(post_render))
        .route("/api/v1/brightness", get(get_brightness).put(put_brightness))
        .route("/api/v1/clock-speed", get(get_clock_speed).put(put_clock_speed))
        .route("/api/v1/events", get(ws_strip_events))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────

/// GET /api/v1/status: controller and render thread state
#[utoipa::path(
    get,
    path = "/api/v1/status",
    tag = "system",
    responses(
        (status = 200, description = "Current strip status", body = StripStatus)
    )
)]
async fn get_status(State(state): State<AppState>) -> Json<StripStatus> {
    Json(StripStatus::of(&state.controller))
}

/// GET /api/v1/strip: the strip as last written to the hardware
#[utoipa::path(
    get,
    path = "/api/v1/strip",
    tag = "strip",
    responses(
        (status = 200, description = "Displayed strip", body = Vec<Color>)
    )
)]
async fn get_strip(State(state): State<AppState>) -> Json<Vec<Color>> {
    Json(state.controller.displayed_strip().to_vec())
}

/// GET /api/v1/strip/pending: the strip as it will look after the next render
#[utoipa::path(
    get,
    path = "/api/v1/strip/pending",
    tag = "strip",
    responses(
        (status = 200, description = "Pending strip", body = Vec<Color>)
    )
)]
async fn get_pending_strip(State(state): State<AppState>) -> Json<Vec<Color>> {
    Json(state.controller.pending_strip())
}

/// PUT /api/v1/strip: replace every pixel at once
///
/// The body must contain exactly one `{red, green, blue}` object per led.
/// Nothing changes unless every pixel is valid.
#[utoipa::path(
    put,
    path = "/api/v1/strip",
    tag = "strip",
    request_body = Vec<Color>,
    responses(
        (status = 200, description = "Pending strip replaced"),
        (status = 400, description = "Wrong length or invalid pixels, all listed")
    )
)]
async fn put_strip(
    State(state): State<AppState>,
    Json(candidate): Json<Vec<serde_json::Value>>,
) -> Result<StatusCode, ApiError> {
    state.controller.replace_strip(&candidate).map_err(reject)?;
    Ok(StatusCode::OK)
}

/// POST /api/v1/pixel: set a single led
#[utoipa::path(
    post,
    path = "/api/v1/pixel",
    tag = "strip",
    request_body = PixelRequest,
    responses(
        (status = 200, description = "Pixel set"),
        (status = 400, description = "Index outside the strip")
    )
)]
async fn post_pixel(
    State(state): State<AppState>,
    Json(req): Json<PixelRequest>,
) -> Result<StatusCode, ApiError> {
    let color = Color::saturating(req.red, req.green, req.blue);
    state
        .controller
        .set_pixel(req.index, color)
        .map_err(reject)?;
    Ok(StatusCode::OK)
}

/// POST /api/v1/fill: set every led to one color
#[utoipa::path(
    post,
    path = "/api/v1/fill",
    tag = "strip",
    request_body = ColorRequest,
    responses(
        (status = 200, description = "Strip filled"),
    )
)]
async fn post_fill(State(state): State<AppState>, Json(req): Json<ColorRequest>) -> StatusCode {
    state.controller.fill_all(Color::from(&req));
    StatusCode::OK
}

/// POST /api/v1/clear: turn every led off
#[utoipa::path(
    post,
    path = "/api/v1/clear",
    tag = "strip",
    responses(
        (status = 200, description = "Strip cleared"),
    )
)]
async fn post_clear(State(state): State<AppState>) -> StatusCode {
    state.controller.clear();
    StatusCode::OK
}

/// POST /api/v1/render: push the pending strip and wait for the write
#[utoipa::path(
    post,
    path = "/api/v1/render",
    tag = "strip",
    responses(
        (status = 200, description = "Frame written"),
        (status = 503, description = "SPI write failed, displayed strip unchanged")
    )
)]
async fn post_render(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .controller
        .render()
        .await
        .map_err(|e| reject(e.into()))?;
    Ok(StatusCode::OK)
}

/// GET /api/v1/brightness
#[utoipa::path(
    get,
    path = "/api/v1/brightness",
    tag = "settings",
    responses(
        (status = 200, description = "Current brightness", body = BrightnessBody)
    )
)]
async fn get_brightness(State(state): State<AppState>) -> Json<BrightnessBody> {
    let value = serde_json::to_value(state.controller.brightness()).unwrap_or_default();
    Json(BrightnessBody { value })
}

/// PUT /api/v1/brightness: applies from the next render
#[utoipa::path(
    put,
    path = "/api/v1/brightness",
    tag = "settings",
    request_body = BrightnessBody,
    responses(
        (status = 200, description = "Brightness updated"),
        (status = 400, description = "Not \"auto\" or an integer 0-100")
    )
)]
async fn put_brightness(
    State(state): State<AppState>,
    Json(req): Json<BrightnessBody>,
) -> Result<StatusCode, ApiError> {
    state
        .controller
        .set_brightness(&req.value)
        .map_err(reject)?;
    Ok(StatusCode::OK)
}

/// GET /api/v1/clock-speed
#[utoipa::path(
    get,
    path = "/api/v1/clock-speed",
    tag = "settings",
    responses(
        (status = 200, description = "Current SPI clock speed", body = ClockSpeedBody)
    )
)]
async fn get_clock_speed(State(state): State<AppState>) -> Json<ClockSpeedBody> {
    Json(ClockSpeedBody {
        value: state.controller.clock_speed(),
    })
}

/// PUT /api/v1/clock-speed: applies after the frames already queued
#[utoipa::path(
    put,
    path = "/api/v1/clock-speed",
    tag = "settings",
    request_body = ClockSpeedBody,
    responses(
        (status = 200, description = "Clock speed updated"),
    )
)]
async fn put_clock_speed(
    State(state): State<AppState>,
    Json(req): Json<ClockSpeedBody>,
) -> StatusCode {
    state.controller.set_clock_speed(req.value);
    StatusCode::OK
}

// ── WebSocket events ────────────────────────────────────────────────

/// GET /api/v1/events: WebSocket stream of strip changes.
///
/// After every successful write the new displayed strip is sent as one JSON
/// text message. A client that reads slower than frames are written skips
/// straight to the newest strip. Incoming messages other than close are
/// ignored.
async fn ws_strip_events(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_event_socket(socket, state))
}

/// Subscribe to strip changes through a `watch` channel, which holds only
/// the latest strip no matter how many frames the reader misses.
fn watch_strip(controller: &LedController) -> (SubscriptionId, watch::Receiver<Arc<[Color]>>) {
    let (tx, rx) = watch::channel(controller.displayed_strip());
    let id = controller.on_strip_changed(move |strip| {
        tx.send_replace(Arc::from(strip));
    });
    (id, rx)
}

async fn handle_event_socket(mut socket: WebSocket, state: AppState) {
    let (id, mut rx) = watch_strip(&state.controller);

    tracing::info!("Event stream client connected ({})", id);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let strip = rx.borrow_and_update().clone();
                let text = match serde_json::to_string(&*strip) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Could not serialize strip: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
                sent += 1;
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket receive error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    state.controller.remove_listener(id);
    tracing::info!(
        "Event stream client disconnected ({} updates sent)",
        sent
    );
}
