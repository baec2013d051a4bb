//! Axum router and all HTTP handlers for ckd-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers translate kitchen errors into `400` for
//! caller mistakes and `500` for store failures.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

use ckd_orders::RemovedOrder;
use ckd_runtime::{is_invalid_input, DEFAULT_LOG_LIMIT};

use crate::{
    api_types::{
        CreateOrderRequest, CreateOrderResponse, DeadlocksResponse, ErrorResponse,
        HealthResponse, LogQuery, LogResponse, OrderRemovedResponse, OrdersResponse,
        RescheduleRequest, RescheduleResponse, SimulationResponse, SimulationStepResponse,
        VirtualResourcesRequest,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/orders", get(orders_list).post(orders_create))
        .route("/v1/orders/process", post(orders_process))
        .route("/v1/orders/:id/release", post(order_release))
        .route("/v1/orders/:id/abort", post(order_abort))
        .route("/v1/orders/:id/preempt", post(order_preempt))
        .route("/v1/orders/:id/reschedule", post(order_reschedule))
        .route("/v1/resources/virtual", post(resources_virtual))
        .route("/v1/deadlocks", get(deadlocks))
        .route("/v1/safety", get(safety))
        .route("/v1/log", get(log_tail))
        .route("/v1/simulation/play", post(simulation_play))
        .route("/v1/simulation/pause", post(simulation_pause))
        .route("/v1/simulation/step", post(simulation_step))
        .route("/v1/simulation/reset", post(simulation_reset))
        .with_state(state)
}

/// Map a kitchen error to `400` (invalid input) or `500` (everything else).
fn error_response(err: anyhow::Error) -> Response {
    let msg = format!("{err:#}");
    let status = if is_invalid_input(&err) {
        StatusCode::BAD_REQUEST
    } else {
        error!(error = %msg, "kitchen operation failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ErrorResponse { error: msg })).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = st.status_snapshot().await;
    let _ = st.bus.send(BusMsg::Status(snap.clone()));
    (StatusCode::OK, Json(snap))
}

// ---------------------------------------------------------------------------
// /v1/orders
// ---------------------------------------------------------------------------

pub(crate) async fn orders_list(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let snap = st.kitchen.snapshot().await;
    (
        StatusCode::OK,
        Json(OrdersResponse {
            pending: snap.pending,
            active: snap.active,
            priorities: snap.priorities,
        }),
    )
}

pub(crate) async fn orders_create(
    State(st): State<Arc<AppState>>,
    Json(body): Json<CreateOrderRequest>,
) -> Response {
    let process = body.process.unwrap_or(true);
    let result = if process {
        st.kitchen
            .submit_order(&body.order_id, body.request, body.priority)
            .await
            .map(|(outcome, report)| (outcome.replaced, Some(report)))
    } else {
        st.kitchen
            .create_order(&body.order_id, body.request, body.priority)
            .await
            .map(|outcome| (outcome.replaced, None))
    };

    match result {
        Ok((replaced, report)) => {
            info!(order_id = %body.order_id, process, "orders/create");
            st.publish_log("INFO", format!("order {} created", body.order_id));
            st.publish_status().await;
            (
                StatusCode::OK,
                Json(CreateOrderResponse {
                    order_id: body.order_id,
                    replaced,
                    report,
                }),
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn orders_process(State(st): State<Arc<AppState>>) -> Response {
    match st.kitchen.process_pending_orders().await {
        Ok(report) => {
            st.publish_status().await;
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:id/{release,abort,preempt}
// ---------------------------------------------------------------------------

fn removed_response(
    st: &AppState,
    order_id: String,
    verb: &str,
    removed: Option<RemovedOrder>,
) -> OrderRemovedResponse {
    match removed {
        Some(r) => {
            st.publish_log("INFO", format!("order {order_id} {verb}"));
            OrderRemovedResponse {
                order_id,
                removed: true,
                released: r.released,
            }
        }
        None => OrderRemovedResponse {
            order_id,
            removed: false,
            released: None,
        },
    }
}

pub(crate) async fn order_release(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Response {
    match st.kitchen.release_order(&order_id).await {
        Ok(removed) => {
            let body = removed_response(&st, order_id, "released", removed);
            st.publish_status().await;
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn order_abort(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Response {
    match st.kitchen.abort_order(&order_id).await {
        Ok(removed) => {
            let body = removed_response(&st, order_id, "aborted", removed);
            st.publish_status().await;
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn order_preempt(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Response {
    match st.kitchen.preempt_order(&order_id).await {
        Ok(removed) => {
            let body = removed_response(&st, order_id, "preempted", removed);
            st.publish_status().await;
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:id/reschedule
// ---------------------------------------------------------------------------

pub(crate) async fn order_reschedule(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    Json(body): Json<RescheduleRequest>,
) -> Response {
    match st.kitchen.reschedule_order(&order_id, body.priority).await {
        Ok(rescheduled) => {
            if rescheduled {
                st.publish_status().await;
            }
            (
                StatusCode::OK,
                Json(RescheduleResponse {
                    order_id,
                    rescheduled,
                }),
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/resources/virtual
// ---------------------------------------------------------------------------

pub(crate) async fn resources_virtual(
    State(st): State<Arc<AppState>>,
    Json(body): Json<VirtualResourcesRequest>,
) -> Response {
    match st.kitchen.add_virtual_resources(&body.resources).await {
        Ok(()) => {
            let snap = st.status_snapshot().await;
            let _ = st.bus.send(BusMsg::Status(snap.clone()));
            (StatusCode::OK, Json(snap)).into_response()
        }
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/deadlocks, GET /v1/safety
// ---------------------------------------------------------------------------

pub(crate) async fn deadlocks(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let report = st.kitchen.analyze().await;
    let explanation = ckd_analyzer::explain(&report);
    (
        StatusCode::OK,
        Json(DeadlocksResponse {
            report,
            explanation,
        }),
    )
}

pub(crate) async fn safety(State(st): State<Arc<AppState>>) -> Response {
    match st.kitchen.check_safe_state().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/log
// ---------------------------------------------------------------------------

pub(crate) async fn log_tail(
    State(st): State<Arc<AppState>>,
    Query(q): Query<LogQuery>,
) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    match st.kitchen.recent_log(limit).await {
        Ok(entries) => (StatusCode::OK, Json(LogResponse { entries })).into_response(),
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/simulation/*
// ---------------------------------------------------------------------------

pub(crate) async fn simulation_play(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    st.set_playing(true);
    info!("simulation/play");
    st.publish_log("INFO", "simulation playing");
    (StatusCode::OK, Json(SimulationResponse { playing: true }))
}

pub(crate) async fn simulation_pause(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    st.set_playing(false);
    info!("simulation/pause");
    st.publish_log("INFO", "simulation paused");
    (StatusCode::OK, Json(SimulationResponse { playing: false }))
}

pub(crate) async fn simulation_step(State(st): State<Arc<AppState>>) -> Response {
    match st.kitchen.simulation_step().await {
        Ok(step) => {
            if step.is_some() {
                st.publish_status().await;
            }
            let body = SimulationStepResponse {
                created: step.is_some(),
                step,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => error_response(err),
    }
}

/// Pause, then clear every order.
pub(crate) async fn simulation_reset(State(st): State<Arc<AppState>>) -> Response {
    st.set_playing(false);
    match st.kitchen.reset().await {
        Ok(()) => {
            info!("simulation/reset");
            st.publish_log("WARN", "simulation reset");
            let snap = st.status_snapshot().await;
            let _ = st.bus.send(BusMsg::Status(snap.clone()));
            (StatusCode::OK, Json(snap)).into_response()
        }
        Err(err) => error_response(err),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Status(_) => "status",
                    BusMsg::LogLine { .. } => "log",
                    BusMsg::Deadlock { .. } => "deadlock",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
