use crate::api::ApiState;
use crate::api::responses::{
    ClearResponse, CommandAccepted, ErrorCode, ErrorResponse, HealthResponse, HealthStatus,
    HistoryResponse, SessionResponse, SpotResponse,
};
use crate::history::Confirmation;
use crate::runtime::RuntimeCommand;
use crate::session::TimestampMs;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";
const RUNTIME_UNAVAILABLE_MESSAGE: &str = "Session runtime unavailable";

#[derive(Debug)]
enum TimestampError {
    Format(time::error::Format),
    Range(time::error::ComponentRange),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Format(err) => write!(f, "timestamp format error: {err}"),
            TimestampError::Range(err) => write!(f, "timestamp out of range: {err}"),
        }
    }
}

pub enum ApiResponse<T> {
    Success { status: StatusCode, body: T },
    Error { status: StatusCode, body: ErrorResponse },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success { status, body } => (status, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub confirm: bool,
}

pub async fn get_health(State(api): State<ApiState>) -> impl IntoResponse {
    build_health_response(api.state, SystemTime::now())
}

pub async fn get_spot(State(api): State<ApiState>) -> impl IntoResponse {
    build_spot_response(api.state, SystemTime::now())
}

pub async fn get_history(State(api): State<ApiState>) -> impl IntoResponse {
    build_history_response(api.state, SystemTime::now())
}

pub async fn post_toggle(State(api): State<ApiState>) -> impl IntoResponse {
    dispatch_command(&api.commands, RuntimeCommand::Toggle, "toggle", SystemTime::now()).await
}

pub async fn post_reset(State(api): State<ApiState>) -> impl IntoResponse {
    dispatch_command(&api.commands, RuntimeCommand::Reset, "reset", SystemTime::now()).await
}

pub async fn post_pay(State(api): State<ApiState>) -> impl IntoResponse {
    dispatch_command(&api.commands, RuntimeCommand::Pay, "pay", SystemTime::now()).await
}

pub async fn post_cancel_payment(State(api): State<ApiState>) -> impl IntoResponse {
    dispatch_command(
        &api.commands,
        RuntimeCommand::CancelPayment,
        "cancel_payment",
        SystemTime::now(),
    )
    .await
}

pub async fn delete_history(State(api): State<ApiState>, body: Bytes) -> impl IntoResponse {
    clear_history(&api.commands, &body, SystemTime::now()).await
}

fn build_health_response(
    state: Arc<RwLock<AppState>>,
    now: SystemTime,
) -> ApiResponse<HealthResponse> {
    let source_connected = match state.read() {
        Ok(guard) => guard.source_connected(),
        Err(_) => return internal_error("/api/health", "state lock poisoned while reading source"),
    };
    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/health", "timestamp formatting failure"),
    };

    let status = if source_connected {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };
    ApiResponse::Success {
        status: StatusCode::OK,
        body: HealthResponse {
            status,
            source_connected,
            timestamp,
        },
    }
}

fn build_spot_response(state: Arc<RwLock<AppState>>, now: SystemTime) -> ApiResponse<SpotResponse> {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => return internal_error("/api/spot", "state lock poisoned while reading spot"),
    };
    let spot = *guard.spot();
    let source_connected = guard.source_connected();
    let hourly_rate = guard.hourly_rate();
    let spot_updated_at = guard.spot_updated_at();
    drop(guard);

    let entered_at = match spot.entry_time.map(format_millis).transpose() {
        Ok(entered_at) => entered_at,
        Err(_) => return internal_error("/api/spot", "entry time formatting failure"),
    };
    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/spot", "timestamp formatting failure"),
    };
    let updated_at = match format_timestamp(spot_updated_at) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/spot", "timestamp formatting failure"),
    };

    let (elapsed_secs, current_fee) = spot
        .tick
        .map(|tick| (tick.elapsed_secs, tick.fee))
        .unwrap_or((0, 0.0));

    ApiResponse::Success {
        status: StatusCode::OK,
        body: SpotResponse {
            phase: spot.phase,
            entered_at,
            elapsed_secs,
            current_fee,
            payment: spot.payment,
            payment_success: spot.payment_success,
            source_connected,
            hourly_rate,
            updated_at,
            timestamp,
        },
    }
}

fn build_history_response(
    state: Arc<RwLock<AppState>>,
    now: SystemTime,
) -> ApiResponse<HistoryResponse> {
    let guard = match state.read() {
        Ok(guard) => guard,
        Err(_) => return internal_error("/api/history", "state lock poisoned while reading history"),
    };
    let stats = *guard.stats();

    let mut sessions = Vec::with_capacity(guard.sessions().len());
    for session in guard.sessions() {
        let (Ok(started_at), Ok(ended_at)) = (format_millis(session.start), format_millis(session.end))
        else {
            return internal_error("/api/history", "session timestamp formatting failure");
        };
        sessions.push(SessionResponse {
            start: session.start,
            end: session.end,
            started_at,
            ended_at,
            duration: session.duration,
            fee: session.fee,
        });
    }
    drop(guard);

    let timestamp = match format_timestamp(now) {
        Ok(formatted) => formatted,
        Err(_) => return internal_error("/api/history", "timestamp formatting failure"),
    };

    ApiResponse::Success {
        status: StatusCode::OK,
        body: HistoryResponse {
            sessions,
            total_sessions: stats.total_sessions,
            total_revenue: stats.total_revenue,
            avg_duration: stats.avg_duration,
            timestamp,
        },
    }
}

async fn dispatch_command(
    commands: &mpsc::Sender<RuntimeCommand>,
    command: RuntimeCommand,
    name: &'static str,
    now: SystemTime,
) -> ApiResponse<CommandAccepted> {
    if commands.send(command).await.is_err() {
        return runtime_unavailable(name);
    }
    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::ACCEPTED,
            body: CommandAccepted {
                command: name,
                timestamp,
            },
        },
        Err(_) => internal_error(name, "timestamp formatting failure"),
    }
}

async fn clear_history(
    commands: &mpsc::Sender<RuntimeCommand>,
    body: &[u8],
    now: SystemTime,
) -> ApiResponse<ClearResponse> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ClearRequest::default()
    } else {
        match serde_json::from_slice::<ClearRequest>(body) {
            Ok(request) => request,
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    ErrorCode::InvalidRequest,
                    format!("Invalid clear request: {err}"),
                );
            }
        }
    };

    if !request.confirm {
        return error_response(
            StatusCode::BAD_REQUEST,
            ErrorCode::ConfirmationRequired,
            "Clearing history requires {\"confirm\": true}".to_string(),
        );
    }

    let (reply, receiver) = oneshot::channel();
    let command = RuntimeCommand::ClearHistory {
        confirmation: Confirmation::Confirmed,
        reply,
    };
    if commands.send(command).await.is_err() {
        return runtime_unavailable("clear_history");
    }
    let Ok(outcome) = receiver.await else {
        return runtime_unavailable("clear_history");
    };

    match format_timestamp(now) {
        Ok(timestamp) => ApiResponse::Success {
            status: StatusCode::OK,
            body: ClearResponse {
                cleared: outcome.cleared,
                total_sessions: outcome.stats.total_sessions,
                total_revenue: outcome.stats.total_revenue,
                avg_duration: outcome.stats.avg_duration,
                timestamp,
            },
        },
        Err(_) => internal_error("clear_history", "timestamp formatting failure"),
    }
}

fn runtime_unavailable<T>(command: &str) -> ApiResponse<T> {
    warn!(command, "Session runtime unavailable");
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::RuntimeUnavailable,
        RUNTIME_UNAVAILABLE_MESSAGE.to_string(),
    )
}

fn internal_error<T>(endpoint: &str, message: &str) -> ApiResponse<T> {
    error!(endpoint, message, "Internal error while handling request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::InternalError,
        INTERNAL_ERROR_MESSAGE.to_string(),
    )
}

fn error_response<T>(status: StatusCode, error_code: ErrorCode, error_message: String) -> ApiResponse<T> {
    let timestamp = format_timestamp(SystemTime::now()).unwrap_or_else(|err| {
        error!(error = %err, "Failed to format error timestamp");
        "1970-01-01T00:00:00Z".to_string()
    });
    ApiResponse::Error {
        status,
        body: ErrorResponse {
            error_code,
            error_message,
            timestamp,
        },
    }
}

fn format_timestamp(timestamp: SystemTime) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from(timestamp);
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

fn format_millis(millis: TimestampMs) -> Result<String, TimestampError> {
    let datetime = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .map_err(TimestampError::Range)?;
    datetime.format(&Rfc3339).map_err(TimestampError::Format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryStats;
    use crate::runtime::ClearOutcome;
    use crate::session::{Session, SessionTick};
    use crate::tracker::payment::PaymentStatus;
    use crate::tracker::{SpotPhase, TrackerSnapshot};
    use std::time::{Duration, UNIX_EPOCH};

    fn poisoned_state() -> Arc<RwLock<AppState>> {
        let state = Arc::new(RwLock::new(AppState::default()));
        let state_for_thread = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _guard = state_for_thread.write().expect("lock for poison");
            panic!("poison lock");
        })
        .join();
        state
    }

    #[test]
    fn health_is_degraded_without_source() {
        let state = Arc::new(RwLock::new(AppState::default()));

        match build_health_response(state, UNIX_EPOCH + Duration::from_secs(2)) {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body.status, HealthStatus::Degraded);
                assert!(!body.source_connected);
                assert_eq!(body.timestamp, "1970-01-01T00:00:02Z");
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn health_is_ok_with_connected_source() {
        let mut app_state = AppState::default();
        app_state.set_source_connected(true);
        let state = Arc::new(RwLock::new(app_state));

        match build_health_response(state, UNIX_EPOCH) {
            ApiResponse::Success { body, .. } => assert_eq!(body.status, HealthStatus::Ok),
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn spot_reports_live_tick_while_occupied() {
        let mut app_state = AppState::new(20.0);
        app_state.set_spot(
            TrackerSnapshot {
                phase: SpotPhase::Occupied,
                entry_time: Some(1_000),
                tick: Some(SessionTick {
                    elapsed_secs: 1_800,
                    fee: 10.0,
                }),
                payment: PaymentStatus::None,
                payment_success: false,
            },
            UNIX_EPOCH + Duration::from_secs(1_800),
        );
        let state = Arc::new(RwLock::new(app_state));

        match build_spot_response(state, UNIX_EPOCH + Duration::from_secs(1_801)) {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert_eq!(body.phase, SpotPhase::Occupied);
                assert_eq!(body.entered_at.as_deref(), Some("1970-01-01T00:00:01Z"));
                assert_eq!(body.elapsed_secs, 1_800);
                assert_eq!(body.current_fee, 10.0);
                assert_eq!(body.hourly_rate, 20.0);
                assert_eq!(body.updated_at, "1970-01-01T00:30:00Z");
                assert_eq!(body.timestamp, "1970-01-01T00:30:01Z");
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn spot_returns_internal_error_when_lock_poisoned() {
        match build_spot_response(poisoned_state(), UNIX_EPOCH) {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body.error_code, ErrorCode::InternalError);
                assert_eq!(body.error_message, "Internal server error");
            }
            ApiResponse::Success { .. } => panic!("expected internal error response"),
        }
    }

    #[test]
    fn history_lists_sessions_with_aggregates() {
        let sessions = vec![
            Session {
                start: 0,
                end: 3_600_000,
                duration: 3600.0,
                fee: 20.0,
            },
            Session {
                start: 4_000_000,
                end: 5_800_000,
                duration: 1800.0,
                fee: 10.0,
            },
        ];
        let mut app_state = AppState::default();
        let stats = HistoryStats::from_sessions(&sessions);
        app_state.set_history(sessions, stats);
        let state = Arc::new(RwLock::new(app_state));

        match build_history_response(state, UNIX_EPOCH) {
            ApiResponse::Success { body, .. } => {
                assert_eq!(body.sessions.len(), 2);
                assert_eq!(body.sessions[0].ended_at, "1970-01-01T01:00:00Z");
                assert_eq!(body.total_sessions, 2);
                assert_eq!(body.total_revenue, 30.0);
                assert_eq!(body.avg_duration, 2700.0);
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[test]
    fn empty_history_is_not_an_error() {
        let state = Arc::new(RwLock::new(AppState::default()));

        match build_history_response(state, UNIX_EPOCH) {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert!(body.sessions.is_empty());
                assert_eq!(body.avg_duration, 0.0);
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[tokio::test]
    async fn clear_without_confirmation_is_rejected() {
        let (tx, mut rx) = mpsc::channel(4);

        for body in [&b""[..], &b"{}"[..], &b"{\"confirm\": false}"[..]] {
            match clear_history(&tx, body, UNIX_EPOCH).await {
                ApiResponse::Error { status, body } => {
                    assert_eq!(status, StatusCode::BAD_REQUEST);
                    assert_eq!(body.error_code, ErrorCode::ConfirmationRequired);
                }
                ApiResponse::Success { .. } => panic!("expected confirmation error"),
            }
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_clear_body_is_invalid_request() {
        let (tx, _rx) = mpsc::channel(4);

        match clear_history(&tx, b"{confirm", UNIX_EPOCH).await {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body.error_code, ErrorCode::InvalidRequest);
            }
            ApiResponse::Success { .. } => panic!("expected invalid request error"),
        }
    }

    #[tokio::test]
    async fn confirmed_clear_reports_runtime_outcome() {
        let (tx, mut rx) = mpsc::channel(4);
        let responder = tokio::spawn(async move {
            if let Some(RuntimeCommand::ClearHistory {
                confirmation,
                reply,
            }) = rx.recv().await
            {
                assert_eq!(confirmation, Confirmation::Confirmed);
                let _ = reply.send(ClearOutcome {
                    cleared: true,
                    stats: HistoryStats::from_sessions(&[]),
                });
            }
        });

        let response = clear_history(&tx, b"{\"confirm\": true}", UNIX_EPOCH).await;
        responder.await.expect("responder task");

        match response {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::OK);
                assert!(body.cleared);
                assert_eq!(body.total_sessions, 0);
                assert_eq!(body.timestamp, "1970-01-01T00:00:00Z");
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected success response, got error: {status}");
            }
        }
    }

    #[tokio::test]
    async fn commands_fail_when_runtime_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        match dispatch_command(&tx, RuntimeCommand::Toggle, "toggle", UNIX_EPOCH).await {
            ApiResponse::Error { status, body } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body.error_code, ErrorCode::RuntimeUnavailable);
            }
            ApiResponse::Success { .. } => panic!("expected runtime unavailable"),
        }
    }

    #[tokio::test]
    async fn commands_are_forwarded_to_runtime() {
        let (tx, mut rx) = mpsc::channel(1);

        match dispatch_command(&tx, RuntimeCommand::Pay, "pay", UNIX_EPOCH).await {
            ApiResponse::Success { status, body } => {
                assert_eq!(status, StatusCode::ACCEPTED);
                assert_eq!(body.command, "pay");
            }
            ApiResponse::Error { status, .. } => {
                panic!("expected accepted response, got error: {status}");
            }
        }
        assert!(matches!(rx.recv().await, Some(RuntimeCommand::Pay)));
    }
}
