use crate::tracker::SpotPhase;
use crate::tracker::payment::PaymentStatus;
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InternalError,
    RuntimeUnavailable,
    ConfirmationRequired,
    InvalidRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub source_connected: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SpotResponse {
    pub phase: SpotPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entered_at: Option<String>,
    pub elapsed_secs: u64,
    pub current_fee: f64,
    pub payment: PaymentStatus,
    pub payment_success: bool,
    pub source_connected: bool,
    pub hourly_rate: f64,
    /// When the runtime last published this snapshot.
    pub updated_at: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionResponse {
    pub start: u64,
    pub end: u64,
    pub started_at: String,
    pub ended_at: String,
    pub duration: f64,
    pub fee: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HistoryResponse {
    pub sessions: Vec<SessionResponse>,
    pub total_sessions: usize,
    pub total_revenue: f64,
    pub avg_duration: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CommandAccepted {
    pub command: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ClearResponse {
    pub cleared: bool,
    pub total_sessions: usize,
    pub total_revenue: f64,
    pub avg_duration: f64,
    pub timestamp: String,
}
