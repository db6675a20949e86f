//! Rate limiting endpoints.

use std::time::Duration;

use actix_web::{HttpResponse, web};
use tollgate_core::domain::{BehaviorSignal, Decision, DenyReason, Identifier};
use tollgate_shared::dto::{BehaviorSignalDto, DecisionResponse, GuardRequest, OutcomeRequest};

use crate::middleware::error::{AppError, AppResult, retry_after_secs};
use crate::state::AppState;

fn require(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{field} must not be empty")));
    }
    Ok(())
}

fn behavior_signal(dto: BehaviorSignalDto) -> BehaviorSignal {
    BehaviorSignal {
        pointer_moves: dto.pointer_moves,
        keystrokes: dto.keystrokes,
        focus_events: dto.focus_events,
        session_duration: Duration::from_millis(dto.session_duration_ms),
    }
}

fn decision_response(decision: &Decision) -> DecisionResponse {
    DecisionResponse {
        allowed: decision.allowed,
        remaining_attempts: decision.remaining_attempts,
        reset_at: decision.reset_at,
        locked: decision.locked,
        lockout_remaining_secs: decision.lockout_remaining.map(retry_after_secs),
        required_delay_ms: decision
            .required_delay
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        reason: decision.reason.map(|r| r.as_str().to_string()),
        retry_after_secs: decision.retry_after().map(retry_after_secs),
    }
}

/// POST /api/guard
///
/// 200 with the decision when allowed, 429 when denied, 503 when the attempt
/// log could not be consulted. Denials carry `Retry-After`.
pub async fn guard(
    state: web::Data<AppState>,
    body: web::Json<GuardRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();
    require("caller", &req.caller)?;
    require("action_type", &req.action_type)?;

    let identifier = Identifier::derive(&req.caller, &req.action_type);
    let signal = req.behavior.map(behavior_signal);

    let decision = state
        .coordinator
        .guard(&identifier, &req.action_type, signal.as_ref())
        .await;
    let response = decision_response(&decision);

    if decision.allowed {
        return Ok(HttpResponse::Ok().json(response));
    }

    tracing::info!(
        identifier = %identifier,
        action_type = %req.action_type,
        reason = ?decision.reason,
        "Guard denied"
    );

    let retry_after = response.retry_after_secs.unwrap_or(1).to_string();
    let mut builder = match decision.reason {
        Some(DenyReason::Unavailable) => HttpResponse::ServiceUnavailable(),
        _ => HttpResponse::TooManyRequests(),
    };
    Ok(builder
        .insert_header(("Retry-After", retry_after))
        .json(response))
}

/// POST /api/outcome
pub async fn outcome(
    state: web::Data<AppState>,
    body: web::Json<OutcomeRequest>,
) -> AppResult<HttpResponse> {
    let req = body.into_inner();
    require("caller", &req.caller)?;
    require("action_type", &req.action_type)?;

    let identifier = Identifier::derive(&req.caller, &req.action_type);
    state
        .coordinator
        .record_outcome(&identifier, &req.action_type, req.success, req.metadata)
        .await;

    Ok(HttpResponse::NoContent().finish())
}
