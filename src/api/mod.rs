//! API endpoints for the abuse guard service.
//!
//! The web front end asks the guard about every request and every admin
//! login before doing any work; operators use the remaining endpoints to
//! inspect and lift bans.

use std::sync::Arc;
use actix_web::{http::header::ContentType, web, HttpResponse, Responder};
use chrono::{DateTime, Duration, Utc};
use log::error;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::core::audit::{recent_security_events, AuditEntry, AuditSink};
use crate::core::guard::{AbuseGuard, DenyReason, LoginOutcome, RequestDecision};
use crate::core::query_log::{is_loggable_path, QueryLogThrottle};
use crate::models::Config;
use crate::utils::is_admin_path;

const ACCESS_CATEGORY: &str = "PAGE_ACCESS";
const DEFAULT_EVENT_COUNT: usize = 20;
const MAX_EVENT_COUNT: usize = 100;

pub struct ApiState {
    pub guard: Arc<AbuseGuard>,
    pub query_log: Arc<QueryLogThrottle>,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: Option<PrometheusHandle>,
    pub config: Arc<Config>,
}

impl ApiState {
    fn audit(&self, now: DateTime<Utc>, ip: &str, action: &str, path: &str, details: String, user_agent: &str) {
        self.audit
            .append(AuditEntry::new(now, ip, action, path, details, user_agent));
    }
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/requests/check").route(web::post().to(check_request)))
            .service(web::resource("/logins").route(web::post().to(record_login)))
            .service(web::resource("/admin/status").route(web::get().to(admin_status)))
            .service(
                web::resource("/bans")
                    .route(web::get().to(list_bans))
                    .route(web::post().to(create_ban)),
            )
            .service(web::resource("/bans/{ip}").route(web::delete().to(remove_ban)))
            .service(web::resource("/stats").route(web::get().to(security_stats)))
            .service(web::resource("/security-events").route(web::get().to(security_events))),
    )
    .service(web::resource("/metrics").route(web::get().to(render_metrics)));
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Request check request
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckRequest {
    pub ip: String,
    pub path: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Request check response
#[derive(Serialize)]
struct CheckResponse {
    allowed: bool,
    reason: Option<&'static str>,
    message: String,
}

/// Login attempt report
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub ip: String,
    pub success: bool,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    accepted: bool,
    message: String,
}

#[derive(Serialize)]
struct AdminStatusResponse {
    available: bool,
    lockdown_until: Option<DateTime<Utc>>,
}

/// Manual ban request
#[derive(Debug, Serialize, Deserialize)]
pub struct BanRequest {
    pub ip: String,
    pub duration_seconds: u64,
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub count: Option<usize>,
}

fn message(text: impl Into<String>) -> MessageResponse {
    MessageResponse { message: text.into() }
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Request check endpoint
pub async fn check_request(
    state: web::Data<ApiState>,
    req: web::Json<CheckRequest>,
) -> impl Responder {
    let now = Utc::now();
    let user_agent = req.user_agent.as_deref().unwrap_or("");

    match state.guard.check_request_at(&req.ip, now) {
        RequestDecision::Deny(DenyReason::Banned) => {
            state.audit(now, &req.ip, "ACCESS_DENIED_BANNED", &req.path, String::new(), user_agent);
            HttpResponse::Forbidden().json(CheckResponse {
                allowed: false,
                reason: Some("banned"),
                message: "Access denied".to_string(),
            })
        }
        RequestDecision::Deny(DenyReason::RateLimited) => {
            let window = state.guard.config().request_window_seconds;
            state.audit(
                now,
                &req.ip,
                "ACCESS_DENIED_RATE_LIMIT",
                &req.path,
                format!("More than {} requests in {}s", state.guard.config().request_deny_threshold, window),
                user_agent,
            );
            state.audit(
                now,
                &req.ip,
                "SECURITY_IP_BANNED",
                &req.path,
                format!("Rate limit ban for {}s", state.guard.config().rate_limit_ban_seconds),
                user_agent,
            );
            HttpResponse::TooManyRequests().json(CheckResponse {
                allowed: false,
                reason: Some("rate_limited"),
                message: "Rate limit exceeded".to_string(),
            })
        }
        RequestDecision::Allow if is_admin_path(&req.path) && !state.guard.is_admin_surface_available_at(now) => {
            state.audit(now, &req.ip, "ACCESS_DENIED_LOCKDOWN", &req.path, String::new(), user_agent);
            HttpResponse::ServiceUnavailable().json(CheckResponse {
                allowed: false,
                reason: Some("admin_lockdown"),
                message: "Admin panel temporarily unavailable".to_string(),
            })
        }
        RequestDecision::Allow => {
            if state.config.audit.enabled
                && is_loggable_path(&req.path)
                && state.query_log.should_log(&req.ip, ACCESS_CATEGORY, now)
            {
                state.audit(now, &req.ip, "ACCESS", &req.path, String::new(), user_agent);
            }
            HttpResponse::Ok().json(CheckResponse {
                allowed: true,
                reason: None,
                message: "Request allowed".to_string(),
            })
        }
    }
}

/// Login attempt endpoint
///
/// Failures always get the same answer; the remaining attempt count is only
/// written to the audit log.
pub async fn record_login(
    state: web::Data<ApiState>,
    req: web::Json<LoginRequest>,
) -> impl Responder {
    let now = Utc::now();
    let user_agent = req.user_agent.as_deref().unwrap_or("");

    if !state.guard.is_admin_surface_available_at(now) {
        state.audit(now, &req.ip, "ACCESS_DENIED_LOCKDOWN", "/admin/login", String::new(), user_agent);
        return HttpResponse::ServiceUnavailable().json(message("Admin panel temporarily unavailable"));
    }

    let was_banned = state.guard.is_key_banned(&req.ip, now);
    match state.guard.check_login_at(&req.ip, req.success, now) {
        LoginOutcome::Accepted => {
            state.audit(now, &req.ip, "ADMIN_LOGIN_SUCCESS", "/admin/login", String::new(), user_agent);
            HttpResponse::Ok().json(LoginResponse {
                accepted: true,
                message: "Login accepted".to_string(),
            })
        }
        LoginOutcome::Rejected { attempts_remaining } => {
            let details = if was_banned {
                "Rejected while banned".to_string()
            } else {
                format!("Attempts remaining: {}", attempts_remaining)
            };
            state.audit(now, &req.ip, "ADMIN_LOGIN_FAILED", "/admin/login", details, user_agent);
            if !was_banned && state.guard.is_key_banned(&req.ip, now) {
                state.audit(
                    now,
                    &req.ip,
                    "SECURITY_IP_BANNED",
                    "/admin/login",
                    format!("Brute force ban for {}s", state.guard.config().brute_force_ban_seconds),
                    user_agent,
                );
            }
            HttpResponse::Unauthorized().json(LoginResponse {
                accepted: false,
                message: "Invalid credentials".to_string(),
            })
        }
    }
}

async fn admin_status(state: web::Data<ApiState>) -> impl Responder {
    let now = Utc::now();
    let lockdown_until = state.guard.lockdown_until(now);
    HttpResponse::Ok().json(AdminStatusResponse {
        available: lockdown_until.is_none(),
        lockdown_until,
    })
}

async fn list_bans(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.guard.list_banned_ips())
}

async fn create_ban(state: web::Data<ApiState>, req: web::Json<BanRequest>) -> impl Responder {
    if req.duration_seconds == 0 {
        return HttpResponse::BadRequest().json(message("duration_seconds must be positive"));
    }
    let now = Utc::now();
    let seconds = i64::try_from(req.duration_seconds).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    state.guard.ban_key(&req.ip, Duration::seconds(seconds), now);
    state.audit(
        now,
        &req.ip,
        "SECURITY_IP_BANNED",
        "",
        format!("Manual ban for {}s", req.duration_seconds),
        "",
    );
    HttpResponse::Created().json(message(format!("{} banned", req.ip)))
}

async fn remove_ban(state: web::Data<ApiState>, path: web::Path<String>) -> impl Responder {
    let ip = path.into_inner();
    if state.guard.unban(&ip) {
        state.audit(Utc::now(), &ip, "SECURITY_IP_UNBANNED", "", String::new(), "");
        HttpResponse::Ok().json(message(format!("{} unbanned", ip)))
    } else {
        HttpResponse::NotFound().json(message(format!("{} is not banned", ip)))
    }
}

async fn security_stats(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.guard.security_stats(Utc::now()))
}

async fn security_events(
    state: web::Data<ApiState>,
    query: web::Query<EventsQuery>,
) -> impl Responder {
    let count = query.count.unwrap_or(DEFAULT_EVENT_COUNT).min(MAX_EVENT_COUNT);
    let directory = std::path::Path::new(&state.config.audit.directory);
    match recent_security_events(directory, count, Utc::now().date_naive()).await {
        Ok(events) => HttpResponse::Ok().json(events),
        Err(e) => {
            error!("Failed to read security events: {}", e);
            HttpResponse::InternalServerError().json(message("Failed to read security events"))
        }
    }
}

async fn render_metrics(state: web::Data<ApiState>) -> impl Responder {
    match &state.metrics {
        Some(handle) => HttpResponse::Ok()
            .content_type(ContentType::plaintext())
            .body(handle.render()),
        None => HttpResponse::NotFound().json(message("Metrics are not enabled")),
    }
}
