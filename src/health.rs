//! # Health Endpoint
//!
//! `GET /health` reports whether the service can take jobs: request metrics,
//! job counters, worker pool usage, the transcription tiers in fallback
//! order and the external tools they depend on.
//!
//! The service is `"degraded"` when no tier is currently available or
//! ffmpeg/ffprobe cannot be found; it still answers 200 so load balancers
//! keep routing health checks to it.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let orchestrator = &state.orchestrator;
    let pool = orchestrator.pool();
    let tiers = orchestrator.tier_info();
    let tools = orchestrator.tool_availability();

    let tier_ready = tiers.iter().any(|t| t.available);
    let decoder_ready = tools
        .iter()
        .filter(|(name, _, _)| *name != "yt_dlp")
        .all(|(_, _, found)| *found);
    let status = if tier_ready && decoder_ready { "healthy" } else { "degraded" };

    let endpoints: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms()
            })
        })
        .collect();

    let tool_status: serde_json::Map<String, serde_json::Value> = tools
        .into_iter()
        .map(|(name, program, found)| (name.to_string(), json!({ "program": program, "available": found })))
        .collect();

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "pid": process::id()
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "endpoints": endpoints
        },
        "jobs": orchestrator.counters(),
        "workers": {
            "capacity": pool.capacity(),
            "available": pool.available(),
            "busy": pool.capacity().saturating_sub(pool.available())
        },
        "limits": {
            "job_deadline_secs": state.config.pipeline.job_deadline_secs,
            "max_audio_upload_bytes": state.config.limits.max_audio_upload_bytes,
            "max_video_upload_bytes": state.config.limits.max_video_upload_bytes
        },
        "tiers": tiers,
        "tools": tool_status
    }))
}
