//! Health Surface (`spec.md` §4.6/§2 item 6/§6): `GET /healthy` and
//! `GET /ready`, 200 while the engine is running and the last sweep
//! succeeded within one `fullReconciliationInterval`, 503 otherwise.
//!
//! Structurally this is the teacher's `service-common::health::HealthServer`
//! (`HealthServerConfig`, actix-web endpoints returning 200/503 JSON
//! bodies) trimmed of the Prometheus metrics registry wiring — metrics
//! exporter configuration is out of scope (`spec.md` §1).

use crate::engine::ReconciliationEngine;
use actix_web::{web, App, HttpResponse, HttpServer};
use serde::Deserialize;
use serde_json::json;
use std::{sync::Arc, time::Duration};

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct HealthServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

struct HealthState {
    engine: Arc<ReconciliationEngine>,
    full_reconciliation_interval: Duration,
}

/// Process liveness: the event loop hasn't begun shutting down.
async fn healthy(state: web::Data<HealthState>) -> HttpResponse {
    if state.engine.is_shutting_down() {
        HttpResponse::ServiceUnavailable().json(json!({"success": false, "reason": "shutting down"}))
    } else {
        HttpResponse::Ok().json(json!({
            "success": true,
            "sweeping": state.engine.health.is_sweeping(),
        }))
    }
}

/// `spec.md` §6: 200 while the engine is live and the last sweep succeeded
/// within one `fullReconciliationInterval`. Recency, not "a sweep happens
/// to be executing right now" — a multi-minute gap between sweeps is the
/// normal case given the default interval, not staleness.
async fn ready(state: web::Data<HealthState>) -> HttpResponse {
    if state.engine.is_shutting_down() {
        return HttpResponse::ServiceUnavailable().json(json!({"success": false, "reason": "shutting down"}));
    }
    if state.engine.health.is_ready(state.full_reconciliation_interval) {
        HttpResponse::Ok().json(json!({"success": true}))
    } else {
        HttpResponse::ServiceUnavailable().json(json!({"success": false, "reason": "sweep stale or not yet run"}))
    }
}

/// Runs the health HTTP server to completion (i.e. until the process
/// exits); intended to be one of the tasks spawned alongside the engine's
/// event-watch and sweep loops.
pub async fn run(
    config: HealthServerConfig,
    engine: Arc<ReconciliationEngine>,
    full_reconciliation_interval: Duration,
) -> anyhow::Result<()> {
    let state = web::Data::new(HealthState {
        engine,
        full_reconciliation_interval,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/healthy", web::get().to(healthy))
            .route("/ready", web::get().to(ready))
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}
