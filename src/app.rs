use std::net::TcpListener;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder};

use chrono::Utc;

use tracing_actix_web::TracingLogger;

use crate::controller::signups;
use crate::workflow::WorkflowEngine;

/// Lower bound on the staleness threshold so short maintenance intervals do
/// not make the health check trigger-happy
const MIN_MAINTENANCE_THRESHOLD: Duration = Duration::from_secs(120);

/// Tracks when the background maintenance pass (expiry sweep + confirmed
/// commit) last completed, so the health check can flag a wedged task.
#[derive(Debug, Clone)]
pub struct MaintenanceMonitor {
    last_pass: Arc<AtomicI64>,
    threshold: Duration,
}

impl MaintenanceMonitor {
    fn new(interval: Duration) -> Self {
        let threshold = MIN_MAINTENANCE_THRESHOLD.max(interval * 3);
        Self {
            last_pass: Arc::new(AtomicI64::new(Utc::now().timestamp())),
            threshold,
        }
    }

    fn mark(&self) {
        self.last_pass
            .store(Utc::now().timestamp(), Ordering::SeqCst);
    }

    fn is_healthy(&self) -> bool {
        let last = self.last_pass.load(Ordering::SeqCst);
        let elapsed = Utc::now().timestamp().saturating_sub(last);
        elapsed <= self.threshold.as_secs() as i64
    }
}

/// Simple health-check endpoint; fails when background maintenance stalls
#[tracing::instrument(name = "Health check", skip(monitor))]
#[get("/health_check")]
async fn health_check(monitor: web::Data<MaintenanceMonitor>) -> impl Responder {
    if monitor.is_healthy() {
        HttpResponse::Ok().body("I am alive")
    } else {
        HttpResponse::InternalServerError().body("Background maintenance has not run recently")
    }
}

/// Run the application on a specified TCP listener.
///
/// Spawns the periodic maintenance pass alongside the HTTP server: the expiry
/// sweep, then the confirmed-record commit that re-drives membership changes
/// whose directory call failed transiently. Both are independent of request
/// handling and never block it.
pub fn run(
    listener: TcpListener,
    engine: Arc<WorkflowEngine>,
    maintenance_interval: Duration,
) -> anyhow::Result<Server> {
    let monitor = MaintenanceMonitor::new(maintenance_interval);

    tokio::spawn(maintenance_loop(
        engine.clone(),
        monitor.clone(),
        maintenance_interval,
    ));

    // Wrap application data
    let engine = web::Data::from(engine);
    let monitor = web::Data::new(monitor);

    // Start the server
    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(engine.clone())
            .app_data(monitor.clone())
            .service(health_check)
            .service(signups::scope())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

async fn maintenance_loop(
    engine: Arc<WorkflowEngine>,
    monitor: MaintenanceMonitor,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let swept = engine.sweep_expired(Utc::now()).await;
        if let Err(err) = &swept {
            tracing::error!(error = %err, "Expiry sweep failed");
        }
        let committed = engine.commit_confirmed().await;
        if let Err(err) = &committed {
            tracing::error!(error = %err, "Confirmed-signup commit failed");
        }

        if swept.is_ok() && committed.is_ok() {
            monitor.mark();
        }
    }
}
