//! HTTP adapter for the scheduler core.
//!
//! Translates the core's operations into a JSON-over-HTTP surface for the
//! front desk, the worker stations and the admin console. The adapter owns
//! nothing: all state lives behind the store traits, and every handler is
//! one core call.
//!
//! # Endpoints
//!
//! - `POST /turns`, `GET /turns/{id}` - intake and lookup
//! - `POST/GET/DELETE /workers/{id}/holding` - claim, inspect, release
//! - `POST /workers/{id}/skip` - skip the held turn
//! - `POST /workers/{id}/attend`, `POST /workers/{id}/finish` - attendance
//! - `POST /turns/{id}/call`, `POST /turns/{id}/defer`
//! - `POST /workers/{id}/session/touch`, `POST /workers/{id}/session/cubicle`
//! - `POST /maintenance/cubicles` - cubicle reservation sweep
//! - `POST /admin/...` - privileged overrides, role-gated via headers
//! - `GET /health` - liveness probe

use std::sync::Arc;

pub mod health;
pub mod routes;

pub use health::health_handler;

use crate::admin::AdminOverrideController;
use crate::clock::Clock;
use crate::scheduler::{DeferralEngine, HoldingScheduler, SkipCoordinator};
use crate::sessions::SessionService;
use crate::store::MemoryStore;

/// Shared application state, passed to handlers via axum's `State`
/// extractor. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    scheduler: HoldingScheduler,
    skip: SkipCoordinator,
    defer: DeferralEngine,
    admin: AdminOverrideController,
    sessions: SessionService,
}

impl AppState {
    /// Wires every component over one shared store and clock.
    pub fn new(store: Arc<MemoryStore>, clock: Arc<dyn Clock>) -> Self {
        let scheduler = HoldingScheduler::new(store.clone(), store.clone(), clock.clone());
        let skip = SkipCoordinator::new(scheduler.clone());
        let defer = DeferralEngine::new(store.clone());
        let admin = AdminOverrideController::new(
            store.clone(),
            store.clone(),
            store.clone(),
            clock.clone(),
        );
        let sessions = SessionService::new(store.clone(), clock.clone());
        AppState {
            inner: Arc::new(AppStateInner {
                store,
                clock,
                scheduler,
                skip,
                defer,
                admin,
                sessions,
            }),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.inner.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn scheduler(&self) -> &HoldingScheduler {
        &self.inner.scheduler
    }

    pub fn skip(&self) -> &SkipCoordinator {
        &self.inner.skip
    }

    pub fn defer(&self) -> &DeferralEngine {
        &self.inner.defer
    }

    pub fn admin(&self) -> &AdminOverrideController {
        &self.inner.admin
    }

    pub fn sessions(&self) -> &SessionService {
        &self.inner.sessions
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/turns", post(routes::create_turn))
        .route("/turns/{turn}", get(routes::get_turn))
        .route("/turns/{turn}/call", post(routes::register_call))
        .route("/turns/{turn}/defer", post(routes::defer_turn))
        .route(
            "/workers/{worker}/holding",
            post(routes::assign_next_holding)
                .get(routes::get_user_holding_turn)
                .delete(routes::release_user_holdings),
        )
        .route("/workers/{worker}/skip", post(routes::skip_holding))
        .route("/workers/{worker}/attend", post(routes::start_attending))
        .route("/workers/{worker}/finish", post(routes::finish_turn))
        .route(
            "/workers/{worker}/session/touch",
            post(routes::touch_session),
        )
        .route(
            "/workers/{worker}/session/cubicle",
            post(routes::select_cubicle),
        )
        .route("/maintenance/cubicles", post(routes::cleanup_cubicles))
        .route("/admin/turns/{turn}/cancel", post(routes::cancel_turn))
        .route(
            "/admin/turns/{turn}/force-complete",
            post(routes::force_complete),
        )
        .route(
            "/admin/turns/{turn}/reactivate",
            post(routes::reactivate_turn),
        )
        .route(
            "/admin/turns/{turn}/return-to-queue",
            post(routes::return_to_queue),
        )
        .route("/admin/turns/{turn}/cubicle", post(routes::reassign_cubicle))
        .route("/admin/turns/{turn}/worker", post(routes::reassign_worker))
        .route("/admin/turns/{turn}/priority", post(routes::change_priority))
        .route(
            "/admin/turns/{turn}/holding",
            post(routes::release_holding),
        )
        .route("/admin/finish-all", post(routes::finish_all))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
