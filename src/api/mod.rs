//! # HTTP 接入层
//!
//! 路由组装与中间件顺序（外层先执行）：
//! Trace → CORS（OPTIONS 在此直接返回）→ operationID → 请求超时 → 会话校验（仅需要认证的路由）

pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::auth::SessionValidator;
use crate::config::RpcRegisterNameConfig;
use crate::discovery::directory::EndpointStats;
use crate::presence::PresenceAggregator;
use crate::rpc::RpcInvoker;
use handlers::ForwardTarget;
use routes::{FORWARD_ROUTES, HEALTH_PATH, ONLINE_STATUS_PATH, ONLINE_TOKEN_DETAIL_PATH};

/// 路由共享状态
#[derive(Clone)]
pub struct AppState {
    pub invoker: Arc<dyn RpcInvoker>,
    pub validator: Arc<SessionValidator>,
    pub presence: Arc<PresenceAggregator>,
    pub stats: Arc<dyn EndpointStats>,
    pub names: Arc<RpcRegisterNameConfig>,
    pub request_timeout: Duration,
}

/// 构建完整路由
pub fn create_router(state: AppState) -> Router {
    let mut public: Router<AppState> = Router::new();
    let mut protected: Router<AppState> = Router::new()
        .route(ONLINE_STATUS_PATH, post(handlers::online_status))
        .route(ONLINE_TOKEN_DETAIL_PATH, post(handlers::online_token_detail));

    for route in FORWARD_ROUTES {
        let target = Arc::new(ForwardTarget {
            service: state.names.resolve(route.service),
            method: route.rpc_path(),
        });
        let handler = post(move |State(state): State<AppState>, req: Request| {
            let target = Arc::clone(&target);
            async move { handlers::forward(state, target, req).await }
        });

        if route.authenticated {
            protected = protected.route(route.path, handler);
        } else {
            public = public.route(route.path, handler);
        }
    }

    let protected = protected.route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::require_session,
    ));

    Router::new()
        .route(HEALTH_PATH, get(handlers::healthz))
        .merge(public)
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors_layer())
                .layer(axum::middleware::from_fn(middleware::operation_id))
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    middleware::request_deadline,
                ))
                .into_inner(),
        )
        .with_state(state)
}
