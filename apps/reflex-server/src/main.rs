use tracing::{error, info, warn};

mod access_log;
mod api;
mod app_state;
mod bootstrap;
mod message_convert;
mod responses;
mod router;
mod server;
#[cfg(test)]
mod test_support;

pub(crate) use app_state::AppState;

#[tokio::main]
async fn main() {
    reflex_otel::init();
    let http_timeout = reflex_providers::http_timeout::init_from_env();

    let (config, config_path) = reflex_core::load_effective_config();
    info!(
        config = config_path.as_deref().unwrap_or("<defaults>"),
        http_timeout_secs = http_timeout.as_secs(),
        "starting reflex server"
    );

    let state = match bootstrap::build_state(&config) {
        Ok(state) => state,
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(2);
        }
    };

    let http_cfg = match bootstrap::http_config_from_env(&config.server) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let app = bootstrap::app(state, http_cfg.concurrency_limit);
    let handle = match server::serve(app, http_cfg.addr, shutdown_signal()).await {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("error: failed to bind {}: {err}", http_cfg.addr);
            std::process::exit(2);
        }
    };
    info!(addr = %handle.local_addr(), "listening");

    if let Err(err) = handle.join().await {
        error!("http server exited with error: {err}");
    }
    info!("shutdown complete");
}

async fn shutdown_signal() {
    info!("shutdown signal listener active");
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!("SIGTERM handler unavailable: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod http_tests {
    use crate::test_support::{self, ChatOutcome, StubProvider};
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn app() -> axum::Router {
        let stub = Arc::new(StubProvider::new("stub", ChatOutcome::Reply("ok".into())));
        test_support::app(test_support::state_with(vec![stub], "stub"))
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let resp = app()
            .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test_support::body_json(resp).await;
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn cors_preflight_is_permissive() {
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/stub/v1/chat/completions")
            .header(header::ORIGIN, "http://example.com")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .expect("request");
        let resp = app().oneshot(req).await.expect("response");
        assert!(resp.status().is_success());
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let resp = app()
            .oneshot(Request::get("/nope").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
