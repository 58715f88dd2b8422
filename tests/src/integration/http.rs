//! # HTTP Surface
//!
//! Proxy and admin routers driven over axum, both with scripted backends
//! (`tower::ServiceExt::oneshot`) and with the real reqwest backend against
//! a live local upstream.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    use super::super::fixtures::{gateway_config, PrefixVerifier, ScriptedBackend};
    use pm_api_gateway::domain::{CircuitBreakerConfig, RouteConfig};
    use pm_api_gateway::ports::ManualClock;
    use pm_api_gateway::{ApiGatewayService, GatewayConfig, HttpBackend, RejectAllVerifier};

    const CLIENT: ([u8; 4], u16) = ([192, 168, 1, 20], 51000);

    fn service(backend: Arc<ScriptedBackend>) -> (ApiGatewayService, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let service = ApiGatewayService::with_clock(
            gateway_config(),
            Arc::new(PrefixVerifier),
            backend,
            clock.clone(),
        )
        .unwrap();
        (service, clock)
    }

    async fn call(router: &Router, method: &str, uri: &str) -> Response {
        router
            .clone()
            .layer(MockConnectInfo(SocketAddr::from(CLIENT)))
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    // =========================================================================
    // PROXY ROUTER
    // =========================================================================

    #[tokio::test]
    async fn test_rate_limited_response_over_http() {
        let (service, _clock) = service(ScriptedBackend::answering(StatusCode::OK));
        let router = service.router();

        assert_eq!(call(&router, "GET", "/api/patients").await.status(), StatusCode::OK);
        assert_eq!(call(&router, "GET", "/api/patients").await.status(), StatusCode::OK);

        let limited = call(&router, "GET", "/api/patients").await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers()[header::RETRY_AFTER], "1");
        assert!(limited.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        assert_eq!(body_json(limited).await["message"], "Too many requests");
    }

    #[tokio::test]
    async fn test_fallback_body_over_http() {
        let backend = ScriptedBackend::answering(StatusCode::BAD_GATEWAY);
        let (service, _clock) = service(backend.clone());
        let router = service.router();

        for _ in 0..4 {
            let response = call(&router, "POST", "/auth/login").await;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(
                body_text(response).await,
                "Auth service is temporarily unavailable. Please try again later."
            );
        }
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_metrics_follow_outcomes() {
        let backend = ScriptedBackend::answering(StatusCode::BAD_GATEWAY);
        let (service, _clock) = service(backend.clone());
        let router = service.router();

        for _ in 0..4 {
            call(&router, "GET", "/auth").await;
        }
        backend.set(Ok(StatusCode::OK));
        for _ in 0..3 {
            call(&router, "GET", "/api/patients").await;
        }
        call(&router, "GET", "/nowhere").await;

        let metrics = body_json(call(&service.admin_router(), "GET", "/metrics").await).await;
        assert_eq!(metrics["requests"]["total"], 8);
        assert_eq!(metrics["requests"]["in_flight"], 0);
        assert_eq!(metrics["requests"]["dispatched"], 2);
        assert_eq!(metrics["requests"]["no_route"], 1);
        assert_eq!(metrics["backend"]["failures"], 3);
        assert_eq!(metrics["rate_limiting"]["rejected"], 1);
        assert_eq!(metrics["circuit_breaker"]["refused"], 1);
    }

    // =========================================================================
    // ADMIN ROUTER
    // =========================================================================

    #[tokio::test]
    async fn test_admin_reset_closes_an_open_circuit() {
        let backend = ScriptedBackend::answering(StatusCode::BAD_GATEWAY);
        let (service, _clock) = service(backend.clone());
        let router = service.router();
        let admin = service.admin_router();

        for _ in 0..3 {
            call(&router, "GET", "/auth").await;
        }
        let circuits = body_json(call(&admin, "GET", "/circuits").await).await;
        let auth = circuits
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["route"] == "auth-service")
            .unwrap()
            .clone();
        assert_eq!(auth["state"], "open");
        assert_eq!(auth["consecutive_failures"], 3);

        let reset = call(&admin, "POST", "/circuits/auth-service/reset").await;
        assert_eq!(reset.status(), StatusCode::NO_CONTENT);

        backend.set(Ok(StatusCode::OK));
        assert_eq!(call(&router, "GET", "/auth").await.status(), StatusCode::OK);
        assert_eq!(backend.calls(), 4);

        let unknown = call(&admin, "POST", "/circuits/billing/reset").await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    // =========================================================================
    // LIVE UPSTREAM (reqwest backend)
    // =========================================================================

    async fn spawn_patient_upstream() -> SocketAddr {
        let app = Router::new()
            .route(
                "/api/patients/:id",
                get(|axum::extract::Path(id): axum::extract::Path<String>| async move {
                    format!("patient {id}")
                }),
            )
            .route(
                "/reports/monthly",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    "monthly report"
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn closed_port() -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    #[tokio::test]
    async fn test_live_upstream_and_unreachable_auth_service() {
        let patients = spawn_patient_upstream().await;
        let auth = closed_port().await;

        let mut auth_route = RouteConfig::new("auth-service", "/auth", &format!("http://{auth}"));
        auth_route.circuit_breaker = Some(CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
        });
        let config = GatewayConfig {
            routes: vec![
                RouteConfig::new("patient-service", "/api/patients", &format!("http://{patients}")),
                auth_route,
            ],
            ..GatewayConfig::default()
        };

        let backend = Arc::new(HttpBackend::new(Duration::from_secs(2)).unwrap());
        let service = ApiGatewayService::new(config, Arc::new(RejectAllVerifier), backend).unwrap();
        let router = service.router();

        let found = call(&router, "GET", "/api/patients/42").await;
        assert_eq!(found.status(), StatusCode::OK);
        assert_eq!(body_text(found).await, "patient 42");

        // Upstream 404 passes through and does not count against the circuit
        let missing = call(&router, "GET", "/api/patients").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        for _ in 0..4 {
            let response = call(&router, "POST", "/auth/login").await;
            assert_eq!(
                body_text(response).await,
                "Auth service is temporarily unavailable. Please try again later."
            );
        }

        let circuits = service.pipeline().circuits().get_stats();
        let auth_stats = circuits.iter().find(|s| s.route == "auth-service").unwrap();
        assert_eq!(auth_stats.total_failures, 3);
        assert_eq!(auth_stats.total_rejected, 1);
        let patient_stats = circuits.iter().find(|s| s.route == "patient-service").unwrap();
        assert_eq!(patient_stats.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_route_timeout_longer_than_default_is_honored() {
        let upstream = spawn_patient_upstream().await;

        let mut reports = RouteConfig::new("reports-service", "/reports", &format!("http://{upstream}"));
        reports.timeout = Some(Duration::from_secs(2));
        let mut summaries = RouteConfig::new("summary-service", "/summaries", &format!("http://{upstream}"));
        summaries.strip_prefix = true;
        let mut config = GatewayConfig {
            routes: vec![reports, summaries],
            ..GatewayConfig::default()
        };
        config.timeouts.dispatch = Duration::from_millis(200);

        let backend = Arc::new(HttpBackend::new(config.timeouts.connect).unwrap());
        let service = ApiGatewayService::new(config, Arc::new(RejectAllVerifier), backend).unwrap();
        let router = service.router();

        let slow = call(&router, "GET", "/reports/monthly").await;
        assert_eq!(slow.status(), StatusCode::OK);
        assert_eq!(body_text(slow).await, "monthly report");

        // Routes without an override keep the 200ms default
        let cut_short = call(&router, "GET", "/summaries/reports/monthly").await;
        assert_eq!(cut_short.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
