//! # Integration Scenarios
//!
//! Drive the gateway the way production traffic does: a full [`Pipeline`]
//! or [`ApiGatewayService`] router, backed by scripted upstreams and a
//! manual clock so refill and cooldown are deterministic.
//!
//! [`Pipeline`]: pm_api_gateway::Pipeline
//! [`ApiGatewayService`]: pm_api_gateway::ApiGatewayService

pub mod concurrency;
pub mod config_file;
pub mod http;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
    use parking_lot::Mutex;

    use pm_api_gateway::domain::{CircuitBreakerConfig, RateLimitConfig, RouteConfig};
    use pm_api_gateway::middleware::Observers;
    use pm_api_gateway::ports::{
        Backend, BackendError, IdentityVerifier, ManualClock, VerificationError,
    };
    use pm_api_gateway::{GatewayConfig, GatewayResponse, Pipeline, RequestContext, ResolverPolicy};

    /// Upstream stand-in answering with a scripted status or error.
    pub struct ScriptedBackend {
        answer: Mutex<Result<StatusCode, BackendError>>,
        delay: Mutex<Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn answering(status: StatusCode) -> Arc<Self> {
            Arc::new(Self {
                answer: Mutex::new(Ok(status)),
                delay: Mutex::new(Duration::ZERO),
                calls: AtomicUsize::new(0),
            })
        }

        pub fn failing(error: BackendError) -> Arc<Self> {
            let backend = Self::answering(StatusCode::OK);
            backend.set(Err(error));
            backend
        }

        pub fn set(&self, answer: Result<StatusCode, BackendError>) {
            *self.answer.lock() = answer;
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = delay;
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn dispatch(
            &self,
            route_id: &str,
            _url: &str,
            _ctx: &RequestContext,
        ) -> Result<GatewayResponse, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let status = self.answer.lock().clone()?;
            Ok(GatewayResponse::text(status, format!("{route_id} ok")))
        }
    }

    /// Accepts `valid-<subject>` tokens; everything else is malformed.
    pub struct PrefixVerifier;

    #[async_trait]
    impl IdentityVerifier for PrefixVerifier {
        async fn verify(&self, token: &str) -> Result<String, VerificationError> {
            token
                .strip_prefix("valid-")
                .map(str::to_string)
                .ok_or_else(|| VerificationError::Malformed(format!("unrecognised token {token}")))
        }
    }

    /// The two reference routes plus an identity-keyed records route.
    ///
    /// - `patient-service` at `/api/patients`: capacity 2, refill 1/s
    /// - `auth-service` at `/auth`: opens after 3 failures, 30s cooldown, 100ms timeout
    /// - `records-service` at `/records`: identity keys, capacity 1, refill 1/s
    pub fn gateway_config() -> GatewayConfig {
        let mut patients =
            RouteConfig::new("patient-service", "/api/patients", "http://patient-service:4000");
        patients.rate_limit = Some(RateLimitConfig {
            capacity: 2,
            refill_per_second: 1.0,
            enabled: true,
        });

        let mut auth = RouteConfig::new("auth-service", "/auth", "http://auth-service:4005");
        auth.circuit_breaker = Some(CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
        });
        auth.timeout = Some(Duration::from_millis(100));

        let mut records =
            RouteConfig::new("records-service", "/records", "http://records-service:4010");
        records.resolver = ResolverPolicy::Identity;
        records.rate_limit = Some(RateLimitConfig {
            capacity: 1,
            refill_per_second: 1.0,
            enabled: true,
        });

        let mut config = GatewayConfig {
            routes: vec![patients, auth, records],
            ..GatewayConfig::default()
        };
        config.identity.jwt_secret = Some("integration-secret".into());
        config
    }

    pub fn pipeline(config: &GatewayConfig, backend: Arc<ScriptedBackend>) -> (Pipeline, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let pipeline = Pipeline::new(
            config,
            Arc::new(PrefixVerifier),
            backend,
            clock.clone(),
            Observers::new(),
        );
        (pipeline, clock)
    }

    pub fn request_from(path: &str, ip: [u8; 4]) -> RequestContext {
        RequestContext::new(Method::GET, path, HeaderMap::new())
            .with_remote_addr(Some(SocketAddr::from((ip, 40000))))
    }

    pub fn request(path: &str) -> RequestContext {
        request_from(path, [10, 0, 0, 7])
    }

    pub fn with_bearer(path: &str, token: &str) -> RequestContext {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        RequestContext::new(Method::GET, path, headers)
            .with_remote_addr(Some(SocketAddr::from(([10, 0, 0, 7], 40000))))
    }
}
