//! # Configuration Files
//!
//! JSON documents loaded from disk feed the same pipeline as the built-in
//! defaults.

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;

    use super::super::fixtures::{pipeline, request, with_bearer, ScriptedBackend};
    use pm_api_gateway::domain::ConfigError;
    use pm_api_gateway::{GatewayConfig, ResolverPolicy};

    const CONFIG: &str = r#"{
        "http": { "port": 8080 },
        "rate_limit": { "capacity": 5, "refill_per_second": 2.5 },
        "circuit_breaker": { "failure_threshold": 4, "open_timeout": "45s" },
        "timeouts": { "dispatch": "750ms" },
        "identity": { "jwt_secret": "file-secret" },
        "routes": [
            {
                "id": "patient-service",
                "path_prefix": "/api/patients",
                "upstream": "http://patient-service:4000",
                "rate_limit": { "capacity": 1, "refill_per_second": 1.0 }
            },
            {
                "id": "billing-service",
                "display_name": "Billing",
                "path_prefix": "/billing",
                "upstream": "http://billing-service:4001",
                "resolver": "identity",
                "timeout": "2s",
                "fallback": { "status": 502, "body": "Billing is down" }
            }
        ]
    }"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_partial_document() {
        let file = write_config(CONFIG);
        let config = GatewayConfig::from_file(file.path()).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.admin.port, 9004);
        assert_eq!(config.rate_limit.capacity, 5);
        assert_eq!(config.circuit_breaker.open_timeout, Duration::from_secs(45));
        assert_eq!(config.timeouts.dispatch, Duration::from_millis(750));

        let billing = &config.routes[1];
        assert_eq!(billing.resolver, ResolverPolicy::Identity);
        assert_eq!(config.timeout_for(billing), Duration::from_secs(2));
        assert_eq!(config.rate_limit_for(billing).capacity, 5);
        assert_eq!(config.circuit_breaker_for(billing).failure_threshold, 4);
    }

    #[tokio::test]
    async fn test_loaded_config_drives_the_pipeline() {
        let file = write_config(CONFIG);
        let config = GatewayConfig::from_file(file.path()).unwrap();
        let backend = ScriptedBackend::answering(StatusCode::INTERNAL_SERVER_ERROR);
        let (pipeline, _clock) = pipeline(&config, Arc::clone(&backend));

        // Route-level capacity 1
        backend.set(Ok(StatusCode::OK));
        assert_eq!(pipeline.handle(request("/api/patients")).await.status, StatusCode::OK);
        assert_eq!(
            pipeline.handle(request("/api/patients")).await.status,
            StatusCode::TOO_MANY_REQUESTS
        );

        // Configured fallback replaces the default 503 text
        backend.set(Ok(StatusCode::INTERNAL_SERVER_ERROR));
        let degraded = pipeline.handle(with_bearer("/billing/invoices", "valid-carol")).await;
        assert_eq!(degraded.status, StatusCode::BAD_GATEWAY);
        assert_eq!(degraded.body_text(), "Billing is down");
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = GatewayConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_invalid_json_and_invalid_values() {
        let file = write_config("{ not json");
        assert!(matches!(
            GatewayConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));

        let file = write_config(r#"{ "rate_limit": { "capacity": 0 } }"#);
        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_err());

        let file = write_config(r#"{ "routes": [ { "id": "x", "path_prefix": "/x" } ] }"#);
        assert!(matches!(
            GatewayConfig::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
