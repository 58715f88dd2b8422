//! # Concurrent Admission
//!
//! Parallel requests against one key must never be admitted beyond the
//! bucket capacity, and a half-open circuit must let exactly one trial
//! through no matter how many requests race for it.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::StatusCode;
    use futures::future::join_all;

    use super::super::fixtures::{gateway_config, pipeline, request, request_from, ScriptedBackend};
    use pm_api_gateway::domain::RateLimitConfig;
    use pm_api_gateway::CircuitState;

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_hundred_parallel_requests_capacity_ten() {
        let mut config = gateway_config();
        config.routes[0].rate_limit = Some(RateLimitConfig {
            capacity: 10,
            refill_per_second: 1.0,
            enabled: true,
        });
        let backend = ScriptedBackend::answering(StatusCode::OK);
        let (pipeline, _clock) = pipeline(&config, backend.clone());
        let pipeline = Arc::new(pipeline);

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move { pipeline.handle(request("/api/patients")).await.status })
            })
            .collect();

        let statuses: Vec<StatusCode> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let admitted = statuses.iter().filter(|s| **s == StatusCode::OK).count();
        let limited = statuses
            .iter()
            .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
            .count();
        assert_eq!(admitted, 10);
        assert_eq!(limited, 90);
        assert_eq!(backend.calls(), 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_keys_do_not_interfere() {
        let backend = ScriptedBackend::answering(StatusCode::OK);
        let (pipeline, _clock) = pipeline(&gateway_config(), backend.clone());
        let pipeline = Arc::new(pipeline);

        // 50 addresses, 3 requests each, capacity 2
        let handles: Vec<_> = (0..150u32)
            .map(|i| {
                let pipeline = Arc::clone(&pipeline);
                let octet = (i % 50) as u8;
                tokio::spawn(async move {
                    pipeline
                        .handle(request_from("/api/patients", [10, 1, 0, octet]))
                        .await
                        .status
                })
            })
            .collect();

        let admitted = join_all(handles)
            .await
            .into_iter()
            .filter(|joined| *joined.as_ref().unwrap() == StatusCode::OK)
            .count();
        assert_eq!(admitted, 100);

        let limiter = &pipeline.routes().get("patient-service").unwrap().limiter;
        assert_eq!(limiter.bucket_count(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_half_open_admits_a_single_trial() {
        let mut config = gateway_config();
        config.routes[1].timeout = Some(Duration::from_secs(2));
        let backend = ScriptedBackend::answering(StatusCode::BAD_GATEWAY);
        let (pipeline, clock) = pipeline(&config, backend.clone());

        for _ in 0..3 {
            pipeline.handle(request("/auth")).await;
        }
        assert_eq!(pipeline.circuits().get_state("auth-service"), CircuitState::Open);

        clock.advance(Duration::from_secs(30));
        backend.set(Ok(StatusCode::OK));
        backend.set_delay(Duration::from_millis(200));

        let pipeline = Arc::new(pipeline);
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move { pipeline.handle(request("/auth")).await.status })
            })
            .collect();
        let statuses: Vec<StatusCode> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(backend.calls(), 4);
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
        assert_eq!(
            statuses
                .iter()
                .filter(|s| **s == StatusCode::SERVICE_UNAVAILABLE)
                .count(),
            19
        );
        assert_eq!(pipeline.circuits().get_state("auth-service"), CircuitState::Closed);
    }
}
