use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::api::prometheus_metrics;

pub fn create_app() -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_metrics_route() {
        crate::metrics::PipelineMetrics::record_received("app-test-topic");

        let response = create_app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("app-test-topic"));
    }
}
