#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, StatusCode},
    };

    use crate::tests::common::{body_bytes, json_body, request, TestApp};

    #[tokio::test]
    async fn test_healthz_endpoint() {
        let app = TestApp::new().await;
        let resp = app.send(request(Method::GET, "/healthz", None).body(Body::empty()).unwrap()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&body_bytes(resp).await[..], b"ok");
    }

    #[tokio::test]
    async fn test_readyz_endpoint() {
        let app = TestApp::new().await;
        let resp = app.send(request(Method::GET, "/readyz", None).body(Body::empty()).unwrap()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(&body_bytes(resp).await[..], b"ready");
    }

    #[tokio::test]
    async fn test_readyz_reports_closed_pool() {
        let app = TestApp::new().await;
        app.state.db.close().await;
        let resp = app.send(request(Method::GET, "/readyz", None).body(Body::empty()).unwrap()).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_bytes(resp).await;
        assert!(String::from_utf8_lossy(&body).starts_with("not ready"));
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let app = TestApp::new().await;
        let resp = app.send(request(Method::GET, "/version", None).body(Body::empty()).unwrap()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["name"], "bhapi");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["api"], "v2");
        assert!(body["build"]["profile"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let app = TestApp::new().await;
        app.state.metrics.inc_analysis_runs();
        app.state.metrics.add_saved_queries_exported(3);

        let resp = app.send(request(Method::GET, "/metrics", None).body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["analysis_runs"], 1);
        assert_eq!(body["saved_queries_exported"], 3);
        assert_eq!(body["jobs_started"], 0);
        assert_eq!(body["files_rejected"], 0);
    }

    #[tokio::test]
    async fn test_metrics_count_ingest_activity() {
        let app = TestApp::new().await;
        let (status, _) = app.call(Method::POST, "/api/v2/file-upload/start", Some(&app.uploader), None).await;
        assert_eq!(status, StatusCode::CREATED);

        let resp = app.send(request(Method::GET, "/metrics", None).body(Body::empty()).unwrap()).await;
        let body = json_body(resp).await;
        assert_eq!(body["jobs_started"], 1);
    }
}
