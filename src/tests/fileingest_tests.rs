#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use axum::{
        body::Body,
        http::{header, Method, StatusCode},
    };
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};
    use zip::write::SimpleFileOptions;

    use crate::error::ID_MALFORMED;
    use crate::ingest::jobs::{
        self, timeout_message, NOT_RUNNING_TO_ATTACH, NOT_RUNNING_TO_END, STATUS_ALL_FAILED, STATUS_COMPLETE,
        STATUS_PARTIALLY_COMPLETE,
    };
    use crate::model::user::User;
    use crate::routes::fileingest::{ALL_PARTS_FAILED, INGEST_FORBIDDEN};
    use crate::tests::common::{error_message, json_body, request, TestApp};

    const BOUNDARY: &str = "bhapi-test-boundary";

    fn users_document() -> Value {
        json!({
            "meta": { "type": "users", "count": 2, "version": 6 },
            "data": [
                { "ObjectIdentifier": "S-1-5-21-1-1105", "Properties": { "name": "BOB@CORP.LOCAL", "domainsid": "S-1-5-21-1" } },
                { "ObjectIdentifier": "S-1-5-21-1-1106", "Properties": { "name": "ALICE@CORP.LOCAL", "domainsid": "S-1-5-21-1" } },
            ],
        })
    }

    fn unsupported_document() -> Value {
        json!({ "meta": { "type": "printers" }, "data": [] })
    }

    async fn start(app: &TestApp, user: &User) -> i64 {
        let (status, body) = app.call(Method::POST, "/api/v2/file-upload/start", Some(user), None).await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_i64().unwrap()
    }

    async fn upload(app: &TestApp, job_id: &str, content_type: &str, body: Vec<u8>) -> (StatusCode, Value) {
        let req = request(Method::POST, &format!("/api/v2/file-upload/{}", job_id), Some(&app.uploader))
            .header(header::CONTENT_TYPE, content_type)
            .header("x-file-upload-name", "upload.json")
            .body(Body::from(body))
            .unwrap();
        let resp = app.send(req).await;
        let status = resp.status();
        (status, json_body(resp).await)
    }

    async fn upload_json(app: &TestApp, job_id: i64, doc: &Value) -> StatusCode {
        upload(app, &job_id.to_string(), "application/json", doc.to_string().into_bytes()).await.0
    }

    async fn end(app: &TestApp, job_id: i64) -> (StatusCode, Value) {
        app.call(Method::POST, &format!("/api/v2/file-upload/{}/end", job_id), Some(&app.uploader), None).await
    }

    async fn job(app: &TestApp, job_id: i64) -> Value {
        let (_, body) = app.get(&format!("/api/v2/file-upload?id=eq:{}", job_id), &app.user).await;
        body["data"][0].clone()
    }

    fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (file_name, content_type, contents) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    file_name, content_type
                )
                .as_bytes(),
            );
            body.extend_from_slice(contents);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn upload_multipart(app: &TestApp, job_id: i64, body: Vec<u8>) -> (StatusCode, Value) {
        let req = request(Method::POST, &format!("/api/v2/file-upload/{}/multipart", job_id), Some(&app.uploader))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
            .body(Body::from(body))
            .unwrap();
        let resp = app.send(req).await;
        let status = resp.status();
        (status, json_body(resp).await)
    }

    #[tokio::test]
    async fn only_ingest_roles_may_start_jobs() {
        let app = TestApp::new().await;

        let (status, body) = app.call(Method::POST, "/api/v2/file-upload/start", Some(&app.user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_message(&body), INGEST_FORBIDDEN);

        let (status, body) = app.call(Method::POST, "/api/v2/file-upload/start", Some(&app.uploader), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], 1);
        assert_eq!(body["data"]["user_id"], app.uploader.id.as_str());
        assert_eq!(body["data"]["total_files"], 0);
    }

    #[tokio::test]
    async fn accepted_types_lists_json_and_zip() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/api/v2/file-upload/accepted-types", &app.user).await;
        assert_eq!(status, StatusCode::OK);
        let types: Vec<&str> = body["data"].as_array().unwrap().iter().map(|t| t.as_str().unwrap()).collect();
        assert!(types.contains(&"application/json"));
        assert!(types.contains(&"application/zip"));
    }

    #[tokio::test]
    async fn uploads_are_validated() {
        let app = TestApp::new().await;
        let job_id = start(&app, &app.uploader).await;
        let id = job_id.to_string();

        let (status, body) = upload(&app, &id, "text/plain", b"hello".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "Content type must be application/json or application/zip");

        let (status, body) = upload(&app, "latest", "application/json", b"{}".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), ID_MALFORMED);

        let (status, _) = upload(&app, "999", "application/json", users_document().to_string().into_bytes()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = upload(&app, &id, "application/json", b"{not json".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "file is not valid json");

        let (status, body) = upload(&app, &id, "application/json; charset=utf-8", b"{\"data\": []}".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "file is missing required tags: meta, data");

        let (status, body) = upload(&app, &id, "application/zip", b"PK not really".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "file is not a valid zip archive");

        assert_eq!(job(&app, job_id).await["total_files"], 0);
        assert_eq!(app.state.metrics.get_snapshot().files_rejected, 3);
    }

    #[tokio::test]
    async fn ended_jobs_reject_uploads() {
        let app = TestApp::new().await;
        let job_id = start(&app, &app.uploader).await;

        let (status, body) = end(&app, job_id).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], 6);
        assert!(body["data"]["end_time"].is_string());

        let (status, body) = end(&app, job_id).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), NOT_RUNNING_TO_END);

        let (status, body) =
            upload(&app, &job_id.to_string(), "application/json", users_document().to_string().into_bytes()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), NOT_RUNNING_TO_ATTACH);
    }

    #[tokio::test]
    async fn datapipe_ingests_and_completes_jobs() {
        let app = TestApp::new().await;
        let job_id = start(&app, &app.uploader).await;
        assert_eq!(upload_json(&app, job_id, &users_document()).await, StatusCode::ACCEPTED);
        assert_eq!(job(&app, job_id).await["total_files"], 1);
        end(&app, job_id).await;

        let report = jobs::datapipe_tick(&app.state).await.unwrap();
        assert_eq!(report.tasks_processed, 1);
        assert_eq!(report.tasks_failed, 0);
        assert_eq!(report.jobs_analyzing, 1);
        assert_eq!(report.jobs_finished, 1);
        assert!(report.analyzed);

        let finished = job(&app, job_id).await;
        assert_eq!(finished["status"], 2);
        assert_eq!(finished["status_message"], STATUS_COMPLETE);
        assert_eq!(finished["failed_files"], 0);

        let (status, body) = app.get(&format!("/api/v2/file-upload/{}/completed-tasks", job_id), &app.user).await;
        assert_eq!(status, StatusCode::OK);
        let tasks = body["data"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["file_name"], "upload.json");
        assert!(tasks[0]["errors"].as_array().unwrap().is_empty());

        let (status, body) = app.get("/api/v2/users/S-1-5-21-1-1105", &app.user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["props"]["name"], "BOB@CORP.LOCAL");

        // Stored uploads are removed once processed
        let leftovers = std::fs::read_dir(&app.state.config.ingest.temp_dir).unwrap().count();
        assert_eq!(leftovers, 0);

        // Nothing left to do on the next pass
        let idle = jobs::datapipe_tick(&app.state).await.unwrap();
        assert_eq!(idle, jobs::DatapipeReport::default());
    }

    #[tokio::test]
    async fn failed_files_decide_the_final_status() {
        let app = TestApp::new().await;

        let all_failed = start(&app, &app.uploader).await;
        upload_json(&app, all_failed, &unsupported_document()).await;
        end(&app, all_failed).await;

        let partial = start(&app, &app.uploader).await;
        upload_json(&app, partial, &users_document()).await;
        upload_json(&app, partial, &unsupported_document()).await;
        end(&app, partial).await;

        let report = jobs::datapipe_tick(&app.state).await.unwrap();
        assert_eq!(report.tasks_processed, 3);
        assert_eq!(report.tasks_failed, 2);
        assert_eq!(report.jobs_finished, 2);

        let failed = job(&app, all_failed).await;
        assert_eq!(failed["status"], 5);
        assert_eq!(failed["status_message"], STATUS_ALL_FAILED);
        assert_eq!(failed["failed_files"], 1);

        let partial = job(&app, partial).await;
        assert_eq!(partial["status"], 8);
        assert_eq!(partial["status_message"], STATUS_PARTIALLY_COMPLETE);

        let (_, body) = app.get(&format!("/api/v2/file-upload/{}/completed-tasks", all_failed), &app.user).await;
        let errors = body["data"][0]["errors"].as_array().unwrap();
        assert!(errors[0].as_str().unwrap().contains("unsupported data type: printers"));
    }

    #[tokio::test]
    async fn zip_uploads_skip_metadata_entries() {
        let app = TestApp::new().await;
        let job_id = start(&app, &app.uploader).await;

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file("20240101_users.json", options).unwrap();
        writer.write_all(users_document().to_string().as_bytes()).unwrap();
        writer.start_file("__MACOSX/._20240101_users.json", options).unwrap();
        writer.write_all(b"\x00\x05\x16\x07").unwrap();
        let archive = writer.finish().unwrap().into_inner();

        let (status, _) = upload(&app, &job_id.to_string(), "application/x-zip-compressed", archive).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        end(&app, job_id).await;

        let report = jobs::datapipe_tick(&app.state).await.unwrap();
        assert_eq!(report.tasks_failed, 0);
        assert_eq!(job(&app, job_id).await["status"], 2);

        let (status, _) = app.get("/api/v2/users/S-1-5-21-1-1106", &app.user).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn multipart_uploads_report_each_part() {
        let app = TestApp::new().await;
        let job_id = start(&app, &app.uploader).await;
        let users = users_document().to_string();

        let body = multipart_body(&[
            ("users.json", "application/json", users.as_bytes()),
            ("notes.txt", "text/plain", b"not an ingest file"),
        ]);
        let (status, body) = upload_multipart(&app, job_id, body).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["total_parts"], 2);
        assert_eq!(body["data"]["failed_parts"], 1);
        assert_eq!(body["data"]["parts_data"][0]["file_name"], "users.json");
        assert!(body["data"]["parts_data"][0]["errors"].as_array().unwrap().is_empty());
        assert_eq!(body["data"]["parts_data"][1]["file_name"], "notes.txt");
        assert_eq!(job(&app, job_id).await["total_files"], 1);

        let body = multipart_body(&[("broken.json", "application/json", b"{")]);
        let (status, body) = upload_multipart(&app, job_id, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), ALL_PARTS_FAILED);
    }

    #[tokio::test]
    async fn idle_jobs_time_out() {
        let app = TestApp::new().await;
        let stale = start(&app, &app.uploader).await;
        let fresh = start(&app, &app.uploader).await;

        sqlx::query("UPDATE ingest_jobs SET last_ingest = ?1 WHERE id = ?2")
            .bind(Utc::now() - Duration::hours(2))
            .bind(stale)
            .execute(&app.state.db)
            .await
            .unwrap();

        let timed_out = jobs::sweep_stale_jobs(&app.state).await.unwrap();
        assert_eq!(timed_out, vec![stale]);

        let stale_job = job(&app, stale).await;
        assert_eq!(stale_job["status"], 4);
        assert_eq!(stale_job["status_message"], timeout_message(20));
        assert_eq!(job(&app, fresh).await["status"], 1);
        assert_eq!(app.state.metrics.get_snapshot().jobs_timed_out, 1);
    }

    #[tokio::test]
    async fn completed_tasks_of_unknown_job_is_not_found() {
        let app = TestApp::new().await;
        let (status, body) = app.get("/api/v2/file-upload/42/completed-tasks", &app.user).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_message(&body), jobs::JOB_NOT_FOUND);
    }
}
