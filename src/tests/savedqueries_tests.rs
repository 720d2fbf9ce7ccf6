#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, StatusCode},
    };
    use serde_json::{json, Value};

    use crate::error::ID_MALFORMED;
    use crate::model::user::User;
    use crate::routes::savedqueries::{
        queries_from_zip, DELETE_FORBIDDEN, DUPLICATE_NAME, EMPTY_NAME_OR_QUERY, EMPTY_SCOPE, INVALID_SCOPE,
        NOT_A_ZIP, PUBLIC_WITH_USERS, QUERY_DOES_NOT_EXIST, SHARE_FORBIDDEN, SHARE_TO_OWNER, UNSHARE_FORBIDDEN,
    };
    use crate::tests::common::{body_bytes, error_message, json_body, request, TestApp};

    const KERBEROASTABLE: &str = "MATCH (u:User) WHERE u.hasspn = true RETURN u";

    async fn create(app: &TestApp, user: &User, name: &str, query: &str) -> (StatusCode, Value) {
        let body = json!({ "name": name, "query": query, "description": "test query" });
        app.call(Method::POST, "/api/v2/saved-queries", Some(user), Some(body)).await
    }

    async fn create_id(app: &TestApp, user: &User, name: &str) -> i64 {
        let (status, body) = create(app, user, name, KERBEROASTABLE).await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_i64().unwrap()
    }

    async fn share(app: &TestApp, user: &User, id: i64, body: Value) -> (StatusCode, Value) {
        app.call(Method::PUT, &format!("/api/v2/saved-queries/{}/permissions", id), Some(user), Some(body)).await
    }

    async fn unshare(app: &TestApp, user: &User, id: i64, user_ids: &[&str]) -> (StatusCode, Value) {
        let body = json!({ "user_ids": user_ids });
        app.call(Method::DELETE, &format!("/api/v2/saved-queries/{}/permissions", id), Some(user), Some(body)).await
    }

    async fn import(app: &TestApp, user: &User, content_type: &str, body: Vec<u8>) -> (StatusCode, Value) {
        let req = request(Method::POST, "/api/v2/saved-queries/import", Some(user))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        let resp = app.send(req).await;
        let status = resp.status();
        (status, json_body(resp).await)
    }

    #[tokio::test]
    async fn create_validates_and_rejects_duplicates() {
        let app = TestApp::new().await;

        let (status, body) = create(&app, &app.user, "Kerberoastable", KERBEROASTABLE).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["user_id"], app.user.id.as_str());
        assert_eq!(body["data"]["query"], KERBEROASTABLE);

        let (status, body) = create(&app, &app.user, "Kerberoastable", "MATCH (n) RETURN n").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), DUPLICATE_NAME);

        // Names are unique per owner only
        let (status, _) = create(&app, &app.power_user, "Kerberoastable", KERBEROASTABLE).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = create(&app, &app.user, "", KERBEROASTABLE).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), EMPTY_NAME_OR_QUERY);
    }

    #[tokio::test]
    async fn queries_are_private_by_default() {
        let app = TestApp::new().await;
        let id = create_id(&app, &app.user, "Kerberoastable").await;

        let (status, body) = app.get("/api/v2/saved-queries", &app.user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["limit"], 10000);

        let (_, body) = app.get("/api/v2/saved-queries", &app.power_user).await;
        assert_eq!(body["count"], 0);

        let (status, body) = app.get(&format!("/api/v2/saved-queries/{}", id), &app.power_user).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_message(&body), QUERY_DOES_NOT_EXIST);

        let (status, body) = app.get("/api/v2/saved-queries/first", &app.user).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), ID_MALFORMED);
    }

    #[tokio::test]
    async fn list_filters_and_scopes() {
        let app = TestApp::new().await;
        create_id(&app, &app.user, "Kerberoastable").await;
        create_id(&app, &app.user, "AS-REP Roastable").await;
        let shared = create_id(&app, &app.power_user, "Shared With User").await;
        share(&app, &app.power_user, shared, json!({ "user_ids": [app.user.id] })).await;

        let (_, body) = app.get("/api/v2/saved-queries?name=~eq:Kerb&sort_by=name", &app.user).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["name"], "Kerberoastable");

        let (status, body) = app.get("/api/v2/saved-queries?scope=shared", &app.user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["scope"], "shared");
        assert_eq!(body["data"][0]["name"], "Shared With User");

        let (_, body) = app.get("/api/v2/saved-queries?scope=owned,shared", &app.user).await;
        assert_eq!(body["count"], 3);

        let (status, body) = app.get("/api/v2/saved-queries?scope=everything", &app.user).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), INVALID_SCOPE);
        let (status, _) = app.get("/api/v2/saved-queries?scope=all", &app.user).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn updates_are_limited_to_owner() {
        let app = TestApp::new().await;
        let id = create_id(&app, &app.user, "Kerberoastable").await;
        let uri = format!("/api/v2/saved-queries/{}", id);

        let (status, body) =
            app.call(Method::PUT, &uri, Some(&app.user), Some(json!({ "description": "roastable users" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["description"], "roastable users");
        assert_eq!(body["data"]["query"], KERBEROASTABLE);

        let (status, _) = app.call(Method::PUT, &uri, Some(&app.admin), Some(json!({ "name": "mine" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // Administrators may edit public queries
        share(&app, &app.user, id, json!({ "public": true })).await;
        let (status, body) = app.call(Method::PUT, &uri, Some(&app.admin), Some(json!({ "name": "Roastable" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Roastable");
        assert_eq!(body["data"]["user_id"], app.user.id.as_str());
    }

    #[tokio::test]
    async fn delete_requires_owner_or_admin_on_public() {
        let app = TestApp::new().await;
        let private = create_id(&app, &app.user, "Private").await;
        let public = create_id(&app, &app.user, "Public").await;
        share(&app, &app.user, public, json!({ "public": true })).await;

        let (status, body) =
            app.call(Method::DELETE, &format!("/api/v2/saved-queries/{}", private), Some(&app.admin), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_message(&body), DELETE_FORBIDDEN);

        let (status, _) =
            app.call(Method::DELETE, &format!("/api/v2/saved-queries/{}", public), Some(&app.power_user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) =
            app.call(Method::DELETE, &format!("/api/v2/saved-queries/{}", public), Some(&app.admin), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) =
            app.call(Method::DELETE, &format!("/api/v2/saved-queries/{}", private), Some(&app.user), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) =
            app.call(Method::DELETE, &format!("/api/v2/saved-queries/{}", private), Some(&app.user), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sharing_rules() {
        let app = TestApp::new().await;
        let id = create_id(&app, &app.user, "Kerberoastable").await;

        let (status, body) = share(&app, &app.user, id, json!({ "user_ids": [app.power_user.id] })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["query_id"], id);
        assert_eq!(body["data"]["public"], false);
        assert_eq!(body["data"]["shared_to_user_ids"], json!([app.power_user.id]));

        let (status, _) = app.get(&format!("/api/v2/saved-queries/{}", id), &app.power_user).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app.get(&format!("/api/v2/saved-queries/{}/permissions", id), &app.power_user).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) =
            share(&app, &app.user, id, json!({ "user_ids": [app.admin.id], "public": true })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), PUBLIC_WITH_USERS);

        let (status, body) = share(&app, &app.user, id, json!({ "user_ids": [app.user.id] })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), SHARE_TO_OWNER);

        let (status, body) = share(&app, &app.power_user, id, json!({ "user_ids": [app.admin.id] })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_message(&body), SHARE_FORBIDDEN);

        let (status, _) = share(&app, &app.power_user, id, json!({ "public": true })).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn recipients_may_only_remove_themselves() {
        let app = TestApp::new().await;
        let id = create_id(&app, &app.user, "Kerberoastable").await;
        share(&app, &app.user, id, json!({ "user_ids": [app.power_user.id, app.admin.id] })).await;

        let (status, body) = unshare(&app, &app.power_user, id, &[&app.admin.id]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_message(&body), UNSHARE_FORBIDDEN);

        let (status, _) = unshare(&app, &app.power_user, id, &[&app.power_user.id]).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.get(&format!("/api/v2/saved-queries/{}", id), &app.power_user).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = unshare(&app, &app.power_user, id, &[&app.power_user.id]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), format!("query is not shared to user: {}", app.power_user.id));

        let (status, _) = unshare(&app, &app.user, id, &[&app.admin.id]).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = app.get(&format!("/api/v2/saved-queries/{}/permissions", id), &app.user).await;
        assert_eq!(body["data"]["shared_to_user_ids"], json!([]));
    }

    #[tokio::test]
    async fn public_queries_are_visible_to_everyone() {
        let app = TestApp::new().await;
        let id = create_id(&app, &app.user, "Kerberoastable").await;

        let (status, body) = share(&app, &app.user, id, json!({ "public": true })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["public"], true);

        let (status, _) = app.get(&format!("/api/v2/saved-queries/{}", id), &app.power_user).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = app.get("/api/v2/saved-queries?scope=public", &app.power_user).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"][0]["scope"], "public");
    }

    #[tokio::test]
    async fn single_export_is_a_json_attachment() {
        let app = TestApp::new().await;
        let id = create_id(&app, &app.user, "Kerberoastable").await;

        let resp = app.send(
            request(Method::GET, &format!("/api/v2/saved-queries/{}/export", id), Some(&app.user))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(resp.headers()[header::CONTENT_DISPOSITION], "attachment; filename=\"Kerberoastable.json\"");
        let body = json_body(resp).await;
        assert_eq!(body, json!({ "query": KERBEROASTABLE, "name": "Kerberoastable", "description": "test query" }));

        let (status, _) = app.get(&format!("/api/v2/saved-queries/{}/export", id), &app.power_user).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = app.get("/api/v2/audit?action=eq:ExportSavedQuery", &app.admin).await;
        let statuses: Vec<&str> =
            body["data"]["logs"].as_array().unwrap().iter().map(|l| l["status"].as_str().unwrap()).collect();
        assert_eq!(statuses.iter().filter(|s| **s == "intent").count(), 2);
        assert_eq!(statuses.iter().filter(|s| **s == "success").count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == "failure").count(), 1);
    }

    #[tokio::test]
    async fn export_and_reimport_archive() {
        let app = TestApp::new().await;
        create_id(&app, &app.user, "Kerberoastable").await;
        create_id(&app, &app.user, "Domain Admins").await;

        let (status, body) = app.get("/api/v2/saved-queries/export", &app.user).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), EMPTY_SCOPE);

        let resp = app.send(
            request(Method::GET, "/api/v2/saved-queries/export?scope=owned", Some(&app.user))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(resp.headers()[header::CONTENT_DISPOSITION], "attachment; filename=\"exported_queries.zip\"");
        let archive = body_bytes(resp).await.to_vec();

        let mut names: Vec<String> = queries_from_zip(&archive).unwrap().into_iter().map(|q| q.name).collect();
        names.sort();
        assert_eq!(names, vec!["Domain Admins", "Kerberoastable"]);

        let (status, body) = import(&app, &app.power_user, "application/zip", archive.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"], "imported 2 queries");
        let (_, body) = app.get("/api/v2/saved-queries", &app.power_user).await;
        assert_eq!(body["count"], 2);

        // Re-importing the same names for the same owner fails as a whole
        let (status, body) = import(&app, &app.power_user, "application/zip", archive).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), DUPLICATE_NAME);
        assert_eq!(app.state.metrics.get_snapshot().saved_queries_imported, 2);
    }

    #[tokio::test]
    async fn export_all_keeps_same_named_queries_from_other_owners() {
        let app = TestApp::new().await;
        let public_id = create_id(&app, &app.power_user, "Same").await;
        let (status, _) = share(&app, &app.power_user, public_id, json!({ "public": true })).await;
        assert_eq!(status, StatusCode::OK);
        create_id(&app, &app.user, "Same").await;

        let resp = app.send(
            request(Method::GET, "/api/v2/saved-queries/export?scope=all", Some(&app.user))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let archive = body_bytes(resp).await.to_vec();

        let reader = zip::ZipArchive::new(std::io::Cursor::new(archive.clone())).unwrap();
        let mut entries: Vec<&str> = reader.file_names().collect();
        entries.sort();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&"Same.json"));
        assert!(entries.iter().any(|e| e.starts_with("Same (") && e.ends_with(").json")));

        let names: Vec<String> = queries_from_zip(&archive).unwrap().into_iter().map(|q| q.name).collect();
        assert_eq!(names, vec!["Same", "Same"]);
    }

    #[tokio::test]
    async fn import_checks_content_type_and_payload() {
        let app = TestApp::new().await;

        let single = json!({ "name": "All Users", "query": "MATCH (u:User) RETURN u" }).to_string().into_bytes();
        let (status, body) = import(&app, &app.user, "application/json", single).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"], "imported 1 queries");

        let (status, body) = import(&app, &app.user, "text/plain", b"MATCH (n) RETURN n".to_vec()).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(error_message(&body).starts_with("invalid content-type: text/plain"));

        let (status, body) = import(&app, &app.user, "application/zip", b"not a zip".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), NOT_A_ZIP);

        let (status, body) = import(&app, &app.user, "application/json", b"[1, 2]".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_message(&body).starts_with("failed to unmarshal json file"));
    }
}
