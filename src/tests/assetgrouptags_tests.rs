#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::{json, Value};

    use crate::analysis;
    use crate::routes::assetgrouptags::{
        AUTO_CERTIFY_ZONES_ONLY, DEFAULT_SELECTOR_DELETE, DEFAULT_SELECTOR_FIELDS, NO_VALID_FIELDS,
        RENAME_DEFAULT_TAG, SEEDS_MIXED, SEEDS_REQUIRED, SELECTOR_CANNOT_DISABLE, SELECTOR_NAME_CONFLICT,
        TIER_ZERO_IMMUTABLE,
    };
    use crate::tests::common::{error_message, TestApp};

    const TIER_ZERO: &str = "/api/v2/asset-group-tags/1";
    const OWNED: &str = "/api/v2/asset-group-tags/2";

    fn object_id_selector(name: &str, object_ids: &[&str]) -> Value {
        let seeds: Vec<Value> = object_ids.iter().map(|id| json!({ "type": 1, "value": id })).collect();
        json!({ "name": name, "description": "test selector", "seeds": seeds })
    }

    async fn create_selector(app: &TestApp, tag: &str, body: Value) -> (StatusCode, Value) {
        app.call(Method::POST, &format!("{}/selectors", tag), Some(&app.power_user), Some(body)).await
    }

    #[tokio::test]
    async fn lists_seeded_tags_with_counts() {
        let app = TestApp::new().await;

        let (status, body) = app.get("/api/v2/asset-group-tags?include_counts=true", &app.user).await;
        assert_eq!(status, StatusCode::OK);
        let tags = body["data"]["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 2);
        let tier_zero = tags.iter().find(|t| t["name"] == "Tier Zero").unwrap();
        assert_eq!(tier_zero["type"], 1);
        assert_eq!(tier_zero["position"], 1);
        assert_eq!(tier_zero["counts"]["selectors"], 1);
        assert_eq!(tier_zero["counts"]["members"], 0);

        let (_, body) = app.get("/api/v2/asset-group-tags", &app.user).await;
        assert!(body["data"]["tags"][0].get("counts").is_none());
    }

    #[tokio::test]
    async fn tag_listing_filters_and_sorts() {
        let app = TestApp::new().await;

        let (status, body) = app.get("/api/v2/asset-group-tags?type=eq:3", &app.user).await;
        assert_eq!(status, StatusCode::OK);
        let tags = body["data"]["tags"].as_array().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0]["name"], "Owned");

        let (_, body) = app.get("/api/v2/asset-group-tags?sort_by=-name", &app.user).await;
        assert_eq!(body["data"]["tags"][0]["name"], "Tier Zero");

        let (status, _) = app.get("/api/v2/asset-group-tags?sort_by=kind", &app.user).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app.get("/api/v2/asset-group-tags?name=gt:abc", &app.user).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_or_malformed_tag_ids_are_not_found() {
        let app = TestApp::new().await;

        let (status, body) = app.get(TIER_ZERO, &app.user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tag"]["name"], "Tier Zero");

        let (status, _) = app.get("/api/v2/asset-group-tags/999", &app.user).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.get("/api/v2/asset-group-tags/tier-zero", &app.user).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tag_updates_enforce_type_rules() {
        let app = TestApp::new().await;

        let (status, _) = app.call(Method::PATCH, TIER_ZERO, Some(&app.user), Some(json!({ "description": "x" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app.call(Method::PATCH, TIER_ZERO, Some(&app.power_user), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), NO_VALID_FIELDS);

        let (status, body) =
            app.call(Method::PATCH, TIER_ZERO, Some(&app.power_user), Some(json!({ "name": "Crown Jewels" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), RENAME_DEFAULT_TAG);

        let (status, body) =
            app.call(Method::PATCH, OWNED, Some(&app.power_user), Some(json!({ "position": 2 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), "only zones support modifying position");

        let (status, body) = app
            .call(Method::PATCH, TIER_ZERO, Some(&app.power_user), Some(json!({ "analysis_enabled": false })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_message(&body), TIER_ZERO_IMMUTABLE);
    }

    #[tokio::test]
    async fn tag_update_records_history_and_requests_analysis() {
        let app = TestApp::new().await;

        let (status, body) = app
            .call(
                Method::PATCH,
                TIER_ZERO,
                Some(&app.power_user),
                Some(json!({ "description": "most critical assets", "require_certify": true })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["tag"]["description"], "most critical assets");
        assert_eq!(body["data"]["tag"]["require_certify"], true);
        assert_eq!(body["data"]["tag"]["updated_by"], app.power_user.id.as_str());

        let (status, body) = app.get("/api/v2/analysis/status", &app.admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["requested_by"], app.power_user.id.as_str());

        let (_, body) = app.get("/api/v2/asset-group-tags-history?action=eq:UpdateTag", &app.user).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["data"]["records"][0]["email"], "power@bhapi.test");
        assert_eq!(body["data"]["records"][0]["target"], "Tier Zero");
    }

    #[tokio::test]
    async fn unchanged_tag_update_is_a_no_op() {
        let app = TestApp::new().await;
        let (status, _) =
            app.call(Method::PATCH, OWNED, Some(&app.power_user), Some(json!({ "name": "Owned" }))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = app.get("/api/v2/asset-group-tags-history", &app.user).await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn selector_seeds_are_validated() {
        let app = TestApp::new().await;

        let (status, body) = create_selector(&app, OWNED, json!({ "name": "empty", "seeds": [] })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), SEEDS_REQUIRED);

        let mixed = json!({
            "name": "mixed",
            "seeds": [{ "type": 1, "value": "S-1-5-21-1-500" }, { "type": 2, "value": "MATCH (n) RETURN n" }],
        });
        let (status, body) = create_selector(&app, OWNED, mixed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), SEEDS_MIXED);

        let writes = json!({ "name": "writes", "seeds": [{ "type": 2, "value": "MATCH (n) DETACH DELETE n" }] });
        let (status, _) = create_selector(&app, OWNED, writes).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut certified = object_id_selector("certified", &["S-1-5-21-1-500"]);
        certified["auto_certify"] = json!(1);
        let (status, body) = create_selector(&app, OWNED, certified.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body), AUTO_CERTIFY_ZONES_ONLY);

        let (status, body) = create_selector(&app, TIER_ZERO, certified).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["auto_certify"], 1);
    }

    #[tokio::test]
    async fn selector_lifecycle() {
        let app = TestApp::new().await;

        let (status, body) = create_selector(&app, OWNED, object_id_selector("Pwned", &["S-1-5-21-1-1105"])).await;
        assert_eq!(status, StatusCode::CREATED);
        let selector_id = body["data"]["id"].as_i64().unwrap();
        assert_eq!(body["data"]["is_default"], false);
        assert_eq!(body["data"]["allow_disable"], true);

        let (status, body) = create_selector(&app, OWNED, object_id_selector("Pwned", &["S-1-5-21-1-1106"])).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(error_message(&body), SELECTOR_NAME_CONFLICT);

        let uri = format!("{}/selectors/{}", OWNED, selector_id);
        let (status, body) = app.get(&uri, &app.user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["selector"]["created_by"], "power@bhapi.test");
        assert_eq!(body["data"]["selector"]["seeds"][0]["value"], "S-1-5-21-1-1105");

        // Selectors are scoped to their tag
        let (status, _) = app.get(&format!("{}/selectors/{}", TIER_ZERO, selector_id), &app.user).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .call(Method::PATCH, &uri, Some(&app.power_user), Some(json!({ "name": "Compromised", "disabled": true })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Compromised");
        assert!(body["data"]["disabled_at"].is_string());

        let (status, _) = app.call(Method::DELETE, &uri, Some(&app.power_user), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.get(&uri, &app.user).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = app.get("/api/v2/asset-group-tags-history?asset_group_tag_id=eq:2&sort_by=id", &app.user).await;
        let actions: Vec<&str> =
            body["data"]["records"].as_array().unwrap().iter().map(|r| r["action"].as_str().unwrap()).collect();
        assert_eq!(actions, vec!["CreateSelector", "UpdateSelector", "DeleteSelector"]);
    }

    #[tokio::test]
    async fn default_selectors_are_protected() {
        let app = TestApp::new().await;

        let (_, body) = app.get(&format!("{}/selectors", TIER_ZERO), &app.user).await;
        let default_id = body["data"]["selectors"][0]["id"].as_i64().unwrap();
        assert_eq!(body["data"]["selectors"][0]["is_default"], true);
        let uri = format!("{}/selectors/{}", TIER_ZERO, default_id);

        let (status, body) =
            app.call(Method::PATCH, &uri, Some(&app.power_user), Some(json!({ "disabled": true }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_message(&body), SELECTOR_CANNOT_DISABLE);

        let (status, body) =
            app.call(Method::PATCH, &uri, Some(&app.power_user), Some(json!({ "name": "renamed" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_message(&body), DEFAULT_SELECTOR_FIELDS);

        let (status, _) =
            app.call(Method::PATCH, &uri, Some(&app.power_user), Some(json!({ "auto_certify": 2 }))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.call(Method::DELETE, &uri, Some(&app.power_user), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(error_message(&body), DEFAULT_SELECTOR_DELETE);
    }

    #[tokio::test]
    async fn analysis_rebuilds_members_from_selectors() {
        let app = TestApp::new().await;
        app.add_node("S-1-5-21-1-512", &["Base", "Group"], json!({ "name": "DOMAIN ADMINS@CORP.LOCAL" })).await;
        app.add_node("S-1-5-21-1-500", &["Base", "User"], json!({ "name": "ADMINISTRATOR@CORP.LOCAL" })).await;
        app.add_node("S-1-5-21-1-1105", &["Base", "User"], json!({ "name": "BOB@CORP.LOCAL" })).await;

        let (status, _) = create_selector(
            &app,
            TIER_ZERO,
            object_id_selector("Admins", &["S-1-5-21-1-512", "S-1-5-21-1-500", "S-1-5-21-1-9999"]),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) =
            app.get(&format!("{}/selectors?include_counts=true&is_default=eq:false", TIER_ZERO), &app.user).await;
        assert_eq!(body["data"]["selectors"][0]["counts"]["members"], 2);

        let report = analysis::run_analysis(&app.state).await.unwrap();
        assert_eq!(report.tagged_nodes, 2);

        let (status, body) = app.get(&format!("{}/members?sort_by=name", TIER_ZERO), &app.user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["limit"], 50);
        let members = body["data"]["members"].as_array().unwrap();
        assert_eq!(members[0]["name"], "ADMINISTRATOR@CORP.LOCAL");
        assert_eq!(members[0]["primary_kind"], "User");

        let (_, body) = app.get(&format!("{}/members/counts", TIER_ZERO), &app.user).await;
        assert_eq!(body["data"]["total_count"], 2);
        assert_eq!(body["data"]["counts"]["Group"], 1);
        assert_eq!(body["data"]["counts"]["User"], 1);

        let (_, body) = app.get("/api/v2/users/S-1-5-21-1-500", &app.user).await;
        assert_eq!(body["data"]["kinds"].as_array().unwrap().len(), 3);

        // The analysis request raised by the selector change was consumed
        let (status, _) = app.get("/api/v2/analysis/status", &app.admin).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
