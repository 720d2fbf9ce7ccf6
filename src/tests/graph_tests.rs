#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::path::PathBuf;

    use serde_json::{json, Value};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    use crate::graph::{GraphError, Traversal};
    use crate::ingest::pipeline::{ingest_file, PipelineError};
    use crate::model::ingest::FileType;
    use crate::model::params::{OrderBy, SortItem};
    use crate::tests::common::TestApp;

    fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn zip_of(entries: &[(&str, Value)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, doc) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(doc.to_string().as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn groups_document() -> Value {
        json!({
            "meta": { "type": "groups", "count": 1, "version": 6 },
            "data": [{
                "ObjectIdentifier": "S-1-5-21-100-512",
                "Properties": { "name": "DOMAIN ADMINS@CORP.LOCAL", "domainsid": "S-1-5-21-100" },
                "Members": [
                    { "ObjectIdentifier": "S-1-5-21-100-1105", "ObjectType": "User" },
                    { "ObjectIdentifier": "S-1-5-21-100-1106", "ObjectType": "" }
                ]
            }]
        })
    }

    fn computers_document() -> Value {
        json!({
            "meta": { "type": "computers", "count": 1, "version": 6 },
            "data": [{
                "ObjectIdentifier": "S-1-5-21-100-1201",
                "Properties": { "name": "WS01.CORP.LOCAL", "domainsid": "S-1-5-21-100" },
                "Sessions": { "Collected": true, "Results": [{ "UserSID": "S-1-5-21-100-1105", "ComputerSID": "S-1-5-21-100-1201" }] },
                "LocalAdmins": { "Collected": true, "Results": [{ "ObjectIdentifier": "S-1-5-21-100-512", "ObjectType": "Group" }] },
                "RemoteDesktopUsers": { "Collected": true, "Results": [] }
            }]
        })
    }

    #[tokio::test]
    async fn upsert_merges_kinds_and_properties() {
        let app = TestApp::new().await;
        let graph = &app.state.graph;

        let id = app.add_node("S-1-5-21-100-1105", &["Base", "User"], json!({ "name": "ALICE", "enabled": true })).await;
        let again = app.add_node("s-1-5-21-100-1105", &["Tag_Owned"], json!({ "enabled": false })).await;
        assert_eq!(id, again);

        let node = graph.get_entity_by_object_id("S-1-5-21-100-1105", "User").await.unwrap();
        assert_eq!(node.kinds, vec!["Base", "User", "Tag_Owned"]);
        assert_eq!(node.primary_kind(), "User");
        assert_eq!(node.name(), "ALICE");
        assert_eq!(node.properties["enabled"], false);
        assert!(node.last_seen.is_some());

        assert!(graph.get_entity_by_object_id("S-1-5-21-100-1105", "Tag_Owned").await.is_ok());
        assert!(matches!(
            graph.get_entity_by_object_id("S-1-5-21-100-1105", "Group").await,
            Err(GraphError::NotFound)
        ));
    }

    #[tokio::test]
    async fn kind_queries_count_list_and_strip() {
        let app = TestApp::new().await;
        let graph = &app.state.graph;
        app.add_node("S-1-5-21-100-512", &["Base", "Group", "Tag_Tier_Zero"], json!({ "name": "DOMAIN ADMINS" })).await;
        app.add_node("S-1-5-21-100-1105", &["Base", "User", "Tag_Tier_Zero"], json!({ "name": "ALICE" })).await;
        app.add_node("S-1-5-21-100-1106", &["Base", "User", "Tag_Tier_Zero"], json!({ "name": "BOB" })).await;
        app.add_node("S-1-5-21-100-1107", &["Base", "User"], json!({ "name": "CAROL" })).await;

        assert_eq!(graph.count_nodes_by_kind("Tag_Tier_Zero").await.unwrap(), 3);
        let by_kind = graph.count_primary_kinds_with_kind("Tag_Tier_Zero").await.unwrap();
        assert_eq!(by_kind.get("User"), Some(&2));
        assert_eq!(by_kind.get("Group"), Some(&1));

        let order = OrderBy(vec![SortItem { column: "name".to_string(), descending: true }]);
        let (nodes, total) = graph.list_nodes_by_kind("Tag_Tier_Zero", &order, 1, 1).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name(), "BOB");

        assert_eq!(graph.remove_kind("Tag_Tier_Zero").await.unwrap(), 3);
        assert_eq!(graph.count_nodes_by_kind("Tag_Tier_Zero").await.unwrap(), 0);
        let admins = graph.get_entity_by_object_id("S-1-5-21-100-512", "Group").await.unwrap();
        assert_eq!(admins.kinds, vec!["Base", "Group"]);
        assert!(!admins.is_tier_zero());
    }

    #[tokio::test]
    async fn object_id_lookups_ignore_case_and_missing_ids() {
        let app = TestApp::new().await;
        app.add_node("S-1-5-21-100-1105", &["Base", "User"], json!({})).await;
        app.add_node("S-1-5-21-100-1106", &["Base", "User"], json!({})).await;

        let ids = vec!["s-1-5-21-100-1106".to_string(), "S-1-5-21-100-9999".to_string()];
        let nodes = app.state.graph.nodes_by_object_ids(&ids).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].object_id, "S-1-5-21-100-1106");
        assert!(app.state.graph.nodes_by_object_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn edges_are_unique_and_properties_merge() {
        let app = TestApp::new().await;
        let graph = &app.state.graph;
        let alice = app.add_node("S-1-5-21-100-1105", &["Base", "User"], json!({ "name": "ALICE" })).await;
        let admins = app.add_node("S-1-5-21-100-512", &["Base", "Group"], json!({})).await;
        app.add_edge(alice, admins, "MemberOf").await;
        app.add_edge(alice, admins, "MemberOf").await;

        let node = graph.get_entity_by_object_id("S-1-5-21-100-1105", "User").await.unwrap();
        assert_eq!(graph.related_count(&node, Traversal::outbound(&["MemberOf"])).await.unwrap(), 1);
        assert_eq!(graph.related_count(&node, Traversal::inbound(&["MemberOf"])).await.unwrap(), 0);
        let to_users = Traversal::outbound(&["MemberOf"]).to_kind("User");
        assert_eq!(graph.related_count(&node, to_users).await.unwrap(), 0);

        graph.set_node_property(&node, "owned", json!(true)).await.unwrap();
        let node = graph.get_entity_by_object_id("S-1-5-21-100-1105", "User").await.unwrap();
        assert_eq!(node.properties["owned"], true);
        assert_eq!(node.properties["name"], "ALICE");
    }

    #[tokio::test]
    async fn cypher_validation_rejects_updates() {
        let app = TestApp::new().await;
        let graph = &app.state.graph;
        assert!(graph.validate_cypher("MATCH (n:User) WHERE n.name = 'SET' RETURN n").await.is_ok());
        assert!(matches!(
            graph.validate_cypher("MATCH (n) DETACH DELETE n").await,
            Err(GraphError::InvalidCypher(_))
        ));
        assert!(graph.validate_cypher("RETURN 1").await.is_err());
        assert!(graph.validate_cypher("   ").await.is_err());
    }

    #[tokio::test]
    async fn group_documents_create_membership() {
        let app = TestApp::new().await;
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "groups.json", groups_document().to_string().as_bytes());

        let summary = ingest_file(app.state.graph.as_ref(), &path, FileType::Json).await.unwrap();
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.nodes, 1);
        assert_eq!(summary.edges, 2);
        assert!(summary.errors.is_empty());

        let graph = &app.state.graph;
        let group = graph.get_entity_by_object_id("S-1-5-21-100-512", "Group").await.unwrap();
        assert_eq!(group.properties["objectid"], "S-1-5-21-100-512");
        assert_eq!(group.properties["domainsid"], "S-1-5-21-100");
        assert_eq!(graph.related_count(&group, Traversal::inbound(&["MemberOf"])).await.unwrap(), 2);

        // Members without a type only carry the base kind
        assert!(graph.get_entity_by_object_id("S-1-5-21-100-1105", "User").await.is_ok());
        let untyped = graph.get_entity_by_object_id("S-1-5-21-100-1106", "Base").await.unwrap();
        assert_eq!(untyped.kinds, vec!["Base"]);
    }

    #[tokio::test]
    async fn computer_documents_feed_completeness() {
        let app = TestApp::new().await;
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "computers.json", computers_document().to_string().as_bytes());

        let summary = ingest_file(app.state.graph.as_ref(), &path, FileType::Json).await.unwrap();
        assert_eq!(summary.edges, 2);

        let graph = &app.state.graph;
        let computer = graph.get_entity_by_object_id("S-1-5-21-100-1201", "Computer").await.unwrap();
        let sessions = Traversal::outbound(&["HasSession"]).to_kind("User");
        assert_eq!(graph.related_count(&computer, sessions).await.unwrap(), 1);
        assert_eq!(graph.related_count(&computer, Traversal::inbound(&["AdminTo"])).await.unwrap(), 1);

        let completeness = graph.completeness().await.unwrap();
        assert_eq!(completeness.session_completeness, 1.0);
        assert_eq!(completeness.local_group_completeness, 1.0);
    }

    #[tokio::test]
    async fn archives_collect_per_document_errors() {
        let app = TestApp::new().await;
        let dir = TempDir::new().unwrap();
        let archive = zip_of(&[
            ("groups.json", groups_document()),
            ("printers.json", json!({ "meta": { "type": "printers" }, "data": [] })),
            ("__MACOSX/._groups.json", json!({})),
        ]);
        let path = write_file(&dir, "upload.zip", &archive);

        let summary = ingest_file(app.state.graph.as_ref(), &path, FileType::Zip).await.unwrap();
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.errors, vec!["printers.json: unsupported data type: printers".to_string()]);

        let broken = zip_of(&[("printers.json", json!({ "meta": { "type": "printers" }, "data": [] }))]);
        let path = write_file(&dir, "broken.zip", &broken);
        let err = ingest_file(app.state.graph.as_ref(), &path, FileType::Zip).await.unwrap_err();
        assert!(matches!(err, PipelineError::Document(_)));
    }

    #[tokio::test]
    async fn single_documents_fail_as_a_whole() {
        let app = TestApp::new().await;
        let dir = TempDir::new().unwrap();

        let path = write_file(&dir, "bad.json", b"{ not json");
        let err = ingest_file(app.state.graph.as_ref(), &path, FileType::Json).await.unwrap_err();
        assert!(err.to_string().starts_with("file is not valid json"));

        let missing_meta = json!({ "data": [] });
        let path = write_file(&dir, "meta.json", missing_meta.to_string().as_bytes());
        let err = ingest_file(app.state.graph.as_ref(), &path, FileType::Json).await.unwrap_err();
        assert_eq!(err.to_string(), "meta.type is missing");

        let unnamed = json!({ "meta": { "type": "users" }, "data": [{ "Properties": {} }] });
        let path = write_file(&dir, "users.json", unnamed.to_string().as_bytes());
        let summary = ingest_file(app.state.graph.as_ref(), &path, FileType::Json).await.unwrap();
        assert_eq!(summary.nodes, 0);
        assert_eq!(summary.errors, vec!["users item 0 has no ObjectIdentifier".to_string()]);
    }
}
