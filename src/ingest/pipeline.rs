//! Minimal SharpHound-style ingestion: nodes from `data[]`, plus membership, session and
//! local-group edges.

use std::io::{Cursor, Read};
use std::path::Path;

use serde_json::{Map, Value};

use crate::graph::{kinds::ingest_kind, GraphError, GraphQuery, BASE_KIND};
use crate::ingest::upload::strip_bom;
use crate::model::ingest::FileType;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to read stored file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("{0}")]
    Document(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Local-group sections of a computer record and the edge each produces.
const LOCAL_GROUP_SECTIONS: &[(&str, &str)] = &[
    ("LocalAdmins", "AdminTo"),
    ("RemoteDesktopUsers", "CanRDP"),
    ("DcomUsers", "ExecuteDCOM"),
    ("PSRemoteUsers", "CanPSRemote"),
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub documents: usize,
    pub nodes: usize,
    pub edges: usize,
    /// Per-document problems that did not abort the file.
    pub errors: Vec<String>,
}

/// Reads a stored upload and writes its contents into the graph.
pub async fn ingest_file(graph: &dyn GraphQuery, path: &Path, file_type: FileType) -> Result<IngestSummary, PipelineError> {
    let bytes = tokio::fs::read(path).await?;
    let documents = match file_type {
        FileType::Json => vec![("".to_string(), bytes)],
        FileType::Zip => zip_documents(&bytes)?,
    };

    let mut summary = IngestSummary::default();
    let single = documents.len() == 1;
    for (name, bytes) in documents {
        let doc: Value = match serde_json::from_slice(strip_bom(&bytes)) {
            Ok(doc) => doc,
            Err(e) if single => return Err(PipelineError::Document(format!("file is not valid json: {}", e))),
            Err(e) => {
                summary.errors.push(format!("{}: file is not valid json: {}", name, e));
                continue;
            }
        };
        match ingest_document(graph, &doc, &mut summary).await {
            Ok(()) => summary.documents += 1,
            Err(PipelineError::Document(msg)) if !single => summary.errors.push(format!("{}: {}", name, msg)),
            Err(e) => return Err(e),
        }
    }

    if summary.documents == 0 && !summary.errors.is_empty() {
        return Err(PipelineError::Document(summary.errors.join("; ")));
    }
    Ok(summary)
}

/// JSON entries of an archive, skipping directories and macOS metadata.
fn zip_documents(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, PipelineError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut documents = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        let base = name.rsplit('/').next().unwrap_or(&name);
        if entry.is_dir() || name.contains("__MACOSX") || base.starts_with('.') {
            continue;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        documents.push((name, buf));
    }
    Ok(documents)
}

async fn ingest_document(graph: &dyn GraphQuery, doc: &Value, summary: &mut IngestSummary) -> Result<(), PipelineError> {
    let meta_type = doc
        .pointer("/meta/type")
        .and_then(Value::as_str)
        .ok_or_else(|| PipelineError::Document("meta.type is missing".to_string()))?;
    let kind = ingest_kind(meta_type)
        .ok_or_else(|| PipelineError::Document(format!("unsupported data type: {}", meta_type)))?;
    let items = doc
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::Document("data is not a list".to_string()))?;

    for (index, item) in items.iter().enumerate() {
        let Some(object_id) = item.get("ObjectIdentifier").and_then(Value::as_str) else {
            summary.errors.push(format!("{} item {} has no ObjectIdentifier", meta_type, index));
            continue;
        };
        let mut properties = item.get("Properties").and_then(Value::as_object).cloned().unwrap_or_default();
        properties.insert("objectid".to_string(), Value::String(object_id.to_string()));

        let node_id = graph.upsert_node(object_id, &[BASE_KIND.to_string(), kind.to_string()], properties).await?;
        summary.nodes += 1;

        if kind == "Group" {
            for member in related_principals(item.get("Members")) {
                let member_id = upsert_reference(graph, &member).await?;
                graph.create_edge(member_id, node_id, "MemberOf").await?;
                summary.edges += 1;
            }
        }

        if kind == "Computer" {
            for session in results(item.pointer("/Sessions/Results")) {
                let Some(user_sid) = session.get("UserSID").and_then(Value::as_str) else {
                    continue;
                };
                let user_id = upsert_reference(graph, &(user_sid.to_string(), Some("User".to_string()))).await?;
                graph.create_edge(node_id, user_id, "HasSession").await?;
                summary.edges += 1;
            }
            for (section, edge_kind) in LOCAL_GROUP_SECTIONS {
                let path = format!("/{}/Results", section);
                for principal in related_principals(item.pointer(&path)) {
                    let principal_id = upsert_reference(graph, &principal).await?;
                    graph.create_edge(principal_id, node_id, edge_kind).await?;
                    summary.edges += 1;
                }
            }
        }
    }
    Ok(())
}

fn results(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value.and_then(Value::as_array).into_iter().flatten()
}

/// `(ObjectIdentifier, ObjectType)` pairs of a principal list.
fn related_principals(value: Option<&Value>) -> Vec<(String, Option<String>)> {
    results(value)
        .filter_map(|p| {
            let object_id = p.get("ObjectIdentifier").and_then(Value::as_str)?;
            let object_type = p.get("ObjectType").and_then(Value::as_str).filter(|t| !t.is_empty());
            Some((object_id.to_string(), object_type.map(str::to_string)))
        })
        .collect()
}

/// Creates (or merges into) the node a relationship points at.
async fn upsert_reference(graph: &dyn GraphQuery, reference: &(String, Option<String>)) -> Result<i64, GraphError> {
    let (object_id, object_type) = reference;
    let mut kinds = vec![BASE_KIND.to_string()];
    if let Some(kind) = object_type {
        kinds.push(kind.clone());
    }
    let mut properties = Map::new();
    properties.insert("objectid".to_string(), Value::String(object_id.clone()));
    graph.upsert_node(object_id, &kinds, properties).await
}
