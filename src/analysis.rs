//! Post-ingest analysis: re-tags selector members in the graph and records a
//! data-quality snapshot.

use chrono::Utc;
use serde_json::Map;
use tracing::{debug, info};

use crate::db;
use crate::model::assetgrouptags::{AssetGroupTag, AssetGroupTagSelector, AssetGroupTagType, SelectorSeedType};
use crate::model::filter::QueryParameterFilterMap;
use crate::model::params::OrderBy;
use crate::state::AppState;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub tags: usize,
    pub tagged_nodes: usize,
    pub run_id: String,
}

/// Object ids seeded by the enabled selectors. Cypher seeds are only validated, not run.
pub fn object_id_seeds(selectors: &[AssetGroupTagSelector]) -> Vec<String> {
    let mut ids: Vec<String> = selectors
        .iter()
        .filter(|s| s.disabled_at.is_none())
        .flat_map(|s| s.seeds.iter())
        .filter(|seed| seed.seed_type == SelectorSeedType::ObjectId.as_i64())
        .map(|seed| seed.value.clone())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

fn analyzed(tag: &AssetGroupTag) -> bool {
    tag.tag_type != AssetGroupTagType::Tier || tag.analysis_enabled.unwrap_or(true)
}

/// Rebuilds tag membership from selector seeds, then snapshots data quality and clears the
/// pending analysis request.
pub async fn run_analysis(state: &AppState) -> anyhow::Result<AnalysisReport> {
    let started_at = Utc::now();
    let tags = db::assetgrouptags::list_tags(&state.db, &QueryParameterFilterMap::default(), &OrderBy::default()).await?;

    let mut report = AnalysisReport::default();
    for tag in tags.iter().filter(|t| analyzed(t)) {
        let kind = tag.kind_name();
        let selectors = db::assetgrouptags::list_selectors(
            &state.db,
            tag.id,
            &QueryParameterFilterMap::default(),
            &OrderBy::default(),
        )
        .await?;

        let removed = state.graph.remove_kind(&kind).await?;
        let members = state.graph.nodes_by_object_ids(&object_id_seeds(&selectors)).await?;
        for node in &members {
            state.graph.upsert_node(&node.object_id, std::slice::from_ref(&kind), Map::new()).await?;
        }
        debug!("Tag {} ({}): cleared {} nodes, tagged {}", tag.name, kind, removed, members.len());

        report.tags += 1;
        report.tagged_nodes += members.len();
    }

    let completeness = state.graph.completeness().await?;
    report.run_id = db::dataquality::record_snapshot(&state.db, completeness).await?;
    db::analysis::clear_analysis_request(&state.db, started_at).await?;
    state.metrics.inc_analysis_runs();

    info!("Analysis finished: {} tags, {} tagged nodes, run {}", report.tags, report.tagged_nodes, report.run_id);
    Ok(report)
}

/// Queues an analysis run unless scheduled analysis is on, in which case the next
/// scheduled run picks the change up.
pub async fn request_analysis_if_unscheduled(state: &AppState, requested_by: &str) -> sqlx::Result<()> {
    let scheduled = db::analysis::scheduled_analysis_enabled(&state.db, state.config.analysis.scheduled_enabled).await?;
    if !scheduled {
        db::analysis::request_analysis(&state.db, requested_by).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::assetgrouptags::{SelectorAutoCertifyMethod, SelectorSeed};

    fn selector(disabled: bool, seeds: &[(SelectorSeedType, &str)]) -> AssetGroupTagSelector {
        AssetGroupTagSelector {
            id: 1,
            asset_group_tag_id: 1,
            created_at: Utc::now(),
            created_by: "SYSTEM".into(),
            updated_at: Utc::now(),
            updated_by: "SYSTEM".into(),
            disabled_at: disabled.then(Utc::now),
            disabled_by: None,
            name: "sel".into(),
            description: String::new(),
            auto_certify: SelectorAutoCertifyMethod::Disabled,
            is_default: false,
            allow_disable: true,
            seeds: seeds.iter().map(|(t, v)| SelectorSeed { seed_type: t.as_i64(), value: v.to_string() }).collect(),
        }
    }

    #[test]
    fn only_enabled_object_id_seeds_count() {
        let selectors = vec![
            selector(false, &[(SelectorSeedType::ObjectId, "S-1-5-21-2"), (SelectorSeedType::ObjectId, "S-1-5-21-1")]),
            selector(false, &[(SelectorSeedType::Cypher, "MATCH (n) RETURN n")]),
            selector(true, &[(SelectorSeedType::ObjectId, "S-1-5-21-3")]),
            selector(false, &[(SelectorSeedType::ObjectId, "S-1-5-21-1")]),
        ];
        assert_eq!(object_id_seeds(&selectors), vec!["S-1-5-21-1".to_string(), "S-1-5-21-2".to_string()]);
    }
}
