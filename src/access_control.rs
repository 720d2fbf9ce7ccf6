//! Environment targeted access control (ETAC): per-user allow lists of AD domain SIDs
//! and Azure tenant ids applied to entity lookups and graph responses.

use crate::error::{AppError, AppResult};
use crate::graph::{primary_kind_of, UnifiedEdge, UnifiedGraph, UnifiedNode};
use crate::model::user::User;

pub const ENVIRONMENT_KEYS: &[&str] = &["domainsid", "tenantid"];
pub const HIDDEN: &str = "HIDDEN";
pub const HIDDEN_EDGE_LABEL: &str = "** Hidden Edge **";
pub const NO_ENVIRONMENT_ACCESS: &str = "user does not have access to this environment";

pub fn should_filter(etac_enabled: bool, user: &User) -> bool {
    etac_enabled && !user.all_environments
}

/// True when ETAC is off, the user sees every environment, or every id in
/// `environments` is on the user's list.
pub fn check_access(etac_enabled: bool, user: &User, environments: &[&str]) -> bool {
    if !should_filter(etac_enabled, user) {
        return true;
    }
    environments.iter().all(|env| user.environments.iter().any(|allowed| allowed == env))
}

pub fn require_access(etac_enabled: bool, user: &User, environments: &[&str]) -> AppResult<()> {
    if check_access(etac_enabled, user, environments) {
        Ok(())
    } else {
        Err(AppError::Forbidden(NO_ENVIRONMENT_ACCESS.to_string()))
    }
}

/// Nodes outside any environment stay visible.
fn node_visible(node: &UnifiedNode, allowed: &[String]) -> bool {
    let Some(properties) = &node.properties else {
        return true;
    };
    let environments: Vec<&str> =
        ENVIRONMENT_KEYS.iter().filter_map(|key| properties.get(*key).and_then(|v| v.as_str())).collect();
    environments.is_empty() || environments.iter().any(|env| allowed.iter().any(|a| a == env))
}

fn hidden_node(node: &UnifiedNode) -> UnifiedNode {
    let kind = primary_kind_of(&node.kinds);
    UnifiedNode {
        label: format!("** Hidden {} Object **", kind),
        kind: HIDDEN.to_string(),
        kinds: Vec::new(),
        object_id: HIDDEN.to_string(),
        is_tier_zero: false,
        last_seen: None,
        properties: None,
        hidden: true,
    }
}

/// Replaces nodes outside `allowed` with placeholders, and the edges touching them with
/// hidden edges that keep their endpoints.
pub fn filter_graph(graph: UnifiedGraph, allowed: &[String]) -> UnifiedGraph {
    let nodes: std::collections::BTreeMap<String, UnifiedNode> = graph
        .nodes
        .into_iter()
        .map(|(id, node)| {
            if node_visible(&node, allowed) {
                (id, node)
            } else {
                let hidden = hidden_node(&node);
                (id, hidden)
            }
        })
        .collect();

    let is_hidden = |id: &str| nodes.get(id).is_some_and(|n| n.hidden);
    let edges = graph
        .edges
        .into_iter()
        .map(|edge| {
            if is_hidden(&edge.source) || is_hidden(&edge.target) {
                UnifiedEdge {
                    source: edge.source,
                    target: edge.target,
                    label: HIDDEN_EDGE_LABEL.to_string(),
                    kind: HIDDEN.to_string(),
                    last_seen: None,
                    properties: None,
                }
            } else {
                edge
            }
        })
        .collect();

    UnifiedGraph { nodes, edges }
}

/// List counterpart of [`filter_graph_for`]: foreign nodes become placeholders in place.
pub fn filter_nodes_for(etac_enabled: bool, user: &User, nodes: Vec<UnifiedNode>) -> Vec<UnifiedNode> {
    if !should_filter(etac_enabled, user) {
        return nodes;
    }
    nodes
        .into_iter()
        .map(|node| if node_visible(&node, &user.environments) { node } else { hidden_node(&node) })
        .collect()
}

/// Applies [`filter_graph`] when ETAC restricts `user`.
pub fn filter_graph_for(etac_enabled: bool, user: &User, graph: UnifiedGraph) -> UnifiedGraph {
    if should_filter(etac_enabled, user) {
        filter_graph(graph, &user.environments)
    } else {
        graph
    }
}
