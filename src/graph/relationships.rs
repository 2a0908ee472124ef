//! Relationship mapping - temporal and contextual adjacency.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Node, Relationship};
use crate::config::TemporalConflictPolicy;
use crate::error::{GraphError, GraphResult, MalformedInputError, TemporalDirection};

/// The four adjacency maps derived from a node set and its relationships.
///
/// Missing keys mean "no relationship"; lookups never fail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMaps {
    /// Node id to the node that precedes it.
    pub predecessor_by_id: HashMap<String, String>,
    /// Node id to the node that follows it.
    pub successor_by_id: HashMap<String, String>,
    /// Node id to peer label to explanation.
    pub contextual_by_id: HashMap<String, BTreeMap<String, String>>,
    /// Node id to peer labels in relationship order.
    pub linked_by_id: HashMap<String, Vec<String>>,
}

impl RelationshipMaps {
    /// Predecessor of `node_id`, if a temporal edge targets it.
    pub fn predecessor(&self, node_id: &str) -> Option<&str> {
        self.predecessor_by_id.get(node_id).map(String::as_str)
    }

    /// Successor of `node_id`, if a temporal edge leaves it.
    pub fn successor(&self, node_id: &str) -> Option<&str> {
        self.successor_by_id.get(node_id).map(String::as_str)
    }

    /// Explanation of the contextual link from `node_id` to the peer label.
    pub fn explanation(&self, node_id: &str, peer_label: &str) -> Option<&str> {
        self.contextual_by_id
            .get(node_id)
            .and_then(|peers| peers.get(peer_label))
            .map(String::as_str)
    }

    /// Peer labels linked from `node_id`; empty when there are none.
    pub fn linked(&self, node_id: &str) -> &[String] {
        self.linked_by_id
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Return `nodes` with the maps applied.
    ///
    /// Temporal entries replace the node's chain links; contextual entries
    /// replace `contextual_relation` and `linked_nodes`. Nodes without
    /// entries keep their links.
    pub fn apply(&self, nodes: Vec<Node>) -> Vec<Node> {
        nodes
            .into_iter()
            .map(|mut node| {
                if let Some(pred) = self.predecessor_by_id.get(&node.id) {
                    node.predecessor_id = Some(pred.clone());
                }
                if let Some(succ) = self.successor_by_id.get(&node.id) {
                    node.successor_id = Some(succ.clone());
                }
                if let Some(peers) = self.contextual_by_id.get(&node.id) {
                    node.contextual_relation = peers.clone();
                }
                if let Some(linked) = self.linked_by_id.get(&node.id) {
                    node.linked_nodes = linked.clone();
                }
                node
            })
            .collect()
    }
}

/// Derives [`RelationshipMaps`] from relationship records.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipMapper {
    policy: TemporalConflictPolicy,
}

impl RelationshipMapper {
    /// Create a mapper with the given temporal conflict policy.
    pub fn new(policy: TemporalConflictPolicy) -> Self {
        Self { policy }
    }

    /// Build the adjacency maps.
    ///
    /// Directed `leads_to`/`temporal` relationships feed the predecessor and
    /// successor maps; everything else, including any bidirectional
    /// relationship, feeds the contextual maps. A relationship naming a
    /// node outside `nodes` is malformed input.
    pub fn build_maps<'a>(
        &self,
        nodes: impl IntoIterator<Item = &'a Node>,
        relationships: &[Relationship],
    ) -> GraphResult<RelationshipMaps> {
        let labels: HashMap<&str, &str> = nodes
            .into_iter()
            .map(|n| (n.id.as_str(), n.label.as_str()))
            .collect();
        let mut maps = RelationshipMaps::default();

        for rel in relationships {
            let from_label = lookup_label(&labels, &rel.from_node_id, rel)?;
            let to_label = lookup_label(&labels, &rel.to_node_id, rel)?;

            if rel.is_temporal_link() {
                self.link_temporal(&mut maps, rel)?;
                continue;
            }

            let explanation = rel
                .explanation
                .clone()
                .unwrap_or_else(|| rel.relationship_type.to_string());

            add_contextual(&mut maps, &rel.from_node_id, to_label, &explanation);
            if rel.is_bidirectional {
                add_contextual(&mut maps, &rel.to_node_id, from_label, &explanation);
            }
        }

        debug!(
            relationships = relationships.len(),
            temporal = maps.successor_by_id.len(),
            contextual = maps.contextual_by_id.len(),
            "Built relationship maps"
        );
        Ok(maps)
    }

    fn link_temporal(&self, maps: &mut RelationshipMaps, rel: &Relationship) -> GraphResult<()> {
        let from = &rel.from_node_id;
        let to = &rel.to_node_id;

        self.check_slot(
            maps.successor_by_id.get(from),
            from,
            to,
            TemporalDirection::Successor,
        )?;
        self.check_slot(
            maps.predecessor_by_id.get(to),
            to,
            from,
            TemporalDirection::Predecessor,
        )?;

        maps.successor_by_id.insert(from.clone(), to.clone());
        maps.predecessor_by_id.insert(to.clone(), from.clone());
        Ok(())
    }

    fn check_slot(
        &self,
        existing: Option<&String>,
        node_id: &str,
        incoming: &str,
        direction: TemporalDirection,
    ) -> GraphResult<()> {
        let Some(existing) = existing.filter(|e| e.as_str() != incoming) else {
            return Ok(());
        };

        match self.policy {
            TemporalConflictPolicy::LastWriteWins => {
                warn!(
                    node_id = %node_id,
                    direction = %direction,
                    replaced = %existing,
                    with = %incoming,
                    "Temporal edge overwritten by a later relationship"
                );
                Ok(())
            }
            TemporalConflictPolicy::Reject => Err(GraphError::ConflictingTemporalEdge {
                node_id: node_id.to_string(),
                direction,
                existing: existing.clone(),
                incoming: incoming.to_string(),
            }),
        }
    }
}

fn lookup_label<'a>(
    labels: &HashMap<&str, &'a str>,
    node_id: &str,
    rel: &Relationship,
) -> GraphResult<&'a str> {
    labels.get(node_id).copied().ok_or_else(|| {
        MalformedInputError::UnknownNodeReference {
            node_id: node_id.to_string(),
            from_node_id: rel.from_node_id.clone(),
            to_node_id: rel.to_node_id.clone(),
        }
        .into()
    })
}

fn add_contextual(maps: &mut RelationshipMaps, node_id: &str, peer_label: &str, explanation: &str) {
    maps.contextual_by_id
        .entry(node_id.to_string())
        .or_default()
        .insert(peer_label.to_string(), explanation.to_string());

    let linked = maps.linked_by_id.entry(node_id.to_string()).or_default();
    if !linked.iter().any(|l| l == peer_label) {
        linked.push(peer_label.to_string());
    }
}
