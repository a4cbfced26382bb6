use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::pipeline::types::ChunkExtraction;

/// How repeated entity descriptions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Union of distinct descriptions, newline-joined in sorted order.
    JoinDescriptions,
    /// Keep whichever single description is longest.
    KeepLongest,
}

#[derive(Debug, Clone)]
pub struct EntityNode {
    pub name: String,
    pub entity_type: String,
    descriptions: BTreeSet<String>,
    pub source_chunk_ids: BTreeSet<u64>,
}

impl EntityNode {
    fn placeholder(name: &str, chunk_id: u64) -> Self {
        Self {
            name: name.to_string(),
            entity_type: String::new(),
            descriptions: BTreeSet::new(),
            source_chunk_ids: BTreeSet::from([chunk_id]),
        }
    }

    pub fn description(&self, strategy: MergeStrategy) -> String {
        match strategy {
            MergeStrategy::JoinDescriptions => {
                self.descriptions.iter().cloned().collect::<Vec<_>>().join("\n")
            }
            MergeStrategy::KeepLongest => self
                .descriptions
                .iter()
                .max_by_key(|d| d.len())
                .cloned()
                .unwrap_or_default(),
        }
    }

    pub fn descriptions(&self) -> &BTreeSet<String> {
        &self.descriptions
    }
}

#[derive(Debug, Clone)]
pub struct RelationEdge {
    descriptions: BTreeSet<String>,
    pub weight: f64,
    pub source_chunk_ids: BTreeSet<u64>,
}

impl RelationEdge {
    pub fn description(&self) -> String {
        self.descriptions.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Undirected entity graph folded from per-chunk extractions. All merge
/// operations are set unions or sums, so fold order never changes the
/// result.
pub struct EntityGraph {
    graph: UnGraph<EntityNode, RelationEdge>,
    by_name: HashMap<String, NodeIndex>,
}

impl Default for EntityGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityGraph {
    pub fn new() -> Self {
        Self {
            graph: UnGraph::new_undirected(),
            by_name: HashMap::new(),
        }
    }

    fn node_for(&mut self, name: &str, chunk_id: u64) -> NodeIndex {
        if let Some(&idx) = self.by_name.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(EntityNode::placeholder(name, chunk_id));
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    /// Fold one chunk's extraction into the graph.
    pub fn absorb(&mut self, extraction: &ChunkExtraction) {
        for entity in &extraction.entities {
            let idx = self.node_for(&entity.name, extraction.chunk_id);
            let node = &mut self.graph[idx];
            if !entity.description.is_empty() {
                node.descriptions.insert(entity.description.clone());
            }
            // Non-empty types win over empty; ties between non-empty
            // values resolve lexicographically to stay order-independent.
            if !entity.entity_type.is_empty()
                && entity.entity_type.as_str() > node.entity_type.as_str()
            {
                node.entity_type = entity.entity_type.clone();
            }
            node.source_chunk_ids.insert(extraction.chunk_id);
        }

        for relationship in &extraction.relationships {
            let a = self.node_for(&relationship.source, extraction.chunk_id);
            let b = self.node_for(&relationship.target, extraction.chunk_id);
            // A relationship mention is provenance for both endpoints,
            // whether or not the entity itself was mentioned in this chunk.
            self.graph[a].source_chunk_ids.insert(extraction.chunk_id);
            self.graph[b].source_chunk_ids.insert(extraction.chunk_id);
            let edge = match self.graph.find_edge(a, b) {
                Some(e) => &mut self.graph[e],
                None => {
                    let e = self.graph.add_edge(
                        a,
                        b,
                        RelationEdge {
                            descriptions: BTreeSet::new(),
                            weight: 0.0,
                            source_chunk_ids: BTreeSet::new(),
                        },
                    );
                    &mut self.graph[e]
                }
            };
            if !relationship.description.is_empty() {
                edge.descriptions.insert(relationship.description.clone());
            }
            edge.weight += relationship.strength;
            edge.source_chunk_ids.insert(extraction.chunk_id);
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn node(&self, name: &str) -> Option<&EntityNode> {
        self.by_name.get(name).map(|&idx| &self.graph[idx])
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut EntityNode> {
        self.graph.node_weights_mut()
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&RelationEdge> {
        let a = *self.by_name.get(source)?;
        let b = *self.by_name.get(target)?;
        self.graph.find_edge(a, b).map(|e| &self.graph[e])
    }

    /// All edges as (source node, target node, edge).
    pub fn edges(&self) -> impl Iterator<Item = (&EntityNode, &EntityNode, &RelationEdge)> {
        self.graph.edge_references().map(|e| {
            (
                &self.graph[e.source()],
                &self.graph[e.target()],
                e.weight(),
            )
        })
    }

    /// Replace a node's merged description with a condensed one.
    pub fn set_description(&mut self, name: &str, description: String) {
        if let Some(&idx) = self.by_name.get(name) {
            let node = &mut self.graph[idx];
            node.descriptions = BTreeSet::from([description]);
        }
    }

    /// Connected components, each a set of member nodes sorted by name.
    /// These are the communities reported on downstream.
    pub fn communities(&self) -> Vec<Vec<&EntityNode>> {
        let mut seen = vec![false; self.graph.node_count()];
        let mut communities = Vec::new();

        let mut indices: Vec<_> = self.by_name.values().copied().collect();
        indices.sort();
        for start in indices {
            if seen[start.index()] {
                continue;
            }
            let mut members = Vec::new();
            let mut stack = vec![start];
            seen[start.index()] = true;
            while let Some(idx) = stack.pop() {
                members.push(idx);
                for neighbor in self.graph.neighbors(idx) {
                    if !seen[neighbor.index()] {
                        seen[neighbor.index()] = true;
                        stack.push(neighbor);
                    }
                }
            }
            let mut members: Vec<&EntityNode> =
                members.into_iter().map(|idx| &self.graph[idx]).collect();
            members.sort_by(|a, b| a.name.cmp(&b.name));
            communities.push(members);
        }

        communities.sort_by(|a, b| a[0].name.cmp(&b[0].name));
        communities
    }
}
