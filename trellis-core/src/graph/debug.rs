//! Snapshots of the graph's structure for debugging tools.

use serde::Serialize;

use super::event::{EventStamp, Phase};
use super::node::{BehaviorId, ExtentId, ExtentStatus, OrderingState, ResourceId, ResourceKind};
use super::state::GraphState;

/// A point-in-time copy of every node and link in a graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub phase: Phase,
    pub current_event: Option<EventStamp>,
    pub last_event: EventStamp,
    pub extents: Vec<ExtentInfo>,
    pub resources: Vec<ResourceInfo>,
    pub behaviors: Vec<BehaviorInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtentInfo {
    pub id: ExtentId,
    pub label: Option<String>,
    pub status: ExtentStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub label: Option<String>,
    pub kind: ResourceKind,
    pub extent: ExtentId,
    pub supplied_by: Option<BehaviorId>,
    pub subsequents: Vec<BehaviorId>,
    pub touched_in: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BehaviorInfo {
    pub id: BehaviorId,
    pub label: Option<String>,
    pub extent: ExtentId,
    pub order: u32,
    pub ordering: OrderingState,
    pub demands: Vec<ResourceId>,
    pub ordering_demands: Vec<ResourceId>,
    pub supplies: Vec<ResourceId>,
    pub removed: bool,
}

impl GraphSnapshot {
    /// Render the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&ResourceInfo> {
        self.resources.iter().find(|info| info.id == id)
    }

    pub fn behavior(&self, id: BehaviorId) -> Option<&BehaviorInfo> {
        self.behaviors.iter().find(|info| info.id == id)
    }
}

impl GraphState {
    pub(crate) fn snapshot(&self) -> GraphSnapshot {
        let extents = self
            .extents
            .iter()
            .enumerate()
            .map(|(index, node)| ExtentInfo {
                id: ExtentId::from_index(index),
                label: node.label.clone(),
                status: node.status,
            })
            .collect();

        let resources = self
            .resources
            .iter()
            .enumerate()
            .map(|(index, node)| ResourceInfo {
                id: ResourceId::from_index(index),
                label: node.label.clone(),
                kind: node.kind,
                extent: node.extent,
                supplied_by: node.supplied_by,
                subsequents: node.subsequents.iter().copied().collect(),
                touched_in: node.touched_in,
            })
            .collect();

        let behaviors = self
            .behaviors
            .iter()
            .enumerate()
            .map(|(index, node)| BehaviorInfo {
                id: BehaviorId::from_index(index),
                label: node.label.clone(),
                extent: node.extent,
                order: node.order,
                ordering: node.ordering,
                demands: node.demands.iter().copied().collect(),
                ordering_demands: node.ordering_demands.iter().copied().collect(),
                supplies: node.supplies.iter().copied().collect(),
                removed: node.is_removed(),
            })
            .collect();

        GraphSnapshot {
            phase: self.phase,
            current_event: self.current_event,
            last_event: self.last_event,
            extents,
            resources,
            behaviors,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{ExtentStatus, Graph};
    use crate::reactive::Extent;

    #[test]
    fn snapshot_lists_links() {
        let graph = Graph::new();
        let extent = Extent::with_label(&graph, "pipeline");
        let input = extent.state(1, "input").unwrap();
        let output = extent.state(0, "output").unwrap();
        let behavior = extent
            .behavior()
            .label("double")
            .demands(&[&input])
            .supplies(&[&output])
            .runs(|_| Ok(()))
            .unwrap();
        extent.add_to_graph_with_action().unwrap();

        let snapshot = graph.snapshot();
        assert!(matches!(snapshot.extents[0].status, ExtentStatus::Added(1)));
        let info = snapshot.behavior(behavior.id()).unwrap();
        assert_eq!(info.label.as_deref(), Some("double"));
        assert_eq!(info.demands, vec![input.id()]);
        assert_eq!(info.supplies, vec![output.id()]);
        assert_eq!(
            snapshot.resource(output.id()).unwrap().supplied_by,
            Some(behavior.id())
        );
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let graph = Graph::new();
        let extent = Extent::new(&graph);
        extent.state(0, "count").unwrap();

        let json = graph.snapshot().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["phase"], "Idle");
        assert_eq!(value["resources"][1]["label"], "count");
        assert_eq!(value["resources"][1]["kind"], "State");
    }
}
