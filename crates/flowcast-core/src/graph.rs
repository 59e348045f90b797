//! Typed node graph submitted to a delegated workflow engine.
//!
//! The graph is built as data (nodes + typed edges) and only serialized at
//! the HTTP boundary.
//!
//! ```text
//! trigger ──▶ plan[acct] ──▶ customize[acct] ──┬──▶ distribute[acct, ch1] ──▶ collect
//!               │                              └──▶ distribute[acct, ch2] ──▶ collect
//!               └───────────── on_error ───────────────────────────────────▶ collect
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FlowcastError, Result};
use crate::types::{ChannelType, TriggerSource, Workflow};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowGraph {
    pub workflow_id: String,
    pub name: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Trigger { source: TriggerSource },
    GeneratePlan { account_identifier: String },
    Customize { account_identifier: String, customization: Map<String, Value> },
    Distribute { account_identifier: String, channel_type: ChannelType, config: Value },
    Collect,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Main,
    OnError,
}

/// Incremental graph builder. Edges are checked against known node ids.
pub struct GraphBuilder {
    graph: WorkflowGraph,
}

impl GraphBuilder {
    pub fn new(workflow_id: &str, name: &str) -> Self {
        Self {
            graph: WorkflowGraph {
                workflow_id: workflow_id.to_string(),
                name: name.to_string(),
                nodes: Vec::new(),
                edges: Vec::new(),
            },
        }
    }

    /// Add a node and return its id.
    pub fn node(&mut self, kind: NodeKind) -> String {
        let prefix = match &kind {
            NodeKind::Trigger { .. } => "trigger",
            NodeKind::GeneratePlan { .. } => "plan",
            NodeKind::Customize { .. } => "customize",
            NodeKind::Distribute { .. } => "distribute",
            NodeKind::Collect => "collect",
        };
        let id = format!("{prefix}-{}", self.graph.nodes.len());
        self.graph.nodes.push(GraphNode { id: id.clone(), kind });
        id
    }

    pub fn edge(&mut self, from: &str, to: &str, kind: EdgeKind) -> Result<()> {
        for end in [from, to] {
            if !self.graph.nodes.iter().any(|n| n.id == end) {
                return Err(FlowcastError::validation(format!("edge references unknown node '{end}'")));
            }
        }
        self.graph.edges.push(GraphEdge {
            from: from.to_string(),
            to: to.to_string(),
            kind,
        });
        Ok(())
    }

    pub fn build(self) -> Result<WorkflowGraph> {
        let triggers = self
            .graph
            .nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Trigger { .. }))
            .count();
        if triggers != 1 {
            return Err(FlowcastError::validation(format!(
                "graph needs exactly one trigger node, found {triggers}"
            )));
        }
        Ok(self.graph)
    }
}

impl WorkflowGraph {
    /// Build the delegated definition for a workflow.
    pub fn for_workflow(workflow: &Workflow, source: TriggerSource) -> Result<Self> {
        let mut b = GraphBuilder::new(&workflow.id, &workflow.name);
        let trigger = b.node(NodeKind::Trigger { source });
        let collect = b.node(NodeKind::Collect);

        for account in &workflow.accounts {
            let plan = b.node(NodeKind::GeneratePlan {
                account_identifier: account.account_identifier.clone(),
            });
            b.edge(&trigger, &plan, EdgeKind::Main)?;
            b.edge(&plan, &collect, EdgeKind::OnError)?;

            let head = if account.customization.is_empty() {
                plan
            } else {
                let customize = b.node(NodeKind::Customize {
                    account_identifier: account.account_identifier.clone(),
                    customization: account.customization.clone(),
                });
                b.edge(&plan, &customize, EdgeKind::Main)?;
                customize
            };

            if workflow.distributors.is_empty() {
                b.edge(&head, &collect, EdgeKind::Main)?;
            }
            for distributor in &workflow.distributors {
                let node = b.node(NodeKind::Distribute {
                    account_identifier: account.account_identifier.clone(),
                    channel_type: distributor.channel_type.clone(),
                    config: distributor.config.clone(),
                });
                b.edge(&head, &node, EdgeKind::Main)?;
                b.edge(&node, &collect, EdgeKind::Main)?;
                b.edge(&node, &collect, EdgeKind::OnError)?;
            }
        }
        b.build()
    }

    pub fn nodes_of<'a>(&'a self, pred: impl Fn(&NodeKind) -> bool + 'a) -> impl Iterator<Item = &'a GraphNode> + 'a {
        self.nodes.iter().filter(move |n| pred(&n.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountConfig, DistributorConfig, EngineKind, Trigger, WorkflowStatus};
    use chrono::Utc;
    use serde_json::json;

    fn workflow() -> Workflow {
        let mut custom = AccountConfig::new("globex");
        custom.customization.insert("focus_areas".into(), json!(["renewal"]));
        Workflow {
            id: "wf-1".into(),
            name: "weekly".into(),
            description: None,
            trigger: Trigger::Manual,
            accounts: vec![AccountConfig::new("acme"), custom],
            distributors: vec![
                DistributorConfig::new(ChannelType::Messaging, json!({})),
                DistributorConfig::new(ChannelType::Email, json!({"to": ["a@b.c"]})),
            ],
            engine: EngineKind::Delegated,
            enabled: true,
            status: WorkflowStatus::Created,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_run: None,
            run_count: 0,
        }
    }

    #[test]
    fn test_graph_shape() {
        let graph = WorkflowGraph::for_workflow(&workflow(), TriggerSource::Manual).unwrap();
        assert_eq!(graph.nodes_of(|k| matches!(k, NodeKind::GeneratePlan { .. })).count(), 2);
        assert_eq!(graph.nodes_of(|k| matches!(k, NodeKind::Customize { .. })).count(), 1);
        assert_eq!(graph.nodes_of(|k| matches!(k, NodeKind::Distribute { .. })).count(), 4);
        assert!(graph.edges.iter().any(|e| e.kind == EdgeKind::OnError));
    }

    #[test]
    fn test_serialized_form() {
        let graph = WorkflowGraph::for_workflow(&workflow(), TriggerSource::Schedule).unwrap();
        let v = serde_json::to_value(&graph).unwrap();
        assert_eq!(v["nodes"][0]["kind"], "trigger");
        assert_eq!(v["nodes"][0]["source"], "schedule");
        assert_eq!(v["edges"][0]["kind"], "main");
    }

    #[test]
    fn test_dangling_edge_rejected() {
        let mut b = GraphBuilder::new("wf", "x");
        let t = b.node(NodeKind::Trigger { source: TriggerSource::Manual });
        assert!(b.edge(&t, "nowhere", EdgeKind::Main).is_err());
    }
}
