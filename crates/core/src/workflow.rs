//! Image-engine workflow graph model.
//!
//! A workflow is a mapping from node id to node. ComfyUI's API format
//! stores literal values and links to other nodes side by side in one
//! `inputs` object, a link being a two-element array
//! `[source_node_id, output_slot]`:
//!
//! ```json
//! {
//!   "5": {
//!     "class_type": "KSampler",
//!     "inputs": { "seed": 42, "model": ["1", 0], "positive": ["2", 0] }
//!   }
//! }
//! ```
//!
//! [`WorkflowGraph`] splits those into typed [`WorkflowNode::parameters`]
//! and [`WorkflowNode::inputs`] so that value updates can never overwrite
//! an edge, and checks that every edge resolves before a graph is handed
//! to the network layer.
//!
//! Graphs are plain values: `clone()` is a full structural copy, so a
//! template can be cloned per panel and mutated independently.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::roles::{classify_node, NodeRole};

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Reference to one output slot of another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLink {
    /// Id of the node producing the value.
    pub node_id: String,
    /// Output slot index on that node.
    pub output_slot: u32,
}

/// A single processing stage in a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowNode {
    /// Engine class type (e.g. "KSampler", "CLIPTextEncode").
    pub class_type: String,
    /// Literal input values keyed by input name.
    pub parameters: BTreeMap<String, Value>,
    /// Links to other nodes keyed by input name.
    pub inputs: BTreeMap<String, NodeLink>,
    /// Editor metadata (`_meta`), carried through untouched.
    pub meta: Option<Value>,
}

/// An edge whose source node does not exist in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DanglingEdge {
    pub node_id: String,
    pub input: String,
    pub missing_node_id: String,
}

impl fmt::Display for DanglingEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> missing node '{}'",
            self.node_id, self.input, self.missing_node_id
        )
    }
}

/// Errors from building, parsing, or mutating a workflow graph.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow JSON must be an object")]
    NotAnObject,

    #[error("Workflow JSON must contain at least one node")]
    Empty,

    #[error("Node '{0}' is missing required 'class_type' field")]
    MissingClassType(String),

    #[error("Node '{0}' has malformed 'inputs': expected an object")]
    MalformedInputs(String),

    #[error("Invalid workflow JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Node id '{0}' is already in use")]
    DuplicateNodeId(String),

    /// Overwriting a linked input with a literal would cut an edge.
    #[error("Input '{input}' of node '{node_id}' is linked to another node")]
    LinkedInput { node_id: String, input: String },

    /// One or more edges reference nodes that are not in the graph.
    #[error("Graph integrity check failed: {}", join_edges(.0))]
    GraphIntegrity(Vec<DanglingEdge>),
}

fn join_edges(edges: &[DanglingEdge]) -> String {
    edges
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl WorkflowNode {
    /// Create a node with no inputs.
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            parameters: BTreeMap::new(),
            inputs: BTreeMap::new(),
            meta: None,
        }
    }

    /// Add a literal input value.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Add a link to `output_slot` of node `node_id`.
    pub fn with_input(
        mut self,
        key: impl Into<String>,
        node_id: impl Into<String>,
        output_slot: u32,
    ) -> Self {
        self.inputs.insert(
            key.into(),
            NodeLink {
                node_id: node_id.into(),
                output_slot,
            },
        );
        self
    }

    /// Editor title from `_meta.title`, if present.
    pub fn title(&self) -> Option<&str> {
        self.meta.as_ref()?.get("title")?.as_str()
    }

    /// Current string value of the `text` parameter, or `""`.
    pub fn text(&self) -> &str {
        self.parameters
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

/// A validated-on-demand image-engine job graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, WorkflowNode>,
}

// ---------------------------------------------------------------------------
// Construction & serialization
// ---------------------------------------------------------------------------

impl WorkflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an API-format workflow and check its integrity.
    pub fn from_json(json: &Value) -> Result<Self, WorkflowError> {
        let obj = json.as_object().ok_or(WorkflowError::NotAnObject)?;
        if obj.is_empty() {
            return Err(WorkflowError::Empty);
        }

        let mut graph = Self::new();
        for (node_id, node_value) in obj {
            graph.insert_node(node_id.clone(), parse_node(node_id, node_value)?)?;
        }

        graph.validate()?;
        Ok(graph)
    }

    /// Parse an API-format workflow from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, WorkflowError> {
        let json: Value = serde_json::from_str(text)?;
        Self::from_json(&json)
    }

    /// Serialize back to the engine's API format.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (node_id, node) in &self.nodes {
            let mut inputs = Map::new();
            for (key, value) in &node.parameters {
                inputs.insert(key.clone(), value.clone());
            }
            for (key, link) in &node.inputs {
                inputs.insert(
                    key.clone(),
                    Value::Array(vec![
                        Value::String(link.node_id.clone()),
                        Value::from(link.output_slot),
                    ]),
                );
            }

            let mut node_obj = Map::new();
            node_obj.insert("class_type".into(), Value::String(node.class_type.clone()));
            node_obj.insert("inputs".into(), Value::Object(inputs));
            if let Some(meta) = &node.meta {
                node_obj.insert("_meta".into(), meta.clone());
            }
            obj.insert(node_id.clone(), Value::Object(node_obj));
        }
        Value::Object(obj)
    }

    /// Add a node. Edges are not checked until [`validate`](Self::validate).
    pub fn insert_node(
        &mut self,
        node_id: impl Into<String>,
        node: WorkflowNode,
    ) -> Result<(), WorkflowError> {
        let node_id = node_id.into();
        if self.nodes.contains_key(&node_id) {
            return Err(WorkflowError::DuplicateNodeId(node_id));
        }
        self.nodes.insert(node_id, node);
        Ok(())
    }

    /// Check that every edge points at a node in this graph.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let dangling: Vec<DanglingEdge> = self
            .nodes
            .iter()
            .flat_map(|(node_id, node)| {
                node.inputs
                    .iter()
                    .filter(|(_, link)| !self.nodes.contains_key(&link.node_id))
                    .map(move |(input, link)| DanglingEdge {
                        node_id: node_id.clone(),
                        input: input.clone(),
                        missing_node_id: link.node_id.clone(),
                    })
            })
            .collect();

        if dangling.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::GraphIntegrity(dangling))
        }
    }
}

impl TryFrom<Value> for WorkflowGraph {
    type Error = WorkflowError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json(&value)
    }
}

impl From<WorkflowGraph> for Value {
    fn from(graph: WorkflowGraph) -> Self {
        graph.to_json()
    }
}

// ---------------------------------------------------------------------------
// Lookup & mutation
// ---------------------------------------------------------------------------

impl WorkflowGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    /// All nodes ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Ids of nodes with the given engine class type, ordered by id.
    pub fn find_nodes_by_class(&self, class_type: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.class_type == class_type)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Ids of nodes classified into `role`, ordered by id.
    ///
    /// Text-encoder roles come from a best-effort heuristic; see
    /// [`crate::roles`].
    pub fn find_nodes_by_kind(&self, role: NodeRole) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(id, node)| classify_node(id, node).role == role)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Current literal value of one input.
    pub fn parameter(&self, node_id: &str, key: &str) -> Option<&Value> {
        self.nodes.get(node_id)?.parameters.get(key)
    }

    /// Set a literal input value on a node.
    ///
    /// Fails if the node does not exist or if `key` is currently a link.
    pub fn set_parameter(
        &mut self,
        node_id: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), WorkflowError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| WorkflowError::NodeNotFound(node_id.to_string()))?;

        if node.inputs.contains_key(key) {
            return Err(WorkflowError::LinkedInput {
                node_id: node_id.to_string(),
                input: key.to_string(),
            });
        }

        node.parameters.insert(key.to_string(), value.into());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn parse_node(node_id: &str, value: &Value) -> Result<WorkflowNode, WorkflowError> {
    let class_type = value
        .get("class_type")
        .and_then(Value::as_str)
        .ok_or_else(|| WorkflowError::MissingClassType(node_id.to_string()))?;

    let mut node = WorkflowNode::new(class_type);
    node.meta = value.get("_meta").cloned();

    let Some(raw_inputs) = value.get("inputs") else {
        return Ok(node);
    };
    let raw_inputs = raw_inputs
        .as_object()
        .ok_or_else(|| WorkflowError::MalformedInputs(node_id.to_string()))?;

    for (key, input) in raw_inputs {
        match as_link(input) {
            Some(link) => {
                node.inputs.insert(key.clone(), link);
            }
            None => {
                node.parameters.insert(key.clone(), input.clone());
            }
        }
    }
    Ok(node)
}

/// Interpret `[node_id, slot]` as a link; node ids may be strings or
/// integers, slots must be non-negative integers.
fn as_link(value: &Value) -> Option<NodeLink> {
    let arr = value.as_array()?;
    let [source, slot] = arr.as_slice() else {
        return None;
    };

    let node_id = match source {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_u64() => n.to_string(),
        _ => return None,
    };
    let output_slot = u32::try_from(slot.as_u64()?).ok()?;

    Some(NodeLink {
        node_id,
        output_slot,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn sample_workflow_json() -> Value {
        json!({
            "1": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": { "ckpt_name": "model.safetensors" }
            },
            "2": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": "a castle", "clip": ["1", 1] },
                "_meta": { "title": "Positive" }
            },
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": 42,
                    "steps": 20,
                    "model": ["1", 0],
                    "positive": ["2", 0],
                    "latent_image": [4, 0]
                }
            },
            "4": {
                "class_type": "EmptyLatentImage",
                "inputs": { "width": 512, "height": 512, "batch_size": 1 }
            }
        })
    }

    // -- parsing --------------------------------------------------------------

    #[test]
    fn parse_splits_parameters_and_links() {
        let graph = WorkflowGraph::from_json(&sample_workflow_json()).unwrap();
        let sampler = graph.node("3").unwrap();

        assert_eq!(sampler.parameters["seed"], json!(42));
        assert_eq!(sampler.inputs["model"].node_id, "1");
        assert_eq!(sampler.inputs["positive"].output_slot, 0);
        // Integer node ids are normalised to strings.
        assert_eq!(sampler.inputs["latent_image"].node_id, "4");
    }

    #[test]
    fn parse_keeps_meta_title() {
        let graph = WorkflowGraph::from_json(&sample_workflow_json()).unwrap();
        assert_eq!(graph.node("2").unwrap().title(), Some("Positive"));
    }

    #[test]
    fn two_element_non_link_array_stays_a_parameter() {
        let json = json!({
            "1": { "class_type": "Custom", "inputs": { "size": [512, -1], "pair": ["a", "b"] } }
        });
        let graph = WorkflowGraph::from_json(&json).unwrap();
        let node = graph.node("1").unwrap();
        assert!(node.inputs.is_empty());
        assert_eq!(node.parameters.len(), 2);
    }

    #[test]
    fn parse_non_object_returns_error() {
        assert_matches!(
            WorkflowGraph::from_json(&json!("nope")),
            Err(WorkflowError::NotAnObject)
        );
    }

    #[test]
    fn parse_empty_object_returns_error() {
        assert_matches!(WorkflowGraph::from_json(&json!({})), Err(WorkflowError::Empty));
    }

    #[test]
    fn parse_missing_class_type_returns_error() {
        let result = WorkflowGraph::from_json(&json!({ "1": { "inputs": {} } }));
        assert_matches!(result, Err(WorkflowError::MissingClassType(id)) if id == "1");
    }

    #[test]
    fn parse_missing_inputs_gives_empty_node() {
        let graph = WorkflowGraph::from_json(&json!({ "9": { "class_type": "SaveImage" } })).unwrap();
        let node = graph.node("9").unwrap();
        assert!(node.parameters.is_empty());
        assert!(node.inputs.is_empty());
    }

    #[test]
    fn parse_invalid_json_text_returns_error() {
        assert_matches!(
            WorkflowGraph::from_json_str("{ not json"),
            Err(WorkflowError::Json(_))
        );
    }

    // -- integrity ------------------------------------------------------------

    #[test]
    fn dangling_edge_is_rejected_at_parse_time() {
        let json = json!({
            "1": { "class_type": "VAEDecode", "inputs": { "samples": ["99", 0] } }
        });
        let err = WorkflowGraph::from_json(&json).unwrap_err();
        assert_matches!(&err, WorkflowError::GraphIntegrity(edges) if edges.len() == 1);
        assert!(err.to_string().contains("missing node '99'"));
    }

    #[test]
    fn validate_lists_every_dangling_edge() {
        let mut graph = WorkflowGraph::new();
        graph
            .insert_node(
                "1",
                WorkflowNode::new("KSampler")
                    .with_input("model", "7", 0)
                    .with_input("positive", "8", 0),
            )
            .unwrap();

        match graph.validate() {
            Err(WorkflowError::GraphIntegrity(edges)) => {
                let missing: Vec<_> = edges.iter().map(|e| e.missing_node_id.as_str()).collect();
                assert_eq!(missing, vec!["7", "8"]);
            }
            other => panic!("Expected GraphIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn insert_duplicate_id_is_rejected() {
        let mut graph = WorkflowGraph::new();
        graph.insert_node("1", WorkflowNode::new("A")).unwrap();
        assert_matches!(
            graph.insert_node("1", WorkflowNode::new("B")),
            Err(WorkflowError::DuplicateNodeId(_))
        );
    }

    // -- serialization --------------------------------------------------------

    #[test]
    fn to_json_merges_links_back_into_inputs() {
        let graph = WorkflowGraph::from_json(&sample_workflow_json()).unwrap();
        let json = graph.to_json();
        assert_eq!(json["3"]["inputs"]["model"], json!(["1", 0]));
        assert_eq!(json["3"]["inputs"]["seed"], json!(42));
        assert_eq!(json["2"]["_meta"]["title"], json!("Positive"));
        assert_eq!(json["4"]["class_type"], json!("EmptyLatentImage"));
    }

    #[test]
    fn serde_deserialize_validates() {
        let bad = json!({ "1": { "class_type": "X", "inputs": { "a": ["2", 0] } } });
        assert!(serde_json::from_value::<WorkflowGraph>(bad).is_err());
        assert!(serde_json::from_value::<WorkflowGraph>(sample_workflow_json()).is_ok());
    }

    // -- mutation -------------------------------------------------------------

    #[test]
    fn clone_is_independent_of_template() {
        let template = WorkflowGraph::from_json(&sample_workflow_json()).unwrap();
        let mut copy = template.clone();

        copy.set_parameter("3", "seed", 7).unwrap();
        copy.set_parameter("2", "text", "a dragon").unwrap();

        assert_eq!(template.parameter("3", "seed"), Some(&json!(42)));
        assert_eq!(template.parameter("2", "text"), Some(&json!("a castle")));
        assert_eq!(copy.parameter("3", "seed"), Some(&json!(7)));
        assert_ne!(template, copy);
    }

    #[test]
    fn set_parameter_on_missing_node_fails() {
        let mut graph = WorkflowGraph::from_json(&sample_workflow_json()).unwrap();
        assert_matches!(
            graph.set_parameter("42", "seed", 1),
            Err(WorkflowError::NodeNotFound(id)) if id == "42"
        );
    }

    #[test]
    fn set_parameter_refuses_to_cut_an_edge() {
        let mut graph = WorkflowGraph::from_json(&sample_workflow_json()).unwrap();
        assert_matches!(
            graph.set_parameter("3", "model", "oops"),
            Err(WorkflowError::LinkedInput { .. })
        );
        assert_eq!(graph.node("3").unwrap().inputs["model"].node_id, "1");
    }

    #[test]
    fn set_parameter_adds_new_keys() {
        let mut graph = WorkflowGraph::from_json(&sample_workflow_json()).unwrap();
        graph.set_parameter("3", "scheduler", "karras").unwrap();
        assert_eq!(graph.parameter("3", "scheduler"), Some(&json!("karras")));
    }

    #[test]
    fn find_nodes_by_class_is_ordered() {
        let json = json!({
            "10": { "class_type": "CLIPTextEncode", "inputs": { "text": "a" } },
            "2": { "class_type": "CLIPTextEncode", "inputs": { "text": "b" } },
            "3": { "class_type": "SaveImage" }
        });
        let graph = WorkflowGraph::from_json(&json).unwrap();
        assert_eq!(graph.find_nodes_by_class("CLIPTextEncode"), vec!["10", "2"]);
    }

    #[test]
    fn find_nodes_by_kind_uses_roles() {
        let graph = WorkflowGraph::from_json(&sample_workflow_json()).unwrap();
        assert_eq!(graph.find_nodes_by_kind(NodeRole::Sampler), vec!["3"]);
        assert_eq!(graph.find_nodes_by_kind(NodeRole::LatentImage), vec!["4"]);
        assert_eq!(graph.find_nodes_by_kind(NodeRole::PositiveTextEncoder), vec!["2"]);
        assert!(graph.find_nodes_by_kind(NodeRole::ImageSaver).is_empty());
    }
}
