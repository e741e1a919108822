use crate::registry::{effective_schema, ElementRegistry};
use flowcore::{Connection, Element, ElementSpec, FlowDefinition, PortSchema, ValidationError};
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A validated flow: instantiated elements plus adjacency by connection index
pub struct FlowGraph {
    pub(crate) elements: HashMap<String, GraphElement>,
    /// Element ids in definition order
    pub(crate) order: Vec<String>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) output_element: Option<String>,
}

pub(crate) struct GraphElement {
    pub spec: ElementSpec,
    pub instance: Arc<dyn Element>,
    pub inputs: PortSchema,
    pub outputs: PortSchema,
    pub incoming: Vec<usize>,
    pub outgoing: Vec<usize>,
}

impl FlowGraph {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn element_ids(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements.contains_key(id)
    }

    /// Elements with no incoming connections: the initial Ready candidates
    pub fn roots(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.elements[id.as_str()].incoming.is_empty())
            .cloned()
            .collect()
    }

    /// Elements with no outgoing connections
    pub fn sinks(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.elements[id.as_str()].outgoing.is_empty())
            .cloned()
            .collect()
    }

    pub fn output_element(&self) -> Option<&str> {
        self.output_element.as_deref()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }
}

/// Validate a flow definition against the registry and build its graph
pub fn validate(
    definition: &FlowDefinition,
    registry: &ElementRegistry,
) -> Result<FlowGraph, ValidationError> {
    if definition.elements.is_empty() {
        return Err(ValidationError::EmptyFlow);
    }

    let mut elements = HashMap::new();
    let mut order = Vec::with_capacity(definition.elements.len());

    for spec in &definition.elements {
        if spec.id.trim().is_empty() {
            return Err(ValidationError::EmptyElementId);
        }
        if elements.contains_key(&spec.id) {
            return Err(ValidationError::DuplicateElementId(spec.id.clone()));
        }

        let instance = registry
            .create_element(&spec.element_type, &spec.parameters)
            .ok_or_else(|| ValidationError::UnknownElementType {
                element_id: spec.id.clone(),
                element_type: spec.element_type.clone(),
            })?
            .map_err(|e| ValidationError::InvalidParameters {
                element_id: spec.id.clone(),
                reason: e.to_string(),
            })?;

        let metadata = registry.get_metadata(&spec.element_type).unwrap_or_default();
        let inputs = effective_schema(&metadata.inputs, &spec.input_schema);
        let outputs = effective_schema(&metadata.outputs, &spec.output_schema);

        if let Some(control) = &spec.flow_control {
            if !outputs.contains_key(&control.decision_port) {
                return Err(ValidationError::InvalidFlowControl {
                    element_id: spec.id.clone(),
                    reason: format!("decision port '{}' is not an output", control.decision_port),
                });
            }
        }

        order.push(spec.id.clone());
        elements.insert(
            spec.id.clone(),
            GraphElement {
                spec: spec.clone(),
                instance,
                inputs,
                outputs,
                incoming: Vec::new(),
                outgoing: Vec::new(),
            },
        );
    }

    for (idx, conn) in definition.connections.iter().enumerate() {
        check_connection(conn, &elements)?;
        if let Some(source) = elements.get_mut(&conn.source_element_id) {
            source.outgoing.push(idx);
        }
        if let Some(target) = elements.get_mut(&conn.target_element_id) {
            target.incoming.push(idx);
        }
    }

    check_acyclic(&order, &definition.connections)?;

    if let Some(output) = &definition.output_element {
        if !elements.contains_key(output) {
            return Err(ValidationError::UnknownOutputElement(output.clone()));
        }
    }

    tracing::debug!(
        elements = order.len(),
        connections = definition.connections.len(),
        "Flow validated"
    );

    Ok(FlowGraph {
        elements,
        order,
        connections: definition.connections.clone(),
        output_element: definition.output_element.clone(),
    })
}

fn check_connection(
    conn: &Connection,
    elements: &HashMap<String, GraphElement>,
) -> Result<(), ValidationError> {
    let source = elements
        .get(&conn.source_element_id)
        .ok_or_else(|| ValidationError::ElementNotFound(conn.source_element_id.clone()))?;
    let target = elements
        .get(&conn.target_element_id)
        .ok_or_else(|| ValidationError::ElementNotFound(conn.target_element_id.clone()))?;

    let source_port = source
        .outputs
        .get(&conn.source_port)
        .ok_or_else(|| ValidationError::UnknownPort {
            element_id: conn.source_element_id.clone(),
            port: conn.source_port.clone(),
            direction: "output",
        })?;
    let target_port = target
        .inputs
        .get(&conn.target_port)
        .ok_or_else(|| ValidationError::UnknownPort {
            element_id: conn.target_element_id.clone(),
            port: conn.target_port.clone(),
            direction: "input",
        })?;

    if !source_port.port_type.can_feed(target_port.port_type) {
        return Err(ValidationError::IncompatiblePorts {
            source_element: conn.source_element_id.clone(),
            source_port: conn.source_port.clone(),
            source_type: source_port.port_type.to_string(),
            target_element: conn.target_element_id.clone(),
            target_port: conn.target_port.clone(),
            target_type: target_port.port_type.to_string(),
        });
    }

    if conn.branch.is_some() && source.spec.flow_control.is_none() {
        return Err(ValidationError::InvalidFlowControl {
            element_id: conn.source_element_id.clone(),
            reason: "branch connections require flow_control on the source".to_string(),
        });
    }

    Ok(())
}

/// The branch-free graph must be acyclic, and no branch edge may point back
/// at one of its source's ancestors.
fn check_acyclic(order: &[String], connections: &[Connection]) -> Result<(), ValidationError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let index: HashMap<&str, NodeIndex> = order
        .iter()
        .map(|id| (id.as_str(), graph.add_node(id.as_str())))
        .collect();

    let mut seen = HashSet::new();
    for conn in connections.iter().filter(|c| c.branch.is_none()) {
        let edge = (
            index[conn.source_element_id.as_str()],
            index[conn.target_element_id.as_str()],
        );
        if seen.insert(edge) {
            graph.add_edge(edge.0, edge.1, ());
        }
    }

    if let Err(cycle) = toposort(&graph, None) {
        return Err(ValidationError::CyclicDependency(
            graph[cycle.node_id()].to_string(),
        ));
    }

    for conn in connections.iter().filter(|c| c.branch.is_some()) {
        let source = index[conn.source_element_id.as_str()];
        let target = index[conn.target_element_id.as_str()];
        if source == target || has_path_connecting(&graph, target, source, None) {
            return Err(ValidationError::BranchBackEdge {
                source_element: conn.source_element_id.clone(),
                target_element: conn.target_element_id.clone(),
            });
        }
        graph.add_edge(source, target, ());
    }

    Ok(())
}
