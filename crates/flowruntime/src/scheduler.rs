use crate::context::ExecutionContext;
use crate::validator::{FlowGraph, GraphElement};
use flowcore::{
    coerce_for_port, Disposition, ElementContext, ElementError, ElementOutput, EventBus,
    FlowError, FlowEvent, RunConfig, RunId, RunScope, Value,
};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Lifecycle of one element within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementRunState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl ElementRunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ElementRunState::Completed | ElementRunState::Failed | ElementRunState::Skipped
        )
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { final_output: String },
    Failed { error: String },
    Aborted,
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    pub states: HashMap<String, ElementRunState>,
    pub outputs: HashMap<String, HashMap<String, Value>>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    pub fn state(&self, element_id: &str) -> Option<ElementRunState> {
        self.states.get(element_id).copied()
    }

    pub fn output(&self, element_id: &str, port: &str) -> Option<&Value> {
        self.outputs.get(element_id).and_then(|o| o.get(port))
    }

    pub fn final_output(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Completed { final_output } => Some(final_output),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EdgeStatus {
    Pending,
    Live,
    Dead,
}

enum Evaluation {
    Wait,
    Ready,
    Skip(String),
    Missing(String),
}

type TaskResult = (String, Result<ElementOutput, ElementError>, u64);

/// Drives a validated flow to completion with bounded parallelism
pub struct Scheduler {
    max_concurrency: usize,
    element_timeout: Option<Duration>,
}

impl Scheduler {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            element_timeout: config.element_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Run the graph. `output_element` overrides the graph's designation.
    pub async fn run(
        &self,
        graph: &FlowGraph,
        scope: Arc<RunScope>,
        output_element: Option<String>,
        events: &EventBus,
        cancel: CancellationToken,
    ) -> RunReport {
        let output_element = output_element.or_else(|| graph.output_element().map(str::to_string));
        let run = Run::new(graph, scope, output_element, events, cancel);
        run.drive(self).await
    }
}

/// Mutable state of one run. Owned by the scheduling loop, so every
/// Ready-set transition happens on a single task.
struct Run<'a> {
    graph: &'a FlowGraph,
    scope: Arc<RunScope>,
    output_element: Option<String>,
    events: &'a EventBus,
    cancel: CancellationToken,
    /// Child of `cancel`; also fired when the run halts
    element_token: CancellationToken,
    states: HashMap<String, ElementRunState>,
    edges: Vec<EdgeStatus>,
    context: ExecutionContext,
    ready: VecDeque<String>,
    halt: Option<FlowError>,
    aborted: bool,
    started: Instant,
}

impl<'a> Run<'a> {
    fn new(
        graph: &'a FlowGraph,
        scope: Arc<RunScope>,
        output_element: Option<String>,
        events: &'a EventBus,
        cancel: CancellationToken,
    ) -> Self {
        let states = graph
            .element_ids()
            .iter()
            .map(|id| (id.clone(), ElementRunState::Pending))
            .collect();
        Self {
            graph,
            scope,
            output_element,
            events,
            element_token: cancel.child_token(),
            cancel,
            states,
            edges: vec![EdgeStatus::Pending; graph.connections().len()],
            context: ExecutionContext::new(),
            ready: VecDeque::new(),
            halt: None,
            aborted: false,
            started: Instant::now(),
        }
    }

    async fn drive(mut self, scheduler: &Scheduler) -> RunReport {
        self.resolve(self.graph.roots());

        let cancel = self.cancel.clone();
        let mut running: FuturesUnordered<JoinHandle<TaskResult>> = FuturesUnordered::new();

        loop {
            if !self.stopping() {
                while running.len() < scheduler.max_concurrency {
                    let Some(element_id) = self.ready.pop_front() else {
                        break;
                    };
                    running.push(self.dispatch(element_id, scheduler.element_timeout));
                }
            }

            // Nothing running and nothing dispatchable: the run is settled
            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !self.aborted => {
                    tracing::info!(run_id = %self.scope.run_id, "Run cancelled");
                    self.aborted = true;
                }
                Some(joined) = running.next() => match joined {
                    Ok((element_id, result, duration_ms)) => {
                        self.finish(element_id, result, duration_ms);
                    }
                    Err(e) => {
                        tracing::error!("Element task join error: {}", e);
                        self.halt_with(FlowError::Execution(format!("Task join error: {}", e)));
                    }
                },
            }
        }

        self.settle()
    }

    fn stopping(&self) -> bool {
        self.aborted || self.halt.is_some()
    }

    fn emit(&self, event: FlowEvent) {
        if !self.aborted && !self.cancel.is_cancelled() {
            self.events.emit(event);
        }
    }

    fn element(&self, id: &str) -> &'a GraphElement {
        &self.graph.elements[id]
    }

    /// Evaluate elements whose inputs may have resolved, following skips
    /// and soft failures downstream until nothing changes.
    fn resolve(&mut self, start: Vec<String>) {
        let mut worklist: VecDeque<String> = start.into();
        while let Some(id) = worklist.pop_front() {
            match self.evaluate(&id) {
                Evaluation::Wait => {}
                Evaluation::Ready => {
                    self.states.insert(id.clone(), ElementRunState::Ready);
                    self.ready.push_back(id);
                }
                Evaluation::Skip(reason) => {
                    self.skip(&id, reason);
                    worklist.extend(self.cut_outgoing(&id));
                }
                Evaluation::Missing(port) => {
                    let downstream = self.fail(&id, ElementError::MissingInput(port));
                    worklist.extend(downstream);
                }
            }
        }
    }

    fn evaluate(&self, id: &str) -> Evaluation {
        if self.states.get(id) != Some(&ElementRunState::Pending) {
            return Evaluation::Wait;
        }
        let element = self.element(id);
        let incoming = &element.incoming;

        if incoming.iter().any(|&i| self.edges[i] == EdgeStatus::Pending) {
            return Evaluation::Wait;
        }
        if !incoming.is_empty() && incoming.iter().all(|&i| self.edges[i] == EdgeStatus::Dead) {
            return Evaluation::Skip("no active upstream connection".to_string());
        }

        for (port, spec) in element.inputs.iter().filter(|(_, spec)| spec.required) {
            let feeding: Vec<usize> = incoming
                .iter()
                .copied()
                .filter(|&i| self.graph.connections[i].target_port == *port)
                .collect();

            if feeding.is_empty() {
                if self.scope.inputs.contains_key(port) || spec.default.is_some() {
                    continue;
                }
                return Evaluation::Missing(port.clone());
            }

            let available = feeding.iter().any(|&i| {
                let conn = &self.graph.connections[i];
                self.edges[i] == EdgeStatus::Live
                    && self
                        .context
                        .read(&conn.source_element_id, &conn.source_port)
                        .is_some()
            });
            if available {
                continue;
            }
            if feeding.iter().all(|&i| self.edges[i] == EdgeStatus::Dead) {
                return Evaluation::Skip(format!("required input '{}' has no active source", port));
            }
            return Evaluation::Missing(port.clone());
        }

        Evaluation::Ready
    }

    fn collect_inputs(&self, element: &GraphElement) -> HashMap<String, Value> {
        let mut inputs = HashMap::new();

        // First live connection into a port wins
        for &idx in &element.incoming {
            if self.edges[idx] != EdgeStatus::Live {
                continue;
            }
            let conn = &self.graph.connections[idx];
            if inputs.contains_key(&conn.target_port) {
                continue;
            }
            if let Some(value) = self.context.read(&conn.source_element_id, &conn.source_port) {
                inputs.insert(conn.target_port.clone(), value.clone());
            }
        }

        // Unconnected ports come from the initial inputs, then declared defaults
        for (port, spec) in &element.inputs {
            let connected = element
                .incoming
                .iter()
                .any(|&i| self.graph.connections[i].target_port == *port);
            if connected || inputs.contains_key(port) {
                continue;
            }
            if let Some(value) = self.scope.inputs.get(port).or(spec.default.as_ref()) {
                inputs.insert(port.clone(), value.clone());
            }
        }

        inputs
            .into_iter()
            .map(|(port, value)| {
                let port_type = element
                    .inputs
                    .get(&port)
                    .map(|spec| spec.port_type)
                    .unwrap_or_default();
                (port, coerce_for_port(port_type, value))
            })
            .collect()
    }

    fn dispatch(
        &mut self,
        element_id: String,
        element_timeout: Option<Duration>,
    ) -> JoinHandle<TaskResult> {
        let element = self.element(&element_id);
        let inputs = self.collect_inputs(element);

        self.states
            .insert(element_id.clone(), ElementRunState::Running);
        self.emit(FlowEvent::ElementStarted {
            element_id: element_id.clone(),
            element_type: element.spec.element_type.clone(),
        });
        tracing::debug!(element_id = %element_id, element_type = %element.spec.element_type, "Dispatching element");

        let ctx = ElementContext {
            element_id: element_id.clone(),
            inputs,
            parameters: element.spec.parameters.clone(),
            hyperparameters: element.spec.hyperparameters.clone(),
            input_schema: element.inputs.clone(),
            run: self.scope.clone(),
            events: self.events.create_emitter(element_id.clone()),
            cancellation: self.element_token.clone(),
        };
        let instance = element.instance.clone();
        let token = self.element_token.clone();

        tokio::spawn(async move {
            let start = Instant::now();
            let work = async {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(ElementError::Cancelled),
                    result = instance.execute(ctx) => result,
                }
            };
            let result = match element_timeout {
                Some(limit) => match timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => Err(ElementError::Timeout {
                        ms: limit.as_millis() as u64,
                    }),
                },
                None => work.await,
            };
            (element_id, result, start.elapsed().as_millis() as u64)
        })
    }

    fn finish(
        &mut self,
        element_id: String,
        result: Result<ElementOutput, ElementError>,
        duration_ms: u64,
    ) {
        match result {
            Ok(output) => self.complete(element_id, output, duration_ms),
            Err(e) => {
                let downstream = self.fail(&element_id, e);
                if !self.stopping() {
                    self.resolve(downstream);
                }
            }
        }
    }

    fn complete(&mut self, element_id: String, output: ElementOutput, duration_ms: u64) {
        if let Err(e) = self.context.write_outputs(&element_id, &output.outputs) {
            tracing::error!(element_id = %element_id, "{}", e);
            self.states.insert(element_id.clone(), ElementRunState::Failed);
            self.emit(FlowEvent::ElementFailed {
                element_id,
                error: e.to_string(),
                hard: true,
            });
            self.halt_with(e);
            return;
        }

        tracing::info!("Element {} completed in {}ms", element_id, duration_ms);
        self.states
            .insert(element_id.clone(), ElementRunState::Completed);
        self.emit(FlowEvent::ElementCompleted {
            element_id: element_id.clone(),
            outputs: output.outputs.clone().into_iter().collect(),
        });

        if self.stopping() {
            return;
        }

        let element = self.element(&element_id);
        let selected = element.spec.flow_control.as_ref().map(|control| {
            let offered: HashSet<&str> = element
                .outgoing
                .iter()
                .filter_map(|&i| self.graph.connections[i].branch.as_deref())
                .collect();
            let mut branches: Vec<String> = branch_labels(output.outputs.get(&control.decision_port))
                .into_iter()
                .filter(|label| offered.contains(label.as_str()))
                .collect();
            if branches.is_empty() {
                branches.extend(control.default_branch.clone());
            }
            branches
        });

        if let Some(branches) = &selected {
            tracing::debug!(element_id = %element_id, ?branches, "Branch selected");
            self.emit(FlowEvent::BranchSelected {
                element_id: element_id.clone(),
                branches: branches.clone(),
            });
        }

        let mut downstream = Vec::with_capacity(element.outgoing.len());
        for &idx in &element.outgoing {
            let conn = &self.graph.connections[idx];
            let active = match (&conn.branch, &selected) {
                (Some(label), Some(branches)) => branches.contains(label),
                _ => true,
            };
            self.edges[idx] = if active {
                EdgeStatus::Live
            } else {
                EdgeStatus::Dead
            };
            downstream.push(conn.target_element_id.clone());
        }
        self.resolve(downstream);
    }

    /// Mark an element Failed and apply the fault policy. Returns the
    /// elements to re-evaluate when the run continues.
    fn fail(&mut self, element_id: &str, error: ElementError) -> Vec<String> {
        self.states
            .insert(element_id.to_string(), ElementRunState::Failed);
        let optional = self.element(element_id).spec.optional;

        match error.disposition(optional) {
            Disposition::Abort => {
                if self.cancel.is_cancelled() {
                    self.aborted = true;
                } else {
                    // Cancelled because the run already halted
                    self.emit(FlowEvent::ElementFailed {
                        element_id: element_id.to_string(),
                        error: error.to_string(),
                        hard: false,
                    });
                }
                Vec::new()
            }
            Disposition::Halt => {
                tracing::error!("Element {} failed: {}", element_id, error);
                self.emit(FlowEvent::ElementFailed {
                    element_id: element_id.to_string(),
                    error: error.to_string(),
                    hard: true,
                });
                self.halt_with(FlowError::Element {
                    element_id: element_id.to_string(),
                    source: error,
                });
                Vec::new()
            }
            Disposition::Continue => {
                tracing::warn!("Element {} failed softly: {}", element_id, error);
                self.emit(FlowEvent::ElementFailed {
                    element_id: element_id.to_string(),
                    error: error.to_string(),
                    hard: error.is_hard(),
                });
                self.cut_outgoing(element_id)
            }
        }
    }

    fn skip(&mut self, element_id: &str, reason: String) {
        tracing::debug!(element_id = %element_id, reason = %reason, "Element skipped");
        self.states
            .insert(element_id.to_string(), ElementRunState::Skipped);
        self.emit(FlowEvent::ElementSkipped {
            element_id: element_id.to_string(),
            reason,
        });
    }

    /// Kill every outgoing connection and return their targets
    fn cut_outgoing(&mut self, element_id: &str) -> Vec<String> {
        let element = self.element(element_id);
        element
            .outgoing
            .iter()
            .map(|&idx| {
                self.edges[idx] = EdgeStatus::Dead;
                self.graph.connections[idx].target_element_id.clone()
            })
            .collect()
    }

    fn halt_with(&mut self, error: FlowError) {
        if self.halt.is_none() {
            self.halt = Some(error);
            self.element_token.cancel();
        }
    }

    fn settle(mut self) -> RunReport {
        let graph = self.graph;
        let reason = if self.aborted { "run aborted" } else { "run halted" };
        for id in graph.element_ids() {
            if !self.states[id].is_terminal() {
                self.skip(id, reason.to_string());
            }
        }

        let outcome = if self.aborted || (self.halt.is_none() && self.cancel.is_cancelled()) {
            RunOutcome::Aborted
        } else if let Some(error) = self.halt.take() {
            self.emit(FlowEvent::FlowError {
                error: error.to_string(),
            });
            RunOutcome::Failed {
                error: error.to_string(),
            }
        } else {
            match self.final_output() {
                Ok(text_output) => {
                    self.emit(FlowEvent::FinalOutput {
                        text_output: text_output.clone(),
                    });
                    self.emit(FlowEvent::FlowCompleted {
                        run_id: self.scope.run_id,
                        duration_ms: self.started.elapsed().as_millis() as u64,
                    });
                    RunOutcome::Completed {
                        final_output: text_output,
                    }
                }
                Err(error) => {
                    self.emit(FlowEvent::FlowError {
                        error: error.to_string(),
                    });
                    RunOutcome::Failed {
                        error: error.to_string(),
                    }
                }
            }
        };

        tracing::info!(run_id = %self.scope.run_id, outcome = ?outcome, "Run finished");

        RunReport {
            run_id: self.scope.run_id,
            outcome,
            states: self.states,
            duration_ms: self.started.elapsed().as_millis() as u64,
            outputs: self.context.into_outputs(),
        }
    }

    fn final_output(&self) -> Result<String, FlowError> {
        let completed = |id: &str| self.states.get(id) == Some(&ElementRunState::Completed);

        let source = match &self.output_element {
            Some(id) if completed(id) => id.clone(),
            Some(id) => return Err(FlowError::OutputMissing(id.clone())),
            None => self
                .graph
                .sinks()
                .into_iter()
                .rev()
                .find(|id| completed(id))
                .ok_or(FlowError::NoOutput)?,
        };

        let empty = HashMap::new();
        let outputs = self.context.outputs_of(&source).unwrap_or(&empty);
        Ok(text_output(outputs))
    }
}

/// Branch labels selected by a decision value
fn branch_labels(decision: Option<&Value>) -> Vec<String> {
    match decision {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(other) => vec![other.to_string()],
    }
}

/// Text the client sees as the run's final output
fn text_output(outputs: &HashMap<String, Value>) -> String {
    for port in ["text_output", "response"] {
        if let Some(Value::String(s)) = outputs.get(port) {
            return s.clone();
        }
    }
    if outputs.len() == 1 {
        if let Some(value) = outputs.values().next() {
            return match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
    }
    let ordered: BTreeMap<&String, &Value> = outputs.iter().collect();
    serde_json::to_string(&ordered).unwrap_or_default()
}
