//! Reasoning loop: Think → Act → Observe over the registered capabilities.
//!
//! Sub-modules:
//!   - `planning`: plan-then-execute path for multi-step requests
//!   - `helpers`: prompts, reply parsing, history rendering
//!
//! The loop is strictly sequential within one run and always terminates: every Think
//! step counts against `max_iterations`, and a run that hits the limit ends with a
//! synthesized answer.

mod helpers;
mod planning;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::invoker::ToolInvoker;
use crate::llm::OracleClient;
use crate::task_planner::{AgentPlan, TaskPlanner};
use crate::types::{safe_truncate, AgentAction, AgentState, EventSink, RequestContext, SelectionResult};

use helpers::{
    fallback_answer, parse_step, react_prompt, synthesis_prompt, REACT_SYSTEM, SYNTHESIS_SYSTEM,
};

pub use helpers::FINAL_ANSWER;
pub(crate) use helpers::DIRECT_ANSWER_SYSTEM;

/// Capability name recorded for a Think step whose reply could not be parsed.
pub const INVALID_RESPONSE: &str = "invalid_response";

#[derive(Debug, Clone)]
pub struct ReactConfig {
    /// Think steps per run (per plan step on the planning path). At least 1.
    pub max_iterations: usize,
    pub enable_planning: bool,
    /// Observations longer than this are cut in prompts.
    pub observation_chars: usize,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            enable_planning: true,
            observation_chars: 800,
        }
    }
}

/// One executed plan step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStepRecord {
    pub index: usize,
    pub description: String,
    /// Context the step ran with (includes earlier results and the plan goal).
    pub context: RequestContext,
    pub result: String,
    /// `Finished`, or `Error` when the step's oracle call failed.
    pub state: AgentState,
}

/// Everything a reasoning run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactOutcome {
    pub answer: String,
    pub final_state: AgentState,
    pub actions: Vec<AgentAction>,
    /// Think steps performed, across all plan steps.
    pub iterations: usize,
    /// True when the answer came from a synthesis call rather than a final-answer action.
    pub synthesized: bool,
    pub plan: Option<AgentPlan>,
    pub step_records: Vec<PlanStepRecord>,
}

/// Current state plus the sink that observes transitions.
struct Tracker<'a> {
    state: AgentState,
    sink: &'a mut dyn EventSink,
}

impl<'a> Tracker<'a> {
    fn new(sink: &'a mut dyn EventSink) -> Self {
        Self {
            state: AgentState::Idle,
            sink,
        }
    }

    fn enter(&mut self, next: AgentState) {
        tracing::debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        self.sink.on_state(next);
    }
}

/// Result of one Think/Act/Observe run over a single task.
struct Episode {
    answer: String,
    state: AgentState,
    iterations: usize,
    synthesized: bool,
    actions: Vec<AgentAction>,
}

pub struct ReactLoop {
    invoker: Arc<ToolInvoker>,
    oracle: OracleClient,
    planner: Arc<TaskPlanner>,
    config: ReactConfig,
}

impl ReactLoop {
    pub fn new(
        invoker: Arc<ToolInvoker>,
        oracle: OracleClient,
        planner: Arc<TaskPlanner>,
        config: ReactConfig,
    ) -> Self {
        Self {
            invoker,
            oracle,
            planner,
            config,
        }
    }

    pub fn config(&self) -> &ReactConfig {
        &self.config
    }

    /// Plan first when the request looks multi-step (and planning is enabled).
    pub async fn run(
        &self,
        request: &str,
        ctx: &RequestContext,
        sink: &mut dyn EventSink,
    ) -> ReactOutcome {
        if self.config.enable_planning && self.planner.needs_planning(request) {
            self.run_planned(request, ctx, sink).await
        } else {
            self.run_simple(request, ctx, sink).await
        }
    }

    /// Single Think/Act/Observe run, no planning.
    pub async fn run_simple(
        &self,
        request: &str,
        ctx: &RequestContext,
        sink: &mut dyn EventSink,
    ) -> ReactOutcome {
        let mut tracker = Tracker::new(sink);
        let episode = self.run_episode(request, ctx, &mut tracker).await;
        ReactOutcome {
            answer: episode.answer,
            final_state: episode.state,
            actions: episode.actions,
            iterations: episode.iterations,
            synthesized: episode.synthesized,
            plan: None,
            step_records: Vec::new(),
        }
    }

    async fn run_episode(
        &self,
        task: &str,
        ctx: &RequestContext,
        tracker: &mut Tracker<'_>,
    ) -> Episode {
        let capabilities = self.invoker.registry().infos();
        let max_iterations = self.config.max_iterations.max(1);
        let mut history: Vec<AgentAction> = Vec::new();
        let mut iterations = 0;

        while iterations < max_iterations {
            iterations += 1;
            tracker.enter(AgentState::Thinking);

            let prompt = react_prompt(task, ctx, &capabilities, &history, self.config.observation_chars);
            let reply = match self.oracle.ask(REACT_SYSTEM, &prompt).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(error = %e, iteration = iterations, "Oracle failed during reasoning");
                    tracker.enter(AgentState::Error);
                    return Episode {
                        answer: fallback_answer(&history, &e.to_string()),
                        state: AgentState::Error,
                        iterations,
                        synthesized: false,
                        actions: history,
                    };
                }
            };

            let step = match parse_step(&reply) {
                Ok(step) => step,
                Err(e) => {
                    tracing::warn!(error = %e, iteration = iterations, "Unparsable reasoning step");
                    let mut action =
                        AgentAction::new(INVALID_RESPONSE, Value::Null, safe_truncate(&reply, 200));
                    let observation = e.to_fail_soft();
                    tracker.sink.on_observation(INVALID_RESPONSE, &observation);
                    action.record_result(observation);
                    history.push(action);
                    continue;
                }
            };

            tracker.sink.on_thought(&step.thought);
            if step.is_final() {
                tracker.enter(AgentState::Finished);
                return Episode {
                    answer: step.final_text(),
                    state: AgentState::Finished,
                    iterations,
                    synthesized: false,
                    actions: history,
                };
            }

            tracker.enter(AgentState::Acting);
            let args = if step.action_input.is_null() {
                Value::String(task.to_string())
            } else {
                step.action_input.clone()
            };
            let mut action = AgentAction::new(step.action.trim(), args.clone(), step.thought);
            tracker.sink.on_action(&action.capability, &args);
            let selection =
                SelectionResult::new(action.capability.clone(), 1.0, "reasoning loop").with_arguments(args);
            let observation = self.invoker.invoke(&selection, ctx).await;

            tracker.enter(AgentState::Observing);
            tracker.sink.on_observation(&action.capability, &observation);
            action.record_result(observation);
            history.push(action);
        }

        tracing::warn!("Reasoning loop reached max iterations ({})", max_iterations);
        let answer = self.synthesize(task, &history).await;
        tracker.enter(AgentState::Finished);
        Episode {
            answer,
            state: AgentState::Finished,
            iterations,
            synthesized: true,
            actions: history,
        }
    }

    /// Best-effort answer from the full history.
    async fn synthesize(&self, task: &str, history: &[AgentAction]) -> String {
        let prompt = synthesis_prompt(task, history, self.config.observation_chars);
        match self.oracle.ask(SYNTHESIS_SYSTEM, &prompt).await {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) => fallback_answer(history, "empty synthesis"),
            Err(e) => {
                tracing::warn!(error = %e, "Synthesis failed");
                fallback_answer(history, &e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ReactLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactLoop")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{client, invoker, sample_registry, ScriptedOracle};
    use crate::types::NoopEventSink;

    /// Records every event for assertions.
    #[derive(Default)]
    pub(super) struct RecordingSink {
        pub states: Vec<AgentState>,
        pub actions: Vec<String>,
        pub observations: Vec<String>,
        pub plan_progress: Vec<(usize, usize)>,
        pub plans: Vec<(String, Vec<String>)>,
    }

    impl EventSink for RecordingSink {
        fn on_state(&mut self, state: AgentState) {
            self.states.push(state);
        }
        fn on_action(&mut self, capability: &str, _args: &Value) {
            self.actions.push(capability.to_string());
        }
        fn on_observation(&mut self, _capability: &str, observation: &str) {
            self.observations.push(observation.to_string());
        }
        fn on_plan(&mut self, goal: &str, steps: &[String]) {
            self.plans.push((goal.to_string(), steps.to_vec()));
        }
        fn on_plan_progress(&mut self, cursor: usize, total: usize) {
            self.plan_progress.push((cursor, total));
        }
    }

    pub(super) fn react_loop(oracle: &Arc<ScriptedOracle>, max_iterations: usize) -> ReactLoop {
        ReactLoop::new(
            Arc::new(invoker(sample_registry())),
            client(oracle),
            Arc::new(TaskPlanner::new(Some(client(oracle)), 200)),
            ReactConfig {
                max_iterations,
                ..ReactConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_action_then_final_answer() {
        let oracle = Arc::new(ScriptedOracle::with_replies([
            r#"{"thought": "use math", "action": "calculator", "action_input": "2+2"}"#,
            r#"{"thought": "got it", "action": "final_answer", "answer": "2+2 is 4"}"#,
        ]));
        let react = react_loop(&oracle, 5);
        let mut sink = RecordingSink::default();
        let outcome = react.run("what is 2+2", &RequestContext::new(), &mut sink).await;

        assert_eq!(outcome.answer, "2+2 is 4");
        assert_eq!(outcome.final_state, AgentState::Finished);
        assert_eq!(outcome.iterations, 2);
        assert!(!outcome.synthesized);
        assert_eq!(outcome.actions.len(), 1);
        assert_eq!(outcome.actions[0].result.as_deref(), Some("4"));
        assert_eq!(
            sink.states,
            vec![
                AgentState::Thinking,
                AgentState::Acting,
                AgentState::Observing,
                AgentState::Thinking,
                AgentState::Finished
            ]
        );
        assert_eq!(sink.observations, vec!["4"]);
        // The second Think step sees the first observation.
        assert!(oracle.user_prompt(1).contains("Observation: 4"));
    }

    #[tokio::test]
    async fn test_max_iterations_forces_synthesis() {
        let action = r#"{"thought": "search more", "action": "web_search", "action_input": "rust"}"#;
        let oracle = Arc::new(ScriptedOracle::with_replies([
            action,
            action,
            action,
            "Rust is a systems programming language.",
        ]));
        let react = react_loop(&oracle, 3);
        let mut sink = RecordingSink::default();
        let outcome = react.run("tell me about rust", &RequestContext::new(), &mut sink).await;

        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.actions.len(), 3);
        assert!(outcome.actions.iter().all(|a| a.result.is_some()));
        assert!(outcome.synthesized);
        assert_eq!(outcome.final_state, AgentState::Finished);
        assert_eq!(outcome.answer, "Rust is a systems programming language.");
        assert_eq!(oracle.calls(), 4);
        assert_eq!(sink.actions.len(), 3);
    }

    #[tokio::test]
    async fn test_unparsable_step_consumes_iteration() {
        let oracle = Arc::new(ScriptedOracle::with_replies([
            "Let me think about this...",
            r#"{"thought": "ok", "action": "final_answer", "answer": "done"}"#,
        ]));
        let react = react_loop(&oracle, 3);
        let outcome = react.run("do it", &RequestContext::new(), &mut NoopEventSink).await;

        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.answer, "done");
        assert_eq!(outcome.actions[0].capability, INVALID_RESPONSE);
        assert!(outcome.actions[0]
            .result
            .as_deref()
            .unwrap()
            .starts_with("Error [OracleParseFailure]"));
    }

    #[tokio::test]
    async fn test_oracle_failure_ends_in_error_state() {
        let oracle = Arc::new(ScriptedOracle::with_replies([
            r#"{"thought": "weather", "action": "weather", "action_input": "Oslo"}"#,
        ]));
        let react = react_loop(&oracle, 5);
        let outcome = react.run("weather in oslo", &RequestContext::new(), &mut NoopEventSink).await;

        assert_eq!(outcome.final_state, AgentState::Error);
        assert!(outcome.answer.starts_with("sunny in Oslo"));
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn test_unknown_capability_becomes_observation() {
        let oracle = Arc::new(ScriptedOracle::with_replies([
            r#"{"thought": "x", "action": "teleporter", "action_input": {"to": "mars"}}"#,
            r#"{"thought": "y", "action": "final_answer", "answer": "cannot teleport"}"#,
        ]));
        let react = react_loop(&oracle, 5);
        let outcome = react.run("go to mars", &RequestContext::new(), &mut NoopEventSink).await;

        assert_eq!(outcome.answer, "cannot teleport");
        assert!(outcome.actions[0]
            .result
            .as_deref()
            .unwrap()
            .starts_with("Error [CapabilityNotRegistered]"));
        assert_eq!(outcome.actions[0].args, json!({"to": "mars"}));
    }
}
