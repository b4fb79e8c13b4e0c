//! Plan-then-execute: build a plan, run a reasoning episode per step, then combine.

use serde_json::json;

use super::helpers::{plan_synthesis_prompt, SYNTHESIS_SYSTEM};
use super::{PlanStepRecord, ReactLoop, ReactOutcome, Tracker};
use crate::task_planner::AgentPlan;
use crate::types::{AgentState, EventSink, RequestContext};

impl ReactLoop {
    /// Steps run strictly in plan order; step N sees the results of steps 0..N
    /// under `previous_results` in its context. A step that ends in `Error` does not stop
    /// the plan, but the run's final state is `Error`.
    pub async fn run_planned(
        &self,
        request: &str,
        ctx: &RequestContext,
        sink: &mut dyn EventSink,
    ) -> ReactOutcome {
        let mut tracker = Tracker::new(sink);
        tracker.enter(AgentState::Planning);

        let capabilities = self.invoker.registry().infos();
        let mut plan = match self.planner.build_plan(request, ctx, &capabilities).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(error = %e, "Planning failed, running the request as a single step");
                AgentPlan::single_step(request)
            }
        };
        tracker.sink.on_plan(&plan.goal, &plan.steps);

        let mut actions = Vec::new();
        let mut records = Vec::new();
        let mut iterations = 0;

        while let Some(step) = plan.current_step().map(str::to_string) {
            tracker.enter(AgentState::Executing);
            let step_ctx = ctx
                .clone()
                .with(RequestContext::PREVIOUS_RESULTS, json!(plan.completed()))
                .with(RequestContext::PLAN_GOAL, plan.goal.clone());

            tracing::info!(step = plan.cursor() + 1, total = plan.len(), "Executing plan step: {}", step);
            let episode = self.run_episode(&step, &step_ctx, &mut tracker).await;
            iterations += episode.iterations;
            actions.extend(episode.actions);
            records.push(PlanStepRecord {
                index: plan.cursor(),
                description: step,
                context: step_ctx,
                result: episode.answer.clone(),
                state: episode.state,
            });

            plan.advance(episode.answer);
            tracker.sink.on_plan_progress(plan.cursor(), plan.len());
        }

        let answer = self.synthesize_plan(&plan).await;
        let failed: Vec<usize> = records
            .iter()
            .filter(|r| r.state == AgentState::Error)
            .map(|r| r.index)
            .collect();
        let final_state = if failed.is_empty() {
            AgentState::Finished
        } else {
            tracing::warn!(failed_steps = ?failed, "Plan finished with failed steps");
            AgentState::Error
        };
        tracker.enter(final_state);
        ReactOutcome {
            answer,
            final_state,
            actions,
            iterations,
            synthesized: true,
            plan: Some(plan),
            step_records: records,
        }
    }

    /// One answer from all step results; joined results when the oracle fails.
    async fn synthesize_plan(&self, plan: &AgentPlan) -> String {
        let prompt = plan_synthesis_prompt(&plan.goal, &plan.steps, plan.completed());
        match self.oracle.ask(SYNTHESIS_SYSTEM, &prompt).await {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) => plan.completed().join("\n\n"),
            Err(e) => {
                tracing::warn!(error = %e, "Plan synthesis failed");
                plan.completed().join("\n\n")
            }
        }
    }
}
