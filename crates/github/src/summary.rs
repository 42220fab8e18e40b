use anyhow::{Context, Result};
use workflow_trace_core::models::{WorkflowEvent, WorkflowJob, WorkflowRun, WorkflowStep};

use crate::graphql::{
    into_check_suites, CheckConclusionState, CheckRun, CheckRunConnection, CheckStep, CheckSuite,
    ResponseData,
};

/// One check suite that survived filtering, with the workflow run metadata
/// flattened in.
#[derive(Debug, Clone)]
struct CheckSuiteSummary {
    run_id: u64,
    event: String,
    workflow_name: String,
    url: String,
    suite: CheckSuite,
}

/// Summarize the check suite tree into workflow runs, taking the jobs from
/// the nested check runs of the query itself.
pub fn summarize_checks(data: ResponseData, event: &str) -> Result<WorkflowEvent> {
    let mut workflow_runs = Vec::new();
    for summary in filtered_suites(data, event)? {
        let jobs = graphql_jobs(&summary)?;
        workflow_runs.push(build_run(summary, jobs));
    }
    Ok(build_event(workflow_runs))
}

/// A source of normalized jobs for a workflow run, keyed by run id.
/// Implemented by the REST jobs listing.
#[allow(async_fn_in_trait)]
pub trait WorkflowJobsProvider {
    async fn workflow_jobs(&self, run_id: u64) -> Result<Vec<WorkflowJob>>;
}

/// Summarize the check suite tree into workflow runs, fetching the jobs of
/// each run from `provider` instead of the nested check runs.
pub async fn summarize_checks_with_jobs<P: WorkflowJobsProvider>(
    data: ResponseData,
    event: &str,
    provider: &P,
) -> Result<WorkflowEvent> {
    let mut workflow_runs = Vec::new();
    for summary in filtered_suites(data, event)? {
        let jobs = provider
            .workflow_jobs(summary.run_id)
            .await
            .with_context(|| format!("Failed to fetch jobs of workflow run {}", summary.run_id))?;
        workflow_runs.push(build_run(summary, jobs));
    }
    Ok(build_event(workflow_runs))
}

/// Check suites belonging to workflow runs triggered by `event`.
///
/// Suites of other events are dropped so that reruns of unrelated workflows
/// on the same commit don't leak into the trace. Suites whose workflow run
/// has no database id are dropped as well, since there is no run to report.
fn filtered_suites(data: ResponseData, event: &str) -> Result<Vec<CheckSuiteSummary>> {
    let mut suites = into_check_suites(data)?;
    let edges = suites.edges.take().context("checkSuites has no edges")?;
    let mut summaries = Vec::with_capacity(edges.len());
    for edge in edges {
        let suite = edge.node.context("Check suite edge has no node")?;
        let workflow_run =
            suite.workflow_run.clone().context("Check suite has no workflow run")?;
        if workflow_run.event != event {
            tracing::debug!(
                "Dropping workflow {} triggered by {}",
                workflow_run.workflow.name,
                workflow_run.event
            );
            continue;
        }
        let Some(run_id) = workflow_run.database_id else {
            tracing::debug!("Dropping workflow {} without a run id", workflow_run.workflow.name);
            continue;
        };
        summaries.push(CheckSuiteSummary {
            run_id,
            event: workflow_run.event,
            workflow_name: workflow_run.workflow.name,
            url: workflow_run.url,
            suite,
        });
    }
    Ok(summaries)
}

fn graphql_jobs(summary: &CheckSuiteSummary) -> Result<Vec<WorkflowJob>> {
    let check_runs: &CheckRunConnection =
        summary.suite.check_runs.as_ref().context("Check suite has no check runs")?;
    let edges = check_runs.edges.as_ref().context("checkRuns has no edges")?;
    let mut jobs = Vec::with_capacity(edges.len());
    for edge in edges {
        let run = edge.node.as_ref().context("Check run edge has no node")?;
        if let Some(job) = graphql_job(run) {
            jobs.push(job);
        }
    }
    Ok(jobs)
}

/// A check run mapped to a job, or `None` when it carries no usable time
/// range. Skipped jobs and jobs that never ran have nothing to report.
fn graphql_job(run: &CheckRun) -> Option<WorkflowJob> {
    if run.conclusion == Some(CheckConclusionState::Skipped) {
        return None;
    }
    let (Some(started_at), Some(completed_at)) = (run.started_at, run.completed_at) else {
        tracing::debug!("Dropping job {} without a time range", run.name);
        return None;
    };
    let steps = run
        .steps
        .as_ref()
        .and_then(|steps| steps.nodes.as_ref())
        .map(|nodes| nodes.iter().filter_map(graphql_step).collect())
        .unwrap_or_default();
    Some(WorkflowJob {
        id: run.database_id,
        name: run.name.clone(),
        url: run.url.clone(),
        status: run.status.into(),
        conclusion: run.conclusion.map(Into::into),
        created_at: None,
        started_at,
        completed_at,
        runner_label: None,
        run_attempt: None,
        steps,
    })
}

fn graphql_step(step: &CheckStep) -> Option<WorkflowStep> {
    if step.conclusion == Some(CheckConclusionState::Skipped) {
        return None;
    }
    let (Some(started_at), Some(completed_at)) = (step.started_at, step.completed_at) else {
        return None;
    };
    Some(WorkflowStep {
        name: step.name.clone(),
        status: step.status.into(),
        conclusion: step.conclusion.map(Into::into),
        started_at,
        completed_at,
    })
}

/// A run whose jobs were all excluded is kept with an open time range, so
/// the trace still shows that the workflow ran.
fn build_run(summary: CheckSuiteSummary, jobs: Vec<WorkflowJob>) -> WorkflowRun {
    let completed_at = jobs.iter().map(|job| job.completed_at).max();
    WorkflowRun {
        id: summary.run_id,
        event: summary.event,
        workflow_name: summary.workflow_name,
        url: summary.url,
        status: summary.suite.status.into(),
        conclusion: summary.suite.conclusion.map(Into::into),
        created_at: summary.suite.created_at,
        completed_at,
        jobs,
    }
}

fn build_event(workflow_runs: Vec<WorkflowRun>) -> WorkflowEvent {
    let started_at = workflow_runs.iter().map(|run| run.created_at).min();
    let completed_at = workflow_runs.iter().filter_map(|run| run.completed_at).max();
    WorkflowEvent { workflow_runs, started_at, completed_at }
}
