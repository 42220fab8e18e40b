use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::Deserialize;
use workflow_trace_core::models::{CheckConclusion, CheckStatus, WorkflowJob, WorkflowStep};

use crate::summary::WorkflowJobsProvider;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowJobsPage {
    pub total_count: u64,
    pub jobs: Vec<WorkflowJobRecord>,
}

/// A job as returned by the workflow jobs listing. Unlike the check run
/// tree, this carries runner labels, the run attempt and `created_at`.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowJobRecord {
    pub id: u64,
    pub name: String,
    pub html_url: Option<String>,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub run_attempt: Option<u64>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub steps: Vec<WorkflowStepRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStepRecord {
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(serde::Serialize)]
struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    per_page: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
}

pub async fn list_workflow_jobs(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    run_id: u64,
) -> Result<Vec<WorkflowJobRecord>> {
    let route = format!("/repos/{owner}/{repo}/actions/runs/{run_id}/jobs");
    let mut page = 1;
    let mut response: WorkflowJobsPage = client
        .get(&route, Some(&PageParams { per_page: Some(100), page: Some(page) }))
        .await
        .with_context(|| format!("Failed to fetch jobs of workflow run {run_id}"))?;
    let mut jobs = response.jobs;
    while jobs.len() < response.total_count as usize {
        page += 1;
        response = client
            .get(&route, Some(&PageParams { per_page: Some(100), page: Some(page) }))
            .await
            .with_context(|| format!("Failed to fetch jobs of workflow run {run_id}"))?;
        if response.jobs.is_empty() {
            break;
        }
        jobs.extend(response.jobs);
    }
    tracing::info!("Fetched {} of {} jobs of workflow run {}", jobs.len(), response.total_count, run_id);
    Ok(jobs)
}

/// Map the listed jobs into the summary model, dropping jobs that carry no
/// usable time range or URL. Skipped jobs and steps have nothing to report.
pub fn normalize_jobs(records: Vec<WorkflowJobRecord>) -> Vec<WorkflowJob> {
    records.into_iter().filter_map(normalize_job).collect()
}

fn normalize_job(record: WorkflowJobRecord) -> Option<WorkflowJob> {
    if record.conclusion == Some(CheckConclusion::Skipped) {
        return None;
    }
    let (Some(started_at), Some(completed_at)) = (record.started_at, record.completed_at) else {
        tracing::debug!("Dropping job {} without a time range", record.name);
        return None;
    };
    let Some(url) = record.html_url else {
        tracing::debug!("Dropping job {} without a URL", record.name);
        return None;
    };
    Some(WorkflowJob {
        id: Some(record.id),
        name: record.name,
        url,
        status: record.status,
        conclusion: record.conclusion,
        created_at: record.created_at,
        started_at,
        completed_at,
        runner_label: record.labels.into_iter().next(),
        run_attempt: record.run_attempt,
        steps: record.steps.into_iter().filter_map(normalize_step).collect(),
    })
}

fn normalize_step(record: WorkflowStepRecord) -> Option<WorkflowStep> {
    if record.conclusion == Some(CheckConclusion::Skipped) {
        return None;
    }
    let (Some(started_at), Some(completed_at)) = (record.started_at, record.completed_at) else {
        return None;
    };
    Some(WorkflowStep {
        name: record.name,
        status: record.status,
        conclusion: record.conclusion,
        started_at,
        completed_at,
    })
}

/// Jobs provider backed by the workflow jobs listing of one repository.
pub struct RestWorkflowJobs {
    client: Octocrab,
    owner: String,
    repo: String,
}

impl RestWorkflowJobs {
    pub fn new(client: Octocrab, owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self { client, owner: owner.into(), repo: repo.into() }
    }
}

impl WorkflowJobsProvider for RestWorkflowJobs {
    async fn workflow_jobs(&self, run_id: u64) -> Result<Vec<WorkflowJob>> {
        let records = list_workflow_jobs(&self.client, &self.owner, &self.repo, run_id).await?;
        Ok(normalize_jobs(records))
    }
}
