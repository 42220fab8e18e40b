use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use graphql_client::{GraphQLQuery, QueryBody, Response};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use workflow_trace_core::models::{CheckConclusion, CheckStatus};

/// Lists the check suites attached to a commit, with nested check runs and
/// steps. Each connection is windowed by its own first/after pair so that any
/// level can be paginated independently by re-anchoring on the cursor of the
/// preceding sibling at the outer levels.
const LIST_CHECKS_QUERY: &str = r#"
query ListChecksQuery(
  $owner: String!
  $name: String!
  $oid: GitObjectID!
  $appId: Int!
  $firstCheckSuite: Int!
  $afterCheckSuite: String
  $firstCheckRun: Int!
  $afterCheckRun: String
  $firstCheckStep: Int!
  $afterCheckStep: String
) {
  rateLimit {
    cost
    remaining
  }
  repository(owner: $owner, name: $name) {
    object(oid: $oid) {
      __typename
      ... on Commit {
        checkSuites(filterBy: { appId: $appId }, first: $firstCheckSuite, after: $afterCheckSuite) {
          totalCount
          pageInfo {
            hasNextPage
            endCursor
          }
          edges {
            cursor
            node {
              workflowRun {
                databaseId
                event
                workflow {
                  name
                }
                url
              }
              status
              conclusion
              createdAt
              checkRuns(
                filterBy: { checkType: LATEST, appId: $appId }
                first: $firstCheckRun
                after: $afterCheckRun
              ) {
                totalCount
                pageInfo {
                  hasNextPage
                  endCursor
                }
                edges {
                  cursor
                  node {
                    databaseId
                    name
                    url
                    status
                    conclusion
                    startedAt
                    completedAt
                    steps(first: $firstCheckStep, after: $afterCheckStep) {
                      totalCount
                      pageInfo {
                        hasNextPage
                        endCursor
                      }
                      nodes {
                        name
                        status
                        conclusion
                        startedAt
                        completedAt
                      }
                    }
                  }
                }
              }
            }
          }
        }
      }
    }
  }
}
"#;

// The GitHub GraphQL schema is far too large to vendor for derive codegen,
// so the query types are implemented by hand against the selection above.
pub struct ListChecksQuery;

impl GraphQLQuery for ListChecksQuery {
    type Variables = Variables;
    type ResponseData = ResponseData;

    fn build_query(variables: Self::Variables) -> QueryBody<Self::Variables> {
        QueryBody { variables, query: LIST_CHECKS_QUERY, operation_name: "ListChecksQuery" }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Variables {
    pub owner: String,
    pub name: String,
    pub oid: String,
    pub app_id: i64,
    pub first_check_suite: i64,
    pub after_check_suite: Option<String>,
    pub first_check_run: i64,
    pub after_check_run: Option<String>,
    pub first_check_step: i64,
    pub after_check_step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub rate_limit: Option<RateLimit>,
    pub repository: Option<Repository>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimit {
    pub cost: i64,
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Repository {
    pub object: Option<GitObject>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "__typename")]
pub enum GitObject {
    Commit(Commit),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub check_suites: Option<CheckSuiteConnection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSuiteConnection {
    pub total_count: i64,
    pub page_info: PageInfo,
    pub edges: Option<Vec<CheckSuiteEdge>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckSuiteEdge {
    pub cursor: String,
    pub node: Option<CheckSuite>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSuite {
    pub workflow_run: Option<SuiteWorkflowRun>,
    pub status: CheckStatusState,
    pub conclusion: Option<CheckConclusionState>,
    pub created_at: DateTime<Utc>,
    pub check_runs: Option<CheckRunConnection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteWorkflowRun {
    pub database_id: Option<u64>,
    pub event: String,
    pub workflow: Workflow,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Workflow {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRunConnection {
    pub total_count: i64,
    pub page_info: PageInfo,
    pub edges: Option<Vec<CheckRunEdge>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckRunEdge {
    pub cursor: String,
    pub node: Option<CheckRun>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRun {
    pub database_id: Option<u64>,
    pub name: String,
    pub url: String,
    pub status: CheckStatusState,
    pub conclusion: Option<CheckConclusionState>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Option<CheckStepConnection>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStepConnection {
    pub total_count: i64,
    pub page_info: PageInfo,
    pub nodes: Option<Vec<CheckStep>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStep {
    pub name: String,
    pub status: CheckStatusState,
    pub conclusion: Option<CheckConclusionState>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatusState {
    Completed,
    InProgress,
    Pending,
    Queued,
    Requested,
    Waiting,
    #[serde(other)]
    Other,
}

impl From<CheckStatusState> for CheckStatus {
    fn from(value: CheckStatusState) -> Self {
        match value {
            CheckStatusState::Completed => CheckStatus::Completed,
            CheckStatusState::InProgress => CheckStatus::InProgress,
            CheckStatusState::Pending => CheckStatus::Pending,
            CheckStatusState::Queued => CheckStatus::Queued,
            CheckStatusState::Requested => CheckStatus::Requested,
            CheckStatusState::Waiting => CheckStatus::Waiting,
            CheckStatusState::Other => CheckStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckConclusionState {
    ActionRequired,
    Cancelled,
    Failure,
    Neutral,
    Skipped,
    Stale,
    StartupFailure,
    Success,
    TimedOut,
    #[serde(other)]
    Other,
}

impl From<CheckConclusionState> for CheckConclusion {
    fn from(value: CheckConclusionState) -> Self {
        match value {
            CheckConclusionState::ActionRequired => CheckConclusion::ActionRequired,
            CheckConclusionState::Cancelled => CheckConclusion::Cancelled,
            CheckConclusionState::Failure => CheckConclusion::Failure,
            CheckConclusionState::Neutral => CheckConclusion::Neutral,
            CheckConclusionState::Skipped => CheckConclusion::Skipped,
            CheckConclusionState::Stale => CheckConclusion::Stale,
            CheckConclusionState::StartupFailure => CheckConclusion::StartupFailure,
            CheckConclusionState::Success => CheckConclusion::Success,
            CheckConclusionState::TimedOut => CheckConclusion::TimedOut,
            CheckConclusionState::Other => CheckConclusion::Unknown,
        }
    }
}

async fn run_query<T: GraphQLQuery>(
    client: &Octocrab,
    variables: T::Variables,
) -> Result<T::ResponseData> {
    let query = T::build_query(variables);
    let response: Response<T::ResponseData> = client.graphql(&query).await?;
    if let Some(errors) = response.errors {
        let message = errors.into_iter().map(|error| error.message).collect::<Vec<_>>().join("\n");
        bail!("GraphQL query failed: {message}");
    }
    response.data.ok_or_else(|| anyhow!("No data returned from GraphQL query"))
}

/// Anything that can run the list checks query. Implemented by [`Octocrab`]
/// for production and by in-memory fakes in tests.
#[allow(async_fn_in_trait)]
pub trait ListChecksClient {
    async fn list_checks(&self, variables: Variables) -> Result<ResponseData>;
}

impl ListChecksClient for Octocrab {
    async fn list_checks(&self, variables: Variables) -> Result<ResponseData> {
        tracing::debug!("ListChecksQuery({variables:?})");
        let data = run_query::<ListChecksQuery>(self, variables).await?;
        if let Some(rate_limit) = &data.rate_limit {
            tracing::debug!("Rate limit: cost {}, remaining {}", rate_limit.cost, rate_limit.remaining);
        }
        Ok(data)
    }
}

/// Fetch the complete check suite tree for one commit.
///
/// The data source returns a single page per connection per call, at every
/// nesting level. This re-fetches until `hasNextPage` is false everywhere:
/// first the check suites, then the check runs of every suite, then the steps
/// of every check run (when the step page size is nonzero). Inner levels are
/// addressed by requesting exactly one item at each outer level, anchored
/// after the cursor of the preceding sibling, so that the target connection is
/// the first element of the response.
pub async fn fetch_list_checks<C: ListChecksClient>(
    client: &C,
    variables: Variables,
) -> Result<ResponseData> {
    let mut data = list_checks_checked(client, variables.clone()).await?;
    paginate_check_suites(client, &variables, &mut data).await?;
    if variables.first_check_run > 0 {
        paginate_check_runs(client, &variables, &mut data).await?;
        if variables.first_check_step > 0 {
            paginate_check_steps(client, &variables, &mut data).await?;
        }
    }
    Ok(data)
}

/// Every well-formed response carries the rate limit. Its absence means the
/// upstream schema or filter produced an unexpected shape.
async fn list_checks_checked<C: ListChecksClient>(
    client: &C,
    variables: Variables,
) -> Result<ResponseData> {
    let data = client.list_checks(variables).await?;
    if data.rate_limit.is_none() {
        bail!("Response has no rateLimit");
    }
    Ok(data)
}

async fn paginate_check_suites<C: ListChecksClient>(
    client: &C,
    variables: &Variables,
    data: &mut ResponseData,
) -> Result<()> {
    let mut after = variables.after_check_suite.clone();
    loop {
        let suites = check_suites_mut(data)?;
        let fetched = suite_edges_mut(suites)?.len();
        tracing::info!("Fetched {} of {} check suites", fetched, suites.total_count);
        if !suites.page_info.has_next_page {
            return Ok(());
        }
        let end_cursor = next_cursor(&suites.page_info, &after)?;
        let next = list_checks_checked(
            client,
            Variables { after_check_suite: Some(end_cursor.clone()), ..variables.clone() },
        )
        .await?;
        let mut next_suites = into_check_suites(next)?;
        let next_edges = next_suites.edges.take().context("checkSuites has no edges")?;
        let suites = check_suites_mut(data)?;
        suite_edges_mut(suites)?.extend(next_edges);
        suites.page_info = next_suites.page_info;
        suites.total_count = next_suites.total_count;
        after = Some(end_cursor);
    }
}

async fn paginate_check_runs<C: ListChecksClient>(
    client: &C,
    variables: &Variables,
    data: &mut ResponseData,
) -> Result<()> {
    for (index, anchor) in suite_anchors(variables, data)?.into_iter().enumerate() {
        let mut after = variables.after_check_run.clone();
        loop {
            let runs = check_runs_mut(data, index)?;
            let fetched = run_edges_mut(runs)?.len();
            tracing::info!("Fetched {} of {} check runs", fetched, runs.total_count);
            if !runs.page_info.has_next_page {
                break;
            }
            let end_cursor = next_cursor(&runs.page_info, &after)?;
            let next = list_checks_checked(
                client,
                Variables {
                    first_check_suite: 1,
                    after_check_suite: anchor.clone(),
                    after_check_run: Some(end_cursor.clone()),
                    ..variables.clone()
                },
            )
            .await?;
            let mut next_runs = into_first_check_runs(next, &anchor)?;
            let next_edges = next_runs.edges.take().context("checkRuns has no edges")?;
            let runs = check_runs_mut(data, index)?;
            run_edges_mut(runs)?.extend(next_edges);
            runs.page_info = next_runs.page_info;
            runs.total_count = next_runs.total_count;
            after = Some(end_cursor);
        }
    }
    Ok(())
}

async fn paginate_check_steps<C: ListChecksClient>(
    client: &C,
    variables: &Variables,
    data: &mut ResponseData,
) -> Result<()> {
    for (suite_index, suite_anchor) in suite_anchors(variables, data)?.into_iter().enumerate() {
        for (run_index, run_anchor) in
            run_anchors(variables, data, suite_index)?.into_iter().enumerate()
        {
            let mut after = variables.after_check_step.clone();
            loop {
                let steps = check_steps_mut(data, suite_index, run_index)?;
                let fetched = step_nodes_mut(steps)?.len();
                tracing::info!("Fetched {} of {} steps", fetched, steps.total_count);
                if !steps.page_info.has_next_page {
                    break;
                }
                let end_cursor = next_cursor(&steps.page_info, &after)?;
                let next = list_checks_checked(
                    client,
                    Variables {
                        first_check_suite: 1,
                        after_check_suite: suite_anchor.clone(),
                        first_check_run: 1,
                        after_check_run: run_anchor.clone(),
                        after_check_step: Some(end_cursor.clone()),
                        ..variables.clone()
                    },
                )
                .await?;
                let mut next_steps = into_first_check_steps(next, &suite_anchor, &run_anchor)?;
                let next_nodes = next_steps.nodes.take().context("steps has no nodes")?;
                let steps = check_steps_mut(data, suite_index, run_index)?;
                step_nodes_mut(steps)?.extend(next_nodes);
                steps.page_info = next_steps.page_info;
                steps.total_count = next_steps.total_count;
                after = Some(end_cursor);
            }
        }
    }
    Ok(())
}

/// The `afterCheckSuite` anchor for each known suite: the caller's original
/// cursor for the first suite, the preceding suite's cursor otherwise.
fn suite_anchors(variables: &Variables, data: &mut ResponseData) -> Result<Vec<Option<String>>> {
    let suites = check_suites_mut(data)?;
    let edges = suite_edges_mut(suites)?;
    let mut anchors = Vec::with_capacity(edges.len());
    for index in 0..edges.len() {
        if index == 0 {
            anchors.push(variables.after_check_suite.clone());
        } else {
            anchors.push(Some(edges[index - 1].cursor.clone()));
        }
    }
    Ok(anchors)
}

fn run_anchors(
    variables: &Variables,
    data: &mut ResponseData,
    suite_index: usize,
) -> Result<Vec<Option<String>>> {
    let runs = check_runs_mut(data, suite_index)?;
    let edges = run_edges_mut(runs)?;
    let mut anchors = Vec::with_capacity(edges.len());
    for index in 0..edges.len() {
        if index == 0 {
            anchors.push(variables.after_check_run.clone());
        } else {
            anchors.push(Some(edges[index - 1].cursor.clone()));
        }
    }
    Ok(anchors)
}

fn next_cursor(page_info: &PageInfo, after: &Option<String>) -> Result<String> {
    let Some(end_cursor) = page_info.end_cursor.clone() else {
        bail!("hasNextPage is true but endCursor is null");
    };
    if after.as_deref() == Some(end_cursor.as_str()) {
        bail!("Infinite loop detected: after cursor is the same as before");
    }
    Ok(end_cursor)
}

fn check_suites_mut(data: &mut ResponseData) -> Result<&mut CheckSuiteConnection> {
    let repository = data.repository.as_mut().context("Response has no repository")?;
    let object = repository.object.as_mut().context("Repository has no object for this oid")?;
    match object {
        GitObject::Commit(commit) => {
            commit.check_suites.as_mut().context("Commit has no checkSuites")
        }
        GitObject::Other => bail!("Repository object is not a commit"),
    }
}

pub(crate) fn into_check_suites(data: ResponseData) -> Result<CheckSuiteConnection> {
    let repository = data.repository.context("Response has no repository")?;
    let object = repository.object.context("Repository has no object for this oid")?;
    match object {
        GitObject::Commit(commit) => commit.check_suites.context("Commit has no checkSuites"),
        GitObject::Other => bail!("Repository object is not a commit"),
    }
}

fn into_first_check_runs(
    data: ResponseData,
    anchor: &Option<String>,
) -> Result<CheckRunConnection> {
    let mut suites = into_check_suites(data)?;
    let edges = suites.edges.take().context("checkSuites has no edges")?;
    let edge = edges
        .into_iter()
        .next()
        .with_context(|| format!("No check suite found after cursor {anchor:?}"))?;
    let node = edge.node.context("Check suite edge has no node")?;
    node.check_runs.context("Check suite has no checkRuns")
}

fn into_first_check_steps(
    data: ResponseData,
    suite_anchor: &Option<String>,
    run_anchor: &Option<String>,
) -> Result<CheckStepConnection> {
    let mut runs = into_first_check_runs(data, suite_anchor)?;
    let edges = runs.edges.take().context("checkRuns has no edges")?;
    let edge = edges
        .into_iter()
        .next()
        .with_context(|| format!("No check run found after cursor {run_anchor:?}"))?;
    let node = edge.node.context("Check run edge has no node")?;
    node.steps.context("Check run has no steps")
}

fn check_runs_mut(data: &mut ResponseData, index: usize) -> Result<&mut CheckRunConnection> {
    let suites = check_suites_mut(data)?;
    let edge = suite_edges_mut(suites)?
        .get_mut(index)
        .with_context(|| format!("Missing check suite at index {index}"))?;
    let node = edge.node.as_mut().context("Check suite edge has no node")?;
    node.check_runs.as_mut().context("Check suite has no checkRuns")
}

fn check_steps_mut(
    data: &mut ResponseData,
    suite_index: usize,
    run_index: usize,
) -> Result<&mut CheckStepConnection> {
    let runs = check_runs_mut(data, suite_index)?;
    let edge = run_edges_mut(runs)?
        .get_mut(run_index)
        .with_context(|| format!("Missing check run at index {run_index}"))?;
    let node = edge.node.as_mut().context("Check run edge has no node")?;
    node.steps.as_mut().context("Check run has no steps")
}

fn suite_edges_mut(suites: &mut CheckSuiteConnection) -> Result<&mut Vec<CheckSuiteEdge>> {
    suites.edges.as_mut().context("checkSuites has no edges")
}

fn run_edges_mut(runs: &mut CheckRunConnection) -> Result<&mut Vec<CheckRunEdge>> {
    runs.edges.as_mut().context("checkRuns has no edges")
}

fn step_nodes_mut(steps: &mut CheckStepConnection) -> Result<&mut Vec<CheckStep>> {
    steps.nodes.as_mut().context("steps has no nodes")
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::Mutex,
    };

    use super::*;

    /// Serves windowed pages from a synthetic suite/run/step tree, mimicking
    /// connection pagination at every level.
    struct FakeGitHub {
        suites: Vec<FakeSuite>,
        calls: Mutex<Vec<Variables>>,
    }

    struct FakeSuite {
        runs: usize,
        steps_per_run: usize,
    }

    impl FakeGitHub {
        fn new(suites: Vec<FakeSuite>) -> Self { Self { suites, calls: Mutex::new(Vec::new()) } }

        fn respond(&self, v: &Variables) -> ResponseData {
            let (start, end) =
                window(self.suites.len(), v.first_check_suite, &v.after_check_suite);
            let edges = (start..end).map(|i| self.suite_edge(i, v)).collect::<Vec<_>>();
            let end_cursor = edges.last().map(|edge| edge.cursor.clone());
            ResponseData {
                rate_limit: Some(RateLimit { cost: 1, remaining: 5000 }),
                repository: Some(Repository {
                    object: Some(GitObject::Commit(Commit {
                        check_suites: Some(CheckSuiteConnection {
                            total_count: self.suites.len() as i64,
                            page_info: PageInfo {
                                has_next_page: end < self.suites.len(),
                                end_cursor,
                            },
                            edges: Some(edges),
                        }),
                    })),
                }),
            }
        }

        fn suite_edge(&self, index: usize, v: &Variables) -> CheckSuiteEdge {
            let suite = &self.suites[index];
            let (start, end) = window(suite.runs, v.first_check_run, &v.after_check_run);
            let edges =
                (start..end).map(|j| self.run_edge(index, j, v)).collect::<Vec<_>>();
            let end_cursor = edges.last().map(|edge| edge.cursor.clone());
            CheckSuiteEdge {
                cursor: format!("suite-{index}"),
                node: Some(CheckSuite {
                    workflow_run: Some(SuiteWorkflowRun {
                        database_id: Some(index as u64 + 1),
                        event: "push".to_owned(),
                        workflow: Workflow { name: format!("wf-{index}") },
                        url: format!("https://github.com/o/r/actions/runs/{index}"),
                    }),
                    status: CheckStatusState::Completed,
                    conclusion: Some(CheckConclusionState::Success),
                    created_at: timestamp("2021-08-04T00:00:00Z"),
                    check_runs: Some(CheckRunConnection {
                        total_count: suite.runs as i64,
                        page_info: PageInfo { has_next_page: end < suite.runs, end_cursor },
                        edges: Some(edges),
                    }),
                }),
            }
        }

        fn run_edge(&self, suite_index: usize, run_index: usize, v: &Variables) -> CheckRunEdge {
            let steps = self.suites[suite_index].steps_per_run;
            let (start, end) = window(steps, v.first_check_step, &v.after_check_step);
            let nodes = (start..end)
                .map(|k| CheckStep {
                    name: format!("step-{suite_index}-{run_index}-{k}"),
                    status: CheckStatusState::Completed,
                    conclusion: Some(CheckConclusionState::Success),
                    started_at: Some(timestamp("2021-08-04T00:01:00Z")),
                    completed_at: Some(timestamp("2021-08-04T00:02:00Z")),
                })
                .collect::<Vec<_>>();
            let end_cursor =
                (start < end).then(|| format!("step-{suite_index}-{run_index}-{}", end - 1));
            CheckRunEdge {
                cursor: format!("run-{suite_index}-{run_index}"),
                node: Some(CheckRun {
                    database_id: Some(1000 + run_index as u64),
                    name: format!("run-{suite_index}-{run_index}"),
                    url: format!("https://github.com/o/r/actions/runs/{suite_index}/job/{run_index}"),
                    status: CheckStatusState::Completed,
                    conclusion: Some(CheckConclusionState::Success),
                    started_at: Some(timestamp("2021-08-04T00:01:00Z")),
                    completed_at: Some(timestamp("2021-08-04T00:02:00Z")),
                    steps: Some(CheckStepConnection {
                        total_count: steps as i64,
                        page_info: PageInfo { has_next_page: end < steps, end_cursor },
                        nodes: Some(nodes),
                    }),
                }),
            }
        }
    }

    impl ListChecksClient for FakeGitHub {
        async fn list_checks(&self, variables: Variables) -> Result<ResponseData> {
            self.calls.lock().unwrap().push(variables.clone());
            Ok(self.respond(&variables))
        }
    }

    /// A page window: items after the cursor, at most `first` of them.
    fn window(len: usize, first: i64, after: &Option<String>) -> (usize, usize) {
        let start = match after {
            Some(cursor) => {
                cursor.rsplit('-').next().unwrap().parse::<usize>().unwrap() + 1
            }
            None => 0,
        };
        let start = start.min(len);
        (start, (start + first.max(0) as usize).min(len))
    }

    fn timestamp(s: &str) -> DateTime<Utc> { s.parse().unwrap() }

    fn variables(first_suite: i64, first_run: i64, first_step: i64) -> Variables {
        Variables {
            owner: "octocat".to_owned(),
            name: "example".to_owned(),
            oid: "commit-sha".to_owned(),
            app_id: 15368,
            first_check_suite: first_suite,
            after_check_suite: None,
            first_check_run: first_run,
            after_check_run: None,
            first_check_step: first_step,
            after_check_step: None,
        }
    }

    struct ScriptedClient {
        responses: Mutex<VecDeque<ResponseData>>,
    }

    impl ListChecksClient for ScriptedClient {
        async fn list_checks(&self, _variables: Variables) -> Result<ResponseData> {
            self.responses.lock().unwrap().pop_front().context("No more scripted responses")
        }
    }

    fn commit_response(suites: CheckSuiteConnection) -> ResponseData {
        ResponseData {
            rate_limit: Some(RateLimit { cost: 1, remaining: 5000 }),
            repository: Some(Repository {
                object: Some(GitObject::Commit(Commit { check_suites: Some(suites) })),
            }),
        }
    }

    #[tokio::test]
    async fn test_single_page() {
        let github = FakeGitHub::new(vec![
            FakeSuite { runs: 1, steps_per_run: 1 },
            FakeSuite { runs: 2, steps_per_run: 1 },
        ]);
        let data = fetch_list_checks(&github, variables(10, 10, 10)).await.unwrap();
        assert_eq!(github.calls.lock().unwrap().len(), 1);
        let suites = into_check_suites(data).unwrap();
        assert!(!suites.page_info.has_next_page);
        assert_eq!(suites.edges.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_paginates_every_level() {
        let github = FakeGitHub::new(vec![
            FakeSuite { runs: 3, steps_per_run: 3 },
            FakeSuite { runs: 1, steps_per_run: 3 },
            FakeSuite { runs: 4, steps_per_run: 3 },
        ]);
        let data = fetch_list_checks(&github, variables(2, 2, 2)).await.unwrap();

        let suites = into_check_suites(data).unwrap();
        assert!(!suites.page_info.has_next_page);
        assert_eq!(suites.total_count, 3);
        let edges = suites.edges.unwrap();
        assert_eq!(edges.len(), 3);
        for (i, (edge, expected_runs)) in edges.iter().zip([3usize, 1, 4]).enumerate() {
            let runs = edge.node.as_ref().unwrap().check_runs.as_ref().unwrap();
            assert!(!runs.page_info.has_next_page);
            assert_eq!(runs.total_count, expected_runs as i64);
            let run_edges = runs.edges.as_ref().unwrap();
            assert_eq!(run_edges.len(), expected_runs);
            for (j, run_edge) in run_edges.iter().enumerate() {
                let run = run_edge.node.as_ref().unwrap();
                assert_eq!(run.name, format!("run-{i}-{j}"));
                let steps = run.steps.as_ref().unwrap();
                assert!(!steps.page_info.has_next_page);
                let nodes = steps.nodes.as_ref().unwrap();
                assert_eq!(nodes.len(), 3);
                assert_eq!(nodes[2].name, format!("step-{i}-{j}-2"));
            }
        }

        // 1 initial + 1 suite page + 2 run pages + 8 step pages
        let calls = github.calls.lock().unwrap();
        assert_eq!(calls.len(), 12);
        // Check run pagination re-anchors after the preceding suite and
        // requests exactly one suite.
        assert!(calls.iter().any(|call| {
            call.first_check_suite == 1
                && call.after_check_suite.as_deref() == Some("suite-1")
                && call.after_check_run.as_deref() == Some("run-2-1")
        }));
        // Step pagination re-anchors both outer levels.
        assert!(calls.iter().any(|call| {
            call.first_check_suite == 1
                && call.first_check_run == 1
                && call.after_check_suite.as_deref() == Some("suite-0")
                && call.after_check_step.is_some()
        }));
    }

    #[tokio::test]
    async fn test_zero_step_page_size_skips_steps() {
        let github = FakeGitHub::new(vec![FakeSuite { runs: 1, steps_per_run: 3 }]);
        let data = fetch_list_checks(&github, variables(10, 10, 0)).await.unwrap();
        assert_eq!(github.calls.lock().unwrap().len(), 1);
        let suites = into_check_suites(data).unwrap();
        let edges = suites.edges.unwrap();
        let runs = edges[0].node.as_ref().unwrap().check_runs.as_ref().unwrap();
        let steps = runs.edges.as_ref().unwrap()[0].node.as_ref().unwrap().steps.as_ref().unwrap();
        // The step level was not descended into.
        assert!(steps.page_info.has_next_page);
        assert!(steps.nodes.as_ref().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_a_commit_is_fatal() {
        let client = ScriptedClient {
            responses: Mutex::new(VecDeque::from([ResponseData {
                rate_limit: Some(RateLimit { cost: 1, remaining: 5000 }),
                repository: Some(Repository { object: Some(GitObject::Other) }),
            }])),
        };
        let err = fetch_list_checks(&client, variables(10, 10, 0)).await.unwrap_err();
        assert!(err.to_string().contains("not a commit"), "{err}");
    }

    #[tokio::test]
    async fn test_missing_suite_after_cursor_is_fatal() {
        let first = commit_response(CheckSuiteConnection {
            total_count: 1,
            page_info: PageInfo { has_next_page: false, end_cursor: Some("suite-0".to_owned()) },
            edges: Some(vec![CheckSuiteEdge {
                cursor: "suite-0".to_owned(),
                node: Some(CheckSuite {
                    workflow_run: Some(SuiteWorkflowRun {
                        database_id: Some(1),
                        event: "push".to_owned(),
                        workflow: Workflow { name: "CI".to_owned() },
                        url: "https://github.com/o/r/actions/runs/1".to_owned(),
                    }),
                    status: CheckStatusState::Completed,
                    conclusion: Some(CheckConclusionState::Success),
                    created_at: timestamp("2021-08-04T00:00:00Z"),
                    check_runs: Some(CheckRunConnection {
                        total_count: 2,
                        page_info: PageInfo {
                            has_next_page: true,
                            end_cursor: Some("run-0-0".to_owned()),
                        },
                        edges: Some(vec![]),
                    }),
                }),
            }]),
        });
        // The continuation response no longer contains the target suite.
        let second = commit_response(CheckSuiteConnection {
            total_count: 0,
            page_info: PageInfo { has_next_page: false, end_cursor: None },
            edges: Some(vec![]),
        });
        let client = ScriptedClient { responses: Mutex::new(VecDeque::from([first, second])) };
        let err = fetch_list_checks(&client, variables(10, 10, 0)).await.unwrap_err();
        assert!(err.to_string().contains("No check suite found after cursor"), "{err}");
    }

    #[tokio::test]
    async fn test_missing_rate_limit_is_fatal() {
        let mut response = commit_response(CheckSuiteConnection {
            total_count: 0,
            page_info: PageInfo { has_next_page: false, end_cursor: None },
            edges: Some(vec![]),
        });
        response.rate_limit = None;
        let client = ScriptedClient { responses: Mutex::new(VecDeque::from([response])) };
        let err = fetch_list_checks(&client, variables(10, 10, 0)).await.unwrap_err();
        assert!(err.to_string().contains("no rateLimit"), "{err}");
    }

    #[tokio::test]
    async fn test_null_end_cursor_is_fatal() {
        let page = CheckSuiteConnection {
            total_count: 2,
            page_info: PageInfo { has_next_page: true, end_cursor: None },
            edges: Some(vec![]),
        };
        let client =
            ScriptedClient { responses: Mutex::new(VecDeque::from([commit_response(page)])) };
        let err = fetch_list_checks(&client, variables(10, 0, 0)).await.unwrap_err();
        assert!(err.to_string().contains("endCursor is null"), "{err}");
    }

    #[tokio::test]
    async fn test_stuck_cursor_is_fatal() {
        let page = CheckSuiteConnection {
            total_count: 2,
            page_info: PageInfo { has_next_page: true, end_cursor: Some("suite-0".to_owned()) },
            edges: Some(vec![]),
        };
        let client = ScriptedClient {
            responses: Mutex::new(VecDeque::from([
                commit_response(page.clone()),
                commit_response(page),
            ])),
        };
        let err = fetch_list_checks(&client, variables(10, 0, 0)).await.unwrap_err();
        assert!(err.to_string().contains("Infinite loop detected"), "{err}");
    }
}
