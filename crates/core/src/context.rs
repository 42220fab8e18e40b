use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// The commit and event this invocation reports on, resolved from the
/// GitHub Actions environment.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct RunContext {
    pub owner: String,
    pub repo: String,
    /// The event that triggered the target workflows, e.g. `push`.
    pub event: String,
    pub ref_name: String,
    pub sha: String,
    pub pull_request_number: Option<u64>,
    pub actor: String,
    pub server_url: String,
    pub run_attempt: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPayload {
    pub workflow_run: Option<WorkflowRunPayload>,
    pub pull_request: Option<PullRequestPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunPayload {
    pub event: String,
    pub head_branch: String,
    pub head_sha: String,
    #[serde(default)]
    pub pull_requests: Vec<PullRequestRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestPayload {
    pub number: u64,
    pub head: PullRequestHead,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestHead {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

/// Target coordinates after applying the event payload overrides.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Target {
    pub event: String,
    pub ref_name: String,
    pub sha: String,
    pub pull_request_number: Option<u64>,
}

impl RunContext {
    /// Read the run context from the GitHub Actions environment.
    pub fn from_env() -> Result<Self> {
        let repository = env_var("GITHUB_REPOSITORY")?;
        let (owner, repo) = repository
            .split_once('/')
            .with_context(|| format!("Invalid GITHUB_REPOSITORY: {repository}"))?;
        let event_name = env_var("GITHUB_EVENT_NAME")?;
        let payload = read_event_payload()?;
        let target = resolve_target(
            &event_name,
            env_var("GITHUB_REF")?,
            env_var("GITHUB_SHA")?,
            payload.as_ref(),
        );
        Ok(Self {
            owner: owner.to_owned(),
            repo: repo.to_owned(),
            event: target.event,
            ref_name: target.ref_name,
            sha: target.sha,
            pull_request_number: target.pull_request_number,
            actor: env_var("GITHUB_ACTOR")?,
            server_url: std::env::var("GITHUB_SERVER_URL")
                .unwrap_or_else(|_| "https://github.com".to_owned()),
            run_attempt: std::env::var("GITHUB_RUN_ATTEMPT").ok().and_then(|v| v.parse().ok()),
        })
    }

    pub fn repository(&self) -> String { format!("{}/{}", self.owner, self.repo) }

    /// Hostname of the GitHub server, used as the `host.name` resource attribute.
    pub fn server_hostname(&self) -> Option<String> {
        match Url::parse(&self.server_url) {
            Ok(url) => url.host_str().map(str::to_owned),
            Err(e) => {
                tracing::warn!("Invalid GITHUB_SERVER_URL: {}: {}", self.server_url, e);
                None
            }
        }
    }

    /// Environment name for the trace resource: `pr-{n}` for pull requests,
    /// otherwise the ref with the `refs/heads/` or `refs/tags/` prefix stripped.
    pub fn environment_name(&self) -> String {
        if let Some(number) = self.pull_request_number {
            return format!("pr-{number}");
        }
        self.ref_name
            .strip_prefix("refs/heads/")
            .or_else(|| self.ref_name.strip_prefix("refs/tags/"))
            .unwrap_or(&self.ref_name)
            .to_owned()
    }

    /// URL of the pull request or branch this event ran on.
    pub fn event_url(&self) -> String {
        if let Some(number) = self.pull_request_number {
            return format!("{}/{}/pull/{}", self.server_url, self.repository(), number);
        }
        format!("{}/{}/tree/{}", self.server_url, self.repository(), self.ref_name)
    }
}

/// Resolve the target event, ref and sha.
///
/// On a `workflow_run` event, the context must point at the workflow run that
/// triggered this one. On a `pull_request` event, the head sha must be used
/// instead of the merge commit sha, because checks are attached to the head.
pub fn resolve_target(
    event_name: &str,
    ref_name: String,
    sha: String,
    payload: Option<&EventPayload>,
) -> Target {
    if event_name == "workflow_run" {
        if let Some(workflow_run) = payload.and_then(|p| p.workflow_run.as_ref()) {
            return Target {
                event: workflow_run.event.clone(),
                ref_name: workflow_run.head_branch.clone(),
                sha: workflow_run.head_sha.clone(),
                pull_request_number: workflow_run.pull_requests.first().map(|pr| pr.number),
            };
        }
    }
    if event_name == "pull_request" {
        if let Some(pull_request) = payload.and_then(|p| p.pull_request.as_ref()) {
            return Target {
                event: event_name.to_owned(),
                ref_name: pull_request.head.ref_name.clone(),
                sha: pull_request.head.sha.clone(),
                pull_request_number: Some(pull_request.number),
            };
        }
    }
    Target { event: event_name.to_owned(), ref_name, sha, pull_request_number: None }
}

fn read_event_payload() -> Result<Option<EventPayload>> {
    let Ok(path) = std::env::var("GITHUB_EVENT_PATH") else {
        return Ok(None);
    };
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read event payload {path}"))?;
    let payload = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse event payload {path}"))?;
    Ok(Some(payload))
}

fn env_var(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} is not set"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_target_push() {
        let target = resolve_target(
            "push",
            "refs/heads/main".to_owned(),
            "commit-sha".to_owned(),
            Some(&EventPayload::default()),
        );
        assert_eq!(target, Target {
            event: "push".to_owned(),
            ref_name: "refs/heads/main".to_owned(),
            sha: "commit-sha".to_owned(),
            pull_request_number: None,
        });
    }

    #[test]
    fn test_resolve_target_workflow_run() {
        let payload = EventPayload {
            workflow_run: Some(WorkflowRunPayload {
                event: "pull_request".to_owned(),
                head_branch: "topic".to_owned(),
                head_sha: "head-sha".to_owned(),
                pull_requests: vec![PullRequestRef { number: 17 }],
            }),
            pull_request: None,
        };
        let target = resolve_target(
            "workflow_run",
            "refs/heads/main".to_owned(),
            "merge-sha".to_owned(),
            Some(&payload),
        );
        assert_eq!(target, Target {
            event: "pull_request".to_owned(),
            ref_name: "topic".to_owned(),
            sha: "head-sha".to_owned(),
            pull_request_number: Some(17),
        });
    }

    #[test]
    fn test_resolve_target_pull_request() {
        let payload = EventPayload {
            workflow_run: None,
            pull_request: Some(PullRequestPayload {
                number: 4,
                head: PullRequestHead { ref_name: "topic".to_owned(), sha: "head-sha".to_owned() },
            }),
        };
        let target = resolve_target(
            "pull_request",
            "refs/pull/4/merge".to_owned(),
            "merge-sha".to_owned(),
            Some(&payload),
        );
        assert_eq!(target, Target {
            event: "pull_request".to_owned(),
            ref_name: "topic".to_owned(),
            sha: "head-sha".to_owned(),
            pull_request_number: Some(4),
        });
    }

    #[test]
    fn test_environment_name() {
        let mut context = RunContext {
            owner: "octocat".to_owned(),
            repo: "example".to_owned(),
            event: "push".to_owned(),
            ref_name: "refs/heads/main".to_owned(),
            sha: "commit-sha".to_owned(),
            pull_request_number: None,
            actor: "octocat".to_owned(),
            server_url: "https://github.com".to_owned(),
            run_attempt: Some(1),
        };
        assert_eq!(context.environment_name(), "main");
        assert_eq!(context.event_url(), "https://github.com/octocat/example/tree/refs/heads/main");
        context.pull_request_number = Some(100);
        assert_eq!(context.environment_name(), "pr-100");
        assert_eq!(context.event_url(), "https://github.com/octocat/example/pull/100");
    }
}
