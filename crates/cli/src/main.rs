use anyhow::{Context, Result};
use argp::FromArgs;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};
use workflow_trace_core::{
    config::{JobsSource, PageSizes},
    context::RunContext,
};
use workflow_trace_github::{
    create_client,
    graphql::{fetch_list_checks, Variables},
    jobs::RestWorkflowJobs,
    summary::{summarize_checks, summarize_checks_with_jobs},
    GITHUB_ACTIONS_APP_ID,
};
use workflow_trace_otel::ExporterConfig;

#[derive(FromArgs, Debug)]
/// Fetch the GitHub Actions runs for a commit and export them as
/// OpenTelemetry spans.
struct Args {
    #[argp(option)]
    /// commit sha to report on (defaults to the sha of the current event)
    sha: Option<String>,
    #[argp(option)]
    /// event to filter workflow runs by (defaults to the current event)
    event: Option<String>,
    #[argp(option, default = "100")]
    /// page size for check suites
    check_suites_page_size: u32,
    #[argp(option, default = "100")]
    /// page size for check runs
    check_runs_page_size: u32,
    #[argp(option, default = "0")]
    /// page size for job steps, 0 to skip fetching steps
    check_steps_page_size: u32,
    #[argp(option, default = "JobsSource::Graphql", from_str_fn(jobs_source))]
    /// where to fetch jobs from: graphql or rest
    jobs_source: JobsSource,
    #[argp(switch)]
    /// send spans over OTLP instead of printing them to stdout
    otlp: bool,
    #[argp(option)]
    /// OTLP endpoint, overriding OTEL_EXPORTER_OTLP_ENDPOINT
    otlp_endpoint: Option<String>,
}

// For argp::FromArgs
fn jobs_source(value: &str) -> Result<JobsSource, String> {
    value.parse().map_err(|()| {
        let variants =
            JobsSource::variants().iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ");
        format!("expected one of: {variants}")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();
    let args: Args = argp::parse_args_or_exit(argp::DEFAULT);
    run(args).await
}

async fn run(args: Args) -> Result<()> {
    let mut context = RunContext::from_env()?;
    if let Some(sha) = args.sha {
        context.sha = sha;
    }
    if let Some(event) = args.event {
        context.event = event;
    }
    tracing::info!(
        "Reporting on {} commit {} ({} event)",
        context.repository(),
        context.sha,
        context.event
    );

    let token = std::env::var("GITHUB_TOKEN").context("GITHUB_TOKEN is not set")?;
    let client = create_client(token)?;

    let page_sizes = PageSizes {
        check_suites: args.check_suites_page_size,
        check_runs: args.check_runs_page_size,
        check_steps: args.check_steps_page_size,
    };
    let variables = Variables {
        owner: context.owner.clone(),
        name: context.repo.clone(),
        oid: context.sha.clone(),
        app_id: GITHUB_ACTIONS_APP_ID,
        first_check_suite: page_sizes.check_suites as i64,
        after_check_suite: None,
        first_check_run: page_sizes.check_runs as i64,
        after_check_run: None,
        first_check_step: page_sizes.check_steps as i64,
        after_check_step: None,
    };
    let data = fetch_list_checks(&client, variables)
        .await
        .with_context(|| format!("Failed to fetch checks of commit {}", context.sha))?;

    let event = match args.jobs_source {
        JobsSource::Graphql => summarize_checks(data, &context.event)?,
        JobsSource::Rest => {
            let provider =
                RestWorkflowJobs::new(client.clone(), &context.owner, &context.repo);
            summarize_checks_with_jobs(data, &context.event, &provider).await?
        }
    };
    tracing::info!("Workflow event:\n{}", serde_json::to_string_pretty(&event)?);

    let exporter_config = ExporterConfig { otlp: args.otlp, endpoint: args.otlp_endpoint };
    let provider = workflow_trace_otel::init_tracer_provider(&exporter_config, &context)?;
    workflow_trace_otel::export_event(&provider, &event, &context);
    // Shutdown blocks on the batch exporter, keep it off the async runtime.
    tokio::task::spawn_blocking(move || workflow_trace_otel::shutdown_tracer_provider(provider))
        .await??;
    Ok(())
}
