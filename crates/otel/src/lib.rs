use std::time::SystemTime;

use anyhow::{Context as _, Result};
use opentelemetry::{
    trace::{SpanBuilder, Status, TraceContextExt, Tracer, TracerProvider as _},
    Context, KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};
use workflow_trace_core::{
    context::RunContext,
    models::{CheckConclusion, WorkflowEvent, WorkflowJob, WorkflowRun},
};

const TRACER_NAME: &str = "workflow-trace";

/// How to export the finished spans.
#[derive(Debug, Clone, Default)]
pub struct ExporterConfig {
    /// Send spans over OTLP. When false, spans are printed to stdout, which
    /// is useful for dry runs in a workflow log.
    pub otlp: bool,
    /// Override the OTLP endpoint. Defaults to the standard
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` environment variable.
    pub endpoint: Option<String>,
}

/// Build a tracer provider for the target commit.
///
/// The resource deliberately carries no attributes of the current process:
/// this runs on a `workflow_run` event, so the current environment does not
/// reflect the workflows being reported on.
pub fn init_tracer_provider(
    config: &ExporterConfig,
    context: &RunContext,
) -> Result<TracerProvider> {
    let mut attributes = vec![
        KeyValue::new("service.name", "github-actions"),
        KeyValue::new("service.version", context.sha.clone()),
        KeyValue::new("deployment.environment.name", context.environment_name()),
    ];
    if let Some(hostname) = context.server_hostname() {
        attributes.push(KeyValue::new("host.name", hostname));
    }
    let resource = Resource::new(attributes);

    let provider = if config.otlp {
        let mut builder = opentelemetry_otlp::SpanExporter::builder().with_tonic();
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint.clone());
        }
        let exporter = builder.build().context("Failed to create OTLP exporter")?;
        TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_resource(resource)
            .build()
    } else {
        TracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .with_resource(resource)
            .build()
    };
    Ok(provider)
}

/// Flush and shut down the provider. Spans recorded but not yet exported are
/// lost if this is skipped.
pub fn shutdown_tracer_provider(provider: TracerProvider) -> Result<()> {
    provider.shutdown().context("Failed to shut down tracer provider")
}

/// Emit one span tree for the event: a root span covering the whole event,
/// a child per workflow run, a grandchild per job and one more level for
/// steps. All timestamps come from the summarized event, not the clock.
pub fn export_event(provider: &TracerProvider, event: &WorkflowEvent, context: &RunContext) {
    let tracer = provider.tracer(TRACER_NAME);
    let common = common_attributes(context);

    let mut attributes = common.clone();
    attributes.push(KeyValue::new("operation.name", "event"));
    attributes.push(KeyValue::new("url.full", context.event_url()));
    let name =
        format!("{}:{}:{}", context.repository(), context.event, context.ref_name);
    let mut builder = SpanBuilder::from_name(name).with_attributes(attributes);
    if let Some(started_at) = event.started_at {
        builder = builder.with_start_time(SystemTime::from(started_at));
    }
    let root = tracer.build_with_context(builder, &Context::new());
    let root_cx = Context::new().with_span(root);

    for run in &event.workflow_runs {
        export_run(&tracer, &root_cx, &common, run);
    }

    match event.completed_at {
        Some(completed_at) => root_cx.span().end_with_timestamp(SystemTime::from(completed_at)),
        None => root_cx.span().end(),
    }
}

fn export_run<T: Tracer>(tracer: &T, parent: &Context, common: &[KeyValue], run: &WorkflowRun)
where
    T::Span: Send + Sync + 'static,
{
    let mut attributes = common.to_vec();
    attributes.push(KeyValue::new("operation.name", "workflow"));
    attributes.push(KeyValue::new("url.full", run.url.clone()));
    attributes.push(KeyValue::new("github.workflow.name", run.workflow_name.clone()));
    if let Some(error_type) = error_type(run.conclusion) {
        attributes.push(KeyValue::new("error.type", error_type));
    }
    let span = tracer.build_with_context(
        SpanBuilder::from_name(run.workflow_name.clone())
            .with_start_time(SystemTime::from(run.created_at))
            .with_attributes(attributes),
        parent,
    );
    let cx = parent.with_span(span);

    for job in &run.jobs {
        export_job(tracer, &cx, common, run, job);
    }

    cx.span().set_status(span_status(run.conclusion));
    match run.completed_at {
        Some(completed_at) => cx.span().end_with_timestamp(SystemTime::from(completed_at)),
        None => cx.span().end(),
    }
}

fn export_job<T: Tracer>(
    tracer: &T,
    parent: &Context,
    common: &[KeyValue],
    run: &WorkflowRun,
    job: &WorkflowJob,
) where
    T::Span: Send + Sync + 'static,
{
    let mut attributes = common.to_vec();
    attributes.push(KeyValue::new("operation.name", "job"));
    attributes.push(KeyValue::new("url.full", job.url.clone()));
    attributes.push(KeyValue::new("github.workflow.name", run.workflow_name.clone()));
    attributes.push(KeyValue::new("github.job.name", job.name.clone()));
    if let Some(label) = &job.runner_label {
        attributes.push(KeyValue::new("github.job.runner.label", label.clone()));
    }
    if let Some(error_type) = error_type(job.conclusion) {
        attributes.push(KeyValue::new("error.type", error_type));
    }
    let span = tracer.build_with_context(
        SpanBuilder::from_name(job.name.clone())
            .with_start_time(SystemTime::from(job.started_at))
            .with_attributes(attributes),
        parent,
    );
    let cx = parent.with_span(span);

    for step in &job.steps {
        let mut attributes = common.to_vec();
        attributes.push(KeyValue::new("operation.name", "step"));
        attributes.push(KeyValue::new("github.workflow.name", run.workflow_name.clone()));
        attributes.push(KeyValue::new("github.job.name", job.name.clone()));
        attributes.push(KeyValue::new("github.step.name", step.name.clone()));
        if let Some(label) = &job.runner_label {
            attributes.push(KeyValue::new("github.job.runner.label", label.clone()));
        }
        if let Some(error_type) = error_type(step.conclusion) {
            attributes.push(KeyValue::new("error.type", error_type));
        }
        let span = tracer.build_with_context(
            SpanBuilder::from_name(step.name.clone())
                .with_start_time(SystemTime::from(step.started_at))
                .with_attributes(attributes),
            &cx,
        );
        let step_cx = cx.with_span(span);
        step_cx.span().set_status(span_status(step.conclusion));
        step_cx.span().end_with_timestamp(SystemTime::from(step.completed_at));
    }

    cx.span().set_status(span_status(job.conclusion));
    cx.span().end_with_timestamp(SystemTime::from(job.completed_at));
}

fn common_attributes(context: &RunContext) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new("github.repository", context.repository()),
        KeyValue::new("github.ref", context.ref_name.clone()),
        KeyValue::new("github.sha", context.sha.clone()),
        KeyValue::new("github.actor", context.actor.clone()),
        KeyValue::new("github.event.name", context.event.clone()),
    ];
    if let Some(run_attempt) = context.run_attempt {
        attributes.push(KeyValue::new("github.run_attempt", run_attempt as i64));
    }
    attributes
}

fn span_status(conclusion: Option<CheckConclusion>) -> Status {
    match error_type(conclusion) {
        Some(error_type) => Status::error(error_type),
        None => Status::Ok,
    }
}

fn error_type(conclusion: Option<CheckConclusion>) -> Option<&'static str> {
    conclusion.filter(CheckConclusion::is_failure).map(|conclusion| conclusion.as_str())
}
