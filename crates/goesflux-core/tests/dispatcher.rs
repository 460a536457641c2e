use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use goesflux_core::dispatcher::{Dispatcher, ScheduledTask};
use goesflux_core::error::{ExecutionError, Result};
use goesflux_core::invocation::{Invocation, Payload, TaskResult};
use goesflux_core::processor::FluxSeriesProcessor;
use goesflux_core::tasks::TaskContext;
use goesflux_core::timeseries_sink::MemoryTimeSeriesSink;
use goesflux_core::types::RawFluxSeries;
use goesflux_core::upstream::{FluxProvider, UpstreamFetchError};

struct EmptyProvider;

#[async_trait]
impl FluxProvider for EmptyProvider {
    async fn fetch_flux_series(&self, _days: u32) -> std::result::Result<RawFluxSeries, UpstreamFetchError> {
        Ok(RawFluxSeries::default())
    }
}

fn context() -> Arc<TaskContext> {
    Arc::new(TaskContext::new(
        Arc::new(EmptyProvider),
        Arc::new(MemoryTimeSeriesSink::new()),
        FluxSeriesProcessor::default(),
    ))
}

enum Behaviour {
    Succeed,
    Fail,
    Panic,
}

struct CountingTask {
    code: &'static str,
    calls: Arc<AtomicUsize>,
    behaviour: Behaviour,
}

impl CountingTask {
    fn new(code: &'static str, behaviour: Behaviour) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let task = Arc::new(Self {
            code,
            calls: Arc::clone(&calls),
            behaviour,
        });
        (task, calls)
    }
}

#[async_trait]
impl ScheduledTask for CountingTask {
    fn code_identifier(&self) -> &'static str {
        self.code
    }

    fn description(&self) -> &'static str {
        "counts invocations"
    }

    async fn run(&self, _context: &TaskContext, payload: &Payload) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Succeed => Ok(json!({ "echo": payload })),
            Behaviour::Fail => Err(ExecutionError::Configuration("sink offline".into())),
            Behaviour::Panic => panic!("task blew up"),
        }
    }
}

#[tokio::test]
async fn unknown_name_runs_nothing_and_reports_unknown_task() {
    let (a, a_calls) = CountingTask::new("a", Behaviour::Succeed);
    let (b, b_calls) = CountingTask::new("b", Behaviour::Succeed);
    let dispatcher = Dispatcher::builder()
        .register(a)
        .unwrap()
        .register(b)
        .unwrap()
        .build(context());

    let result = dispatcher.execute(&Invocation::named("unknown_task")).await;
    assert!(!result.success());
    assert_eq!(result.error().unwrap().kind, "UnknownTaskError");
    assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);

    let response = result.into_response();
    assert_eq!(response.status_code, 500);
    assert_eq!(response.body["error"]["kind"], "UnknownTaskError");
}

#[tokio::test]
async fn known_name_runs_exactly_one_task() {
    let (a, a_calls) = CountingTask::new("a", Behaviour::Succeed);
    let (b, b_calls) = CountingTask::new("b", Behaviour::Succeed);
    let dispatcher = Dispatcher::builder()
        .register(a)
        .unwrap()
        .register(b)
        .unwrap()
        .build(context());

    let mut payload = Payload::new();
    payload.insert("answer".into(), json!(42));
    let result = dispatcher.execute(&Invocation::new("b", payload)).await;

    match &result {
        TaskResult::Completed { task, output } => {
            assert_eq!(task, "b");
            assert_eq!(output["echo"]["answer"], 42);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(a_calls.load(Ordering::SeqCst), 0);
    assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.into_response().status_code, 200);
}

#[tokio::test]
async fn task_error_is_captured_in_result() {
    let (task, calls) = CountingTask::new("failing", Behaviour::Fail);
    let dispatcher = Dispatcher::builder()
        .register(task)
        .unwrap()
        .build(context());

    let result = dispatcher.execute(&Invocation::named("failing")).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let error = result.error().expect("failure");
    assert_eq!(error.kind, "ConfigurationError");
    assert!(error.message.contains("sink offline"));
}

#[tokio::test]
async fn task_panic_is_captured_in_result() {
    let (task, calls) = CountingTask::new("panicky", Behaviour::Panic);
    let dispatcher = Dispatcher::builder()
        .register(task)
        .unwrap()
        .build(context());

    let result = dispatcher.execute(&Invocation::named("panicky")).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let error = result.error().expect("failure");
    assert_eq!(error.kind, "TaskPanicked");
    assert!(error.message.contains("task blew up"));

    // the dispatcher stays usable after a panic
    let again = dispatcher.execute(&Invocation::named("panicky")).await;
    assert!(!again.success());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn duplicate_registration_is_rejected() {
    let (first, _) = CountingTask::new("same", Behaviour::Succeed);
    let (second, _) = CountingTask::new("same", Behaviour::Succeed);

    let err = Dispatcher::builder()
        .register(first)
        .unwrap()
        .register(second)
        .unwrap_err();
    assert!(matches!(err, ExecutionError::DuplicateTask(ref name) if name == "same"));
}

#[tokio::test]
async fn scheduled_event_dispatches_by_rule_name() {
    let (task, calls) = CountingTask::new("nightly", Behaviour::Succeed);
    let dispatcher = Dispatcher::builder()
        .register(task)
        .unwrap()
        .build(context());

    let event = json!({
        "time": "2024-05-10T12:00:00Z",
        "resources": ["arn:aws:events:us-east-1:123456789012:rule/nightly"]
    });
    let invocation = Invocation::from_scheduled_event(&event).unwrap();
    let result = dispatcher.execute(&invocation).await;

    assert!(result.success());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
