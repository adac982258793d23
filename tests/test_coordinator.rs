//! Run-level behaviour of the coordinator
//!
//! Most tests use tokio's paused clock so durations in whole seconds complete
//! instantly and elapsed times are exact.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskchain::{
    BufferingEventSink, Coordinator, EventEnvelope, EventSink, FaultyWork, RunConfig,
    SimulatedWork, TaskEvent, TaskFailure, TaskRecord, TaskSet, TaskState, Workload,
};
use tokio::time::Instant;

fn rec(name: &str, secs: u64, blocks_on: Option<&str>) -> TaskRecord {
    TaskRecord::new(name, secs, blocks_on).unwrap()
}

fn set(records: Vec<TaskRecord>) -> TaskSet {
    TaskSet::new(records).unwrap()
}

fn coordinator(sink: Arc<BufferingEventSink>) -> Coordinator {
    Coordinator::new(RunConfig::default()).with_event_sink(sink)
}

/// Records when each task's work started and ended
#[derive(Default)]
struct TimedWork {
    spans: Mutex<HashMap<String, (Instant, Instant)>>,
}

impl TimedWork {
    fn span(&self, name: &str) -> (Instant, Instant) {
        self.spans.lock().unwrap()[name]
    }
}

#[async_trait]
impl Workload for TimedWork {
    async fn perform(&self, task: &TaskRecord, duration: Duration) -> anyhow::Result<()> {
        let start = Instant::now();
        SimulatedWork.perform(task, duration).await?;
        self.spans
            .lock()
            .unwrap()
            .insert(task.name().to_string(), (start, Instant::now()));
        Ok(())
    }
}

/// Buffers events but panics when the named task starts, taking its
/// executor down with it
struct PanicOnStart {
    task: &'static str,
    inner: BufferingEventSink,
}

impl EventSink for PanicOnStart {
    fn emit(&self, envelope: &EventEnvelope) {
        if let TaskEvent::Started { task, .. } = &envelope.event {
            if task == self.task {
                panic!("sink blew up");
            }
        }
        self.inner.emit(envelope);
    }
}

#[tokio::test(start_paused = true)]
async fn test_chain_with_missing_predecessor() {
    let sink = Arc::new(BufferingEventSink::new());
    let tasks = set(vec![
        rec("A", 5, None),
        rec("B", 3, Some("A")),
        rec("C", 2, Some("Z")),
    ]);

    let report = coordinator(sink.clone()).run(&tasks).await;

    assert_eq!(report.elapsed, Duration::from_secs(8));
    assert!(report.all_succeeded());

    let c = report.outcome("C").unwrap();
    assert_eq!(c.missing_predecessor.as_deref(), Some("Z"));
    assert!(c.failure.is_none());

    let c_events = sink.events_for("C");
    let warnings = c_events
        .iter()
        .filter(|e| matches!(e, TaskEvent::PredecessorMissing { .. }))
        .count();
    assert_eq!(warnings, 1);
    assert!(c_events
        .iter()
        .all(|e| !matches!(e, TaskEvent::Waiting { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_unblocked_tasks_start_immediately() {
    let work = Arc::new(TimedWork::default());
    let tasks = set(vec![rec("A", 4, None), rec("C", 2, Some("Z"))]);
    let origin = Instant::now();

    Coordinator::new(RunConfig::default())
        .with_workload(work.clone())
        .with_event_sink(Arc::new(BufferingEventSink::new()))
        .run(&tasks)
        .await;

    assert_eq!(work.span("A").0, origin);
    assert_eq!(work.span("C").0, origin);
}

#[tokio::test(start_paused = true)]
async fn test_dependent_starts_after_predecessor_finishes() {
    let work = Arc::new(TimedWork::default());
    let tasks = set(vec![
        rec("B", 1, Some("A")),
        rec("A", 3, None),
        rec("C", 2, Some("B")),
    ]);

    let report = Coordinator::new(RunConfig::default())
        .with_workload(work.clone())
        .with_event_sink(Arc::new(BufferingEventSink::new()))
        .run(&tasks)
        .await;

    assert!(report.all_succeeded());
    assert!(work.span("B").0 >= work.span("A").1);
    assert!(work.span("C").0 >= work.span("B").1);
    assert_eq!(report.elapsed, Duration::from_secs(6));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ordering_holds_on_multi_thread_runtime() {
    let work = Arc::new(TimedWork::default());
    let mut records = Vec::new();
    for chain in 0..8 {
        records.push(rec(&format!("root{chain}"), 2, None));
        records.push(rec(&format!("mid{chain}"), 1, Some(&format!("root{chain}"))));
        records.push(rec(&format!("leaf{chain}"), 0, Some(&format!("mid{chain}"))));
    }
    let tasks = set(records);

    let report = Coordinator::new(RunConfig::default().with_time_unit(Duration::from_millis(5)))
        .with_workload(work.clone())
        .with_event_sink(Arc::new(BufferingEventSink::new()))
        .run(&tasks)
        .await;

    assert!(report.all_succeeded());
    for chain in 0..8 {
        let root = work.span(&format!("root{chain}"));
        let mid = work.span(&format!("mid{chain}"));
        let leaf = work.span(&format!("leaf{chain}"));
        assert!(mid.0 >= root.1);
        assert!(leaf.0 >= mid.1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failure_skips_dependent() {
    let sink = Arc::new(BufferingEventSink::new());
    let tasks = set(vec![rec("A", 1, None), rec("B", 1, Some("A"))]);

    let report = coordinator(sink.clone())
        .with_workload(Arc::new(FaultyWork::new(["A"])))
        .run(&tasks)
        .await;

    let a = report.outcome("A").unwrap();
    assert_eq!(a.state, TaskState::Failed);
    assert!(a.ran);

    let b = report.outcome("B").unwrap();
    assert_eq!(b.state, TaskState::Failed);
    assert!(!b.ran);
    let cause = b.failure.as_ref().unwrap();
    assert!(cause.is_cascaded());
    assert_eq!(cause.root_cause().task(), "A");
    assert!(cause.to_string().starts_with("predecessor failed: task 'A' failed"));

    assert!(sink
        .events_for("B")
        .iter()
        .all(|e| !matches!(e, TaskEvent::Started { .. })));
    assert_eq!(report.elapsed, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_cascade_reaches_every_descendant() {
    let tasks = set(vec![
        rec("A", 2, None),
        rec("B", 5, Some("A")),
        rec("C", 5, Some("A")),
        rec("D", 5, Some("B")),
        rec("E", 5, Some("D")),
    ]);

    let report = tokio::time::timeout(
        Duration::from_secs(60),
        coordinator(Arc::new(BufferingEventSink::new()))
            .with_workload(Arc::new(FaultyWork::new(["A"])))
            .run(&tasks),
    )
    .await
    .expect("cascade must terminate");

    assert_eq!(report.failed().count(), 5);
    assert_eq!(report.succeeded().count(), 0);
    let e = report.outcome("E").unwrap().failure.clone().unwrap();
    assert_eq!(e.chain(), vec!["E", "D", "B", "A"]);
    assert!(matches!(e.root_cause(), TaskFailure::Execution { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_on_success() {
    let work = Arc::new(TimedWork::default());
    let tasks = set(vec![
        rec("A", 2, None),
        rec("B", 1, Some("A")),
        rec("C", 3, Some("A")),
        rec("D", 1, Some("A")),
    ]);

    let report = Coordinator::new(RunConfig::default())
        .with_workload(work.clone())
        .with_event_sink(Arc::new(BufferingEventSink::new()))
        .run(&tasks)
        .await;

    assert!(report.all_succeeded());
    let a_end = work.span("A").1;
    for name in ["B", "C", "D"] {
        assert_eq!(work.span(name).0, a_end);
    }
    assert_eq!(report.elapsed, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_fan_out_on_failure() {
    let tasks = set(vec![
        rec("A", 2, None),
        rec("B", 1, Some("A")),
        rec("C", 3, Some("A")),
        rec("X", 4, None),
    ]);

    let report = coordinator(Arc::new(BufferingEventSink::new()))
        .with_workload(Arc::new(FaultyWork::new(["A"])))
        .run(&tasks)
        .await;

    for name in ["B", "C"] {
        let outcome = report.outcome(name).unwrap();
        assert_eq!(outcome.state, TaskState::Failed);
        assert!(!outcome.ran);
    }
    assert!(report.outcome("X").unwrap().succeeded());
    assert_eq!(report.elapsed, Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_independent_chains_run_in_parallel() {
    let tasks = set(vec![
        rec("A", 2, None),
        rec("B", 3, Some("A")),
        rec("X", 4, None),
        rec("Y", 4, Some("X")),
    ]);

    let report = coordinator(Arc::new(BufferingEventSink::new()))
        .run(&tasks)
        .await;

    assert!(report.all_succeeded());
    assert_eq!(report.elapsed, Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn test_outcomes_keep_input_order() {
    let tasks = set(vec![rec("slow", 5, None), rec("fast", 1, None), rec("zero", 0, None)]);

    let report = coordinator(Arc::new(BufferingEventSink::new()))
        .run(&tasks)
        .await;

    let names: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["slow", "fast", "zero"]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_set_reports_zero_elapsed() {
    let report = coordinator(Arc::new(BufferingEventSink::new()))
        .run(&TaskSet::default())
        .await;

    assert!(report.outcomes.is_empty());
    assert_eq!(report.elapsed, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_never_finishes() {
    let tasks = set(vec![
        rec("A", 1, Some("B")),
        rec("B", 1, Some("A")),
        rec("C", 1, None),
    ]);
    assert_eq!(
        tasks.dependency_cycles(),
        vec![vec!["A".to_string(), "B".to_string()]]
    );

    let run = tokio::time::timeout(
        Duration::from_secs(3600),
        coordinator(Arc::new(BufferingEventSink::new())).run(&tasks),
    )
    .await;

    assert!(run.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_events_are_bracketed_by_run_markers() {
    let sink = Arc::new(BufferingEventSink::new());
    let tasks = set(vec![rec("A", 1, None), rec("B", 1, Some("A"))]);

    let report = coordinator(sink.clone()).run(&tasks).await;

    let events = sink.get_events();
    assert!(matches!(events.first().unwrap().event, TaskEvent::RunStarted { tasks: 2 }));
    assert!(matches!(
        events.last().unwrap().event,
        TaskEvent::RunFinished { failed: 0, .. }
    ));
    assert!(events.iter().all(|e| e.run_id == report.run_id));
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
}

#[tokio::test(start_paused = true)]
async fn test_report_serializes_to_json() {
    let tasks = set(vec![rec("A", 1, None), rec("B", 1, Some("A"))]);

    let report = coordinator(Arc::new(BufferingEventSink::new()))
        .with_workload(Arc::new(FaultyWork::new(["A"])))
        .run(&tasks)
        .await;

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["outcomes"][0]["state"], "failed");
    assert_eq!(json["outcomes"][1]["ran"], false);
    assert!(json["outcomes"][1]["failure"]
        .as_str()
        .unwrap()
        .starts_with("predecessor failed"));
}

#[tokio::test(start_paused = true)]
async fn test_dead_executor_still_releases_dependents() {
    let sink = Arc::new(PanicOnStart {
        task: "A",
        inner: BufferingEventSink::new(),
    });
    let tasks = set(vec![
        rec("A", 2, None),
        rec("B", 1, Some("A")),
        rec("X", 3, None),
    ]);

    let report = tokio::time::timeout(
        Duration::from_secs(60),
        Coordinator::new(RunConfig::default())
            .with_event_sink(sink.clone())
            .run(&tasks),
    )
    .await
    .expect("dependents of a dead executor must terminate");

    let a = report.outcome("A").unwrap();
    assert_eq!(a.state, TaskState::Failed);
    assert!(a.ran);
    let a_failure = a.failure.clone().unwrap();
    assert!(matches!(
        &*a_failure,
        TaskFailure::Aborted { message, .. } if message == "sink blew up"
    ));

    let b = report.outcome("B").unwrap();
    assert_eq!(b.state, TaskState::Failed);
    assert!(!b.ran);
    let b_failure = b.failure.clone().unwrap();
    assert!(b_failure.is_cascaded());
    assert_eq!(b_failure.chain(), vec!["B", "A"]);
    assert!(matches!(b_failure.root_cause(), TaskFailure::Aborted { .. }));

    assert!(report.outcome("X").unwrap().succeeded());
    assert!(sink
        .inner
        .events_for("A")
        .iter()
        .any(|e| matches!(e, TaskEvent::Failed { ran: true, .. })));
}
