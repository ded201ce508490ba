//! Execution integration tests.
//!
//! Tests that verify execution events, failure reporting and how job
//! instances are resolved for every fire.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tickwork::testing::{CountingJob, FailingJob, PanickingJob, RecordingHandler};
use tickwork::{
    Activate, EventHandler, ExecutionTimeline, FireContext, JobError, JobExecutionError, JobSpec,
    JobState, JobType, NativeJob, ResolveError, SchedulerEvent, ServiceCollection, ServiceScope,
};
use tokio::sync::Mutex;

use crate::common::{eventually, scheduler, Completion, SignalJob, WAIT};

#[tokio::test]
async fn test_failed_job_reports_exception_after_execution() {
    let scheduler = scheduler(
        ServiceCollection::new().add_transient(|_| Ok(FailingJob::new("Test should fail."))),
    );
    let recorder = Arc::new(RecordingHandler::new());
    scheduler.subscribe(recorder.clone()).await;

    scheduler.add_job::<FailingJob>("fail-test-job").await.unwrap();
    scheduler.start().await;
    scheduler.trigger_job("fail-test-job").await.unwrap();

    assert!(recorder.wait_for(2, WAIT).await);
    let events = recorder.events().await;
    assert_eq!(events[0].timeline, ExecutionTimeline::BeforeExecution);
    assert!(events[0].exception.is_none());
    assert_eq!(events[1].timeline, ExecutionTimeline::AfterExecution);

    let exception = events[1].exception.as_ref().unwrap();
    assert!(matches!(
        exception.downcast_ref::<JobError>(),
        Some(JobError::ExecutionFailed(msg)) if msg == "Test should fail."
    ));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_events_pair_up_per_fire() {
    let completion = Completion::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (c, s) = (Arc::clone(&completion), Arc::clone(&seen));
    let scheduler = scheduler(
        ServiceCollection::new()
            .add_transient(move |_| Ok(SignalJob::new(Arc::clone(&c), Arc::clone(&s)))),
    );
    let recorder = Arc::new(RecordingHandler::new());
    scheduler.subscribe(recorder.clone()).await;

    scheduler
        .add_job::<SignalJob>(JobSpec::new("paired").with_cron("0 0 0 1 1 ?"))
        .await
        .unwrap();
    scheduler.start().await;
    scheduler.trigger_job("paired").await.unwrap();
    assert!(completion.wait(1).await);
    scheduler.trigger_job("paired").await.unwrap();
    assert!(completion.wait(2).await);
    assert!(recorder.wait_for(4, WAIT).await);

    let events = recorder.events_for("paired").await;
    assert_eq!(events.len(), 4);
    for pair in events.chunks(2) {
        assert_eq!(pair[0].timeline, ExecutionTimeline::BeforeExecution);
        assert_eq!(pair[1].timeline, ExecutionTimeline::AfterExecution);
        assert_eq!(pair[0].fire_id, pair[1].fire_id);
        assert_eq!(pair[0].execution_time, pair[1].execution_time);
        assert!(pair[1].exception.is_none());
    }
    assert_ne!(events[0].fire_id, events[2].fire_id);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_job_data_reaches_context() {
    let completion = Completion::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (c, s) = (Arc::clone(&completion), Arc::clone(&seen));
    let scheduler = scheduler(
        ServiceCollection::new()
            .add_transient(move |_| Ok(SignalJob::new(Arc::clone(&c), Arc::clone(&s)))),
    );

    scheduler
        .add_job::<SignalJob>(
            JobSpec::new("with-data")
                .with_entry("tenant", "acme")
                .with_entry("region", "eu"),
        )
        .await
        .unwrap();
    scheduler.start().await;
    scheduler.trigger_job("with-data").await.unwrap();
    assert!(completion.wait(1).await);

    let seen = seen.lock().await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("tenant").map(String::as_str), Some("acme"));
    assert_eq!(seen[0].get("region").map(String::as_str), Some("eu"));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_panicking_job_reports_failure() {
    let scheduler = scheduler(ServiceCollection::new().add_transient(|_| Ok(PanickingJob)));
    let recorder = Arc::new(RecordingHandler::new());
    scheduler.subscribe(recorder.clone()).await;

    scheduler.add_job::<PanickingJob>("panics").await.unwrap();
    scheduler.start().await;
    scheduler.trigger_job("panics").await.unwrap();

    assert!(recorder.wait_for(2, WAIT).await);
    let events = recorder.events().await;
    assert!(matches!(
        events[1].exception.as_ref().unwrap().downcast_ref::<JobError>(),
        Some(JobError::Panicked(msg)) if msg.contains("on purpose")
    ));
    assert!(scheduler.is_started().await);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_unregistered_job_fails_at_fire_time() {
    let scheduler = scheduler(ServiceCollection::new());
    let recorder = Arc::new(RecordingHandler::new());
    scheduler.subscribe(recorder.clone()).await;

    // Adding succeeds; resolution only happens when the job fires.
    scheduler
        .add_job::<CountingJob>(JobSpec::new("ghost").with_cron("0 0 0 1 1 ?"))
        .await
        .unwrap()
        .unwrap();
    scheduler.start().await;
    scheduler.trigger_job("ghost").await.unwrap();

    assert!(recorder.wait_for(1, WAIT).await);
    let events = recorder.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].timeline, ExecutionTimeline::AfterExecution);
    assert!(matches!(
        events[0].exception.as_ref().unwrap().downcast_ref::<ResolveError>(),
        Some(ResolveError::UnregisteredJob(_))
    ));

    let sched = &scheduler;
    eventually("trigger error state", move || async move {
        sched.get_job("ghost").await.unwrap().unwrap().state == JobState::Error
    })
    .await;

    scheduler.stop().await;
}

#[tokio::test]
async fn test_panicking_subscriber_does_not_affect_execution() {
    struct Broken;

    #[async_trait]
    impl EventHandler for Broken {
        async fn handle(&self, _event: &SchedulerEvent) {
            panic!("subscriber bug");
        }
    }

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let scheduler = scheduler(
        ServiceCollection::new().add_transient(move |_| Ok(CountingJob::new(Arc::clone(&counter)))),
    );
    scheduler.subscribe(Arc::new(Broken)).await;
    let recorder = Arc::new(RecordingHandler::new());
    scheduler.subscribe(recorder.clone()).await;

    scheduler.add_job::<CountingJob>("counted").await.unwrap();
    scheduler.start().await;
    scheduler.trigger_job("counted").await.unwrap();

    assert!(recorder.wait_for(2, WAIT).await);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(recorder.events().await[1].exception.is_none());

    scheduler.stop().await;
}

#[tokio::test]
async fn test_unsubscribed_handler_receives_nothing() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let scheduler = scheduler(
        ServiceCollection::new().add_transient(move |_| Ok(CountingJob::new(Arc::clone(&counter)))),
    );
    let removed = Arc::new(RecordingHandler::new());
    let id = scheduler.subscribe(removed.clone()).await;
    let kept = Arc::new(AtomicUsize::new(0));
    let kept_counter = Arc::clone(&kept);
    scheduler
        .on_job_execution(move |_| {
            kept_counter.fetch_add(1, Ordering::SeqCst);
        })
        .await;

    assert!(scheduler.unsubscribe(id).await);

    scheduler.add_job::<CountingJob>("quiet").await.unwrap();
    scheduler.start().await;
    scheduler.trigger_job("quiet").await.unwrap();

    let kept_events = Arc::clone(&kept);
    assert!(
        tickwork::testing::wait_until(WAIT, move || kept_events.load(Ordering::SeqCst) == 2).await
    );
    assert!(removed.events().await.is_empty());

    scheduler.stop().await;
}

/// Job implementing the native contract directly.
struct Heartbeat {
    beats: Arc<AtomicUsize>,
}

#[async_trait]
impl NativeJob for Heartbeat {
    async fn execute(&self, ctx: &FireContext) -> Result<(), JobExecutionError> {
        self.beats.fetch_add(1, Ordering::SeqCst);
        if ctx.job_key.as_str() == "stop-me" {
            return Err(JobExecutionError::new(JobError::ExecutionFailed("done".into()))
                .with_unschedule_all_triggers(true));
        }
        Ok(())
    }
}

struct Beats(Arc<AtomicUsize>);

impl Activate for Heartbeat {
    fn activate(scope: &ServiceScope) -> Result<Self, ResolveError> {
        let beats = scope.get::<Beats>()?;
        Ok(Self {
            beats: Arc::clone(&beats.0),
        })
    }
}

#[tokio::test]
async fn test_native_job_activated_per_fire() {
    let beats = Arc::new(AtomicUsize::new(0));
    let scheduler = scheduler(ServiceCollection::new().add_singleton(Beats(Arc::clone(&beats))));
    let recorder = Arc::new(RecordingHandler::new());
    scheduler.subscribe(recorder.clone()).await;

    scheduler
        .add_job_of_type(
            JobType::native::<Heartbeat>(),
            JobSpec::new("heartbeat").with_cron("0 0 0 1 1 ?"),
        )
        .await
        .unwrap();
    scheduler.start().await;
    scheduler.trigger_job("heartbeat").await.unwrap();

    assert!(recorder.wait_for(2, WAIT).await);
    assert_eq!(beats.load(Ordering::SeqCst), 1);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_native_job_can_complete_its_triggers() {
    let beats = Arc::new(AtomicUsize::new(0));
    let scheduler = scheduler(ServiceCollection::new().add_singleton(Beats(Arc::clone(&beats))));
    let recorder = Arc::new(RecordingHandler::new());
    scheduler.subscribe(recorder.clone()).await;

    scheduler
        .add_job_of_type(
            JobType::native::<Heartbeat>(),
            JobSpec::new("stop-me").with_cron("0 0 0 1 1 ?"),
        )
        .await
        .unwrap();
    scheduler.resume_job("stop-me").await.unwrap();
    scheduler.start().await;
    scheduler.trigger_job("stop-me").await.unwrap();

    assert!(recorder.wait_for(2, WAIT).await);
    let sched = &scheduler;
    eventually("trigger complete state", move || async move {
        sched.get_job("stop-me").await.unwrap().unwrap().state == JobState::Complete
    })
    .await;

    scheduler.stop().await;
}
