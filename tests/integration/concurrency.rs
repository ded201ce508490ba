//! Concurrency integration tests.
//!
//! Tests that verify a job never runs twice at once, concurrent registration
//! and how shutdown and interruption reach running executions.

use futures::future::join_all;
use std::time::Duration;
use tickwork::testing::{wait_until, RecordingHandler, SlowJob};
use tickwork::{JobSpec, JobState, ServiceCollection};

use crate::common::{eventually, scheduler, WAIT};

fn slow_services(job: &SlowJob) -> ServiceCollection {
    let job = job.clone();
    ServiceCollection::new().add_transient(move |_| Ok(job.clone()))
}

#[tokio::test]
async fn test_job_never_runs_concurrently() {
    let slow = SlowJob::new(Duration::from_millis(300));
    let scheduler = scheduler(slow_services(&slow));
    let recorder = std::sync::Arc::new(RecordingHandler::new());
    scheduler.subscribe(recorder.clone()).await;

    scheduler
        .add_job::<SlowJob>(JobSpec::new("exclusive").with_cron("0 0 0 1 1 ?"))
        .await
        .unwrap();
    scheduler.resume_job("exclusive").await.unwrap();
    scheduler.start().await;

    scheduler.trigger_job("exclusive").await.unwrap();
    let probe = slow.clone();
    assert!(wait_until(WAIT, move || probe.started() == 1).await);

    // Second fire waits for the first one.
    scheduler.trigger_job("exclusive").await.unwrap();
    let detail = scheduler.get_job("exclusive").await.unwrap().unwrap();
    assert_eq!(detail.state, JobState::Blocked);
    assert_eq!(scheduler.running_jobs().await.len(), 1);

    assert!(recorder.wait_for(4, WAIT).await);
    assert_eq!(slow.started(), 2);
    assert_eq!(slow.finished(), 2);
    assert_eq!(slow.max_concurrent(), 1);

    let sched = &scheduler;
    eventually("trigger unblocked", move || async move {
        sched.get_job("exclusive").await.unwrap().unwrap().state == JobState::Normal
    })
    .await;

    scheduler.stop().await;
}

#[tokio::test]
async fn test_different_jobs_run_in_parallel() {
    let slow = SlowJob::new(Duration::from_millis(300));
    let scheduler = scheduler(slow_services(&slow));

    for key in ["parallel-a", "parallel-b"] {
        scheduler.add_job::<SlowJob>(key).await.unwrap();
    }
    scheduler.start().await;
    for key in ["parallel-a", "parallel-b"] {
        scheduler.trigger_job(key).await.unwrap();
    }

    let probe = slow.clone();
    assert!(wait_until(WAIT, move || probe.finished() == 2).await);
    assert_eq!(slow.max_concurrent(), 2);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_concurrent_add_registers_once() {
    let slow = SlowJob::new(Duration::from_millis(10));
    let scheduler = scheduler(slow_services(&slow));

    let results = join_all((0..8).map(|_| {
        scheduler.add_job::<SlowJob>(JobSpec::new("contended").with_cron("0 0 * * * ?"))
    }))
    .await;

    let added = results
        .into_iter()
        .map(Result::unwrap)
        .filter(Option::is_some)
        .count();
    assert_eq!(added, 1);
    assert_eq!(scheduler.get_jobs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stop_cancels_running_jobs() {
    let slow = SlowJob::new(Duration::from_secs(60));
    let scheduler = scheduler(slow_services(&slow));
    let recorder = std::sync::Arc::new(RecordingHandler::new());
    scheduler.subscribe(recorder.clone()).await;

    scheduler.add_job::<SlowJob>("long-running").await.unwrap();
    scheduler.start().await;
    scheduler.trigger_job("long-running").await.unwrap();

    let probe = slow.clone();
    assert!(wait_until(WAIT, move || probe.started() == 1).await);

    tokio::time::timeout(WAIT, scheduler.stop()).await.unwrap();

    assert_eq!(slow.cancelled(), 1);
    assert_eq!(slow.finished(), 0);
    assert!(scheduler.running_jobs().await.is_empty());
    assert_eq!(recorder.completed().await, 1);
}

#[tokio::test]
async fn test_interrupt_cancels_only_that_job() {
    let slow = SlowJob::new(Duration::from_millis(500));
    let scheduler = scheduler(slow_services(&slow));

    scheduler.add_job::<SlowJob>("interrupted").await.unwrap();
    scheduler.add_job::<SlowJob>("untouched").await.unwrap();
    scheduler.start().await;
    scheduler.trigger_job("interrupted").await.unwrap();
    scheduler.trigger_job("untouched").await.unwrap();

    let probe = slow.clone();
    assert!(wait_until(WAIT, move || probe.started() == 2).await);

    assert_eq!(scheduler.interrupt_job("interrupted").await, 1);
    assert_eq!(scheduler.interrupt_job("not-running").await, 0);

    let probe = slow.clone();
    assert!(wait_until(WAIT, move || probe.cancelled() == 1 && probe.finished() == 1).await);

    scheduler.stop().await;
}
