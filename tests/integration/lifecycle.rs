//! Job lifecycle integration tests.
//!
//! Tests that verify registration, queries, pause/resume, cron updates and
//! the automatic removal of jobs that have nothing left to fire.

use std::sync::Arc;
use tickwork::testing::FailingJob;
use tickwork::{JobSpec, JobState, ServiceCollection};
use tokio::sync::Mutex;

use crate::common::{eventually, scheduler, Completion, SignalJob};

fn signal_services(completion: &Arc<Completion>) -> ServiceCollection {
    let completion = Arc::clone(completion);
    ServiceCollection::new()
        .add_transient(move |_| {
            Ok(SignalJob::new(
                Arc::clone(&completion),
                Arc::new(Mutex::new(Vec::new())),
            ))
        })
        .add_transient(|_| Ok(FailingJob::new("Test should fail.")))
}

#[tokio::test]
async fn test_triggered_job_without_cron_is_removed_after_firing() {
    let completion = Completion::new();
    let scheduler = scheduler(signal_services(&completion));
    let key = "test-job";

    scheduler.add_job::<SignalJob>(key).await.unwrap();
    scheduler.start().await;
    assert!(scheduler.job_exists(key).await.unwrap());

    scheduler.trigger_job(key).await.unwrap();
    assert!(completion.wait(1).await);

    let sched = &scheduler;
    eventually("job removal", move || async move { !sched.job_exists(key).await.unwrap() }).await;
    assert!(scheduler.get_job(key).await.unwrap().is_none());

    scheduler.stop().await;
}

#[tokio::test]
async fn test_add_count_and_remove_jobs() {
    let scheduler = scheduler(signal_services(&Completion::new()));
    scheduler.start().await;

    for i in 0..5 {
        let added = scheduler
            .add_job::<FailingJob>(format!("multi-test-job-{}", i))
            .await
            .unwrap();
        assert!(added.is_some());
    }

    let jobs = scheduler.get_jobs().await.unwrap();
    let created: Vec<_> = jobs
        .iter()
        .filter(|job| job.key.as_str().starts_with("multi-test-job-"))
        .collect();
    assert_eq!(created.len(), 5);
    assert!(created.iter().all(|job| job.state == JobState::None));

    for job in &jobs {
        assert!(scheduler.delete_job(&job.key).await.unwrap());
    }

    let remaining = scheduler.get_jobs().await.unwrap();
    assert!(remaining
        .iter()
        .all(|job| !job.key.as_str().starts_with("multi-test-job-")));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_cron_job_state_transitions() {
    let scheduler = scheduler(signal_services(&Completion::new()));
    scheduler.start().await;

    let key = "test-cron-expression-job";
    let cron = "0 0 * ? * * *";
    assert!(scheduler.is_valid_cron_expression(cron));

    let detail = scheduler
        .add_job::<FailingJob>(JobSpec::new(key).with_cron(cron))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.cron_expression.as_deref(), Some(cron));
    assert_eq!(detail.state, JobState::Paused);
    assert!(detail.is_recurring);

    scheduler.resume_job(key).await.unwrap();
    let detail = scheduler.get_job(key).await.unwrap().unwrap();
    assert_eq!(detail.state, JobState::Normal);

    scheduler.pause_job(key).await.unwrap();
    let detail = scheduler.get_job(key).await.unwrap().unwrap();
    assert_eq!(detail.state, JobState::Paused);

    let updated = "0 0/30 * ? * * *";
    scheduler.update_cron_expression(key, updated).await.unwrap();
    let detail = scheduler.get_job(key).await.unwrap().unwrap();
    assert_eq!(detail.cron_expression.as_deref(), Some(updated));
    assert_eq!(detail.state, JobState::Paused);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_paused_cron_job_does_not_fire() {
    let completion = Completion::new();
    let scheduler = scheduler(signal_services(&completion));
    scheduler
        .add_job::<SignalJob>(JobSpec::new("every-second").with_cron("* * * * * ?"))
        .await
        .unwrap();
    scheduler.start().await;

    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert_eq!(completion.count(), 0);

    scheduler.resume_job("every-second").await.unwrap();
    assert!(completion.wait(1).await);

    // A recurring job stays registered after firing.
    let detail = scheduler.get_job("every-second").await.unwrap().unwrap();
    assert!(detail.metadata.previous_fire_time_utc.is_some());

    scheduler.stop().await;
}

#[tokio::test]
async fn test_resume_does_not_fire_missed_occurrences() {
    let completion = Completion::new();
    let scheduler = scheduler(signal_services(&completion));
    scheduler
        .add_job::<SignalJob>(JobSpec::new("hourly").with_cron("0 0 * * * ?"))
        .await
        .unwrap();
    scheduler.start().await;

    scheduler.resume_job("hourly").await.unwrap();
    scheduler.pause_job("hourly").await.unwrap();
    scheduler.resume_job("hourly").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(completion.count(), 0);

    let detail = scheduler.get_job("hourly").await.unwrap().unwrap();
    assert_eq!(detail.state, JobState::Normal);
    assert!(detail.metadata.previous_fire_time_utc.is_none());

    scheduler.stop().await;
}

#[tokio::test]
async fn test_manual_trigger_fires_paused_job() {
    let completion = Completion::new();
    let scheduler = scheduler(signal_services(&completion));
    scheduler
        .add_job::<SignalJob>(JobSpec::new("paused").with_cron("0 0 0 1 1 ?"))
        .await
        .unwrap();
    scheduler.start().await;

    scheduler.trigger_job("paused").await.unwrap();
    assert!(completion.wait(1).await);

    let sched = &scheduler;
    eventually("execution end", move || async move { sched.running_jobs().await.is_empty() }).await;

    // The cron trigger keeps the job alive and stays paused.
    let detail = scheduler.get_job("paused").await.unwrap().unwrap();
    assert_eq!(detail.state, JobState::Paused);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_restart_after_stop() {
    let completion = Completion::new();
    let scheduler = scheduler(signal_services(&completion));
    scheduler
        .add_job::<SignalJob>(JobSpec::new("kept").with_cron("0 0 0 1 1 ?"))
        .await
        .unwrap();

    scheduler.start().await;
    scheduler.stop().await;
    assert!(!scheduler.is_started().await);
    assert!(scheduler.job_exists("kept").await.unwrap());

    scheduler.start().await;
    assert!(scheduler.is_started().await);
    scheduler.trigger_job("kept").await.unwrap();
    assert!(completion.wait(1).await);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_trigger_before_start_fires_on_start() {
    let completion = Completion::new();
    let scheduler = scheduler(signal_services(&completion));
    scheduler.add_job::<SignalJob>("early").await.unwrap();

    scheduler.trigger_job("early").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(completion.count(), 0);

    scheduler.start().await;
    assert!(completion.wait(1).await);

    scheduler.stop().await;
}
