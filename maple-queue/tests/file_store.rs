#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{collections::HashSet, path::Path};

use chrono::{TimeDelta, Utc};
use maple_queue::{
    FileJobStore, Failure, JobId, JobStatus, JobStore, NewJob, StorageError,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn open(dir: &Path) -> FileJobStore {
    let store = FileJobStore::builder()
        .path(dir)
        .build()
        .expect("valid queue path");
    store.init().expect("init");
    store
}

fn welcome(n: usize) -> NewJob {
    NewJob::new(
        format!("user{n}@example.com"),
        "Welcome to Maple Server",
        format!("<p>Hello user {n}</p>"),
        Utc::now(),
    )
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn enqueued_job_survives_restart() {
    let dir = TempDir::new().unwrap();

    let id = {
        let store = open(dir.path());
        store.insert(welcome(1)).await.expect("insert")
    };

    let reopened = open(dir.path());
    let job = reopened.get(id).await.expect("job persisted");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.recipient, "user1@example.com");
    assert_eq!(job.sent_at, None);

    let eligible = reopened
        .select_eligible(10, 3, Utc::now())
        .await
        .expect("select");
    assert_eq!(eligible.len(), 1);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn ids_keep_increasing_across_restarts() {
    let dir = TempDir::new().unwrap();

    let first = {
        let store = open(dir.path());
        let a = store.insert(welcome(1)).await.unwrap();
        let b = store.insert(welcome(2)).await.unwrap();
        store.mark_sent(b, Utc::now()).await.unwrap();
        assert!(b > a);
        b
    };

    let store = open(dir.path());
    let next = store.insert(welcome(3)).await.unwrap();
    assert!(next > first, "{next} should follow {first}");
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn sent_jobs_move_and_stay_terminal() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path());

    let id = store.insert(welcome(1)).await.unwrap();
    let sent_at = Utc::now();
    store.mark_sent(id, sent_at).await.expect("mark sent");

    assert!(!dir.path().join("pending").join(id.filename()).exists());
    assert!(dir.path().join("sent").join(id.filename()).exists());

    let job = store.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Sent);
    assert_eq!(job.sent_at, Some(sent_at));

    assert!(matches!(
        store.mark_failed(id, Failure::new("late")).await,
        Err(StorageError::InvalidTransition {
            status: JobStatus::Sent,
            ..
        })
    ));
    assert!(matches!(
        store.mark_sent(id, Utc::now()).await,
        Err(StorageError::InvalidTransition { .. })
    ));
    assert!(
        store
            .select_eligible(10, 3, Utc::now())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn failures_are_persisted() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = open(dir.path());
        let id = store.insert(welcome(1)).await.unwrap();
        for expected in 1..=3 {
            let count = store
                .mark_failed(id, Failure::new("connection refused"))
                .await
                .unwrap();
            assert_eq!(count, expected);
        }
        id
    };

    let store = open(dir.path());
    let job = store.get(id).await.unwrap();
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.effective_status(3), JobStatus::Dead);
    assert_eq!(job.last_error.as_deref(), Some("connection refused"));
    assert!(
        store
            .select_eligible(10, 3, Utc::now())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn selection_respects_age_limit_and_backoff() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path());
    let now = Utc::now();

    let mut ids = Vec::new();
    for n in 0..4 {
        let mut job = welcome(n);
        job.created_at = now - TimeDelta::seconds(i64::try_from(10 - n).unwrap());
        ids.push(store.insert(job).await.unwrap());
    }

    // The oldest job is backing off for a minute.
    store
        .mark_failed(
            ids[0],
            Failure::new("busy").not_before(Some(now + TimeDelta::seconds(60))),
        )
        .await
        .unwrap();

    let selected = store.select_eligible(2, 3, now).await.unwrap();
    let selected: Vec<JobId> = selected.iter().map(|j| j.id).collect();
    assert_eq!(selected, vec![ids[1], ids[2]]);

    let later = store
        .select_eligible(10, 3, now + TimeDelta::seconds(61))
        .await
        .unwrap();
    assert_eq!(later.first().map(|j| j.id), Some(ids[0]));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn init_recovers_from_interrupted_writes() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path());

    let delivered = store.insert(welcome(1)).await.unwrap();
    let waiting = store.insert(welcome(2)).await.unwrap();
    store.mark_sent(delivered, Utc::now()).await.unwrap();

    // Simulate a crash between writing sent/ and removing the pending copy.
    let pending_copy = dir.path().join("pending").join(delivered.filename());
    std::fs::copy(
        dir.path().join("sent").join(delivered.filename()),
        &pending_copy,
    )
    .unwrap();
    // And a temporary file from an interrupted insert.
    let stray = dir.path().join("pending").join(".tmp_00000000000000000099.job.1");
    std::fs::write(&stray, b"partial").unwrap();

    let reopened = open(dir.path());
    assert!(!pending_copy.exists());
    assert!(!stray.exists());

    let all = reopened.list(None).await.unwrap();
    let ids: Vec<JobId> = all.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![delivered, waiting]);
    assert_eq!(all[0].status, JobStatus::Sent);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn corrupted_job_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path());

    let id = store.insert(welcome(1)).await.unwrap();
    std::fs::write(dir.path().join("pending").join(id.filename()), b"\xff\xff").unwrap();

    assert!(matches!(
        store.get(id).await,
        Err(StorageError::Serialization(_))
    ));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn unreadable_job_file_does_not_block_delivery() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path());

    let good = store.insert(welcome(1)).await.unwrap();
    let broken = store.insert(welcome(2)).await.unwrap();
    std::fs::write(dir.path().join("pending").join(broken.filename()), b"\xff\xff").unwrap();

    for _ in 0..3 {
        let selected = store.select_eligible(10, 3, Utc::now()).await.expect("select");
        assert_eq!(selected.iter().map(|j| j.id).collect::<Vec<_>>(), vec![good]);
    }
    store.mark_sent(good, Utc::now()).await.expect("mark sent");
    assert_eq!(store.get(good).await.unwrap().status, JobStatus::Sent);

    // Moved aside on first sight, so it is only counted once.
    assert!(!dir.path().join("pending").join(broken.filename()).exists());
    assert!(dir.path().join("corrupt").join(broken.filename()).exists());
    assert_eq!(store.unreadable(), 1);
    assert!(matches!(store.get(broken).await, Err(StorageError::NotFound(_))));

    // Its id is not handed out again after a restart.
    let reopened = open(dir.path());
    assert!(reopened.insert(welcome(3)).await.unwrap() > broken);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn listing_skips_unreadable_files() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path());

    let sent = store.insert(welcome(1)).await.unwrap();
    let pending = store.insert(welcome(2)).await.unwrap();
    let broken = store.insert(welcome(3)).await.unwrap();
    store.mark_sent(sent, Utc::now()).await.unwrap();
    std::fs::write(dir.path().join("pending").join(broken.filename()), b"\xff\xff").unwrap();

    let ids: Vec<JobId> = store.list(None).await.unwrap().iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![sent, pending]);
    assert_eq!(store.unreadable(), 1);
    // Listing leaves the file where it is.
    assert!(dir.path().join("pending").join(broken.filename()).exists());
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn exhausted_jobs_are_not_reread() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path());

    let dead = store.insert(welcome(1)).await.unwrap();
    for _ in 0..3 {
        store.mark_failed(dead, Failure::new("refused")).await.unwrap();
    }
    assert!(store.select_eligible(10, 3, Utc::now()).await.unwrap().is_empty());

    // Selection under the same ceiling no longer opens the file, so damage to
    // it goes unnoticed and the file stays put.
    let path = dir.path().join("pending").join(dead.filename());
    let intact = std::fs::read(&path).unwrap();
    std::fs::write(&path, b"\xff\xff").unwrap();
    assert!(store.select_eligible(10, 3, Utc::now()).await.unwrap().is_empty());
    assert!(path.exists());
    assert_eq!(store.unreadable(), 0);

    // A higher ceiling makes it eligible again.
    std::fs::write(&path, intact).unwrap();
    let selected = store.select_eligible(10, 5, Utc::now()).await.unwrap();
    assert_eq!(selected.iter().map(|j| j.id).collect::<Vec<_>>(), vec![dead]);

    // Once deleted it is forgotten, and new jobs are selected as usual.
    store.delete(dead).await.unwrap();
    let fresh = store.insert(welcome(2)).await.unwrap();
    let selected = store.select_eligible(10, 3, Utc::now()).await.unwrap();
    assert_eq!(selected.iter().map(|j| j.id).collect::<Vec<_>>(), vec![fresh]);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn attach_leaves_in_flight_writes_alone() {
    let dir = TempDir::new().unwrap();
    let daemon = open(dir.path());

    let delivered = daemon.insert(welcome(1)).await.unwrap();
    let waiting = daemon.insert(welcome(2)).await.unwrap();
    daemon.mark_sent(delivered, Utc::now()).await.unwrap();

    // The daemon is half way through marking a job sent, and writing another.
    let pending_copy = dir.path().join("pending").join(delivered.filename());
    std::fs::copy(dir.path().join("sent").join(delivered.filename()), &pending_copy).unwrap();
    let in_flight = dir.path().join("pending").join(".tmp_00000000000000000099.job.1.0");
    std::fs::write(&in_flight, b"partial").unwrap();

    let tool = FileJobStore::builder().path(dir.path()).build().unwrap();
    tool.attach().expect("attach");

    assert!(pending_copy.exists());
    assert!(in_flight.exists());

    // Both handles still allocate fresh ids.
    let from_tool = tool.insert(welcome(3)).await.unwrap();
    let from_daemon = daemon.insert(welcome(4)).await.unwrap();
    assert!(from_tool > waiting);
    assert!(from_daemon > waiting);
    assert_ne!(from_tool, from_daemon);

    // The listing still prefers the sent copy.
    let all = tool.list(None).await.unwrap();
    let ids: Vec<JobId> = all.iter().map(|j| j.id).collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(all[0].status, JobStatus::Sent);
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn attach_creates_a_missing_queue() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("spool");

    let tool = FileJobStore::builder().path(&root).build().unwrap();
    tool.attach().expect("attach");

    assert!(root.join("pending").is_dir());
    assert!(root.join("sent").is_dir());
    assert_eq!(tool.insert(welcome(1)).await.unwrap(), JobId::new(1));
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn list_filters_on_persisted_status() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path());

    let a = store.insert(welcome(1)).await.unwrap();
    let b = store.insert(welcome(2)).await.unwrap();
    store.mark_sent(a, Utc::now()).await.unwrap();

    let pending = store.list(Some(JobStatus::Pending)).await.unwrap();
    assert_eq!(pending.iter().map(|j| j.id).collect::<Vec<_>>(), vec![b]);

    let sent = store.list(Some(JobStatus::Sent)).await.unwrap();
    assert_eq!(sent.iter().map(|j| j.id).collect::<Vec<_>>(), vec![a]);

    assert!(store.list(Some(JobStatus::Dead)).await.unwrap().is_empty());
}

#[tokio::test]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn delete_removes_either_copy() {
    let dir = TempDir::new().unwrap();
    let store = open(dir.path());

    let a = store.insert(welcome(1)).await.unwrap();
    let b = store.insert(welcome(2)).await.unwrap();
    store.mark_sent(a, Utc::now()).await.unwrap();

    store.delete(a).await.unwrap();
    store.delete(b).await.unwrap();
    assert!(store.list(None).await.unwrap().is_empty());
    assert!(matches!(
        store.delete(a).await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[cfg_attr(miri, ignore = "Calls an unsupported method")]
async fn concurrent_inserts_from_two_handles() {
    let dir = TempDir::new().unwrap();
    let first = open(dir.path());
    // A second handle on the same directory, as a separate process would have.
    let second = open(dir.path());

    let mut handles = Vec::new();
    for n in 0..40 {
        let store = if n % 2 == 0 {
            first.clone()
        } else {
            second.clone()
        };
        handles.push(tokio::spawn(async move { store.insert(welcome(n)).await }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        let id = handle.await.unwrap().expect("insert");
        assert!(ids.insert(id), "duplicate id {id}");
    }

    assert_eq!(first.list(None).await.unwrap().len(), 40);
}
