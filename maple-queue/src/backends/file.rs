use std::{
    collections::{BTreeMap, BTreeSet},
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maple_common::queue;
use parking_lot::Mutex as SyncMutex;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::{
    EmailJob, Failure, JobId, JobStatus, JobStore, NewJob, Result, SerializationError,
    StorageError, ValidationError,
};

const PENDING_DIR: &str = "pending";
const SENT_DIR: &str = "sent";
const CORRUPT_DIR: &str = "corrupt";
const TEMP_PREFIX: &str = ".tmp_";

/// How many ids an insert may skip over (because another process holds them)
/// before giving up.
const MAX_INSERT_ATTEMPTS: usize = 1024;

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

const SENSITIVE_PREFIXES: [&str; 9] = [
    "/etc",
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/boot",
    "/sys",
    "/proc",
    "/dev",
];

/// File-backed job store.
///
/// Each job is a single bincode file named after its id, kept under one of
/// these subdirectories:
/// - `pending/{id}.job` - jobs awaiting delivery, including exhausted ones
/// - `sent/{id}.job` - delivered jobs
/// - `corrupt/{id}.job` - pending files that could not be decoded, moved
///   aside by [`select_eligible`](JobStore::select_eligible) and kept for
///   inspection
///
/// # Atomicity
/// Nothing is ever written in place. Inserts write a temporary file and
/// hard-link it to its final name, which fails rather than overwrites if the
/// id is taken. Updates write a temporary file and rename it over the old one.
/// Marking a job sent writes the new file into `sent/` before removing the
/// pending copy; a crash between the two leaves both, and [`init`](Self::init)
/// resolves that in favour of `sent/`.
///
/// # Concurrency
/// Mutations are serialised by an async mutex shared between clones. Readers
/// do not take it: renames are atomic, so a reader sees either the old or the
/// new file.
///
/// # Exhausted jobs
/// Retry counts only grow, so once a pending job is seen at or past the retry
/// ceiling its id is remembered and selection stops decoding its file.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    path: PathBuf,
    next_id: Arc<AtomicU64>,
    write_lock: Arc<Mutex<()>>,
    retry_floor: Arc<SyncMutex<BTreeMap<JobId, u32>>>,
    unreadable: Arc<AtomicU64>,
}

impl Default for FileJobStore {
    fn default() -> Self {
        Self::at(PathBuf::from("/var/spool/maple"))
    }
}

impl FileJobStore {
    fn at(path: PathBuf) -> Self {
        Self {
            path,
            next_id: Arc::new(AtomicU64::new(1)),
            write_lock: Arc::new(Mutex::new(())),
            retry_floor: Arc::new(SyncMutex::new(BTreeMap::new())),
            unreadable: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn builder() -> FileJobStoreBuilder {
        FileJobStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of job files this handle has found undecodable and skipped.
    #[must_use]
    pub fn unreadable(&self) -> u64 {
        self.unreadable.load(Ordering::Relaxed)
    }

    /// Validate a queue directory.
    ///
    /// Rejects relative paths, `..` components and well-known system
    /// directories.
    ///
    /// # Errors
    /// Returns the first rule the path breaks.
    pub fn validate_path(path: &Path) -> std::result::Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentTraversal(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        if let Some(prefix) = SENSITIVE_PREFIXES
            .into_iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix,
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    /// Prepare the queue directory for use by its owning process.
    ///
    /// Creates the directory layout, removes temporary files left by
    /// interrupted writes, drops pending copies of jobs that already reached
    /// `sent/`, and resumes id allocation after the highest id on disk.
    ///
    /// Only the daemon that delivers from this directory should call this.
    /// Anything running next to it uses [`attach`](Self::attach).
    ///
    /// # Errors
    /// - If a directory cannot be created or read
    /// - If the path exists but is not a directory
    pub fn init(&self) -> Result<()> {
        queue!("Initialising job queue at {}", self.path.display());

        self.create_layout()?;

        let cleaned = self.remove_temp_files()?;
        if cleaned > 0 {
            queue!(
                level = INFO,
                "Cleaned up {cleaned} temporary files from interrupted writes"
            );
        }

        let sent = Self::scan_blocking(&self.sent_dir())?;
        let pending = Self::scan_blocking(&self.pending_dir())?;

        let mut reconciled = 0;
        for id in pending.intersection(&sent) {
            std::fs::remove_file(self.pending_path(*id))?;
            reconciled += 1;
        }
        if reconciled > 0 {
            queue!(
                level = WARN,
                "Removed {reconciled} pending copies of jobs that were already sent"
            );
        }

        let next_id = self.resume_ids(sent.iter().chain(pending.iter()).copied())?;

        queue!(
            level = INFO,
            pending = pending.len() - reconciled,
            sent = sent.len(),
            next_id,
            "Job queue ready"
        );

        Ok(())
    }

    /// Open a queue directory that another process may be writing to.
    ///
    /// Creates any missing directories and resumes id allocation after the
    /// highest id on disk. Temporary files and pending copies of sent jobs
    /// are left alone, since they may belong to a write that is still in
    /// progress.
    ///
    /// # Errors
    /// - If a directory cannot be created or read
    /// - If the path exists but is not a directory
    pub fn attach(&self) -> Result<()> {
        self.create_layout()?;

        let sent = Self::scan_blocking(&self.sent_dir())?;
        let pending = Self::scan_blocking(&self.pending_dir())?;
        let next_id = self.resume_ids(sent.into_iter().chain(pending))?;

        queue!(
            level = DEBUG,
            next_id,
            "Attached to job queue at {}",
            self.path.display()
        );

        Ok(())
    }

    fn create_layout(&self) -> Result<()> {
        for dir in [
            self.path.clone(),
            self.pending_dir(),
            self.sent_dir(),
            self.corrupt_dir(),
        ] {
            if !dir.try_exists()? {
                queue!("{} does not exist, creating...", dir.display());
                std::fs::create_dir_all(&dir)?;
            } else if !dir.is_dir() {
                return Err(ValidationError::NotDirectory(dir.display().to_string()).into());
            }
        }
        Ok(())
    }

    /// Move id allocation past every id in `known` and in `corrupt/`.
    /// Returns the next id this handle will hand out.
    fn resume_ids(&self, known: impl Iterator<Item = JobId>) -> Result<u64> {
        let set_aside = Self::scan_blocking(&self.corrupt_dir())?;
        let highest = known
            .chain(set_aside)
            .map(JobId::get)
            .max()
            .unwrap_or(0);

        let next = highest + 1;
        self.next_id.fetch_max(next, Ordering::SeqCst);
        Ok(self.next_id.load(Ordering::SeqCst))
    }

    fn pending_dir(&self) -> PathBuf {
        self.path.join(PENDING_DIR)
    }

    fn sent_dir(&self) -> PathBuf {
        self.path.join(SENT_DIR)
    }

    fn corrupt_dir(&self) -> PathBuf {
        self.path.join(CORRUPT_DIR)
    }

    fn pending_path(&self, id: JobId) -> PathBuf {
        self.pending_dir().join(id.filename())
    }

    fn sent_path(&self, id: JobId) -> PathBuf {
        self.sent_dir().join(id.filename())
    }

    /// Temporary files carry the writer's pid and a per-process sequence
    /// number, so no two writers ever share one.
    fn temp_path(dir: &Path, id: JobId) -> PathBuf {
        dir.join(format!(
            "{TEMP_PREFIX}{}.{}.{}",
            id.filename(),
            std::process::id(),
            TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn remove_temp_files(&self) -> Result<usize> {
        let mut cleaned = 0;
        for dir in [self.pending_dir(), self.sent_dir()] {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                    std::fs::remove_file(entry.path())?;
                    cleaned += 1;
                }
            }
        }
        Ok(cleaned)
    }

    fn scan_blocking(dir: &Path) -> Result<BTreeSet<JobId>> {
        let mut ids = BTreeSet::new();
        for entry in std::fs::read_dir(dir)? {
            if let Some(id) = JobId::from_filename(&entry?.file_name().to_string_lossy()) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Ids of the job files in `dir`, ascending. Temporary and foreign files
    /// are ignored.
    async fn scan(dir: &Path) -> Result<Vec<JobId>> {
        let mut entries = fs::read_dir(dir).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with(TEMP_PREFIX)
                && let Some(id) = JobId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort_unstable();
        Ok(ids)
    }

    fn encode(job: &EmailJob) -> Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            job,
            bincode::config::standard(),
        )?)
    }

    fn decode(id: JobId, bytes: &[u8]) -> Result<EmailJob> {
        let (job, _): (EmailJob, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;

        if job.id != id {
            return Err(SerializationError::Corrupted(format!(
                "file for job {id} contains job {}",
                job.id
            ))
            .into());
        }

        Ok(job)
    }

    /// Read one job file; a file that vanished in the meantime is `None`.
    async fn read_job(id: JobId, path: &Path) -> Result<Option<EmailJob>> {
        match fs::read(path).await {
            Ok(bytes) => Self::decode(id, &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Move an undecodable pending file into `corrupt/`. A failed move only
    /// costs a re-read next time, so it is logged rather than returned.
    async fn set_aside(&self, id: JobId, error: &SerializationError) {
        let skipped = self.unreadable.fetch_add(1, Ordering::Relaxed) + 1;
        let target = self.corrupt_dir().join(id.filename());

        let _guard = self.write_lock.lock().await;
        match fs::rename(self.pending_path(id), &target).await {
            Ok(()) => queue!(
                level = WARN,
                job_id = id.get(),
                unreadable = skipped,
                error = %error,
                "Moved unreadable job file to {}",
                target.display()
            ),
            Err(e) => queue!(
                level = WARN,
                job_id = id.get(),
                unreadable = skipped,
                error = %error,
                "Skipping unreadable job file, could not move it aside: {e}"
            ),
        }
    }

    async fn write_durable(path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Write `job` to `target` through a temporary file in `dir`.
    async fn replace(dir: &Path, target: &Path, job: &EmailJob) -> Result<()> {
        let temp = Self::temp_path(dir, job.id);
        Self::write_durable(&temp, &Self::encode(job)?).await?;

        if let Err(e) = fs::rename(&temp, target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        Ok(())
    }

    /// Read a job for listing. Undecodable files are counted, logged and left
    /// out; [`get`](JobStore::get) still reports them.
    async fn read_listed(&self, id: JobId, path: &Path) -> Result<Option<EmailJob>> {
        match Self::read_job(id, path).await {
            Err(StorageError::Serialization(e)) => {
                self.unreadable.fetch_add(1, Ordering::Relaxed);
                queue!(
                    level = WARN,
                    job_id = id.get(),
                    error = %e,
                    "Leaving unreadable job file {} out of the listing",
                    path.display()
                );
                Ok(None)
            }
            other => other,
        }
    }

    /// Load a pending job for mutation, explaining why it cannot be mutated
    /// if it is not pending. Callers hold the write lock.
    async fn load_pending(&self, id: JobId) -> Result<EmailJob> {
        if let Some(job) = Self::read_job(id, &self.pending_path(id)).await? {
            return Ok(job);
        }

        if fs::try_exists(self.sent_path(id)).await? {
            Err(StorageError::InvalidTransition {
                id,
                status: JobStatus::Sent,
                action: "change a delivered job",
            })
        } else {
            Err(StorageError::NotFound(id))
        }
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    #[tracing::instrument(level = "debug", skip_all, fields(recipient = %job.recipient))]
    async fn insert(&self, job: NewJob) -> Result<JobId> {
        let pending_dir = self.pending_dir();

        for _ in 0..MAX_INSERT_ATTEMPTS {
            let id = JobId::new(self.next_id.fetch_add(1, Ordering::SeqCst));

            // Another process may have allocated and delivered this id already.
            if fs::try_exists(self.sent_path(id)).await? {
                continue;
            }

            let record = job.clone().into_job(id);
            let temp = Self::temp_path(&pending_dir, id);
            Self::write_durable(&temp, &Self::encode(&record)?).await?;

            let linked = fs::hard_link(&temp, self.pending_path(id)).await;
            let _ = fs::remove_file(&temp).await;

            match linked {
                Ok(()) => {
                    queue!(level = DEBUG, job_id = id.get(), "Queued job for {}", record.recipient);
                    return Ok(id);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    queue!(level = DEBUG, job_id = id.get(), "Job id already taken, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StorageError::Internal(format!(
            "no free job id after {MAX_INSERT_ATTEMPTS} attempts"
        )))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn select_eligible(
        &self,
        limit: usize,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<EmailJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let ids = Self::scan(&self.pending_dir()).await?;
        self.retry_floor
            .lock()
            .retain(|id, _| ids.binary_search(id).is_ok());

        let mut eligible = Vec::new();
        for id in ids {
            let exhausted = self
                .retry_floor
                .lock()
                .get(&id)
                .is_some_and(|&floor| floor >= max_retries);
            if exhausted {
                continue;
            }

            match Self::read_job(id, &self.pending_path(id)).await {
                Ok(Some(job)) => {
                    if job.retry_count >= max_retries {
                        self.retry_floor.lock().insert(id, job.retry_count);
                    } else if job.is_eligible(max_retries, now) {
                        eligible.push(job);
                    }
                }
                Ok(None) => {}
                Err(StorageError::Serialization(e)) => self.set_aside(id, &e).await,
                Err(e) => return Err(e),
            }
        }

        eligible.sort_by(EmailJob::selection_order);
        eligible.truncate(limit);

        Ok(eligible)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn mark_sent(&self, id: JobId, sent_at: DateTime<Utc>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut job = self.load_pending(id).await?;
        job.record_sent(sent_at)?;

        Self::replace(&self.sent_dir(), &self.sent_path(id), &job).await?;
        fs::remove_file(self.pending_path(id)).await?;

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, failure))]
    async fn mark_failed(&self, id: JobId, failure: Failure) -> Result<u32> {
        let _guard = self.write_lock.lock().await;

        let mut job = self.load_pending(id).await?;
        let retry_count = job.record_failure(failure)?;

        Self::replace(&self.pending_dir(), &self.pending_path(id), &job).await?;

        Ok(retry_count)
    }

    async fn get(&self, id: JobId) -> Result<EmailJob> {
        // `sent/` first: it wins while a crashed `mark_sent` left two copies.
        if let Some(job) = Self::read_job(id, &self.sent_path(id)).await? {
            return Ok(job);
        }

        Self::read_job(id, &self.pending_path(id))
            .await?
            .ok_or(StorageError::NotFound(id))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(&self, status: Option<JobStatus>) -> Result<Vec<EmailJob>> {
        let mut jobs = Vec::new();

        if status.is_none_or(|s| s == JobStatus::Sent) {
            for id in Self::scan(&self.sent_dir()).await? {
                if let Some(job) = self.read_listed(id, &self.sent_path(id)).await? {
                    jobs.push(job);
                }
            }
        }

        if status.is_none_or(|s| s == JobStatus::Pending) {
            let delivered: BTreeSet<JobId> = jobs.iter().map(|job| job.id).collect();
            for id in Self::scan(&self.pending_dir()).await? {
                if delivered.contains(&id) {
                    continue;
                }
                if let Some(job) = self.read_listed(id, &self.pending_path(id)).await? {
                    jobs.push(job);
                }
            }
        }

        jobs.sort_by_key(|job| job.id);
        Ok(jobs)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete(&self, id: JobId) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut removed = false;
        for path in [self.sent_path(id), self.pending_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed {
            self.retry_floor.lock().remove(&id);
            queue!(level = DEBUG, job_id = id.get(), "Deleted job");
            Ok(())
        } else {
            Err(StorageError::NotFound(id))
        }
    }
}

#[derive(Debug, Default)]
pub struct FileJobStoreBuilder {
    path: Option<PathBuf>,
}

impl FileJobStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Build the store. Call [`FileJobStore::init`] or
    /// [`FileJobStore::attach`] before use.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous.
    pub fn build(self) -> Result<FileJobStore> {
        let store = self.path.map_or_else(FileJobStore::default, FileJobStore::at);
        FileJobStore::validate_path(&store.path)?;
        Ok(store)
    }
}
