//! In-memory stores and scripted upstreams shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::types::Json;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::infrastructure::queue::retry::{RetryPolicy, Settlement};
use crate::infrastructure::queue::{dispatch, Attempt, DeliveryHandler, JobQueue, QueueConsumer};
use crate::modules::jobs::events::QueueItem;
use crate::modules::jobs::model::{ContentBundle, Job, JobStatus, NewJob};
use crate::modules::jobs::repository::JobStore;
use crate::modules::users::model::{PlanTier, QuotaKind, User};
use crate::modules::users::repository::UserStore;
use crate::pipeline::upstream::{
    GenerativeModel, MediaService, RemoteFile, RemoteFileState, VideoMetadata, VideoSource,
};
use crate::pipeline::MediaRef;

pub const VALID_BUNDLE_JSON: &str = r##"{
  "blogPost": "# Title\n\nBody",
  "linkedinPost": "Big news",
  "twitterThread": ["First tweet", "Second tweet"],
  "newsletter": "Hi friends"
}"##;

pub fn user_with(plan: PlanTier, standard_used: i32, fallback_used: i32) -> User {
    User {
        id: Uuid::new_v4(),
        email: "owner@example.com".to_string(),
        plan,
        monthly_quota_used: standard_used,
        whisper_quota_used: fallback_used,
        quota_reset_at: OffsetDateTime::now_utc(),
    }
}

pub fn job_fixture(status: JobStatus) -> Job {
    let now = OffsetDateTime::now_utc();
    Job {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        source_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
        video_id: "dQw4w9WgXcQ".to_string(),
        status,
        transcript: None,
        content: None,
        failed_reason: None,
        attempt_number: 1,
        is_public: false,
        created_at: now,
        updated_at: now,
    }
}

pub fn bundle_fixture() -> ContentBundle {
    ContentBundle {
        article: "# Title".to_string(),
        social_post_short: "post".to_string(),
        social_thread: vec!["one".to_string()],
        newsletter_body: "letter".to_string(),
    }
}

// --- stores ---

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub async fn insert(&self, plan: PlanTier, standard_used: i32, fallback_used: i32) -> User {
        let user = user_with(plan, standard_used, fallback_used);
        self.users.lock().await.insert(user.id, user.clone());
        user
    }

    /// (standard, fallback) units used.
    pub async fn usage(&self, id: Uuid) -> (i32, i32) {
        let users = self.users.lock().await;
        let user = &users[&id];
        (user.monthly_quota_used, user.whisper_quota_used)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn increment_usage_bounded(
        &self,
        id: Uuid,
        kind: QuotaKind,
        amount: i32,
        limit: i32,
    ) -> Result<Option<i32>> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or_else(|| anyhow!("no user {}", id))?;
        let counter = match kind {
            QuotaKind::Standard => &mut user.monthly_quota_used,
            QuotaKind::Fallback => &mut user.whisper_quota_used,
        };
        if *counter + amount > limit {
            return Ok(None);
        }
        *counter += amount;
        Ok(Some(*counter))
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    users: Option<Arc<MemoryUserStore>>,
}

impl MemoryJobStore {
    /// Store whose admissions read standard usage from `users`. Without
    /// one, every owner counts as unused.
    pub fn admitting(users: Arc<MemoryUserStore>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            users: Some(users),
        }
    }

    pub async fn seed(&self, user_id: Uuid, status: JobStatus) -> Job {
        let mut job = job_fixture(status);
        job.user_id = user_id;
        self.jobs.lock().await.insert(job.id, job.clone());
        job
    }

    pub async fn put(&self, job: Job) {
        self.jobs.lock().await.insert(job.id, job);
    }

    pub async fn get(&self, id: Uuid) -> Job {
        self.jobs.lock().await[&id].clone()
    }

    async fn transition(&self, id: Uuid, next: JobStatus, apply: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status.can_transition_to(next) => {
                job.status = next;
                apply(job);
                job.updated_at = OffsetDateTime::now_utc();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert_admitted(&self, new: NewJob, limit: i32) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().await;
        let used = match &self.users {
            Some(users) => users.usage(new.user_id).await.0,
            None => 0,
        };
        let pending = jobs
            .values()
            .filter(|job| job.user_id == new.user_id)
            .filter(|job| job.status.accepts_delivery() && job.transcript.is_none())
            .count() as i32;
        if used + pending >= limit {
            return Ok(None);
        }

        let mut job = job_fixture(JobStatus::Queued);
        job.user_id = new.user_id;
        job.source_url = new.source_url;
        job.video_id = new.video_id;
        jobs.insert(job.id, job.clone());
        Ok(Some(job))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn find_owned(&self, id: Uuid, user_id: Uuid) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .lock()
            .await
            .get(&id)
            .filter(|job| job.user_id == user_id)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.user_id == user_id)
            .cloned()
            .map(|mut job| {
                job.transcript = None;
                job
            })
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status.accepts_delivery() => {
                job.status = JobStatus::Processing;
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn save_transcript(&self, id: Uuid, transcript: &str) -> Result<()> {
        if let Some(job) = self.jobs.lock().await.get_mut(&id) {
            job.transcript = Some(transcript.to_string());
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid, bundle: &ContentBundle) -> Result<bool> {
        let bundle = bundle.clone();
        Ok(self
            .transition(id, JobStatus::Completed, |job| {
                job.content = Some(Json(bundle));
                job.failed_reason = None;
            })
            .await)
    }

    async fn fail(&self, id: Uuid, reason: &str) -> Result<bool> {
        let reason = reason.to_string();
        Ok(self
            .transition(id, JobStatus::Failed, |job| job.failed_reason = Some(reason))
            .await)
    }

    async fn requeue_failed(&self, id: Uuid, user_id: Uuid) -> Result<Option<Job>> {
        if self.find_owned(id, user_id).await?.is_none() {
            return Ok(None);
        }
        let requeued = self
            .transition(id, JobStatus::Queued, |job| {
                job.failed_reason = None;
                job.attempt_number += 1;
            })
            .await;
        if requeued {
            Ok(Some(self.get(id).await))
        } else {
            Ok(None)
        }
    }

    async fn toggle_public(&self, id: Uuid, user_id: Uuid) -> Result<Option<bool>> {
        let mut jobs = self.jobs.lock().await;
        Ok(jobs
            .get_mut(&id)
            .filter(|job| job.user_id == user_id)
            .map(|job| {
                job.is_public = !job.is_public;
                job.is_public
            }))
    }

    async fn replace_content(&self, id: Uuid, user_id: Uuid, bundle: &ContentBundle) -> Result<Option<Job>> {
        let mut jobs = self.jobs.lock().await;
        Ok(jobs
            .get_mut(&id)
            .filter(|job| job.user_id == user_id && job.status == JobStatus::Completed)
            .map(|job| {
                job.content = Some(Json(bundle.clone()));
                job.clone()
            }))
    }
}

/// Passes through to a [`MemoryJobStore`] but can be told to error on
/// lookups, on `mark_processing`, or on the next few `fail` writes.
pub struct FlakyJobStore {
    inner: Arc<MemoryJobStore>,
    broken_lookup: AtomicBool,
    broken_mark: AtomicBool,
    broken_fails: AtomicUsize,
    fail_calls: AtomicUsize,
}

impl FlakyJobStore {
    pub fn new(inner: Arc<MemoryJobStore>) -> Self {
        Self {
            inner,
            broken_lookup: AtomicBool::new(false),
            broken_mark: AtomicBool::new(false),
            broken_fails: AtomicUsize::new(0),
            fail_calls: AtomicUsize::new(0),
        }
    }

    pub fn break_lookup(&self, broken: bool) {
        self.broken_lookup.store(broken, Ordering::SeqCst);
    }

    pub fn break_mark_processing(&self, broken: bool) {
        self.broken_mark.store(broken, Ordering::SeqCst);
    }

    /// The next `count` calls to `fail` error before touching the store.
    pub fn break_next_fails(&self, count: usize) {
        self.broken_fails.store(count, Ordering::SeqCst);
    }

    pub fn fail_calls(&self) -> usize {
        self.fail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn insert_admitted(&self, job: NewJob, limit: i32) -> Result<Option<Job>> {
        self.inner.insert_admitted(job, limit).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Job>> {
        if self.broken_lookup.load(Ordering::SeqCst) {
            bail!("connection pool timed out");
        }
        self.inner.find_by_id(id).await
    }

    async fn find_owned(&self, id: Uuid, user_id: Uuid) -> Result<Option<Job>> {
        self.inner.find_owned(id, user_id).await
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Job>> {
        self.inner.list_for_user(user_id).await
    }

    async fn mark_processing(&self, id: Uuid) -> Result<Option<Job>> {
        if self.broken_mark.load(Ordering::SeqCst) {
            bail!("connection pool timed out");
        }
        self.inner.mark_processing(id).await
    }

    async fn save_transcript(&self, id: Uuid, transcript: &str) -> Result<()> {
        self.inner.save_transcript(id, transcript).await
    }

    async fn complete(&self, id: Uuid, bundle: &ContentBundle) -> Result<bool> {
        self.inner.complete(id, bundle).await
    }

    async fn fail(&self, id: Uuid, reason: &str) -> Result<bool> {
        self.fail_calls.fetch_add(1, Ordering::SeqCst);
        let broken = self
            .broken_fails
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if broken {
            bail!("connection reset by peer");
        }
        self.inner.fail(id, reason).await
    }

    async fn requeue_failed(&self, id: Uuid, user_id: Uuid) -> Result<Option<Job>> {
        self.inner.requeue_failed(id, user_id).await
    }

    async fn toggle_public(&self, id: Uuid, user_id: Uuid) -> Result<Option<bool>> {
        self.inner.toggle_public(id, user_id).await
    }

    async fn replace_content(&self, id: Uuid, user_id: Uuid, bundle: &ContentBundle) -> Result<Option<Job>> {
        self.inner.replace_content(id, user_id, bundle).await
    }
}

// --- queue ---

/// Queue that runs deliveries inline: retries are re-pushed immediately and
/// parked items are kept for inspection. A losing queue drops every first
/// delivery unsettled, as if its consumer had outlived the lock, and hands
/// the item out again as a redelivery.
pub struct MemoryQueue {
    pending: Mutex<VecDeque<(QueueItem, u32, bool)>>,
    enqueued: StdMutex<Vec<QueueItem>>,
    dead: StdMutex<Vec<(QueueItem, String)>>,
    deliveries: AtomicUsize,
    in_flight: AtomicUsize,
    policy: RetryPolicy,
    fail_enqueue: bool,
    lose_deliveries: bool,
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            enqueued: StdMutex::new(Vec::new()),
            dead: StdMutex::new(Vec::new()),
            deliveries: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            policy: RetryPolicy {
                max_attempts,
                base_delay: std::time::Duration::ZERO,
            },
            fail_enqueue: false,
            lose_deliveries: false,
        }
    }

    pub fn losing(max_attempts: u32) -> Self {
        Self {
            lose_deliveries: true,
            ..Self::new(max_attempts)
        }
    }

    pub fn broken() -> Self {
        Self {
            fail_enqueue: true,
            ..Self::new(3)
        }
    }

    pub fn enqueued(&self) -> Vec<QueueItem> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<(QueueItem, String)> {
        self.dead.lock().unwrap().clone()
    }

    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }

    /// Nothing waiting and nothing being handled.
    pub async fn is_drained(&self) -> bool {
        let pending = self.pending.lock().await;
        pending.is_empty() && self.in_flight.load(Ordering::SeqCst) == 0
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, item: &QueueItem) -> Result<()> {
        if self.fail_enqueue {
            bail!("broker unavailable");
        }
        self.enqueued.lock().unwrap().push(item.clone());
        self.pending.lock().await.push_back((item.clone(), 1, false));
        Ok(())
    }
}

#[async_trait]
impl QueueConsumer for MemoryQueue {
    async fn run(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        _concurrency: usize,
        shutdown: CancellationToken,
    ) -> Result<()> {
        while !shutdown.is_cancelled() {
            let next = {
                let mut pending = self.pending.lock().await;
                let next = pending.pop_front();
                if next.is_some() {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                }
                next
            };
            let Some((item, number, redelivered)) = next else {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {}
                }
                continue;
            };

            self.deliveries.fetch_add(1, Ordering::SeqCst);
            if self.lose_deliveries && !redelivered {
                self.pending.lock().await.push_back((item, number, true));
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                continue;
            }

            let attempt = Attempt { number, max: self.policy.max_attempts };
            let outcome = dispatch(handler.as_ref(), item.clone(), attempt, redelivered).await;
            match self.policy.settle(number, &outcome) {
                Settlement::Ack => {}
                Settlement::Retry { next_attempt, .. } => {
                    self.pending.lock().await.push_back((item, next_attempt, false));
                }
                Settlement::DeadLetter { reason } => {
                    self.dead.lock().unwrap().push((item, reason));
                }
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// --- upstreams ---

pub struct FakeVideoSource {
    duration_secs: Option<f64>,
    captions: Option<String>,
    reachable: bool,
    metadata_calls: AtomicUsize,
    transcript_calls: AtomicUsize,
    downloads: StdMutex<Vec<PathBuf>>,
}

impl FakeVideoSource {
    fn build(duration_secs: Option<f64>, captions: Option<String>, reachable: bool) -> Self {
        Self {
            duration_secs,
            captions,
            reachable,
            metadata_calls: AtomicUsize::new(0),
            transcript_calls: AtomicUsize::new(0),
            downloads: StdMutex::new(Vec::new()),
        }
    }

    pub fn with_captions(duration_secs: f64, text: &str) -> Self {
        Self::build(Some(duration_secs), Some(text.to_string()), true)
    }

    pub fn without_captions(duration_secs: f64) -> Self {
        Self::build(Some(duration_secs), None, true)
    }

    pub fn unreachable() -> Self {
        Self::build(None, None, false)
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn transcript_calls(&self) -> usize {
        self.transcript_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    pub fn last_download(&self) -> Option<PathBuf> {
        self.downloads.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl VideoSource for FakeVideoSource {
    async fn metadata(&self, _url: &str) -> Result<VideoMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable {
            bail!("yt-dlp exited with status 1");
        }
        Ok(VideoMetadata {
            id: "dQw4w9WgXcQ".to_string(),
            title: Some("Test video".to_string()),
            duration_secs: self.duration_secs,
            caption_url: self.captions.as_ref().map(|_| "https://captions/json3".to_string()),
        })
    }

    async fn fetch_transcript(&self, _video: &VideoMetadata) -> Result<String> {
        self.transcript_calls.fetch_add(1, Ordering::SeqCst);
        self.captions
            .clone()
            .ok_or_else(|| anyhow!("No English captions found."))
    }

    async fn download_audio(&self, _url: &str, video: &VideoMetadata, dest_dir: &Path) -> Result<PathBuf> {
        let path = dest_dir.join(format!("audio-{}.m4a", video.id));
        tokio::fs::write(&path, b"fake audio").await?;
        self.downloads.lock().unwrap().push(path.clone());
        Ok(path)
    }
}

pub struct FakeMediaService {
    processing_polls: usize,
    fail: bool,
    status_calls: AtomicUsize,
    uploads: AtomicUsize,
}

impl FakeMediaService {
    pub fn active() -> Self {
        Self::processing_then_active(0)
    }

    /// Reports PROCESSING for the first `polls` status checks.
    pub fn processing_then_active(polls: usize) -> Self {
        Self {
            processing_polls: polls,
            fail: false,
            status_calls: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::active()
        }
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    fn file(state: RemoteFileState) -> RemoteFile {
        RemoteFile {
            name: "files/audio-1".to_string(),
            uri: "https://generativelanguage.example/files/audio-1".to_string(),
            mime_type: "audio/mp4".to_string(),
            state,
        }
    }
}

#[async_trait]
impl MediaService for FakeMediaService {
    async fn upload(&self, path: &Path, _mime_type: &str, _display_name: &str) -> Result<RemoteFile> {
        assert!(path.exists(), "uploaded file must exist while uploading");
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Ok(Self::file(RemoteFileState::Failed));
        }
        if self.processing_polls > 0 {
            Ok(Self::file(RemoteFileState::Processing))
        } else {
            Ok(Self::file(RemoteFileState::Active))
        }
    }

    async fn file_status(&self, _name: &str) -> Result<RemoteFile> {
        let call = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call < self.processing_polls {
            Ok(Self::file(RemoteFileState::Processing))
        } else {
            Ok(Self::file(RemoteFileState::Active))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelCall {
    pub model: String,
    pub prompt: String,
    pub media: Option<MediaRef>,
}

pub struct FakeModel {
    reply: Option<String>,
    calls: StdMutex<Vec<ModelCall>>,
}

impl FakeModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: StdMutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            reply: None,
            calls: StdMutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<ModelCall> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl GenerativeModel for FakeModel {
    async fn generate(&self, model: &str, prompt: &str, media: Option<&MediaRef>) -> Result<String> {
        self.calls.lock().unwrap().push(ModelCall {
            model: model.to_string(),
            prompt: prompt.to_string(),
            media: media.cloned(),
        });
        self.reply
            .clone()
            .ok_or_else(|| anyhow!("connection reset by peer"))
    }
}
