//! Keeping an in-memory [`CargoWorkspace`] in sync with the project on disk.
//!
//! Requests flow through three stages:
//!
//! 1. [`Debouncer`] coalesces bursts of requests into one (immediate requests
//!    skip the wait).
//! 2. [`TaskQueue`] runs `cargo metadata` for one request at a time on a
//!    blocking thread.
//! 3. A dedicated commit thread receives each finished update, installs the
//!    new snapshot, replaces the library roots in the [`ModuleModel`], and
//!    then calls listeners and the caller's continuation.
//!
//! The commit thread is the only writer of the snapshot and the library
//! roots. Readers go through [`CargoSyncService::workspace`] and always see a
//! complete workspace or none at all.

use std::error::Error as _;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::Weak;
use std::thread;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use rsls_conf::Settings;
use rsls_project::CargoInvocation;
use rsls_project::CargoWorkspace;
use rsls_project::Progress;
use rsls_project::Toolchain;
use rsls_project::UpdateError;
use rsls_project::UpdateResult;
use rsls_project::UpdateTask;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::debounce::Debouncer;
use crate::library::LibraryTable;
use crate::library::ModuleModel;
use crate::notifier::LogNotifier;
use crate::notifier::MessageType;
use crate::notifier::Notifier;
use crate::queue::Task;
use crate::queue::TaskQueue;
use crate::watcher::is_interesting;
use crate::watcher::ManifestWatcher;
use crate::watcher::WatchError;
use crate::watcher::WatchEvent;

const COMMIT_THREAD: &str = "rsls-commit";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error("workspace service for `{0}` has been disposed")]
    Disposed(String),
    #[error("the workspace service needs a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error("failed to start the commit thread")]
    CommitThread(#[source] std::io::Error),
}

/// Produces a workspace description for an invocation.
pub trait ProjectDescriber: Send + Sync + 'static {
    fn describe(&self, invocation: &CargoInvocation, progress: &dyn Progress) -> UpdateResult;
}

/// Describes projects by running `cargo metadata`.
pub struct CargoMetadata;

impl ProjectDescriber for CargoMetadata {
    fn describe(&self, invocation: &CargoInvocation, progress: &dyn Progress) -> UpdateResult {
        UpdateTask::new(invocation.clone()).run(progress)
    }
}

/// Continuation run on the commit thread after a result has been committed.
pub type AfterCommit = Box<dyn FnOnce(UpdateResult) + Send>;

type Listener = Arc<dyn Fn(&Arc<CargoWorkspace>) + Send + Sync>;

type ProgressCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Bookkeeping about committed attempts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Attempts that reached the commit thread.
    pub committed: u64,
    /// Attempt number of the newest successful commit.
    pub last_success: Option<u64>,
    /// Error of the newest attempt, cleared by a later success.
    pub last_error: Option<String>,
}

struct UpdateRequest {
    invocation: CargoInvocation,
    immediate: bool,
    after_commit: Option<AfterCommit>,
}

struct UpdateJob {
    attempt: u64,
    describer: Arc<dyn ProjectDescriber>,
    request: UpdateRequest,
}

struct FinishedUpdate {
    attempt: u64,
    request: UpdateRequest,
    result: UpdateResult,
}

impl Task for UpdateJob {
    type Output = FinishedUpdate;

    fn run(self, progress: &dyn Progress) -> FinishedUpdate {
        debug!(
            "Update attempt {} for {} started",
            self.attempt,
            self.request.invocation.project_dir()
        );
        let result = self.describer.describe(&self.request.invocation, progress);
        FinishedUpdate {
            attempt: self.attempt,
            request: self.request,
            result,
        }
    }
}

enum CommitMessage {
    Progress(String),
    Finished(FinishedUpdate),
}

struct ServiceInner {
    name: String,
    project_dir: Utf8PathBuf,
    settings: RwLock<Settings>,
    describer: Arc<dyn ProjectDescriber>,
    module_model: Arc<dyn ModuleModel>,
    notifier: Arc<dyn Notifier>,
    on_progress: ProgressCallback,
    snapshot: RwLock<Option<Arc<CargoWorkspace>>>,
    listeners: Mutex<Vec<Listener>>,
    status: Mutex<SyncStatus>,
    attempts: AtomicU64,
    disposed: AtomicBool,
    debouncer: Debouncer,
    queue: TaskQueue<UpdateJob>,
}

pub struct CargoSyncServiceBuilder {
    project_dir: Utf8PathBuf,
    settings: Settings,
    runtime: Option<Handle>,
    describer: Arc<dyn ProjectDescriber>,
    module_model: Arc<dyn ModuleModel>,
    notifier: Arc<dyn Notifier>,
    on_progress: Option<ProgressCallback>,
}

impl CargoSyncServiceBuilder {
    /// Run timers and the update queue on `runtime` instead of the current one.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    #[must_use]
    pub fn describer(mut self, describer: impl ProjectDescriber) -> Self {
        self.describer = Arc::new(describer);
        self
    }

    #[must_use]
    pub fn module_model(mut self, module_model: Arc<dyn ModuleModel>) -> Self {
        self.module_model = module_model;
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Receive progress text on the commit thread.
    #[must_use]
    pub fn on_progress(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<CargoSyncService, SyncError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };

        let name = self
            .project_dir
            .file_name()
            .map_or_else(|| self.project_dir.to_string(), str::to_string);

        let on_progress = self.on_progress.unwrap_or_else(|| {
            let name = name.clone();
            Box::new(move |text: &str| info!("{}: {}", name, text))
        });

        let (commit_tx, commit_rx) = mpsc::channel::<CommitMessage>();
        let progress_tx = commit_tx.clone();
        let progress = move |text: &str| {
            let _ = progress_tx.send(CommitMessage::Progress(text.to_string()));
        };
        let queue = TaskQueue::<UpdateJob>::new(&runtime, Arc::new(progress), move |finished| {
            if commit_tx.send(CommitMessage::Finished(finished)).is_err() {
                warn!("Commit thread is gone, dropping finished update");
            }
        });

        let inner = Arc::new(ServiceInner {
            name,
            project_dir: self.project_dir,
            debouncer: Debouncer::new(self.settings.debounce(), runtime),
            settings: RwLock::new(self.settings),
            describer: self.describer,
            module_model: self.module_model,
            notifier: self.notifier,
            on_progress,
            snapshot: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            status: Mutex::new(SyncStatus::default()),
            attempts: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            queue,
        });

        let committer = Arc::clone(&inner);
        thread::Builder::new()
            .name(COMMIT_THREAD.to_string())
            .spawn(move || {
                for message in commit_rx {
                    match message {
                        CommitMessage::Progress(text) => committer.report_progress(&text),
                        CommitMessage::Finished(finished) => committer.finish(finished),
                    }
                }
                debug!("Commit thread for {} stopped", committer.name);
            })
            .map_err(SyncError::CommitThread)?;

        Ok(CargoSyncService { inner })
    }
}

/// Owns the synchronization pipeline for one Cargo project.
///
/// Dropping the service disposes it: the pending debounce timer is
/// cancelled, the queue stops taking work, and results still in flight are
/// discarded instead of committed.
pub struct CargoSyncService {
    inner: Arc<ServiceInner>,
}

impl CargoSyncService {
    /// Start building a service for the project rooted at `project_dir`.
    #[must_use]
    pub fn builder(project_dir: impl Into<Utf8PathBuf>, settings: Settings) -> CargoSyncServiceBuilder {
        CargoSyncServiceBuilder {
            project_dir: project_dir.into(),
            settings,
            runtime: None,
            describer: Arc::new(CargoMetadata),
            module_model: Arc::new(LibraryTable::new()),
            notifier: Arc::new(LogNotifier),
            on_progress: None,
        }
    }

    /// A service with the default `cargo metadata` describer on the current runtime.
    pub fn new(project_dir: impl Into<Utf8PathBuf>, settings: Settings) -> Result<Self, SyncError> {
        Self::builder(project_dir, settings).build()
    }

    /// The latest committed workspace.
    ///
    /// `None` means no update has succeeded yet, which callers must treat as
    /// "unknown" rather than "empty".
    ///
    /// # Panics
    ///
    /// Panics if the snapshot lock is poisoned.
    #[must_use]
    pub fn workspace(&self) -> Option<Arc<CargoWorkspace>> {
        self.inner
            .snapshot
            .read()
            .expect("Workspace snapshot lock poisoned")
            .clone()
    }

    /// Ask for a refresh. Non-immediate requests are debounced.
    pub fn request_update(&self, immediate: bool) {
        self.inner.request_update(immediate, None);
    }

    /// Ask for a refresh and get the result on the commit thread once it has
    /// been committed.
    pub fn request_update_with<F>(&self, immediate: bool, after_commit: F)
    where
        F: FnOnce(UpdateResult) + Send + 'static,
    {
        self.inner.request_update(immediate, Some(Box::new(after_commit)));
    }

    /// Run an immediate update and wait until it is committed.
    pub async fn update_now(&self) -> Result<Arc<CargoWorkspace>, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.request_update_with(true, move |result| {
            let _ = tx.send(result);
        });
        match rx.await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SyncError::Disposed(self.inner.name.clone())),
        }
    }

    /// Feed a batch of file system events to the service.
    pub fn on_fs_events(&self, events: &[WatchEvent]) {
        self.inner.on_fs_events(events);
    }

    /// Watch the project directory and feed events to this service until the
    /// returned watcher is dropped.
    pub fn watch(&self) -> Result<ManifestWatcher, WatchError> {
        let service = Arc::downgrade(&self.inner);
        ManifestWatcher::new(&self.inner.project_dir, move |batch| {
            if let Some(service) = Weak::upgrade(&service) {
                service.on_fs_events(&batch);
            }
        })
    }

    /// Call `listener` on the commit thread after every successful commit.
    ///
    /// # Panics
    ///
    /// Panics if the listener lock is poisoned.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Arc<CargoWorkspace>) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .expect("Listener lock poisoned")
            .push(Arc::new(listener));
    }

    #[must_use]
    pub fn settings(&self) -> Settings {
        self.inner.settings()
    }

    /// Replace the settings used by later requests. The debounce delay is
    /// fixed when the service is built.
    ///
    /// # Panics
    ///
    /// Panics if the settings lock is poisoned.
    pub fn set_settings(&self, settings: Settings) {
        *self
            .inner
            .settings
            .write()
            .expect("Settings lock poisoned") = settings;
    }

    /// # Panics
    ///
    /// Panics if the status lock is poisoned.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner
            .status
            .lock()
            .expect("Status lock poisoned")
            .clone()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn project_dir(&self) -> &Utf8Path {
        &self.inner.project_dir
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Tear the pipeline down. Later requests and in-flight results are ignored.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Disposing workspace service for {}", self.inner.name);
        self.inner.debouncer.cancel();
        self.inner.queue.shutdown();
    }
}

impl Drop for CargoSyncService {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl ServiceInner {
    fn settings(&self) -> Settings {
        self.settings
            .read()
            .expect("Settings lock poisoned")
            .clone()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn on_fs_events(self: &Arc<Self>, events: &[WatchEvent]) {
        let settings = self.settings();
        if !settings.auto_update() {
            return;
        }

        let Some(event) = events.iter().find(|event| is_interesting(event)) else {
            return;
        };

        if let Err(e) = Toolchain::resolve(settings.cargo_path()) {
            debug!("Ignoring {:?}: {}", event, e);
            return;
        }

        debug!("{:?} changes the cargo project {}", event, self.name);
        self.request_update(false, None);
    }

    fn request_update(self: &Arc<Self>, immediate: bool, after_commit: Option<AfterCommit>) {
        if self.is_disposed() {
            debug!("Ignoring update request for disposed {}", self.name);
            return;
        }

        let request = UpdateRequest {
            invocation: CargoInvocation::from_settings(&self.settings(), self.project_dir.clone()),
            immediate,
            after_commit,
        };

        let service = Arc::downgrade(self);
        self.debouncer.submit(
            move || {
                if let Some(service) = service.upgrade() {
                    service.enqueue(request);
                }
            },
            immediate,
        );
    }

    fn enqueue(&self, request: UpdateRequest) {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Queueing update attempt {} for {}", attempt, self.name);
        let job = UpdateJob {
            attempt,
            describer: Arc::clone(&self.describer),
            request,
        };
        if let Err(e) = self.queue.run(job) {
            warn!("Update attempt {} for {} was dropped: {}", attempt, self.name, e);
        }
    }

    fn report_progress(&self, text: &str) {
        if !self.is_disposed() {
            (self.on_progress)(text);
        }
    }

    /// Commit `finished`, tell the user about failed immediate updates, then
    /// run the continuation.
    fn finish(&self, finished: FinishedUpdate) {
        let FinishedUpdate {
            attempt,
            request,
            result,
        } = finished;

        if self.is_disposed() {
            debug!("Discarding update attempt {} for disposed {}", attempt, self.name);
            return;
        }

        self.commit(attempt, &result);

        if request.immediate {
            if let Err(e) = &result {
                self.notifier.show_message(
                    MessageType::Error,
                    "Cargo project update failed",
                    &format!("{}: {}", self.name, error_chain(e)),
                );
            }
        }

        if let Some(after_commit) = request.after_commit {
            after_commit(result);
        }
    }

    fn commit(&self, attempt: u64, result: &UpdateResult) {
        debug_assert_eq!(thread::current().name(), Some(COMMIT_THREAD));

        match result {
            Ok(workspace) => {
                *self
                    .snapshot
                    .write()
                    .expect("Workspace snapshot lock poisoned") = Some(Arc::clone(workspace));
                self.module_model
                    .replace_library_roots(workspace.library_roots());

                {
                    let mut status = self.status.lock().expect("Status lock poisoned");
                    status.committed += 1;
                    status.last_success = Some(attempt);
                    status.last_error = None;
                }

                info!(
                    "Cargo project {} updated (attempt {}): {} packages",
                    self.name,
                    attempt,
                    workspace.packages().len()
                );

                // called without the lock so a listener may subscribe others
                let listeners = self
                    .listeners
                    .lock()
                    .expect("Listener lock poisoned")
                    .clone();
                for listener in &listeners {
                    listener(workspace);
                }
            }
            Err(e) => {
                let message = error_chain(e);
                {
                    let mut status = self.status.lock().expect("Status lock poisoned");
                    status.committed += 1;
                    status.last_error = Some(message.clone());
                }
                warn!(
                    "Cargo project {} update failed (attempt {}): {}",
                    self.name, attempt, message
                );
            }
        }
    }
}

/// `error: cause: cause ...`
fn error_chain(error: &UpdateError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
