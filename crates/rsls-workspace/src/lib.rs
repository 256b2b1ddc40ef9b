mod debounce;
mod library;
mod notifier;
mod queue;
mod service;
mod watcher;

pub use debounce::Debouncer;
pub use library::LibraryTable;
pub use library::ModuleModel;
pub use notifier::LogNotifier;
pub use notifier::MessageType;
pub use notifier::Notifier;
pub use queue::Task;
pub use queue::TaskQueue;
pub use service::AfterCommit;
pub use service::CargoMetadata;
pub use service::CargoSyncService;
pub use service::CargoSyncServiceBuilder;
pub use service::ProjectDescriber;
pub use service::SyncError;
pub use service::SyncStatus;
pub use watcher::is_interesting;
pub use watcher::ManifestWatcher;
pub use watcher::WatchError;
pub use watcher::WatchEvent;
