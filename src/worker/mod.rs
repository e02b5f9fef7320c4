//! Background cache worker: shell caching, cache GC and the share-target mailbox

pub mod cache;
pub mod mailbox;
pub mod multipart;
pub mod runtime;

pub use cache::{CacheStorage, ShellCache};
pub use mailbox::SharedImageMailbox;
pub use runtime::{
    spawn_message_loop, CacheWorker, FetchOutcome, FetchRequest, InstallReport, WorkerConfig,
    WorkerError, WorkerHandle, WorkerPhase,
};
