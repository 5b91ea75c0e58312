pub mod cache;
pub mod chat;
pub mod device;
pub mod direct;
pub mod error;
pub mod ids;
pub mod kv;
pub mod merge;
pub mod profile;
pub mod remote;
pub mod window;

pub use cache::LocalCache;
pub use chat::{ChatHandle, ChatOptions, ChatSession, ChatSignal};
pub use direct::{DirectMessagePanel, DirectOptions, SubmitState, Toast};
pub use error::SyncError;
pub use kv::{KeyValueStore, MemoryStore};
pub use profile::ProfileStore;
pub use remote::{FeedSubscription, RemoteStore};
pub use window::{WindowMode, WindowResolver};
