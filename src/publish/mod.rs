mod fs;
mod memory;
mod publisher;
mod store;

pub use fs::FsStore;
pub use memory::MemoryStore;
pub use publisher::{ArtifactTarget, GrantStatus, PublishAction, PublishReceipt, Publisher};
pub use store::{read_object, ObjectRef, ObjectStore, StoredObject};
