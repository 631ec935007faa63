//! Local image archive: content folders plus the save index describing them.

pub mod index;
pub mod store;

pub use index::{SaveIndex, SaveIndexWriter, SavedImage, SavedPlatform, SAVE_INDEX_VERSION};
pub use store::{folder_id, ArchiveStore, DirArchive};
