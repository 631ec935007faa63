//! Mirror units and the state machine that runs them.
//!
//! - [`unit`]: one source → destination task and its resolved platforms
//! - [`machine`]: MIRROR, SAVE and LOAD
//! - [`validate`]: MIRROR_VALIDATE and LOAD_VALIDATE
//! - [`job`]: adapter onto the worker pool's `Job` trait

pub mod job;
pub mod machine;
pub mod unit;
pub mod validate;

pub use job::MirrorJob;
pub use machine::Mirrorer;
pub use unit::{platform_reference, ImageLocation, MirrorMode, MirrorUnit, UnitImage};
