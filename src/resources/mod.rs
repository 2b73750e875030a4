//! Embedded resources
//!
//! The resource table model and the on-disk artifact layout it is read
//! from and serialized into.

pub mod artifact;
pub mod table;

pub use artifact::ArtifactImage;
pub use table::{Blob, Resource, ResourceKey, ResourceTable, ResourceTableBuilder};
