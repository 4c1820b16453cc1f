pub mod ranges;
pub mod structure;

pub use ranges::{resolve, segment, CoverSet, IssueRange};
pub use structure::{build, StructureRecord};
