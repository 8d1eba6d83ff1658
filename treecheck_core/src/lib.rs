pub mod exclusion;
pub mod walker;
pub mod hasher;
pub mod comparison;
pub mod cleanup;
pub mod report;
#[cfg(feature = "archives")]
pub mod archive;

#[cfg(test)]
mod tests_comparison;

pub use exclusion::{ExclusionMatcher, ExclusionRule, RuleKind};
pub use walker::{TreeWalk, TreeWalker};
pub use hasher::{hash_file, ContentSource, LocalSource};
pub use comparison::ComparisonEngine;
pub use report::{write_reports, JsonReport, ReportPaths};
#[cfg(feature = "archives")]
pub use archive::prepare_reference;
