pub mod manifest;
pub mod package;
pub mod project;
pub mod spec;

pub use manifest::{Manifest, ManifestEntry, RepoSource};
pub use package::{PackageId, VersionSpec};
pub use project::Project;
pub use spec::{Mode, PackageSpec, PreserveLevel, Tracking, UpgradeLevel};
