mod metadata;
mod model;
mod toolchain;
mod update;

pub use metadata::parse_metadata;
pub use model::CargoWorkspace;
pub use model::Dependency;
pub use model::DependencyKind;
pub use model::LibraryRoot;
pub use model::Package;
pub use model::PackageId;
pub use model::PackageOrigin;
pub use model::Target;
pub use model::TargetKind;
pub use toolchain::Toolchain;
pub use toolchain::ToolchainError;
pub use update::CargoInvocation;
pub use update::NoProgress;
pub use update::Progress;
pub use update::UpdateError;
pub use update::UpdateResult;
pub use update::UpdateTask;

/// File names whose creation, removal, or rename changes what cargo reports.
pub const MANIFEST_FILES: [&str; 2] = ["Cargo.toml", "build.rs"];

/// Directories whose layout cargo uses to infer targets.
pub const TARGET_DIRS: [&str; 5] = ["src", "src/bin", "tests", "examples", "benches"];
