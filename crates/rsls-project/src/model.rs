//! Immutable snapshot of a Cargo workspace.
//!
//! A [`CargoWorkspace`] is built once from `cargo metadata` output and never
//! mutated afterwards. Consumers share it behind an `Arc` and a newer update
//! replaces the whole value.

use std::fmt;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;

/// Cargo's opaque package id, e.g.
/// `registry+https://github.com/rust-lang/crates.io-index#serde@1.0.200`.
///
/// It already encodes name, version and source, so it is used as the
/// package identity everywhere.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a package comes from relative to the project being edited.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageOrigin {
    /// A member of the workspace being edited.
    Workspace,
    /// Registry, git, or path dependency outside the workspace.
    Dependency,
    /// Sources shipped with a toolchain under `lib/rustlib/src`.
    Stdlib,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetKind {
    Lib,
    Bin,
    Test,
    Example,
    Bench,
    CustomBuild,
    ProcMacro,
    Other(String),
}

impl TargetKind {
    #[must_use]
    pub fn from_cargo(kind: &str) -> Self {
        match kind {
            // cargo reports library crate types as kinds as well
            "lib" | "rlib" | "dylib" | "cdylib" | "staticlib" => Self::Lib,
            "bin" => Self::Bin,
            "test" => Self::Test,
            "example" => Self::Example,
            "bench" => Self::Bench,
            "custom-build" => Self::CustomBuild,
            "proc-macro" => Self::ProcMacro,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Target {
    pub name: String,
    pub kinds: Vec<TargetKind>,
    pub src_path: Utf8PathBuf,
    pub edition: String,
    pub doctest: bool,
    pub test: bool,
}

impl Target {
    #[must_use]
    pub fn is_lib(&self) -> bool {
        self.kinds
            .iter()
            .any(|kind| matches!(kind, TargetKind::Lib | TargetKind::ProcMacro))
    }

    #[must_use]
    pub fn is_build_script(&self) -> bool {
        self.kinds.contains(&TargetKind::CustomBuild)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Normal,
    Dev,
    Build,
}

impl DependencyKind {
    #[must_use]
    pub fn from_cargo(kind: Option<&str>) -> Self {
        match kind {
            Some("dev") => Self::Dev,
            Some("build") => Self::Build,
            None | Some(_) => Self::Normal,
        }
    }
}

/// A resolved edge from one package to another.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub id: PackageId,
    /// The name the dependent uses for this crate, after any `package = ...` rename.
    pub name: String,
    pub kinds: Vec<DependencyKind>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Package {
    pub id: PackageId,
    pub name: String,
    pub version: String,
    pub source: Option<String>,
    pub origin: PackageOrigin,
    pub manifest_path: Utf8PathBuf,
    /// Directory holding the manifest, present only when it exists on disk.
    pub content_root: Option<Utf8PathBuf>,
    pub edition: String,
    pub targets: Vec<Target>,
    pub dependencies: Vec<Dependency>,
}

impl Package {
    #[must_use]
    pub fn is_workspace_member(&self) -> bool {
        self.origin == PackageOrigin::Workspace
    }

    #[must_use]
    pub fn lib_target(&self) -> Option<&Target> {
        self.targets.iter().find(|target| target.is_lib())
    }
}

/// A library root derived from a non-workspace package.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LibraryRoot {
    pub package: PackageId,
    pub name: String,
    pub version: String,
    pub root: Utf8PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CargoWorkspace {
    root: Utf8PathBuf,
    target_directory: Utf8PathBuf,
    packages: Vec<Package>,
    #[serde(skip)]
    index: FxHashMap<PackageId, usize>,
}

impl CargoWorkspace {
    #[must_use]
    pub fn new(root: Utf8PathBuf, target_directory: Utf8PathBuf, packages: Vec<Package>) -> Self {
        let index = packages
            .iter()
            .enumerate()
            .map(|(position, package)| (package.id.clone(), position))
            .collect();
        Self {
            root,
            target_directory,
            packages,
            index,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    #[must_use]
    pub fn target_directory(&self) -> &Utf8Path {
        &self.target_directory
    }

    #[must_use]
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    #[must_use]
    pub fn package(&self, id: &PackageId) -> Option<&Package> {
        self.index.get(id).map(|&position| &self.packages[position])
    }

    pub fn find_package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|package| package.name == name)
    }

    pub fn workspace_packages(&self) -> impl Iterator<Item = &Package> {
        self.packages
            .iter()
            .filter(|package| package.is_workspace_member())
    }

    /// Packages `package` depends on, skipping edges to ids this snapshot doesn't know.
    pub fn dependencies_of<'a>(&'a self, package: &'a Package) -> impl Iterator<Item = &'a Package> {
        package
            .dependencies
            .iter()
            .filter_map(|dependency| self.package(&dependency.id))
    }

    /// Content roots of every package outside the workspace.
    #[must_use]
    pub fn library_roots(&self) -> Vec<LibraryRoot> {
        self.packages
            .iter()
            .filter(|package| package.origin != PackageOrigin::Workspace)
            .filter_map(|package| {
                let root = package.content_root.clone()?;
                Some(LibraryRoot {
                    package: package.id.clone(),
                    name: package.name.clone(),
                    version: package.version.clone(),
                    root,
                })
            })
            .collect()
    }
}
