//! Translation of `cargo metadata --format-version 1` output into a [`CargoWorkspace`].

use camino::Utf8Path;
use camino::Utf8PathBuf;
use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::model::CargoWorkspace;
use crate::model::Dependency;
use crate::model::DependencyKind;
use crate::model::Package;
use crate::model::PackageId;
use crate::model::PackageOrigin;
use crate::model::Target;
use crate::model::TargetKind;

#[derive(Debug, Deserialize)]
struct Metadata {
    packages: Vec<MetadataPackage>,
    workspace_members: Vec<PackageId>,
    resolve: Option<Resolve>,
    workspace_root: Utf8PathBuf,
    target_directory: Utf8PathBuf,
}

#[derive(Debug, Deserialize)]
struct MetadataPackage {
    id: PackageId,
    name: String,
    version: String,
    source: Option<String>,
    manifest_path: Utf8PathBuf,
    #[serde(default)]
    targets: Vec<MetadataTarget>,
    #[serde(default = "default_edition")]
    edition: String,
}

#[derive(Debug, Deserialize)]
struct MetadataTarget {
    name: String,
    kind: Vec<String>,
    src_path: Utf8PathBuf,
    edition: Option<String>,
    #[serde(default = "enabled")]
    doctest: bool,
    #[serde(default = "enabled")]
    test: bool,
}

#[derive(Debug, Deserialize)]
struct Resolve {
    nodes: Vec<ResolveNode>,
}

#[derive(Debug, Deserialize)]
struct ResolveNode {
    id: PackageId,
    #[serde(default)]
    deps: Vec<NodeDep>,
}

#[derive(Debug, Deserialize)]
struct NodeDep {
    name: String,
    pkg: PackageId,
    #[serde(default)]
    dep_kinds: Vec<DepKindInfo>,
}

#[derive(Debug, Deserialize)]
struct DepKindInfo {
    kind: Option<String>,
}

fn default_edition() -> String {
    "2015".to_string()
}

fn enabled() -> bool {
    true
}

/// Parse the JSON printed by `cargo metadata`.
pub fn parse_metadata(json: &str) -> Result<CargoWorkspace, serde_json::Error> {
    let metadata: Metadata = serde_json::from_str(json)?;
    Ok(workspace_from_metadata(metadata))
}

fn workspace_from_metadata(metadata: Metadata) -> CargoWorkspace {
    let members: FxHashSet<PackageId> = metadata.workspace_members.into_iter().collect();

    let mut edges: FxHashMap<PackageId, Vec<Dependency>> = FxHashMap::default();
    for node in metadata.resolve.map(|resolve| resolve.nodes).unwrap_or_default() {
        let dependencies = node
            .deps
            .into_iter()
            .map(|dep| {
                let mut kinds: Vec<DependencyKind> = dep
                    .dep_kinds
                    .iter()
                    .map(|info| DependencyKind::from_cargo(info.kind.as_deref()))
                    .collect();
                // Cargo before 1.41 doesn't report dep_kinds.
                if kinds.is_empty() {
                    kinds.push(DependencyKind::Normal);
                }
                kinds.sort_unstable();
                kinds.dedup();
                Dependency {
                    id: dep.pkg,
                    name: dep.name,
                    kinds,
                }
            })
            .collect();
        edges.insert(node.id, dependencies);
    }

    let packages = metadata
        .packages
        .into_iter()
        .map(|package| {
            let origin = classify(&package, &members);
            let content_root = package
                .manifest_path
                .parent()
                .filter(|dir| dir.is_dir())
                .map(Utf8Path::to_path_buf);
            let targets = package
                .targets
                .into_iter()
                .map(|target| Target {
                    name: target.name,
                    kinds: target
                        .kind
                        .iter()
                        .map(|kind| TargetKind::from_cargo(kind))
                        .collect(),
                    src_path: target.src_path,
                    edition: target.edition.unwrap_or_else(|| package.edition.clone()),
                    doctest: target.doctest,
                    test: target.test,
                })
                .collect();
            let dependencies = edges.remove(&package.id).unwrap_or_default();

            Package {
                id: package.id,
                name: package.name,
                version: package.version,
                source: package.source,
                origin,
                manifest_path: package.manifest_path,
                content_root,
                edition: package.edition,
                targets,
                dependencies,
            }
        })
        .collect();

    CargoWorkspace::new(metadata.workspace_root, metadata.target_directory, packages)
}

fn classify(package: &MetadataPackage, members: &FxHashSet<PackageId>) -> PackageOrigin {
    if members.contains(&package.id) {
        PackageOrigin::Workspace
    } else if is_stdlib_manifest(&package.manifest_path) {
        PackageOrigin::Stdlib
    } else {
        PackageOrigin::Dependency
    }
}

/// Whether `manifest_path` lives in a toolchain's `lib/rustlib/src` tree.
fn is_stdlib_manifest(manifest_path: &Utf8Path) -> bool {
    let components: Vec<&str> = manifest_path.components().map(|c| c.as_str()).collect();
    components
        .windows(3)
        .any(|window| window == ["lib", "rustlib", "src"])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(root: &Utf8Path, registry: &Utf8Path) -> String {
        serde_json::json!({
            "packages": [
                {
                    "id": "path+file:///app#0.1.0",
                    "name": "app",
                    "version": "0.1.0",
                    "source": null,
                    "manifest_path": root.join("Cargo.toml"),
                    "edition": "2021",
                    "targets": [
                        {"name": "app", "kind": ["bin"], "src_path": root.join("src/main.rs")},
                        {"name": "build-script-build", "kind": ["custom-build"], "src_path": root.join("build.rs"), "edition": "2018"}
                    ]
                },
                {
                    "id": "registry+https://github.com/rust-lang/crates.io-index#serde@1.0.200",
                    "name": "serde",
                    "version": "1.0.200",
                    "source": "registry+https://github.com/rust-lang/crates.io-index",
                    "manifest_path": registry.join("serde-1.0.200/Cargo.toml"),
                    "edition": "2018",
                    "targets": [
                        {"name": "serde", "kind": ["lib"], "src_path": registry.join("serde-1.0.200/src/lib.rs"), "doctest": false}
                    ]
                },
                {
                    "id": "registry+https://github.com/rust-lang/crates.io-index#gone@0.1.0",
                    "name": "gone",
                    "version": "0.1.0",
                    "source": "registry+https://github.com/rust-lang/crates.io-index",
                    "manifest_path": "/nonexistent/registry/gone-0.1.0/Cargo.toml",
                    "targets": []
                }
            ],
            "workspace_members": ["path+file:///app#0.1.0"],
            "resolve": {
                "root": "path+file:///app#0.1.0",
                "nodes": [
                    {
                        "id": "path+file:///app#0.1.0",
                        "deps": [
                            {
                                "name": "serde_renamed",
                                "pkg": "registry+https://github.com/rust-lang/crates.io-index#serde@1.0.200",
                                "dep_kinds": [{"kind": null, "target": null}, {"kind": "dev", "target": null}]
                            },
                            {
                                "name": "gone",
                                "pkg": "registry+https://github.com/rust-lang/crates.io-index#gone@0.1.0"
                            }
                        ]
                    }
                ]
            },
            "workspace_root": root,
            "target_directory": root.join("target"),
            "version": 1
        })
        .to_string()
    }

    fn utf8(path: &std::path::Path) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
    }

    #[test]
    fn test_parse_metadata_packages_and_origins() {
        let root_dir = tempfile::tempdir().unwrap();
        let registry_dir = tempfile::tempdir().unwrap();
        let root = utf8(root_dir.path());
        let registry = utf8(registry_dir.path());
        std::fs::create_dir_all(registry.join("serde-1.0.200")).unwrap();

        let workspace = parse_metadata(&fixture(&root, &registry)).unwrap();

        let names: Vec<_> = workspace.packages().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["app", "serde", "gone"]);
        assert_eq!(workspace.root(), root.as_path());
        assert_eq!(workspace.target_directory(), root.join("target"));

        let app = workspace.find_package("app").unwrap();
        assert_eq!(app.origin, PackageOrigin::Workspace);
        assert_eq!(app.content_root.as_deref(), Some(root.as_path()));

        let serde = workspace.find_package("serde").unwrap();
        assert_eq!(serde.origin, PackageOrigin::Dependency);
        assert_eq!(serde.content_root, Some(registry.join("serde-1.0.200")));
        assert!(!serde.targets[0].doctest);
        assert!(serde.lib_target().is_some());

        let gone = workspace.find_package("gone").unwrap();
        assert_eq!(gone.content_root, None);
        assert_eq!(gone.edition, "2015");
    }

    #[test]
    fn test_parse_metadata_targets_and_dependencies() {
        let root_dir = tempfile::tempdir().unwrap();
        let root = utf8(root_dir.path());
        let workspace = parse_metadata(&fixture(&root, Utf8Path::new("/registry"))).unwrap();

        let app = workspace.find_package("app").unwrap();
        assert_eq!(app.targets[0].kinds, vec![TargetKind::Bin]);
        assert_eq!(app.targets[0].edition, "2021");
        assert!(app.targets[1].is_build_script());
        assert_eq!(app.targets[1].edition, "2018");

        assert_eq!(app.dependencies.len(), 2);
        assert_eq!(app.dependencies[0].name, "serde_renamed");
        assert_eq!(
            app.dependencies[0].kinds,
            vec![DependencyKind::Normal, DependencyKind::Dev]
        );
        assert_eq!(app.dependencies[1].kinds, vec![DependencyKind::Normal]);

        let serde = workspace.find_package("serde").unwrap();
        assert!(serde.dependencies.is_empty());
    }

    #[test]
    fn test_library_roots_from_parsed_metadata() {
        let root_dir = tempfile::tempdir().unwrap();
        let registry_dir = tempfile::tempdir().unwrap();
        let root = utf8(root_dir.path());
        let registry = utf8(registry_dir.path());
        std::fs::create_dir_all(registry.join("serde-1.0.200")).unwrap();

        let workspace = parse_metadata(&fixture(&root, &registry)).unwrap();
        let roots: Vec<_> = workspace
            .library_roots()
            .into_iter()
            .map(|root| root.root)
            .collect();
        assert_eq!(roots, vec![registry.join("serde-1.0.200")]);
    }

    #[test]
    fn test_parse_metadata_without_resolve() {
        let json = r#"{
            "packages": [],
            "workspace_members": [],
            "resolve": null,
            "workspace_root": "/ws",
            "target_directory": "/ws/target"
        }"#;
        let workspace = parse_metadata(json).unwrap();
        assert!(workspace.packages().is_empty());
    }

    #[test]
    fn test_parse_metadata_rejects_garbage() {
        assert!(parse_metadata("    Updating crates.io index").is_err());
        assert!(parse_metadata(r#"{"packages": []}"#).is_err());
    }

    #[test]
    fn test_stdlib_manifest_detection() {
        assert!(is_stdlib_manifest(Utf8Path::new(
            "/home/u/.rustup/toolchains/stable/lib/rustlib/src/rust/library/core/Cargo.toml"
        )));
        assert!(!is_stdlib_manifest(Utf8Path::new(
            "/home/u/.cargo/registry/src/index/serde-1.0.200/Cargo.toml"
        )));
    }
}
