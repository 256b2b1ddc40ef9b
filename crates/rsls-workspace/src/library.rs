//! Library roots derived from the committed workspace.
//!
//! The host keeps its own module/dependency model; the sync service only
//! talks to it through [`ModuleModel`], replacing the whole set of library
//! roots on every successful commit.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::RwLock;

use rsls_project::LibraryRoot;

/// The host's view of library dependencies for one module.
pub trait ModuleModel: Send + Sync {
    /// Drop every previously installed root and install `roots` in one step.
    fn replace_library_roots(&self, roots: Vec<LibraryRoot>);
}

/// In-memory [`ModuleModel`] used when no host model is attached.
#[derive(Debug, Default)]
pub struct LibraryTable {
    roots: RwLock<Vec<LibraryRoot>>,
    revision: AtomicU64,
}

impl LibraryTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the installed roots.
    ///
    /// # Panics
    ///
    /// Panics if the table lock is poisoned.
    #[must_use]
    pub fn roots(&self) -> Vec<LibraryRoot> {
        self.roots.read().expect("Library table lock poisoned").clone()
    }

    /// Number of replacements applied so far.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }
}

impl ModuleModel for LibraryTable {
    fn replace_library_roots(&self, mut roots: Vec<LibraryRoot>) {
        roots.sort();
        roots.dedup();
        let mut installed = self.roots.write().expect("Library table lock poisoned");
        tracing::debug!(
            "Replacing {} library roots with {}",
            installed.len(),
            roots.len()
        );
        *installed = roots;
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use rsls_project::PackageId;

    use super::*;

    fn root(name: &str) -> LibraryRoot {
        LibraryRoot {
            package: PackageId::new(format!("{name} 1.0.0")),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            root: Utf8PathBuf::from(format!("/registry/{name}-1.0.0")),
        }
    }

    #[test]
    fn test_replace_is_full_not_incremental() {
        let table = LibraryTable::new();
        table.replace_library_roots(vec![root("serde"), root("anyhow")]);
        assert_eq!(table.roots(), vec![root("anyhow"), root("serde")]);

        table.replace_library_roots(vec![root("tokio")]);
        assert_eq!(table.roots(), vec![root("tokio")]);
        assert_eq!(table.revision(), 2);

        table.replace_library_roots(Vec::new());
        assert!(table.roots().is_empty());
    }
}
