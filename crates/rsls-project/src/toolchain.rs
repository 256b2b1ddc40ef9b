use std::ffi::OsString;
use std::fmt;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolchainError {
    #[error("no Rust toolchain configured and `cargo` was not found on PATH")]
    NotConfigured,
    #[error("configured cargo binary `{0}` does not exist")]
    Missing(Utf8PathBuf),
    #[error("cargo binary `{0}` is not valid UTF-8")]
    NonUtf8Path(String),
}

/// A located `cargo` executable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toolchain {
    cargo: Utf8PathBuf,
}

impl Toolchain {
    /// Resolve the cargo binary: the explicit path if one is configured,
    /// otherwise `cargo` from `PATH`.
    pub fn resolve(explicit: Option<&Utf8Path>) -> Result<Self, ToolchainError> {
        Self::resolve_in(explicit, std::env::var_os("PATH"))
    }

    /// Like [`Toolchain::resolve`] but searches `search_path` instead of the
    /// process `PATH`.
    pub fn resolve_in(
        explicit: Option<&Utf8Path>,
        search_path: Option<OsString>,
    ) -> Result<Self, ToolchainError> {
        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(Self {
                    cargo: path.to_path_buf(),
                });
            }
            return Err(ToolchainError::Missing(path.to_path_buf()));
        }

        let cwd = std::env::current_dir().unwrap_or_default();
        let found = which::which_in("cargo", search_path, cwd)
            .map_err(|_| ToolchainError::NotConfigured)?;
        let cargo = Utf8PathBuf::from_path_buf(found)
            .map_err(|path| ToolchainError::NonUtf8Path(path.display().to_string()))?;
        Ok(Self { cargo })
    }

    #[must_use]
    pub fn cargo(&self) -> &Utf8Path {
        &self.cargo
    }
}

impl fmt::Display for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cargo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_must_exist() {
        let result = Toolchain::resolve_in(Some(Utf8Path::new("/definitely/not/cargo")), None);
        assert_eq!(
            result,
            Err(ToolchainError::Missing(Utf8PathBuf::from("/definitely/not/cargo")))
        );
    }

    #[test]
    fn test_explicit_path_is_used_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let cargo = Utf8PathBuf::from_path_buf(dir.path().join("cargo")).unwrap();
        std::fs::write(&cargo, "").unwrap();

        let toolchain = Toolchain::resolve_in(Some(&cargo), None).unwrap();
        assert_eq!(toolchain.cargo(), cargo);
    }

    #[test]
    fn test_unset_without_cargo_on_path() {
        let empty = tempfile::tempdir().unwrap();
        let result = Toolchain::resolve_in(None, Some(empty.path().as_os_str().to_owned()));
        assert_eq!(result, Err(ToolchainError::NotConfigured));
    }

    #[cfg(unix)]
    #[test]
    fn test_unset_finds_cargo_on_search_path() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let cargo = bin.path().join("cargo");
        std::fs::write(&cargo, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&cargo, std::fs::Permissions::from_mode(0o755)).unwrap();

        let toolchain =
            Toolchain::resolve_in(None, Some(bin.path().as_os_str().to_owned())).unwrap();
        assert_eq!(toolchain.cargo().as_std_path(), cargo);
    }
}
