//! Toolchain discovery
//!
//! Resolves the build system (`cmake`), its backend (`ninja`) and the LLVM
//! binary directory once at startup. The resolved [`ToolchainPaths`] value is
//! immutable and is passed by reference to every component that shells out.

use crate::error::{ProcessError, ProcessResult};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable overriding the build-system executable
pub const BUILD_SYSTEM_ENV: &str = "CUSTOM_CMAKE_COMMAND";

/// Environment variable overriding the backend executable
pub const BACKEND_ENV: &str = "CUSTOM_NINJA_COMMAND";

/// Environment variable overriding the LLVM binary directory
pub const COMPILER_BIN_DIR_ENV: &str = "DAI_LLVM_BINPATH";

/// Default location of clang, llvm-profdata and llvm-cov
pub const DEFAULT_COMPILER_BIN_DIR: &str = "/usr/bin";

/// Explicit paths supplied by the caller (CLI flags or environment)
#[derive(Debug, Clone, Default)]
pub struct ToolchainOverrides {
    /// Build-system executable, used as-is when set
    pub build_system: Option<PathBuf>,
    /// Backend executable, used as-is when set
    pub backend: Option<PathBuf>,
    /// Directory containing clang and the LLVM coverage tools
    pub compiler_bin_dir: Option<PathBuf>,
}

/// Resolved toolchain paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainPaths {
    /// Build-system executable (cmake)
    pub build_system: PathBuf,
    /// Build backend executable (ninja)
    pub backend: PathBuf,
    /// Directory containing clang, llvm-profdata and llvm-cov
    pub compiler_bin_dir: PathBuf,
}

impl ToolchainPaths {
    /// Resolve all paths against the process `PATH`.
    pub fn locate(overrides: ToolchainOverrides) -> ProcessResult<Self> {
        let path_var = std::env::var_os("PATH").unwrap_or_default();
        Self::locate_with_path(overrides, &path_var)
    }

    /// Resolve all paths against an explicit search path.
    pub fn locate_with_path(overrides: ToolchainOverrides, path_var: &OsStr) -> ProcessResult<Self> {
        let build_system = resolve_tool("cmake", BUILD_SYSTEM_ENV, overrides.build_system, path_var)?;
        let backend = resolve_tool("ninja", BACKEND_ENV, overrides.backend, path_var)?;
        let compiler_bin_dir = overrides
            .compiler_bin_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPILER_BIN_DIR));

        info!(build_system = %build_system.display(), "cmake_command resolved");
        info!(backend = %backend.display(), "ninja_command resolved");
        debug!(compiler_bin_dir = %compiler_bin_dir.display(), "LLVM binary directory");

        Ok(Self {
            build_system,
            backend,
            compiler_bin_dir,
        })
    }

    /// Path of a tool inside the LLVM binary directory (e.g. `llvm-cov`)
    pub fn llvm_tool(&self, name: &str) -> PathBuf {
        self.compiler_bin_dir.join(name)
    }
}

fn resolve_tool(
    tool: &str,
    env_var: &str,
    explicit: Option<PathBuf>,
    path_var: &OsStr,
) -> ProcessResult<PathBuf> {
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        debug!(tool, path = %path.display(), "Using explicit override");
        return Ok(path);
    }

    find_in_path(tool, path_var).ok_or_else(|| ProcessError::ToolNotFound {
        tool: tool.to_string(),
        env_var: env_var.to_string(),
    })
}

/// Search a `PATH`-style variable for an executable file named `name`
pub fn find_in_path(name: &str, path_var: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_tool(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_locate_from_search_path() {
        let tmp = TempDir::new().unwrap();
        let cmake = fake_tool(tmp.path(), "cmake");
        let ninja = fake_tool(tmp.path(), "ninja");
        let path_var = OsString::from(tmp.path());

        let paths = ToolchainPaths::locate_with_path(ToolchainOverrides::default(), &path_var).unwrap();

        assert_eq!(paths.build_system, cmake);
        assert_eq!(paths.backend, ninja);
        assert_eq!(paths.compiler_bin_dir, PathBuf::from(DEFAULT_COMPILER_BIN_DIR));
        assert_eq!(paths.llvm_tool("llvm-cov"), PathBuf::from("/usr/bin/llvm-cov"));
    }

    #[test]
    fn test_override_wins_over_search_path() {
        let tmp = TempDir::new().unwrap();
        let _ = fake_tool(tmp.path(), "cmake");
        let _ = fake_tool(tmp.path(), "ninja");
        let path_var = OsString::from(tmp.path());

        let overrides = ToolchainOverrides {
            build_system: Some(PathBuf::from("/opt/cmake/bin/cmake")),
            backend: None,
            compiler_bin_dir: Some(PathBuf::from("/opt/llvm/bin")),
        };
        let paths = ToolchainPaths::locate_with_path(overrides, &path_var).unwrap();

        assert_eq!(paths.build_system, PathBuf::from("/opt/cmake/bin/cmake"));
        assert_eq!(paths.backend, tmp.path().join("ninja"));
        assert_eq!(paths.llvm_tool("clang"), PathBuf::from("/opt/llvm/bin/clang"));
    }

    #[test]
    fn test_missing_tool_is_precondition_failure() {
        let tmp = TempDir::new().unwrap();
        let _ = fake_tool(tmp.path(), "cmake");
        let path_var = OsString::from(tmp.path());

        let err = ToolchainPaths::locate_with_path(ToolchainOverrides::default(), &path_var).unwrap_err();
        match err {
            ProcessError::ToolNotFound { tool, env_var } => {
                assert_eq!(tool, "ninja");
                assert_eq!(env_var, BACKEND_ENV);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_executable_file_is_skipped() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("cmake"), "not a program").unwrap();

        assert!(find_in_path("cmake", &OsString::from(tmp.path())).is_none());
    }
}
