//! Filesystem entrypoint resolver.
//!
//! Locates the entrypoint file inside the bundle, decides how to launch it
//! from its extension, and checks statically that the requested symbol exists
//! and accepts one argument. Bundle code is never executed here.

use std::path::{Path, PathBuf};

use skillhost_core::execution::resolver::{EntrypointDescriptor, EntrypointResolver, ResolveError};
use skillhost_types::config::HostConfig;

use super::process::ProcessHandler;
use super::scan::{SymbolScan, scan_python, scan_shell};

/// How an entrypoint file is launched, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrypointKind {
    Python,
    Shell,
    Executable,
}

impl EntrypointKind {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") => Self::Python,
            Some("sh" | "bash") => Self::Shell,
            _ => Self::Executable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessEntrypointResolver {
    python_bin: String,
    shell_bin: String,
}

impl ProcessEntrypointResolver {
    pub fn new(python_bin: impl Into<String>, shell_bin: impl Into<String>) -> Self {
        Self {
            python_bin: python_bin.into(),
            shell_bin: shell_bin.into(),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(config.python_bin.clone(), config.shell_bin.clone())
    }

    /// Absolute, symlink-free entrypoint path, verified to be a file under the bundle root.
    async fn locate(
        &self,
        bundle_root: &Path,
        descriptor: &EntrypointDescriptor,
    ) -> Result<PathBuf, ResolveError> {
        let display = descriptor.path().display().to_string();
        let candidate = descriptor.locate(bundle_root);

        let metadata = tokio::fs::metadata(&candidate)
            .await
            .map_err(|_| ResolveError::EntrypointNotFound(display.clone()))?;
        if !metadata.is_file() {
            return Err(ResolveError::EntrypointNotFound(format!(
                "{display} (not a regular file)"
            )));
        }

        let root = tokio::fs::canonicalize(bundle_root)
            .await
            .map_err(|_| ResolveError::EntrypointNotFound(display.clone()))?;
        let file = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| ResolveError::EntrypointNotFound(display.clone()))?;
        if !file.starts_with(&root) {
            return Err(ResolveError::EntrypointNotFound(format!(
                "{display} (resolves outside the bundle)"
            )));
        }
        Ok(file)
    }

    async fn read_source(file: &Path, display: &str) -> Result<String, ResolveError> {
        tokio::fs::read_to_string(file)
            .await
            .map_err(|e| ResolveError::NotInvocable {
                file: display.to_string(),
                symbol: String::new(),
                reason: format!("source is not readable text: {e}"),
            })
    }
}

impl EntrypointResolver for ProcessEntrypointResolver {
    type Handler = ProcessHandler;

    async fn resolve(
        &self,
        bundle_root: &Path,
        descriptor: &EntrypointDescriptor,
    ) -> Result<ProcessHandler, ResolveError> {
        let file = self.locate(bundle_root, descriptor).await?;
        let display = descriptor.path().display().to_string();
        let symbol = descriptor.symbol();
        let root = bundle_root.to_path_buf();

        let kind = EntrypointKind::from_path(&file);
        tracing::debug!(entrypoint = %descriptor, ?kind, "resolving entrypoint");

        match kind {
            EntrypointKind::Python => {
                let source = Self::read_source(&file, &display).await?;
                match scan_python(&source, symbol) {
                    SymbolScan::Callable => {
                        Ok(ProcessHandler::python(&self.python_bin, file, symbol, root))
                    }
                    SymbolScan::NotCallable(reason) => Err(ResolveError::NotInvocable {
                        file: display,
                        symbol: symbol.to_string(),
                        reason,
                    }),
                    SymbolScan::Missing => Err(ResolveError::SymbolNotFound {
                        file: display,
                        symbol: symbol.to_string(),
                    }),
                }
            }
            EntrypointKind::Shell => {
                let source = Self::read_source(&file, &display).await?;
                match scan_shell(&source, symbol) {
                    SymbolScan::Callable => Ok(ProcessHandler::shell_function(
                        &self.shell_bin,
                        file,
                        symbol,
                        root,
                    )),
                    // A script without a `run` function is itself the handler.
                    _ if !descriptor.has_explicit_symbol() => {
                        Ok(ProcessHandler::shell_script(&self.shell_bin, file, root))
                    }
                    _ => Err(ResolveError::SymbolNotFound {
                        file: display,
                        symbol: symbol.to_string(),
                    }),
                }
            }
            EntrypointKind::Executable => {
                if !is_executable(&file).await {
                    return Err(ResolveError::NotInvocable {
                        file: display,
                        symbol: symbol.to_string(),
                        reason: "file is not executable".to_string(),
                    });
                }
                let symbol = descriptor.has_explicit_symbol().then_some(symbol);
                Ok(ProcessHandler::executable(file, symbol, root))
            }
        }
    }
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
async fn is_executable(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
