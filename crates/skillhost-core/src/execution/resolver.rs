//! Entrypoint descriptors and the resolver trait.
//!
//! A descriptor is `<relative-file-path>` or `<relative-file-path>:<symbol>`;
//! when the symbol is omitted the handler is [`DEFAULT_ENTRYPOINT_SYMBOL`].
//! Resolution itself (reading the file, finding the symbol) is done by a
//! [`EntrypointResolver`] implementation in skillhost-infra.

use std::fmt;
use std::future::Future;
use std::path::{Component, Path, PathBuf};

use skillhost_types::run::RunErrorKind;
use skillhost_types::skill::DEFAULT_ENTRYPOINT_SYMBOL;
use thiserror::Error;

use super::handler::SkillHandler;

/// Why an entrypoint could not be turned into a handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("entrypoint not found: {0}")]
    EntrypointNotFound(String),

    #[error("symbol '{symbol}' not found in {file}")]
    SymbolNotFound { file: String, symbol: String },

    #[error("'{symbol}' in {file} is not invocable: {reason}")]
    NotInvocable {
        file: String,
        symbol: String,
        reason: String,
    },
}

impl ResolveError {
    pub fn kind(&self) -> RunErrorKind {
        match self {
            Self::EntrypointNotFound(_) => RunErrorKind::EntrypointNotFound,
            Self::SymbolNotFound { .. } => RunErrorKind::SymbolNotFound,
            Self::NotInvocable { .. } => RunErrorKind::NotInvocable,
        }
    }
}

/// A parsed entrypoint descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrypointDescriptor {
    path: PathBuf,
    symbol: Option<String>,
}

impl EntrypointDescriptor {
    /// Parse `path[:symbol]`.
    ///
    /// The path must be relative and stay inside the bundle root.
    pub fn parse(raw: &str) -> Result<Self, ResolveError> {
        let (path, symbol) = match raw.split_once(':') {
            Some((path, symbol)) => (path.trim(), Some(symbol.trim())),
            None => (raw.trim(), None),
        };

        if path.is_empty() {
            return Err(ResolveError::EntrypointNotFound(format!(
                "empty entrypoint path in '{raw}'"
            )));
        }

        let relative = Path::new(path);
        let contained = !relative.is_absolute()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(ResolveError::EntrypointNotFound(format!(
                "{path} (entrypoint must be a path inside the bundle)"
            )));
        }

        let symbol = match symbol {
            Some("") => {
                return Err(ResolveError::SymbolNotFound {
                    file: path.to_string(),
                    symbol: String::new(),
                });
            }
            Some(symbol) => Some(symbol.to_string()),
            None => None,
        };

        Ok(Self {
            path: relative.to_path_buf(),
            symbol,
        })
    }

    /// Bundle-relative file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Symbol to invoke, falling back to the default.
    pub fn symbol(&self) -> &str {
        self.symbol.as_deref().unwrap_or(DEFAULT_ENTRYPOINT_SYMBOL)
    }

    /// Whether the descriptor named its symbol explicitly.
    pub fn has_explicit_symbol(&self) -> bool {
        self.symbol.is_some()
    }

    /// Absolute location of the entrypoint file under `bundle_root`.
    pub fn locate(&self, bundle_root: &Path) -> PathBuf {
        bundle_root.join(&self.path)
    }
}

impl fmt::Display for EntrypointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{}:{}", self.path.display(), symbol),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Turns an entrypoint descriptor into a callable handler.
pub trait EntrypointResolver: Send + Sync {
    type Handler: SkillHandler + 'static;

    fn resolve(
        &self,
        bundle_root: &Path,
        descriptor: &EntrypointDescriptor,
    ) -> impl Future<Output = Result<Self::Handler, ResolveError>> + Send;
}
