//! Error types and handling for TrollFools
//!
//! Uses `thiserror` for error definitions and `miette` for pretty diagnostics.
//!
//! The taxonomy separates expected conditions (a protected binary, a missing
//! catalog entry) from defects (an unreadable Mach-O, a failed privileged
//! command) so that callers can fall through candidates without masking real
//! failures.

use miette::Diagnostic;
use thiserror::Error;

/// How a spawned privileged command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The process exited with the given status code.
    Exited(i32),
    /// The process was terminated by the given signal.
    Signaled(i32),
}

impl std::fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandOutcome::Exited(code) => write!(f, "exited with code {code}"),
            CommandOutcome::Signaled(signal) => write!(f, "terminated by signal {signal}"),
        }
    }
}

/// Main error type for TrollFools operations
#[derive(Error, Diagnostic, Debug)]
pub enum TrollFoolsError {
    // Mach-O errors
    #[error("Failed to parse Mach-O: {path}: {reason}")]
    #[diagnostic(code(trollfools::macho::parse_failed))]
    ParseFailed { path: String, reason: String },

    #[error("Binary is protected by platform-store encryption: {path}")]
    #[diagnostic(
        code(trollfools::macho::protected),
        help("Encrypted slices cannot be patched. Re-install the app from a decrypted source.")
    )]
    ProtectedBinary { path: String },

    #[error("Failed to patch Mach-O: {path}: {reason}")]
    #[diagnostic(code(trollfools::macho::patch_failed))]
    PatchFailed { path: String, reason: String },

    // Target selection errors
    #[error("No eligible injection target found")]
    #[diagnostic(
        code(trollfools::target::none_eligible),
        help(
            "Every candidate binary is encrypted or unreadable. This is usually a problem with \
             the target app, not with the plug-in. Re-installing the app often helps."
        )
    )]
    NoEligibleTarget,

    // Privileged command errors
    #[error("{tool} {outcome}")]
    #[diagnostic(code(trollfools::command::failed))]
    PrivilegedCommand {
        tool: String,
        outcome: CommandOutcome,
    },

    // Catalog errors
    #[error("No catalog entry for library '{key}'")]
    #[diagnostic(
        code(trollfools::catalog::missing_entry),
        help("Import a matching <Key>.framework.zip or <Key>.dylib.zip into the library directory")
    )]
    MissingCatalogEntry { key: String },

    // Asset errors
    #[error("No valid plug-ins found")]
    #[diagnostic(
        code(trollfools::assets::empty),
        help("Supported inputs: .dylib, .framework, .bundle, .zip, .deb")
    )]
    EmptyAssetList,

    #[error("Failed to expand archive: {path}: {reason}")]
    #[diagnostic(code(trollfools::assets::archive_failed))]
    ArchiveFailed { path: String, reason: String },

    // Bundle errors
    #[error("Invalid application bundle: {path}: {reason}")]
    #[diagnostic(
        code(trollfools::bundle::invalid),
        help("The bundle must contain an Info.plist naming its executable and identifier")
    )]
    BundleInvalid { path: String, reason: String },

    // Persistence errors
    #[error("Persisted plug-in store operation failed: {message}")]
    #[diagnostic(code(trollfools::ledger::failed))]
    LedgerFailed { message: String },

    // File system errors
    #[error("IO error: {message}")]
    #[diagnostic(code(trollfools::fs::io_error))]
    IoError { message: String },
}

impl TrollFoolsError {
    pub fn parse_failed(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        TrollFoolsError::ParseFailed {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn patch_failed(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        TrollFoolsError::PatchFailed {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn bundle_invalid(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        TrollFoolsError::BundleInvalid {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn archive_failed(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        TrollFoolsError::ArchiveFailed {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn command_failed(tool: impl Into<String>, outcome: CommandOutcome) -> Self {
        TrollFoolsError::PrivilegedCommand {
            tool: tool.into(),
            outcome,
        }
    }
}

impl From<std::io::Error> for TrollFoolsError {
    fn from(err: std::io::Error) -> Self {
        TrollFoolsError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for TrollFoolsError {
    fn from(err: zip::result::ZipError) -> Self {
        TrollFoolsError::ArchiveFailed {
            path: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<inquire::InquireError> for TrollFoolsError {
    fn from(err: inquire::InquireError) -> Self {
        TrollFoolsError::IoError {
            message: err.to_string(),
        }
    }
}

impl From<plist::Error> for TrollFoolsError {
    fn from(err: plist::Error) -> Self {
        TrollFoolsError::BundleInvalid {
            path: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type alias using miette for error handling
pub type Result<T> = miette::Result<T, TrollFoolsError>;
