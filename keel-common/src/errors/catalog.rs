//! Error catalog for the Keel substrate.
//!
//! Each error scenario maps to a unique code in the KEEL-Exxx format with a
//! message template and remediation steps, so operators can diagnose a failed
//! substrate without reading source.
//!
//! Every subsystem error enum exposes a `code()` method resolving into this
//! catalog (`StoreError::code`, `JournalError::code`, `AuditError::code`,
//! `IdempotencyError::code`, `SchedulerError::code`), and the recovery
//! decisions that never surface as errors (quarantine, checksum skips, chain
//! truncation) stamp their code onto the log line instead.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering substrate error scenarios.
///
/// Each variant maps to a unique code in the KEEL-Exxx format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Config Errors (E001-E099)
    // =========================================================================
    /// Environment variable has an invalid value
    ConfigEnvError,
    /// Configured value is out of its valid range
    ConfigOutOfRange,
    /// Substrate root directory could not be created
    ConfigRootUnavailable,

    // =========================================================================
    // Store Errors (E100-E199)
    // =========================================================================
    /// Serialized document exceeds the configured size bound
    StoreSizeExceeded,
    /// No migration registered for a recovered schema version
    StoreMigrationMissing,
    /// Document and all recovery candidates failed to parse
    StoreQuarantined,
    /// Critical filesystem operation (fsync, rename) failed
    StoreIoError,
    /// Document could not be serialized
    StoreSerializeFailed,
    /// A registered migration step failed
    StoreMigrationFailed,

    // =========================================================================
    // Journal Errors (E200-E299)
    // =========================================================================
    /// Record path escapes the configured root
    JournalPathTraversal,
    /// Segment append failed
    JournalAppendFailed,
    /// Record failed checksum verification during replay
    JournalChecksumMismatch,
    /// Record shape rejected at append time
    JournalInvalidRecord,
    /// A downstream sync target rejected a record
    JournalSyncFailed,

    // =========================================================================
    // Audit Errors (E300-E399)
    // =========================================================================
    /// Append to the audit file failed after bounded retries
    AuditAppendFailed,
    /// Hash chain verification found a break
    AuditChainBroken,
    /// Keyed MAC verification failed
    AuditHmacMismatch,

    // =========================================================================
    // Idempotency Errors (E400-E499)
    // =========================================================================
    /// Attempted transition out of a terminal entry
    IdempotencyTerminalTransition,
    /// Entry not found for a completion or failure mark
    IdempotencyUnknownKey,
    /// Index state could not be persisted or decoded
    IdempotencyPersistFailed,

    // =========================================================================
    // Scheduler Errors (E500-E599)
    // =========================================================================
    /// Task id is not registered
    SchedulerUnknownTask,
    /// Task registered twice under the same id
    SchedulerDuplicateTask,
}

/// Category of an error code, derived from its numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and setup.
    Config,
    /// Resilient JSON store.
    Store,
    /// Write-ahead log.
    Journal,
    /// Audit trail.
    Audit,
    /// Idempotency index.
    Idempotency,
    /// Background task scheduling.
    Scheduler,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Store => write!(f, "store"),
            Self::Journal => write!(f, "journal"),
            Self::Audit => write!(f, "audit"),
            Self::Idempotency => write!(f, "idempotency"),
            Self::Scheduler => write!(f, "scheduler"),
        }
    }
}

/// A catalog entry: code string, message template, remediation steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    /// Unique code, e.g. `KEEL-E101`.
    pub code: &'static str,
    /// Category derived from the code range.
    pub category: ErrorCategory,
    /// Human-readable message template.
    pub message: &'static str,
    /// Ordered remediation steps.
    pub remediation: &'static [&'static str],
}

impl ErrorCode {
    /// Look up the catalog entry for this code.
    pub fn entry(&self) -> ErrorEntry {
        match self {
            Self::ConfigEnvError => ErrorEntry {
                code: "KEEL-E001",
                category: ErrorCategory::Config,
                message: "Environment variable has an invalid value",
                remediation: &[
                    "Check the KEEL_* variable named in the error detail",
                    "Unset the variable to fall back to the built-in default",
                ],
            },
            Self::ConfigOutOfRange => ErrorEntry {
                code: "KEEL-E002",
                category: ErrorCategory::Config,
                message: "Configured value is outside its valid range",
                remediation: &["Adjust the value to the range given in the error detail"],
            },
            Self::ConfigRootUnavailable => ErrorEntry {
                code: "KEEL-E003",
                category: ErrorCategory::Config,
                message: "Substrate root directory could not be created",
                remediation: &[
                    "Verify the parent directory exists and is writable",
                    "Check filesystem permissions and free space",
                ],
            },
            Self::StoreSizeExceeded => ErrorEntry {
                code: "KEEL-E100",
                category: ErrorCategory::Store,
                message: "Serialized document exceeds the configured size bound",
                remediation: &[
                    "Reduce the payload or raise KEEL_STORE_MAX_SIZE_BYTES",
                    "Large blobs belong in the journal, not a singleton document",
                ],
            },
            Self::StoreMigrationMissing => ErrorEntry {
                code: "KEEL-E101",
                category: ErrorCategory::Store,
                message: "No migration registered for a recovered schema version",
                remediation: &[
                    "Register migrations covering every version up to the configured one",
                    "Roll back to a release that understands the on-disk version",
                ],
            },
            Self::StoreQuarantined => ErrorEntry {
                code: "KEEL-E102",
                category: ErrorCategory::Store,
                message: "Document and all recovery candidates failed to parse",
                remediation: &[
                    "Inspect the .quarantine.<timestamp> files next to the document",
                    "A fresh state is written on the next set()",
                ],
            },
            Self::StoreIoError => ErrorEntry {
                code: "KEEL-E103",
                category: ErrorCategory::Store,
                message: "Critical filesystem operation failed",
                remediation: &[
                    "Check free space and permissions on the substrate root",
                    "The in-memory epoch was rolled back; retry the write",
                ],
            },
            Self::StoreSerializeFailed => ErrorEntry {
                code: "KEEL-E104",
                category: ErrorCategory::Store,
                message: "Document could not be serialized",
                remediation: &[
                    "Check the payload for non-finite floats or other unrepresentable values",
                ],
            },
            Self::StoreMigrationFailed => ErrorEntry {
                code: "KEEL-E105",
                category: ErrorCategory::Store,
                message: "A registered migration step failed",
                remediation: &[
                    "Inspect the step named in the error detail",
                    "The on-disk document is unchanged; fix the migration and reopen",
                ],
            },
            Self::JournalPathTraversal => ErrorEntry {
                code: "KEEL-E200",
                category: ErrorCategory::Journal,
                message: "Record path escapes the configured root",
                remediation: &["Use a relative path without '..' components"],
            },
            Self::JournalAppendFailed => ErrorEntry {
                code: "KEEL-E201",
                category: ErrorCategory::Journal,
                message: "Segment append failed",
                remediation: &[
                    "Check free space on the journal directory",
                    "The in-memory sequence was rolled back; retry the append",
                ],
            },
            Self::JournalChecksumMismatch => ErrorEntry {
                code: "KEEL-E202",
                category: ErrorCategory::Journal,
                message: "Record failed checksum verification during replay",
                remediation: &[
                    "The record was skipped; inspect the segment named in the log summary",
                ],
            },
            Self::JournalInvalidRecord => ErrorEntry {
                code: "KEEL-E203",
                category: ErrorCategory::Journal,
                message: "Record shape rejected at append time",
                remediation: &[
                    "write records require a payload; delete and mkdir take none",
                ],
            },
            Self::JournalSyncFailed => ErrorEntry {
                code: "KEEL-E204",
                category: ErrorCategory::Journal,
                message: "A downstream sync target rejected a record",
                remediation: &[
                    "Check the named target's availability",
                    "The cursor stalls at the failing record and retries next drain",
                ],
            },
            Self::AuditAppendFailed => ErrorEntry {
                code: "KEEL-E300",
                category: ErrorCategory::Audit,
                message: "Append to the audit file failed after bounded retries",
                remediation: &[
                    "Check free space on the audit directory",
                    "The in-memory seq and prevHash were rolled back; retry the record",
                ],
            },
            Self::AuditChainBroken => ErrorEntry {
                code: "KEEL-E301",
                category: ErrorCategory::Audit,
                message: "Hash chain verification found a break",
                remediation: &[
                    "Run verify_chain() for the broken index and expected/actual hashes",
                    "Treat records after the break as untrusted",
                ],
            },
            Self::AuditHmacMismatch => ErrorEntry {
                code: "KEEL-E302",
                category: ErrorCategory::Audit,
                message: "Keyed MAC verification failed",
                remediation: &[
                    "Confirm the configured key matches the one used at write time",
                    "A mismatch with the right key means the record was altered",
                ],
            },
            Self::IdempotencyTerminalTransition => ErrorEntry {
                code: "KEEL-E400",
                category: ErrorCategory::Idempotency,
                message: "Attempted transition out of a terminal entry",
                remediation: &[
                    "failed entries never transition; use a new dedupe key for a retry",
                ],
            },
            Self::IdempotencyUnknownKey => ErrorEntry {
                code: "KEEL-E401",
                category: ErrorCategory::Idempotency,
                message: "Entry not found for a completion or failure mark",
                remediation: &["Call mark_pending before marking an outcome"],
            },
            Self::IdempotencyPersistFailed => ErrorEntry {
                code: "KEEL-E402",
                category: ErrorCategory::Idempotency,
                message: "Index state could not be persisted or decoded",
                remediation: &[
                    "Inspect the idempotency document and its quarantine siblings",
                ],
            },
            Self::SchedulerUnknownTask => ErrorEntry {
                code: "KEEL-E500",
                category: ErrorCategory::Scheduler,
                message: "Task id is not registered",
                remediation: &["Register the task before controlling it"],
            },
            Self::SchedulerDuplicateTask => ErrorEntry {
                code: "KEEL-E501",
                category: ErrorCategory::Scheduler,
                message: "Task registered twice under the same id",
                remediation: &["Use a unique id per task"],
            },
        }
    }

    /// The category this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        self.entry().category
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entry().code)
    }
}
