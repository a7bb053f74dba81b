//! Error catalog and definitions for the Keel substrate.
//!
//! This module provides an error catalog with unique error codes,
//! categorized by subsystem. Each error includes remediation steps.
//!
//! # Error Code Ranges
//!
//! | Range      | Category     | Description                            |
//! |------------|--------------|----------------------------------------|
//! | E001-E099  | Config       | Configuration and setup errors         |
//! | E100-E199  | Store        | Resilient JSON store errors            |
//! | E200-E299  | Journal      | Write-ahead log errors                 |
//! | E300-E399  | Audit        | Audit trail errors                     |
//! | E400-E499  | Idempotency  | Idempotency index errors               |
//! | E500-E599  | Scheduler    | Background task scheduling errors      |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
