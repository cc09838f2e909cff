//! Stable exit codes for pairloop CLI commands.

use crate::coordinator::SessionReport;
use crate::core::session::SessionStatus;
use crate::error::CoordinationError;

/// Command succeeded or the Session completed.
pub const OK: i32 = 0;
/// Invalid arguments, layout or config, or any error before a Session started.
pub const INVALID: i32 = 1;
/// The Session ended in `failed`.
pub const FAILED: i32 = 2;
/// The assistant backend needs the operator to log in.
pub const AUTH_REQUIRED: i32 = 3;
/// The Session was interrupted (Ctrl-C).
pub const CANCELLED: i32 = 130;

/// Exit code for a finished `pairloop run`.
pub fn for_report(report: &SessionReport) -> i32 {
    match (&report.error, report.status()) {
        (None, SessionStatus::Completed) => OK,
        (Some(CoordinationError::AuthenticationRequired { .. }), _) => AUTH_REQUIRED,
        (Some(CoordinationError::Cancelled), _) => CANCELLED,
        _ => FAILED,
    }
}
