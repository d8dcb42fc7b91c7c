//! Shared constants used across the application.

/// User agent string used for page fetches and archive submissions.
pub const ARCHIVAL_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Reply sent when an inbound message carries no URL.
pub const NO_URL_NOTICE: &str = "URL no found.";

/// Reply sent when a batch produced nothing to report.
pub const ARCHIVE_FAILURE_NOTICE: &str = "Archives failure.";
