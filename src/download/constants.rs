//! Constants for the download module.

use std::time::Duration;

/// Default timeout for download requests (5 minutes for large files).
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
