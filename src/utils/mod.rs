pub mod networking;
pub mod retry;
pub mod ssh;

use std::path::Path;

/// Whether this process runs inside a container
pub fn is_in_container() -> bool {
    Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists()
}
