//! Snapshot filename convention.
//!
//! `rota-{saved_at_ms}-{uuid}.rsnap` with the millisecond timestamp
//! zero-padded to 13 digits, so lexicographic order matches save time and
//! two writers saving in the same millisecond still get distinct names.
//! Only this module builds or recognizes snapshot names; everything else
//! treats them as opaque strings.

use regex::Regex;
use uuid::Uuid;

/// File extension for snapshot files, without the dot
pub const SNAPSHOT_EXTENSION: &str = "rsnap";

/// Build a fresh collision-free snapshot filename for a save at `saved_at_ms`
#[must_use]
pub fn snapshot_filename(saved_at_ms: i64) -> String {
    let discriminator = Uuid::now_v7().simple();
    format!("rota-{saved_at_ms:013}-{discriminator}.{SNAPSHOT_EXTENSION}")
}

/// Dot-prefixed scratch name used while a snapshot is being written.
///
/// Never matches [`is_snapshot_filename`], so half-written files are
/// invisible to version listings even if a crash leaves one behind.
#[must_use]
pub fn temp_filename() -> String {
    format!(".rota-tmp-{}", Uuid::now_v7().simple())
}

/// Check whether a directory entry looks like a snapshot file
#[must_use]
pub fn is_snapshot_filename(name: &str) -> bool {
    let re = Regex::new(r"^rota-(\d{13,})-([0-9a-f]{32})\.rsnap$").expect("Invalid regex");
    re.is_match(name)
}
