pub mod logs;
pub mod sessions;
pub mod snapshots;
pub mod warnings;
