pub mod log_entries;
pub mod sessions;
