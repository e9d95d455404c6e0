/// Source of `createdAt` / `updatedAt` values, in milliseconds since the
/// Unix epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// The `updatedAt` to write when a document last stamped `previous` is
/// modified: the current time, but always past `previous`.
pub fn next_updated_at(now: i64, previous: i64) -> i64 {
    now.max(previous.saturating_add(1))
}
