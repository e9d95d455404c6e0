use crate::config::IdStrategy;
use parking_lot::Mutex;
use std::sync::Arc;

/// Produces document ids. Called once per inserted document.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Lowercase ULIDs from a monotonic generator: ids minted in the same
/// millisecond still sort in creation order.
pub struct UlidGenerator {
    inner: Mutex<ulid::Generator>,
}

impl UlidGenerator {
    pub fn new() -> Self {
        UlidGenerator {
            inner: Mutex::new(ulid::Generator::new()),
        }
    }
}

impl Default for UlidGenerator {
    fn default() -> Self {
        UlidGenerator::new()
    }
}

impl IdGenerator for UlidGenerator {
    fn next_id(&self) -> String {
        let id = match self.inner.lock().generate() {
            Ok(id) => id,
            Err(e) => {
                // Random component exhausted within one millisecond.
                log::warn!("monotonic ULID generation failed ({e}); falling back to a fresh ULID");
                ulid::Ulid::new()
            }
        };
        id.to_string().to_lowercase()
    }
}

pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

pub struct NanoidGenerator;

impl IdGenerator for NanoidGenerator {
    fn next_id(&self) -> String {
        nanoid::nanoid!()
    }
}

impl IdStrategy {
    pub fn generator(self) -> Arc<dyn IdGenerator> {
        match self {
            IdStrategy::Ulid => Arc::new(UlidGenerator::new()),
            IdStrategy::Uuid => Arc::new(UuidGenerator),
            IdStrategy::Nanoid => Arc::new(NanoidGenerator),
        }
    }
}
