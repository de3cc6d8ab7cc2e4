use std::collections::HashMap;

/// Per-session guard against stale fetches. A screen that refreshes on
/// focus begins a new generation for the record kind it is about to load;
/// a response computed for an older generation is rejected, so a slow
/// in-flight fetch can never overwrite data from a newer one.
#[derive(Debug, Default)]
pub struct FetchGate {
    latest: HashMap<String, u64>,
}

impl FetchGate {
    /// Start a new fetch for a record kind and return its generation.
    pub fn begin(&mut self, kind: &str) -> u64 {
        let next = self.latest.get(kind).copied().unwrap_or(0) + 1;
        self.latest.insert(kind.to_string(), next);
        next
    }

    /// Whether a fetch carrying this generation may still deliver.
    /// Requests without a generation are always admitted.
    pub fn admit(&self, kind: &str, generation: Option<u64>) -> bool {
        match generation {
            None => true,
            Some(g) => g >= self.latest.get(kind).copied().unwrap_or(0),
        }
    }
}
