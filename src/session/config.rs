/// Per-session settings, handed to every session a pool creates
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Number of loaded entities kept in the session's LRU cache
    pub entity_cache_capacity: usize,

    /// Roll back open scopes when a session is dropped without `close()`
    pub rollback_on_drop: bool,
}

impl SessionConfig {
    pub const DEFAULT_CACHE_CAPACITY: usize = 256;

    pub fn new() -> Self {
        Self {
            entity_cache_capacity: Self::DEFAULT_CACHE_CAPACITY,
            rollback_on_drop: true,
        }
    }

    /// Set entity cache capacity
    pub fn entity_cache_capacity(mut self, capacity: usize) -> Self {
        self.entity_cache_capacity = capacity;
        self
    }

    /// Set rollback-on-drop behaviour
    pub fn rollback_on_drop(mut self, enabled: bool) -> Self {
        self.rollback_on_drop = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.entity_cache_capacity == 0 {
            return Err("entity_cache_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}
