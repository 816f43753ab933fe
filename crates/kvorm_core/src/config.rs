//! Database configuration.

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether every accepted mutation appends an audit record.
    pub audit_enabled: bool,

    /// Caller id reported when no caller has been set on the current thread.
    pub default_caller: String,

    /// Largest page `load_some` returns. Larger limits are clamped.
    pub max_page_size: usize,

    /// Pins the clock to a fixed millisecond timestamp at open time.
    pub fixed_time: Option<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audit_enabled: true,
            default_caller: "system".to_string(),
            max_page_size: 1000,
            fixed_time: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether mutations are audited.
    #[must_use]
    pub const fn audit_enabled(mut self, value: bool) -> Self {
        self.audit_enabled = value;
        self
    }

    /// Sets the fallback caller id.
    #[must_use]
    pub fn default_caller(mut self, caller: impl Into<String>) -> Self {
        self.default_caller = caller.into();
        self
    }

    /// Sets the maximum `load_some` page size.
    #[must_use]
    pub const fn max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size;
        self
    }

    /// Starts the clock fixed at `millis`.
    #[must_use]
    pub const fn fixed_time(mut self, millis: i64) -> Self {
        self.fixed_time = Some(millis);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.audit_enabled);
        assert_eq!(config.default_caller, "system");
        assert_eq!(config.max_page_size, 1000);
        assert!(config.fixed_time.is_none());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .audit_enabled(false)
            .default_caller("admin")
            .max_page_size(10)
            .fixed_time(1_000);

        assert!(!config.audit_enabled);
        assert_eq!(config.default_caller, "admin");
        assert_eq!(config.max_page_size, 10);
        assert_eq!(config.fixed_time, Some(1_000));
    }
}
