#[derive(Debug)]
pub struct Config {
    pub db_connection_string: String,
    pub event_capacity: usize,
}

const DEFAULT_DB_CONNECTION_STRING: &str = "sqlite://shelfsync.sqlite?mode=rwc";
const DEFAULT_EVENT_CAPACITY: usize = 64;

impl Config {
    pub fn load() -> Self {
        let db_connection_string =
            std::env::var("SHELFSYNC_DB").unwrap_or(DEFAULT_DB_CONNECTION_STRING.into());
        let event_capacity = std::env::var("SHELFSYNC_EVENT_CAPACITY")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_EVENT_CAPACITY);
        Config {
            db_connection_string,
            event_capacity,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.db_connection_string.is_empty() {
            return Err("SHELFSYNC_DB is empty".into());
        }
        if self.event_capacity == 0 {
            return Err("SHELFSYNC_EVENT_CAPACITY must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config {
            db_connection_string: DEFAULT_DB_CONNECTION_STRING.into(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let config = Config {
            db_connection_string: DEFAULT_DB_CONNECTION_STRING.into(),
            event_capacity: 0,
        };
        assert!(config.validate().is_err());
    }
}
