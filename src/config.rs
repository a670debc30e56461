use std::path::PathBuf;

/// Configuration for an EmberDB instance
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory path for the database files
    pub dir: PathBuf,

    /// TCP port for the request protocol (default: 5555)
    pub port: u16,

    /// Worker threads serving client connections
    /// (default: available parallelism, minimum 2)
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./emberdb"),
            port: 5555,
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}

impl Config {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the listening port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the worker thread count
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(2);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.dir, PathBuf::from("./emberdb"));
        assert_eq!(config.port, 5555);
        assert!(config.workers >= 2);
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new("/tmp/test").port(7000).workers(8);
        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.port, 7000);
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn test_workers_floor() {
        let config = Config::default().workers(1);
        assert_eq!(config.workers, 2);
    }
}
