use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::warn;

/// Line-oriented key=value configuration. Malformed lines are logged and
/// skipped; a missing file leaves the defaults in force.
#[derive(Clone, Debug, Default)]
pub struct Config {
    values: FxHashMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let mut config = Config::new();
        for (index, line) in contents.lines().enumerate() {
            config.parse_line(line, index + 1);
        }
        Ok(config)
    }

    fn parse_line(&mut self, line: &str, line_num: usize) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        let Some((key, value)) = trimmed.split_once('=') else {
            warn!(line_num, line = trimmed, "config line has no '=', skipping");
            return;
        };

        let key = key.trim();
        if key.is_empty() {
            warn!(line_num, line = trimmed, "config line has empty key, skipping");
            return;
        }

        self.values.insert(key.to_string(), value.trim().to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).filter(|v| !v.is_empty()).unwrap_or(default)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn get_parsed<T: FromStr + Copy>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(key, value = raw, "unparseable config value, using default");
                default
            }),
            None => default,
        }
    }

    pub fn upstream(&self) -> &str {
        self.get_or("upstream", "ftp.debian.org")
    }

    pub fn cache_dir(&self) -> &str {
        self.get_or("cache_dir", "./cache")
    }

    pub fn max_retries(&self) -> u32 {
        self.get_parsed("max_retries", 3)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.get_parsed("connect_timeout", 10u64))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.get_parsed("read_timeout", 30u64))
    }

    pub fn port(&self) -> u16 {
        self.get_parsed("port", 9001)
    }

    pub fn bind_address(&self) -> &str {
        self.get_or("bind_address", "0.0.0.0")
    }

    pub fn liveness_threshold(&self) -> i32 {
        self.get_parsed("liveness_threshold", 3)
    }
}
