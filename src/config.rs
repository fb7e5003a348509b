//! Server configuration parsing from camrc
//!
//! camrc is a plain `key value` file, one setting per line, `#` comments:
//! - port, data_path, image_path, status_path
//! - startup_file (command file executed at boot)
//! - shutter_enabled (true/false)
//! - secondary host:port (repeatable; presence makes this the master)
//! - this_computer (bank index, 0 on the master)
//! - rows_per_computer (module rows handled per computer)
//! - max_writers (concurrent readout writer limit)

use std::fs;
use std::path::{Path, PathBuf};

/// Default command port, unchanged since the original deployments
pub const DEFAULT_PORT: u16 = 41234;

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Settings and command files live under here
    pub data_path: PathBuf,
    /// Default destination for images
    pub image_path: PathBuf,
    /// Status snapshot directory
    pub status_path: PathBuf,
    /// Command file run before accepting connections
    pub startup_file: Option<PathBuf>,
    pub shutter_enabled: bool,
    /// Secondary computer addresses, in bank order
    pub secondaries: Vec<String>,
    /// Index of this computer within the detector (0 = master)
    pub this_computer: usize,
    /// Module rows per computer, for global to local row translation
    pub rows_per_computer: u32,
    /// Concurrent readout writers before spawn throttling
    pub max_writers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            data_path: PathBuf::from("."),
            image_path: PathBuf::from("."),
            status_path: PathBuf::from("cam_stat"),
            startup_file: None,
            shutter_enabled: true,
            secondaries: Vec::new(),
            this_computer: 0,
            rows_per_computer: 0,
            max_writers: 4,
        }
    }
}

impl Config {
    /// Parse configuration from a camrc file; missing file yields defaults
    pub fn from_file(path: &Path) -> Option<Config> {
        let content = fs::read_to_string(path).ok()?;
        Some(Config::parse(&content))
    }

    /// Parse configuration from content string. Unknown keys and malformed
    /// values are ignored; the server must come up with whatever is valid.
    pub fn parse(content: &str) -> Config {
        let mut config = Config::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k, v.trim()),
                None => (line, ""),
            };

            match key {
                "port" => {
                    if let Ok(p) = value.parse() {
                        config.port = p;
                    }
                }
                "data_path" => config.data_path = expand_tilde(value),
                "image_path" => config.image_path = expand_tilde(value),
                "status_path" => config.status_path = expand_tilde(value),
                "startup_file" => {
                    if !value.is_empty() {
                        config.startup_file = Some(expand_tilde(value));
                    }
                }
                "shutter_enabled" => config.shutter_enabled = parse_bool(value),
                "secondary" => {
                    if !value.is_empty() {
                        config.secondaries.push(value.to_string());
                    }
                }
                "this_computer" => {
                    if let Ok(n) = value.parse() {
                        config.this_computer = n;
                    }
                }
                "rows_per_computer" => {
                    if let Ok(n) = value.parse() {
                        config.rows_per_computer = n;
                    }
                }
                "max_writers" => {
                    if let Ok(n) = value.parse::<usize>() {
                        config.max_writers = n.max(1);
                    }
                }
                _ => {}
            }
        }

        config
    }

    /// A computer with secondaries configured coordinates the detector
    pub fn is_master(&self) -> bool {
        !self.secondaries.is_empty()
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "yes" | "on" | "1")
}
