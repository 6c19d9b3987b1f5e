//! Configuration system for the oxidized-psp kernel

use crate::error::{EmulatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub kernel: KernelConfig,
    pub memory: MemoryConfig,
    pub debug: DebugConfig,
}

/// Kernel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Memory partitions created at boot
    pub partitions: Vec<PartitionConfig>,
    /// Partition that backs thread stacks and TLS blocks
    pub thread_partition: u32,
    /// Size of the per-thread TLS block
    pub tls_size: u32,
    /// Stack size of the main thread started by the host
    pub default_stack_size: u32,
    /// Smallest stack a guest may request
    pub min_stack_size: u32,
    /// Global pointer handed to threads created outside any thread context
    pub module_gp: u32,
    /// Entry address of the main thread until a module loader supplies one
    pub module_entry: u32,
}

/// One memory partition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionConfig {
    pub id: u32,
    pub name: String,
    pub base: u32,
    pub size: u32,
}

/// Guest memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Map the 16 KiB scratchpad
    pub scratchpad: bool,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_path: PathBuf,
    /// Log every syscall with its arguments and result
    pub trace_syscalls: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

// Default implementations

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            partitions: vec![
                PartitionConfig {
                    id: 1,
                    name: "kernel".to_string(),
                    base: 0x0800_0000,
                    size: 0x30_0000,
                },
                PartitionConfig {
                    id: 2,
                    name: "user".to_string(),
                    base: 0x0880_0000,
                    size: 0x180_0000,
                },
                PartitionConfig {
                    id: 5,
                    name: "volatile".to_string(),
                    base: 0x0840_0000,
                    size: 0x40_0000,
                },
            ],
            thread_partition: 2,
            tls_size: 0x4000,
            default_stack_size: 0x4_0000,
            min_stack_size: 0x200,
            module_gp: 0,
            module_entry: 0x0890_0000,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { scratchpad: true }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_to_file: false,
            log_path: PathBuf::from("oxidized-psp.log"),
            trace_syscalls: false,
        }
    }
}

impl Config {
    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| EmulatorError::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| EmulatorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-psp")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.kernel.tls_size, 0x4000);
        assert_eq!(config.kernel.min_stack_size, 0x200);
        assert_eq!(config.kernel.thread_partition, 2);
        assert_eq!(config.kernel.partitions.len(), 3);
        assert!(config.memory.scratchpad);
        assert!(!config.debug.trace_syscalls);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.kernel.partitions, config.kernel.partitions);
        assert_eq!(parsed.kernel.default_stack_size, config.kernel.default_stack_size);
        assert_eq!(parsed.debug.log_level, config.debug.log_level);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let parsed: Config = toml::from_str("[debug]\ntrace_syscalls = true\n").unwrap();
        assert!(parsed.debug.trace_syscalls);
        assert_eq!(parsed.kernel.tls_size, 0x4000);
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir()
            .join(format!("oxidized-psp-test-{}", std::process::id()))
            .join("config.toml");

        let mut config = Config::default();
        config.kernel.module_gp = 0x0890_0000;
        config.kernel.module_entry = 0x0880_4000;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.kernel.module_gp, 0x0890_0000);
        assert_eq!(loaded.kernel.module_entry, 0x0880_4000);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_bad_config_reports_config_error() {
        let path = std::env::temp_dir()
            .join(format!("oxidized-psp-bad-{}", std::process::id()))
            .join("config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "kernel = 5").unwrap();

        let result = Config::load_from(&path);
        assert!(matches!(result, Err(EmulatorError::Config(_))));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::Trace.as_filter(), "trace");
        assert_eq!(LogLevel::default().as_filter(), "info");
    }
}
