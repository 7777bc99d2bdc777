//! TOML configuration file parsing
//!
//! A run file holds optional `[driver]` and `[engine]` tables and one
//! `[[workload]]` table per queue:
//!
//! ```toml
//! [driver]
//! verify_read = true
//!
//! [[workload]]
//! region_end = 1048576
//! read_percentage = 70
//! qdepth = 32
//! [workload.stop]
//! seconds = 10
//! ```

use super::validator::validate_run_config;
use super::RunConfig;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse a run configuration file
pub fn parse_toml_file(path: &Path) -> Result<RunConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse a run configuration from a string
pub fn parse_toml_string(contents: &str) -> Result<RunConfig> {
    let config: RunConfig = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Parse and validate a run configuration file
pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let config = parse_toml_file(path)?;
    validate_run_config(&config)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RUN_FILE: &str = r#"
        [driver]
        verify_read = true
        fua_write = true
        strict_deallocate = true

        [engine]
        poll_wait_us = 500

        [[workload]]
        region_end = 4096
        qdepth = 16
        read_percentage = 50
        [workload.stop]
        io_count = 1000

        [[workload]]
        region_start = 4096
        region_end = 8192
        random = false
        lba_step = -8
        [workload.pattern]
        kind = "sequential"
        [workload.stop]
        seconds = 2
    "#;

    #[test]
    fn test_parse_run_config() {
        let config = parse_toml_string(RUN_FILE).unwrap();
        assert!(config.driver.verify_read);
        assert!(config.driver.fua_write);
        assert!(!config.driver.iow_term);
        assert!(config.driver.strict_deallocate);
        assert_eq!(config.engine.poll_wait_us, 500);
        assert_eq!(config.engine.drain_floor_ms, 10_000);
        assert_eq!(config.workloads.len(), 2);
        assert_eq!(config.workloads[1].lba_step, Some(-8));
        assert!(!config.workloads[1].random);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = parse_toml_string("[[workload]]\nregion_end = \"x\"").unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse TOML configuration"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(RUN_FILE.as_bytes()).unwrap();
        let config = load_run_config(file.path()).unwrap();
        assert_eq!(config.workloads[0].qdepth, 16);
    }

    #[test]
    fn test_load_rejects_invalid_workload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[[workload]]\nregion_start = 10\nregion_end = 10\n[workload.stop]\nio_count = 1\n")
            .unwrap();
        let err = load_run_config(file.path()).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("Invalid configuration"), "{}", msg);
        assert!(msg.contains("region_end"), "{}", msg);
    }

    #[test]
    fn test_missing_file() {
        let err = parse_toml_file(Path::new("/nonexistent/run.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
