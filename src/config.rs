//! Configuration loading and validation.
//!
//! The on-disk format is `zv_config`'s flat `key = value` lines; see
//! `AppConfig`'s field docs for the recognized keys. `timeout_ms` is a
//! non-field alias handled by [`AppConfig::load`] after the derive runs: it
//! overwrites both `keep_alive_timeout_ms` and `request_timeout_ms`.

use std::path::Path;

use zv_config::{FromConfig, RawConfig};

use crate::error::{Result, ZaverError};

#[derive(Debug, Clone, zv_config_derive::FromConfig)]
pub struct AppConfig {
    pub root: String,
    pub port: u16,
    pub workers: usize,
    pub cpu_affinity: bool,
    pub keep_alive_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub threadnum: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            root: String::new(),
            port: 3000,
            workers: 1,
            cpu_affinity: false,
            keep_alive_timeout_ms: 5000,
            request_timeout_ms: 5000,
            threadnum: 4,
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = RawConfig::from_file(path)?;
        Self::from_raw(&raw)
    }

    fn from_raw(raw: &RawConfig) -> Result<Self> {
        let mut cfg = AppConfig::from_config(raw)?;

        if let Some(alias) = raw.get("timeout_ms") {
            let ms: u64 = alias.trim().parse().map_err(|_| {
                ZaverError::BadRequest(format!("invalid timeout_ms value '{alias}'"))
            })?;
            cfg.keep_alive_timeout_ms = ms;
            cfg.request_timeout_ms = ms;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.root.is_empty() {
            return Err(ZaverError::BadRequest(
                "config is missing required key 'root'".into(),
            ));
        }
        if !Path::new(&self.root).is_dir() {
            return Err(ZaverError::BadRequest(format!(
                "root '{}' is not a directory",
                self.root
            )));
        }
        Ok(())
    }

    /// Resolves the `workers = 0` ("auto") sentinel against the online CPU
    /// count, clamped to at least one worker.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        }
    }

    pub fn docroot(&self) -> std::io::Result<std::path::PathBuf> {
        std::fs::canonicalize(&self.root)
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\x1b[1;35m zaver configuration\x1b[0m")?;
        writeln!(
            f,
            "\x1b[38;5;240m ────────────────────────────────────────\x1b[0m"
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mRoot:\x1b[0m     \x1b[32m{}\x1b[0m",
            self.root
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mPort:\x1b[0m     \x1b[36m{}\x1b[0m",
            self.port
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mWorkers:\x1b[0m  \x1b[33m{}\x1b[0m",
            self.resolved_workers()
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mCPU pin:\x1b[0m  \x1b[{}m{}\x1b[0m",
            if self.cpu_affinity { "32" } else { "31" },
            if self.cpu_affinity { "ON" } else { "OFF" }
        )?;
        writeln!(
            f,
            "  \x1b[1;34m⦿\x1b[0m \x1b[1;37mTimeouts:\x1b[0m keep-alive \x1b[33m{}ms\x1b[0m, request \x1b[33m{}ms\x1b[0m",
            self.keep_alive_timeout_ms, self.request_timeout_ms
        )?;
        writeln!(
            f,
            "\x1b[38;5;240m ────────────────────────────────────────\x1b[0m"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.workers, 1);
        assert!(!cfg.cpu_affinity);
        assert_eq!(cfg.keep_alive_timeout_ms, 5000);
        assert_eq!(cfg.request_timeout_ms, 5000);
        assert_eq!(cfg.threadnum, 4);
    }

    #[test]
    fn rejects_missing_root() {
        let raw = RawConfig::parse("port = 80\n").unwrap();
        assert!(AppConfig::from_raw(&raw).is_err());
    }

    #[test]
    fn timeout_ms_alias_sets_both_timeouts() {
        let dir = std::env::temp_dir();
        let raw = RawConfig::parse(&format!(
            "root = {}\ntimeout_ms = 9000\n",
            dir.display()
        ))
        .unwrap();
        let cfg = AppConfig::from_raw(&raw).unwrap();
        assert_eq!(cfg.keep_alive_timeout_ms, 9000);
        assert_eq!(cfg.request_timeout_ms, 9000);
    }

    #[test]
    fn workers_zero_resolves_to_available_parallelism() {
        let mut cfg = AppConfig::default();
        cfg.workers = 0;
        assert!(cfg.resolved_workers() >= 1);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = std::env::temp_dir();
        let raw = RawConfig::parse(&format!(
            "root = {}\nsome_future_key = 42\n",
            dir.display()
        ))
        .unwrap();
        assert!(AppConfig::from_raw(&raw).is_ok());
    }
}
