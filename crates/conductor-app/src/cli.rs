use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use conductor_orchestrator::OrchestratorConfig;
use conductor_pty::Backend;

/// Run several interactive assistant sessions side by side from one console.
#[derive(Debug, Parser)]
#[command(name = "conductor", version)]
pub struct Args {
    /// Config file (default: ~/.conductor/config.toml)
    #[arg(long, value_name = "PATH", env = "CONDUCTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// SQLite database (default: ~/.conductor/conductor.db)
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Keep history in memory only
    #[arg(long, conflicts_with = "db")]
    pub no_db: bool,

    /// Driver backend: tmux or pty
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<Backend>,

    /// Command started in each session
    #[arg(long, value_name = "CMD")]
    pub command: Option<String>,

    /// Working directory for new sessions
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Never answer permission prompts automatically
    #[arg(long)]
    pub no_auto_approve: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Load the config file (if any) and apply flag overrides on top.
    pub fn load_config(&self, home: &Path) -> Result<OrchestratorConfig> {
        let mut config = match &self.config {
            Some(path) => OrchestratorConfig::load_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => OrchestratorConfig::load_or_default(&home.join("config.toml"))
                .context("loading ~/.conductor/config.toml")?,
        };

        if let Some(backend) = self.backend {
            config.driver.backend = backend;
        }
        if let Some(command) = &self.command {
            config.driver.command = command.clone();
        }
        if let Some(dir) = &self.workdir {
            config.driver.working_dir = Some(dir.clone());
        }
        if self.no_auto_approve {
            config.approval.enabled = false;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    pub fn db_path(&self, home: &Path) -> Option<PathBuf> {
        if self.no_db {
            return None;
        }
        Some(self.db.clone().unwrap_or_else(|| home.join("conductor.db")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "conductor",
            "--backend",
            "pty",
            "--command",
            "/bin/sh",
            "--workdir",
            "/tmp",
            "--no-auto-approve",
        ]);
        let home = tempfile::tempdir().unwrap();
        let config = args.load_config(home.path()).unwrap();
        assert_eq!(config.driver.backend, Backend::Pty);
        assert_eq!(config.driver.command, "/bin/sh");
        assert_eq!(config.driver.working_dir, Some(PathBuf::from("/tmp")));
        assert!(!config.approval.enabled);
    }

    #[test]
    fn test_config_file_is_read() {
        let home = tempfile::tempdir().unwrap();
        std::fs::write(home.path().join("config.toml"), "max_sessions = 2\n").unwrap();
        let args = Args::parse_from(["conductor", "--print-config"]);
        assert!(args.print_config);
        let config = args.load_config(home.path()).unwrap();
        assert_eq!(config.max_sessions, 2);
        assert!(config.approval.enabled);
        assert!(config.to_toml().unwrap().contains("max_sessions = 2"));
    }

    #[test]
    fn test_db_path() {
        let home = PathBuf::from("/home/u/.conductor");
        let args = Args::parse_from(["conductor"]);
        assert_eq!(args.db_path(&home), Some(home.join("conductor.db")));

        let args = Args::parse_from(["conductor", "--no-db"]);
        assert_eq!(args.db_path(&home), None);

        assert!(Args::try_parse_from(["conductor", "--no-db", "--db", "x.db"]).is_err());
        assert!(Args::try_parse_from(["conductor", "--backend", "screen"]).is_err());
    }
}
