use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::naming::EnvName;
use crate::shell::RemotePath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Destroy,
    Backup,
    Restore,
    Pull,
    Deploy,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Create,
        Operation::Destroy,
        Operation::Backup,
        Operation::Restore,
        Operation::Pull,
        Operation::Deploy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Destroy => "destroy",
            Operation::Backup => "backup",
            Operation::Restore => "restore",
            Operation::Pull => "pull",
            Operation::Deploy => "deploy",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| Error::Invocation(format!("unknown operation '{s}'")))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Download the archive to the operator's machine.
    pub download: bool,
    /// Keep the remote copy after downloading.
    pub keep_remote: bool,
    pub output: Option<PathBuf>,
}

/// Raw arguments for one operation, before any validation.
#[derive(Debug, Clone)]
pub struct Request {
    pub op: Operation,
    pub env: Option<String>,
    pub archive: Option<PathBuf>,
    pub backup: BackupOptions,
}

impl Request {
    pub fn new(op: Operation, env: Option<String>) -> Self {
        Self {
            op,
            env,
            archive: None,
            backup: BackupOptions::default(),
        }
    }

    pub fn with_archive(mut self, archive: impl Into<PathBuf>) -> Self {
        self.archive = Some(archive.into());
        self
    }

    pub fn with_backup(mut self, backup: BackupOptions) -> Self {
        self.backup = backup;
        self
    }

    /// Argument checks that need no configuration.
    pub fn validate(&self) -> Result<EnvName> {
        let name = match self.env.as_deref().map(str::trim) {
            Some(n) if !n.is_empty() => EnvName::parse(n)?,
            _ => {
                return Err(Error::Invocation(match self.op {
                    Operation::Restore => "usage: pb-manage restore <env> <archive>".into(),
                    op => format!("missing environment name (usage: pb-manage {op} <env>)"),
                }));
            }
        };
        if self.op == Operation::Restore && self.archive.is_none() {
            return Err(Error::Invocation(
                "usage: pb-manage restore <env> <archive>".into(),
            ));
        }
        Ok(name)
    }
}

/// Names and paths of one environment, derived from its name and the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub name: EnvName,
    pub data_dir: RemotePath,
    pub container: String,
    pub network: String,
    pub rule_path: RemotePath,
    pub vhost: String,
    pub remote_backup: RemotePath,
    pub remote_upload: RemotePath,
}

impl Environment {
    pub fn new(name: EnvName, config: &Config) -> Self {
        let layout = &config.layout;
        let container = format!("{}{}", layout.container_prefix, name);
        Self {
            data_dir: layout.data_root.join(name.as_str()),
            rule_path: layout.proxy_conf_dir.join(&format!("{container}.conf")),
            network: layout.network.clone(),
            vhost: format!("{name}.{}", config.domain),
            remote_backup: layout.tmp_dir.join(&format!("{name}-backup.tar.gz")),
            remote_upload: layout.tmp_dir.join(&format!("{name}-restore.tar.gz")),
            container,
            name,
        }
    }
}

/// Everything one run needs, fully validated.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub op: Operation,
    pub config: Config,
    pub env: Environment,
    pub archive: Option<PathBuf>,
    pub backup: BackupOptions,
    /// Project directory on the operator's machine.
    pub local_root: PathBuf,
}

impl Invocation {
    pub fn build(request: Request, config: Config, local_root: impl Into<PathBuf>) -> Result<Self> {
        let name = request.validate()?;
        let local_root = local_root.into();
        let archive = request.archive.map(|a| absolutize(&local_root, a));
        Ok(Self {
            op: request.op,
            env: Environment::new(name, &config),
            config,
            archive,
            backup: request.backup,
            local_root,
        })
    }

    /// Where a downloaded archive lands.
    pub fn local_archive(&self) -> PathBuf {
        match &self.backup.output {
            Some(p) => absolutize(&self.local_root, p.clone()),
            None => self
                .local_root
                .join(format!("{}-backup.tar.gz", self.env.name)),
        }
    }

    pub fn local_data_dir(&self) -> PathBuf {
        self.local_root.join(&self.config.layout.local_data_dir)
    }

    pub fn downloads(&self) -> bool {
        match self.op {
            Operation::Pull => true,
            Operation::Backup => self.backup.download,
            _ => false,
        }
    }
}

fn absolutize(root: &Path, p: PathBuf) -> PathBuf {
    if p.is_absolute() { p } else { root.join(p) }
}
