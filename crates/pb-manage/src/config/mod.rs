use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::naming::{self, Domain};
use crate::shell::RemotePath;

pub const DEFAULT_CONFIG_FILE: &str = "pb.config.json";
pub const DEFAULT_IMAGE: &str = "pocketbase";

/// Raw configuration document after `extends` resolution, before validation.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            cur = cur.as_object()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = serde_json::from_value(v.clone()).map_err(|e| {
            Error::config(format!(
                "invalid config at '{}' in {}: {e}",
                if path.is_empty() { "<root>" } else { path },
                self.path.display()
            ))
        })?;
        Ok(Some(parsed))
    }

    /// Layers `overlay` on top of the document (objects merge, scalars replace).
    pub fn apply(&mut self, overlay: Value) {
        merge(&mut self.value, overlay);
    }
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                match base_map.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_map.insert(k, v);
                    }
                }
            }
        }
        (base_slot, v) => {
            *base_slot = v;
        }
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn parse_file(path: &Path, data: &str) -> Result<Value> {
    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"));
    if is_toml {
        let v: toml::Value = toml::from_str(data).map_err(|e| {
            Error::config(format!("TOML parse error in {}: {e}", path.display()))
        })?;
        serde_json::to_value(v).map_err(|e| {
            Error::config(format!("failed to convert {}: {e}", path.display()))
        })
    } else {
        serde_json::from_str(data)
            .map_err(|e| Error::config(format!("JSON parse error in {}: {e}", path.display())))
    }
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "config extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read config {}: {e}", path.display())))?;
    let mut value = parse_file(path, &data)?;
    if !value.is_object() {
        return Err(Error::config(format!(
            "config {} must be an object",
            path.display()
        )));
    }

    let mut out = Value::Object(Default::default());
    if let Some(parent) = value.get("extends").and_then(Value::as_str) {
        let parent_path = resolve_ref_path(path, parent);
        out = load_value_inner(&parent_path, stack)?;
    }
    if let Some(map) = value.as_object_mut() {
        map.remove("extends");
    }
    merge(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    if !path.exists() {
        return Err(Error::config(format!(
            "missing {}, run `pb-manage init` first",
            path.display()
        )));
    }
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

/// Config file location: explicit override, else `pb.config.json` in `cwd`.
pub fn config_path(explicit: Option<&Path>, cwd: &Path) -> PathBuf {
    match explicit {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => cwd.join(p),
        None => cwd.join(DEFAULT_CONFIG_FILE),
    }
}

fn default_data_root() -> String {
    "pb_data".into()
}

fn default_base_template() -> String {
    "pb_base/pb_data".into()
}

fn default_proxy_conf_dir() -> String {
    "/etc/nginx/conf.d".into()
}

fn default_tmp_dir() -> String {
    "/tmp".into()
}

fn default_network() -> String {
    "pb-net".into()
}

fn default_container_prefix() -> String {
    "pb-".into()
}

fn default_service_port() -> u16 {
    8090
}

fn default_local_data_dir() -> String {
    "pb_data".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutConfig {
    #[serde(default = "default_data_root")]
    pub data_root: String,
    #[serde(default = "default_base_template")]
    pub base_template: String,
    #[serde(default = "default_proxy_conf_dir")]
    pub proxy_conf_dir: String,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    #[serde(default = "default_local_data_dir")]
    pub local_data_dir: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            base_template: default_base_template(),
            proxy_conf_dir: default_proxy_conf_dir(),
            tmp_dir: default_tmp_dir(),
            network: default_network(),
            container_prefix: default_container_prefix(),
            service_port: default_service_port(),
            local_data_dir: default_local_data_dir(),
        }
    }
}

/// Shape of `pb.config.json`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigFile {
    pub vps_host: Option<String>,
    pub ssh_user: Option<String>,
    pub domain: Option<String>,
    pub image: Option<String>,
    pub ssh_key: Option<String>,
    pub ssh_port: Option<u16>,
    pub known_hosts_file: Option<String>,
    pub strict_host_key_checking: Option<bool>,
    pub layout: LayoutConfig,
}

/// Per-invocation overrides. Only the credential path may be overridden.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub ssh_key: Option<PathBuf>,
}

impl Overrides {
    fn to_overlay(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(key) = &self.ssh_key {
            map.insert("sshKey".into(), Value::String(key.display().to_string()));
        }
        Value::Object(map)
    }
}

/// Validated remote layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub data_root: RemotePath,
    pub base_template: RemotePath,
    pub proxy_conf_dir: RemotePath,
    pub tmp_dir: RemotePath,
    pub network: String,
    pub container_prefix: String,
    pub service_port: u16,
    pub local_data_dir: PathBuf,
}

impl Layout {
    fn from_config(cfg: &LayoutConfig) -> Result<Self> {
        let local = naming::validate_path("layout.localDataDir", &cfg.local_data_dir)?;
        if local.starts_with('/') {
            return Err(Error::config(
                "layout.localDataDir must be relative to the project directory",
            ));
        }
        if cfg.service_port == 0 {
            return Err(Error::config("layout.servicePort must be non-zero"));
        }
        Ok(Self {
            data_root: RemotePath::parse("layout.dataRoot", &cfg.data_root)?,
            base_template: RemotePath::parse("layout.baseTemplate", &cfg.base_template)?,
            proxy_conf_dir: RemotePath::parse("layout.proxyConfDir", &cfg.proxy_conf_dir)?,
            tmp_dir: RemotePath::parse("layout.tmpDir", &cfg.tmp_dir)?,
            network: naming::validate_token("layout.network", &cfg.network)?,
            container_prefix: naming::validate_token(
                "layout.containerPrefix",
                &cfg.container_prefix,
            )?,
            service_port: cfg.service_port,
            local_data_dir: PathBuf::from(local),
        })
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::from_config(&LayoutConfig::default()).expect("default layout is valid")
    }
}

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub identity_file: Option<PathBuf>,
    pub port: Option<u16>,
    pub known_hosts_file: Option<PathBuf>,
    pub strict_host_key_checking: Option<bool>,
}

/// Resolved, immutable configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: PathBuf,
    pub host: String,
    pub user: String,
    pub domain: Domain,
    pub image: String,
    pub ssh: SshOptions,
    pub layout: Layout,
}

fn required(value: Option<&str>, key: &str, source: &Path) -> Result<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            Error::config(format!(
                "'{key}' is missing in {}",
                source.display()
            ))
        })
}

fn non_empty_path(v: Option<&str>) -> Option<PathBuf> {
    v.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

impl Config {
    pub fn from_doc(mut doc: ConfigDoc, overrides: &Overrides) -> Result<Self> {
        doc.apply(overrides.to_overlay());
        let file: ConfigFile = doc.deserialize_path("")?.unwrap_or_default();

        let host = required(file.vps_host.as_deref(), "vpsHost", &doc.path)?;
        let user = required(file.ssh_user.as_deref(), "sshUser", &doc.path)?;
        let domain = required(file.domain.as_deref(), "domain", &doc.path)?;
        let image = file
            .image
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_IMAGE);

        Ok(Self {
            host: naming::validate_host(&host)?,
            user: naming::validate_user(&user)?,
            domain: Domain::parse(&domain)?,
            image: naming::validate_image(image)?,
            ssh: SshOptions {
                identity_file: non_empty_path(file.ssh_key.as_deref()),
                port: file.ssh_port,
                known_hosts_file: non_empty_path(file.known_hosts_file.as_deref()),
                strict_host_key_checking: file.strict_host_key_checking,
            },
            layout: Layout::from_config(&file.layout)?,
            source: doc.path,
        })
    }

    pub fn load(path: &Path, overrides: &Overrides) -> Result<Self> {
        Self::from_doc(load(path)?, overrides)
    }

    /// `user@host`, the ssh destination.
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Printable summary used by `pb-manage config`.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "source": self.source.display().to_string(),
            "vpsHost": self.host,
            "sshUser": self.user,
            "domain": self.domain.as_str(),
            "image": self.image,
            "sshKey": self.ssh.identity_file.as_ref().map(|p| p.display().to_string()),
            "sshPort": self.ssh.port,
            "knownHostsFile": self.ssh.known_hosts_file.as_ref().map(|p| p.display().to_string()),
            "strictHostKeyChecking": self.ssh.strict_host_key_checking,
            "layout": {
                "dataRoot": self.layout.data_root.to_string(),
                "baseTemplate": self.layout.base_template.to_string(),
                "proxyConfDir": self.layout.proxy_conf_dir.to_string(),
                "tmpDir": self.layout.tmp_dir.to_string(),
                "network": self.layout.network,
                "containerPrefix": self.layout.container_prefix,
                "servicePort": self.layout.service_port,
                "localDataDir": self.layout.local_data_dir.display().to_string(),
            },
        })
    }
}
