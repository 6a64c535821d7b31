//! Validated identifiers.
//!
//! Everything that ends up inside a remote shell command or a proxy rule is
//! checked against an allow-list here first. The rest of the crate only ever
//! sees these types, never the raw strings.

use std::fmt;
use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

// A single DNS label: the environment name becomes `<name>.<domain>`.
static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex"));

static SSH_USER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_.-]{0,31}$").expect("valid regex"));

static HOST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.:-]{0,252}$").expect("valid regex"));

static IMAGE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/:@-]{0,254}$").expect("valid regex")
});

static PATH_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/+-]+$").expect("valid regex"));

/// Name of an environment, usable as a DNS label, container suffix and
/// directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvName(String);

impl EnvName {
    pub fn parse(raw: &str) -> Result<Self> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(Error::Invocation("missing environment name".into()));
        }
        if !DNS_LABEL.is_match(name) {
            return Err(Error::invalid(
                "environment name",
                raw,
                "use 1-63 lowercase letters, digits or '-', starting and ending with a letter or digit",
            ));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routing domain suffix, e.g. `example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain(String);

impl Domain {
    pub fn parse(raw: &str) -> Result<Self> {
        let domain = raw.trim().trim_end_matches('.');
        if domain.is_empty() {
            return Err(Error::invalid("domain", raw, "domain is empty"));
        }
        if domain.len() > 253 {
            return Err(Error::invalid("domain", raw, "longer than 253 characters"));
        }
        for label in domain.split('.') {
            if !DNS_LABEL.is_match(label) {
                return Err(Error::invalid(
                    "domain",
                    raw,
                    format!("label '{label}' is not a lowercase DNS label"),
                ));
            }
        }
        Ok(Self(domain.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn validate_host(raw: &str) -> Result<String> {
    let host = raw.trim();
    if !HOST.is_match(host) {
        return Err(Error::invalid(
            "host",
            raw,
            "expected a hostname or IP address",
        ));
    }
    Ok(host.to_string())
}

pub fn validate_user(raw: &str) -> Result<String> {
    let user = raw.trim();
    if !SSH_USER.is_match(user) {
        return Err(Error::invalid("ssh user", raw, "expected a POSIX user name"));
    }
    Ok(user.to_string())
}

pub fn validate_image(raw: &str) -> Result<String> {
    let image = raw.trim();
    if !IMAGE_REF.is_match(image) {
        return Err(Error::invalid(
            "image",
            raw,
            "expected a container image reference like 'repo/name:tag'",
        ));
    }
    Ok(image.to_string())
}

/// Checks a configured path fragment: safe characters only, no `..`, and no
/// leading '-' so it can never be mistaken for an option.
pub fn validate_path(what: &'static str, raw: &str) -> Result<String> {
    let p = raw.trim();
    if p.is_empty() {
        return Err(Error::invalid(what, raw, "path is empty"));
    }
    if !PATH_CHARS.is_match(p) {
        return Err(Error::invalid(
            what,
            raw,
            "only letters, digits and . _ / + - are allowed",
        ));
    }
    if p.starts_with('-') {
        return Err(Error::invalid(what, raw, "must not start with '-'"));
    }
    if Path::new(p)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::invalid(what, raw, "must not contain '..'"));
    }
    let trimmed = p.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok("/".into());
    }
    Ok(trimmed.to_string())
}

/// Single path component such as a container prefix or network name.
pub fn validate_token(what: &'static str, raw: &str) -> Result<String> {
    let t = raw.trim();
    if t.is_empty()
        || t.starts_with('-')
        || !t
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(Error::invalid(
            what,
            raw,
            "only letters, digits and . _ - are allowed",
        ));
    }
    Ok(t.to_string())
}
