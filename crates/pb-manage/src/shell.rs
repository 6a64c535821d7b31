//! Structured remote command construction.
//!
//! Commands are assembled from trusted `&'static str` fragments (program
//! names, flags, operators) and untrusted values. Values are always
//! single-quoted when rendered; there is no way to splice a runtime string
//! into a command unquoted.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::naming::validate_path;

pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// A path on the remote host. Relative paths are anchored at the login
/// user's home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemotePath {
    Home(String),
    Absolute(String),
}

impl RemotePath {
    pub fn parse(what: &'static str, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let home_rel = raw.strip_prefix("~/").unwrap_or(raw);
        let p = validate_path(what, home_rel)?;
        if p.starts_with('/') {
            Ok(Self::Absolute(p))
        } else {
            Ok(Self::Home(p))
        }
    }

    /// Appends one already-validated component (an environment name or a
    /// file name derived from one).
    pub fn join(&self, component: &str) -> Self {
        debug_assert!(!component.contains('/') && !component.contains('\''));
        match self {
            Self::Home(p) => Self::Home(format!("{p}/{component}")),
            Self::Absolute(p) if p == "/" => Self::Absolute(format!("/{component}")),
            Self::Absolute(p) => Self::Absolute(format!("{p}/{component}")),
        }
    }

    /// Form understood by `scp`, where relative paths are already home-relative.
    pub fn scp_spec(&self) -> &str {
        match self {
            Self::Home(p) | Self::Absolute(p) => p,
        }
    }

    /// Maps the path into a local directory standing in for the remote home.
    pub fn resolve(&self, home: &Path) -> PathBuf {
        match self {
            Self::Home(p) => home.join(p),
            Self::Absolute(p) => PathBuf::from(p),
        }
    }

    fn push_into(&self, word: &mut Word) {
        match self {
            Self::Home(p) => {
                word.0.push(Segment::Home);
                word.0.push(Segment::Val(p.clone()));
            }
            Self::Absolute(p) => word.0.push(Segment::Val(p.clone())),
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Home(p) => write!(f, "~/{p}"),
            Self::Absolute(p) => f.write_str(p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Lit(&'static str),
    Val(String),
    Home,
}

/// One shell word built from several pieces, e.g. `"$HOME"/'pb_data/x'':/pb/pb_data'`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Word(Vec<Segment>);

impl Word {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lit(mut self, s: &'static str) -> Self {
        self.0.push(Segment::Lit(s));
        self
    }

    pub fn val(mut self, s: impl Into<String>) -> Self {
        self.0.push(Segment::Val(s.into()));
        self
    }

    pub fn path(mut self, p: &RemotePath) -> Self {
        p.push_into(&mut self);
        self
    }

    fn render(&self, out: &mut String) {
        for seg in &self.0 {
            match seg {
                Segment::Lit(s) => out.push_str(s),
                Segment::Val(v) => out.push_str(&sh_quote(v)),
                Segment::Home => out.push_str("\"$HOME\"/"),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Word(Word),
    Op(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    parts: Vec<Part>,
}

impl ShellCommand {
    pub fn new(program: &'static str) -> Self {
        Self {
            parts: vec![Part::Word(Word::new().lit(program))],
        }
    }

    /// Trusted literal argument (flags, fixed sub-commands).
    pub fn lit(mut self, s: &'static str) -> Self {
        self.parts.push(Part::Word(Word::new().lit(s)));
        self
    }

    /// Untrusted value, always quoted.
    pub fn arg(mut self, v: impl Into<String>) -> Self {
        self.parts.push(Part::Word(Word::new().val(v)));
        self
    }

    pub fn path(mut self, p: &RemotePath) -> Self {
        self.parts.push(Part::Word(Word::new().path(p)));
        self
    }

    pub fn word(mut self, w: Word) -> Self {
        self.parts.push(Part::Word(w));
        self
    }

    /// Discard stdout and stderr.
    pub fn quiet(mut self) -> Self {
        self.parts.push(Part::Op(">/dev/null 2>&1"));
        self
    }

    pub fn write_to(mut self, p: &RemotePath) -> Self {
        self.parts.push(Part::Op(">"));
        self.parts.push(Part::Word(Word::new().path(p)));
        self
    }

    pub fn and(mut self, next: ShellCommand) -> Self {
        self.parts.push(Part::Op("&&"));
        self.parts.extend(next.parts);
        self
    }

    pub fn or(mut self, next: ShellCommand) -> Self {
        self.parts.push(Part::Op("||"));
        self.parts.extend(next.parts);
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            match part {
                Part::Word(w) => w.render(&mut out),
                Part::Op(op) => out.push_str(op),
            }
        }
        out
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_quoted_and_literals_are_not() {
        let cmd = ShellCommand::new("docker")
            .lit("rm")
            .lit("-f")
            .arg("pb-staging");
        assert_eq!(cmd.render(), "docker rm -f 'pb-staging'");
    }

    #[test]
    fn embedded_quotes_cannot_escape() {
        let cmd = ShellCommand::new("echo").arg("'; rm -rf / #");
        assert_eq!(cmd.render(), r#"echo ''\''; rm -rf / #'"#);
    }

    #[test]
    fn home_paths_expand_outside_quotes() {
        let p = RemotePath::parse("data", "pb_data").unwrap().join("staging");
        let cmd = ShellCommand::new("docker")
            .lit("run")
            .lit("-v")
            .word(Word::new().path(&p).lit(":/pb/pb_data"));
        assert_eq!(
            cmd.render(),
            r#"docker run -v "$HOME"/'pb_data/staging':/pb/pb_data"#
        );
    }

    #[test]
    fn combinators_and_redirects() {
        let cmd = ShellCommand::new("docker")
            .lit("network")
            .lit("inspect")
            .arg("pb-net")
            .quiet()
            .or(ShellCommand::new("docker")
                .lit("network")
                .lit("create")
                .arg("pb-net"));
        assert_eq!(
            cmd.render(),
            "docker network inspect 'pb-net' >/dev/null 2>&1 || docker network create 'pb-net'"
        );

        let rule = RemotePath::parse("conf", "/etc/nginx/conf.d")
            .unwrap()
            .join("pb-x.conf");
        let cmd = ShellCommand::new("printf").arg("%s").arg("a b").write_to(&rule);
        assert_eq!(
            cmd.render(),
            "printf '%s' 'a b' > '/etc/nginx/conf.d/pb-x.conf'"
        );
    }

    #[test]
    fn remote_path_forms() {
        let home = RemotePath::parse("data", "~/pb_base/pb_data").unwrap();
        assert_eq!(home, RemotePath::Home("pb_base/pb_data".into()));
        assert_eq!(home.to_string(), "~/pb_base/pb_data");
        assert_eq!(home.scp_spec(), "pb_base/pb_data");
        assert_eq!(
            home.resolve(Path::new("/sandbox")),
            PathBuf::from("/sandbox/pb_base/pb_data")
        );

        let tmp = RemotePath::parse("tmp", "/tmp").unwrap();
        assert_eq!(tmp.join("x-backup.tar.gz").scp_spec(), "/tmp/x-backup.tar.gz");
        assert!(RemotePath::parse("tmp", "/tmp/$(id)").is_err());
    }
}
