//! Remote host access for archive export.
//!
//! [`RemoteConnector`] is the seam between the exporter and the transport. The
//! production implementation, [`SshConnector`], drives the system `scp` and `ssh`
//! binaries; remote listing and deletion go through a single OpenSSH control
//! master so every command reuses one authenticated connection.

use crate::error::ConfigError;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Where archives are exported to, parsed from `[user[:password]@]host[:port]:path`.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl RemoteTarget {
    /// Parses an scp-style connection string.
    ///
    /// ```
    /// use bkcron::remote::RemoteTarget;
    ///
    /// let target = RemoteTarget::parse("admin:secret@example.com:2222:/srv/backups").unwrap();
    /// assert_eq!(target.user.as_deref(), Some("admin"));
    /// assert_eq!(target.port, Some(2222));
    /// assert_eq!(target.path, "/srv/backups");
    /// ```
    ///
    /// # Errors
    /// Returns an error when the host is missing or the port is out of range.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |msg: &str| ConfigError::Invalid(format!("server '{input}': {msg}"));

        let (credentials, rest) = match input.rfind('@') {
            Some(i) => (Some(&input[..i]), &input[i + 1..]),
            None => (None, input),
        };
        let (user, password) = match credentials {
            Some(c) => match c.split_once(':') {
                Some((u, p)) => (u, Some(p.to_string())),
                None => (c, None),
            },
            None => ("", None),
        };
        let user = (!user.is_empty()).then(|| user.to_string());

        let (host, rest) = match rest.split_once(':') {
            Some((h, r)) => (h, Some(r)),
            None => (rest, None),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let (port, path) = match rest {
            None => (None, ""),
            Some(r) => {
                let (head, tail) = match r.split_once(':') {
                    Some((h, t)) => (h, Some(t)),
                    None => (r, None),
                };
                if !head.is_empty() && head.bytes().all(|b| b.is_ascii_digit()) {
                    let port = head.parse::<u16>().map_err(|_| invalid("invalid port"))?;
                    (Some(port), tail.unwrap_or(""))
                } else {
                    (None, r)
                }
            }
        };

        Ok(Self {
            user,
            password,
            host: host.to_string(),
            port,
            path: if path.is_empty() { ".".into() } else { path.into() },
        })
    }

    /// `user@host` or just `host`.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Path of `file_name` inside the remote directory.
    pub fn file_path(&self, file_name: &str) -> String {
        if self.path.ends_with('/') {
            format!("{}{file_name}", self.path)
        } else {
            format!("{}/{file_name}", self.path)
        }
    }
}

/// Never prints the password.
impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.destination())?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, ":{}", self.path)
    }
}

impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("path", &self.path)
            .finish()
    }
}

/// An open connection able to run commands in the remote directory.
///
/// Callers issue one command at a time and await it before the next.
#[async_trait]
pub trait RemoteSession: Send {
    /// Names of the regular files in the remote directory.
    async fn list(&mut self) -> Result<Vec<String>>;

    /// Deletes one file of the remote directory.
    async fn remove(&mut self, file_name: &str) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}

/// Transport used by the exporter.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Copies `local` into the remote directory.
    async fn upload(&self, target: &RemoteTarget, local: &Path) -> Result<()>;

    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>>;
}

/// Passed to every `ssh` and `scp` call. An unreachable or stalled host fails the
/// command after at most 45 seconds instead of blocking the run.
const SSH_OPTIONS: [&str; 3] = [
    "ConnectTimeout=15",
    "ServerAliveInterval=15",
    "ServerAliveCountMax=3",
];

/// [`RemoteConnector`] backed by the OpenSSH client binaries.
///
/// Password authentication goes through `sshpass`, which reads the password from
/// the `SSHPASS` environment variable of the child process.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    identity_file: Option<PathBuf>,
}

impl SshConnector {
    pub fn new(identity_file: Option<PathBuf>) -> Self {
        Self { identity_file }
    }

    /// Builds `program` with authentication and connection options for `target`.
    fn command(&self, program: &str, target: &RemoteTarget) -> Command {
        let mut cmd = match &target.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg(program).env("SSHPASS", password);
                cmd
            }
            None => {
                let mut cmd = Command::new(program);
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };
        for option in SSH_OPTIONS {
            cmd.args(["-o", option]);
        }
        if let Some(port) = target.port {
            let flag = if program == "scp" { "-P" } else { "-p" };
            cmd.arg(flag).arg(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn upload(&self, target: &RemoteTarget, local: &Path) -> Result<()> {
        let mut cmd = self.command("scp", target);
        cmd.arg("-q")
            .arg("--")
            .arg(local)
            .arg(format!("{}:{}", target.destination(), target.path));
        run(cmd).await.map(|_| ())
    }

    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>> {
        let control_path =
            std::env::temp_dir().join(format!("bkcron-{}.sock", Uuid::new_v4().simple()));
        let mut cmd = self.command("ssh", target);
        cmd.arg("-M")
            .arg("-S")
            .arg(&control_path)
            .args(["-o", "ControlPersist=yes", "-f", "-N"])
            .arg(target.destination())
            .stdout(Stdio::null());
        run(cmd)
            .await
            .with_context(|| format!("failed to connect to {target}"))?;
        debug!(server = %target, "Opened ssh control master");

        Ok(Box::new(SshSession {
            connector: self.clone(),
            target: target.clone(),
            control_path,
        }))
    }
}

struct SshSession {
    connector: SshConnector,
    target: RemoteTarget,
    control_path: PathBuf,
}

impl SshSession {
    async fn exec(&self, remote_command: &str) -> Result<String> {
        let mut cmd = self.connector.command("ssh", &self.target);
        cmd.arg("-S")
            .arg(&self.control_path)
            .arg(self.target.destination())
            .arg("--")
            .arg(remote_command);
        run(cmd).await
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn list(&mut self) -> Result<Vec<String>> {
        let stdout = self
            .exec(&format!("ls -1Ap -- {}", shell_quote(&self.target.path)))
            .await?;
        Ok(parse_listing(&stdout))
    }

    async fn remove(&mut self, file_name: &str) -> Result<()> {
        let path = self.target.file_path(file_name);
        self.exec(&format!("rm -- {}", shell_quote(&path))).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut cmd = self.connector.command("ssh", &self.target);
        cmd.arg("-S")
            .arg(&self.control_path)
            .args(["-O", "exit"])
            .arg(self.target.destination());
        run(cmd).await?;
        Ok(())
    }
}

/// Runs `cmd` to completion and returns its stdout.
async fn run(mut cmd: Command) -> Result<String> {
    let output = cmd.output().await.context("failed to spawn ssh client")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{} ({})", stderr.trim(), output.status);
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// `ls -1Ap` output: one entry per line, directories suffixed with `/`.
fn parse_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.ends_with('/'))
        .map(str::to_string)
        .collect()
}

/// Quotes `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
