use crate::error::{Result, SxError};
use std::process::{Command as ProcessCommand, Stdio};

#[cfg(test)]
mod tests;

/// The site where a filesystem command or stream stage executes: either the
/// calling host, or a remote host reached over ssh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Local,
    Remote {
        user: Option<String>,
        host: String,
        port: Option<u16>,
    },
}

impl Endpoint {
    /// Two endpoints are "the same host" iff both are `Local`, or both are
    /// `Remote` with identical `(host, port)` — the user is excluded, since
    /// it doesn't change which machine the bytes land on.
    pub fn same_host(&self, other: &Endpoint) -> bool {
        match (self, other) {
            (Endpoint::Local, Endpoint::Local) => true,
            (
                Endpoint::Remote { host: h1, port: p1, .. },
                Endpoint::Remote { host: h2, port: p2, .. },
            ) => h1 == h2 && p1 == p2,
            _ => false,
        }
    }

    /// Identifier used in error context and log lines.
    pub fn display_id(&self) -> String {
        match self {
            Endpoint::Local => "local".to_string(),
            Endpoint::Remote { user, host, port } => {
                let mut s = String::new();
                if let Some(u) = user {
                    s.push_str(u);
                    s.push('@');
                }
                s.push_str(host);
                if let Some(p) = port {
                    s.push(':');
                    s.push_str(&p.to_string());
                }
                s
            }
        }
    }

    /// Render `path` onto this endpoint as a full `ssh://...` or bare-path
    /// URL, the inverse of `parse_endpoint_url`.
    pub fn to_url(&self, path: &str) -> String {
        match self {
            Endpoint::Local => path.to_string(),
            Endpoint::Remote { user, host, port } => {
                let mut s = String::from("ssh://");
                if let Some(u) = user {
                    s.push_str(u);
                    s.push('@');
                }
                s.push_str(host);
                if let Some(p) = port {
                    s.push(':');
                    s.push_str(&p.to_string());
                }
                s.push_str(path);
                s
            }
        }
    }
}

/// Parse an endpoint URL of the form `ssh://[user@]host[:port]/abs-or-rel-path`,
/// or a bare POSIX path for the local endpoint. Parsing is hand-rolled
/// (string splitting, no url crate) to match the house style already used
/// for the other small fixed text formats in this codebase.
pub fn parse_endpoint_url(url: &str) -> Result<(Endpoint, String)> {
    let Some(rest) = url.strip_prefix("ssh://") else {
        return Ok((Endpoint::Local, url.to_string()));
    };

    let slash_idx = rest.find('/').ok_or_else(|| {
        SxError::Config(format!("endpoint url \"{}\" has no path component", url))
    })?;
    let authority = &rest[..slash_idx];
    let path = rest[slash_idx..].to_string();

    if authority.is_empty() {
        return Err(SxError::Config(format!(
            "endpoint url \"{}\" has no host",
            url
        )));
    }

    let (user, host_port) = match authority.split_once('@') {
        Some((u, hp)) => (Some(u.to_string()), hp),
        None => (None, authority),
    };

    let (host, port) = match host_port.rsplit_once(':') {
        Some((h, p)) => {
            let port: u16 = p
                .parse()
                .map_err(|_| SxError::Config(format!("invalid port \"{}\" in \"{}\"", p, url)))?;
            (h.to_string(), Some(port))
        }
        None => (host_port.to_string(), None),
    };

    if host.is_empty() {
        return Err(SxError::Config(format!(
            "endpoint url \"{}\" has an empty host",
            url
        )));
    }

    Ok((Endpoint::Remote { user, host, port }, path))
}

/// Quote an argument vector into a single POSIX shell-safe word sequence,
/// suitable for embedding as the command string of a remote `ssh` call.
pub fn shell_quote(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote_one(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_quote_one(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=@%,+".contains(&b))
    {
        return arg.to_string();
    }
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Captured result of a single synchronous command execution.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

const STDERR_TAIL_BYTES: usize = 4096;

/// Abstract command execution against an endpoint. This is the mockable
/// seam: orchestration and snapshot-store code only ever talk to `dyn
/// Command`, never to `std::process` directly, matching the teacher's own
/// `Command`/`CommandSystem`/`CommandMock` split.
#[cfg_attr(test, mockall::automock)]
pub trait Command: Send + Sync {
    /// Run `argv` to completion on `endpoint` and capture its output.
    fn exec(&self, endpoint: &Endpoint, argv: &[String]) -> Result<ExecOutput>;

    /// Run `argv` to completion on `endpoint`, feeding `stdin` to the
    /// child's standard input before waiting. Used by the descriptor store
    /// to write the job file through the same endpoint abstraction rather
    /// than reaching for a second, filesystem-specific transport.
    fn exec_with_stdin(&self, endpoint: &Endpoint, argv: &[String], stdin: &[u8]) -> Result<ExecOutput>;
}

/// Real implementation: runs commands as local child processes, or over an
/// `ssh` invocation for remote endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandSystem;

impl CommandSystem {
    fn build(&self, endpoint: &Endpoint, argv: &[String]) -> ProcessCommand {
        match endpoint {
            Endpoint::Local => {
                let mut cmd = ProcessCommand::new(&argv[0]);
                cmd.args(&argv[1..]);
                cmd
            }
            Endpoint::Remote { user, host, port } => {
                let mut cmd = ProcessCommand::new("ssh");
                if let Some(p) = port {
                    cmd.arg("-p").arg(p.to_string());
                }
                let target = match user {
                    Some(u) => format!("{}@{}", u, host),
                    None => host.clone(),
                };
                cmd.arg(target);
                cmd.arg(shell_quote(argv));
                cmd
            }
        }
    }
}

impl Command for CommandSystem {
    fn exec(&self, endpoint: &Endpoint, argv: &[String]) -> Result<ExecOutput> {
        let output = self
            .build(endpoint, argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        let exit_code = output.status.code().ok_or_else(|| SxError::Endpoint {
            endpoint: endpoint.display_id(),
            argv: argv.to_vec(),
            exit_code: -1,
            stderr_tail: "command was terminated by signal".to_string(),
        })?;

        if exit_code != 0 {
            return Err(SxError::Endpoint {
                endpoint: endpoint.display_id(),
                argv: argv.to_vec(),
                exit_code,
                stderr_tail: SxError::bounded_tail(&output.stderr, STDERR_TAIL_BYTES),
            });
        }

        Ok(ExecOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn exec_with_stdin(&self, endpoint: &Endpoint, argv: &[String], stdin: &[u8]) -> Result<ExecOutput> {
        use std::io::Write;

        let mut child = self
            .build(endpoint, argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(stdin)?;

        let output = child.wait_with_output()?;

        let exit_code = output.status.code().ok_or_else(|| SxError::Endpoint {
            endpoint: endpoint.display_id(),
            argv: argv.to_vec(),
            exit_code: -1,
            stderr_tail: "command was terminated by signal".to_string(),
        })?;

        if exit_code != 0 {
            return Err(SxError::Endpoint {
                endpoint: endpoint.display_id(),
                argv: argv.to_vec(),
                exit_code,
                stderr_tail: SxError::bounded_tail(&output.stderr, STDERR_TAIL_BYTES),
            });
        }

        Ok(ExecOutput {
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
