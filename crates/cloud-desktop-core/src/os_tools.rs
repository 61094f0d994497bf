//! Remote Desktop OS Tooling
//!
//! Thin wrappers over the Windows console tools used for remote sessions:
//!
//! - `cmdkey` - generic credential upsert/delete under `TERMSRV/{address}`
//! - `mstsc` - the Remote Desktop client, spawned and never awaited
//! - `powershell` - best-effort termination of `mstsc` windows by title
//!
//! Arguments are passed to the program directly (no shell string), so user
//! input is never re-parsed by `cmd.exe`. On other platforms every call
//! fails with [`CommandError::Unsupported`].

use crate::remote_desktop::RemoteCredential;
use std::process::{Child, Command, Stdio};

/// Generic credential storage seam (the OS credential manager)
pub trait CredentialVault: Send + Sync {
    /// Create or overwrite the credential for `credential.realm`
    fn upsert(&self, credential: &RemoteCredential) -> Result<(), CommandError>;

    /// Remove the credential stored under `realm`
    fn delete(&self, realm: &str) -> Result<(), CommandError>;
}

/// Remote desktop client seam
pub trait SessionLauncher: Send + Sync {
    /// Start a client pointed at `address`
    fn launch(&self, address: &str) -> Result<SpawnHandle, CommandError>;

    /// Kill client windows whose title contains `title_fragment`
    fn terminate_matching(&self, title_fragment: &str) -> Result<(), CommandError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: &'static str,
        status: String,
        output: String,
    },
    #[error("remote desktop is only supported on Windows")]
    Unsupported,
}

/// A launched session client
///
/// The child is kept so its exit could be observed later; today the exit
/// status is ignored and the handle is simply dropped.
#[derive(Debug)]
pub struct SpawnHandle {
    pid: Option<u32>,
    _child: Option<Child>,
}

impl SpawnHandle {
    pub fn from_child(child: Child) -> Self {
        Self {
            pid: Some(child.id()),
            _child: Some(child),
        }
    }

    /// Handle for a launch with no observable process
    pub fn untracked() -> Self {
        Self {
            pid: None,
            _child: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Windows implementation backed by `cmdkey`, `mstsc` and `powershell`
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsRemoteDesktop;

impl WindowsRemoteDesktop {
    pub fn is_supported() -> bool {
        cfg!(windows)
    }
}

impl CredentialVault for WindowsRemoteDesktop {
    fn upsert(&self, credential: &RemoteCredential) -> Result<(), CommandError> {
        if !Self::is_supported() {
            return Err(CommandError::Unsupported);
        }
        run_console("cmdkey", &cmdkey_add_args(credential))
    }

    fn delete(&self, realm: &str) -> Result<(), CommandError> {
        if !Self::is_supported() {
            return Err(CommandError::Unsupported);
        }
        run_console("cmdkey", &cmdkey_delete_args(realm))
    }
}

impl SessionLauncher for WindowsRemoteDesktop {
    fn launch(&self, address: &str) -> Result<SpawnHandle, CommandError> {
        if !Self::is_supported() {
            return Err(CommandError::Unsupported);
        }
        let child = Command::new("mstsc")
            .args(mstsc_args(address))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: "mstsc",
                source,
            })?;
        Ok(SpawnHandle::from_child(child))
    }

    fn terminate_matching(&self, title_fragment: &str) -> Result<(), CommandError> {
        if !Self::is_supported() {
            return Err(CommandError::Unsupported);
        }
        run_console("powershell", &powershell_kill_args(title_fragment))
    }
}

pub fn cmdkey_add_args(credential: &RemoteCredential) -> Vec<String> {
    vec![
        format!("/generic:{}", credential.realm),
        format!("/user:{}", credential.username),
        format!("/pass:{}", credential.password),
    ]
}

pub fn cmdkey_delete_args(realm: &str) -> Vec<String> {
    vec![format!("/delete:{}", realm)]
}

pub fn mstsc_args(address: &str) -> Vec<String> {
    vec![format!("/v:{}", address)]
}

pub fn powershell_kill_args(title_fragment: &str) -> Vec<String> {
    let script = format!(
        "Get-Process mstsc -ErrorAction SilentlyContinue | \
         Where-Object {{ $_.MainWindowTitle -like '*{}*' }} | \
         Stop-Process -Force",
        escape_like_literal(title_fragment)
    );
    vec![
        "-NoProfile".to_string(),
        "-NonInteractive".to_string(),
        "-Command".to_string(),
        script,
    ]
}

/// Make `raw` a literal inside a single-quoted PowerShell `-like` pattern
fn escape_like_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '*' | '?' | '[' | ']' | '`' => {
                out.push('`');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Run a console tool without a window; non-zero exit is an error
fn run_console(program: &'static str, args: &[String]) -> Result<(), CommandError> {
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let output = cmd
        .output()
        .map_err(|source| CommandError::Spawn { program, source })?;

    if output.status.success() {
        return Ok(());
    }

    // cmdkey reports errors on stdout
    let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(stderr.trim());
    }

    Err(CommandError::Failed {
        program,
        status: output.status.to_string(),
        output: text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmdkey_args() {
        let credential = RemoteCredential {
            realm: "TERMSRV/10.0.0.1:3389".to_string(),
            username: "Administrator".to_string(),
            password: "p@ss word\"".to_string(),
        };
        assert_eq!(
            cmdkey_add_args(&credential),
            vec![
                "/generic:TERMSRV/10.0.0.1:3389",
                "/user:Administrator",
                "/pass:p@ss word\"",
            ]
        );
        assert_eq!(
            cmdkey_delete_args("TERMSRV/10.0.0.1"),
            vec!["/delete:TERMSRV/10.0.0.1"]
        );
        assert_eq!(mstsc_args("10.0.0.1:3389"), vec!["/v:10.0.0.1:3389"]);
    }

    #[test]
    fn test_powershell_script_matches_substring() {
        let args = powershell_kill_args("10.0.0.1");
        assert_eq!(&args[..3], &["-NoProfile", "-NonInteractive", "-Command"]);
        assert!(args[3].contains("-like '*10.0.0.1*'"));
        assert!(args[3].starts_with("Get-Process mstsc"));
        assert!(args[3].ends_with("Stop-Process -Force"));
    }

    #[test]
    fn test_like_pattern_escaping() {
        assert_eq!(escape_like_literal("host'name"), "host''name");
        assert_eq!(escape_like_literal("a*b?[c]"), "a`*b`?`[c`]");
        assert_eq!(escape_like_literal("10.0.0.1"), "10.0.0.1");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_unsupported_off_windows() {
        let tools = WindowsRemoteDesktop;
        assert!(matches!(tools.delete("TERMSRV/x"), Err(CommandError::Unsupported)));
        assert!(matches!(tools.launch("x"), Err(CommandError::Unsupported)));
        assert!(matches!(tools.terminate_matching("x"), Err(CommandError::Unsupported)));
    }
}
