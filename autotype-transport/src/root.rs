//! USB HID gadget writer for rooted devices
//!
//! When the app cannot open the gadget node itself, reports are written by
//! a root shell: `printf '\x02\x00...' > /dev/hidg0`. A whole text is batched
//! into a single shell invocation.

use std::process::Stdio;

use async_trait::async_trait;
use autotype_common::{reports_to_bytes, OutputChannel, ScancodeReport, TransportError};
use autotype_input::Translator;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{OutputTransport, TransportConfig};

/// Exit status `su` uses when access is refused
const SU_DENIED: i32 = 255;

/// Runs commands in a root shell
#[derive(Debug, Clone)]
pub struct RootShell {
    shell: String,
}

impl RootShell {
    /// Use `su_command`, or plain `sh` when the process is already root
    pub fn new(su_command: &str) -> Self {
        // SAFETY: geteuid has no preconditions and cannot fail
        let euid = unsafe { libc::geteuid() };
        let shell = if euid == 0 { "sh" } else { su_command };
        Self {
            shell: shell.to_string(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Check that the shell runs as uid 0
    pub async fn check(&self) -> Result<(), TransportError> {
        let mut child = Command::new(&self.shell)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::PermissionDenied(format!("cannot run {}: {}", self.shell, e)))?;

        let (mut stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => return Err(TransportError::PermissionDenied("root shell has no stdio".into())),
        };

        stdin
            .write_all(b"id\n")
            .await
            .map_err(|e| TransportError::PermissionDenied(format!("root shell closed: {}", e)))?;

        let mut line = String::new();
        let read = BufReader::new(stdout).read_line(&mut line).await;
        // Best effort; the shell is killed on drop anyway
        let _ = stdin.write_all(b"exit\n").await;

        match read {
            Ok(0) | Err(_) => {
                debug!("Can't get root access or denied by user");
                Err(TransportError::PermissionDenied("root access denied".into()))
            }
            Ok(_) if line.contains("uid=0") => {
                debug!("Root access granted");
                Ok(())
            }
            Ok(_) => {
                debug!("Root access rejected: {}", line.trim());
                Err(TransportError::PermissionDenied(format!("not root: {}", line.trim())))
            }
        }
    }

    /// Run one command line as root
    pub async fn execute(&self, command: &str) -> Result<(), TransportError> {
        let mut child = Command::new(&self.shell)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| TransportError::PermissionDenied(format!("cannot run {}: {}", self.shell, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::WriteFailed("root shell has no stdin".into()))?;
        stdin
            .write_all(format!("{}\nexit\n", command).as_bytes())
            .await
            .map_err(|e| TransportError::WriteFailed(format!("root shell closed: {}", e)))?;
        drop(stdin);

        let status = child
            .wait()
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        match status.code() {
            Some(0) => Ok(()),
            Some(SU_DENIED) => Err(TransportError::PermissionDenied("root access denied".into())),
            code => {
                warn!("Root command failed with {:?}", code);
                Err(TransportError::WriteFailed(format!("root command exited with {:?}", code)))
            }
        }
    }
}

/// Shell command writing `data` into `path` with printf escapes
pub fn printf_command(data: &[u8], path: &str) -> String {
    let escaped: String = data.iter().map(|b| format!("\\x{:02x}", b)).collect();
    format!("printf '{}' > '{}'", escaped, path.replace('\'', "'\\''"))
}

/// Writes the gadget node through a root shell
pub struct RootShellTransport {
    shell: RootShell,
    path: String,
    translator: Translator,
}

impl RootShellTransport {
    /// Verify root access, failing with `PermissionDenied` when refused
    pub async fn new(config: &TransportConfig, translator: Translator) -> Result<Self, TransportError> {
        let shell = RootShell::new(&config.su_command);
        shell.check().await?;
        info!("Root shell ready, writing {}", config.gadget_path);

        Ok(Self {
            shell,
            path: config.gadget_path.clone(),
            translator,
        })
    }
}

#[async_trait]
impl OutputTransport for RootShellTransport {
    fn channel(&self) -> OutputChannel {
        OutputChannel::Usb
    }

    fn translator(&self) -> &Translator {
        &self.translator
    }

    async fn send_report(&self, report: &ScancodeReport) -> Result<(), TransportError> {
        self.send_reports(std::slice::from_ref(report)).await
    }

    async fn send_reports(&self, reports: &[ScancodeReport]) -> Result<(), TransportError> {
        if reports.is_empty() {
            return Ok(());
        }
        let command = printf_command(&reports_to_bytes(reports), &self.path);
        debug!("Handing {} reports to root shell", reports.len());
        self.shell.execute(&command).await
    }
}
