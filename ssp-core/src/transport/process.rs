//! Spawns the SSP connector helper as a child process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use super::{Launcher, Transport};
use crate::error::SspError;

/// Port the connector is told to use on the device side.
pub const DEFAULT_CONNECTOR_PORT: u16 = 9999;

/// Launches `<program> --host <address> --port <port>` with stdout and
/// stderr piped. Helper stderr is forwarded to the log line by line.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    port: u16,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            port: DEFAULT_CONNECTOR_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn command(&self, address: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--host")
            .arg(address)
            .arg("--port")
            .arg(self.port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, address: &str) -> Result<Transport, SspError> {
        info!(%address, program = %self.program.display(), "starting connector");

        let mut child = self
            .command(address)
            .spawn()
            .map_err(|source| SspError::TransportLaunch {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| SspError::TransportLaunch {
            program: self.program.display().to_string(),
            source: std::io::Error::other("connector stdout not captured"),
        })?;

        let stderr_task = child.stderr.take().map(|stderr| {
            let address = address.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => info!(target: "ssp::connector", %address, "{line}"),
                        Ok(None) => break,
                        Err(e) => {
                            warn!(target: "ssp::connector", %address, "stderr read failed: {e}");
                            break;
                        }
                    }
                }
                info!(target: "ssp::connector", %address, "stderr closed");
            })
        });

        Ok(Transport::from_parts(Box::new(stdout), child, stderr_task))
    }
}
