//! Supervision of the bridge sidecar process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    serde_json::Value,
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::{Level, debug, error, info, warn},
};

use crate::sidecar::DEFAULT_SIDECAR_PORT;

const LOG_TARGET: &str = "protocol_sidecar";

/// Relative location of the sidecar sources in a checkout or install.
const SIDECAR_SUBDIR: &str = "sidecar/protocol-bridge";

/// Handle to a running sidecar process.
pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the sidecar to exit, killing it after a grace period.
    pub async fn stop(&mut self) -> Result<()> {
        info!("stopping protocol sidecar");

        #[cfg(unix)]
        {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };

            if let Some(pid) = self.child.id()
                && let Ok(pid) = i32::try_from(pid)
            {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = self.child.kill().await;
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "protocol sidecar exited"),
            Ok(Err(e)) => warn!(error = %e, "error waiting for sidecar process"),
            Err(_) => {
                warn!("sidecar did not exit gracefully, killing");
                let _ = self.child.kill().await;
            },
        }

        Ok(())
    }
}

/// How to start the sidecar.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Directory containing the sidecar's `package.json`.
    pub sidecar_dir: PathBuf,
    pub port: u16,
    /// Where the sidecar keeps device credentials.
    pub auth_dir: Option<PathBuf>,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            sidecar_dir: PathBuf::new(),
            port: DEFAULT_SIDECAR_PORT,
            auth_dir: None,
        }
    }
}

fn has_package(dir: &Path) -> bool {
    dir.join("package.json").exists()
}

/// Locate the sidecar directory.
///
/// Searches in order:
/// 1. `explicit_path`
/// 2. `CHATGATE_SIDECAR_DIR`
/// 3. `../sidecar/protocol-bridge` and `../../sidecar/protocol-bridge`
///    relative to the executable
/// 4. The same paths relative to the working directory
pub fn find_sidecar_dir(explicit_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        if has_package(path) {
            return Ok(path.to_path_buf());
        }
        bail!(
            "sidecar directory does not exist or is missing package.json: {}",
            path.display()
        );
    }

    if let Ok(dir) = std::env::var("CHATGATE_SIDECAR_DIR") {
        let path = PathBuf::from(&dir);
        if has_package(&path) {
            return Ok(path);
        }
        warn!(path = %dir, "CHATGATE_SIDECAR_DIR set but package.json not found");
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        for prefix in ["..", "../.."] {
            let candidate = exe_dir.join(prefix).join(SIDECAR_SUBDIR);
            if has_package(&candidate) {
                return Ok(candidate);
            }
        }
    }

    for prefix in [".", "..", "../.."] {
        let path = Path::new(prefix).join(SIDECAR_SUBDIR);
        if has_package(&path) {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    bail!(
        "protocol sidecar not found. Set CHATGATE_SIDECAR_DIR or ensure \
         {SIDECAR_SUBDIR} exists with package.json"
    )
}

pub fn is_sidecar_built(sidecar_dir: &Path) -> bool {
    sidecar_dir.join("dist/index.js").exists()
}

pub fn has_node_modules(sidecar_dir: &Path) -> bool {
    sidecar_dir.join("node_modules").exists()
}

/// Build the sidecar if needed, then spawn it with output forwarded to
/// tracing.
pub async fn start_sidecar(config: SidecarConfig) -> Result<SidecarProcess> {
    let sidecar_dir = &config.sidecar_dir;

    if !has_package(sidecar_dir) {
        bail!(
            "protocol sidecar not found at {}. \
             Run `cd {} && npm install && npm run build` first.",
            sidecar_dir.display(),
            sidecar_dir.display()
        );
    }

    if !is_sidecar_built(sidecar_dir) {
        info!(path = %sidecar_dir.display(), "building protocol sidecar");
        if !has_node_modules(sidecar_dir) {
            run_npm(sidecar_dir, &["install"]).await?;
        }
        run_npm(sidecar_dir, &["run", "build"]).await?;
    }

    info!(
        path = %sidecar_dir.display(),
        port = config.port,
        "starting protocol sidecar"
    );

    let mut cmd = Command::new("node");
    cmd.arg("dist/index.js")
        .current_dir(sidecar_dir)
        .env("CHATGATE_BRIDGE_PORT", config.port.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(auth_dir) = &config.auth_dir {
        cmd.env("CHATGATE_AUTH_DIR", auth_dir);
    }

    let mut child = cmd.spawn().context("failed to spawn sidecar process")?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let (level, msg) = parse_log_line(&line);
                if level == Level::ERROR {
                    error!(target: LOG_TARGET, "{msg}");
                } else if level == Level::WARN {
                    warn!(target: LOG_TARGET, "{msg}");
                } else if level == Level::INFO {
                    info!(target: LOG_TARGET, "{msg}");
                } else {
                    debug!(target: LOG_TARGET, "{msg}");
                }
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(target: LOG_TARGET, "{line}");
            }
        });
    }

    // Give the process a moment to fail on bad configuration.
    tokio::time::sleep(Duration::from_millis(500)).await;

    match child.try_wait() {
        Ok(Some(status)) => bail!("sidecar process exited immediately with status: {status}"),
        Ok(None) => {},
        Err(e) => bail!("failed to check sidecar process status: {e}"),
    }

    info!(port = config.port, "protocol sidecar started");

    Ok(SidecarProcess {
        child,
        port: config.port,
    })
}

/// Map one stdout line to a level and message. Lines that are pino JSON
/// records keep their level; anything else is logged at info.
fn parse_log_line(line: &str) -> (Level, String) {
    if line.starts_with('{')
        && let Ok(record) = serde_json::from_str::<Value>(line)
    {
        let level = match record.get("level").and_then(Value::as_u64).unwrap_or(30) {
            10 => Level::TRACE,
            20 => Level::DEBUG,
            30 => Level::INFO,
            40 => Level::WARN,
            _ => Level::ERROR,
        };
        let msg = record
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or(line)
            .to_string();
        return (level, msg);
    }
    (Level::INFO, line.to_string())
}

async fn run_npm(sidecar_dir: &Path, args: &[&str]) -> Result<()> {
    let label = args.join(" ");
    info!(path = %sidecar_dir.display(), "running npm {label} for sidecar");

    let output = Command::new("npm")
        .args(args)
        .current_dir(sidecar_dir)
        .output()
        .await
        .with_context(|| format!("failed to run npm {label}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("npm {label} failed: {stderr}");
    }

    Ok(())
}
