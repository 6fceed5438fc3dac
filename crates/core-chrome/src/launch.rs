//! Browser binary discovery and headless process launch.
//!
//! The debugging endpoint is scraped from the `DevTools listening on ws://…`
//! stderr line, with the profile dir's `DevToolsActivePort` file as a
//! fallback for builds that are quiet on stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::ChromeError;

/// Names tried through `which`, most specific first.
const BINARY_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "brave-browser",
    "microsoft-edge",
];

#[cfg(target_os = "macos")]
const INSTALL_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
];

#[cfg(not(target_os = "macos"))]
const INSTALL_PATHS: &[&str] = &[
    "/usr/bin/chromium",
    "/usr/bin/google-chrome",
    "/opt/google/chrome/chrome",
];

const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(15);

/// Locate the browser binary: `CHROME_BIN` wins, then `$PATH`, then the
/// platform install locations.
pub fn find_binary() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(explicit);
        if path.is_file() {
            return Some(path);
        }
        debug!(target: "chrome.launch", path = %path.display(), "CHROME_BIN does not exist");
    }
    for name in BINARY_CANDIDATES {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }
    INSTALL_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Extra command-line switches appended after the defaults.
    pub extra_args: Vec<String>,
}

/// A running headless browser plus its debugging endpoint. The temp profile
/// dir lives as long as the process handle.
pub struct ChromeProcess {
    child: Child,
    pub ws_url: String,
    user_data: tempfile::TempDir,
}

impl ChromeProcess {
    pub async fn launch(opts: &LaunchOptions) -> Result<Self, ChromeError> {
        let binary = find_binary().ok_or(ChromeError::BinaryNotFound)?;
        let user_data = tempfile::tempdir().map_err(ChromeError::Io)?;
        info!(target: "chrome.launch", binary = %binary.display(), "launching browser");

        let mut cmd = Command::new(&binary);
        cmd.arg("--headless=new")
            .arg("--remote-debugging-port=0")
            .arg(format!("--user-data-dir={}", user_data.path().display()))
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-gpu")
            .arg("--hide-scrollbars")
            .arg("--mute-audio")
            .arg("about:blank")
            .args(&opts.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(ChromeError::Io)?;
        let stderr = child.stderr.take().expect("stderr piped above");

        let ws_url = tokio::time::timeout(
            HANDSHAKE_DEADLINE,
            wait_for_endpoint(stderr, user_data.path()),
        )
        .await
        .map_err(|_| ChromeError::HandshakeTimeout)??;

        info!(target: "chrome.launch", "debugging endpoint ready");
        Ok(Self {
            child,
            ws_url,
            user_data,
        })
    }

    /// Ask the process to exit; used after the RPC channel is gone.
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }

    pub fn profile_dir(&self) -> &Path {
        self.user_data.path()
    }
}

async fn wait_for_endpoint(
    stderr: tokio::process::ChildStderr,
    profile: &Path,
) -> Result<String, ChromeError> {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(url) = parse_devtools_line(&line) {
                    return Ok(url);
                }
            }
            // Stderr closed before the announcement; fall back to the
            // port file the browser writes into its profile dir.
            Ok(None) => break,
            Err(e) => {
                debug!(target: "chrome.launch", error = %e, "stderr read failed");
                break;
            }
        }
    }
    poll_port_file(profile).await
}

fn parse_devtools_line(line: &str) -> Option<String> {
    let marker = "DevTools listening on ";
    let idx = line.find(marker)?;
    let url = line[idx + marker.len()..].trim();
    url.starts_with("ws://").then(|| url.to_string())
}

async fn poll_port_file(profile: &Path) -> Result<String, ChromeError> {
    let path = profile.join("DevToolsActivePort");
    loop {
        if let Ok(content) = tokio::fs::read_to_string(&path).await {
            let mut lines = content.lines();
            if let (Some(port), Some(target)) = (lines.next(), lines.next()) {
                if let Ok(port) = port.trim().parse::<u16>() {
                    return Ok(format!("ws://127.0.0.1:{port}{}", target.trim()));
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_devtools_announcement() {
        let line = "DevTools listening on ws://127.0.0.1:33651/devtools/browser/abc-def";
        assert_eq!(
            parse_devtools_line(line).as_deref(),
            Some("ws://127.0.0.1:33651/devtools/browser/abc-def")
        );
    }

    #[test]
    fn ignores_unrelated_stderr_noise() {
        assert!(parse_devtools_line("[1234:5678:ERROR] gpu_init failed").is_none());
        assert!(parse_devtools_line("DevTools listening on http://not-ws").is_none());
    }
}
