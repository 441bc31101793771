use std::{io::ErrorKind, process::Stdio};

use anyhow::{Result, bail};
use tokio::process::Command;
use tracing::{debug, error};

/// Runs `<program> discover <args...>` and returns its standard output.
///
/// A missing executable or a non-zero exit is an error; the captured output is
/// logged so the cause can be diagnosed.
pub async fn discover(program: &str, args: &[String]) -> Result<String> {
    debug!("running {program} discover {}", args.join(" "));

    let output = Command::new(program)
        .arg("discover")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound => anyhow::Error::new(err)
                .context(format!("could not find {program} in PATH")),
            _ => anyhow::Error::new(err).context(format!("failed to start {program}")),
        })?;

    // Device names are free text and need not be UTF-8.
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

    if !output.status.success() {
        error!("stdout: {stdout}");
        error!("stderr: {}", String::from_utf8_lossy(&output.stderr));
        bail!("failed to run {program}: {}", output.status);
    }

    Ok(stdout)
}
