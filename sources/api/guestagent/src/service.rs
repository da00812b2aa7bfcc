//! Restarting the datastore when overrides can't be applied live.

use log::{debug, info, trace};
use snafu::{ensure, OptionExt, ResultExt};
use std::time::Duration;
use tokio::process::Command;

use crate::error::{self, Result};

/// Runs each restart command in order, stopping at the first failure.  Each command gets the
/// whole `timeout` and is killed when it runs over.
pub async fn restart(restart_commands: &[String], timeout: Duration) -> Result<()> {
    info!("Running {} restart commands", restart_commands.len());
    for restart_command in restart_commands {
        run_command(restart_command, timeout).await?;
    }
    Ok(())
}

/// The first word is the program, the rest are its arguments.
async fn run_command(line: &str, timeout: Duration) -> Result<()> {
    debug!("Restart command: {:?}", line);
    let mut words = line.split(' ');
    let program = words
        .next()
        .filter(|p| !p.is_empty())
        .context(error::InvalidRestartCommandSnafu { command: line })?;

    let mut command = Command::new(program);
    command.args(words).kill_on_drop(true);
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .ok()
        .context(error::RestartTimeoutSnafu {
            command: line,
            seconds: timeout.as_secs(),
        })?
        .context(error::CommandExecutionFailureSnafu { command: line })?;

    ensure!(
        output.status.success(),
        error::FailedRestartCommandSnafu {
            command: line,
            stderr: String::from_utf8_lossy(&output.stderr),
        }
    );
    trace!("'{}' stdout: {}", line, String::from_utf8_lossy(&output.stdout));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn runs_commands_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("restarted");
        let commands = vec![
            "true".to_string(),
            format!("touch {}", marker.display()),
        ];
        restart(&commands, Duration::from_secs(5)).await.unwrap();
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn failures() {
        let timeout = Duration::from_secs(5);
        assert!(matches!(
            restart(&["false".to_string()], timeout).await.unwrap_err(),
            Error::FailedRestartCommand { .. }
        ));
        assert!(matches!(
            restart(&[" leading-space".to_string()], timeout)
                .await
                .unwrap_err(),
            Error::InvalidRestartCommand { .. }
        ));
        assert!(matches!(
            restart(&["/nonexistent/restart".to_string()], timeout)
                .await
                .unwrap_err(),
            Error::CommandExecutionFailure { .. }
        ));
        assert!(matches!(
            restart(&["sleep 5".to_string()], Duration::from_millis(100))
                .await
                .unwrap_err(),
            Error::RestartTimeout { .. }
        ));
    }
}
