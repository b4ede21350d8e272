use anyhow::{bail, Context, Result};
use cronwatch_core::job::Action;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// Execute one configured job action.
pub async fn execute(action: &Action) -> Result<()> {
    match action {
        Action::Noop => Ok(()),

        Action::Exec { cmd, args, timeout_ms } => {
            let mut c = Command::new(cmd);
            if !args.is_empty() {
                c.args(args);
            }
            c.kill_on_drop(true);
            let fut = c.output();

            let res = if let Some(ms) = timeout_ms {
                timeout(Duration::from_millis(*ms), fut)
                    .await
                    .with_context(|| format!("{cmd} timed out after {ms}ms"))?
            } else {
                fut.await
            };
            let out = res.with_context(|| format!("spawn {cmd}"))?;

            if !out.status.success() {
                bail!("{cmd} exit status {:?}", out.status.code());
            }
            debug!(%cmd, stdout = %String::from_utf8_lossy(&out.stdout).trim(), "exec output");
            Ok(())
        }

        Action::Fail { message } => bail!("{message}"),
    }
}
