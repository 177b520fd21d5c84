//! Bounded subprocess execution for external tools.

use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// How long one external tool invocation may run before it is killed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a bounded tool invocation.
#[derive(Debug)]
pub enum RunOutcome {
    Exited(ExitStatus),
    TimedOut,
}

/// Run `program` with `args`, blocking the calling worker thread until the
/// process exits or `timeout` elapses. On timeout the process is killed and
/// reaped. Stdout/stderr are discarded; external UTAU tools write progress
/// noise there that is of no use to the library.
pub fn run(
    program: &Path,
    args: &[String],
    workdir: Option<&Path>,
    timeout: Duration,
) -> std::io::Result<RunOutcome> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(dir) = workdir {
        command.current_dir(dir);
    }

    log::debug!("> {} {}", program.display(), args.join(" "));
    let started = Instant::now();
    let mut child = command.spawn()?;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(RunOutcome::Exited(status));
        }
        if started.elapsed() >= timeout {
            log::warn!(
                "{} did not finish within {:?}, killing",
                program.display(),
                timeout
            );
            let _ = child.kill();
            let _ = child.wait();
            return Ok(RunOutcome::TimedOut);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
