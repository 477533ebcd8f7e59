use crate::{VerifyError, VerifyResult};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// 轮询子进程状态的间隔.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 失败信息中最多附带的日志行数.
const LOG_TAIL_LINES: usize = 5;

/// 日志文件的最后几行非空内容, 以 ` | ` 连接.
fn log_tail(log: &Path) -> String {
    let text = fs::read_to_string(log).unwrap_or_default();
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let from = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[from..].join(" | ")
}

/// 阻塞地运行外部组件.
///
/// 子进程的 stderr 写入 `log`, stdout 丢弃. 设置了 `timeout` 时, 超时后子进程会被杀死.
///
/// # 返回值
///
/// 无法启动, 非零退出, 或超时均返回 [`VerifyError::ExternalCollaborator`].
pub(crate) fn run_logged(
    tool: &str,
    mut cmd: Command,
    timeout: Option<Duration>,
    log: &Path,
) -> VerifyResult<()> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let stderr = File::create(log)?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr));

    tracing::debug!(tool, command = ?cmd, "spawning external process");
    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => VerifyError::collaborator(tool, format!("`{program}` not found")),
        _ => VerifyError::collaborator(tool, format!("cannot launch `{program}`: {e}")),
    })?;

    let start = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Some(limit) = timeout {
            if start.elapsed() >= limit {
                // 进程可能恰好已经退出, 忽略 kill 的错误.
                let _ = child.kill();
                let _ = child.wait();
                return Err(VerifyError::collaborator(
                    tool,
                    format!("timed out after {} s", limit.as_secs_f64()),
                ));
            }
        }
        thread::sleep(POLL_INTERVAL);
    };

    tracing::debug!(tool, %status, elapsed = ?start.elapsed(), "external process finished");
    if status.success() {
        Ok(())
    } else {
        Err(VerifyError::collaborator(
            tool,
            format!("exited with {status}: {}", log_tail(log)),
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_success_and_failure() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("run.log");
        run_logged("sh", sh("true"), None, &log).unwrap();

        let err = run_logged("sh", sh("echo boom >&2; exit 3"), None, &log).unwrap_err();
        assert!(err.is_collaborator());
        let msg = err.to_string();
        assert!(msg.contains("boom"), "{msg}");
    }

    #[test]
    fn test_timeout_kills_child() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("run.log");
        let start = Instant::now();
        let err = run_logged("sleepy", sh("sleep 30"), Some(Duration::from_millis(300)), &log)
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_missing_program() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("run.log");
        let cmd = Command::new("definitely-not-an-installed-tool-4711");
        let err = run_logged("ghost", cmd, None, &log).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
