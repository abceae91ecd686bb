use log::debug;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::errors::{WorkerError, WorkerResult};

/// Check if a command is available in PATH
pub fn check_command_in_path(command: &str) -> WorkerResult<PathBuf> {
    match which::which(command) {
        Ok(path) => {
            debug!("Found {} at {}", command, path.display());
            Ok(path)
        }
        Err(_) => Err(WorkerError::Configuration(format!(
            "{} not found. Ensure it is installed and in PATH.",
            command
        ))),
    }
}

/// Output of a finished external command
#[derive(Debug)]
pub struct CommandOutput {
    pub success: bool,
    pub status: String,
    pub stderr: String,
}

/// Run a command to completion.
///
/// stdout и stderr инструмента построчно пишутся в debug-лог по мере
/// поступления, последние строки stderr сохраняются для ошибки.
pub async fn run_command(mut command: Command) -> WorkerResult<CommandOutput> {
    // stdout воркера зарезервирован под ответы, вывод инструментов уходит в лог
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (status, _, stderr_tail) = tokio::join!(
        child.wait(),
        relay_lines(stdout, 0),
        relay_lines(stderr, STDERR_TAIL_LINES),
    );
    let status = status?;

    Ok(CommandOutput {
        success: status.success(),
        status: status.to_string(),
        stderr: stderr_tail,
    })
}

const STDERR_TAIL_LINES: usize = 20;

// Логирует каждую строку, возвращает последние `keep`
async fn relay_lines<R>(stream: Option<R>, keep: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return String::new();
    };

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(keep);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                debug!("{}", line);
                if keep > 0 {
                    if tail.len() == keep {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Err(e) => {
                debug!("Failed to read tool output: {}", e);
                break;
            }
        }
    }

    Vec::from(tail).join("\n")
}
