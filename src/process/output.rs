use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Forward a child's stdout and stderr line by line to the logger
///
/// Output is passed through under the `warden::output` target; nothing is
/// stored. Each returned task resolves to the number of lines it forwarded
/// once the stream closes.
pub fn forward_output(name: &str, child: &mut Child) -> Vec<JoinHandle<u64>> {
    let mut tasks = Vec::with_capacity(2);

    if let Some(stdout) = child.stdout.take() {
        tasks.push(tokio::spawn(forward_stream(name.to_string(), "stdout", stdout)));
    }

    if let Some(stderr) = child.stderr.take() {
        tasks.push(tokio::spawn(forward_stream(name.to_string(), "stderr", stderr)));
    }

    tasks
}

async fn forward_stream<R>(name: String, stream: &'static str, reader: R) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut forwarded = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                forwarded += 1;
                if stream == "stderr" {
                    warn!(target: "warden::output", process = %name, stream, "{}", line);
                } else {
                    info!(target: "warden::output", process = %name, stream, "{}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading {} of {}: {}", stream, name, e);
                break;
            }
        }
    }

    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_forward_counts_lines_per_stream() {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg("printf 'one\\ntwo\\n'; printf 'oops\\n' >&2")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();

        let tasks = forward_output("printer", &mut child);
        assert_eq!(tasks.len(), 2);
        let _ = child.wait().await;

        let mut counts = Vec::new();
        for task in tasks {
            counts.push(task.await.unwrap());
        }
        assert_eq!(counts, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_forward_without_pipes() {
        let mut child = Command::new("/bin/true")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        assert!(forward_output("quiet", &mut child).is_empty());
        let _ = child.wait().await;
    }
}
