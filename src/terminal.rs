//! Interactive PTY terminal sessions.
//!
//! Some remote tools only run on a terminal (consoles, CLIs that refuse a
//! pipe). A [`Terminal`] wraps one channel with a PTY and shell on it:
//! output is a single combined stream and commands are matched against the
//! shell prompt rather than an exit status. Regular bounded execution
//! should be preferred wherever it works.

use std::time::Duration;

use russh::{ChannelMsg, client};
use tracing::debug;

use crate::error::ExecError;

/// Terminal type requested for the remote PTY.
const TERM_TYPE: &str = "xterm";

/// An interactive shell running on its own channel.
///
/// Created by [`Session::open_terminal`](crate::session::Session::open_terminal).
/// Does not hold the session's transport lock, so bounded commands can keep
/// flowing on other channels while the terminal is open.
pub struct Terminal {
    channel: russh::Channel<client::Msg>,
    endpoint: String,
}

/// Request a PTY and shell on `channel`, then wait for the prompt.
///
/// The login banner is read and discarded; the terminal is ready to accept
/// commands once the prompt has been seen.
pub(crate) async fn start(
    channel: russh::Channel<client::Msg>,
    endpoint: &str,
    prompt: &str,
    timeout: Duration,
) -> Result<Terminal, ExecError> {
    channel
        .request_pty(false, TERM_TYPE, 80, 24, 0, 0, &[])
        .await
        .map_err(|e| ExecError::Connection {
            endpoint: endpoint.to_string(),
            reason: format!("failed to request pty: {}", e),
        })?;

    channel
        .request_shell(false)
        .await
        .map_err(|e| ExecError::Connection {
            endpoint: endpoint.to_string(),
            reason: format!("failed to request shell: {}", e),
        })?;

    let mut terminal = Terminal {
        channel,
        endpoint: endpoint.to_string(),
    };

    let banner = terminal.read_until_prompt(prompt, timeout).await?;
    debug!(
        "Terminal on {} ready ({} bytes of banner discarded)",
        terminal.endpoint,
        banner.len()
    );
    Ok(terminal)
}

impl Terminal {
    /// Run one command on the terminal and return its output with the
    /// echoed command line and the prompt stripped.
    pub async fn exec(
        &mut self,
        command: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        self.channel
            .data(format!("{}\n", command).as_bytes())
            .await
            .map_err(|e| ExecError::Connection {
                endpoint: self.endpoint.clone(),
                reason: format!("failed to write to terminal: {}", e),
            })?;

        let reply = self.read_until_prompt(prompt, timeout).await?;
        Ok(strip_reply(&reply, command, prompt))
    }

    /// Close the terminal channel. The session transport stays open.
    pub async fn close(self) {
        let _ = self.channel.close().await;
    }

    /// Accumulate combined output until it ends with `prompt` or the
    /// deadline fires. A timeout carries the partial buffer.
    async fn read_until_prompt(
        &mut self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, ExecError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let waited = tokio::time::timeout_at(deadline, self.channel.wait()).await;
            let msg = match waited {
                Ok(msg) => msg,
                Err(_) => {
                    return Err(ExecError::Timeout {
                        elapsed: timeout,
                        stdout: String::from_utf8_lossy(&buf).into_owned(),
                        stderr: String::new(),
                    });
                }
            };

            match msg {
                Some(ChannelMsg::Data { data }) => {
                    buf.extend_from_slice(&data);
                    if String::from_utf8_lossy(&buf).ends_with(prompt) {
                        break;
                    }
                }
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    // A PTY normally merges the streams; tolerate servers
                    // that still send extended data.
                    if ext == 1 {
                        buf.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    return Err(ExecError::Connection {
                        endpoint: self.endpoint.clone(),
                        reason: "terminal closed before the prompt appeared".to_string(),
                    });
                }
                Some(_) => {}
            }
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

/// Remove the echoed command and the trailing prompt from a terminal reply.
fn strip_reply(reply: &str, command: &str, prompt: &str) -> String {
    reply.replace(command, "").replace(prompt, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod reply_stripping {
        use super::*;

        #[test]
        fn test_echo_and_prompt_removed() {
            let reply = "show version\r\nv1.2.3\r\nuser@host:~$ ";
            let cleaned = strip_reply(reply, "show version", "user@host:~$ ");
            assert_eq!(cleaned, "\r\nv1.2.3\r\n");
        }

        #[test]
        fn test_output_without_echo_is_untouched() {
            let reply = "line one\nline two\n> ";
            let cleaned = strip_reply(reply, "status", "> ");
            assert_eq!(cleaned, "line one\nline two\n");
        }

        #[test]
        fn test_empty_reply() {
            assert_eq!(strip_reply("", "cmd", "$ "), "");
        }
    }
}
