//! Command execution over the delimiter protocol.
//!
//! [`launch`]/[`collect`] implement the framing itself; [`run`] is the
//! buffered synchronous entry point and [`spawn`] starts a long-lived remote
//! process wrapped in a [`RemoteStream`].

use std::fmt::Write as _;
use std::io;
use std::time::Duration;

use redcat_channel::Channel;

use crate::stream::{RemoteStream, StreamMode};
use crate::token::SentinelPair;
use crate::wire;

/// Quotes `text` for safe interpolation into a shell command line.
///
/// Matches the conservative POSIX single-quote discipline: strings made of
/// unambiguous characters pass through untouched, everything else is wrapped
/// in single quotes with embedded quotes escaped.
#[must_use]
pub fn shell_quote(text: &str) -> String {
    const SAFE: &str = "@%+=:,./-_";
    if !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || SAFE.contains(c))
    {
        return text.to_owned();
    }
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('\'');
    for c in text.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Frames `command` between a fresh sentinel pair and sends it.
///
/// With `wait` set, the command is rewritten as
/// `echo; echo <START>; <command>; echo <END>` on a single shell line. The
/// `;` chaining guarantees the end token is echoed even when the command
/// fails, without altering the command's own exit-status semantics. The call
/// then blocks until a line starting with the start token is observed,
/// synchronizing the reader past stale buffered output, banners, and echoed
/// input; an echoed copy of the sent line itself is swallowed when present.
///
/// With `wait` unset the command is sent as-is (long-running or background
/// invocations); the returned pair is only meaningful once a follow-up scan
/// is armed.
///
/// # Errors
///
/// Propagates transport failures; synchronization honours `sync_timeout`
/// through the channel's configured receive timeout.
pub fn launch<C: Channel>(
    channel: &mut C,
    command: &str,
    wait: bool,
) -> io::Result<SentinelPair> {
    let pair = SentinelPair::generate();

    // Leading space keeps the line out of HISTFILE under ignorespace.
    let line = if wait {
        format!(
            " echo; echo {start}; {command}; echo {end}\n",
            start = pair.start,
            end = pair.end
        )
    } else {
        format!(" {command}\n")
    };
    channel.send_all(line.as_bytes())?;

    #[cfg(feature = "tracing")]
    tracing::debug!(command, wait, start = %pair.start, end = %pair.end, "launched");

    if wait {
        loop {
            let seen = wire::recv_until(channel, b"\n", None)?;
            if seen.starts_with(pair.start.as_bytes()) {
                break;
            }
        }
        swallow_echo(channel, line.trim_end_matches('\n').as_bytes())?;
    }

    Ok(pair)
}

/// Consumes an echoed copy of the sent command if the shell echoed it back
/// after the start token (echo was not suppressed on the remote terminal).
fn swallow_echo<C: Channel>(channel: &mut C, sent: &[u8]) -> io::Result<()> {
    let mut pending = vec![0u8; sent.len()];
    let n = match channel.peek(&mut pending) {
        Ok(n) => n,
        Err(err) if redcat_channel::is_timeout(&err) => 0,
        Err(err) => return Err(err),
    };
    if n == sent.len() && pending == sent {
        wire::recv_exact(channel, sent.len())?;
    }
    Ok(())
}

/// Captures everything before the end token of a previously launched command.
///
/// Strips the start-token line when echo leaked it into the captured region,
/// then drains trailing artifacts so they cannot corrupt the next command's
/// framing.
///
/// # Errors
///
/// [`io::ErrorKind::TimedOut`] when `timeout` expires before the end token
/// arrives; [`io::ErrorKind::UnexpectedEof`] on disconnect.
pub fn collect<C: Channel>(
    channel: &mut C,
    pair: &SentinelPair,
    timeout: Option<Duration>,
) -> io::Result<Vec<u8>> {
    let captured = wire::recv_until(channel, pair.end.as_bytes(), timeout)?;
    let mut output = captured[..captured.len() - pair.end.as_bytes().len()].to_vec();

    if memchr::memmem::find(&output, pair.start.as_bytes()).is_some() {
        match memchr::memchr(b'\n', &output) {
            Some(newline) => {
                output.drain(..=newline);
            }
            None => output.clear(),
        }
    }

    wire::flush_output(channel)?;
    Ok(output)
}

/// Runs `command` synchronously and returns its buffered output.
///
/// The result is exactly the command's stdout/stderr interleaving as produced
/// by the remote shell: no sentinel text, no prompt artifacts.
pub fn run<C: Channel>(channel: &mut C, command: &str) -> io::Result<Vec<u8>> {
    run_with_input(channel, command, None, None)
}

/// Runs `command` synchronously, optionally feeding `input` to its stdin
/// after launch and bounding the wait with `timeout`.
pub fn run_with_input<C: Channel>(
    channel: &mut C,
    command: &str,
    input: Option<&[u8]>,
    timeout: Option<Duration>,
) -> io::Result<Vec<u8>> {
    let pair = launch(channel, command, true)?;
    if let Some(input) = input {
        channel.send_all(input)?;
    }
    collect(channel, &pair, timeout)
}

/// Sends `command` without waiting for completion or output.
///
/// The returned pair is a placeholder: no scan is armed, and the caller is
/// responsible for any later synchronization.
pub fn run_detached<C: Channel>(channel: &mut C, command: &str) -> io::Result<SentinelPair> {
    launch(channel, command, false)
}

/// Configuration for [`spawn`].
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    mode: StreamMode,
    stdin_data: Option<Vec<u8>>,
    exit_command: Option<Vec<u8>>,
    declared_length: Option<u64>,
    foreground: bool,
    env: Vec<(String, String)>,
    stdout_redirect: Option<String>,
    stderr_redirect: Option<String>,
    restore_command: Option<Vec<u8>>,
    sync_timeout: Option<Duration>,
}

impl StreamOptions {
    /// Creates options for the given stream mode.
    #[must_use]
    pub fn new(mode: StreamMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Bytes sent to the remote process immediately after launch (stdin
    /// bootstrap required by some payloads).
    #[must_use]
    pub fn stdin_data<B: Into<Vec<u8>>>(mut self, data: B) -> Self {
        let data = data.into();
        self.stdin_data = (!data.is_empty()).then_some(data);
        self
    }

    /// Bytes sent at EOF to terminate the remote process early.
    #[must_use]
    pub fn exit_command<B: Into<Vec<u8>>>(mut self, command: B) -> Self {
        let command = command.into();
        self.exit_command = (!command.is_empty()).then_some(command);
        self
    }

    /// Total byte count the write side must deliver; the stream truncates
    /// beyond it and pads up to it on close.
    #[must_use]
    pub fn declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    /// Runs the command in the foreground instead of as a background job.
    ///
    /// Required for write-capable invocations (stdin must stay attached) and
    /// hazardous by nature: a remote command that never terminates and offers
    /// no way to interrupt it deadlocks the session.
    #[must_use]
    pub fn foreground(mut self) -> Self {
        self.foreground = true;
        self
    }

    /// Prefixes the command with an environment variable assignment.
    #[must_use]
    pub fn env<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    /// Redirects the remote command's stdout to `path`.
    #[must_use]
    pub fn redirect_stdout<P: Into<String>>(mut self, path: P) -> Self {
        self.stdout_redirect = Some(path.into());
        self
    }

    /// Redirects the remote command's stderr to `path`.
    #[must_use]
    pub fn redirect_stderr<P: Into<String>>(mut self, path: P) -> Self {
        self.stderr_redirect = Some(path.into());
        self
    }

    /// Raw line replayed over the channel when the stream reaches EOF,
    /// restoring terminal state the facade changed before spawning (stty
    /// settings, prompt variable).
    #[must_use]
    pub fn restore_command<B: Into<Vec<u8>>>(mut self, command: B) -> Self {
        self.restore_command = Some(command.into());
        self
    }

    /// Bounds the wait for the start token during launch synchronization.
    #[must_use]
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// The configured stream mode.
    #[must_use]
    pub const fn mode(&self) -> StreamMode {
        self.mode
    }

    fn render_command(&self, command: &str) -> String {
        let mut rendered = String::new();
        for (name, value) in &self.env {
            write!(rendered, "{}={} ", shell_quote(name), shell_quote(value))
                .expect("writing to a String cannot fail");
        }
        rendered.push_str(command);
        if let Some(path) = &self.stdout_redirect {
            write!(rendered, " >{}", shell_quote(path)).expect("writing to a String cannot fail");
        }
        if let Some(path) = &self.stderr_redirect {
            write!(rendered, " 2>{}", shell_quote(path)).expect("writing to a String cannot fail");
        }
        rendered
    }

    /// Renders the full shell fragment wrapping `command` for streaming.
    ///
    /// Environment assumption: a POSIX-ish Bourne-family remote shell with
    /// job control. The prompt variable is cleared so prompt text cannot leak
    /// into captured output, `set +m`/`set -m` bracket the fragment to
    /// silence job-control chatter, and read-only background invocations run
    /// inside a brace group that echoes the end token on both the success and
    /// failure paths. Targeting a different shell family means replacing this
    /// renderer, not patching call sites.
    fn render_fragment(&self, command: &str, pair: &SentinelPair) -> String {
        let command = self.render_command(command);
        let body = if self.mode.is_write() || self.foreground {
            // Dangerous: foreground, no job to kill if the remote end hangs.
            format!(
                "echo; echo {start}; {command}; echo {end}",
                start = pair.start,
                end = pair.end
            )
        } else {
            format!(
                "{{ echo; echo {start}; {command} && echo {end} || echo {end} & }} 2>/dev/null",
                start = pair.start,
                end = pair.end
            )
        };
        format!(" export PS1=;set +m;{body};set -m\n")
    }
}

/// Starts a long-lived remote process and returns its byte stream.
///
/// Sends the rendered fragment, blocks until the start token is observed,
/// then sends any stdin bootstrap data and hands back a [`RemoteStream`]
/// armed on the end token. Binary invocations require the facade to have
/// placed the remote terminal in raw no-echo mode beforehand and to register
/// the restore line via [`StreamOptions::restore_command`].
///
/// # Errors
///
/// Propagates transport failures; a disconnect mid-synchronization surfaces
/// as [`io::ErrorKind::UnexpectedEof`]. No retry is attempted at this layer.
pub fn spawn<C: Channel>(
    mut channel: C,
    command: &str,
    options: StreamOptions,
) -> io::Result<RemoteStream<C>> {
    let pair = SentinelPair::generate();
    let fragment = options.render_fragment(command, &pair);
    channel.send_all(fragment.as_bytes())?;

    #[cfg(feature = "tracing")]
    tracing::debug!(command, mode = ?options.mode, "spawned remote process");

    loop {
        let seen = wire::recv_until(&mut channel, b"\n", options.sync_timeout)?;
        if seen.starts_with(pair.start.as_bytes()) {
            break;
        }
    }

    if let Some(data) = &options.stdin_data {
        channel.send_all(data)?;
    }

    let mut stream = RemoteStream::new(channel, pair.end.as_bytes().to_vec(), options.mode);
    if let Some(exit) = options.exit_command {
        stream = stream.with_exit_command(exit);
    }
    if let Some(length) = options.declared_length {
        stream = stream.with_declared_length(length);
    }
    if let Some(restore) = options.restore_command {
        stream = stream.with_restore_command(restore);
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use redcat_channel::ScriptedChannel;

    /// Responder emulating a cooperative remote shell: echoes nothing, prints
    /// the start token, fixed output, and the end token for framed lines.
    fn framed_responder(output: &'static [u8]) -> impl FnMut(&[u8]) -> Vec<Vec<u8>> {
        move |line: &[u8]| {
            let text = String::from_utf8_lossy(line);
            let Some(rest) = text.strip_prefix(" echo; echo ") else {
                return Vec::new();
            };
            let mut pieces = rest.split("; ");
            let start = pieces.next().unwrap_or_default().to_owned();
            let end = pieces
                .last()
                .and_then(|p| p.strip_prefix("echo "))
                .unwrap_or_default()
                .to_owned();
            vec![
                b"\r\n".to_vec(),
                format!("{start}\r\n").into_bytes(),
                output.to_vec(),
                format!("{end}\r\n").into_bytes(),
            ]
        }
    }

    #[test]
    fn run_returns_exact_output() {
        let mut channel = ScriptedChannel::new();
        channel.respond_with(framed_responder(b"uid=0(root)\n"));

        let output = run(&mut channel, "id").expect("run");
        assert_eq!(output, b"uid=0(root)\n");
    }

    #[test]
    fn run_returns_empty_output_for_silent_command() {
        let mut channel = ScriptedChannel::new();
        channel.respond_with(framed_responder(b""));

        let output = run(&mut channel, "true").expect("run");
        assert_eq!(output, b"");
    }

    #[test]
    fn sequential_runs_use_fresh_sentinels() {
        let mut channel = ScriptedChannel::new();
        let first = launch(&mut channel, "id", false).expect("launch");
        let second = launch(&mut channel, "id", false).expect("launch");
        assert_ne!(first.start, second.start);
        assert_ne!(first.end, second.end);
    }

    #[test]
    fn collect_strips_leaked_start_token_line() {
        let pair = SentinelPair::generate();
        let mut channel = ScriptedChannel::with_chunks([
            format!("{}\r\n", pair.start).into_bytes(),
            b"real output\n".to_vec(),
            pair.end.as_bytes().to_vec(),
        ]);

        let output = collect(&mut channel, &pair, Some(Duration::from_millis(200)))
            .expect("collect");
        assert_eq!(output, b"real output\n");
    }

    #[test]
    fn launch_framing_chains_with_semicolons() {
        let mut channel = ScriptedChannel::new();
        // Unsynchronized launch so we can inspect the raw line.
        launch(&mut channel, "grep -r token /etc", false).expect("launch");
        let sent = channel.sent().to_vec();

        let mut channel = ScriptedChannel::new();
        channel.respond_with(framed_responder(b""));
        launch(&mut channel, "grep -r token /etc", true).expect("launch");
        let framed = String::from_utf8(channel.sent().to_vec()).expect("utf8");

        assert_eq!(sent, b" grep -r token /etc\n");
        assert!(framed.starts_with(" echo; echo "));
        assert!(framed.contains("; grep -r token /etc; echo "));
        assert!(!framed.contains("&&"), "bookkeeping must not mask exit status");
    }

    #[test]
    fn spawn_background_fragment_emits_end_token_on_both_paths() {
        let mut channel = ScriptedChannel::new();
        channel.respond_with(|line: &[u8]| {
            let text = String::from_utf8_lossy(line);
            let Some(idx) = text.find("echo; echo ") else {
                return Vec::new();
            };
            let start: String = text[idx + "echo; echo ".len()..]
                .chars()
                .take_while(char::is_ascii_alphanumeric)
                .collect();
            vec![format!("\r\n{start}\r\n").into_bytes()]
        });

        let stream = spawn(
            &mut channel,
            "find / -name token",
            StreamOptions::new(StreamMode::read()),
        )
        .expect("spawn");
        drop(stream);

        let sent = String::from_utf8(channel.sent().to_vec()).expect("utf8");
        assert!(sent.starts_with(" export PS1=;set +m;{ echo; echo "));
        assert!(sent.contains("&& echo "));
        assert!(sent.contains("|| echo "));
        assert!(sent.contains("& } 2>/dev/null;set -m\n"));
    }

    #[test]
    fn spawn_foreground_fragment_for_write_mode() {
        let mut channel = ScriptedChannel::new();
        channel.respond_with(|line: &[u8]| {
            let text = String::from_utf8_lossy(line);
            let Some(idx) = text.find("echo; echo ") else {
                return Vec::new();
            };
            let start: String = text[idx + "echo; echo ".len()..]
                .chars()
                .take_while(char::is_ascii_alphanumeric)
                .collect();
            vec![format!("\r\n{start}\r\n").into_bytes()]
        });

        let stream = spawn(
            &mut channel,
            "dd of=/tmp/out bs=1 count=4",
            StreamOptions::new(StreamMode::write().binary()).declared_length(4),
        )
        .expect("spawn");
        drop(stream);

        let sent = String::from_utf8(channel.sent().to_vec()).expect("utf8");
        assert!(!sent.contains("& }"), "write mode must stay in the foreground");
        assert!(sent.contains("; dd of=/tmp/out bs=1 count=4; echo "));
    }

    #[test]
    fn spawn_sends_stdin_bootstrap_after_start_token() {
        let mut channel = ScriptedChannel::new();
        channel.respond_with(|line: &[u8]| {
            let text = String::from_utf8_lossy(line);
            let Some(idx) = text.find("echo; echo ") else {
                return Vec::new();
            };
            let start: String = text[idx + "echo; echo ".len()..]
                .chars()
                .take_while(char::is_ascii_alphanumeric)
                .collect();
            vec![format!("\r\n{start}\r\n").into_bytes()]
        });

        let stream = spawn(
            &mut channel,
            "base64 -d > /tmp/out",
            StreamOptions::new(StreamMode::write())
                .stdin_data(b"bootstrap".to_vec())
                .declared_length(9),
        )
        .expect("spawn");
        drop(stream);

        let sent = channel.sent().to_vec();
        let text = String::from_utf8_lossy(&sent);
        let fragment_end = text.find('\n').expect("fragment line");
        let bootstrap_at = text.find("bootstrap").expect("bootstrap sent");
        assert!(
            bootstrap_at > fragment_end,
            "stdin bootstrap must follow the launch fragment"
        );
    }

    #[test]
    fn env_and_redirects_render_into_the_command() {
        let options = StreamOptions::new(StreamMode::read())
            .env("LANG", "C")
            .redirect_stdout("/tmp/out file")
            .redirect_stderr("/dev/null");
        let rendered = options.render_command("cat /etc/passwd");
        assert_eq!(
            rendered,
            "LANG=C cat /etc/passwd >'/tmp/out file' 2>/dev/null"
        );
    }

    #[test]
    fn shell_quote_escapes_embedded_quotes() {
        assert_eq!(shell_quote("simple/path-1.txt"), "simple/path-1.txt");
        assert_eq!(shell_quote("with space"), "'with space'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
