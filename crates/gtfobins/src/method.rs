//! Payload construction from a typed method template.

use std::collections::HashMap;

use redcat_protocol::shell_quote;

use crate::capability::{Capability, Stream};
use crate::catalog::MethodSpec;
use crate::error::ResolutionError;

/// Terminal control bytes available to templates as `{ctrl_c}`-style
/// placeholders. Several catalog exits are raw control sequences rather than
/// shell commands.
const CONTROL_CODES: &[(&str, &str)] = &[
    ("ctrl_c", "\x03"),
    ("ctrl_d", "\x04"),
    ("ctrl_o", "\x0f"),
    ("ctrl_r", "\x12"),
    ("ctrl_t", "\x14"),
    ("ctrl_x", "\x18"),
    ("ctrl_z", "\x1a"),
    ("escape", "\x1b"),
];

/// Substitution values supplied by the caller for one payload build.
#[derive(Clone, Debug, Default)]
pub struct PayloadRequest {
    remote_file: Option<String>,
    length: Option<u64>,
    shell: Option<String>,
    use_suid_args: bool,
    sudo: Option<(String, String)>,
}

impl PayloadRequest {
    /// An empty request; builders below fill in what the template needs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote file path for `{lfile}`. Quoted here, once, so templates can
    /// interpolate it directly.
    #[must_use]
    pub fn remote_file<P: AsRef<str>>(mut self, path: P) -> Self {
        self.remote_file = Some(shell_quote(path.as_ref()));
        self
    }

    /// Declared byte count for `{length}`.
    #[must_use]
    pub fn length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Target shell path for `{shell}` in shell-capability templates.
    #[must_use]
    pub fn shell<P: AsRef<str>>(mut self, path: P) -> Self {
        self.shell = Some(shell_quote(path.as_ref()));
        self
    }

    /// Use the method's SUID argument set instead of its normal arguments.
    #[must_use]
    pub fn suid(mut self) -> Self {
        self.use_suid_args = true;
        self
    }

    /// Compose the invocation under `sudo -u <user>`, constrained by the
    /// sudoers command `spec` (`"ALL"` or a concrete command spec).
    #[must_use]
    pub fn sudo<U: Into<String>, S: Into<String>>(mut self, user: U, spec: S) -> Self {
        self.sudo = Some((user.into(), spec.into()));
        self
    }
}

/// A fully built payload, ready to hand to the command runner.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuiltPayload {
    /// The shell command implementing the capability.
    pub payload: String,
    /// Bytes sent to the process right after launch.
    pub input: Vec<u8>,
    /// Bytes that terminate the process early; registered on the stream.
    pub exit: Vec<u8>,
}

/// A method template resolved against a concrete remote binary path.
#[derive(Clone, Debug)]
pub struct MethodHandle<'a> {
    spec: &'a MethodSpec,
    binary_path: String,
}

impl<'a> MethodHandle<'a> {
    pub(crate) fn new(spec: &'a MethodSpec, binary_path: String) -> Self {
        Self { spec, binary_path }
    }

    /// The streaming discipline this method's output uses.
    #[must_use]
    pub fn stream(&self) -> Stream {
        self.spec.stream
    }

    /// The capability this method implements.
    #[must_use]
    pub fn capability(&self) -> Capability {
        self.spec.capability
    }

    /// The resolved remote path of the method's binary.
    #[must_use]
    pub fn binary_path(&self) -> &str {
        &self.binary_path
    }

    /// The underlying template.
    #[must_use]
    pub const fn spec(&self) -> &MethodSpec {
        self.spec
    }

    /// Builds `(payload, input, exit)` with every placeholder substituted.
    ///
    /// `{name}` placeholders not covered by `request` are treated as remote
    /// binary references and resolved recursively through `which`; an
    /// `unquote_` prefix suppresses quoting of the resolved path. A reference
    /// `which` cannot locate fails the build with
    /// [`ResolutionError::MissingDependency`] so the caller can move on to
    /// the next candidate.
    pub fn build(
        &self,
        request: &PayloadRequest,
        which: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<BuiltPayload, ResolutionError> {
        let mut vars: HashMap<String, String> = HashMap::new();
        for (name, code) in CONTROL_CODES {
            vars.insert((*name).to_owned(), (*code).to_owned());
        }
        vars.insert("path".to_owned(), self.binary_path.clone());
        if let Some(lfile) = &request.remote_file {
            vars.insert("lfile".to_owned(), lfile.clone());
        }
        if let Some(length) = request.length {
            vars.insert("length".to_owned(), length.to_string());
        }
        if let Some(shell) = &request.shell {
            vars.insert("shell".to_owned(), shell.clone());
        }

        let command = if let Some((user, spec)) = &request.sudo {
            let (base, extra_args) = self.sudo_args(spec)?;
            let extra = substitute(&extra_args.join(" "), &mut vars, which)?;
            let composed = format!("sudo -u {} {base} {extra}", shell_quote(user));
            composed.trim_end().to_owned()
        } else {
            let args = if request.use_suid_args && !self.spec.suid_args.is_empty() {
                &self.spec.suid_args
            } else {
                &self.spec.args
            };
            let mut composed = self.binary_path.clone();
            for arg in args {
                composed.push(' ');
                composed.push_str(arg);
            }
            substitute(&composed, &mut vars, which)?
        };
        vars.insert("command".to_owned(), command);

        let payload = substitute(&self.spec.payload, &mut vars, which)?;
        let input = substitute(&self.spec.input, &mut vars, which)?;
        let mut exit = substitute(&self.spec.exit, &mut vars, which)?;
        if exit.is_empty() && self.spec.capability == Capability::SHELL {
            exit = "exit\n".to_owned();
        }

        Ok(BuiltPayload {
            payload,
            input: input.into_bytes(),
            exit: exit.into_bytes(),
        })
    }

    /// Checks this method against a sudoers command spec.
    ///
    /// Returns the command text to run plus the arguments that still must be
    /// appended for the method to work. `"ALL"` permits anything; a bare
    /// binary path permits any arguments; otherwise every argument the
    /// method needs must already appear in the spec unless the spec ends
    /// with a wildcard, and none of the spec's arguments may be in the
    /// method's restricted set.
    pub fn sudo_args(&self, spec: &str) -> Result<(String, Vec<String>), ResolutionError> {
        if spec == "ALL" {
            return Ok((self.binary_path.clone(), self.spec.args.clone()));
        }

        let has_wildcard = spec.ends_with('*');

        let words: Vec<String> = spec
            .trim_end_matches('*')
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        if words.is_empty() {
            return Err(ResolutionError::SudoNotPossible);
        }

        // A bare path grants any arguments we care to add.
        if words.len() == 1 && !spec.ends_with(' ') && !has_wildcard {
            return Ok((words[0].clone(), self.spec.args.clone()));
        }

        for word in &words[1..] {
            if self.spec.restricted.contains(word) {
                return Err(ResolutionError::SudoNotPossible);
            }
        }

        let missing: Vec<String> = self
            .spec
            .args
            .iter()
            .filter(|needed| !words[1..].contains(needed))
            .cloned()
            .collect();
        if !missing.is_empty() && !has_wildcard {
            return Err(ResolutionError::SudoNotPossible);
        }

        Ok((words.join(" "), missing))
    }
}

/// Expands `{name}` placeholders in `template`.
///
/// Lookup order: caller-supplied variables (including control codes and the
/// composed `{command}`), then remote binaries through `which`. Paths
/// resolved through `which` are quoted unless the placeholder carries the
/// `unquote_` prefix, and are memoized so a template referencing the same
/// binary twice costs one remote lookup. `{{` and `}}` escape literal braces.
fn substitute(
    template: &str,
    vars: &mut HashMap<String, String>,
    which: &mut dyn FnMut(&str) -> Option<String>,
) -> Result<String, ResolutionError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find(['{', '}']) {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
            continue;
        }
        if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
            continue;
        }
        if tail.starts_with('}') {
            // A stray close brace passes through untouched.
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            break;
        };
        let key = &tail[1..close];
        rest = &tail[close + 1..];

        let (lookup, quote) = match key.strip_prefix("unquote_") {
            Some(inner) => (inner, false),
            None => (key, true),
        };

        if let Some(value) = vars.get(lookup) {
            out.push_str(value);
            continue;
        }

        let path = which(lookup)
            .ok_or_else(|| ResolutionError::MissingDependency(lookup.to_owned()))?;
        let rendered = if quote { shell_quote(&path) } else { path };
        vars.insert(lookup.to_owned(), rendered.clone());
        out.push_str(&rendered);
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::StreamSet;
    use crate::catalog::Catalog;

    fn catalog() -> Catalog {
        Catalog::from_json(
            r#"{
                "cat": [{"type": "read", "stream": "print", "payload": "{command} {lfile}"}],
                "dd": [
                    {"type": "write", "stream": "raw",
                     "payload": "{command} of={lfile} bs=1 count={length} 2>/dev/null"}
                ],
                "base64": [
                    {"type": "write", "stream": "base64",
                     "payload": "{command} -d > {lfile}", "exit": "{ctrl_d}"}
                ],
                "tar": [
                    {"type": "read", "stream": "print",
                     "payload": "{command} -xf {lfile} --to-command {base64}"}
                ],
                "sh": [{"type": "shell", "stream": "print", "suid": ["-p"]}],
                "ionice": [
                    {"type": "shell", "stream": "print", "args": ["-c3"],
                     "payload": "{command} {shell}", "restricted": ["-n"]}
                ]
            }"#,
        )
        .expect("valid catalog")
    }

    fn which_all(name: &str) -> Option<String> {
        Some(format!("/usr/bin/{name}"))
    }

    #[test]
    fn read_payload_substitutes_path_and_file() {
        let catalog = catalog();
        let mut which = which_all;
        let method = catalog
            .first_method(Capability::READ, StreamSet::only(Stream::Print), &mut which)
            .expect("cat resolves");

        let built = method
            .build(&PayloadRequest::new().remote_file("/etc/pass wd"), &mut which)
            .expect("build");
        assert_eq!(built.payload, "/usr/bin/cat '/etc/pass wd'");
        assert!(built.input.is_empty());
        assert!(built.exit.is_empty());
    }

    #[test]
    fn write_payload_substitutes_declared_length() {
        let catalog = catalog();
        let mut which = which_all;
        let method = catalog
            .first_method(Capability::WRITE, StreamSet::only(Stream::Raw), &mut which)
            .expect("dd resolves");

        let built = method
            .build(
                &PayloadRequest::new().remote_file("/tmp/out").length(512),
                &mut which,
            )
            .expect("build");
        assert_eq!(
            built.payload,
            "/usr/bin/dd of=/tmp/out bs=1 count=512 2>/dev/null"
        );
    }

    #[test]
    fn control_code_placeholders_render_raw_bytes() {
        let catalog = catalog();
        let mut which = which_all;
        let method = catalog
            .first_method(
                Capability::WRITE,
                StreamSet::only(Stream::Base64),
                &mut which,
            )
            .expect("base64 resolves");

        let built = method
            .build(&PayloadRequest::new().remote_file("/tmp/out"), &mut which)
            .expect("build");
        assert_eq!(built.exit, b"\x04");
    }

    #[test]
    fn dependency_placeholders_resolve_through_which() {
        let catalog = catalog();
        let mut which = which_all;
        let methods = catalog
            .methods_for_path("/usr/bin/tar", Capability::READ, StreamSet::ANY)
            .expect("tar methods");

        let built = methods[0]
            .build(&PayloadRequest::new().remote_file("/tmp/a.tar"), &mut which)
            .expect("build");
        assert_eq!(
            built.payload,
            "/usr/bin/tar -xf /tmp/a.tar --to-command /usr/bin/base64"
        );
    }

    #[test]
    fn missing_dependency_is_reported_by_name() {
        let catalog = catalog();
        let methods = catalog
            .methods_for_path("/usr/bin/tar", Capability::READ, StreamSet::ANY)
            .expect("tar methods");

        let mut which = |name: &str| (name != "base64").then(|| format!("/usr/bin/{name}"));
        let err = methods[0]
            .build(&PayloadRequest::new().remote_file("/tmp/a.tar"), &mut which)
            .expect_err("base64 is missing");
        assert_eq!(err, ResolutionError::MissingDependency("base64".to_owned()));
    }

    #[test]
    fn shell_method_defaults_exit_and_honours_suid_args() {
        let catalog = catalog();
        let mut which = which_all;
        let methods = catalog
            .methods_for_path("/bin/sh", Capability::SHELL, StreamSet::ANY)
            .expect("sh methods");

        let built = methods[0]
            .build(&PayloadRequest::new().suid(), &mut which)
            .expect("build");
        assert_eq!(built.payload, "/bin/sh -p");
        assert_eq!(built.exit, b"exit\n");
    }

    #[test]
    fn sudo_all_spec_composes_prefix() {
        let catalog = catalog();
        let mut which = which_all;
        let methods = catalog
            .methods_for_path("/usr/bin/ionice", Capability::SHELL, StreamSet::ANY)
            .expect("ionice methods");

        let built = methods[0]
            .build(
                &PayloadRequest::new().shell("/bin/sh").sudo("backup", "ALL"),
                &mut which,
            )
            .expect("build");
        assert_eq!(built.payload, "sudo -u backup /usr/bin/ionice -c3 /bin/sh");
    }

    #[test]
    fn sudo_spec_missing_required_args_without_wildcard_rejects() {
        let catalog = catalog();
        let methods = catalog
            .methods_for_path("/usr/bin/ionice", Capability::SHELL, StreamSet::ANY)
            .expect("ionice methods");

        let err = methods[0]
            .sudo_args("/usr/bin/ionice -t")
            .expect_err("-c3 is required but the spec has no wildcard");
        assert_eq!(err, ResolutionError::SudoNotPossible);
    }

    #[test]
    fn sudo_spec_wildcard_supplies_missing_args() {
        let catalog = catalog();
        let methods = catalog
            .methods_for_path("/usr/bin/ionice", Capability::SHELL, StreamSet::ANY)
            .expect("ionice methods");

        let (command, missing) = methods[0]
            .sudo_args("/usr/bin/ionice *")
            .expect("wildcard accepts");
        assert_eq!(command, "/usr/bin/ionice");
        assert_eq!(missing, ["-c3"]);
    }

    #[test]
    fn sudo_spec_restricted_argument_rejects() {
        let catalog = catalog();
        let methods = catalog
            .methods_for_path("/usr/bin/ionice", Capability::SHELL, StreamSet::ANY)
            .expect("ionice methods");

        let err = methods[0]
            .sudo_args("/usr/bin/ionice -n 7 *")
            .expect_err("-n is restricted for this method");
        assert_eq!(err, ResolutionError::SudoNotPossible);
    }

    #[test]
    fn bare_path_spec_allows_any_arguments() {
        let catalog = catalog();
        let methods = catalog
            .methods_for_path("/usr/bin/ionice", Capability::SHELL, StreamSet::ANY)
            .expect("ionice methods");

        let (command, extra) = methods[0]
            .sudo_args("/usr/bin/ionice")
            .expect("bare path accepts");
        assert_eq!(command, "/usr/bin/ionice");
        assert_eq!(extra, ["-c3"]);
    }

    #[test]
    fn brace_escapes_render_literally() {
        let mut vars = HashMap::new();
        vars.insert("lfile".to_owned(), "/tmp/x".to_owned());
        let mut which = |_: &str| None;
        let rendered =
            substitute("awk '{{print}}' {lfile}", &mut vars, &mut which).expect("render");
        assert_eq!(rendered, "awk '{print}' /tmp/x");
    }
}
