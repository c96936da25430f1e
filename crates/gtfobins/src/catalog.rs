//! Typed decode of the GTFOBins catalog data file.
//!
//! The catalog is decoded exactly once, at load time, into [`MethodSpec`]
//! values with closed capability and stream enums; malformed entries are load
//! errors rather than resolution-time surprises. File order is preserved:
//! candidate iteration walks binaries in the order the catalog lists them.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde::de::{MapAccess, Visitor};

use crate::capability::{Capability, Stream, StreamSet};
use crate::error::{CatalogError, ResolutionError};
use crate::method::MethodHandle;

/// The catalog shipped with the crate.
const DEFAULT_CATALOG: &str = include_str!("../data/gtfobins.json");

/// One fully typed method template.
///
/// Immutable once decoded; placeholder substitution happens at build time on
/// a [`MethodHandle`], never by mutating the spec.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodSpec {
    /// The single capability this method implements.
    pub capability: Capability,
    /// The streaming discipline the payload's output uses.
    pub stream: Stream,
    /// Payload template; `{command}` expands to the composed invocation.
    pub payload: String,
    /// Arguments always appended to the binary invocation.
    pub args: Vec<String>,
    /// Arguments appended instead of `args` when running a SUID copy.
    pub suid_args: Vec<String>,
    /// Template for bytes sent to the process right after launch.
    pub input: String,
    /// Template for bytes that terminate the process early.
    pub exit: String,
    /// Arguments that disqualify this method under a sudo command spec.
    pub restricted: Vec<String>,
}

/// A method entry as it appears in the data file: either the full object
/// shape or the plain-string shorthand for a simple shell payload.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Shorthand(String),
    Full(RawMethod),
}

#[derive(Deserialize)]
struct RawMethod {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    suid: Option<Vec<String>>,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    exit: Option<String>,
    #[serde(default)]
    restricted: Vec<String>,
}

/// JSON object decoded with its key order intact.
///
/// `serde_json` maps lose insertion order; fallback iteration depends on it,
/// so the top level is visited by hand.
struct OrderedBinaries(Vec<(String, Vec<RawEntry>)>);

impl<'de> Deserialize<'de> for OrderedBinaries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = OrderedBinaries;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map of binary names to method lists")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some((name, methods)) = map.next_entry::<String, Vec<RawEntry>>()? {
                    entries.push((name, methods));
                }
                Ok(OrderedBinaries(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// The loaded catalog: binary name → typed method templates, in file order.
#[derive(Clone, Debug)]
pub struct Catalog {
    entries: Vec<(String, Vec<MethodSpec>)>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Loads the catalog shipped with the crate.
    pub fn load_default() -> Result<Self, CatalogError> {
        Self::from_json(DEFAULT_CATALOG)
    }

    /// Decodes a catalog from JSON text.
    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        let raw: OrderedBinaries = serde_json::from_str(text)?;

        let mut entries = Vec::with_capacity(raw.0.len());
        let mut index = HashMap::with_capacity(raw.0.len());
        for (name, methods) in raw.0 {
            let mut specs = Vec::with_capacity(methods.len());
            for method in methods {
                specs.push(Self::type_entry(&name, method)?);
            }
            index.entry(name.clone()).or_insert(entries.len());
            entries.push((name, specs));
        }

        Ok(Self { entries, index })
    }

    fn type_entry(binary: &str, entry: RawEntry) -> Result<MethodSpec, CatalogError> {
        let raw = match entry {
            // Shorthand: a bare payload string is a print-mode shell method.
            RawEntry::Shorthand(payload) => {
                return Ok(MethodSpec {
                    capability: Capability::SHELL,
                    stream: Stream::Print,
                    payload,
                    args: Vec::new(),
                    suid_args: Vec::new(),
                    input: String::new(),
                    exit: String::new(),
                    restricted: Vec::new(),
                });
            }
            RawEntry::Full(raw) => raw,
        };

        let capability = Capability::from_catalog_name(&raw.kind).ok_or_else(|| {
            CatalogError::UnknownCapability {
                binary: binary.to_owned(),
                value: raw.kind.clone(),
            }
        })?;
        let stream = match raw.stream.as_deref() {
            None => Stream::Print,
            Some(name) => {
                Stream::from_catalog_name(name).ok_or_else(|| CatalogError::UnknownStream {
                    binary: binary.to_owned(),
                    value: name.to_owned(),
                })?
            }
        };

        Ok(MethodSpec {
            capability,
            stream,
            payload: raw.payload.unwrap_or_else(|| "{command}".to_owned()),
            args: raw.args,
            suid_args: raw.suid.unwrap_or_default(),
            input: raw.input.unwrap_or_default(),
            exit: raw.exit.unwrap_or_default(),
            restricted: raw.restricted,
        })
    }

    /// Number of binaries in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog holds no binaries at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Typed method templates for `name`, if the catalog knows it.
    #[must_use]
    pub fn methods_of(&self, name: &str) -> Option<&[MethodSpec]> {
        self.index
            .get(name)
            .map(|&at| self.entries[at].1.as_slice())
    }

    /// First usable method for the requested capability and stream filter.
    ///
    /// Walks binaries in catalog order, skipping any the `which` resolver
    /// cannot locate on the remote host. An unresolvable candidate is an
    /// ordinary miss, never an error; only full exhaustion reports
    /// [`ResolutionError::NoTemplate`].
    pub fn first_method<'a>(
        &'a self,
        capabilities: Capability,
        streams: StreamSet,
        which: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<MethodHandle<'a>, ResolutionError> {
        self.candidates(capabilities, streams, which)
            .into_iter()
            .next()
            .ok_or(ResolutionError::NoTemplate)
    }

    /// Every usable method for the requested capability and stream filter,
    /// in catalog order.
    pub fn candidates<'a>(
        &'a self,
        capabilities: Capability,
        streams: StreamSet,
        which: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Vec<MethodHandle<'a>> {
        let mut found = Vec::new();
        for (name, methods) in &self.entries {
            let matching: Vec<&MethodSpec> = methods
                .iter()
                .filter(|m| capabilities.contains(m.capability) && streams.accepts(m.stream))
                .collect();
            if matching.is_empty() {
                continue;
            }
            let Some(path) = which(name) else {
                continue;
            };
            found.extend(
                matching
                    .into_iter()
                    .map(|spec| MethodHandle::new(spec, path.clone())),
            );
        }
        found
    }

    /// Methods of the binary at `binary_path` matching the filters.
    ///
    /// Used when the binary is fixed up front (a sudoers command spec, a
    /// discovered SUID copy) rather than searched for.
    ///
    /// # Errors
    ///
    /// [`ResolutionError::NoTemplate`] when the catalog does not know the
    /// binary, [`ResolutionError::UnsupportedCapability`] when it does but
    /// none of its methods provide a requested capability.
    pub fn methods_for_path<'a>(
        &'a self,
        binary_path: &str,
        capabilities: Capability,
        streams: StreamSet,
    ) -> Result<Vec<MethodHandle<'a>>, ResolutionError> {
        let name = binary_path.rsplit('/').next().unwrap_or(binary_path);
        let methods = self.methods_of(name).ok_or(ResolutionError::NoTemplate)?;

        let mut offered: Option<Capability> = None;
        for method in methods {
            offered = Some(offered.map_or(method.capability, |acc| acc | method.capability));
        }
        let offered = offered.ok_or(ResolutionError::NoTemplate)?;
        if !offered.intersects(capabilities) {
            return Err(ResolutionError::UnsupportedCapability);
        }

        Ok(methods
            .iter()
            .filter(|m| capabilities.contains(m.capability) && streams.accepts(m.stream))
            .map(|spec| MethodHandle::new(spec, binary_path.to_owned()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_loads() {
        let catalog = Catalog::load_default().expect("embedded catalog is valid");
        assert!(!catalog.is_empty());
        assert!(catalog.methods_of("cat").is_some());
        assert!(catalog.methods_of("dd").is_some());
    }

    #[test]
    fn file_order_drives_candidate_order() {
        let catalog = Catalog::from_json(
            r#"{
                "zzz": [{"type": "read", "stream": "print", "payload": "{command} {lfile}"}],
                "aaa": [{"type": "read", "stream": "print", "payload": "{command} {lfile}"}]
            }"#,
        )
        .expect("valid catalog");

        let mut which = |name: &str| Some(format!("/bin/{name}"));
        let found = catalog.candidates(Capability::READ, StreamSet::ANY, &mut which);
        let paths: Vec<&str> = found.iter().map(MethodHandle::binary_path).collect();
        assert_eq!(paths, ["/bin/zzz", "/bin/aaa"]);
    }

    #[test]
    fn unknown_capability_is_a_load_error() {
        let err = Catalog::from_json(r#"{"cat": [{"type": "levitate"}]}"#)
            .expect_err("unknown capability must fail the load");
        assert!(matches!(err, CatalogError::UnknownCapability { .. }));
    }

    #[test]
    fn unknown_stream_is_a_load_error() {
        let err =
            Catalog::from_json(r#"{"cat": [{"type": "read", "stream": "carrier-pigeon"}]}"#)
                .expect_err("unknown stream must fail the load");
        assert!(matches!(err, CatalogError::UnknownStream { .. }));
    }

    #[test]
    fn shorthand_entries_decode_as_print_shell_methods() {
        let catalog =
            Catalog::from_json(r#"{"env": ["{command} {shell}"]}"#).expect("valid catalog");
        let methods = catalog.methods_of("env").expect("env present");
        assert_eq!(methods.len(), 1);
        assert_eq!(methods[0].capability, Capability::SHELL);
        assert_eq!(methods[0].stream, Stream::Print);
        assert_eq!(methods[0].payload, "{command} {shell}");
    }

    #[test]
    fn missing_capability_on_fixed_path_is_distinguished() {
        let catalog = Catalog::from_json(
            r#"{"cat": [{"type": "read", "stream": "print", "payload": "{command} {lfile}"}]}"#,
        )
        .expect("valid catalog");

        let err = catalog
            .methods_for_path("/bin/cat", Capability::WRITE, StreamSet::ANY)
            .expect_err("cat has no write method");
        assert_eq!(err, ResolutionError::UnsupportedCapability);

        let err = catalog
            .methods_for_path("/bin/unknown", Capability::READ, StreamSet::ANY)
            .expect_err("unknown binary");
        assert_eq!(err, ResolutionError::NoTemplate);
    }

    #[test]
    fn capability_fallback_skips_unresolvable_binaries() {
        let catalog = Catalog::from_json(
            r#"{
                "cat": [{"type": "read", "stream": "print", "payload": "{command} {lfile}"}],
                "dd": [{"type": "read", "stream": "raw", "payload": "{command} if={lfile}"}]
            }"#,
        )
        .expect("valid catalog");

        // "cat" is missing on the remote host; resolution must fall through
        // to dd's raw method rather than erroring.
        let mut which = |name: &str| (name == "dd").then(|| "/bin/dd".to_owned());
        let method = catalog
            .first_method(Capability::READ, StreamSet::ANY, &mut which)
            .expect("dd must be offered");
        assert_eq!(method.binary_path(), "/bin/dd");
        assert_eq!(method.stream(), Stream::Raw);
    }
}
