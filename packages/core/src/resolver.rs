//! Pluggable conflict resolution for the merge pipeline.
//!
//! A [`ResolverRegistry`] holds named resolver definitions, each with a
//! priority and an optional key glob. When a remote record arrives, the merge
//! pipeline builds a [`MergeContext`], selects the resolvers whose glob
//! matches the key, orders them by descending priority, and invokes them in
//! turn; the first verdict other than [`MergeVerdict::Local`] wins. If every
//! resolver defers, the default last-write-wins rule applies.
//!
//! Definitions may carry a `code` body destined for a sandboxed interpreter.
//! The sandbox is an external collaborator: this registry validates and
//! stores code bodies (screening them against a deny list) but only native
//! Rust functions are executed in-process.

use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::hlc::Timestamp;
use crate::value::Value;

/// Maximum length of a resolver name.
pub const MAX_NAME_LEN: usize = 100;
/// Maximum size of a resolver code body, in bytes.
pub const MAX_CODE_BYTES: usize = 50_000;
/// Default priority when a definition omits one.
pub const DEFAULT_PRIORITY: u8 = 50;

/// Tokens that must not appear in submitted resolver code.
const FORBIDDEN_TOKENS: &[&str] = &[
    "eval",
    "require",
    "import",
    "fetch",
    "XMLHttpRequest",
    "setTimeout",
    "setInterval",
    "Function",
    "process",
    "globalThis",
];

/// Validation failures for submitted resolver definitions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidResolverDef {
    /// The name is empty.
    #[error("resolver name must not be empty")]
    NameEmpty,
    /// The name exceeds [`MAX_NAME_LEN`].
    #[error("resolver name exceeds {MAX_NAME_LEN} characters: {0}")]
    NameTooLong(usize),
    /// The code body exceeds [`MAX_CODE_BYTES`].
    #[error("resolver code exceeds {MAX_CODE_BYTES} bytes: {0}")]
    CodeTooLarge(usize),
    /// The priority is outside `[0, 100]`.
    #[error("resolver priority must be in [0, 100], got {0}")]
    PriorityOutOfRange(u8),
    /// The code body contains a deny-listed token.
    #[error("resolver code contains forbidden pattern: {0}")]
    ForbiddenPattern(String),
    /// The key glob could not be compiled.
    #[error("invalid key pattern: {0}")]
    BadKeyPattern(String),
    /// No resolver with that name is registered.
    #[error("unknown resolver: {0}")]
    UnknownResolver(String),
}

/// Runtime failures while executing a resolver.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// The resolver reported an error. The merge pipeline coerces this to a
    /// rejection.
    #[error("resolver failure: {0}")]
    Failure(String),
    /// The resolver was cancelled mid-merge. The merge aborts and the record
    /// is unchanged.
    #[error("resolver cancelled")]
    Cancelled,
}

/// A resolver definition in wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverDef {
    /// Unique resolver name, 1..=100 characters.
    pub name: String,
    /// Optional sandboxed code body (validated but never executed here).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    /// Priority in `[0, 100]`, highest first. Defaults to 50.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Optional key glob (`*` and `?` wildcards); `None` matches every key.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub key_pattern: Option<String>,
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

impl ResolverDef {
    /// Shorthand for a native-only definition.
    #[must_use]
    pub fn named(name: &str, priority: u8, key_pattern: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            code: None,
            priority,
            key_pattern: key_pattern.map(str::to_string),
        }
    }
}

/// Authenticated principal carried in the merge context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Unique identifier for the authenticated entity.
    pub id: String,
    /// Roles assigned to this principal for authorization checks.
    pub roles: Vec<String>,
}

/// The outcome a resolver returns for one contested merge.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeVerdict {
    /// Store the remote value.
    Accept,
    /// Drop the remote value and emit a [`MergeRejection`].
    Reject {
        /// Stable reason string, e.g. `"immutable"`.
        reason: String,
    },
    /// Store a custom value instead (the remote timestamp still advances the
    /// clock).
    Merge(Value),
    /// No opinion; defer to lower-priority resolvers or the default rule.
    Local,
}

/// Event emitted when a resolver rejects an incoming record.
///
/// This is an observable event, not an error: the map is unchanged and the
/// caller's merge returns normally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRejection {
    /// Map the rejected record targeted.
    pub map_name: String,
    /// Key the rejected record targeted.
    pub key: String,
    /// The value that was refused, if any.
    pub attempted_value: Option<Value>,
    /// Stable reason string supplied by the rejecting resolver.
    pub reason: String,
    /// Timestamp of the rejected record.
    pub timestamp: Timestamp,
    /// Node that produced the rejected record.
    pub node_id: String,
}

/// Everything a resolver may inspect when deciding a merge.
pub struct MergeContext<'a> {
    /// Name of the map being merged into.
    pub map_name: &'a str,
    /// Key under contention.
    pub key: &'a str,
    /// Current local value, if a live one exists.
    pub local_value: Option<&'a Value>,
    /// Incoming remote value (`None` for a remote tombstone).
    pub remote_value: Option<&'a Value>,
    /// Timestamp of the current local record, if any.
    pub local_timestamp: Option<&'a Timestamp>,
    /// Timestamp of the incoming record.
    pub remote_timestamp: &'a Timestamp,
    /// Node id of the incoming record's writer.
    pub remote_node_id: &'a str,
    /// Authenticated principal of the writer, when known.
    pub auth: Option<&'a Principal>,
    /// Read access to other live entries of the same map.
    pub read_entry: &'a dyn Fn(&str) -> Option<Value>,
}

/// A native in-process resolver function.
pub type NativeResolver =
    Arc<dyn Fn(&MergeContext<'_>) -> Result<MergeVerdict, ResolverError> + Send + Sync>;

/// A rejection listener.
pub type RejectionListener = Box<dyn Fn(&MergeRejection)>;

struct ResolverEntry {
    def: ResolverDef,
    native: Option<NativeResolver>,
    matcher: Option<Regex>,
}

/// Registry of conflict resolvers plus rejection listeners.
#[derive(Default)]
pub struct ResolverRegistry {
    entries: Vec<ResolverEntry>,
    listeners: Vec<(u64, RejectionListener)>,
    next_listener_id: u64,
}

impl ResolverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a resolver definition with an optional native function.
    ///
    /// Definitions with only a `code` body are validated and stored for the
    /// external sandbox but never invoked by [`resolve`](Self::resolve).
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidResolverDef`] on an empty or over-long name, an
    /// oversized or deny-listed code body, an out-of-range priority, or an
    /// uncompilable key pattern.
    pub fn register(
        &mut self,
        def: ResolverDef,
        native: Option<NativeResolver>,
    ) -> Result<(), InvalidResolverDef> {
        Self::validate(&def)?;
        let matcher = match &def.key_pattern {
            Some(glob) => Some(compile_glob(glob)?),
            None => None,
        };
        // Re-registering a name replaces the previous entry.
        self.entries.retain(|entry| entry.def.name != def.name);
        self.entries.push(ResolverEntry {
            def,
            native,
            matcher,
        });
        Ok(())
    }

    /// Registers one of the built-in resolvers by name, scoped to an
    /// optional key glob.
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidResolverDef::UnknownResolver`] for an unknown
    /// name, or with any validation error of the resulting definition.
    pub fn register_builtin(
        &mut self,
        name: &str,
        key_pattern: Option<&str>,
    ) -> Result<(), InvalidResolverDef> {
        let (mut def, native) = builtins::by_name(name)
            .ok_or_else(|| InvalidResolverDef::UnknownResolver(name.to_string()))?;
        def.key_pattern = key_pattern.map(str::to_string);
        self.register(def, Some(native))
    }

    /// Removes a resolver by name. Returns whether one was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.def.name != name);
        self.entries.len() != before
    }

    /// Names of all registered resolvers, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.def.name.as_str()).collect()
    }

    /// Validates a definition without registering it.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn validate(def: &ResolverDef) -> Result<(), InvalidResolverDef> {
        if def.name.is_empty() {
            return Err(InvalidResolverDef::NameEmpty);
        }
        if def.name.chars().count() > MAX_NAME_LEN {
            return Err(InvalidResolverDef::NameTooLong(def.name.chars().count()));
        }
        if def.priority > 100 {
            return Err(InvalidResolverDef::PriorityOutOfRange(def.priority));
        }
        if let Some(code) = &def.code {
            if code.len() > MAX_CODE_BYTES {
                return Err(InvalidResolverDef::CodeTooLarge(code.len()));
            }
            for token in FORBIDDEN_TOKENS {
                if code.contains(token) {
                    return Err(InvalidResolverDef::ForbiddenPattern((*token).to_string()));
                }
            }
        }
        Ok(())
    }

    /// Runs the resolver pipeline for one contested merge.
    ///
    /// Selects resolvers whose glob matches `ctx.key`, orders them by
    /// descending priority (registration order breaks ties), and invokes
    /// their native functions in turn. The first non-[`MergeVerdict::Local`]
    /// verdict is returned; if all defer, the result is `Local` and the
    /// caller applies the default LWW rule.
    ///
    /// # Errors
    ///
    /// Propagates [`ResolverError`] from the failing resolver; the merge
    /// pipeline coerces [`ResolverError::Failure`] to a rejection and aborts
    /// on [`ResolverError::Cancelled`].
    pub fn resolve(&self, ctx: &MergeContext<'_>) -> Result<MergeVerdict, ResolverError> {
        let mut candidates: Vec<&ResolverEntry> = self
            .entries
            .iter()
            .filter(|entry| match &entry.matcher {
                Some(matcher) => matcher.is_match(ctx.key),
                None => true,
            })
            .collect();
        candidates.sort_by(|a, b| b.def.priority.cmp(&a.def.priority));

        for entry in candidates {
            let Some(native) = &entry.native else {
                // Code-only definition: execution belongs to the sandbox.
                continue;
            };
            match native(ctx)? {
                MergeVerdict::Local => continue,
                verdict => {
                    if let MergeVerdict::Reject { reason } = &verdict {
                        tracing::debug!(
                            resolver = entry.def.name.as_str(),
                            key = ctx.key,
                            reason = reason.as_str(),
                            "resolver rejected merge"
                        );
                    }
                    return Ok(verdict);
                }
            }
        }
        Ok(MergeVerdict::Local)
    }

    /// Registers a rejection listener, returning an id for removal.
    pub fn add_rejection_listener(&mut self, listener: RejectionListener) -> u64 {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Removes a rejection listener. Returns whether it existed.
    pub fn remove_rejection_listener(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Delivers a rejection to every listener.
    pub fn notify_rejection(&self, rejection: &MergeRejection) {
        for (_, listener) in &self.listeners {
            listener(rejection);
        }
    }
}

/// Compiles a key glob (`*` and `?` wildcards) into an anchored regex.
fn compile_glob(glob: &str) -> Result<Regex, InvalidResolverDef> {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| InvalidResolverDef::BadKeyPattern(e.to_string()))
}

/// The built-in resolver suite.
///
/// Each constructor returns a `(ResolverDef, NativeResolver)` pair with the
/// conventional name and priority; callers scope them with a key glob at
/// registration time.
pub mod builtins {
    use std::collections::BTreeMap;

    use super::{
        MergeContext, MergeVerdict, NativeResolver, Principal, ResolverDef, ResolverError,
    };
    use crate::value::Value;
    use std::sync::Arc;

    type Builtin = (ResolverDef, NativeResolver);

    fn make(
        name: &str,
        priority: u8,
        f: impl Fn(&MergeContext<'_>) -> Result<MergeVerdict, ResolverError> + Send + Sync + 'static,
    ) -> Builtin {
        (ResolverDef::named(name, priority, None), Arc::new(f))
    }

    /// Looks up a built-in by name.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Builtin> {
        match name {
            "lww" => Some(lww()),
            "first_write_wins" => Some(first_write_wins()),
            "numeric_min" => Some(numeric_min()),
            "numeric_max" => Some(numeric_max()),
            "non_negative" => Some(non_negative()),
            "array_union" => Some(array_union()),
            "deep_merge" => Some(deep_merge()),
            "server_only" => Some(server_only()),
            "owner_only" => Some(owner_only()),
            "immutable" => Some(immutable()),
            "version_increment" => Some(version_increment()),
            _ => None,
        }
    }

    /// Remote wins iff its timestamp is strictly greater. Priority 0.
    #[must_use]
    pub fn lww() -> Builtin {
        make("lww", 0, |ctx| {
            let wins = match ctx.local_timestamp {
                None => true,
                Some(local) => ctx.remote_timestamp > local,
            };
            Ok(if wins {
                MergeVerdict::Accept
            } else {
                MergeVerdict::Local
            })
        })
    }

    /// Rejects any write over an existing local value. Priority 100.
    #[must_use]
    pub fn first_write_wins() -> Builtin {
        make("first_write_wins", 100, |ctx| {
            Ok(if ctx.local_value.is_some() {
                MergeVerdict::Reject {
                    reason: "first_write_wins".to_string(),
                }
            } else {
                MergeVerdict::Local
            })
        })
    }

    fn numeric_extreme(name: &'static str, take_min: bool) -> Builtin {
        make(name, 50, move |ctx| {
            let (Some(local), Some(remote)) = (ctx.local_value, ctx.remote_value) else {
                return Ok(MergeVerdict::Local);
            };
            let (Some(l), Some(r)) = (local.as_f64(), remote.as_f64()) else {
                return Ok(MergeVerdict::Local);
            };
            let keep_local = if take_min { l <= r } else { l >= r };
            let winner = if keep_local { local } else { remote };
            Ok(MergeVerdict::Merge(winner.clone()))
        })
    }

    /// Merges with the numeric minimum of both values. Priority 50.
    #[must_use]
    pub fn numeric_min() -> Builtin {
        numeric_extreme("numeric_min", true)
    }

    /// Merges with the numeric maximum of both values. Priority 50.
    #[must_use]
    pub fn numeric_max() -> Builtin {
        numeric_extreme("numeric_max", false)
    }

    /// Rejects non-numeric or negative incoming values. Priority 90.
    #[must_use]
    pub fn non_negative() -> Builtin {
        make("non_negative", 90, |ctx| {
            let valid = ctx
                .remote_value
                .and_then(Value::as_f64)
                .is_some_and(|n| n >= 0.0);
            Ok(if valid {
                MergeVerdict::Local
            } else {
                MergeVerdict::Reject {
                    reason: "non_negative".to_string(),
                }
            })
        })
    }

    /// Merges with the set union of two arrays (local order first). Priority 50.
    #[must_use]
    pub fn array_union() -> Builtin {
        make("array_union", 50, |ctx| {
            let (Some(Value::Array(local)), Some(Value::Array(remote))) =
                (ctx.local_value, ctx.remote_value)
            else {
                return Ok(MergeVerdict::Local);
            };
            let mut union = local.clone();
            for item in remote {
                if !union.contains(item) {
                    union.push(item.clone());
                }
            }
            Ok(MergeVerdict::Merge(Value::Array(union)))
        })
    }

    /// Recursive object merge: remote wins at leaves, arrays are replaced.
    /// Priority 50.
    #[must_use]
    pub fn deep_merge() -> Builtin {
        fn merge_maps(
            local: &BTreeMap<String, Value>,
            remote: &BTreeMap<String, Value>,
        ) -> BTreeMap<String, Value> {
            let mut merged = local.clone();
            for (key, remote_value) in remote {
                let replacement = match (merged.get(key), remote_value) {
                    (Some(Value::Map(l)), Value::Map(r)) => Value::Map(merge_maps(l, r)),
                    _ => remote_value.clone(),
                };
                merged.insert(key.clone(), replacement);
            }
            merged
        }

        make("deep_merge", 50, |ctx| {
            let (Some(Value::Map(local)), Some(Value::Map(remote))) =
                (ctx.local_value, ctx.remote_value)
            else {
                return Ok(MergeVerdict::Local);
            };
            Ok(MergeVerdict::Merge(Value::Map(merge_maps(local, remote))))
        })
    }

    fn has_role(auth: Option<&Principal>, role: &str) -> bool {
        auth.is_some_and(|p| p.roles.iter().any(|r| r == role))
    }

    /// Accepts only writes from server principals or `server:` nodes.
    /// Priority 100.
    #[must_use]
    pub fn server_only() -> Builtin {
        make("server_only", 100, |ctx| {
            let allowed = has_role(ctx.auth, "server") || ctx.remote_node_id.starts_with("server:");
            Ok(if allowed {
                MergeVerdict::Accept
            } else {
                MergeVerdict::Reject {
                    reason: "server_only".to_string(),
                }
            })
        })
    }

    /// Once a record carries an `ownerId`, only that owner may overwrite it.
    /// Priority 95.
    #[must_use]
    pub fn owner_only() -> Builtin {
        make("owner_only", 95, |ctx| {
            let Some(owner) = ctx
                .local_value
                .and_then(|v| v.get("ownerId"))
                .and_then(Value::as_str)
            else {
                return Ok(MergeVerdict::Local);
            };
            let allowed = ctx.auth.is_some_and(|p| p.id == owner);
            Ok(if allowed {
                MergeVerdict::Accept
            } else {
                MergeVerdict::Reject {
                    reason: "owner_only".to_string(),
                }
            })
        })
    }

    /// Rejects any overwrite of an existing value. Priority 100.
    #[must_use]
    pub fn immutable() -> Builtin {
        make("immutable", 100, |ctx| {
            Ok(if ctx.local_value.is_some() {
                MergeVerdict::Reject {
                    reason: "immutable".to_string(),
                }
            } else {
                MergeVerdict::Local
            })
        })
    }

    /// Requires `remote.version == local.version + 1`. Priority 90.
    #[must_use]
    pub fn version_increment() -> Builtin {
        make("version_increment", 90, |ctx| {
            let Some(local) = ctx.local_value else {
                return Ok(MergeVerdict::Local);
            };
            let local_version = local.get("version").and_then(Value::as_f64);
            let remote_version = ctx
                .remote_value
                .and_then(|v| v.get("version"))
                .and_then(Value::as_f64);
            let valid = matches!(
                (local_version, remote_version),
                (Some(l), Some(r)) if (r - (l + 1.0)).abs() < f64::EPSILON
            );
            Ok(if valid {
                MergeVerdict::Accept
            } else {
                MergeVerdict::Reject {
                    reason: "version_increment".to_string(),
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::value::object;

    fn no_read(_: &str) -> Option<Value> {
        None
    }

    fn ctx<'a>(
        key: &'a str,
        local: Option<&'a Value>,
        remote: Option<&'a Value>,
        local_ts: Option<&'a Timestamp>,
        remote_ts: &'a Timestamp,
        auth: Option<&'a Principal>,
    ) -> MergeContext<'a> {
        MergeContext {
            map_name: "test",
            key,
            local_value: local,
            remote_value: remote,
            local_timestamp: local_ts,
            remote_timestamp: remote_ts,
            remote_node_id: &remote_ts.node_id,
            auth,
            read_entry: &no_read,
        }
    }

    // ---- Validation ----

    #[test]
    fn validate_rejects_empty_name() {
        let def = ResolverDef::named("", 50, None);
        assert_eq!(
            ResolverRegistry::validate(&def),
            Err(InvalidResolverDef::NameEmpty)
        );
    }

    #[test]
    fn validate_rejects_long_name() {
        let def = ResolverDef::named(&"x".repeat(101), 50, None);
        assert_eq!(
            ResolverRegistry::validate(&def),
            Err(InvalidResolverDef::NameTooLong(101))
        );
    }

    #[test]
    fn validate_rejects_priority_above_100() {
        let def = ResolverDef::named("ok", 101, None);
        assert_eq!(
            ResolverRegistry::validate(&def),
            Err(InvalidResolverDef::PriorityOutOfRange(101))
        );
    }

    #[test]
    fn validate_rejects_oversized_code() {
        let def = ResolverDef {
            code: Some("x".repeat(MAX_CODE_BYTES + 1)),
            ..ResolverDef::named("big", 50, None)
        };
        assert!(matches!(
            ResolverRegistry::validate(&def),
            Err(InvalidResolverDef::CodeTooLarge(_))
        ));
    }

    #[test]
    fn validate_rejects_forbidden_tokens() {
        for token in ["eval('x')", "require('fs')", "fetch(url)", "setTimeout(f)"] {
            let def = ResolverDef {
                code: Some(format!("return {token};")),
                ..ResolverDef::named("sneaky", 50, None)
            };
            assert!(
                matches!(
                    ResolverRegistry::validate(&def),
                    Err(InvalidResolverDef::ForbiddenPattern(_))
                ),
                "expected rejection for {token}"
            );
        }
    }

    #[test]
    fn validate_accepts_clean_code() {
        let def = ResolverDef {
            code: Some("return { verdict: 'local' };".to_string()),
            ..ResolverDef::named("clean", 50, None)
        };
        assert!(ResolverRegistry::validate(&def).is_ok());
    }

    // ---- Glob matching & priority order ----

    #[test]
    fn glob_scopes_resolvers_to_keys() {
        let mut registry = ResolverRegistry::new();
        registry
            .register_builtin("immutable", Some("config:*"))
            .unwrap();

        let local = Value::Int(1);
        let remote = Value::Int(2);
        let local_ts = Timestamp::new(1, 0, "a");
        let remote_ts = Timestamp::new(2, 0, "b");

        // Matching key: immutable rejects.
        let c = ctx(
            "config:flag",
            Some(&local),
            Some(&remote),
            Some(&local_ts),
            &remote_ts,
            None,
        );
        assert!(matches!(
            registry.resolve(&c).unwrap(),
            MergeVerdict::Reject { .. }
        ));

        // Non-matching key: falls through to Local.
        let c = ctx(
            "user:1",
            Some(&local),
            Some(&remote),
            Some(&local_ts),
            &remote_ts,
            None,
        );
        assert_eq!(registry.resolve(&c).unwrap(), MergeVerdict::Local);
    }

    #[test]
    fn higher_priority_wins_first() {
        let mut registry = ResolverRegistry::new();
        // numeric_max (50) would merge, but immutable (100) rejects first.
        registry.register_builtin("numeric_max", None).unwrap();
        registry.register_builtin("immutable", None).unwrap();

        let local = Value::Int(5);
        let remote = Value::Int(9);
        let local_ts = Timestamp::new(1, 0, "a");
        let remote_ts = Timestamp::new(2, 0, "b");
        let c = ctx(
            "k",
            Some(&local),
            Some(&remote),
            Some(&local_ts),
            &remote_ts,
            None,
        );
        assert!(matches!(
            registry.resolve(&c).unwrap(),
            MergeVerdict::Reject { reason } if reason == "immutable"
        ));
    }

    #[test]
    fn local_verdicts_fall_through() {
        let mut registry = ResolverRegistry::new();
        registry.register_builtin("owner_only", None).unwrap();
        registry.register_builtin("numeric_max", None).unwrap();

        // No ownerId on local: owner_only defers, numeric_max merges.
        let local = Value::Int(5);
        let remote = Value::Int(3);
        let local_ts = Timestamp::new(1, 0, "a");
        let remote_ts = Timestamp::new(2, 0, "b");
        let c = ctx(
            "k",
            Some(&local),
            Some(&remote),
            Some(&local_ts),
            &remote_ts,
            None,
        );
        assert_eq!(
            registry.resolve(&c).unwrap(),
            MergeVerdict::Merge(Value::Int(5))
        );
    }

    #[test]
    fn reregistering_replaces_entry() {
        let mut registry = ResolverRegistry::new();
        registry.register_builtin("immutable", None).unwrap();
        registry
            .register(ResolverDef::named("immutable", 10, None), None)
            .unwrap();
        assert_eq!(registry.names(), vec!["immutable"]);
    }

    // ---- Built-in effects ----

    #[test]
    fn lww_accepts_newer_rejects_nothing() {
        let (_, f) = builtins::lww();
        let old_ts = Timestamp::new(1, 0, "a");
        let new_ts = Timestamp::new(2, 0, "b");
        let v = Value::Int(1);

        let c = ctx("k", Some(&v), Some(&v), Some(&old_ts), &new_ts, None);
        assert_eq!(f(&c).unwrap(), MergeVerdict::Accept);

        let c = ctx("k", Some(&v), Some(&v), Some(&new_ts), &old_ts, None);
        assert_eq!(f(&c).unwrap(), MergeVerdict::Local);
    }

    #[test]
    fn first_write_wins_rejects_overwrite() {
        let (_, f) = builtins::first_write_wins();
        let ts = Timestamp::new(2, 0, "b");
        let v = Value::Int(1);

        let c = ctx("k", None, Some(&v), None, &ts, None);
        assert_eq!(f(&c).unwrap(), MergeVerdict::Local);

        let c = ctx("k", Some(&v), Some(&v), None, &ts, None);
        assert!(matches!(f(&c).unwrap(), MergeVerdict::Reject { .. }));
    }

    #[test]
    fn numeric_min_and_max() {
        let (_, min) = builtins::numeric_min();
        let (_, max) = builtins::numeric_max();
        let ts = Timestamp::new(2, 0, "b");
        let local = Value::Int(5);
        let remote = Value::Float(3.5);

        let c = ctx("k", Some(&local), Some(&remote), None, &ts, None);
        assert_eq!(min(&c).unwrap(), MergeVerdict::Merge(Value::Float(3.5)));
        assert_eq!(max(&c).unwrap(), MergeVerdict::Merge(Value::Int(5)));
    }

    #[test]
    fn numeric_min_defers_on_non_numbers() {
        let (_, min) = builtins::numeric_min();
        let ts = Timestamp::new(2, 0, "b");
        let local = Value::from("five");
        let remote = Value::Int(3);
        let c = ctx("k", Some(&local), Some(&remote), None, &ts, None);
        assert_eq!(min(&c).unwrap(), MergeVerdict::Local);
    }

    #[test]
    fn non_negative_rejects_bad_values() {
        let (_, f) = builtins::non_negative();
        let ts = Timestamp::new(2, 0, "b");

        let negative = Value::Int(-1);
        let c = ctx("k", None, Some(&negative), None, &ts, None);
        assert!(matches!(f(&c).unwrap(), MergeVerdict::Reject { .. }));

        let text = Value::from("ten");
        let c = ctx("k", None, Some(&text), None, &ts, None);
        assert!(matches!(f(&c).unwrap(), MergeVerdict::Reject { .. }));

        let fine = Value::Float(0.0);
        let c = ctx("k", None, Some(&fine), None, &ts, None);
        assert_eq!(f(&c).unwrap(), MergeVerdict::Local);
    }

    #[test]
    fn array_union_merges_distinct_elements() {
        let (_, f) = builtins::array_union();
        let ts = Timestamp::new(2, 0, "b");
        let local = Value::Array(vec![Value::Int(1), Value::Int(2)]);
        let remote = Value::Array(vec![Value::Int(2), Value::Int(3)]);
        let c = ctx("k", Some(&local), Some(&remote), None, &ts, None);
        assert_eq!(
            f(&c).unwrap(),
            MergeVerdict::Merge(Value::Array(vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3)
            ]))
        );
    }

    #[test]
    fn deep_merge_remote_wins_at_leaves_arrays_replaced() {
        let (_, f) = builtins::deep_merge();
        let ts = Timestamp::new(2, 0, "b");
        let local = object([
            ("kept", Value::Int(1)),
            (
                "nested",
                object([
                    ("a", Value::Int(1)),
                    ("list", Value::Array(vec![Value::Int(1)])),
                ]),
            ),
        ]);
        let remote = object([(
            "nested",
            object([
                ("a", Value::Int(2)),
                ("list", Value::Array(vec![Value::Int(9)])),
            ]),
        )]);
        let c = ctx("k", Some(&local), Some(&remote), None, &ts, None);
        let expected = object([
            ("kept", Value::Int(1)),
            (
                "nested",
                object([
                    ("a", Value::Int(2)),
                    ("list", Value::Array(vec![Value::Int(9)])),
                ]),
            ),
        ]);
        assert_eq!(f(&c).unwrap(), MergeVerdict::Merge(expected));
    }

    #[test]
    fn server_only_checks_role_or_node_prefix() {
        let (_, f) = builtins::server_only();
        let v = Value::Int(1);

        let server_ts = Timestamp::new(2, 0, "server:alpha");
        let c = ctx("k", None, Some(&v), None, &server_ts, None);
        assert_eq!(f(&c).unwrap(), MergeVerdict::Accept);

        let client_ts = Timestamp::new(2, 0, "client-1");
        let admin = Principal {
            id: "u1".to_string(),
            roles: vec!["server".to_string()],
        };
        let c = ctx("k", None, Some(&v), None, &client_ts, Some(&admin));
        assert_eq!(f(&c).unwrap(), MergeVerdict::Accept);

        let nobody = Principal {
            id: "u2".to_string(),
            roles: vec![],
        };
        let c = ctx("k", None, Some(&v), None, &client_ts, Some(&nobody));
        assert!(matches!(f(&c).unwrap(), MergeVerdict::Reject { .. }));
    }

    #[test]
    fn owner_only_enforces_owner_id() {
        let (_, f) = builtins::owner_only();
        let ts = Timestamp::new(2, 0, "b");
        let local = object([("ownerId", Value::from("alice"))]);
        let remote = Value::Int(2);

        let alice = Principal {
            id: "alice".to_string(),
            roles: vec![],
        };
        let c = ctx("k", Some(&local), Some(&remote), None, &ts, Some(&alice));
        assert_eq!(f(&c).unwrap(), MergeVerdict::Accept);

        let mallory = Principal {
            id: "mallory".to_string(),
            roles: vec![],
        };
        let c = ctx("k", Some(&local), Some(&remote), None, &ts, Some(&mallory));
        assert!(matches!(f(&c).unwrap(), MergeVerdict::Reject { .. }));

        // No ownerId on local: defers.
        let plain = Value::Int(1);
        let c = ctx("k", Some(&plain), Some(&remote), None, &ts, Some(&mallory));
        assert_eq!(f(&c).unwrap(), MergeVerdict::Local);
    }

    #[test]
    fn version_increment_requires_exact_step() {
        let (_, f) = builtins::version_increment();
        let ts = Timestamp::new(2, 0, "b");
        let local = object([("version", Value::Int(3))]);

        let good = object([("version", Value::Int(4))]);
        let c = ctx("k", Some(&local), Some(&good), None, &ts, None);
        assert_eq!(f(&c).unwrap(), MergeVerdict::Accept);

        let skip = object([("version", Value::Int(5))]);
        let c = ctx("k", Some(&local), Some(&skip), None, &ts, None);
        assert!(matches!(f(&c).unwrap(), MergeVerdict::Reject { .. }));

        let missing = object([("other", Value::Int(1))]);
        let c = ctx("k", Some(&local), Some(&missing), None, &ts, None);
        assert!(matches!(f(&c).unwrap(), MergeVerdict::Reject { .. }));
    }

    // ---- Rejection listeners ----

    #[test]
    fn rejection_listeners_receive_events() {
        let mut registry = ResolverRegistry::new();
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let id = registry.add_rejection_listener(Box::new(move |rejection| {
            sink.borrow_mut().push(rejection.reason.clone());
        }));

        registry.notify_rejection(&MergeRejection {
            map_name: "m".to_string(),
            key: "k".to_string(),
            attempted_value: Some(Value::Int(1)),
            reason: "immutable".to_string(),
            timestamp: Timestamp::new(1, 0, "n"),
            node_id: "n".to_string(),
        });
        assert_eq!(seen.borrow().as_slice(), ["immutable"]);

        assert!(registry.remove_rejection_listener(id));
        assert!(!registry.remove_rejection_listener(id));
    }

    #[test]
    fn resolver_failure_propagates() {
        let mut registry = ResolverRegistry::new();
        registry
            .register(
                ResolverDef::named("boom", 50, None),
                Some(Arc::new(|_| Err(ResolverError::Failure("boom".to_string())))),
            )
            .unwrap();
        let ts = Timestamp::new(2, 0, "b");
        let v = Value::Int(1);
        let c = ctx("k", None, Some(&v), None, &ts, None);
        assert!(matches!(
            registry.resolve(&c),
            Err(ResolverError::Failure(_))
        ));
    }

    #[test]
    fn wire_shape_defaults_priority() {
        let def: ResolverDef =
            serde_json::from_str(r#"{"name":"mine","keyPattern":"a:*"}"#).unwrap();
        assert_eq!(def.priority, DEFAULT_PRIORITY);
        assert_eq!(def.key_pattern.as_deref(), Some("a:*"));
    }
}
