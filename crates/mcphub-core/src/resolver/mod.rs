//! Placeholder resolution engine
//!
//! Expands `${VAR}` references and `${cmd: …}` shell resolvers in the
//! string fields of a server configuration (`env`, `args`, `headers`,
//! `url`, `command`), plus two legacy syntaxes: a standalone `$VAR`
//! argument and a leading `$: ` in env values.
//!
//! `env` resolves first, iteratively, and the resolved values are
//! layered over the process environment so later fields can reference
//! them. Resolution is functional: the input config is never mutated,
//! and identical input plus identical environment yields identical
//! output (command execution is behind [`CommandRunner`] and stubbed in
//! tests).

mod command;

pub use command::{CommandRunner, ShellCommandRunner, DEFAULT_COMMAND_TIMEOUT};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::{DevConfig, ServerConfig, ServerKind};
use crate::error::{HubError, HubResult};

lazy_static! {
    /// A whole-argument legacy reference: `$API_KEY`.
    static ref LEGACY_ARG_REGEX: Regex = Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*)$").unwrap();
}

/// Prefix marking a legacy command env value: `"$: cat token"`.
const LEGACY_CMD_PREFIX: &str = "$: ";

/// Upper bound on env resolution passes before declaring a cycle.
const DEFAULT_MAX_PASSES: usize = 10;

/// How resolution failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Missing variables and failed commands are errors.
    Strict,
    /// Offending placeholders stay verbatim; problems are logged.
    Lenient,
}

/// A server config with every placeholder expanded.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ResolvedServerConfig {
    pub name: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub disabled: bool,
    pub dev: Option<DevConfig>,
    pub description: Option<String>,
}

impl ResolvedServerConfig {
    pub fn kind(&self) -> ServerKind {
        if self.url.is_some() {
            ServerKind::Remote
        } else {
            ServerKind::Stdio
        }
    }
}

/// One placeholder found in a string.
enum Placeholder {
    /// `${NAME}`
    Var { start: usize, end: usize, name: String },
    /// `${cmd: text}` — `text` is raw, not yet resolved.
    Cmd { start: usize, end: usize, text: String },
}

/// Scan for the next placeholder at or after `from`, honoring nested
/// `${…}` inside command text.
fn next_placeholder(input: &str, from: usize) -> Option<Placeholder> {
    let bytes = input.as_bytes();
    let mut i = from;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'{' {
            let start = i;
            let mut depth = 1usize;
            let mut j = i + 2;
            while j < bytes.len() {
                if j + 1 < bytes.len() && bytes[j] == b'$' && bytes[j + 1] == b'{' {
                    depth += 1;
                    j += 2;
                    continue;
                }
                if bytes[j] == b'}' {
                    depth -= 1;
                    if depth == 0 {
                        let inner = &input[start + 2..j];
                        let end = j + 1;
                        return Some(if let Some(text) = inner.strip_prefix("cmd:") {
                            Placeholder::Cmd {
                                start,
                                end,
                                text: text.trim_start().to_string(),
                            }
                        } else {
                            Placeholder::Var {
                                start,
                                end,
                                name: inner.trim().to_string(),
                            }
                        });
                    }
                }
                j += 1;
            }
            // Unterminated `${`: treat the rest as literal.
            return None;
        }
        i += 1;
    }
    None
}

/// Result of resolving one string: the new value plus any references
/// that could not be resolved (left verbatim).
struct Resolution {
    value: String,
    missing_vars: Vec<String>,
    pending_cmds: bool,
}

impl Resolution {
    fn fully_resolved(&self) -> bool {
        self.missing_vars.is_empty() && !self.pending_cmds
    }
}

/// Substitute `${VAR}` references only, leaving `${cmd: …}` intact.
/// Returns the new string and the names that were not in `ctx`.
fn substitute_vars(input: &str, ctx: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(input.len());
    let mut missing = Vec::new();
    let mut cursor = 0usize;

    while let Some(ph) = next_placeholder(input, cursor) {
        match ph {
            Placeholder::Var { start, end, name } => {
                out.push_str(&input[cursor..start]);
                match ctx.get(&name) {
                    Some(value) => out.push_str(value),
                    None => {
                        missing.push(name);
                        out.push_str(&input[start..end]);
                    }
                }
                cursor = end;
            }
            Placeholder::Cmd { end, .. } => {
                // Left for the command stage; its inner text is resolved
                // there against the final context.
                out.push_str(&input[cursor..end]);
                cursor = end;
            }
        }
    }
    out.push_str(&input[cursor..]);
    (out, missing)
}

/// Whether a string still contains any placeholder syntax.
fn has_placeholder(input: &str) -> bool {
    next_placeholder(input, 0).is_some()
}

/// The resolver. Cheap to clone behind `Arc`.
pub struct PlaceholderResolver {
    runner: Arc<dyn CommandRunner>,
    max_passes: usize,
    /// Base context; `None` means snapshot the process environment.
    base_env: Option<BTreeMap<String, String>>,
}

impl PlaceholderResolver {
    pub fn new() -> Self {
        Self {
            runner: Arc::new(ShellCommandRunner::new()),
            max_passes: DEFAULT_MAX_PASSES,
            base_env: None,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_max_passes(mut self, passes: usize) -> Self {
        self.max_passes = passes.max(1);
        self
    }

    /// Replace the process environment with a fixed context (tests).
    pub fn with_base_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.base_env = Some(env);
        self
    }

    fn base_context(&self) -> BTreeMap<String, String> {
        match &self.base_env {
            Some(env) => env.clone(),
            None => std::env::vars().collect(),
        }
    }

    /// Resolve every placeholder in `config`, producing a fresh
    /// [`ResolvedServerConfig`]. The input is never mutated.
    pub async fn resolve(
        &self,
        config: &ServerConfig,
        mode: ResolveMode,
    ) -> HubResult<ResolvedServerConfig> {
        let mut ctx = self.base_context();

        let env = self.resolve_env(&config.env, &mut ctx, mode).await?;

        let command = match &config.command {
            Some(command) => Some(self.resolve_field(command, &ctx, "command", mode).await?),
            None => None,
        };
        let url = match &config.url {
            Some(url) => Some(self.resolve_field(url, &ctx, "url", mode).await?),
            None => None,
        };

        let mut args = Vec::with_capacity(config.args.len());
        for arg in &config.args {
            args.push(self.resolve_arg(arg, &ctx, mode).await?);
        }

        let mut headers = BTreeMap::new();
        for (key, value) in &config.headers {
            headers.insert(
                key.clone(),
                self.resolve_field(value, &ctx, "headers", mode).await?,
            );
        }

        Ok(ResolvedServerConfig {
            name: config.name.clone(),
            command,
            args,
            env,
            url,
            headers,
            disabled: config.disabled,
            dev: config.dev.clone(),
            description: config.description.clone(),
        })
    }

    /// Resolve the `env` mapping first, layering each completed value
    /// onto `ctx`. Values may reference the process environment and
    /// each other; iteration is bounded by `max_passes`.
    async fn resolve_env(
        &self,
        env: &BTreeMap<String, Option<String>>,
        ctx: &mut BTreeMap<String, String>,
        mode: ResolveMode,
    ) -> HubResult<BTreeMap<String, String>> {
        let mut working: BTreeMap<String, String> = BTreeMap::new();
        let mut done: BTreeSet<String> = BTreeSet::new();

        // Seed: null/empty values fall back to the like-named process
        // variable; legacy `$: ` values become `${cmd: …}`.
        for (key, value) in env {
            match value.as_deref() {
                None | Some("") => match ctx.get(key) {
                    Some(fallback) => {
                        working.insert(key.clone(), fallback.clone());
                        done.insert(key.clone());
                    }
                    None => match mode {
                        ResolveMode::Strict => {
                            return Err(HubError::VariableNotFound {
                                name: key.clone(),
                                field: "env".into(),
                            });
                        }
                        ResolveMode::Lenient => {
                            debug!(variable = %key, "No process-env fallback, using empty string");
                            working.insert(key.clone(), String::new());
                            done.insert(key.clone());
                        }
                    },
                },
                Some(text) => {
                    let text = if let Some(cmd) = text.strip_prefix(LEGACY_CMD_PREFIX) {
                        warn!(
                            variable = %key,
                            "Deprecated '$: ' env syntax; use '${{cmd: …}}' instead"
                        );
                        format!("${{cmd: {}}}", cmd)
                    } else {
                        text.to_string()
                    };
                    if has_placeholder(&text) {
                        working.insert(key.clone(), text);
                    } else {
                        working.insert(key.clone(), text);
                        done.insert(key.clone());
                    }
                }
            }
        }

        // Completed values are visible to the remaining ones.
        for key in &done {
            ctx.insert(key.clone(), working[key].clone());
        }

        for _pass in 0..self.max_passes {
            if done.len() == working.len() {
                break;
            }
            let mut progressed = false;

            let pending: Vec<String> = working
                .keys()
                .filter(|k| !done.contains(*k))
                .cloned()
                .collect();

            for key in pending {
                let value = working[&key].clone();
                let resolution = self.resolve_string(&value, ctx, mode, true).await?;

                if resolution.value != value {
                    progressed = true;
                    working.insert(key.clone(), resolution.value.clone());
                }
                if resolution.fully_resolved() {
                    progressed = true;
                    ctx.insert(key.clone(), resolution.value.clone());
                    done.insert(key);
                }
            }

            if !progressed {
                break;
            }
        }

        // Anything still pending is a cycle or an unknown reference.
        let stuck: Vec<String> = working
            .keys()
            .filter(|k| !done.contains(*k))
            .cloned()
            .collect();
        if !stuck.is_empty() {
            match mode {
                ResolveMode::Strict => {
                    let (_, missing) = substitute_vars(&working[&stuck[0]], ctx);
                    let name = missing.first().cloned().unwrap_or_else(|| stuck[0].clone());
                    return Err(HubError::VariableNotFound {
                        name,
                        field: "env".into(),
                    });
                }
                ResolveMode::Lenient => {
                    warn!(
                        variables = ?stuck,
                        "Unresolvable or circular env placeholders left verbatim"
                    );
                    for key in stuck {
                        ctx.insert(key.clone(), working[&key].clone());
                    }
                }
            }
        }

        Ok(working)
    }

    /// Resolve a non-env field against the finished context.
    async fn resolve_field(
        &self,
        input: &str,
        ctx: &BTreeMap<String, String>,
        field: &str,
        mode: ResolveMode,
    ) -> HubResult<String> {
        let resolution = self.resolve_string(input, ctx, mode, false).await?;
        if mode == ResolveMode::Strict {
            if let Some(name) = resolution.missing_vars.first() {
                return Err(HubError::VariableNotFound {
                    name: name.clone(),
                    field: field.into(),
                });
            }
        }
        if !resolution.missing_vars.is_empty() {
            debug!(
                field = %field,
                variables = ?resolution.missing_vars,
                "Unknown placeholder references kept verbatim"
            );
        }
        Ok(resolution.value)
    }

    /// Resolve one `args` element, honoring the legacy `$VAR` form.
    async fn resolve_arg(
        &self,
        arg: &str,
        ctx: &BTreeMap<String, String>,
        mode: ResolveMode,
    ) -> HubResult<String> {
        if let Some(caps) = LEGACY_ARG_REGEX.captures(arg) {
            let name = caps.get(1).unwrap().as_str();
            warn!(
                variable = %name,
                "Deprecated '$VAR' argument syntax; use '${{VAR}}' instead"
            );
            return match ctx.get(name) {
                Some(value) => Ok(value.clone()),
                None => match mode {
                    ResolveMode::Strict => Err(HubError::VariableNotFound {
                        name: name.to_string(),
                        field: "args".into(),
                    }),
                    ResolveMode::Lenient => {
                        debug!(variable = %name, "Legacy argument reference kept verbatim");
                        Ok(arg.to_string())
                    }
                },
            };
        }
        self.resolve_field(arg, ctx, "args", mode).await
    }

    /// Resolve one string: substitute variables, then execute commands
    /// whose inner text is fully resolved.
    ///
    /// With `defer_missing`, unknown variables stay verbatim without
    /// erroring (env passes may still supply them); callers enforce
    /// strictness afterwards.
    async fn resolve_string(
        &self,
        input: &str,
        ctx: &BTreeMap<String, String>,
        mode: ResolveMode,
        defer_missing: bool,
    ) -> HubResult<Resolution> {
        let (substituted, mut missing_vars) = substitute_vars(input, ctx);

        let mut out = String::with_capacity(substituted.len());
        let mut cursor = 0usize;
        let mut pending_cmds = false;

        while let Some(ph) = next_placeholder(&substituted, cursor) {
            match ph {
                Placeholder::Var { end, .. } => {
                    // Already handled by substitute_vars; what remains
                    // here is an unknown reference kept verbatim.
                    out.push_str(&substituted[cursor..end]);
                    cursor = end;
                }
                Placeholder::Cmd { start, end, text } => {
                    out.push_str(&substituted[cursor..start]);
                    let (cmd_text, cmd_missing) = substitute_vars(&text, ctx);

                    if cmd_text.contains("${cmd:") && mode == ResolveMode::Strict {
                        return Err(HubError::CmdExecutionFailed {
                            command: text.clone(),
                            reason: "nested '${cmd: …}' placeholders are not supported".into(),
                        });
                    }

                    if !cmd_missing.is_empty() || cmd_text.contains("${cmd:") {
                        // Inner references unresolved: postpone the
                        // command (callers enforce strictness from the
                        // recorded misses).
                        missing_vars.extend(cmd_missing);
                        pending_cmds = true;
                        out.push_str(&substituted[start..end]);
                        cursor = end;
                        continue;
                    }

                    match self.runner.run(&cmd_text).await {
                        Ok(stdout) if !stdout.is_empty() => {
                            out.push_str(&stdout);
                        }
                        Ok(_) => match mode {
                            ResolveMode::Strict => {
                                return Err(HubError::CmdExecutionFailed {
                                    command: cmd_text,
                                    reason: "command produced no output".into(),
                                });
                            }
                            ResolveMode::Lenient => {
                                warn!(command = %cmd_text, "Resolver command produced no output");
                                out.push_str(&substituted[start..end]);
                            }
                        },
                        Err(reason) => match mode {
                            ResolveMode::Strict => {
                                return Err(HubError::CmdExecutionFailed {
                                    command: cmd_text,
                                    reason,
                                });
                            }
                            ResolveMode::Lenient => {
                                warn!(
                                    command = %cmd_text,
                                    reason = %reason,
                                    "Resolver command failed, placeholder kept verbatim"
                                );
                                out.push_str(&substituted[start..end]);
                            }
                        },
                    }
                    cursor = end;
                }
            }
        }
        out.push_str(&substituted[cursor..]);

        Ok(Resolution {
            value: out,
            missing_vars,
            pending_cmds,
        })
    }
}

impl Default for PlaceholderResolver {
    fn default() -> Self {
        Self::new()
    }
}
