//! Hook dispatch after store mutations.
//!
//! Hooks are shell commands declared in the store configuration. Each one
//! filters on the kind of mutation and may declare a cooldown, tracked in
//! `.cooldown-journal.toml` at the store root. A hook inside its cooldown is
//! skipped entirely (neither its pre- nor its post-command runs).
//!
//! Hook commands block the calling operation until they exit. No timeout is
//! imposed here; hosts that can't afford a hung hook must wrap the call with
//! their own. Hook failures are logged and never abort the mutation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::constants::COOLDOWN_JOURNAL_FILE_NAME;
use crate::error::{IanError, IanResult};
use crate::journal::Journal;

const COOLDOWN_SECTION: &str = "cooldowns";

/// What kind of mutation triggered a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Ping,
    Create,
    Update,
    Delete,
}

impl SyncKind {
    pub const ALL: [SyncKind; 4] = [
        SyncKind::Ping,
        SyncKind::Create,
        SyncKind::Update,
        SyncKind::Delete,
    ];

    /// The bit exported to hooks as `$TYPE`.
    pub fn bit(self) -> u8 {
        match self {
            SyncKind::Ping => 1,
            SyncKind::Create => 1 << 1,
            SyncKind::Update => 1 << 2,
            SyncKind::Delete => 1 << 3,
        }
    }
}

/// Which mutation kinds a hook listens to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFilter", into = "RawFilter")]
pub enum HookFilter {
    #[default]
    All,
    Only(BTreeSet<SyncKind>),
}

impl HookFilter {
    pub fn matches(&self, kind: SyncKind) -> bool {
        match self {
            HookFilter::All => true,
            HookFilter::Only(kinds) => kinds.contains(&kind),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, HookFilter::All)
    }

    /// Decode a legacy bitmask; `0` matches everything.
    pub fn from_mask(mask: u8) -> IanResult<Self> {
        if mask == 0 {
            return Ok(HookFilter::All);
        }
        let known: u8 = SyncKind::ALL.iter().map(|k| k.bit()).sum();
        if mask & !known != 0 {
            return Err(IanError::Config(format!("unknown bits in hook type mask {mask}")));
        }
        Ok(HookFilter::Only(
            SyncKind::ALL
                .into_iter()
                .filter(|k| mask & k.bit() != 0)
                .collect(),
        ))
    }
}

/// On-disk form of a filter: an integer mask or a list of kind names.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawFilter {
    Mask(u8),
    Kinds(Vec<SyncKind>),
}

impl TryFrom<RawFilter> for HookFilter {
    type Error = IanError;

    fn try_from(raw: RawFilter) -> IanResult<Self> {
        match raw {
            RawFilter::Mask(mask) => HookFilter::from_mask(mask),
            RawFilter::Kinds(kinds) if kinds.is_empty() => Ok(HookFilter::All),
            RawFilter::Kinds(kinds) => Ok(HookFilter::Only(kinds.into_iter().collect())),
        }
    }
}

impl From<HookFilter> for RawFilter {
    fn from(filter: HookFilter) -> Self {
        match filter {
            HookFilter::All => RawFilter::Mask(0),
            HookFilter::Only(kinds) => RawFilter::Kinds(kinds.into_iter().collect()),
        }
    }
}

/// A configured shell hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    /// Run in the store root before the mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_command: Option<String>,
    /// Run in the store root after the mutation, e.g.
    /// `git add -A && git commit -m "$MESSAGE"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_command: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "HookFilter::is_all")]
    pub filter: HookFilter,
    /// Minimum time between two runs of this hook.
    #[serde(
        default,
        with = "crate::config::duration_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub cooldown: Option<Duration>,
}

impl Hook {
    fn active_cooldown(&self) -> Option<Duration> {
        self.cooldown.filter(|d| !d.is_zero())
    }
}

/// Describes one logical mutation to the hooks.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    pub kind: SyncKind,
    /// Affected files, exported space-joined as `$FILES`.
    pub files: Vec<String>,
    pub message: String,
}

impl SyncEvent {
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("MESSAGE", self.message.clone()),
            ("FILES", self.files.join(" ")),
            ("TYPE", self.kind.bit().to_string()),
        ]
    }
}

/// What a finished hook command produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookOutput {
    pub success: bool,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs hook commands. Swappable so tests don't spawn processes.
pub trait HookRunner {
    fn run(&self, command: &str, dir: &Path, env: &[(&'static str, String)]) -> IanResult<HookOutput>;
}

/// Runs hooks through the platform shell (`sh -c`, or `cmd /C` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl HookRunner for ShellRunner {
    fn run(&self, command: &str, dir: &Path, env: &[(&'static str, String)]) -> IanResult<HookOutput> {
        let dir = std::path::absolute(dir)?;

        let mut cmd = if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            cmd
        };

        let output = cmd
            .current_dir(&dir)
            .envs(env.iter().map(|(k, v)| (*k, v.as_str())))
            .output()?;

        Ok(HookOutput {
            success: output.status.success(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Selects and runs the hooks for one mutation.
pub struct SyncDispatcher<'a> {
    root: &'a Path,
    hooks: &'a BTreeMap<String, Hook>,
    runner: &'a dyn HookRunner,
}

impl<'a> SyncDispatcher<'a> {
    pub fn new(root: &'a Path, hooks: &'a BTreeMap<String, Hook>, runner: &'a dyn HookRunner) -> Self {
        SyncDispatcher { root, hooks, runner }
    }

    /// Run matching pre-commands, then `action`, then matching post-commands.
    ///
    /// Hooks in their cooldown are skipped unless `ignore_cooldowns` is set;
    /// either way every hook that runs has its cooldown timestamp advanced.
    /// The journal is written once at the end and only if it changed. An
    /// error from `action` aborts before post-commands and journal writes.
    pub fn notify<F>(
        &self,
        event: &SyncEvent,
        ignore_cooldowns: bool,
        now: DateTime<Utc>,
        action: F,
    ) -> IanResult<()>
    where
        F: FnOnce() -> IanResult<()>,
    {
        let needs_journal = self
            .hooks
            .values()
            .any(|h| h.filter.matches(event.kind) && h.active_cooldown().is_some());
        let mut journal = if needs_journal {
            Some(load_cooldown_journal(self.root)?)
        } else {
            None
        };
        let mut selected = Vec::new();

        for (name, hook) in self.hooks {
            if !hook.filter.matches(event.kind) {
                continue;
            }

            if let (Some(cooldown), Some(journal)) = (hook.active_cooldown(), journal.as_mut()) {
                let cooling = journal
                    .get(name)
                    .is_some_and(|last| in_cooldown(last, cooldown, now));
                if cooling && !ignore_cooldowns {
                    debug!(hook = %name, "hook still in cooldown, skipped");
                    continue;
                }
                journal.set(name, now);
            }

            selected.push((name.as_str(), hook));
        }

        let env = event.env();

        for (name, hook) in &selected {
            if let Some(command) = &hook.pre_command {
                self.run_hook(name, "pre", command, &env);
            }
        }

        action()?;

        for (name, hook) in &selected {
            if let Some(command) = &hook.post_command {
                self.run_hook(name, "post", command, &env);
            }
        }

        if let Some(journal) = journal.as_mut() {
            journal.save_if_changed(now)?;
        }

        Ok(())
    }

    fn run_hook(&self, name: &str, stage: &str, command: &str, env: &[(&'static str, String)]) {
        debug!(hook = name, stage, "running hook command");

        match self.runner.run(command, self.root, env) {
            Ok(output) => {
                if !output.stdout.is_empty() {
                    info!(hook = name, stage, "{}", output.stdout.trim_end());
                }
                if !output.success {
                    warn!(
                        hook = name,
                        stage,
                        status = ?output.status,
                        stderr = %output.stderr.trim_end(),
                        "sync hook command exited unsuccessfully"
                    );
                } else if !output.stderr.is_empty() {
                    warn!(hook = name, stage, stderr = %output.stderr.trim_end(), "sync hook wrote to stderr");
                }
            }
            Err(e) => warn!(hook = name, stage, error = %e, "sync hook command could not run"),
        }
    }
}

/// The cooldown journal of the store at `root`.
pub fn load_cooldown_journal(root: &Path) -> IanResult<Journal> {
    Journal::load(&root.join(COOLDOWN_JOURNAL_FILE_NAME), COOLDOWN_SECTION)
}

fn in_cooldown(last: DateTime<Utc>, cooldown: Duration, now: DateTime<Utc>) -> bool {
    TimeDelta::from_std(cooldown)
        .ok()
        .and_then(|d| last.checked_add_signed(d))
        .is_none_or(|until| until > now)
}
