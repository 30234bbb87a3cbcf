#![forbid(unsafe_code)]

//! User-configured shell commands run on worktree lifecycle events.
//!
//! Commands live in multi-valued git config keys (`gw.hooks.<name>`, with
//! `post-checkout` stored as `gw.hooks.postCheckout`). Every run appends to
//! `<worktree>/gw-hook-<name>.log`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::os::unix::process::CommandExt as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::core::git::Vcs;
use crate::error::GwError;

pub const POST_CREATE: &str = "post-create";
pub const POST_CHECKOUT: &str = "post-checkout";
pub const POST_REMOVE: &str = "post-remove";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookOptions {
    pub background: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRun {
    /// At least one configured command ran (foreground) or was started
    /// (background).
    pub ran: bool,
    pub log_path: PathBuf,
}

#[must_use]
pub fn config_key_for_hook(name: &str) -> String {
    match name {
        POST_CHECKOUT => "gw.hooks.postCheckout".to_owned(),
        other => format!("gw.hooks.{other}"),
    }
}

#[must_use]
pub fn log_file_path(worktree: &Path, name: &str) -> PathBuf {
    worktree.join(format!("gw-hook-{name}.log"))
}

pub struct HookRunner {
    vcs: Arc<dyn Vcs>,
}

impl HookRunner {
    #[must_use]
    pub fn new(vcs: Arc<dyn Vcs>) -> Self {
        Self { vcs }
    }

    pub fn commands(&self, worktree: &Path, name: &str) -> Result<Vec<String>, GwError> {
        Ok(self
            .vcs
            .config_get_all(worktree, &config_key_for_hook(name))?
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect())
    }

    /// Runs every command configured for `name` inside `worktree`.
    ///
    /// Foreground stops at the first failing command. Background starts each
    /// command in its own process group and returns without waiting.
    pub fn run(
        &self,
        worktree: &Path,
        name: &str,
        env: &BTreeMap<String, String>,
        opts: HookOptions,
    ) -> Result<HookRun, GwError> {
        let log_path = log_file_path(worktree, name);
        let cmds = self.commands(worktree, name)?;
        if cmds.is_empty() {
            log::debug!("no {name} hook configured");
            return Ok(HookRun {
                ran: false,
                log_path,
            });
        }

        let mut env = env.clone();
        env.entry("GW_HOOK_NAME".to_owned())
            .or_insert_with(|| name.to_owned());
        env.entry("GW_WORKTREE_PATH".to_owned())
            .or_insert_with(|| worktree.to_string_lossy().into_owned());

        let ran = if opts.background {
            self.start_background(worktree, name, &cmds, &env, &log_path)?
        } else {
            self.run_foreground(worktree, name, &cmds, &env, &log_path)?
        };
        Ok(HookRun { ran, log_path })
    }

    fn run_foreground(
        &self,
        worktree: &Path,
        name: &str,
        cmds: &[String],
        env: &BTreeMap<String, String>,
        log_path: &Path,
    ) -> Result<bool, GwError> {
        let mut log = open_log(log_path)?;
        for cmd in cmds {
            write_header(&mut log, log_path, cmd)?;
            log::debug!("running {name} hook: {cmd}");
            let status = shell(cmd, worktree, env)
                .stdin(Stdio::null())
                .stdout(clone_log(&log, log_path)?)
                .stderr(clone_log(&log, log_path)?)
                .status()
                .map_err(|e| GwError::io(worktree, e))?;
            if !status.success() {
                return Err(GwError::HookFailed {
                    hook: name.to_owned(),
                    command: cmd.clone(),
                    status: status.to_string(),
                });
            }
        }
        Ok(true)
    }

    fn start_background(
        &self,
        worktree: &Path,
        name: &str,
        cmds: &[String],
        env: &BTreeMap<String, String>,
        log_path: &Path,
    ) -> Result<bool, GwError> {
        let mut started = false;
        for cmd in cmds {
            let mut log = open_log(log_path)?;
            write_header(&mut log, log_path, cmd)?;
            let spawned = shell(cmd, worktree, env)
                .process_group(0)
                .stdin(Stdio::null())
                .stdout(clone_log(&log, log_path)?)
                .stderr(Stdio::from(log))
                .spawn();
            match spawned {
                Ok(child) => {
                    log::debug!("started {name} hook (pid {}): {cmd}", child.id());
                    started = true;
                }
                Err(e) => log::warn!("failed to start {name} hook '{cmd}': {e}"),
            }
        }
        Ok(started)
    }
}

fn shell(cmd: &str, dir: &Path, env: &BTreeMap<String, String>) -> Command {
    let mut c = Command::new("sh");
    c.arg("-c").arg(cmd).current_dir(dir).envs(env);
    c
}

fn open_log(path: &Path) -> Result<File, GwError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| GwError::io(path, e))
}

fn clone_log(log: &File, path: &Path) -> Result<File, GwError> {
    log.try_clone().map_err(|e| GwError::io(path, e))
}

fn write_header(log: &mut File, path: &Path, cmd: &str) -> Result<(), GwError> {
    let ts = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_owned());
    writeln!(log, "\n=== {ts}: {cmd} ===").map_err(|e| GwError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::testing::FakeVcs;
    use std::time::{Duration, Instant};

    fn runner_with(key: &str, cmds: &[&str]) -> HookRunner {
        let fake = FakeVcs::new("/repo");
        fake.set_config(key, cmds);
        HookRunner::new(Arc::new(fake))
    }

    #[test]
    fn config_keys_and_log_paths() {
        assert_eq!(config_key_for_hook("post-checkout"), "gw.hooks.postCheckout");
        assert_eq!(config_key_for_hook("post-create"), "gw.hooks.post-create");
        assert_eq!(
            log_file_path(Path::new("/wt/a"), "post-create"),
            PathBuf::from("/wt/a/gw-hook-post-create.log")
        );
    }

    #[test]
    fn unconfigured_hook_does_not_run() {
        let td = tempfile::tempdir().unwrap();
        let runner = runner_with("gw.hooks.other", &["echo nope"]);
        let run = runner
            .run(td.path(), POST_CREATE, &BTreeMap::new(), HookOptions::default())
            .unwrap();
        assert!(!run.ran);
        assert!(!run.log_path.exists());
    }

    #[test]
    fn foreground_logs_and_stops_at_first_failure() {
        let td = tempfile::tempdir().unwrap();
        let runner = runner_with(
            "gw.hooks.post-create",
            &["echo hello $GW_HOOK_NAME $GW_BRANCH", "exit 3", "echo unreachable"],
        );
        let mut env = BTreeMap::new();
        env.insert("GW_BRANCH".to_owned(), "feat/x".to_owned());

        let err = runner
            .run(td.path(), POST_CREATE, &env, HookOptions::default())
            .unwrap_err();
        assert!(matches!(err, GwError::HookFailed { ref command, .. } if command == "exit 3"));

        let log = std::fs::read_to_string(log_file_path(td.path(), POST_CREATE)).unwrap();
        assert!(log.contains("hello post-create feat/x"));
        assert!(log.contains(": exit 3 ==="));
        assert!(!log.contains("unreachable\n"));
        assert_eq!(log.matches("\n=== ").count(), 2);
    }

    #[test]
    fn foreground_runs_in_worktree_and_appends() {
        let td = tempfile::tempdir().unwrap();
        let runner = runner_with("gw.hooks.postCheckout", &["pwd", "echo $GW_NEW_BRANCH"]);
        let mut env = BTreeMap::new();
        env.insert("GW_NEW_BRANCH".to_owned(), "main".to_owned());

        for _ in 0..2 {
            let run = runner
                .run(td.path(), POST_CHECKOUT, &env, HookOptions::default())
                .unwrap();
            assert!(run.ran);
        }
        let log = std::fs::read_to_string(log_file_path(td.path(), POST_CHECKOUT)).unwrap();
        let canonical = std::fs::canonicalize(td.path()).unwrap();
        assert!(log.contains(canonical.to_string_lossy().as_ref()));
        assert_eq!(log.matches("main\n").count(), 2);
        assert_eq!(log.matches("\n=== ").count(), 4);
    }

    #[test]
    fn background_returns_immediately_and_logs_eventually() {
        let td = tempfile::tempdir().unwrap();
        let runner = runner_with("gw.hooks.post-create", &["sleep 0.2; echo done-in-background"]);

        let started = Instant::now();
        let run = runner
            .run(
                td.path(),
                POST_CREATE,
                &BTreeMap::new(),
                HookOptions { background: true },
            )
            .unwrap();
        assert!(run.ran);
        assert!(started.elapsed() < Duration::from_millis(200));

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let log = std::fs::read_to_string(&run.log_path).unwrap_or_default();
            if log.contains("done-in-background") {
                break;
            }
            assert!(Instant::now() < deadline, "background hook never wrote its log");
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}
