#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{CommandFactory as _, Parser, Subcommand};
use serde::Serialize;

use crate::config::{self, Config};
use crate::core::git::{Git, Vcs};
use crate::core::naming::PathPlanner;
use crate::core::refresh::{RefreshCoordinator, WorktreeCollection, WorktreeEntry};
use crate::core::relocate::{Relocator, navigation_target, relative_within, same_location};
use crate::core::status::{BranchStatus, StatusResolver};
use crate::core::symlink::{self, SymlinkSynchronizer};
use crate::core::worktree::{Worktree, WorktreeManager};
use crate::error::GwError;
use crate::hooks::{self, HookOptions, HookRunner};
use crate::output::table::Table;
use crate::tui::picker::{self, PickerOptions};

/// Set by the shell wrapper to the directory the user ran `gw` from.
pub const CALLER_CWD_ENV: &str = "GW_CALLER_CWD";

#[derive(Debug, Parser)]
#[command(
    name = "gw",
    version,
    about = "Git worktree manager with live branch status"
)]
pub struct Cli {
    /// Enable debug logging on stderr (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List worktrees of the current repository
    #[command(alias = "ls")]
    List(ListArgs),
    /// Create a new branch and a worktree for it
    New(NewArgs),
    /// Create a worktree for an existing branch
    Add(AddArgs),
    /// Switch to the worktree for a branch, creating it if needed
    #[command(alias = "co")]
    Checkout(CheckoutArgs),
    /// Print the path of a worktree, picking interactively without a branch
    Go(GoArgs),
    /// Rename a worktree's branch and move its directory to match
    Mv(MvArgs),
    /// Remove worktrees and delete their branches
    #[command(alias = "remove")]
    Rm(RmArgs),
    /// Link ignored local files from the primary worktree into this one
    Sync(SyncArgs),
    /// Symlinks and the post-create hook for the current worktree
    Setup(SetupArgs),
    /// Move a file into the primary worktree and leave a symlink behind
    Link(LinkArgs),
    /// Replace a symlink with a copy of its target
    Unlink(LinkArgs),
    /// Run a command inside a worktree, picking interactively without a branch
    #[command(after_help = "Examples:\n  gw run -- npm install\n  gw run feature/foo -- make build")]
    Run(RunArgs),
    /// Run configured hooks by hand
    Hook(HookArgs),
    /// Prune stale worktree administrative data
    Prune,
    /// Generate shell completions
    Completion(CompletionArgs),
    Version,
    /// Read or write `gw.*` settings in git config
    Config(ConfigArgs),
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Resolve and show each branch's status
    #[arg(short = 'v', long = "status")]
    pub status: bool,
    #[arg(long, conflicts_with = "csv")]
    pub json: bool,
    #[arg(long)]
    pub csv: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::Args)]
pub struct HookFlags {
    /// Run hooks in the background
    #[arg(long = "hook-bg", conflicts_with = "hook_fg")]
    pub hook_bg: bool,
    /// Run hooks in the foreground and wait for them
    #[arg(long = "hook-fg")]
    pub hook_fg: bool,
}

impl HookFlags {
    fn resolve(self, configured: bool) -> HookOptions {
        let background = if self.hook_bg {
            true
        } else if self.hook_fg {
            false
        } else {
            configured
        };
        HookOptions { background }
    }
}

#[derive(Debug, Parser)]
pub struct NewArgs {
    pub branch: String,
    /// Start point of the new branch (defaults to the primary worktree's branch)
    #[arg(long)]
    pub from: Option<String>,
    #[command(flatten)]
    pub hooks: HookFlags,
}

#[derive(Debug, Parser)]
pub struct AddArgs {
    pub branch: String,
    #[command(flatten)]
    pub hooks: HookFlags,
}

#[derive(Debug, Parser)]
pub struct CheckoutArgs {
    pub branch: String,
    #[command(flatten)]
    pub hooks: HookFlags,
}

#[derive(Debug, Parser)]
pub struct GoArgs {
    pub branch: Option<String>,
}

#[derive(Debug, Parser)]
pub struct MvArgs {
    pub old_branch: String,
    pub new_branch: String,
}

#[derive(Debug, Parser)]
pub struct RmArgs {
    /// Remove even with uncommitted changes
    #[arg(short, long)]
    pub force: bool,
    /// Offer worktrees whose branch is merged, all of them marked
    #[arg(long, conflicts_with = "branches")]
    pub merged: bool,
    /// With --merged, remove every merged worktree without asking
    #[arg(short = 'y', long, requires = "merged")]
    pub yes: bool,
    pub branches: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct SyncArgs {
    /// Print every link created
    #[arg(short = 'v', long = "list")]
    pub list: bool,
}

#[derive(Debug, Parser)]
pub struct SetupArgs {
    /// Print every link created
    #[arg(short = 'v', long = "list")]
    pub list: bool,
    /// Skip the post-create hook
    #[arg(long, conflicts_with_all = ["hook_bg", "hook_fg"])]
    pub no_hooks: bool,
    #[command(flatten)]
    pub hooks: HookFlags,
}

#[derive(Debug, Parser)]
pub struct LinkArgs {
    pub path: PathBuf,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    pub branch: Option<String>,
    /// Command and arguments, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct HookArgs {
    #[command(subcommand)]
    pub cmd: HookCmd,
}

#[derive(Debug, Subcommand)]
pub enum HookCmd {
    /// Run a hook in the current worktree and print its log path
    Run {
        name: String,
        #[arg(long)]
        bg: bool,
    },
}

#[derive(Debug, Parser)]
pub struct CompletionArgs {
    pub shell: clap_complete::Shell,
}

#[derive(Debug, Parser)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    /// Print `gw.*` keys stored in git config
    List,
    /// Print the fully resolved configuration as TOML
    Show,
    Get { key: String },
    Set { key: String, value: String },
}

pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "off" }),
    )
    .format_timestamp(None)
    .init();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.cmd {
        Commands::List(args) => cmd_list(args).await,
        Commands::New(args) => cmd_new(&args, cli.verbose),
        Commands::Add(args) => cmd_add(&args, cli.verbose),
        Commands::Checkout(args) => cmd_checkout(&args, cli.verbose),
        Commands::Go(args) => cmd_go(args).await,
        Commands::Mv(args) => cmd_mv(&args),
        Commands::Rm(args) => cmd_rm(args).await,
        Commands::Sync(args) => cmd_sync(&args),
        Commands::Setup(args) => cmd_setup(&args),
        Commands::Link(args) => cmd_link(&args),
        Commands::Unlink(args) => cmd_unlink(&args),
        Commands::Run(args) => cmd_run(args).await,
        Commands::Hook(HookArgs {
            cmd: HookCmd::Run { name, bg },
        }) => cmd_hook_run(&name, bg),
        Commands::Prune => cmd_prune(),
        Commands::Completion(args) => {
            let mut cmd = Cli::command();
            clap_complete::generate(args.shell, &mut cmd, "gw", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => Ok(cmd_version()),
        Commands::Config(args) => cmd_config(args.cmd),
    }
}

/// `GW_CALLER_CWD` when it names an existing directory, otherwise `fallback`.
fn resolve_caller_cwd(env: Option<OsString>, fallback: PathBuf) -> PathBuf {
    env.filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_dir())
        .unwrap_or(fallback)
}

fn caller_cwd() -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(resolve_caller_cwd(std::env::var_os(CALLER_CWD_ENV), cwd))
}

/// Everything a repository-scoped command needs.
struct Repo {
    vcs: Arc<dyn Vcs>,
    cfg: Config,
    manager: WorktreeManager,
    caller_cwd: PathBuf,
}

impl Repo {
    fn open() -> anyhow::Result<Self> {
        let caller_cwd = caller_cwd()?;
        let vcs: Arc<dyn Vcs> = Arc::new(Git::from_dir(&caller_cwd)?);
        let cfg = config::load(Some(vcs.as_ref()))?;
        let home = config::home_dir().context("cannot determine home directory")?;
        let planner = PathPlanner::for_repo(vcs.as_ref(), &cfg.base_dir()?, &home)?;
        log::debug!("worktree base: {}", planner.base().display());
        Ok(Self {
            manager: WorktreeManager::new(Arc::clone(&vcs), planner),
            vcs,
            cfg,
            caller_cwd,
        })
    }

    fn primary(&self) -> Result<PathBuf, GwError> {
        self.vcs.primary_worktree()
    }

    fn current(&self) -> Result<Option<Worktree>, GwError> {
        self.manager.containing(&self.caller_cwd)
    }

    /// The worktree the caller is in, or the repository root git reported.
    fn current_or_root(&self) -> Result<PathBuf, GwError> {
        Ok(self
            .current()?
            .map_or_else(|| self.vcs.repo_root().to_path_buf(), |wt| wt.path))
    }

    fn primary_branch(&self) -> Result<String, GwError> {
        let primary = self.primary()?;
        Ok(self
            .vcs
            .current_branch(&primary)?
            .unwrap_or_else(|| "HEAD".to_owned()))
    }

    /// `root` plus the caller's position inside their current worktree, when
    /// that subdirectory exists in `root` too.
    fn navigation_path(&self, root: &Path) -> Result<PathBuf, GwError> {
        let rel = self
            .current()?
            .and_then(|wt| relative_within(&wt.path, &self.caller_cwd));
        Ok(navigation_target(root, rel.as_deref()))
    }

    fn synchronizer(&self, verbose: bool) -> Result<SymlinkSynchronizer, GwError> {
        Ok(SymlinkSynchronizer::new(
            self.cfg.symlinks.include.as_slice(),
            self.cfg.symlinks.exclude.as_slice(),
        )?
        .verbose(verbose))
    }

    /// Symlinks and the post-create hook for a freshly added worktree. Neither
    /// failure undoes the worktree.
    fn prepare_new_worktree(
        &self,
        path: &Path,
        branch: &str,
        flags: HookFlags,
        verbose: bool,
    ) -> Result<(), GwError> {
        let primary = self.primary()?;
        match self.synchronizer(verbose)?.sync(self.vcs.as_ref(), &primary, path) {
            Ok(0) => {}
            Ok(n) => eprintln!("Created {n} symlink(s)"),
            Err(e) => eprintln!("Warning: {e}"),
        }

        let env = hook_env([("GW_BRANCH", branch)]);
        self.run_hook(path, hooks::POST_CREATE, &env, flags);
        Ok(())
    }

    fn run_hook(&self, dir: &Path, name: &str, env: &BTreeMap<String, String>, flags: HookFlags) {
        let opts = flags.resolve(self.cfg.hooks.background);
        match HookRunner::new(Arc::clone(&self.vcs)).run(dir, name, env, opts) {
            Ok(run) if run.ran && opts.background => {
                eprintln!("{name} hook started in background: {}", run.log_path.display());
            }
            Ok(run) if run.ran => eprintln!("{name} hook executed"),
            Ok(_) => {}
            Err(e) => {
                log::warn!("{name} hook in {}: {e}", dir.display());
                eprintln!("Warning: {name} hook completed with errors: {e}");
            }
        }
    }

    /// Opens the live picker over this repository's worktrees while statuses
    /// load in the background.
    async fn pick(
        &self,
        title: &str,
        multi: bool,
        only_merged: bool,
        skip: impl Fn(&WorktreeEntry) -> bool,
    ) -> anyhow::Result<Vec<Arc<WorktreeEntry>>> {
        let worktrees = self.manager.list()?;
        let primary = self.primary()?;
        let current = self.current()?.map(|wt| wt.path);
        let collection = Arc::new(WorktreeCollection::from_worktrees(
            &worktrees,
            &primary,
            current.as_deref(),
            skip,
            Duration::from_millis(self.cfg.status.redraw_debounce_ms),
            false,
        ));
        if collection.is_empty() {
            return Err(GwError::Other("no worktrees available for selection".to_owned()).into());
        }

        let resolver = Arc::new(StatusResolver::with_default_review(Arc::clone(&self.vcs)));
        let loader = RefreshCoordinator::new(resolver, self.cfg.status.concurrency)
            .start_loader(Arc::clone(&collection));

        let mut opts = PickerOptions {
            title: title.to_owned(),
            multi,
            preselected: BTreeSet::new(),
        };
        if only_merged {
            loader.await.context("status loader failed")?;
            opts.preselected = merged_indices(&collection);
            if opts.preselected.is_empty() {
                return Ok(Vec::new());
            }
        }

        let shared = Arc::clone(&collection);
        let picked = tokio::task::spawn_blocking(move || picker::pick(&shared, &opts))
            .await
            .context("picker task failed")??;

        Ok(picked
            .into_iter()
            .filter_map(|i| collection.get(i).cloned())
            .collect())
    }
}

fn hook_env<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

fn merged_indices(collection: &WorktreeCollection) -> BTreeSet<usize> {
    collection
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| e.status() == Some(BranchStatus::Merged))
        .map(|(i, _)| i)
        .collect()
}

#[derive(Debug, Serialize)]
struct ListRow {
    branch: Option<String>,
    path: PathBuf,
    head: String,
    primary: bool,
    current: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<BranchStatus>,
}

async fn cmd_list(args: ListArgs) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let worktrees = repo.manager.list()?;
    let primary = repo.primary()?;
    let current = repo.current()?.map(|wt| wt.path);

    let collection = Arc::new(WorktreeCollection::from_worktrees(
        &worktrees,
        &primary,
        current.as_deref(),
        |_| false,
        Duration::from_millis(repo.cfg.status.redraw_debounce_ms),
        false,
    ));
    if args.status {
        let resolver = Arc::new(StatusResolver::with_default_review(Arc::clone(&repo.vcs)));
        RefreshCoordinator::new(resolver, repo.cfg.status.concurrency)
            .start_loader(Arc::clone(&collection))
            .await
            .context("status loader failed")?;
    }

    let rows: Vec<ListRow> = worktrees
        .iter()
        .zip(collection.entries())
        .map(|(wt, entry)| ListRow {
            branch: wt.branch.clone(),
            path: wt.path.clone(),
            head: wt.head.clone(),
            primary: entry.is_primary,
            current: entry.is_current,
            status: if args.status && entry.is_eligible() {
                entry.status()
            } else {
                None
            },
        })
        .collect();

    if args.json {
        let mut out = serde_json::to_string_pretty(&rows)?;
        out.push('\n');
        print!("{out}");
        return Ok(ExitCode::SUCCESS);
    }

    let mut headers = vec!["BRANCH", "PATH"];
    if args.status {
        headers.push("STATUS");
    }
    let mut table = Table::new(headers);
    for row in &rows {
        let marker = if row.current { "* " } else { "  " };
        let branch = row.branch.as_deref().unwrap_or("(detached)");
        let mut cols = vec![format!("{marker}{branch}"), row.path.display().to_string()];
        if args.status {
            cols.push(row.status.map(|s| s.as_str().to_owned()).unwrap_or_default());
        }
        table.row(cols);
    }
    if args.csv {
        table.print_csv()?;
    } else {
        table.print()?;
    }
    Ok(ExitCode::SUCCESS)
}

fn ensure_no_worktree(repo: &Repo, branch: &str) -> anyhow::Result<()> {
    match repo.manager.find_by_branch(branch) {
        Ok(wt) => anyhow::bail!(
            "worktree for branch '{branch}' already exists: {}",
            wt.path.display()
        ),
        Err(GwError::WorktreeNotFound(_)) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn cmd_new(args: &NewArgs, verbose: bool) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let branch = args.branch.trim();
    ensure_no_worktree(&repo, branch)?;
    if repo.vcs.branch_exists(branch)? {
        anyhow::bail!("branch '{branch}' already exists; use 'gw add {branch}'");
    }

    let base = match &args.from {
        Some(from) => from.clone(),
        None => repo.primary_branch()?,
    };
    let path = repo
        .manager
        .create(branch, Some(&base))
        .with_context(|| format!("failed to create worktree for '{branch}'"))?;
    eprintln!("Created worktree: {} (from {base})", path.display());

    repo.prepare_new_worktree(&path, branch, args.hooks, verbose)?;
    println!("{}", repo.navigation_path(&path)?.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_add(args: &AddArgs, verbose: bool) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let branch = args.branch.trim();
    ensure_no_worktree(&repo, branch)?;
    let remote = format!("origin/{branch}");
    if !repo.vcs.branch_exists(branch)? && !repo.vcs.ref_exists(repo.vcs.repo_root(), &remote) {
        anyhow::bail!("branch '{branch}' not found; use 'gw new {branch}'");
    }

    let path = repo
        .manager
        .create(branch, None)
        .with_context(|| format!("failed to create worktree for '{branch}'"))?;
    eprintln!("Created worktree: {}", path.display());

    repo.prepare_new_worktree(&path, branch, args.hooks, verbose)?;
    println!("{}", repo.navigation_path(&path)?.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_checkout(args: &CheckoutArgs, verbose: bool) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let branch = args.branch.trim();
    let prev = repo
        .current()?
        .and_then(|wt| wt.branch)
        .unwrap_or_default();

    let target = match repo.manager.find_by_branch(branch) {
        Ok(wt) => wt.path,
        Err(GwError::WorktreeNotFound(_)) => {
            let remote = format!("origin/{branch}");
            let existing = repo.vcs.branch_exists(branch)?
                || repo.vcs.ref_exists(repo.vcs.repo_root(), &remote);
            let path = if existing {
                repo.manager.create(branch, None)?
            } else {
                let base = repo.primary_branch()?;
                repo.manager.create(branch, Some(&base))?
            };
            eprintln!("Created worktree: {}", path.display());
            repo.prepare_new_worktree(&path, branch, args.hooks, verbose)?;
            path
        }
        Err(e) => return Err(e.into()),
    };

    eprintln!("Switched from [{prev}] to [{branch}]");
    let env = hook_env([
        ("GW_BRANCH", branch),
        ("GW_PREV_BRANCH", prev.as_str()),
        ("GW_NEW_BRANCH", branch),
    ]);
    repo.run_hook(&target, hooks::POST_CHECKOUT, &env, args.hooks);

    println!("{}", repo.navigation_path(&target)?.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_go(args: GoArgs) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let target = match args.branch.as_deref().map(str::trim) {
        Some(branch) => repo.manager.find_by_branch(branch)?.path,
        None => {
            let picked = repo
                .pick("Switch worktree", false, false, |e| e.is_current)
                .await?;
            picked
                .first()
                .map(|e| e.path.clone())
                .ok_or(GwError::Cancelled)?
        }
    };
    println!("{}", repo.navigation_path(&target)?.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_mv(args: &MvArgs) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    // Run the move from the primary worktree, never from inside the one moving.
    let primary: Arc<dyn Vcs> = Arc::new(Git::new(repo.primary()?));
    let relocator = Relocator::new(primary, repo.manager.planner().clone());
    let outcome = relocator.relocate(
        &args.old_branch,
        &args.new_branch,
        Some(repo.caller_cwd.as_path()),
    )?;
    println!("{}", outcome.print_path.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_rm(args: RmArgs) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let primary = repo.primary()?;
    let current = repo.current()?.map(|wt| wt.path);

    let targets: Vec<Worktree> = if !args.branches.is_empty() {
        args.branches
            .iter()
            .map(|b| repo.manager.find_by_branch(b.trim()))
            .collect::<Result<_, _>>()?
    } else {
        let skip = |e: &WorktreeEntry| e.is_primary || e.is_current;
        let picked = if args.merged && args.yes {
            merged_without_prompt(&repo, skip).await?
        } else {
            repo.pick("Remove worktrees", true, args.merged, skip).await?
        };
        if picked.is_empty() && args.merged {
            eprintln!("No merged worktrees");
            return Ok(ExitCode::SUCCESS);
        }
        picked
            .iter()
            .map(|e| Worktree {
                path: e.path.clone(),
                branch: e.branch.clone(),
                head: String::new(),
            })
            .collect()
    };

    for wt in &targets {
        if same_location(&wt.path, &primary) {
            anyhow::bail!("cannot remove the primary worktree: {}", wt.path.display());
        }
        if current.as_deref().is_some_and(|c| same_location(&wt.path, c)) {
            anyhow::bail!("cannot remove the current worktree: {}", wt.path.display());
        }
    }

    for wt in &targets {
        repo.manager
            .remove_with_branch(wt, args.force)
            .with_context(|| format!("failed to remove {}", wt.path.display()))?;
        eprintln!("Removed worktree: {}", wt.path.display());

        let path = wt.path.to_string_lossy();
        let env = hook_env([
            ("GW_BRANCH", wt.branch.as_deref().unwrap_or_default()),
            ("GW_WORKTREE_PATH", path.as_ref()),
        ]);
        repo.run_hook(&primary, hooks::POST_REMOVE, &env, HookFlags::default());
    }
    Ok(ExitCode::SUCCESS)
}

async fn merged_without_prompt(
    repo: &Repo,
    skip: impl Fn(&WorktreeEntry) -> bool,
) -> anyhow::Result<Vec<Arc<WorktreeEntry>>> {
    let worktrees = repo.manager.list()?;
    let primary = repo.primary()?;
    let current = repo.current()?.map(|wt| wt.path);
    let collection = Arc::new(WorktreeCollection::from_worktrees(
        &worktrees,
        &primary,
        current.as_deref(),
        skip,
        Duration::from_millis(repo.cfg.status.redraw_debounce_ms),
        false,
    ));
    let resolver = Arc::new(StatusResolver::with_default_review(Arc::clone(&repo.vcs)));
    RefreshCoordinator::new(resolver, repo.cfg.status.concurrency)
        .start_loader(Arc::clone(&collection))
        .await
        .context("status loader failed")?;
    Ok(merged_indices(&collection)
        .into_iter()
        .filter_map(|i| collection.get(i).cloned())
        .collect())
}

fn cmd_sync(args: &SyncArgs) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let primary = repo.primary()?;
    let target = repo.current_or_root()?;
    if same_location(&target, &primary) {
        anyhow::bail!("already in the primary worktree; nothing to sync");
    }

    let created = repo
        .synchronizer(args.list)?
        .sync(repo.vcs.as_ref(), &primary, &target)?;
    eprintln!("Synced {created} symlink(s) into {}", target.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_setup(args: &SetupArgs) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let primary = repo.primary()?;
    let target = repo.current_or_root()?;
    if same_location(&target, &primary) {
        anyhow::bail!("you are in the primary worktree; setup is for secondary worktrees");
    }

    let created = repo
        .synchronizer(args.list)?
        .sync(repo.vcs.as_ref(), &primary, &target)?;
    eprintln!("Created {created} symlink(s)");

    if !args.no_hooks {
        let branch = repo.vcs.current_branch(&target)?.unwrap_or_default();
        let env = hook_env([("GW_BRANCH", branch.as_str())]);
        repo.run_hook(&target, hooks::POST_CREATE, &env, args.hooks);
    }
    eprintln!("Setup complete");
    Ok(ExitCode::SUCCESS)
}

fn cmd_link(args: &LinkArgs) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let path = symlink::resolve_in(&repo.caller_cwd, &args.path)?;
    let dst = symlink::link_to_primary(&repo.primary()?, &repo.current_or_root()?, &path)?;
    eprintln!("Linked: {} -> {}", path.display(), dst.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_unlink(args: &LinkArgs) -> anyhow::Result<ExitCode> {
    let path = symlink::resolve_in(&caller_cwd()?, &args.path)?;
    let target = symlink::materialize_symlink(&path)?;
    eprintln!("Unlinked: {} (copied from: {})", path.display(), target.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let dir = match args.branch.as_deref().map(str::trim) {
        Some(branch) => repo.manager.find_by_branch(branch)?.path,
        None => {
            let picked = repo
                .pick("Select worktree to run command", false, false, |_| false)
                .await?;
            picked
                .first()
                .map(|e| e.path.clone())
                .ok_or(GwError::Cancelled)?
        }
    };

    let (program, rest) = args
        .command
        .split_first()
        .context("command required after '--'")?;
    log::debug!("running {program} in {}", dir.display());
    let status = std::process::Command::new(program)
        .args(rest)
        .current_dir(&dir)
        .status()
        .with_context(|| format!("failed to run '{program}'"))?;
    Ok(exit_code_of(status))
}

/// The child's exit code, or 1 when it was killed by a signal.
fn exit_code_of(status: std::process::ExitStatus) -> ExitCode {
    match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::from(1),
    }
}

fn cmd_hook_run(name: &str, background: bool) -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let worktree = repo.current_or_root()?;
    let branch = repo.vcs.current_branch(&worktree)?.unwrap_or_default();
    let env = hook_env([("GW_BRANCH", branch.as_str())]);

    let run = HookRunner::new(Arc::clone(&repo.vcs)).run(
        &worktree,
        name,
        &env,
        HookOptions { background },
    )?;
    if !run.ran {
        eprintln!("No {name} hook configured");
        return Ok(ExitCode::SUCCESS);
    }
    println!("{}", run.log_path.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_prune() -> anyhow::Result<ExitCode> {
    let repo = Repo::open()?;
    let out = repo.manager.prune()?;
    if !out.trim().is_empty() {
        eprint!("{out}");
    }
    eprintln!("Pruned stale worktree information");
    Ok(ExitCode::SUCCESS)
}

fn cmd_version() -> ExitCode {
    println!("gw version {}", env!("CARGO_PKG_VERSION"));
    println!("  rust: {}", rustc_version_runtime::version());
    println!(
        "  os/arch: {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::SUCCESS
}

/// Config commands work outside a repository too, against global git config.
fn config_vcs() -> anyhow::Result<Git> {
    let cwd = caller_cwd()?;
    Ok(Git::from_dir(&cwd).unwrap_or_else(|_| Git::new(cwd)))
}

fn cmd_config(cmd: ConfigCmd) -> anyhow::Result<ExitCode> {
    let git = config_vcs()?;
    match cmd {
        ConfigCmd::List => {
            let entries = git.config_list("^gw\\.")?;
            if entries.is_empty() {
                println!("No gw configuration found");
            }
            for (key, value) in entries {
                println!("{key} = {value}");
            }
        }
        ConfigCmd::Show => {
            let cfg = config::load(Some(&git as &dyn Vcs))?;
            print!("{}", config::resolved_toml(&cfg)?);
        }
        ConfigCmd::Get { key } => {
            let key = config::normalize_key(key.trim());
            let values = git.config_get_all(git.repo_root(), &key)?;
            if values.is_empty() {
                anyhow::bail!(
                    "configuration key '{key}' not found - use 'gw config list' to see stored keys"
                );
            }
            for v in values {
                println!("{v}");
            }
        }
        ConfigCmd::Set { key, value } => {
            let key = config::normalize_key(key.trim());
            config::check_value(&key, &value)?;
            git.config_set(&key, &value)?;
            println!("Set {key} = {value}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
