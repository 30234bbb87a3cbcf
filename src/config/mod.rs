#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::core::git::Vcs;
use crate::error::GwError;

pub const KEY_WORKTREE_BASE: &str = "gw.worktree.base";
pub const KEY_SYMLINKS_INCLUDE: &str = "gw.symlinks.include";
pub const KEY_SYMLINKS_EXCLUDE: &str = "gw.symlinks.exclude";
pub const KEY_HOOKS_BACKGROUND: &str = "gw.hooks.background";
pub const KEY_STATUS_CONCURRENCY: &str = "gw.status.concurrency";
pub const KEY_STATUS_DEBOUNCE: &str = "gw.status.redraw-debounce-ms";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub worktree: WorktreeConfig,
    pub symlinks: SymlinkConfig,
    pub hooks: HooksConfig,
    pub status: StatusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorktreeConfig {
    #[serde(alias = "base", alias = "basedir")]
    pub base_dir: String,
}

impl Default for WorktreeConfig {
    fn default() -> Self {
        Self {
            base_dir: "~/.worktrees".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SymlinkConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl Default for SymlinkConfig {
    fn default() -> Self {
        Self {
            include: [
                "**/.vscode/*",
                "**/.claude/*",
                "**/.env*",
                "**/.github/prompts/*.local.prompt.md",
                "**/.ignored/**",
                "**/.serena/**",
                "**/CLAUDE.local.md",
                "**/AGENTS.local.md",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
            exclude: vec!["**/node_modules/*".to_owned()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HooksConfig {
    pub background: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatusConfig {
    /// 0 means one lookup per available processor.
    pub concurrency: usize,
    pub redraw_debounce_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            redraw_debounce_ms: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_file: PathBuf,
}

pub fn default_paths() -> anyhow::Result<ConfigPaths> {
    let unix = home_config_path_unix();
    if !cfg!(windows) || unix.exists() {
        return Ok(ConfigPaths { config_file: unix });
    }

    let proj = ProjectDirs::from("dev", "gw", "gw")
        .context("failed to determine platform config directory")?;
    Ok(ConfigPaths {
        config_file: proj.config_dir().join("config.toml"),
    })
}

fn home_config_path_unix() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".config").join("gw").join("config.toml")
}

#[must_use]
pub fn home_dir() -> Option<PathBuf> {
    if let Some(v) = std::env::var_os("HOME") {
        return Some(PathBuf::from(v));
    }
    if let Some(v) = std::env::var_os("USERPROFILE") {
        return Some(PathBuf::from(v));
    }
    directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    if let Some(rest) = input.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest).to_string_lossy().to_string();
    }
    if input == "~"
        && let Some(home) = home_dir()
    {
        return home.to_string_lossy().to_string();
    }
    input.to_owned()
}

pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let expanded = expand_env_vars(&expand_tilde(input));
    let p = PathBuf::from(expanded);
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

fn expand_env_vars(input: &str) -> String {
    // $VAR and ${VAR}; unknown variables stay as written.
    let Ok(re) = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") else {
        return input.to_owned();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        std::env::var(key).unwrap_or_else(|_| caps[0].to_owned())
    })
    .to_string()
}

/// Defaults, then the TOML file, then `gw.*` git config when a repository is
/// available.
pub fn load(vcs: Option<&dyn Vcs>) -> anyhow::Result<Config> {
    let paths = default_paths()?;
    let mut cfg = load_from_file(&paths.config_file)?;
    if let Some(vcs) = vcs {
        cfg.apply_git_overrides(vcs)?;
    }
    cfg.validate()?;
    log::debug!("resolved config: {cfg:?}");
    Ok(cfg)
}

pub fn load_from_file(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let cfg: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
    Ok(cfg)
}

pub fn resolved_toml(cfg: &Config) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(cfg)?)
}

impl Config {
    pub fn validate(&self) -> Result<(), GwError> {
        if self.worktree.base_dir.trim().is_empty() {
            return Err(GwError::Config(
                "worktree.base_dir must not be empty".to_owned(),
            ));
        }
        if self.status.redraw_debounce_ms == 0 {
            return Err(GwError::Config(
                "status.redraw_debounce_ms must be >= 1".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn apply_git_overrides(&mut self, vcs: &dyn Vcs) -> Result<(), GwError> {
        if let Some(base) = vcs.config_get(KEY_WORKTREE_BASE)?.filter(|v| !v.is_empty()) {
            self.worktree.base_dir = base;
        }

        let root = vcs.repo_root().to_path_buf();
        let include = vcs.config_get_all(&root, KEY_SYMLINKS_INCLUDE)?;
        if !include.is_empty() {
            self.symlinks.include = include;
        }
        let exclude = vcs.config_get_all(&root, KEY_SYMLINKS_EXCLUDE)?;
        if !exclude.is_empty() {
            self.symlinks.exclude = exclude;
        }

        if let Some(v) = vcs.config_get(KEY_HOOKS_BACKGROUND)? {
            self.hooks.background = parse_bool(&v).map_err(|msg| GwError::InvalidConfigValue {
                key: KEY_HOOKS_BACKGROUND.to_owned(),
                msg,
            })?;
        }
        if let Some(v) = vcs.config_get(KEY_STATUS_CONCURRENCY)? {
            self.status.concurrency =
                parse_uint(&v).map_err(|msg| GwError::InvalidConfigValue {
                    key: KEY_STATUS_CONCURRENCY.to_owned(),
                    msg,
                })?;
        }
        if let Some(v) = vcs.config_get(KEY_STATUS_DEBOUNCE)? {
            let ms = parse_uint(&v).map_err(|msg| GwError::InvalidConfigValue {
                key: KEY_STATUS_DEBOUNCE.to_owned(),
                msg,
            })?;
            self.status.redraw_debounce_ms = u64::try_from(ms).unwrap_or(u64::MAX);
        }
        Ok(())
    }

    pub fn base_dir(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.worktree.base_dir)
    }
}

/// Maps short aliases onto `gw.*` git config keys. Anything else gets the
/// `gw.` prefix if it lacks one.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    match key {
        "hooks.background" | "hooks-background" => KEY_HOOKS_BACKGROUND.to_owned(),
        "hooks.post-create" | "post-create" => "gw.hooks.post-create".to_owned(),
        "hooks.post-checkout" | "post-checkout" => "gw.hooks.postCheckout".to_owned(),
        "hooks.post-remove" | "post-remove" => "gw.hooks.post-remove".to_owned(),
        "worktree.base" | "worktree.base_dir" | "worktree.basedir" => KEY_WORKTREE_BASE.to_owned(),
        "symlinks.include" => KEY_SYMLINKS_INCLUDE.to_owned(),
        "symlinks.exclude" => KEY_SYMLINKS_EXCLUDE.to_owned(),
        "status.concurrency" => KEY_STATUS_CONCURRENCY.to_owned(),
        "status.redraw_debounce_ms" | "status.redraw-debounce-ms" => KEY_STATUS_DEBOUNCE.to_owned(),
        _ if key.starts_with("gw.") => key.to_owned(),
        _ => format!("gw.{key}"),
    }
}

/// Rejects keys outside the `gw.` namespace shape and values the typed keys
/// would not accept later.
pub fn check_value(key: &str, value: &str) -> Result<(), GwError> {
    if key.ends_with('.') || key.split('.').any(str::is_empty) {
        return Err(GwError::InvalidConfigKey(key.to_owned()));
    }
    let res = match key {
        KEY_HOOKS_BACKGROUND => parse_bool(value).map(|_| ()),
        KEY_STATUS_CONCURRENCY => parse_uint(value).map(|_| ()),
        KEY_STATUS_DEBOUNCE => parse_uint(value).and_then(|v| {
            if v == 0 {
                Err("must be >= 1".to_owned())
            } else {
                Ok(())
            }
        }),
        _ => Ok(()),
    };
    res.map_err(|msg| GwError::InvalidConfigValue {
        key: key.to_owned(),
        msg,
    })
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" | "" => Ok(false),
        other => Err(format!("expected true|false, got '{other}'")),
    }
}

fn parse_uint(s: &str) -> Result<usize, String> {
    s.trim()
        .parse::<usize>()
        .map_err(|e| format!("expected non-negative integer, got '{s}': {e}"))
}
