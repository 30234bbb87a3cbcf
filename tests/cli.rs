use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Env {
    _td: tempfile::TempDir,
    home: PathBuf,
    repo: PathBuf,
    base: PathBuf,
}

fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
}

fn setup() -> Option<Env> {
    if Command::new("git").arg("--version").output().is_err() {
        eprintln!("skipping: git not found");
        return None;
    }
    let td = tempfile::tempdir().expect("tempdir");
    let root = std::fs::canonicalize(td.path()).expect("canonicalize");
    let home = root.join("home");
    let repo = root.join("repo");
    let base = root.join("wts");
    std::fs::create_dir_all(&home).expect("mkdir home");
    std::fs::create_dir_all(&repo).expect("mkdir repo");

    git(&repo, &["init", "-b", "main"]);
    git(&repo, &["config", "user.email", "test@example.com"]);
    git(&repo, &["config", "user.name", "Test"]);
    git(&repo, &["config", "gw.worktree.base", base.to_str().expect("utf8")]);
    std::fs::write(repo.join("README.md"), "hello\n").expect("write");
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-m", "init"]);

    Some(Env {
        _td: td,
        home,
        repo,
        base,
    })
}

impl Env {
    fn gw(&self, cwd: &Path, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_gw"))
            .args(args)
            .current_dir(cwd)
            .env("HOME", &self.home)
            .env_remove("GW_CALLER_CWD")
            .env_remove("RUST_LOG")
            .output()
            .expect("run gw")
    }

    fn gw_ok(&self, cwd: &Path, args: &[&str]) -> String {
        let out = self.gw(cwd, args);
        assert!(
            out.status.success(),
            "gw {:?} failed: {}",
            args,
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).trim_end().to_owned()
    }
}

#[test]
fn new_prints_worktree_path_under_configured_base() {
    let Some(env) = setup() else { return };
    let printed = PathBuf::from(env.gw_ok(&env.repo, &["new", "feat/cli"]));

    assert!(printed.starts_with(env.base.join("local")), "{}", printed.display());
    assert!(printed.ends_with("feat-cli"));
    assert!(printed.join("README.md").is_file());

    let out = env.gw(&env.repo, &["new", "feat/cli"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("already exists"));
}

#[test]
fn mv_keeps_caller_subdirectory() {
    let Some(env) = setup() else { return };
    let old = PathBuf::from(env.gw_ok(&env.repo, &["new", "feat/one"]));
    std::fs::create_dir_all(old.join("docs")).expect("mkdir");

    let out = Command::new(env!("CARGO_BIN_EXE_gw"))
        .args(["mv", "feat/one", "feat/two"])
        .current_dir(&env.repo)
        .env("HOME", &env.home)
        .env("GW_CALLER_CWD", old.join("docs"))
        .output()
        .expect("run gw");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let new_root = old.with_file_name("feat-two");
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(stdout.trim_end(), new_root.join("docs").to_string_lossy());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Renamed branch: feat/one -> feat/two"));
    assert!(stderr.contains("Moved worktree:"));
    assert!(!old.exists());
}

#[test]
fn list_json_marks_primary() {
    let Some(env) = setup() else { return };
    env.gw_ok(&env.repo, &["new", "feat/list"]);
    let json = env.gw_ok(&env.repo, &["list", "--json"]);

    let rows: serde_json::Value = serde_json::from_str(&json).expect("json");
    let rows = rows.as_array().expect("array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["branch"], "main");
    assert_eq!(rows[0]["primary"], true);
    assert_eq!(rows[0]["current"], true);
    assert_eq!(rows[1]["branch"], "feat/list");
    assert_eq!(rows[1]["primary"], false);
}

#[test]
fn rm_by_branch_deletes_worktree_and_branch() {
    let Some(env) = setup() else { return };
    let path = PathBuf::from(env.gw_ok(&env.repo, &["new", "feat/gone"]));

    let out = env.gw(&env.repo, &["rm", "feat/gone"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(!path.exists());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Deleted branch: feat/gone"));

    let out = env.gw(&env.repo, &["rm", "main"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("primary"));
}

#[test]
fn config_set_get_and_list() {
    let Some(env) = setup() else { return };
    assert_eq!(
        env.gw_ok(&env.repo, &["config", "set", "hooks.background", "true"]),
        "Set gw.hooks.background = true"
    );
    assert_eq!(env.gw_ok(&env.repo, &["config", "get", "hooks.background"]), "true");

    let list = env.gw_ok(&env.repo, &["config", "list"]);
    assert!(list.contains("gw.hooks.background = true"));
    assert!(list.contains("gw.worktree.base = "));

    let out = env.gw(&env.repo, &["config", "set", "status.concurrency", "many"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn post_create_hook_runs_in_new_worktree() {
    let Some(env) = setup() else { return };
    git(
        &env.repo,
        &["config", "--add", "gw.hooks.post-create", "echo \"$GW_BRANCH\" > created-by-hook"],
    );
    let path = PathBuf::from(env.gw_ok(&env.repo, &["new", "feat/hooked", "--hook-fg"]));

    assert_eq!(
        std::fs::read_to_string(path.join("created-by-hook")).expect("marker"),
        "feat/hooked\n"
    );
    assert!(path.join("gw-hook-post-create.log").is_file());
}

#[test]
fn setup_relinks_ignored_files_and_refuses_primary() {
    let Some(env) = setup() else { return };
    std::fs::write(env.repo.join(".gitignore"), ".env\n").expect("write");
    git(&env.repo, &["add", ".gitignore"]);
    git(&env.repo, &["commit", "-m", "ignore env"]);
    std::fs::write(env.repo.join(".env"), "TOKEN=1\n").expect("write");

    let wt = PathBuf::from(env.gw_ok(&env.repo, &["new", "feat/setup"]));
    std::fs::remove_file(wt.join(".env")).expect("remove link");

    env.gw_ok(&wt, &["setup", "--no-hooks"]);
    let link = wt.join(".env");
    assert!(link.symlink_metadata().expect("link").file_type().is_symlink());
    assert_eq!(std::fs::read_to_string(&link).expect("read"), "TOKEN=1\n");

    let out = env.gw(&env.repo, &["setup"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("primary worktree"));
}

#[test]
fn link_then_unlink_round_trips_through_primary() {
    let Some(env) = setup() else { return };
    let wt = PathBuf::from(env.gw_ok(&env.repo, &["new", "feat/link"]));
    std::fs::create_dir_all(wt.join("notes")).expect("mkdir");
    std::fs::write(wt.join("notes/todo.local.md"), "- ship\n").expect("write");

    env.gw_ok(&wt.join("notes"), &["link", "todo.local.md"]);
    let moved = env.repo.join("notes/todo.local.md");
    assert_eq!(std::fs::read_to_string(&moved).expect("moved"), "- ship\n");
    assert_eq!(
        std::fs::read_link(wt.join("notes/todo.local.md")).expect("link"),
        moved
    );

    let out = env.gw(&wt, &["link", "notes/todo.local.md"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("already exists"));

    env.gw_ok(&wt, &["unlink", "notes/todo.local.md"]);
    let local = wt.join("notes/todo.local.md");
    assert!(local.symlink_metadata().expect("file").is_file());
    assert_eq!(std::fs::read_to_string(&local).expect("read"), "- ship\n");
    assert!(moved.is_file());

    let out = env.gw(&wt, &["unlink", "README.md"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not a symlink"));
}

#[test]
fn run_executes_in_branch_worktree_and_passes_exit_code() {
    let Some(env) = setup() else { return };
    let wt = PathBuf::from(env.gw_ok(&env.repo, &["new", "feat/run"]));

    let out = env.gw(
        &env.repo,
        &["run", "feat/run", "--", "sh", "-c", "pwd > where.txt; exit 7"],
    );
    assert_eq!(out.status.code(), Some(7));
    let recorded = std::fs::read_to_string(wt.join("where.txt")).expect("where.txt");
    assert_eq!(PathBuf::from(recorded.trim_end()), wt);

    let out = env.gw(&env.repo, &["run", "feat/none", "--", "true"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("no worktree found"));
}
