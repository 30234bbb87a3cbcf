#![forbid(unsafe_code)]

use std::io;
use std::path::{Path, PathBuf};

use crate::core::git::Vcs;
use crate::core::relocate::same_location;
use crate::error::GwError;

#[derive(Debug, Clone)]
enum Segment {
    AnyDepth,
    Name(glob::Pattern),
}

/// A `/`-separated glob where a whole `**` segment spans any number of
/// directories and every other segment matches exactly one component.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn new(raw: &str) -> Result<Self, GwError> {
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                if s == "**" {
                    Ok(Segment::AnyDepth)
                } else {
                    glob::Pattern::new(s)
                        .map(Segment::Name)
                        .map_err(|e| GwError::Config(format!("invalid pattern '{raw}': {e}")))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: raw.to_owned(),
            segments,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Leading separators on `path` are ignored, so `/a/b` and `a/b` match
    /// the same way.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match_segments(&self.segments, &parts)
    }
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyDepth, rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((Segment::Name(p), rest)) => match path.split_first() {
            Some((head, tail)) => p.matches(head) && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Mirrors ignored files of the primary worktree into another worktree as
/// symlinks pointing at the resolved physical source.
#[derive(Debug, Clone)]
pub struct SymlinkSynchronizer {
    include: Vec<PathPattern>,
    exclude: Vec<PathPattern>,
    verbose: bool,
}

impl SymlinkSynchronizer {
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self, GwError> {
        let compile = |pats: &[S]| {
            pats.iter()
                .map(|p| PathPattern::new(p.as_ref()))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
            verbose: false,
        })
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Included unless excluded. `rel` is relative to the repository root.
    #[must_use]
    pub fn selects(&self, rel: &str) -> bool {
        let rooted = format!("/{}", rel.trim_start_matches('/'));
        !self.exclude.iter().any(|p| p.matches(&rooted))
            && self.include.iter().any(|p| p.matches(&rooted))
    }

    /// Returns the number of links created. On the first filesystem error the
    /// count so far travels inside `GwError::Symlink`.
    pub fn sync(
        &self,
        vcs: &dyn Vcs,
        primary_root: &Path,
        target: &Path,
    ) -> Result<usize, GwError> {
        let files = vcs.ignored_files(primary_root)?;
        let mut created = 0usize;

        for rel in files.iter().filter(|f| self.selects(f)) {
            let src = primary_root.join(rel);
            if src.symlink_metadata().is_err() {
                continue;
            }
            let physical = std::fs::canonicalize(&src).unwrap_or_else(|_| src.clone());
            let dst = target.join(rel);

            replace_with_symlink(&physical, &dst).map_err(|source| GwError::Symlink {
                created,
                path: dst.clone(),
                source,
            })?;

            log::debug!("linked {} -> {}", dst.display(), physical.display());
            if self.verbose {
                eprintln!("Created symlink: {} -> {}", dst.display(), physical.display());
            }
            created += 1;
        }
        Ok(created)
    }
}

/// Creates the link under a temporary name and renames it over `dst`, so
/// readers never see `dst` missing unless it was a real directory.
fn replace_with_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let parent = dst
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    std::fs::create_dir_all(parent)?;

    if let Ok(meta) = dst.symlink_metadata()
        && meta.is_dir()
    {
        std::fs::remove_dir_all(dst)?;
    }

    let tmp = temp_link_path(dst);
    match std::fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    std::os::unix::fs::symlink(src, &tmp)?;
    if let Err(e) = std::fs::rename(&tmp, dst) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn temp_link_path(dst: &Path) -> PathBuf {
    let name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dst.with_file_name(format!(".{name}.gw-link-{}", std::process::id()))
}

/// Absolute form of `arg` relative to `base`, with the parent directory
/// resolved. The final component is left alone so a symlink stays a symlink.
pub fn resolve_in(base: &Path, arg: &Path) -> Result<PathBuf, GwError> {
    let joined = base.join(arg);
    let name = joined
        .file_name()
        .ok_or_else(|| GwError::InvalidInput(format!("not a file path: {}", arg.display())))?;
    let parent = joined.parent().unwrap_or(base);
    let parent = std::fs::canonicalize(parent).map_err(|e| GwError::io(parent, e))?;
    Ok(parent.join(name))
}

/// Moves `path` from `worktree` to the same relative location under
/// `primary` and leaves a symlink to it behind. Returns the new location.
pub fn link_to_primary(primary: &Path, worktree: &Path, path: &Path) -> Result<PathBuf, GwError> {
    if path.symlink_metadata().is_err() {
        return Err(GwError::InvalidInput(format!(
            "file not found: {}",
            path.display()
        )));
    }
    if same_location(worktree, primary) {
        return Err(GwError::InvalidInput(
            "you are in the primary worktree; nothing to link".to_owned(),
        ));
    }
    let rel = path
        .strip_prefix(worktree)
        .ok()
        .filter(|r| !r.as_os_str().is_empty())
        .ok_or_else(|| {
            GwError::InvalidInput(format!(
                "path must be within current worktree: {}",
                worktree.display()
            ))
        })?;

    let dst = primary.join(rel);
    if dst.symlink_metadata().is_ok() {
        return Err(GwError::DestinationExists(dst));
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GwError::io(parent, e))?;
    }
    std::fs::rename(path, &dst).map_err(|e| GwError::io(path, e))?;
    std::os::unix::fs::symlink(&dst, path).map_err(|e| GwError::io(path, e))?;
    log::debug!("linked {} -> {}", path.display(), dst.display());
    Ok(dst)
}

/// Replaces the symlink at `path` with a copy of whatever it points at.
/// Returns the link target as stored in the link.
pub fn materialize_symlink(path: &Path) -> Result<PathBuf, GwError> {
    let meta = path.symlink_metadata().map_err(|e| GwError::io(path, e))?;
    if !meta.file_type().is_symlink() {
        return Err(GwError::InvalidInput(format!(
            "not a symlink: {}",
            path.display()
        )));
    }
    let target = std::fs::read_link(path).map_err(|e| GwError::io(path, e))?;
    let source = match path.parent() {
        Some(dir) if target.is_relative() => dir.join(&target),
        _ => target.clone(),
    };
    let is_dir = std::fs::metadata(&source)
        .map_err(|e| GwError::io(&source, e))?
        .is_dir();

    let tmp = sibling_with_suffix(path, ".gw-unlink-tmp");
    let copied = if is_dir {
        copy_dir_recursive(&source, &tmp)
    } else {
        std::fs::copy(&source, &tmp).map(|_| ())
    };
    if let Err(e) = copied {
        let _ = remove_any(&tmp);
        return Err(GwError::io(&source, e));
    }

    std::fs::remove_file(path).map_err(|e| GwError::io(path, e))?;
    std::fs::rename(&tmp, path).map_err(|e| GwError::io(path, e))?;
    Ok(target)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let kind = entry.file_type()?;
        if kind.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else if kind.is_symlink() {
            std::os::unix::fs::symlink(std::fs::read_link(&from)?, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

fn remove_any(path: &Path) -> io::Result<()> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(_) => Ok(()),
    }
}
