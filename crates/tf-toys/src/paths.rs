//! File locations of toy inputs and fit outputs.

use std::path::{Path, PathBuf};

use tf_core::{Error, Result};

/// Environment variable overriding the base directory.
pub const BASE_DIR_ENV: &str = "TOYFIT_BASE_DIR";

/// Directory layout rooted at a base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    base: PathBuf,
}

impl Paths {
    /// Layout rooted at `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Resolve the base directory: explicit override, then `TOYFIT_BASE_DIR`, then the
    /// working directory.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Ok(Self::new(p));
        }
        match std::env::var_os(BASE_DIR_ENV) {
            Some(p) if !p.is_empty() => Ok(Self::new(PathBuf::from(p))),
            _ => Ok(Self::new(std::env::current_dir()?)),
        }
    }

    /// Base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Toy file of a source reference.
    pub fn toy_path(&self, reference: &str) -> PathBuf {
        if reference.ends_with(".json") {
            self.base.join(reference)
        } else {
            self.base.join("toys").join(format!("{reference}.json"))
        }
    }

    /// Fit output file of an output name.
    pub fn fit_output_path(&self, name: &str) -> PathBuf {
        fit_output_under(&self.base, name)
    }
}

fn fit_output_under(root: &Path, name: &str) -> PathBuf {
    root.join("toys").join("fits").join(format!("{name}.json"))
}

/// Where a run's results live.
///
/// Without an alternate location both paths coincide. With one, results are stored under the
/// alternate root and the logical path is a symbolic link to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    logical: PathBuf,
    physical: PathBuf,
}

impl OutputTarget {
    /// Resolve the output target `name`.
    pub fn resolve(paths: &Paths, name: &str, link_from: Option<&Path>) -> Self {
        let logical = paths.fit_output_path(name);
        let physical = match link_from {
            Some(root) => fit_output_under(root, name),
            None => logical.clone(),
        };
        Self { logical, physical }
    }

    /// Path users refer to.
    pub fn logical(&self) -> &Path {
        &self.logical
    }

    /// Path the store is read from and written to.
    pub fn physical(&self) -> &Path {
        &self.physical
    }

    /// Whether results are stored in an alternate location.
    pub fn is_linked(&self) -> bool {
        self.logical != self.physical
    }

    /// Create the link from the logical to the physical path (no-op when not linked).
    ///
    /// An existing link to the same file is reused.
    pub fn ensure_link(&self) -> Result<()> {
        if !self.is_linked() {
            return Ok(());
        }
        if let Ok(existing) = std::fs::read_link(&self.logical) {
            if existing == self.physical {
                return Ok(());
            }
            return Err(Error::Storage(format!(
                "{} already links to {}, not {}",
                self.logical.display(),
                existing.display(),
                self.physical.display()
            )));
        }
        if self.logical.exists() {
            return Err(Error::Storage(format!(
                "{} exists and is not a link; refusing to replace it",
                self.logical.display()
            )));
        }
        if let Some(parent) = self.logical.parent() {
            std::fs::create_dir_all(parent)?;
        }
        make_symlink(&self.physical, &self.logical)
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| {
        Error::Storage(format!("cannot link {} -> {}: {e}", link.display(), target.display()))
    })
}

#[cfg(not(unix))]
fn make_symlink(target: &Path, link: &Path) -> Result<()> {
    Err(Error::Storage(format!(
        "cannot link {} -> {}: symbolic links are not supported on this platform",
        link.display(),
        target.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toy_and_output_paths() {
        let paths = Paths::new("/data");
        assert_eq!(paths.toy_path("sig"), PathBuf::from("/data/toys/sig.json"));
        assert_eq!(paths.toy_path("gen/sig.json"), PathBuf::from("/data/gen/sig.json"));
        assert_eq!(paths.fit_output_path("study"), PathBuf::from("/data/toys/fits/study.json"));
    }

    #[test]
    fn test_explicit_base_wins() {
        let paths = Paths::discover(Some(Path::new("/explicit"))).unwrap();
        assert_eq!(paths.base(), Path::new("/explicit"));
    }

    #[test]
    fn test_unlinked_target() {
        let target = OutputTarget::resolve(&Paths::new("/data"), "study", None);
        assert!(!target.is_linked());
        assert_eq!(target.logical(), target.physical());
        target.ensure_link().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_linked_target_creates_and_reuses_link() {
        let base = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let target = OutputTarget::resolve(&Paths::new(base.path()), "study", Some(scratch.path()));
        assert!(target.is_linked());
        assert_eq!(target.physical(), scratch.path().join("toys/fits/study.json"));

        target.ensure_link().unwrap();
        assert_eq!(std::fs::read_link(target.logical()).unwrap(), target.physical());
        target.ensure_link().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_linked_target_refuses_regular_file() {
        let base = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let paths = Paths::new(base.path());
        let logical = paths.fit_output_path("study");
        std::fs::create_dir_all(logical.parent().unwrap()).unwrap();
        std::fs::write(&logical, "{}").unwrap();
        let target = OutputTarget::resolve(&paths, "study", Some(scratch.path()));
        assert!(matches!(target.ensure_link(), Err(Error::Storage(_))));
    }
}
