//! Target derivation: map file changes to the packages that need testing

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use sentinel_core::config::ProjectConfig;
use sentinel_core::types::{ChangeKind, FileChange, TestTarget};

/// Priority of targets whose tests changed or have a direct test file
pub const PRIORITY_DIRECT: i32 = 1;
/// Priority of targets reached indirectly through source changes
pub const PRIORITY_INDIRECT: i32 = 2;
/// Priority of project-wide runs
pub const PRIORITY_GLOBAL: i32 = 3;

const DIRECT_ESTIMATE: Duration = Duration::from_secs(30);
const INDIRECT_ESTIMATE: Duration = Duration::from_secs(60);
const GLOBAL_ESTIMATE: Duration = Duration::from_secs(300);

/// How a source change relates to the tests in its directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// A test file named after the source file exists
    Direct,
    /// Other test files exist in the same directory
    Indirect,
    /// No test files were found
    None,
}

/// Derives a deduplicated target list from file changes
#[derive(Debug, Clone)]
pub struct TargetDeriver {
    root_dir: PathBuf,
    project: ProjectConfig,
}

impl TargetDeriver {
    pub fn new(root_dir: impl Into<PathBuf>, project: ProjectConfig) -> Self {
        Self {
            root_dir: root_dir.into(),
            project,
        }
    }

    /// Map changes to targets, in first-seen order.
    ///
    /// A path is scheduled at most once no matter how many changes lead to it.
    pub fn derive(&self, changes: &[FileChange]) -> Vec<TestTarget> {
        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        for change in changes {
            let target = match change.kind {
                ChangeKind::Test => TestTarget::package(
                    self.package_of(&change.path),
                    PRIORITY_DIRECT,
                    DIRECT_ESTIMATE,
                ),
                ChangeKind::Source => {
                    let (priority, estimate) = match self.coverage(&change.path) {
                        Coverage::Direct => (PRIORITY_DIRECT, DIRECT_ESTIMATE),
                        Coverage::Indirect | Coverage::None => {
                            (PRIORITY_INDIRECT, INDIRECT_ESTIMATE)
                        }
                    };
                    TestTarget::package(self.package_of(&change.path), priority, estimate)
                }
                ChangeKind::Config | ChangeKind::Dependency => {
                    TestTarget::recursive(PRIORITY_GLOBAL, GLOBAL_ESTIMATE)
                }
            };

            if seen.insert(target.path.clone()) {
                debug!(
                    change = %change.path.display(),
                    target = %target,
                    priority = target.priority,
                    "derived target"
                );
                targets.push(target);
            }
        }

        targets
    }

    /// Find test files related to a source file
    pub fn coverage(&self, source: &Path) -> Coverage {
        let source = self.resolve(source);
        let Some(dir) = source.parent() else {
            return Coverage::None;
        };

        if let Some(direct) = self.direct_test_file(&source) {
            if direct.is_file() {
                return Coverage::Direct;
            }
        }

        let pattern = format!(
            "{}/*{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            self.project.test_suffix
        );
        let has_tests = glob::glob(&pattern)
            .map(|mut paths| paths.any(|p| p.map(|p| p.is_file()).unwrap_or(false)))
            .unwrap_or(false);

        if has_tests {
            Coverage::Indirect
        } else {
            Coverage::None
        }
    }

    /// `x.go` -> `x_test.go` in the same directory
    fn direct_test_file(&self, source: &Path) -> Option<PathBuf> {
        let name = source.file_name()?.to_str()?;
        let stem = name.strip_suffix(&self.project.source_extension)?;
        Some(source.with_file_name(format!("{}{}", stem, self.project.test_suffix)))
    }

    /// Package path of a changed file, relative to the root where possible
    fn package_of(&self, path: &Path) -> String {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root_dir).unwrap_or(path)
        } else {
            path
        };

        let dir: PathBuf = relative
            .parent()
            .unwrap_or(Path::new(""))
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        let dir = dir.to_string_lossy();
        if dir.is_empty() {
            ".".to_string()
        } else {
            dir.into_owned()
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root_dir.join(path)
        }
    }
}
