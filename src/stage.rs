use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};

use crate::sandbox::CommandSpec;

/// Number of leading `_` tokens holding student metadata
const METADATA_TOKENS: usize = 3;

/// Identity and class name derived from a raw submission filename
///
/// Raw files look like `jdoe_1000_01_MyClass-2.java`: three metadata tokens,
/// then the class name, optionally followed by a `-<n>` resubmission marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionName {
    /// Path of the raw submission file
    pub source: PathBuf,
    /// Filename without the source extension; names the workspace and report
    pub identity: String,
    pub class_name: String,
}

impl SubmissionName {
    pub fn parse(path: &Path, extension: &str) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("Submission {} has no UTF-8 file name", path.display()))?;

        let suffix = format!(".{extension}");
        let Some(stem) = file_name.strip_suffix(&suffix) else {
            bail!("Submission {file_name} does not end in {suffix}");
        };

        let tokens: Vec<&str> = stem.split('_').collect();
        if tokens.len() <= METADATA_TOKENS {
            bail!(
                "Submission {file_name} does not follow the <student>_<id>_<n>_<Class>{suffix} naming convention"
            );
        }

        let joined = tokens[METADATA_TOKENS..].concat();
        let class_name = joined.split_once('-').map_or(joined.as_str(), |(class, _)| class);
        if class_name.is_empty() {
            bail!("Submission {file_name} has an empty class name");
        }

        Ok(Self {
            source: path.to_path_buf(),
            identity: stem.to_string(),
            class_name: class_name.to_string(),
        })
    }

    /// Identity up to the first metadata delimiter, used in report headers
    pub fn display_name(&self) -> &str {
        self.identity
            .split_once('_')
            .map_or(self.identity.as_str(), |(head, _)| head)
    }
}

/// An isolated directory holding one renamed submission source file
///
/// The directory is removed by [`Workspace::remove`], or on drop if the
/// pipeline bailed out before reaching that point.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    class_name: String,
    source_path: PathBuf,
    removed: bool,
}

impl Workspace {
    /// Creates `<work_root>/<identity>` and copies the submission in as
    /// `<ClassName>.<extension>`
    pub fn create(work_root: &Path, name: &SubmissionName, extension: &str) -> Result<Self> {
        let work_root = std::path::absolute(work_root)
            .with_context(|| format!("Invalid work directory {}", work_root.display()))?;
        fs::create_dir_all(&work_root).with_context(|| {
            format!("Failed to create work directory {}", work_root.display())
        })?;

        let dir = work_root.join(&name.identity);
        if dir.exists() {
            log::debug!("Removing stale workspace {}", dir.display());
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir(&dir)
            .with_context(|| format!("Failed to create workspace {}", dir.display()))?;

        let workspace = Self {
            source_path: dir.join(format!("{}.{extension}", name.class_name)),
            class_name: name.class_name.clone(),
            dir,
            removed: false,
        };
        copy_submission(&name.source, &workspace.source_path)?;

        Ok(workspace)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Resolves a toolchain command template against this workspace
    pub fn command(&self, template: &[String]) -> Result<CommandSpec> {
        let source = self.source_path.to_string_lossy();
        let dir = self.dir.to_string_lossy();
        let mapping = [
            ("%SOURCE%", source.as_ref()),
            ("%DIR%", dir.as_ref()),
            ("%CLASS%", self.class_name.as_str()),
        ];
        CommandSpec::from_template(template, &mapping, &self.dir)
    }

    pub fn remove(mut self) -> Result<()> {
        self.removed = true;
        fs::remove_dir_all(&self.dir)
            .with_context(|| format!("Failed to remove workspace {}", self.dir.display()))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            log::warn!("Failed to remove workspace {}: {e}", self.dir.display());
        }
    }
}

fn copy_submission(src: &Path, dst: &Path) -> Result<()> {
    let metadata =
        fs::metadata(src).with_context(|| format!("Failed to stat {}", src.display()))?;
    if !metadata.is_file() {
        bail!("{} is not a regular file", src.display());
    }
    fs::copy(src, dst)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}
