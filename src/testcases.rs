use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

use crate::config::TestCasesConfig;

/// Ordered test inputs and expected outputs, paired by position
#[derive(Debug, Clone)]
pub struct TestCases {
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
}

/// An expected output file, loaded once and shared by every report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedOutput {
    pub path: PathBuf,
    /// File contents with carriage returns stripped
    pub text: String,
}

impl TestCases {
    /// Partitions the files under `dir` by extension and sorts each group
    ///
    /// The i-th input belongs to the i-th output by sort order alone; the
    /// file stems are never compared.
    pub fn load(dir: &Path, config: &TestCasesConfig) -> Result<Self> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();

        for path in list_files(dir)? {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some((_, extension)) = file_name.rsplit_once('.') else {
                bail!("Test case {} has no file extension", path.display());
            };

            if extension == config.input_extension {
                inputs.push(path);
            } else if extension == config.output_extension {
                outputs.push(path);
            } else {
                bail!(
                    "Test case {} is neither .{} nor .{}",
                    path.display(),
                    config.input_extension,
                    config.output_extension
                );
            }
        }

        sort_bytewise(&mut inputs);
        sort_bytewise(&mut outputs);

        if inputs.len() != outputs.len() {
            bail!(
                "Found {} input files but {} output files in {}",
                inputs.len(),
                outputs.len(),
                dir.display()
            );
        }

        log::info!("Loaded {} test cases from {}", inputs.len(), dir.display());
        Ok(Self { inputs, outputs })
    }

    /// A single fixed input / expected output pair
    pub fn from_pair(input: impl Into<PathBuf>, expected: impl Into<PathBuf>) -> Self {
        Self {
            inputs: vec![input.into()],
            outputs: vec![expected.into()],
        }
    }

    pub fn inputs(&self) -> &[PathBuf] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PathBuf] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Reads every expected output, stripping `\r`
    pub fn load_expected(&self) -> Result<Vec<ExpectedOutput>> {
        self.outputs
            .iter()
            .map(|path| {
                let bytes = fs::read(path)
                    .with_context(|| format!("Failed to read expected output {}", path.display()))?;
                Ok(ExpectedOutput {
                    path: path.clone(),
                    text: String::from_utf8_lossy(&bytes).replace('\r', ""),
                })
            })
            .collect()
    }
}

/// Recursively lists the files under `dir`, sorted byte-wise
///
/// Symlinks are listed as entries but never followed.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to list directory {}", dir.display()))?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }

    sort_bytewise(&mut files);
    Ok(files)
}

fn sort_bytewise(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| {
        a.as_os_str()
            .as_encoded_bytes()
            .cmp(b.as_os_str().as_encoded_bytes())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str, contents: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_pairs_by_sort_order_not_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.in", "");
        touch(dir.path(), "a.in", "");
        touch(dir.path(), "Z.in", "");
        touch(dir.path(), "x.out", "");
        touch(dir.path(), "y.out", "");
        touch(dir.path(), "w.out", "");

        let cases = TestCases::load(dir.path(), &TestCasesConfig::default()).unwrap();
        assert_eq!(names(cases.inputs()), vec!["Z.in", "a.in", "b.in"]);
        assert_eq!(names(cases.outputs()), vec!["w.out", "x.out", "y.out"]);
        assert_eq!(cases.len(), 3);
    }

    #[test]
    fn test_sort_is_lexicographic_not_numeric() {
        let dir = tempfile::tempdir().unwrap();
        for i in [1, 2, 10] {
            touch(dir.path(), &format!("{i}.in"), "");
            touch(dir.path(), &format!("{i}.out"), "");
        }

        let cases = TestCases::load(dir.path(), &TestCasesConfig::default()).unwrap();
        assert_eq!(names(cases.inputs()), vec!["1.in", "10.in", "2.in"]);
        assert_eq!(names(cases.outputs()), vec!["1.out", "10.out", "2.out"]);
    }

    #[test]
    fn test_unequal_counts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "1.in", "");
        touch(dir.path(), "2.in", "");
        touch(dir.path(), "1.out", "");

        let err = TestCases::load(dir.path(), &TestCasesConfig::default()).unwrap_err();
        assert!(err.to_string().contains("2 input files but 1 output files"));
    }

    #[test]
    fn test_missing_or_unknown_extension_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "README", "");
        assert!(TestCases::load(dir.path(), &TestCasesConfig::default()).is_err());

        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "1.in", "");
        touch(dir.path(), "1.txt", "");
        assert!(TestCases::load(dir.path(), &TestCasesConfig::default()).is_err());
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TestCases::load(&dir.path().join("nope"), &TestCasesConfig::default()).is_err());
    }

    #[test]
    fn test_nested_files_and_expected_text() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "part1/1.in", "3\n");
        touch(dir.path(), "part1/1.out", "6\r\n7\r\n");

        let cases = TestCases::load(dir.path(), &TestCasesConfig::default()).unwrap();
        let expected = cases.load_expected().unwrap();
        assert_eq!(expected.len(), 1);
        assert_eq!(expected[0].text, "6\n7\n");
        assert_eq!(expected[0].path, dir.path().join("part1/1.out"));
    }

    #[test]
    fn test_fixed_pair() {
        let cases = TestCases::from_pair("input.txt", "expected.txt");
        assert_eq!(cases.len(), 1);
        assert!(!cases.is_empty());
        assert_eq!(cases.outputs(), &[PathBuf::from("expected.txt")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_listing_does_not_follow_symlinked_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        touch(outside.path(), "9.in", "");
        touch(dir.path(), "b/2.in", "");
        touch(dir.path(), "a.in", "");
        std::os::unix::fs::symlink(outside.path(), dir.path().join("linked")).unwrap();

        let files = list_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("a.in"),
                dir.path().join("b/2.in"),
                dir.path().join("linked"),
            ]
        );
    }
}
