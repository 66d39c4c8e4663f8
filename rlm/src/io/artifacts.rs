//! Per-run artifacts: subcall input/prompt/output/meta and rejected planner output.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::plan::{Snippet, Span, SubcallPurpose};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcallPaths {
    pub dir: PathBuf,
    pub input_path: PathBuf,
    pub prompt_path: PathBuf,
    pub output_path: PathBuf,
    pub meta_path: PathBuf,
}

impl SubcallPaths {
    pub fn new(run_dir: &Path, iteration: u32, subcall_id: &str) -> Self {
        let dir = run_dir
            .join("subcalls")
            .join(iteration.to_string())
            .join(subcall_id);
        Self {
            input_path: dir.join("input.json"),
            prompt_path: dir.join("prompt.txt"),
            output_path: dir.join("output.txt"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }

    /// Paths relative to the run dir, as recorded in `state.json`.
    pub fn relative_to(&self, run_dir: &Path) -> SubcallArtifactPaths {
        SubcallArtifactPaths {
            input: relative_display(run_dir, &self.input_path),
            prompt: relative_display(run_dir, &self.prompt_path),
            output: relative_display(run_dir, &self.output_path),
            meta: relative_display(run_dir, &self.meta_path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcallArtifactPaths {
    pub input: String,
    pub prompt: String,
    pub output: String,
    pub meta: String,
}

pub fn relative_display(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Resolved subcall request as written to `input.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SubcallInput<'a> {
    pub id: &'a str,
    pub purpose: SubcallPurpose,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_pointer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_var: Option<&'a str>,
    /// Effective ceiling after the budget clamp.
    pub max_input_bytes: u64,
    pub snippets: &'a [Snippet],
    pub spans: &'a [Span],
}

#[derive(Debug, Clone, Serialize)]
pub struct SubcallMeta<'a> {
    pub id: &'a str,
    pub purpose: SubcallPurpose,
    pub status: &'a str,
    pub input_bytes: usize,
    pub clipped: bool,
}

pub struct SubcallWriteRequest<'a> {
    pub paths: &'a SubcallPaths,
    pub input: &'a SubcallInput<'a>,
    pub prompt: &'a str,
    pub output: &'a str,
    pub meta: &'a SubcallMeta<'a>,
}

/// Write the four subcall artifacts in a fixed order.
pub fn write_subcall(request: &SubcallWriteRequest<'_>) -> Result<()> {
    let paths = request.paths;
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create subcall dir {}", paths.dir.display()))?;
    write_json(&paths.input_path, request.input)?;
    write_text(&paths.prompt_path, request.prompt)?;
    write_text(&paths.output_path, request.output)?;
    write_json(&paths.meta_path, request.meta)?;
    Ok(())
}

/// Read a byte window of a stored subcall output, clamped to its length.
pub fn read_output_window(path: &Path, offset: u64, bytes: u64) -> Result<String> {
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let len = raw.len() as u64;
    if offset >= len || bytes == 0 {
        return Ok(String::new());
    }
    let end = len.min(offset.saturating_add(bytes));
    Ok(String::from_utf8_lossy(&raw[offset as usize..end as usize]).into_owned())
}

/// Keep a rejected planner response for later inspection.
///
/// `attempt` is zero-based; file names are one-based.
pub fn record_planner_failure(
    run_dir: &Path,
    iteration: u32,
    attempt: u32,
    errors: &[String],
    raw: &str,
) -> Result<PathBuf> {
    let dir = run_dir.join("planner");
    fs::create_dir_all(&dir).with_context(|| format!("create planner dir {}", dir.display()))?;
    let path = dir.join(format!("iteration-{iteration}-attempt-{}.txt", attempt + 1));
    let mut contents = String::new();
    if !errors.is_empty() {
        contents.push_str(&format!("# errors: {}\n", errors.join("; ")));
    }
    contents.push_str(if raw.is_empty() {
        "[empty planner output]"
    } else {
        raw
    });
    write_text(&path, &contents)?;
    Ok(path)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::ByteLocator;

    #[test]
    fn subcall_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SubcallPaths::new(temp.path(), 3, "sc0002");
        assert!(paths.dir.ends_with(Path::new("subcalls/3/sc0002")));
        let relative = paths.relative_to(temp.path());
        assert_eq!(relative.input, "subcalls/3/sc0002/input.json");
        assert_eq!(relative.prompt, "subcalls/3/sc0002/prompt.txt");
        assert_eq!(relative.output, "subcalls/3/sc0002/output.txt");
        assert_eq!(relative.meta, "subcalls/3/sc0002/meta.json");
    }

    #[test]
    fn writes_all_subcall_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SubcallPaths::new(temp.path(), 1, "sc0001");
        let snippets = vec![Snippet {
            locator: ByteLocator::Absolute { start_byte: 4 },
            bytes: 10,
        }];
        write_subcall(&SubcallWriteRequest {
            paths: &paths,
            input: &SubcallInput {
                id: "sc0001",
                purpose: SubcallPurpose::Extract,
                parent_pointer: None,
                output_var: Some("facts"),
                max_input_bytes: 512,
                snippets: &snippets,
                spans: &[],
            },
            prompt: "Purpose: extract",
            output: "answer",
            meta: &SubcallMeta {
                id: "sc0001",
                purpose: SubcallPurpose::Extract,
                status: "succeeded",
                input_bytes: 16,
                clipped: false,
            },
        })
        .expect("write");

        let input: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.input_path).expect("input"))
                .expect("json");
        assert_eq!(input["purpose"], "extract");
        assert_eq!(input["output_var"], "facts");
        assert_eq!(input["snippets"][0]["start_byte"], 4);
        assert!(input.get("parent_pointer").is_none());
        assert_eq!(fs::read_to_string(&paths.output_path).expect("output"), "answer");
        let meta: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("meta"))
                .expect("json");
        assert_eq!(meta["status"], "succeeded");
        assert_eq!(meta["clipped"], false);
    }

    #[test]
    fn output_window_clamps_to_length() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("output.txt");
        fs::write(&path, "0123456789").expect("write");
        assert_eq!(read_output_window(&path, 2, 3).expect("read"), "234");
        assert_eq!(read_output_window(&path, 8, 100).expect("read"), "89");
        assert_eq!(read_output_window(&path, 10, 1).expect("read"), "");
    }

    #[test]
    fn planner_failure_file_carries_error_header() {
        let temp = tempfile::tempdir().expect("tempdir");
        let errors = vec!["plan_parse_error".to_string(), "plan_validation_error".to_string()];
        let path = record_planner_failure(temp.path(), 2, 1, &errors, "").expect("record");
        assert!(path.ends_with("planner/iteration-2-attempt-2.txt"));
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "# errors: plan_parse_error; plan_validation_error\n[empty planner output]"
        );
    }
}
