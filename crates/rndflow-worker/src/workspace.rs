// Workspace: the job root on disk.
// Writes the input records before the script runs and enumerates what it
// left behind afterwards.

use anyhow::{Context, Result};
use rndflow_client::models::{fields_to_object, Field};
use rndflow_client::{FileDescriptor, Package};
use rndflow_common::constants::layout;
use rndflow_sdk::IOUtil;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Write `in/params.json` from the job's field list.
pub fn write_params(root: &Path, fields: &[Field]) -> Result<PathBuf> {
    let path = root
        .join(layout::INPUT_DIRECTORY)
        .join(layout::PARAMS_FILE);
    IOUtil::save_json(&path, &fields_to_object(fields))?;
    Ok(path)
}

/// Write `in/{id}/label` and `in/{id}/fields.json` for an input package.
pub fn write_package(root: &Path, package: &Package) -> Result<PathBuf> {
    let dir = root
        .join(layout::INPUT_DIRECTORY)
        .join(package.id.to_string());
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory '{}'", dir.display()))?;

    let label = dir.join(layout::LABEL_FILE);
    fs::write(&label, &package.label)
        .with_context(|| format!("Failed to write '{}'", label.display()))?;
    IOUtil::save_json(&dir.join(layout::FIELDS_FILE), &fields_to_object(&package.fields))?;
    Ok(dir)
}

/// Input files to download: everything not rooted under `out`.
pub fn select_input_files(files: &[FileDescriptor]) -> Vec<&FileDescriptor> {
    files.iter().filter(|f| !f.is_output()).collect()
}

/// Files under `root` to upload, sorted by path.
///
/// Directories whose first path segment is in `exclude_dirs` are not
/// descended into, and `log_file` is left out so it can be sent last.
pub fn enumerate_output_files(
    root: &Path,
    exclude_dirs: &[String],
    log_file: &Path,
) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() != 1 || !entry.file_type().is_dir() {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            !exclude_dirs.iter().any(|d| d == name.as_ref())
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk '{}'", root.display()))?;
        if !entry.file_type().is_file() || entry.path() == log_file {
            continue;
        }
        files.push(entry.into_path());
    }
    Ok(files)
}

/// Whether a server supplied name stays inside the job root.
pub fn is_contained(name: &str) -> bool {
    let path = Path::new(name);
    !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn descriptor(name: &str) -> FileDescriptor {
        FileDescriptor {
            name: name.into(),
            media_type: "text/plain".into(),
            content_hash: "00".into(),
            is_executable: false,
            is_binary: false,
            size: 0,
            content: Some(format!("https://objects/{name}")),
        }
    }

    #[test]
    fn params_keep_non_ascii() {
        let dir = tempfile::tempdir().unwrap();
        let fields = vec![
            Field { name: "x".into(), value: json!(1) },
            Field { name: "name".into(), value: json!("Привет") },
        ];
        let path = write_params(dir.path(), &fields).unwrap();
        assert_eq!(path, dir.path().join("in/params.json"));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Привет"));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"x": 1, "name": "Привет"}));
    }

    #[test]
    fn package_records_label_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let package = Package {
            id: 12,
            label: "raw data".into(),
            fields: vec![Field { name: "n".into(), value: json!(3) }],
        };
        let path = write_package(dir.path(), &package).unwrap();
        assert_eq!(fs::read_to_string(path.join("label")).unwrap(), "raw data");
        let fields: Value = IOUtil::load_json(&path.join("fields.json")).unwrap();
        assert_eq!(fields, json!({"n": 3}));
    }

    #[test]
    fn output_files_are_not_downloaded() {
        let files = vec![descriptor("out/x"), descriptor("a/b"), descriptor("output.txt")];
        let names: Vec<&str> = select_input_files(&files)
            .into_iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["a/b", "output.txt"]);
    }

    #[test]
    fn enumeration_skips_excluded_dirs_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("in")).unwrap();
        fs::create_dir_all(root.join("cache")).unwrap();
        fs::create_dir_all(root.join("out/1/files")).unwrap();
        fs::write(root.join("in/foo"), "foo").unwrap();
        fs::write(root.join("cache/bar"), "bar").unwrap();
        fs::write(root.join("job.log"), "log").unwrap();
        fs::write(root.join("data.csv"), "a,b").unwrap();
        fs::write(root.join("out/1/files/r.txt"), "r").unwrap();

        let exclude = vec!["in".to_string(), "cache".to_string()];
        let files = enumerate_output_files(root, &exclude, &root.join("job.log")).unwrap();
        assert_eq!(
            files,
            vec![root.join("data.csv"), root.join("out/1/files/r.txt")]
        );
    }

    #[test]
    fn exclusion_applies_to_the_first_segment_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/in")).unwrap();
        fs::write(root.join("src/in/kept.txt"), "k").unwrap();

        let files =
            enumerate_output_files(root, &["in".to_string()], &root.join("1.log")).unwrap();
        assert_eq!(files, vec![root.join("src/in/kept.txt")]);
    }

    #[test]
    fn names_must_stay_inside_the_root() {
        assert!(is_contained("a/b.txt"));
        assert!(is_contained("./a"));
        assert!(!is_contained("../etc/passwd"));
        assert!(!is_contained("/etc/passwd"));
        assert!(!is_contained(""));
    }
}
