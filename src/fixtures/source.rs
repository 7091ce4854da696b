use super::FixtureSpec;
use crate::document::Document;
use crate::error::BootstrapError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const FIXTURE_EXTENSIONS: [&str; 2] = ["json", "toml"];

#[derive(Debug, Deserialize)]
struct FixtureFile {
    name: Option<String>,
    #[serde(default)]
    data: Vec<Document>,
    #[serde(default)]
    upsert: bool,
}

/// Fixture files under `root`, sorted by path.
pub fn collect_fixture_files(root: &Path) -> Result<Vec<PathBuf>, BootstrapError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => BootstrapError::Io(io),
            None => BootstrapError::config(format!(
                "filesystem loop under {}",
                root.display()
            )),
        })?;
        let is_fixture = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| FIXTURE_EXTENSIONS.contains(&x));
        if is_fixture {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Parses one fixture file. The file stem names the collection when the
/// file has no `name`.
pub fn read_fixture_file(path: &Path) -> Result<FixtureSpec, BootstrapError> {
    let text = std::fs::read_to_string(path)?;
    let parse_err = |message: String| BootstrapError::Parse {
        source_name: path.display().to_string(),
        message,
    };
    let file: FixtureFile = match path.extension().and_then(|x| x.to_str()) {
        Some("toml") => toml::from_str(&text).map_err(|e| parse_err(e.to_string()))?,
        _ => serde_json::from_str(&text).map_err(|e| parse_err(e.to_string()))?,
    };
    let name = match file.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| parse_err("fixture has no collection name".into()))?,
    };
    Ok(FixtureSpec {
        collection: name,
        data: file.data,
        upsert: file.upsert,
    })
}

pub fn read_fixture_dir(root: &Path) -> Result<Vec<FixtureSpec>, BootstrapError> {
    collect_fixture_files(root)?
        .iter()
        .map(|path| read_fixture_file(path))
        .collect()
}
