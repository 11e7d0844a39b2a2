//! Plain-text grep over a workspace, unrelated to the retrieval core —
//! a literal/case-insensitive line scan used by the file browser's
//! "find in files" action.

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

const MAX_MATCHES: usize = 500;
const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct GrepQuery {
    pub pattern: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub path_glob: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GrepMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct GrepResponse {
    pub matches: Vec<GrepMatch>,
    pub truncated: bool,
}

pub fn grep_workspace(root: &str, query: &GrepQuery) -> AppResult<GrepResponse> {
    let needle = if query.case_sensitive {
        query.pattern.clone()
    } else {
        query.pattern.to_lowercase()
    };

    let mut matches = Vec::new();
    let mut truncated = false;

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .max_depth(Some(64))
        .build();

    'walk: for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if crate::config::is_excluded_directory(entry.file_name().to_string_lossy().as_ref()) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        if metadata.len() == 0 || metadata.len() > MAX_FILE_SIZE {
            continue;
        }

        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        for (idx, line) in content.lines().enumerate() {
            let haystack = if query.case_sensitive { line.to_string() } else { line.to_lowercase() };
            if haystack.contains(&needle) {
                matches.push(GrepMatch {
                    path: relative.clone(),
                    line: idx + 1,
                    text: line.trim().chars().take(400).collect(),
                });
                if matches.len() >= MAX_MATCHES {
                    truncated = true;
                    break 'walk;
                }
            }
        }
    }

    Ok(GrepResponse { matches, truncated })
}
