//! Corpus loading: a directory tree of `.txt` files or a JSON-lines file.
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::Document;

/// Load `path` as a `.jsonl` file when it is one, otherwise as a `.txt` tree.
pub fn load_documents(path: &Path, key_field: &str, text_field: &str) -> Result<Vec<Document>> {
    if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        load_jsonl(path)
    } else {
        load_txt_dir(path, key_field, text_field)
    }
}

/// One JSON object per non-blank line.
pub fn load_jsonl(path: &Path) -> Result<Vec<Document>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut documents = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() { continue; }
        match serde_json::from_str::<Value>(line).with_context(|| format!("{}:{}", path.display(), lineno + 1))? {
            Value::Object(doc) => documents.push(doc),
            other => anyhow::bail!("{}:{}: expected a JSON object, got {}", path.display(), lineno + 1, other),
        }
    }
    tracing::info!(path = %path.display(), documents = documents.len(), "loaded jsonl corpus");
    Ok(documents)
}

/// Every `.txt` file under `root` becomes one document keyed by its relative path.
///
/// Fields: `key_field` (relative path), `title` (file stem), `category`
/// (parent directory, `misc` at the root) and `text_field` (file content).
pub fn load_txt_dir(root: &Path, key_field: &str, text_field: &str) -> Result<Vec<Document>> {
    let files = list_txt_files(root);
    if files.is_empty() {
        tracing::warn!(root = %root.display(), "no .txt files found");
        return Ok(vec![]);
    }
    let mut documents = Vec::with_capacity(files.len());
    for file_path in &files {
        let relative = file_path.strip_prefix(root).unwrap_or(file_path);
        let mut doc = Document::new();
        doc.insert(key_field.to_string(), Value::String(relative.to_string_lossy().to_string()));
        let title = file_path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        doc.insert("title".to_string(), Value::String(title));
        doc.insert("category".to_string(), Value::String(category_of(relative)));
        doc.insert(text_field.to_string(), Value::String(read_file_content(file_path)?));
        documents.push(doc);
    }
    tracing::info!(root = %root.display(), documents = documents.len(), "loaded txt corpus");
    Ok(documents)
}

fn read_file_content(file_path: &Path) -> Result<String> {
    match fs::read_to_string(file_path) {
        Ok(content) => Ok(content),
        Err(_) => Ok(String::from_utf8_lossy(&fs::read(file_path)?).to_string()),
    }
}

fn category_of(relative: &Path) -> String {
    match relative.parent().and_then(Path::to_str) {
        Some(parent) if !parent.is_empty() => parent.to_string(),
        _ => "misc".to_string(),
    }
}

fn list_txt_files(root: &Path) -> Vec<PathBuf> {
    let mut txt_files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("txt"))
        .map(|e| e.path().to_path_buf())
        .collect();
    txt_files.sort();
    txt_files
}
