use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

use crate::cli::InventoryArgs;
use crate::model::{DocumentEntry, DocumentInventoryManifest};
use crate::util::{now_utc_string, sha256_file, write_json_pretty};

pub const INVENTORY_MANIFEST_NAME: &str = "document_inventory.json";

pub fn run(args: InventoryArgs) -> Result<()> {
    let manifest = build_manifest(&args.input_root)?;

    if args.dry_run {
        info!(
            document_count = manifest.document_count,
            source = %manifest.source_directory,
            "inventory dry-run complete"
        );
        return Ok(());
    }

    let manifest_path = args
        .manifest_path
        .unwrap_or_else(|| args.input_root.join("manifests").join(INVENTORY_MANIFEST_NAME));

    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote inventory manifest");
    info!(document_count = manifest.document_count, "inventory completed");

    Ok(())
}

/// Only the fields the inventory needs; full validation happens at ingest.
#[derive(Debug, Deserialize)]
struct DocumentHeader {
    doc_id: String,
    #[serde(default)]
    pages: Vec<serde_json::Value>,
}

pub fn build_manifest(input_root: &Path) -> Result<DocumentInventoryManifest> {
    let mut paths = discover_documents(input_root)?;
    paths.sort();

    if paths.is_empty() {
        bail!("no document JSON files found in {}", input_root.display());
    }

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned)
            .with_context(|| format!("invalid UTF-8 filename: {}", path.display()))?;
        let sha256 = sha256_file(&path)?;

        let (doc_id, page_count) = match crate::util::read_json::<DocumentHeader>(&path) {
            Ok(header) => (header.doc_id, header.pages.len()),
            Err(err) => {
                // Listed anyway so the ingest run reports the failure for this file.
                warn!(path = %path.display(), error = %err, "document header unreadable");
                (file_stem(&path), 0)
            }
        };

        documents.push(DocumentEntry {
            doc_id,
            filename,
            page_count,
            sha256,
        });
    }

    documents.sort_by(|a, b| a.doc_id.cmp(&b.doc_id).then(a.filename.cmp(&b.filename)));
    if let Some(pair) = documents.windows(2).find(|pair| pair[0].doc_id == pair[1].doc_id) {
        bail!(
            "doc_id {} appears in both {} and {}",
            pair[0].doc_id,
            pair[0].filename,
            pair[1].filename
        );
    }

    Ok(DocumentInventoryManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        source_directory: input_root.display().to_string(),
        document_count: documents.len(),
        documents,
    })
}

fn discover_documents(input_root: &Path) -> Result<Vec<PathBuf>> {
    let mut documents = Vec::new();

    let entries = fs::read_dir(input_root)
        .with_context(|| format!("failed to read {}", input_root.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", input_root.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            documents.push(path);
        }
    }

    Ok(documents)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_manifest_lists_json_documents_sorted_by_doc_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("b.json"),
            r#"{"doc_id":"DIR-002","pages":[{"page_number":1,"text":"x"}]}"#,
        )
        .expect("write b");
        fs::write(
            dir.path().join("a.json"),
            r#"{"doc_id":"DIR-001","pages":[{"page_number":1,"text":"x"},{"page_number":2,"text":"y"}]}"#,
        )
        .expect("write a");
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write notes");

        let manifest = build_manifest(dir.path()).expect("manifest");
        assert_eq!(manifest.document_count, 2);
        assert_eq!(manifest.documents[0].doc_id, "DIR-001");
        assert_eq!(manifest.documents[0].page_count, 2);
        assert_eq!(manifest.documents[1].filename, "b.json");
        assert_eq!(manifest.documents[0].sha256.len(), 64);
    }

    #[test]
    fn build_manifest_keeps_unreadable_documents_under_their_file_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("broken.json"), "{not json").expect("write broken");

        let manifest = build_manifest(dir.path()).expect("manifest");
        assert_eq!(manifest.documents[0].doc_id, "broken");
        assert_eq!(manifest.documents[0].page_count, 0);
    }

    #[test]
    fn build_manifest_rejects_empty_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(build_manifest(dir.path()).is_err());
    }
}
