use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::ingest::count_rows;
use crate::commands::inventory::INVENTORY_MANIFEST_NAME;
use crate::model::{DocumentInventoryManifest, IngestRunManifest};
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = args.input_root.join("manifests");
    let inventory_path = manifest_dir.join(INVENTORY_MANIFEST_NAME);

    info!(input_root = %args.input_root.display(), "status requested");

    if inventory_path.exists() {
        let inventory: DocumentInventoryManifest = read_json(&inventory_path)?;
        info!(
            generated_at = %inventory.generated_at,
            document_count = inventory.document_count,
            "loaded inventory manifest"
        );
    } else {
        warn!(path = %inventory_path.display(), "inventory manifest missing");
    }

    match latest_ingest_manifest(&manifest_dir)? {
        Some(path) => {
            let manifest: IngestRunManifest = read_json(&path)?;
            info!(
                path = %path.display(),
                run_id = %manifest.run_id,
                status = %manifest.status,
                updated_at = %manifest.updated_at,
                processed = manifest.counts.processed_document_count,
                failed = manifest.counts.failed_document_count,
                entities_accepted = manifest.counts.entities_accepted,
                entities_ambiguous = manifest.counts.entities_ambiguous,
                entities_rejected = manifest.counts.entities_rejected,
                chunks = manifest.counts.chunks,
                "loaded latest ingest manifest"
            );
            for failure in &manifest.failures {
                warn!(doc_id = %failure.doc_id, reason = %failure.reason, "document failed in last run");
            }
        }
        None => warn!(path = %manifest_dir.display(), "no ingest run manifest found"),
    }

    let Some(db_path) = args.db_path else {
        return Ok(());
    };
    if db_path.exists() {
        let conn = Connection::open(&db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        let docs_count = count_rows(&conn, "SELECT COUNT(*) FROM docs").unwrap_or(0);
        let entities_count = count_rows(&conn, "SELECT COUNT(*) FROM entities").unwrap_or(0);
        let chunks_count = count_rows(&conn, "SELECT COUNT(*) FROM chunks").unwrap_or(0);
        let warnings_count = count_rows(&conn, "SELECT COUNT(*) FROM warnings").unwrap_or(0);

        info!(
            path = %db_path.display(),
            docs = docs_count,
            entities = entities_count,
            chunks = chunks_count,
            warnings = warnings_count,
            "artifact store status"
        );
    } else {
        warn!(path = %db_path.display(), "artifact store missing");
    }

    Ok(())
}

/// Run manifests are named with a UTC timestamp, so the lexicographic maximum is the newest.
fn latest_ingest_manifest(manifest_dir: &Path) -> Result<Option<PathBuf>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<PathBuf> = None;
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to read {}", manifest_dir.display()))?
    {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", manifest_dir.display()))?
            .path();
        let is_run_manifest = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with("ingest_run_") && name.ends_with(".json"))
            .unwrap_or(false);
        if is_run_manifest && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }

    Ok(latest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_ingest_manifest_picks_newest_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in [
            "ingest_run_20240101T000000Z.json",
            "ingest_run_20250301T120000Z.json",
            "document_inventory.json",
        ] {
            fs::write(dir.path().join(name), "{}").expect("write manifest");
        }

        let latest = latest_ingest_manifest(dir.path())
            .expect("scan")
            .expect("manifest present");
        assert!(latest.ends_with("ingest_run_20250301T120000Z.json"));
    }

    #[test]
    fn latest_ingest_manifest_handles_missing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("manifests");
        assert_eq!(latest_ingest_manifest(&missing).expect("scan"), None);
    }
}
