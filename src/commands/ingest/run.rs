use super::*;

use chrono::Utc;
use rayon::prelude::*;

use crate::commands::inventory;
use crate::model::{
    DocumentEntry, DocumentFailure, DocumentInventoryManifest, DocumentRunSummary, IngestCounts,
    IngestPaths, IngestRunManifest,
};
use crate::util::{ensure_directory, utc_compact_string, write_json_pretty};

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let input_root = args.input_root.clone();
    let manifest_dir = input_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let inventory_manifest_path = args
        .inventory_manifest_path
        .clone()
        .unwrap_or_else(|| manifest_dir.join(inventory::INVENTORY_MANIFEST_NAME));
    let ingest_manifest_path = args.ingest_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| input_root.join("artifacts"));
    ensure_directory(&output_dir)?;

    info!(input_root = %input_root.display(), run_id = %run_id, "starting ingest");

    let inventory = load_or_refresh_inventory(
        &input_root,
        &inventory_manifest_path,
        args.refresh_inventory,
    )?;
    let selected = select_documents(&inventory, &args.doc_ids)?;

    let dictionary = load_dictionary(args.dictionary_path.as_deref())?;
    let pipeline = DirectivePipeline::new(PipelineConfig::from_args(&args), &dictionary)?;

    let mut connection = args.db_path.as_deref().map(open_store).transpose()?;

    // Documents are independent; results come back in inventory order.
    let results = selected
        .par_iter()
        .map(|entry| {
            let path = input_root.join(&entry.filename);
            load_document_input(&path).and_then(|input| pipeline.process(&input, &started_at))
        })
        .collect::<Vec<_>>();

    let mut counts = IngestCounts {
        document_count: selected.len(),
        ..IngestCounts::default()
    };
    let mut documents = Vec::new();
    let mut failures = Vec::new();

    for (entry, result) in selected.iter().zip(results) {
        let output = match result {
            Ok(output) => output,
            Err(err) => {
                warn!(doc_id = %entry.doc_id, error = %err, "document failed");
                failures.push(DocumentFailure {
                    doc_id: entry.doc_id.clone(),
                    filename: entry.filename.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        for warning in &output.entities.warnings {
            warn!(
                doc_id = %output.entities.doc_id,
                kind = ?warning.kind,
                page = ?warning.page,
                message = %warning.message,
                "validation warning"
            );
        }

        let stem = artifact_stem(&output.entities.doc_id);
        let entities_path = output_dir.join(format!("{stem}.entities.json"));
        let chunks_path = output_dir.join(format!("{stem}.chunks.json"));
        write_json_pretty(&entities_path, &output.entities)?;
        write_json_pretty(&chunks_path, &output.chunks)?;

        if let Some(connection) = connection.as_mut() {
            write_document(connection, &output, &entry.sha256, &started_at)?;
        }

        accumulate_counts(&mut counts, &output);
        documents.push(DocumentRunSummary {
            doc_id: output.entities.doc_id.clone(),
            source_sha256: entry.sha256.clone(),
            entities_path: entities_path.display().to_string(),
            chunks_path: chunks_path.display().to_string(),
            confidence: output.entities.confidence,
            chunk_strategy: output.chunk_strategy,
            chunks: output.chunks.len(),
            warnings: output.entities.warnings.len(),
        });
    }
    counts.failed_document_count = failures.len();

    let status = if failures.is_empty() {
        "completed"
    } else {
        "completed_with_failures"
    };
    let warnings = failures
        .iter()
        .map(|failure| format!("{}: {}", failure.doc_id, failure.reason))
        .collect::<Vec<String>>();

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id: run_id.clone(),
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_ingest_command(&args),
        paths: IngestPaths {
            input_root: input_root.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            inventory_manifest_path: inventory_manifest_path.display().to_string(),
            output_dir: output_dir.display().to_string(),
            db_path: args.db_path.as_ref().map(|path| path.display().to_string()),
        },
        counts,
        documents,
        failures,
        warnings,
        notes: vec![
            format!("artifact schema version {ARTIFACT_SCHEMA_VERSION}"),
            format!(
                "pipeline config: {}",
                serde_json::to_string(pipeline.config()).context("failed to serialize pipeline config")?
            ),
        ],
    };

    write_json_pretty(&ingest_manifest_path, &manifest)?;

    info!(path = %ingest_manifest_path.display(), "wrote ingest run manifest");
    info!(
        run_id = %run_id,
        processed = manifest.counts.processed_document_count,
        failed = manifest.counts.failed_document_count,
        chunks = manifest.counts.chunks,
        "ingest completed"
    );

    Ok(())
}

fn load_or_refresh_inventory(
    input_root: &Path,
    inventory_manifest_path: &Path,
    refresh_inventory: bool,
) -> Result<DocumentInventoryManifest> {
    if refresh_inventory || !inventory_manifest_path.exists() {
        let manifest = inventory::build_manifest(input_root)?;
        write_json_pretty(inventory_manifest_path, &manifest)?;
        info!(
            path = %inventory_manifest_path.display(),
            document_count = manifest.document_count,
            "refreshed inventory manifest"
        );
        return Ok(manifest);
    }

    let manifest: DocumentInventoryManifest = crate::util::read_json(inventory_manifest_path)?;
    info!(
        path = %inventory_manifest_path.display(),
        document_count = manifest.document_count,
        "loaded existing inventory manifest"
    );

    Ok(manifest)
}

fn select_documents(
    inventory: &DocumentInventoryManifest,
    doc_ids: &[String],
) -> Result<Vec<DocumentEntry>> {
    if doc_ids.is_empty() {
        return Ok(inventory.documents.clone());
    }

    let known = inventory
        .documents
        .iter()
        .map(|entry| entry.doc_id.as_str())
        .collect::<HashSet<&str>>();
    if let Some(missing) = doc_ids.iter().find(|doc_id| !known.contains(doc_id.as_str())) {
        bail!("doc_id {missing} is not in the inventory");
    }

    let wanted = doc_ids.iter().map(String::as_str).collect::<HashSet<&str>>();
    Ok(inventory
        .documents
        .iter()
        .filter(|entry| wanted.contains(entry.doc_id.as_str()))
        .cloned()
        .collect())
}

fn accumulate_counts(counts: &mut IngestCounts, output: &PipelineOutput) {
    let entities = &output.entities;
    counts.processed_document_count += 1;
    counts.page_count += entities.page_count;
    counts.header_lines_removed += output.normalization.header_lines_removed;
    counts.footer_lines_removed += output.normalization.footer_lines_removed;
    counts.page_number_lines_removed += output.normalization.page_number_lines_removed;
    counts.dehyphenation_merges += output.normalization.dehyphenation_merges;
    counts.section_nodes += entities.sections.nodes.len();
    counts.synthetic_section_nodes += entities
        .sections
        .nodes
        .iter()
        .filter(|node| node.synthetic)
        .count();
    counts.structural_anomalies += entities.anomalies.len();
    counts.ner_candidates += output.ner_candidates;
    counts.table_candidates += output.table_candidates;
    for entity in &entities.entities {
        match entity.status {
            ValidationStatus::Accepted => counts.entities_accepted += 1,
            ValidationStatus::Ambiguous => counts.entities_ambiguous += 1,
            ValidationStatus::Rejected => counts.entities_rejected += 1,
        }
    }
    counts.validation_warnings += entities.warnings.len();
    counts.chunks += output.chunks.len();
}

fn artifact_stem(doc_id: &str) -> String {
    doc_id
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn render_ingest_command(args: &IngestArgs) -> String {
    let mut command = vec![
        "directive-chunker".to_string(),
        "ingest".to_string(),
        "--input-root".to_string(),
        args.input_root.display().to_string(),
        "--chunk-strategy".to_string(),
        args.chunk_strategy.as_str().to_string(),
        "--max-chunk-words".to_string(),
        args.max_chunk_words.to_string(),
        "--overlap-words".to_string(),
        args.overlap_words.to_string(),
        "--amount-ceiling".to_string(),
        args.amount_ceiling.to_string(),
        "--confidence-threshold".to_string(),
        args.confidence_threshold.to_string(),
        "--merge-comparability".to_string(),
        args.merge_comparability.to_string(),
        "--amount-tolerance".to_string(),
        args.amount_tolerance.to_string(),
    ];

    let optional_paths: [(&str, Option<&PathBuf>); 5] = [
        ("--inventory-manifest-path", args.inventory_manifest_path.as_ref()),
        ("--ingest-manifest-path", args.ingest_manifest_path.as_ref()),
        ("--output-dir", args.output_dir.as_ref()),
        ("--db-path", args.db_path.as_ref()),
        ("--dictionary-path", args.dictionary_path.as_ref()),
    ];
    for (flag, path) in optional_paths {
        if let Some(path) = path {
            command.push(flag.to_string());
            command.push(path.display().to_string());
        }
    }
    if let Some(year) = args.publication_year {
        command.push("--publication-year".to_string());
        command.push(year.to_string());
    }
    if args.refresh_inventory {
        command.push("--refresh-inventory".to_string());
    }
    for doc_id in &args.doc_ids {
        command.push("--doc-id".to_string());
        command.push(doc_id.clone());
    }

    command.join(" ")
}
