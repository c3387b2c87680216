use super::*;

pub fn open_store(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        crate::util::ensure_directory(parent)?;
    }
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;
    Ok(connection)
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS docs (
          doc_id TEXT PRIMARY KEY,
          title TEXT,
          code TEXT,
          source_sha256 TEXT NOT NULL,
          page_count INTEGER NOT NULL,
          confidence REAL NOT NULL,
          chunk_strategy TEXT NOT NULL,
          processed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS section_nodes (
          doc_id TEXT NOT NULL,
          node_idx INTEGER NOT NULL,
          numeral TEXT NOT NULL,
          parent_numeral TEXT,
          title TEXT NOT NULL,
          level INTEGER NOT NULL,
          synthetic INTEGER NOT NULL,
          page_start INTEGER NOT NULL,
          page_end INTEGER NOT NULL,
          offset_start INTEGER NOT NULL,
          offset_end INTEGER NOT NULL,
          PRIMARY KEY (doc_id, node_idx),
          FOREIGN KEY(doc_id) REFERENCES docs(doc_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS entities (
          doc_id TEXT NOT NULL,
          entity_idx INTEGER NOT NULL,
          kind TEXT NOT NULL,
          raw TEXT NOT NULL,
          value TEXT NOT NULL,
          role TEXT,
          page INTEGER NOT NULL,
          offset_start INTEGER NOT NULL,
          confidence REAL NOT NULL,
          origin TEXT NOT NULL,
          status TEXT NOT NULL,
          PRIMARY KEY (doc_id, entity_idx),
          FOREIGN KEY(doc_id) REFERENCES docs(doc_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS chunks (
          chunk_id TEXT PRIMARY KEY,
          doc_id TEXT NOT NULL,
          chunk_seq INTEGER NOT NULL,
          source TEXT NOT NULL,
          hierarchy_path TEXT NOT NULL,
          page_start INTEGER NOT NULL,
          page_end INTEGER NOT NULL,
          text TEXT NOT NULL,
          entities_json TEXT NOT NULL,
          content_tags TEXT NOT NULL,
          confidence REAL NOT NULL,
          content_hash TEXT NOT NULL,
          created_at TEXT NOT NULL,
          FOREIGN KEY(doc_id) REFERENCES docs(doc_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS warnings (
          doc_id TEXT NOT NULL,
          warning_idx INTEGER NOT NULL,
          kind TEXT NOT NULL,
          message TEXT NOT NULL,
          page INTEGER,
          offset_start INTEGER,
          PRIMARY KEY (doc_id, warning_idx),
          FOREIGN KEY(doc_id) REFERENCES docs(doc_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_chunks_doc_seq ON chunks(doc_id, chunk_seq);
        CREATE INDEX IF NOT EXISTS idx_entities_doc_kind ON entities(doc_id, kind);
        CREATE INDEX IF NOT EXISTS idx_section_nodes_doc_numeral ON section_nodes(doc_id, numeral);
        ",
        )
        .context("failed to initialize artifact schema")?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('artifact_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [ARTIFACT_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('store_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now_utc_string()],
    )?;

    Ok(())
}

/// Replaces every row of one document in a single transaction.
pub fn write_document(
    connection: &mut Connection,
    output: &PipelineOutput,
    source_sha256: &str,
    processed_at: &str,
) -> Result<()> {
    let entities = &output.entities;
    let doc_id = entities.doc_id.as_str();
    let tx = connection
        .transaction()
        .with_context(|| format!("failed to open transaction for {doc_id}"))?;

    tx.execute("DELETE FROM docs WHERE doc_id = ?1", [doc_id])?;
    tx.execute(
        "INSERT INTO docs(doc_id, title, code, source_sha256, page_count, confidence, chunk_strategy, processed_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            doc_id,
            entities.title,
            entities.code,
            source_sha256,
            entities.page_count as i64,
            entities.confidence,
            output.chunk_strategy.as_str(),
            processed_at
        ],
    )?;

    {
        let mut statement = tx.prepare(
            "INSERT INTO section_nodes(
               doc_id, node_idx, numeral, parent_numeral, title, level, synthetic,
               page_start, page_end, offset_start, offset_end
             )
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for node in &entities.sections.nodes {
            statement.execute(params![
                doc_id,
                node.id as i64,
                node.numeral,
                node.parent,
                node.title,
                node.level as i64,
                node.synthetic,
                node.span.start_page,
                node.span.end_page,
                node.span.start_offset as i64,
                node.span.end_offset as i64
            ])?;
        }
    }

    {
        let mut statement = tx.prepare(
            "INSERT INTO entities(
               doc_id, entity_idx, kind, raw, value, role, page, offset_start, confidence, origin, status
             )
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for (index, entity) in entities.entities.iter().enumerate() {
            let candidate = &entity.candidate;
            statement.execute(params![
                doc_id,
                index as i64,
                candidate.kind.as_str(),
                candidate.raw,
                candidate.value.canonical(),
                candidate.role.map(RoleCategory::as_str),
                candidate.page,
                candidate.offset as i64,
                candidate.confidence,
                enum_label(&candidate.origin)?,
                enum_label(&entity.status)?
            ])?;
        }
    }

    {
        let mut statement = tx.prepare(
            "INSERT INTO chunks(
               chunk_id, doc_id, chunk_seq, source, hierarchy_path, page_start, page_end,
               text, entities_json, content_tags, confidence, content_hash, created_at
             )
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )?;
        for chunk in &output.chunks {
            let entities_json = serde_json::to_string(&chunk.entities)
                .with_context(|| format!("failed to serialize entities for {}", chunk.id))?;
            statement.execute(params![
                chunk.id,
                doc_id,
                chunk.seq as i64,
                enum_label(&chunk.source)?,
                chunk.hierarchy_path.join(" > "),
                chunk.pages.start,
                chunk.pages.end,
                chunk.text,
                entities_json,
                chunk.content_tags.join(","),
                chunk.confidence,
                chunk.content_hash,
                chunk.created_at
            ])?;
        }
    }

    {
        let mut statement = tx.prepare(
            "INSERT INTO warnings(doc_id, warning_idx, kind, message, page, offset_start)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for (index, warning) in entities.warnings.iter().enumerate() {
            statement.execute(params![
                doc_id,
                index as i64,
                enum_label(&warning.kind)?,
                warning.message,
                warning.page,
                warning.offset.map(|offset| offset as i64)
            ])?;
        }
    }

    tx.commit()
        .with_context(|| format!("failed to commit artifacts for {doc_id}"))?;
    debug!(doc_id, chunks = output.chunks.len(), "stored document artifacts");
    Ok(())
}

pub fn count_rows(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}

/// The serde name of a unit enum variant, matching the JSON artifacts.
fn enum_label<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value).context("failed to serialize enum label")? {
        serde_json::Value::String(label) => Ok(label),
        other => bail!("expected a string label, got {other}"),
    }
}
