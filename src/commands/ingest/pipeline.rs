use super::*;

use thiserror::Error;

/// Everything an extractor may look at for one document.
pub struct ExtractionInput<'a> {
    pub document: &'a DocumentText,
    pub pages: &'a [Page],
    pub publication_year: Option<i32>,
}

/// A source of entity candidates; the recognizer and the table extractor are interchangeable here.
pub trait CandidateExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, input: &ExtractionInput<'_>) -> Vec<EntityCandidate>;
}

impl CandidateExtractor for LegalEntityRecognizer {
    fn name(&self) -> &'static str {
        "legal_entity_recognizer"
    }

    fn extract(&self, input: &ExtractionInput<'_>) -> Vec<EntityCandidate> {
        self.recognize(input.document, input.publication_year)
    }
}

impl CandidateExtractor for RobustTableExtractor {
    fn name(&self) -> &'static str {
        "robust_table_extractor"
    }

    fn extract(&self, input: &ExtractionInput<'_>) -> Vec<EntityCandidate> {
        self.extract_tables(input)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document {path} could not be read: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("document {doc_id} has no pages")]
    NoPages { doc_id: String },

    #[error("document {doc_id} has no text on any page")]
    BlankDocument { doc_id: String },

    #[error("document {doc_id}: page number {found} after {previous}; pages must increase from 1")]
    PageOrder {
        doc_id: String,
        previous: u32,
        found: u32,
    },

    #[error("document {doc_id}: page {page} confidence {confidence} is outside [0, 1]")]
    PageConfidence {
        doc_id: String,
        page: u32,
        confidence: f64,
    },

    #[error("document {doc_id}: {stage} failed")]
    Stage {
        doc_id: String,
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

pub fn load_document_input(path: &Path) -> Result<DocumentInput, PipelineError> {
    crate::util::read_json::<DocumentInput>(path).map_err(|err| PipelineError::Unreadable {
        path: path.display().to_string(),
        reason: format!("{err:#}"),
    })
}

pub fn validate_source(input: &DocumentInput) -> Result<(), PipelineError> {
    let doc_id = || input.doc_id.clone();
    if input.pages.is_empty() {
        return Err(PipelineError::NoPages { doc_id: doc_id() });
    }

    let mut previous = 0u32;
    for page in &input.pages {
        if page.page_number <= previous {
            return Err(PipelineError::PageOrder {
                doc_id: doc_id(),
                previous,
                found: page.page_number,
            });
        }
        if !(0.0..=1.0).contains(&page.confidence) {
            return Err(PipelineError::PageConfidence {
                doc_id: doc_id(),
                page: page.page_number,
                confidence: page.confidence,
            });
        }
        previous = page.page_number;
    }

    if input.pages.iter().all(|page| page.text.trim().is_empty()) {
        return Err(PipelineError::BlankDocument { doc_id: doc_id() });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub chunk_strategy: ChunkStrategy,
    pub max_chunk_words: usize,
    pub overlap_words: usize,
    pub amount_ceiling: f64,
    pub confidence_threshold: f64,
    pub merge_comparability: f64,
    pub amount_tolerance: f64,
    pub publication_year: Option<i32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_strategy: ChunkStrategy::Hierarchical,
            max_chunk_words: 350,
            overlap_words: 40,
            amount_ceiling: 10_000.0,
            confidence_threshold: 0.35,
            merge_comparability: 0.15,
            amount_tolerance: 0.01,
            publication_year: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_args(args: &IngestArgs) -> Self {
        Self {
            chunk_strategy: args.chunk_strategy,
            max_chunk_words: args.max_chunk_words,
            overlap_words: args.overlap_words,
            amount_ceiling: args.amount_ceiling,
            confidence_threshold: args.confidence_threshold,
            merge_comparability: args.merge_comparability,
            amount_tolerance: args.amount_tolerance,
            publication_year: args.publication_year,
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.max_chunk_words == 0 {
            bail!("max chunk words must be positive");
        }
        if self.overlap_words >= self.max_chunk_words {
            bail!(
                "overlap ({}) must be smaller than max chunk words ({})",
                self.overlap_words,
                self.max_chunk_words
            );
        }
        if self.amount_ceiling.is_nan() || self.amount_ceiling <= 0.0 {
            bail!("amount ceiling must be positive, got {}", self.amount_ceiling);
        }
        for (name, value) in [
            ("confidence threshold", self.confidence_threshold),
            ("merge comparability", self.merge_comparability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be within [0, 1], got {value}");
            }
        }
        if self.amount_tolerance < 0.0 {
            bail!("amount tolerance must not be negative");
        }
        Ok(())
    }

    fn validation_settings(&self) -> ValidationSettings {
        ValidationSettings {
            amount_ceiling_cents: (self.amount_ceiling * 100.0).round() as i64,
            confidence_threshold: self.confidence_threshold,
            merge_comparability: self.merge_comparability,
            tolerance_cents: (self.amount_tolerance * 100.0).round() as i64,
            ..ValidationSettings::default()
        }
    }

    fn chunker_settings(&self) -> ChunkerSettings {
        ChunkerSettings {
            strategy: self.chunk_strategy,
            max_words: self.max_chunk_words,
            overlap_words: self.overlap_words,
            confidence_threshold: self.confidence_threshold,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub entities: DocumentEntities,
    pub chunks: Vec<Chunk>,
    pub normalization: NormalizationStats,
    pub ner_candidates: usize,
    pub table_candidates: usize,
    pub chunk_strategy: ChunkStrategy,
}

/// All stages built once and reused for every document of a run.
#[derive(Debug)]
pub struct DirectivePipeline {
    config: PipelineConfig,
    analyzer: StructureAnalyzer,
    recognizer: LegalEntityRecognizer,
    tables: RobustTableExtractor,
    validator: EntityValidator,
    chunker: IntelligentChunker,
}

impl DirectivePipeline {
    pub fn new(config: PipelineConfig, dictionary: &DomainDictionary) -> Result<Self> {
        config.check()?;
        Ok(Self {
            analyzer: StructureAnalyzer::new()?,
            recognizer: LegalEntityRecognizer::new(dictionary, RecognizerSettings::default())?,
            tables: RobustTableExtractor::new(dictionary, config.amount_tolerance)?,
            validator: EntityValidator::new(config.validation_settings(), dictionary.kind_weights),
            chunker: IntelligentChunker::new(config.chunker_settings(), dictionary),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// `created_at` stamps every chunk, so reprocessing with the same value is byte-identical.
    pub fn process(
        &self,
        input: &DocumentInput,
        created_at: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        validate_source(input)?;

        let (pages, normalization) =
            normalize_pages(&input.pages).map_err(|source| PipelineError::Stage {
                doc_id: input.doc_id.clone(),
                stage: "page normalization",
                source,
            })?;
        let document = DocumentText::from_pages(&pages);
        let extraction = ExtractionInput {
            document: &document,
            pages: &pages,
            publication_year: input.publication_year.or(self.config.publication_year),
        };

        let (outline, (ner, table)) = rayon::join(
            || self.analyzer.analyze(&document, &pages),
            || {
                rayon::join(
                    || self.recognizer.extract(&extraction),
                    || self.tables.extract(&extraction),
                )
            },
        );
        let ner = weight_by_page_confidence(ner, &pages);
        let table = weight_by_page_confidence(table, &pages);
        let (ner_candidates, table_candidates) = (ner.len(), table.len());
        debug!(
            doc_id = %input.doc_id,
            extractor = self.recognizer.name(),
            candidates = ner_candidates,
            "candidates extracted"
        );
        debug!(
            doc_id = %input.doc_id,
            extractor = self.tables.name(),
            candidates = table_candidates,
            "candidates extracted"
        );

        let outcome = self.validator.validate(ner, table, &outline, &pages);
        let chunks = self.chunker.chunk(&ChunkingInput {
            doc_id: &input.doc_id,
            document: &document,
            pages: &pages,
            tree: &outline.tree,
            entities: &outcome.entities,
            created_at,
        });

        info!(
            doc_id = %input.doc_id,
            pages = pages.len(),
            sections = outline.tree.nodes.len(),
            entities = outcome.entities.len(),
            chunks = chunks.len(),
            confidence = outcome.confidence,
            "processed document"
        );

        Ok(PipelineOutput {
            chunk_strategy: self.chunker.effective_strategy(&outline.tree),
            entities: DocumentEntities {
                doc_id: input.doc_id.clone(),
                title: input.title.clone(),
                code: input.code.clone(),
                page_count: pages.len(),
                sections: outline.tree,
                anomalies: outline.anomalies,
                entities: outcome.entities,
                confidence: outcome.confidence,
                warnings: outcome.warnings,
            },
            chunks,
            normalization,
            ner_candidates,
            table_candidates,
        })
    }
}

/// Scales each candidate by the OCR confidence of the page it was read from.
fn weight_by_page_confidence(candidates: Vec<EntityCandidate>, pages: &[Page]) -> Vec<EntityCandidate> {
    let by_page = pages
        .iter()
        .map(|page| (page.page_number, page.confidence))
        .collect::<HashMap<u32, f64>>();
    candidates
        .into_iter()
        .map(|mut candidate| {
            let page_confidence = by_page.get(&candidate.page).copied().unwrap_or(1.0);
            candidate.confidence *= 0.5 + 0.5 * page_confidence;
            candidate
        })
        .collect()
}
