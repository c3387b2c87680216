use super::*;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerSettings {
    pub strategy: ChunkStrategy,
    pub max_words: usize,
    pub overlap_words: usize,
    pub confidence_threshold: f64,
}

impl Default for ChunkerSettings {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Hierarchical,
            max_words: 350,
            overlap_words: 40,
            confidence_threshold: 0.35,
        }
    }
}

pub struct ChunkingInput<'a> {
    pub doc_id: &'a str,
    pub document: &'a DocumentText,
    pub pages: &'a [Page],
    pub tree: &'a SectionTree,
    pub entities: &'a [ValidatedEntity],
    pub created_at: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    start: usize,
    end: usize,
    source: ChunkSource,
    path: Vec<String>,
}

#[derive(Debug)]
pub struct IntelligentChunker {
    settings: ChunkerSettings,
    tag_keywords: Vec<(String, Vec<String>)>,
}

impl IntelligentChunker {
    pub fn new(settings: ChunkerSettings, dictionary: &DomainDictionary) -> Self {
        let tag_keywords = dictionary
            .content_tags
            .iter()
            .map(|(tag, keywords)| {
                (
                    tag.clone(),
                    keywords.iter().map(|keyword| fold_text(keyword)).collect(),
                )
            })
            .collect();
        Self {
            settings: ChunkerSettings {
                max_words: settings.max_words.max(1),
                overlap_words: settings.overlap_words.min(settings.max_words.saturating_sub(1)),
                ..settings
            },
            tag_keywords,
        }
    }

    /// The strategy actually applied; structural modes need a usable section tree.
    pub fn effective_strategy(&self, tree: &SectionTree) -> ChunkStrategy {
        if tree.is_usable() {
            self.settings.strategy
        } else {
            ChunkStrategy::Flat
        }
    }

    pub fn chunk(&self, input: &ChunkingInput<'_>) -> Vec<Chunk> {
        let strategy = self.effective_strategy(input.tree);
        if strategy != self.settings.strategy {
            info!(
                doc_id = input.doc_id,
                requested = self.settings.strategy.as_str(),
                applied = strategy.as_str(),
                "section tree unusable; falling back to flat chunking"
            );
        }

        let mut segments = match strategy {
            ChunkStrategy::Hierarchical => self.hierarchical_segments(input),
            ChunkStrategy::Hybrid => self.hybrid_segments(input),
            ChunkStrategy::Flat => self.window_segments(input, 0, input.document.len(), |start| {
                flat_path(input.tree, start)
            }),
        };
        segments.extend(uncovered_page_segments(input.document, &segments));
        segments.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

        let mut kept = segments
            .into_iter()
            .filter_map(|segment| {
                let text = input.document.slice(segment.start, segment.end).trim();
                (!text.is_empty()).then(|| (segment, text.to_string()))
            })
            .collect::<Vec<(Segment, String)>>();
        absorb_blank_pages(input.document, &mut kept);

        let chunks = kept
            .into_iter()
            .enumerate()
            .map(|(seq, (segment, text))| self.build_chunk(input, seq, segment, text))
            .collect::<Vec<Chunk>>();

        debug!(
            doc_id = input.doc_id,
            strategy = strategy.as_str(),
            chunks = chunks.len(),
            "chunking complete"
        );
        chunks
    }

    /// Front matter followed by each section's own text, split when oversized.
    fn hierarchical_segments(&self, input: &ChunkingInput<'_>) -> Vec<Segment> {
        own_text_segments(input.document, input.tree)
            .into_iter()
            .flat_map(|segment| self.split_oversized(input.document, segment))
            .collect()
    }

    /// Sections holding amounts or roles stay whole; runs of other sections are windowed.
    fn hybrid_segments(&self, input: &ChunkingInput<'_>) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut run = Vec::<Segment>::new();

        let flush = |run: &mut Vec<Segment>, segments: &mut Vec<Segment>| {
            let (Some(first), Some(last)) = (run.first(), run.last()) else {
                return;
            };
            let path = common_prefix(run.iter().map(|segment| segment.path.as_slice()));
            let (start, end) = (first.start, last.end);
            segments.extend(self.window_segments(input, start, end, |_| path.clone()));
            run.clear();
        };

        for segment in own_text_segments(input.document, input.tree) {
            let high_value = segment.source == ChunkSource::Section
                && input.entities.iter().any(|entity| {
                    matches!(entity.kind(), EntityKind::Amount | EntityKind::Role)
                        && entity.status != ValidationStatus::Rejected
                        && segment.start <= entity.offset()
                        && entity.offset() < segment.end
                });
            if high_value {
                flush(&mut run, &mut segments);
                segments.extend(self.split_oversized(input.document, segment));
            } else {
                run.push(segment);
            }
        }
        flush(&mut run, &mut segments);

        segments
    }

    fn window_segments(
        &self,
        input: &ChunkingInput<'_>,
        start: usize,
        end: usize,
        path_at: impl Fn(usize) -> Vec<String>,
    ) -> Vec<Segment> {
        word_windows(
            input.document.slice(start, end),
            start,
            self.settings.max_words,
            self.settings.overlap_words,
        )
        .into_iter()
        .map(|(window_start, window_end)| Segment {
            start: window_start,
            end: window_end,
            source: ChunkSource::Window,
            path: path_at(window_start),
        })
        .collect()
    }

    /// Splits on line boundaries first; a single oversized line falls back to word windows.
    fn split_oversized(&self, document: &DocumentText, segment: Segment) -> Vec<Segment> {
        let text = document.slice(segment.start, segment.end);
        if text.split_whitespace().count() <= self.settings.max_words {
            return vec![segment];
        }

        let mut pieces = Vec::<(usize, usize)>::new();
        let mut piece_start = segment.start;
        let mut piece_words = 0usize;
        let mut offset = segment.start;

        for line in text.split_inclusive('\n') {
            let line_words = line.split_whitespace().count();
            let line_start = offset;
            offset += line.len();

            if line_words > self.settings.max_words {
                if line_start > piece_start {
                    pieces.push((piece_start, line_start));
                }
                pieces.extend(word_windows(line, line_start, self.settings.max_words, 0));
                piece_start = offset;
                piece_words = 0;
                continue;
            }
            if piece_words + line_words > self.settings.max_words && piece_words > 0 {
                pieces.push((piece_start, line_start));
                piece_start = line_start;
                piece_words = 0;
            }
            piece_words += line_words;
        }
        if segment.end > piece_start {
            pieces.push((piece_start, segment.end));
        }

        pieces
            .into_iter()
            .map(|(start, end)| Segment {
                start,
                end,
                source: segment.source,
                path: segment.path.clone(),
            })
            .collect()
    }

    fn build_chunk(&self, input: &ChunkingInput<'_>, seq: usize, segment: Segment, text: String) -> Chunk {
        let mut entities = EntityPayload::default();
        for entity in input.entities {
            if entity.status != ValidationStatus::Rejected
                && entity.confidence() >= self.settings.confidence_threshold
                && segment.start <= entity.offset()
                && entity.offset() < segment.end
            {
                entities.push(entity.clone());
            }
        }

        let pages = input.document.page_range(segment.start, segment.end);
        let confidence = if entities.is_empty() {
            let page_confidences = input
                .pages
                .iter()
                .filter(|page| pages.contains(page.page_number))
                .map(|page| page.confidence)
                .collect::<Vec<f64>>();
            if page_confidences.is_empty() {
                1.0
            } else {
                page_confidences.iter().sum::<f64>() / page_confidences.len() as f64
            }
        } else {
            entities.iter().map(ValidatedEntity::confidence).sum::<f64>() / entities.len() as f64
        };

        let content_tags = self.content_tags(&text, &entities);
        let content_hash = sha256_text(&text);

        Chunk {
            id: format!("{}:chunk:{:04}", input.doc_id, seq),
            doc_id: input.doc_id.to_string(),
            seq,
            source: segment.source,
            text,
            hierarchy_path: segment.path,
            pages,
            start_offset: segment.start,
            end_offset: segment.end,
            entities,
            content_tags,
            confidence,
            content_hash,
            created_at: input.created_at.to_string(),
        }
    }

    fn content_tags(&self, text: &str, entities: &EntityPayload) -> Vec<String> {
        let folded = fold_text(text);
        let mut tags = entities
            .iter()
            .map(|entity| entity.kind().as_str().to_string())
            .collect::<std::collections::BTreeSet<String>>();
        for (tag, keywords) in &self.tag_keywords {
            if contains_any_keyword(&folded, keywords) {
                tags.insert(tag.clone());
            }
        }
        tags.into_iter().collect()
    }
}

/// Each node owns the text up to the next heading, so sections never overlap.
fn own_text_segments(document: &DocumentText, tree: &SectionTree) -> Vec<Segment> {
    let mut starts = tree
        .nodes
        .iter()
        .map(|node| (node.span.start_offset, node.id))
        .collect::<Vec<(usize, usize)>>();
    starts.sort();

    let mut segments = Vec::new();
    if let Some((first_start, _)) = starts.first()
        && *first_start > 0
    {
        segments.push(Segment {
            start: 0,
            end: *first_start,
            source: ChunkSource::FrontMatter,
            path: Vec::new(),
        });
    }

    for (index, (start, id)) in starts.iter().enumerate() {
        let end = starts
            .get(index + 1)
            .map(|(next, _)| *next)
            .unwrap_or_else(|| document.len());
        if end <= *start {
            continue;
        }
        segments.push(Segment {
            start: *start,
            end,
            source: ChunkSource::Section,
            path: tree.hierarchy_path(*id),
        });
    }

    segments
}

fn flat_path(tree: &SectionTree, offset: usize) -> Vec<String> {
    tree.innermost_at(offset)
        .map(|node| tree.hierarchy_path(node.id))
        .unwrap_or_default()
}

fn common_prefix<'a>(mut paths: impl Iterator<Item = &'a [String]>) -> Vec<String> {
    let Some(first) = paths.next() else {
        return Vec::new();
    };
    let mut prefix = first.to_vec();
    for path in paths {
        let shared = prefix
            .iter()
            .zip(path)
            .take_while(|(left, right)| left == right)
            .count();
        prefix.truncate(shared);
    }
    prefix
}

/// Byte spans of windows of `max_words` words, consecutive windows sharing `overlap_words`.
/// The first window starts at `base` and the last ends at `base + text.len()`.
pub fn word_windows(text: &str, base: usize, max_words: usize, overlap_words: usize) -> Vec<(usize, usize)> {
    let words = word_spans(text);
    if words.is_empty() {
        return Vec::new();
    }
    if words.len() <= max_words {
        return vec![(base, base + text.len())];
    }

    let mut windows = Vec::new();
    let mut start = 0usize;
    while start < words.len() {
        let end = (start + max_words).min(words.len());
        let window_start = if start == 0 { 0 } else { words[start].0 };
        let window_end = if end == words.len() {
            text.len()
        } else {
            words[end - 1].1
        };
        windows.push((base + window_start, base + window_end));

        if end == words.len() {
            break;
        }
        let mut next_start = end.saturating_sub(overlap_words);
        if next_start <= start {
            next_start = end;
        }
        start = next_start;
    }
    windows
}

fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current = None::<usize>;
    for (index, ch) in text.char_indices() {
        match (ch.is_whitespace(), current) {
            (false, None) => current = Some(index),
            (true, Some(start)) => {
                spans.push((start, index));
                current = None;
            }
            _ => {}
        }
    }
    if let Some(start) = current {
        spans.push((start, text.len()));
    }
    spans
}

/// Stretches chunks back over blank pages left between them, so every page falls
/// inside some chunk's page span.
fn absorb_blank_pages(document: &DocumentText, kept: &mut [(Segment, String)]) {
    let page_starts = (0..document.page_count())
        .map(|index| document.page_bounds(index).0)
        .collect::<Vec<usize>>();

    let mut covered = 0usize;
    for (segment, _) in kept.iter_mut() {
        if let Some(page_start) = page_starts
            .iter()
            .copied()
            .find(|page_start| (covered..segment.start).contains(page_start))
        {
            segment.start = page_start;
        }
        covered = covered.max(segment.end);
    }
    if let Some((last, _)) = kept.last_mut()
        && page_starts.iter().any(|page_start| *page_start >= covered)
    {
        last.end = document.len();
    }
}

/// Page-level chunks for any non-blank text no segment reaches.
fn uncovered_page_segments(document: &DocumentText, segments: &[Segment]) -> Vec<Segment> {
    let mut spans = segments
        .iter()
        .map(|segment| (segment.start, segment.end))
        .collect::<Vec<(usize, usize)>>();
    spans.sort();

    let mut gaps = Vec::<(usize, usize)>::new();
    let mut cursor = 0usize;
    for (start, end) in spans {
        if start > cursor {
            gaps.push((cursor, start));
        }
        cursor = cursor.max(end);
    }
    if cursor < document.len() {
        gaps.push((cursor, document.len()));
    }

    let mut filled = Vec::new();
    for (gap_start, gap_end) in gaps {
        for index in 0..document.page_count() {
            let (page_start, page_end) = document.page_bounds(index);
            let start = gap_start.max(page_start);
            let end = gap_end.min(page_end);
            if start >= end || document.slice(start, end).trim().is_empty() {
                continue;
            }
            filled.push(Segment {
                start,
                end,
                source: ChunkSource::Page,
                path: Vec::new(),
            });
        }
    }
    filled
}
