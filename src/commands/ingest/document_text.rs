use super::*;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NormalizationStats {
    pub header_lines_removed: usize,
    pub footer_lines_removed: usize,
    pub page_number_lines_removed: usize,
    pub dehyphenation_merges: usize,
}

/// Concatenated document text with an index from byte offsets back to pages.
#[derive(Debug, Clone)]
pub struct DocumentText {
    text: String,
    page_starts: Vec<usize>,
    page_numbers: Vec<u32>,
}

impl DocumentText {
    pub fn from_pages(pages: &[Page]) -> Self {
        let mut text = String::new();
        let mut page_starts = Vec::with_capacity(pages.len());
        let mut page_numbers = Vec::with_capacity(pages.len());

        for page in pages {
            page_starts.push(text.len());
            page_numbers.push(page.page_number);
            text.push_str(&page.text);
            text.push('\n');
        }

        Self {
            text,
            page_starts,
            page_numbers,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn page_count(&self) -> usize {
        self.page_numbers.len()
    }

    pub fn page_for_offset(&self, offset: usize) -> u32 {
        let index = self
            .page_starts
            .partition_point(|start| *start <= offset)
            .saturating_sub(1);
        self.page_numbers.get(index).copied().unwrap_or(1)
    }

    /// Byte range `[start, end)` of the page at `index`, separator excluded.
    pub fn page_bounds(&self, index: usize) -> (usize, usize) {
        let start = self.page_starts.get(index).copied().unwrap_or(self.text.len());
        let end = self
            .page_starts
            .get(index + 1)
            .map(|next| next.saturating_sub(1))
            .unwrap_or_else(|| self.text.len().saturating_sub(1));
        (start, end.max(start))
    }

    pub fn page_range(&self, start: usize, end: usize) -> PageSpan {
        let last = end.saturating_sub(1).max(start);
        PageSpan {
            start: self.page_for_offset(start),
            end: self.page_for_offset(last),
        }
    }

    /// Offset of the first byte of the line holding `offset`.
    pub fn line_start(&self, offset: usize) -> usize {
        self.slice(0, offset)
            .rfind('\n')
            .map(|newline| newline + 1)
            .unwrap_or(0)
    }

    pub fn slice(&self, start: usize, end: usize) -> &str {
        let end = end.min(self.text.len());
        self.text.get(start.min(end)..end).unwrap_or_default()
    }

    /// Every line with the byte offset of its first character.
    pub fn lines(&self) -> Vec<(usize, &str)> {
        let mut lines = Vec::new();
        let mut offset = 0usize;
        for line in self.text.split('\n') {
            lines.push((offset, line));
            offset += line.len() + 1;
        }
        lines
    }
}

pub fn normalize_pages(pages: &[Page]) -> Result<(Vec<Page>, NormalizationStats)> {
    let texts = pages
        .iter()
        .map(|page| page.text.replace('\u{00a0}', " ").replace('\r', ""))
        .collect::<Vec<String>>();
    let header_candidates = detect_repeated_edge_lines(&texts, true);
    let footer_candidates = detect_repeated_edge_lines(&texts, false);
    let page_number_regex = Regex::new(
        r"(?i)^(?:-\s*\d{1,4}\s*-|(?:p[aá]g(?:ina)?\.?\s*)?\d{1,4}(?:\s*(?:de|/)\s*\d{1,4})?)$",
    )
    .context("failed to compile page number line regex")?;

    let mut stats = NormalizationStats::default();
    let mut normalized = Vec::with_capacity(pages.len());

    for (page, text) in pages.iter().zip(texts) {
        let mut lines = text
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect::<Vec<String>>();

        if let Some(index) = first_nonempty_line_index(&lines) {
            let candidate = normalize_edge_line(&lines[index]);
            if header_candidates.contains(&candidate) {
                lines.remove(index);
                stats.header_lines_removed += 1;
            }
        }

        if let Some(index) = last_nonempty_line_index(&lines) {
            let candidate = normalize_edge_line(&lines[index]);
            if footer_candidates.contains(&candidate) {
                lines.remove(index);
                stats.footer_lines_removed += 1;
            }
        }

        // Only the bottom edge: a bare number on the first line may be a section numeral.
        if let Some(index) = last_nonempty_line_index(&lines)
            && page_number_regex.is_match(lines[index].trim())
        {
            lines.remove(index);
            stats.page_number_lines_removed += 1;
        }

        let (merged, merges) = merge_hyphenated_lines(lines);
        stats.dehyphenation_merges += merges;

        normalized.push(Page {
            text: merged.join("\n"),
            ..page.clone()
        });
    }

    Ok((normalized, stats))
}

fn detect_repeated_edge_lines(pages: &[String], header: bool) -> HashSet<String> {
    let mut counts = HashMap::<String, usize>::new();
    for page in pages {
        let lines = page.lines().map(str::trim).collect::<Vec<&str>>();
        let candidate = if header {
            lines.iter().copied().find(|line| !line.is_empty())
        } else {
            lines.iter().rev().copied().find(|line| !line.is_empty())
        };

        let Some(candidate) = candidate else {
            continue;
        };

        let normalized = normalize_edge_line(candidate);
        if normalized.is_empty() || normalized.len() > 120 {
            continue;
        }
        *counts.entry(normalized).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter_map(|(candidate, count)| if count >= 3 { Some(candidate) } else { None })
        .collect()
}

fn normalize_edge_line(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

fn first_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().position(|line| !line.trim().is_empty())
}

fn last_nonempty_line_index(lines: &[String]) -> Option<usize> {
    lines.iter().rposition(|line| !line.trim().is_empty())
}

pub fn merge_hyphenated_lines(lines: Vec<String>) -> (Vec<String>, usize) {
    let mut merged = Vec::<String>::with_capacity(lines.len());
    let mut merges = 0usize;
    let mut index = 0usize;

    while index < lines.len() {
        let current = &lines[index];
        if let Some(next) = lines.get(index + 1)
            && should_merge_hyphenated_pair(current, next)
        {
            merged.push(format!(
                "{}{}",
                current.trim_end().trim_end_matches('-'),
                next.trim_start()
            ));
            merges += 1;
            index += 2;
            continue;
        }

        merged.push(current.clone());
        index += 1;
    }

    (merged, merges)
}

fn should_merge_hyphenated_pair(current: &str, next: &str) -> bool {
    let left = current.trim_end();
    if !left.ends_with('-') || left.ends_with("--") {
        return false;
    }

    let starts_with_lowercase = next
        .trim_start()
        .chars()
        .next()
        .map(char::is_lowercase)
        .unwrap_or(false);
    if !starts_with_lowercase {
        return false;
    }

    left.trim_end_matches('-')
        .chars()
        .last()
        .map(char::is_alphabetic)
        .unwrap_or(false)
}
