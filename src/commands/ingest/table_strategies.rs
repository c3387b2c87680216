use super::*;

use rayon::prelude::*;

pub const RULING_GEOMETRY: &str = "ruling_geometry";
pub const WHITESPACE_ALIGNMENT: &str = "whitespace_alignment";
pub const CELL_SEQUENCE: &str = "cell_sequence";

const AGREEMENT_CONFIDENCE: f64 = 0.98;
const DISAGREEMENT_CONFIDENCE: f64 = 0.5;
const MAX_ROW_LABEL_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct AmountCell {
    pub raw: String,
    pub amount: Amount,
    /// Byte offset of the cell in the document text, when the cell text could be located.
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub page: u32,
    /// Byte offset of the row label, when it could be located in the document text.
    pub offset: Option<usize>,
    pub label: String,
    pub cells: Vec<AmountCell>,
}

/// One way of reading role/amount rows out of a page.
pub trait TableStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Base confidence for a row this strategy reads on its own.
    fn base_confidence(&self) -> f64;

    fn rows(&self, input: &ExtractionInput<'_>) -> Vec<TableRow>;
}

/// Shared cell interpretation for every strategy.
#[derive(Debug)]
struct CellReader {
    amount: Regex,
    bare_decimal: Regex,
}

impl CellReader {
    fn new() -> Result<Self> {
        Ok(Self {
            amount: Regex::new(AMOUNT_PATTERN).context("failed to compile table amount regex")?,
            bare_decimal: Regex::new(r"^\d{1,3}(?:[, ]\d{3})*[.,]\d{2}$|^\d+[.,]\d{2}$")
                .context("failed to compile bare decimal regex")?,
        })
    }

    fn whole_cell_amount(&self, cell: &str) -> Option<Amount> {
        let cell = cell.trim();
        if let Some(found) = self.amount.find(cell)
            && found.start() == 0
            && found.end() == cell.len()
        {
            return Amount::parse(cell);
        }
        if self.bare_decimal.is_match(cell) {
            return Amount::parse_lenient(cell, Currency::Pen);
        }
        None
    }

    /// Reads a label followed by amounts from ordered cells; `None` when the row has no amount.
    fn read_cells(&self, cells: &[String]) -> Option<(String, Vec<(String, Amount)>)> {
        let mut label = String::new();
        let mut amounts = Vec::new();

        for cell in cells {
            let cell = cell.trim();
            if cell.is_empty() {
                continue;
            }
            if let Some(amount) = self.whole_cell_amount(cell) {
                amounts.push((cell.to_string(), amount));
                continue;
            }

            let mut matched = false;
            for found in self.amount.find_iter(cell) {
                if !matched && label.is_empty() {
                    label = clean_label(&cell[..found.start()]);
                }
                matched = true;
                if let Some(amount) = Amount::parse(found.as_str()) {
                    amounts.push((found.as_str().to_string(), amount));
                }
            }
            if !matched && label.is_empty() && cell.chars().any(char::is_alphabetic) {
                label = clean_label(cell);
            }
        }

        if label.is_empty() || amounts.is_empty() || label.chars().count() > MAX_ROW_LABEL_CHARS {
            return None;
        }
        Some((label, amounts))
    }

    /// A line holding a label and trailing amounts with only separators between them.
    fn read_inline_row(&self, line: &str) -> Option<(String, Vec<(String, Amount)>)> {
        let matches = self.amount.find_iter(line).collect::<Vec<_>>();
        let first = matches.first()?;
        let label = clean_label(&line[..first.start()]);
        if label.is_empty() || !label.chars().any(char::is_alphabetic) {
            return None;
        }

        let mut cursor = first.start();
        let mut amounts = Vec::new();
        for found in &matches {
            if !is_separator_run(&line[cursor..found.start()]) {
                return None;
            }
            amounts.push((found.as_str().to_string(), Amount::parse(found.as_str())?));
            cursor = found.end();
        }
        if !is_separator_run(&line[cursor..]) || label.chars().count() > MAX_ROW_LABEL_CHARS {
            return None;
        }
        Some((label, amounts))
    }
}

fn clean_label(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['.', '…', ':', '-', '|', ' ', '\t'])
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

fn is_separator_run(text: &str) -> bool {
    text.chars()
        .all(|ch| ch.is_whitespace() || matches!(ch, '.' | '…' | '|' | ';' | ',' | '-'))
}

/// Finds `needle` in `haystack` at or after `cursor`, returning its document offset.
fn anchor(haystack: &str, haystack_offset: usize, needle: &str, cursor: &mut usize) -> Option<usize> {
    let position = haystack.get(*cursor..)?.find(needle)? + *cursor;
    *cursor = position + needle.len();
    Some(haystack_offset + position)
}

fn build_row(
    page: u32,
    offset: Option<usize>,
    label: String,
    amounts: Vec<(String, Amount)>,
    locate: impl Fn(&str, &mut usize) -> Option<usize>,
) -> TableRow {
    let mut cursor = 0usize;
    let cells = amounts
        .into_iter()
        .map(|(raw, amount)| {
            let offset = locate(&raw, &mut cursor);
            AmountCell { raw, amount, offset }
        })
        .collect();
    TableRow {
        page,
        offset,
        label,
        cells,
    }
}

/// Rows from layout table regions grouped by their vertical position.
#[derive(Debug)]
pub struct RulingGeometryStrategy {
    reader: CellReader,
    cell_split: Regex,
}

impl RulingGeometryStrategy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            reader: CellReader::new()?,
            cell_split: Regex::new(r"\t+|\s{2,}|\s*\|\s*")
                .context("failed to compile layout cell split regex")?,
        })
    }

    fn page_rows(&self, document: &DocumentText, index: usize, page: &Page) -> Vec<TableRow> {
        let mut elements = page
            .layout
            .iter()
            .filter(|element| {
                element.region_type == RegionType::Table && !element.text.trim().is_empty()
            })
            .collect::<Vec<&LayoutElement>>();
        if elements.is_empty() {
            return Vec::new();
        }
        elements.sort_by(|a, b| {
            a.bbox
                .center_y()
                .total_cmp(&b.bbox.center_y())
                .then(a.reading_order.cmp(&b.reading_order))
        });

        let mut grouped = Vec::<Vec<&LayoutElement>>::new();
        for element in elements {
            match grouped
                .iter_mut()
                .find(|row| row[0].bbox.shares_row_with(&element.bbox))
            {
                Some(row) => row.push(element),
                None => grouped.push(vec![element]),
            }
        }

        let (page_start, page_end) = document.page_bounds(index);
        let page_text = document.slice(page_start, page_end);
        let mut page_cursor = 0usize;
        let mut rows = Vec::new();

        for mut row in grouped {
            row.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
            let cells = row
                .iter()
                .flat_map(|element| self.cell_split.split(element.text.trim()))
                .map(ToOwned::to_owned)
                .collect::<Vec<String>>();
            let Some((label, amounts)) = self.reader.read_cells(&cells) else {
                continue;
            };

            let mut label_cursor = page_cursor;
            let label_offset = anchor(page_text, page_start, &label, &mut label_cursor);
            let row_cursor = label_offset.map_or(page_cursor, |offset| offset - page_start);
            let mut built = build_row(page.page_number, label_offset, label, amounts, |raw, cursor| {
                let mut local = row_cursor + *cursor;
                let found = anchor(page_text, page_start, raw, &mut local)?;
                *cursor = local - row_cursor;
                Some(found)
            });
            if built.offset.is_none() {
                built.offset = built.cells.iter().find_map(|cell| cell.offset);
            }
            if let Some(last) = built.cells.iter().filter_map(|cell| cell.offset).max() {
                page_cursor = last - page_start;
            }
            rows.push(built);
        }

        rows
    }
}

impl TableStrategy for RulingGeometryStrategy {
    fn name(&self) -> &'static str {
        RULING_GEOMETRY
    }

    fn base_confidence(&self) -> f64 {
        0.9
    }

    fn rows(&self, input: &ExtractionInput<'_>) -> Vec<TableRow> {
        input
            .pages
            .par_iter()
            .enumerate()
            .map(|(index, page)| self.page_rows(input.document, index, page))
            .collect::<Vec<Vec<TableRow>>>()
            .into_iter()
            .flatten()
            .collect()
    }
}

/// Rows from single lines whose cells are separated by tabs, pipes or runs of spaces.
#[derive(Debug)]
pub struct WhitespaceAlignmentStrategy {
    reader: CellReader,
    cell_split: Regex,
}

impl WhitespaceAlignmentStrategy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            reader: CellReader::new()?,
            cell_split: Regex::new(r"\t+|\s{2,}|\s*\|\s*")
                .context("failed to compile table cell split regex")?,
        })
    }
}

impl TableStrategy for WhitespaceAlignmentStrategy {
    fn name(&self) -> &'static str {
        WHITESPACE_ALIGNMENT
    }

    fn base_confidence(&self) -> f64 {
        0.8
    }

    fn rows(&self, input: &ExtractionInput<'_>) -> Vec<TableRow> {
        let mut rows = Vec::new();

        for (line_offset, line) in input.document.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let cells = self
                .cell_split
                .split(trimmed)
                .map(ToOwned::to_owned)
                .collect::<Vec<String>>();
            if cells.len() < 2 {
                continue;
            }
            let Some((label, amounts)) = self.reader.read_cells(&cells) else {
                continue;
            };

            let page = input.document.page_for_offset(line_offset);
            rows.push(build_row(page, Some(line_offset), label, amounts, |raw, cursor| {
                anchor(line, line_offset, raw, cursor)
            }));
        }

        rows
    }
}

/// Rows rebuilt from the line stream: a label line followed by amount-only lines,
/// or a label with trailing amounts on the same line.
#[derive(Debug)]
pub struct CellSequenceStrategy {
    reader: CellReader,
}

impl CellSequenceStrategy {
    pub fn new() -> Result<Self> {
        Ok(Self {
            reader: CellReader::new()?,
        })
    }
}

impl TableStrategy for CellSequenceStrategy {
    fn name(&self) -> &'static str {
        CELL_SEQUENCE
    }

    fn base_confidence(&self) -> f64 {
        0.75
    }

    fn rows(&self, input: &ExtractionInput<'_>) -> Vec<TableRow> {
        let document = input.document;
        let mut rows = Vec::new();
        let mut open: Option<TableRow> = None;

        for (line_offset, line) in document.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let page = document.page_for_offset(line_offset);
            let cell_offset = line_offset + (line.len() - line.trim_start().len());

            if let Some(amount) = self.reader.whole_cell_amount(trimmed) {
                if let Some(row) = open.as_mut().filter(|row| row.page == page) {
                    row.cells.push(AmountCell {
                        raw: trimmed.to_string(),
                        amount,
                        offset: Some(cell_offset),
                    });
                }
                continue;
            }

            if let Some(row) = open.take()
                && !row.cells.is_empty()
            {
                rows.push(row);
            }

            if let Some((label, amounts)) = self.reader.read_inline_row(trimmed) {
                rows.push(build_row(page, Some(line_offset), label, amounts, |raw, cursor| {
                    anchor(line, line_offset, raw, cursor)
                }));
                continue;
            }

            let label = clean_label(trimmed);
            if label.chars().any(char::is_alphabetic) && label.chars().count() <= MAX_ROW_LABEL_CHARS {
                open = Some(TableRow {
                    page,
                    offset: Some(cell_offset),
                    label,
                    cells: Vec::new(),
                });
            }
        }

        if let Some(row) = open
            && !row.cells.is_empty()
        {
            rows.push(row);
        }

        rows
    }
}

#[derive(Debug, Clone)]
struct Observation {
    strategy: &'static str,
    priority: usize,
    base_confidence: f64,
    page: u32,
    offset: Option<usize>,
    row_offset: Option<usize>,
    label: String,
    role: RoleCategory,
    role_confidence: f64,
    raw: String,
    amount: Amount,
}

/// The physical row a reading came from. Rows located in the text are keyed by the line
/// they sit on; unlocated rows fall back to their order among the strategy's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RowKey {
    Line(usize),
    Ordinal(RoleCategory, usize),
}

type ObservationKey = (u32, RowKey, usize);

/// Runs every table strategy and reconciles their readings row by row.
pub struct RobustTableExtractor {
    strategies: Vec<Box<dyn TableStrategy>>,
    roles: RoleMatcher,
    tolerance_cents: i64,
}

impl RobustTableExtractor {
    pub fn new(dictionary: &DomainDictionary, amount_tolerance: f64) -> Result<Self> {
        let strategies: Vec<Box<dyn TableStrategy>> = vec![
            Box::new(RulingGeometryStrategy::new()?),
            Box::new(WhitespaceAlignmentStrategy::new()?),
            Box::new(CellSequenceStrategy::new()?),
        ];
        Ok(Self::with_strategies(
            strategies,
            RoleMatcher::new(dictionary)?,
            amount_tolerance,
        ))
    }

    /// Strategies earlier in the list win ties between equally supported readings.
    pub fn with_strategies(
        strategies: Vec<Box<dyn TableStrategy>>,
        roles: RoleMatcher,
        amount_tolerance: f64,
    ) -> Self {
        Self {
            strategies,
            roles,
            tolerance_cents: (amount_tolerance.max(0.0) * 100.0).round() as i64,
        }
    }

    pub fn extract_tables(&self, input: &ExtractionInput<'_>) -> Vec<EntityCandidate> {
        let per_strategy = self
            .strategies
            .par_iter()
            .map(|strategy| strategy.rows(input))
            .collect::<Vec<Vec<TableRow>>>();

        let mut groups = BTreeMap::<ObservationKey, Vec<Observation>>::new();
        for (priority, (strategy, rows)) in self.strategies.iter().zip(per_strategy).enumerate() {
            debug!(strategy = strategy.name(), rows = rows.len(), "table strategy complete");
            let mut ordinals = HashMap::<(u32, RoleCategory), usize>::new();

            for row in rows {
                let (role, role_confidence) = self.roles.classify(&row.label);
                let row_key = match row.offset {
                    Some(offset) => RowKey::Line(input.document.line_start(offset)),
                    None => {
                        let ordinal = ordinals.entry((row.page, role)).or_insert(0);
                        *ordinal += 1;
                        RowKey::Ordinal(role, *ordinal)
                    }
                };
                for (column, cell) in row.cells.into_iter().enumerate() {
                    groups
                        .entry((row.page, row_key, column))
                        .or_default()
                        .push(Observation {
                            strategy: strategy.name(),
                            priority,
                            base_confidence: strategy.base_confidence(),
                            page: row.page,
                            offset: cell.offset,
                            row_offset: row.offset,
                            label: row.label.clone(),
                            role,
                            role_confidence,
                            raw: cell.raw,
                            amount: cell.amount,
                        });
                }
            }
        }

        let mut candidates = groups
            .into_values()
            .filter_map(|observations| self.reconcile(observations))
            .collect::<Vec<EntityCandidate>>();
        candidates.sort_by(|a, b| a.offset.cmp(&b.offset).then(a.page.cmp(&b.page)));
        candidates
    }

    /// Clusters one row's readings by value; a lone cluster is consensus, several are a conflict.
    fn reconcile(&self, mut observations: Vec<Observation>) -> Option<EntityCandidate> {
        observations.sort_by_key(|observation| observation.priority);
        let mut clusters = Vec::<Vec<usize>>::new();
        for (index, observation) in observations.iter().enumerate() {
            match clusters.iter_mut().find(|cluster| {
                observations[cluster[0]]
                    .amount
                    .within(&observation.amount, self.tolerance_cents)
            }) {
                Some(cluster) => cluster.push(index),
                None => clusters.push(vec![index]),
            }
        }

        // Largest cluster wins; on a tie the cluster holding the higher-priority strategy.
        let winner = clusters
            .iter()
            .max_by(|a, b| a.len().cmp(&b.len()).then(b[0].cmp(&a[0])))?;
        let representative = &observations[winner[0]];
        let offset = winner
            .iter()
            .find_map(|index| observations[*index].offset)
            .or_else(|| observations.iter().find_map(|observation| observation.offset))
            .or(representative.row_offset)
            .unwrap_or_default();

        let ambiguous = clusters.len() > 1;
        let agreement = if ambiguous {
            DISAGREEMENT_CONFIDENCE
        } else if winner.len() >= 2 {
            AGREEMENT_CONFIDENCE
        } else {
            representative.base_confidence
        };
        let confidence = agreement * (0.75 + 0.25 * representative.role_confidence);

        Some(EntityCandidate {
            kind: EntityKind::Amount,
            raw: representative.raw.clone(),
            value: NormalizedValue::Amount(representative.amount),
            offset,
            page: representative.page,
            confidence,
            origin: Origin::TableExtractor,
            role: Some(representative.role),
            ambiguous,
            readings: observations
                .iter()
                .map(|observation| StrategyReading {
                    strategy: observation.strategy.to_string(),
                    role_label: observation.label.clone(),
                    amount: observation.amount,
                })
                .collect(),
        })
    }
}

impl std::fmt::Debug for RobustTableExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobustTableExtractor")
            .field(
                "strategies",
                &self.strategies.iter().map(|strategy| strategy.name()).collect::<Vec<_>>(),
            )
            .field("tolerance_cents", &self.tolerance_cents)
            .finish()
    }
}
