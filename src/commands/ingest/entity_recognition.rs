use super::*;

const MONTHS: [&str; 13] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "setiembre",
    "octubre",
    "noviembre",
    "diciembre",
    "septiembre",
];

/// Currency marker followed by a number in any of the grouping conventions seen in scans.
pub const AMOUNT_PATTERN: &str = r"(?i)(?:\bUS\$|\bS ?/\.?|\bPEN\b)\s*(\d{1,3}(?:[, ]\d{3})+(?:[.,]\d{1,2})?|\d{1,3}(?:\.\d{3})+(?:,\d{1,2})?|\d+(?:[.,]\d{1,2})?)";

#[derive(Debug, Clone, Copy)]
pub struct RecognizerSettings {
    /// Maximum distance in bytes between an amount and the role it is attributed to.
    pub role_window: usize,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self { role_window: 160 }
    }
}

#[derive(Debug)]
pub struct LegalEntityRecognizer {
    amount: Regex,
    numeric_date: Regex,
    written_date: Regex,
    keyword_numeral: Regex,
    dotted_numeral: Regex,
    article: Regex,
    legal_instrument: Regex,
    roles: RoleMatcher,
    amount_keywords: Vec<String>,
    settings: RecognizerSettings,
}

impl LegalEntityRecognizer {
    pub fn new(dictionary: &DomainDictionary, settings: RecognizerSettings) -> Result<Self> {
        Ok(Self {
            amount: Regex::new(AMOUNT_PATTERN).context("failed to compile amount regex")?,
            numeric_date: Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})\b")
                .context("failed to compile numeric date regex")?,
            written_date: Regex::new(
                r"(?i)\b(\d{1,2})(?:°|º)?\s+de\s+([a-z]+)\s+(?:del?\s+)?(\d{4}|\d{2})\b",
            )
            .context("failed to compile written date regex")?,
            keyword_numeral: Regex::new(r"(?i)\b(?:numeral(?:es)?|inciso|sub ?numeral)\s+(\d{1,3}(?:\.\d{1,3})*)")
                .context("failed to compile keyword numeral regex")?,
            dotted_numeral: Regex::new(r"\b\d{1,3}(?:\.\d{1,3})+\b")
                .context("failed to compile dotted numeral regex")?,
            article: Regex::new(r"(?i)\bart(?:[ií]culo|\.)\s*(\d{1,4})(?:\s*[°º])?")
                .context("failed to compile article reference regex")?,
            legal_instrument: Regex::new(
                r"(?i)\b(ley|decreto\s+supremo|decreto\s+legislativo|decreto\s+de\s+urgencia|resoluci[oó]n\s+(?:ministerial|suprema|directoral|jefatural|de\s+secretar[ií]a\s+general))\s+n(?:[°º]|ro\.?|o\.|\.)?\s*(\d[0-9A-Za-z-]*)",
            )
            .context("failed to compile legal instrument regex")?,
            roles: RoleMatcher::new(dictionary)?,
            amount_keywords: dictionary
                .amount_context_keywords
                .iter()
                .map(|keyword| fold_text(keyword))
                .collect(),
            settings,
        })
    }

    /// `publication_year` anchors the century of two-digit years.
    pub fn recognize(
        &self,
        document: &DocumentText,
        publication_year: Option<i32>,
    ) -> Vec<EntityCandidate> {
        let text = document.as_str();
        let mut claimed = Vec::<(usize, usize)>::new();
        let mut candidates = Vec::new();

        candidates.extend(self.legal_references(document, &mut claimed));
        let roles = self.role_mentions(document);
        candidates.extend(self.amounts(document, &roles, &mut claimed));
        candidates.extend(self.dates(document, publication_year, &mut claimed));
        candidates.extend(self.numerals(document, &roles, &mut claimed));
        candidates.extend(roles);

        candidates.sort_by(|a, b| a.offset.cmp(&b.offset).then(a.kind.cmp(&b.kind)));
        debug!(
            candidates = candidates.len(),
            text_bytes = text.len(),
            "entity recognition complete"
        );
        candidates
    }

    fn legal_references(
        &self,
        document: &DocumentText,
        claimed: &mut Vec<(usize, usize)>,
    ) -> Vec<EntityCandidate> {
        let text = document.as_str();
        let mut found = Vec::new();

        for captures in self.legal_instrument.captures_iter(text) {
            let (Some(whole), Some(kind), Some(number)) =
                (captures.get(0), captures.get(1), captures.get(2))
            else {
                continue;
            };
            let kind_key = fold_text(kind.as_str())
                .split_whitespace()
                .collect::<Vec<&str>>()
                .join("_");
            let number = number.as_str().trim_end_matches('-').to_uppercase();
            claimed.push((whole.start(), whole.end()));
            found.push(ner_candidate(
                document,
                EntityKind::LegalReference,
                whole.as_str(),
                NormalizedValue::Reference(format!("{kind_key}:{number}")),
                whole.start(),
                0.9,
            ));
        }

        for captures in self.article.captures_iter(text) {
            let (Some(whole), Some(number)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if overlaps(claimed, whole.start(), whole.end()) {
                continue;
            }
            claimed.push((whole.start(), whole.end()));
            let abbreviated = whole.as_str().to_lowercase().starts_with("art.");
            found.push(ner_candidate(
                document,
                EntityKind::LegalReference,
                whole.as_str(),
                NormalizedValue::Reference(number.as_str().to_string()),
                whole.start(),
                if abbreviated { 0.7 } else { 0.85 },
            ));
        }

        found
    }

    fn role_mentions(&self, document: &DocumentText) -> Vec<EntityCandidate> {
        let text = document.as_str();
        self.roles
            .find_all(text)
            .into_iter()
            .map(|mention| {
                ner_candidate(
                    document,
                    EntityKind::Role,
                    &text[mention.start..mention.end],
                    NormalizedValue::Role(mention.category),
                    mention.start,
                    if mention.fuzzy { 0.6 } else { 0.9 },
                )
            })
            .collect()
    }

    fn amounts(
        &self,
        document: &DocumentText,
        roles: &[EntityCandidate],
        claimed: &mut Vec<(usize, usize)>,
    ) -> Vec<EntityCandidate> {
        let text = document.as_str();
        let mut found = Vec::new();

        for captures in self.amount.captures_iter(text) {
            let (Some(whole), Some(number)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if overlaps(claimed, whole.start(), whole.end()) {
                continue;
            }
            let Some(amount) = Amount::parse(whole.as_str()) else {
                continue;
            };
            claimed.push((whole.start(), whole.end()));

            let role = nearest_role(text, roles, whole.start(), whole.end(), self.settings.role_window);
            let context = fold_text(context_window(text, whole.start(), whole.end(), 120, 80));
            let keyword_hits = self
                .amount_keywords
                .iter()
                .filter(|keyword| context.contains(keyword.as_str()))
                .count()
                .min(2);

            let mut confidence = 0.6;
            if has_decimal_digits(number.as_str()) {
                confidence += 0.1;
            }
            confidence += 0.1 * keyword_hits as f64;
            if role.is_some() {
                confidence += 0.05;
            }

            let mut candidate = ner_candidate(
                document,
                EntityKind::Amount,
                whole.as_str(),
                NormalizedValue::Amount(amount),
                whole.start(),
                confidence.min(0.95),
            );
            candidate.role = role;
            found.push(candidate);
        }

        found
    }

    fn dates(
        &self,
        document: &DocumentText,
        publication_year: Option<i32>,
        claimed: &mut Vec<(usize, usize)>,
    ) -> Vec<EntityCandidate> {
        let text = document.as_str();
        let mut found = Vec::new();

        for captures in self.written_date.captures_iter(text) {
            let (Some(whole), Some(day), Some(month), Some(year)) =
                (captures.get(0), captures.get(1), captures.get(2), captures.get(3))
            else {
                continue;
            };
            let Some(month) = month_number(month.as_str()) else {
                continue;
            };
            let parts = DateParts {
                day: day.as_str(),
                month,
                year: year.as_str(),
            };
            if let Some(candidate) =
                date_candidate(document, whole.as_str(), whole.start(), parts, publication_year, 0.9)
            {
                claimed.push((whole.start(), whole.end()));
                found.push(candidate);
            }
        }

        for captures in self.numeric_date.captures_iter(text) {
            let (Some(whole), Some(day), Some(month), Some(year)) =
                (captures.get(0), captures.get(1), captures.get(2), captures.get(3))
            else {
                continue;
            };
            if overlaps(claimed, whole.start(), whole.end()) {
                continue;
            }
            let Ok(month) = month.as_str().parse::<u32>() else {
                continue;
            };
            let parts = DateParts {
                day: day.as_str(),
                month,
                year: year.as_str(),
            };
            if let Some(candidate) =
                date_candidate(document, whole.as_str(), whole.start(), parts, publication_year, 0.8)
            {
                claimed.push((whole.start(), whole.end()));
                found.push(candidate);
            }
        }

        found
    }

    fn numerals(
        &self,
        document: &DocumentText,
        roles: &[EntityCandidate],
        claimed: &mut Vec<(usize, usize)>,
    ) -> Vec<EntityCandidate> {
        let text = document.as_str();
        let mut found = Vec::new();

        for captures in self.keyword_numeral.captures_iter(text) {
            let (Some(whole), Some(numeral)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if overlaps(claimed, numeral.start(), numeral.end()) {
                continue;
            }
            claimed.push((numeral.start(), numeral.end()));
            found.push(ner_candidate(
                document,
                EntityKind::Numeral,
                whole.as_str(),
                NormalizedValue::Numeral(numeral.as_str().to_string()),
                numeral.start(),
                0.85,
            ));
        }

        for numeral in self.dotted_numeral.find_iter(text) {
            if overlaps(claimed, numeral.start(), numeral.end()) {
                continue;
            }
            if is_quantity_suffix(&text[numeral.end()..]) {
                continue;
            }
            let line_start = document.line_start(numeral.start());
            let line_prefix = &text[line_start..numeral.start()];
            let at_line_start = line_prefix.trim().is_empty();
            if !at_line_start && has_cents_group(numeral.as_str()) {
                let role_on_line = roles
                    .iter()
                    .any(|role| line_start <= role.offset && role.offset < numeral.start());
                if role_on_line || ends_with_column_gap(line_prefix) {
                    continue;
                }
            }
            claimed.push((numeral.start(), numeral.end()));
            found.push(ner_candidate(
                document,
                EntityKind::Numeral,
                numeral.as_str(),
                NormalizedValue::Numeral(numeral.as_str().to_string()),
                numeral.start(),
                if at_line_start { 0.8 } else { 0.7 },
            ));
        }

        found
    }
}

struct DateParts<'a> {
    day: &'a str,
    month: u32,
    year: &'a str,
}

fn date_candidate(
    document: &DocumentText,
    raw: &str,
    offset: usize,
    parts: DateParts<'_>,
    publication_year: Option<i32>,
    base_confidence: f64,
) -> Option<EntityCandidate> {
    let DateParts { day, month, year } = parts;
    let day = day.parse::<u32>().ok()?;
    if !(1..=31).contains(&day) || !(1..=12).contains(&month) {
        return None;
    }

    let (value, confidence, ambiguous) = if year.len() == 4 {
        let year = year.parse::<i32>().ok()?;
        (
            DateValue {
                year: Some(year),
                short_year: None,
                month,
                day,
            },
            base_confidence,
            false,
        )
    } else {
        let short = year.parse::<u32>().ok()?;
        match publication_year {
            Some(publication_year) => (
                DateValue {
                    year: Some(resolve_two_digit_year(short, publication_year)),
                    short_year: Some(short),
                    month,
                    day,
                },
                base_confidence - 0.1,
                false,
            ),
            None => (
                DateValue {
                    year: None,
                    short_year: Some(short),
                    month,
                    day,
                },
                0.5,
                true,
            ),
        }
    };

    let mut candidate = ner_candidate(
        document,
        EntityKind::Date,
        raw,
        NormalizedValue::Date(value),
        offset,
        confidence,
    );
    candidate.ambiguous = ambiguous;
    Some(candidate)
}

fn ner_candidate(
    document: &DocumentText,
    kind: EntityKind,
    raw: &str,
    value: NormalizedValue,
    offset: usize,
    confidence: f64,
) -> EntityCandidate {
    EntityCandidate {
        kind,
        raw: raw.to_string(),
        value,
        offset,
        page: document.page_for_offset(offset),
        confidence,
        origin: Origin::Ner,
        role: None,
        ambiguous: false,
        readings: Vec::new(),
    }
}

pub fn has_decimal_digits(number: &str) -> bool {
    number
        .rfind(['.', ','])
        .map(|index| (1..=2).contains(&(number.len() - index - 1)))
        .unwrap_or(false)
}

/// Percentages and longer decimals are quantities, not numerals.
fn is_quantity_suffix(rest: &str) -> bool {
    if rest.trim_start().starts_with('%') {
        return true;
    }
    let mut chars = rest.chars();
    matches!(chars.next(), Some('.' | ','))
        && chars.next().map(|ch| ch.is_ascii_digit()).unwrap_or(false)
}

/// "320.00": one dotted group of exactly two digits, the shape of an unmarked amount.
fn has_cents_group(numeral: &str) -> bool {
    numeral
        .split_once('.')
        .is_some_and(|(_, cents)| cents.len() == 2 && !cents.contains('.'))
}

fn ends_with_column_gap(line_prefix: &str) -> bool {
    line_prefix.ends_with("  ")
        || line_prefix.ends_with('\t')
        || line_prefix.trim_end().ends_with('|')
}

fn overlaps(claimed: &[(usize, usize)], start: usize, end: usize) -> bool {
    claimed
        .iter()
        .any(|(claimed_start, claimed_end)| start < *claimed_end && *claimed_start < end)
}

fn month_number(name: &str) -> Option<u32> {
    let folded = fold_text(name);
    MONTHS
        .iter()
        .position(|month| *month == folded)
        .map(|index| if index == 12 { 9 } else { index as u32 + 1 })
}

/// Places a two-digit year in the century window ending one year after publication.
pub fn resolve_two_digit_year(short: u32, publication_year: i32) -> i32 {
    let century = publication_year.div_euclid(100) * 100;
    let year = century + short as i32;
    if year > publication_year + 1 {
        year - 100
    } else {
        year
    }
}

/// Attributes an amount to the closest role mention, preferring one on the same line.
fn nearest_role(
    text: &str,
    roles: &[EntityCandidate],
    start: usize,
    end: usize,
    window: usize,
) -> Option<RoleCategory> {
    roles
        .iter()
        .filter_map(|role| {
            let role_end = role.offset + role.raw.len();
            let (gap_start, gap_end, distance) = if role_end <= start {
                (role_end, start, start - role_end)
            } else if role.offset >= end {
                (end, role.offset, (role.offset - end) * 2)
            } else {
                return None;
            };
            if gap_end - gap_start > window {
                return None;
            }
            let same_line = !text[gap_start..gap_end].contains('\n');
            let penalty = if same_line { 0 } else { window };
            let category = match &role.value {
                NormalizedValue::Role(category) => *category,
                _ => return None,
            };
            Some((distance + penalty, role.offset, category))
        })
        .min_by_key(|(score, offset, _)| (*score, *offset))
        .map(|(_, _, category)| category)
}

pub fn context_window(text: &str, start: usize, end: usize, before: usize, after: usize) -> &str {
    let mut from = start.saturating_sub(before);
    while from > 0 && !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + after).min(text.len());
    while to < text.len() && !text.is_char_boundary(to) {
        to += 1;
    }
    &text[from..to]
}
