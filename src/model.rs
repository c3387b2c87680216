use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cli::ChunkStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub doc_id: String,
    pub filename: String,
    pub page_count: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInventoryManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub source_directory: String,
    pub document_count: usize,
    pub documents: Vec<DocumentEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestPaths {
    pub input_root: String,
    pub manifest_dir: String,
    pub inventory_manifest_path: String,
    pub output_dir: String,
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestCounts {
    pub document_count: usize,
    pub processed_document_count: usize,
    pub failed_document_count: usize,
    pub page_count: usize,
    pub header_lines_removed: usize,
    pub footer_lines_removed: usize,
    pub page_number_lines_removed: usize,
    pub dehyphenation_merges: usize,
    pub section_nodes: usize,
    pub synthetic_section_nodes: usize,
    pub structural_anomalies: usize,
    pub ner_candidates: usize,
    pub table_candidates: usize,
    pub entities_accepted: usize,
    pub entities_ambiguous: usize,
    pub entities_rejected: usize,
    pub validation_warnings: usize,
    pub chunks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRunSummary {
    pub doc_id: String,
    pub source_sha256: String,
    pub entities_path: String,
    pub chunks_path: String,
    pub confidence: f64,
    pub chunk_strategy: ChunkStrategy,
    pub chunks: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub doc_id: String,
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub paths: IngestPaths,
    pub counts: IngestCounts,
    pub documents: Vec<DocumentRunSummary>,
    pub failures: Vec<DocumentFailure>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}

/// One document as delivered by the OCR/layout collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    pub doc_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub publication_year: Option<i32>,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
    #[serde(default)]
    pub layout: Vec<LayoutElement>,
    #[serde(default = "default_page_confidence")]
    pub confidence: f64,
}

fn default_page_confidence() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    /// Two boxes share a row when either vertical center falls inside the other box.
    pub fn shares_row_with(&self, other: &BoundingBox) -> bool {
        let (top, bottom) = (self.y0.min(self.y1), self.y0.max(self.y1));
        let (other_top, other_bottom) = (other.y0.min(other.y1), other.y0.max(other.y1));
        let center = self.center_y();
        let other_center = other.center_y();
        (other_center >= top && other_center <= bottom)
            || (center >= other_top && center <= other_bottom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionType {
    Heading,
    Paragraph,
    Table,
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutElement {
    pub bbox: BoundingBox,
    pub region_type: RegionType,
    pub reading_order: u32,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSpan {
    pub start_page: u32,
    pub end_page: u32,
    pub start_offset: usize,
    pub end_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionNode {
    pub id: usize,
    pub numeral: String,
    pub title: String,
    pub level: usize,
    /// Numeral of the parent node; resolve through [`SectionTree::find`].
    pub parent: Option<String>,
    pub children: Vec<usize>,
    pub span: TextSpan,
    #[serde(default)]
    pub synthetic: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SectionTree {
    /// Nodes in document order; `SectionNode::id` is the index into this list.
    pub nodes: Vec<SectionNode>,
    pub roots: Vec<usize>,
}

impl SectionTree {
    pub fn get(&self, id: usize) -> Option<&SectionNode> {
        self.nodes.get(id)
    }

    pub fn find(&self, numeral: &str) -> Option<&SectionNode> {
        self.nodes.iter().find(|node| node.numeral == numeral)
    }

    /// A tree is usable for structural chunking when at least one heading was really observed.
    pub fn is_usable(&self) -> bool {
        self.nodes.iter().any(|node| !node.synthetic)
    }

    /// Numerals from the root down to `id`, inclusive.
    pub fn hierarchy_path(&self, id: usize) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = self.get(id);
        while let Some(node) = cursor {
            path.push(node.numeral.clone());
            cursor = node.parent.as_deref().and_then(|numeral| self.find(numeral));
        }
        path.reverse();
        path
    }

    /// Deepest node whose span contains `offset`.
    pub fn innermost_at(&self, offset: usize) -> Option<&SectionNode> {
        self.nodes
            .iter()
            .filter(|node| node.span.start_offset <= offset && offset < node.span.end_offset)
            .max_by_key(|node| (node.level, node.span.start_offset))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    MissingParent,
    DuplicateNumeral,
    OutOfOrderParent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralAnomaly {
    pub kind: AnomalyKind,
    pub numeral: String,
    pub page: u32,
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Amount,
    Date,
    Numeral,
    Role,
    #[serde(rename = "reference")]
    LegalReference,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Amount => "amount",
            EntityKind::Date => "date",
            EntityKind::Numeral => "numeral",
            EntityKind::Role => "role",
            EntityKind::LegalReference => "reference",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleCategory {
    Minister,
    ViceMinister,
    SecretaryGeneral,
    Director,
    CivilServant,
    Unclassified,
}

impl RoleCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleCategory::Minister => "minister",
            RoleCategory::ViceMinister => "vice_minister",
            RoleCategory::SecretaryGeneral => "secretary_general",
            RoleCategory::Director => "director",
            RoleCategory::CivilServant => "civil_servant",
            RoleCategory::Unclassified => "unclassified",
        }
    }

    /// Seniority used to rank differential allowances; lower is more senior.
    pub fn rank(self) -> Option<u8> {
        match self {
            RoleCategory::Minister => Some(1),
            RoleCategory::ViceMinister => Some(2),
            RoleCategory::SecretaryGeneral => Some(3),
            RoleCategory::Director => Some(4),
            RoleCategory::CivilServant => Some(5),
            RoleCategory::Unclassified => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Pen,
    Usd,
}

impl Currency {
    pub fn symbol(self) -> &'static str {
        match self {
            Currency::Pen => "S/",
            Currency::Usd => "US$",
        }
    }
}

/// Fixed-point money value; `cents` keeps formatting lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount {
    pub currency: Currency,
    #[serde(rename = "value", with = "decimal_cents")]
    pub cents: i64,
}

const CURRENCY_MARKERS: [(&str, Currency); 5] = [
    ("US$", Currency::Usd),
    ("S/.", Currency::Pen),
    ("S /", Currency::Pen),
    ("S/", Currency::Pen),
    ("PEN", Currency::Pen),
];

impl Amount {
    pub fn new(currency: Currency, cents: i64) -> Self {
        Self { currency, cents }
    }

    /// Parses `S/ 1,200.50`-style text. A currency marker is required.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let (currency, rest) = split_currency_marker(trimmed)?;
        let cents = parse_decimal_cents(rest)?;
        Some(Self { currency, cents })
    }

    /// Like [`Amount::parse`], but a bare number is read in `default_currency`.
    pub fn parse_lenient(raw: &str, default_currency: Currency) -> Option<Self> {
        let trimmed = raw.trim();
        match split_currency_marker(trimmed) {
            Some((currency, rest)) => Some(Self {
                currency,
                cents: parse_decimal_cents(rest)?,
            }),
            None => Some(Self {
                currency: default_currency,
                cents: parse_decimal_cents(trimmed)?,
            }),
        }
    }

    pub fn within(&self, other: &Amount, tolerance_cents: i64) -> bool {
        self.currency == other.currency && (self.cents - other.cents).abs() <= tolerance_cents
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.currency.symbol(),
            format_decimal(self.cents, true)
        )
    }
}

fn split_currency_marker(text: &str) -> Option<(Currency, &str)> {
    CURRENCY_MARKERS.iter().find_map(|(marker, currency)| {
        let head = text.get(..marker.len())?;
        if head.eq_ignore_ascii_case(marker) {
            Some((*currency, text[marker.len()..].trim_start()))
        } else {
            None
        }
    })
}

pub fn parse_decimal_cents(raw: &str) -> Option<i64> {
    let compact = raw
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>();
    let (negative, digits) = match compact.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, compact.as_str()),
    };
    if digits.is_empty()
        || !digits
            .chars()
            .all(|ch| ch.is_ascii_digit() || ch == ',' || ch == '.')
    {
        return None;
    }

    let (integer_part, fraction_part) = match decimal_separator_index(digits) {
        Some(index) => (&digits[..index], &digits[index + 1..]),
        None => (digits, ""),
    };
    let integer_digits = integer_part
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect::<String>();
    if integer_digits.is_empty() || integer_digits.len() > 15 {
        return None;
    }

    let units = integer_digits.parse::<i64>().ok()?;
    let fraction = match fraction_part.len() {
        0 => 0,
        1 => fraction_part.parse::<i64>().ok()? * 10,
        2 => fraction_part.parse::<i64>().ok()?,
        _ => return None,
    };

    let cents = units.checked_mul(100)?.checked_add(fraction)?;
    Some(if negative { -cents } else { cents })
}

/// The last `.` or `,` is a decimal separator only when it occurs once and
/// is followed by one or two digits; otherwise every separator groups thousands.
fn decimal_separator_index(digits: &str) -> Option<usize> {
    let index = digits.rfind(['.', ','])?;
    let separator = digits.as_bytes()[index];
    let occurrences = digits.bytes().filter(|byte| *byte == separator).count();
    let trailing = digits.len() - index - 1;
    if occurrences == 1 && (1..=2).contains(&trailing) {
        Some(index)
    } else {
        None
    }
}

fn format_decimal(cents: i64, grouped: bool) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let magnitude = cents.unsigned_abs();
    let units = (magnitude / 100).to_string();
    let fraction = magnitude % 100;

    let units = if grouped {
        let mut out = String::with_capacity(units.len() + units.len() / 3);
        for (index, ch) in units.chars().enumerate() {
            if index > 0 && (units.len() - index) % 3 == 0 {
                out.push(',');
            }
            out.push(ch);
        }
        out
    } else {
        units
    };

    format!("{sign}{units}.{fraction:02}")
}

mod decimal_cents {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(cents: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_decimal(*cents, false))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_decimal_cents(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid decimal amount: {raw}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateValue {
    /// `None` when a two-digit year could not be placed in a century.
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_year: Option<u32>,
    pub month: u32,
    pub day: u32,
}

impl DateValue {
    pub fn canonical(&self) -> String {
        match (self.year, self.short_year) {
            (Some(year), _) => format!("{year:04}-{:02}-{:02}", self.month, self.day),
            (None, Some(short)) => format!("??{short:02}-{:02}-{:02}", self.month, self.day),
            (None, None) => format!("????-{:02}-{:02}", self.month, self.day),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NormalizedValue {
    Amount(Amount),
    Date(DateValue),
    Numeral(String),
    Role(RoleCategory),
    Reference(String),
}

impl NormalizedValue {
    pub fn canonical(&self) -> String {
        match self {
            NormalizedValue::Amount(amount) => amount.to_string(),
            NormalizedValue::Date(date) => date.canonical(),
            NormalizedValue::Numeral(numeral) => numeral.clone(),
            NormalizedValue::Role(role) => role.as_str().to_string(),
            NormalizedValue::Reference(reference) => reference.clone(),
        }
    }

    pub fn as_amount(&self) -> Option<&Amount> {
        match self {
            NormalizedValue::Amount(amount) => Some(amount),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Ner,
    TableExtractor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyReading {
    pub strategy: String,
    pub role_label: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub kind: EntityKind,
    pub raw: String,
    pub value: NormalizedValue,
    pub offset: usize,
    pub page: u32,
    pub confidence: f64,
    pub origin: Origin,
    /// Role the value is attributed to (amounts only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<RoleCategory>,
    #[serde(default)]
    pub ambiguous: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readings: Vec<StrategyReading>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Accepted,
    Rejected,
    Ambiguous,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedEntity {
    #[serde(flatten)]
    pub candidate: EntityCandidate,
    pub status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corroborating: Vec<EntityCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting: Vec<EntityCandidate>,
}

impl ValidatedEntity {
    pub fn kind(&self) -> EntityKind {
        self.candidate.kind
    }

    pub fn confidence(&self) -> f64 {
        self.candidate.confidence
    }

    pub fn offset(&self) -> usize {
        self.candidate.offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    StructuralAnomaly,
    EntityRejected,
    ExtractionDisagreement,
    OrphanNumeral,
    UnclassifiedRole,
    AmbiguousDate,
    LowConfidence,
    MergeConflict,
    ScaleInversion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub kind: WarningKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntities {
    pub doc_id: String,
    pub title: Option<String>,
    pub code: Option<String>,
    pub page_count: usize,
    pub sections: SectionTree,
    pub anomalies: Vec<StructuralAnomaly>,
    pub entities: Vec<ValidatedEntity>,
    pub confidence: f64,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    pub start: u32,
    pub end: u32,
}

impl PageSpan {
    pub fn contains(&self, page: u32) -> bool {
        self.start <= page && page <= self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityPayload {
    pub amount: Vec<ValidatedEntity>,
    pub role: Vec<ValidatedEntity>,
    pub numeral: Vec<ValidatedEntity>,
    pub date: Vec<ValidatedEntity>,
    pub reference: Vec<ValidatedEntity>,
}

impl EntityPayload {
    pub fn push(&mut self, entity: ValidatedEntity) {
        match entity.kind() {
            EntityKind::Amount => self.amount.push(entity),
            EntityKind::Role => self.role.push(entity),
            EntityKind::Numeral => self.numeral.push(entity),
            EntityKind::Date => self.date.push(entity),
            EntityKind::LegalReference => self.reference.push(entity),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidatedEntity> {
        self.amount
            .iter()
            .chain(&self.role)
            .chain(&self.numeral)
            .chain(&self.date)
            .chain(&self.reference)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    Section,
    Window,
    FrontMatter,
    Page,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub seq: usize,
    pub source: ChunkSource,
    pub text: String,
    pub hierarchy_path: Vec<String>,
    pub pages: PageSpan,
    pub start_offset: usize,
    pub end_offset: usize,
    pub entities: EntityPayload,
    pub content_tags: Vec<String>,
    pub confidence: f64,
    pub content_hash: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_round_trips_through_canonical_form() {
        let amount = Amount::parse("S/ 380.00").expect("amount parses");
        assert_eq!(amount.cents, 38_000);
        assert_eq!(amount.to_string(), "S/ 380.00");
        assert_eq!(Amount::parse(&amount.to_string()), Some(amount));
    }

    #[test]
    fn amount_parse_handles_separator_conventions() {
        assert_eq!(Amount::parse("S/. 1,200.50").map(|a| a.cents), Some(120_050));
        assert_eq!(Amount::parse("S/ 1.200,50").map(|a| a.cents), Some(120_050));
        assert_eq!(Amount::parse("S/ 1 200").map(|a| a.cents), Some(120_000));
        assert_eq!(Amount::parse("US$ 15").map(|a| a.currency), Some(Currency::Usd));
        assert_eq!(Amount::parse("S/ 320,5").map(|a| a.cents), Some(32_050));
        assert!(Amount::parse("S/").is_none());
        assert!(Amount::parse("380.00").is_none());
        assert_eq!(
            Amount::parse_lenient("380.00", Currency::Pen),
            Some(Amount::new(Currency::Pen, 38_000))
        );
    }

    #[test]
    fn grouped_amounts_round_trip() {
        for raw in ["S/ 1,200.50", "S/ 0.05", "US$ 1,234,567.00"] {
            let amount = Amount::parse(raw).expect("amount parses");
            assert_eq!(amount.to_string(), raw);
        }
    }

    #[test]
    fn amount_serializes_value_as_decimal_string() {
        let amount = Amount::new(Currency::Pen, 32_000);
        let json = serde_json::to_value(amount).expect("amount serializes");
        assert_eq!(json["value"], "320.00");
        assert_eq!(json["currency"], "PEN");

        let back: Amount = serde_json::from_value(json).expect("amount deserializes");
        assert_eq!(back, amount);
    }

    #[test]
    fn unresolved_dates_keep_the_two_digit_year() {
        let date = DateValue {
            year: None,
            short_year: Some(13),
            month: 3,
            day: 5,
        };
        assert_eq!(date.canonical(), "??13-03-05");
    }
}
