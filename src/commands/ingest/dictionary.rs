use super::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    pub category: RoleCategory,
    pub phrases: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KindWeights {
    pub amount: f64,
    pub date: f64,
    pub numeral: f64,
    pub role: f64,
    pub reference: f64,
}

impl KindWeights {
    pub fn weight(&self, kind: EntityKind) -> f64 {
        match kind {
            EntityKind::Amount => self.amount,
            EntityKind::Date => self.date,
            EntityKind::Numeral => self.numeral,
            EntityKind::Role => self.role,
            EntityKind::LegalReference => self.reference,
        }
    }
}

impl Default for KindWeights {
    fn default() -> Self {
        Self {
            amount: 3.0,
            date: 1.0,
            numeral: 1.0,
            role: 3.0,
            reference: 1.0,
        }
    }
}

/// Immutable taxonomies and keyword sets shared by every stage of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainDictionary {
    pub roles: Vec<RoleEntry>,
    pub amount_context_keywords: Vec<String>,
    pub content_tags: BTreeMap<String, Vec<String>>,
    pub kind_weights: KindWeights,
}

impl Default for DomainDictionary {
    fn default() -> Self {
        fn phrases(values: &[&str]) -> Vec<String> {
            values.iter().map(|value| value.to_string()).collect()
        }

        let roles = vec![
            RoleEntry {
                category: RoleCategory::Minister,
                phrases: phrases(&[
                    "ministro de estado",
                    "ministra de estado",
                    "presidente del consejo de ministros",
                    "titular del pliego",
                    "ministro",
                    "ministra",
                ]),
            },
            RoleEntry {
                category: RoleCategory::ViceMinister,
                phrases: phrases(&["vice ministro", "vice ministra", "viceministro", "viceministra"]),
            },
            RoleEntry {
                category: RoleCategory::SecretaryGeneral,
                phrases: phrases(&["secretario general", "secretaria general"]),
            },
            RoleEntry {
                category: RoleCategory::Director,
                phrases: phrases(&[
                    "director general",
                    "directora general",
                    "director ejecutivo",
                    "jefe de oficina",
                    "jefe de organo",
                    "director",
                    "directora",
                ]),
            },
            RoleEntry {
                category: RoleCategory::CivilServant,
                phrases: phrases(&[
                    "servidor civil",
                    "servidora civil",
                    "servidores civiles",
                    "servidor publico",
                    "servidores publicos",
                    "empleado publico",
                    "funcionario",
                    "funcionarios",
                    "trabajador",
                    "trabajadores",
                ]),
            },
        ];

        let mut content_tags = BTreeMap::new();
        content_tags.insert(
            "allowance".to_string(),
            phrases(&["viatico", "asignacion", "escala"]),
        );
        content_tags.insert(
            "definition".to_string(),
            phrases(&["se entiende por", "definicion", "glosario"]),
        );
        content_tags.insert(
            "procedure".to_string(),
            phrases(&[
                "procedimiento",
                "solicitud",
                "rendicion de cuentas",
                "plazo",
                "tramite",
                "requisito",
            ]),
        );
        content_tags.insert(
            "sanction".to_string(),
            phrases(&[
                "sancion",
                "infraccion",
                "responsabilidad administrativa",
                "penalidad",
            ]),
        );

        Self {
            roles,
            amount_context_keywords: phrases(&[
                "viatico",
                "monto",
                "diario",
                "diaria",
                "por dia",
                "asignacion",
                "escala",
                "importe",
                "tope",
            ]),
            content_tags,
            kind_weights: KindWeights::default(),
        }
    }
}

pub fn load_dictionary(path: Option<&Path>) -> Result<DomainDictionary> {
    match path {
        Some(path) => {
            let dictionary: DomainDictionary = crate::util::read_json(path)
                .with_context(|| format!("failed to load dictionary {}", path.display()))?;
            if dictionary.roles.is_empty() {
                bail!("dictionary {} defines no role phrases", path.display());
            }
            Ok(dictionary)
        }
        None => Ok(DomainDictionary::default()),
    }
}

/// Lowercases and strips Spanish diacritics so matching is accent-insensitive.
pub fn fold_text(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|ch| match ch {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

pub fn contains_any_keyword(folded: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|keyword| folded.contains(keyword.as_str()))
}

#[derive(Debug, Clone)]
pub struct WordToken {
    pub start: usize,
    pub end: usize,
    pub folded: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleMatch {
    pub start: usize,
    pub end: usize,
    pub category: RoleCategory,
    pub fuzzy: bool,
}

#[derive(Debug)]
pub struct RoleMatcher {
    word: Regex,
    phrases: Vec<(RoleCategory, Vec<String>)>,
}

impl RoleMatcher {
    pub fn new(dictionary: &DomainDictionary) -> Result<Self> {
        let mut phrases = dictionary
            .roles
            .iter()
            .flat_map(|entry| {
                entry.phrases.iter().map(move |phrase| {
                    let tokens = fold_text(phrase)
                        .split_whitespace()
                        .map(ToOwned::to_owned)
                        .collect::<Vec<String>>();
                    (entry.category, tokens)
                })
            })
            .filter(|(_, tokens)| !tokens.is_empty())
            .collect::<Vec<_>>();
        // Longest phrase first so "ministro de estado" wins over "ministro".
        phrases.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        Ok(Self {
            word: Regex::new(r"\p{L}+").context("failed to compile word token regex")?,
            phrases,
        })
    }

    pub fn tokenize(&self, text: &str) -> Vec<WordToken> {
        self.word
            .find_iter(text)
            .map(|found| WordToken {
                start: found.start(),
                end: found.end(),
                folded: fold_text(found.as_str()),
            })
            .collect()
    }

    pub fn find_all(&self, text: &str) -> Vec<RoleMatch> {
        let tokens = self.tokenize(text);
        let mut matches = Vec::new();
        let mut index = 0usize;

        'tokens: while index < tokens.len() {
            for fuzzy in [false, true] {
                for (category, phrase) in &self.phrases {
                    let Some(window) = tokens.get(index..index + phrase.len()) else {
                        continue;
                    };
                    if window_matches(window, phrase, fuzzy) {
                        matches.push(RoleMatch {
                            start: window[0].start,
                            end: window[window.len() - 1].end,
                            category: *category,
                            fuzzy,
                        });
                        index += phrase.len();
                        continue 'tokens;
                    }
                }
            }
            index += 1;
        }

        matches
    }

    /// Maps a free-text label (for example a table row header) onto a category.
    pub fn classify(&self, label: &str) -> (RoleCategory, f64) {
        match self.find_all(label).first() {
            Some(found) if !found.fuzzy => (found.category, 0.9),
            Some(found) => (found.category, 0.6),
            None => (RoleCategory::Unclassified, 0.3),
        }
    }
}

fn window_matches(window: &[WordToken], phrase: &[String], fuzzy: bool) -> bool {
    if !fuzzy {
        return window
            .iter()
            .zip(phrase)
            .all(|(token, expected)| token.folded == *expected);
    }

    let mut has_long_token = false;
    for (token, expected) in window.iter().zip(phrase) {
        let long = token.folded.chars().count() >= 5 && expected.chars().count() >= 5;
        has_long_token |= long;
        let close = if long {
            within_one_edit(&token.folded, expected)
        } else {
            token.folded == *expected
        };
        if !close {
            return false;
        }
    }
    has_long_token
}

pub fn within_one_edit(left: &str, right: &str) -> bool {
    let a = left.chars().collect::<Vec<char>>();
    let b = right.chars().collect::<Vec<char>>();
    if a.len().abs_diff(b.len()) > 1 {
        return false;
    }

    let (mut i, mut j, mut edits) = (0usize, 0usize, 0usize);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            i += 1;
            j += 1;
            continue;
        }
        edits += 1;
        if edits > 1 {
            return false;
        }
        match a.len().cmp(&b.len()) {
            std::cmp::Ordering::Greater => i += 1,
            std::cmp::Ordering::Less => j += 1,
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
    }

    edits + (a.len() - i) + (b.len() - j) <= 1
}
