use super::*;

use chrono::NaiveDate;

#[derive(Debug, Clone, Copy)]
pub struct ValidationSettings {
    pub amount_ceiling_cents: i64,
    pub confidence_threshold: f64,
    /// Confidence gap within which a table reading beats a recognizer reading.
    pub merge_comparability: f64,
    /// Maximum byte distance between two candidates describing the same value.
    pub merge_window: usize,
    pub tolerance_cents: i64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            amount_ceiling_cents: 1_000_000,
            confidence_threshold: 0.35,
            merge_comparability: 0.15,
            merge_window: 200,
            tolerance_cents: 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub entities: Vec<ValidatedEntity>,
    pub warnings: Vec<ValidationWarning>,
    pub confidence: f64,
}

#[derive(Debug)]
pub struct EntityValidator {
    settings: ValidationSettings,
    weights: KindWeights,
}

impl EntityValidator {
    pub fn new(settings: ValidationSettings, weights: KindWeights) -> Self {
        Self { settings, weights }
    }

    pub fn validate(
        &self,
        ner: Vec<EntityCandidate>,
        table: Vec<EntityCandidate>,
        outline: &SectionOutline,
        pages: &[Page],
    ) -> ValidationOutcome {
        let mut warnings = outline
            .anomalies
            .iter()
            .map(|anomaly| ValidationWarning {
                kind: WarningKind::StructuralAnomaly,
                message: anomaly.message.clone(),
                page: Some(anomaly.page),
                offset: Some(anomaly.offset),
            })
            .collect::<Vec<ValidationWarning>>();

        let mut entities = self.merge(ner, table, &mut warnings);
        for entity in &mut entities {
            self.apply_rules(entity, &outline.tree, &mut warnings);
        }
        warnings.extend(scale_inversions(&entities, &outline.tree));
        entities.sort_by(|a, b| a.offset().cmp(&b.offset()).then(a.kind().cmp(&b.kind())));

        let confidence = self.document_confidence(&entities, pages);
        debug!(
            entities = entities.len(),
            warnings = warnings.len(),
            confidence,
            "entity validation complete"
        );

        ValidationOutcome {
            entities,
            warnings,
            confidence,
        }
    }

    /// Pairs every table reading with the nearest compatible recognizer amount.
    fn merge(
        &self,
        ner: Vec<EntityCandidate>,
        table: Vec<EntityCandidate>,
        warnings: &mut Vec<ValidationWarning>,
    ) -> Vec<ValidatedEntity> {
        let mut ner_slots = ner.into_iter().map(Some).collect::<Vec<Option<EntityCandidate>>>();
        let mut merged = Vec::new();

        for table_candidate in table {
            let partner = ner_slots
                .iter()
                .enumerate()
                .filter_map(|(index, slot)| {
                    let candidate = slot.as_ref()?;
                    self.compatible(candidate, &table_candidate)
                        .then(|| (candidate.offset.abs_diff(table_candidate.offset), index))
                })
                .min()
                .and_then(|(_, index)| ner_slots[index].take());

            if table_candidate.ambiguous {
                warnings.push(disagreement_warning(&table_candidate));
            }

            let entity = match partner {
                None => ValidatedEntity {
                    status: initial_status(&table_candidate),
                    candidate: table_candidate,
                    corroborating: Vec::new(),
                    conflicting: Vec::new(),
                },
                Some(ner_candidate) => self.resolve_pair(ner_candidate, table_candidate, warnings),
            };
            merged.push(entity);
        }

        merged.extend(ner_slots.into_iter().flatten().map(|candidate| ValidatedEntity {
            status: initial_status(&candidate),
            candidate,
            corroborating: Vec::new(),
            conflicting: Vec::new(),
        }));
        merged
    }

    fn compatible(&self, ner: &EntityCandidate, table: &EntityCandidate) -> bool {
        if ner.kind != EntityKind::Amount
            || ner.page != table.page
            || ner.offset.abs_diff(table.offset) > self.settings.merge_window
        {
            return false;
        }
        match ner.role {
            Some(role) => Some(role) == table.role,
            None => match (ner.value.as_amount(), table.value.as_amount()) {
                (Some(left), Some(right)) => left.within(right, self.settings.tolerance_cents),
                _ => false,
            },
        }
    }

    fn resolve_pair(
        &self,
        ner: EntityCandidate,
        table: EntityCandidate,
        warnings: &mut Vec<ValidationWarning>,
    ) -> ValidatedEntity {
        let tolerance = self.settings.tolerance_cents;
        let values_agree = match (ner.value.as_amount(), table.value.as_amount()) {
            (Some(left), Some(right)) => left.within(right, tolerance),
            _ => false,
        };

        if table.ambiguous {
            // The recognizer reading sides with whichever strategy reading it matches.
            let supports_a_reading = ner.value.as_amount().is_some_and(|amount| {
                table
                    .readings
                    .iter()
                    .any(|reading| reading.amount.within(amount, tolerance))
            });
            let (corroborating, conflicting) = if supports_a_reading {
                (vec![ner], Vec::new())
            } else {
                (Vec::new(), vec![ner])
            };
            return ValidatedEntity {
                candidate: table,
                status: ValidationStatus::Ambiguous,
                corroborating,
                conflicting,
            };
        }

        let table_wins = table.confidence + self.settings.merge_comparability >= ner.confidence;
        let (mut winner, loser) = if table_wins { (table, ner) } else { (ner, table) };

        if values_agree {
            winner.confidence = (winner.confidence.max(loser.confidence) + 0.05).min(0.99);
            if winner.role.is_none() {
                winner.role = loser.role;
            }
            return ValidatedEntity {
                status: initial_status(&winner),
                candidate: winner,
                corroborating: vec![loser],
                conflicting: Vec::new(),
            };
        }

        warnings.push(ValidationWarning {
            kind: WarningKind::MergeConflict,
            message: format!(
                "{} reading {} kept over {} reading {}",
                origin_label(winner.origin),
                winner.value.canonical(),
                origin_label(loser.origin),
                loser.value.canonical()
            ),
            page: Some(winner.page),
            offset: Some(winner.offset),
        });
        winner.confidence *= 0.85;
        ValidatedEntity {
            status: initial_status(&winner),
            candidate: winner,
            corroborating: Vec::new(),
            conflicting: vec![loser],
        }
    }

    fn apply_rules(
        &self,
        entity: &mut ValidatedEntity,
        tree: &SectionTree,
        warnings: &mut Vec<ValidationWarning>,
    ) {
        let page = Some(entity.candidate.page);
        let offset = Some(entity.candidate.offset);

        match &entity.candidate.value {
            NormalizedValue::Amount(amount) => {
                if amount.cents <= 0 || amount.cents > self.settings.amount_ceiling_cents {
                    entity.status = ValidationStatus::Rejected;
                    warnings.push(ValidationWarning {
                        kind: WarningKind::EntityRejected,
                        message: format!(
                            "amount {amount} outside the plausible range (0, {}]",
                            Amount::new(amount.currency, self.settings.amount_ceiling_cents)
                        ),
                        page,
                        offset,
                    });
                } else if entity.candidate.role == Some(RoleCategory::Unclassified) {
                    warnings.push(ValidationWarning {
                        kind: WarningKind::UnclassifiedRole,
                        message: format!(
                            "amount {amount} is attributed to an unclassified role"
                        ),
                        page,
                        offset,
                    });
                }
            }
            NormalizedValue::Date(date) => match date.year {
                None => {
                    entity.status = ValidationStatus::Ambiguous;
                    warnings.push(ValidationWarning {
                        kind: WarningKind::AmbiguousDate,
                        message: format!(
                            "date {} has a two-digit year and no publication year to anchor it",
                            entity.candidate.raw
                        ),
                        page,
                        offset,
                    });
                }
                Some(year) => {
                    if NaiveDate::from_ymd_opt(year, date.month, date.day).is_none() {
                        entity.status = ValidationStatus::Rejected;
                        warnings.push(ValidationWarning {
                            kind: WarningKind::EntityRejected,
                            message: format!("date {} is not a calendar date", entity.candidate.raw),
                            page,
                            offset,
                        });
                    }
                }
            },
            NormalizedValue::Numeral(numeral) => {
                let names_a_section = tree
                    .nodes
                    .iter()
                    .any(|node| is_same_or_sub_numeral(numeral, &node.numeral));
                if entity.kind() == EntityKind::Numeral && !names_a_section {
                    warnings.push(ValidationWarning {
                        kind: WarningKind::OrphanNumeral,
                        message: format!("numeral {numeral} does not match any section"),
                        page,
                        offset,
                    });
                    entity.candidate.confidence *= 0.5;
                }
            }
            NormalizedValue::Role(RoleCategory::Unclassified) => {
                warnings.push(ValidationWarning {
                    kind: WarningKind::UnclassifiedRole,
                    message: format!("role mention {} is unclassified", entity.candidate.raw),
                    page,
                    offset,
                });
            }
            NormalizedValue::Role(_) | NormalizedValue::Reference(_) => {}
        }

        if entity.status != ValidationStatus::Rejected
            && entity.candidate.confidence < self.settings.confidence_threshold
        {
            warnings.push(ValidationWarning {
                kind: WarningKind::LowConfidence,
                message: format!(
                    "{} {} has confidence {:.2} below threshold {:.2}",
                    entity.kind().as_str(),
                    entity.candidate.value.canonical(),
                    entity.candidate.confidence,
                    self.settings.confidence_threshold
                ),
                page,
                offset,
            });
        }
    }

    /// Weighted mean over non-rejected entities; mean page confidence when there are none.
    fn document_confidence(&self, entities: &[ValidatedEntity], pages: &[Page]) -> f64 {
        let (weighted, total) = entities
            .iter()
            .filter(|entity| entity.status != ValidationStatus::Rejected)
            .fold((0.0, 0.0), |(weighted, total), entity| {
                let weight = self.weights.weight(entity.kind());
                (weighted + weight * entity.confidence(), total + weight)
            });
        if total > 0.0 {
            return (weighted / total).clamp(0.0, 1.0);
        }
        if pages.is_empty() {
            return 0.0;
        }
        pages.iter().map(|page| page.confidence).sum::<f64>() / pages.len() as f64
    }
}

fn initial_status(candidate: &EntityCandidate) -> ValidationStatus {
    if candidate.ambiguous {
        ValidationStatus::Ambiguous
    } else {
        ValidationStatus::Accepted
    }
}

fn origin_label(origin: Origin) -> &'static str {
    match origin {
        Origin::Ner => "recognizer",
        Origin::TableExtractor => "table",
    }
}

fn disagreement_warning(candidate: &EntityCandidate) -> ValidationWarning {
    let readings = candidate
        .readings
        .iter()
        .map(|reading| format!("{}={}", reading.strategy, reading.amount))
        .collect::<Vec<String>>()
        .join(", ");
    ValidationWarning {
        kind: WarningKind::ExtractionDisagreement,
        message: format!(
            "table strategies disagree for {} on page {}: {readings}",
            candidate.role.unwrap_or(RoleCategory::Unclassified).as_str(),
            candidate.page
        ),
        page: Some(candidate.page),
        offset: Some(candidate.offset),
    }
}

/// A more senior role receiving less than a junior one in the same section and currency.
fn scale_inversions(entities: &[ValidatedEntity], tree: &SectionTree) -> Vec<ValidationWarning> {
    let mut by_section = BTreeMap::<(Option<usize>, Currency), Vec<(u8, &ValidatedEntity)>>::new();
    for entity in entities {
        if entity.status != ValidationStatus::Accepted {
            continue;
        }
        let (Some(amount), Some(rank)) = (
            entity.candidate.value.as_amount(),
            entity.candidate.role.and_then(RoleCategory::rank),
        ) else {
            continue;
        };
        let section = tree.innermost_at(entity.offset()).map(|node| node.id);
        by_section
            .entry((section, amount.currency))
            .or_default()
            .push((rank, entity));
    }

    let mut warnings = Vec::new();
    for group in by_section.values() {
        for (senior_rank, senior) in group {
            for (junior_rank, junior) in group {
                let (Some(senior_amount), Some(junior_amount)) =
                    (senior.candidate.value.as_amount(), junior.candidate.value.as_amount())
                else {
                    continue;
                };
                if senior_rank < junior_rank && senior_amount.cents < junior_amount.cents {
                    warnings.push(ValidationWarning {
                        kind: WarningKind::ScaleInversion,
                        message: format!(
                            "{} receives {} but {} receives {}",
                            senior.candidate.role.unwrap_or(RoleCategory::Unclassified).as_str(),
                            senior_amount,
                            junior.candidate.role.unwrap_or(RoleCategory::Unclassified).as_str(),
                            junior_amount
                        ),
                        page: Some(senior.candidate.page),
                        offset: Some(senior.offset()),
                    });
                }
            }
        }
    }
    warnings
}
