use super::*;

const CREATED_AT: &str = "2024-05-01T12:00:00Z";

fn page(number: u32, text: &str) -> Page {
    Page {
        page_number: number,
        text: text.to_string(),
        layout: Vec::new(),
        confidence: 1.0,
    }
}

fn table_cell(text: &str, x0: f32, y0: f32, reading_order: u32) -> LayoutElement {
    LayoutElement {
        bbox: crate::model::BoundingBox {
            x0,
            y0,
            x1: x0 + 120.0,
            y1: y0 + 10.0,
        },
        region_type: RegionType::Table,
        reading_order,
        text: text.to_string(),
    }
}

fn directive(doc_id: &str, pages: Vec<Page>) -> DocumentInput {
    DocumentInput {
        doc_id: doc_id.to_string(),
        title: Some("Directiva de viáticos".to_string()),
        code: Some("DIR-001-2013".to_string()),
        publication_year: Some(2013),
        pages,
    }
}

fn run_pipeline(
    input: &DocumentInput,
    config: &PipelineConfig,
    dictionary: &DomainDictionary,
    created_at: &str,
) -> Result<PipelineOutput, PipelineError> {
    DirectivePipeline::new(config.clone(), dictionary)
        .expect("pipeline builds")
        .process(input, created_at)
}

fn process(input: &DocumentInput, config: &PipelineConfig) -> PipelineOutput {
    run_pipeline(input, config, &DomainDictionary::default(), CREATED_AT).expect("pipeline runs")
}

fn allowance_directive() -> DocumentInput {
    directive(
        "DIR-001",
        vec![page(
            1,
            "DIRECTIVA N° 001-2013-MINAGRI\n\
             8. DISPOSICIONES ESPECÍFICAS\n\
             8.4 Escala de viáticos\n\
             8.4.17 Montos diarios por cargo\n\
             Servidor civil        S/ 320.00\n\
             Ministro de Estado    S/ 380.00",
        )],
    )
}

fn amounts_by_role(output: &PipelineOutput) -> Vec<(Option<RoleCategory>, i64, ValidationStatus)> {
    output
        .entities
        .entities
        .iter()
        .filter(|entity| entity.kind() == EntityKind::Amount)
        .filter_map(|entity| {
            let amount = entity.candidate.value.as_amount()?;
            Some((entity.candidate.role, amount.cents, entity.status))
        })
        .collect()
}

fn normalized_text(input: &DocumentInput) -> DocumentText {
    let (pages, _) = normalize_pages(&input.pages).expect("pages normalize");
    DocumentText::from_pages(&pages)
}

fn assert_full_coverage(input: &DocumentInput, chunks: &[Chunk]) {
    let document = normalized_text(input);
    for (offset, ch) in document.as_str().char_indices() {
        if ch.is_whitespace() {
            continue;
        }
        assert!(
            chunks
                .iter()
                .any(|chunk| chunk.start_offset <= offset && offset < chunk.end_offset),
            "byte {offset} ({ch:?}) is not covered by any chunk"
        );
    }
}

#[test]
fn allowance_table_yields_both_role_amounts_under_nested_numeral() {
    let output = process(&allowance_directive(), &PipelineConfig::default());

    let amounts = amounts_by_role(&output);
    assert_eq!(amounts.len(), 2);
    assert!(amounts.contains(&(
        Some(RoleCategory::CivilServant),
        32_000,
        ValidationStatus::Accepted
    )));
    assert!(amounts.contains(&(
        Some(RoleCategory::Minister),
        38_000,
        ValidationStatus::Accepted
    )));

    let tree = &output.entities.sections;
    let node = tree.find("8.4.17").expect("8.4.17 detected");
    assert_eq!(node.parent.as_deref(), Some("8.4"));
    assert_eq!(node.level, 3);
    assert!(output.entities.anomalies.is_empty());

    let section_chunk = output
        .chunks
        .iter()
        .find(|chunk| chunk.hierarchy_path == ["8", "8.4", "8.4.17"])
        .expect("chunk for 8.4.17");
    assert_eq!(section_chunk.source, ChunkSource::Section);
    assert_eq!(section_chunk.entities.amount.len(), 2);
    assert_eq!(section_chunk.entities.role.len(), 2);
    assert!(section_chunk.content_tags.contains(&"amount".to_string()));
}

#[test]
fn merged_amounts_keep_the_recognizer_reading_as_corroboration() {
    let output = process(&allowance_directive(), &PipelineConfig::default());

    let minister = output
        .entities
        .entities
        .iter()
        .find(|entity| {
            entity.kind() == EntityKind::Amount && entity.candidate.role == Some(RoleCategory::Minister)
        })
        .expect("minister amount");
    assert_eq!(minister.candidate.origin, Origin::TableExtractor);
    assert_eq!(minister.corroborating.len(), 1);
    assert_eq!(minister.corroborating[0].origin, Origin::Ner);
    assert!(minister.conflicting.is_empty());
    assert!(minister.candidate.readings.len() >= 2);
}

#[test]
fn strategy_disagreement_yields_one_ambiguous_candidate_with_all_readings() {
    let mut input = allowance_directive();
    input.pages[0].layout = vec![
        table_cell("Servidor civil", 10.0, 100.0, 1),
        table_cell("S/ 319.00", 200.0, 100.0, 2),
        table_cell("Ministro de Estado", 10.0, 120.0, 3),
        table_cell("S/ 380.00", 200.0, 120.0, 4),
    ];

    let output = process(&input, &PipelineConfig::default());

    let civil = output
        .entities
        .entities
        .iter()
        .filter(|entity| {
            entity.kind() == EntityKind::Amount
                && entity.candidate.role == Some(RoleCategory::CivilServant)
        })
        .collect::<Vec<&ValidatedEntity>>();
    assert_eq!(civil.len(), 1);
    assert_eq!(civil[0].status, ValidationStatus::Ambiguous);
    assert!(civil[0].candidate.ambiguous);

    let readings = civil[0]
        .candidate
        .readings
        .iter()
        .map(|reading| (reading.strategy.as_str(), reading.amount.cents))
        .collect::<Vec<(&str, i64)>>();
    assert!(readings.contains(&(RULING_GEOMETRY, 31_900)));
    assert!(readings.contains(&(WHITESPACE_ALIGNMENT, 32_000)));
    assert!(readings.contains(&(CELL_SEQUENCE, 32_000)));
    assert_eq!(civil[0].candidate.value.as_amount().map(|a| a.cents), Some(32_000));

    assert!(output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::ExtractionDisagreement));

    let minister = amounts_by_role(&output)
        .into_iter()
        .find(|(role, _, _)| *role == Some(RoleCategory::Minister))
        .expect("minister amount");
    assert_eq!(minister, (Some(RoleCategory::Minister), 38_000, ValidationStatus::Accepted));
}

#[test]
fn missing_parent_is_synthesized_and_reported() {
    let input = directive(
        "DIR-002",
        vec![page(
            1,
            "8. DISPOSICIONES\n8.2 Alcance\nTexto del alcance.\n8.3.10 Rendición de cuentas\nTexto final.",
        )],
    );

    let output = process(&input, &PipelineConfig::default());
    let tree = &output.entities.sections;

    let anomaly = output
        .entities
        .anomalies
        .iter()
        .find(|anomaly| anomaly.kind == AnomalyKind::MissingParent)
        .expect("missing parent anomaly");
    assert_eq!(anomaly.numeral, "8.3.10");

    let synthetic = tree.find("8.3").expect("synthetic 8.3");
    assert!(synthetic.synthetic);
    assert_eq!(synthetic.parent.as_deref(), Some("8"));
    assert_eq!(tree.find("8.3.10").and_then(|node| node.parent.as_deref()), Some("8.3"));
    assert!(output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::StructuralAnomaly));
}

#[test]
fn every_parent_is_a_numeral_prefix_one_level_up() {
    let input = directive(
        "DIR-003",
        vec![
            page(1, "1. OBJETIVO\nTexto.\n2. ALCANCE\n2.1 Entidades\n2.1.1 Sedes\nTexto."),
            page(2, "2.2 Personal\nTexto.\n3. ESCALA\n3.1.4 Montos\nTexto.\n2.3 Excepciones\nTexto."),
        ],
    );

    let output = process(&input, &PipelineConfig::default());
    let tree = &output.entities.sections;
    assert!(!tree.nodes.is_empty());

    for node in &tree.nodes {
        match node.parent.as_deref() {
            Some(parent) => {
                let parent_node = tree.find(parent).expect("parent exists");
                assert!(is_same_or_sub_numeral(&node.numeral, parent));
                assert_ne!(node.numeral, parent);
                assert_eq!(parent_node.level + 1, node.level);
                assert!(parent_node.children.contains(&node.id));
            }
            None => {
                assert_eq!(node.level, 1);
                assert!(tree.roots.contains(&node.id));
            }
        }
        assert!(node.span.start_offset <= node.span.end_offset);
        assert!(node.span.start_page <= node.span.end_page);
    }

    assert!(output
        .entities
        .anomalies
        .iter()
        .any(|anomaly| anomaly.kind == AnomalyKind::OutOfOrderParent && anomaly.numeral == "2.3"));
}

#[test]
fn duplicate_numerals_keep_the_first_occurrence() {
    let input = directive(
        "DIR-004",
        vec![page(1, "1. OBJETIVO\nTexto.\n1. OBJETIVO REPETIDO\nTexto.")],
    );

    let output = process(&input, &PipelineConfig::default());
    let tree = &output.entities.sections;
    assert_eq!(tree.nodes.iter().filter(|node| node.numeral == "1").count(), 1);
    assert_eq!(tree.find("1").map(|node| node.title.as_str()), Some("OBJETIVO"));
    assert!(output
        .entities
        .anomalies
        .iter()
        .any(|anomaly| anomaly.kind == AnomalyKind::DuplicateNumeral));
}

#[test]
fn recognized_amounts_round_trip_through_canonical_form() {
    let recognizer =
        LegalEntityRecognizer::new(&DomainDictionary::default(), RecognizerSettings::default())
            .expect("recognizer");
    let document = DocumentText::from_pages(&[page(
        1,
        "El tope es S/ 1,200.50 por día; en el exterior US$ 200.",
    )]);

    let amounts = recognizer
        .recognize(&document, None)
        .into_iter()
        .filter_map(|candidate| candidate.value.as_amount().copied())
        .collect::<Vec<Amount>>();
    assert_eq!(amounts.len(), 2);
    assert_eq!(amounts[0].to_string(), "S/ 1,200.50");
    assert_eq!(amounts[1], Amount::new(Currency::Usd, 20_000));
    for amount in amounts {
        assert_eq!(Amount::parse(&amount.to_string()), Some(amount));
    }
}

#[test]
fn recognizer_reads_spanish_dates_with_century_window() {
    let recognizer =
        LegalEntityRecognizer::new(&DomainDictionary::default(), RecognizerSettings::default())
            .expect("recognizer");
    let document = DocumentText::from_pages(&[page(
        1,
        "Lima, 15 de setiembre de 2013. Vigente desde 01/03/13.",
    )]);

    let resolved = recognizer
        .recognize(&document, Some(2013))
        .into_iter()
        .filter(|candidate| candidate.kind == EntityKind::Date)
        .map(|candidate| candidate.value.canonical())
        .collect::<Vec<String>>();
    assert_eq!(resolved, vec!["2013-09-15", "2013-03-01"]);

    let unresolved = recognizer
        .recognize(&document, None)
        .into_iter()
        .filter(|candidate| candidate.kind == EntityKind::Date && candidate.ambiguous)
        .map(|candidate| candidate.value.canonical())
        .collect::<Vec<String>>();
    assert_eq!(unresolved, vec!["??13-03-01"]);

    assert_eq!(resolve_two_digit_year(99, 2013), 1999);
    assert_eq!(resolve_two_digit_year(14, 2013), 2014);
}

#[test]
fn recognizer_normalizes_legal_references() {
    let recognizer =
        LegalEntityRecognizer::new(&DomainDictionary::default(), RecognizerSettings::default())
            .expect("recognizer");
    let document = DocumentText::from_pages(&[page(
        1,
        "Conforme a la Ley N° 27619 y el Decreto Supremo N° 007-2013-EF, artículo 5.",
    )]);

    let references = recognizer
        .recognize(&document, None)
        .into_iter()
        .filter(|candidate| candidate.kind == EntityKind::LegalReference)
        .map(|candidate| candidate.value.canonical())
        .collect::<Vec<String>>();
    assert_eq!(references, vec!["ley:27619", "decreto_supremo:007-2013-EF", "5"]);
}

#[test]
fn role_matcher_tolerates_single_character_ocr_errors() {
    let matcher = RoleMatcher::new(&DomainDictionary::default()).expect("matcher");

    assert_eq!(matcher.classify("Ministro de Estado"), (RoleCategory::Minister, 0.9));
    assert_eq!(
        matcher.classify("Secretaro General"),
        (RoleCategory::SecretaryGeneral, 0.6)
    );
    assert_eq!(matcher.classify("Chofer"), (RoleCategory::Unclassified, 0.3));
    assert!(!within_one_edit("viceministro", "viceminsitro"));
    assert!(within_one_edit("servidor", "servidr"));
}

#[test]
fn normalization_strips_running_headers_page_numbers_and_hyphenation() {
    let pages = vec![
        page(1, "MINISTERIO DE AGRICULTURA\nMontos de viá-\nticos aprobados.\nPágina 1 de 3"),
        page(2, "MINISTERIO DE AGRICULTURA\nTexto dos.\nPágina 2 de 3"),
        page(3, "MINISTERIO DE AGRICULTURA\nTexto tres.\n- 3 -"),
    ];

    let (normalized, stats) = normalize_pages(&pages).expect("normalize");
    assert_eq!(stats.header_lines_removed, 3);
    assert_eq!(stats.page_number_lines_removed, 3);
    assert_eq!(stats.dehyphenation_merges, 1);
    assert_eq!(normalized[0].text, "Montos de viáticos aprobados.");
    assert_eq!(normalized[2].text, "Texto tres.");
}

#[test]
fn chunks_cover_every_non_blank_byte() {
    let input = directive(
        "DIR-005",
        vec![
            page(
                1,
                "Preámbulo de la directiva sobre viáticos.\n\
                 1. OBJETIVO\n\
                 Establecer el procedimiento para la asignación de viáticos en comisión de servicio \
                 dentro del territorio nacional y en el exterior del país.\n\
                 2. ESCALA",
            ),
            page(
                2,
                "Servidor civil        S/ 320.00\n\
                 Ministro de Estado    S/ 380.00\n\
                 2.1 Rendición de cuentas\n\
                 La rendición se presenta dentro del plazo de diez días hábiles.",
            ),
        ],
    );

    for strategy in [ChunkStrategy::Hierarchical, ChunkStrategy::Hybrid, ChunkStrategy::Flat] {
        let config = PipelineConfig {
            chunk_strategy: strategy,
            max_chunk_words: 8,
            overlap_words: 2,
            ..PipelineConfig::default()
        };
        let output = process(&input, &config);
        assert!(!output.chunks.is_empty());
        assert_full_coverage(&input, &output.chunks);
        for page in &input.pages {
            assert!(
                output
                    .chunks
                    .iter()
                    .any(|chunk| chunk.pages.contains(page.page_number)),
                "page {} has no chunk under {}",
                page.page_number,
                strategy.as_str()
            );
        }

        for (seq, chunk) in output.chunks.iter().enumerate() {
            assert_eq!(chunk.seq, seq);
            assert_eq!(chunk.id, format!("DIR-005:chunk:{seq:04}"));
            assert_eq!(chunk.content_hash, crate::util::sha256_text(&chunk.text));
            assert!(chunk.pages.start <= chunk.pages.end);
        }
    }
}

#[test]
fn front_matter_before_the_first_heading_becomes_its_own_chunk() {
    let output = process(&allowance_directive(), &PipelineConfig::default());
    let first = output.chunks.first().expect("chunks");
    assert_eq!(first.source, ChunkSource::FrontMatter);
    assert!(first.hierarchy_path.is_empty());
    assert!(first.text.starts_with("DIRECTIVA"));
}

#[test]
fn blank_leading_and_trailing_pages_fall_inside_a_chunk_span() {
    let input = directive(
        "DIR-013",
        vec![
            page(1, "   "),
            page(
                2,
                "1. ESCALA\n\
                 Servidor civil        S/ 320.00\n\
                 2. RENDICIÓN\n\
                 La rendición se presenta dentro del plazo.",
            ),
            page(3, "\n"),
        ],
    );

    for strategy in [ChunkStrategy::Hierarchical, ChunkStrategy::Hybrid, ChunkStrategy::Flat] {
        let config = PipelineConfig {
            chunk_strategy: strategy,
            ..PipelineConfig::default()
        };
        let output = process(&input, &config);
        assert_full_coverage(&input, &output.chunks);

        let first = output.chunks.first().expect("chunks");
        assert_eq!(first.pages.start, 1, "under {}", strategy.as_str());
        assert_eq!(first.start_offset, 0);
        let last = output.chunks.last().expect("chunks");
        assert_eq!(last.pages.end, 3, "under {}", strategy.as_str());
        for number in 1..=3 {
            assert!(
                output.chunks.iter().any(|chunk| chunk.pages.contains(number)),
                "page {number} has no chunk under {}",
                strategy.as_str()
            );
        }
    }
}

#[test]
fn reprocessing_is_byte_identical() {
    let mut input = allowance_directive();
    input.pages.push(page(2, "9. VIGENCIA\nRige desde el 15 de marzo de 2013."));

    let first = process(&input, &PipelineConfig::default());
    let second = process(&input, &PipelineConfig::default());

    assert_eq!(first.chunks, second.chunks);
    assert_eq!(first.entities, second.entities);
    assert_eq!(
        serde_json::to_string(&first.chunks).expect("serialize"),
        serde_json::to_string(&second.chunks).expect("serialize")
    );
}

#[test]
fn documents_without_headings_fall_back_to_flat_windows() {
    let input = directive(
        "DIR-006",
        vec![page(
            1,
            "Texto corrido sin numeración alguna que describe el otorgamiento de viáticos \
             para los servidores civiles de la entidad durante las comisiones de servicio.",
        )],
    );
    let config = PipelineConfig {
        max_chunk_words: 10,
        overlap_words: 3,
        ..PipelineConfig::default()
    };

    let output = process(&input, &config);
    assert!(output.entities.sections.nodes.is_empty());
    assert_eq!(output.chunk_strategy, ChunkStrategy::Flat);
    assert!(output.chunks.len() > 1);
    assert!(output.chunks.iter().all(|chunk| chunk.source == ChunkSource::Window));
    assert_full_coverage(&input, &output.chunks);
}

#[test]
fn hybrid_keeps_entity_sections_whole_and_windows_the_rest() {
    let input = directive(
        "DIR-007",
        vec![page(
            1,
            "1. OBJETIVO\nEstablecer normas para el otorgamiento.\n\
             2. ALCANCE\nAplica a todas las entidades.\n\
             3. ESCALA\nMinistro de Estado    S/ 380.00",
        )],
    );
    let config = PipelineConfig {
        chunk_strategy: ChunkStrategy::Hybrid,
        ..PipelineConfig::default()
    };

    let output = process(&input, &config);
    let shape = output
        .chunks
        .iter()
        .map(|chunk| (chunk.source, chunk.hierarchy_path.clone()))
        .collect::<Vec<_>>();
    assert_eq!(
        shape,
        vec![
            (ChunkSource::Window, Vec::<String>::new()),
            (ChunkSource::Section, vec!["3".to_string()]),
        ]
    );
}

#[test]
fn implausible_amounts_are_rejected_and_left_out_of_chunks() {
    let input = directive(
        "DIR-008",
        vec![page(
            1,
            "1. ESCALA\nMinistro de Estado    S/ 25,000.00\nServidor civil        S/ 0.00",
        )],
    );

    let output = process(&input, &PipelineConfig::default());
    let amounts = amounts_by_role(&output);
    assert!(amounts
        .iter()
        .all(|(_, _, status)| *status == ValidationStatus::Rejected));
    assert_eq!(amounts.len(), 2);
    assert!(output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::EntityRejected));
    assert!(output.chunks.iter().all(|chunk| chunk.entities.amount.is_empty()));
}

#[test]
fn orphan_numerals_are_flagged_but_kept() {
    let input = directive(
        "DIR-009",
        vec![page(1, "1. OBJETIVO\nSegún el numeral 9.9 de la directiva anterior.")],
    );

    let output = process(&input, &PipelineConfig::default());
    let orphan = output
        .entities
        .entities
        .iter()
        .find(|entity| entity.candidate.value == NormalizedValue::Numeral("9.9".to_string()))
        .expect("orphan numeral");
    assert_eq!(orphan.status, ValidationStatus::Accepted);
    assert!(orphan.confidence() < 0.5);
    assert!(output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::OrphanNumeral));
}

#[test]
fn references_beneath_an_existing_section_are_not_orphans() {
    let input = directive(
        "DIR-014",
        vec![page(
            1,
            "8. DISPOSICIONES ESPECÍFICAS\n\
             8.4 Escala de viáticos\n\
             8.4.17 Montos diarios por cargo\n\
             Conforme al numeral 8.4.17.2 se aplica la escala vigente.",
        )],
    );

    let output = process(&input, &PipelineConfig::default());
    let reference = output
        .entities
        .entities
        .iter()
        .find(|entity| entity.candidate.value == NormalizedValue::Numeral("8.4.17.2".to_string()))
        .expect("sub-numeral recognized");
    assert_eq!(reference.status, ValidationStatus::Accepted);
    assert!(reference.confidence() >= 0.5);
    assert!(!output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::OrphanNumeral));
}

#[test]
fn an_extra_prose_row_does_not_shift_table_rows_out_of_alignment() {
    let input = directive(
        "DIR-015",
        vec![page(
            1,
            "8. DISPOSICIONES ESPECÍFICAS\n\
             8.4 Escala de viáticos\n\
             El servidor civil: S/ 300.00\n\
             8.4.17 Montos diarios por cargo\n\
             Servidor civil        S/ 320.00\n\
             Ministro de Estado    S/ 380.00",
        )],
    );

    let output = process(&input, &PipelineConfig::default());
    let mut amounts = amounts_by_role(&output);
    amounts.sort_by_key(|(_, cents, _)| *cents);
    assert_eq!(
        amounts,
        vec![
            (Some(RoleCategory::CivilServant), 30_000, ValidationStatus::Accepted),
            (Some(RoleCategory::CivilServant), 32_000, ValidationStatus::Accepted),
            (Some(RoleCategory::Minister), 38_000, ValidationStatus::Accepted),
        ]
    );
    assert!(!output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::ExtractionDisagreement));

    let table_row = output
        .entities
        .entities
        .iter()
        .find(|entity| entity.candidate.value.as_amount().map(|amount| amount.cents) == Some(32_000))
        .expect("table amount");
    assert!(!table_row.candidate.ambiguous);
    assert!(table_row
        .candidate
        .readings
        .iter()
        .all(|reading| reading.amount.cents == 32_000));
}

#[test]
fn unmarked_table_amounts_are_not_read_as_section_numerals() {
    let input = directive(
        "DIR-016",
        vec![page(
            1,
            "8. DISPOSICIONES ESPECÍFICAS\n\
             8.4 Escala de viáticos\n\
             8.4.17 Montos diarios por cargo\n\
             Servidor civil        320.00\n\
             Ministro de Estado    380.00",
        )],
    );

    let output = process(&input, &PipelineConfig::default());
    let numerals = output
        .entities
        .entities
        .iter()
        .filter(|entity| entity.kind() == EntityKind::Numeral)
        .map(|entity| entity.candidate.value.canonical())
        .collect::<Vec<String>>();
    assert!(!numerals.iter().any(|numeral| numeral == "320.00" || numeral == "380.00"));
    assert!(!output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::OrphanNumeral));

    let amounts = amounts_by_role(&output);
    assert!(amounts.contains(&(Some(RoleCategory::CivilServant), 32_000, ValidationStatus::Accepted)));
    assert!(amounts.contains(&(Some(RoleCategory::Minister), 38_000, ValidationStatus::Accepted)));
}

#[test]
fn amounts_in_running_prose_go_to_the_nearest_role() {
    let input = directive(
        "DIR-017",
        vec![page(
            1,
            "1. ESCALA DE VIÁTICOS\n\
             El Ministro de Estado percibe S/ 380.00 por día y el servidor civil percibe S/ 320.00 por día.",
        )],
    );

    let output = process(&input, &PipelineConfig::default());
    let amounts = amounts_by_role(&output);
    assert_eq!(amounts.len(), 2);
    assert!(amounts.contains(&(Some(RoleCategory::Minister), 38_000, ValidationStatus::Accepted)));
    assert!(amounts.contains(&(Some(RoleCategory::CivilServant), 32_000, ValidationStatus::Accepted)));
    assert!(!output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::ScaleInversion));
}

#[test]
fn senior_role_paid_less_than_junior_raises_scale_inversion() {
    let input = directive(
        "DIR-010",
        vec![page(
            1,
            "1. ESCALA\nMinistro de Estado    S/ 200.00\nServidor civil        S/ 320.00",
        )],
    );

    let output = process(&input, &PipelineConfig::default());
    assert!(output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::ScaleInversion));
}

#[test]
fn low_confidence_entities_are_excluded_from_payloads() {
    let config = PipelineConfig {
        confidence_threshold: 0.99,
        ..PipelineConfig::default()
    };
    let output = process(&allowance_directive(), &config);

    for chunk in &output.chunks {
        assert!(chunk.entities.iter().all(|entity| entity.confidence() >= 0.99));
    }
    assert!(output
        .entities
        .warnings
        .iter()
        .any(|warning| warning.kind == WarningKind::LowConfidence));
}

#[test]
fn document_confidence_falls_back_to_page_confidence() {
    let mut input = directive("DIR-011", vec![page(1, "Texto sin entidades.")]);
    input.pages[0].confidence = 0.6;

    let output = process(&input, &PipelineConfig::default());
    assert!(output.entities.entities.is_empty());
    assert!((output.entities.confidence - 0.6).abs() < 1e-9);
}

#[test]
fn source_errors_are_reported_per_document() {
    let config = PipelineConfig::default();
    let dictionary = DomainDictionary::default();

    let empty = directive("EMPTY", Vec::new());
    assert!(matches!(
        run_pipeline(&empty, &config, &dictionary, CREATED_AT),
        Err(PipelineError::NoPages { .. })
    ));

    let blank = directive("BLANK", vec![page(1, "   "), page(2, "\n")]);
    assert!(matches!(
        run_pipeline(&blank, &config, &dictionary, CREATED_AT),
        Err(PipelineError::BlankDocument { .. })
    ));

    let unordered = directive("UNORDERED", vec![page(2, "a"), page(1, "b")]);
    assert!(matches!(
        run_pipeline(&unordered, &config, &dictionary, CREATED_AT),
        Err(PipelineError::PageOrder {
            previous: 2,
            found: 1,
            ..
        })
    ));

    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.json");
    assert!(matches!(
        load_document_input(&missing),
        Err(PipelineError::Unreadable { .. })
    ));
}

#[test]
fn word_windows_overlap_and_span_the_whole_text() {
    let text = (0..25).map(|i| format!("w{i}")).collect::<Vec<String>>().join(" ");
    let windows = word_windows(&text, 100, 10, 3);

    assert_eq!(windows.first().map(|window| window.0), Some(100));
    assert_eq!(windows.last().map(|window| window.1), Some(100 + text.len()));
    for pair in windows.windows(2) {
        assert!(pair[1].0 < pair[0].1, "consecutive windows overlap");
    }
    assert_eq!(windows.len(), 4);
}

#[test]
fn ingest_run_writes_artifacts_manifest_and_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input_root = dir.path().to_path_buf();
    std::fs::write(
        input_root.join("dir-001.json"),
        serde_json::to_vec(&allowance_directive()).expect("serialize input"),
    )
    .expect("write input");
    std::fs::write(input_root.join("broken.json"), "{\"doc_id\": \"BROKEN\", \"pages\": []}")
        .expect("write broken input");

    let manifest_path = input_root.join("manifests").join("ingest_run_test.json");
    let db_path = input_root.join("store.sqlite");
    let args = IngestArgs {
        input_root: input_root.clone(),
        inventory_manifest_path: None,
        ingest_manifest_path: Some(manifest_path.clone()),
        output_dir: None,
        db_path: Some(db_path.clone()),
        refresh_inventory: true,
        doc_ids: Vec::new(),
        dictionary_path: None,
        chunk_strategy: ChunkStrategy::Hierarchical,
        max_chunk_words: 350,
        overlap_words: 40,
        amount_ceiling: 10_000.0,
        confidence_threshold: 0.35,
        merge_comparability: 0.15,
        amount_tolerance: 0.01,
        publication_year: None,
    };

    run(args).expect("ingest runs");

    let manifest: crate::model::IngestRunManifest =
        crate::util::read_json(&manifest_path).expect("manifest written");
    assert_eq!(manifest.status, "completed_with_failures");
    assert_eq!(manifest.counts.document_count, 2);
    assert_eq!(manifest.counts.processed_document_count, 1);
    assert_eq!(manifest.failures.len(), 1);
    assert_eq!(manifest.failures[0].doc_id, "BROKEN");
    assert!(manifest.counts.entities_accepted >= 2);

    let summary = &manifest.documents[0];
    let chunks: Vec<Chunk> =
        crate::util::read_json(&PathBuf::from(&summary.chunks_path)).expect("chunks artifact");
    assert_eq!(chunks.len(), summary.chunks);
    assert!(chunks.iter().all(|chunk| chunk.created_at == manifest.started_at));

    let connection = open_store(&db_path).expect("store opens");
    assert_eq!(count_rows(&connection, "SELECT COUNT(*) FROM docs").expect("docs"), 1);
    assert_eq!(
        count_rows(&connection, "SELECT COUNT(*) FROM chunks").expect("chunks"),
        chunks.len() as i64
    );
    assert_eq!(
        count_rows(
            &connection,
            "SELECT COUNT(*) FROM section_nodes WHERE numeral = '8.4.17' AND parent_numeral = '8.4'"
        )
        .expect("section nodes"),
        1
    );
}

#[test]
fn storing_a_document_twice_replaces_its_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("store.sqlite");
    let output = process(&allowance_directive(), &PipelineConfig::default());

    let mut connection = open_store(&db_path).expect("store opens");
    write_document(&mut connection, &output, "abc", CREATED_AT).expect("first write");
    write_document(&mut connection, &output, "abc", CREATED_AT).expect("second write");

    assert_eq!(count_rows(&connection, "SELECT COUNT(*) FROM docs").expect("docs"), 1);
    assert_eq!(
        count_rows(&connection, "SELECT COUNT(*) FROM entities").expect("entities"),
        output.entities.entities.len() as i64
    );
    assert_eq!(
        count_rows(&connection, "SELECT COUNT(*) FROM chunks").expect("chunks"),
        output.chunks.len() as i64
    );
}
