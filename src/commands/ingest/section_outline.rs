use super::*;

#[derive(Debug, Clone, Default)]
pub struct SectionOutline {
    pub tree: SectionTree,
    pub anomalies: Vec<StructuralAnomaly>,
}

#[derive(Debug, Clone, PartialEq)]
struct HeadingCandidate {
    numeral: String,
    title: String,
    offset: usize,
    page: u32,
}

#[derive(Debug)]
pub struct StructureAnalyzer {
    numbered_heading: Regex,
    bare_numeral: Regex,
    toc_line: Regex,
}

impl StructureAnalyzer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            numbered_heading: Regex::new(r"^(\d{1,3}(?:\.\d{1,3})*)\.?[ \t]+(\S.*)$")
                .context("failed to compile numbered heading regex")?,
            bare_numeral: Regex::new(r"^(\d{1,3}(?:\.\d{1,3})*)\.?$")
                .context("failed to compile bare numeral regex")?,
            toc_line: Regex::new(r"\.{3,}\s*\d+\s*$")
                .context("failed to compile table-of-contents line regex")?,
        })
    }

    pub fn analyze(&self, document: &DocumentText, pages: &[Page]) -> SectionOutline {
        let candidates = self.detect_headings(document, pages);
        let outline = build_outline(candidates, document);
        debug!(
            nodes = outline.tree.nodes.len(),
            anomalies = outline.anomalies.len(),
            "structure analysis complete"
        );
        outline
    }

    fn detect_headings(&self, document: &DocumentText, pages: &[Page]) -> Vec<HeadingCandidate> {
        let lines = document.lines();
        let mut candidates = Vec::new();
        let mut index = 0usize;

        while index < lines.len() {
            let (line_offset, raw_line) = lines[index];
            index += 1;

            let line = raw_line.trim();
            if line.is_empty() || self.toc_line.is_match(line) {
                continue;
            }
            let offset = line_offset + (raw_line.len() - raw_line.trim_start().len());
            let page_number = document.page_for_offset(offset);
            let page = pages.iter().find(|page| page.page_number == page_number);

            if let Some(captures) = self.numbered_heading.captures(line) {
                let numeral = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                let title = captures.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
                let hinted = page.map(|page| layout_marks_heading(page, numeral)).unwrap_or(false);

                if accept_heading(numeral, title, hinted) {
                    candidates.push(HeadingCandidate {
                        numeral: numeral.to_string(),
                        title: title.to_string(),
                        offset,
                        page: page_number,
                    });
                }
                continue;
            }

            // A numeral alone on its line takes the next non-empty line as its title.
            if let Some(captures) = self.bare_numeral.captures(line) {
                let numeral = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                let Some(title_index) = (index..lines.len()).find(|i| !lines[*i].1.trim().is_empty())
                else {
                    continue;
                };
                let title = lines[title_index].1.trim();
                let hinted = page.map(|page| layout_marks_heading(page, numeral)).unwrap_or(false);

                if accept_heading(numeral, title, hinted) {
                    candidates.push(HeadingCandidate {
                        numeral: numeral.to_string(),
                        title: title.to_string(),
                        offset,
                        page: page_number,
                    });
                    index = title_index + 1;
                }
            }
        }

        candidates
    }
}

fn accept_heading(numeral: &str, title: &str, hinted: bool) -> bool {
    if title.is_empty() || title.chars().count() > 160 {
        return false;
    }
    if numeral.split('.').any(|group| group.is_empty()) {
        return false;
    }
    if hinted {
        return true;
    }

    // Fallback without a layout hint: a capitalized title of plausible length.
    let first_group = numeral
        .split('.')
        .next()
        .and_then(|group| group.parse::<u32>().ok())
        .unwrap_or(0);
    let capitalized = title
        .chars()
        .find(|ch| ch.is_alphabetic())
        .map(char::is_uppercase)
        .unwrap_or(false);
    let starts_with_letter = title
        .chars()
        .next()
        .map(|ch| ch.is_alphabetic() || ch == '¿' || ch == '(')
        .unwrap_or(false);

    first_group > 0 && first_group < 100 && capitalized && starts_with_letter && title.chars().count() <= 140
}

/// True when a heading or list-marker region on the page starts with `numeral`.
fn layout_marks_heading(page: &Page, numeral: &str) -> bool {
    page.layout
        .iter()
        .filter(|element| matches!(element.region_type, RegionType::Heading | RegionType::List))
        .any(|element| {
            let text = element.text.trim_start();
            let Some(rest) = text.strip_prefix(numeral) else {
                return false;
            };
            let mut chars = rest.chars();
            match chars.next() {
                None => true,
                Some(ch) if ch.is_ascii_digit() => false,
                Some('.') => !chars.next().map(|ch| ch.is_ascii_digit()).unwrap_or(false),
                Some(_) => true,
            }
        })
}

pub fn numeral_level(numeral: &str) -> usize {
    numeral.split('.').count()
}

pub fn parent_numeral(numeral: &str) -> Option<&str> {
    numeral.rsplit_once('.').map(|(parent, _)| parent)
}

/// `child` equals `ancestor` or lies strictly beneath it ("8.4.17" under "8.4").
pub fn is_same_or_sub_numeral(child: &str, ancestor: &str) -> bool {
    child == ancestor
        || child
            .strip_prefix(ancestor)
            .map(|rest| rest.starts_with('.'))
            .unwrap_or(false)
}

struct OutlineBuilder {
    nodes: Vec<SectionNode>,
    roots: Vec<usize>,
    by_numeral: HashMap<String, usize>,
}

impl OutlineBuilder {
    fn push_node(
        &mut self,
        numeral: &str,
        title: &str,
        parent: Option<usize>,
        offset: usize,
        page: u32,
        synthetic: bool,
    ) -> usize {
        let id = self.nodes.len();
        let parent_numeral = parent.map(|parent_id| self.nodes[parent_id].numeral.clone());
        self.nodes.push(SectionNode {
            id,
            numeral: numeral.to_string(),
            title: title.to_string(),
            level: numeral_level(numeral),
            parent: parent_numeral,
            children: Vec::new(),
            span: TextSpan {
                start_page: page,
                end_page: page,
                start_offset: offset,
                end_offset: offset,
            },
            synthetic,
        });

        match parent {
            Some(parent_id) => self.nodes[parent_id].children.push(id),
            None => self.roots.push(id),
        }
        self.by_numeral.insert(numeral.to_string(), id);
        id
    }

    /// Creates every missing ancestor of `numeral`, outermost first.
    fn ensure_ancestors(&mut self, numeral: &str, offset: usize, page: u32) -> Option<usize> {
        let groups = numeral.split('.').collect::<Vec<&str>>();
        let mut parent = None;
        for depth in 1..groups.len() {
            let prefix = groups[..depth].join(".");
            let existing = self.by_numeral.get(&prefix).copied();
            parent = Some(match existing {
                Some(id) => id,
                None => self.push_node(&prefix, "", parent, offset, page, true),
            });
        }
        parent
    }

    fn chain_to(&self, id: usize) -> Vec<usize> {
        let mut chain = vec![id];
        let mut cursor = id;
        while let Some(parent_id) = self.nodes[cursor]
            .parent
            .as_ref()
            .and_then(|numeral| self.by_numeral.get(numeral))
        {
            chain.push(*parent_id);
            cursor = *parent_id;
        }
        chain.reverse();
        chain
    }
}

fn build_outline(candidates: Vec<HeadingCandidate>, document: &DocumentText) -> SectionOutline {
    let mut builder = OutlineBuilder {
        nodes: Vec::new(),
        roots: Vec::new(),
        by_numeral: HashMap::new(),
    };
    let mut anomalies = Vec::new();
    // Open ancestors, innermost last; popped whenever a heading of equal or higher rank arrives.
    let mut open = Vec::<usize>::new();

    for candidate in candidates {
        if let Some(existing) = builder.by_numeral.get(&candidate.numeral) {
            let first = &builder.nodes[*existing];
            anomalies.push(StructuralAnomaly {
                kind: AnomalyKind::DuplicateNumeral,
                numeral: candidate.numeral.clone(),
                page: candidate.page,
                offset: candidate.offset,
                message: format!(
                    "duplicate numeral {} on page {}; keeping first occurrence on page {}",
                    candidate.numeral, candidate.page, first.span.start_page
                ),
            });
            continue;
        }

        let level = numeral_level(&candidate.numeral);
        while let Some(top) = open.last() {
            if builder.nodes[*top].level >= level {
                open.pop();
            } else {
                break;
            }
        }

        let parent = match parent_numeral(&candidate.numeral) {
            None => None,
            Some(expected) => {
                let on_stack = open
                    .last()
                    .filter(|top| builder.nodes[**top].numeral == expected)
                    .copied();
                match on_stack {
                    Some(parent_id) => Some(parent_id),
                    None => match builder.by_numeral.get(expected).copied() {
                        Some(parent_id) => {
                            anomalies.push(StructuralAnomaly {
                                kind: AnomalyKind::OutOfOrderParent,
                                numeral: candidate.numeral.clone(),
                                page: candidate.page,
                                offset: candidate.offset,
                                message: format!(
                                    "numeral {} resumes parent {} after a later sibling",
                                    candidate.numeral, expected
                                ),
                            });
                            Some(parent_id)
                        }
                        None => {
                            anomalies.push(StructuralAnomaly {
                                kind: AnomalyKind::MissingParent,
                                numeral: candidate.numeral.clone(),
                                page: candidate.page,
                                offset: candidate.offset,
                                message: format!(
                                    "numeral {} has no preceding parent {}; attached under a synthetic ancestor",
                                    candidate.numeral, expected
                                ),
                            });
                            builder.ensure_ancestors(
                                &candidate.numeral,
                                candidate.offset,
                                candidate.page,
                            )
                        }
                    },
                }
            }
        };

        let id = builder.push_node(
            &candidate.numeral,
            &candidate.title,
            parent,
            candidate.offset,
            candidate.page,
            false,
        );
        open = builder.chain_to(id);
    }

    let OutlineBuilder {
        mut nodes, roots, ..
    } = builder;
    close_spans(&mut nodes, document);

    SectionOutline {
        tree: SectionTree { nodes, roots },
        anomalies,
    }
}

/// A span ends where the next heading of the same or a higher rank begins.
fn close_spans(nodes: &mut [SectionNode], document: &DocumentText) {
    for index in 0..nodes.len() {
        let level = nodes[index].level;
        let end = nodes[index + 1..]
            .iter()
            .find(|next| next.level <= level)
            .map(|next| next.span.start_offset)
            .unwrap_or_else(|| document.len());
        let start = nodes[index].span.start_offset;
        let end = end.max(start);
        let pages = document.page_range(start, end);

        let span = &mut nodes[index].span;
        span.end_offset = end;
        span.start_page = pages.start;
        span.end_page = pages.end;
    }
}
