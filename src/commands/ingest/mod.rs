use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use regex::Regex;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cli::{ChunkStrategy, IngestArgs};
use crate::model::{
    Amount, AnomalyKind, Chunk, ChunkSource, Currency, DateValue, DocumentEntities, DocumentInput,
    EntityCandidate, EntityKind, EntityPayload, LayoutElement, NormalizedValue, Origin, Page,
    PageSpan, RegionType, RoleCategory, SectionNode, SectionTree, StrategyReading,
    StructuralAnomaly, TextSpan, ValidatedEntity, ValidationStatus, ValidationWarning, WarningKind,
};
use crate::util::{now_utc_string, sha256_text};

const ARTIFACT_SCHEMA_VERSION: &str = "0.1.0";

mod artifact_store;
mod chunking;
mod dictionary;
mod document_text;
mod entity_recognition;
mod entity_validation;
mod pipeline;
mod run;
mod section_outline;
mod table_strategies;
#[cfg(test)]
mod tests;

pub use artifact_store::count_rows;
pub use run::run;

use artifact_store::*;
use chunking::*;
use dictionary::*;
use document_text::*;
use entity_recognition::*;
use entity_validation::*;
use pipeline::*;
use section_outline::*;
use table_strategies::*;
