//! In-process half of the mapper: shadow filtering, definition ranking and path counting.
//!
//! The store claims rows and resolves symbols; everything here is pure.

use crate::shadow::{ProjectKey, UploadCandidate, winning_uploads};
use std::collections::{BTreeMap, HashMap, HashSet};
use time::OffsetDateTime;

/// A reference row claimed for the current epoch, joined with its upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimedReference {
    pub id: i64,
    pub upload_id: i64,
    pub repository_id: i64,
    pub root: String,
    pub indexer: String,
    pub finished_at: Option<OffsetDateTime>,
    pub symbol_names: Vec<String>,
}

impl ClaimedReference {
    pub fn project(&self) -> ProjectKey {
        ProjectKey {
            repository_id: self.repository_id,
            root: self.root.clone(),
            indexer: self.indexer.clone(),
        }
    }
}

/// Drop references whose upload is shadowed.
///
/// `shadowed` holds uploads already superseded by an upload processed in an earlier batch of
/// this epoch. The remaining uploads compete within the batch.
pub fn surviving_references<'a>(
    references: &'a [ClaimedReference],
    shadowed: &HashSet<i64>,
) -> Vec<&'a ClaimedReference> {
    let eligible: Vec<&ClaimedReference> = references
        .iter()
        .filter(|r| !shadowed.contains(&r.upload_id))
        .collect();

    let mut candidates: HashMap<i64, (ProjectKey, UploadCandidate)> = HashMap::new();
    for reference in &eligible {
        candidates
            .entry(reference.upload_id)
            .and_modify(|(_, c)| c.claim_id = c.claim_id.min(reference.id))
            .or_insert_with(|| {
                (
                    reference.project(),
                    UploadCandidate {
                        upload_id: reference.upload_id,
                        finished_at: reference.finished_at,
                        claim_id: reference.id,
                    },
                )
            });
    }
    let winners = winning_uploads(candidates.into_values());

    eligible
        .into_iter()
        .filter(|r| winners.contains(&r.upload_id))
        .collect()
}

/// Distinct symbol names referenced by the surviving references.
pub fn referenced_symbols(references: &[&ClaimedReference]) -> Vec<String> {
    let symbols: HashSet<&str> = references
        .iter()
        .flat_map(|r| r.symbol_names.iter().map(String::as_str))
        .collect();
    let mut symbols: Vec<String> = symbols.into_iter().map(str::to_string).collect();
    symbols.sort();
    symbols
}

/// A visible definition matching one of the referenced symbols.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedDefinition {
    pub upload_id: i64,
    pub repository_id: i64,
    pub root: String,
    pub indexer: String,
    pub symbol_name: String,
    pub document_path: String,
}

/// Keep only definitions from the newest upload of each project, counting identical
/// `(upload, symbol, path)` rows once.
pub fn rank_definitions(definitions: Vec<ResolvedDefinition>) -> Vec<ResolvedDefinition> {
    let mut newest: HashMap<ProjectKey, i64> = HashMap::new();
    for def in &definitions {
        let project = ProjectKey {
            repository_id: def.repository_id,
            root: def.root.clone(),
            indexer: def.indexer.clone(),
        };
        let upload = newest.entry(project).or_insert(def.upload_id);
        *upload = (*upload).max(def.upload_id);
    }

    let mut seen = HashSet::new();
    definitions
        .into_iter()
        .filter(|def| {
            let project = ProjectKey {
                repository_id: def.repository_id,
                root: def.root.clone(),
                indexer: def.indexer.clone(),
            };
            newest.get(&project) == Some(&def.upload_id)
        })
        .filter(|def| {
            seen.insert((
                def.upload_id,
                def.symbol_name.clone(),
                def.document_path.clone(),
            ))
        })
        .collect()
}

/// Path-count input produced by the mapper.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathCount {
    pub repository_id: i64,
    pub document_path: String,
    pub count: i64,
}

/// Count, per defining document, how many surviving references point into it.
///
/// Every referenced symbol adds one to each ranked definition of that symbol. Output is
/// ordered by repository and path.
pub fn count_paths(
    references: &[&ClaimedReference],
    definitions: &[ResolvedDefinition],
) -> Vec<PathCount> {
    let mut by_symbol: HashMap<&str, Vec<&ResolvedDefinition>> = HashMap::new();
    for def in definitions {
        by_symbol.entry(def.symbol_name.as_str()).or_default().push(def);
    }

    let mut counts: BTreeMap<(i64, &str), i64> = BTreeMap::new();
    for reference in references {
        for symbol in &reference.symbol_names {
            for def in by_symbol.get(symbol.as_str()).into_iter().flatten() {
                *counts
                    .entry((def.repository_id, def.document_path.as_str()))
                    .or_default() += 1;
            }
        }
    }

    counts
        .into_iter()
        .map(|((repository_id, path), count)| PathCount {
            repository_id,
            document_path: path.to_string(),
            count,
        })
        .collect()
}

/// Zero-count inputs for every distinct `(repository, path)` of a seed batch.
pub fn seed_counts<'a, I>(paths: I) -> Vec<PathCount>
where
    I: IntoIterator<Item = (i64, &'a str)>,
{
    let distinct: std::collections::BTreeSet<(i64, &str)> = paths.into_iter().collect();
    distinct
        .into_iter()
        .map(|(repository_id, path)| PathCount {
            repository_id,
            document_path: path.to_string(),
            count: 0,
        })
        .collect()
}
