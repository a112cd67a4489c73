//! Upload shadowing.
//!
//! Two uploads of the same repository, root and indexer describe the same project. Only one
//! of them may contribute references to an epoch; the others are shadowed.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::HashSet;
use time::OffsetDateTime;

/// Identity of a project within a repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProjectKey {
    pub repository_id: i64,
    pub root: String,
    pub indexer: String,
}

/// One upload seen in a claimed batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadCandidate {
    pub upload_id: i64,
    pub finished_at: Option<OffsetDateTime>,
    /// Lowest reference id claimed for this upload in the batch.
    pub claim_id: i64,
}

/// Total order over candidates of one project. `Greater` means `a` outranks `b`.
///
/// Later `finished_at` wins and a missing timestamp ranks lowest. Among equal timestamps
/// the candidate claimed first (lowest claim id) wins.
pub fn compare_candidates(a: &UploadCandidate, b: &UploadCandidate) -> Ordering {
    a.finished_at
        .cmp(&b.finished_at)
        .then_with(|| b.claim_id.cmp(&a.claim_id))
        .then_with(|| b.upload_id.cmp(&a.upload_id))
}

/// Pick the single winning upload of every project in a batch.
pub fn winning_uploads<I>(candidates: I) -> HashSet<i64>
where
    I: IntoIterator<Item = (ProjectKey, UploadCandidate)>,
{
    let mut best: HashMap<ProjectKey, UploadCandidate> = HashMap::new();
    for (project, candidate) in candidates {
        match best.get_mut(&project) {
            Some(current) => {
                if compare_candidates(&candidate, current) == Ordering::Greater {
                    *current = candidate;
                }
            }
            None => {
                best.insert(project, candidate);
            }
        }
    }
    best.into_values().map(|c| c.upload_id).collect()
}
