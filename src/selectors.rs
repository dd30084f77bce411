//! Ranked selector fallback chains.
//!
//! The host application's markup shifts between releases, so nothing is
//! located by a single selector. A [`SelectorSet`] is an ordered list of
//! candidates tried front to back; the first candidate with any match wins.
//! Which candidate matched is logged every time, because that is the first
//! thing to check when a run starts failing after a host redeploy.

use tracing::debug;

use crate::dom::{DomError, DomSurface, NodeHandle};

/// Named, ordered list of selector candidates.
#[derive(Debug, Clone)]
pub struct SelectorSet {
    pub name: String,
    pub candidates: Vec<String>,
}

impl SelectorSet {
    pub fn new(
        name: impl Into<String>,
        candidates: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            candidates: candidates.into_iter().map(Into::into).collect(),
        }
    }
}

/// Which match to take when the winning candidate matches more than once.
/// `Last` is the most recent node in document order, which for conversation
/// transcripts means the newest turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    First,
    Last,
}

/// A successful resolution: the node plus which candidate produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub node: NodeHandle,
    pub selector: String,
    pub rank: usize,
}

/// Try each candidate in declared order; return the first non-empty match.
/// `Ok(None)` means nothing in the set matched, which is a normal outcome.
/// No retries happen here; waits belong to the pollers.
pub async fn resolve(
    dom: &dyn DomSurface,
    set: &SelectorSet,
    pick: Pick,
) -> Result<Option<Hit>, DomError> {
    for (rank, selector) in set.candidates.iter().enumerate() {
        let mut matches = dom.query_all(selector).await?;
        if matches.is_empty() {
            continue;
        }
        let count = matches.len();
        let index = match pick {
            Pick::First => 0,
            Pick::Last => count - 1,
        };
        let node = matches.swap_remove(index);
        debug!(
            "selector set '{}' resolved via '{}' (rank {rank}, {count} match(es))",
            set.name, selector
        );
        return Ok(Some(Hit {
            node,
            selector: selector.clone(),
            rank,
        }));
    }
    debug!("selector set '{}' had no matching candidate", set.name);
    Ok(None)
}
