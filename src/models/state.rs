use std::collections::BTreeSet;

use super::uc::UcCode;

/// Per-account bookkeeping for one run.
///
/// `done` only ever holds codes that are also in `targets`.
#[derive(Debug, Clone, Default)]
pub struct ProcessingState {
    targets: BTreeSet<UcCode>,
    done: BTreeSet<UcCode>,
}

impl ProcessingState {
    pub fn new(targets: impl IntoIterator<Item = UcCode>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
            done: BTreeSet::new(),
        }
    }

    /// Eligible today and not yet resolved.
    pub fn is_pending(&self, uc: &UcCode) -> bool {
        self.targets.contains(uc) && !self.done.contains(uc)
    }

    /// Mark a target resolved. Codes outside the target set are ignored.
    pub fn mark_done(&mut self, uc: &UcCode) -> bool {
        if !self.targets.contains(uc) {
            return false;
        }
        self.done.insert(uc.clone())
    }

    pub fn is_complete(&self) -> bool {
        self.done.len() == self.targets.len()
    }

    pub fn pending(&self) -> Vec<UcCode> {
        self.targets.difference(&self.done).cloned().collect()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn done_count(&self) -> usize {
        self.done.len()
    }
}
