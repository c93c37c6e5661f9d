//! Pass-through manager: a fresh selection for every record.

use std::sync::Arc;

use rand::Rng;

use crate::copyset::CopySet;
use crate::error::SelectionError;
use crate::manager::ManagerBase;
use crate::selector::Selector;
use crate::stats::SelectionStats;

#[derive(Debug)]
pub struct PassThroughCopySetManager {
    pub(crate) base: ManagerBase,
}

impl PassThroughCopySetManager {
    pub fn new(selector: Selector, stats: Arc<SelectionStats>) -> Self {
        Self {
            base: ManagerBase::new(selector, stats),
        }
    }

    pub fn get_copyset<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<CopySet, SelectionError> {
        self.base.select(rng)
    }
}
