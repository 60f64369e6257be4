//! Selector-keyed cache of compiled scanline functions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use scanjit_core::selector::PipelineSelector;
use tracing::info;

use crate::build::{build_scanline_function, ScanlineFunction};
use crate::PipelineError;

/// Default entry cap. Real workloads settle on a few hundred selectors;
/// hitting the cap usually means selectors carry per-draw state they
/// should not.
const DEFAULT_CAPACITY: usize = 4096;

pub struct FunctionCache {
    map: Mutex<HashMap<u64, Arc<ScanlineFunction>>>,
    capacity: usize,
}

impl Default for FunctionCache {
    fn default() -> FunctionCache {
        FunctionCache::new()
    }
}

impl FunctionCache {
    pub fn new() -> FunctionCache {
        FunctionCache::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> FunctionCache {
        FunctionCache {
            map: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the function for `sel`, compiling it on a miss. Functions
    /// stay live through the returned `Arc` even across a flush.
    pub fn get_or_build(
        &self,
        sel: PipelineSelector,
    ) -> Result<Arc<ScanlineFunction>, PipelineError> {
        let mut map = self.map.lock().unwrap();
        if let Some(func) = map.get(&sel.bits()) {
            return Ok(func.clone());
        }

        // Compiling under the lock keeps a selector from being built twice.
        let func = Arc::new(build_scanline_function(sel)?);
        if map.len() >= self.capacity {
            info!(entries = map.len(), "function cache full, flushing");
            map.clear();
        }
        map.insert(sel.bits(), func.clone());
        Ok(func)
    }

    pub fn clear(&self) {
        self.map.lock().unwrap().clear();
    }
}

#[cfg(test)]
#[cfg(target_arch = "x86_64")]
mod tests {
    use scanjit_core::selector::SelectorBuilder;

    use super::*;

    #[test]
    fn hit_returns_the_same_function() {
        let cache = FunctionCache::new();
        let sel = SelectorBuilder::new().fwrite(true).build();
        let a = cache.get_or_build(sel).unwrap();
        let b = cache.get_or_build(sel).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_overflow_flushes_but_keeps_live_functions() {
        let cache = FunctionCache::with_capacity(1);
        let flat = SelectorBuilder::new().fwrite(true).build();
        let depth = SelectorBuilder::new().fwrite(true).zwrite(true).build();
        let a = cache.get_or_build(flat).unwrap();
        let b = cache.get_or_build(depth).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!a.code().is_empty());
    }
}
