//! Bijective mapping between source ids and source views.

use crate::error::{Result, UnionError};
use crate::source::SourceView;
use crate::types::SourceId;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Identity of a view instance: the address of its shared allocation.
///
/// Stable for as long as the registry holds the view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ViewKey(usize);

impl ViewKey {
    pub(crate) fn of<V: ?Sized>(view: &Arc<V>) -> Self {
        ViewKey(Arc::as_ptr(view) as *const () as usize)
    }
}

/// Registered sources, looked up by id or by view identity.
///
/// Every id maps to exactly one view and every view has exactly one id.
/// Entries are never removed.
pub(crate) struct SourceRegistry {
    forward: BTreeMap<SourceId, Arc<dyn SourceView>>,
    reverse: HashMap<ViewKey, SourceId>,
    /// Ids in registration order.
    order: Vec<SourceId>,
}

impl SourceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            forward: BTreeMap::new(),
            reverse: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register `view` under `id`, returning its identity key.
    pub(crate) fn insert(&mut self, id: SourceId, view: Arc<dyn SourceView>) -> Result<ViewKey> {
        if self.forward.contains_key(&id) {
            return Err(UnionError::DuplicateRegistration(id));
        }

        let key = ViewKey::of(&view);
        if let Some(existing) = self.reverse.get(&key) {
            return Err(UnionError::DuplicateView {
                existing: *existing,
            });
        }

        self.forward.insert(id, view);
        self.reverse.insert(key, id);
        self.order.push(id);
        Ok(key)
    }

    pub(crate) fn get(&self, id: SourceId) -> Option<&Arc<dyn SourceView>> {
        self.forward.get(&id)
    }

    pub(crate) fn resolve(&self, key: ViewKey) -> Option<SourceId> {
        self.reverse.get(&key).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.forward.len()
    }

    pub(crate) fn ids(&self) -> &[SourceId] {
        &self.order
    }

    /// Views in registration order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SourceId, &Arc<dyn SourceView>)> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.forward.get(id).map(|view| (*id, view)))
    }

    /// Clone out every view so they can be called without holding a lock.
    pub(crate) fn snapshot(&self) -> Vec<(SourceId, Arc<dyn SourceView>)> {
        self.iter().map(|(id, view)| (id, Arc::clone(view))).collect()
    }
}
