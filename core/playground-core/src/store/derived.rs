//! Lazily computed, dependency-keyed derived values.
//!
//! A [`Memo`] remembers the revisions of the slices it depends on at the time
//! it last computed. Reading it again recomputes only if one of those
//! revisions moved; commits that touch other slices leave the cache warm.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{Revisions, Slice, SliceSet};

pub struct Memo<T> {
    deps: SliceSet,
    cached: RefCell<Option<(Vec<u64>, Rc<T>)>>,
    computations: Cell<u64>,
}

impl<T> Memo<T> {
    pub fn new(deps: &[Slice]) -> Self {
        Self {
            deps: SliceSet::from_slices(deps),
            cached: RefCell::new(None),
            computations: Cell::new(0),
        }
    }

    pub fn get(&self, revisions: &Revisions, compute: impl FnOnce() -> T) -> Rc<T> {
        let key: Vec<u64> = self.deps.iter().map(|slice| revisions.get(slice)).collect();

        if let Some((cached_key, value)) = self.cached.borrow().as_ref() {
            if *cached_key == key {
                return Rc::clone(value);
            }
        }

        let value = Rc::new(compute());
        self.computations.set(self.computations.get() + 1);
        *self.cached.borrow_mut() = Some((key, Rc::clone(&value)));
        value
    }

    /// How many times the value has been computed. Exposed for diagnostics.
    pub fn computations(&self) -> u64 {
        self.computations.get()
    }
}
