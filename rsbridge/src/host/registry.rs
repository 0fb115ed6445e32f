use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

/// A typed reference to a callback target living on the consumer thread.
///
/// It is a plain number, so it can travel through SDK threads; only the host it came from can
/// turn it back into the target.
pub struct TargetId<T> {
    id: u64,
    _target: PhantomData<fn() -> T>,
}

impl<T> TargetId<T> {
    #[inline]
    pub fn id(self) -> u64 {
        self.id
    }
}

impl<T> Clone for TargetId<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TargetId<T> {}

impl<T> PartialEq for TargetId<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for TargetId<T> {}

impl<T> Hash for TargetId<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl<T> fmt::Debug for TargetId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({})", self.id)
    }
}

/// Weak references to every live callback target, keyed by id.
///
/// The registry never keeps a target alive: its owner does. An id whose owner is gone resolves to
/// nothing.
#[derive(Default)]
pub(crate) struct Registry {
    next: u64,
    entries: HashMap<u64, Weak<dyn Any>>,
}

impl Registry {
    pub(crate) fn insert<T: 'static>(&mut self, target: &Rc<T>) -> TargetId<T> {
        self.next += 1;
        let weak: Weak<T> = Rc::downgrade(target);
        let weak: Weak<dyn Any> = weak;
        self.entries.insert(self.next, weak);
        TargetId {
            id: self.next,
            _target: PhantomData,
        }
    }

    pub(crate) fn resolve<T: 'static>(&self, id: TargetId<T>) -> Option<Rc<T>> {
        self.entries.get(&id.id)?.upgrade()?.downcast::<T>().ok()
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
