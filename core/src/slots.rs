/// Fixed-size table where every slot is either empty or holds a value.
///
/// Slots are addressed by index or visited through the iterators, which skip
/// empty slots. Nothing is allocated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalSlots<T, const N: usize> {
    slots: [Option<T>; N],
}

impl<T, const N: usize> Default for OptionalSlots<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> OptionalSlots<T, N> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Stores `value` at `index`, replacing what was there.
    pub fn insert(&mut self, index: usize, value: T) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn erase(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Puts `value` into the first empty slot; fails when the table is full.
    pub fn append(&mut self, value: T) -> bool {
        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    /// Clears every slot matching `predicate`. Returns whether any matched.
    pub fn remove_if(&mut self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        let mut removed = false;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(&mut predicate) {
                *slot = None;
                removed = true;
            }
        }
        removed
    }

    pub fn position(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&mut predicate))
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }

    /// Orders occupied slots ascending by `key`, with empty slots last.
    pub fn sort_by_key<K: Ord>(&mut self, mut key: impl FnMut(&T) -> K) {
        self.slots.sort_by(|lhs, rhs| match (lhs, rhs) {
            (Some(lhs), Some(rhs)) => key(lhs).cmp(&key(rhs)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> + '_ {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Occupied slots together with their index.
    pub fn indexed(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }
}

impl<T: PartialEq, const N: usize> OptionalSlots<T, N> {
    pub fn contains(&self, value: &T) -> bool {
        self.iter().any(|current| current == value)
    }

    pub fn remove_value(&mut self, value: &T) -> bool {
        self.remove_if(|current| current == value)
    }
}

impl<'a, T, const N: usize> IntoIterator for &'a OptionalSlots<T, N> {
    type Item = &'a T;
    type IntoIter = std::iter::FilterMap<
        std::slice::Iter<'a, Option<T>>,
        fn(&'a Option<T>) -> Option<&'a T>,
    >;

    fn into_iter(self) -> Self::IntoIter {
        self.slots
            .iter()
            .filter_map(Option::as_ref as fn(&'a Option<T>) -> Option<&'a T>)
    }
}
