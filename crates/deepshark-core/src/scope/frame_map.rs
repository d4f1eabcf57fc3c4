use std::collections::BTreeMap;
use std::collections::btree_map;

/// Ordered map keyed by frame number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMap<T> {
    entries: BTreeMap<u32, T>,
}

impl<T> Default for FrameMap<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> FrameMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, frame: u32, value: T) -> Option<T> {
        self.entries.insert(frame, value)
    }

    pub fn get(&self, frame: u32) -> Option<&T> {
        self.entries.get(&frame)
    }

    pub fn get_mut(&mut self, frame: u32) -> Option<&mut T> {
        self.entries.get_mut(&frame)
    }

    /// Entry with the greatest key at or before `frame`.
    ///
    /// # Examples
    /// ```
    /// use deepshark_core::scope::FrameMap;
    ///
    /// let mut map = FrameMap::new();
    /// map.insert(5, "request");
    /// assert_eq!(map.lookup_le(9), Some((5, &"request")));
    /// assert_eq!(map.lookup_le(4), None);
    /// ```
    pub fn lookup_le(&self, frame: u32) -> Option<(u32, &T)> {
        self.entries
            .range(..=frame)
            .next_back()
            .map(|(key, value)| (*key, value))
    }

    pub fn lookup_le_mut(&mut self, frame: u32) -> Option<(u32, &mut T)> {
        self.entries
            .range_mut(..=frame)
            .next_back()
            .map(|(key, value)| (*key, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, u32, T> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::FrameMap;

    #[test]
    fn lookup_le_finds_exact_and_previous() {
        let mut map = FrameMap::new();
        map.insert(2, 'a');
        map.insert(7, 'b');
        assert_eq!(map.lookup_le(7), Some((7, &'b')));
        assert_eq!(map.lookup_le(6), Some((2, &'a')));
        assert_eq!(map.lookup_le(1), None);
    }

    #[test]
    fn lookup_le_mut_updates_in_place() {
        let mut map = FrameMap::new();
        map.insert(5, 0u32);
        if let Some((_, value)) = map.lookup_le_mut(9) {
            *value = 9;
        }
        assert_eq!(map.get(5), Some(&9));
    }
}
