use crate::value::MapKey;
use std::collections::HashMap;

/// Database level change tracking, flipped off by the flusher after a successful write.
pub trait Saveable {
    fn is_changed(&self) -> bool;
    fn reset_changed(&mut self);
}

/// Whole-value marker: the tracked value is pushed to the cache as one unit.
pub trait DirtyMark: Saveable {
    fn is_dirty(&self) -> bool;
    /// Marks the value dirty for the cache and changed for the database.
    fn set_dirty(&mut self);
    fn reset_dirty(&mut self);
}

/// Per-key marker for map values.
pub trait MapDirtyMark: Saveable {
    fn is_dirty(&self) -> bool;
    /// Records one pending operation for `key`, the last call for a key wins.
    fn set_dirty(&mut self, key: MapKey, add_or_update: bool);
    fn reset_dirty(&mut self);
    fn has_cached(&self) -> bool;
    fn set_cached(&mut self);
    /// Forgets the bootstrap, the next cache push writes the whole map again.
    fn reset_cached(&mut self);
    fn range_dirty_map(&self, f: &mut dyn FnMut(&MapKey, bool));

    fn dirty_entries(&self) -> Vec<(MapKey, bool)> {
        let mut entries = Vec::new();
        self.range_dirty_map(&mut |k, add_or_update| entries.push((k.clone(), add_or_update)));
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseDirtyMark {
    changed: bool,
    dirty: bool,
}

impl Saveable for BaseDirtyMark {
    fn is_changed(&self) -> bool {
        self.changed
    }

    fn reset_changed(&mut self) {
        self.changed = false;
    }
}

impl DirtyMark for BaseDirtyMark {
    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn set_dirty(&mut self) {
        self.dirty = true;
        self.changed = true;
    }

    fn reset_dirty(&mut self) {
        self.dirty = false;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseMapDirtyMark {
    changed: bool,
    cached: bool,
    dirty_map: HashMap<MapKey, bool>,
}

impl Saveable for BaseMapDirtyMark {
    fn is_changed(&self) -> bool {
        self.changed
    }

    fn reset_changed(&mut self) {
        self.changed = false;
    }
}

impl MapDirtyMark for BaseMapDirtyMark {
    fn is_dirty(&self) -> bool {
        !self.dirty_map.is_empty()
    }

    fn set_dirty(&mut self, key: MapKey, add_or_update: bool) {
        self.dirty_map.insert(key, add_or_update);
        self.changed = true;
    }

    fn reset_dirty(&mut self) {
        self.dirty_map.clear();
    }

    fn has_cached(&self) -> bool {
        self.cached
    }

    fn set_cached(&mut self) {
        self.cached = true;
    }

    fn reset_cached(&mut self) {
        self.cached = false;
    }

    fn range_dirty_map(&self, f: &mut dyn FnMut(&MapKey, bool)) {
        for (k, add_or_update) in self.dirty_map.iter() {
            f(k, *add_or_update);
        }
    }
}

/// Borrowed view of whichever marker an object carries.
pub enum MarkRef<'a> {
    Whole(&'a dyn DirtyMark),
    Map(&'a dyn MapDirtyMark),
}

pub enum MarkMut<'a> {
    Whole(&'a mut dyn DirtyMark),
    Map(&'a mut dyn MapDirtyMark),
}

impl MarkRef<'_> {
    pub fn is_changed(&self) -> bool {
        match self {
            MarkRef::Whole(m) => m.is_changed(),
            MarkRef::Map(m) => m.is_changed(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            MarkRef::Whole(m) => m.is_dirty(),
            MarkRef::Map(m) => m.is_dirty(),
        }
    }
}

impl MarkMut<'_> {
    pub fn reset_changed(&mut self) {
        match self {
            MarkMut::Whole(m) => m.reset_changed(),
            MarkMut::Map(m) => m.reset_changed(),
        }
    }

    pub fn reset_dirty(&mut self) {
        match self {
            MarkMut::Whole(m) => m.reset_dirty(),
            MarkMut::Map(m) => m.reset_dirty(),
        }
    }

    /// Only map markers remember a bootstrap.
    pub fn reset_cached(&mut self) {
        if let MarkMut::Map(m) = self {
            m.reset_cached()
        }
    }
}

/// Exposes a marker field to generated code, see `#[mark]`.
pub trait AsMark {
    fn as_mark(&self) -> MarkRef<'_>;
    fn as_mark_mut(&mut self) -> MarkMut<'_>;
}

impl AsMark for BaseDirtyMark {
    fn as_mark(&self) -> MarkRef<'_> {
        MarkRef::Whole(self)
    }

    fn as_mark_mut(&mut self) -> MarkMut<'_> {
        MarkMut::Whole(self)
    }
}

impl AsMark for BaseMapDirtyMark {
    fn as_mark(&self) -> MarkRef<'_> {
        MarkRef::Map(self)
    }

    fn as_mark_mut(&mut self) -> MarkMut<'_> {
        MarkMut::Map(self)
    }
}

#[cfg(test)]
mod dirty_tests {
    use super::*;

    #[test]
    fn set_dirty_also_sets_changed() {
        let mut mark = BaseDirtyMark::default();
        assert!(!mark.is_dirty() && !mark.is_changed());
        mark.set_dirty();
        assert!(mark.is_dirty(), "dirty after set_dirty");
        assert!(mark.is_changed(), "changed after set_dirty");
    }

    #[test]
    fn dirty_and_changed_reset_independently() {
        let mut mark = BaseDirtyMark::default();
        mark.set_dirty();
        mark.reset_dirty();
        assert!(!mark.is_dirty());
        assert!(mark.is_changed(), "cache push must not clear the db flag");
        mark.reset_changed();
        assert!(!mark.is_changed());
    }

    #[test]
    fn map_mark_last_write_wins_per_key() {
        let mut mark = BaseMapDirtyMark::default();
        mark.set_dirty(MapKey::Int(5), true);
        mark.set_dirty(MapKey::Int(5), false);
        mark.set_dirty(MapKey::Str("a".into()), true);
        assert!(mark.is_dirty());
        assert!(mark.is_changed());
        assert_eq!(
            mark.dirty_entries(),
            vec![(MapKey::Int(5), false), (MapKey::Str("a".into()), true)]
        );
    }

    #[test]
    fn map_mark_reset_keeps_cached_flag() {
        let mut mark = BaseMapDirtyMark::default();
        assert!(!mark.has_cached());
        mark.set_cached();
        mark.set_dirty(MapKey::UInt(1), true);
        mark.reset_dirty();
        assert!(!mark.is_dirty());
        assert!(mark.has_cached());
        mark.reset_cached();
        assert!(!mark.has_cached());
    }

    #[test]
    fn mark_views_dispatch_to_the_right_marker() {
        let mut whole = BaseDirtyMark::default();
        whole.set_dirty();
        assert!(whole.as_mark().is_dirty());
        whole.as_mark_mut().reset_dirty();
        whole.as_mark_mut().reset_cached();
        assert!(!whole.is_dirty());

        let mut map = BaseMapDirtyMark::default();
        map.set_cached();
        map.as_mark_mut().reset_cached();
        assert!(!map.has_cached());
        assert!(!map.as_mark().is_changed());
    }
}
