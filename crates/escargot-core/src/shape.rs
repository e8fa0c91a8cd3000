//! Hidden classes.
//!
//! A [`Shape`] describes an object's property layout: an ordered list of
//! `(key, flags)` entries mapping each property to a slot index, plus a
//! transition map to the shapes reachable by adding one more property.
//! Shapes form a tree rooted at the empty shape; two objects that perform
//! the same sequence of property additions converge on the same [`ShapeId`],
//! which is what makes inline-cache pointer comparison sound.
//!
//! Shapes are allocated from a [`ShapeArena`] and never freed or moved, so a
//! `ShapeId` is a stable identity for the lifetime of the VM.

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::string_table::StringId;

bitflags! {
    /// Per-property attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u8 {
        const WRITABLE = 1 << 0;
        const ENUMERABLE = 1 << 1;
        const CONFIGURABLE = 1 << 2;
    }
}

impl PropertyFlags {
    /// The attributes of a plain data property created by assignment.
    pub fn data_default() -> Self {
        Self::WRITABLE | Self::ENUMERABLE | Self::CONFIGURABLE
    }
}

/// Stable identity of a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeId(pub u32);

#[derive(Debug, Clone, Copy)]
pub struct PropertyEntry {
    pub key: StringId,
    pub flags: PropertyFlags,
}

#[derive(Debug)]
pub struct Shape {
    entries: Vec<PropertyEntry>,
    index: FxHashMap<StringId, u32>,
    transitions: FxHashMap<(StringId, PropertyFlags), ShapeId>,
    has_readonly: bool,
}

impl Shape {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            index: FxHashMap::default(),
            transitions: FxHashMap::default(),
            has_readonly: false,
        }
    }
}

/// Owner of all shapes. Shapes are append-only.
#[derive(Debug)]
pub struct ShapeArena {
    shapes: Vec<Shape>,
}

impl Default for ShapeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ShapeArena {
    pub fn new() -> Self {
        Self {
            shapes: vec![Shape::empty()],
        }
    }

    /// The empty shape every object starts from.
    pub fn root() -> ShapeId {
        ShapeId(0)
    }

    fn shape(&self, id: ShapeId) -> &Shape {
        &self.shapes[id.0 as usize]
    }

    /// Slot index of `key` on this shape, if present.
    pub fn find_property(&self, id: ShapeId, key: StringId) -> Option<u32> {
        self.shape(id).index.get(&key).copied()
    }

    pub fn property_count(&self, id: ShapeId) -> usize {
        self.shape(id).entries.len()
    }

    pub fn entries(&self, id: ShapeId) -> &[PropertyEntry] {
        &self.shape(id).entries
    }

    pub fn flags_at(&self, id: ShapeId, slot: u32) -> PropertyFlags {
        self.shape(id).entries[slot as usize].flags
    }

    /// Whether any property along this shape is non-writable. Used to gate
    /// the prototype walk on write misses.
    pub fn has_readonly_property(&self, id: ShapeId) -> bool {
        self.shape(id).has_readonly
    }

    /// Follow (or create) the transition edge for adding `(key, flags)`.
    /// The same edge from the same shape always yields the same child.
    pub fn transition(
        &mut self,
        from: ShapeId,
        key: StringId,
        flags: PropertyFlags,
    ) -> ShapeId {
        if let Some(&child) = self.shape(from).transitions.get(&(key, flags)) {
            return child;
        }
        let mut child = Shape {
            entries: self.shape(from).entries.clone(),
            index: self.shape(from).index.clone(),
            transitions: FxHashMap::default(),
            has_readonly: self.shape(from).has_readonly
                || !flags.contains(PropertyFlags::WRITABLE),
        };
        let slot = child.entries.len() as u32;
        child.entries.push(PropertyEntry { key, flags });
        child.index.insert(key, slot);

        let id = ShapeId(self.shapes.len() as u32);
        self.shapes.push(child);
        self.shapes[from.0 as usize]
            .transitions
            .insert((key, flags), id);
        id
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::string_table::StringTable;

    #[test]
    fn transition_assigns_slots_in_order() {
        let mut strings = StringTable::new();
        let mut shapes = ShapeArena::new();
        let a = strings.intern("a");
        let b = strings.intern("b");

        let s1 = shapes.transition(ShapeArena::root(), a, PropertyFlags::data_default());
        let s2 = shapes.transition(s1, b, PropertyFlags::data_default());

        assert_eq!(shapes.find_property(s2, a), Some(0));
        assert_eq!(shapes.find_property(s2, b), Some(1));
        assert_eq!(shapes.property_count(s2), 2);
        assert_eq!(shapes.find_property(s1, b), None);
    }

    #[test]
    fn identical_addition_sequences_converge() {
        let mut strings = StringTable::new();
        let mut shapes = ShapeArena::new();
        let x = strings.intern("x");
        let y = strings.intern("y");
        let flags = PropertyFlags::data_default();

        let first_step = shapes.transition(ShapeArena::root(), x, flags);
        let first = shapes.transition(first_step, y, flags);
        let second_step = shapes.transition(ShapeArena::root(), x, flags);
        let second = shapes.transition(second_step, y, flags);
        assert_eq!(first, second);
    }

    #[test]
    fn different_flags_take_different_edges() {
        let mut strings = StringTable::new();
        let mut shapes = ShapeArena::new();
        let x = strings.intern("x");

        let writable = shapes.transition(ShapeArena::root(), x, PropertyFlags::data_default());
        let frozen = shapes.transition(
            ShapeArena::root(),
            x,
            PropertyFlags::ENUMERABLE | PropertyFlags::CONFIGURABLE,
        );
        assert_ne!(writable, frozen);
        assert!(!shapes.has_readonly_property(writable));
        assert!(shapes.has_readonly_property(frozen));
    }
}
