//! Inline caches.
//!
//! Each named-property bytecode site owns one [`PropertyCache`]. For reads
//! it memoizes the hidden-class chain walked from the receiver (and the slot
//! where the key was found, or `None` for a memoized "absent"). For writes
//! it additionally memoizes the transition target shape taken when the write
//! added a new property, so the fast path is "append slot, swap shape".
//!
//! Caches are purely optimistic: a mismatch never corrupts state, it only
//! forces the slow path, which re-records.

use crate::shape::ShapeId;

#[derive(Debug, Clone, Default)]
pub struct PropertyCache {
    /// Shapes observed from the receiver up the prototype chain.
    pub chain: Vec<ShapeId>,
    /// Slot index on the last shape of the chain; `None` means the property
    /// was absent along the whole chain.
    pub slot: Option<u32>,
    /// For writes that extended the receiver: the shape the object moves to.
    pub transition: Option<ShapeId>,
}

impl PropertyCache {
    pub fn is_cold(&self) -> bool {
        self.chain.is_empty() && self.transition.is_none()
    }

    pub fn clear(&mut self) {
        self.chain.clear();
        self.slot = None;
        self.transition = None;
    }
}
