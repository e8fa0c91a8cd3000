//! Generational arena for heap cells.
//!
//! Cells are stored in a slot vector with a free list. A [`HeapRef`] carries
//! the slot index, the slot's generation at allocation time, and the cell
//! kind, so `is_array`/`is_function` tests on a tagged value never touch the
//! heap and stale references are detectable after a sweep.

use crate::object::{ObjectKind, ScriptObject};
use crate::value::Value;

/// Coarse cell classification, fixed at allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    Ordinary,
    Array,
    Function,
}

/// Handle to a heap cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapRef {
    pub index: u32,
    pub generation: u32,
    pub kind: CellKind,
}

struct HeapSlot {
    generation: u32,
    cell: Option<ScriptObject>,
}

/// Cell storage with generational indices and mark/sweep collection.
#[derive(Default)]
pub struct Heap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, cell: ScriptObject) -> HeapRef {
        let kind = match cell.kind {
            ObjectKind::Array(_) => CellKind::Array,
            ObjectKind::Function(_) => CellKind::Function,
            _ => CellKind::Ordinary,
        };
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.cell = Some(cell);
            HeapRef {
                index,
                generation: slot.generation,
                kind,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                cell: Some(cell),
            });
            HeapRef {
                index,
                generation: 0,
                kind,
            }
        }
    }

    /// Returns None if the handle is stale.
    pub fn get(&self, r: HeapRef) -> Option<&ScriptObject> {
        let slot = self.slots.get(r.index as usize)?;
        if slot.generation != r.generation {
            return None;
        }
        slot.cell.as_ref()
    }

    pub fn get_mut(&mut self, r: HeapRef) -> Option<&mut ScriptObject> {
        let slot = self.slots.get_mut(r.index as usize)?;
        if slot.generation != r.generation {
            return None;
        }
        slot.cell.as_mut()
    }

    /// Dereference a handle the VM created and still holds. A stale handle
    /// here is an engine bug, not a script error.
    pub fn cell(&self, r: HeapRef) -> &ScriptObject {
        self.get(r).expect("stale heap reference")
    }

    pub fn cell_mut(&mut self, r: HeapRef) -> &mut ScriptObject {
        self.get_mut(r).expect("stale heap reference")
    }

    pub fn is_live(&self, r: HeapRef) -> bool {
        self.get(r).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.cell.is_some()).count()
    }

    /// Mark from the given roots and sweep everything unreached. Swept slots
    /// bump their generation so surviving handles to them go stale.
    pub fn collect(&mut self, roots: &[Value]) {
        let mut marked = vec![false; self.slots.len()];
        let mut worklist: Vec<HeapRef> = Vec::new();
        for &root in roots {
            if let Value::Ptr(r) = root {
                worklist.push(r);
            }
        }

        while let Some(r) = worklist.pop() {
            let idx = r.index as usize;
            if idx >= marked.len() || marked[idx] {
                continue;
            }
            let Some(cell) = self.get(r) else { continue };
            marked[idx] = true;
            cell.trace(&mut |v| {
                if let Value::Ptr(out) = v {
                    worklist.push(out);
                }
            });
        }

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.cell.is_some() && !marked[idx] {
                slot.cell = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free_list.push(idx as u32);
            }
        }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ScriptObject;
    use crate::shape::ShapeArena;

    fn ordinary() -> ScriptObject {
        ScriptObject::new_ordinary(ShapeArena::root(), Value::Null)
    }

    #[test]
    fn allocate_and_get() {
        let mut heap = Heap::new();
        let r = heap.allocate(ordinary());
        assert_eq!(r.kind, CellKind::Ordinary);
        assert!(heap.get(r).is_some());
    }

    #[test]
    fn stale_handle_after_collect() {
        let mut heap = Heap::new();
        let r = heap.allocate(ordinary());
        heap.collect(&[]);
        assert!(heap.get(r).is_none());

        // Slot is reused under a new generation.
        let r2 = heap.allocate(ordinary());
        assert_eq!(r2.index, r.index);
        assert_ne!(r2.generation, r.generation);
        assert!(heap.get(r2).is_some());
        assert!(heap.get(r).is_none());
    }

    #[test]
    fn collect_keeps_reachable_cells() {
        let mut heap = Heap::new();
        let inner = heap.allocate(ordinary());
        let mut outer_cell = ordinary();
        outer_cell.proto = Value::Ptr(inner);
        let outer = heap.allocate(outer_cell);
        let unreferenced = heap.allocate(ordinary());

        heap.collect(&[Value::Ptr(outer)]);
        assert!(heap.is_live(outer));
        assert!(heap.is_live(inner));
        assert!(!heap.is_live(unreferenced));
    }
}
