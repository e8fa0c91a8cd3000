//! The basic-block graph.
//!
//! Blocks live in an arena and are identified by [`BlockId`]; the graph
//! additionally keeps an execution order, assigned to each block the first
//! time it becomes current during front-end construction. Jump targets
//! discovered ahead of the scan exist in the arena before they have an
//! order index.
//!
//! The graph owns the dense operand-type table: one lattice element per SSA
//! index of the originating code block, seeded from interpreter profiles by
//! the front-end and completed by type inference.

use escargot_core::types::Type;

use crate::ir::Esir;

pub type BlockId = usize;

#[derive(Debug)]
pub struct EsBasicBlock {
    /// Position in execution order; None until the block is first entered.
    pub index: Option<usize>,
    pub instructions: Vec<Esir>,
    pub parents: Vec<BlockId>,
    pub children: Vec<BlockId>,
}

impl EsBasicBlock {
    fn new() -> Self {
        Self {
            index: None,
            instructions: Vec::new(),
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn ends_with_jump_or_branch(&self) -> bool {
        self.instructions
            .last()
            .map(|ir| ir.is_terminator())
            .unwrap_or(false)
    }

    /// Swap the instruction at `at` for a specialized form.
    pub fn replace(&mut self, at: usize, ir: Esir) {
        self.instructions[at] = ir;
    }
}

#[derive(Debug)]
pub struct EsGraph {
    blocks: Vec<EsBasicBlock>,
    order: Vec<BlockId>,
    operand_types: Vec<Type>,
}

impl EsGraph {
    pub fn new(ssa_value_count: u32) -> Self {
        Self {
            blocks: Vec::new(),
            order: Vec::new(),
            operand_types: vec![Type::empty(); ssa_value_count as usize],
        }
    }

    /// A detached block (loop headers); ordered when first entered.
    pub fn create_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(EsBasicBlock::new());
        id
    }

    /// A block entered from `parent`: edges are wired and the block takes
    /// the next order index immediately.
    pub fn create_block_with_parent(&mut self, parent: BlockId) -> BlockId {
        let id = self.create_block();
        self.add_edge(parent, id);
        self.push_to_order(id);
        id
    }

    pub fn push_to_order(&mut self, id: BlockId) {
        debug_assert!(self.blocks[id].index.is_none());
        self.blocks[id].index = Some(self.order.len());
        self.order.push(id);
    }

    pub fn add_edge(&mut self, parent: BlockId, child: BlockId) {
        self.blocks[parent].children.push(child);
        self.blocks[child].parents.push(parent);
    }

    pub fn block(&self, id: BlockId) -> &EsBasicBlock {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut EsBasicBlock {
        &mut self.blocks[id]
    }

    pub fn push_instruction(&mut self, block: BlockId, ir: Esir) {
        self.blocks[block].instructions.push(ir);
    }

    /// Number of blocks in execution order.
    pub fn basic_block_size(&self) -> usize {
        self.order.len()
    }

    pub fn ordered_block(&self, index: usize) -> BlockId {
        self.order[index]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn set_operand_type(&mut self, index: i32, ty: Type) {
        if index >= 0 {
            self.operand_types[index as usize] = ty;
        }
    }

    pub fn operand_type(&self, index: i32) -> Type {
        if index >= 0 {
            self.operand_types[index as usize]
        } else {
            Type::empty()
        }
    }

    pub fn operand_types(&self) -> &[Type] {
        &self.operand_types
    }

    /// Every instruction of every ordered block, for whole-graph scans.
    pub fn instructions(&self) -> impl Iterator<Item = &Esir> {
        self.order
            .iter()
            .flat_map(|&id| self.blocks[id].instructions.iter())
    }

    /// Render the graph for inspection.
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (i, &id) in self.order.iter().enumerate() {
            let block = &self.blocks[id];
            let _ = writeln!(
                out,
                "block {i} (parents: {:?}, children: {:?})",
                block.parents, block.children
            );
            for ir in &block.instructions {
                let target = ir.target();
                if target >= 0 {
                    let _ = writeln!(
                        out,
                        "  t{target} = {} {:?}",
                        ir.name(),
                        self.operand_type(target)
                    );
                } else {
                    let _ = writeln!(out, "  {}", ir.name());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_assigned_on_entry() {
        let mut graph = EsGraph::new(0);
        let entry = graph.create_block();
        graph.push_to_order(entry);
        let detached = graph.create_block();
        assert_eq!(graph.basic_block_size(), 1);
        assert!(graph.block(detached).index.is_none());

        graph.push_to_order(detached);
        assert_eq!(graph.block(detached).index, Some(1));
        assert_eq!(graph.ordered_block(1), detached);
    }

    #[test]
    fn edges_are_bidirectional() {
        let mut graph = EsGraph::new(0);
        let a = graph.create_block();
        graph.push_to_order(a);
        let b = graph.create_block_with_parent(a);
        assert_eq!(graph.block(a).children, vec![b]);
        assert_eq!(graph.block(b).parents, vec![a]);
    }

    #[test]
    fn operand_table_ignores_missing_indices() {
        let mut graph = EsGraph::new(2);
        graph.set_operand_type(-1, Type::INT32);
        graph.set_operand_type(1, Type::INT32);
        assert_eq!(graph.operand_type(-1), Type::empty());
        assert_eq!(graph.operand_type(0), Type::empty());
        assert_eq!(graph.operand_type(1), Type::INT32);
    }
}
