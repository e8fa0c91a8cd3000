//! Bytecode operation codes.
//!
//! The interpreter is a stack machine: most operations pop their operands
//! from the value stack and push the result. Instructions are encoded as an
//! opcode byte followed by big-endian operands. Jump operands are absolute
//! byte offsets into the code buffer; an unpatched forward jump holds
//! [`JUMP_SENTINEL`] until the enclosing construct resolves it.

use num_enum::TryFromPrimitive;

/// Placeholder target written by forward jumps before patching. Emission is
/// not complete until no jump in the buffer carries this value.
pub const JUMP_SENTINEL: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    // =========================================================================
    // Stack manipulation
    // =========================================================================
    /// Push a constant-pool value.
    /// Operand: u16 constant index
    Push = 0,
    /// Pop and discard.
    Pop,
    /// Pop the completion value of an expression statement.
    PopExpressionStatement,
    DuplicateTopOfStackValue,
    /// Move the top of stack onto the temp stack.
    PushIntoTempStack,
    /// Move the top of the temp stack back onto the value stack.
    /// Operand: u32 byte offset of the matching PushIntoTempStack
    PopFromTempStack,
    /// Truncate the value stack to a known depth (labeled-statement exit).
    /// Operand: u16 target depth relative to the frame base
    LoadStackPointer,

    // =========================================================================
    // Variable access
    // =========================================================================
    /// Operands: u32 name, u16 profile slot
    GetById,
    /// Operand: u32 name. Leaves the assigned value on the stack.
    PutById,
    /// Operand: u32 name
    CreateBinding,
    /// Operands: u16 local slot, u16 profile slot
    GetByIndex,
    /// Operand: u16 local slot. Leaves the assigned value on the stack.
    PutByIndex,

    // =========================================================================
    // Member access
    // =========================================================================
    /// `[obj, prop] -> [value]`.
    /// Operands: u16 value profile, u16 object profile
    GetObject,
    /// As GetObject but leaves obj and prop on the stack (compound
    /// assignment). Operands: u16 value profile, u16 object profile
    GetObjectWithPeeking,
    /// Constant-keyed read through the per-site inline cache.
    /// Operands: u16 property constant, u16 cache slot, u16 value profile,
    /// u16 object profile
    GetObjectPreComputedCase,
    /// Peeking variant of the above.
    GetObjectWithPeekingPreComputedCase,
    /// `[obj, prop, value] -> [value]`.
    /// Operand: u16 object profile
    SetObject,
    /// `[obj, prop, value] -> [value]` on the assignment path.
    /// Operand: u16 object profile
    PutInObject,
    /// `[obj, value] -> [value]` with the transition cache.
    /// Operands: u16 property constant, u16 cache slot, u16 object profile
    PutInObjectPreComputedCase,

    // =========================================================================
    // Arithmetic and logic
    // =========================================================================
    Plus,
    Minus,
    Multiply,
    Division,
    Mod,
    Increment,
    Decrement,
    UnaryPlus,
    UnaryMinus,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseNot,
    LeftShift,
    SignedRightShift,
    UnsignedRightShift,
    LogicalNot,
    ToNumber,

    // =========================================================================
    // Comparison
    // =========================================================================
    Equal,
    NotEqual,
    StrictEqual,
    NotStrictEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    /// `[key, obj] -> [bool]`
    StringIn,
    /// `[value, constructor] -> [bool]`
    InstanceOf,
    UnaryTypeOf,
    /// `[obj, prop] -> [bool]`
    UnaryDelete,

    // =========================================================================
    // Control flow
    // =========================================================================
    /// Operand: u32 target
    Jump,
    /// Pops the condition. Operand: u32 target
    JumpIfTopOfStackValueIsFalse,
    /// Pops the condition. Operand: u32 target
    JumpIfTopOfStackValueIsTrue,
    /// Pops the condition; when taken, pops one more value.
    /// Operand: u32 target
    JumpAndPopIfTopOfStackValueIsTrue,
    /// Reads the condition without popping. Operand: u32 target
    JumpIfTopOfStackValueIsFalseWithPeeking,
    /// Reads the condition without popping. Operand: u32 target
    JumpIfTopOfStackValueIsTrueWithPeeking,
    /// Profile anchor at loop headers; a no-op to execute.
    LoopStart,

    // =========================================================================
    // For-in
    // =========================================================================
    /// `[collection] -> [enumeration]`
    EnumerateObject,
    /// `[enumeration] -> [enumeration, bool]`
    CheckIfKeyIsLast,
    /// `[enumeration] -> [enumeration, key]`
    EnumerateObjectKey,

    // =========================================================================
    // Literals and functions
    // =========================================================================
    /// Operand: u16 reserved property count
    CreateObject,
    /// Operand: u16 length
    CreateArray,
    /// `[obj, key, value] -> [obj]`
    InitObject,
    /// `[arr, index, value] -> [arr]`
    InitArrayObject,
    /// Operand: u16 code block index
    CreateFunction,
    This,

    // =========================================================================
    // Calls
    // =========================================================================
    PrepareFunctionCall,
    PushFunctionCallReceiver,
    /// `[callee, receiver, args..] -> [result]`.
    /// Operands: u16 argc, u16 profile slot
    CallFunction,
    /// `[callee, args..] -> [result]`.
    /// Operands: u16 argc, u16 profile slot
    NewFunctionCall,

    // =========================================================================
    // Exceptions, return, halt
    // =========================================================================
    Throw,
    ReturnFunction,
    ReturnFunctionWithValue,
    End,
}

impl Opcode {
    /// Operand byte count following the opcode byte.
    pub fn operand_size(self) -> usize {
        match self {
            Opcode::Pop
            | Opcode::PopExpressionStatement
            | Opcode::DuplicateTopOfStackValue
            | Opcode::PushIntoTempStack
            | Opcode::Plus
            | Opcode::Minus
            | Opcode::Multiply
            | Opcode::Division
            | Opcode::Mod
            | Opcode::Increment
            | Opcode::Decrement
            | Opcode::UnaryPlus
            | Opcode::UnaryMinus
            | Opcode::BitwiseAnd
            | Opcode::BitwiseOr
            | Opcode::BitwiseXor
            | Opcode::BitwiseNot
            | Opcode::LeftShift
            | Opcode::SignedRightShift
            | Opcode::UnsignedRightShift
            | Opcode::LogicalNot
            | Opcode::ToNumber
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::StrictEqual
            | Opcode::NotStrictEqual
            | Opcode::GreaterThan
            | Opcode::GreaterThanOrEqual
            | Opcode::LessThan
            | Opcode::LessThanOrEqual
            | Opcode::StringIn
            | Opcode::InstanceOf
            | Opcode::UnaryTypeOf
            | Opcode::UnaryDelete
            | Opcode::LoopStart
            | Opcode::EnumerateObject
            | Opcode::CheckIfKeyIsLast
            | Opcode::EnumerateObjectKey
            | Opcode::InitObject
            | Opcode::InitArrayObject
            | Opcode::This
            | Opcode::PrepareFunctionCall
            | Opcode::PushFunctionCallReceiver
            | Opcode::Throw
            | Opcode::ReturnFunction
            | Opcode::ReturnFunctionWithValue
            | Opcode::End => 0,

            Opcode::Push
            | Opcode::LoadStackPointer
            | Opcode::PutByIndex
            | Opcode::SetObject
            | Opcode::PutInObject
            | Opcode::CreateObject
            | Opcode::CreateArray
            | Opcode::CreateFunction => 2,

            Opcode::GetByIndex
            | Opcode::GetObject
            | Opcode::GetObjectWithPeeking
            | Opcode::CallFunction
            | Opcode::NewFunctionCall
            | Opcode::PopFromTempStack
            | Opcode::PutById
            | Opcode::CreateBinding
            | Opcode::Jump
            | Opcode::JumpIfTopOfStackValueIsFalse
            | Opcode::JumpIfTopOfStackValueIsTrue
            | Opcode::JumpAndPopIfTopOfStackValueIsTrue
            | Opcode::JumpIfTopOfStackValueIsFalseWithPeeking
            | Opcode::JumpIfTopOfStackValueIsTrueWithPeeking => 4,

            Opcode::GetById | Opcode::PutInObjectPreComputedCase => 6,

            Opcode::GetObjectPreComputedCase
            | Opcode::GetObjectWithPeekingPreComputedCase => 8,
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::JumpIfTopOfStackValueIsFalse
                | Opcode::JumpIfTopOfStackValueIsTrue
                | Opcode::JumpAndPopIfTopOfStackValueIsTrue
                | Opcode::JumpIfTopOfStackValueIsFalseWithPeeking
                | Opcode::JumpIfTopOfStackValueIsTrueWithPeeking
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Push => "Push",
            Opcode::Pop => "Pop",
            Opcode::PopExpressionStatement => "PopExpressionStatement",
            Opcode::DuplicateTopOfStackValue => "DuplicateTopOfStackValue",
            Opcode::PushIntoTempStack => "PushIntoTempStack",
            Opcode::PopFromTempStack => "PopFromTempStack",
            Opcode::LoadStackPointer => "LoadStackPointer",
            Opcode::GetById => "GetById",
            Opcode::PutById => "PutById",
            Opcode::CreateBinding => "CreateBinding",
            Opcode::GetByIndex => "GetByIndex",
            Opcode::PutByIndex => "PutByIndex",
            Opcode::GetObject => "GetObject",
            Opcode::GetObjectWithPeeking => "GetObjectWithPeeking",
            Opcode::GetObjectPreComputedCase => "GetObjectPreComputedCase",
            Opcode::GetObjectWithPeekingPreComputedCase => {
                "GetObjectWithPeekingPreComputedCase"
            }
            Opcode::SetObject => "SetObject",
            Opcode::PutInObject => "PutInObject",
            Opcode::PutInObjectPreComputedCase => "PutInObjectPreComputedCase",
            Opcode::Plus => "Plus",
            Opcode::Minus => "Minus",
            Opcode::Multiply => "Multiply",
            Opcode::Division => "Division",
            Opcode::Mod => "Mod",
            Opcode::Increment => "Increment",
            Opcode::Decrement => "Decrement",
            Opcode::UnaryPlus => "UnaryPlus",
            Opcode::UnaryMinus => "UnaryMinus",
            Opcode::BitwiseAnd => "BitwiseAnd",
            Opcode::BitwiseOr => "BitwiseOr",
            Opcode::BitwiseXor => "BitwiseXor",
            Opcode::BitwiseNot => "BitwiseNot",
            Opcode::LeftShift => "LeftShift",
            Opcode::SignedRightShift => "SignedRightShift",
            Opcode::UnsignedRightShift => "UnsignedRightShift",
            Opcode::LogicalNot => "LogicalNot",
            Opcode::ToNumber => "ToNumber",
            Opcode::Equal => "Equal",
            Opcode::NotEqual => "NotEqual",
            Opcode::StrictEqual => "StrictEqual",
            Opcode::NotStrictEqual => "NotStrictEqual",
            Opcode::GreaterThan => "GreaterThan",
            Opcode::GreaterThanOrEqual => "GreaterThanOrEqual",
            Opcode::LessThan => "LessThan",
            Opcode::LessThanOrEqual => "LessThanOrEqual",
            Opcode::StringIn => "StringIn",
            Opcode::InstanceOf => "InstanceOf",
            Opcode::UnaryTypeOf => "UnaryTypeOf",
            Opcode::UnaryDelete => "UnaryDelete",
            Opcode::Jump => "Jump",
            Opcode::JumpIfTopOfStackValueIsFalse => "JumpIfTopOfStackValueIsFalse",
            Opcode::JumpIfTopOfStackValueIsTrue => "JumpIfTopOfStackValueIsTrue",
            Opcode::JumpAndPopIfTopOfStackValueIsTrue => {
                "JumpAndPopIfTopOfStackValueIsTrue"
            }
            Opcode::JumpIfTopOfStackValueIsFalseWithPeeking => {
                "JumpIfTopOfStackValueIsFalseWithPeeking"
            }
            Opcode::JumpIfTopOfStackValueIsTrueWithPeeking => {
                "JumpIfTopOfStackValueIsTrueWithPeeking"
            }
            Opcode::LoopStart => "LoopStart",
            Opcode::EnumerateObject => "EnumerateObject",
            Opcode::CheckIfKeyIsLast => "CheckIfKeyIsLast",
            Opcode::EnumerateObjectKey => "EnumerateObjectKey",
            Opcode::CreateObject => "CreateObject",
            Opcode::CreateArray => "CreateArray",
            Opcode::InitObject => "InitObject",
            Opcode::InitArrayObject => "InitArrayObject",
            Opcode::CreateFunction => "CreateFunction",
            Opcode::This => "This",
            Opcode::PrepareFunctionCall => "PrepareFunctionCall",
            Opcode::PushFunctionCallReceiver => "PushFunctionCallReceiver",
            Opcode::CallFunction => "CallFunction",
            Opcode::NewFunctionCall => "NewFunctionCall",
            Opcode::Throw => "Throw",
            Opcode::ReturnFunction => "ReturnFunction",
            Opcode::ReturnFunctionWithValue => "ReturnFunctionWithValue",
            Opcode::End => "End",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoding_round_trips() {
        assert_eq!(Opcode::try_from(0u8).unwrap(), Opcode::Push);
        let end = Opcode::End as u8;
        assert_eq!(Opcode::try_from(end).unwrap(), Opcode::End);
        assert!(Opcode::try_from(end + 1).is_err());
    }

    #[test]
    fn operand_sizes() {
        assert_eq!(Opcode::Pop.operand_size(), 0);
        assert_eq!(Opcode::Push.operand_size(), 2);
        assert_eq!(Opcode::Jump.operand_size(), 4);
        assert_eq!(Opcode::GetById.operand_size(), 6);
        assert_eq!(Opcode::GetObjectPreComputedCase.operand_size(), 8);
    }

    #[test]
    fn jump_classification() {
        assert!(Opcode::Jump.is_jump());
        assert!(Opcode::JumpAndPopIfTopOfStackValueIsTrue.is_jump());
        assert!(!Opcode::LoopStart.is_jump());
        assert!(!Opcode::Push.is_jump());
    }
}
