//! The type lattice shared by the interpreter's profiles and the JIT.

use bitflags::bitflags;

use crate::heap::CellKind;
use crate::value::Value;

bitflags! {
    /// Lattice element: a set of runtime type tags a value has been seen
    /// with. The empty set is bottom; the union of all flags is top.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Type: u16 {
        const INT32 = 1 << 0;
        const DOUBLE = 1 << 1;
        const BOOLEAN = 1 << 2;
        const STRING = 1 << 3;
        const SIMPLE_STRING = 1 << 4;
        const OBJECT = 1 << 5;
        const ARRAY_OBJECT = 1 << 6;
        const STRING_OBJECT = 1 << 7;
        const FUNCTION_OBJECT = 1 << 8;
        const UNDEFINED = 1 << 9;
        const NULL = 1 << 10;
    }
}

impl Type {
    pub fn top() -> Type {
        Type::all()
    }

    pub fn is_bottom(self) -> bool {
        self.is_empty()
    }

    pub fn is_int32_type(self) -> bool {
        self == Type::INT32
    }

    pub fn is_double_type(self) -> bool {
        self == Type::DOUBLE
    }

    /// Number means "only int32 and/or double bits, and at least one".
    pub fn is_number_type(self) -> bool {
        !self.is_empty() && (self - (Type::INT32 | Type::DOUBLE)).is_empty()
    }

    pub fn is_boolean_type(self) -> bool {
        self == Type::BOOLEAN
    }

    pub fn is_string_type(self) -> bool {
        !self.is_empty() && (self - (Type::STRING | Type::SIMPLE_STRING)).is_empty()
    }

    pub fn is_undefined_type(self) -> bool {
        self == Type::UNDEFINED
    }

    pub fn is_null_type(self) -> bool {
        self == Type::NULL
    }

    pub fn is_array_object_type(self) -> bool {
        self.contains(Type::ARRAY_OBJECT)
    }

    pub fn is_string_object_type(self) -> bool {
        self.contains(Type::STRING_OBJECT)
    }

    pub fn is_function_object_type(self) -> bool {
        self.contains(Type::FUNCTION_OBJECT)
    }

    pub fn is_object_type(self) -> bool {
        self.intersects(
            Type::OBJECT
                | Type::ARRAY_OBJECT
                | Type::STRING_OBJECT
                | Type::FUNCTION_OBJECT,
        )
    }

    /// The tag set a single runtime value contributes.
    pub fn of_value(v: Value) -> Type {
        match v {
            Value::Empty | Value::Undefined => Type::UNDEFINED,
            Value::Null => Type::NULL,
            Value::Boolean(_) => Type::BOOLEAN,
            Value::Int32(_) => Type::INT32,
            Value::Double(_) => Type::DOUBLE,
            Value::Str(_) => Type::STRING,
            Value::Ptr(r) => match r.kind {
                CellKind::Array => Type::ARRAY_OBJECT,
                CellKind::Function => Type::FUNCTION_OBJECT,
                CellKind::Ordinary => Type::OBJECT,
            },
        }
    }
}

/// One profile slot in a CodeBlock: the union of tag sets observed at the
/// attached bytecode site.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeProfile {
    seen: Type,
}

impl TypeProfile {
    pub fn record(&mut self, v: Value) {
        self.seen |= Type::of_value(v);
    }

    pub fn observed(&self) -> Type {
        self.seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_predicates() {
        assert!(Type::INT32.is_int32_type());
        assert!(Type::INT32.is_number_type());
        assert!(Type::DOUBLE.is_number_type());
        assert!((Type::INT32 | Type::DOUBLE).is_number_type());
        assert!(!(Type::INT32 | Type::DOUBLE).is_int32_type());
        assert!(!(Type::INT32 | Type::STRING).is_number_type());
        assert!(!Type::empty().is_number_type());
    }

    #[test]
    fn string_predicates() {
        assert!(Type::STRING.is_string_type());
        assert!(Type::SIMPLE_STRING.is_string_type());
        assert!(!(Type::STRING | Type::INT32).is_string_type());
    }

    #[test]
    fn profile_accumulates() {
        let mut p = TypeProfile::default();
        p.record(Value::Int32(1));
        assert!(p.observed().is_int32_type());
        p.record(Value::Double(0.5));
        assert!(p.observed().is_number_type());
        assert!(!p.observed().is_int32_type());
    }
}
