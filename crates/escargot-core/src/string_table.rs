//! Interned strings.
//!
//! Every string the engine touches lives in the [`StringTable`] and is
//! addressed by a [`StringId`]. The table is insert-only, so ids are stable
//! for the lifetime of a VM instance and id equality is content equality.
//! Property-key comparison is therefore a single integer compare, which is
//! what the inline caches and hidden-class maps rely on.

use rustc_hash::FxHashMap;

/// Size of the pre-interned single-character table. Character reads on
/// strings below this code point reuse a canonical id instead of allocating.
pub const ASCII_TABLE_SIZE: usize = 128;

/// Handle to an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(pub u32);

/// Insert-only string interner.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<Box<str>>,
    lookup: FxHashMap<Box<str>, StringId>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning the canonical id for its contents.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, id);
        id
    }

    /// Resolve an id back to its contents.
    pub fn resolve(&self, id: StringId) -> &str {
        &self.strings[id.0 as usize]
    }

    /// Concatenate two interned strings, interning the result.
    pub fn concat(&mut self, a: StringId, b: StringId) -> StringId {
        let mut s = String::with_capacity(
            self.resolve(a).len() + self.resolve(b).len(),
        );
        s.push_str(self.resolve(a));
        s.push_str(self.resolve(b));
        self.intern(&s)
    }

    pub fn char_count(&self, id: StringId) -> usize {
        self.resolve(id).chars().count()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Canonical ids for the strings the engine compares against constantly.
#[derive(Debug)]
pub struct Atoms {
    pub empty: StringId,
    pub length: StringId,
    pub prototype: StringId,
    pub proto: StringId,
    pub undefined: StringId,
    pub object: StringId,
    pub boolean: StringId,
    pub number: StringId,
    pub string: StringId,
    pub function: StringId,
    pub nan: StringId,
    pub infinity: StringId,
    pub negative_infinity: StringId,
    pub true_: StringId,
    pub false_: StringId,
    pub null: StringId,
    pub name: StringId,
    pub message: StringId,
    /// Single-character strings for code points below [`ASCII_TABLE_SIZE`].
    pub ascii: Vec<StringId>,
}

impl Atoms {
    pub fn new(table: &mut StringTable) -> Self {
        let mut buf = [0u8; 4];
        let ascii = (0..ASCII_TABLE_SIZE)
            .map(|c| {
                let ch = char::from_u32(c as u32).expect("ascii code point");
                table.intern(ch.encode_utf8(&mut buf))
            })
            .collect();
        Self {
            empty: table.intern(""),
            length: table.intern("length"),
            prototype: table.intern("prototype"),
            proto: table.intern("__proto__"),
            undefined: table.intern("undefined"),
            object: table.intern("object"),
            boolean: table.intern("boolean"),
            number: table.intern("number"),
            string: table.intern("string"),
            function: table.intern("function"),
            nan: table.intern("NaN"),
            infinity: table.intern("Infinity"),
            negative_infinity: table.intern("-Infinity"),
            true_: table.intern("true"),
            false_: table.intern("false"),
            null: table.intern("null"),
            name: table.intern("name"),
            message: table.intern("message"),
            ascii,
        }
    }
}

/// Parse a canonical array index per the ECMAScript array-index definition:
/// a base-10 string with no leading zeros (except `"0"` itself) whose value
/// fits below 2^32 − 1.
pub fn parse_array_index(s: &str) -> Option<u32> {
    if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = s.parse().ok()?;
    if n < u32::MAX as u64 { Some(n as u32) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_dedups() {
        let mut table = StringTable::new();
        let a = table.intern("foo");
        let b = table.intern("bar");
        let c = table.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(table.resolve(a), "foo");
    }

    #[test]
    fn concat_interns_result() {
        let mut table = StringTable::new();
        let a = table.intern("hel");
        let b = table.intern("lo");
        let ab = table.concat(a, b);
        assert_eq!(table.resolve(ab), "hello");
        assert_eq!(ab, table.intern("hello"));
    }

    #[test]
    fn atoms_ascii_table() {
        let mut table = StringTable::new();
        let atoms = Atoms::new(&mut table);
        assert_eq!(atoms.ascii.len(), ASCII_TABLE_SIZE);
        assert_eq!(table.resolve(atoms.ascii[b'e' as usize]), "e");
        assert_eq!(table.resolve(atoms.length), "length");
    }

    #[test]
    fn array_index_parsing() {
        assert_eq!(parse_array_index("0"), Some(0));
        assert_eq!(parse_array_index("42"), Some(42));
        assert_eq!(parse_array_index("01"), None);
        assert_eq!(parse_array_index(""), None);
        assert_eq!(parse_array_index("-1"), None);
        assert_eq!(parse_array_index("1e3"), None);
        assert_eq!(parse_array_index("4294967295"), None);
        assert_eq!(parse_array_index("4294967294"), Some(4294967294));
    }
}
