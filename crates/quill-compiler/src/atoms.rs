//! Interned strings.
//!
//! Every identifier, property name and string literal in a compilation unit
//! is interned once. Bytecode refers to atoms by index into the unit's table.

use rustc_hash::FxHashMap;

/// Index of an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(u32);

impl Atom {
    /// The empty string.
    pub const EMPTY: Atom = Atom(0);
    /// `arguments`
    pub const ARGUMENTS: Atom = Atom(1);
    /// `eval`
    pub const EVAL: Atom = Atom(2);
    /// `next`, used by `yield*` lowering
    pub const NEXT: Atom = Atom(3);
    /// `throw`, used by `yield*` lowering
    pub const THROW: Atom = Atom(4);
    /// `done`
    pub const DONE: Atom = Atom(5);
    /// `value`
    pub const VALUE: Atom = Atom(6);

    /// Raw table index.
    pub fn index(self) -> u32 {
        self.0
    }
}

const PREDEFINED: [&str; 7] = ["", "arguments", "eval", "next", "throw", "done", "value"];

/// The intern table for one compilation unit.
#[derive(Debug, Clone)]
pub struct AtomTable {
    strings: Vec<Box<str>>,
    map: FxHashMap<Box<str>, Atom>,
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomTable {
    /// Creates a table holding the predefined atoms.
    pub fn new() -> Self {
        let mut table = Self {
            strings: Vec::new(),
            map: FxHashMap::default(),
        };
        for name in PREDEFINED {
            table.intern(name);
        }
        table
    }

    /// Interns `s`, returning its existing atom if already present.
    pub fn intern(&mut self, s: &str) -> Atom {
        if let Some(&atom) = self.map.get(s) {
            return atom;
        }
        let atom = Atom(self.strings.len() as u32);
        self.strings.push(s.into());
        self.map.insert(s.into(), atom);
        atom
    }

    /// Looks up `s` without interning it.
    pub fn lookup(&self, s: &str) -> Option<Atom> {
        self.map.get(s).copied()
    }

    /// Returns the text of an atom.
    pub fn get(&self, atom: Atom) -> &str {
        &self.strings[atom.0 as usize]
    }

    /// Number of interned strings.
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True if only the predefined atoms are present.
    pub fn is_empty(&self) -> bool {
        self.strings.len() <= PREDEFINED.len()
    }

    /// Iterates over `(atom, text)` in interning order.
    pub fn iter(&self) -> impl Iterator<Item = (Atom, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (Atom(i as u32), &**s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predefined_atoms() {
        let table = AtomTable::new();
        assert_eq!(table.get(Atom::ARGUMENTS), "arguments");
        assert_eq!(table.get(Atom::EVAL), "eval");
        assert_eq!(table.lookup("value"), Some(Atom::VALUE));
        assert!(table.is_empty());
    }

    #[test]
    fn test_intern_is_idempotent() {
        let mut table = AtomTable::new();
        let a = table.intern("foo");
        let b = table.intern("foo");
        assert_eq!(a, b);
        assert_ne!(a, table.intern("bar"));
        assert_eq!(table.get(a), "foo");
        assert_eq!(table.intern("eval"), Atom::EVAL);
    }

    #[test]
    fn test_iter_order() {
        let mut table = AtomTable::new();
        table.intern("x");
        let last = table.iter().last().map(|(_, s)| s.to_string());
        assert_eq!(last.as_deref(), Some("x"));
    }
}
