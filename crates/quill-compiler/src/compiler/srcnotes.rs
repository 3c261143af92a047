//! Source notes.
//!
//! Source notes annotate bytecode offsets with line/column changes and with
//! markers for structures the bytecode alone does not make obvious (loop
//! shapes, switch strategy, compound assignments). Each note stores its
//! offset as a delta from the previous note.
//!
//! Encoding of a note's first byte:
//!
//! ```text
//! 0kkkkddd   kind k (1..15), offset delta d (0..7)
//! 1ddddddd   extended delta d (0..127), no kind
//! ```
//!
//! Operands follow the first byte. An operand below `0x80` takes one byte;
//! anything larger takes four big-endian bytes with the top bit set.

/// Note kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SrcNoteKind {
    /// Next line; no operand
    NewLine = 1,
    /// Jump to an absolute line; operand: line
    SetLine = 2,
    /// Column change; operand: zigzag-encoded signed delta
    ColSpan = 3,
    /// `while` loop at this `goto`
    While = 4,
    /// `do-while` loop head
    DoWhile = 5,
    /// `for (;;)` loop at this `goto`
    For = 6,
    /// `for-in`/`for-of` loop at this `goto`
    ForIn = 7,
    /// Switch lowered to a `tableswitch`
    TableSwitch = 8,
    /// Switch lowered to `case` comparisons
    CondSwitch = 9,
    /// Compound assignment operator
    AssignOp = 10,
}

impl SrcNoteKind {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            1 => SrcNoteKind::NewLine,
            2 => SrcNoteKind::SetLine,
            3 => SrcNoteKind::ColSpan,
            4 => SrcNoteKind::While,
            5 => SrcNoteKind::DoWhile,
            6 => SrcNoteKind::For,
            7 => SrcNoteKind::ForIn,
            8 => SrcNoteKind::TableSwitch,
            9 => SrcNoteKind::CondSwitch,
            10 => SrcNoteKind::AssignOp,
            _ => return None,
        })
    }

    /// Number of operands.
    pub fn arity(self) -> usize {
        match self {
            SrcNoteKind::SetLine | SrcNoteKind::ColSpan => 1,
            _ => 0,
        }
    }
}

const DELTA_BITS: u32 = 3;
const DELTA_LIMIT: usize = 1 << DELTA_BITS;
const XDELTA_FLAG: u8 = 0x80;
const XDELTA_LIMIT: usize = 0x80;
const FOUR_BYTE_FLAG: u32 = 0x8000_0000;

/// Largest operand value a note can carry.
pub const MAX_OPERAND: u32 = FOUR_BYTE_FLAG - 1;

/// Appends notes to a buffer.
#[derive(Debug, Default)]
pub struct SrcNoteWriter {
    bytes: Vec<u8>,
    last_offset: usize,
}

impl SrcNoteWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a note at bytecode `offset`, which must not precede the last
    /// note's offset.
    pub fn add(&mut self, kind: SrcNoteKind, offset: usize, operands: &[u32]) {
        assert!(offset >= self.last_offset, "source notes out of order");
        assert_eq!(operands.len(), kind.arity(), "wrong operand count for {kind:?}");
        let mut delta = offset - self.last_offset;
        while delta >= DELTA_LIMIT {
            let step = delta.min(XDELTA_LIMIT - 1);
            self.bytes.push(XDELTA_FLAG | step as u8);
            delta -= step;
        }
        self.bytes.push(((kind as u8) << DELTA_BITS) | delta as u8);
        for &operand in operands {
            self.push_operand(operand);
        }
        self.last_offset = offset;
    }

    fn push_operand(&mut self, value: u32) {
        assert!(value <= MAX_OPERAND, "source note operand out of range");
        if value < 0x80 {
            self.bytes.push(value as u8);
        } else {
            self.bytes.extend((value | FOUR_BYTE_FLAG).to_be_bytes());
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if no note was written.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the encoded notes.
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// A decoded note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcNote {
    /// Note kind
    pub kind: SrcNoteKind,
    /// Absolute bytecode offset
    pub offset: usize,
    /// Operands, `kind.arity()` of them
    pub operands: Vec<u32>,
}

/// Decodes notes in order. Stops at the first malformed byte.
#[derive(Debug, Clone)]
pub struct SrcNoteIter<'a> {
    bytes: &'a [u8],
    pos: usize,
    offset: usize,
}

impl<'a> SrcNoteIter<'a> {
    /// Starts decoding `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            offset: 0,
        }
    }

    fn read_operand(&mut self) -> Option<u32> {
        let first = *self.bytes.get(self.pos)?;
        if first & 0x80 == 0 {
            self.pos += 1;
            return Some(first as u32);
        }
        let raw = self.bytes.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) & !FOUR_BYTE_FLAG)
    }
}

impl Iterator for SrcNoteIter<'_> {
    type Item = SrcNote;

    fn next(&mut self) -> Option<SrcNote> {
        loop {
            let byte = *self.bytes.get(self.pos)?;
            self.pos += 1;
            if byte & XDELTA_FLAG != 0 {
                self.offset += (byte & !XDELTA_FLAG) as usize;
                continue;
            }
            self.offset += (byte as usize) & (DELTA_LIMIT - 1);
            let kind = SrcNoteKind::from_bits(byte >> DELTA_BITS)?;
            let mut operands = Vec::with_capacity(kind.arity());
            for _ in 0..kind.arity() {
                operands.push(self.read_operand()?);
            }
            return Some(SrcNote {
                kind,
                offset: self.offset,
                operands,
            });
        }
    }
}

/// Encodes a signed column delta as an operand.
pub fn zigzag(delta: i64) -> u32 {
    ((delta << 1) ^ (delta >> 63)) as u32
}

/// Decodes a column delta operand.
pub fn unzigzag(value: u32) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// A row of the offset-to-position table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// First bytecode offset at this position
    pub offset: usize,
    /// Line
    pub line: u32,
    /// Column
    pub column: u32,
}

/// Replays the position notes, starting from the function's first
/// line/column. Returns one entry per position change.
pub fn line_table(notes: &[u8], line: u32, column: u32) -> Vec<LineEntry> {
    let mut table = vec![LineEntry {
        offset: 0,
        line,
        column,
    }];
    let (mut line, mut column) = (line, column as i64);
    for note in SrcNoteIter::new(notes) {
        match note.kind {
            SrcNoteKind::NewLine => {
                line += 1;
                column = 0;
            }
            SrcNoteKind::SetLine => {
                line = note.operands[0];
                column = 0;
            }
            SrcNoteKind::ColSpan => column += unzigzag(note.operands[0]),
            _ => continue,
        }
        let entry = LineEntry {
            offset: note.offset,
            line,
            column: column.max(0) as u32,
        };
        match table.last_mut() {
            Some(last) if last.offset == entry.offset => *last = entry,
            _ => table.push(entry),
        }
    }
    table
}

/// Line of the instruction at `offset`.
pub fn line_of(table: &[LineEntry], offset: usize) -> u32 {
    let index = table.partition_point(|e| e.offset <= offset);
    table[index.saturating_sub(1)].line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_and_extended_deltas() {
        let mut writer = SrcNoteWriter::new();
        writer.add(SrcNoteKind::NewLine, 3, &[]);
        writer.add(SrcNoteKind::While, 300, &[]);
        writer.add(SrcNoteKind::SetLine, 300, &[1000]);
        let bytes = writer.finish();

        let notes: Vec<SrcNote> = SrcNoteIter::new(&bytes).collect();
        assert_eq!(notes.len(), 3);
        assert_eq!((notes[0].kind, notes[0].offset), (SrcNoteKind::NewLine, 3));
        assert_eq!((notes[1].kind, notes[1].offset), (SrcNoteKind::While, 300));
        assert_eq!(notes[2].operands, vec![1000]);
    }

    #[test]
    fn test_operand_widths() {
        let mut writer = SrcNoteWriter::new();
        writer.add(SrcNoteKind::SetLine, 0, &[5]);
        let short = writer.len();
        writer.add(SrcNoteKind::SetLine, 0, &[MAX_OPERAND]);
        assert_eq!(short, 2);
        assert_eq!(writer.len(), short + 5);
        let bytes = writer.finish();
        let lines: Vec<u32> = SrcNoteIter::new(&bytes).map(|n| n.operands[0]).collect();
        assert_eq!(lines, vec![5, MAX_OPERAND]);
    }

    #[test]
    fn test_zigzag() {
        for delta in [0i64, 1, -1, 17, -200, 40_000] {
            assert_eq!(unzigzag(zigzag(delta)), delta);
        }
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
    }

    #[test]
    fn test_line_table() {
        let mut writer = SrcNoteWriter::new();
        writer.add(SrcNoteKind::ColSpan, 0, &[zigzag(4)]);
        writer.add(SrcNoteKind::NewLine, 6, &[]);
        writer.add(SrcNoteKind::For, 9, &[]);
        writer.add(SrcNoteKind::SetLine, 20, &[10]);
        let table = line_table(&writer.finish(), 1, 0);

        assert_eq!(
            table,
            vec![
                LineEntry { offset: 0, line: 1, column: 4 },
                LineEntry { offset: 6, line: 2, column: 0 },
                LineEntry { offset: 20, line: 10, column: 0 },
            ]
        );
        assert_eq!(line_of(&table, 0), 1);
        assert_eq!(line_of(&table, 12), 2);
        assert_eq!(line_of(&table, 25), 10);
    }
}
