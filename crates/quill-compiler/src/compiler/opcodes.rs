//! Opcode table.
//!
//! Every instruction is one opcode byte followed by a fixed operand layout
//! given by its [`Format`]. Multi-byte operands are big-endian. The only
//! variable-length instruction is `tableswitch`.
//!
//! `uses` and `defs` are the number of stack slots an instruction pops and
//! pushes. A value of `-1` means the count depends on the operand; see
//! [`stack_uses`] and [`stack_defs`].

/// Operand layout of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// No operand
    Byte,
    /// Signed 8-bit immediate
    Int8,
    /// Unsigned 8-bit immediate
    Uint8,
    /// Unsigned 16-bit immediate: counts and frame slots
    Uint16,
    /// Signed 32-bit immediate
    Int32,
    /// Unsigned 32-bit immediate: array indices
    Uint32,
    /// 32-bit index into the atom pool
    Atom,
    /// 32-bit index into the constant pool
    Const,
    /// 32-bit index into the object pool
    Object,
    /// Signed 32-bit offset, relative to the opcode byte
    Jump,
    /// 16-bit frame skip followed by a 16-bit slot
    Upvar,
    /// Default offset, low, high, then one offset per value in `low..=high`
    TableSwitch,
}

/// Static description of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    /// Mnemonic used by the disassembler
    pub name: &'static str,
    /// Instruction length in bytes, `-1` when variable
    pub length: i8,
    /// Operand layout
    pub format: Format,
    /// Stack slots popped
    pub uses: i8,
    /// Stack slots pushed
    pub defs: i8,
}

macro_rules! for_each_opcode {
    ($m:ident) => {
        $m! {
            // ==================== Constants ====================
            (Nop, "nop", 1, Byte, 0, 0),
            (Undefined, "undefined", 1, Byte, 0, 1),
            (Null, "null", 1, Byte, 0, 1),
            (True, "true", 1, Byte, 0, 1),
            (False, "false", 1, Byte, 0, 1),
            (Zero, "zero", 1, Byte, 0, 1),
            (One, "one", 1, Byte, 0, 1),
            (Int8, "int8", 2, Int8, 0, 1),
            (Uint16, "uint16", 3, Uint16, 0, 1),
            (Int32, "int32", 5, Int32, 0, 1),
            (Double, "double", 5, Const, 0, 1),
            (BigInt, "bigint", 5, Const, 0, 1),
            (String, "string", 5, Atom, 0, 1),
            (RegExp, "regexp", 5, Object, 0, 1),
            (This, "this", 1, Byte, 0, 1),
            (Callee, "callee", 1, Byte, 0, 1),
            (Arguments, "arguments", 1, Byte, 0, 1),

            // ==================== Stack ====================
            (Pop, "pop", 1, Byte, 1, 0),
            (PopN, "popn", 3, Uint16, -1, 0),
            (Dup, "dup", 1, Byte, 1, 2),
            (Dup2, "dup2", 1, Byte, 2, 4),
            (Swap, "swap", 1, Byte, 2, 2),
            (Pick, "pick", 2, Uint8, -1, -1),

            // ==================== Operators ====================
            (Add, "add", 1, Byte, 2, 1),
            (Sub, "sub", 1, Byte, 2, 1),
            (Mul, "mul", 1, Byte, 2, 1),
            (Div, "div", 1, Byte, 2, 1),
            (Mod, "mod", 1, Byte, 2, 1),
            (Pow, "pow", 1, Byte, 2, 1),
            (BitOr, "bitor", 1, Byte, 2, 1),
            (BitXor, "bitxor", 1, Byte, 2, 1),
            (BitAnd, "bitand", 1, Byte, 2, 1),
            (Lsh, "lsh", 1, Byte, 2, 1),
            (Rsh, "rsh", 1, Byte, 2, 1),
            (Ursh, "ursh", 1, Byte, 2, 1),
            (Eq, "eq", 1, Byte, 2, 1),
            (Ne, "ne", 1, Byte, 2, 1),
            (StrictEq, "stricteq", 1, Byte, 2, 1),
            (StrictNe, "strictne", 1, Byte, 2, 1),
            (Lt, "lt", 1, Byte, 2, 1),
            (Le, "le", 1, Byte, 2, 1),
            (Gt, "gt", 1, Byte, 2, 1),
            (Ge, "ge", 1, Byte, 2, 1),
            (In, "in", 1, Byte, 2, 1),
            (InstanceOf, "instanceof", 1, Byte, 2, 1),
            (Neg, "neg", 1, Byte, 1, 1),
            (Pos, "pos", 1, Byte, 1, 1),
            (Not, "not", 1, Byte, 1, 1),
            (BitNot, "bitnot", 1, Byte, 1, 1),
            (TypeOf, "typeof", 1, Byte, 1, 1),
            (Void, "void", 1, Byte, 1, 1),
            (ToNumeric, "tonumeric", 1, Byte, 1, 1),
            (ToString, "tostring", 1, Byte, 1, 1),
            (TypeOfName, "typeofname", 5, Atom, 0, 1),
            (DelName, "delname", 5, Atom, 0, 1),
            (DelProp, "delprop", 5, Atom, 1, 1),
            (DelElem, "delelem", 1, Byte, 2, 1),

            // ==================== Variables ====================
            (GetName, "getname", 5, Atom, 0, 1),
            (SetName, "setname", 5, Atom, 1, 1),
            (GetGName, "getgname", 5, Atom, 0, 1),
            (SetGName, "setgname", 5, Atom, 1, 1),
            (ThrowSetConst, "throwsetconst", 5, Atom, 1, 1),
            (GetArg, "getarg", 3, Uint16, 0, 1),
            (SetArg, "setarg", 3, Uint16, 1, 1),
            (GetLocal, "getlocal", 3, Uint16, 0, 1),
            (SetLocal, "setlocal", 3, Uint16, 1, 1),
            (GetUpvar, "getupvar", 5, Upvar, 0, 1),
            (SetUpvar, "setupvar", 5, Upvar, 1, 1),

            // ==================== Properties ====================
            (GetProp, "getprop", 5, Atom, 1, 1),
            (SetProp, "setprop", 5, Atom, 2, 1),
            (GetElem, "getelem", 1, Byte, 2, 1),
            (SetElem, "setelem", 1, Byte, 3, 1),
            (NewArray, "newarray", 5, Uint32, 0, 1),
            (InitElemArray, "initelemarray", 5, Uint32, 2, 1),
            (NewObject, "newobject", 1, Byte, 0, 1),
            (InitProp, "initprop", 5, Atom, 2, 1),
            (InitElem, "initelem", 1, Byte, 3, 1),
            (Rest, "rest", 3, Uint16, 1, 1),

            // ==================== Functions ====================
            (Lambda, "lambda", 5, Object, 0, 1),
            (Call, "call", 3, Uint16, -1, 1),
            (Eval, "eval", 3, Uint16, -1, 1),
            (New, "new", 3, Uint16, -1, 1),
            (Return, "return", 1, Byte, 1, 0),
            (RetRval, "retrval", 1, Byte, 0, 0),
            (SetRval, "setrval", 1, Byte, 1, 0),
            (Generator, "generator", 1, Byte, 0, 0),
            (Yield, "yield", 1, Byte, 1, 1),

            // ==================== Control flow ====================
            (Goto, "goto", 5, Jump, 0, 0),
            (IfEq, "ifeq", 5, Jump, 1, 0),
            (IfNe, "ifne", 5, Jump, 1, 0),
            (And, "and", 5, Jump, 1, 1),
            (Or, "or", 5, Jump, 1, 1),
            (Coalesce, "coalesce", 5, Jump, 1, 1),
            (LoopHead, "loophead", 1, Byte, 0, 0),
            (TableSwitch, "tableswitch", -1, TableSwitch, 1, 0),
            (CondSwitch, "condswitch", 1, Byte, 0, 0),
            (Case, "case", 5, Jump, 2, 1),
            (Default, "default", 5, Jump, 1, 0),

            // ==================== Exceptions ====================
            (Try, "try", 1, Byte, 0, 0),
            (Exception, "exception", 1, Byte, 0, 1),
            (Throw, "throw", 1, Byte, 1, 0),
            (Gosub, "gosub", 5, Jump, 0, 0),
            (Finally, "finally", 1, Byte, 0, 2),
            (Retsub, "retsub", 1, Byte, 2, 0),

            // ==================== Scopes ====================
            (EnterWith, "enterwith", 1, Byte, 1, 0),
            (LeaveWith, "leavewith", 1, Byte, 0, 0),
            (EnterBlock, "enterblock", 5, Object, 0, 0),
            (LeaveBlock, "leaveblock", 1, Byte, 0, 0),

            // ==================== Iteration ====================
            (Iter, "iter", 2, Uint8, 1, 1),
            (MoreIter, "moreiter", 1, Byte, 1, 2),
            (IsNoIter, "isnoiter", 1, Byte, 1, 2),
            (EndIter, "enditer", 1, Byte, 1, 0),

            (Debugger, "debugger", 1, Byte, 0, 0),
        }
    };
}

macro_rules! define_opcodes {
    ($(($variant:ident, $name:literal, $length:expr, $format:ident, $uses:expr, $defs:expr)),* $(,)?) => {
        /// Bytecode operations.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $($variant),*
        }

        static OP_INFO: &[OpInfo] = &[
            $(OpInfo {
                name: $name,
                length: $length,
                format: Format::$format,
                uses: $uses,
                defs: $defs,
            }),*
        ];

        static ALL_OPS: &[Op] = &[$(Op::$variant),*];
    };
}

for_each_opcode!(define_opcodes);

/// `iter` operand: enumerate property keys (`for-in`).
pub const ITER_KEYS: u8 = 0;
/// `iter` operand: use the iteration protocol (`for-of`, `yield*`).
pub const ITER_VALUES: u8 = 1;

impl Op {
    /// Decodes an opcode byte.
    pub fn from_byte(byte: u8) -> Option<Op> {
        ALL_OPS.get(byte as usize).copied()
    }

    /// Every opcode, in encoding order.
    pub fn all() -> &'static [Op] {
        ALL_OPS
    }

    /// Static description.
    pub fn info(self) -> &'static OpInfo {
        &OP_INFO[self as usize]
    }

    /// Mnemonic.
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Operand layout.
    pub fn format(self) -> Format {
        self.info().format
    }

    /// True for instructions with a single relative jump operand.
    pub fn is_jump(self) -> bool {
        self.format() == Format::Jump
    }

    /// True if control can continue with the next instruction.
    pub fn falls_through(self) -> bool {
        !matches!(
            self,
            Op::Goto
                | Op::Return
                | Op::RetRval
                | Op::Throw
                | Op::Retsub
                | Op::TableSwitch
                | Op::Default
        )
    }
}

/// Reads a big-endian `u16` at `at`.
pub fn read_u16(code: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([code[at], code[at + 1]])
}

/// Reads a big-endian `u32` at `at`.
pub fn read_u32(code: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}

/// Reads a big-endian `i32` at `at`.
pub fn read_i32(code: &[u8], at: usize) -> i32 {
    read_u32(code, at) as i32
}

/// Writes a big-endian `i32` at `at`.
pub fn write_i32(code: &mut [u8], at: usize, value: i32) {
    code[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

/// Length in bytes of the instruction at `offset`, or `None` if it runs
/// past the end of `code`.
pub fn instruction_length(code: &[u8], offset: usize) -> Option<usize> {
    let op = Op::from_byte(*code.get(offset)?)?;
    let length = match op.info().length {
        -1 => {
            // opcode, default, low, high, offsets
            if offset + 13 > code.len() {
                return None;
            }
            let low = read_i32(code, offset + 5) as i64;
            let high = read_i32(code, offset + 9) as i64;
            let count = usize::try_from(high - low + 1).ok()?;
            13 + 4 * count
        }
        n => n as usize,
    };
    (offset + length <= code.len()).then_some(length)
}

/// Stack slots popped by the instruction at `offset`.
pub fn stack_uses(code: &[u8], offset: usize) -> u32 {
    let op = Op::from_byte(code[offset]).expect("stack_uses on an invalid opcode");
    match op {
        Op::Call | Op::Eval => 2 + read_u16(code, offset + 1) as u32,
        Op::New => 1 + read_u16(code, offset + 1) as u32,
        Op::PopN => read_u16(code, offset + 1) as u32,
        Op::Pick => code[offset + 1] as u32 + 1,
        _ => op.info().uses as u32,
    }
}

/// Stack slots pushed by the instruction at `offset`.
pub fn stack_defs(code: &[u8], offset: usize) -> u32 {
    let op = Op::from_byte(code[offset]).expect("stack_defs on an invalid opcode");
    match op {
        Op::Pick => code[offset + 1] as u32 + 1,
        _ => op.info().defs as u32,
    }
}

/// Jump targets of a `tableswitch` at `offset`: the default first, then one
/// per case value.
pub fn table_switch_targets(code: &[u8], offset: usize) -> Vec<usize> {
    let default = offset as i64 + read_i32(code, offset + 1) as i64;
    let low = read_i32(code, offset + 5) as i64;
    let high = read_i32(code, offset + 9) as i64;
    let mut targets = vec![default as usize];
    for i in 0..=(high - low) as usize {
        let delta = read_i32(code, offset + 13 + 4 * i) as i64;
        targets.push((offset as i64 + delta) as usize);
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_table_is_consistent() {
        for (byte, op) in Op::all().iter().enumerate() {
            assert_eq!(Op::from_byte(byte as u8), Some(*op));
            let info = op.info();
            let operand_bytes = match info.format {
                Format::Byte => 0,
                Format::Int8 | Format::Uint8 => 1,
                Format::Uint16 => 2,
                Format::Int32
                | Format::Uint32
                | Format::Atom
                | Format::Const
                | Format::Object
                | Format::Jump
                | Format::Upvar => 4,
                Format::TableSwitch => continue,
            };
            assert_eq!(info.length as usize, 1 + operand_bytes, "{}", info.name);
        }
        assert!(Op::all().len() < 256);
        assert_eq!(Op::from_byte(Op::all().len() as u8), None);
    }

    #[test]
    fn test_variable_stack_effects() {
        let call = [Op::Call as u8, 0, 3];
        assert_eq!(stack_uses(&call, 0), 5);
        assert_eq!(stack_defs(&call, 0), 1);
        let new = [Op::New as u8, 0, 2];
        assert_eq!(stack_uses(&new, 0), 3);
        let pick = [Op::Pick as u8, 2];
        assert_eq!(stack_uses(&pick, 0), 3);
        assert_eq!(stack_defs(&pick, 0), 3);
    }

    #[test]
    fn test_table_switch_length() {
        let mut code = vec![Op::TableSwitch as u8];
        code.extend(20i32.to_be_bytes());
        code.extend(1i32.to_be_bytes());
        code.extend(3i32.to_be_bytes());
        for delta in [25i32, 26, 27] {
            code.extend(delta.to_be_bytes());
        }
        assert_eq!(instruction_length(&code, 0), Some(25));
        assert_eq!(table_switch_targets(&code, 0), vec![20, 25, 26, 27]);
        assert_eq!(instruction_length(&code[..20], 0), None);
    }
}
