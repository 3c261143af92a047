//! Static bytecode checks.
//!
//! [`verify`] walks every reachable instruction of a function, propagating
//! the operand stack depth along fallthrough edges, jump edges and
//! exception handler entries. It rejects code whose jumps land between
//! instructions, whose depths disagree where control paths meet, or whose
//! depth goes negative. Nested functions in the object pool are verified
//! too.

use thiserror::Error;

use super::bytecode::{CompiledFunction, PoolObject, TryKind};
use super::opcodes::{
    instruction_length, read_i32, read_u32, stack_defs, stack_uses, table_switch_targets, Format, Op,
};

/// A defect found in emitted code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("unknown opcode {byte:#04x} at offset {offset}")]
    UnknownOpcode { offset: usize, byte: u8 },

    #[error("instruction at offset {offset} runs past the end of the code")]
    Truncated { offset: usize },

    #[error("jump at offset {offset} targets {target}, which is not an instruction start")]
    BadJumpTarget { offset: usize, target: i64 },

    #[error("{pool} index {index} out of range at offset {offset}")]
    BadPoolIndex {
        offset: usize,
        pool: &'static str,
        index: u32,
    },

    #[error("stack depth {found} at offset {offset} disagrees with {expected} on another path")]
    DepthMismatch { offset: usize, expected: u32, found: u32 },

    #[error("stack underflow at offset {offset}")]
    Underflow { offset: usize },

    #[error("recorded max stack depth {recorded} is below the reachable depth {computed}")]
    MaxDepth { recorded: u32, computed: u32 },

    #[error("control falls off the end of the code")]
    FallsOffEnd,

    #[error("try note {index} covers a range outside the code")]
    BadTryNote { index: usize },

    #[error("block scope note {index} is malformed")]
    BadBlockNote { index: usize },

    #[error("in nested function {index}: {source}")]
    Nested {
        index: usize,
        #[source]
        source: Box<VerifyError>,
    },
}

/// Checks `function` and every function compiled with it.
pub fn verify(function: &CompiledFunction) -> Result<(), VerifyError> {
    let boundaries = decode(function)?;
    check_notes(function, &boundaries)?;
    walk(function, &boundaries)?;
    for (index, object) in function.objects.iter().enumerate() {
        if let PoolObject::Function(nested) = object {
            verify(nested).map_err(|source| VerifyError::Nested {
                index,
                source: Box::new(source),
            })?;
        }
    }
    Ok(())
}

/// Marks instruction starts and checks opcodes and pool operands.
fn decode(function: &CompiledFunction) -> Result<Vec<bool>, VerifyError> {
    let code = &function.code;
    let mut starts = vec![false; code.len() + 1];
    let mut offset = 0;
    while offset < code.len() {
        let byte = code[offset];
        let op = Op::from_byte(byte).ok_or(VerifyError::UnknownOpcode { offset, byte })?;
        let len = instruction_length(code, offset).ok_or(VerifyError::Truncated { offset })?;
        if offset + len > code.len() {
            return Err(VerifyError::Truncated { offset });
        }
        starts[offset] = true;
        let pool = match op.format() {
            Format::Atom => Some(("atom", function.atoms.len())),
            Format::Const => Some(("constant", function.consts.len())),
            Format::Object => Some(("object", function.objects.len())),
            _ => None,
        };
        if let Some((pool, len)) = pool {
            let index = read_u32(code, offset + 1);
            if index as usize >= len {
                return Err(VerifyError::BadPoolIndex { offset, pool, index });
            }
        }
        offset += len;
    }
    Ok(starts)
}

fn is_start(starts: &[bool], target: i64) -> bool {
    target >= 0 && (target as usize) < starts.len() - 1 && starts[target as usize]
}

fn check_notes(function: &CompiledFunction, starts: &[bool]) -> Result<(), VerifyError> {
    let len = function.code.len() as i64;
    for (index, note) in function.try_notes.iter().enumerate() {
        let start = note.start as i64;
        let end = start + note.length as i64;
        let handler_ok = note.kind == TryKind::Iter || is_start(starts, end);
        if !is_start(starts, start) || end > len || !handler_ok {
            return Err(VerifyError::BadTryNote { index });
        }
    }
    for (index, note) in function.block_notes.iter().enumerate() {
        let end = note.start as i64 + note.length as i64;
        let parent_ok = note.parent.is_none_or(|p| (p as usize) < index);
        let object_ok = matches!(function.objects.get(note.index as usize), Some(PoolObject::Block(_)));
        if end > len || !parent_ok || !object_ok {
            return Err(VerifyError::BadBlockNote { index });
        }
    }
    Ok(())
}

/// Jump targets of the instruction at `offset`, with the stack depth each
/// one is entered at given the depth after the instruction.
fn jump_targets(code: &[u8], offset: usize, op: Op, after: u32) -> Vec<(i64, u32)> {
    match op {
        Op::TableSwitch => table_switch_targets(code, offset)
            .into_iter()
            .map(|t| (t as i64, after))
            .collect(),
        // The comparison result and the discriminant are both gone on a match.
        Op::Case => vec![(offset as i64 + read_i32(code, offset + 1) as i64, after.saturating_sub(1))],
        _ if op.is_jump() => vec![(offset as i64 + read_i32(code, offset + 1) as i64, after)],
        _ => Vec::new(),
    }
}

fn walk(function: &CompiledFunction, starts: &[bool]) -> Result<(), VerifyError> {
    let code = &function.code;
    let mut depths: Vec<Option<u32>> = vec![None; code.len()];
    let mut pending: Vec<(usize, u32)> = Vec::new();
    let mut max = 0;

    if !code.is_empty() {
        pending.push((0, 0));
    }
    for note in &function.try_notes {
        if note.kind != TryKind::Iter {
            pending.push(((note.start + note.length) as usize, note.stack_depth));
        }
    }

    while let Some((offset, depth)) = pending.pop() {
        match depths[offset] {
            Some(known) if known == depth => continue,
            Some(known) => {
                return Err(VerifyError::DepthMismatch {
                    offset,
                    expected: known,
                    found: depth,
                });
            }
            None => depths[offset] = Some(depth),
        }
        let op = Op::from_byte(code[offset]).ok_or(VerifyError::UnknownOpcode {
            offset,
            byte: code[offset],
        })?;
        let uses = stack_uses(code, offset);
        let defs = stack_defs(code, offset);
        if depth < uses {
            return Err(VerifyError::Underflow { offset });
        }
        let after = depth - uses + defs;
        max = max.max(depth).max(after);

        if op == Op::Case && after == 0 {
            return Err(VerifyError::Underflow { offset });
        }
        for (target, entry) in jump_targets(code, offset, op, after) {
            if !is_start(starts, target) {
                return Err(VerifyError::BadJumpTarget { offset, target });
            }
            pending.push((target as usize, entry));
        }
        if op.falls_through() {
            let next = offset + instruction_length(code, offset).ok_or(VerifyError::Truncated { offset })?;
            if next >= code.len() {
                return Err(VerifyError::FallsOffEnd);
            }
            pending.push((next, after));
        }
    }

    // Code after an unconditional exit is never walked but still counts
    // toward the emitter's maximum.
    if max > function.max_stack_depth {
        return Err(VerifyError::MaxDepth {
            recorded: function.max_stack_depth,
            computed: max,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::TryNote;

    fn function(code: Vec<u8>, max_stack_depth: u32) -> CompiledFunction {
        CompiledFunction {
            code,
            max_stack_depth,
            ..Default::default()
        }
    }

    fn jump(op: Op, delta: i32) -> Vec<u8> {
        let mut bytes = vec![op as u8];
        bytes.extend(delta.to_be_bytes());
        bytes
    }

    #[test]
    fn test_accepts_balanced_branches() {
        // true ? 1 : 0
        let mut code = vec![Op::True as u8];
        code.extend(jump(Op::IfEq, 11));
        code.push(Op::One as u8);
        code.extend(jump(Op::Goto, 6));
        code.push(Op::Zero as u8);
        code.push(Op::Return as u8);
        assert_eq!(verify(&function(code, 1)), Ok(()));
    }

    #[test]
    fn test_rejects_unbalanced_join() {
        // true ? (1, 1) : 0
        let mut code = vec![Op::True as u8];
        code.extend(jump(Op::IfEq, 12));
        code.push(Op::One as u8);
        code.push(Op::One as u8);
        code.extend(jump(Op::Goto, 6));
        code.push(Op::Zero as u8);
        code.push(Op::Return as u8);
        assert!(matches!(
            verify(&function(code, 2)),
            Err(VerifyError::DepthMismatch { offset: 14, .. })
        ));
    }

    #[test]
    fn test_rejects_jump_into_instruction() {
        let mut code = jump(Op::Goto, 2);
        code.push(Op::RetRval as u8);
        assert!(matches!(
            verify(&function(code, 0)),
            Err(VerifyError::BadJumpTarget { offset: 0, target: 2 })
        ));
    }

    #[test]
    fn test_rejects_underflow_and_fall_off() {
        let code = vec![Op::Pop as u8, Op::RetRval as u8];
        assert_eq!(verify(&function(code, 0)), Err(VerifyError::Underflow { offset: 0 }));

        let code = vec![Op::Nop as u8];
        assert_eq!(verify(&function(code, 0)), Err(VerifyError::FallsOffEnd));
    }

    #[test]
    fn test_rejects_understated_max_depth() {
        let code = vec![Op::One as u8, Op::One as u8, Op::Pop as u8, Op::Return as u8];
        assert_eq!(
            verify(&function(code, 1)),
            Err(VerifyError::MaxDepth {
                recorded: 1,
                computed: 2
            })
        );
    }

    #[test]
    fn test_handler_entered_at_note_depth() {
        // try { } catch { } with the handler popping the exception
        let mut code = vec![Op::Try as u8];
        code.extend(jump(Op::Goto, 7));
        code.push(Op::Exception as u8);
        code.push(Op::Pop as u8);
        code.push(Op::RetRval as u8);
        let mut f = function(code, 1);
        f.try_notes.push(TryNote {
            kind: TryKind::Catch,
            stack_depth: 0,
            start: 1,
            length: 5,
        });
        assert_eq!(verify(&f), Ok(()));

        f.try_notes[0].length = 4;
        assert_eq!(verify(&f), Err(VerifyError::BadTryNote { index: 0 }));
    }

    #[test]
    fn test_pool_indices_checked() {
        let mut code = vec![Op::String as u8];
        code.extend(0u32.to_be_bytes());
        code.push(Op::Return as u8);
        assert!(matches!(
            verify(&function(code, 1)),
            Err(VerifyError::BadPoolIndex { pool: "atom", index: 0, .. })
        ));
    }
}
