//! Human-readable bytecode listings.
//!
//! The layout follows the SpiderMonkey shell's `dis()` output: one line per
//! instruction with its offset, source line and structural source note,
//! followed by the exception and block scope tables. Nested functions are
//! listed after their parent.

use std::fmt::Write;

use rustc_hash::FxHashMap;

use super::bytecode::{CompiledFunction, Const, PoolObject, TryKind};
use super::opcodes::{
    instruction_length, read_i32, read_u16, read_u32, table_switch_targets, Format, Op,
};
use super::srcnotes::{line_of, line_table, SrcNoteIter, SrcNoteKind};

/// Renders `function` and every function compiled with it.
pub fn disassemble(function: &CompiledFunction) -> String {
    let mut out = String::new();
    disassemble_into(&mut out, function, false);
    out
}

fn disassemble_into(out: &mut String, function: &CompiledFunction, nested: bool) {
    let title = match (&function.name, nested) {
        (_, false) => "main".to_string(),
        (Some(name), true) => format!("function {name}"),
        (None, true) => "function <anonymous>".to_string(),
    };
    let _ = writeln!(out, "{title}:");
    let _ = writeln!(
        out,
        "flags: {}  max stack: {}  args: {}  locals: {}",
        flag_list(function),
        function.max_stack_depth,
        function.bindings.args.len(),
        function.bindings.nfixed()
    );
    let _ = writeln!(out, "loc     line  sn        op");
    let _ = writeln!(out, "-----   ----  --        --");

    let lines = line_table(&function.src_notes, function.line, function.column);
    let markers: FxHashMap<usize, SrcNoteKind> = SrcNoteIter::new(&function.src_notes)
        .filter(|n| !matches!(n.kind, SrcNoteKind::NewLine | SrcNoteKind::SetLine | SrcNoteKind::ColSpan))
        .map(|n| (n.offset, n.kind))
        .collect();

    let code = &function.code;
    let mut offset = 0;
    while offset < code.len() {
        let Some(op) = Op::from_byte(code[offset]) else {
            let _ = writeln!(out, "{offset:05}:  <bad opcode {:#04x}>", code[offset]);
            break;
        };
        let Some(len) = instruction_length(code, offset) else {
            let _ = writeln!(out, "{offset:05}:  <truncated {}>", op.name());
            break;
        };
        let note = markers.get(&offset).map_or("", |k| note_name(*k));
        let _ = write!(
            out,
            "{offset:05}:  {:<4}  {note:<8}  {}",
            line_of(&lines, offset),
            op.name()
        );
        write_operand(out, function, op, offset);
        out.push('\n');
        offset += len;
    }

    if !function.try_notes.is_empty() {
        let _ = writeln!(out, "\nexception table:");
        let _ = writeln!(out, "kind      stack    start      end");
        for note in &function.try_notes {
            let kind = match note.kind {
                TryKind::Catch => "catch",
                TryKind::Finally => "finally",
                TryKind::Iter => "iter",
            };
            let _ = writeln!(
                out,
                " {kind:<8} {:>5} {:>8} {:>8}",
                note.stack_depth,
                note.start,
                note.start + note.length
            );
        }
    }

    if !function.block_notes.is_empty() {
        let _ = writeln!(out, "\nblock scopes:");
        let _ = writeln!(out, "index   start      end   parent");
        for note in &function.block_notes {
            let parent = note.parent.map_or_else(|| "-".to_string(), |p| p.to_string());
            let _ = writeln!(
                out,
                " {:>5} {:>7} {:>8} {parent:>8}",
                note.index,
                note.start,
                note.start + note.length
            );
        }
    }

    for nested in function.functions() {
        out.push('\n');
        disassemble_into(out, nested, true);
    }
}

fn flag_list(function: &CompiledFunction) -> String {
    let flags = function.flags;
    let names = [
        (flags.strict, "strict"),
        (flags.generator, "generator"),
        (flags.arrow, "arrow"),
        (flags.uses_arguments, "arguments"),
        (flags.uses_this, "this"),
        (flags.has_direct_eval, "eval"),
        (flags.has_with, "with"),
        (flags.heavyweight, "heavyweight"),
    ];
    let set: Vec<&str> = names.iter().filter(|(on, _)| *on).map(|(_, name)| *name).collect();
    if set.is_empty() { "-".to_string() } else { set.join(",") }
}

fn note_name(kind: SrcNoteKind) -> &'static str {
    match kind {
        SrcNoteKind::While => "while",
        SrcNoteKind::DoWhile => "do-while",
        SrcNoteKind::For => "for",
        SrcNoteKind::ForIn => "for-in",
        SrcNoteKind::TableSwitch => "table",
        SrcNoteKind::CondSwitch => "cond",
        SrcNoteKind::AssignOp => "assignop",
        SrcNoteKind::NewLine | SrcNoteKind::SetLine | SrcNoteKind::ColSpan => "",
    }
}

fn write_operand(out: &mut String, function: &CompiledFunction, op: Op, offset: usize) {
    let code = &function.code;
    let at = offset + 1;
    let _ = match op.format() {
        Format::Byte => Ok(()),
        Format::Int8 => write!(out, " {}", code[at] as i8),
        Format::Uint8 => write!(out, " {}", code[at]),
        Format::Uint16 => write!(out, " {}", read_u16(code, at)),
        Format::Int32 => write!(out, " {}", read_i32(code, at)),
        Format::Uint32 => write!(out, " {}", read_u32(code, at)),
        Format::Atom => {
            let index = read_u32(code, at) as usize;
            match function.atoms.get(index) {
                Some(atom) => write!(out, " {atom:?}"),
                None => write!(out, " <atom {index}>"),
            }
        }
        Format::Const => {
            let index = read_u32(code, at) as usize;
            match function.consts.get(index) {
                Some(Const::Number(value)) => write!(out, " {value}"),
                Some(Const::BigInt(value)) => write!(out, " {value}n"),
                None => write!(out, " <const {index}>"),
            }
        }
        Format::Object => {
            let index = read_u32(code, at) as usize;
            write!(out, " {}", describe_object(function.objects.get(index), index))
        }
        Format::Jump => {
            let delta = read_i32(code, at);
            write!(out, " {:05} ({delta:+})", offset as i64 + delta as i64)
        }
        Format::Upvar => write!(out, " {}, {}", read_u16(code, at), read_u16(code, at + 2)),
        Format::TableSwitch => {
            let targets = table_switch_targets(code, offset);
            let low = read_i32(code, offset + 5);
            let _ = write!(out, " defaults to {:05}", targets[0]);
            for (i, target) in targets[1..].iter().enumerate() {
                let _ = write!(out, "\n{:<25}{}: {target:05}", "", low as i64 + i as i64);
            }
            Ok(())
        }
    };
}

fn describe_object(object: Option<&PoolObject>, index: usize) -> String {
    match object {
        Some(PoolObject::Function(f)) => format!("function {}", f.name.as_deref().unwrap_or("<anonymous>")),
        Some(PoolObject::LazyFunction(f)) => {
            format!("lazy function {}", f.name.as_deref().unwrap_or("<anonymous>"))
        }
        Some(PoolObject::RegExp { pattern, flags }) => format!("/{pattern}/{flags}"),
        Some(PoolObject::Block(block)) => {
            let names: Vec<&str> = block.bindings.iter().map(|(name, _)| name.as_str()).collect();
            format!("block {{{}}}", names.join(", "))
        }
        None => format!("<object {index}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_shows_operands_and_tables() {
        let mut code = vec![Op::String as u8];
        code.extend(0u32.to_be_bytes());
        code.push(Op::Int8 as u8);
        code.push((-3i8) as u8);
        code.push(Op::Goto as u8);
        code.extend(5i32.to_be_bytes());
        code.push(Op::RetRval as u8);
        let function = CompiledFunction {
            code,
            atoms: vec!["x".to_string()],
            max_stack_depth: 2,
            line: 1,
            ..Default::default()
        };
        let text = disassemble(&function);
        assert!(text.starts_with("main:\n"));
        assert!(text.contains("00000:  1               string \"x\""));
        assert!(text.contains("int8 -3"));
        assert!(text.contains("goto 00012 (+5)"));
        assert!(!text.contains("exception table"));
    }

    #[test]
    fn test_unknown_pool_entries_are_marked() {
        let mut code = vec![Op::Lambda as u8];
        code.extend(7u32.to_be_bytes());
        let function = CompiledFunction {
            code,
            ..Default::default()
        };
        assert!(disassemble(&function).contains("lambda <object 7>"));
    }
}
