use super::*;
use crate::compiler::bytecode::TryKind;
use crate::compiler::opcodes::{instruction_length, read_u32};
use crate::compiler::srcnotes::SrcNoteIter;
use crate::compiler::verify::verify;
use crate::error::ErrorKind;
use crate::parser::parse_script;
use pretty_assertions::assert_eq;

fn compile_with(source: &str, options: &CompileOptions) -> CompiledFunction {
    let parsed = parse_script(source, options).unwrap();
    let function = emit_script(&parsed, options).unwrap();
    verify(&function).unwrap();
    function
}

fn compile(source: &str) -> CompiledFunction {
    compile_with(source, &CompileOptions::default())
}

fn compile_err(source: &str) -> CompileError {
    let options = CompileOptions::default();
    let parsed = parse_script(source, &options).unwrap();
    emit_script(&parsed, &options).unwrap_err()
}

/// Opcodes of `function` in order, without operands.
fn ops(function: &CompiledFunction) -> Vec<Op> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < function.code.len() {
        out.push(Op::from_byte(function.code[offset]).unwrap());
        offset += instruction_length(&function.code, offset).unwrap();
    }
    out
}

/// Offsets of every instruction with opcode `op`.
fn offsets_of(function: &CompiledFunction, op: Op) -> Vec<usize> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < function.code.len() {
        if function.code[offset] == op as u8 {
            out.push(offset);
        }
        offset += instruction_length(&function.code, offset).unwrap();
    }
    out
}

fn jump_target(function: &CompiledFunction, at: usize) -> usize {
    (at as i64 + read_i32(&function.code, at + 1) as i64) as usize
}

fn note_kinds(function: &CompiledFunction) -> Vec<SrcNoteKind> {
    SrcNoteIter::new(&function.src_notes).map(|n| n.kind).collect()
}

fn nested(function: &CompiledFunction, index: usize) -> &CompiledFunction {
    function.functions().nth(index).unwrap()
}

#[test]
fn test_var_and_addition() {
    let f = compile("var x = 1; x + 2;");
    assert_eq!(
        ops(&f),
        vec![
            Op::One,
            Op::SetLocal,
            Op::Pop,
            Op::GetLocal,
            Op::Int8,
            Op::Add,
            Op::Pop,
            Op::RetRval
        ]
    );
    // setlocal 0 at offset 1, getlocal 0 at offset 5
    assert_eq!(&f.code[2..4], &[0, 0]);
    assert_eq!(&f.code[6..8], &[0, 0]);
    assert_eq!(f.max_stack_depth, 2);
    assert_eq!(f.bindings.vars.len(), 1);
    assert_eq!(f.bindings.vars[0].name, "x");
}

#[test]
fn test_keep_last_value() {
    let options = CompileOptions::default().with_keep_last_value(true);
    let f = compile_with("1; 2;", &options);
    assert_eq!(ops(&f), vec![Op::One, Op::SetRval, Op::Int8, Op::SetRval, Op::RetRval]);
}

#[test]
fn test_number_encodings() {
    let f = compile("0; -0; 1; -1; 200; 70000; 1.5;");
    let pushes: Vec<Op> = ops(&f).into_iter().filter(|op| *op != Op::Pop).collect();
    assert_eq!(
        pushes,
        vec![
            Op::Zero,
            Op::Double,
            Op::One,
            Op::Int8,
            Op::Uint16,
            Op::Int32,
            Op::Double,
            Op::RetRval
        ]
    );
    assert_eq!(f.consts.len(), 2);
    assert!(matches!(f.consts[0], Const::Number(z) if z == 0.0 && z.is_sign_negative()));
    assert_eq!(f.consts[1], Const::Number(1.5));
}

#[test]
fn test_globals_use_global_ops() {
    let f = compile("y = 1; y;");
    assert_eq!(
        ops(&f),
        vec![Op::One, Op::SetGName, Op::Pop, Op::GetGName, Op::Pop, Op::RetRval]
    );
    assert_eq!(f.atoms, vec!["y".to_string()]);
}

#[test]
fn test_with_forces_name_lookup() {
    let f = compile("var o; with (o) { p; }");
    assert_eq!(
        ops(&f),
        vec![
            Op::GetName,
            Op::EnterWith,
            Op::GetName,
            Op::Pop,
            Op::LeaveWith,
            Op::RetRval
        ]
    );
    assert!(f.flags.has_with && f.flags.heavyweight);
}

#[test]
fn test_if_else() {
    let f = compile("var a; if (a) a = 1; else a = 2;");
    assert_eq!(
        ops(&f),
        vec![
            Op::GetLocal,
            Op::IfEq,
            Op::One,
            Op::SetLocal,
            Op::Pop,
            Op::Goto,
            Op::Int8,
            Op::SetLocal,
            Op::Pop,
            Op::RetRval
        ]
    );
}

#[test]
fn test_conditional_expression_joins_at_one_value() {
    let f = compile("var a; a ? 1 : 2;");
    assert_eq!(f.max_stack_depth, 1);
}

#[test]
fn test_while_loop_shape() {
    let f = compile("var i = 0; while (i < 3) i++;");
    assert_eq!(
        ops(&f),
        vec![
            Op::Zero,
            Op::SetLocal,
            Op::Pop,
            Op::Goto,
            Op::LoopHead,
            Op::GetLocal,
            Op::ToNumeric,
            Op::Dup,
            Op::One,
            Op::Add,
            Op::SetLocal,
            Op::Pop,
            Op::Pop,
            Op::GetLocal,
            Op::Int8,
            Op::Lt,
            Op::IfNe,
            Op::RetRval
        ]
    );
    assert!(note_kinds(&f).contains(&SrcNoteKind::While));
    let ifne = offsets_of(&f, Op::IfNe)[0];
    let loophead = offsets_of(&f, Op::LoopHead)[0];
    assert_eq!(jump_target(&f, ifne), loophead);
}

#[test]
fn test_endless_for_with_break() {
    let f = compile("for (;;) { break; }");
    assert_eq!(ops(&f), vec![Op::LoopHead, Op::Goto, Op::Goto, Op::RetRval]);
    let gotos = offsets_of(&f, Op::Goto);
    assert_eq!(jump_target(&f, gotos[0]), f.code.len() - 1);
    assert_eq!(jump_target(&f, gotos[1]), 0);
    assert!(note_kinds(&f).contains(&SrcNoteKind::For));
}

#[test]
fn test_labeled_continue_through_inner_loop() {
    let f = compile("outer: for (var i = 0; i < 2; i++) { for (;;) { continue outer; } }");
    assert_eq!(offsets_of(&f, Op::LoopHead).len(), 2);
}

#[test]
fn test_break_out_of_for_in_closes_iterator() {
    let f = compile("var o; outer: while (1) { for (var k in o) { break outer; } }");
    assert_eq!(offsets_of(&f, Op::EndIter).len(), 2);
}

#[test]
fn test_for_in_shape_and_iter_note() {
    let f = compile("var o, k; for (k in o) {}");
    assert_eq!(
        ops(&f),
        vec![
            Op::GetLocal,
            Op::Iter,
            Op::Goto,
            Op::LoopHead,
            Op::SetLocal,
            Op::Pop,
            Op::MoreIter,
            Op::IsNoIter,
            Op::IfEq,
            Op::Pop,
            Op::EndIter,
            Op::RetRval
        ]
    );
    assert_eq!(f.try_notes.len(), 1);
    assert_eq!(f.try_notes[0].kind, TryKind::Iter);
    assert_eq!(f.try_notes[0].stack_depth, 1);
    assert!(note_kinds(&f).contains(&SrcNoteKind::ForIn));
}

#[test]
fn test_logical_chain_jumps_to_one_end() {
    let f = compile("var a, b, c; a && b && c;");
    assert_eq!(
        ops(&f),
        vec![
            Op::GetLocal,
            Op::And,
            Op::Pop,
            Op::GetLocal,
            Op::And,
            Op::Pop,
            Op::GetLocal,
            Op::Pop,
            Op::RetRval
        ]
    );
    let ands = offsets_of(&f, Op::And);
    let end = offsets_of(&f, Op::Pop)[2];
    assert_eq!(jump_target(&f, ands[0]), end);
    assert_eq!(jump_target(&f, ands[1]), end);
}

#[test]
fn test_long_operator_chain_emits_without_recursion() {
    let mut source = String::from("a");
    for _ in 0..5000 {
        source.push_str(" + a");
    }
    source.push(';');
    let f = compile(&source);
    assert_eq!(offsets_of(&f, Op::Add).len(), 5000);
    assert_eq!(f.max_stack_depth, 2);
}

#[test]
fn test_closure_reads_upvar() {
    let f = compile("function f() { var x = 1; return function () { return x; }; }");
    let outer = nested(&f, 0);
    let inner = nested(outer, 0);
    assert_eq!(ops(inner), vec![Op::GetUpvar, Op::Return, Op::RetRval]);
    assert_eq!(&inner.code[1..5], &[0, 1, 0, 0]);
    assert!(outer.bindings.vars[0].closed_over);
    assert_eq!(f.function_count(), 3);
}

#[test]
fn test_function_declarations_are_hoisted() {
    let f = compile("f(); function f() {}");
    assert_eq!(
        ops(&f),
        vec![
            Op::Lambda,
            Op::SetLocal,
            Op::Pop,
            Op::GetLocal,
            Op::Undefined,
            Op::Call,
            Op::Pop,
            Op::RetRval
        ]
    );
}

#[test]
fn test_method_call_passes_receiver() {
    let f = compile("o.m(1);");
    assert_eq!(
        ops(&f),
        vec![
            Op::GetGName,
            Op::Dup,
            Op::GetProp,
            Op::Swap,
            Op::One,
            Op::Call,
            Op::Pop,
            Op::RetRval
        ]
    );
}

#[test]
fn test_postfix_member_update() {
    let f = compile("o.p++;");
    assert_eq!(
        ops(&f),
        vec![
            Op::GetGName,
            Op::Dup,
            Op::GetProp,
            Op::ToNumeric,
            Op::Dup,
            Op::Pick,
            Op::Swap,
            Op::One,
            Op::Add,
            Op::SetProp,
            Op::Pop,
            Op::Pop,
            Op::RetRval
        ]
    );
}

#[test]
fn test_compound_assignment_note() {
    let f = compile("var a = 1; a[0] += 2; a.b -= 1;");
    let assign_ops = note_kinds(&f).iter().filter(|k| **k == SrcNoteKind::AssignOp).count();
    assert_eq!(assign_ops, 2);
}

#[test]
fn test_template_literal() {
    let f = compile("`a${x}b`;");
    assert_eq!(
        ops(&f),
        vec![
            Op::String,
            Op::GetGName,
            Op::ToString,
            Op::Add,
            Op::String,
            Op::Add,
            Op::Pop,
            Op::RetRval
        ]
    );
}

#[test]
fn test_typeof_and_delete_of_names() {
    let f = compile("var v; typeof g; typeof v; delete g; delete v;");
    let ops = ops(&f);
    assert!(ops.contains(&Op::TypeOfName));
    assert!(ops.contains(&Op::TypeOf));
    assert!(ops.contains(&Op::DelName));
    assert!(ops.contains(&Op::False));
}

#[test]
fn test_array_destructuring_declaration() {
    let f = compile("var [a, b = 2] = c;");
    assert_eq!(
        ops(&f),
        vec![
            Op::GetGName,
            Op::Dup,
            Op::Zero,
            Op::GetElem,
            Op::SetLocal,
            Op::Pop,
            Op::Dup,
            Op::One,
            Op::GetElem,
            Op::Dup,
            Op::Undefined,
            Op::StrictEq,
            Op::IfEq,
            Op::Pop,
            Op::Int8,
            Op::SetLocal,
            Op::Pop,
            Op::Pop,
            Op::RetRval
        ]
    );
}

#[test]
fn test_object_destructuring_assignment_keeps_value() {
    let f = compile("var a, b; ({ a, b: [b] } = o);");
    assert_eq!(ops(&f).last(), Some(&Op::RetRval));
    assert_eq!(offsets_of(&f, Op::GetProp).len(), 2);
}

#[test]
fn test_let_in_block_gets_scope() {
    let f = compile("{ let x = 1; x; }");
    assert_eq!(
        ops(&f),
        vec![
            Op::EnterBlock,
            Op::One,
            Op::SetLocal,
            Op::Pop,
            Op::GetLocal,
            Op::Pop,
            Op::LeaveBlock,
            Op::RetRval
        ]
    );
    assert_eq!(f.block_notes.len(), 1);
    assert_eq!(f.block_notes[0].parent, None);
    assert!(matches!(
        &f.objects[0],
        PoolObject::Block(block) if block.bindings == vec![("x".to_string(), 0)]
    ));
    assert_eq!(f.bindings.blocks.len(), 1);
}

#[test]
fn test_nested_blocks_link_parents() {
    let f = compile("{ let a; { let b; } }");
    assert_eq!(f.block_notes.len(), 2);
    assert_eq!(f.block_notes[1].parent, Some(0));
}

#[test]
fn test_assignment_to_const_throws() {
    let f = compile("const c = 1; c = 2;");
    assert_eq!(
        ops(&f),
        vec![
            Op::One,
            Op::SetLocal,
            Op::Pop,
            Op::Int8,
            Op::ThrowSetConst,
            Op::Pop,
            Op::RetRval
        ]
    );
}

#[test]
fn test_dense_switch_uses_table() {
    let f = compile("var x; switch (x) { case 1: x; break; case 2: case 3: break; default: }");
    assert!(ops(&f).contains(&Op::TableSwitch));
    assert!(note_kinds(&f).contains(&SrcNoteKind::TableSwitch));
}

#[test]
fn test_non_integer_switch_uses_case_chain() {
    let f = compile("switch (x) { case \"a\": break; case 1: }");
    assert_eq!(
        ops(&f),
        vec![
            Op::GetGName,
            Op::CondSwitch,
            Op::String,
            Op::Case,
            Op::One,
            Op::Case,
            Op::Default,
            Op::Goto,
            Op::RetRval
        ]
    );
}

#[test]
fn test_sparse_switch_uses_case_chain() {
    let f = compile("switch (x) { case 1: break; case 1000: break; }");
    assert!(ops(&f).contains(&Op::CondSwitch));
    assert!(note_kinds(&f).contains(&SrcNoteKind::CondSwitch));
}

#[test]
fn test_switch_table_threshold_is_configurable() {
    let options = CompileOptions {
        switch_table_density: 1000,
        ..CompileOptions::default()
    };
    let f = compile_with("switch (x) { case 1: break; case 1000: break; }", &options);
    assert!(ops(&f).contains(&Op::TableSwitch));
}

/// Name of the global the case body at `target` calls first.
fn body_callee(f: &CompiledFunction, target: usize) -> &str {
    assert_eq!(Op::from_byte(f.code[target]), Some(Op::GetGName));
    &f.atoms[read_u32(&f.code, target + 1) as usize]
}

/// Where a `tableswitch` sends `value`.
fn table_switch_target(f: &CompiledFunction, value: i32) -> usize {
    let at = offsets_of(f, Op::TableSwitch)[0];
    let low = read_i32(&f.code, at + 5);
    let high = read_i32(&f.code, at + 9);
    let delta = if (low..=high).contains(&value) {
        read_i32(&f.code, at + 13 + 4 * (value - low) as usize)
    } else {
        read_i32(&f.code, at + 1)
    };
    (at as i64 + delta as i64) as usize
}

/// Where a `condswitch` case chain sends `value`.
fn case_chain_target(f: &CompiledFunction, value: i32) -> usize {
    let mut offset = offsets_of(f, Op::CondSwitch)[0] + 1;
    let mut label = None;
    loop {
        match Op::from_byte(f.code[offset]).unwrap() {
            Op::Zero => label = Some(0),
            Op::One => label = Some(1),
            Op::Int8 => label = Some(f.code[offset + 1] as i8 as i32),
            Op::Case if label == Some(value) => return jump_target(f, offset),
            Op::Case => label = None,
            Op::Default => return jump_target(f, offset),
            op => panic!("unexpected {op:?} in case chain"),
        }
        offset += instruction_length(&f.code, offset).unwrap();
    }
}

#[test]
fn test_switch_forms_select_the_same_case() {
    let source = "switch (x) { case 1: a(); break; default: d(); case 2: b(); break; case 4: c(); }";
    let table = compile(source);
    let chain = compile_with(
        source,
        &CompileOptions {
            switch_table_density: 0,
            ..CompileOptions::default()
        },
    );
    assert!(ops(&table).contains(&Op::TableSwitch));
    assert!(ops(&chain).contains(&Op::CondSwitch));

    for value in 0..=5 {
        let expected = match value {
            1 => "a",
            2 => "b",
            4 => "c",
            _ => "d",
        };
        assert_eq!(body_callee(&table, table_switch_target(&table, value)), expected, "value {value}");
        assert_eq!(body_callee(&chain, case_chain_target(&chain, value)), expected, "value {value}");
    }
}

#[test]
fn test_try_catch_finally_tables() {
    let f = compile("try { f(); } catch (e) { g(e); } finally { h(); }");
    let kinds: Vec<TryKind> = f.try_notes.iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![TryKind::Catch, TryKind::Finally]);
    let ops = ops(&f);
    assert!(ops.contains(&Op::Exception));
    assert!(ops.contains(&Op::Finally));
    assert!(ops.contains(&Op::Retsub));
    assert_eq!(ops.iter().filter(|op| **op == Op::Gosub).count(), 2);

    let finally = offsets_of(&f, Op::Finally)[0];
    let note = f.try_notes[1];
    assert_eq!((note.start + note.length) as usize, finally);
    for gosub in offsets_of(&f, Op::Gosub) {
        assert_eq!(jump_target(&f, gosub), finally);
    }
}

#[test]
fn test_return_through_finally() {
    let f = compile("function f() { try { return 1; } finally { g(); } }");
    let ops = ops(nested(&f, 0));
    let set_rval = ops.iter().position(|op| *op == Op::SetRval).unwrap();
    assert_eq!(&ops[set_rval..set_rval + 3], &[Op::SetRval, Op::Gosub, Op::RetRval]);
}

#[test]
fn test_generator_and_yield_star() {
    let f = compile("function* g() { yield 1; yield* h(); }");
    let g = nested(&f, 0);
    assert!(g.flags.generator);
    let ops = ops(g);
    assert_eq!(ops[0], Op::Generator);
    assert!(ops.contains(&Op::Yield));
    assert!(ops.contains(&Op::EndIter));
    assert_eq!(g.try_notes.len(), 1);
    assert_eq!(g.try_notes[0].kind, TryKind::Catch);
    assert_eq!(g.try_notes[0].stack_depth, 2);
}

#[test]
fn test_default_and_rest_parameters() {
    let f = compile("function f(a = 1, ...r) { return r; }");
    let ops = ops(nested(&f, 0));
    assert!(ops.starts_with(&[Op::GetArg, Op::Undefined, Op::StrictEq, Op::IfEq, Op::One, Op::SetArg, Op::Pop]));
    assert!(ops.contains(&Op::Rest));
}

#[test]
fn test_lazy_functions_become_stubs() {
    let options = CompileOptions::default().with_lazy_functions(true);
    let f = compile_with("function f(a) { return a + 1; }", &options);
    assert_eq!(f.functions().count(), 0);
    let lazy: Vec<&LazyFunction> = f.lazy_functions().collect();
    assert_eq!(lazy.len(), 1);
    assert_eq!(lazy[0].name.as_deref(), Some("f"));
}

#[test]
fn test_line_notes_track_statements() {
    let f = compile("1;\n2;\n\n\n\n\n3;");
    let kinds = note_kinds(&f);
    assert!(kinds.contains(&SrcNoteKind::NewLine));
    assert!(kinds.contains(&SrcNoteKind::SetLine));
}

#[test]
fn test_too_many_arguments_is_a_limit_error() {
    let mut source = String::from("f(");
    for _ in 0..70_000 {
        source.push_str("0,");
    }
    source.push_str("0);");
    let err = compile_err(&source);
    assert_eq!(err.kind, ErrorKind::Limit);
    assert!(err.message.contains("arguments"));
}

#[test]
fn test_deep_call_chain_is_a_limit_error() {
    let source = format!("f{};", "()".repeat(200_000));
    let err = compile_err(&source);
    assert_eq!(err.kind, ErrorKind::Limit);
    assert!(err.message.contains("nesting"));
}
