//! End-to-end compilation scenarios through the public API.

use pretty_assertions::assert_eq;
use quill_compiler::compiler::opcodes::instruction_length;
use quill_compiler::{
    check_syntax, compile_lazy_function, compile_script, compile_scripts, disassemble, verify, CompileOptions,
    CompiledFunction, ErrorKind, Op,
};

fn ops(function: &CompiledFunction) -> Vec<Op> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < function.code.len() {
        out.push(Op::from_byte(function.code[offset]).unwrap());
        offset += instruction_length(&function.code, offset).unwrap();
    }
    out
}

fn compile(source: &str) -> CompiledFunction {
    let script = compile_script(source, &CompileOptions::default()).unwrap();
    verify(&script.main).unwrap();
    script.main
}

#[test]
fn test_simple_script() {
    let main = compile("var x = 1; x + 2;");
    assert_eq!(
        ops(&main),
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
    assert_eq!(main.code[9], 2);
}

#[test]
fn test_every_sample_verifies() {
    let samples = [
        "var a = [1, , 3], o = { p: a, 'q': 2, [a]: 3, 4: 5 };",
        "function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); } fib(10);",
        "for (var i = 0; i < 10; i++) { if (i % 2) continue; else if (i > 7) break; }",
        "do { x--; } while (x > 0);",
        "lbl: { break lbl; }",
        "try { throw new Error('e'); } catch ({ message }) { message; } finally { 0; }",
        "switch (k) { case 0: case 1: a; break; default: b; case 3: c; }",
        "var s = `${a}-${b}`;",
        "x ?? y; x || z && w; x += 1;",
        "var f = (a, b = a) => a + b;",
        "function* g() { var x = yield; yield* [x]; }",
        "(function () { 'use strict'; return this; })();",
        "for (var [k, v] of pairs) { k + v; }",
        "var r = /ab+c/gi.test(s);",
        "void 0, typeof x, !y, ~z, -w, +v;",
        "a = b = c = d;",
        "o.p.q.r = o['s'][t];",
        "new Foo(1, rest);",
        "with (o) { p = 1; }",
        "eval('x'); x;",
        "{ let a = 1; { const b = a; } }",
        "var big = 12345678901234567890n;",
    ];
    for source in samples {
        let script = compile_script(source, &CompileOptions::default())
            .unwrap_or_else(|e| panic!("{source}: {e}"));
        verify(&script.main).unwrap_or_else(|e| panic!("{source}: {e}"));
    }
}

#[test]
fn test_errors_carry_kind_and_position() {
    let err = compile_script("var x = ;", &CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Syntax);
    assert_eq!(err.pos.line, 1);

    let strict = CompileOptions::default().with_strict(true);
    let err = compile_script("with (o) {}", &strict).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Semantic);

    let err = compile_script("function f(a, a) { 'use strict'; }", &CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Semantic);
}

#[test]
fn test_sloppy_duplicates_warn() {
    let script = compile_script("function f(a, a) { return a; }", &CompileOptions::default()).unwrap();
    assert_eq!(script.warnings.len(), 1);
    assert!(script.warnings[0].message.contains('a'));
}

#[test]
fn test_binding_report() {
    let script = compile_script(
        "var a; function f(b) { return a + b + c; }",
        &CompileOptions::default(),
    )
    .unwrap();
    let kind_of = |name: &str| {
        script
            .bindings
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.kind.clone())
            .unwrap()
    };
    assert_eq!(kind_of("a"), "var");
    assert_eq!(kind_of("b"), "argument");
    assert_eq!(kind_of("c"), "global");
    let c = script.bindings.iter().find(|b| b.name == "c").unwrap();
    assert!(c.decl.is_none());
}

#[test]
fn test_syntax_only_check() {
    let options = CompileOptions::default();
    assert!(check_syntax("var a = 1; function f() { return a; }", &options).unwrap().is_some());
    assert!(check_syntax("var a = ;", &options).is_err());
}

#[test]
fn test_lazy_function_compiles_on_demand() {
    let source = "function f(a) { return a + y; } var y;";
    let options = CompileOptions::default().with_lazy_functions(true);
    let script = compile_script(source, &options).unwrap();
    verify(&script.main).unwrap();
    let stub = script.main.lazy_functions().next().unwrap().clone();
    assert_eq!(stub.name.as_deref(), Some("f"));
    assert_eq!(stub.free_names, vec!["y".to_string()]);

    let f = compile_lazy_function(source, &stub, &CompileOptions::default()).unwrap();
    verify(&f).unwrap();
    assert_eq!(f.bindings.args.len(), 1);
    let f_ops = ops(&f);
    assert!(f_ops.contains(&Op::GetArg));
    assert!(f_ops.contains(&Op::GetName));
    assert!(f_ops.contains(&Op::Return));
}

#[test]
fn test_parallel_units() {
    let units: Vec<(String, String)> = (0..32)
        .map(|i| (format!("unit{i}.js"), format!("var v{i} = {i}; v{i} * 2;")))
        .collect();
    let results = compile_scripts(&units, &CompileOptions::default());
    assert_eq!(results.len(), 32);
    for (i, result) in results.iter().enumerate() {
        let script = result.as_ref().unwrap();
        assert_eq!(script.main.bindings.vars[0].name, format!("v{i}"));
    }
}

#[test]
fn test_deep_nesting_fails_cleanly_on_worker_threads() {
    let units: Vec<(String, String)> = [150, 200, 255, 400]
        .iter()
        .map(|&n| (format!("deep{n}.js"), format!("{}1{};", "(".repeat(n), ")".repeat(n))))
        .collect();
    let results = compile_scripts(&units, &CompileOptions::default());
    for result in &results[..3] {
        if let Err(e) = result {
            assert_eq!(e.kind, ErrorKind::Limit);
        }
    }
    assert_eq!(results[3].as_ref().unwrap_err().kind, ErrorKind::Limit);
}

#[test]
fn test_disassembly_lists_nested_functions() {
    let main = compile("function add(a, b) { return a + b; } add(1, 2);");
    let text = disassemble(&main);
    assert!(text.starts_with("main:"));
    assert!(text.contains("function add:"));
    assert!(text.contains("lambda function add"));
    assert!(text.contains("getarg 1"));
}

#[test]
fn test_nested_array_destructuring_assignment() {
    let main = compile("[a, [b, c]] = pair;");
    assert_eq!(
        ops(&main),
        vec![
            Op::GetGName,
            Op::Dup,
            Op::Zero,
            Op::GetElem,
            Op::SetGName,
            Op::Pop,
            Op::Dup,
            Op::One,
            Op::GetElem,
            Op::Dup,
            Op::Zero,
            Op::GetElem,
            Op::SetGName,
            Op::Pop,
            Op::Dup,
            Op::One,
            Op::GetElem,
            Op::SetGName,
            Op::Pop,
            Op::Pop,
            Op::Pop,
            Op::RetRval
        ]
    );
}

#[test]
fn test_break_from_let_loop_lands_on_scope_exit() {
    let main = compile("for (let i = 0; i < 3; i++) { break; }");
    let code = ops(&main);
    assert_eq!(code.first(), Some(&Op::EnterBlock));
    assert_eq!(code[code.len() - 2], Op::LeaveBlock);

    let mut offset = 0;
    let mut goto_targets = Vec::new();
    let mut leave_at = None;
    while offset < main.code.len() {
        let op = Op::from_byte(main.code[offset]).unwrap();
        if op == Op::Goto {
            let delta = i32::from_be_bytes(main.code[offset + 1..offset + 5].try_into().unwrap());
            goto_targets.push((offset as i64 + delta as i64) as usize);
        }
        if op == Op::LeaveBlock {
            leave_at = Some(offset);
        }
        offset += instruction_length(&main.code, offset).unwrap();
    }
    assert_eq!(goto_targets.len(), 2);
    assert_eq!(Some(goto_targets[1]), leave_at);
}
