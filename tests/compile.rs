use rpascal::compile;

#[test]
fn empty_program() {
  let asm = compile("begin end.").unwrap();
  assert!(asm.starts_with("global main\nextern printf\n"));
  assert!(asm.contains("main:"));
  assert!(asm.contains("section .data"));
}

#[test]
fn program_with_a_function_and_a_loop() {
  let source = "program demo;\n\
                var total, i: integer;\n\
                \n\
                function double(n: integer): integer;\n\
                begin\n\
                \x20 result := n + n;\n\
                end;\n\
                \n\
                begin\n\
                \x20 total := 0;\n\
                \x20 for i := 1 to 3 do\n\
                \x20   total := total + double(i);\n\
                \x20 writeln(total);\n\
                end.";
  let asm = compile(source).unwrap();
  assert!(asm.contains("f_double_1:"));
  assert!(asm.contains("call f_double_1"));
  assert!(asm.contains("v_total: dq 0"));
  assert!(asm.contains("call printf"));
  // routines are defined before the entry point
  let routine = asm.find("f_double_1:").unwrap();
  let main = asm.find("main:").unwrap();
  assert!(routine < main);
}

#[test]
fn aggregates_reserve_zeroed_data() {
  let source = "type point = record x, y: integer end;\n\
                var p: point;\n\
                \x20   a: array [1..5] of integer;\n\
                begin\n\
                \x20 p.x := 3;\n\
                \x20 a[2] := p.x;\n\
                end.";
  let asm = compile(source).unwrap();
  assert!(asm.contains("v_p: times 16 db 0"));
  assert!(asm.contains("v_a: times 40 db 0"));
}

#[test]
fn constants_fold_into_immediates() {
  let source = "const n = 4 * 8;\n\
                var a: array [1..n] of integer;\n\
                var x: integer;\n\
                begin x := n; end.";
  let asm = compile(source).unwrap();
  assert!(asm.contains("v_a: times 256 db 0"));
  assert!(asm.contains("mov rax, 32"));
}

#[test]
fn reals_go_through_the_sse_unit() {
  let source = "var x: float;\nbegin x := 1.5 + 2; writeln(x); end.";
  let asm = compile(source).unwrap();
  assert!(asm.contains("dq 1.500000"));
  assert!(asm.contains("addsd xmm0, xmm1"));
  assert!(asm.contains("cvtsi2sd"));
  assert!(asm.contains("movq xmm1, rdx"));
  assert!(asm.contains("formatFloat"));
}

#[test]
fn strings_print_through_pooled_data() {
  let asm = compile("begin writeln('hello'); end.").unwrap();
  assert!(asm.contains("v_1: db \"hello\", 0"));
  assert!(asm.contains("mov rcx, v_1"));
  assert!(asm.contains("formatNewLine"));
}

#[test]
fn error_unknown_symbol() {
  let err = compile("begin x := 1; end.").unwrap_err();
  assert_eq!(err.to_string(), "(1 ; 7): Symbol \"x\" does not exist.");
}

#[test]
fn error_type_mismatch() {
  let err = compile("var x: integer;\nbegin x := 1.5; end.").unwrap_err();
  assert_eq!(
    err.to_string(),
    "(2 ; 12): Type error: Got \"float\". Expected: \"integer\"."
  );
}

#[test]
fn error_unterminated_comment() {
  let err = compile("{ never closed").unwrap_err();
  assert!(err.to_string().contains("Unterminated comment."));
}

#[test]
fn error_missing_terminator() {
  let err = compile("begin end").unwrap_err();
  assert!(matches!(
    err,
    rpascal::CompileError::UnexpectedEndOfFile { .. }
  ));
}

#[test]
fn error_wrong_arity() {
  let source = "function f(a, b: integer): integer;\n\
                begin result := a + b; end;\n\
                var x: integer;\n\
                begin x := f(1); end.";
  let err = compile(source).unwrap_err();
  assert!(
    err
      .to_string()
      .contains("Wrong number of parameters specified for call to \"f\".")
  );
}
