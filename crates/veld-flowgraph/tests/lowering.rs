// SPDX-License-Identifier: (MIT OR Apache-2.0)

//! End-to-end lowering scenarios.

use veld_ast::{
    CatchClause, Expr, ExprKind, Function, LogicalOp, NodeOffset, Stmt, StmtKind, SwitchCase,
    TypeRef,
};
use veld_flowgraph::{Bailout, BuilderOptions, FlowGraphBuilder, FlowGraphResult};
use veld_il::{layout, ConstValue, FlowGraph, InstrId, Op};
use veld_scopes::{FunctionScopes, LocalVariable, ScopeInfo};

// ── Fixture helpers ─────────────────────────────────────────────────

fn s(offset: u32, kind: StmtKind) -> Stmt {
    Stmt::new(NodeOffset(offset), kind)
}

fn e(kind: ExprKind) -> Expr {
    Expr::new(NodeOffset(0), kind)
}

fn int(value: i64) -> Expr {
    e(ExprKind::Int(value))
}

fn var_get(decl: u32) -> Expr {
    e(ExprKind::VariableGet { decl: NodeOffset(decl) })
}

fn call0(target: &str) -> Expr {
    e(ExprKind::StaticCall { target: target.into(), args: Vec::new() })
}

fn expr_stmt(expr: Expr) -> Stmt {
    s(0, StmtKind::Expr(expr))
}

fn function(body: Stmt) -> Function {
    Function {
        offset: NodeOffset(0),
        name: "test".into(),
        arity: 0,
        type_parameters: 0,
        is_suspending: false,
        body,
    }
}

fn build(function: &Function, scopes: &FunctionScopes) -> FlowGraphResult {
    FlowGraphBuilder::new(function, scopes, None, BuilderOptions::default())
        .build_graph()
        .expect("lowering succeeds")
}

// ── Graph inspection helpers ────────────────────────────────────────

fn count_ops(graph: &FlowGraph, matches: impl Fn(&Op) -> bool) -> usize {
    graph.iter().filter(|(_, n)| matches(&n.op)).count()
}

fn static_call_count(graph: &FlowGraph, name: &str) -> usize {
    count_ops(graph, |op| matches!(op, Op::StaticCall { target, .. } if target == name))
}

/// Predecessor counts of every join in the graph, sorted ascending.
fn join_predecessor_counts(graph: &FlowGraph) -> Vec<usize> {
    let mut counts: Vec<usize> = graph
        .iter()
        .filter_map(|(_, n)| match &n.op {
            Op::JoinEntry { predecessors } => Some(predecessors.len()),
            _ => None,
        })
        .collect();
    counts.sort_unstable();
    counts
}

/// Follow `next` links and unconditional gotos from the entry.
fn straight_line_path(graph: &FlowGraph) -> Vec<InstrId> {
    let mut path = Vec::new();
    let mut cursor = graph.entry;
    while let Some(id) = cursor {
        assert!(path.len() < 10_000, "cycle in straight-line walk");
        path.push(id);
        let node = graph.node(id);
        cursor = match &node.op {
            Op::Goto { target } => Some(*target),
            _ => node.next,
        };
    }
    path
}

fn path_position(graph: &FlowGraph, path: &[InstrId], matches: impl Fn(&Op) -> bool) -> usize {
    path.iter()
        .position(|&id| matches(&graph.node(id).op))
        .expect("expected instruction on the straight-line path")
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn straight_line_function_is_a_single_linear_path() {
    let mut scopes = FunctionScopes::new();
    scopes.declare(NodeOffset(100), LocalVariable::slot("x", 0));
    let body = s(
        1,
        StmtKind::Block(vec![
            s(100, StmtKind::VariableDeclaration { init: Some(int(1)) }),
            s(0, StmtKind::Return { value: Some(var_get(100)) }),
        ]),
    );
    let function = function(body);
    let result = build(&function, &scopes);

    assert_eq!(count_ops(&result.graph, Op::is_block_entry), 1); // the entry
    assert!(join_predecessor_counts(&result.graph).is_empty());
    assert_eq!(result.graph.normal_exits.len(), 1);
    assert!(result.graph.exceptional_exits.is_empty());

    let path = straight_line_path(&result.graph);
    let last = *path.last().unwrap();
    assert!(matches!(result.graph.node(last).op, Op::Return { .. }));
}

#[test]
fn every_break_to_a_label_reuses_one_join() {
    let mut scopes = FunctionScopes::new();
    scopes.declare(NodeOffset(100), LocalVariable::slot("c", 0));
    // labeled { if (c) break; break; }
    let body = s(
        1,
        StmtKind::Labeled(Box::new(s(
            2,
            StmtKind::Block(vec![
                s(
                    0,
                    StmtKind::If {
                        condition: var_get(100),
                        then: Box::new(s(0, StmtKind::Break { label_index: 0 })),
                        otherwise: None,
                    },
                ),
                s(0, StmtKind::Break { label_index: 0 }),
            ]),
        ))),
    );
    let function = function(body);
    let result = build(&function, &scopes);

    // one join, with one predecessor per break
    assert_eq!(join_predecessor_counts(&result.graph), vec![2]);
}

#[test]
fn loop_break_and_continue_through_a_finalizer() {
    let mut scopes = FunctionScopes::new();
    scopes.declare(NodeOffset(100), LocalVariable::slot("running", 0));
    scopes.declare(NodeOffset(101), LocalVariable::slot("done", 1));
    scopes.raw_exception_vars.push(LocalVariable::slot(":raw-exc", 2));
    scopes.raw_stack_trace_vars.push(LocalVariable::slot(":raw-st", 3));
    scopes.exception_vars.push(LocalVariable::slot(":exc", 4));
    scopes.stack_trace_vars.push(LocalVariable::slot(":st", 5));

    // labeled#0: while (running) labeled#1: try { if (done) break#0; else break#1; }
    //                                      finally { f(); }
    let try_finally = s(
        0,
        StmtKind::TryFinally {
            body: Box::new(s(
                0,
                StmtKind::If {
                    condition: var_get(101),
                    then: Box::new(s(0, StmtKind::Break { label_index: 0 })),
                    otherwise: Some(Box::new(s(0, StmtKind::Break { label_index: 1 }))),
                },
            )),
            finalizer: Box::new(expr_stmt(call0("f"))),
        },
    );
    let body = s(
        1,
        StmtKind::Labeled(Box::new(s(
            2,
            StmtKind::While {
                condition: var_get(100),
                body: Box::new(s(3, StmtKind::Labeled(Box::new(try_finally)))),
            },
        ))),
    );
    let function = function(body);
    let result = build(&function, &scopes);

    // one translation of f() per exit path: break, continue, and the
    // synthesized exceptional handler
    assert_eq!(static_call_count(&result.graph, "f"), 3);

    // continue join (1 pred), loop head and post-loop joins (2 preds each)
    assert_eq!(join_predecessor_counts(&result.graph), vec![1, 2, 2]);
}

#[test]
fn return_replays_nested_finalizers_innermost_first() {
    let mut scopes = FunctionScopes::new();
    for depth in 0..2u16 {
        scopes.raw_exception_vars.push(LocalVariable::slot(":raw-exc", 10 + depth));
        scopes.raw_stack_trace_vars.push(LocalVariable::slot(":raw-st", 12 + depth));
        scopes.exception_vars.push(LocalVariable::slot(":exc", 14 + depth));
        scopes.stack_trace_vars.push(LocalVariable::slot(":st", 16 + depth));
    }

    // try { try { return 1; } finally { g(); } } finally { h(); }
    let inner = s(
        0,
        StmtKind::TryFinally {
            body: Box::new(s(0, StmtKind::Return { value: Some(int(1)) })),
            finalizer: Box::new(expr_stmt(call0("g"))),
        },
    );
    let body = s(
        0,
        StmtKind::TryFinally {
            body: Box::new(inner),
            finalizer: Box::new(expr_stmt(call0("h"))),
        },
    );
    let function = function(body);
    let result = build(&function, &scopes);

    // each finalizer: once on the return path, once in its handler
    assert_eq!(static_call_count(&result.graph, "g"), 2);
    assert_eq!(static_call_count(&result.graph, "h"), 2);

    // on the return path itself, g() runs before h() before the return
    let path = straight_line_path(&result.graph);
    let g = path_position(&result.graph, &path, |op| {
        matches!(op, Op::StaticCall { target, .. } if target == "g")
    });
    let h = path_position(&result.graph, &path, |op| {
        matches!(op, Op::StaticCall { target, .. } if target == "h")
    });
    let ret = path_position(&result.graph, &path, |op| matches!(op, Op::Return { .. }));
    assert!(g < h && h < ret);
}

#[test]
fn switch_jumps_share_one_join_per_target_case() {
    let mut scopes = FunctionScopes::new();
    scopes.switch_var = Some(LocalVariable::slot(":switch", 0));

    // switch (1) { case 0: continue-switch 2; case 1: continue-switch 2;
    //              case 2: ; }
    let cases = vec![
        SwitchCase {
            expressions: vec![int(0)],
            is_default: false,
            body: s(0, StmtKind::ContinueSwitch { target_index: 2 }),
        },
        SwitchCase {
            expressions: vec![int(1)],
            is_default: false,
            body: s(0, StmtKind::ContinueSwitch { target_index: 2 }),
        },
        SwitchCase {
            expressions: vec![int(2)],
            is_default: false,
            body: s(0, StmtKind::Empty),
        },
    ];
    let body = s(1, StmtKind::Switch { value: int(1), cases });
    let function = function(body);
    let result = build(&function, &scopes);

    // case 2's join: two jumps plus its own dispatch arm; the after-switch
    // join: case 2 falling out plus the unmatched dispatch tail
    assert_eq!(join_predecessor_counts(&result.graph), vec![2, 3]);
}

#[test]
fn nested_switches_resolve_absolute_case_indices() {
    let mut scopes = FunctionScopes::new();
    scopes.switch_var = Some(LocalVariable::slot(":switch", 0));

    // outer cases are absolute 0..2, inner case is absolute 2; the inner
    // jump to absolute 1 lands on the outer switch's second case
    let inner = s(
        2,
        StmtKind::Switch {
            value: int(0),
            cases: vec![SwitchCase {
                expressions: vec![int(0)],
                is_default: false,
                body: s(0, StmtKind::ContinueSwitch { target_index: 1 }),
            }],
        },
    );
    let outer = s(
        1,
        StmtKind::Switch {
            value: int(0),
            cases: vec![
                SwitchCase { expressions: vec![int(0)], is_default: false, body: inner },
                SwitchCase {
                    expressions: vec![int(1)],
                    is_default: false,
                    body: s(0, StmtKind::Empty),
                },
            ],
        },
    );
    let function = function(outer);
    let result = build(&function, &scopes);

    // outer case 1's join: the absolute jump plus its dispatch arm; the
    // after-switch join: case-1 fall-out, inner fall-out, unmatched tail
    assert_eq!(join_predecessor_counts(&result.graph), vec![2, 3]);
}

#[test]
fn yield_continuations_are_ordered_and_carry_try_indices() {
    let mut scopes = FunctionScopes::new();
    scopes.yield_jump_var = Some(LocalVariable::slot(":resume-index", 0));
    scopes.yield_value_var = Some(LocalVariable::slot(":yield-value", 1));
    scopes.raw_exception_vars.push(LocalVariable::slot(":raw-exc", 2));
    scopes.raw_stack_trace_vars.push(LocalVariable::slot(":raw-st", 3));
    scopes.exception_vars.push(LocalVariable::slot(":exc", 4));
    scopes.stack_trace_vars.push(LocalVariable::slot(":st", 5));

    let protected_yield = s(
        0,
        StmtKind::TryCatch {
            body: Box::new(s(0, StmtKind::Yield { value: int(2) })),
            catches: vec![CatchClause {
                guard: None,
                exception_var: None,
                stack_trace_var: None,
                body: s(0, StmtKind::Empty),
            }],
        },
    );
    let body = s(
        1,
        StmtKind::Block(vec![s(0, StmtKind::Yield { value: int(1) }), protected_yield]),
    );
    let mut function = function(body);
    function.is_suspending = true;
    let result = build(&function, &scopes);

    assert_eq!(result.yield_continuations.len(), 2);
    assert_eq!(result.yield_continuations[0].try_index, None);
    assert_eq!(result.yield_continuations[1].try_index, Some(0));
    assert_ne!(
        result.yield_continuations[0].entry,
        result.yield_continuations[1].entry
    );
}

#[test]
fn protected_constructs_bail_out_when_inlining() {
    let scopes = FunctionScopes::new();
    let body = s(
        0,
        StmtKind::TryFinally {
            body: Box::new(s(0, StmtKind::Empty)),
            finalizer: Box::new(s(0, StmtKind::Empty)),
        },
    );
    let function = function(body);
    let options = BuilderOptions { inlining: true, ..BuilderOptions::default() };
    let error = FlowGraphBuilder::new(&function, &scopes, None, options)
        .build_graph()
        .unwrap_err();
    assert_eq!(error, Bailout::InlinedConstruct { construct: "try/finally" });
    assert!(error.reason().contains("inlining"));
}

#[test]
fn argument_checks_share_the_dispatch_failure_stub() {
    let mut scopes = FunctionScopes::new();
    scopes.argument_descriptor_var = Some(LocalVariable::slot(":arg-desc", 0));
    let mut function = function(s(0, StmtKind::Empty));
    function.arity = 2;
    function.type_parameters = 1;
    let result = build(&function, &scopes);

    // both the arity check and the type-argument check fail into one stub
    assert_eq!(
        static_call_count(&result.graph, layout::RUNTIME_THROW_NO_SUCH_METHOD),
        1
    );
    assert_eq!(join_predecessor_counts(&result.graph), vec![2]);
    assert_eq!(result.graph.exceptional_exits.len(), 1);
}

#[test]
fn deopt_side_table_pairs_carry_the_context_depth() {
    let mut scopes = FunctionScopes::new();
    scopes.current_context_var = Some(LocalVariable::slot(":context", 0));
    scopes.set_scope(NodeOffset(1), ScopeInfo { context_size: 1 });
    let body = s(1, StmtKind::Block(vec![expr_stmt(call0("work"))]));
    let function = function(body);
    let result = FlowGraphBuilder::new(
        &function,
        &scopes,
        None,
        BuilderOptions { record_context_levels: true, ..BuilderOptions::default() },
    )
    .build_graph()
    .expect("lowering succeeds");

    assert!(!result.context_levels.is_empty());
    // the prologue check runs at depth zero, the call inside the scope at one
    assert!(result.context_levels.iter().any(|&(_, depth)| depth == 0));
    assert!(result.context_levels.iter().any(|&(_, depth)| depth == 1));
}

#[test]
fn catch_clauses_type_test_in_order_and_end_in_rethrow() {
    let mut scopes = FunctionScopes::new();
    scopes.raw_exception_vars.push(LocalVariable::slot(":raw-exc", 0));
    scopes.raw_stack_trace_vars.push(LocalVariable::slot(":raw-st", 1));
    scopes.exception_vars.push(LocalVariable::slot(":exc", 2));
    scopes.stack_trace_vars.push(LocalVariable::slot(":st", 3));

    let catches = vec![
        CatchClause {
            guard: Some(TypeRef::Named("FormatError".into())),
            exception_var: None,
            stack_trace_var: None,
            body: s(0, StmtKind::Empty),
        },
        CatchClause {
            guard: Some(TypeRef::Named("IoError".into())),
            exception_var: None,
            stack_trace_var: None,
            body: s(0, StmtKind::Empty),
        },
    ];
    let body = s(
        0,
        StmtKind::TryCatch { body: Box::new(expr_stmt(call0("work"))), catches },
    );
    let function = function(body);
    let result = build(&function, &scopes);

    assert_eq!(static_call_count(&result.graph, layout::RUNTIME_INSTANCE_OF), 2);

    // declaration order: the FormatError test is emitted before IoError's
    let type_constants: Vec<&TypeRef> = result
        .graph
        .iter()
        .filter_map(|(_, n)| match &n.op {
            Op::Constant(ConstValue::Type(ty)) => Some(ty),
            _ => None,
        })
        .collect();
    assert_eq!(
        type_constants,
        vec![&TypeRef::Named("FormatError".into()), &TypeRef::Named("IoError".into())]
    );

    // no clause matched: exactly one implicit rethrow, past this handler
    let rethrows: Vec<u32> = result
        .graph
        .iter()
        .filter_map(|(_, n)| match n.op {
            Op::Rethrow { catch_try_index, .. } => Some(catch_try_index),
            _ => None,
        })
        .collect();
    assert_eq!(rethrows, vec![0]);

    let entry_types = result
        .graph
        .iter()
        .find_map(|(_, n)| match &n.op {
            Op::CatchEntry { handled_types, .. } => Some(handled_types.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        entry_types,
        vec![TypeRef::Named("FormatError".into()), TypeRef::Named("IoError".into())]
    );
}

#[test]
fn finally_handler_is_synthesized_and_rethrows_outward() {
    let mut scopes = FunctionScopes::new();
    scopes.raw_exception_vars.push(LocalVariable::slot(":raw-exc", 0));
    scopes.raw_stack_trace_vars.push(LocalVariable::slot(":raw-st", 1));
    scopes.exception_vars.push(LocalVariable::slot(":exc", 2));
    scopes.stack_trace_vars.push(LocalVariable::slot(":st", 3));

    let body = s(
        0,
        StmtKind::TryFinally {
            body: Box::new(expr_stmt(call0("work"))),
            finalizer: Box::new(expr_stmt(call0("cleanup"))),
        },
    );
    let function = function(body);
    let result = build(&function, &scopes);

    let (handler_index, is_synthesized) = result
        .graph
        .iter()
        .find_map(|(_, n)| match &n.op {
            Op::CatchEntry { handler_index, is_synthesized, .. } => {
                Some((*handler_index, *is_synthesized))
            }
            _ => None,
        })
        .unwrap();
    assert!(is_synthesized);

    let rethrow_index = result
        .graph
        .iter()
        .find_map(|(_, n)| match n.op {
            Op::Rethrow { catch_try_index, .. } => Some(catch_try_index),
            _ => None,
        })
        .unwrap();
    assert_eq!(rethrow_index, handler_index);

    // cleanup() translated twice: normal exit inline, exceptional handler
    assert_eq!(static_call_count(&result.graph, "cleanup"), 2);
}

#[test]
fn logical_merge_goes_through_the_expression_temporary() {
    let mut scopes = FunctionScopes::new();
    scopes.declare(NodeOffset(100), LocalVariable::slot("a", 0));
    scopes.declare(NodeOffset(101), LocalVariable::slot("b", 1));
    let temp = LocalVariable::slot(":expr-temp", 2);
    scopes.expression_temp_var = Some(temp.clone());

    let body = expr_stmt(e(ExprKind::Logical {
        op: LogicalOp::And,
        left: Box::new(var_get(100)),
        right: Box::new(var_get(101)),
    }));
    let function = function(body);
    let result = build(&function, &scopes);

    // both arms store into the declared temporary; the merge has two
    // predecessors and the result is loaded back out of the slot
    let stores = count_ops(&result.graph, |op| {
        matches!(op, Op::StoreLocal { variable, .. } if *variable == temp)
    });
    assert_eq!(stores, 2);
    assert_eq!(join_predecessor_counts(&result.graph), vec![2]);
    let loads = count_ops(&result.graph, |op| {
        matches!(op, Op::LoadLocal(variable) if *variable == temp)
    });
    assert_eq!(loads, 1);
}
