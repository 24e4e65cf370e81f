// Integration tests for whole programs
//
// These tests build node trees, run them through the evaluator and check the
// observable behaviour: memoization, operator overrides, handlers and the
// boundary collaborators.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use jsonflow_core::component::Collected;
use jsonflow_core::{
    value, BinaryOp, BreakType, ComponentRegistry, ContextManager, ErrorKind, EvaluatePolicy, Evaluator,
    ExceptionHandler, GenericError, InputSourceDriver, LambdaDef, LetBinding, MemoryBackend, MemoryComponent,
    Node, Param, Program, ResetPolicy, RetryPolicy, RetryingStore, UnaryOp, Value, ValueSourceDriver,
};
use pretty_assertions::assert_eq;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An evaluator with a `recorder` component that records every value it sees.
fn recording() -> (Evaluator, Collected) {
    let recorder = MemoryComponent::new("recorder");
    let seen = recorder.collected();
    let mut evaluator = Evaluator::new();
    evaluator.register_component(Box::new(recorder));
    (evaluator, seen)
}

/// `@ -> recorder`
fn record_current() -> Node {
    Node::Sink {
        input: Box::new(Node::CurrentValue),
        component: "recorder".to_string(),
    }
}

fn recorded_let(reset: ResetPolicy, evaluate: EvaluatePolicy) -> LetBinding {
    LetBinding::new("x", record_current()).with_policies(reset, evaluate)
}

fn twice_x() -> Node {
    Node::Array(vec![Node::value_ref("x"), Node::value_ref("x")])
}

fn raise_custom() -> Node {
    Node::raise("Custom", "boom", Some(Node::integer(42)))
}

// ── Numbers and operators ────────────────────────────────────────────────────

#[test]
fn test_integral_arithmetic_stays_integral() {
    let mut evaluator = Evaluator::new();

    let sum = evaluator.evaluate(
        &Program::new(Node::binary(BinaryOp::Add, Node::integer(4), Node::integer(2))),
        Value::Empty,
    );
    let n = sum.as_number().unwrap();
    assert_eq!(n.value(), 6.0);
    assert_eq!(n.precision(), 0);
    assert_eq!(sum.to_string(), "6");

    let quotient = evaluator.evaluate(
        &Program::new(Node::binary(BinaryOp::Divide, Node::integer(5), Node::integer(2))),
        Value::Empty,
    );
    let n = quotient.as_number().unwrap();
    assert_eq!(n.value(), 2.5);
    assert!(n.precision() > 0);
}

#[test]
fn test_decimal_precision_is_kept() {
    let program = Program::new(Node::binary(BinaryOp::Add, Node::get("price"), Node::decimal("0.50")));
    let result = Evaluator::new().evaluate(&program, value!({"price": 2}));
    assert_eq!(result.to_string(), "2.50");
}

#[test]
fn test_empty_is_the_identity_of_add() {
    let mut evaluator = Evaluator::new();
    let right = Program::new(Node::binary(BinaryOp::Add, Node::CurrentValue, Node::Empty));
    let left = Program::new(Node::binary(BinaryOp::Add, Node::Empty, Node::CurrentValue));

    for input in [
        value!("text"),
        value!(3),
        value!(null),
        value!([1, 2]),
        value!({"a": 1}),
        Value::raw("bytes"),
    ] {
        assert_eq!(evaluator.evaluate(&right, input.clone()), input);
        assert_eq!(evaluator.evaluate(&left, input.clone()), input);
    }
    assert_eq!(evaluator.evaluate(&right, Value::Empty), Value::Empty);
}

#[test]
fn test_array_intersection_and_difference() {
    let lhs = || Node::Array(vec![Node::integer(1), Node::integer(2), Node::integer(3)]);
    let rhs = || Node::Array(vec![Node::integer(2), Node::integer(3), Node::integer(4)]);
    let mut evaluator = Evaluator::new();

    let divide = Program::new(Node::binary(BinaryOp::Divide, lhs(), rhs()));
    assert_eq!(evaluator.evaluate(&divide, Value::Empty), value!([2, 3]));

    let modulo = Program::new(Node::binary(BinaryOp::Modulo, lhs(), rhs()));
    assert_eq!(evaluator.evaluate(&modulo, Value::Empty), value!([1, 4]));
}

#[test]
fn test_object_minus_object_is_an_operator_error() {
    let input = value!({"a": {"x": 1}, "b": {"y": 2}});
    let program = Program::new(Node::binary(BinaryOp::Subtract, Node::get("a"), Node::get("b")));

    let err = Evaluator::new().try_evaluate(&program, input.clone()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Operator);
    assert_eq!(
        err.payload,
        value!({"operator": "-", "lhsType": "Object", "rhsType": "Object"})
    );
    assert_eq!(input, value!({"a": {"x": 1}, "b": {"y": 2}}));
}

#[test]
fn test_object_divided_by_paths_retains() {
    // @ / ~.a.b
    let program = Program::new(Node::binary(
        BinaryOp::Divide,
        Node::CurrentValue,
        Node::PathLiteral(vec![
            jsonflow_core::PathPart::Key("a".to_string()),
            jsonflow_core::PathPart::Key("b".to_string()),
        ]),
    ));
    let result = Evaluator::new().evaluate(&program, value!({"a": {"b": 1, "c": 2}, "d": 3}));
    assert_eq!(result, value!({"a": {"b": 1}}));
}

#[test]
fn test_copy_is_independent() {
    let original = value!({"list": [1, 2], "nested": {"k": "v"}});
    let mut copy = Evaluator::new().evaluate(
        &Program::new(Node::call("core", "copy", vec![Node::CurrentValue])),
        original.clone(),
    );
    copy.as_object_mut().unwrap().insert("added".to_string(), value!(true));
    assert_eq!(original, value!({"list": [1, 2], "nested": {"k": "v"}}));

    let bytes = Value::raw("abc");
    let mut raw_copy = bytes.deep_copy();
    if let Value::Raw(raw) = &mut raw_copy {
        raw.bytes_mut()[0] = b'z';
    }
    assert_eq!(bytes, Value::raw("abc"));
    assert_eq!(raw_copy, Value::raw("zbc"));
}

// ── Let-binding memoization ──────────────────────────────────────────────────

#[test]
fn test_after_scope_memo_lives_for_one_scope_entry() {
    init_tracing();
    let (mut evaluator, seen) = recording();
    let body = Node::let_in(vec![recorded_let(ResetPolicy::AfterScope, EvaluatePolicy::Lazy)], twice_x());
    let program = Program::new(Node::map(Node::CurrentValue, body));

    let result = evaluator.evaluate(&program, value!([1, 2]));
    assert_eq!(result, value!([[1, 1], [2, 2]]));
    assert_eq!(seen.values(), vec![value!(1), value!(2)]);
}

#[test]
fn test_never_memo_survives_evaluations() {
    let (mut evaluator, seen) = recording();
    let build = || {
        Program::new(Node::let_in(
            vec![recorded_let(ResetPolicy::Never, EvaluatePolicy::Lazy)],
            Node::value_ref("x"),
        ))
    };
    let program = build();

    assert_eq!(evaluator.evaluate(&program, value!(1)), value!(1));
    assert_eq!(evaluator.evaluate(&program, value!(2)), value!(1));
    assert_eq!(seen.len(), 1);

    // A new program instance has its own bindings.
    assert_eq!(evaluator.evaluate(&build(), value!(3)), value!(3));

    evaluator.forget_memos();
    assert_eq!(evaluator.evaluate(&program, value!(4)), value!(4));
    assert_eq!(seen.len(), 3);
}

#[test]
fn test_after_query_memo_spans_scopes_of_one_query() {
    let (mut evaluator, seen) = recording();
    let body = Node::let_in(
        vec![recorded_let(ResetPolicy::AfterQuery, EvaluatePolicy::Lazy)],
        Node::value_ref("x"),
    );
    let program = Program::new(Node::map(Node::CurrentValue, body));

    assert_eq!(evaluator.evaluate(&program, value!([1, 2])), value!([1, 1]));
    assert_eq!(evaluator.evaluate(&program, value!([5, 6])), value!([5, 5]));
    assert_eq!(seen.len(), 2);
}

#[test]
fn test_always_recomputes() {
    let (mut evaluator, seen) = recording();
    let program = Program::new(Node::let_in(
        vec![recorded_let(ResetPolicy::Always, EvaluatePolicy::Lazy)],
        twice_x(),
    ));
    assert_eq!(evaluator.evaluate(&program, value!(7)), value!([7, 7]));
    assert_eq!(seen.len(), 2);
}

#[test]
fn test_eager_forces_at_scope_entry() {
    let (mut evaluator, seen) = recording();
    let lazy = Program::new(Node::let_in(
        vec![recorded_let(ResetPolicy::AfterScope, EvaluatePolicy::Lazy)],
        Node::string("done"),
    ));
    evaluator.evaluate(&lazy, value!(1));
    assert!(seen.is_empty());

    let eager = Program::new(Node::let_in(
        vec![recorded_let(ResetPolicy::AfterScope, EvaluatePolicy::Eager)],
        Node::string("done"),
    ));
    assert_eq!(evaluator.evaluate(&eager, value!(1)), value!("done"));
    assert_eq!(seen.len(), 1);
}

#[test]
fn test_let_sees_enclosing_current_value() {
    let program = Program::new(Node::Chain(vec![
        Node::get("inner"),
        Node::let_in(
            vec![LetBinding::new("v", Node::get("n"))],
            Node::binary(BinaryOp::Multiply, Node::value_ref("v"), Node::integer(2)),
        ),
    ]));
    assert_eq!(Evaluator::new().evaluate(&program, value!({"inner": {"n": 21}})), value!(42));
}

#[test]
fn test_invoke_on_access_lambda_runs_once() {
    let (mut evaluator, seen) = recording();
    // $obj := function() { {"a": 5} -> recorder }, invoked on access
    let body = Node::Sink {
        input: Box::new(Node::Object(vec![("a".to_string(), Node::integer(5))])),
        component: "recorder".to_string(),
    };
    let lazy = LambdaDef::new(vec![], body).invoked_on_access();
    let a_of_obj = || Node::Chain(vec![Node::value_ref("obj"), Node::get("a")]);
    let program = Program::new(Node::let_in(
        vec![LetBinding::new("obj", Node::Lambda(Arc::new(lazy)))],
        Node::Array(vec![a_of_obj(), a_of_obj()]),
    ));
    assert_eq!(evaluator.evaluate(&program, Value::Empty), value!([5, 5]));
    assert_eq!(seen.len(), 1);
}

// ── Operator bindings ────────────────────────────────────────────────────────

/// `name := 10` with `symbol` bound to `function(l, r) { body }`.
fn bound(name: &str, symbol: &str, body: Node, cascade: bool) -> LetBinding {
    let function = Node::lambda(vec![Param::required("l"), Param::required("r")], body);
    let binding = Node::Object(vec![
        ("function".to_string(), function),
        ("cascade".to_string(), Node::boolean(cascade)),
    ]);
    LetBinding::new(name, Node::integer(10)).with_config(Node::Object(vec![(
        "bind".to_string(),
        Node::Object(vec![(symbol.to_string(), binding)]),
    )]))
}

/// `$l + $r + 100`
fn plus_hundred() -> Node {
    Node::binary(
        BinaryOp::Add,
        Node::binary(BinaryOp::Add, Node::value_ref("l"), Node::value_ref("r")),
        Node::integer(100),
    )
}

/// `$a + 1 + 1`
fn a_plus_one_plus_one() -> Node {
    Node::binary(
        BinaryOp::Add,
        Node::binary(BinaryOp::Add, Node::value_ref("a"), Node::integer(1)),
        Node::integer(1),
    )
}

#[test]
fn test_cascade_applies_override_twice() {
    let program = Program::new(Node::let_in(
        vec![bound("a", "+", plus_hundred(), true)],
        a_plus_one_plus_one(),
    ));
    assert_eq!(Evaluator::new().evaluate(&program, Value::Empty), value!(212));
}

#[test]
fn test_without_cascade_result_drops_override() {
    let program = Program::new(Node::let_in(
        vec![bound("a", "+", plus_hundred(), false)],
        a_plus_one_plus_one(),
    ));
    assert_eq!(Evaluator::new().evaluate(&program, Value::Empty), value!(112));
}

#[test]
fn test_left_override_wins() {
    let program = Program::new(Node::let_in(
        vec![
            bound("a", "+", Node::string("left"), false),
            bound("b", "+", Node::string("right"), false),
        ],
        Node::Array(vec![
            Node::binary(BinaryOp::Add, Node::value_ref("a"), Node::value_ref("b")),
            Node::binary(BinaryOp::Add, Node::value_ref("b"), Node::value_ref("a")),
            Node::binary(BinaryOp::Add, Node::integer(1), Node::value_ref("b")),
        ]),
    ));
    assert_eq!(
        Evaluator::new().evaluate(&program, Value::Empty),
        value!(["left", "right", "right"])
    );
}

/// `$l + $r + 1000`
fn plus_thousand() -> Node {
    Node::binary(
        BinaryOp::Add,
        Node::binary(BinaryOp::Add, Node::value_ref("l"), Node::value_ref("r")),
        Node::integer(1000),
    )
}

#[test]
fn test_cascade_keeps_the_left_override() {
    let sum_plus_one = |lhs: &str, rhs: &str| {
        Node::binary(
            BinaryOp::Add,
            Node::binary(BinaryOp::Add, Node::value_ref(lhs), Node::value_ref(rhs)),
            Node::integer(1),
        )
    };
    let program = Program::new(Node::let_in(
        vec![bound("a", "+", plus_hundred(), true), bound("b", "+", plus_thousand(), true)],
        Node::Array(vec![sum_plus_one("a", "b"), sum_plus_one("b", "a")]),
    ));
    // a: 10 + 10 + 100 = 120, then 120 + 1 + 100
    // b: 10 + 10 + 1000 = 1020, then 1020 + 1 + 1000
    assert_eq!(
        Evaluator::new().evaluate(&program, Value::Empty),
        value!([221, 2021])
    );
}

#[test]
fn test_unary_override() {
    let negate = Node::lambda(vec![Param::required("v")], Node::string("negated"));
    let config = Node::Object(vec![(
        "bind".to_string(),
        Node::Object(vec![(
            "neg".to_string(),
            Node::Object(vec![("function".to_string(), negate)]),
        )]),
    )]);
    let program = Program::new(Node::let_in(
        vec![LetBinding::new("a", Node::integer(3)).with_config(config)],
        Node::Array(vec![
            Node::unary(UnaryOp::Negate, Node::value_ref("a")),
            Node::unary(UnaryOp::Negate, Node::integer(3)),
        ]),
    ));
    assert_eq!(Evaluator::new().evaluate(&program, Value::Empty), value!(["negated", (-3)]));
}

#[test]
fn test_binding_an_unknown_symbol_is_a_configuration_error() {
    let program = Program::new(Node::let_in(
        vec![bound("a", "<>", Node::Null, false)],
        Node::value_ref("a"),
    ));
    let err = Evaluator::new().try_evaluate(&program, Value::Empty).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
}

// ── Handlers and control signals ─────────────────────────────────────────────

fn guarded(body: Node, handler: ExceptionHandler) -> Program {
    Program::new(Node::scope(body, Some(handler)))
}

#[test]
fn test_recovering_handler_replaces_result() {
    let mut evaluator = Evaluator::new();

    let by_current = guarded(
        raise_custom(),
        ExceptionHandler::recover(Node::call("error", "message", vec![Node::CurrentValue])),
    );
    assert_eq!(evaluator.evaluate(&by_current, Value::Empty), value!("boom"));

    let by_name = guarded(
        raise_custom(),
        ExceptionHandler::recover(Node::call("error", "payload", vec![Node::value_ref("error")])),
    );
    assert_eq!(evaluator.evaluate(&by_name, Value::Empty), value!(42));
}

#[test]
fn test_observing_handler_rethrows() {
    let program = guarded(raise_custom(), ExceptionHandler::observe(Node::string("seen")));
    let err = Evaluator::new().try_evaluate(&program, Value::Empty).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Raised("Custom".to_string()));
    assert_eq!(err.payload, value!(42));
}

#[test]
fn test_handled_flag_set_at_runtime() {
    let mut evaluator = Evaluator::new();

    let accept = guarded(
        raise_custom(),
        ExceptionHandler::observe(Node::Chain(vec![
            Node::call("error", "handled", vec![Node::boolean(true)]),
            Node::string("recovered"),
        ])),
    );
    assert_eq!(evaluator.evaluate(&accept, Value::Empty), value!("recovered"));

    let decline = guarded(
        raise_custom(),
        ExceptionHandler::recover(Node::Chain(vec![
            Node::call("error", "handled", vec![Node::boolean(false)]),
            Node::string("recovered"),
        ])),
    );
    assert!(evaluator.evaluate(&decline, Value::Empty).is_fault());
}

#[test]
fn test_handled_outside_a_handler_fails() {
    let program = Program::new(Node::call("error", "handled", vec![Node::boolean(true)]));
    let err = Evaluator::new().try_evaluate(&program, Value::Empty).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Function);
}

#[test]
fn test_failing_handler_wraps_original() {
    let program = guarded(
        raise_custom(),
        ExceptionHandler::recover(Node::raise("Secondary", "handler failed", None)),
    );
    let err = Evaluator::new().try_evaluate(&program, Value::Empty).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Raised("Secondary".to_string()));
    let cause = err.cause.as_deref().cloned().unwrap();
    assert_eq!(cause.kind, ErrorKind::Raised("Custom".to_string()));
}

#[test]
fn test_let_without_handler_rethrows_to_parent() {
    let program = guarded(
        Node::let_in(vec![LetBinding::new("x", raise_custom())], Node::value_ref("x")),
        ExceptionHandler::recover(Node::string("outer")),
    );
    assert_eq!(Evaluator::new().evaluate(&program, Value::Empty), value!("outer"));

    let local = Program::new(Node::let_in(
        vec![LetBinding::new("x", raise_custom()).with_handler(ExceptionHandler::recover(Node::integer(99)))],
        Node::value_ref("x"),
    ));
    assert_eq!(Evaluator::new().evaluate(&local, Value::Empty), value!(99));
}

#[test]
fn test_program_handler_and_unhandled_fault() {
    let mut evaluator = Evaluator::new();
    let handled = Program::new(raise_custom()).with_handler(ExceptionHandler::recover(Node::string("fallback")));
    assert_eq!(evaluator.evaluate(&handled, Value::Empty), value!("fallback"));

    let unhandled = evaluator.evaluate(&Program::new(raise_custom()), Value::Empty);
    assert!(unhandled.is_fault());
    assert_eq!(unhandled.as_error().map(|e| e.message.clone()), Some("boom".to_string()));
    assert_eq!(evaluator.live_statements(), 0);
}

fn stop(value: &str) -> Node {
    Node::Stop {
        break_type: BreakType::FromStop,
        value: Box::new(Node::string(value)),
    }
}

#[test]
fn test_break_select_passes_through_handlers() {
    let mut evaluator = Evaluator::new();

    let through_scope = Program::new(Node::select(
        vec![],
        Node::Array(vec![
            Node::scope(stop("stopped"), Some(ExceptionHandler::recover(Node::string("caught")))),
            Node::string("after"),
        ]),
    ));
    assert_eq!(evaluator.evaluate(&through_scope, Value::Empty), value!("stopped"));

    let function = LambdaDef::new(vec![], stop("from function"))
        .with_handler(ExceptionHandler::recover(Node::string("caught")));
    let through_function = Program::new(Node::select(
        vec![],
        Node::invoke(Node::Lambda(Arc::new(function)), vec![]),
    ));
    assert_eq!(evaluator.evaluate(&through_function, Value::Empty), value!("from function"));

    let through_let = Program::new(Node::select(
        vec![LetBinding::new("x", stop("from let")).with_handler(ExceptionHandler::recover(Node::Null))],
        Node::value_ref("x"),
    ));
    assert_eq!(evaluator.evaluate(&through_let, Value::Empty), value!("from let"));
}

#[test]
fn test_innermost_select_observes_stop() {
    let inner = Node::select(vec![], stop("inner"));
    let program = Program::new(Node::select(
        vec![],
        Node::Array(vec![inner, Node::string("outer continues")]),
    ));
    assert_eq!(
        Evaluator::new().evaluate(&program, Value::Empty),
        value!(["inner", "outer continues"])
    );
}

#[test]
fn test_break_is_not_caught_by_handlers() {
    let body = Node::scope(
        Node::conditional(
            Node::binary(BinaryOp::Equal, Node::CurrentValue, Node::integer(2)),
            Node::Break,
            Some(Node::CurrentValue),
        ),
        Some(ExceptionHandler::recover(Node::string("caught"))),
    );
    let program = Program::new(Node::map(Node::CurrentValue, body));
    assert_eq!(Evaluator::new().evaluate(&program, value!([1, 2, 3])), value!([1]));
}

#[test]
fn test_errors_inside_loops_can_be_recovered_per_element() {
    // for each: @ * 2, recovering with null
    let body = Node::scope(
        Node::binary(BinaryOp::Multiply, Node::CurrentValue, Node::integer(2)),
        Some(ExceptionHandler::recover(Node::Null)),
    );
    let program = Program::new(Node::map(Node::CurrentValue, body));
    assert_eq!(
        Evaluator::new().evaluate(&program, value!([1, "x", 3])),
        value!([2, null, 6])
    );
}

// ── Boundary collaborators ───────────────────────────────────────────────────

#[test]
fn test_driver_feeds_context_manager() {
    init_tracing();
    let delivered: Rc<RefCell<Vec<Result<Value, GenericError>>>> = Rc::default();
    let sink = delivered.clone();

    let program = Program::new(Node::binary(BinaryOp::Multiply, Node::CurrentValue, Node::integer(2)));
    let mut context =
        ContextManager::new(program, Evaluator::new()).with_sink(move |result| sink.borrow_mut().push(result));

    let mut driver = ValueSourceDriver::new();
    driver.configure(&value!({"values": [1, "x", 3], "repeat": 2})).unwrap();
    driver.start(&mut context).unwrap();

    assert!(!driver.is_running());
    assert_eq!(context.runs(), 6);
    let delivered = delivered.borrow();
    assert_eq!(delivered[0], Ok(value!(2)));
    assert_eq!(delivered[1].as_ref().map_err(|e| e.kind.clone()), Err(ErrorKind::Operator));
    assert_eq!(delivered[5], Ok(value!(6)));
}

#[test]
fn test_registry_components_in_programs() {
    let mut registry = ComponentRegistry::with_builtins();
    registry
        .load_definitions(r#"[{"type": "memory", "name": "buffer", "configuration": {"capacity": 1}}]"#)
        .unwrap();

    let mut evaluator = Evaluator::new();
    evaluator.load_component(&registry, "buffer").unwrap();

    let program = Program::new(Node::Sink {
        input: Box::new(Node::CurrentValue),
        component: "buffer".to_string(),
    });
    assert_eq!(evaluator.evaluate(&program, value!(1)), value!(1));

    let err = evaluator.try_evaluate(&program, value!(2)).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Component);
    assert_eq!(err.code.as_deref(), Some("CAPACITY"));
}

#[test]
fn test_state_round_trip_through_programs() {
    let backend = MemoryBackend::new();
    let store = RetryingStore::new(backend.clone(), RetryPolicy::immediate(3));
    let mut evaluator = Evaluator::new().with_state_store(store);

    backend.fail_next(2);
    let set = Program::new(Node::call("state", "set", vec![Node::string("seen"), Node::CurrentValue]));
    evaluator.evaluate(&set, Value::raw("hi"));
    assert_eq!(backend.raw_entry("seen").as_deref(), Some("raGk="));

    let get_or_insert = Program::new(Node::call(
        "state",
        "get",
        vec![Node::string("count"), Node::integer(5)],
    ));
    assert_eq!(evaluator.evaluate(&get_or_insert, Value::Empty), value!(5));
    assert_eq!(backend.raw_entry("count").as_deref(), Some("j5"));

    let get = Program::new(Node::call("state", "get", vec![Node::string("seen")]));
    assert_eq!(evaluator.evaluate(&get, Value::Empty), Value::raw("hi"));
}

#[test]
fn test_program_is_shareable_across_threads() {
    let program = Arc::new(Program::new(Node::binary(
        BinaryOp::Add,
        Node::CurrentValue,
        Node::integer(1),
    )));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let program = Arc::clone(&program);
            std::thread::spawn(move || {
                let result = Evaluator::new().evaluate(&program, Value::from(i));
                result.as_i64()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![Some(1), Some(2), Some(3), Some(4)]);
}
