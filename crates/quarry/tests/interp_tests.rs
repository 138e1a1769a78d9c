//! End-to-end language semantics through the embedding API.

mod common;

use common::{eval, parser, parser_with_config};
use quarry::{ErrorKind, Object};

fn ints(values: &[i64]) -> Object {
    Object::List(values.iter().copied().map(Object::Int).collect())
}

fn strs(values: &[&str]) -> Object {
    Object::List(values.iter().map(|s| Object::Str((*s).to_owned())).collect())
}

#[test]
fn arithmetic_assignment() {
    let p = parser();
    assert_eq!(eval(&p, "t1.build", "x = 1 + 2\nreturn x\n"), Object::Int(3));
    assert_eq!(eval(&p, "t2.build", "return 10 - 3 - 2\n"), Object::Int(5));
    assert_eq!(eval(&p, "t3.build", "return 17 % 5\n"), Object::Int(2));
}

#[test]
fn comprehension_over_range() {
    let p = parser();
    assert_eq!(
        eval(&p, "t.build", "x = [i for i in range(3)]\nreturn x\n"),
        ints(&[0, 1, 2])
    );
}

#[test]
fn dict_keys_are_sorted() {
    let p = parser();
    assert_eq!(
        eval(&p, "t.build", "d = {\"b\": 2, \"a\": 1}\nreturn sorted(d.keys())\n"),
        strs(&["a", "b"])
    );
}

#[test]
fn string_split() {
    let p = parser();
    assert_eq!(
        eval(&p, "t.build", "s = \"a,b,c\"\nreturn s.split(\",\")\n"),
        strs(&["a", "b", "c"])
    );
}

#[test]
fn typed_defaults_and_bool_for_int() {
    let p = parser();
    let src = "def f(x: int | str = 1):\n    return x\nreturn [f(), f(2), f(\"y\"), f(True)]\n";
    assert_eq!(
        eval(&p, "t.build", src),
        Object::List(vec![
            Object::Int(1),
            Object::Int(2),
            Object::Str("y".to_owned()),
            Object::Bool(true),
        ])
    );
}

#[test]
fn wrong_argument_type_is_rejected() {
    let p = parser();
    let err = p
        .eval_data(None, "def f(x: int):\n    return x\nreturn f(\"s\")\n", "t.build")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().contains("argument 'x'"));
}

#[test]
fn assertions_report_their_message_and_position() {
    let p = parser();
    assert_eq!(
        eval(&p, "ok.build", "def g():\n    return 1\nassert g() == 1, \"nope\"\nreturn 0\n"),
        Object::Int(0)
    );
    let err = p
        .eval_data(None, "def g():\n    return 1\nassert g() == 2, \"nope\"\n", "bad.build")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Value);
    assert_eq!(err.message(), "nope");
    let frame = err.frames().first().expect("assert failure carries a frame");
    assert_eq!(frame.filename, "bad.build");
    assert_eq!(frame.line, 3);
}

#[test]
fn append_rewrite_binds_a_new_local() {
    let p = parser();
    let src = "xs = [1, 2]\ndef f():\n    xs.append(3)\n    return xs\nys = f()\nreturn [xs, ys]\n";
    assert_eq!(
        eval(&p, "t.build", src),
        Object::List(vec![ints(&[1, 2]), ints(&[1, 2, 3])])
    );
}

#[test]
fn extend_rewrite_concatenates() {
    let p = parser();
    let src = "xs = [1]\nxs.extend([2, 3])\nreturn xs\n";
    assert_eq!(eval(&p, "t.build", src), ints(&[1, 2, 3]));
}

#[test]
fn truthiness() {
    let p = parser();
    let src = "return [bool(0), bool(1), bool(\"\"), bool(\"x\"), bool([]), bool([0]), bool(None), bool({})]\n";
    assert_eq!(
        eval(&p, "t.build", src),
        Object::List(vec![
            Object::Bool(false),
            Object::Bool(true),
            Object::Bool(false),
            Object::Bool(true),
            Object::Bool(false),
            Object::Bool(true),
            Object::Bool(false),
            Object::Bool(false),
        ])
    );
}

#[test]
fn short_circuiting_returns_the_operand() {
    let p = parser();
    assert_eq!(eval(&p, "t1.build", "x = False\nreturn x or []\n"), Object::List(vec![]));
    assert_eq!(eval(&p, "t2.build", "x = [1]\nreturn x or [2]\n"), ints(&[1]));
    assert_eq!(eval(&p, "t3.build", "return [1] and [2]\n"), ints(&[2]));
    assert_eq!(eval(&p, "t4.build", "return None and undefined_name\n"), Object::None);
    assert_eq!(eval(&p, "t5.build", "return [1] or undefined_name\n"), ints(&[1]));
}

#[test]
fn operator_precedence() {
    let p = parser();
    assert_eq!(eval(&p, "t1.build", "return 1 + 2 % 2\n"), Object::Int(1));
    assert_eq!(eval(&p, "t2.build", "return 1 + 1 == 2\n"), Object::Bool(true));
    assert_eq!(
        eval(&p, "t3.build", "return True and 1 + 1 == 3 or \"fallback\"\n"),
        Object::Str("fallback".to_owned())
    );
}

#[test]
fn identity_is_restricted_to_none_and_bools() {
    let p = parser();
    let src = "return [None is None, True is True, True is False, [] is [], 1 is 1, None is not None]\n";
    assert_eq!(
        eval(&p, "t.build", src),
        Object::List(vec![
            Object::Bool(true),
            Object::Bool(true),
            Object::Bool(false),
            Object::Bool(false),
            Object::Bool(false),
            Object::Bool(false),
        ])
    );
}

#[test]
fn membership_tests() {
    let p = parser();
    let src = "d = {\"k\": 1}\nreturn [1 in [1, 2], 3 not in [1, 2], \"ell\" in \"hello\", \"k\" in d, \"z\" in d]\n";
    assert_eq!(
        eval(&p, "t.build", src),
        Object::List(vec![
            Object::Bool(true),
            Object::Bool(true),
            Object::Bool(true),
            Object::Bool(true),
            Object::Bool(false),
        ])
    );
}

#[test]
fn ternary_expressions() {
    let p = parser();
    assert_eq!(eval(&p, "t1.build", "return 1 if [] else 2\n"), Object::Int(2));
    assert_eq!(eval(&p, "t2.build", "return \"a\" + \"b\" if True else \"c\"\n"), Object::Str("ab".to_owned()));
}

#[test]
fn percent_formatting() {
    let p = parser();
    assert_eq!(
        eval(&p, "t.build", "return \"a %s b %d\" % [\"x\", 7]\n"),
        Object::Str("a x b 7".to_owned())
    );
    assert_eq!(
        eval(&p, "t2.build", "return \"v=%s\" % 3\n"),
        Object::Str("v=3".to_owned())
    );
}

#[test]
fn fstrings_resolve_variables_and_properties() {
    let p = parser();
    assert_eq!(
        eval(&p, "t.build", "name = \"world\"\nreturn f\"hello {name}!\"\n"),
        Object::Str("hello world!".to_owned())
    );
    assert_eq!(
        eval(&p, "t2.build", "d = {\"lang\": \"build\"}\nreturn f\"in {d.lang} files\"\n"),
        Object::Str("in build files".to_owned())
    );
    let err = p.eval_data(None, "return f\"{missing}\"\n", "t3.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Name);
}

#[test]
fn double_for_comprehension_with_filter() {
    let p = parser();
    let src = "return [x + y for x in [10, 20] for y in [1, 2] if x + y != 21]\n";
    assert_eq!(eval(&p, "t.build", src), ints(&[11, 12, 22]));
}

#[test]
fn dict_comprehension() {
    let p = parser();
    let src = "return {k: 1 for k in [\"b\", \"a\"]}\n";
    let Object::Dict(map) = eval(&p, "t.build", src) else {
        panic!("expected a dict");
    };
    assert_eq!(map.len(), 2);
    assert_eq!(map.get("a"), Some(&Object::Int(1)));
}

#[test]
fn destructuring_unpack() {
    let p = parser();
    assert_eq!(eval(&p, "t.build", "x, y = [1, 2]\nreturn x + y\n"), Object::Int(3));
    let err = p.eval_data(None, "x, y = [1, 2, 3]\n", "t2.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    let src = "total = 0\nfor k, v in [[1, 2], [3, 4]]:\n    total += k + v\nreturn total\n";
    assert_eq!(eval(&p, "t3.build", src), Object::Int(10));
}

#[test]
fn slicing_behaviour() {
    let p = parser();
    let src = "xs = [0, 1, 2, 3]\nreturn [xs[1:3], xs[:2], xs[2:], xs[-2:], xs[:], \"hello\"[1:3]]\n";
    assert_eq!(
        eval(&p, "t.build", src),
        Object::List(vec![
            ints(&[1, 2]),
            ints(&[0, 1]),
            ints(&[2, 3]),
            ints(&[2, 3]),
            ints(&[0, 1, 2, 3]),
            Object::Str("el".to_owned()),
        ])
    );
    let err = p.eval_data(None, "return [1][5]\n", "t2.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Value);
}

#[test]
fn negative_indexing() {
    let p = parser();
    assert_eq!(eval(&p, "t.build", "return [10, 20, 30][-1]\n"), Object::Int(30));
    assert_eq!(eval(&p, "t2.build", "return \"abc\"[-2]\n"), Object::Str("b".to_owned()));
}

#[test]
fn dict_attribute_access_equals_indexing() {
    let p = parser();
    let src = "d = {\"k\": 1}\nreturn [d.k, d[\"k\"]]\n";
    assert_eq!(eval(&p, "t.build", src), ints(&[1, 1]));
}

#[test]
fn index_assignment() {
    let p = parser();
    assert_eq!(
        eval(&p, "t.build", "xs = [1, 2]\nxs[0] = 5\nreturn xs\n"),
        ints(&[5, 2])
    );
    assert_eq!(
        eval(&p, "t2.build", "d = {}\nd[\"k\"] = 1\nd[\"k\"] += 2\nreturn d.k\n"),
        Object::Int(3)
    );
    let err = p.eval_data(None, "s = \"abc\"\ns[0] = \"x\"\n", "t3.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn lambdas_and_function_values() {
    let p = parser();
    assert_eq!(eval(&p, "t.build", "f = lambda x: x + 1\nreturn f(2)\n"), Object::Int(3));
    let src = "def add(a, b):\n    return a + b\ng = add\nreturn g(2, 3)\n";
    assert_eq!(eval(&p, "t2.build", src), Object::Int(5));
}

#[test]
fn closures_capture_their_defining_scope() {
    let p = parser();
    let src = "base = 10\ndef adder(x):\n    return base + x\nreturn adder(5)\n";
    assert_eq!(eval(&p, "t.build", src), Object::Int(15));
}

#[test]
fn varargs_and_kwargs() {
    let p = parser();
    assert_eq!(
        eval(&p, "t.build", "def f(*args):\n    return args\nreturn f(1, 2)\n"),
        ints(&[1, 2])
    );
    assert_eq!(
        eval(&p, "t2.build", "def f(**kwargs):\n    return kwargs.a\nreturn f(a = 1)\n"),
        Object::Int(1)
    );
}

#[test]
fn argument_aliases() {
    let p = parser();
    assert_eq!(
        eval(&p, "t.build", "def f(a & b):\n    return a\nreturn f(b = 3)\n"),
        Object::Int(3)
    );
}

#[test]
fn missing_and_unexpected_arguments() {
    let p = parser();
    let err = p
        .eval_data(None, "def f(a):\n    return a\nreturn f()\n", "t.build")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().contains("missing required argument"));
    let err = p
        .eval_data(None, "def f(a = 1):\n    return a\nreturn f(b = 2)\n", "t2.build")
        .unwrap_err();
    assert!(err.message().contains("unexpected argument"));
}

#[test]
fn mutable_defaults_are_safe() {
    let p = parser();
    let src = "def f(x = []):\n    x += [1]\n    return x\nreturn [f(), f()]\n";
    assert_eq!(eval(&p, "t.build", src), Object::List(vec![ints(&[1]), ints(&[1])]));
}

#[test]
fn return_type_is_enforced() {
    let p = parser();
    let err = p
        .eval_data(None, "def f() -> str:\n    return 1\nreturn f()\n", "t.build")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
    assert!(err.message().contains("invalid return value"));
}

#[test]
fn deep_equality() {
    let p = parser();
    let src = "return [[1, [2]] == [1, [2]], [1] == [2], \"a\" == \"a\", {\"k\": [1]} == {\"k\": [1]}]\n";
    assert_eq!(
        eval(&p, "t.build", src),
        Object::List(vec![
            Object::Bool(true),
            Object::Bool(false),
            Object::Bool(true),
            Object::Bool(true),
        ])
    );
}

#[test]
fn sorted_is_an_ordered_permutation() {
    let p = parser();
    assert_eq!(
        eval(&p, "t.build", "return sorted([3, 1, 2])\n"),
        ints(&[1, 2, 3])
    );
    assert_eq!(
        eval(&p, "t2.build", "return sorted([\"b\", \"a\"], reverse = True)\n"),
        strs(&["b", "a"])
    );
}

#[test]
fn control_flow_in_loops() {
    let p = parser();
    let src = "out = []\nfor i in range(10):\n    if i == 2:\n        continue\n    if i == 5:\n        break\n    out += [i]\nreturn out\n";
    assert_eq!(eval(&p, "t.build", src), ints(&[0, 1, 3, 4]));
}

#[test]
fn return_exits_a_loop() {
    let p = parser();
    let src = "def first(xs):\n    for x in xs:\n        return x\n    return None\nreturn first([7, 8])\n";
    assert_eq!(eval(&p, "t.build", src), Object::Int(7));
}

#[test]
fn undefined_name_is_a_name_error() {
    let p = parser();
    let err = p.eval_data(None, "return missing\n", "t.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Name);
    assert!(err.message().contains("missing"));
}

#[test]
fn calling_a_non_callable_is_a_domain_error() {
    let p = parser();
    let err = p.eval_data(None, "x = 1\nreturn x()\n", "t.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Domain);
}

#[test]
fn raise_is_deprecated_but_fails() {
    let p = parser();
    let err = p.eval_data(None, "raise \"boom\"\n", "t.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Domain);
    assert_eq!(err.message(), "boom");
}

#[test]
fn lexical_errors_surface_with_kind() {
    let p = parser();
    let err = p.eval_data(None, "if x:\n\tpass\n", "t.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lexical);
}

#[test]
fn config_reads_writes_and_copy_on_write() {
    let p = parser_with_config(&[("OS", Object::from("linux"))]);
    assert_eq!(eval(&p, "t.build", "return CONFIG.OS\n"), Object::Str("linux".to_owned()));
    assert_eq!(
        eval(&p, "t2.build", "CONFIG[\"EXTRA\"] = \"v\"\nreturn CONFIG.EXTRA\n"),
        Object::Str("v".to_owned())
    );
    // Writes do not leak into later evaluations: each gets a fresh overlay.
    let err = p.eval_data(None, "return CONFIG.EXTRA\n", "t3.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert_eq!(
        eval(&p, "t4.build", "return CONFIG.setdefault(\"N\", 4)\n"),
        Object::Int(4)
    );
    assert_eq!(
        eval(&p, "t5.build", "return CONFIG.get(\"MISSING\", \"dflt\")\n"),
        Object::Str("dflt".to_owned())
    );
}

#[test]
fn string_methods() {
    let p = parser();
    let src = "s = \"  Hello World  \"\nreturn [s.strip(), s.lstrip(), s.rstrip()]\n";
    assert_eq!(
        eval(&p, "t.build", src),
        strs(&["Hello World", "Hello World  ", "  Hello World"])
    );
    assert_eq!(
        eval(&p, "t2.build", "return \"a-b\".partition(\"-\")\n"),
        strs(&["a", "-", "b"])
    );
    assert_eq!(
        eval(&p, "t3.build", "return \"a-b-c\".rpartition(\"-\")\n"),
        strs(&["a-b", "-", "c"])
    );
    assert_eq!(
        eval(&p, "t4.build", "return [\"abcabc\".find(\"bc\"), \"abcabc\".rfind(\"bc\"), \"abc\".find(\"z\")]\n"),
        ints(&[1, 4, -1])
    );
    assert_eq!(
        eval(&p, "t5.build", "return \"{} and {name}\".format(1, name = \"x\")\n"),
        Object::Str("1 and x".to_owned())
    );
    assert_eq!(
        eval(&p, "t6.build", "return [\"aXbXc\".count(\"X\"), \"up\".upper(), \"DOWN\".lower()]\n"),
        Object::List(vec![
            Object::Int(2),
            Object::Str("UP".to_owned()),
            Object::Str("down".to_owned()),
        ])
    );
    assert_eq!(
        eval(&p, "t7.build", "return \"-\".join([\"a\", \"b\"])\n"),
        Object::Str("a-b".to_owned())
    );
    assert_eq!(
        eval(&p, "t8.build", "return \"one two\".replace(\"two\", \"2\")\n"),
        Object::Str("one 2".to_owned())
    );
    assert_eq!(
        eval(&p, "t9.build", "return [\"pre_x\".startswith(\"pre\"), \"x_post\".endswith(\"post\")]\n"),
        Object::List(vec![Object::Bool(true), Object::Bool(true)])
    );
}

#[test]
fn dict_methods() {
    let p = parser();
    let src = "d = {\"b\": 2, \"a\": 1}\nreturn [d.get(\"a\"), d.get(\"z\", 9), d.keys(), d.values(), d.items()]\n";
    assert_eq!(
        eval(&p, "t.build", src),
        Object::List(vec![
            Object::Int(1),
            Object::Int(9),
            strs(&["a", "b"]),
            ints(&[1, 2]),
            Object::List(vec![
                Object::List(vec![Object::Str("a".to_owned()), Object::Int(1)]),
                Object::List(vec![Object::Str("b".to_owned()), Object::Int(2)]),
            ]),
        ])
    );
    assert_eq!(
        eval(&p, "t2.build", "d = {}\nx = d.setdefault(\"k\", 1)\ny = d.setdefault(\"k\", 2)\nreturn [x, y]\n"),
        ints(&[1, 1])
    );
    let src = "a = {\"k\": 1}\nb = a.copy()\nb[\"k\"] = 2\nreturn [a.k, b.k]\n";
    assert_eq!(eval(&p, "t3.build", src), ints(&[1, 2]));
}

#[test]
fn implicit_string_concatenation_inside_brackets() {
    let p = parser();
    let src = "return [\"ab\"\n    \"cd\"]\n";
    assert_eq!(eval(&p, "t.build", src), strs(&["abcd"]));
}

#[test]
fn fstring_concatenation_with_plain_strings() {
    let p = parser();
    let src = "v = \"x\"\nreturn \"a \" f\"{v}\" \" b\"\n";
    assert_eq!(eval(&p, "t.build", src), Object::Str("a x b".to_owned()));
}

#[test]
fn tuples_evaluate_to_lists() {
    let p = parser();
    assert_eq!(eval(&p, "t.build", "return (1, 2)\n"), ints(&[1, 2]));
    assert_eq!(eval(&p, "t2.build", "return (1 + 2)\n"), Object::Int(3));
}

#[test]
fn unary_operators() {
    let p = parser();
    assert_eq!(eval(&p, "t.build", "x = 5\nreturn -x\n"), Object::Int(-5));
    assert_eq!(eval(&p, "t2.build", "return not []\n"), Object::Bool(true));
    let err = p.eval_data(None, "return -\"s\"\n", "t3.build").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}
