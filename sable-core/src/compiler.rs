//! Pipeline orchestration.
//!
//! A [`Session`] owns everything shared across compilation units: the
//! source map, the standard-library root, the set of already-imported
//! paths, and the side tables the generator consults across unit
//! boundaries (default-argument expressions, class field initializers,
//! layout identities). Each unit runs the full Lexer → Parser →
//! Generator pipeline; imports re-enter [`Session::import_unit`]
//! recursively, and a path is compiled at most once per session.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ast::Expr;
use crate::codegen::Generator;
use crate::error::CoreError;
use crate::ir::Module;
use crate::lexer;
use crate::parser;
use crate::source::SourceMap;
use crate::symbol::Value;
use crate::types::LayoutId;

pub struct Session {
    sources: SourceMap,
    stdlib_root: PathBuf,
    /// Exported symbols per already-compiled path. A path is registered
    /// (empty) before its unit compiles, so import cycles resolve to the
    /// in-progress unit instead of recursing forever.
    imported: HashMap<PathBuf, Vec<Value>>,
    /// Unit labels handed out so far; collisions get a numeric suffix.
    unit_labels: HashMap<String, u32>,
    /// Default-argument expressions per function symbol, indexed by
    /// parameter position. Call sites generate these when an argument is
    /// omitted, across unit boundaries.
    defaults: HashMap<String, Vec<Option<Expr>>>,
    /// Field initializer expressions per class layout, generated at each
    /// construction site before `new` runs.
    class_inits: HashMap<LayoutId, Vec<(usize, Expr)>>,
    next_layout: u32,
}

impl Session {
    pub fn new(stdlib_root: impl Into<PathBuf>) -> Session {
        let mut unit_labels = HashMap::new();
        // The entry unit always labels itself `main`.
        unit_labels.insert("main".to_string(), 1);
        Session {
            sources: SourceMap::new(),
            stdlib_root: stdlib_root.into(),
            imported: HashMap::new(),
            unit_labels,
            defaults: HashMap::new(),
            class_inits: HashMap::new(),
            next_layout: 0,
        }
    }

    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    pub(crate) fn stdlib_root(&self) -> &Path {
        &self.stdlib_root
    }

    /// Compile the program rooted at `path` into one linked module.
    pub fn compile_file(&mut self, path: &Path) -> Result<Module, CoreError> {
        let resolved = fs::canonicalize(path)?;
        let text = fs::read_to_string(&resolved)?;
        let (module, _) = self.compile_unit(resolved, text, true)?;
        Ok(module)
    }

    /// Compile in-memory source as the entry unit. Relative imports
    /// resolve against the current directory.
    pub fn compile_text(
        &mut self,
        name: &str,
        text: impl Into<String>,
    ) -> Result<Module, CoreError> {
        let (module, _) = self.compile_unit(PathBuf::from(name), text.into(), true)?;
        Ok(module)
    }

    /// Compile an imported path, or return its cached exports when the
    /// path was already processed in this session. `None` for the module
    /// means there is nothing new to link.
    pub(crate) fn import_unit(
        &mut self,
        path: &Path,
    ) -> Result<(Vec<Value>, Option<Module>), CoreError> {
        if let Some(exports) = self.imported.get(path) {
            return Ok((exports.clone(), None));
        }
        let text = fs::read_to_string(path)?;
        let (module, exports) = self.compile_unit(path.to_path_buf(), text, false)?;
        Ok((exports, Some(module)))
    }

    fn compile_unit(
        &mut self,
        path: PathBuf,
        text: String,
        entry: bool,
    ) -> Result<(Module, Vec<Value>), CoreError> {
        let unit = if entry {
            "main".to_string()
        } else {
            self.unit_label(&path)
        };
        self.imported.insert(path.clone(), Vec::new());

        let file = self.sources.add(path.clone(), text);
        let text = self.sources.text(file).to_string();
        let tokens = lexer::scan(file, &text)?;
        let ast = parser::parse(tokens)?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut generator = Generator::new(self, unit, dir, entry);
        generator.compile(&ast)?;
        let (module, exports) = generator.finish()?;
        self.imported.insert(path, exports.clone());
        Ok((module, exports))
    }

    fn unit_label(&mut self, path: &Path) -> String {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unit".to_string());
        let count = self.unit_labels.entry(stem.clone()).or_insert(0);
        let label = if *count == 0 {
            stem.clone()
        } else {
            format!("{stem}.{count}")
        };
        *count += 1;
        label
    }

    pub(crate) fn alloc_layout(&mut self) -> LayoutId {
        let id = LayoutId(self.next_layout);
        self.next_layout += 1;
        id
    }

    pub(crate) fn set_defaults(&mut self, symbol: String, defaults: Vec<Option<Expr>>) {
        self.defaults.insert(symbol, defaults);
    }

    pub(crate) fn defaults(&self, symbol: &str) -> Option<&[Option<Expr>]> {
        self.defaults.get(symbol).map(Vec::as_slice)
    }

    pub(crate) fn set_class_inits(&mut self, layout: LayoutId, inits: Vec<(usize, Expr)>) {
        self.class_inits.insert(layout, inits);
    }

    pub(crate) fn class_inits(&self, layout: LayoutId) -> &[(usize, Expr)] {
        self.class_inits
            .get(&layout)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{run, Outcome};

    fn compile(source: &str) -> Result<Module, CoreError> {
        Session::new("stdlib").compile_text("test.sbl", source)
    }

    fn execute(source: &str) -> Outcome {
        let module = compile(source).expect("compile");
        run(&module, "main").expect("run")
    }

    fn generation_error(source: &str) -> String {
        match compile(source) {
            Err(CoreError::Generate(d)) => d.message,
            Err(other) => panic!("expected a generation error, got {other:?}"),
            Ok(_) => panic!("expected a generation error, program compiled"),
        }
    }

    #[test]
    fn declaration_assignment_call_round_trip() {
        let outcome = execute("var y: int = 100\ny = 101\nexit(y)\n");
        assert_eq!(outcome.exit_code, 101);
    }

    #[test]
    fn falls_through_to_exit_code_zero() {
        let outcome = execute("print(7)\n");
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout, "7\n");
    }

    #[test]
    fn function_calls_and_arithmetic() {
        let source = "\
func add(a: int, b: int) -> int
    return a + b
exit(add(40, 2))
";
        assert_eq!(execute(source).exit_code, 42);
    }

    #[test]
    fn recursion_resolves_before_the_body_is_generated() {
        let source = "\
func fib(n: int) -> int
    if n < 2
        return n
    return fib(n - 1) + fib(n - 2)
exit(fib(10))
";
        assert_eq!(execute(source).exit_code, 55);
    }

    #[test]
    fn mutual_recursion_between_top_level_functions() {
        let source = "\
func is_even(n: int) -> bool
    if n == 0
        return true
    return is_odd(n - 1)
func is_odd(n: int) -> bool
    if n == 0
        return false
    return is_even(n - 1)
func check() -> int
    if is_even(10)
        return 1
    return 0
exit(check())
";
        assert_eq!(execute(source).exit_code, 1);
    }

    #[test]
    fn while_loop_with_break_and_continue() {
        let source = "\
func total() -> int
    var sum: int = 0
    var i: int = 0
    while true
        i = i + 1
        if i > 10
            break
        if i % 2 == 0
            continue
        sum = sum + i
    return sum
exit(total())
";
        assert_eq!(execute(source).exit_code, 25);
    }

    #[test]
    fn scope_shadowing_restores_the_outer_binding() {
        let source = "\
func probe() -> int
    var x: int = 1
    if true
        var x: int = 2
        print(x)
    return x
exit(probe())
";
        let outcome = execute(source);
        assert_eq!(outcome.stdout, "2\n");
        assert_eq!(outcome.exit_code, 1);
    }

    #[test]
    fn overload_resolution_is_deterministic() {
        let source = "\
func f(x: int) -> int
    return 1
func f(x: float) -> int
    return 2
print(f(3))
print(f(3.0))
";
        assert_eq!(execute(source).stdout, "1\n2\n");
    }

    #[test]
    fn unmatched_overload_is_a_signature_error() {
        let source = "\
func f(x: int) -> int
    return 1
f(\"x\")
";
        let message = generation_error(source);
        assert!(message.contains("no overload of `f`"), "{message}");
    }

    #[test]
    fn ambiguous_default_substitution_is_rejected() {
        let source = "\
func f(a: int, b: int = 1) -> int
    return 1
func f(a: int, b: float = 1.0) -> int
    return 2
f(3)
";
        let message = generation_error(source);
        assert!(message.contains("ambiguous call to `f`"), "{message}");
    }

    #[test]
    fn default_arguments_fill_missing_positions() {
        let source = "\
func scale(value: int, factor: int = 3) -> int
    return value * factor
print(scale(5))
print(scale(5, 2))
";
        assert_eq!(execute(source).stdout, "15\n10\n");
    }

    #[test]
    fn defers_replay_in_reverse_before_every_return() {
        let source = "\
func noisy(flag: bool) -> int
    defer print(1)
    defer print(2)
    if flag
        return 10
    return 20
print(noisy(true))
print(noisy(false))
";
        assert_eq!(execute(source).stdout, "2\n1\n10\n2\n1\n20\n");
    }

    #[test]
    fn defers_replay_at_fall_through_exit() {
        let source = "\
func noisy()
    defer print(1)
    defer print(2)
    print(3)
noisy()
";
        assert_eq!(execute(source).stdout, "3\n2\n1\n");
    }

    #[test]
    fn missing_return_is_detected_on_either_branch_order() {
        for source in [
            "func f(flag: bool) -> int\n    if flag\n        return 1\nf(true)\n",
            "func f(flag: bool) -> int\n    if flag\n        print(0)\n    else\n        return 1\nf(true)\n",
        ] {
            let message = generation_error(source);
            assert!(message.contains("missing a return"), "{message}");
        }
    }

    #[test]
    fn all_branches_returning_satisfies_the_check() {
        let source = "\
func pick(flag: bool) -> int
    if flag
        return 1
    else
        return 2
exit(pick(false))
";
        assert_eq!(execute(source).exit_code, 2);
    }

    #[test]
    fn return_type_must_match_exactly() {
        let source = "\
func f() -> float
    return 1
f()
";
        let message = generation_error(source);
        assert!(message.contains("return type mismatch"), "{message}");
    }

    #[test]
    fn top_level_return_is_rejected() {
        let message = generation_error("return 1\n");
        assert!(message.contains("not allowed at the top level"), "{message}");
    }

    #[test]
    fn break_outside_a_loop_is_rejected() {
        let message = generation_error("func f()\n    break\nf()\n");
        assert!(message.contains("`break` outside of a loop"), "{message}");
    }

    #[test]
    fn use_before_initialization_is_rejected() {
        let message = generation_error("var x: int\nprint(x)\n");
        assert!(message.contains("before it is initialized"), "{message}");
    }

    #[test]
    fn assignment_to_immutable_binding_is_rejected() {
        let message = generation_error("let x = 1\nx = 2\n");
        assert!(message.contains("immutable binding"), "{message}");
    }

    #[test]
    fn numeric_promotion_widens_mixed_operands() {
        let source = "\
var x: float = 1.5
var n: int = 2
print(x * (n as float))
print((n as float) + 0.5)
";
        assert_eq!(execute(source).stdout, "3\n2.5\n");
    }

    #[test]
    fn compound_assignment_desugars_to_the_operator() {
        let source = "\
var x: int = 10
x += 5
x *= 2
x -= 6
x /= 4
exit(x)
";
        assert_eq!(execute(source).exit_code, 6);
    }

    #[test]
    fn type_test_is_resolved_statically() {
        let source = "\
var x: int = 1
var f: float = 1.0
print(x is int)
print(x is float)
print(f is float)
";
        assert_eq!(execute(source).stdout, "true\nfalse\ntrue\n");
    }

    #[test]
    fn classes_construct_through_new_and_dispatch_methods() {
        let source = "\
class Point
    var x: int
    var y: int
    func new(x: int, y: int)
        self.x = x
        self.y = y
    func norm2() -> int
        return self.x * self.x + self.y * self.y
var p = Point(3, 4)
print(p.norm2())
p.x = 6
print(p.x)
var q = Point.new(1, 2)
print(q.y)
";
        assert_eq!(execute(source).stdout, "25\n6\n2\n");
    }

    #[test]
    fn let_fields_only_accept_writes_inside_the_constructor() {
        let source = "\
class Label
    let text: str
    func new(text: str)
        self.text = text
var l = Label(\"hi\")
print(l.text)
";
        assert_eq!(execute(source).stdout, "hi\n");

        let source = "\
class Point
    let x: int = 0
    func new()
        var t = 0
var p = Point()
p.x = 42
exit(p.x)
";
        let message = generation_error(source);
        assert!(message.contains("immutable"), "{message}");
    }

    #[test]
    fn class_instances_share_storage_by_reference() {
        let source = "\
class Box
    var value: int = 0
    func new()
        self.value = 1
var a = Box()
var b = a
b.value = 9
print(a.value)
print(a == b)
";
        assert_eq!(execute(source).stdout, "9\ntrue\n");
    }

    #[test]
    fn class_without_new_fails_generation() {
        let source = "\
class Empty
    var x: int = 0
print(1)
";
        let message = generation_error(source);
        assert!(message.contains("must declare a constructor"), "{message}");
    }

    #[test]
    fn enums_compare_by_discriminant() {
        let source = "\
enum Color
    Red
    Green
    Blue
var c = Color.Green
print(c == Color.Green)
print(c == Color.Blue)
print(c as int)
";
        assert_eq!(execute(source).stdout, "true\nfalse\n1\n");
    }

    #[test]
    fn references_read_and_write_through() {
        let source = "\
var x: int = 1
var r = &x
*r = 5
print(x)
print(*r + 1)
";
        assert_eq!(execute(source).stdout, "5\n6\n");
    }

    #[test]
    fn functions_cannot_capture_enclosing_variables() {
        let source = "\
var g: int = 1
func f() -> int
    return g
f()
";
        let message = generation_error(source);
        assert!(message.contains("cannot capture"), "{message}");
    }

    #[test]
    fn imports_compile_each_path_exactly_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("lib.sbl"),
            "export func triple(n: int) -> int\n    return n * 3\n",
        )
        .expect("write lib");
        std::fs::write(
            dir.path().join("mid.sbl"),
            "from \"lib.sbl\" import triple\nexport func six_times(n: int) -> int\n    return triple(triple(n))\n",
        )
        .expect("write mid");
        std::fs::write(
            dir.path().join("main.sbl"),
            "from \"lib.sbl\" import triple\nfrom \"mid.sbl\" import six_times\nexit(six_times(2) + triple(1))\n",
        )
        .expect("write main");

        // lib.sbl is reached twice (directly and through mid.sbl); a
        // second compilation would produce duplicate symbols at link.
        let mut session = Session::new("stdlib");
        let module = session
            .compile_file(&dir.path().join("main.sbl"))
            .expect("compile");
        assert_eq!(run(&module, "main").expect("run").exit_code, 21);
    }

    #[test]
    fn whole_module_import_binds_a_namespace() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("mathx.sbl"),
            "export func square(n: int) -> int\n    return n * n\n",
        )
        .expect("write");
        std::fs::write(
            dir.path().join("main.sbl"),
            "import \"mathx.sbl\" as m\nexit(m.square(7))\n",
        )
        .expect("write");

        let mut session = Session::new("stdlib");
        let module = session
            .compile_file(&dir.path().join("main.sbl"))
            .expect("compile");
        assert_eq!(run(&module, "main").expect("run").exit_code, 49);
    }

    #[test]
    fn selective_import_renames_with_as() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("lib.sbl"),
            "export func twice(n: int) -> int\n    return n * 2\n",
        )
        .expect("write");
        std::fs::write(
            dir.path().join("main.sbl"),
            "from \"lib.sbl\" import twice as dbl\nexit(dbl(8))\n",
        )
        .expect("write");

        let mut session = Session::new("stdlib");
        let module = session
            .compile_file(&dir.path().join("main.sbl"))
            .expect("compile");
        assert_eq!(run(&module, "main").expect("run").exit_code, 16);
    }

    #[test]
    fn missing_exported_member_is_reported_at_the_import() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("lib.sbl"),
            "export func twice(n: int) -> int\n    return n * 2\n",
        )
        .expect("write");
        std::fs::write(
            dir.path().join("main.sbl"),
            "from \"lib.sbl\" import thrice\n",
        )
        .expect("write");

        let mut session = Session::new("stdlib");
        let error = session
            .compile_file(&dir.path().join("main.sbl"))
            .expect_err("missing member");
        let message = error.diagnostic().expect("diagnostic").message.clone();
        assert!(message.contains("no exported member `thrice`"), "{message}");
    }

    #[test]
    fn failing_import_is_wrapped_with_the_importing_span() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("broken.sbl"), "func f(\n").expect("write");
        std::fs::write(
            dir.path().join("main.sbl"),
            "import \"broken.sbl\" as b\n",
        )
        .expect("write");

        let mut session = Session::new("stdlib");
        let error = session
            .compile_file(&dir.path().join("main.sbl"))
            .expect_err("broken import");
        match error {
            CoreError::Import { source, .. } => {
                assert!(matches!(*source, CoreError::Parse(_)));
            }
            other => panic!("expected an import error, got {other:?}"),
        }
    }

    #[test]
    fn imported_modules_may_not_run_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("lib.sbl"), "print(1)\n").expect("write");
        std::fs::write(
            dir.path().join("main.sbl"),
            "import \"lib.sbl\" as lib\n",
        )
        .expect("write");

        let mut session = Session::new("stdlib");
        let error = session
            .compile_file(&dir.path().join("main.sbl"))
            .expect_err("module with top-level code");
        match error {
            CoreError::Import { source, .. } => match *source {
                CoreError::Generate(d) => {
                    assert!(d.message.contains("may only declare"), "{}", d.message)
                }
                other => panic!("expected a generation error, got {other:?}"),
            },
            other => panic!("expected an import error, got {other:?}"),
        }
    }

    #[test]
    fn string_values_print_and_compare() {
        let source = "\
let greeting = \"hello\"
print(greeting)
print(greeting == \"hello\")
print(greeting != \"bye\")
";
        assert_eq!(execute(source).stdout, "hello\ntrue\ntrue\n");
    }

    #[test]
    fn for_loops_are_rejected_by_the_generator() {
        let source = "func f()\n    for x in y\n        print(1)\nf()\n";
        let message = generation_error(source);
        assert!(message.contains("`for` loops are not supported"), "{message}");
    }

    #[test]
    fn sized_integers_widen_and_narrowing_needs_a_cast() {
        let source = "\
var small: int8 = 100
var wide: int = small as int
print(wide + 1)
";
        assert_eq!(execute(source).stdout, "101\n");

        let message = generation_error("var wide: int = 300\nvar small: int8 = wide\n");
        assert!(message.contains("type mismatch"), "{message}");
    }
}
