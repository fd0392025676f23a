//! AST-based static analyzer for guest Python code.

use std::collections::HashSet;

use rustpython_parser::{ast, parse, Mode};
use serde::{Deserialize, Serialize};

// =============================================================================
// Banned Constructs
// =============================================================================

/// Dynamic-execution primitives. Always an error, independent of the
/// import allowlist.
const DYNAMIC_EXEC_BUILTINS: &[&str] = &["eval", "exec", "compile", "__import__"];

/// OS-level file/process builtins not mediated by an allowed module.
const UNMEDIATED_BUILTINS: &[&str] = &["open", "globals", "locals", "vars", "breakpoint"];

/// Attributes that reach out of the guest object model (reflection into
/// base classes, frame globals, code objects).
const ESCAPE_HATCH_ATTRS: &[&str] = &[
    "__subclasses__",
    "__bases__",
    "__mro__",
    "__globals__",
    "__builtins__",
    "__code__",
    "__getattribute__",
    "__reduce__",
    "__reduce_ex__",
];

/// Dynamic attribute access. Recorded as a warning, not a gate.
const DYNAMIC_ATTR_BUILTINS: &[&str] = &["getattr", "setattr", "delattr"];

// =============================================================================
// Validation Result
// =============================================================================

/// Outcome of one validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the code may be executed.
    pub is_valid: bool,
    /// Blocking violations. Non-empty iff `is_valid` is false.
    pub errors: Vec<String>,
    /// Non-fatal findings for operators; never block execution.
    pub warnings: Vec<String>,
}

// =============================================================================
// Code Validator
// =============================================================================

/// Static analyzer gating guest code against an import allowlist and a
/// banned-construct list.
#[derive(Debug, Clone)]
pub struct CodeValidator {
    allowed_imports: HashSet<String>,
}

impl CodeValidator {
    /// Create a validator for the given set of allowed root module names.
    pub fn new(allowed_imports: HashSet<String>) -> Self {
        Self { allowed_imports }
    }

    /// Validate one piece of guest code.
    ///
    /// Malformed code never reaches a sandbox: a parse failure yields a
    /// single error describing the syntax problem.
    pub fn validate(&self, code: &str) -> ValidationResult {
        let module = match parse(code, Mode::Module, "<guest>") {
            Ok(ast::Mod::Module(module)) => module,
            Ok(_) => {
                return ValidationResult {
                    is_valid: false,
                    errors: vec!["code did not parse as a module".into()],
                    warnings: Vec::new(),
                }
            }
            Err(e) => {
                return ValidationResult {
                    is_valid: false,
                    errors: vec![format!("syntax error: {e}")],
                    warnings: Vec::new(),
                }
            }
        };

        let mut report = Report::default();
        for stmt in &module.body {
            self.walk_stmt(stmt, &mut report);
        }

        ValidationResult {
            is_valid: report.errors.is_empty(),
            errors: report.errors,
            warnings: report.warnings,
        }
    }

    // =========================================================================
    // Statement Walk
    // =========================================================================

    fn walk_stmt(&self, stmt: &ast::Stmt, report: &mut Report) {
        match stmt {
            ast::Stmt::Import(import) => {
                for alias in &import.names {
                    self.check_import(alias.name.as_str(), report);
                }
            }
            ast::Stmt::ImportFrom(import) => {
                let level = import.level.as_ref().map(|l| l.to_u32()).unwrap_or(0);
                if level > 0 {
                    report.errors.push(
                        "relative imports are not allowed: there is no package context inside the sandbox"
                            .into(),
                    );
                } else if let Some(module) = &import.module {
                    self.check_import(module.as_str(), report);
                }
            }
            ast::Stmt::FunctionDef(def) => {
                self.walk_body(&def.body, report);
                self.walk_exprs(&def.decorator_list, report);
            }
            ast::Stmt::AsyncFunctionDef(def) => {
                self.walk_body(&def.body, report);
                self.walk_exprs(&def.decorator_list, report);
            }
            ast::Stmt::ClassDef(def) => {
                self.walk_exprs(&def.bases, report);
                for keyword in &def.keywords {
                    self.walk_expr(&keyword.value, report);
                }
                self.walk_body(&def.body, report);
                self.walk_exprs(&def.decorator_list, report);
            }
            ast::Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    self.walk_expr(value, report);
                }
            }
            ast::Stmt::Delete(del) => self.walk_exprs(&del.targets, report),
            ast::Stmt::Assign(assign) => {
                self.walk_exprs(&assign.targets, report);
                self.walk_expr(&assign.value, report);
            }
            ast::Stmt::AugAssign(assign) => {
                self.walk_expr(&assign.target, report);
                self.walk_expr(&assign.value, report);
            }
            ast::Stmt::AnnAssign(assign) => {
                self.walk_expr(&assign.target, report);
                if let Some(value) = &assign.value {
                    self.walk_expr(value, report);
                }
            }
            ast::Stmt::For(stmt) => {
                self.walk_expr(&stmt.target, report);
                self.walk_expr(&stmt.iter, report);
                self.walk_body(&stmt.body, report);
                self.walk_body(&stmt.orelse, report);
            }
            ast::Stmt::AsyncFor(stmt) => {
                self.walk_expr(&stmt.target, report);
                self.walk_expr(&stmt.iter, report);
                self.walk_body(&stmt.body, report);
                self.walk_body(&stmt.orelse, report);
            }
            ast::Stmt::While(stmt) => {
                if is_const_true(&stmt.test) && !contains_break(&stmt.body) {
                    report.warnings.push(
                        "unbounded loop: 'while True' with no reachable 'break' relies on the deadline to terminate"
                            .into(),
                    );
                }
                self.walk_expr(&stmt.test, report);
                self.walk_body(&stmt.body, report);
                self.walk_body(&stmt.orelse, report);
            }
            ast::Stmt::If(stmt) => {
                self.walk_expr(&stmt.test, report);
                self.walk_body(&stmt.body, report);
                self.walk_body(&stmt.orelse, report);
            }
            ast::Stmt::With(stmt) => {
                for item in &stmt.items {
                    self.walk_expr(&item.context_expr, report);
                }
                self.walk_body(&stmt.body, report);
            }
            ast::Stmt::AsyncWith(stmt) => {
                for item in &stmt.items {
                    self.walk_expr(&item.context_expr, report);
                }
                self.walk_body(&stmt.body, report);
            }
            ast::Stmt::Match(stmt) => {
                self.walk_expr(&stmt.subject, report);
                for case in &stmt.cases {
                    if let Some(guard) = &case.guard {
                        self.walk_expr(guard, report);
                    }
                    self.walk_body(&case.body, report);
                }
            }
            ast::Stmt::Raise(stmt) => {
                if let Some(exc) = &stmt.exc {
                    self.walk_expr(exc, report);
                }
                if let Some(cause) = &stmt.cause {
                    self.walk_expr(cause, report);
                }
            }
            ast::Stmt::Try(stmt) => {
                self.walk_body(&stmt.body, report);
                for handler in &stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    if let Some(type_) = &handler.type_ {
                        self.walk_expr(type_, report);
                    }
                    self.walk_body(&handler.body, report);
                }
                self.walk_body(&stmt.orelse, report);
                self.walk_body(&stmt.finalbody, report);
            }
            ast::Stmt::TryStar(stmt) => {
                self.walk_body(&stmt.body, report);
                for handler in &stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    if let Some(type_) = &handler.type_ {
                        self.walk_expr(type_, report);
                    }
                    self.walk_body(&handler.body, report);
                }
                self.walk_body(&stmt.orelse, report);
                self.walk_body(&stmt.finalbody, report);
            }
            ast::Stmt::Assert(stmt) => {
                self.walk_expr(&stmt.test, report);
                if let Some(msg) = &stmt.msg {
                    self.walk_expr(msg, report);
                }
            }
            ast::Stmt::Expr(stmt) => self.walk_expr(&stmt.value, report),
            _ => {}
        }
    }

    fn walk_body(&self, body: &[ast::Stmt], report: &mut Report) {
        for stmt in body {
            self.walk_stmt(stmt, report);
        }
    }

    fn check_import(&self, dotted: &str, report: &mut Report) {
        let root = dotted.split('.').next().unwrap_or(dotted);
        if !self.allowed_imports.contains(root) {
            report.errors.push(format!(
                "import of module '{root}' is not allowed (statement imports '{dotted}')"
            ));
        }
    }

    // =========================================================================
    // Expression Walk
    // =========================================================================

    fn walk_exprs(&self, exprs: &[ast::Expr], report: &mut Report) {
        for expr in exprs {
            self.walk_expr(expr, report);
        }
    }

    fn walk_expr(&self, expr: &ast::Expr, report: &mut Report) {
        match expr {
            ast::Expr::Name(name) => {
                let id = name.id.as_str();
                if DYNAMIC_EXEC_BUILTINS.contains(&id) {
                    report.errors.push(format!(
                        "use of dynamic-execution primitive '{id}' is not allowed"
                    ));
                } else if UNMEDIATED_BUILTINS.contains(&id) {
                    report
                        .errors
                        .push(format!("use of builtin '{id}' is not allowed"));
                } else if DYNAMIC_ATTR_BUILTINS.contains(&id) {
                    report
                        .warnings
                        .push(format!("dynamic attribute access via '{id}'"));
                }
            }
            ast::Expr::Attribute(attr) => {
                let name = attr.attr.as_str();
                if ESCAPE_HATCH_ATTRS.contains(&name) {
                    report
                        .errors
                        .push(format!("access to attribute '{name}' is not allowed"));
                }
                self.walk_expr(&attr.value, report);
            }
            ast::Expr::Call(call) => {
                self.walk_expr(&call.func, report);
                self.walk_exprs(&call.args, report);
                for keyword in &call.keywords {
                    self.walk_expr(&keyword.value, report);
                }
            }
            ast::Expr::BoolOp(op) => self.walk_exprs(&op.values, report),
            ast::Expr::NamedExpr(named) => {
                self.walk_expr(&named.target, report);
                self.walk_expr(&named.value, report);
            }
            ast::Expr::BinOp(op) => {
                self.walk_expr(&op.left, report);
                self.walk_expr(&op.right, report);
            }
            ast::Expr::UnaryOp(op) => self.walk_expr(&op.operand, report),
            ast::Expr::Lambda(lambda) => self.walk_expr(&lambda.body, report),
            ast::Expr::IfExp(ifexp) => {
                self.walk_expr(&ifexp.test, report);
                self.walk_expr(&ifexp.body, report);
                self.walk_expr(&ifexp.orelse, report);
            }
            ast::Expr::Dict(dict) => {
                for key in dict.keys.iter().flatten() {
                    self.walk_expr(key, report);
                }
                self.walk_exprs(&dict.values, report);
            }
            ast::Expr::Set(set) => self.walk_exprs(&set.elts, report),
            ast::Expr::ListComp(comp) => {
                self.walk_expr(&comp.elt, report);
                self.walk_generators(&comp.generators, report);
            }
            ast::Expr::SetComp(comp) => {
                self.walk_expr(&comp.elt, report);
                self.walk_generators(&comp.generators, report);
            }
            ast::Expr::DictComp(comp) => {
                self.walk_expr(&comp.key, report);
                self.walk_expr(&comp.value, report);
                self.walk_generators(&comp.generators, report);
            }
            ast::Expr::GeneratorExp(comp) => {
                self.walk_expr(&comp.elt, report);
                self.walk_generators(&comp.generators, report);
            }
            ast::Expr::Await(await_) => self.walk_expr(&await_.value, report),
            ast::Expr::Yield(yield_) => {
                if let Some(value) = &yield_.value {
                    self.walk_expr(value, report);
                }
            }
            ast::Expr::YieldFrom(yield_) => self.walk_expr(&yield_.value, report),
            ast::Expr::Compare(cmp) => {
                self.walk_expr(&cmp.left, report);
                self.walk_exprs(&cmp.comparators, report);
            }
            ast::Expr::FormattedValue(fmt) => self.walk_expr(&fmt.value, report),
            ast::Expr::JoinedStr(joined) => self.walk_exprs(&joined.values, report),
            ast::Expr::Subscript(sub) => {
                self.walk_expr(&sub.value, report);
                self.walk_expr(&sub.slice, report);
            }
            ast::Expr::Starred(starred) => self.walk_expr(&starred.value, report),
            ast::Expr::List(list) => self.walk_exprs(&list.elts, report),
            ast::Expr::Tuple(tuple) => self.walk_exprs(&tuple.elts, report),
            ast::Expr::Slice(slice) => {
                if let Some(lower) = &slice.lower {
                    self.walk_expr(lower, report);
                }
                if let Some(upper) = &slice.upper {
                    self.walk_expr(upper, report);
                }
                if let Some(step) = &slice.step {
                    self.walk_expr(step, report);
                }
            }
            _ => {}
        }
    }

    fn walk_generators(&self, generators: &[ast::Comprehension], report: &mut Report) {
        for generator in generators {
            self.walk_expr(&generator.target, report);
            self.walk_expr(&generator.iter, report);
            self.walk_exprs(&generator.ifs, report);
        }
    }
}

#[derive(Default)]
struct Report {
    errors: Vec<String>,
    warnings: Vec<String>,
}

fn is_const_true(expr: &ast::Expr) -> bool {
    matches!(
        expr,
        ast::Expr::Constant(c) if matches!(c.value, ast::Constant::Bool(true))
    )
}

// A `break` in a nested loop binds to that loop, so the scan does not
// descend into inner loops or function definitions.
fn contains_break(body: &[ast::Stmt]) -> bool {
    body.iter().any(|stmt| match stmt {
        ast::Stmt::Break(_) => true,
        ast::Stmt::If(s) => contains_break(&s.body) || contains_break(&s.orelse),
        ast::Stmt::With(s) => contains_break(&s.body),
        ast::Stmt::AsyncWith(s) => contains_break(&s.body),
        ast::Stmt::Try(s) => {
            contains_break(&s.body)
                || s.handlers.iter().any(|handler| {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    contains_break(&handler.body)
                })
                || contains_break(&s.orelse)
                || contains_break(&s.finalbody)
        }
        ast::Stmt::Match(s) => s.cases.iter().any(|case| contains_break(&case.body)),
        _ => false,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> CodeValidator {
        CodeValidator::new(
            ["json", "math", "re", "collections"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }

    #[test]
    fn test_valid_code_passes() {
        let result = validator().validate("print(2 + 2)");
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_syntax_error_fails_closed() {
        let result = validator().validate("def broken(:\n    pass");
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("syntax error"));
    }

    #[test]
    fn test_disallowed_import_names_the_module() {
        let result = validator().validate("import os\nos.system('echo hi')");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("'os'")));
    }

    #[test]
    fn test_allowlisted_imports_pass() {
        let code = "import json\nimport math\nprint(json.dumps({'pi': math.pi}))";
        let result = validator().validate(code);
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_submodule_import_is_gated_by_root() {
        let result = validator().validate("import collections.abc");
        assert!(result.is_valid);

        let result = validator().validate("import xml.etree.ElementTree");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("'xml'")));
    }

    #[test]
    fn test_from_import_is_gated() {
        let result = validator().validate("from subprocess import run");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("'subprocess'")));

        let result = validator().validate("from json import dumps");
        assert!(result.is_valid);
    }

    #[test]
    fn test_relative_import_is_rejected() {
        let result = validator().validate("from . import secrets");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("relative")));
    }

    #[test]
    fn test_dynamic_execution_primitives_are_always_errors() {
        for code in [
            "eval('1 + 1')",
            "exec('x = 1')",
            "compile('x', '<s>', 'exec')",
            "__import__('os')",
        ] {
            let result = validator().validate(code);
            assert!(!result.is_valid, "should reject: {code}");
        }
    }

    #[test]
    fn test_aliased_primitive_is_caught() {
        let result = validator().validate("f = eval\nf('1 + 1')");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("'eval'")));
    }

    #[test]
    fn test_primitive_nested_in_fstring_is_caught() {
        let result = validator().validate("x = f\"{eval('2 + 2')}\"");
        assert!(!result.is_valid);
    }

    #[test]
    fn test_unmediated_builtins_are_errors() {
        let result = validator().validate("f = open('/etc/passwd')");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("'open'")));
    }

    #[test]
    fn test_escape_hatch_attributes_are_errors() {
        let result = validator().validate("().__class__.__bases__[0].__subclasses__()");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("__subclasses__")));
    }

    #[test]
    fn test_banned_call_inside_function_body_is_caught() {
        let code = "def helper():\n    return eval('1')\n";
        let result = validator().validate(code);
        assert!(!result.is_valid);
    }

    #[test]
    fn test_while_true_without_break_is_a_warning_not_an_error() {
        let result = validator().validate("while True: pass");
        assert!(result.is_valid, "warnings must not gate execution");
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("unbounded loop"));
    }

    #[test]
    fn test_while_true_with_break_is_clean() {
        let code = "while True:\n    if done():\n        break\n";
        let result = validator().validate(code);
        assert!(result.is_valid);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_getattr_is_a_warning() {
        let result = validator().validate("value = getattr(obj, 'field')");
        assert!(result.is_valid);
        assert!(result.warnings.iter().any(|w| w.contains("'getattr'")));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let code = "import os\neval('1')\nwhile True: pass";
        let first = validator().validate(code);
        let second = validator().validate(code);
        assert_eq!(first.is_valid, second.is_valid);
        assert_eq!(first.errors, second.errors);
        assert_eq!(first.warnings, second.warnings);
    }
}
