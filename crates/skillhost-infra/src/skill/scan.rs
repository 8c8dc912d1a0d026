//! Static symbol lookup for entrypoint source files.
//!
//! The resolver never imports or executes bundle code to find a handler.
//! Instead these scanners read the top level of a source file and report
//! whether a name is bound there and whether it can be called with exactly
//! one positional argument (the input payload). They are line based, so a
//! name bound by `exec`, `globals()` or a star import is reported missing.

/// What a scan found for a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolScan {
    /// Bound at top level and callable as `symbol(input)`.
    Callable,
    /// Bound at top level but cannot be invoked as a handler.
    NotCallable(String),
    /// Not bound at top level.
    Missing,
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

/// Scan Python source for a top-level binding of `symbol`.
///
/// Recognizes `def`, `async def`, `class`, `lambda` assignments, plain
/// assignments and imports. When a name is bound more than once the last
/// binding wins, as it would at import time. Imported names and assignments
/// of anything but a literal (`functools.partial(...)`, an instance) are
/// assumed to be callable.
///
/// Bindings one level inside a top-level `try`, `if` or `with` block count
/// as top-level, whichever branch they are in. Anything nested deeper, and
/// `if __name__ == "__main__":` blocks, is not seen.
pub fn scan_python(source: &str, symbol: &str) -> SymbolScan {
    let lines: Vec<&str> = source.lines().collect();
    let mut result = SymbolScan::Missing;
    let mut in_string: Option<&str> = None;
    // Indentation of the guarded block being read, once known.
    let mut guarded: Option<Option<usize>> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        i += 1;

        if let Some(quote) = in_string {
            if line.matches(quote).count() % 2 == 1 {
                in_string = None;
            }
            continue;
        }

        let body = line.trim_start_matches([' ', '\t']);
        if body.trim().is_empty() || body.starts_with('#') {
            continue;
        }
        let indent = line.len() - body.len();
        if indent == 0 {
            guarded = opens_guarded_block(body).then_some(None);
        } else {
            let Some(level) = guarded.as_mut() else {
                continue;
            };
            if *level.get_or_insert(indent) != indent {
                continue;
            }
        }
        let line = body.trim_end();

        for quote in ["\"\"\"", "'''"] {
            if line.matches(quote).count() % 2 == 1 {
                in_string = Some(quote);
            }
        }

        if let Some(rest) = strip_keyword(line, "async").and_then(|r| strip_keyword(r, "def")) {
            if let Some(found) = scan_def(rest, symbol, &lines, &mut i) {
                result = found;
            }
        } else if let Some(rest) = strip_keyword(line, "def") {
            if let Some(found) = scan_def(rest, symbol, &lines, &mut i) {
                result = found;
            }
        } else if let Some(rest) = strip_keyword(line, "class") {
            if leading_identifier(rest) == Some(symbol) {
                result = SymbolScan::NotCallable("is a class, not a function".to_string());
            }
        } else if line.starts_with("import ") || line.starts_with("from ") {
            if imports_name(line, symbol) {
                result = SymbolScan::Callable;
            }
        } else if let Some(value) = assignment_value(line, symbol) {
            let lambda = value
                .strip_prefix("lambda")
                .filter(|rest| rest.starts_with([' ', ':']));
            result = match lambda {
                Some(lambda) => {
                    let params = lambda.split_once(':').map_or(lambda, |(p, _)| p);
                    check_params(params)
                }
                None if is_literal(value) => {
                    SymbolScan::NotCallable("is a value, not a function".to_string())
                }
                None => SymbolScan::Callable,
            };
        }
    }

    result
}

/// A top-level header whose block runs at import time.
fn opens_guarded_block(line: &str) -> bool {
    let header = line.split('#').next().unwrap_or(line).trim_end();
    let Some(keyword) = leading_identifier(header) else {
        return false;
    };
    header.ends_with(':')
        && matches!(keyword, "if" | "elif" | "else" | "try" | "except" | "finally" | "with")
        && !header.contains("__name__")
}

/// Whether an assigned value is a literal (and so certainly not callable).
fn is_literal(value: &str) -> bool {
    let unprefixed = value.trim_start_matches(['r', 'b', 'f', 'u', 'R', 'B', 'F', 'U']);
    let prefixed_string = value.len() - unprefixed.len() <= 2 && unprefixed.starts_with(['"', '\'']);
    let numeric = value
        .trim_start_matches(['-', '+'])
        .starts_with(|c: char| c.is_ascii_digit() || c == '.');
    prefixed_string
        || numeric
        || value.starts_with(['[', '{', '('])
        || matches!(value, "None" | "True" | "False" | "...")
}

/// `rest` is the text after `def`. Returns the scan when the def binds `symbol`.
fn scan_def(rest: &str, symbol: &str, lines: &[&str], next: &mut usize) -> Option<SymbolScan> {
    let name = leading_identifier(rest)?;
    let after_name = rest[name.len()..].trim_start();
    let open = after_name.strip_prefix('(')?;

    // Parameter lists may span lines; collect until the parens balance.
    let mut params = String::new();
    let mut depth = 1usize;
    let mut chunk = open.to_string();
    loop {
        for ch in chunk.chars() {
            match ch {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            params.push(ch);
        }
        if depth == 0 || *next >= lines.len() {
            break;
        }
        params.push(' ');
        chunk = lines[*next].trim().to_string();
        *next += 1;
    }

    if name != symbol {
        return None;
    }
    Some(check_params(&params))
}

/// Decide whether a parameter list accepts exactly one positional argument.
fn check_params(params: &str) -> SymbolScan {
    let mut required_positional = 0usize;
    let mut positional = 0usize;
    let mut var_positional = false;
    let mut keyword_only = false;
    let mut required_keyword = Vec::new();

    for raw in split_top_level(params) {
        let param = raw.trim();
        if param.is_empty() || param == "/" {
            continue;
        }
        if param.starts_with("**") {
            continue;
        }
        if let Some(star) = param.strip_prefix('*') {
            keyword_only = true;
            if !star.trim().is_empty() {
                var_positional = true;
            }
            continue;
        }

        let has_default = has_top_level(param, '=');
        if keyword_only {
            if !has_default {
                required_keyword.push(param_name(param).to_string());
            }
        } else {
            positional += 1;
            if !has_default {
                required_positional += 1;
            }
        }
    }

    if let Some(name) = required_keyword.first() {
        return SymbolScan::NotCallable(format!("requires keyword-only argument '{name}'"));
    }
    if required_positional > 1 {
        return SymbolScan::NotCallable(format!(
            "takes {required_positional} required arguments, expected 1"
        ));
    }
    if positional == 0 && !var_positional {
        return SymbolScan::NotCallable("takes no arguments, expected 1".to_string());
    }
    SymbolScan::Callable
}

fn split_top_level(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (idx, ch) in params.char_indices() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&params[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&params[start..]);
    parts
}

fn has_top_level(text: &str, needle: char) -> bool {
    let mut depth = 0i32;
    for ch in text.chars() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == needle && depth == 0 => return true,
            _ => {}
        }
    }
    false
}

fn param_name(param: &str) -> &str {
    leading_identifier(param).unwrap_or(param)
}

fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    rest.starts_with([' ', '\t']).then(|| rest.trim_start())
}

fn leading_identifier(text: &str) -> Option<&str> {
    let end = text
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(text.len(), |(idx, _)| idx);
    let ident = &text[..end];
    let starts_ok = ident
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_');
    starts_ok.then_some(ident)
}

/// Right-hand side of `symbol = value` or `symbol: T = value`.
fn assignment_value<'a>(line: &'a str, symbol: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(symbol)?.trim_start();
    let rest = match rest.strip_prefix(':') {
        Some(annotated) => annotated.split_once('=')?.1,
        None => rest.strip_prefix('=')?,
    };
    // Reject `==` comparisons.
    (!rest.starts_with('=')).then(|| rest.trim())
}

fn imports_name(line: &str, symbol: &str) -> bool {
    let names = if let Some(rest) = line.strip_prefix("from ") {
        match rest.split_once(" import ") {
            Some((_, names)) => names,
            None => return false,
        }
    } else {
        line.trim_start_matches("import ")
    };

    names
        .trim_matches(|c| c == '(' || c == ')' || c == ' ')
        .split(',')
        .any(|item| {
            let item = item.trim();
            let bound = match item.split_once(" as ") {
                Some((_, alias)) => alias.trim(),
                // `import a.b` binds `a`.
                None => item.split('.').next().unwrap_or(item),
            };
            bound == symbol
        })
}

// ---------------------------------------------------------------------------
// Shell
// ---------------------------------------------------------------------------

/// Scan shell source for a function named `symbol`.
///
/// Accepts `name() {`, `name () {` and `function name [()] {` forms. Shell
/// functions always accept arguments, so a definition is always callable.
pub fn scan_shell(source: &str, symbol: &str) -> SymbolScan {
    let defined = source.lines().any(|line| {
        let line = line.trim_start();
        if line.starts_with('#') {
            return false;
        }
        let (rest, keyword) = match strip_keyword(line, "function") {
            Some(rest) => (rest, true),
            None => (line, false),
        };
        let Some(name) = shell_identifier(rest) else {
            return false;
        };
        if name != symbol {
            return false;
        }
        let after = rest[name.len()..].trim_start();
        after.starts_with("()") || after.starts_with("( )") || (keyword && !after.starts_with('='))
    });

    if defined {
        SymbolScan::Callable
    } else {
        SymbolScan::Missing
    }
}

fn shell_identifier(text: &str) -> Option<&str> {
    let end = text
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '-'))
        .map_or(text.len(), |(idx, _)| idx);
    (end > 0).then(|| &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_callable(scan: SymbolScan) -> String {
        match scan {
            SymbolScan::NotCallable(reason) => reason,
            other => panic!("expected NotCallable, got {other:?}"),
        }
    }

    #[test]
    fn finds_async_and_sync_defs() {
        let source = "import json\n\nasync def run(input_payload):\n    return {}\n\ndef helper(x):\n    pass\n";
        assert_eq!(scan_python(source, "run"), SymbolScan::Callable);
        assert_eq!(scan_python(source, "helper"), SymbolScan::Callable);
        assert_eq!(scan_python(source, "missing"), SymbolScan::Missing);
    }

    #[test]
    fn nested_defs_are_not_top_level() {
        let source = "def outer(x):\n    def run(y):\n        pass\n    return run\n";
        assert_eq!(scan_python(source, "run"), SymbolScan::Missing);
    }

    #[test]
    fn constant_is_not_callable() {
        let source = "CONSTANT = 42\nNAME: str = 'x'\n";
        assert!(not_callable(scan_python(source, "CONSTANT")).contains("value"));
        assert!(not_callable(scan_python(source, "NAME")).contains("value"));
    }

    #[test]
    fn class_is_not_callable() {
        let source = "class Handler:\n    pass\n";
        assert!(not_callable(scan_python(source, "Handler")).contains("class"));
    }

    #[test]
    fn arity_rules() {
        let cases = [
            ("def f(a): pass", true),
            ("def f(a, b=1): pass", true),
            ("def f(*args): pass", true),
            ("def f(a, **kw): pass", true),
            ("def f(a: dict[str, int] = {}, /): pass", true),
            ("def f(): pass", false),
            ("def f(a, b): pass", false),
            ("def f(a, *, key): pass", false),
            ("def f(**kw): pass", false),
        ];
        for (source, callable) in cases {
            let scan = scan_python(source, "f");
            assert_eq!(scan == SymbolScan::Callable, callable, "{source}: {scan:?}");
        }
    }

    #[test]
    fn multi_line_parameter_list() {
        let source = "def run(\n    payload,\n    extra,\n):\n    pass\n";
        assert!(not_callable(scan_python(source, "run")).contains("2 required"));
    }

    #[test]
    fn lambda_assignment_is_checked() {
        assert_eq!(scan_python("run = lambda p: p\n", "run"), SymbolScan::Callable);
        assert!(not_callable(scan_python("run = lambda: 1\n", "run")).contains("no arguments"));
    }

    #[test]
    fn last_binding_wins() {
        let source = "def run(p):\n    pass\n\nrun = None\n";
        assert!(matches!(scan_python(source, "run"), SymbolScan::NotCallable(_)));

        let source = "run = None\n\ndef run(p):\n    pass\n";
        assert_eq!(scan_python(source, "run"), SymbolScan::Callable);
    }

    #[test]
    fn imported_names_are_trusted() {
        let source = "from helpers.core import process as run, other\nimport os.path\n";
        assert_eq!(scan_python(source, "run"), SymbolScan::Callable);
        assert_eq!(scan_python(source, "other"), SymbolScan::Callable);
        assert_eq!(scan_python(source, "os"), SymbolScan::Callable);
        assert_eq!(scan_python(source, "process"), SymbolScan::Missing);
    }

    #[test]
    fn non_literal_assignments_are_trusted() {
        let source = "import functools\n\nrun = functools.partial(process, mode='fast')\nhandler = Handler()\nLIMIT = -3\nNAMES = ['a']\nGREETING = f'hi'\nEMPTY = None\n";
        assert_eq!(scan_python(source, "run"), SymbolScan::Callable);
        assert_eq!(scan_python(source, "handler"), SymbolScan::Callable);
        for name in ["LIMIT", "NAMES", "GREETING", "EMPTY"] {
            assert!(not_callable(scan_python(source, name)).contains("value"), "{name}");
        }
    }

    #[test]
    fn bindings_in_top_level_try_and_if_blocks() {
        let source = "try:\n    from fast_impl import run\nexcept ImportError:\n    def run(payload):\n        import slow\n        return slow.run(payload)\n\nif USE_V2:\n    handle = make_handler()\n    if DEBUG:\n        nested = make_handler()\n";
        assert_eq!(scan_python(source, "run"), SymbolScan::Callable);
        assert_eq!(scan_python(source, "handle"), SymbolScan::Callable);
        assert_eq!(scan_python(source, "slow"), SymbolScan::Missing);
        assert_eq!(scan_python(source, "nested"), SymbolScan::Missing);
    }

    #[test]
    fn main_guard_is_not_a_binding_site() {
        let source = "if __name__ == \"__main__\":\n    def run(payload):\n        pass\n";
        assert_eq!(scan_python(source, "run"), SymbolScan::Missing);
    }

    #[test]
    fn docstrings_are_skipped() {
        let source = "\"\"\"\ndef run(p):\n\"\"\"\n";
        assert_eq!(scan_python(source, "run"), SymbolScan::Missing);
    }

    #[test]
    fn shell_function_forms() {
        let source = "#!/bin/bash\nrun() {\n  cat\n}\nfunction greet {\n  echo hi\n}\nfunction other() { :; }\n# fake() {\n";
        assert_eq!(scan_shell(source, "run"), SymbolScan::Callable);
        assert_eq!(scan_shell(source, "greet"), SymbolScan::Callable);
        assert_eq!(scan_shell(source, "other"), SymbolScan::Callable);
        assert_eq!(scan_shell(source, "fake"), SymbolScan::Missing);
        assert_eq!(scan_shell("run=1\n", "run"), SymbolScan::Missing);
    }
}
