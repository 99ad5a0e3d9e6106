//! Single-file bundler for browser previews.
//!
//! Walks the static import graph of an entry module and emits one
//! self-executing script with an embedded CommonJS-style module table, so the
//! sandboxed surface can load it with a plain `<script>` tag.
//!
//! Supported module syntax, resolved relative to the importing file:
//! - `import x from "./m"`, `import { a, b as c } from "./m"`,
//!   `import * as ns from "./m"`, `import "./m"`
//! - `export default expr`, `export function|class name`,
//!   `export const|let|var a = 1, b = 2`, `export { a, b as c }`,
//!   `export { a } from "./m"`, `export * from "./m"`
//! - `require("./m")`
//!
//! Matches inside comments and string, template or regex literals are left
//! alone. Bare package specifiers are rejected; there is no node_modules
//! lookup. Any `import`/`export` statement left after rewriting (for example
//! a destructuring export) fails the build instead of producing a script
//! that cannot run.

mod scan;

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};

use self::scan::{declared_names, in_code, literal_ranges, DeclError};

use crate::containment::ProjectRoot;
use crate::error::{Result, VistaError};

/// Extensions tried, in order, when a specifier names no existing file.
const RESOLVE_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "json"];
const INDEX_FILES: &[&str] = &["index.js", "index.mjs"];

/// Upper bound on modules in a single bundle.
const MAX_MODULES: usize = 5_000;

/// Reject any byte outside 7-bit ASCII.
///
/// Bundles are served to the sandbox as ASCII-only scripts; non-ASCII source
/// is refused rather than re-encoded.
pub fn assert_ascii(source: &[u8], module_id: &str) -> Result<()> {
    let Some(offset) = source.iter().position(|b| !b.is_ascii()) else {
        return Ok(());
    };
    let before = &source[..offset];
    let line = before.iter().filter(|b| **b == b'\n').count() + 1;
    let column = offset - before.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1) + 1;
    Err(VistaError::Input(format!(
        "non-ASCII byte 0x{:02X} in {module_id} at line {line}, column {column}",
        source[offset]
    )))
}

struct Patterns {
    side_effect_import: Regex,
    import_from: Regex,
    export_from: Regex,
    export_star: Regex,
    export_default: Regex,
    export_fn_class: Regex,
    export_var: Regex,
    export_list: Regex,
    require_call: Regex,
    module_syntax: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        side_effect_import: Regex::new(r#"(?m)^[ \t]*import[ \t]*['"]([^'"\n]+)['"][ \t]*;?"#)
            .expect("static regex"),
        import_from: Regex::new(
            r#"(?m)^[ \t]*import\s+([\w$\s{},*]+?)\s*from\s*['"]([^'"\n]+)['"][ \t]*;?"#,
        )
        .expect("static regex"),
        export_from: Regex::new(
            r#"(?m)^[ \t]*export\s*\{([\w$\s,]*)\}\s*from\s*['"]([^'"\n]+)['"][ \t]*;?"#,
        )
        .expect("static regex"),
        export_star: Regex::new(r#"(?m)^[ \t]*export\s*\*\s*from\s*['"]([^'"\n]+)['"][ \t]*;?"#)
            .expect("static regex"),
        export_default: Regex::new(r"(?m)^([ \t]*)export[ \t]+default[ \t]+")
            .expect("static regex"),
        export_fn_class: Regex::new(
            r"(?m)^([ \t]*)export[ \t]+((?:async[ \t]+)?function(?:[ \t]*\*[ \t]*|[ \t]+)|class[ \t]+)([A-Za-z_$][\w$]*)",
        )
        .expect("static regex"),
        export_var: Regex::new(r"(?m)^([ \t]*)export[ \t]+(const|let|var)\b")
            .expect("static regex"),
        export_list: Regex::new(r"(?m)^[ \t]*export\s*\{([\w$\s,]*)\}[ \t]*;?").expect("static regex"),
        require_call: Regex::new(r#"\brequire\(\s*['"]([^'"\n]+)['"]\s*\)"#).expect("static regex"),
        module_syntax: Regex::new(r"(?m)^[ \t]*(import|export)\b").expect("static regex"),
    })
}

/// A module discovered while walking the graph.
struct Module {
    id: String,
    body: String,
}

/// Walks and rewrites the module graph of one entry.
pub struct Bundler<'a> {
    root: &'a ProjectRoot,
}

impl<'a> Bundler<'a> {
    pub fn new(root: &'a ProjectRoot) -> Self {
        Self { root }
    }

    /// Bundle `entry` (absolute, already contained) into a self-executing script.
    pub fn bundle(&self, entry: &Path) -> Result<Vec<u8>> {
        let entry_id = self.module_id(entry)?;
        let mut modules: BTreeMap<String, Module> = BTreeMap::new();
        let mut queue: VecDeque<PathBuf> = VecDeque::from([entry.to_path_buf()]);

        while let Some(path) = queue.pop_front() {
            let id = self.module_id(&path)?;
            if modules.contains_key(&id) {
                continue;
            }
            if modules.len() >= MAX_MODULES {
                return Err(VistaError::Build(format!(
                    "module graph exceeds {MAX_MODULES} modules"
                )));
            }

            let source = std::fs::read(&path)
                .map_err(|e| VistaError::Build(format!("cannot read {id}: {e}")))?;
            assert_ascii(&source, &id)?;
            // ASCII is always valid UTF-8.
            let source = String::from_utf8_lossy(&source).into_owned();

            let mut deps = Vec::new();
            let body = if path.extension().is_some_and(|ext| ext == "json") {
                serde_json::from_str::<serde_json::Value>(&source)
                    .map_err(|e| VistaError::Build(format!("invalid JSON module {id}: {e}")))?;
                format!("module.exports = {};", source.trim())
            } else {
                self.rewrite(&path, &id, &source, &mut deps)?
            };

            queue.extend(deps);
            modules.insert(id.clone(), Module { id, body });
        }

        Ok(render(&entry_id, modules.values()).into_bytes())
    }

    fn module_id(&self, path: &Path) -> Result<String> {
        let rel = self.root.relative(path)?;
        let id = rel.to_str().ok_or_else(|| {
            VistaError::Build(format!("module path is not valid UTF-8: {}", rel.display()))
        })?;
        Ok(id.replace('\\', "/"))
    }

    /// Resolve a specifier as seen from `from` to an absolute, contained file.
    fn resolve(&self, from: &Path, from_id: &str, specifier: &str) -> Result<PathBuf> {
        if !(specifier.starts_with("./") || specifier.starts_with("../")) {
            return Err(VistaError::Build(format!(
                "cannot resolve \"{specifier}\" from {from_id}: only relative specifiers are supported"
            )));
        }
        let dir = from.parent().unwrap_or(self.root.path());
        let joined = dir.join(specifier);
        let joined = joined.to_str().ok_or_else(|| {
            VistaError::Build(format!("specifier \"{specifier}\" is not valid UTF-8"))
        })?;
        let base = self.root.contain(joined)?;

        let mut candidates = vec![base.clone()];
        for ext in RESOLVE_EXTENSIONS {
            let mut name = base.as_os_str().to_owned();
            name.push(".");
            name.push(ext);
            candidates.push(PathBuf::from(name));
        }
        for index in INDEX_FILES {
            candidates.push(base.join(index));
        }

        for candidate in candidates {
            if candidate.is_file() {
                let as_str = candidate.to_string_lossy();
                return self.root.resolve(&as_str);
            }
        }
        Err(VistaError::Build(format!(
            "cannot resolve \"{specifier}\" from {from_id}: no such module"
        )))
    }

    /// Rewrite ES module syntax into the bundle's CommonJS calling convention.
    fn rewrite(
        &self,
        path: &Path,
        id: &str,
        source: &str,
        deps: &mut Vec<PathBuf>,
    ) -> Result<String> {
        let p = patterns();
        let mut exported: Vec<(String, String)> = Vec::new();
        let mut is_esm = false;

        let dep_id = |spec: &str, deps: &mut Vec<PathBuf>| -> Result<String> {
            let resolved = self.resolve(path, id, spec)?;
            let dep = self.module_id(&resolved)?;
            deps.push(resolved);
            Ok(json_str(&dep))
        };

        // User-written requires first: the passes below emit already-resolved ids.
        let text = replace_in_code(&p.require_call, source, |c| {
            Ok(format!("require({})", dep_id(&c[1], deps)?))
        })?;
        let text = replace_in_code(&p.export_from, &text, |c| {
            is_esm = true;
            let dep = dep_id(&c[2], deps)?;
            let mut out = String::from("(function (m) {");
            for (local, public) in parse_bindings(&c[1]) {
                out.push_str(&format!(" exports.{public} = m.{local};"));
            }
            out.push_str(&format!(" }})(require({dep}));"));
            Ok(out)
        })?;
        let text = replace_in_code(&p.export_star, &text, |c| {
            is_esm = true;
            let dep = dep_id(&c[1], deps)?;
            Ok(format!(
                "(function (m) {{ for (var k in m) if (k !== \"default\") exports[k] = m[k]; }})(require({dep}));"
            ))
        })?;
        let text = replace_in_code(&p.side_effect_import, &text, |c| {
            Ok(format!("require({});", dep_id(&c[1], deps)?))
        })?;
        let text = replace_in_code(&p.import_from, &text, |c| {
            let dep = dep_id(&c[2], deps)?;
            rewrite_import_clause(&c[1], &dep)
        })?;
        let text = replace_in_code(&p.export_default, &text, |c| {
            is_esm = true;
            Ok(format!("{}exports.default = ", &c[1]))
        })?;
        let text = replace_in_code(&p.export_fn_class, &text, |c| {
            is_esm = true;
            exported.push((c[3].to_string(), c[3].to_string()));
            Ok(format!("{}{}{}", &c[1], &c[2], &c[3]))
        })?;
        let text = replace_in_code(&p.export_var, &text, |c| {
            is_esm = true;
            let whole = c.get(0).expect("group 0 always present");
            let names = declared_names(&text[whole.end()..]).map_err(|e| {
                let what = match e {
                    DeclError::Destructuring => "destructuring export",
                    DeclError::Malformed => "malformed export declaration",
                };
                VistaError::Build(format!(
                    "{what} in {id} at line {} is not supported",
                    line_of(&text, whole.start())
                ))
            })?;
            exported.extend(names.into_iter().map(|n| (n.clone(), n)));
            Ok(format!("{}{}", &c[1], &c[2]))
        })?;
        let mut text = replace_in_code(&p.export_list, &text, |c| {
            is_esm = true;
            exported.extend(parse_bindings(&c[1]));
            Ok(String::new())
        })?;
        reject_leftover_module_syntax(&text, id)?;

        for (local, public) in &exported {
            text.push_str(&format!("\nexports.{public} = {local};"));
        }
        if is_esm {
            // Same line as the first statement, so diagnostics keep source line numbers.
            text.insert_str(0, "Object.defineProperty(exports, \"__esModule\", { value: true }); ");
        }
        Ok(text)
    }
}

/// Fail on any `import`/`export` statement the passes did not rewrite.
/// Dynamic `import(...)` is valid in a classic script and is allowed.
fn reject_leftover_module_syntax(text: &str, id: &str) -> Result<()> {
    let literals = literal_ranges(text);
    for caps in patterns().module_syntax.captures_iter(text) {
        let keyword = caps.get(1).expect("keyword group");
        if !in_code(&literals, keyword.start()) {
            continue;
        }
        if text[keyword.end()..].trim_start().starts_with('(') {
            continue;
        }
        let line_no = line_of(text, keyword.start());
        let line = text[keyword.start()..].lines().next().unwrap_or("").trim();
        return Err(VistaError::Build(format!(
            "unsupported {} statement in {id} at line {line_no}: {line}",
            keyword.as_str()
        )));
    }
    Ok(())
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// `a, b as c` -> [(a, a), (b, c)]
fn parse_bindings(list: &str) -> Vec<(String, String)> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|binding| match binding.split_once(" as ") {
            Some((local, public)) => (local.trim().to_string(), public.trim().to_string()),
            None => (binding.to_string(), binding.to_string()),
        })
        .collect()
}

fn rewrite_import_clause(clause: &str, dep: &str) -> Result<String> {
    let clause = clause.trim();
    let (default_part, rest) = match clause.find(&['{', '*'][..]) {
        Some(0) => ("", clause),
        Some(idx) => (clause[..idx].trim().trim_end_matches(',').trim(), &clause[idx..]),
        None => (clause, ""),
    };

    let mut out = Vec::new();
    let module_var = format!("require({dep})");
    if !default_part.is_empty() {
        out.push(format!("var {default_part} = __vista_default({module_var});"));
    }
    let rest = rest.trim();
    if let Some(ns) = rest.strip_prefix('*') {
        let ns = ns.trim().strip_prefix("as").map(str::trim).unwrap_or("");
        if ns.is_empty() {
            return Err(VistaError::Build(format!("malformed namespace import: {clause}")));
        }
        out.push(format!("var {ns} = {module_var};"));
    } else if let Some(named) = rest.strip_prefix('{') {
        let named = named.trim_end().trim_end_matches('}');
        let bindings: Vec<String> = parse_bindings(named)
            .into_iter()
            .map(|(imported, local)| {
                if imported == local {
                    local
                } else {
                    format!("{imported}: {local}")
                }
            })
            .collect();
        out.push(format!("var {{ {} }} = {module_var};", bindings.join(", ")));
    }
    if out.is_empty() {
        return Err(VistaError::Build(format!("malformed import clause: {clause}")));
    }
    Ok(out.join(" "))
}

/// Replace every match of `re` whose first non-blank byte is code (not
/// inside a comment or literal).
///
/// Replacements are padded with the line breaks they consume, so line
/// numbers in later diagnostics still match the source.
fn replace_in_code<F>(re: &Regex, text: &str, mut f: F) -> Result<String>
where
    F: FnMut(&Captures<'_>) -> Result<String>,
{
    let literals = literal_ranges(text);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let whole = caps.get(0).expect("group 0 always present");
        let lead = whole.as_str().len() - whole.as_str().trim_start().len();
        if !in_code(&literals, whole.start() + lead) {
            continue;
        }
        let replacement = f(&caps)?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(&replacement);
        let lost = whole
            .as_str()
            .matches('\n')
            .count()
            .saturating_sub(replacement.matches('\n').count());
        out.extend(std::iter::repeat('\n').take(lost));
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn json_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn render<'m>(entry_id: &str, modules: impl Iterator<Item = &'m Module>) -> String {
    let mut out = String::from("(function () {\nvar __vista_modules = {\n");
    for module in modules {
        out.push_str(&format!(
            "{}: function (module, exports, require) {{\n{}\n}},\n",
            json_str(&module.id),
            module.body
        ));
    }
    out.push_str(
        "};\n\
         var __vista_cache = {};\n\
         function __vista_require(id) {\n\
         \x20 var cached = __vista_cache[id];\n\
         \x20 if (cached) return cached.exports;\n\
         \x20 var module = { exports: {} };\n\
         \x20 __vista_cache[id] = module;\n\
         \x20 __vista_modules[id].call(module.exports, module, module.exports, __vista_require);\n\
         \x20 return module.exports;\n\
         }\n\
         function __vista_default(m) { return m && m.__esModule ? m.default : m; }\n",
    );
    out.push_str(&format!("__vista_require({});\n}})();\n", json_str(entry_id)));
    out
}
