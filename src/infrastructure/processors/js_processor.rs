use super::common::{apply_edits, js_string, Edit};
use super::source_map::{edit_map, record};
use crate::core::interfaces::TransformStage;
use crate::core::models::{Dependency, Lang, TransformUnit};
use crate::utils::{KilnError, Result};
use indexmap::IndexMap;
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast_visit::{walk, Visit};
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::{ParseOptions, Parser};
use oxc_semantic::{Scoping, SemanticBuilder, SymbolId};
use oxc_sourcemap::SourceMap;
use oxc_span::{GetSpan, SourceType, Span};
use oxc_transformer::{TransformOptions, Transformer};
use std::collections::{HashMap, HashSet};
use std::path::Path;

fn parse_options() -> ParseOptions {
    ParseOptions {
        allow_return_outside_function: true,
        ..ParseOptions::default()
    }
}

/// Parse plain JavaScript, as a module first and as a script if that fails
fn parse_js<'a>(
    allocator: &'a Allocator,
    text: &'a str,
    path: &Path,
    stage: &str,
) -> Result<Program<'a>> {
    let module = Parser::new(allocator, text, SourceType::mjs())
        .with_options(parse_options())
        .parse();
    if module.errors.is_empty() && !module.panicked {
        return Ok(module.program);
    }

    let script = Parser::new(allocator, text, SourceType::mjs().with_module(false))
        .with_options(parse_options())
        .parse();
    if script.errors.is_empty() && !script.panicked {
        return Ok(script.program);
    }

    let message = module
        .errors
        .first()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unrecoverable syntax error".to_string());
    Err(KilnError::transform(stage, path.to_path_buf(), message))
}

fn is_global(scoping: &Scoping, ident: &IdentifierReference<'_>) -> bool {
    ident
        .reference_id
        .get()
        .map_or(true, |id| scoping.get_reference(id).symbol_id().is_none())
}

/// TypeScript and JSX to plain JavaScript (babel-loader)
pub struct TranspileStage {
    options: TransformOptions,
}

impl TranspileStage {
    pub fn new() -> Self {
        Self { options: TransformOptions::default() }
    }

    fn transpile(&self, path: &Path, text: &str, map: bool) -> Result<(String, Option<SourceMap>)> {
        let allocator = Allocator::default();
        let source_type = SourceType::from_path(path).unwrap_or_else(|_| SourceType::mjs());

        let parsed = Parser::new(&allocator, text, source_type).parse();
        if parsed.panicked || !parsed.errors.is_empty() {
            let message = parsed
                .errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unrecoverable syntax error".to_string());
            return Err(KilnError::transform(self.name(), path.to_path_buf(), message));
        }

        let mut program = parsed.program;
        let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();
        let transformed = Transformer::new(&allocator, path, &self.options)
            .build_with_scoping(scoping, &mut program);
        if let Some(error) = transformed.errors.first() {
            return Err(KilnError::transform(self.name(), path.to_path_buf(), error.to_string()));
        }

        let options = CodegenOptions {
            source_map_path: map.then(|| path.to_path_buf()),
            ..CodegenOptions::default()
        };
        let generated = Codegen::new().with_options(options).build(&program);
        Ok((generated.code, generated.map))
    }
}

impl Default for TranspileStage {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformStage for TranspileStage {
    fn name(&self) -> &str {
        "transpile"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        let (code, map) = self.transpile(&unit.path, unit.text(self.name())?, unit.map_sources)?;
        unit.set_text(code, Lang::Script);
        if let Some(map) = map {
            record(unit, map);
        }
        Ok(())
    }
}

/// Compile-time constant replacement for free identifiers and
/// member chains such as `process.env.NODE_ENV` (DefinePlugin)
pub struct DefineStage {
    values: IndexMap<String, String>,
    roots: Vec<String>,
}

impl DefineStage {
    pub fn new(values: IndexMap<String, String>) -> Self {
        let mut roots: Vec<String> = values
            .keys()
            .map(|k| k.split('.').next().unwrap_or(k).to_string())
            .collect();
        roots.sort();
        roots.dedup();
        Self { values, roots }
    }

    fn replace(&self, path: &Path, text: &str, map: bool) -> Result<Option<(String, Option<SourceMap>)>> {
        if !self.roots.iter().any(|root| text.contains(root.as_str())) {
            return Ok(None);
        }

        let allocator = Allocator::default();
        let program = parse_js(&allocator, text, path, self.name())?;
        let semantic = SemanticBuilder::new().build(&program).semantic;

        let mut scan = DefineScan {
            scoping: semantic.scoping(),
            values: &self.values,
            shorthand: HashSet::new(),
            hits: Vec::new(),
        };
        scan.visit_program(&program);

        if scan.hits.is_empty() {
            return Ok(None);
        }

        let edits: Vec<Edit> = scan
            .hits
            .iter()
            .map(|(span, key, value)| {
                let text = if scan.shorthand.contains(&span.start) {
                    format!("{}: {}", key, value)
                } else {
                    format!("({})", value)
                };
                Edit::replace(span.start, span.end, text)
            })
            .collect();

        let source_map = map.then(|| edit_map(&path.to_string_lossy(), text, &edits, 0));
        Ok(Some((apply_edits(text, edits), source_map)))
    }
}

impl TransformStage for DefineStage {
    fn name(&self) -> &str {
        "define"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        match self.replace(&unit.path, unit.text(self.name())?, unit.map_sources)? {
            Some((code, map)) => {
                unit.set_text(code, Lang::Script);
                if let Some(map) = map {
                    record(unit, map);
                }
            }
            None => unit.lang = Lang::Script,
        }
        Ok(())
    }
}

struct DefineScan<'s> {
    scoping: &'s Scoping,
    values: &'s IndexMap<String, String>,
    shorthand: HashSet<u32>,
    hits: Vec<(Span, String, String)>,
}

impl DefineScan<'_> {
    fn dotted(&self, expr: &Expression<'_>) -> Option<String> {
        match expr {
            Expression::Identifier(ident) if is_global(self.scoping, ident) => {
                Some(ident.name.to_string())
            }
            Expression::StaticMemberExpression(member) => self.dotted_member(member),
            _ => None,
        }
    }

    fn dotted_member(&self, member: &StaticMemberExpression<'_>) -> Option<String> {
        self.dotted(&member.object)
            .map(|object| format!("{}.{}", object, member.property.name))
    }
}

impl<'a> Visit<'a> for DefineScan<'_> {
    fn visit_identifier_reference(&mut self, it: &IdentifierReference<'a>) {
        if !is_global(self.scoping, it) {
            return;
        }
        if let Some(value) = self.values.get(it.name.as_str()) {
            self.hits.push((it.span, it.name.to_string(), value.clone()));
        }
    }

    fn visit_static_member_expression(&mut self, it: &StaticMemberExpression<'a>) {
        if let Some(path) = self.dotted_member(it) {
            if let Some(value) = self.values.get(&path) {
                self.hits.push((it.span, path, value.clone()));
                return;
            }
        }
        walk::walk_static_member_expression(self, it);
    }

    fn visit_object_property(&mut self, it: &ObjectProperty<'a>) {
        if it.shorthand {
            if let Expression::Identifier(ident) = &it.value {
                self.shorthand.insert(ident.span.start);
            }
        }
        walk::walk_object_property(self, it);
    }
}

/// ES module syntax to a registry module body. Imports become `require`
/// calls hoisted to the top, references to imported bindings read through
/// the required namespace so they stay live, and exports become getters.
pub struct EsmStage;

/// Binding accessor recorded for every imported local name
struct ImportBinding {
    symbol: Option<SymbolId>,
    local: String,
    accessor: String,
}

#[derive(Default)]
struct ModuleRewrite {
    is_esm: bool,
    /// Hoisted `require` statements in source order
    prelude: Vec<String>,
    /// Exported name to getter expression
    exports: Vec<(String, String)>,
    bindings: Vec<ImportBinding>,
    edits: Vec<Edit>,
    /// Specifiers with the offset they appear at
    specifiers: Vec<(u32, String)>,
    required: usize,
}

impl ModuleRewrite {
    fn require_into(&mut self, prefix: &str, source: &str) -> String {
        let var = format!("__kiln_{}{}", prefix, self.required);
        self.required += 1;
        self.prelude.push(format!(
            "var {} = require.n(require({}));",
            var,
            js_string(source)
        ));
        var
    }

    fn accessor_for_local(&self, local: &str) -> String {
        self.bindings
            .iter()
            .find(|b| b.local == local)
            .map(|b| b.accessor.clone())
            .unwrap_or_else(|| local.to_string())
    }

    fn import(&mut self, decl: &ImportDeclaration<'_>) {
        self.is_esm = true;
        self.edits.push(Edit::replace(decl.span.start, decl.span.end, ""));
        if decl.import_kind.is_type() {
            return;
        }

        let source = decl.source.value.as_str();
        self.specifiers.push((decl.span.start, source.to_string()));

        let specifiers = match &decl.specifiers {
            Some(list) if !list.is_empty() => list,
            _ => {
                self.prelude.push(format!("require({});", js_string(source)));
                return;
            }
        };

        let var = self.require_into("i", source);
        for specifier in specifiers {
            let (local, accessor) = match specifier {
                ImportDeclarationSpecifier::ImportSpecifier(s) => {
                    if s.import_kind.is_type() {
                        continue;
                    }
                    (&s.local, member_access(&var, s.imported.name().as_str()))
                }
                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                    (&s.local, format!("{}.default", var))
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                    (&s.local, var.clone())
                }
            };
            self.bindings.push(ImportBinding {
                symbol: local.symbol_id.get(),
                local: local.name.to_string(),
                accessor,
            });
        }
    }

    fn export_named(&mut self, decl: &ExportNamedDeclaration<'_>) {
        self.is_esm = true;
        if decl.export_kind.is_type() {
            self.edits.push(Edit::replace(decl.span.start, decl.span.end, ""));
            return;
        }

        if let Some(declaration) = &decl.declaration {
            self.edits.push(Edit::replace(decl.span.start, declaration.span().start, ""));
            for name in declared_names(declaration) {
                self.exports.push((name.clone(), name));
            }
            return;
        }

        self.edits.push(Edit::replace(decl.span.start, decl.span.end, ""));
        match &decl.source {
            Some(source) => {
                self.specifiers.push((decl.span.start, source.value.to_string()));
                let var = self.require_into("r", source.value.as_str());
                for specifier in decl.specifiers.iter().filter(|s| !s.export_kind.is_type()) {
                    self.exports.push((
                        specifier.exported.name().to_string(),
                        member_access(&var, specifier.local.name().as_str()),
                    ));
                }
            }
            None => {
                for specifier in decl.specifiers.iter().filter(|s| !s.export_kind.is_type()) {
                    let getter = self.accessor_for_local(specifier.local.name().as_str());
                    self.exports.push((specifier.exported.name().to_string(), getter));
                }
            }
        }
    }

    fn export_default(&mut self, decl: &ExportDefaultDeclaration<'_>) {
        self.is_esm = true;
        let named = match &decl.declaration {
            ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                func.id.as_ref().map(|id| id.name.to_string())
            }
            ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                class.id.as_ref().map(|id| id.name.to_string())
            }
            ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => {
                self.edits.push(Edit::replace(decl.span.start, decl.span.end, ""));
                return;
            }
            _ => None,
        };

        let body_start = decl.declaration.span().start;
        match named {
            Some(name) => {
                self.edits.push(Edit::replace(decl.span.start, body_start, ""));
                self.exports.push(("default".to_string(), name));
            }
            None => {
                self.edits
                    .push(Edit::replace(decl.span.start, body_start, "var __kiln_default = "));
                self.edits.push(Edit::insert(decl.span.end, ";"));
                self.exports
                    .push(("default".to_string(), "__kiln_default".to_string()));
            }
        }
    }

    fn export_all(&mut self, decl: &ExportAllDeclaration<'_>) {
        self.is_esm = true;
        self.edits.push(Edit::replace(decl.span.start, decl.span.end, ""));
        if decl.export_kind.is_type() {
            return;
        }

        self.specifiers.push((decl.span.start, decl.source.value.to_string()));
        let var = self.require_into("r", decl.source.value.as_str());
        match &decl.exported {
            Some(name) => self.exports.push((name.name().to_string(), var)),
            None => self.prelude.push(format!("require.s(exports, {});", var)),
        }
    }
}

/// `ns.name`, or `ns["name"]` when the name is not an identifier
fn member_access(object: &str, name: &str) -> String {
    let is_ident = name
        .chars()
        .enumerate()
        .all(|(i, c)| c == '$' || c == '_' || c.is_alphabetic() || (i > 0 && c.is_alphanumeric()));
    if is_ident && !name.is_empty() {
        format!("{}.{}", object, name)
    } else {
        format!("{}[{}]", object, js_string(name))
    }
}

/// Names bound by an exported declaration
fn declared_names(declaration: &Declaration<'_>) -> Vec<String> {
    let mut collector = BindingNames::default();
    match declaration {
        Declaration::VariableDeclaration(var) => {
            for declarator in &var.declarations {
                collector.visit_binding_pattern(&declarator.id);
            }
        }
        Declaration::FunctionDeclaration(func) => {
            if let Some(id) = &func.id {
                collector.names.push(id.name.to_string());
            }
        }
        Declaration::ClassDeclaration(class) => {
            if let Some(id) = &class.id {
                collector.names.push(id.name.to_string());
            }
        }
        _ => {}
    }
    collector.names
}

#[derive(Default)]
struct BindingNames {
    names: Vec<String>,
}

impl<'a> Visit<'a> for BindingNames {
    fn visit_binding_identifier(&mut self, it: &BindingIdentifier<'a>) {
        self.names.push(it.name.to_string());
    }

    // Default values may contain functions with their own parameters
    fn visit_assignment_pattern(&mut self, it: &AssignmentPattern<'a>) {
        self.visit_binding_pattern(&it.left);
    }
}

/// Finds references to imported bindings and CommonJS-style loads
struct ReferenceScan<'s> {
    scoping: &'s Scoping,
    imports: HashMap<SymbolId, String>,
    references: Vec<(Span, String, String)>,
    shorthand: HashSet<u32>,
    callees: HashSet<u32>,
    requires: Vec<(u32, String)>,
    dynamic: Vec<(Span, String)>,
    unsupported: Option<Span>,
}

impl<'a> Visit<'a> for ReferenceScan<'_> {
    fn visit_identifier_reference(&mut self, it: &IdentifierReference<'a>) {
        let symbol = it
            .reference_id
            .get()
            .and_then(|id| self.scoping.get_reference(id).symbol_id());
        if let Some(accessor) = symbol.and_then(|s| self.imports.get(&s)) {
            self.references.push((it.span, it.name.to_string(), accessor.clone()));
        }
    }

    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &it.callee {
            self.callees.insert(callee.span.start);
            if callee.name == "require" && is_global(self.scoping, callee) && it.arguments.len() == 1 {
                if let Argument::StringLiteral(source) = &it.arguments[0] {
                    self.requires.push((it.span.start, source.value.to_string()));
                }
            }
        }
        walk::walk_call_expression(self, it);
    }

    fn visit_import_expression(&mut self, it: &ImportExpression<'a>) {
        match &it.source {
            Expression::StringLiteral(source) => {
                self.dynamic.push((it.span, source.value.to_string()));
            }
            _ => {
                self.unsupported.get_or_insert(it.span);
                walk::walk_import_expression(self, it);
            }
        }
    }

    fn visit_object_property(&mut self, it: &ObjectProperty<'a>) {
        if it.shorthand {
            if let Expression::Identifier(ident) = &it.value {
                self.shorthand.insert(ident.span.start);
            }
        }
        walk::walk_object_property(self, it);
    }
}

impl EsmStage {
    /// Returns the module body, its specifiers in source order, and a map
    /// back to `text` when `map` is set
    fn rewrite(&self, path: &Path, text: &str, map: bool) -> Result<(String, Vec<String>, Option<SourceMap>)> {
        let allocator = Allocator::default();
        let program = parse_js(&allocator, text, path, self.name())?;
        let semantic = SemanticBuilder::new().build(&program).semantic;

        let mut rewrite = ModuleRewrite::default();
        if let Some(hashbang) = &program.hashbang {
            rewrite.edits.push(Edit::replace(hashbang.span.start, hashbang.span.end, ""));
        }

        // Module declarations first so every binding is known before references
        for statement in &program.body {
            match statement {
                Statement::ImportDeclaration(decl) => rewrite.import(decl),
                Statement::ExportNamedDeclaration(decl) => rewrite.export_named(decl),
                Statement::ExportDefaultDeclaration(decl) => rewrite.export_default(decl),
                Statement::ExportAllDeclaration(decl) => rewrite.export_all(decl),
                _ => {}
            }
        }

        let mut scan = ReferenceScan {
            scoping: semantic.scoping(),
            imports: rewrite
                .bindings
                .iter()
                .filter_map(|b| b.symbol.map(|s| (s, b.accessor.clone())))
                .collect(),
            references: Vec::new(),
            shorthand: HashSet::new(),
            callees: HashSet::new(),
            requires: Vec::new(),
            dynamic: Vec::new(),
            unsupported: None,
        };
        for statement in &program.body {
            match statement {
                Statement::ImportDeclaration(_) | Statement::ExportAllDeclaration(_) => {}
                Statement::ExportNamedDeclaration(decl) => {
                    if let Some(declaration) = &decl.declaration {
                        scan.visit_declaration(declaration);
                    }
                }
                other => scan.visit_statement(other),
            }
        }

        if let Some(span) = scan.unsupported {
            return Err(KilnError::transform(
                self.name(),
                path.to_path_buf(),
                format!(
                    "import() at offset {} needs a string literal specifier",
                    span.start
                ),
            ));
        }

        for (span, name, accessor) in &scan.references {
            let replacement = if scan.shorthand.contains(&span.start) {
                format!("{}: {}", name, accessor)
            } else if scan.callees.contains(&span.start) {
                format!("(0, {})", accessor)
            } else {
                accessor.clone()
            };
            rewrite.edits.push(Edit::replace(span.start, span.end, replacement));
        }

        for (span, source) in &scan.dynamic {
            rewrite.specifiers.push((span.start, source.clone()));
            rewrite.edits.push(Edit::replace(
                span.start,
                span.end,
                format!(
                    "Promise.resolve().then(function () {{ return require.n(require({})); }})",
                    js_string(source)
                ),
            ));
        }
        rewrite.specifiers.extend(scan.requires.iter().cloned());

        let mut header = String::new();
        if rewrite.is_esm {
            header.push_str("\"use strict\";\n");
            let getters: Vec<String> = rewrite
                .exports
                .iter()
                .map(|(name, getter)| format!("{}: function () {{ return {}; }}", js_string(name), getter))
                .collect();
            header.push_str(&format!("require.d(exports, {{{}}});\n", getters.join(", ")));
        }
        for line in &rewrite.prelude {
            header.push_str(line);
            header.push('\n');
        }

        let mut specifiers = std::mem::take(&mut rewrite.specifiers);
        specifiers.sort_by_key(|(offset, _)| *offset);
        let source_map = map.then(|| {
            let header_lines = header.matches('\n').count() as u32;
            edit_map(&path.to_string_lossy(), text, &rewrite.edits, header_lines)
        });
        let body = apply_edits(text, rewrite.edits);

        Ok((
            header + &body,
            specifiers.into_iter().map(|(_, s)| s).collect(),
            source_map,
        ))
    }
}

impl TransformStage for EsmStage {
    fn name(&self) -> &str {
        "esm"
    }

    fn apply(&self, unit: &mut TransformUnit) -> Result<()> {
        let (code, specifiers, map) = self.rewrite(&unit.path, unit.text(self.name())?, unit.map_sources)?;
        for specifier in specifiers {
            unit.add_dependency(Dependency::import(specifier));
        }
        unit.set_text(code, Lang::Module);
        if let Some(map) = map {
            record(unit, map);
        }
        Ok(())
    }
}
