//! Source maps for script modules and chunks.
//!
//! Stages that rewrite text by byte-range edits describe the rewrite with
//! [`edit_map`]; stages that regenerate code get a map from `oxc_codegen`.
//! [`remap`] chains a stage map onto the map a module already carries, so a
//! module's map always points at its original file. The emitter concatenates
//! module maps per chunk and remaps through the minifier.

use super::common::Edit;
use crate::core::models::TransformUnit;
use oxc_sourcemap::{SourceMap, SourceMapBuilder};
use std::collections::HashMap;

/// Line starts of `text`, for offset to (line, column) lookups
struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, starts }
    }

    /// Zero-based line and UTF-16 column of a byte offset
    fn position(&self, offset: usize) -> (u32, u32) {
        let line = self.starts.partition_point(|start| *start <= offset) - 1;
        let start = self.starts[line];
        let column = self.text.get(start..offset).map_or(0, |s| s.encode_utf16().count());
        (line as u32, column as u32)
    }
}

/// Generated-side cursor while replaying edits
struct Cursor {
    line: u32,
    column: u32,
}

impl Cursor {
    fn advance(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += ch.len_utf16() as u32;
            }
        }
    }
}

/// Map from the text [`super::common::apply_edits`] produces back to
/// `source`. Unchanged text maps line by line; each replacement maps to the
/// start of the range it replaced. `line_offset` shifts the generated side
/// for text prepended to the result.
pub fn edit_map(source_name: &str, source: &str, edits: &[Edit], line_offset: u32) -> SourceMap {
    let index = LineIndex::new(source);
    let mut builder = SourceMapBuilder::default();
    let source_id = builder.set_source_and_content(source_name, source);
    let mut out = Cursor { line: line_offset, column: 0 };

    let mark = |builder: &mut SourceMapBuilder, out: &Cursor, offset: usize| {
        let (line, column) = index.position(offset);
        builder.add_token(out.line, out.column, line, column, Some(source_id), None);
    };

    let copy = |builder: &mut SourceMapBuilder, out: &mut Cursor, from: usize, to: usize| {
        if from >= to {
            return;
        }
        mark(builder, out, from);
        let segment = &source[from..to];
        let mut consumed = from;
        for line in segment.split_inclusive('\n') {
            out.advance(line);
            consumed += line.len();
            if line.ends_with('\n') && consumed < to {
                mark(builder, out, consumed);
            }
        }
    };

    let mut cursor = 0usize;
    for edit in super::common::accepted_edits(source, edits.to_vec()) {
        let (start, end) = (edit.start as usize, edit.end as usize);
        copy(&mut builder, &mut out, cursor, start);
        if !edit.text.is_empty() {
            mark(&mut builder, &out, start);
            out.advance(&edit.text);
        }
        cursor = end;
    }
    copy(&mut builder, &mut out, cursor, source.len());

    builder.into_sourcemap()
}

/// Chain `outer` (generated to intermediate) onto `inner` (intermediate to
/// original). Tokens whose intermediate position has no origin are dropped.
pub fn remap(outer: &SourceMap, inner: &SourceMap) -> SourceMap {
    let table = inner.generate_lookup_table();
    let mut builder = SourceMapBuilder::default();
    let mut sources: HashMap<u32, u32> = HashMap::new();

    for token in outer.get_tokens() {
        let Some(origin) = inner.lookup_token(&table, token.get_src_line(), token.get_src_col())
        else {
            continue;
        };
        let Some(inner_id) = origin.get_source_id() else {
            continue;
        };
        let source_id = match sources.get(&inner_id) {
            Some(id) => *id,
            None => {
                let name = inner.get_source(inner_id).map_or("", |s| &**s);
                let content = inner.get_source_content(inner_id).map_or("", |s| &**s);
                let id = builder.add_source_and_content(name, content);
                sources.insert(inner_id, id);
                id
            }
        };

        let column = origin.get_src_col() + token.get_src_col().saturating_sub(origin.get_dst_col());
        builder.add_token(
            token.get_dst_line(),
            token.get_dst_col(),
            origin.get_src_line(),
            column,
            Some(source_id),
            None,
        );
    }

    if let Some(file) = outer.get_file() {
        builder.set_file(file);
    }
    builder.into_sourcemap()
}

/// Put `outer` in front of whatever map a unit already carries
pub fn chain(outer: SourceMap, inner: Option<&SourceMap>) -> SourceMap {
    match inner {
        Some(inner) => remap(&outer, inner),
        None => outer,
    }
}

/// Record a stage map on `unit`, chained onto the map it already carries
pub fn record(unit: &mut TransformUnit, map: SourceMap) {
    let inner = unit.source_map.take();
    unit.source_map = Some(chain(map, inner.as_ref()));
}

/// Name every source of a module map after the module key
pub fn rename_sources(map: &mut SourceMap, name: &str) {
    let count = map.get_sources().count();
    map.set_sources(vec![name; count]);
}
