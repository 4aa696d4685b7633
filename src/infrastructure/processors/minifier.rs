use crate::utils::{KilnError, Result};
use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{CompressOptions, MangleOptions, Minifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_sourcemap::SourceMap;
use oxc_span::SourceType;
use std::path::PathBuf;

/// Chunk minification using oxc
pub struct OxcMinifier {
    mangle: bool,
}

impl OxcMinifier {
    pub fn new() -> Self {
        Self { mangle: true }
    }

    /// Minify a rendered chunk. Chunks are scripts, not modules.
    pub fn minify(&self, source_code: &str, filename: &str) -> Result<String> {
        self.run(source_code, filename, false).map(|(code, _)| code)
    }

    /// Minify and map the minified chunk back to `source_code`
    pub fn minify_with_map(&self, source_code: &str, filename: &str) -> Result<(String, SourceMap)> {
        self.run(source_code, filename, true)
            .map(|(code, map)| (code, map.unwrap_or_default()))
    }

    fn run(&self, source_code: &str, filename: &str, map: bool) -> Result<(String, Option<SourceMap>)> {
        let allocator = Allocator::default();
        let source_type = SourceType::mjs().with_module(false);

        let parse_result = Parser::new(&allocator, source_code, source_type).parse();
        if parse_result.panicked || !parse_result.errors.is_empty() {
            let errors: Vec<String> = parse_result
                .errors
                .iter()
                .map(|e| format!("Parse error: {}", e))
                .collect();
            return Err(KilnError::transform("minify", PathBuf::from(filename), errors.join("\n")));
        }

        let mut program = parse_result.program;
        let options = MinifierOptions {
            mangle: self.mangle.then(MangleOptions::default),
            compress: Some(CompressOptions::default()),
        };
        let minified = Minifier::new(options).minify(&allocator, &mut program);

        let generated = Codegen::new()
            .with_options(CodegenOptions {
                minify: true,
                source_map_path: map.then(|| PathBuf::from(filename)),
                ..CodegenOptions::default()
            })
            .with_scoping(minified.scoping)
            .build(&program);

        Ok((generated.code, generated.map))
    }
}

impl Default for OxcMinifier {
    fn default() -> Self {
        Self::new()
    }
}
