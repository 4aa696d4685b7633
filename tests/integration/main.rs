// Integration suite: full builds against temporary project fixtures

mod build_tests;
mod chunking_tests;
mod support;
