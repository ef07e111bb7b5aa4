// Copyright 2018-2022 the Deno authors. All rights reserved. MIT license.

//! Rewrites CommonJS modules so that they can be evaluated while building a
//! V8 heap snapshot. Host capabilities (the file system, `process`, I/O
//! globals) are unavailable at snapshot time, so every top-level access that
//! might need the host is deferred behind a lazily-evaluated accessor
//! function, while pure top-level computation is left untouched.

pub mod ast;
pub mod rewrite;

pub use ast::parse_script;
pub use ast::ParsedSource;
pub use rewrite::rewrite_module;
pub use rewrite::rewrite_source;
pub use rewrite::RewriteOptions;
pub use rewrite::RewriteOutput;
pub use rewrite::validate::ValidationError;
pub use rewrite::validate::ValidationKind;
