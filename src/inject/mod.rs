//! Userscript injection into HTML responses.
//!
//! ```text
//!  scripts dir ──► ScriptRegistry ──► ContentInjector ──► rewritten <body>
//!   (*.js files)    (parse, cache)     (match URL, insert <script> tags)
//! ```
//!
//! - [`matcher`]: `@match` wildcard rules
//! - [`userscript`]: script header parsing
//! - [`registry`]: directory scan and reload
//! - [`injector`]: response rewriting

pub mod error;
pub mod injector;
pub mod matcher;
pub mod registry;
pub mod userscript;

pub use error::{InjectError, InjectResult, ScriptError, ScriptResult};
pub use injector::{ContentInjector, InjectedScripts, RequestTarget, inject_scripts};
pub use matcher::{SchemeRestriction, UrlMatcher};
pub use registry::{ScriptEntry, ScriptRegistry, ScriptSummary, TEMP_FILE_SUFFIX};
pub use userscript::Userscript;
