//! Userscript metadata parsing.
//!
//! Scripts carry a Tampermonkey-style header made of `// ` comment lines:
//!
//! ```text
//! // ==UserScript==
//! // @name Dark mode
//! // @version 0.1
//! // @match https://*.example.com/*
//! // @require https://code.jquery.com/jquery-3.7.1.min.js
//! // ==/UserScript==
//!
//! document.body.classList.add("dark");
//! ```
//!
//! Blank lines inside the header are skipped. The first non-blank line that is
//! not a `// ` comment ends the header and becomes the first line of the body.
//! Unknown directives and malformed header lines are ignored. The value of a
//! directive is everything after the first space, so padding is kept.

use super::matcher::UrlMatcher;

/// Header comment marker.
const HEADER_MARKER: &str = "// ";

/// A parsed userscript.
#[derive(Debug, Clone, Default)]
pub struct Userscript {
    /// Script name (`@name`), filled from the file name by the loader when absent.
    pub name: String,
    /// Author (`@author`).
    pub author: String,
    /// Version (`@version`).
    pub version: String,
    /// Description (`@description`).
    pub description: String,
    /// URL rules (`@match`), in header order.
    pub match_rules: Vec<UrlMatcher>,
    /// Dependency URLs (`@require`), in header order.
    pub dependencies: Vec<String>,
    /// Script body, verbatim from the first non-header line.
    pub body: String,
    /// Name of the file the script was loaded from.
    pub file_name: String,
}

impl Userscript {
    /// Parse a script from its full text.
    pub fn parse(content: &str) -> Self {
        Self::parse_lines(content.split_inclusive('\n'))
    }

    /// Parse a script from lines that still carry their line terminators.
    ///
    /// Header lines are interpreted after trimming; body lines are kept as-is.
    pub fn parse_lines<'a, I>(lines: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut script = Userscript::default();
        let mut lines = lines.into_iter();

        for raw in lines.by_ref() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let Some(header) = line.strip_prefix(HEADER_MARKER) else {
                script.body.push_str(raw);
                break;
            };

            script.apply_directive(header);
        }

        for raw in lines {
            script.body.push_str(raw);
        }

        script
    }

    /// Apply one header line (with the comment marker already removed).
    fn apply_directive(&mut self, header: &str) {
        let Some(directive) = header.strip_prefix('@') else {
            return;
        };
        let Some((key, value)) = directive.split_once(' ') else {
            return;
        };
        if key.is_empty() {
            return;
        }

        match key {
            "match" => self.match_rules.push(UrlMatcher::new(value)),
            "require" => self.dependencies.push(value.to_string()),
            "name" => self.name = value.to_string(),
            "author" => self.author = value.to_string(),
            "version" => self.version = value.to_string(),
            "description" => self.description = value.to_string(),
            _ => {}
        }
    }

    /// Whether any of the script's rules matches the request.
    ///
    /// A script without rules never matches.
    pub fn matches(&self, scheme: &str, host: &str, path: &str) -> bool {
        self.match_rules
            .iter()
            .any(|rule| rule.matches(scheme, host, path))
    }
}
