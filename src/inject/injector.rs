//! HTML response rewriting.
//!
//! For every HTML response, the injector selects the scripts whose `@match`
//! rules accept the request URL and inserts them at the start of `<body>`:
//!
//! ```text
//! <body>
//!   <script src="a1" type="text/javascript"></script>   <- deps of first match
//!   <script type="application/javascript">A</script>    <- first match
//!   <script src="b1" type="text/javascript"></script>   <- deps of second match
//!   <script type="application/javascript">B</script>    <- second match
//!   ...original body...
//! ```
//!
//! Each script runs right after its own dependencies, and earlier matches run
//! before later ones.
//!
//! When scripts are injected, the response headers are also rewritten
//! so the client neither upgrades to a protocol the proxy cannot see
//! (`alt-svc`), reports the interception (`report-to`, `nel`), nor caches the
//! page and skips the injection next time (`cache-control`, `expires`).

use std::sync::Arc;

use bytes::Bytes;
use html5ever::tendril::StrTendril as AttrTendril;
use html5ever::{Attribute, LocalName, Namespace, QualName};
use hyper::Response;
use hyper::header::{self, HeaderMap, HeaderValue};
use scraper::node::{Element, Text};
use scraper::{ElementRef, Html, Node, StrTendril};
use tracing::{debug, info, warn};

use super::error::{InjectError, InjectResult};
use super::registry::{ScriptEntry, ScriptRegistry};
use super::userscript::Userscript;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Type of inline script tags.
pub const INLINE_SCRIPT_TYPE: &str = "application/javascript";

/// Type of dependency script tags.
pub const DEPENDENCY_SCRIPT_TYPE: &str = "text/javascript";

/// The URL components scripts are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTarget<'a> {
    /// `http` or `https`.
    pub scheme: &'a str,
    /// Host name, without port.
    pub host: &'a str,
    /// Path including the query string.
    pub path: &'a str,
}

impl RequestTarget<'_> {
    fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }
}

/// Names of the scripts injected into a response.
///
/// Stored in the response extensions after a successful injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedScripts(pub Vec<String>);

/// Rewrites HTML responses with the scripts of a [`ScriptRegistry`].
pub struct ContentInjector {
    registry: Arc<ScriptRegistry>,
}

impl ContentInjector {
    /// Create an injector over a registry.
    pub fn new(registry: Arc<ScriptRegistry>) -> Self {
        Self { registry }
    }

    /// The registry scripts are taken from.
    pub fn registry(&self) -> &Arc<ScriptRegistry> {
        &self.registry
    }

    /// Whether a response is eligible: an HTML content type and a non-empty body.
    ///
    /// Bodiless responses (including `304 Not Modified`) are never rewritten.
    pub fn is_candidate(response: &Response<Bytes>) -> bool {
        let is_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/html"));

        is_html && !response.body().is_empty()
    }

    /// Scripts matching the target, in registry order.
    pub fn select(&self, target: RequestTarget<'_>) -> Vec<Userscript> {
        self.registry
            .scripts()
            .iter()
            .filter_map(ScriptEntry::script)
            .filter(|s| s.matches(target.scheme, target.host, target.path))
            .cloned()
            .collect()
    }

    /// Inject matching scripts into `response`.
    ///
    /// Returns the names of the injected scripts, empty when the response was
    /// not a candidate or nothing matched. On success the names are also stored
    /// as [`InjectedScripts`] in the response extensions.
    ///
    /// An error means the response was left as it was, headers included.
    pub fn inject(
        &self,
        target: RequestTarget<'_>,
        response: &mut Response<Bytes>,
    ) -> InjectResult<Vec<String>> {
        if !Self::is_candidate(response) {
            return Ok(Vec::new());
        }

        let scripts = self.select(target);
        if scripts.is_empty() {
            return Ok(Vec::new());
        }

        let url = target.url();
        let names: Vec<String> = scripts.iter().map(|s| s.name.clone()).collect();
        info!("{:?} match {}", names, url);

        if let Some(encoding) = content_encoding(response.headers()) {
            warn!("Not injecting into {}: body is {}-encoded", url, encoding);
            return Err(InjectError::EncodedBody(encoding));
        }

        let html = match std::str::from_utf8(response.body()) {
            Ok(html) => html,
            Err(_) => {
                let charset = declared_charset(response.headers())
                    .unwrap_or_else(|| "undeclared".to_string());
                warn!("Not injecting into {}: body is not UTF-8 (charset {})", url, charset);
                return Err(InjectError::NonUtf8Body(charset));
            }
        };
        let rewritten = match inject_scripts(html, &scripts) {
            Ok(rewritten) => rewritten,
            Err(e) => {
                warn!("Parsing HTML in {} failed: {}", url, e);
                return Err(e);
            }
        };

        invalidate_caching(response.headers_mut());

        let body = Bytes::from(rewritten);
        if response.headers().contains_key(header::CONTENT_LENGTH) {
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        *response.body_mut() = body;

        for name in &names {
            debug!("\"{}\" script injected to {}", name, url);
        }
        response
            .extensions_mut()
            .insert(InjectedScripts(names.clone()));

        Ok(names)
    }
}

/// Rewrite headers so the client keeps talking plain HTTP/1-2 through the
/// proxy, does not report the interception, and does not cache the page.
pub fn invalidate_caching(headers: &mut HeaderMap) {
    headers.remove(header::ALT_SVC);
    headers.insert(header::ALT_SVC, HeaderValue::from_static("clear"));

    headers.remove("report-to");
    headers.remove("nel");

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
}

/// Parse `html`, insert the script tags at the start of `<body>` and serialize
/// the document again.
pub fn inject_scripts(html: &str, scripts: &[Userscript]) -> InjectResult<String> {
    let mut document = Html::parse_document(html);

    let body_id = document
        .root_element()
        .children()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "body")
        .map(|el| el.id())
        .ok_or(InjectError::NoBody)?;
    let mut body = document.tree.get_mut(body_id).ok_or(InjectError::NoBody)?;

    // Every prepend pushes earlier insertions back, so walk in reverse.
    for script in scripts.iter().rev() {
        body.prepend(script_element(INLINE_SCRIPT_TYPE, None))
            .append(Node::Text(Text {
                text: StrTendril::from_slice(&script.body),
            }));

        for dep in script.dependencies.iter().rev() {
            body.prepend(script_element(DEPENDENCY_SCRIPT_TYPE, Some(dep)));
        }
    }

    Ok(document.html())
}

fn script_element(script_type: &str, src: Option<&str>) -> Node {
    let mut attrs = vec![attribute("type", script_type)];
    if let Some(src) = src {
        attrs.push(attribute("src", src));
    }

    let name = QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from("script"));
    Node::Element(Element::new(name, attrs))
}

fn attribute(name: &str, value: &str) -> Attribute {
    Attribute {
        name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
        value: AttrTendril::from_slice(value),
    }
}

/// The `charset` parameter of the content type, if any.
fn declared_charset(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// The body encoding if it is anything other than identity.
fn content_encoding(headers: &HeaderMap) -> Option<String> {
    let encoding = headers.get(header::CONTENT_ENCODING)?.to_str().ok()?.trim();
    if encoding.is_empty() || encoding.eq_ignore_ascii_case("identity") {
        None
    } else {
        Some(encoding.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const PAGE: &str = "<!DOCTYPE html><html><head><title>t</title></head><body><p>hi</p></body></html>";

    fn registry_with(files: &[(&str, &str)]) -> (TempDir, Arc<ScriptRegistry>) {
        let dir = tempdir().unwrap();
        for (name, content) in files {
            fs::write(dir.path().join(name), content).unwrap();
        }
        let registry = Arc::new(ScriptRegistry::new(dir.path()));
        (dir, registry)
    }

    fn html_response(body: &str) -> Response<Bytes> {
        Response::builder()
            .status(200)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(header::CONTENT_LENGTH, body.len())
            .header(header::ALT_SVC, "h3=\":443\"")
            .header("report-to", "{\"group\":\"default\"}")
            .header("nel", "{\"report_to\":\"default\"}")
            .header(header::CACHE_CONTROL, "max-age=3600")
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    fn target() -> RequestTarget<'static> {
        RequestTarget {
            scheme: "https",
            host: "www.example.com",
            path: "/index.html",
        }
    }

    /// Body children rendered as `src` for dependency tags, inline text for
    /// inline scripts and the tag name for anything else.
    fn body_children(html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let body = document.select(&Selector::parse("body").unwrap()).next().unwrap();
        body.children()
            .filter_map(ElementRef::wrap)
            .map(|el| match (el.value().name(), el.value().attr("src")) {
                ("script", Some(src)) => src.to_string(),
                ("script", None) => el.text().collect::<String>(),
                (name, _) => name.to_string(),
            })
            .collect()
    }

    fn script(name: &str, body: &str, deps: &[&str]) -> Userscript {
        Userscript {
            name: name.to_string(),
            body: body.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_injection_order_deps_then_script_in_match_order() {
        // Intentional: each script is preceded by its own dependencies, and
        // earlier matches come first.
        let scripts = vec![script("A", "A", &["a1"]), script("B", "B", &["b1"])];
        let html = inject_scripts(PAGE, &scripts).unwrap();

        assert_eq!(body_children(&html), vec!["a1", "A", "b1", "B", "p"]);
    }

    #[test]
    fn test_multiple_dependencies_keep_order() {
        let scripts = vec![script("A", "A", &["d1", "d2", "d3"])];
        let html = inject_scripts(PAGE, &scripts).unwrap();

        assert_eq!(body_children(&html), vec!["d1", "d2", "d3", "A", "p"]);
    }

    #[test]
    fn test_script_tags_have_types() {
        let scripts = vec![script("A", "if (a < b) { go(); }", &["dep.js"])];
        let html = inject_scripts(PAGE, &scripts).unwrap();

        let document = Html::parse_document(&html);
        let tags: Vec<_> = document
            .select(&Selector::parse("body > script").unwrap())
            .collect();
        assert_eq!(tags[0].value().attr("type"), Some(DEPENDENCY_SCRIPT_TYPE));
        assert_eq!(tags[0].value().attr("src"), Some("dep.js"));
        assert_eq!(tags[1].value().attr("type"), Some(INLINE_SCRIPT_TYPE));
        // Script text is not entity-escaped
        assert!(html.contains("if (a < b) { go(); }"));
    }

    #[test]
    fn test_document_without_body_fails() {
        let frameset = "<html><head></head><frameset><frame src=\"a.html\"></frameset></html>";
        let result = inject_scripts(frameset, &[script("A", "A", &[])]);
        assert!(matches!(result, Err(InjectError::NoBody)));
    }

    #[test]
    fn test_inject_rewrites_matching_response() {
        let (_dir, registry) = registry_with(&[(
            "a.js",
            "// @name A\n// @match https://*.example.com/*\n// @require a1.js\na();\n",
        )]);
        let injector = ContentInjector::new(registry);
        let mut response = html_response(PAGE);

        let names = injector.inject(target(), &mut response).unwrap();
        assert_eq!(names, vec!["A".to_string()]);

        let headers = response.headers();
        assert_eq!(headers.get(header::ALT_SVC).unwrap(), "clear");
        assert!(headers.get("report-to").is_none());
        assert!(headers.get("nel").is_none());
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
        assert_eq!(headers.get(header::EXPIRES).unwrap(), "0");
        assert_eq!(
            headers.get(header::CONTENT_LENGTH).unwrap(),
            &response.body().len().to_string()
        );

        let html = String::from_utf8(response.body().to_vec()).unwrap();
        assert_eq!(body_children(&html), vec!["a1.js", "a();\n", "p"]);
        assert_eq!(
            response.extensions().get::<InjectedScripts>(),
            Some(&InjectedScripts(vec!["A".to_string()]))
        );
    }

    #[test]
    fn test_no_match_leaves_response_untouched() {
        let (_dir, registry) = registry_with(&[(
            "a.js",
            "// @name A\n// @match https://other.org/*\na();\n",
        )]);
        let injector = ContentInjector::new(registry);
        let mut response = html_response(PAGE);

        let names = injector.inject(target(), &mut response).unwrap();
        assert!(names.is_empty());
        assert_eq!(response.body(), PAGE);
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "max-age=3600");
        assert!(response.extensions().get::<InjectedScripts>().is_none());
    }

    #[test]
    fn test_empty_body_is_not_mutated() {
        let (_dir, registry) = registry_with(&[("a.js", "// @match *://*/*\na();\n")]);
        let injector = ContentInjector::new(registry);
        let mut response = html_response("");

        let names = injector.inject(target(), &mut response).unwrap();
        assert!(names.is_empty());
        assert!(response.body().is_empty());
        assert_eq!(response.headers().get(header::ALT_SVC).unwrap(), "h3=\":443\"");
        assert!(response.headers().get("nel").is_some());
    }

    #[test]
    fn test_non_html_is_not_mutated() {
        let (_dir, registry) = registry_with(&[("a.js", "// @match *://*/*\na();\n")]);
        let injector = ContentInjector::new(registry);
        let mut response = Response::builder()
            .header(header::CONTENT_TYPE, "application/json")
            .body(Bytes::from_static(b"{\"a\":1}"))
            .unwrap();

        assert!(injector.inject(target(), &mut response).unwrap().is_empty());
        assert_eq!(response.body(), "{\"a\":1}");
    }

    #[test]
    fn test_encoded_body_is_skipped() {
        let (_dir, registry) = registry_with(&[("a.js", "// @match *://*/*\na();\n")]);
        let injector = ContentInjector::new(registry);
        let mut response = html_response(PAGE);
        response
            .headers_mut()
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let result = injector.inject(target(), &mut response);
        assert!(matches!(result, Err(InjectError::EncodedBody(_))));
        assert_eq!(response.body(), PAGE);
    }

    #[test]
    fn test_latin1_body_is_left_byte_identical() {
        let (_dir, registry) = registry_with(&[("a.js", "// @match *://*/*\na();\n")]);
        let injector = ContentInjector::new(registry);
        let latin1: &[u8] = b"<html><body><p>caf\xe9</p></body></html>";
        let mut response = Response::builder()
            .header(header::CONTENT_TYPE, "text/html; charset=iso-8859-1")
            .header(header::CACHE_CONTROL, "max-age=3600")
            .body(Bytes::from_static(latin1))
            .unwrap();

        let result = injector.inject(target(), &mut response);
        assert!(matches!(result, Err(InjectError::NonUtf8Body(ref c)) if c == "iso-8859-1"));
        assert_eq!(response.body().as_ref(), latin1);
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "max-age=3600");
        assert!(response.extensions().get::<InjectedScripts>().is_none());
    }

    #[test]
    fn test_declared_charset() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_charset(&headers), None);

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/html; Charset=\"windows-1252\""),
        );
        assert_eq!(declared_charset(&headers).as_deref(), Some("windows-1252"));
    }

    #[test]
    fn test_frameset_page_is_left_untouched() {
        let (_dir, registry) = registry_with(&[("a.js", "// @match *://*/*\na();\n")]);
        let injector = ContentInjector::new(registry);
        let frameset = "<html><head></head><frameset><frame src=\"a.html\"></frameset></html>";
        let mut response = html_response(frameset);

        let result = injector.inject(target(), &mut response);
        assert!(matches!(result, Err(InjectError::NoBody)));
        assert_eq!(response.body(), frameset);
        assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "max-age=3600");
        assert!(response.extensions().get::<InjectedScripts>().is_none());
    }

    #[test]
    fn test_failed_scripts_never_inject() {
        let (dir, registry) = registry_with(&[]);
        fs::write(dir.path().join("bad.js"), [0xffu8, 0xfe]).unwrap();
        registry.invalidate();
        let injector = ContentInjector::new(registry);

        assert!(injector.select(target()).is_empty());
    }

    #[test]
    fn test_reload_before_injection() {
        let (dir, registry) = registry_with(&[]);
        let injector = ContentInjector::new(registry.clone());
        assert!(injector.select(target()).is_empty());

        fs::write(
            dir.path().join("late.js"),
            "// @name Late\n// @match https://*/*\nlate();\n",
        )
        .unwrap();
        registry.invalidate();

        let mut response = html_response(PAGE);
        let names = injector.inject(target(), &mut response).unwrap();
        assert_eq!(names, vec!["Late".to_string()]);
    }

    #[test]
    fn test_selection_preserves_registry_order() {
        let (_dir, registry) = registry_with(&[
            ("one.js", "// @name One\n// @match https://*/*\n1;\n"),
            ("two.js", "// @name Two\n// @match https://*/*\n2;\n"),
        ]);
        let injector = ContentInjector::new(registry.clone());

        let expected: Vec<String> = registry
            .scripts()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        let selected: Vec<String> = injector
            .select(target())
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(selected, expected);
    }
}
