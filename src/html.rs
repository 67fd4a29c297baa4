//! Streaming title and anchor extraction built on `lol_html`.

use encoding_rs::Encoding;
use lol_html::{AsciiCompatibleEncoding, ElementContentHandlers, HtmlRewriter, Selector, Settings};
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use thiserror::Error;

/// A validated CSS selector that scopes which anchors are extracted.
#[derive(Clone, PartialEq, Eq)]
pub struct LinkSelector {
    source: String,
}

impl LinkSelector {
    /// Parses `selector`, rejecting syntax `lol_html` cannot match.
    pub fn new(selector: &str) -> Result<Self, SelectorError> {
        let trimmed = selector.trim();
        parse_selector(trimmed)?;
        Ok(Self {
            source: trimmed.to_string(),
        })
    }

    /// Selector text as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn compile(&self) -> Result<Selector, SelectorError> {
        parse_selector(&self.source)
    }
}

impl fmt::Debug for LinkSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LinkSelector").field(&self.source).finish()
    }
}

fn parse_selector(selector: &str) -> Result<Selector, SelectorError> {
    selector.parse::<Selector>().map_err(|source| SelectorError {
        selector: selector.to_string(),
        source,
    })
}

/// Selector text that `lol_html` rejected.
#[derive(Debug, Error)]
#[error("invalid selector `{selector}`: {source}")]
pub struct SelectorError {
    selector: String,
    #[source]
    source: lol_html::errors::SelectorError,
}

/// An anchor as written in the page; `href` is not yet resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    /// Raw `href` attribute value.
    pub href: String,
    /// Visible link text.
    pub text: String,
}

/// Title and selector-scoped anchors of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedPage {
    /// Text of the first `<title>`; empty if absent.
    pub title: String,
    /// Anchors matched by the selector, in document order.
    pub anchors: Vec<Anchor>,
}

/// Errors surfaced while extracting from HTML.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The configured selector no longer compiles.
    #[error(transparent)]
    Selector(#[from] SelectorError),
    /// The HTML rewriter encountered malformed markup.
    #[error("html rewrite error: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),
}

#[derive(Default)]
struct Collector {
    titles_seen: usize,
    title: String,
    anchors: Vec<Anchor>,
    open_anchor: Option<usize>,
}

/// Extracts the page title and every `<a href>` matched by `selector`.
///
/// The body is read as UTF-8 unless a `<meta charset>` says otherwise.
pub fn extract(body: &[u8], selector: &LinkSelector) -> Result<ExtractedPage, ExtractError> {
    extract_with_charset(body, selector, None)
}

/// The `charset` parameter of a `Content-Type` value, if any.
pub fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"'))
            .filter(|value| !value.is_empty())
    })
}

/// Like [`extract`], decoding the body as `charset` when it names a known
/// ASCII-compatible encoding. A declared charset takes precedence over
/// `<meta charset>`.
pub fn extract_with_charset(
    body: &[u8],
    selector: &LinkSelector,
    charset: Option<&str>,
) -> Result<ExtractedPage, ExtractError> {
    let declared = charset
        .and_then(|label| Encoding::for_label_no_replacement(label.as_bytes()))
        .and_then(AsciiCompatibleEncoding::new);
    let anchor_selector = selector.compile()?;
    let title_selector = parse_selector("title")?;
    let collector = RefCell::new(Collector::default());

    let title_handlers = ElementContentHandlers::default()
        .element(|_el| {
            collector.borrow_mut().titles_seen += 1;
            Ok(())
        })
        .text(|chunk| {
            let mut state = collector.borrow_mut();
            if state.titles_seen == 1 {
                state.title.push_str(chunk.as_str());
            }
            Ok(())
        });

    let anchor_handlers = ElementContentHandlers::default()
        .element(|el| {
            let mut state = collector.borrow_mut();
            state.open_anchor = None;
            if !el.tag_name().eq_ignore_ascii_case("a") {
                return Ok(());
            }
            if let Some(href) = el.get_attribute("href") {
                let href = href.trim().to_string();
                if !href.is_empty() {
                    let idx = state.anchors.len();
                    state.anchors.push(Anchor {
                        href,
                        text: String::new(),
                    });
                    state.open_anchor = Some(idx);
                }
            }
            Ok(())
        })
        .text(|chunk| {
            let mut state = collector.borrow_mut();
            if let Some(idx) = state.open_anchor {
                state.anchors[idx].text.push_str(chunk.as_str());
            }
            Ok(())
        });

    {
        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![
                    (Cow::Owned(title_selector), title_handlers),
                    (Cow::Owned(anchor_selector), anchor_handlers),
                ],
                encoding: declared.unwrap_or_else(AsciiCompatibleEncoding::utf_8),
                adjust_charset_on_meta_tag: declared.is_none(),
                ..Settings::default()
            },
            |_: &[u8]| {},
        );
        rewriter.write(body)?;
        rewriter.end()?;
    }

    let Collector { title, anchors, .. } = collector.into_inner();
    Ok(ExtractedPage {
        title: clean_text(&title),
        anchors: anchors
            .into_iter()
            .map(|anchor| Anchor {
                href: decode_entities(&anchor.href),
                text: clean_text(&anchor.text),
            })
            .collect(),
    })
}

fn clean_text(raw: &str) -> String {
    decode_entities(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decodes the handful of entities that show up in titles and link text.
fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|ch| (ch, end)));
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hotnews() -> LinkSelector {
        LinkSelector::new(".hotnews a").expect("selector")
    }

    #[test]
    fn extracts_title_and_scoped_anchors() {
        let body = br#"
            <html><head><title> Daily   News &amp; More </title></head>
            <body>
              <a href="/outside">Not in scope</a>
              <div class="hotnews">
                <ul>
                  <li><a href="https://news.test/a">Football <b>scores</b></a></li>
                  <li><a href="/b?x=1&amp;y=2">Weather today</a></li>
                  <li><a>No href</a></li>
                </ul>
              </div>
            </body></html>
        "#;
        let page = extract(body, &hotnews()).expect("extract");
        assert_eq!(page.title, "Daily News & More");
        assert_eq!(
            page.anchors,
            vec![
                Anchor {
                    href: "https://news.test/a".into(),
                    text: "Football scores".into(),
                },
                Anchor {
                    href: "/b?x=1&y=2".into(),
                    text: "Weather today".into(),
                },
            ]
        );
    }

    #[test]
    fn missing_title_is_empty() {
        let page = extract(b"<p>no head</p>", &hotnews()).expect("extract");
        assert_eq!(page.title, "");
        assert!(page.anchors.is_empty());
    }

    #[test]
    fn only_first_title_counts() {
        let body = b"<title>First</title><svg><title>Second</title></svg>";
        let page = extract(body, &hotnews()).expect("extract");
        assert_eq!(page.title, "First");
    }

    #[test]
    fn declared_charset_decodes_gbk() {
        let (title, _, _) = encoding_rs::GBK.encode("新闻中心");
        let (link, _, _) = encoding_rs::GBK.encode("体育");
        let mut body = b"<title>".to_vec();
        body.extend_from_slice(&title);
        body.extend_from_slice(b"</title><div class=\"hotnews\"><a href=\"/s\">");
        body.extend_from_slice(&link);
        body.extend_from_slice(b"</a></div>");

        let page = extract_with_charset(&body, &hotnews(), Some("GBK")).expect("extract");
        assert_eq!(page.title, "新闻中心");
        assert_eq!(page.anchors[0].text, "体育");
    }

    #[test]
    fn meta_charset_applies_without_declared_charset() {
        let (title, _, _) = encoding_rs::GBK.encode("新闻");
        let mut body = b"<meta charset=\"gb2312\"><title>".to_vec();
        body.extend_from_slice(&title);
        body.extend_from_slice(b"</title>");
        let page = extract(&body, &hotnews()).expect("extract");
        assert_eq!(page.title, "新闻");
    }

    #[test]
    fn charset_param_parsing() {
        assert_eq!(charset_param("text/html; charset=GB2312"), Some("GB2312"));
        assert_eq!(charset_param("text/html;Charset=\"utf-8\""), Some("utf-8"));
        assert_eq!(charset_param("text/html"), None);
        assert_eq!(charset_param("text/html; charset="), None);
    }

    #[test]
    fn invalid_selector_rejected() {
        assert!(LinkSelector::new("a[").is_err());
    }

    #[test]
    fn numeric_entities_decode() {
        assert_eq!(decode_entities("&#20170;&#x65E5; &bogus; & done"), "今日 &bogus; & done");
    }
}
