//! Chapter pages. Only `#chapter-content > p` paragraphs carrying an `id` are content; the site
//! injects id-less paragraphs that must not reach the book.

use crate::epub::{xml_escape, EpubBuilder};
use crate::scraper::client::Fetcher;
use crate::scraper::error::ScraperError;
use crate::scraper::images::ImageCache;
use crate::scraper::parse_selector;
use chrono::{DateTime, NaiveDateTime};
use log::warn;
use regex::Regex;
use scraper::{ElementRef, Html, Node};
use std::sync::OnceLock;

/// Class set on images that now point into the book.
pub const INSERTED_IMAGE_CLASS: &str = "insert";
const PUBLISHED_LABEL: &str = "Ngày đăng";
const UNKNOWN_DATE: &str = "Unknown";

const VOID_ELEMENTS: [&str; 8] = ["br", "hr", "img", "input", "meta", "link", "source", "wbr"];

fn note_marker() -> &'static Regex {
    static NOTE: OnceLock<Regex> = OnceLock::new();
    NOTE.get_or_init(|| Regex::new(r"\[note\d*\]").expect("note marker pattern is valid"))
}

/// Fetches chapter pages and renders them into book sections.
#[derive(Debug, Clone, Copy)]
pub struct ChapterExtractor<'a> {
    images: &'a ImageCache,
    render_notes: bool,
}

impl<'a> ChapterExtractor<'a> {
    pub fn new(images: &'a ImageCache, render_notes: bool) -> Self {
        Self {
            images,
            render_notes,
        }
    }

    /// Fetch and render one chapter. Images are cached and registered with `book` on the way.
    ///
    /// Transport and body-read failures count against the retry ceiling; a non-200 answer skips
    /// the chapter at once. `None` tells the caller to skip the chapter.
    pub fn extract(&self, fetcher: &mut Fetcher, book: &mut EpubBuilder, url: &str) -> Option<String> {
        fetcher.retry(&format!("Chapter {}", url), |f| {
            let response = f.get(url, None)?;
            if !response.is_ok() {
                return Err(ScraperError::HttpStatus {
                    status: response.status(),
                    url: url.to_string(),
                    context: Some("chapter".to_string()),
                });
            }
            let html = response.text()?;
            let mut resolve = |src: &str| self.images.resolve(f, book, src, true);
            render_chapter(&html, url, self.render_notes, &mut resolve)
        })
    }
}

/// Render a chapter page into a section fragment: header, subtitle, divider, then one `<p>` per
/// content paragraph with images rewritten through `resolve_image` and notes appended.
///
/// An image `resolve_image` cannot handle keeps its original tag. A page without
/// `#chapter-content` (locked or removed chapter) renders the header with no paragraphs.
pub fn render_chapter(
    html: &str,
    url: &str,
    render_notes: bool,
    resolve_image: &mut dyn FnMut(&str) -> Option<String>,
) -> Result<String, ScraperError> {
    let doc = Html::parse_document(html);

    let container_sel = parse_selector("#chapter-content")?;
    if doc.select(&container_sel).next().is_none() {
        warn!("Chapter {}: no #chapter-content; header only", url);
    }

    let title_sel = parse_selector(".title-top > h4")?;
    let subtitle_sel = parse_selector(".title-top > h6")?;
    let time_sel = parse_selector(".title-top > h6 > time")?;
    let paragraph_sel = parse_selector("#chapter-content > p")?;

    let title = select_text(&doc, &title_sel);
    let subtitle_text = select_text(&doc, &subtitle_sel);
    let lead = subtitle_text
        .split(" - ")
        .next()
        .unwrap_or_default()
        .trim();
    let published = render_published(
        doc.select(&time_sel)
            .next()
            .and_then(|t| t.value().attr("datetime")),
    );
    let subtitle = format!("{} - {}: {}", lead, PUBLISHED_LABEL, published);

    let mut out = String::new();
    out.push_str(r#"<h2 class="chapter-header">"#);
    out.push_str(&xml_escape(&title));
    out.push_str("</h2>");
    out.push_str(r#"<h4 class="chapter-header">"#);
    out.push_str(&xml_escape(&subtitle));
    out.push_str("</h4>");
    out.push_str(r#"<hr class="header"/>"#);
    out.push_str(r#"<div class="reading-content">"#);

    for paragraph in doc.select(&paragraph_sel) {
        if paragraph.value().attr("id").is_none() {
            continue;
        }

        let mut inner = String::new();
        render_children(paragraph, &mut inner, resolve_image);

        let notes: Vec<String> = note_marker()
            .find_iter(&inner)
            .map(|m| m.as_str().trim_start_matches('[').trim_end_matches(']').to_string())
            .collect();
        let inner = note_marker().replace_all(&inner, "");

        out.push_str("<p>");
        out.push_str(&inner);
        out.push_str("</p>");

        if render_notes {
            for note in notes {
                let content = note_content(&doc, &note, resolve_image)?;
                if content.trim().is_empty() {
                    continue;
                }
                out.push_str(&format!(r#"<p class="note">({}: {})</p>"#, note, content));
            }
        }
    }

    out.push_str("</div>");
    Ok(out)
}

fn select_text(doc: &Html, sel: &scraper::Selector) -> String {
    doc.select(sel)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

/// `#<note> > .note-content_real`, rendered; empty when absent.
fn note_content(
    doc: &Html,
    note: &str,
    resolve_image: &mut dyn FnMut(&str) -> Option<String>,
) -> Result<String, ScraperError> {
    let sel = parse_selector(&format!("#{} > .note-content_real", note))?;
    let mut out = String::new();
    if let Some(el) = doc.select(&sel).next() {
        render_children(el, &mut out, resolve_image);
    }
    Ok(out)
}

/// Serialize the children of `el` as XHTML, swapping resolvable images for book-local ones.
fn render_children(
    el: ElementRef<'_>,
    out: &mut String,
    resolve_image: &mut dyn FnMut(&str) -> Option<String>,
) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(&xml_escape(text)),
            Node::Element(element) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                let name = element.name();
                if name == "img" {
                    render_image(child_el, out, resolve_image);
                    continue;
                }
                out.push('<');
                out.push_str(name);
                push_attrs(out, element.attrs());
                if VOID_ELEMENTS.contains(&name) {
                    out.push_str("/>");
                    continue;
                }
                out.push('>');
                render_children(child_el, out, resolve_image);
                out.push_str("</");
                out.push_str(name);
                out.push('>');
            }
            _ => {}
        }
    }
}

fn render_image(
    img: ElementRef<'_>,
    out: &mut String,
    resolve_image: &mut dyn FnMut(&str) -> Option<String>,
) {
    let element = img.value();
    let local = element
        .attr("src")
        .filter(|src| !src.trim().is_empty())
        .and_then(|src| resolve_image(src));

    out.push_str("<img");
    match local {
        Some(href) => {
            push_attrs(
                out,
                element.attrs().filter(|(k, _)| *k != "src" && *k != "class"),
            );
            push_attrs(
                out,
                [("class", INSERTED_IMAGE_CLASS), ("src", href.as_str())].into_iter(),
            );
        }
        None => push_attrs(out, element.attrs()),
    }
    out.push_str("/>");
}

fn push_attrs<'a>(out: &mut String, attrs: impl Iterator<Item = (&'a str, &'a str)>) {
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&xml_escape(value));
        out.push('"');
    }
}

/// `dd/mm/YYYY HH:MM` when the datetime parses, the raw value otherwise, "Unknown" when absent.
fn render_published(raw: Option<&str>) -> String {
    let raw = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(r) => r,
        None => return UNKNOWN_DATE.to_string(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.format("%d/%m/%Y %H:%M").to_string();
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return dt.format("%d/%m/%Y %H:%M").to_string();
    }
    raw.to_string()
}
