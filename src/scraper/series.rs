//! Series landing page: metadata, volume list, chapter links.

use crate::model::{Chapter, Series, Volume};
use crate::scraper::client::Fetcher;
use crate::scraper::error::ScraperError;
use crate::scraper::parse_selector;
use log::{debug, info};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;

const SERIES_PATH: &str = "/truyen/";
const NO_COVER_PATH: &str = "/img/nocover.jpg";

const AUTHOR_LABEL: &str = "Tác giả:";
const ARTIST_LABEL: &str = "Họa sĩ:";
const STATUS_LABEL: &str = "Tình trạng:";

fn share_pattern() -> &'static Regex {
    static SHARE: OnceLock<Regex> = OnceLock::new();
    SHARE.get_or_init(|| {
        Regex::new(r#"writeText\(\s*['"]([^'"]+)['"]\s*\)"#).expect("share pattern is valid")
    })
}

fn style_url_pattern() -> &'static Regex {
    static STYLE_URL: OnceLock<Regex> = OnceLock::new();
    STYLE_URL.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?(.*?)['"]?\s*\)"#).expect("style url pattern is valid")
    })
}

/// Fetch and parse the landing page. Any failure here is fatal for the run.
pub fn fetch_series(fetcher: &mut Fetcher, link: &str) -> Result<Series, ScraperError> {
    let link = link.trim();
    Url::parse(link).map_err(|e| ScraperError::InvalidUrl {
        input: link.to_string(),
        reason: e.to_string(),
    })?;

    info!("Fetching series page {}", link);
    let response = fetcher.get(link, None)?;
    if !response.is_ok() {
        return Err(ScraperError::HttpStatus {
            status: response.status(),
            url: link.to_string(),
            context: Some("series page".to_string()),
        });
    }
    let html = response.text()?;
    parse_series(&html, link)
}

/// Parse a landing page into a [Series]. A page listing no volumes is an error.
pub fn parse_series(html: &str, link: &str) -> Result<Series, ScraperError> {
    let doc = Html::parse_document(html);

    let share_sel = parse_selector(".sharing-item")?;
    let share_attr = doc
        .select(&share_sel)
        .find_map(|e| e.value().attr("@click.prevent"));
    let (base_url, id) = share_attr
        .and_then(parse_share_link)
        .or_else(|| split_series_link(link))
        .ok_or_else(|| ScraperError::ParseSeriesPage {
            message: format!("no share link and {} is not a series link", link),
        })?;
    debug!("Series id {} on {}", id, base_url);

    let title_sel = parse_selector(".series-name > a")?;
    let translator_sel = parse_selector(".series-owner_name > a")?;
    let group_sel = parse_selector(".fantrans-value > a")?;
    let cover_sel = parse_selector(".series-cover > .a6-ratio > div")?;
    let summary_sel = parse_selector(".summary-content > p")?;

    let mut series = Series {
        id,
        title: first_text(&doc, &title_sel),
        translator: first_text(&doc, &translator_sel),
        group: first_text(&doc, &group_sel),
        cover: parse_image_link(first_attr(&doc, &cover_sel, "style"), &base_url),
        description: doc
            .select(&summary_sel)
            .map(element_text)
            .collect(),
        base_url,
        ..Default::default()
    };

    let info_sel = parse_selector(".info-item")?;
    let info_name_sel = parse_selector(".info-name")?;
    let info_value_sel = parse_selector(".info-value > a")?;
    for item in doc.select(&info_sel) {
        let Some(name) = item.select(&info_name_sel).next().map(element_text) else {
            continue;
        };
        let value = item
            .select(&info_value_sel)
            .next()
            .map(element_text)
            .unwrap_or_default();
        match name.as_str() {
            AUTHOR_LABEL => series.author = value,
            ARTIST_LABEL => series.artist = value,
            STATUS_LABEL => series.status = value,
            _ => {}
        }
    }

    series.volumes = parse_volumes(&doc, &series.base_url)?;
    if series.volumes.is_empty() {
        return Err(ScraperError::EmptyVolumeList);
    }
    Ok(series)
}

fn parse_volumes(doc: &Html, base_url: &str) -> Result<Vec<Volume>, ScraperError> {
    let volume_sel = parse_selector(".volume-list")?;
    let title_sel = parse_selector(".sect-title")?;
    let cover_sel = parse_selector(".volume-cover > a > .a6-ratio > div")?;
    let chapter_sel = parse_selector(".list-chapters > li .chapter-name > a")?;

    let volumes = doc
        .select(&volume_sel)
        .map(|vol| {
            let cover_style = vol
                .select(&cover_sel)
                .next()
                .and_then(|d| d.value().attr("style"));
            let chapters = vol
                .select(&chapter_sel)
                .map(|a| Chapter {
                    title: element_text(a),
                    url: join_link(base_url, a.value().attr("href").unwrap_or_default()),
                })
                .collect();
            Volume {
                title: vol
                    .select(&title_sel)
                    .next()
                    .map(element_text)
                    .unwrap_or_default(),
                cover: parse_image_link(cover_style, base_url),
                chapters,
            }
        })
        .collect();
    Ok(volumes)
}

/// Split the share attribute (`window.navigator.clipboard.writeText('<url>')`) into
/// `(base_url, id)`. Both come from the same string.
pub fn parse_share_link(attr: &str) -> Option<(String, String)> {
    let url = share_pattern()
        .captures(attr)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(attr);
    split_series_link(url)
}

fn split_series_link(url: &str) -> Option<(String, String)> {
    let (base, rest) = url.trim().split_once(SERIES_PATH)?;
    let id = rest.split(['/', '?', '#']).next()?.trim();
    if base.is_empty() || id.is_empty() {
        return None;
    }
    Some((base.trim_end_matches('/').to_string(), id.to_string()))
}

/// Image URL from a `background-image: url('...')` style, or the site's no-cover image.
pub fn parse_image_link(style: Option<&str>, base_url: &str) -> String {
    style
        .and_then(|s| style_url_pattern().captures(s))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}{}", base_url.trim_end_matches('/'), NO_COVER_PATH))
}

fn join_link(base_url: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    Url::parse(base_url)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{}{}", base_url, href))
}

fn element_text(e: ElementRef<'_>) -> String {
    e.text().collect::<String>().trim().to_string()
}

fn first_text(doc: &Html, sel: &Selector) -> String {
    doc.select(sel).next().map(element_text).unwrap_or_default()
}

fn first_attr<'a>(doc: &'a Html, sel: &Selector, attr: &str) -> Option<&'a str> {
    doc.select(sel).next().and_then(|e| e.value().attr(attr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::testing::*;

    const LINK: &str = "https://ln.hako.vn/truyen/9999-sample-series";

    const SERIES_PAGE: &str = r##"<!DOCTYPE html><html><body>
<div class="series-name"><a href="/truyen/9999-sample-series"> Sample Series </a></div>
<div class="series-cover"><div class="a6-ratio"><div class="content img-in-ratio" style="background-image: url('https://i.docln.net/covers/s.jpg')"></div></div></div>
<div class="series-information">
  <div class="info-item"><span class="info-name">Tác giả:</span><span class="info-value"><a href="#">Tác Giả A</a></span></div>
  <div class="info-item"><span class="info-name">Họa sĩ:</span><span class="info-value"><a href="#">Họa Sĩ B</a></span></div>
  <div class="info-item"><span class="info-name">Tình trạng:</span><span class="info-value"><a href="#">Đang tiến hành</a></span></div>
</div>
<div class="summary-content"><p> Line one. </p><p>Line two.</p></div>
<div class="series-owner_name"><a href="#">Dịch Giả C</a></div>
<div class="fantrans-value"><a href="#">Nhóm D</a></div>
<a class="sharing-item" @click.prevent="window.navigator.clipboard.writeText('https://docln.net/truyen/9999-sample-series')">Share</a>
<section class="volume-list">
  <header><span class="sect-title"> Tập 1 </span></header>
  <div class="volume-cover"><a href="#"><div class="a6-ratio"><div style="background-image: url('https://i.docln.net/v1.jpg')"></div></div></a></div>
  <ul class="list-chapters">
    <li><div class="chapter-name"><a href="/truyen/9999-sample-series/c1-mo-dau">Mở đầu</a></div></li>
    <li><div class="chapter-name"><a href="/truyen/9999-sample-series/c2-chuong-1">Chương 1</a></div></li>
  </ul>
</section>
<section class="volume-list">
  <header><span class="sect-title">Tập 2</span></header>
  <div class="volume-cover"><a href="#"><div class="a6-ratio"><div style=""></div></div></a></div>
  <ul class="list-chapters"></ul>
</section>
</body></html>"##;

    #[test]
    fn parses_full_landing_page() -> Result<(), ScraperError> {
        let s = parse_series(SERIES_PAGE, LINK)?;
        assert_eq!(s.id, "9999-sample-series");
        assert_eq!(s.base_url, "https://docln.net");
        assert_eq!(s.title, "Sample Series");
        assert_eq!(s.author, "Tác Giả A");
        assert_eq!(s.artist, "Họa Sĩ B");
        assert_eq!(s.status, "Đang tiến hành");
        assert_eq!(s.translator, "Dịch Giả C");
        assert_eq!(s.group, "Nhóm D");
        assert_eq!(s.cover, "https://i.docln.net/covers/s.jpg");
        assert_eq!(s.description, vec!["Line one.", "Line two."]);
        assert_eq!(s.volumes.len(), 2);
        assert_eq!(s.volumes[0].title, "Tập 1");
        assert_eq!(s.volumes[0].cover, "https://i.docln.net/v1.jpg");
        assert_eq!(
            s.volumes[0].chapters,
            vec![
                Chapter {
                    title: "Mở đầu".to_string(),
                    url: "https://docln.net/truyen/9999-sample-series/c1-mo-dau".to_string(),
                },
                Chapter {
                    title: "Chương 1".to_string(),
                    url: "https://docln.net/truyen/9999-sample-series/c2-chuong-1".to_string(),
                },
            ]
        );
        assert_eq!(s.volumes[1].cover, "https://docln.net/img/nocover.jpg");
        assert!(s.volumes[1].chapters.is_empty());
        Ok(())
    }

    #[test]
    fn zero_volumes_is_fatal() {
        let page = r#"<html><body>
<div class="series-name"><a>Empty</a></div>
<a class="sharing-item" @click.prevent="window.navigator.clipboard.writeText('https://docln.net/truyen/1-empty')"></a>
</body></html>"#;
        assert!(matches!(
            parse_series(page, LINK),
            Err(ScraperError::EmptyVolumeList)
        ));
    }

    #[test]
    fn missing_share_link_falls_back_to_target_link() -> Result<(), ScraperError> {
        let page = SERIES_PAGE.replace("sharing-item", "something-else");
        let s = parse_series(&page, LINK)?;
        assert_eq!(s.id, "9999-sample-series");
        assert_eq!(s.base_url, "https://ln.hako.vn");
        Ok(())
    }

    #[test]
    fn no_share_link_and_foreign_link_is_a_parse_error() {
        let page = SERIES_PAGE.replace("sharing-item", "something-else");
        assert!(matches!(
            parse_series(&page, "https://example.com/book/1"),
            Err(ScraperError::ParseSeriesPage { .. })
        ));
    }

    #[test]
    fn share_link_forms() {
        assert_eq!(
            parse_share_link("window.navigator.clipboard.writeText('https://docln.net/truyen/12-abc')"),
            Some(("https://docln.net".to_string(), "12-abc".to_string()))
        );
        assert_eq!(
            parse_share_link("https://docln.net/truyen/12-abc/c3-x"),
            Some(("https://docln.net".to_string(), "12-abc".to_string()))
        );
        assert_eq!(parse_share_link("writeText('https://docln.net/')"), None);
    }

    #[test]
    fn image_link_from_style() {
        let base = "https://docln.net";
        assert_eq!(
            parse_image_link(Some("background-image: url('https://i.docln.net/a.jpg')"), base),
            "https://i.docln.net/a.jpg"
        );
        assert_eq!(
            parse_image_link(Some(r#"background-image: url("/x/b.png")"#), base),
            "/x/b.png"
        );
        assert_eq!(parse_image_link(Some("color: red"), base), "https://docln.net/img/nocover.jpg");
        assert_eq!(parse_image_link(None, "https://docln.net/"), "https://docln.net/img/nocover.jpg");
    }

    #[test]
    fn fetch_series_rejects_non_200() {
        let transport = ScriptedTransport::new().route(LINK, vec![Reply::Status(500, Vec::new())]);
        let (mut fetcher, _) = fetcher(&transport, 3);
        let result = fetch_series(&mut fetcher, LINK);
        assert!(matches!(
            result,
            Err(ScraperError::HttpStatus { status: 500, .. })
        ));
        assert_eq!(transport.calls_to(LINK), 1);
    }

    #[test]
    fn fetch_series_rejects_malformed_link() {
        let transport = ScriptedTransport::new();
        let (mut fetcher, _) = fetcher(&transport, 3);
        assert!(matches!(
            fetch_series(&mut fetcher, "not a link"),
            Err(ScraperError::InvalidUrl { .. })
        ));
        assert_eq!(transport.total_calls(), 0);
    }

    #[test]
    fn fetch_series_waits_out_rate_limit() -> Result<(), ScraperError> {
        let transport = ScriptedTransport::new().route(
            LINK,
            vec![Reply::Status(429, Vec::new()), Reply::ok(SERIES_PAGE)],
        );
        let (mut fetcher, sleeper) = fetcher(&transport, 3);
        let s = fetch_series(&mut fetcher, LINK)?;
        assert_eq!(s.volumes.len(), 2);
        assert_eq!(sleeper.waits().len(), 1);
        Ok(())
    }
}
