//! Incremental MediaWiki dump parser.
//!
//! Pulls from any `Read` and yields one [`Page`] per closed `<page>`
//! element. The event buffer is cleared on every iteration, so peak
//! memory is bounded by the largest single page regardless of dump size.
//!
//! The state machine only reacts between `<page>` and `</page>`, which
//! makes it tolerant of joining mid-stream: after a resume the bytes
//! before the next page boundary parse as ignorable junk. A parse error
//! inside one page is logged and that page is skipped; end of input
//! inside a page surfaces [`IngestError::Truncated`].

use crate::error::IngestError;
use crate::ingest::Page;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{BufReader, Read};

/// Fields accumulated while inside a `<page>` element.
#[derive(Default)]
struct PartialPage {
    id: Option<u64>,
    title: String,
    ns: Option<i64>,
    text: String,
    is_redirect: bool,
}

#[derive(Clone, Copy, PartialEq)]
enum Capture {
    None,
    Title,
    Ns,
    Id,
    Text,
}

/// Streaming iterator of pages over a decompressed byte stream.
pub struct PageStream<R: Read> {
    reader: Reader<BufReader<R>>,
    buf: Vec<u8>,
    in_page: bool,
    in_revision: bool,
    capture: Capture,
    partial: PartialPage,
    last_page_id: Option<u64>,
    /// Parser position at the previous error, to detect a wedged stream.
    last_error_pos: Option<u64>,
    /// A page was abandoned on a parse error and no page has closed
    /// since. End of input in this state counts as truncation, covering
    /// XML libraries that report an unclosed final element as an error
    /// rather than as a plain EOF.
    error_recovery: bool,
    done: bool,
}

impl<R: Read> PageStream<R> {
    pub fn new(source: R) -> Self {
        let reader = Reader::from_reader(BufReader::new(source));
        Self {
            reader,
            buf: Vec::new(),
            in_page: false,
            in_revision: false,
            capture: Capture::None,
            partial: PartialPage::default(),
            last_page_id: None,
            last_error_pos: None,
            error_recovery: false,
            done: false,
        }
    }

    /// Decompressed bytes the parser has consumed. After a `</page>`
    /// event this sits right past the closing tag, which makes it the
    /// checkpoint-safe position for the page just emitted.
    pub fn consumed(&self) -> u64 {
        self.reader.buffer_position() as u64
    }

    /// The byte source underneath the parser's buffering.
    pub fn inner(&self) -> &R {
        self.reader.get_ref().get_ref()
    }

    fn reset_page(&mut self) {
        self.in_page = false;
        self.in_revision = false;
        self.capture = Capture::None;
        self.partial = PartialPage::default();
    }

    /// Close out the current page, if it has every required field.
    fn finish_page(&mut self) -> Option<Page> {
        let partial = std::mem::take(&mut self.partial);
        self.in_page = false;
        self.in_revision = false;
        self.capture = Capture::None;

        let Some(page_id) = partial.id else {
            log::warn!("skipping page without an id near byte {}", self.consumed());
            return None;
        };
        if partial.title.is_empty() {
            log::warn!("skipping page {page_id} without a title");
            return None;
        }

        self.last_page_id = Some(page_id);
        Some(Page {
            page_id,
            title: partial.title,
            text: partial.text,
            namespace: partial.ns.unwrap_or(0),
            is_redirect: partial.is_redirect,
        })
    }

    fn handle_start(&mut self, name: &[u8]) {
        if !self.in_page {
            if name == b"page" {
                self.in_page = true;
                self.partial = PartialPage::default();
            }
            return;
        }
        match name {
            b"title" => self.capture = Capture::Title,
            b"ns" => self.capture = Capture::Ns,
            // The page id is the first <id> outside <revision>;
            // revisions and contributors carry their own ids.
            b"id" if !self.in_revision && self.partial.id.is_none() => {
                self.capture = Capture::Id
            }
            b"revision" => self.in_revision = true,
            b"text" if self.in_revision => self.capture = Capture::Text,
            b"redirect" => self.partial.is_redirect = true,
            _ => {}
        }
    }

    /// Returns true if the page failed to parse and should be skipped.
    fn handle_text(&mut self, text: &str) -> bool {
        match self.capture {
            Capture::None => false,
            Capture::Title => {
                self.partial.title.push_str(text);
                false
            }
            Capture::Text => {
                self.partial.text.push_str(text);
                false
            }
            Capture::Ns => {
                match text.trim().parse::<i64>() {
                    Ok(ns) => self.partial.ns = Some(ns),
                    Err(_) => return true,
                }
                false
            }
            Capture::Id => {
                match text.trim().parse::<u64>() {
                    Ok(id) => self.partial.id = Some(id),
                    Err(_) => return true,
                }
                false
            }
        }
    }
}

impl<R: Read> Iterator for PageStream<R> {
    type Item = Result<Page, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // The event buffer is moved out for the duration of the loop so
        // events may borrow it while the state machine borrows self.
        let mut buf = std::mem::take(&mut self.buf);
        let item = self.advance(&mut buf);
        self.buf = buf;
        item
    }
}

impl<R: Read> PageStream<R> {
    fn advance(&mut self, buf: &mut Vec<u8>) -> Option<<Self as Iterator>::Item> {
        loop {
            buf.clear();
            match self.reader.read_event_into(buf) {
                Ok(Event::Start(ref e)) => {
                    let name = e.local_name();
                    self.handle_start(name.as_ref());
                }
                Ok(Event::Empty(ref e)) => {
                    if self.in_page && e.local_name().as_ref() == b"redirect" {
                        self.partial.is_redirect = true;
                    }
                }
                Ok(Event::Text(ref e)) => {
                    if self.in_page && self.capture != Capture::None {
                        match e.unescape() {
                            Ok(text) => {
                                if self.handle_text(&text) {
                                    log::warn!(
                                        "skipping page with malformed field near byte {}",
                                        self.consumed()
                                    );
                                    self.reset_page();
                                }
                            }
                            Err(err) => {
                                log::warn!("skipping page with undecodable text: {err}");
                                self.reset_page();
                            }
                        }
                    }
                }
                Ok(Event::CData(ref e)) => {
                    if self.in_page && self.capture != Capture::None {
                        match std::str::from_utf8(e) {
                            Ok(text) => {
                                let text = text.to_owned();
                                if self.handle_text(&text) {
                                    self.reset_page();
                                }
                            }
                            Err(_) => {
                                log::warn!("skipping page with non-UTF-8 CDATA");
                                self.reset_page();
                            }
                        }
                    }
                }
                Ok(Event::End(ref e)) => {
                    if !self.in_page {
                        continue;
                    }
                    match e.local_name().as_ref() {
                        b"page" => {
                            self.error_recovery = false;
                            if let Some(page) = self.finish_page() {
                                return Some(Ok(page));
                            }
                        }
                        b"revision" => {
                            self.in_revision = false;
                            self.capture = Capture::None;
                        }
                        b"title" | b"ns" | b"id" | b"text" => self.capture = Capture::None,
                        _ => {}
                    }
                }
                Ok(Event::Eof) => {
                    self.done = true;
                    if self.in_page || self.error_recovery {
                        return Some(Err(IngestError::Truncated {
                            last_page_id: self.last_page_id,
                        }));
                    }
                    return None;
                }
                Ok(_) => {}
                Err(quick_xml::Error::Io(e)) => {
                    self.done = true;
                    let mapped = e
                        .get_ref()
                        .and_then(|inner| inner.downcast_ref::<IngestError>())
                        .cloned()
                        .unwrap_or(IngestError::Truncated {
                            last_page_id: self.last_page_id,
                        });
                    return Some(Err(mapped));
                }
                Err(e) => {
                    let pos = self.consumed();
                    if self.last_error_pos == Some(pos) {
                        // Not advancing; treat as a truncated stream
                        self.done = true;
                        return Some(Err(IngestError::Truncated {
                            last_page_id: self.last_page_id,
                        }));
                    }
                    self.last_error_pos = Some(pos);
                    if self.in_page {
                        log::warn!("malformed page near byte {pos} ({e}); skipping");
                        self.reset_page();
                        self.error_recovery = true;
                    } else {
                        log::debug!("ignoring malformed XML outside page near byte {pos}: {e}");
                    }
                }
            }
        }
    }
}

/// Whether wiki text marks a redirect regardless of the `<redirect/>`
/// element (older dumps only carry the directive in the text).
pub fn is_redirect_text(text: &str) -> bool {
    text.trim_start().to_lowercase().starts_with("#redirect")
}

/// Heuristic disambiguation-page detector, used only when
/// `skip_disambiguation` is enabled.
pub fn is_disambiguation(title: &str, text: &str) -> bool {
    if title.contains("(disambiguation)") {
        return true;
    }
    let lower = text.to_lowercase();
    lower.contains("{{disambiguation") || lower.contains("{{disambig")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://www.mediawiki.org/xml/export-0.10/";

    fn wrap(pages: &str) -> String {
        format!(r#"<mediawiki xmlns="{NS}">{pages}</mediawiki>"#)
    }

    fn page_xml(id: u64, title: &str, text: &str) -> String {
        format!(
            "<page><title>{title}</title><ns>0</ns><id>{id}</id>\
             <revision><id>{}</id><text>{text}</text></revision></page>",
            id + 100_000
        )
    }

    fn parse_all(xml: &str) -> Vec<Page> {
        PageStream::new(xml.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_parses_pages_in_order() {
        let xml = wrap(&format!(
            "{}{}",
            page_xml(1, "Alpha", "alpha body"),
            page_xml(7, "Beta", "beta body")
        ));
        let pages = parse_all(&xml);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_id, 1);
        assert_eq!(pages[0].title, "Alpha");
        assert_eq!(pages[0].text, "alpha body");
        assert_eq!(pages[1].page_id, 7);
        assert!(!pages[0].is_redirect);
    }

    #[test]
    fn test_revision_id_does_not_clobber_page_id() {
        let xml = wrap(&page_xml(42, "Only", "body"));
        let pages = parse_all(&xml);
        assert_eq!(pages[0].page_id, 42);
    }

    #[test]
    fn test_redirect_element_detected() {
        let xml = wrap(
            "<page><title>Old</title><ns>0</ns><id>5</id>\
             <redirect title=\"New\"/>\
             <revision><text>#REDIRECT [[New]]</text></revision></page>",
        );
        let pages = parse_all(&xml);
        assert!(pages[0].is_redirect);
    }

    #[test]
    fn test_entities_unescaped() {
        let xml = wrap(&page_xml(1, "A &amp; B", "x &lt;y&gt; z"));
        let pages = parse_all(&xml);
        assert_eq!(pages[0].title, "A & B");
        assert_eq!(pages[0].text, "x <y> z");
    }

    #[test]
    fn test_truncated_input_surfaces_error() {
        let xml = format!(
            r#"<mediawiki xmlns="{NS}">{}<page><title>Cut"#,
            page_xml(1, "Whole", "body")
        );
        let mut stream = PageStream::new(xml.as_bytes());
        assert_eq!(stream.next().unwrap().unwrap().page_id, 1);
        let err = stream.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            IngestError::Truncated {
                last_page_id: Some(1)
            }
        ));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_page_without_id_skipped() {
        let xml = wrap(&format!(
            "<page><title>NoId</title><revision><text>x</text></revision></page>{}",
            page_xml(9, "Good", "body")
        ));
        let pages = parse_all(&xml);
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_id, 9);
    }

    #[test]
    fn test_tolerates_midstream_join() {
        // Simulates a resume landing inside an earlier page's bytes
        let tail = format!(
            "le>Garbage</title><text>orphan</text></revision></page>{}",
            page_xml(11, "Resumed", "resumed body")
        );
        let pages: Vec<Page> = PageStream::new(tail.as_bytes())
            .filter_map(|r| r.ok())
            .collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_id, 11);
    }

    #[test]
    fn test_consumed_advances_past_closed_page() {
        let xml = wrap(&page_xml(1, "A", "body"));
        let mut stream = PageStream::new(xml.as_bytes());
        let _ = stream.next().unwrap().unwrap();
        let pos = stream.consumed();
        assert!(pos as usize > xml.find("</page>").unwrap());
    }

    #[test]
    fn test_redirect_text_helper() {
        assert!(is_redirect_text("#REDIRECT [[Target]]"));
        assert!(is_redirect_text("  #redirect [[t]]"));
        assert!(!is_redirect_text("Not a redirect"));
    }

    #[test]
    fn test_disambiguation_helper() {
        assert!(is_disambiguation("Mercury (disambiguation)", ""));
        assert!(is_disambiguation("Mercury", "{{Disambiguation}}"));
        assert!(!is_disambiguation("Mercury", "the planet"));
    }
}
