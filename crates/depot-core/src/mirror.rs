//! Mirror discovery and selection.
//!
//! The mirror list is fetched once per repository object, on first use, and
//! never refreshed. Selection is the first mirror in list order that has not
//! failed during this session. Any trouble obtaining the list degrades to the
//! repository's own location with a warning to the reporter.

use std::collections::HashSet;
use std::sync::Arc;

use depot_schema::Status;
use parking_lot::Mutex;
use quick_xml::Reader;
use quick_xml::events::Event;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::paths::as_directory;
use crate::reporter::{NullReporter, Reporter};
use crate::transport::Transport;

/// Picks mirrors for one repository location.
pub struct MirrorSelector {
    base: Url,
    list_url: Option<Url>,
    mirrors: OnceCell<Vec<Url>>,
    failed: Mutex<HashSet<String>>,
    reporter: Arc<dyn Reporter>,
}

impl std::fmt::Debug for MirrorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorSelector")
            .field("base", &self.base.as_str())
            .field("list_url", &self.list_url.as_ref().map(Url::as_str))
            .field("mirrors", &self.mirrors.get())
            .finish_non_exhaustive()
    }
}

impl MirrorSelector {
    /// Selector for `base`. With no `list_url` it always answers `base`.
    pub fn new(base: &Url, list_url: Option<Url>) -> Self {
        Self {
            base: as_directory(base),
            list_url,
            mirrors: OnceCell::new(),
            failed: Mutex::new(HashSet::new()),
            reporter: Arc::new(NullReporter),
        }
    }

    /// Send degraded-mode warnings to `reporter`.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Selector that never consults a mirror list.
    pub fn disabled(base: &Url) -> Self {
        Self::new(base, None)
    }

    /// `true` when a mirror list location is configured.
    pub fn is_enabled(&self) -> bool {
        self.list_url.is_some()
    }

    /// Mirrors in list order, fetching the list on first call.
    pub async fn mirrors(
        &self,
        transport: &dyn Transport,
        country: Option<&str>,
        cancel: &CancellationToken,
    ) -> &[Url] {
        let Some(list_url) = &self.list_url else {
            return &[];
        };
        self.mirrors
            .get_or_init(|| async move {
                let url = with_query(list_url, country);
                match transport.fetch(&url, cancel).await {
                    Ok(bytes) => {
                        let mirrors = parse_mirror_list(&bytes);
                        tracing::debug!(list = %url, count = mirrors.len(), "Loaded mirror list");
                        mirrors
                    }
                    Err(status) => {
                        tracing::warn!(list = %url, status = %status, "Failed to fetch mirror list");
                        self.reporter.warning(&format!(
                            "Mirror list {url} unavailable, using {}: {}",
                            self.base,
                            status.message()
                        ));
                        Vec::new()
                    }
                }
            })
            .await
    }

    /// First mirror that has not failed, or the base location itself.
    pub async fn best_mirror(
        &self,
        transport: &dyn Transport,
        country: Option<&str>,
        cancel: &CancellationToken,
    ) -> Url {
        let mirrors = self.mirrors(transport, country, cancel).await;
        let failed = self.failed.lock();
        mirrors
            .iter()
            .find(|m| !failed.contains(m.as_str()))
            .cloned()
            .unwrap_or_else(|| self.base.clone())
    }

    /// Rewrite `location` onto the best mirror, keeping its path relative to
    /// the base. Locations outside the base are returned unchanged.
    pub async fn mirror_location(
        &self,
        location: &Url,
        transport: &dyn Transport,
        country: Option<&str>,
        cancel: &CancellationToken,
    ) -> Url {
        let Some(relative) = location.as_str().strip_prefix(self.base.as_str()) else {
            return location.clone();
        };
        let mirror = self.best_mirror(transport, country, cancel).await;
        if mirror == self.base {
            return location.clone();
        }
        as_directory(&mirror)
            .join(relative)
            .unwrap_or_else(|_| location.clone())
    }

    /// Record the outcome of a transfer from `mirror`. Failures exclude the
    /// mirror from selection for the rest of this session.
    pub fn report_result(&self, mirror: &Url, status: &Status) {
        if status.is_error() {
            if let Some(m) = self.owning_mirror(mirror) {
                tracing::debug!(mirror = %m, "Marking mirror as failed");
                self.failed.lock().insert(m.to_string());
            }
        }
    }

    /// `true` if some mirror other than the one serving `current` has not
    /// failed yet.
    pub fn has_alternative(&self, current: &Url) -> bool {
        let Some(mirrors) = self.mirrors.get() else {
            return false;
        };
        let owner = self.owning_mirror(current);
        let failed = self.failed.lock();
        mirrors
            .iter()
            .any(|m| Some(m) != owner && !failed.contains(m.as_str()))
    }

    fn owning_mirror(&self, location: &Url) -> Option<&Url> {
        self.mirrors.get()?.iter().find(|m| {
            location
                .as_str()
                .starts_with(as_directory(m).as_str())
        })
    }
}

/// Append the locale, timezone and response-type query parameters.
fn with_query(list_url: &Url, country: Option<&str>) -> Url {
    let offset_hours = chrono::Local::now().offset().local_minus_utc() / 3600;
    let mut url = list_url.clone();
    url.query_pairs_mut()
        .append_pair("countryCode", country.unwrap_or(""))
        .append_pair("timeZone", &offset_hours.to_string())
        .append_pair("responseType", "xml");
    url
}

/// Extract `<mirror url="..">` entries. Malformed documents yield what was
/// read before the error.
pub fn parse_mirror_list(bytes: &[u8]) -> Vec<Url> {
    let mut reader = Reader::from_reader(bytes);
    let mut mirrors = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e) | Event::Empty(e)) if e.name().as_ref() == b"mirror" => {
                let url = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.as_ref() == b"url")
                    .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
                match url.as_deref().map(Url::parse) {
                    Some(Ok(url)) => mirrors.push(url),
                    Some(Err(e)) => tracing::warn!(error = %e, "Skipping invalid mirror URL"),
                    None => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Malformed mirror list");
                break;
            }
        }
        buf.clear();
    }
    mirrors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DefaultTransport;
    use depot_schema::StatusCode;

    const LIST: &str = r#"<?xml version="1.0"?>
<mirrors>
  <mirror url="https://a.example/repo" label="A"/>
  <mirror url="https://b.example/repo/"/>
  <mirror url="::bad::"/>
</mirrors>"#;

    #[test]
    fn parses_mirror_urls() {
        let mirrors = parse_mirror_list(LIST.as_bytes());
        assert_eq!(mirrors.len(), 2);
        assert_eq!(mirrors[0].as_str(), "https://a.example/repo");
    }

    #[test]
    fn malformed_list_degrades() {
        assert!(parse_mirror_list(b"<mirrors><mirror url='x'").is_empty());
        assert!(parse_mirror_list(b"").is_empty());
    }

    #[test]
    fn query_parameters_are_appended() {
        let url = with_query(&Url::parse("https://x/mirrors?file=/repo").unwrap(), Some("de"));
        let pairs: Vec<_> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        assert_eq!(pairs, ["file", "countryCode", "timeZone", "responseType"]);
        assert!(url.as_str().contains("responseType=xml"));
        assert!(url.as_str().contains("countryCode=de"));
    }

    #[tokio::test]
    async fn failed_mirrors_are_skipped_then_base_is_used() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/mirrors")
            .match_query(mockito::Matcher::Any)
            .with_body(LIST)
            .create_async()
            .await;

        let base = Url::parse("https://origin.example/repo").unwrap();
        let list_url = Url::parse(&format!("{}/mirrors", server.url())).unwrap();
        let selector = MirrorSelector::new(&base, Some(list_url));
        let transport = DefaultTransport::default();
        let cancel = CancellationToken::new();

        let artifact = Url::parse("https://origin.example/repo/plugins/foo.jar").unwrap();
        let first = selector
            .mirror_location(&artifact, &transport, None, &cancel)
            .await;
        assert_eq!(first.as_str(), "https://a.example/repo/plugins/foo.jar");
        assert!(selector.has_alternative(&first));

        selector.report_result(&first, &Status::error(StatusCode::Transport, "down"));
        let second = selector
            .mirror_location(&artifact, &transport, None, &cancel)
            .await;
        assert_eq!(second.as_str(), "https://b.example/repo/plugins/foo.jar");
        assert!(!selector.has_alternative(&second));

        selector.report_result(&second, &Status::error(StatusCode::Transport, "down"));
        let third = selector
            .mirror_location(&artifact, &transport, None, &cancel)
            .await;
        assert_eq!(third, artifact);
    }

    #[tokio::test]
    async fn unreachable_list_falls_back_to_base() {
        let base = Url::parse("https://origin.example/repo/").unwrap();
        let selector =
            MirrorSelector::new(&base, Some(Url::parse("http://127.0.0.1:1/mirrors").unwrap()));
        let best = selector
            .best_mirror(&DefaultTransport::default(), None, &CancellationToken::new())
            .await;
        assert_eq!(best, base);
    }

    #[tokio::test]
    async fn unreachable_list_is_reported_once() {
        let reporter = Arc::new(crate::reporter::RecordingReporter::default());
        let base = Url::parse("https://origin.example/repo/").unwrap();
        let selector =
            MirrorSelector::new(&base, Some(Url::parse("http://127.0.0.1:1/mirrors").unwrap()))
                .with_reporter(reporter.clone());
        let transport = DefaultTransport::default();
        let cancel = CancellationToken::new();

        assert!(selector.mirrors(&transport, None, &cancel).await.is_empty());
        assert!(selector.mirrors(&transport, None, &cancel).await.is_empty());

        let warnings = reporter.warnings.lock();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("https://origin.example/repo/"));
    }
}
