//! Decoded responses and typed page cursors

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use transport::{HeaderMap, header};

use crate::pagination::PageLinks;

/// Turns a response body into the resource.
pub(crate) type Decoder<T> =
    Arc<dyn Fn(&[u8]) -> std::result::Result<T, String> + Send + Sync>;

/// The result of one successful request.
pub struct Response<T> {
    resource: T,
    server_date: DateTime<Utc>,
    next_page: Option<Page<T>>,
}

impl<T> Response<T> {
    pub(crate) fn new(resource: T, server_date: DateTime<Utc>, next_page: Option<Page<T>>) -> Self {
        Self {
            resource,
            server_date,
            next_page,
        }
    }

    pub fn resource(&self) -> &T {
        &self.resource
    }

    pub fn into_resource(self) -> T {
        self.resource
    }

    /// Server `Date`, or local time when the header is missing or invalid.
    pub fn server_date(&self) -> DateTime<Utc> {
        self.server_date
    }

    pub fn next_page(&self) -> Option<&Page<T>> {
        self.next_page.as_ref()
    }

    pub fn has_next_page(&self) -> bool {
        self.next_page.is_some()
    }

    pub fn into_parts(self) -> (T, Option<Page<T>>, DateTime<Utc>) {
        (self.resource, self.next_page, self.server_date)
    }
}

impl<T: fmt::Debug> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("resource", &self.resource)
            .field("server_date", &self.server_date)
            .field("next_page", &self.next_page)
            .finish()
    }
}

/// Opaque cursor to the next page of a listing.
///
/// Typed by the resource of the request that produced it, so it can only
/// be turned back into that kind of request (`Client::next_page`), which
/// consumes it.
pub struct Page<T> {
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) links: PageLinks,
    pub(crate) decoder: Decoder<T>,
}

impl<T> Page<T> {
    /// The literal cursor, for logging.
    pub fn cursor(&self) -> &str {
        &self.url
    }
}

impl<T> fmt::Debug for Page<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page").field("cursor", &self.url).finish()
    }
}

/// Parse the `Date` response header, falling back to now.
pub(crate) fn server_date(headers: &HeaderMap) -> DateTime<Utc> {
    headers
        .get(header::DATE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use transport::HeaderValue;

    #[test]
    fn date_header_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::DATE,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        let expected = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(server_date(&headers), expected);
    }

    #[test]
    fn missing_or_bad_date_falls_back_to_now() {
        let before = Utc::now();
        assert!(server_date(&HeaderMap::new()) >= before);

        let mut headers = HeaderMap::new();
        headers.insert(header::DATE, HeaderValue::from_static("yesterday-ish"));
        let parsed = server_date(&headers);
        assert!(parsed >= before && parsed <= Utc::now());
    }

    #[test]
    fn page_debug_shows_only_cursor() {
        let page: Page<u32> = Page {
            url: "https://api.test/d?p=2".into(),
            headers: HeaderMap::new(),
            links: PageLinks::LinkHeader,
            decoder: Arc::new(|_| Ok(1)),
        };
        assert_eq!(format!("{page:?}"), r#"Page { cursor: "https://api.test/d?p=2" }"#);
        assert_eq!(page.cursor(), "https://api.test/d?p=2");
    }
}
