//! One request's full exchange: credential, dispatch with retries, the
//! reactive refresh-and-retry, body streaming and decoding.
//!
//! Cancellation is checked before dispatch, raced against every suspension
//! point (credential wait, send, retry pause) and polled between body
//! chunks.

use std::future::Future;

use bytes::{Bytes, BytesMut};
use docs_auth::Credential;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use transport::{
    BodyStream, HeaderValue, TransportError, TransportRequest, TransportResponse, header,
};

use crate::client::ClientInner;
use crate::error::{Error, Result};
use crate::request::RequestParts;
use crate::response::{Decoder, Page, Response, server_date};
use crate::retry::{Classification, classify_status, classify_transport_error};

#[instrument(
    name = "request",
    skip_all,
    fields(request_id = %parts.id, method = %parts.method, url = %parts.url)
)]
pub(crate) async fn execute<T>(
    client: &ClientInner,
    parts: &RequestParts,
    decoder: &Decoder<T>,
    cancel: &CancellationToken,
) -> Result<Response<T>> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let tokens = client.tokens.as_ref();
    let mut credential = cancellable(cancel, tokens.credential()).await??;
    let mut reauthenticated = false;

    let response = loop {
        let response = send_with_retry(client, parts, &credential, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match classify_status(response.status) {
            Classification::Success => break response,
            Classification::AuthenticationFailure if !reauthenticated => {
                warn!(status = response.status, "credential rejected, refreshing once");
                drop(response);
                reauthenticated = true;
                credential =
                    cancellable(cancel, tokens.refresh_after(&credential.access_token)).await??;
            }
            Classification::AuthenticationFailure => {
                let status = response.status;
                let body = error_body(response.body, cancel).await?;
                return Err(Error::Authentication(format!(
                    "{} rejected the refreshed credential ({status}): {body}",
                    parts.url
                )));
            }
            _ => {
                let status = response.status;
                debug!(status, "request failed");
                let body = error_body(response.body, cancel).await?;
                return Err(Error::HttpResponse {
                    status,
                    url: parts.url.clone(),
                    body,
                });
            }
        }
    };

    let TransportResponse { status, headers, body } = response;
    let bytes = read_body(body, cancel, &parts.url).await?;
    let resource = decoder(&bytes[..]).map_err(|message| Error::Decode {
        url: parts.url.clone(),
        message,
    })?;

    let next_page = parts.links.next_url(&headers).map(|url| Page {
        url,
        headers: parts.headers.clone(),
        links: parts.links,
        decoder: decoder.clone(),
    });
    debug!(status, bytes = bytes.len(), next_page = next_page.is_some(), "request succeeded");

    Ok(Response::new(resource, server_date(&headers), next_page))
}

/// Dispatch, retrying connection-phase failures per the client's policy.
async fn send_with_retry(
    client: &ClientInner,
    parts: &RequestParts,
    credential: &Credential,
    cancel: &CancellationToken,
) -> Result<TransportResponse> {
    let policy = client.retry;
    let mut retries = 0u32;

    loop {
        let request = build_request(parts, credential)?;
        match cancellable(cancel, client.transport.send(request)).await? {
            Ok(response) => return Ok(response),
            Err(e) if policy.allows_retry(&e, retries) => {
                retries += 1;
                warn!(attempt = retries + 1, error = %e, "retrying after transport failure");
                metrics::counter!("docs_request_retries_total").increment(1);
                cancellable(cancel, tokio::time::sleep(policy.delay)).await?;
            }
            Err(e) => return Err(transport_error(e, &parts.url)),
        }
    }
}

/// Fresh transport request for one attempt.
fn build_request(parts: &RequestParts, credential: &Credential) -> Result<TransportRequest> {
    let mut request = TransportRequest::new(parts.method.clone(), parts.url.clone());
    request.headers = parts.headers.clone();

    let mut authorization = HeaderValue::from_str(&credential.authorization())
        .map_err(|e| Error::Authentication(format!("credential is not a valid header: {e}")))?;
    authorization.set_sensitive(true);
    request.headers.insert(header::AUTHORIZATION, authorization);

    if let Some(produce) = &parts.body {
        request.body = Some(produce().map_err(Error::Encode)?);
    }
    Ok(request)
}

fn transport_error(err: TransportError, url: &str) -> Error {
    match classify_transport_error(&err) {
        Classification::Permanent => Error::Encode(err.to_string()),
        _ => Error::TransientIo {
            url: url.to_string(),
            message: err.to_string(),
        },
    }
}

/// Read the whole body, stopping between chunks once cancelled.
async fn read_body(mut body: BodyStream, cancel: &CancellationToken, url: &str) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match cancellable(cancel, body.next()).await? {
            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
            Some(Err(e)) => {
                return Err(Error::TransientIo {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
            None => return Ok(buf.freeze()),
        }
    }
}

/// Body of an error response, for context. Read failures leave it empty.
async fn error_body(body: BodyStream, cancel: &CancellationToken) -> Result<String> {
    match read_body(body, cancel, "").await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(Error::Cancelled) => Err(Error::Cancelled),
        Err(_) => Ok(String::new()),
    }
}

/// Race `fut` against cancellation.
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use serde::Deserialize;
    use transport::Method;
    use transport::mock::MockReply;

    use crate::error::{Error, ErrorKind};
    use crate::pagination::PageLinks;
    use crate::retry::RetryPolicy;
    use crate::testing::{API, Fixture, TOKEN_URL, token_body};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Doc {
        id: u32,
        title: String,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Listing {
        items: Vec<String>,
    }

    fn doc_url(id: u32) -> String {
        format!("{API}/documents/{id}")
    }

    #[tokio::test]
    async fn usable_credential_fetches_and_decodes() {
        let fx = Fixture::signed_in();
        fx.transport.enqueue(
            &doc_url(1),
            MockReply::ok(r#"{"id":1,"title":"Notes"}"#)
                .header("date", &Utc::now().to_rfc2822()),
        );

        let response = fx
            .client
            .get("documents/1")
            .decode_json::<Doc>()
            .run()
            .await
            .unwrap();

        assert_eq!(
            response.resource(),
            &Doc {
                id: 1,
                title: "Notes".into()
            }
        );
        let skew = (Utc::now() - response.server_date()).num_seconds().abs();
        assert!(skew <= 5, "server date off by {skew}s");
        assert!(!response.has_next_page());

        let call = &fx.transport.calls_to(&doc_url(1))[0];
        assert_eq!(call.method, Method::GET);
        assert_eq!(
            call.header("authorization"),
            Some(format!("Bearer {}", fx.access_token()).as_str())
        );
        assert_eq!(call.header("accept"), Some("application/json"));
        assert!(fx.transport.calls_to(TOKEN_URL).is_empty());
    }

    #[tokio::test]
    async fn concurrent_requests_with_expired_credential_share_one_refresh() {
        let fx = Fixture::expired();
        fx.transport
            .always(TOKEN_URL, MockReply::ok(token_body("at_refreshed")));
        fx.transport
            .set_latency(TOKEN_URL, Duration::from_millis(50));
        for i in 0..8 {
            fx.transport
                .always(&doc_url(i), MockReply::ok(format!(r#"{{"id":{i},"title":"d"}}"#)));
        }

        let mut tasks = Vec::new();
        for i in 0..8 {
            let request = fx
                .client
                .get(&format!("documents/{i}"))
                .decode_json::<Doc>();
            tasks.push(tokio::spawn(request.run()));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(fx.transport.call_count(TOKEN_URL), 1);
        for i in 0..8 {
            let call = &fx.transport.calls_to(&doc_url(i))[0];
            assert_eq!(call.header("authorization"), Some("Bearer at_refreshed"));
        }
    }

    #[tokio::test]
    async fn cancel_mid_body_stops_reading() {
        let fx = Fixture::signed_in();
        fx.transport.enqueue(
            &doc_url(5),
            MockReply::ok(r#"{"id":5,"#).stalling(),
        );

        let request = fx.client.get("documents/5").decode_json::<Doc>();
        let handle = request.handle();
        let task = tokio::spawn(request.run());

        assert!(fx.transport.wait_for_calls(&doc_url(5), 1).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err(), Error::Cancelled);
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_while_waiting_on_refresh_leaves_refresh_running() {
        let fx = Fixture::expired();
        fx.transport
            .always(TOKEN_URL, MockReply::ok(token_body("at_refreshed")));
        fx.transport
            .set_latency(TOKEN_URL, Duration::from_millis(100));

        let request = fx.client.get("documents/1").decode_json::<Doc>();
        let handle = request.handle();
        let task = tokio::spawn(request.run());
        assert!(fx.transport.wait_for_calls(TOKEN_URL, 1).await);
        handle.cancel();

        assert_eq!(task.await.unwrap().unwrap_err(), Error::Cancelled);
        assert!(fx.transport.calls_to(&doc_url(1)).is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fx.stored_access_token().await, "at_refreshed");
    }

    #[tokio::test]
    async fn paginated_listing_ends_after_two_pages() {
        let fx = Fixture::signed_in();
        let first = format!("{API}/documents?limit=2");
        let second = format!("{API}/documents?limit=2&offset=2");
        fx.transport.enqueue(
            &first,
            MockReply::ok(r#"{"items":["a","b"]}"#)
                .header("link", &format!(r#"<{second}>; rel="next""#)),
        );
        fx.transport
            .enqueue(&second, MockReply::ok(r#"{"items":["c"]}"#));

        let page1 = fx
            .client
            .get("documents?limit=2")
            .decode_json::<Listing>()
            .run()
            .await
            .unwrap();
        let (items, next, _) = page1.into_parts();
        assert_eq!(items.items, ["a", "b"]);
        let next = next.expect("first page links to the second");
        assert_eq!(next.cursor(), second);

        let page2 = fx.client.next_page(next).run().await.unwrap();
        assert_eq!(page2.resource().items, ["c"]);
        assert!(page2.next_page().is_none());

        assert_eq!(fx.transport.calls().len(), 2);
        let call = &fx.transport.calls_to(&second)[0];
        assert_eq!(call.header("accept"), Some("application/json"));
    }

    #[tokio::test]
    async fn location_cursor_when_configured() {
        let fx = Fixture::signed_in();
        let url = format!("{API}/folders");
        fx.transport.enqueue(
            &url,
            MockReply::ok(r#"{"items":[]}"#).header("location", "https://api.test/folders?c=xyz"),
        );

        let response = fx
            .client
            .get("folders")
            .page_links(PageLinks::Location)
            .decode_json::<Listing>()
            .run()
            .await
            .unwrap();
        assert_eq!(
            response.next_page().map(|p| p.cursor()),
            Some("https://api.test/folders?c=xyz")
        );
    }

    #[tokio::test]
    async fn reactive_refresh_retries_exactly_once() {
        let fx = Fixture::signed_in();
        fx.transport.enqueue(&doc_url(7), MockReply::status(401));
        fx.transport
            .enqueue(&doc_url(7), MockReply::ok(r#"{"id":7,"title":"ok"}"#));
        fx.transport
            .enqueue(TOKEN_URL, MockReply::ok(token_body("at_second")));

        let response = fx
            .client
            .get("documents/7")
            .decode_json::<Doc>()
            .run()
            .await
            .unwrap();

        assert_eq!(response.resource().id, 7);
        let calls = fx.transport.calls_to(&doc_url(7));
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].header("authorization"), Some("Bearer at_second"));
        assert_eq!(fx.transport.call_count(TOKEN_URL), 1);
    }

    #[tokio::test]
    async fn second_rejection_is_authentication_error() {
        let fx = Fixture::signed_in();
        fx.transport.always(&doc_url(8), MockReply::status(401));
        fx.transport
            .enqueue(TOKEN_URL, MockReply::ok(token_body("at_second")));

        let err = fx
            .client
            .get("documents/8")
            .decode_json::<Doc>()
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(fx.transport.calls_to(&doc_url(8)).len(), 2);
        assert_eq!(fx.transport.call_count(TOKEN_URL), 1);
    }

    #[tokio::test]
    async fn rejected_refresh_surfaces_authentication_error() {
        let fx = Fixture::signed_in();
        fx.transport.enqueue(&doc_url(9), MockReply::status(401));
        fx.transport.enqueue(TOKEN_URL, MockReply::status(400));

        let err = fx
            .client
            .get("documents/9")
            .decode_json::<Doc>()
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(fx.transport.calls_to(&doc_url(9)).len(), 1);
        assert_eq!(fx.stored_access_token().await, fx.access_token());
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let fx = Fixture::signed_in();
        fx.transport
            .always(&doc_url(404), MockReply::status(404).body("no such document"));

        let err = fx
            .client
            .get("documents/404")
            .decode_json::<Doc>()
            .run()
            .await
            .unwrap_err();

        assert_eq!(
            err,
            Error::HttpResponse {
                status: 404,
                url: doc_url(404),
                body: "no such document".into()
            }
        );
        assert_eq!(fx.transport.call_count(&doc_url(404)), 1);
    }

    #[tokio::test]
    async fn server_errors_are_permanent_too() {
        let fx = Fixture::signed_in();
        fx.transport.always(&doc_url(500), MockReply::status(503));

        let err = fx
            .client
            .get("documents/500")
            .no_content()
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(503));
        assert_eq!(fx.transport.call_count(&doc_url(500)), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_up_to_the_bound() {
        let fx = Fixture::with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)));
        fx.transport.always(
            &doc_url(2),
            MockReply::fail(transport::TransportError::Connect("reset".into())),
        );

        let err = fx
            .client
            .get("documents/2")
            .decode_json::<Doc>()
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_eq!(fx.transport.call_count(&doc_url(2)), 3);
    }

    #[tokio::test]
    async fn transient_failure_then_success() {
        let fx = Fixture::with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)));
        fx.transport.enqueue(
            &doc_url(3),
            MockReply::fail(transport::TransportError::Timeout("connect".into())),
        );
        fx.transport
            .enqueue(&doc_url(3), MockReply::ok(r#"{"id":3,"title":"t"}"#));

        let response = fx
            .client
            .get("documents/3")
            .decode_json::<Doc>()
            .run()
            .await
            .unwrap();
        assert_eq!(response.resource().id, 3);
        assert_eq!(fx.transport.call_count(&doc_url(3)), 2);
    }

    #[tokio::test]
    async fn no_retry_policy_surfaces_first_failure() {
        let fx = Fixture::with_retry(RetryPolicy::none());
        fx.transport.always(
            &doc_url(4),
            MockReply::fail(transport::TransportError::Timeout("connect".into())),
        );

        let err = fx
            .client
            .get("documents/4")
            .no_content()
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_eq!(fx.transport.call_count(&doc_url(4)), 1);
    }

    #[tokio::test]
    async fn non_retryable_transport_failure_surfaces_once() {
        let fx = Fixture::signed_in();
        fx.transport.always(
            &doc_url(6),
            MockReply::fail(transport::TransportError::Body("connection reset".into())),
        );

        let err = fx
            .client
            .get("documents/6")
            .no_content()
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert_eq!(fx.transport.call_count(&doc_url(6)), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_decode_error() {
        let fx = Fixture::signed_in();
        fx.transport.always(&doc_url(10), MockReply::ok("{not json"));

        let err = fx
            .client
            .get("documents/10")
            .decode_json::<Doc>()
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
        assert_eq!(fx.transport.call_count(&doc_url(10)), 1);
    }

    #[tokio::test]
    async fn signed_out_never_dispatches() {
        let fx = Fixture::signed_out();

        let err = fx
            .client
            .get("documents/1")
            .no_content()
            .run()
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotSignedIn);
        assert!(fx.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn json_body_is_produced_for_every_attempt() {
        let fx = Fixture::with_retry(RetryPolicy::fixed(1, Duration::from_millis(1)));
        let url = format!("{API}/documents");
        fx.transport.enqueue(
            &url,
            MockReply::fail(transport::TransportError::Connect("refused".into())),
        );
        fx.transport
            .enqueue(&url, MockReply::ok(r#"{"id":11,"title":"new"}"#));

        let response = fx
            .client
            .post("documents")
            .json(serde_json::json!({"title": "new"}))
            .decode_json::<Doc>()
            .run()
            .await
            .unwrap();

        assert_eq!(response.resource().id, 11);
        let calls = fx.transport.calls_to(&url);
        assert_eq!(calls.len(), 2);
        for call in &calls {
            assert_eq!(call.method, Method::POST);
            assert_eq!(call.body_str(), r#"{"title":"new"}"#);
            assert_eq!(call.header("content-type"), Some("application/json"));
        }
    }
}
