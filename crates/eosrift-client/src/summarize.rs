//! Summarize a captured exchange into an inspector entry

use httparse::Status;

const MAX_HEADERS: usize = 100;

/// Parsed view of one request/response pair.
#[derive(Debug, Clone, Default)]
pub struct ExchangeSummary {
    pub method: String,
    pub path: String,
    pub host: String,
    pub status_code: Option<u16>,
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
}

/// Parse the captured previews. Returns `None` when either head is
/// incomplete (oversized requests can truncate mid-head).
pub fn summarize_exchange(req_preview: &[u8], resp_preview: &[u8]) -> Option<ExchangeSummary> {
    let mut summary = ExchangeSummary::default();

    let mut req_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut req_headers);
    match req.parse(req_preview) {
        Ok(Status::Complete(_)) | Ok(Status::Partial) => {}
        Err(_) => return None,
    }
    summary.method = req.method?.to_string();
    summary.path = req.path?.to_string();
    summary.request_headers = req
        .headers
        .iter()
        .take_while(|h| !h.name.is_empty())
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();
    summary.host = summary
        .request_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.clone())
        .unwrap_or_default();

    let mut resp_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut resp_headers);
    match resp.parse(resp_preview) {
        Ok(Status::Complete(_)) | Ok(Status::Partial) => {}
        Err(_) => return None,
    }
    summary.status_code = resp.code;
    summary.response_headers = resp
        .headers
        .iter()
        .take_while(|h| !h.name.is_empty())
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarizes_complete_exchange() {
        let req = b"GET /items?page=2 HTTP/1.1\r\nHost: demo.tunnel.test\r\nAccept: */*\r\n\r\n";
        let resp = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{}";

        let summary = summarize_exchange(req, resp).unwrap();
        assert_eq!(summary.method, "GET");
        assert_eq!(summary.path, "/items?page=2");
        assert_eq!(summary.host, "demo.tunnel.test");
        assert_eq!(summary.status_code, Some(200));
        assert!(summary
            .request_headers
            .iter()
            .any(|(k, v)| k == "Accept" && v == "*/*"));
        assert!(summary
            .response_headers
            .iter()
            .any(|(k, _)| k == "Content-Type"));
    }

    #[test]
    fn test_rejects_non_http_preview() {
        assert!(summarize_exchange(b"\0\x01garbage", b"HTTP/1.1 200 OK\r\n\r\n").is_none());
    }

    #[test]
    fn test_missing_request_line_is_none() {
        assert!(summarize_exchange(b"", b"HTTP/1.1 200 OK\r\n\r\n").is_none());
    }
}
