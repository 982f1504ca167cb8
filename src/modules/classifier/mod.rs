//! Outcome classification.
//!
//! Decides whether a payload returned by a backend is a usable result, a
//! failure worth retrying, or a sign that the target blocked the egress IP
//! (which triggers the broadcast fallback).

use crate::backends::FetchPayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    /// The target served an "item not found" style answer that is specific to
    /// the egress IP rather than the content.
    Blocked,
    Reject(String),
}

pub trait ResponseClassifier: Send + Sync {
    fn classify(&self, payload: &FetchPayload) -> Verdict;
}

/// Default classifier.
///
/// - body exactly equal to a configured signature → [`Verdict::Blocked`]
/// - HTTP status outside 2xx → [`Verdict::Reject`]
/// - anything else → [`Verdict::Accept`]
#[derive(Debug, Clone, Default)]
pub struct SignatureClassifier {
    signatures: Vec<String>,
}

impl SignatureClassifier {
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            signatures: signatures.into_iter().map(Into::into).collect(),
        }
    }

    fn is_blocked(&self, body: &str) -> bool {
        let body = body.trim();
        self.signatures.iter().any(|sig| sig.trim() == body)
    }
}

impl ResponseClassifier for SignatureClassifier {
    fn classify(&self, payload: &FetchPayload) -> Verdict {
        if !self.signatures.is_empty() && self.is_blocked(&payload.text()) {
            return Verdict::Blocked;
        }
        match payload {
            FetchPayload::Response(response) if !response.is_success() => {
                Verdict::Reject(format!("status {}", response.status()))
            }
            _ => Verdict::Accept,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::FetchResponse;
    use bytes::Bytes;
    use http::HeaderMap;
    use url::Url;

    const NOT_FOUND: &str = r#"{"error":"Could not find product"}"#;

    fn response(status: u16, body: &'static str) -> FetchPayload {
        FetchPayload::Response(FetchResponse::new(
            status,
            HeaderMap::new(),
            Bytes::from_static(body.as_bytes()),
            Url::parse("https://shop.example/p/1").unwrap(),
        ))
    }

    #[test]
    fn exact_signature_means_blocked_even_on_error_status() {
        let classifier = SignatureClassifier::new([NOT_FOUND]);
        assert_eq!(classifier.classify(&response(404, NOT_FOUND)), Verdict::Blocked);
        assert_eq!(
            classifier.classify(&FetchPayload::Document(format!("  {NOT_FOUND}\n"))),
            Verdict::Blocked
        );
    }

    #[test]
    fn partial_matches_are_not_blocks() {
        let classifier = SignatureClassifier::new([NOT_FOUND]);
        let wrapped = "<html>{\"error\":\"Could not find product\"}</html>";
        assert_eq!(
            classifier.classify(&FetchPayload::Document(wrapped.into())),
            Verdict::Accept
        );
    }

    #[test]
    fn non_success_status_is_rejected() {
        let classifier = SignatureClassifier::default();
        assert_eq!(
            classifier.classify(&response(503, "busy")),
            Verdict::Reject("status 503".into())
        );
        assert_eq!(classifier.classify(&response(200, "ok")), Verdict::Accept);
    }
}
