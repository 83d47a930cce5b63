//! Browser-driven transport.
//!
//! Wraps an external [`BrowserAutomation`] driver behind the transport
//! seam. The driver session is closed on every path; a failed navigation
//! must never leak a live browser.

use std::sync::Arc;

use async_trait::async_trait;

use super::{SearchTransport, TransportError, TransportReply, TransportRequest};
use crate::external_deps::browser::BrowserAutomation;

pub struct BrowserTransport {
    driver: Arc<dyn BrowserAutomation>,
}

impl BrowserTransport {
    pub fn new(driver: Arc<dyn BrowserAutomation>) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl SearchTransport for BrowserTransport {
    async fn execute(
        &self,
        request: TransportRequest<'_>,
    ) -> Result<TransportReply, TransportError> {
        let handle = self.driver.open_session(request.profile).await?;

        let outcome = match self.driver.navigate(&handle, &request.url).await {
            Ok(page) => {
                // Read the document only after navigation settles so
                // challenge scripts have had their chance to run.
                match self.driver.extract_raw_content(&handle).await {
                    Ok(body) => Ok((page, body)),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        };

        // Close before propagating any navigation error.
        if let Err(close_err) = self.driver.close(handle).await {
            log::warn!("browser session close failed: {close_err}");
        }

        let (page, body) = outcome?;
        Ok(TransportReply {
            status: page.status,
            body,
            set_cookies: page.set_cookies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external_deps::browser::{BrowserError, BrowserHandle, BrowserPage};
    use crate::modules::endpoint_pool::Endpoint;
    use crate::modules::fingerprint::ProfileProvider;
    use crate::modules::obfuscation::{CookieJar, RequestObfuscator};
    use std::sync::Mutex;
    use url::Url;

    struct RecordingDriver {
        closed: Mutex<Vec<String>>,
        fail_navigation: bool,
    }

    #[async_trait]
    impl BrowserAutomation for RecordingDriver {
        async fn open_session(
            &self,
            _profile: &crate::modules::fingerprint::FingerprintProfile,
        ) -> Result<BrowserHandle, BrowserError> {
            Ok(BrowserHandle { id: "b-1".into() })
        }

        async fn navigate(
            &self,
            _handle: &BrowserHandle,
            _url: &Url,
        ) -> Result<BrowserPage, BrowserError> {
            if self.fail_navigation {
                Err(BrowserError::Navigation("tab crashed".into()))
            } else {
                Ok(BrowserPage {
                    status: 200,
                    set_cookies: Vec::new(),
                })
            }
        }

        async fn extract_raw_content(
            &self,
            _handle: &BrowserHandle,
        ) -> Result<String, BrowserError> {
            Ok(r#"<div class="search-results">ok</div>"#.into())
        }

        async fn close(&self, handle: BrowserHandle) -> Result<(), BrowserError> {
            self.closed.lock().unwrap().push(handle.id);
            Ok(())
        }
    }

    fn request_parts() -> (
        crate::modules::fingerprint::FingerprintProfile,
        Endpoint,
        Url,
    ) {
        let profile = ProfileProvider::default().generate(None).unwrap();
        (
            profile,
            Endpoint::direct("ep-1"),
            Url::parse("https://lookup.example/search?q=test").unwrap(),
        )
    }

    #[tokio::test]
    async fn closes_session_after_successful_navigation() {
        let driver = Arc::new(RecordingDriver {
            closed: Mutex::new(Vec::new()),
            fail_navigation: false,
        });
        let transport = BrowserTransport::new(driver.clone());
        let (profile, endpoint, url) = request_parts();
        let shape = RequestObfuscator::new().prepare("sess", &profile, &CookieJar::new());

        let reply = transport
            .execute(TransportRequest {
                url,
                shape: &shape,
                endpoint: &endpoint,
                profile: &profile,
            })
            .await
            .unwrap();

        assert_eq!(reply.status, 200);
        assert_eq!(driver.closed.lock().unwrap().as_slice(), ["b-1"]);
    }

    #[tokio::test]
    async fn closes_session_even_when_navigation_fails() {
        let driver = Arc::new(RecordingDriver {
            closed: Mutex::new(Vec::new()),
            fail_navigation: true,
        });
        let transport = BrowserTransport::new(driver.clone());
        let (profile, endpoint, url) = request_parts();
        let shape = RequestObfuscator::new().prepare("sess", &profile, &CookieJar::new());

        let result = transport
            .execute(TransportRequest {
                url,
                shape: &shape,
                endpoint: &endpoint,
                profile: &profile,
            })
            .await;

        assert!(result.is_err());
        assert_eq!(driver.closed.lock().unwrap().as_slice(), ["b-1"]);
    }
}
