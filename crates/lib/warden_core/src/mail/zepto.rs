//! ZeptoMail transactional mail client.
//!
//! Posts to the provider's send endpoint with retry logic
//! (max 3 attempts, exponential backoff). Client errors (4xx) are not retried.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

use super::{MailError, Mailer, OutgoingMail};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Provider settings. All four values are required.
#[derive(Clone)]
pub struct ZeptoConfig {
    pub url: String,
    pub token: String,
    pub from_address: String,
    pub from_name: String,
}

impl std::fmt::Debug for ZeptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeptoConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("from_address", &self.from_address)
            .field("from_name", &self.from_name)
            .finish()
    }
}

#[derive(Serialize)]
struct ZeptoRequest<'a> {
    from: Address<'a>,
    to: Vec<Recipient<'a>>,
    subject: &'a str,
    htmlbody: &'a str,
}

#[derive(Serialize)]
struct Recipient<'a> {
    email_address: Address<'a>,
}

#[derive(Serialize)]
struct Address<'a> {
    address: &'a str,
    name: &'a str,
}

/// [`Mailer`] backed by the ZeptoMail HTTP API.
#[derive(Debug, Clone)]
pub struct ZeptoMailer {
    client: Client,
    config: ZeptoConfig,
}

impl ZeptoMailer {
    pub fn new(config: ZeptoConfig) -> Result<Self, MailError> {
        if config.url.is_empty() || config.token.is_empty() || config.from_address.is_empty() {
            return Err(MailError::Config(
                "ZEPTO_URL, ZEPTO_TOKEN and ZEPTO_FROM_ADDRESS are required".into(),
            ));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MailError::Config(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn authorization(&self) -> String {
        // The provider issues tokens with or without the scheme prefix.
        if self.config.token.starts_with("Zoho-enczapikey") {
            self.config.token.clone()
        } else {
            format!("Zoho-enczapikey {}", self.config.token)
        }
    }
}

#[async_trait]
impl Mailer for ZeptoMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
        let body = ZeptoRequest {
            from: Address {
                address: &self.config.from_address,
                name: &self.config.from_name,
            },
            to: vec![Recipient {
                email_address: Address {
                    address: &mail.to_address,
                    name: &mail.to_name,
                },
            }],
            subject: &mail.subject,
            htmlbody: &mail.html_body,
        };

        let mut last_error = None;

        for attempt in 0..MAX_RETRY_ATTEMPTS {
            let result = self
                .client
                .post(&self.config.url)
                .header("Authorization", self.authorization())
                .header("Accept", "application/json")
                .json(&body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(to = %mail.to_address, subject = %mail.subject, "mail sent");
                    return Ok(());
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<no body>".to_string());
                    let err = MailError::Delivery(format!("ZeptoMail send failed: {status} {text}"));
                    if status.is_client_error() {
                        return Err(err);
                    }
                    last_error = Some(err);
                }
                Err(e) => {
                    last_error = Some(MailError::Delivery(format!("ZeptoMail request failed: {e}")));
                }
            }

            if attempt + 1 < MAX_RETRY_ATTEMPTS {
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
                warn!(attempt = attempt + 1, ?backoff, "mail send failed, retrying");
                sleep(backoff).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            MailError::Delivery(format!("mail not sent after {MAX_RETRY_ATTEMPTS} attempts"))
        }))
    }
}
