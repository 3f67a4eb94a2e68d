//! Messaging vendor client.
//!
//! Customer notifications go out as pre-approved template messages (HSM)
//! through a third-party messaging gateway. Each request names a template and
//! one recipient; the gateway fills in the text.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{StatusCode, header};
use serde::Serialize;

use crate::error::SendError;

/// Timeout for a single template send.
const SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Delivery mode the gateway expects for template messages.
const DELIVERY_MODE: u8 = 2;

/// Vendor connection settings.
#[derive(Debug, Clone)]
pub struct VendorConfig {
    /// Template dispatch endpoint.
    pub url: String,

    /// Value of the `Authorization` header, sent as-is.
    pub token: String,

    /// Value of the `Cookie` header the gateway requires.
    pub cookie: String,

    /// Account code (`cod_conta`) messages are billed to.
    pub account: u32,
}

#[derive(Debug, Serialize)]
struct TemplateRequest<'a> {
    cod_conta: u32,
    hsm: u32,
    tipo_envio: u8,
    contato: Recipient<'a>,
}

#[derive(Debug, Serialize)]
struct Recipient<'a> {
    nome: &'a str,
    telefone: &'a str,
}

/// Client for the template dispatch endpoint.
#[derive(Clone)]
pub struct VendorClient {
    client: reqwest::Client,
    config: Arc<VendorConfig>,
}

impl VendorClient {
    pub fn new(config: VendorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config: Arc::new(config),
        }
    }

    /// Send template `template_id` to one recipient.
    ///
    /// Only `200` and `201` count as accepted. Nothing is retried.
    pub async fn send_template(
        &self,
        template_id: u32,
        name: &str,
        phone: &str,
    ) -> Result<(), SendError> {
        let body = TemplateRequest {
            cod_conta: self.config.account,
            hsm: template_id,
            tipo_envio: DELIVERY_MODE,
            contato: Recipient {
                nome: name,
                telefone: phone,
            },
        };

        let response = self
            .client
            .post(&self.config.url)
            .timeout(SEND_TIMEOUT)
            .header(header::ACCEPT, "application/json")
            .header(header::AUTHORIZATION, &self.config.token)
            .header(header::COOKIE, &self.config.cookie)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            status => Err(SendError::Rejected(status)),
        }
    }
}
