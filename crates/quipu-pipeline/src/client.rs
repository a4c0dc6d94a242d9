//! The remote tax-authority protocol client.
//!
//! Two submission modes exist: synchronous (single documents, immediate
//! accept/reject) and ticket-based (batch documents, polled later). The
//! client's job is to translate wire-level outcomes into the worker's
//! transient/permanent failure taxonomy:
//!
//! - connectivity, timeouts, auth failures, authority-side exceptions
//!   (fault codes 0100–1999) are **transient** and retryable;
//! - content rejections (codes 2000–3999) are **permanent** — the document
//!   itself is at fault and no retry of the same bytes can succeed;
//! - codes 4000 and above are observations: the document is legally
//!   accepted, with warnings attached.

use std::future::Future;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use quick_xml::{Reader, escape::escape, events::Event};
use thiserror::Error;

use quipu_core::settings::{ClientCredentials, Environment};

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Final answer of a synchronous submission, or the ticket of a batch one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
  Accepted {
    code:    String,
    message: String,
    /// Receipt archive returned by the authority; stored opaque.
    cdr:     Option<Vec<u8>>,
  },
  Rejected {
    code:    String,
    message: String,
  },
  Ticket(String),
}

/// Answer of a ticket poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketStatus {
  /// Still in the authority's batch queue; poll again later.
  Pending,
  Accepted {
    code:    String,
    message: String,
    cdr:     Option<Vec<u8>>,
  },
  Rejected {
    code:    String,
    message: String,
  },
  Observed {
    code:    String,
    message: String,
    cdr:     Option<Vec<u8>>,
  },
}

/// Wire-level failure, already classified for the worker.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
  #[error("transient remote failure: {0}")]
  Transient(String),

  #[error("permanent remote failure: {0}")]
  Permanent(String),
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the authority's request/response and ticket protocol.
///
/// Credentials and environment travel per call: they are tenant-scoped and
/// the client instance is shared by every tenant the worker serves.
pub trait TaxAuthorityClient: Send + Sync {
  fn submit(
    &self,
    environment: Environment,
    credentials: &ClientCredentials,
    filename: &str,
    content: &[u8],
    batch: bool,
  ) -> impl Future<Output = Result<Submission, ClientError>> + Send;

  fn query_ticket(
    &self,
    environment: Environment,
    credentials: &ClientCredentials,
    ticket: &str,
  ) -> impl Future<Output = Result<TicketStatus, ClientError>> + Send;
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

/// Endpoint configuration. The sandbox/production split is explicit and
/// never inferred; each tenant's settings pick one.
#[derive(Debug, Clone)]
pub struct TaxClientConfig {
  pub sandbox_url:    String,
  pub production_url: String,
  /// Per-request timeout, after which the call counts as transient.
  pub timeout:        Duration,
}

impl Default for TaxClientConfig {
  fn default() -> Self {
    Self {
      sandbox_url:    "https://e-beta.sunat.gob.pe/ol-ti-itcpfegem-beta/billService"
        .into(),
      production_url: "https://e-factura.sunat.gob.pe/ol-ti-itcpfegem/billService"
        .into(),
      timeout:        Duration::from_secs(30),
    }
  }
}

/// SOAP-over-HTTPS client for the authority's billing service.
pub struct HttpTaxClient {
  http:   reqwest::Client,
  config: TaxClientConfig,
}

impl HttpTaxClient {
  pub fn new(config: TaxClientConfig) -> Result<Self, reqwest::Error> {
    let http = reqwest::Client::builder().timeout(config.timeout).build()?;
    Ok(Self { http, config })
  }

  fn endpoint(&self, environment: Environment) -> &str {
    match environment {
      Environment::Sandbox => &self.config.sandbox_url,
      Environment::Production => &self.config.production_url,
    }
  }

  async fn call(
    &self,
    environment: Environment,
    envelope: String,
  ) -> Result<String, ClientError> {
    let response = self
      .http
      .post(self.endpoint(environment))
      .header("Content-Type", "text/xml; charset=utf-8")
      .body(envelope)
      .send()
      .await
      .map_err(|e| ClientError::Transient(e.to_string()))?;

    // SOAP faults arrive with HTTP 500; read the body regardless of status
    // and let the fault classifier decide. A body-less error status is
    // connectivity-shaped, hence transient.
    let status = response.status();
    let body = response
      .text()
      .await
      .map_err(|e| ClientError::Transient(e.to_string()))?;
    if body.trim().is_empty() {
      return Err(ClientError::Transient(format!("empty response, http {status}")));
    }
    Ok(body)
  }
}

impl TaxAuthorityClient for HttpTaxClient {
  async fn submit(
    &self,
    environment: Environment,
    credentials: &ClientCredentials,
    filename: &str,
    content: &[u8],
    batch: bool,
  ) -> Result<Submission, ClientError> {
    let operation = if batch { "sendSummary" } else { "sendBill" };
    let envelope = build_submit_envelope(credentials, operation, filename, content);
    let body = self.call(environment, envelope).await?;
    parse_submit_response(&body)
  }

  async fn query_ticket(
    &self,
    environment: Environment,
    credentials: &ClientCredentials,
    ticket: &str,
  ) -> Result<TicketStatus, ClientError> {
    let envelope = build_status_envelope(credentials, ticket);
    let body = self.call(environment, envelope).await?;
    parse_ticket_response(&body)
  }
}

// ─── Envelopes ───────────────────────────────────────────────────────────────

const NS_SOAP: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const NS_SERVICE: &str = "http://service.sunat.gob.pe";
const NS_WSSE: &str =
  "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";

fn build_security_header(credentials: &ClientCredentials) -> String {
  format!(
    concat!(
      "<soapenv:Header>",
      "<wsse:Security xmlns:wsse=\"{wsse}\">",
      "<wsse:UsernameToken>",
      "<wsse:Username>{username}</wsse:Username>",
      "<wsse:Password>{password}</wsse:Password>",
      "</wsse:UsernameToken>",
      "</wsse:Security>",
      "</soapenv:Header>"
    ),
    wsse = NS_WSSE,
    username = escape(&credentials.username),
    password = escape(&credentials.password),
  )
}

fn build_submit_envelope(
  credentials: &ClientCredentials,
  operation: &str,
  filename: &str,
  content: &[u8],
) -> String {
  format!(
    concat!(
      "<soapenv:Envelope xmlns:soapenv=\"{soap}\" xmlns:ser=\"{ser}\">",
      "{header}",
      "<soapenv:Body>",
      "<ser:{op}>",
      "<fileName>{filename}</fileName>",
      "<contentFile>{content}</contentFile>",
      "</ser:{op}>",
      "</soapenv:Body>",
      "</soapenv:Envelope>"
    ),
    soap = NS_SOAP,
    ser = NS_SERVICE,
    header = build_security_header(credentials),
    op = operation,
    filename = escape(filename),
    content = B64.encode(content),
  )
}

fn build_status_envelope(
  credentials: &ClientCredentials,
  ticket: &str,
) -> String {
  format!(
    concat!(
      "<soapenv:Envelope xmlns:soapenv=\"{soap}\" xmlns:ser=\"{ser}\">",
      "{header}",
      "<soapenv:Body>",
      "<ser:getStatus>",
      "<ticket>{ticket}</ticket>",
      "</ser:getStatus>",
      "</soapenv:Body>",
      "</soapenv:Envelope>"
    ),
    soap = NS_SOAP,
    ser = NS_SERVICE,
    header = build_security_header(credentials),
    ticket = escape(ticket),
  )
}

// ─── Response parsing ────────────────────────────────────────────────────────

/// Text content of the first element whose local name matches, prefix
/// ignored. Good enough for the flat response bodies this service returns.
fn element_text(xml: &str, local: &str) -> Option<String> {
  let mut reader = Reader::from_str(xml);
  let mut inside = false;
  loop {
    match reader.read_event() {
      Ok(Event::Start(ref e)) => {
        let name = e.name();
        let tag = name.as_ref();
        let suffix = tag.rsplit(|&b| b == b':').next().unwrap_or(tag);
        inside = suffix == local.as_bytes();
      }
      Ok(Event::Text(ref t)) if inside => {
        return Some(t.xml_content().ok()?.into_owned());
      }
      Ok(Event::End(_)) => inside = false,
      Ok(Event::Eof) | Err(_) => return None,
      _ => {}
    }
  }
}

/// Trailing numeric part of a fault code such as `soap-env:Client.2335`.
fn fault_code_number(code: &str) -> Option<u32> {
  code
    .rsplit(|c: char| c == '.' || c == ':')
    .next()
    .and_then(|tail| tail.parse().ok())
}

pub(crate) fn parse_submit_response(
  body: &str,
) -> Result<Submission, ClientError> {
  if let Some(cdr_b64) = element_text(body, "applicationResponse") {
    let cdr = B64
      .decode(cdr_b64.trim())
      .map_err(|e| ClientError::Transient(format!("bad receipt encoding: {e}")))?;
    return Ok(Submission::Accepted {
      code:    "0".into(),
      message: "accepted".into(),
      cdr:     Some(cdr),
    });
  }

  if let Some(ticket) = element_text(body, "ticket") {
    return Ok(Submission::Ticket(ticket.trim().to_string()));
  }

  if let Some(code) = element_text(body, "faultcode") {
    let message = element_text(body, "faultstring").unwrap_or_default();
    return match fault_code_number(&code) {
      // Authority-side exception: the document was not judged at all.
      Some(n) if (100..=1999).contains(&n) => {
        Err(ClientError::Transient(format!("authority exception {n}: {message}")))
      }
      Some(n) if (2000..=3999).contains(&n) => {
        Ok(Submission::Rejected { code: n.to_string(), message })
      }
      Some(n) => Ok(Submission::Accepted {
        code:    n.to_string(),
        message,
        cdr:     None,
      }),
      // A fault with no catalogue number means our envelope is at fault.
      None => Err(ClientError::Permanent(format!("fault {code}: {message}"))),
    };
  }

  Err(ClientError::Transient("unrecognized response body".into()))
}

pub(crate) fn parse_ticket_response(
  body: &str,
) -> Result<TicketStatus, ClientError> {
  if let Some(code) = element_text(body, "faultcode") {
    let message = element_text(body, "faultstring").unwrap_or_default();
    return Err(ClientError::Transient(format!("fault {code}: {message}")));
  }

  let status_code = element_text(body, "statusCode")
    .ok_or_else(|| ClientError::Transient("response has no statusCode".into()))?;
  let message = element_text(body, "statusMessage").unwrap_or_default();
  let cdr = match element_text(body, "content") {
    Some(b64) => Some(
      B64
        .decode(b64.trim())
        .map_err(|e| ClientError::Transient(format!("bad receipt encoding: {e}")))?,
    ),
    None => None,
  };

  match status_code.trim() {
    "0" => Ok(TicketStatus::Accepted { code: "0".into(), message, cdr }),
    "98" => Ok(TicketStatus::Pending),
    "99" => {
      // The catalogue code prefixes the message, e.g. "2335 - ...".
      let code_number = message
        .split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse::<u32>().ok());
      match code_number {
        Some(n) if n >= 4000 => Ok(TicketStatus::Observed {
          code: n.to_string(),
          message,
          cdr,
        }),
        Some(n) => Ok(TicketStatus::Rejected { code: n.to_string(), message }),
        None => Ok(TicketStatus::Rejected { code: "99".into(), message }),
      }
    }
    other => {
      Err(ClientError::Transient(format!("unknown ticket status {other:?}")))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepted_response_with_cdr() {
    let cdr = B64.encode(b"PK-receipt-bytes");
    let body = format!(
      "<soap-env:Envelope xmlns:soap-env=\"{NS_SOAP}\"><soap-env:Body>\
       <br:sendBillResponse xmlns:br=\"{NS_SERVICE}\">\
       <applicationResponse>{cdr}</applicationResponse>\
       </br:sendBillResponse></soap-env:Body></soap-env:Envelope>"
    );
    let outcome = parse_submit_response(&body).unwrap();
    assert_eq!(
      outcome,
      Submission::Accepted {
        code:    "0".into(),
        message: "accepted".into(),
        cdr:     Some(b"PK-receipt-bytes".to_vec()),
      }
    );
  }

  #[test]
  fn ticket_response() {
    let body = "<Envelope><Body><sendSummaryResponse>\
                <ticket>1628354758912</ticket>\
                </sendSummaryResponse></Body></Envelope>";
    assert_eq!(
      parse_submit_response(body).unwrap(),
      Submission::Ticket("1628354758912".into())
    );
  }

  #[test]
  fn content_rejection_is_permanent_not_an_error() {
    let body = "<Envelope><Body><Fault>\
                <faultcode>soap-env:Client.2335</faultcode>\
                <faultstring>Numero de documento ya existe</faultstring>\
                </Fault></Body></Envelope>";
    let outcome = parse_submit_response(body).unwrap();
    assert!(
      matches!(outcome, Submission::Rejected { ref code, .. } if code == "2335")
    );
  }

  #[test]
  fn authority_exception_is_transient() {
    let body = "<Envelope><Body><Fault>\
                <faultcode>soap-env:Server.0109</faultcode>\
                <faultstring>Sistema no disponible</faultstring>\
                </Fault></Body></Envelope>";
    assert!(matches!(
      parse_submit_response(body),
      Err(ClientError::Transient(_))
    ));
  }

  #[test]
  fn observation_code_is_accepted_with_warnings() {
    let body = "<Envelope><Body><Fault>\
                <faultcode>4332</faultcode>\
                <faultstring>Dato no esperado</faultstring>\
                </Fault></Body></Envelope>";
    let outcome = parse_submit_response(body).unwrap();
    assert!(matches!(outcome, Submission::Accepted { ref code, .. } if code == "4332"));
  }

  #[test]
  fn non_catalogue_fault_is_permanent() {
    let body = "<Envelope><Body><Fault>\
                <faultcode>soap-env:Client</faultcode>\
                <faultstring>bad envelope</faultstring>\
                </Fault></Body></Envelope>";
    assert!(matches!(
      parse_submit_response(body),
      Err(ClientError::Permanent(_))
    ));
  }

  #[test]
  fn ticket_status_pending() {
    let body = "<Envelope><Body><getStatusResponse><status>\
                <statusCode>98</statusCode>\
                </status></getStatusResponse></Body></Envelope>";
    assert_eq!(parse_ticket_response(body).unwrap(), TicketStatus::Pending);
  }

  #[test]
  fn ticket_status_accepted_with_cdr() {
    let cdr = B64.encode(b"cdr-zip");
    let body = format!(
      "<Envelope><Body><getStatusResponse><status>\
       <statusCode>0</statusCode><content>{cdr}</content>\
       </status></getStatusResponse></Body></Envelope>"
    );
    let status = parse_ticket_response(&body).unwrap();
    assert!(matches!(
      status,
      TicketStatus::Accepted { ref cdr, .. } if cdr.as_deref() == Some(b"cdr-zip".as_slice())
    ));
  }

  #[test]
  fn ticket_status_rejection_and_observation() {
    let rejected = "<r><statusCode>99</statusCode>\
                    <statusMessage>2335 - duplicate document</statusMessage></r>";
    assert!(matches!(
      parse_ticket_response(rejected).unwrap(),
      TicketStatus::Rejected { ref code, .. } if code == "2335"
    ));

    let observed = "<r><statusCode>99</statusCode>\
                    <statusMessage>4332 - unexpected value</statusMessage></r>";
    assert!(matches!(
      parse_ticket_response(observed).unwrap(),
      TicketStatus::Observed { ref code, .. } if code == "4332"
    ));
  }

  #[test]
  fn credentials_are_escaped_in_the_envelope() {
    let creds = ClientCredentials {
      username: "20100070970MODDATOS".into(),
      password: "p<&>w".into(),
    };
    let envelope = build_submit_envelope(&creds, "sendBill", "f.xml", b"x");
    assert!(envelope.contains("p&lt;&amp;&gt;w"));
    assert!(!envelope.contains("p<&>w"));
  }
}
