//! # pmoonvif - client SOAP pour caméras ONVIF
//!
//! Couche protocolaire côté client : enveloppes SOAP 1.2, en-tête
//! WS-Security UsernameToken et négociation automatique de
//! l'authentification (HTTP Digest ou WS-Security) lorsqu'un appareil
//! refuse une requête.
//!
//! ```no_run
//! use pmoonvif::{Client, ClientConfig, Request};
//!
//! let config = ClientConfig::load()?;
//! let client = Client::from_config(&config);
//!
//! let request = Request::new(
//!     "http://192.168.0.64/onvif/device_service",
//!     "<tds:GetServices><tds:IncludeCapability>false</tds:IncludeCapability></tds:GetServices>",
//! )
//! .with_namespace("tds", "http://www.onvif.org/ver10/device/wsdl");
//!
//! let envelope = client.negotiate(&request)?;
//! let response = envelope.body_element()?;
//! println!("{} services", response.children.len());
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::time::Duration;

pub mod client;
pub mod config;
pub mod errors;
pub mod soap;
pub mod transport;

pub use client::{AuthMode, Client, Credentials, DumpHook, Exchange, Request};
pub use config::ClientConfig;
pub use errors::{Result, SoapError, UnauthorizedCause};
pub use soap::{Envelope, Fault};
pub use transport::{HttpResponse, SoapTransport, UreqTransport};

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
