//! Captive setup portal.
//!
//! [`PortalSession`] owns the credential store while the device is
//! unprovisioned. Transports (the ESP HTTP server, the host axum router) turn
//! each request into a [`PortalRequest`], pass it to
//! [`PortalSession::handle`] and write back the [`PortalResponse`]. The
//! serving loop calls [`PortalSession::tick`] to blink the LED and learn when
//! the post-save reboot is due.

use log::{debug, info, warn};

use crate::{
    config::ProvisioningConfig,
    dns::CaptiveDns,
    hal::{has_elapsed, NvRegion, OutputPin},
    indicator::StatusIndicator,
    pages::{SAVED_HTML, SETUP_HTML},
    record::ConfigRecord,
    store::ConfigStore,
    types::OperationMode,
};

/// Probes answered with a redirect to the portal root.
pub const ROOT_REDIRECT_PROBES: [&str; 3] = ["/generate_204", "/hotspot-detect.html", "/redirect"];
/// Probe redirected off-portal so the client stops treating the network as captive.
pub const ESCAPE_PROBE: &str = "/connecttest.txt";
/// Probe some browsers use only to test reachability.
pub const NOT_FOUND_PROBE: &str = "/wpad.dat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    pub fn parse(method: &str) -> Self {
        if method.eq_ignore_ascii_case("GET") {
            Self::Get
        } else if method.eq_ignore_ascii_case("POST") {
            Self::Post
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRequest {
    pub method: Method,
    pub path: String,
    args: Vec<(String, String)>,
}

impl PortalRequest {
    /// `uri` may carry a query string; `body` is an urlencoded form (or empty).
    /// Query and body arguments are merged, query first.
    pub fn new(method: Method, uri: &str, body: &str) -> Self {
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        let mut args = parse_form(query);
        args.extend(parse_form(body));
        Self {
            method,
            path: path.to_string(),
            args,
        }
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub location: Option<String>,
    pub body: String,
}

impl PortalResponse {
    fn html(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/html",
            location: None,
            body: body.to_string(),
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            location: None,
            body: body.to_string(),
        }
    }

    fn redirect(location: &str) -> Self {
        Self {
            status: 302,
            content_type: "text/plain",
            location: Some(location.to_string()),
            body: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalStatus {
    Serving,
    RebootDue,
}

pub struct PortalSession<R> {
    store: ConfigStore<R>,
    root_url: String,
    escape_url: String,
    blink_ms: u32,
    reboot_delay_ms: u32,
    dns: CaptiveDns,
    lit: bool,
    last_blink_ms: u32,
    save_accepted_ms: Option<u32>,
}

impl<R: NvRegion> PortalSession<R> {
    pub fn new(store: ConfigStore<R>, config: &ProvisioningConfig, now_ms: u32) -> Self {
        Self {
            store,
            root_url: config.portal_root(),
            escape_url: config.escape_url.clone(),
            blink_ms: config.portal_blink_ms,
            reboot_delay_ms: config.reboot_delay_ms,
            dns: CaptiveDns::new(config.ap_address, config.dns_ttl_secs),
            lit: false,
            last_blink_ms: now_ms,
            save_accepted_ms: None,
        }
    }

    pub fn dns(&self) -> &CaptiveDns {
        &self.dns
    }

    pub fn handle(&mut self, request: &PortalRequest, now_ms: u32) -> PortalResponse {
        debug!("portal {:?} {}", request.method, request.path);

        match (request.method, request.path.as_str()) {
            (_, "/") => PortalResponse::html(200, SETUP_HTML),
            (Method::Post, "/save") => self.handle_save(request, now_ms),
            (_, path) if ROOT_REDIRECT_PROBES.contains(&path) => {
                PortalResponse::redirect(&self.root_url)
            }
            (_, ESCAPE_PROBE) => PortalResponse::redirect(&self.escape_url),
            (_, NOT_FOUND_PROBE) => PortalResponse::text(404, ""),
            _ => PortalResponse::redirect(&self.root_url),
        }
    }

    /// One pass of the serving loop.
    pub fn tick<P: OutputPin>(
        &mut self,
        indicator: &mut StatusIndicator<P>,
        now_ms: u32,
    ) -> PortalStatus {
        if has_elapsed(now_ms, self.last_blink_ms, self.blink_ms) {
            self.lit = !self.lit;
            indicator.set_override(self.lit);
            self.last_blink_ms = now_ms;
        }

        match self.save_accepted_ms {
            Some(accepted) if has_elapsed(now_ms, accepted, self.reboot_delay_ms) => {
                PortalStatus::RebootDue
            }
            _ => PortalStatus::Serving,
        }
    }

    pub fn into_store(self) -> ConfigStore<R> {
        self.store
    }

    fn handle_save(&mut self, request: &PortalRequest, now_ms: u32) -> PortalResponse {
        let (Some(ssid), Some(passphrase), Some(opmode)) = (
            request.arg("ssid"),
            request.arg("password"),
            request.arg("opmode"),
        ) else {
            warn!("portal save rejected: missing fields");
            return PortalResponse::text(400, "Missing fields");
        };

        let Some(mode) = opmode
            .trim()
            .parse::<u8>()
            .ok()
            .and_then(OperationMode::from_index)
        else {
            warn!("portal save rejected: operation mode `{opmode}`");
            return PortalResponse::text(400, "Invalid operation mode");
        };

        let record = ConfigRecord::new(ssid, passphrase, mode);
        info!(
            "saving config: ssid=`{}`, passphrase {} bytes, mode={}",
            record.ssid(),
            record.passphrase().len(),
            mode.as_str()
        );

        if let Err(err) = self.store.save(&record) {
            warn!("portal save failed: {err}");
            return PortalResponse::text(500, "Failed to save configuration");
        }

        info!("restarting in {} ms", self.reboot_delay_ms);
        self.save_accepted_ms = Some(now_ms);
        PortalResponse::html(200, SAVED_HTML)
    }
}

fn parse_form(encoded: &str) -> Vec<(String, String)> {
    encoded
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (url_decode(key), url_decode(value))
        })
        .collect()
}

fn url_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        match bytes[index] {
            b'+' => decoded.push(b' '),
            b'%' => {
                let hex = bytes
                    .get(index + 1..index + 3)
                    .filter(|pair| pair.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|pair| core::str::from_utf8(pair).ok())
                    .and_then(|pair| u8::from_str_radix(pair, 16).ok());
                match hex {
                    Some(byte) => {
                        decoded.push(byte);
                        index += 2;
                    }
                    None => decoded.push(b'%'),
                }
            }
            byte => decoded.push(byte),
        }
        index += 1;
    }

    String::from_utf8_lossy(&decoded).into_owned()
}
