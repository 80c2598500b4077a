use std::{
    future::IntoFuture,
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::{TcpListener, UdpSocket};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use remote_boot_common::{
    accessory::AccessoryInfo,
    dns::MAX_DNS_PACKET,
    error::{HalError, RadioError, StoreError},
    hal::{AccessPointSettings, Clock, InputPin, NvRegion, OutputPin, Radio, SystemControl},
    portal::Method as PortalMethod,
    BootOutcome, CaptiveDns, ConfigStore, HandoffRuntime, LoopStatus, PortalRequest,
    PortalSession, PortalStatus, Provisioner, ProvisioningConfig, RecoveryButton,
    StatusIndicator, Supervisor,
};

const MAIN_LOOP_PERIOD_MS: u64 = 5;
const PORTAL_LOOP_PERIOD_MS: u64 = 10;
// Simulated association plus DHCP latency.
const SIMULATED_JOIN_MS: u64 = 1_200;

type SharedPortal = Arc<Mutex<PortalSession<FileRegion>>>;

struct HostSettings {
    config: ProvisioningConfig,
    store_path: PathBuf,
    button_path: PathBuf,
    networks: Vec<(String, String)>,
    http_port: u16,
    dns_port: u16,
}

enum BootEnd {
    Restart,
    Shutdown,
}

/// Byte region persisted as a whole file on `commit`.
struct FileRegion {
    path: PathBuf,
    image: Vec<u8>,
}

struct SimulatedRadio {
    networks: Vec<(String, String)>,
    joining: Option<(String, String, Instant)>,
}

/// Pressed while the marker file exists.
struct MarkerButton {
    path: PathBuf,
}

struct LogLed;

struct HostClock;

#[derive(Default)]
struct HostSystem {
    restart_requested: bool,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = HostSettings::from_env()?;
    info!(
        "simulated device: store `{}`, button marker `{}`, {} known networks",
        settings.store_path.display(),
        settings.button_path.display(),
        settings.networks.len()
    );

    loop {
        match boot(&settings).await? {
            BootEnd::Restart => info!("simulated restart"),
            BootEnd::Shutdown => return Ok(()),
        }
    }
}

async fn boot(settings: &HostSettings) -> anyhow::Result<BootEnd> {
    let config = settings.config.clone();
    let region_len = ConfigStore::<FileRegion>::required_len(config.store_offset);
    let region = FileRegion::open(settings.store_path.clone(), region_len)?;
    let store = ConfigStore::new(region, config.store_offset)
        .context("config window does not fit the store file")?;

    let mut radio = SimulatedRadio::new(settings.networks.clone());
    let mut indicator = StatusIndicator::new(LogLed, config.heartbeat_half_period_ms);

    // The connect budget blocks on sleeps, as on the device.
    let provisioner = Provisioner::new(store, config.clone());
    let outcome = tokio::task::spawn_blocking(move || {
        provisioner
            .run(&mut radio, &mut indicator, &mut HostClock)
            .map(|outcome| (outcome, indicator))
    })
    .await
    .context("provisioning task panicked")?
    .context("provisioning failed")?;

    match outcome {
        (BootOutcome::Portal(session), indicator) => {
            serve_portal(session, indicator, settings).await
        }
        (BootOutcome::Operational { record, store }, indicator) => {
            let button = RecoveryButton::new(
                MarkerButton {
                    path: settings.button_path.clone(),
                },
                config.debounce_ms,
                config.hold_threshold_ms,
            );
            let runtime = HandoffRuntime::new(AccessoryInfo::pc_switch("HOST-SIMULATOR"));
            let supervisor = Supervisor::start(&record, store, indicator, button, runtime)?;
            run_main_loop(supervisor).await
        }
    }
}

async fn run_main_loop(
    mut supervisor: Supervisor<MarkerButton, FileRegion, LogLed, HandoffRuntime>,
) -> anyhow::Result<BootEnd> {
    let mut system = HostSystem::default();
    let mut interval = tokio::time::interval(Duration::from_millis(MAIN_LOOP_PERIOD_MS));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if supervisor.tick(&mut system, monotonic_ms()) == LoopStatus::Restarting {
                    return Ok(system.take_restart());
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(BootEnd::Shutdown),
        }
    }
}

async fn serve_portal(
    session: PortalSession<FileRegion>,
    indicator: StatusIndicator<LogLed>,
    settings: &HostSettings,
) -> anyhow::Result<BootEnd> {
    let dns = session.dns().clone();
    let session: SharedPortal = Arc::new(Mutex::new(session));

    let app = Router::new()
        .fallback(handle_portal)
        .layer(TraceLayer::new_for_http())
        .with_state(session.clone());

    let http_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.http_port));
    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind portal server at {http_addr}"))?;

    let dns_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.dns_port));
    let dns_socket = UdpSocket::bind(dns_addr)
        .await
        .with_context(|| format!("failed to bind captive DNS at {dns_addr}"))?;

    info!(
        "portal listening on http://{http_addr} (clients are sent to {}), dns on {dns_addr}",
        settings.config.portal_root()
    );

    tokio::select! {
        result = axum::serve(listener, app).into_future() => {
            result.context("portal server stopped")?;
            Ok(BootEnd::Shutdown)
        }
        result = serve_dns(dns_socket, dns) => {
            result?;
            Ok(BootEnd::Shutdown)
        }
        end = run_portal_loop(session, indicator) => Ok(end),
        _ = tokio::signal::ctrl_c() => Ok(BootEnd::Shutdown),
    }
}

async fn run_portal_loop(
    session: SharedPortal,
    mut indicator: StatusIndicator<LogLed>,
) -> BootEnd {
    let mut system = HostSystem::default();
    let mut interval = tokio::time::interval(Duration::from_millis(PORTAL_LOOP_PERIOD_MS));

    loop {
        interval.tick().await;
        let status = session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick(&mut indicator, monotonic_ms());
        if status == PortalStatus::RebootDue {
            info!("configuration saved; restarting");
            system.restart();
            return system.take_restart();
        }
    }
}

async fn handle_portal(
    State(session): State<SharedPortal>,
    method: Method,
    uri: Uri,
    body: String,
) -> Response {
    let target = uri
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    let request = PortalRequest::new(portal_method(&method), target, &body);

    // Saving touches the store file.
    let handled = tokio::task::spawn_blocking(move || {
        session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle(&request, monotonic_ms())
    })
    .await;

    let response = match handled {
        Ok(response) => response,
        Err(err) => {
            warn!("portal handler panicked: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut reply = (
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response();
    if let Some(location) = response
        .location
        .and_then(|location| HeaderValue::from_str(&location).ok())
    {
        reply.headers_mut().insert(header::LOCATION, location);
    }
    reply
}

fn portal_method(method: &Method) -> PortalMethod {
    if *method == Method::GET {
        PortalMethod::Get
    } else if *method == Method::POST {
        PortalMethod::Post
    } else {
        PortalMethod::Other
    }
}

async fn serve_dns(socket: UdpSocket, dns: CaptiveDns) -> anyhow::Result<()> {
    let mut buf = [0_u8; MAX_DNS_PACKET];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await.context("dns receive failed")?;
        if let Some(reply) = dns.respond(&buf[..len]) {
            if let Err(err) = socket.send_to(&reply, peer).await {
                warn!("dns reply to {peer} failed: {err}");
            }
        }
    }
}

fn monotonic_ms() -> u32 {
    static START: OnceLock<Instant> = OnceLock::new();
    // Truncation wraps like the device tick counter.
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}

fn env_port(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

impl HostSettings {
    fn from_env() -> anyhow::Result<Self> {
        let config = match std::env::var("REMOTE_BOOT_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read config override `{path}`"))?;
                ProvisioningConfig::from_json(&raw)
                    .with_context(|| format!("invalid config override `{path}`"))?
            }
            Err(_) => ProvisioningConfig::default(),
        };

        let data_dir = PathBuf::from("./.remote-boot");
        let store_path = std::env::var("REMOTE_BOOT_STORE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("eeprom.bin"));
        let button_path = std::env::var("REMOTE_BOOT_BUTTON")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("button-pressed"));

        let networks = std::env::var("REMOTE_BOOT_NETWORKS")
            .map(|value| parse_networks(&value))
            .unwrap_or_default();

        Ok(Self {
            config,
            store_path,
            button_path,
            networks,
            http_port: env_port("REMOTE_BOOT_HTTP_PORT", 8080),
            dns_port: env_port("REMOTE_BOOT_DNS_PORT", 5353),
        })
    }
}

/// `ssid:passphrase` pairs separated by commas; a bare `ssid` is an open network.
fn parse_networks(value: &str) -> Vec<(String, String)> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (ssid, passphrase) = entry.split_once(':').unwrap_or((entry, ""));
            (ssid.to_string(), passphrase.to_string())
        })
        .collect()
}

impl FileRegion {
    fn open(path: PathBuf, len: usize) -> anyhow::Result<Self> {
        let mut image = vec![0xFF_u8; len];
        match std::fs::read(&path) {
            Ok(raw) => {
                let copied = raw.len().min(len);
                image[..copied].copy_from_slice(&raw[..copied]);
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read `{}`", path.display()))
            }
        }
        Ok(Self { path, image })
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), StoreError> {
        if offset + len > self.image.len() {
            return Err(StoreError::OutOfBounds {
                offset,
                len,
                capacity: self.image.len(),
            });
        }
        Ok(())
    }
}

impl NvRegion for FileRegion {
    fn len(&self) -> usize {
        self.image.len()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        self.check(offset, buf.len())?;
        buf.copy_from_slice(&self.image[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.check(offset, bytes.len())?;
        self.image[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| StoreError::Backend(err.to_string()))?;
        }
        std::fs::write(&self.path, &self.image).map_err(|err| StoreError::Backend(err.to_string()))
    }
}

impl SimulatedRadio {
    fn new(networks: Vec<(String, String)>) -> Self {
        Self {
            networks,
            joining: None,
        }
    }
}

impl Radio for SimulatedRadio {
    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), RadioError> {
        if ssid.len() > 32 {
            return Err(RadioError::InvalidSsid(ssid.to_string()));
        }
        info!("station joining `{ssid}`");
        self.joining = Some((ssid.to_string(), passphrase.to_string(), Instant::now()));
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        let Some((ssid, passphrase, started)) = &self.joining else {
            return false;
        };
        let known = self
            .networks
            .iter()
            .any(|(known_ssid, known_pass)| known_ssid == ssid && known_pass == passphrase);
        known && started.elapsed() >= Duration::from_millis(SIMULATED_JOIN_MS)
    }

    fn disconnect(&mut self) {
        if self.joining.take().is_some() {
            info!("station stopped");
        }
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), RadioError> {
        info!(
            "access point `{}` at {}/{}",
            settings.ssid, settings.address, settings.netmask
        );
        Ok(())
    }
}

impl InputPin for MarkerButton {
    fn is_high(&mut self) -> Result<bool, HalError> {
        // Active low: the marker pulls the line down.
        Ok(!self.path.exists())
    }
}

impl OutputPin for LogLed {
    fn set_level(&mut self, high: bool) -> Result<(), HalError> {
        tracing::debug!("status LED {}", if high { "on" } else { "off" });
        Ok(())
    }
}

impl Clock for HostClock {
    fn now_ms(&self) -> u32 {
        monotonic_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

impl HostSystem {
    fn take_restart(&mut self) -> BootEnd {
        if std::mem::take(&mut self.restart_requested) {
            BootEnd::Restart
        } else {
            BootEnd::Shutdown
        }
    }
}

impl SystemControl for HostSystem {
    fn restart(&mut self) {
        self.restart_requested = true;
    }
}
