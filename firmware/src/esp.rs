use core::convert::TryInto;
use std::{
    fmt::Display,
    io::ErrorKind,
    net::{Ipv4Addr, SocketAddrV4, UdpSocket},
    sync::{Arc, Mutex, OnceLock, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{AnyInputPin, AnyOutputPin, Input, Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    ipv4::{Configuration as IpConfiguration, Mask, RouterConfiguration, Subnet},
    log::EspLogger,
    netif::{EspNetif, NetifConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use remote_boot_common::{
    accessory::AccessoryInfo,
    dns::{DNS_PORT, MAX_DNS_PACKET},
    error::{HalError, RadioError, StoreError},
    hal::{AccessPointSettings, Clock, InputPin, NvRegion, OutputPin, Radio, SystemControl},
    portal::Method as PortalMethod,
    BootOutcome, CaptiveDns, ConfigStore, HandoffRuntime, PortalRequest, PortalResponse,
    PortalSession, PortalStatus, Provisioner, ProvisioningConfig, RecoveryButton,
    StatusIndicator, Supervisor,
};

const NVS_NAMESPACE: &str = "remote_boot";
const NVS_IMAGE_KEY: &str = "eeprom";
const LED_PIN: i32 = 14;
const BUTTON_PIN: i32 = 12;
const MAX_HTTP_BODY: usize = 1024;
const MAIN_LOOP_PERIOD_MS: u64 = 5;
const PORTAL_LOOP_PERIOD_MS: u64 = 10;

type SharedPortal = Arc<Mutex<PortalSession<NvsRegion>>>;

/// Byte image mirrored into a single NVS blob; `commit` persists it.
struct NvsRegion {
    nvs: EspNvs<NvsDefault>,
    image: Vec<u8>,
}

struct EspRadio {
    wifi: BlockingWifi<EspWifi<'static>>,
}

struct LedPin(PinDriver<'static, AnyOutputPin, Output>);

struct ButtonPin(PinDriver<'static, AnyInputPin, Input>);

struct EspClock;

struct EspSystem;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let config = ProvisioningConfig::default();
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, .. } = Peripherals::take()?;

    let region_len = ConfigStore::<NvsRegion>::required_len(config.store_offset);
    let region = NvsRegion::open(nvs_partition.clone(), region_len)?;
    let store = ConfigStore::new(region, config.store_offset)
        .context("config window does not fit the NVS image")?;

    let mut radio = EspRadio::new(modem, sys_loop, nvs_partition)?;
    let mut indicator = StatusIndicator::new(init_led(LED_PIN)?, config.heartbeat_half_period_ms);
    let mut clock = EspClock;
    let mut system = EspSystem;

    let outcome = Provisioner::new(store, config.clone())
        .run(&mut radio, &mut indicator, &mut clock)
        .context("provisioning failed")?;

    match outcome {
        BootOutcome::Portal(session) => serve_portal(session, indicator, &config, &mut system),
        BootOutcome::Operational { record, store } => {
            let button = RecoveryButton::new(
                init_button(BUTTON_PIN)?,
                config.debounce_ms,
                config.hold_threshold_ms,
            );
            let info = AccessoryInfo::pc_switch(&radio.serial_number());
            let mut supervisor = Supervisor::start(
                &record,
                store,
                indicator,
                button,
                HandoffRuntime::new(info),
            )?;

            // Keep the station link alive for the program lifetime.
            let _radio = radio;
            loop {
                supervisor.tick(&mut system, monotonic_ms());
                thread::sleep(Duration::from_millis(MAIN_LOOP_PERIOD_MS));
            }
        }
    }
}

fn serve_portal(
    session: PortalSession<NvsRegion>,
    mut indicator: StatusIndicator<LedPin>,
    config: &ProvisioningConfig,
    system: &mut EspSystem,
) -> anyhow::Result<()> {
    let dns = session.dns().clone();
    let session: SharedPortal = Arc::new(Mutex::new(session));
    let _server = create_portal_http_server(session.clone())?;

    let dns_socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DNS_PORT))
        .context("failed to bind captive DNS socket")?;
    dns_socket.set_nonblocking(true)?;
    info!("portal serving at {}", config.portal_root());

    loop {
        pump_dns(&dns_socket, &dns);

        let status = session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick(&mut indicator, monotonic_ms());
        if status == PortalStatus::RebootDue {
            info!("configuration saved; restarting");
            system.restart();
            return Ok(());
        }

        thread::sleep(Duration::from_millis(PORTAL_LOOP_PERIOD_MS));
    }
}

fn create_portal_http_server(session: SharedPortal) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 16 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    for method in [Method::Get, Method::Post] {
        let session = session.clone();
        server.fn_handler::<anyhow::Error, _>("/*", method, move |mut req| {
            let uri = req.uri().to_string();
            let body = read_request_body(&mut req)?;
            let request = PortalRequest::new(
                portal_method(method),
                &uri,
                &String::from_utf8_lossy(&body),
            );

            let response = session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .handle(&request, monotonic_ms());
            write_portal_response(req, &response)
        })?;
    }

    Ok(server)
}

fn portal_method(method: Method) -> PortalMethod {
    match method {
        Method::Get => PortalMethod::Get,
        Method::Post => PortalMethod::Post,
        _ => PortalMethod::Other,
    }
}

fn read_request_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_portal_response(
    req: Request<&mut EspHttpConnection<'_>>,
    response: &PortalResponse,
) -> anyhow::Result<()> {
    let mut headers = vec![("Content-Type", response.content_type)];
    if let Some(location) = response.location.as_deref() {
        headers.push(("Location", location));
    }

    req.into_response(response.status, None, &headers)?
        .write_all(response.body.as_bytes())?;
    Ok(())
}

fn pump_dns(socket: &UdpSocket, dns: &CaptiveDns) {
    let mut buf = [0_u8; MAX_DNS_PACKET];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, peer)) => {
                if let Some(reply) = dns.respond(&buf[..len]) {
                    if let Err(err) = socket.send_to(&reply, peer) {
                        warn!("dns reply to {peer} failed: {err}");
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => return,
            Err(err) => {
                warn!("dns receive failed: {err}");
                return;
            }
        }
    }
}

fn init_led(pin: i32) -> anyhow::Result<LedPin> {
    let driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) }
        .with_context(|| format!("status LED unavailable on GPIO{pin}"))?;
    Ok(LedPin(driver))
}

fn init_button(pin: i32) -> anyhow::Result<ButtonPin> {
    let mut driver = unsafe { PinDriver::input(AnyInputPin::new(pin)) }
        .with_context(|| format!("recovery button unavailable on GPIO{pin}"))?;
    driver.set_pull(Pull::Up)?;
    Ok(ButtonPin(driver))
}

fn backend(err: impl Display) -> RadioError {
    RadioError::Backend(err.to_string())
}

fn monotonic_ms() -> u32 {
    static START: OnceLock<Instant> = OnceLock::new();
    // Truncation wraps like the hardware tick counter.
    START.get_or_init(Instant::now).elapsed().as_millis() as u32
}

impl NvsRegion {
    fn open(partition: EspDefaultNvsPartition, len: usize) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        let mut image = vec![0xFF_u8; len];

        let stored = nvs
            .get_raw(NVS_IMAGE_KEY, &mut image)
            .context("failed to read NVS image")?
            .map(|bytes| bytes.len());
        match stored {
            Some(stored) => info!("NVS image loaded ({stored} of {len} bytes)"),
            None => info!("NVS image empty"),
        }

        Ok(Self { nvs, image })
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

impl NvRegion for NvsRegion {
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
        self.nvs
            .set_raw(NVS_IMAGE_KEY, &self.image)
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(())
    }
}

impl EspRadio {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
    ) -> anyhow::Result<Self> {
        let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
        let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;
        Ok(Self { wifi })
    }

    fn serial_number(&self) -> String {
        match self.wifi.wifi().sta_netif().get_mac() {
            Ok(mac) => mac.iter().map(|byte| format!("{byte:02X}")).collect(),
            Err(err) => {
                warn!("failed to read station MAC: {err}");
                "000000000000".to_string()
            }
        }
    }

    fn router_netif(settings: &AccessPointSettings) -> anyhow::Result<EspNetif> {
        let mask = Mask::try_from(settings.netmask)
            .map_err(|_| anyhow!("invalid access point netmask: {}", settings.netmask))?;

        let conf = NetifConfiguration {
            ip_configuration: Some(IpConfiguration::Router(RouterConfiguration {
                subnet: Subnet {
                    gateway: settings.address,
                    mask,
                },
                dhcp_enabled: true,
                dns: Some(settings.address),
                secondary_dns: None,
            })),
            ..NetifConfiguration::wifi_default_router()
        };

        Ok(EspNetif::new_with_conf(&conf)?)
    }
}

impl Radio for EspRadio {
    fn begin_station(&mut self, ssid: &str, passphrase: &str) -> Result<(), RadioError> {
        let auth_method = if passphrase.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid
                    .try_into()
                    .map_err(|_| RadioError::InvalidSsid(ssid.to_string()))?,
                password: passphrase
                    .try_into()
                    .map_err(|_| backend("passphrase too long"))?,
                auth_method,
                ..Default::default()
            }))
            .map_err(backend)?;

        self.wifi.start().map_err(backend)?;
        // Non-blocking; the provisioner polls for the link.
        self.wifi.wifi_mut().connect().map_err(backend)?;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.wifi.is_connected().unwrap_or(false) && self.wifi.is_up().unwrap_or(false)
    }

    fn disconnect(&mut self) {
        if let Err(err) = self.wifi.disconnect() {
            warn!("wifi disconnect failed: {err}");
        }
        if let Err(err) = self.wifi.stop() {
            warn!("wifi stop failed: {err}");
        }
    }

    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), RadioError> {
        let netif = Self::router_netif(settings).map_err(backend)?;
        self.wifi
            .wifi_mut()
            .swap_netif_ap(netif)
            .map_err(backend)?;

        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: settings
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError::InvalidSsid(settings.ssid.clone()))?,
                auth_method: AuthMethod::None,
                channel: 1,
                ..Default::default()
            }))
            .map_err(backend)?;

        self.wifi.start().map_err(backend)?;
        self.wifi.wait_netif_up().map_err(backend)?;
        Ok(())
    }
}

impl OutputPin for LedPin {
    fn set_level(&mut self, high: bool) -> Result<(), HalError> {
        let result = if high {
            self.0.set_high()
        } else {
            self.0.set_low()
        };
        result.map_err(|err| HalError(err.to_string()))
    }
}

impl InputPin for ButtonPin {
    fn is_high(&mut self) -> Result<bool, HalError> {
        Ok(self.0.is_high())
    }
}

impl Clock for EspClock {
    fn now_ms(&self) -> u32 {
        monotonic_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

impl SystemControl for EspSystem {
    fn restart(&mut self) {
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
}
