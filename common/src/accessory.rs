//! Smart-home accessory description and characteristic wiring.
//!
//! The descriptor is built once, validated, and handed to the accessory
//! host; nothing in the provisioning core reads it afterwards. Runtime reads
//! and writes from the host go through a [`CharacteristicRegistry`] whose
//! handlers are resolved against the descriptor at start-up.

use std::collections::BTreeMap;

use log::debug;

use crate::error::AccessoryError;

pub const MAX_TEXT_LEN: usize = 64;

/// Lock states double as the PC power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    On,
    Off,
    Unknown,
}

impl LockState {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::On => 0,
            Self::Off => 1,
            Self::Unknown => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::On),
            1 => Some(Self::Off),
            3 => Some(Self::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    DoorLock,
}

impl Category {
    pub fn id(self) -> u8 {
        match self {
            Self::DoorLock => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    AccessoryInformation,
    LockMechanism,
}

impl ServiceKind {
    pub fn type_id(self) -> &'static str {
        match self {
            Self::AccessoryInformation => "3E",
            Self::LockMechanism => "45",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CharacteristicKind {
    Identify,
    Manufacturer,
    Model,
    Name,
    SerialNumber,
    FirmwareRevision,
    LockCurrentState,
    LockTargetState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Bool,
    U8,
    Text,
}

impl CharacteristicKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Manufacturer => "manufacturer",
            Self::Model => "model",
            Self::Name => "name",
            Self::SerialNumber => "serial-number",
            Self::FirmwareRevision => "firmware-revision",
            Self::LockCurrentState => "lock-current-state",
            Self::LockTargetState => "lock-target-state",
        }
    }

    pub fn type_id(self) -> &'static str {
        match self {
            Self::Identify => "14",
            Self::Manufacturer => "20",
            Self::Model => "21",
            Self::Name => "23",
            Self::SerialNumber => "30",
            Self::FirmwareRevision => "52",
            Self::LockCurrentState => "1D",
            Self::LockTargetState => "1E",
        }
    }

    pub fn format(self) -> Format {
        match self {
            Self::Identify => Format::Bool,
            Self::LockCurrentState | Self::LockTargetState => Format::U8,
            _ => Format::Text,
        }
    }

    pub fn readable(self) -> bool {
        self != Self::Identify
    }

    pub fn writable(self) -> bool {
        matches!(self, Self::Identify | Self::LockTargetState)
    }

    fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (Self::LockTargetState, Value::U8(state)) => *state <= 1,
            (Self::LockCurrentState, Value::U8(state)) => *state <= 3,
            (_, Value::Text(text)) => {
                self.format() == Format::Text && text.len() <= MAX_TEXT_LEN
            }
            (_, Value::Bool(_)) => self.format() == Format::Bool,
            (_, Value::U8(_)) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    Text(String),
}

impl Value {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub instance_id: u16,
    pub kind: CharacteristicKind,
    pub initial: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub instance_id: u16,
    pub kind: ServiceKind,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryDescriptor {
    accessory_id: u32,
    category: Category,
    services: Vec<Service>,
}

impl AccessoryDescriptor {
    pub fn builder(accessory_id: u32, category: Category) -> AccessoryBuilder {
        AccessoryBuilder {
            accessory_id,
            category,
            services: Vec::new(),
        }
    }

    pub fn accessory_id(&self) -> u32 {
        self.accessory_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// First characteristic of `kind`, searching the primary service first.
    pub fn find(&self, kind: CharacteristicKind) -> Option<&Characteristic> {
        let primary = self.services.iter().filter(|service| service.primary);
        let rest = self.services.iter().filter(|service| !service.primary);
        primary
            .chain(rest)
            .flat_map(|service| service.characteristics.iter())
            .find(|characteristic| characteristic.kind == kind)
    }
}

pub struct ServiceBuilder {
    kind: ServiceKind,
    primary: bool,
    characteristics: Vec<(CharacteristicKind, Value)>,
}

impl ServiceBuilder {
    pub fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            primary: false,
            characteristics: Vec::new(),
        }
    }

    pub fn primary(kind: ServiceKind) -> Self {
        Self {
            primary: true,
            ..Self::new(kind)
        }
    }

    pub fn with(mut self, kind: CharacteristicKind, initial: Value) -> Self {
        self.characteristics.push((kind, initial));
        self
    }
}

pub struct AccessoryBuilder {
    accessory_id: u32,
    category: Category,
    services: Vec<ServiceBuilder>,
}

impl AccessoryBuilder {
    pub fn service(mut self, service: ServiceBuilder) -> Self {
        self.services.push(service);
        self
    }

    /// Validates the table and assigns instance ids in declaration order,
    /// starting at 1.
    pub fn build(self) -> Result<AccessoryDescriptor, AccessoryError> {
        let info_services = self
            .services
            .iter()
            .filter(|service| service.kind == ServiceKind::AccessoryInformation)
            .count();
        if info_services != 1 {
            return Err(AccessoryError::Descriptor(format!(
                "expected one accessory-information service, found {info_services}"
            )));
        }

        let primaries = self.services.iter().filter(|service| service.primary).count();
        if primaries > 1 {
            return Err(AccessoryError::Descriptor(format!(
                "{primaries} services marked primary"
            )));
        }

        let mut next_id: u16 = 1;
        let mut services = Vec::with_capacity(self.services.len());
        for service in self.services {
            let service_id = next_id;
            next_id += 1;

            let mut characteristics: Vec<Characteristic> = Vec::new();
            for (kind, initial) in service.characteristics {
                if characteristics.iter().any(|existing| existing.kind == kind) {
                    return Err(AccessoryError::Descriptor(format!(
                        "duplicate `{}` in service {}",
                        kind.name(),
                        service.kind.type_id()
                    )));
                }
                if !kind.accepts(&initial) {
                    return Err(AccessoryError::Descriptor(format!(
                        "initial value {initial:?} invalid for `{}`",
                        kind.name()
                    )));
                }
                characteristics.push(Characteristic {
                    instance_id: next_id,
                    kind,
                    initial,
                });
                next_id += 1;
            }

            services.push(Service {
                instance_id: service_id,
                kind: service.kind,
                primary: service.primary,
                characteristics,
            });
        }

        Ok(AccessoryDescriptor {
            accessory_id: self.accessory_id,
            category: self.category,
            services,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryInfo {
    pub name: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub model: String,
    pub firmware_revision: String,
}

impl AccessoryInfo {
    pub fn pc_switch(serial_number: &str) -> Self {
        Self {
            name: "PC Switch".to_string(),
            manufacturer: "Remote Boot".to_string(),
            serial_number: serial_number.to_string(),
            model: "ESP Remote Boot".to_string(),
            firmware_revision: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The PC power switch, presented as a door lock.
pub fn remote_switch(
    info: &AccessoryInfo,
    initial: LockState,
) -> Result<AccessoryDescriptor, AccessoryError> {
    use CharacteristicKind::*;

    // The target can only ever be on or off.
    let target = match initial {
        LockState::On => LockState::On,
        LockState::Off | LockState::Unknown => LockState::Off,
    };

    AccessoryDescriptor::builder(1, Category::DoorLock)
        .service(
            ServiceBuilder::new(ServiceKind::AccessoryInformation)
                .with(Name, Value::text(&info.name))
                .with(Manufacturer, Value::text(&info.manufacturer))
                .with(SerialNumber, Value::text(&info.serial_number))
                .with(Model, Value::text(&info.model))
                .with(FirmwareRevision, Value::text(&info.firmware_revision))
                .with(Identify, Value::Bool(false)),
        )
        .service(
            ServiceBuilder::primary(ServiceKind::LockMechanism)
                .with(LockCurrentState, Value::U8(initial.as_u8()))
                .with(LockTargetState, Value::U8(target.as_u8()))
                .with(Name, Value::text(&info.name)),
        )
        .build()
}

pub type Getter = Box<dyn Fn() -> Value + Send>;
pub type Setter = Box<dyn FnMut(Value) + Send>;

#[derive(Default)]
struct Handlers {
    getter: Option<Getter>,
    setter: Option<Setter>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    handlers: BTreeMap<CharacteristicKind, Handlers>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn getter(
        mut self,
        kind: CharacteristicKind,
        getter: impl Fn() -> Value + Send + 'static,
    ) -> Self {
        self.handlers.entry(kind).or_default().getter = Some(Box::new(getter));
        self
    }

    pub fn setter(
        mut self,
        kind: CharacteristicKind,
        setter: impl FnMut(Value) + Send + 'static,
    ) -> Self {
        self.handlers.entry(kind).or_default().setter = Some(Box::new(setter));
        self
    }

    /// Binds every handler to its instance in `descriptor`.
    pub fn resolve(
        self,
        descriptor: &AccessoryDescriptor,
    ) -> Result<CharacteristicRegistry, AccessoryError> {
        let mut entries = BTreeMap::new();
        for (kind, handlers) in self.handlers {
            let characteristic = descriptor
                .find(kind)
                .ok_or(AccessoryError::Unbound(kind.name()))?;
            let instance_id = characteristic.instance_id;

            if handlers.getter.is_some() && !kind.readable() {
                return Err(AccessoryError::NotReadable(instance_id));
            }
            if handlers.setter.is_some() && !kind.writable() {
                return Err(AccessoryError::NotWritable(instance_id));
            }

            debug!("bound `{}` to instance {instance_id}", kind.name());
            entries.insert(instance_id, (kind, handlers));
        }

        Ok(CharacteristicRegistry { entries })
    }
}

pub struct CharacteristicRegistry {
    entries: BTreeMap<u16, (CharacteristicKind, Handlers)>,
}

impl CharacteristicRegistry {
    pub fn read(&self, instance_id: u16) -> Result<Value, AccessoryError> {
        let (_, handlers) = self
            .entries
            .get(&instance_id)
            .ok_or(AccessoryError::UnknownInstance(instance_id))?;
        let getter = handlers
            .getter
            .as_ref()
            .ok_or(AccessoryError::NotReadable(instance_id))?;
        Ok(getter())
    }

    pub fn write(&mut self, instance_id: u16, value: Value) -> Result<(), AccessoryError> {
        let (kind, handlers) = self
            .entries
            .get_mut(&instance_id)
            .ok_or(AccessoryError::UnknownInstance(instance_id))?;
        let setter = handlers
            .setter
            .as_mut()
            .ok_or(AccessoryError::NotWritable(instance_id))?;
        if !kind.accepts(&value) {
            return Err(AccessoryError::InvalidValue(instance_id));
        }
        setter(value);
        Ok(())
    }

    pub fn instance_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.keys().copied()
    }
}
