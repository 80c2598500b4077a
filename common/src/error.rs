use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("access of {len} bytes at offset {offset} exceeds region of {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
#[error("gpio failure: {0}")]
pub struct HalError(pub String);

#[derive(Debug, Error)]
pub enum RadioError {
    #[error("network name `{0}` rejected by radio")]
    InvalidSsid(String),
    #[error("radio backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessoryError {
    #[error("accessory descriptor invalid: {0}")]
    Descriptor(String),
    #[error("no characteristic `{0}` in accessory descriptor")]
    Unbound(&'static str),
    #[error("unknown characteristic instance {0}")]
    UnknownInstance(u16),
    #[error("characteristic instance {0} is not readable")]
    NotReadable(u16),
    #[error("characteristic instance {0} is not writable")]
    NotWritable(u16),
    #[error("value rejected by characteristic instance {0}")]
    InvalidValue(u16),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hal(#[from] HalError),
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Accessory(#[from] AccessoryError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = core::result::Result<T, Error>;
