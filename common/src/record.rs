//! The persisted credential record and its fixed on-media image.
//!
//! Image layout (61 bytes): network name in a 30-byte NUL-padded field,
//! passphrase in a 30-byte NUL-padded field, then one operation-mode byte.
//! At most 29 bytes of each string are kept so the terminator always fits.

use std::fmt;

use log::warn;

use crate::types::OperationMode;

pub const FIELD_CAPACITY: usize = 30;
pub const MAX_FIELD_LEN: usize = FIELD_CAPACITY - 1;
pub const RECORD_IMAGE_LEN: usize = FIELD_CAPACITY * 2 + 1;

const SSID_OFFSET: usize = 0;
const PASSPHRASE_OFFSET: usize = FIELD_CAPACITY;
const MODE_OFFSET: usize = FIELD_CAPACITY * 2;

#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConfigRecord {
    ssid: String,
    passphrase: String,
    mode: OperationMode,
}

impl ConfigRecord {
    /// Builds a record, truncating either string to [`MAX_FIELD_LEN`] bytes
    /// on a character boundary.
    pub fn new(ssid: &str, passphrase: &str, mode: OperationMode) -> Self {
        Self {
            ssid: truncate_field(ssid).to_string(),
            passphrase: truncate_field(passphrase).to_string(),
            mode,
        }
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn encode(&self) -> [u8; RECORD_IMAGE_LEN] {
        let mut image = [0_u8; RECORD_IMAGE_LEN];
        write_field(&mut image[SSID_OFFSET..PASSPHRASE_OFFSET], &self.ssid);
        write_field(&mut image[PASSPHRASE_OFFSET..MODE_OFFSET], &self.passphrase);
        image[MODE_OFFSET] = self.mode.index();
        image
    }

    pub fn decode(image: &[u8; RECORD_IMAGE_LEN]) -> Self {
        let mode_byte = image[MODE_OFFSET];
        let mode = OperationMode::from_index(mode_byte).unwrap_or_else(|| {
            warn!("stored operation mode byte {mode_byte:#04x} is unknown; using HTTP");
            OperationMode::Http
        });

        Self {
            ssid: read_field(&image[SSID_OFFSET..PASSPHRASE_OFFSET]),
            passphrase: read_field(&image[PASSPHRASE_OFFSET..MODE_OFFSET]),
            mode,
        }
    }
}

// Keeps the passphrase out of logs.
impl fmt::Debug for ConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigRecord")
            .field("ssid", &self.ssid)
            .field("passphrase_len", &self.passphrase.len())
            .field("mode", &self.mode)
            .finish()
    }
}

fn truncate_field(value: &str) -> &str {
    if value.len() <= MAX_FIELD_LEN {
        return value;
    }

    let mut end = MAX_FIELD_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn write_field(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len() - 1);
    field[..len].copy_from_slice(&bytes[..len]);
}

fn read_field(field: &[u8]) -> String {
    let usable = &field[..MAX_FIELD_LEN];
    let end = usable.iter().position(|byte| *byte == 0).unwrap_or(usable.len());
    String::from_utf8_lossy(&usable[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn image_places_fields_at_fixed_offsets() {
        let record = ConfigRecord::new("Home", "secret123", OperationMode::HomeKit);
        let image = record.encode();

        assert_eq!(&image[0..5], b"Home\0");
        assert_eq!(&image[30..40], b"secret123\0");
        assert_eq!(image[60], 1);
        assert_eq!(ConfigRecord::decode(&image), record);
    }

    #[test]
    fn long_values_truncate_and_keep_terminator() {
        let long = "n".repeat(45);
        let record = ConfigRecord::new(&long, &long, OperationMode::Http);

        assert_eq!(record.ssid().len(), MAX_FIELD_LEN);
        assert_eq!(record.passphrase().len(), MAX_FIELD_LEN);

        let image = record.encode();
        assert_eq!(image[MAX_FIELD_LEN], 0);
        assert_eq!(image[FIELD_CAPACITY + MAX_FIELD_LEN], 0);
    }

    #[test]
    fn truncation_respects_multibyte_characters() {
        // 28 ASCII bytes followed by a two-byte character straddling the limit.
        let value = format!("{}é", "a".repeat(28));
        let record = ConfigRecord::new(&value, "", OperationMode::Http);

        assert_eq!(record.ssid(), "a".repeat(28));
    }

    #[test]
    fn unknown_mode_byte_decodes_as_http() {
        let mut image = ConfigRecord::new("lab", "pw", OperationMode::HomeKit).encode();
        image[MODE_OFFSET] = 7;

        assert_eq!(ConfigRecord::decode(&image).mode(), OperationMode::Http);
    }

    #[test]
    fn unterminated_field_is_cut_at_capacity() {
        let mut image = [b'x'; RECORD_IMAGE_LEN];
        image[MODE_OFFSET] = 0;

        let record = ConfigRecord::decode(&image);
        assert_eq!(record.ssid().len(), MAX_FIELD_LEN);
        assert_eq!(record.passphrase().len(), MAX_FIELD_LEN);
    }

    #[test]
    fn debug_output_hides_passphrase() {
        let record = ConfigRecord::new("Home", "secret123", OperationMode::Http);
        let rendered = format!("{record:?}");

        assert!(rendered.contains("Home"));
        assert!(!rendered.contains("secret123"));
    }
}
