//! Signature-guarded credential store on top of an [`NvRegion`].
//!
//! ```text
//! offset + 0 : signature byte (0x42 = record present)
//! offset + 1 : record image (see `record`)
//! ```

use log::{debug, info, warn};

use crate::{
    error::StoreError,
    hal::NvRegion,
    record::{ConfigRecord, RECORD_IMAGE_LEN},
};

pub const CONFIG_SIGNATURE: u8 = 0x42;
pub const STORED_RECORD_LEN: usize = 1 + RECORD_IMAGE_LEN;

const INVALID_SIGNATURE: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedConfig {
    pub record: ConfigRecord,
    pub found: bool,
}

pub struct ConfigStore<R> {
    region: R,
    offset: usize,
}

impl<R: NvRegion> ConfigStore<R> {
    /// Fails when the reserved window does not fit inside the region.
    pub fn new(region: R, offset: usize) -> Result<Self, StoreError> {
        let capacity = region.len();
        if offset.saturating_add(STORED_RECORD_LEN) > capacity {
            return Err(StoreError::OutOfBounds {
                offset,
                len: STORED_RECORD_LEN,
                capacity,
            });
        }
        Ok(Self { region, offset })
    }

    /// Total bytes the region must provide for a store at `offset`.
    pub fn required_len(offset: usize) -> usize {
        offset.saturating_add(STORED_RECORD_LEN)
    }

    /// Returns the stored record, or an empty HTTP-mode record with
    /// `found = false` when the signature is absent or unreadable.
    pub fn load(&mut self) -> LoadedConfig {
        let mut signature = [0_u8; 1];
        if let Err(err) = self.region.read(self.offset, &mut signature) {
            warn!("config signature unreadable, treating as absent: {err}");
            return LoadedConfig::absent();
        }

        if signature[0] != CONFIG_SIGNATURE {
            info!("no stored config (signature {:#04x})", signature[0]);
            return LoadedConfig::absent();
        }

        let mut image = [0_u8; RECORD_IMAGE_LEN];
        if let Err(err) = self.region.read(self.offset + 1, &mut image) {
            warn!("config image unreadable, treating as absent: {err}");
            return LoadedConfig::absent();
        }

        let record = ConfigRecord::decode(&image);
        info!(
            "found stored config: ssid=`{}`, mode={}",
            record.ssid(),
            record.mode().as_str()
        );
        LoadedConfig {
            record,
            found: true,
        }
    }

    /// Writes the image, then the signature, then commits. One retry on failure.
    pub fn save(&mut self, record: &ConfigRecord) -> Result<(), StoreError> {
        match self.write_record(record) {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!("config save failed ({err}); retrying once");
                self.write_record(record)
            }
        }
    }

    /// Clears the signature byte only; the image stays but is no longer trusted.
    pub fn invalidate(&mut self) -> Result<(), StoreError> {
        self.region.write(self.offset, &[INVALID_SIGNATURE])?;
        self.region.commit()?;
        info!("stored config invalidated");
        Ok(())
    }

    pub fn into_region(self) -> R {
        self.region
    }

    fn write_record(&mut self, record: &ConfigRecord) -> Result<(), StoreError> {
        // A failed image write must never be followed by a valid signature.
        self.region.write(self.offset + 1, &record.encode())?;
        self.region.write(self.offset, &[CONFIG_SIGNATURE])?;
        self.region.commit()?;
        debug!("config committed at offset {}", self.offset);
        Ok(())
    }
}

impl LoadedConfig {
    fn absent() -> Self {
        Self {
            record: ConfigRecord::default(),
            found: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{record::MAX_FIELD_LEN, testing::MemoryRegion, types::OperationMode};

    const OFFSET: usize = 1_408;

    fn store() -> ConfigStore<MemoryRegion> {
        let region = MemoryRegion::new(ConfigStore::<MemoryRegion>::required_len(OFFSET));
        ConfigStore::new(region, OFFSET).unwrap()
    }

    #[test]
    fn round_trips_every_length_and_mode() {
        let mut store = store();
        for len in 0..=MAX_FIELD_LEN {
            for mode in [OperationMode::Http, OperationMode::HomeKit] {
                let ssid = "s".repeat(len);
                let passphrase = "p".repeat(MAX_FIELD_LEN - len);
                let record = ConfigRecord::new(&ssid, &passphrase, mode);

                store.save(&record).unwrap();
                let loaded = store.load();

                assert!(loaded.found);
                assert_eq!(loaded.record, record);
            }
        }
    }

    #[test]
    fn blank_region_loads_default_record() {
        let mut store = store();
        let loaded = store.load();

        assert!(!loaded.found);
        assert_eq!(loaded.record, ConfigRecord::default());
        assert_eq!(loaded.record.mode(), OperationMode::Http);
    }

    #[test]
    fn any_non_sentinel_signature_means_absent() {
        for signature in [0x00, 0x01, 0x41, 0x43, 0xFF] {
            let mut region = MemoryRegion::new(OFFSET + STORED_RECORD_LEN);
            region.bytes_mut()[OFFSET] = signature;
            let mut store = ConfigStore::new(region, OFFSET).unwrap();

            assert!(!store.load().found, "signature {signature:#04x}");
        }
    }

    #[test]
    fn invalidate_keeps_image_but_hides_it() {
        let mut store = store();
        let record = ConfigRecord::new("Home", "secret123", OperationMode::HomeKit);
        store.save(&record).unwrap();

        store.invalidate().unwrap();
        assert!(!store.load().found);

        let region = store.into_region();
        assert_eq!(region.bytes()[OFFSET], 0);
        assert_eq!(&region.bytes()[OFFSET + 1..OFFSET + 5], b"Home");
    }

    #[test]
    fn save_writes_signature_after_image() {
        let mut store = store();
        store
            .save(&ConfigRecord::new("a", "b", OperationMode::Http))
            .unwrap();

        let region = store.into_region();
        let offsets: Vec<usize> = region.writes().iter().map(|w| w.0).collect();
        assert_eq!(offsets, vec![OFFSET + 1, OFFSET]);
        assert_eq!(region.commits(), 1);
    }

    #[test]
    fn failed_image_write_is_retried_and_never_signed_early() {
        let mut region = MemoryRegion::new(OFFSET + STORED_RECORD_LEN);
        region.fail_next_writes(1);
        let mut store = ConfigStore::new(region, OFFSET).unwrap();

        store
            .save(&ConfigRecord::new("Home", "pw", OperationMode::Http))
            .unwrap();
        assert!(store.load().found);
    }

    #[test]
    fn persistent_failure_leaves_region_unsigned() {
        let mut region = MemoryRegion::new(OFFSET + STORED_RECORD_LEN);
        region.fail_next_writes(2);
        let mut store = ConfigStore::new(region, OFFSET).unwrap();

        let result = store.save(&ConfigRecord::new("Home", "pw", OperationMode::Http));
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert!(!store.load().found);
    }

    #[test]
    fn required_len_saturates_for_huge_offsets() {
        assert_eq!(
            ConfigStore::<MemoryRegion>::required_len(usize::MAX - 1),
            usize::MAX
        );
        assert!(ConfigStore::new(MemoryRegion::new(OFFSET), usize::MAX).is_err());
    }

    #[test]
    fn rejects_window_past_region_end() {
        let region = MemoryRegion::new(OFFSET);
        assert!(matches!(
            ConfigStore::new(region, OFFSET),
            Err(StoreError::OutOfBounds { .. })
        ));
    }
}
