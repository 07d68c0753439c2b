//! Content fingerprinting for container snapshots.
//!
//! The fingerprint is a 64-bit FNV-1a hash over every displayed field of every
//! record, in record order. It is order sensitive on purpose: callers are
//! expected to pass snapshots already sorted with
//! [`sort_containers`](crate::container::sort_containers).
use crate::container::ContainerRecord;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Terminates every field so that `("ab", "c")` and `("a", "bc")` differ.
const FIELD_SEPARATOR: u8 = 0x00;
/// Terminates every record.
const RECORD_SEPARATOR: &str = "|";

#[derive(Debug, Clone, Copy)]
struct Fnv64(u64);

impl Fnv64 {
    fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_field(&mut self, value: &str) {
        self.write(value.as_bytes());
        self.write(&[FIELD_SEPARATOR]);
    }

    fn finish(self) -> u64 {
        self.0
    }
}

/// Computes the fingerprint of an ordered snapshot.
pub fn fingerprint(containers: &[ContainerRecord]) -> u64 {
    let mut hasher = Fnv64::new();
    for container in containers {
        hasher.write_field(&container.id);
        hasher.write_field(&container.name);
        hasher.write_field(&container.image);
        hasher.write_field(&container.status);
        hasher.write_field(&container.storage_size);
        hasher.write_field(&container.created_at);
        hasher.write_field(&container.ports);
        hasher.write_field(container.tunnel_status.map_or("", |s| s.as_str()));
        hasher.write_field(container.tunnel_code.as_deref().unwrap_or_default());
        hasher.write_field(container.tunnel_message.as_deref().unwrap_or_default());

        // BTreeMap iterates in key order
        if let Some(labels) = &container.labels {
            for (key, value) in labels {
                hasher.write_field(key);
                hasher.write_field(value);
            }
        }

        hasher.write_field(RECORD_SEPARATOR);
    }

    hasher.finish()
}
