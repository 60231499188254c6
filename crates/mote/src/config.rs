use serde::{Deserialize, Serialize};

/// Runtime sizing and scheduling parameters.
///
/// Deserializable so hosts can keep per-board settings in a config file;
/// missing fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Heap size in bytes.
    pub heap_size: usize,
    /// Bytes per heap chunk.
    pub chunk_size: usize,
    /// Depth of the temporary-root stack.
    pub temp_root_capacity: usize,
    /// Allocations between collections run at instruction boundaries; 0 collects only on demand.
    pub gc_interval: usize,
    /// Milliseconds a thread runs before the tick requests a switch.
    pub timeslice_ms: u32,
    /// Maximum frame chain length per thread before a call fails with MemoryError.
    pub max_frame_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            heap_size: 10_000,
            chunk_size: 8,
            temp_root_capacity: 24,
            gc_interval: 0,
            timeslice_ms: 10,
            max_frame_depth: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: VmConfig = serde_json::from_str(r#"{ "heap_size": 4096, "timeslice_ms": 5 }"#).unwrap();
        assert_eq!(
            config,
            VmConfig {
                heap_size: 4096,
                timeslice_ms: 5,
                ..VmConfig::default()
            }
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let config: VmConfig = serde_json::from_str(r#"{ "board": "avr" }"#).unwrap();
        assert_eq!(config, VmConfig::default());
    }
}
