//! Machine configuration: a sectioned key/value text format, parsed once at
//! startup into an immutable [`Config`] and passed by reference everywhere
//! else. No process-wide mutable state, per `spec.md` §9's "re-architect as
//! a single `Config` record" direction.

use rustc_hash::FxHashMap;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAllocGranularity {
    Wavefront,
    WorkGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingPolicy {
    RoundRobin,
    Greedy,
}

/// Fully validated machine description. Every field here has a table entry
/// in `spec.md` §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub num_compute_units: u32,
    pub num_stream_cores: u32,
    pub num_registers: u32,
    pub register_alloc_size: u32,
    pub register_alloc_granularity: RegisterAllocGranularity,
    pub wavefront_size: u32,
    pub max_work_groups_per_cu: u32,
    pub max_wavefronts_per_cu: u32,
    pub scheduling_policy: SchedulingPolicy,

    pub local_mem_size: u32,
    pub local_mem_alloc_size: u32,
    pub local_mem_block_size: u32,
    pub local_mem_latency: u32,
    pub local_mem_ports: u32,

    pub cf_inst_mem_latency: u32,

    pub alu_inst_mem_latency: u32,
    pub alu_fetch_queue_size: u32,
    pub alu_pe_latency: u32,

    pub tex_inst_mem_latency: u32,
    pub tex_fetch_queue_size: u32,
    pub tex_load_queue_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_compute_units: 20,
            num_stream_cores: 16,
            num_registers: 16384,
            register_alloc_size: 32,
            register_alloc_granularity: RegisterAllocGranularity::WorkGroup,
            wavefront_size: 64,
            max_work_groups_per_cu: 8,
            max_wavefronts_per_cu: 32,
            scheduling_policy: SchedulingPolicy::RoundRobin,

            local_mem_size: 32768,
            local_mem_alloc_size: 1024,
            local_mem_block_size: 256,
            local_mem_latency: 2,
            local_mem_ports: 2,

            cf_inst_mem_latency: 2,

            alu_inst_mem_latency: 2,
            alu_fetch_queue_size: 64,
            alu_pe_latency: 4,

            tex_inst_mem_latency: 2,
            tex_fetch_queue_size: 32,
            tex_load_queue_size: 8,
        }
    }
}

type RawSections = FxHashMap<String, FxHashMap<String, String>>;

impl Config {
    /// Parses a sectioned `[ Section ]` / `Key = Value` text file, falling
    /// back to defaults for any key the file omits, then validates every
    /// constraint in `spec.md` §6. A `;`-prefixed line is a comment.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let raw = Self::parse_raw(text)?;
        let mut config = Config::default();

        if let Some(section) = raw.get("Device") {
            Self::apply_device(&mut config, section)?;
        }
        if let Some(section) = raw.get("LocalMemory") {
            Self::apply_local_memory(&mut config, section)?;
        }
        if let Some(section) = raw.get("CFEngine") {
            Self::apply_cf_engine(&mut config, section)?;
        }
        if let Some(section) = raw.get("ALUEngine") {
            Self::apply_alu_engine(&mut config, section)?;
        }
        if let Some(section) = raw.get("TEXEngine") {
            Self::apply_tex_engine(&mut config, section)?;
        }

        for section in raw.keys() {
            if !matches!(
                section.as_str(),
                "Device" | "LocalMemory" | "CFEngine" | "ALUEngine" | "TEXEngine"
            ) {
                return Err(ConfigError::UnknownSection {
                    section: section.clone(),
                });
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn parse_raw(text: &str) -> Result<RawSections, ConfigError> {
        let mut sections: RawSections = FxHashMap::default();
        let mut current = String::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.split(';').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with('[') {
                let name = line
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .trim()
                    .to_string();
                sections.entry(name.clone()).or_default();
                current = name;
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Parse {
                    line: idx + 1,
                    text: raw_line.to_string(),
                });
            };
            if current.is_empty() {
                return Err(ConfigError::Parse {
                    line: idx + 1,
                    text: raw_line.to_string(),
                });
            }
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(sections)
    }

    fn apply_device(
        config: &mut Config,
        section: &FxHashMap<String, String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = section.get("NumComputeUnits") {
            config.num_compute_units = parse_u32("Device.NumComputeUnits", v)?;
        }
        if let Some(v) = section.get("NumStreamCores") {
            config.num_stream_cores = parse_u32("Device.NumStreamCores", v)?;
        }
        if let Some(v) = section.get("NumRegisters") {
            config.num_registers = parse_u32("Device.NumRegisters", v)?;
        }
        if let Some(v) = section.get("RegisterAllocSize") {
            config.register_alloc_size = parse_u32("Device.RegisterAllocSize", v)?;
        }
        if let Some(v) = section.get("RegisterAllocGranularity") {
            config.register_alloc_granularity = match v.as_str() {
                "Wavefront" => RegisterAllocGranularity::Wavefront,
                "WorkGroup" => RegisterAllocGranularity::WorkGroup,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "Device.RegisterAllocGranularity".into(),
                        reason: format!("expected Wavefront or WorkGroup, got `{other}`"),
                    })
                }
            };
        }
        if let Some(v) = section.get("WavefrontSize") {
            config.wavefront_size = parse_u32("Device.WavefrontSize", v)?;
        }
        if let Some(v) = section.get("MaxWorkGroupsPerComputeUnit") {
            config.max_work_groups_per_cu = parse_u32("Device.MaxWorkGroupsPerComputeUnit", v)?;
        }
        if let Some(v) = section.get("MaxWavefrontsPerComputeUnit") {
            config.max_wavefronts_per_cu = parse_u32("Device.MaxWavefrontsPerComputeUnit", v)?;
        }
        if let Some(v) = section.get("SchedulingPolicy") {
            config.scheduling_policy = match v.as_str() {
                "RoundRobin" => SchedulingPolicy::RoundRobin,
                "Greedy" => SchedulingPolicy::Greedy,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "Device.SchedulingPolicy".into(),
                        reason: format!("expected RoundRobin or Greedy, got `{other}`"),
                    })
                }
            };
        }
        Ok(())
    }

    fn apply_local_memory(
        config: &mut Config,
        section: &FxHashMap<String, String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = section.get("Size") {
            config.local_mem_size = parse_u32("LocalMemory.Size", v)?;
        }
        if let Some(v) = section.get("AllocSize") {
            config.local_mem_alloc_size = parse_u32("LocalMemory.AllocSize", v)?;
        }
        if let Some(v) = section.get("BlockSize") {
            config.local_mem_block_size = parse_u32("LocalMemory.BlockSize", v)?;
        }
        if let Some(v) = section.get("Latency") {
            config.local_mem_latency = parse_u32("LocalMemory.Latency", v)?;
        }
        if let Some(v) = section.get("Ports") {
            config.local_mem_ports = parse_u32("LocalMemory.Ports", v)?;
        }
        Ok(())
    }

    fn apply_cf_engine(
        config: &mut Config,
        section: &FxHashMap<String, String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = section.get("InstructionMemoryLatency") {
            config.cf_inst_mem_latency = parse_u32("CFEngine.InstructionMemoryLatency", v)?;
        }
        Ok(())
    }

    fn apply_alu_engine(
        config: &mut Config,
        section: &FxHashMap<String, String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = section.get("InstructionMemoryLatency") {
            config.alu_inst_mem_latency = parse_u32("ALUEngine.InstructionMemoryLatency", v)?;
        }
        if let Some(v) = section.get("FetchQueueSize") {
            config.alu_fetch_queue_size = parse_u32("ALUEngine.FetchQueueSize", v)?;
        }
        if let Some(v) = section.get("ProcessingElementLatency") {
            config.alu_pe_latency = parse_u32("ALUEngine.ProcessingElementLatency", v)?;
        }
        Ok(())
    }

    fn apply_tex_engine(
        config: &mut Config,
        section: &FxHashMap<String, String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = section.get("InstructionMemoryLatency") {
            config.tex_inst_mem_latency = parse_u32("TEXEngine.InstructionMemoryLatency", v)?;
        }
        if let Some(v) = section.get("FetchQueueSize") {
            config.tex_fetch_queue_size = parse_u32("TEXEngine.FetchQueueSize", v)?;
        }
        if let Some(v) = section.get("LoadQueueSize") {
            config.tex_load_queue_size = parse_u32("TEXEngine.LoadQueueSize", v)?;
        }
        Ok(())
    }

    /// Checks every constraint in `spec.md` §6's table, in the table's row
    /// order except where a modulo/division depends on another field's
    /// lower-bound check — those lower bounds run first so a zero divisor
    /// (e.g. `RegisterAllocSize = 0`) fails with `ConfigInvalid` instead of
    /// panicking.
    fn validate(&self) -> Result<(), ConfigError> {
        require(self.num_compute_units >= 1, "Device.NumComputeUnits", "must be >= 1")?;
        require(self.num_stream_cores >= 1, "Device.NumStreamCores", "must be >= 1")?;
        require(self.num_registers >= 1, "Device.NumRegisters", "must be >= 1")?;
        require(
            self.register_alloc_size >= 1,
            "Device.RegisterAllocSize",
            "must be >= 1",
        )?;
        require(
            self.num_registers % self.register_alloc_size == 0,
            "Device.NumRegisters",
            "must be a multiple of RegisterAllocSize",
        )?;
        require(self.wavefront_size >= 1, "Device.WavefrontSize", "must be >= 1")?;
        require(
            self.max_work_groups_per_cu >= 1,
            "Device.MaxWorkGroupsPerComputeUnit",
            "must be >= 1",
        )?;
        require(
            self.max_wavefronts_per_cu >= 1,
            "Device.MaxWavefrontsPerComputeUnit",
            "must be >= 1",
        )?;

        require(
            self.local_mem_block_size.is_power_of_two(),
            "LocalMemory.BlockSize",
            "must be a power of two",
        )?;
        require(
            self.local_mem_block_size >= 4,
            "LocalMemory.BlockSize",
            "must be >= 4",
        )?;
        require(
            self.local_mem_alloc_size >= 1,
            "LocalMemory.AllocSize",
            "must be >= 1",
        )?;
        require(
            self.local_mem_alloc_size % self.local_mem_block_size == 0,
            "LocalMemory.AllocSize",
            "must be a multiple of BlockSize",
        )?;
        require(
            self.local_mem_size.is_power_of_two(),
            "LocalMemory.Size",
            "must be a power of two",
        )?;
        require(self.local_mem_size >= 4, "LocalMemory.Size", "must be >= 4")?;
        require(
            self.local_mem_size >= self.local_mem_block_size,
            "LocalMemory.Size",
            "must be >= BlockSize",
        )?;
        require(
            self.local_mem_size % self.local_mem_alloc_size == 0,
            "LocalMemory.Size",
            "must be a multiple of AllocSize",
        )?;
        require(self.local_mem_latency >= 1, "LocalMemory.Latency", "must be >= 1")?;
        require(self.local_mem_ports >= 1, "LocalMemory.Ports", "must be >= 1")?;

        require(
            self.cf_inst_mem_latency >= 1,
            "CFEngine.InstructionMemoryLatency",
            "must be >= 1",
        )?;

        require(
            self.alu_inst_mem_latency >= 1,
            "ALUEngine.InstructionMemoryLatency",
            "must be >= 1",
        )?;
        require(
            self.alu_fetch_queue_size >= 56,
            "ALUEngine.FetchQueueSize",
            "must be >= 56",
        )?;
        require(
            self.alu_pe_latency >= 1,
            "ALUEngine.ProcessingElementLatency",
            "must be >= 1",
        )?;

        require(
            self.tex_inst_mem_latency >= 1,
            "TEXEngine.InstructionMemoryLatency",
            "must be >= 1",
        )?;
        require(
            self.tex_fetch_queue_size >= 16,
            "TEXEngine.FetchQueueSize",
            "must be >= 16",
        )?;
        require(
            self.tex_load_queue_size >= 1,
            "TEXEngine.LoadQueueSize",
            "must be >= 1",
        )?;

        Ok(())
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("`{value}` is not a non-negative integer"),
    })
}

fn require(cond: bool, key: &str, reason: &str) -> Result<(), ConfigError> {
    if cond {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn overrides_apply() {
        let text = "[ Device ]\nNumComputeUnits = 4\nSchedulingPolicy = Greedy\n";
        let config = Config::parse(text).unwrap();
        assert_eq!(config.num_compute_units, 4);
        assert_eq!(config.scheduling_policy, SchedulingPolicy::Greedy);
    }

    #[test]
    fn register_count_must_be_multiple_of_alloc_size() {
        let text = "[ Device ]\nNumRegisters = 100\nRegisterAllocSize = 32\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn local_memory_size_must_be_power_of_two() {
        let text = "[ LocalMemory ]\nSize = 30000\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn fetch_queue_size_floor_is_enforced() {
        let text = "[ ALUEngine ]\nFetchQueueSize = 40\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn unknown_section_rejected() {
        assert!(Config::parse("[ Bogus ]\nX = 1\n").is_err());
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "; a comment\n\n[ Device ]\n; another\nNumComputeUnits = 2\n";
        assert_eq!(Config::parse(text).unwrap().num_compute_units, 2);
    }

    #[test]
    fn zero_register_alloc_size_is_a_config_error_not_a_panic() {
        let text = "[ Device ]\nRegisterAllocSize = 0\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn zero_local_mem_block_size_is_a_config_error_not_a_panic() {
        let text = "[ LocalMemory ]\nBlockSize = 0\n";
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn zero_local_mem_alloc_size_is_a_config_error_not_a_panic() {
        let text = "[ LocalMemory ]\nAllocSize = 0\n";
        assert!(Config::parse(text).is_err());
    }
}
