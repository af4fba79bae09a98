//! The occupancy calculator (C3): a pure, total function from a kernel's
//! resource shape and the machine description to the number of work-groups
//! that may reside on one compute unit simultaneously.

use crate::config::{Config, RegisterAllocGranularity};
use crate::error::OccupancyError;

/// The resource shape of one work-group, as needed to compute occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupancyRequest {
    pub work_items_per_group: u32,
    pub gprs_per_work_item: u32,
    pub local_mem_per_group: u32,
}

fn ceil_div(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

fn round_up(a: u32, multiple: u32) -> u32 {
    ceil_div(a, multiple) * multiple
}

/// The per-work-group register footprint, rounded up per the configured
/// allocation granularity and block size.
#[must_use]
pub fn register_block(request: OccupancyRequest, config: &Config) -> u32 {
    let wavefronts_per_group = ceil_div(request.work_items_per_group, config.wavefront_size);
    match config.register_alloc_granularity {
        RegisterAllocGranularity::Wavefront => {
            let per_wavefront = round_up(
                config.wavefront_size * request.gprs_per_work_item,
                config.register_alloc_size,
            );
            per_wavefront * wavefronts_per_group
        }
        RegisterAllocGranularity::WorkGroup => round_up(
            request.work_items_per_group * request.gprs_per_work_item,
            config.register_alloc_size,
        ),
    }
}

/// The per-work-group local-memory footprint, rounded up to the configured
/// allocation block.
#[must_use]
pub fn local_mem_block(request: OccupancyRequest, config: &Config) -> u32 {
    if request.local_mem_per_group == 0 {
        return 0;
    }
    round_up(request.local_mem_per_group, config.local_mem_alloc_size)
}

/// Returns the largest number of work-groups of this shape that may be
/// admitted to one compute unit simultaneously, or the limiting resource if
/// none fit.
pub fn compute_occupancy(
    request: OccupancyRequest,
    config: &Config,
) -> Result<u32, OccupancyError> {
    let wavefronts_per_group = ceil_div(request.work_items_per_group, config.wavefront_size);
    let reg_block = register_block(request, config);
    let mem_block = local_mem_block(request, config);

    let n_wavefronts = config.max_wavefronts_per_cu / wavefronts_per_group;
    let n_work_groups = config.max_work_groups_per_cu;
    let n_registers = if reg_block == 0 {
        u32::MAX
    } else {
        config.num_registers / reg_block
    };
    let n_local_mem = if mem_block == 0 {
        u32::MAX
    } else {
        config.local_mem_size / mem_block
    };

    let n = n_wavefronts.min(n_work_groups).min(n_registers).min(n_local_mem);

    if n == 0 {
        let limiting_resource = if n_wavefronts == 0 {
            "MaxWavefrontsPerComputeUnit"
        } else if n_work_groups == 0 {
            "MaxWorkGroupsPerComputeUnit"
        } else if n_registers == 0 {
            "NumRegisters"
        } else {
            "LocalMemory.Size"
        };
        return Err(OccupancyError::Infeasible { limiting_resource });
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulingPolicy;

    fn config_with_registers(num_registers: u32, alloc_size: u32) -> Config {
        Config {
            num_registers,
            register_alloc_size: alloc_size,
            register_alloc_granularity: RegisterAllocGranularity::WorkGroup,
            scheduling_policy: SchedulingPolicy::RoundRobin,
            ..Config::default()
        }
    }

    #[test]
    fn s2_occupancy_gate_by_registers() {
        let config = config_with_registers(32, 32);
        let request = OccupancyRequest {
            work_items_per_group: 64,
            gprs_per_work_item: 2,
            local_mem_per_group: 0,
        };
        assert_eq!(compute_occupancy(request, &config).unwrap(), 1);

        let request = OccupancyRequest {
            gprs_per_work_item: 3,
            ..request
        };
        assert!(matches!(
            compute_occupancy(request, &config),
            Err(OccupancyError::Infeasible {
                limiting_resource: "NumRegisters"
            })
        ));
    }

    #[test]
    fn admission_law_bounds_occupancy_by_wavefronts_and_groups() {
        let config = Config::default();
        let request = OccupancyRequest {
            work_items_per_group: config.wavefront_size,
            gprs_per_work_item: 1,
            local_mem_per_group: 0,
        };
        let n = compute_occupancy(request, &config).unwrap();
        assert!(n <= config.max_wavefronts_per_cu);
        assert!(n <= config.max_work_groups_per_cu);
    }

    #[test]
    fn zero_local_memory_request_does_not_consume_any_block() {
        let config = Config::default();
        let request = OccupancyRequest {
            work_items_per_group: config.wavefront_size,
            gprs_per_work_item: 1,
            local_mem_per_group: 0,
        };
        assert_eq!(local_mem_block(request, &config), 0);
    }
}
