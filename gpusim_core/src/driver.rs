//! The driver ABI (C10): the host-visible surface that maps a `cuLaunchKernel`-
//! shaped call onto [`Gpu::launch_ndrange`] and suspends the calling host
//! thread until the grid retires.
//!
//! Grounded directly on the original `cuLaunchKernel` handler: an 11-word
//! argument block (`function_id`, `gridDim[3]`, `blockDim[3]`,
//! `sharedMemBytes`, `hStream`, `kernelParams`, `extra`), and a
//! three-callback suspend/wake contract so the host emulator's context
//! switcher can poll without the driver holding a raw pointer back into it.

use std::cell::Cell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::config::Config;
use crate::error::OccupancyError;
use crate::gpu::Gpu;
use crate::ndrange::NDRange;
use crate::occupancy::OccupancyRequest;
use gpusim_isa::DecodedText;

/// The host's addressable memory, as far as the driver needs to see it: two
/// fixed-width reads. The real host process (or its emulator) implements
/// this; the driver never assumes an address space layout beyond "reads
/// return a 4- or 8-byte little-endian word".
pub trait HostMemory {
    fn read_u32(&self, addr: u64) -> u32;
    fn read_u64(&self, addr: u64) -> u64;
}

/// One registered kernel: its decoded instruction stream plus the resource
/// shape the occupancy calculator needs. `arg_count` is the number of
/// `kernelParams` pointers a launch of this function must dereference.
#[derive(Debug, Clone)]
pub struct KernelFunction {
    pub name: String,
    pub decoded_text: Rc<DecodedText>,
    pub gprs_per_work_item: u32,
    pub local_mem_per_work_group: u32,
    pub arg_count: u32,
}

pub type FunctionId = u32;

/// The 11-word argument block `cuLaunchKernel` hands the driver, already
/// split out by field. `kernel_params` and `extra` are host addresses, not
/// yet dereferenced.
#[derive(Debug, Clone, Copy)]
pub struct LaunchArgs {
    pub function_id: FunctionId,
    pub grid_dim: [u32; 3],
    pub block_dim: [u32; 3],
    pub shared_mem_bytes: u32,
    pub stream: u64,
    pub kernel_params: u64,
    pub extra: u64,
}

/// Number of 4-byte words in the fixed launch argument block.
const LAUNCH_ARG_WORDS: usize = 11;

/// Reads the 11-word launch argument block starting at `args_addr`, in the
/// field order `cuLaunchKernel` defines it.
#[must_use]
pub fn read_launch_args(memory: &dyn HostMemory, args_addr: u64) -> LaunchArgs {
    let mut words = [0u32; LAUNCH_ARG_WORDS];
    for (i, w) in words.iter_mut().enumerate() {
        *w = memory.read_u32(args_addr + (i as u64) * 4);
    }
    LaunchArgs {
        function_id: words[0],
        grid_dim: [words[1], words[2], words[3]],
        block_dim: [words[4], words[5], words[6]],
        shared_mem_bytes: words[7],
        stream: u64::from(words[8]),
        kernel_params: u64::from(words[9]),
        extra: u64::from(words[10]),
    }
}

/// Reads one resolved kernel argument: `kernel_params` is an array of
/// pointers, one per argument, each of which in turn points at the actual
/// 4-byte value (`spec.md` §4.8's two-level indirection).
#[must_use]
pub fn read_kernel_arg(memory: &dyn HostMemory, kernel_params: u64, index: u32) -> u32 {
    let arg_ptr = u64::from(memory.read_u32(kernel_params + u64::from(index) * 4));
    memory.read_u32(arg_ptr)
}

/// Bookkeeping shared between the launch's completion hook and the host
/// context's suspend predicate. Deliberately carries nothing but the flag:
/// once the grid finishes, [`Gpu`] frees it, so nothing downstream may keep
/// a reference into it alive past that point (the original's own
/// `info->grid should not be accessed` comment on this exact struct).
#[derive(Debug, Clone, Default)]
pub struct LaunchInfo {
    finished: Rc<Cell<bool>>,
}

impl LaunchInfo {
    #[must_use]
    pub fn finished(&self) -> bool {
        self.finished.get()
    }
}

/// A host thread parked on a kernel launch, polled by the host emulator's
/// context switcher via [`HostSuspension::can_wake`] and torn down exactly
/// once via [`HostSuspension::wake`].
pub struct HostSuspension {
    info: LaunchInfo,
    woken: bool,
}

impl HostSuspension {
    #[must_use]
    fn new(info: LaunchInfo) -> Self {
        HostSuspension {
            info,
            woken: false,
        }
    }

    /// Whether the suspended context may resume: true once the grid's
    /// completion hook has set the shared flag.
    #[must_use]
    pub fn can_wake(&self) -> bool {
        self.info.finished()
    }

    /// Tears down the suspension. Panics if called more than once for the
    /// same launch, matching the one-shot free in the original wakeup
    /// callback.
    pub fn wake(&mut self) {
        assert!(!self.woken, "host context woken twice for the same launch");
        self.woken = true;
    }
}

/// Registers kernels by id and dispatches launches against a [`Gpu`].
pub struct Driver {
    functions: FxHashMap<FunctionId, KernelFunction>,
    next_function_id: FunctionId,
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver {
    #[must_use]
    pub fn new() -> Self {
        Driver {
            functions: FxHashMap::default(),
            next_function_id: 0,
        }
    }

    /// Registers a kernel, returning the id a later `cuLaunchKernel`-shaped
    /// call will name it by.
    pub fn register_function(&mut self, function: KernelFunction) -> FunctionId {
        let id = self.next_function_id;
        self.next_function_id += 1;
        self.functions.insert(id, function);
        id
    }

    /// Resolves `args.function_id`, dereferences its `kernel_params` array
    /// (recorded only to the extent of its count; the timing model does not
    /// need argument *values*, only that the host-side indirection is
    /// honored), builds the ND-Range, and launches it. Returns a
    /// [`HostSuspension`] the caller should park the host context on until
    /// [`HostSuspension::can_wake`] reports true.
    ///
    /// # Errors
    /// Returns [`OccupancyError`] if the launched kernel's resource shape
    /// does not fit any compute unit, exactly as [`Gpu::launch_ndrange`]
    /// does.
    ///
    /// # Panics
    /// Panics if `args.function_id` was never registered.
    pub fn launch_kernel(
        &mut self,
        gpu: &mut Gpu,
        memory: &dyn HostMemory,
        args: LaunchArgs,
        config: &Config,
    ) -> Result<HostSuspension, OccupancyError> {
        let function = self
            .functions
            .get(&args.function_id)
            .unwrap_or_else(|| panic!("unregistered kernel function id {}", args.function_id));

        // Touch every argument pointer so a host-memory fault surfaces here,
        // at launch time, rather than silently later.
        for i in 0..function.arg_count {
            let _ = read_kernel_arg(memory, args.kernel_params, i);
        }

        let global_size = args.grid_dim[0] * args.block_dim[0];
        let local_size = args.block_dim[0];
        let ndrange = NDRange::new(
            u64::from(args.function_id),
            Rc::clone(&function.decoded_text),
            global_size,
            local_size,
            args.shared_mem_bytes.max(function.local_mem_per_work_group),
            config.wavefront_size,
        );
        let request = OccupancyRequest {
            work_items_per_group: local_size,
            gprs_per_work_item: function.gprs_per_work_item,
            local_mem_per_group: args.shared_mem_bytes.max(function.local_mem_per_work_group),
        };

        let info = LaunchInfo::default();
        let hook_flag = info.finished.clone();
        gpu.launch_ndrange(ndrange, request, config, Box::new(move || hook_flag.set(true)))?;

        Ok(HostSuspension::new(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use gpusim_isa::CfInst;

    /// A flat byte array standing in for host-addressable memory, words
    /// laid out little-endian exactly as `mem_read` would see them.
    struct FakeHostMemory {
        words: Vec<u32>,
    }

    impl HostMemory for FakeHostMemory {
        fn read_u32(&self, addr: u64) -> u32 {
            self.words[(addr / 4) as usize]
        }
        fn read_u64(&self, addr: u64) -> u64 {
            u64::from(self.read_u32(addr)) | (u64::from(self.read_u32(addr + 4)) << 32)
        }
    }

    #[test]
    fn reads_eleven_word_launch_argument_block() {
        let memory = FakeHostMemory {
            words: vec![7, 4, 1, 1, 64, 1, 1, 256, 0, 0x1000, 0],
        };
        let args = read_launch_args(&memory, 0);
        assert_eq!(args.function_id, 7);
        assert_eq!(args.grid_dim, [4, 1, 1]);
        assert_eq!(args.block_dim, [64, 1, 1]);
        assert_eq!(args.shared_mem_bytes, 256);
        assert_eq!(args.kernel_params, 0x1000);
    }

    #[test]
    fn kernel_arg_is_double_dereferenced() {
        // kernel_params[0] holds the byte address of the argument value: 8.
        // The word at byte address 8 (words[2]) is the value itself: 42.
        let memory = FakeHostMemory {
            words: vec![8, 0, 42],
        };
        let value = read_kernel_arg(&memory, 0, 0);
        assert_eq!(value, 42);
    }

    fn trivial_kernel() -> KernelFunction {
        let mut decoded = DecodedText::new();
        decoded.cf_stream.push(CfInst::Terminator);
        KernelFunction {
            name: "trivial".to_string(),
            decoded_text: Rc::new(decoded),
            gprs_per_work_item: 1,
            local_mem_per_work_group: 0,
            arg_count: 0,
        }
    }

    #[test]
    fn launch_kernel_suspends_until_grid_completes() {
        let config = Config::default();
        let mut gpu = Gpu::new(&config);
        let mut driver = Driver::new();
        let function_id = driver.register_function(trivial_kernel());
        let memory = FakeHostMemory { words: vec![0; 16] };

        let args = LaunchArgs {
            function_id,
            grid_dim: [1, 1, 1],
            block_dim: [64, 1, 1],
            shared_mem_bytes: 0,
            stream: 0,
            kernel_params: 0,
            extra: 0,
        };
        let mut suspension = driver.launch_kernel(&mut gpu, &memory, args, &config).unwrap();
        assert!(!suspension.can_wake());

        gpu.run().unwrap();
        assert!(suspension.can_wake());
        suspension.wake();
    }

    #[test]
    #[should_panic(expected = "unregistered kernel function id")]
    fn launch_unregistered_function_panics() {
        let config = Config::default();
        let mut gpu = Gpu::new(&config);
        let mut driver = Driver::new();
        let memory = FakeHostMemory { words: vec![0; 16] };
        let args = LaunchArgs {
            function_id: 99,
            grid_dim: [1, 1, 1],
            block_dim: [64, 1, 1],
            shared_mem_bytes: 0,
            stream: 0,
            kernel_params: 0,
            extra: 0,
        };
        let _ = driver.launch_kernel(&mut gpu, &memory, args, &config);
    }
}
