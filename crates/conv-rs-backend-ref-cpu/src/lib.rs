//! Portable reference kernels for the conv-rs planner.

mod conv2d;
pub mod cpu;
pub mod gemm;
mod int8;
mod transpose;

pub use cpu::{CpuConvKernels, CpuKernelInterceptor, CpuOp, GenericCpuKernels, NoopInterceptor};

/// Adds the reference kernels to the global registry as "cpu" and "cpu-portable".
///
/// Runs at load time on ELF targets; call it directly anywhere the initializer is not honoured.
pub fn register_cpu_kernels() {
    conv_rs::registry::register_kernels("cpu", CpuConvKernels::new);
    conv_rs::registry::register_kernels("cpu-portable", CpuConvKernels::new);
}

#[cfg(not(target_family = "wasm"))]
#[used]
#[link_section = ".init_array"]
static REGISTER_CPU_KERNELS: extern "C" fn() = {
    extern "C" fn register() {
        register_cpu_kernels();
    }
    register
};
