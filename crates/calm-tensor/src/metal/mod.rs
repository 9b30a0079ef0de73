// Metal compute device (macOS only).
//
// TODO: implement against objc2/objc2-metal. The planned shape:
// - one MTLDevice + MTLCommandQueue for the main stream
// - a second MTLCommandQueue + MTLEvent pair for the Phi secondary branch,
//   mirroring the CPU reference device's second-thread handoff
// - the cooperative fused path emulated as one command buffer per phase
//   boundary, since Metal has no grid-wide barrier equivalent to a single
//   persistent CUDA kernel; each phase's encoder is closed and committed
//   before the next phase's encoder opens, which gives the same ordering
//   guarantee a grid-wide sync would without the fused launch
//
// `Device` is `dyn`-compatible, so once the pipeline objects exist this
// device slots in next to `CpuDevice` without changes to the driver.

/// Placeholder Metal device.
#[cfg(feature = "metal")]
#[derive(Debug)]
pub struct MetalDevice {
    // TODO: MTLDevice, MTLCommandQueue, compiled pipeline states
}

#[cfg(feature = "metal")]
impl MetalDevice {
    /// Attempt to create a Metal device, returning `None` if no Metal
    /// device is available on this host.
    pub fn new() -> Option<Self> {
        // TODO: query MTLCreateSystemDefaultDevice and compile kernels
        None
    }
}
