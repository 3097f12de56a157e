use crate::hal::FeatureLevel;

/// Initialization parameters for the device context.
///
/// Keep this structure stable and minimal. Add configuration flags only when a
/// concrete platform or backend requirement exists.
#[derive(Debug, Clone)]
pub struct GpuInit {
    /// Enumerate adapters in GPU-preference order (discrete GPUs first).
    pub prefer_high_performance: bool,

    /// Select a software adapter instead of skipping software adapters.
    ///
    /// Intended for machines without a usable GPU and for CI.
    pub use_warp: bool,

    /// Lowest feature level a device must be creatable at.
    pub min_feature_level: FeatureLevel,

    /// Enable backend validation.
    ///
    /// Expensive; on by default in debug builds only.
    pub debug_layer: bool,
}

impl Default for GpuInit {
    fn default() -> Self {
        Self {
            prefer_high_performance: true,
            use_warp: false,
            min_feature_level: FeatureLevel::MINIMUM,
            debug_layer: cfg!(debug_assertions),
        }
    }
}
