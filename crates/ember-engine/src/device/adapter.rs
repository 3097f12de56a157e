use crate::hal::{AdapterInfo, Backend, GpuError, GpuResult, PowerPreference};

use super::GpuInit;

/// Picks the adapter the device is created on.
///
/// Adapters are visited in enumeration order (GPU-preference order when
/// `prefer_high_performance` is set). Software adapters are skipped unless
/// `use_warp` is set, in which case only software adapters qualify. The first
/// adapter that can create a device at `min_feature_level` wins.
pub fn select_adapter(backend: &mut dyn Backend, init: &GpuInit) -> GpuResult<AdapterInfo> {
    let preference = if init.prefer_high_performance {
        PowerPreference::HighPerformance
    } else {
        PowerPreference::Unspecified
    };

    let adapters = backend.enumerate_adapters(preference);
    log::debug!("{} backend reports {} adapter(s)", backend.name(), adapters.len());

    for adapter in adapters {
        if adapter.is_software != init.use_warp {
            log::debug!("skipping adapter `{}` (software: {})", adapter.name, adapter.is_software);
            continue;
        }
        if backend.probe_device(&adapter, init.min_feature_level) {
            log::info!(
                "selected adapter `{}` (vendor {:#06x}, {} MiB dedicated)",
                adapter.name,
                adapter.vendor_id,
                adapter.dedicated_memory / (1024 * 1024)
            );
            return Ok(adapter);
        }
        log::debug!(
            "adapter `{}` cannot create a device at feature level {}",
            adapter.name,
            init.min_feature_level
        );
    }

    Err(GpuError::NoSuitableAdapter { level: init.min_feature_level, software: init.use_warp })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::soft::{SoftBackend, SoftConfig};
    use crate::hal::FeatureLevel;

    fn adapter(index: usize, name: &str, software: bool, memory_mib: u64, level: FeatureLevel) -> AdapterInfo {
        AdapterInfo {
            index,
            name: name.into(),
            vendor_id: 0x1002,
            dedicated_memory: memory_mib * 1024 * 1024,
            is_software: software,
            max_feature_level: level,
        }
    }

    fn backend(adapters: Vec<AdapterInfo>) -> SoftBackend {
        SoftBackend::new(SoftConfig { adapters, ..SoftConfig::default() })
    }

    #[test]
    fn skips_software_adapters_by_default() {
        let mut b = SoftBackend::default();
        let picked = select_adapter(&mut b, &GpuInit::default()).unwrap();
        assert!(!picked.is_software);
        assert_eq!(picked.name, "Ember Simulated GPU");
    }

    #[test]
    fn warp_selects_the_software_adapter() {
        let mut b = SoftBackend::default();
        let init = GpuInit { use_warp: true, ..GpuInit::default() };
        assert!(select_adapter(&mut b, &init).unwrap().is_software);
    }

    #[test]
    fn high_performance_prefers_the_bigger_gpu() {
        let mut b = backend(vec![
            adapter(0, "integrated", false, 128, FeatureLevel::Level12_0),
            adapter(1, "discrete", false, 8192, FeatureLevel::Level12_1),
        ]);
        let fast = select_adapter(&mut b, &GpuInit::default()).unwrap();
        assert_eq!(fast.name, "discrete");

        let init = GpuInit { prefer_high_performance: false, ..GpuInit::default() };
        assert_eq!(select_adapter(&mut b, &init).unwrap().name, "integrated");
    }

    #[test]
    fn adapters_below_the_minimum_level_are_passed_over() {
        let mut b = backend(vec![
            adapter(0, "old", false, 4096, FeatureLevel::Level11_0),
            adapter(1, "new", false, 1024, FeatureLevel::Level12_0),
        ]);
        let init = GpuInit { min_feature_level: FeatureLevel::Level11_1, ..GpuInit::default() };
        assert_eq!(select_adapter(&mut b, &init).unwrap().name, "new");
    }

    #[test]
    fn no_hardware_adapter_is_fatal() {
        let mut b = backend(vec![adapter(0, "warp", true, 0, FeatureLevel::Level12_1)]);
        let err = select_adapter(&mut b, &GpuInit::default()).unwrap_err();
        assert!(matches!(err, GpuError::NoSuitableAdapter { software: false, .. }));
    }
}
