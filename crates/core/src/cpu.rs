//! CPU capability probe. Run once, cached for the process lifetime.

use bitflags::bitflags;
use std::sync::OnceLock;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpuFeatures: u32 {
        const SSE2 = 1 << 0;
        const SSSE3 = 1 << 1;
        const SSE41 = 1 << 2;
        const AVX = 1 << 3;
        const AVX2 = 1 << 4;
    }
}

static FEATURES: OnceLock<CpuFeatures> = OnceLock::new();

impl CpuFeatures {
    /// The probed feature set of the running CPU.
    pub fn get() -> CpuFeatures {
        *FEATURES.get_or_init(probe)
    }

    pub fn has(self, features: CpuFeatures) -> bool {
        self.contains(features)
    }
}

#[cfg(target_arch = "x86_64")]
fn probe() -> CpuFeatures {
    use std::arch::x86_64::{__cpuid, __cpuid_count, _xgetbv};

    let mut features = CpuFeatures::empty();

    // Leaf 0 reports the highest supported leaf.
    let max_leaf = __cpuid(0).eax;
    if max_leaf < 1 {
        return features;
    }

    let leaf1 = __cpuid(1);
    if leaf1.edx & (1 << 26) != 0 {
        features |= CpuFeatures::SSE2;
    }
    if leaf1.ecx & (1 << 9) != 0 {
        features |= CpuFeatures::SSSE3;
    }
    if leaf1.ecx & (1 << 19) != 0 {
        features |= CpuFeatures::SSE41;
    }

    // AVX needs the OS to have enabled YMM state saving (OSXSAVE + XCR0).
    let osxsave = leaf1.ecx & (1 << 27) != 0;
    let avx_cpu = leaf1.ecx & (1 << 28) != 0;
    if osxsave && avx_cpu {
        // SAFETY: OSXSAVE is set, so xgetbv(0) is legal.
        let xcr0 = unsafe { _xgetbv(0) };
        if xcr0 & 0x6 == 0x6 {
            features |= CpuFeatures::AVX;
            if max_leaf >= 7 {
                let leaf7 = __cpuid_count(7, 0);
                if leaf7.ebx & (1 << 5) != 0 {
                    features |= CpuFeatures::AVX2;
                }
            }
        }
    }

    features
}

#[cfg(not(target_arch = "x86_64"))]
fn probe() -> CpuFeatures {
    CpuFeatures::empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_stable() {
        assert_eq!(CpuFeatures::get(), CpuFeatures::get());
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn baseline_is_present() {
        // x86-64 guarantees SSE2.
        assert!(CpuFeatures::get().has(CpuFeatures::SSE2));
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn avx2_implies_avx() {
        let features = CpuFeatures::get();
        if features.has(CpuFeatures::AVX2) {
            assert!(features.has(CpuFeatures::AVX));
        }
    }
}
