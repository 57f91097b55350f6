//! Target descriptors.
//!
//! A [`Target`] names the machine and OS to generate code for plus a set
//! of optional [`Features`]. Targets render to and parse from strings of
//! the form `arch-bits-os[-feature]*`, e.g. `x86-64-linux-sse41-cuda`.
//!
//! Parsing starts from the detected host configuration and overrides the
//! parts a string specifies, so `"cuda-avx2"` means "the host, with CUDA
//! and AVX2". The token `host` is accepted (first position only) for
//! explicitness. A category given twice, or an unknown token, is an
//! error. For any target with all fields specified,
//! `Target::parse(&t.to_string()) == t`.
//!
//! Environment lookup: `WEFT_TARGET` configures ahead-of-time builds,
//! `WEFT_JIT_TARGET` configures JIT compilation and must agree with the
//! host on architecture, bit width, and OS.

use std::fmt;

use bitflags::bitflags;
use thiserror::Error;

/// The instruction-set architecture of a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    Arm,
    /// Portable Native Client: the "instruction set" is llvm bitcode.
    Pnacl,
}

/// The operating system of a target, which determines the system calls
/// the runtime issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Windows,
    Osx,
    Android,
    Ios,
    Nacl,
}

bitflags! {
    /// Optional features a target can have.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Features: u64 {
        /// Generate code that runs immediately inside the calling process.
        const JIT = 1 << 0;
        /// Use SSE 4.1 and earlier instructions. Only relevant on x86.
        const SSE41 = 1 << 1;
        /// Use AVX 1 instructions. Only relevant on x86.
        const AVX = 1 << 2;
        /// Use AVX 2 instructions. Only relevant on x86.
        const AVX2 = 1 << 3;
        /// Enable the CUDA runtime.
        const CUDA = 1 << 4;
        /// Enable the OpenCL runtime.
        const OPENCL = 1 << 5;
        /// Enable the OpenGL runtime. Pipeline calls inside device loops
        /// lower to texture intrinsics on this target.
        const OPENGL = 1 << 6;
        /// Increase checking and verbosity in the GPU runtimes.
        const GPU_DEBUG = 1 << 7;
        /// Disable all runtime checks, for slightly tighter code.
        const NO_ASSERTS = 1 << 8;
        /// Disable the bounds-querying functionality.
        const NO_BOUNDS_QUERY = 1 << 9;
        /// Generate code for ARMv7s. Only relevant for 32-bit ARM.
        const ARMV7S = 1 << 10;
        /// Enable double support on OpenCL targets.
        const CL_DOUBLES = 1 << 11;
        /// Enable the x86 FMA instruction.
        const FMA = 1 << 12;
        /// Enable the x86 (AMD) FMA4 instruction set.
        const FMA4 = 1 << 13;
        /// Enable x86 16-bit float support.
        const F16C = 1 << 14;
        /// CUDA compute capability 3.0 (Kepler).
        const CUDA_CAPABILITY_30 = 1 << 15;
        /// CUDA compute capability 3.2 (Tegra K1).
        const CUDA_CAPABILITY_32 = 1 << 16;
        /// CUDA compute capability 3.5 (Kepler).
        const CUDA_CAPABILITY_35 = 1 << 17;
        /// CUDA compute capability 5.0 (Maxwell).
        const CUDA_CAPABILITY_50 = 1 << 18;
    }
}

/// Feature spellings, in the order `to_string` emits them.
const FEATURE_NAMES: &[(Features, &str)] = &[
    (Features::JIT, "jit"),
    (Features::SSE41, "sse41"),
    (Features::AVX, "avx"),
    (Features::AVX2, "avx2"),
    (Features::CUDA, "cuda"),
    (Features::OPENCL, "opencl"),
    (Features::OPENGL, "opengl"),
    (Features::GPU_DEBUG, "gpu_debug"),
    (Features::NO_ASSERTS, "no_asserts"),
    (Features::NO_BOUNDS_QUERY, "no_bounds_query"),
    (Features::ARMV7S, "armv7s"),
    (Features::CL_DOUBLES, "cl_doubles"),
    (Features::FMA, "fma"),
    (Features::FMA4, "fma4"),
    (Features::F16C, "f16c"),
    (Features::CUDA_CAPABILITY_30, "cuda_capability_30"),
    (Features::CUDA_CAPABILITY_32, "cuda_capability_32"),
    (Features::CUDA_CAPABILITY_35, "cuda_capability_35"),
    (Features::CUDA_CAPABILITY_50, "cuda_capability_50"),
];

/// A parse or environment-configuration failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    #[error("unknown target token `{0}`")]
    UnknownToken(String),
    #[error("target string specifies {0} more than once")]
    DuplicateCategory(&'static str),
    #[error("`host` is only accepted as the first token")]
    MisplacedHost,
    #[error("jit target `{requested}` does not match host `{host}` on arch/bits/os")]
    JitHostMismatch { requested: String, host: String },
}

/// A machine, OS, and feature set to generate code for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub arch: Arch,
    pub bits: u8,
    pub os: Os,
    pub features: Features,
}

impl Target {
    pub fn new(arch: Arch, bits: u8, os: Os, features: Features) -> Target {
        Target {
            arch,
            bits,
            os,
            features,
        }
    }

    /// The target corresponding to the machine this compiler runs on.
    pub fn host() -> Target {
        let arch = if cfg!(target_arch = "x86_64") || cfg!(target_arch = "x86") {
            Arch::X86
        } else {
            Arch::Arm
        };
        let bits = if cfg!(target_pointer_width = "64") {
            64
        } else {
            32
        };
        let os = if cfg!(target_os = "windows") {
            Os::Windows
        } else if cfg!(target_os = "macos") {
            Os::Osx
        } else if cfg!(target_os = "android") {
            Os::Android
        } else if cfg!(target_os = "ios") {
            Os::Ios
        } else {
            Os::Linux
        };
        Target::new(arch, bits, os, Features::empty())
    }

    /// Is a gpgpu runtime (CUDA or OpenCL) enabled? OpenGL does not count:
    /// it cannot run arbitrary kernels and is scheduled via textures.
    pub fn has_gpu_feature(self) -> bool {
        self.features.intersects(Features::CUDA | Features::OPENCL)
    }

    /// Does this target read and write pipeline functions through texture
    /// intrinsics inside device loops?
    pub fn uses_textures(self) -> bool {
        self.features.contains(Features::OPENGL)
    }

    pub fn has_feature(self, feature: Features) -> bool {
        self.features.contains(feature)
    }

    pub fn with_feature(mut self, feature: Features) -> Target {
        self.features |= feature;
        self
    }

    /// Parse a descriptor string, overriding host defaults.
    pub fn parse(s: &str) -> Result<Target, TargetError> {
        let mut target = Target::host();
        let mut seen_arch = false;
        let mut seen_bits = false;
        let mut seen_os = false;

        for (i, token) in s.split('-').filter(|t| !t.is_empty()).enumerate() {
            if token == "host" {
                if i != 0 {
                    return Err(TargetError::MisplacedHost);
                }
                continue;
            }
            if let Some(arch) = parse_arch(token) {
                if seen_arch {
                    return Err(TargetError::DuplicateCategory("an architecture"));
                }
                seen_arch = true;
                target.arch = arch;
            } else if let Some(bits) = parse_bits(token) {
                if seen_bits {
                    return Err(TargetError::DuplicateCategory("a bit width"));
                }
                seen_bits = true;
                target.bits = bits;
            } else if let Some(os) = parse_os(token) {
                if seen_os {
                    return Err(TargetError::DuplicateCategory("an operating system"));
                }
                seen_os = true;
                target.os = os;
            } else if let Some(feature) = parse_feature(token) {
                // Repeated features are harmless.
                target.features |= feature;
            } else {
                return Err(TargetError::UnknownToken(token.to_string()));
            }
        }

        Ok(target)
    }

    /// The AOT compilation target: `WEFT_TARGET`, or the host.
    pub fn from_environment() -> Result<Target, TargetError> {
        match std::env::var("WEFT_TARGET") {
            Ok(s) => Target::parse(&s),
            Err(_) => Ok(Target::host()),
        }
    }

    /// The JIT compilation target: `WEFT_JIT_TARGET`, or the host. The
    /// result must agree with the host on arch, bits, and OS, so the
    /// variable only controls the feature set.
    pub fn jit_from_environment() -> Result<Target, TargetError> {
        let requested = match std::env::var("WEFT_JIT_TARGET") {
            Ok(s) => Target::parse(&s)?,
            Err(_) => return Ok(Target::host()),
        };
        let host = Target::host();
        if (requested.arch, requested.bits, requested.os) != (host.arch, host.bits, host.os) {
            return Err(TargetError::JitHostMismatch {
                requested: requested.to_string(),
                host: host.to_string(),
            });
        }
        Ok(requested)
    }
}

fn parse_arch(token: &str) -> Option<Arch> {
    match token {
        "x86" => Some(Arch::X86),
        "arm" => Some(Arch::Arm),
        "pnacl" => Some(Arch::Pnacl),
        _ => None,
    }
}

fn parse_bits(token: &str) -> Option<u8> {
    match token {
        "32" => Some(32),
        "64" => Some(64),
        _ => None,
    }
}

fn parse_os(token: &str) -> Option<Os> {
    match token {
        "linux" => Some(Os::Linux),
        "windows" => Some(Os::Windows),
        "osx" => Some(Os::Osx),
        "android" => Some(Os::Android),
        "ios" => Some(Os::Ios),
        "nacl" => Some(Os::Nacl),
        _ => None,
    }
}

fn parse_feature(token: &str) -> Option<Features> {
    FEATURE_NAMES
        .iter()
        .find(|(_, name)| *name == token)
        .map(|(f, _)| *f)
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Arch::X86 => "x86",
            Arch::Arm => "arm",
            Arch::Pnacl => "pnacl",
        })
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Os::Linux => "linux",
            Os::Windows => "windows",
            Os::Osx => "osx",
            Os::Android => "android",
            Os::Ios => "ios",
            Os::Nacl => "nacl",
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.arch, self.bits, self.os)?;
        for (feature, name) in FEATURE_NAMES {
            if self.features.contains(*feature) {
                write!(f, "-{name}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn explicit_string_round_trips() {
        let t = Target::parse("x86-64-linux-sse41").unwrap();
        assert_eq!(t.arch, Arch::X86);
        assert_eq!(t.bits, 64);
        assert_eq!(t.os, Os::Linux);
        assert_eq!(t.features, Features::SSE41);
        assert_eq!(t.to_string(), "x86-64-linux-sse41");
    }

    #[test]
    fn host_prefix_merges_features() {
        let t = Target::parse("host-cuda-avx2").unwrap();
        let host = Target::host();
        assert_eq!((t.arch, t.bits, t.os), (host.arch, host.bits, host.os));
        assert_eq!(t.features, Features::CUDA | Features::AVX2);
    }

    #[test]
    fn empty_string_is_the_host() {
        assert_eq!(Target::parse("").unwrap(), Target::host());
    }

    #[test]
    fn unknown_token_is_rejected() {
        assert_eq!(
            Target::parse("x86-64-linux-quantum"),
            Err(TargetError::UnknownToken("quantum".to_string()))
        );
    }

    #[test]
    fn duplicate_arch_is_rejected() {
        assert_eq!(
            Target::parse("x86-arm-64-linux"),
            Err(TargetError::DuplicateCategory("an architecture"))
        );
    }

    #[test]
    fn misplaced_host_is_rejected() {
        assert_eq!(Target::parse("x86-host"), Err(TargetError::MisplacedHost));
    }

    #[test]
    fn repeated_features_are_harmless() {
        let t = Target::parse("x86-64-linux-avx-avx").unwrap();
        assert_eq!(t.features, Features::AVX);
    }

    #[test]
    fn gpu_feature_excludes_opengl() {
        let gl = Target::parse("x86-64-linux-opengl").unwrap();
        assert!(!gl.has_gpu_feature());
        assert!(gl.uses_textures());
        let cuda = Target::parse("x86-64-linux-cuda").unwrap();
        assert!(cuda.has_gpu_feature());
    }

    #[test]
    fn feature_order_in_to_string_is_stable() {
        let t = Target::parse("x86-64-linux-cuda-sse41").unwrap();
        // Declaration order, not parse order.
        assert_eq!(t.to_string(), "x86-64-linux-sse41-cuda");
    }

    fn arb_target() -> impl Strategy<Value = Target> {
        (
            prop_oneof![Just(Arch::X86), Just(Arch::Arm), Just(Arch::Pnacl)],
            prop_oneof![Just(32u8), Just(64u8)],
            prop_oneof![
                Just(Os::Linux),
                Just(Os::Windows),
                Just(Os::Osx),
                Just(Os::Android),
                Just(Os::Ios),
                Just(Os::Nacl)
            ],
            any::<u64>(),
        )
            .prop_map(|(arch, bits, os, raw)| {
                Target::new(arch, bits, os, Features::from_bits_truncate(raw))
            })
    }

    proptest! {
        #[test]
        fn parse_inverts_to_string(t in arb_target()) {
            prop_assert_eq!(Target::parse(&t.to_string()).unwrap(), t);
        }
    }
}
