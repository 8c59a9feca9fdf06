//! Device string parsing and target selection.
//!
//! Device strings come from a UI or the command line and may carry a display
//! label before `=>`, for example `"AMD Radeon RX 7900 => vulkan://0"`. The
//! part after the last `=>` names the runtime device; its scheme names the
//! compiler backend and the runtime driver.

use std::fmt;

/// Numeric precision the model is exported and compiled at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    F16,
    F32,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::F16 => "f16",
            Precision::F32 => "f32",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved execution target for a device string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceTarget {
    /// Device handed to the compiler, e.g. `vulkan://0` or `cpu`.
    pub device: String,

    /// Compiler target backend, e.g. `vulkan` or `llvm-cpu`.
    pub backend: String,

    /// Runtime driver used to load the compiled module.
    pub driver: String,

    /// Precision implied by the device.
    pub precision: Precision,
}

impl DeviceTarget {
    /// Parse a device string.
    ///
    /// Any string containing `cpu` is pinned to the local CPU task driver at
    /// `f32`; everything else runs at `f16` on the backend named by its scheme.
    pub fn parse(raw: &str) -> Self {
        if raw.contains("cpu") {
            return Self {
                device: "cpu".to_string(),
                backend: "llvm-cpu".to_string(),
                driver: "local-task".to_string(),
                precision: Precision::F32,
            };
        }

        let device = raw.rsplit("=>").next().unwrap_or(raw).trim().to_string();
        let backend = device.split("://").next().unwrap_or(&device).to_string();
        Self {
            driver: backend.clone(),
            backend,
            device,
            precision: Precision::F16,
        }
    }

    pub fn is_cpu(&self) -> bool {
        self.backend.contains("cpu")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_overrides_backend_driver_and_precision() {
        let target = DeviceTarget::parse("cpu-task");
        assert_eq!(target.device, "cpu");
        assert_eq!(target.backend, "llvm-cpu");
        assert_eq!(target.driver, "local-task");
        assert_eq!(target.precision, Precision::F32);
        assert!(target.is_cpu());
    }

    #[test]
    fn test_labelled_cpu_is_still_cpu() {
        let target = DeviceTarget::parse("AMD Ryzen => cpu://0");
        assert_eq!(target.backend, "llvm-cpu");
        assert_eq!(target.precision, Precision::F32);
    }

    #[test]
    fn test_label_is_stripped() {
        let target = DeviceTarget::parse("AMD Radeon RX 7900 XTX => vulkan://0");
        assert_eq!(target.device, "vulkan://0");
        assert_eq!(target.backend, "vulkan");
        assert_eq!(target.driver, "vulkan");
        assert_eq!(target.precision, Precision::F16);
        assert!(!target.is_cpu());
    }

    #[test]
    fn test_bare_device_without_scheme() {
        let target = DeviceTarget::parse("rocm");
        assert_eq!(target.device, "rocm");
        assert_eq!(target.backend, "rocm");
        assert_eq!(target.driver, "rocm");
    }

    #[test]
    fn test_precision_display() {
        assert_eq!(Precision::F16.to_string(), "f16");
        assert_eq!(Precision::F32.to_string(), "f32");
    }
}
