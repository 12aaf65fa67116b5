//! Runtime state types: decoded output states and dialect-specific module views.

use serde::Serialize;

use crate::core::topology::{Module, Output};

/// Observed state of a single output.
///
/// Rebuilt on every poll, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputState {
    /// The output this state belongs to.
    pub output: Output,

    /// Whether the output is on.
    pub powered: bool,

    /// Brightness in the dialect's display units.
    ///
    /// Only present for dimmable outputs; only meaningful when powered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
}

impl OutputState {
    /// State of a non-dimmed output.
    pub fn switched(output: Output, powered: bool) -> Self {
        Self {
            output,
            powered,
            level: None,
        }
    }

    /// State carrying a brightness level.
    pub fn dimmed(output: Output, powered: bool, level: u8) -> Self {
        Self {
            output,
            powered,
            level: Some(level),
        }
    }

    /// The `(powered, level)` tuple used for change detection.
    #[inline]
    pub fn fingerprint(&self) -> (bool, Option<u8>) {
        (self.powered, self.level)
    }
}

/// A module as seen through one dialect.
///
/// `brightness_scale` is a pure function of dialect and module type, never
/// configuration. It converts raw dimmer bytes into display units
/// (`display = raw / brightness_scale`) and display units back into a
/// percentage (`percent = display * brightness_scale`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleView {
    /// The underlying module.
    pub module: Module,

    /// Raw-to-display divisor.
    pub brightness_scale: u8,
}

impl ModuleView {
    /// Wrap a module with its dialect scale.
    pub fn new(module: Module, brightness_scale: u8) -> Self {
        Self {
            module,
            brightness_scale: brightness_scale.max(1),
        }
    }

    /// Bus address of the module.
    #[inline]
    pub fn address(&self) -> u8 {
        self.module.address
    }

    /// Find an output by address.
    pub fn output(&self, address: u8) -> Option<&Output> {
        self.module.output(address)
    }

    /// Convert a raw dimmer byte into display units.
    #[inline]
    pub fn raw_to_display(&self, raw: u8) -> u8 {
        raw / self.brightness_scale
    }

    /// Convert display units into a percentage (0..=100).
    #[inline]
    pub fn display_to_percent(&self, display: u32) -> u8 {
        display
            .saturating_mul(u32::from(self.brightness_scale))
            .min(100) as u8
    }

    /// Highest brightness value in display units (the bus-side scale).
    #[inline]
    pub fn display_max(&self) -> u8 {
        100 / self.brightness_scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::topology::ModuleType;

    #[test]
    fn test_scale_conversions() {
        let module = Module::new(2, ModuleType::Dimmer, ["nachthal"]);
        let view = ModuleView::new(module, 10);

        assert_eq!(view.raw_to_display(0x64), 10);
        assert_eq!(view.raw_to_display(0x10), 1);
        assert_eq!(view.raw_to_display(0x01), 0);
        assert_eq!(view.display_to_percent(5), 50);
        assert_eq!(view.display_to_percent(25), 100);
        assert_eq!(view.display_max(), 10);
    }

    #[test]
    fn test_unit_scale_is_identity() {
        let view = ModuleView::new(Module::new(1, ModuleType::Dimmer, ["a"]), 1);
        assert_eq!(view.raw_to_display(42), 42);
        assert_eq!(view.display_to_percent(42), 42);
        assert_eq!(view.display_max(), 100);
    }

    #[test]
    fn test_zero_scale_is_clamped() {
        let view = ModuleView::new(Module::new(1, ModuleType::Relay, ["a"]), 0);
        assert_eq!(view.brightness_scale, 1);
    }

    #[test]
    fn test_fingerprint() {
        let output = Output {
            address: 0,
            name: "a".into(),
            dimmable: true,
        };
        let a = OutputState::dimmed(output.clone(), true, 50);
        let b = OutputState::dimmed(output, true, 60);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
