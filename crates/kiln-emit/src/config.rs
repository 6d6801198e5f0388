//! Emit configuration.

use std::fmt;
use std::str::FromStr;

/// Code generation target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Target {
    /// 8-bit AVR assembly.
    #[default]
    Avr,
    /// Dynamic-scripting lowering (simulator).
    Script,
    /// Managed object-oriented lowering.
    Clr,
}

impl Target {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Avr => "avr",
            Self::Script => "script",
            Self::Clr => "clr",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avr" => Ok(Self::Avr),
            "script" | "js" => Ok(Self::Script),
            "clr" | "cs" => Ok(Self::Clr),
            _ => Err(format!("unknown target: {s}")),
        }
    }
}

/// Code generation configuration.
#[derive(Clone, Debug)]
pub struct EmitConfig {
    pub target: Target,
    /// Emit comments in generated code.
    pub emit_comments: bool,
    /// Emit procedures on the rayon pool.
    pub parallel: bool,
    /// Maximum register-passed runtime call arguments on AVR.
    pub max_reg_args: usize,
    /// Name of the runtime handle in managed output.
    pub runtime_name: String,
    /// Bytes `call` pushes on AVR: 2 up to 128 KiB of flash, 3 above.
    pub pc_bytes: u32,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            target: Target::Avr,
            emit_comments: true,
            parallel: false,
            max_reg_args: 4,
            runtime_name: "rt".to_string(),
            pc_bytes: 2,
        }
    }
}

impl EmitConfig {
    /// Create config with default settings.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    /// Set comment emission.
    #[must_use]
    pub const fn with_comments(mut self, enabled: bool) -> Self {
        self.emit_comments = enabled;
        self
    }

    /// Set parallel emission.
    #[must_use]
    pub const fn with_parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// Set the return address width for parts with more than 128 KiB of
    /// flash (3 bytes).
    #[must_use]
    pub const fn with_pc_bytes(mut self, bytes: u32) -> Self {
        self.pc_bytes = bytes;
        self
    }

    /// Set the runtime handle name used by managed targets.
    #[must_use]
    pub fn with_runtime_name(mut self, name: &str) -> Self {
        self.runtime_name = name.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse() {
        assert_eq!("avr".parse::<Target>(), Ok(Target::Avr));
        assert_eq!("js".parse::<Target>(), Ok(Target::Script));
        assert_eq!("cs".parse::<Target>(), Ok(Target::Clr));
        assert!("arm".parse::<Target>().is_err());
        assert_eq!(Target::Clr.to_string(), "clr");
    }
}
