use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    /// Simulated memory size, e.g. "64KB".
    pub memory: String,
    /// Address the demo program is assembled at.
    pub load_base: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SessionSpec {
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct LimitsSpec {
    #[serde(default)]
    pub max_steps: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub schema_version: String,
    pub target: TargetSpec,
    #[serde(default)]
    pub session: Option<SessionSpec>,
    #[serde(default)]
    pub limits: LimitsSpec,
}

impl TargetConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open target config at {:?}", path.as_ref()))?;
        let config: Self =
            serde_yaml::from_reader(f).context("Failed to parse target config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        let memory = parse_size(&self.target.memory)?;
        if memory == 0 {
            anyhow::bail!("Target 'memory' must be greater than zero");
        }
        if memory > u32::MAX as u64 {
            anyhow::bail!("Target 'memory' exceeds the 32-bit address space");
        }

        if self.target.load_base % 4 != 0 {
            anyhow::bail!(
                "Target 'load_base' {:#x} is not word aligned",
                self.target.load_base
            );
        }

        let end = self.target.load_base as u64 + memory;
        if end > u32::MAX as u64 {
            anyhow::bail!(
                "Target memory [{:#x}, {:#x}) does not fit the 32-bit address space",
                self.target.load_base,
                end
            );
        }

        if let Some(0) = self.limits.max_steps {
            anyhow::bail!("Limit 'max_steps' must be greater than zero");
        }

        Ok(())
    }

    pub fn memory_bytes(&self) -> Result<usize> {
        Ok(parse_size(&self.target.memory)? as usize)
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
