//! Modem configuration (MCFG) file naming.
//!
//! Carrier configurations are shipped as `mcfg.<carrier>.<version>.mbn`,
//! where the carrier id is two alphanumerics and the version three digits.

use {
    crate::error::{Error, Result},
    regex::Regex,
    std::{fmt, sync::LazyLock},
};

/// Prefix shared by every configuration blob.
pub const MCFG_PREFIX: &str = "mcfg.";
/// Suffix shared by every configuration blob.
pub const MCFG_SUFFIX: &str = ".mbn";

static MCFG_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^mcfg\.([0-9a-zA-Z]{2})\.([0-9]{3})\.mbn$").ok());

/// Carrier id and version decoded from a configuration filename.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct McfgName {
    /// Two-character carrier id.
    pub carrier_id: String,
    /// Configuration version.
    pub version: u32,
}

impl McfgName {
    /// Parse a configuration filename.
    pub fn parse(filename: &str) -> Result<Self> {
        let re = MCFG_RE
            .as_ref()
            .ok_or_else(|| Error::Protocol("MCFG pattern failed to compile".into()))?;
        let caps = re
            .captures(filename)
            .ok_or_else(|| {
                Error::InvalidInput(format!("couldn't parse filename '{filename}'"))
            })?;

        let carrier_id = caps[1].to_string();
        let version = caps[2]
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad version in '{filename}'")))?;
        Ok(Self {
            carrier_id,
            version,
        })
    }

    /// Whether `name` looks like a configuration blob at all.
    pub fn is_candidate(name: &str) -> bool {
        name.starts_with(MCFG_PREFIX) && name.ends_with(MCFG_SUFFIX)
    }
}

impl fmt::Display for McfgName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.carrier_id, self.version)
    }
}
