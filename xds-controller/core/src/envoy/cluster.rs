use super::{Extra, Validate};
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// An upstream cluster. Only the name is interpreted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Validate for Cluster {
    fn validate(&self) -> Result<()> {
        ensure!(!self.name.is_empty(), "cluster name is empty");
        Ok(())
    }
}
