use anyhow::Result;
use openssl::sha::Sha256;
use serde::Serialize;

/// A SHA-256 digest identifying a cached build result.
pub(crate) type Key = [u8; 32];

/// Feeds length-prefixed fields into a digest so that adjacent fields cannot run together.
pub(crate) struct Hasher(Sha256);

impl Default for Hasher {
    fn default() -> Self {
        Self(Sha256::new())
    }
}

impl Hasher {
    pub(crate) fn bytes(mut self, b: &[u8]) -> Self {
        self.0.update(&(b.len() as u64).to_be_bytes());
        self.0.update(b);
        self
    }

    pub(crate) fn str(self, s: &str) -> Self {
        self.bytes(s.as_bytes())
    }

    pub(crate) fn strs(mut self, ss: &[&str]) -> Self {
        for s in ss {
            self = self.str(s);
        }
        self
    }

    pub(crate) fn u64(mut self, n: u64) -> Self {
        self.0.update(&n.to_be_bytes());
        self
    }

    pub(crate) fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let encoded = serde_json::to_vec(value)?;
        Ok(self.bytes(&encoded))
    }

    pub(crate) fn finish(self) -> Key {
        self.0.finish()
    }
}
