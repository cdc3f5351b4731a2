use super::Extra;
use anyhow::{bail, ensure, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// A `google.protobuf.Any` in its JSON form: the type URL under `@type` next to the message's own
/// fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Any {
    #[serde(rename = "@type", default)]
    pub type_url: String,
    #[serde(flatten)]
    pub value: Extra,
}

impl Any {
    pub fn pack<T: Serialize>(type_url: &str, msg: &T) -> Result<Self> {
        match serde_json::to_value(msg)? {
            Value::Object(value) => Ok(Self {
                type_url: type_url.to_string(),
                value,
            }),
            v => bail!("{type_url} must encode as an object, not {v}"),
        }
    }

    pub fn unpack<T: DeserializeOwned>(&self, type_url: &str) -> Result<T> {
        ensure!(
            self.is(type_url),
            "expected {type_url}, found {}",
            self.type_url
        );
        Ok(serde_json::from_value(self.to_value())?)
    }

    pub fn is(&self, type_url: &str) -> bool {
        self.type_url == type_url
    }

    /// The message fields as a JSON document, without the type URL.
    pub fn to_value(&self) -> Value {
        Value::Object(self.value.clone())
    }
}
