//! Bootstrap handoff parameters.
//!
//! A node that is bootstrapped by another finds a `bootstrap.json` in its
//! config directory naming the bootstrapper and the link it was reached
//! over.

use carma_types::Psn;
use serde_json::{Map, Value};

use crate::json::Fields;
use crate::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub bootstrapper: Psn,
    pub channel_id: String,
    pub link_address: String,
}

impl BootstrapConfig {
    pub fn new(bootstrapper: Psn, channel_id: impl Into<String>, link_address: impl Into<String>) -> Self {
        Self {
            bootstrapper,
            channel_id: channel_id.into(),
            link_address: link_address.into(),
        }
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let mut f = Fields::new(value)?;
        let config = Self {
            bootstrapper: f.required("bootstrapper")?,
            channel_id: f.required("channel_id")?,
            link_address: f.required("link_address")?,
        };
        f.finish()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("bootstrapper".into(), Value::String(self.bootstrapper.to_slug()));
        obj.insert("channel_id".into(), Value::String(self.channel_id.clone()));
        obj.insert("link_address".into(), Value::String(self.link_address.clone()));
        Value::Object(obj)
    }
}
