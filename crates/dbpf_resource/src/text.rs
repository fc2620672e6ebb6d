//! Plain UTF-8 text resources such as XML tuning.

use std::any::Any;

use derive_more::derive::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::{ChangeTracker, Resource, TypedResource};

const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// UTF-8 text, keeping a leading byte order mark when one was present
#[derive(Debug, Clone, Default, Display)]
#[display("{text}")]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TextResource {
    bom: bool,
    text: String,
    #[cfg_attr(feature = "serde", serde(skip))]
    tracker: ChangeTracker,
}

impl TextResource {
    /// Create a resource holding `text`, written without a byte order mark
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            bom: false,
            text: text.into(),
            tracker: ChangeTracker::default(),
        }
    }

    /// The text, without any byte order mark
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace the text
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.tracker.touch();
    }

    /// Whether a byte order mark is written before the text
    pub fn has_bom(&self) -> bool {
        self.bom
    }
}

impl PartialEq for TextResource {
    fn eq(&self, other: &Self) -> bool {
        self.bom == other.bom && self.text == other.text
    }
}

impl Eq for TextResource {}

impl TypedResource for TextResource {
    const TYPE_IDS: &'static [u32] = &[0x03B33DDF, 0x0333406C, 0x62E94D38, 0x6017E896];

    fn parse(data: &[u8]) -> Result<Self> {
        let (bom, body) = match data.strip_prefix(BOM) {
            Some(body) => (true, body),
            None => (false, data),
        };

        Ok(TextResource {
            bom,
            text: String::from_utf8(body.to_vec())?,
            tracker: ChangeTracker::default(),
        })
    }
}

impl Resource for TextResource {
    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(BOM.len() + self.text.len());
        if self.bom {
            out.extend_from_slice(BOM);
        }
        out.extend_from_slice(self.text.as_bytes());
        Ok(out)
    }

    fn type_name(&self) -> &'static str {
        "TextResource"
    }

    fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
