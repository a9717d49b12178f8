//! Custom code alias extension document.
//!
//! Version 1 is the unversioned flat `{name: code}` map stored at the data
//! root as `customCodes.json`. Version 2 lives under `extensions/` and keeps
//! entries as a list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use levelq_core::codec::{self, CodecConfig};
use levelq_core::custom_codes::{CustomCode, CustomCodes};

use crate::chain::{SchemaVersion, Upgraded, VersionChain};
use crate::context::LoadContext;
use crate::error::PersistenceError;

pub const NEWEST_CUSTOM_CODES_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCodesDocument {
    pub version: u32,
    #[serde(default)]
    pub codes: Vec<CustomCode>,
}

impl From<&CustomCodes> for CustomCodesDocument {
    fn from(codes: &CustomCodes) -> Self {
        Self {
            version: NEWEST_CUSTOM_CODES_VERSION,
            codes: codes.entries().cloned().collect(),
        }
    }
}

fn load_v1(raw: serde_json::Value, _ctx: &LoadContext) -> Result<BTreeMap<String, String>, String> {
    serde_json::from_value(raw).map_err(|e| e.to_string())
}

fn load_v2(raw: serde_json::Value, _ctx: &LoadContext) -> Result<CustomCodes, String> {
    let doc: CustomCodesDocument = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    Ok(CustomCodes::from_entries(doc.codes))
}

/// Canonicalize stored codes where they parse; keep anything else verbatim
/// so no alias is dropped.
fn upgrade_v1(
    map: BTreeMap<String, String>,
    _ctx: &LoadContext,
) -> Result<Upgraded<CustomCodes>, String> {
    let lenient = CodecConfig {
        romhacks_enabled: true,
        ..CodecConfig::default()
    };
    let entries = map.into_iter().map(|(name, code)| {
        let validation = codec::validate(&code, &lenient);
        let code = if validation.syntax_valid {
            validation.code
        } else {
            code
        };
        CustomCode { name, code }
    });
    Ok(Upgraded::plain(CustomCodes::from_entries(entries)))
}

pub fn custom_codes_chain() -> Result<VersionChain<CustomCodes>, PersistenceError> {
    VersionChain::new(
        "customcodes",
        vec![
            SchemaVersion::initial(1, load_v1).unversioned(),
            SchemaVersion::upgraded(2, load_v2, upgrade_v1),
        ],
    )
}
