//! Level code codec.
//!
//! Course and maker codes are nine characters drawn from a 30-symbol
//! alphabet (digits plus consonants), written as three groups of three:
//! `XXX-XXX-XXX`. The codec extracts such a triplet from free chat text,
//! normalizes look-alike glyphs, and then checks the code's internal
//! structure:
//!
//! 1. The nine symbols are read as a base-30 number, least significant
//!    symbol first.
//! 2. The number must fit in 44 bits. From the most significant end the
//!    bits are: a 4-bit tag (`1000`), a 6-bit checksum, a course/maker
//!    bit, a marker bit (always `1`), then the obfuscated data id split
//!    into a 12-bit low block followed by a 20-bit high block.
//! 3. The data id is recovered by joining the blocks and XOR-ing with
//!    [`DATA_ID_XOR_KEY`]; the checksum must equal `(data_id - 31) mod 64`.
//!
//! Pure functions only: no I/O, no global state beyond the compiled regex.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Symbols in digit order. Index = base-30 digit value.
pub const CODE_ALPHABET: &str = "0123456789BCDFGHJKLMNPQRSTVWXY";

/// Sentinel accepted in place of a real code when romhacks are enabled.
pub const ROMHACK_CODE: &str = "R0M-HAC-KLV";

/// Obfuscation constant applied to the stored data id.
pub const DATA_ID_XOR_KEY: u32 = 0b0001_0110_1000_0000_1110_0000_0111_1100;

const CODE_BITS: u32 = 44;
const TAG: u64 = 0b1000;

/// Separator-tolerant alphanumeric triplet anchored at the start of the
/// input. Applied at every word start of a message.
static TRIPLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([0-9a-z]{3})[\s._\-]*([0-9a-z]{3})[\s._\-]*([0-9a-z]{3})\b")
        .expect("valid regex")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What a structurally valid code refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    Course,
    Maker,
}

impl CodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Maker => "maker",
        }
    }
}

impl std::fmt::Display for CodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec knobs taken from settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecConfig {
    pub romhacks_enabled: bool,
    /// Highest accepted course data id; `None` means no limit.
    pub max_course_id: Option<u32>,
    /// Highest accepted maker data id; `None` means no limit.
    pub max_maker_id: Option<u32>,
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeValidation {
    /// `XXX-XXX-XXX` when a triplet was found, else the trimmed input.
    pub code: String,
    pub syntax_valid: bool,
    pub semantically_valid: bool,
    pub kind: Option<CodeKind>,
    pub data_id: Option<u32>,
}

impl CodeValidation {
    pub fn is_valid(&self) -> bool {
        self.syntax_valid && self.semantically_valid
    }

    fn syntax_error(raw: &str) -> Self {
        Self {
            code: raw.trim().to_string(),
            syntax_valid: false,
            semantically_valid: false,
            kind: None,
            data_id: None,
        }
    }
}

/// Decoded bit fields of a 44-bit code value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CodeFields {
    tag: u64,
    checksum: u64,
    is_maker: bool,
    marker: bool,
    data_id: u32,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate and canonicalize a raw code string.
pub fn validate(raw: &str, config: &CodecConfig) -> CodeValidation {
    if config.romhacks_enabled && is_romhack(raw) {
        return CodeValidation {
            code: ROMHACK_CODE.to_string(),
            syntax_valid: true,
            semantically_valid: true,
            kind: None,
            data_id: None,
        };
    }

    // Words before the code can form a triplet of their own; prefer the
    // first candidate that decodes, else report the first one found.
    let mut first_syntactic = None;
    for symbols in candidate_symbols(raw) {
        let validation = check_symbols(&symbols, config);
        if validation.semantically_valid {
            return validation;
        }
        first_syntactic.get_or_insert(validation);
    }
    first_syntactic.unwrap_or_else(|| CodeValidation::syntax_error(raw))
}

/// Field checks for nine alphabet symbols.
fn check_symbols(symbols: &[u8], config: &CodecConfig) -> CodeValidation {
    let code = canonical(symbols);

    let fields = decode_value(symbols).and_then(split_fields);
    let Some(fields) = fields else {
        return CodeValidation {
            code,
            syntax_valid: true,
            semantically_valid: false,
            kind: None,
            data_id: None,
        };
    };

    let kind = if fields.is_maker {
        CodeKind::Maker
    } else {
        CodeKind::Course
    };
    let threshold = match kind {
        CodeKind::Course => config.max_course_id,
        CodeKind::Maker => config.max_maker_id,
    };

    let checksum_ok = fields.checksum == expected_checksum(fields.data_id);
    let within_threshold = threshold.is_none_or(|max| fields.data_id <= max);

    CodeValidation {
        code,
        syntax_valid: true,
        semantically_valid: fields.tag == TAG && fields.marker && checksum_ok && within_threshold,
        kind: Some(kind),
        data_id: Some(fields.data_id),
    }
}

/// Whether the raw text names the romhack sentinel.
pub fn is_romhack(raw: &str) -> bool {
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    compact == "R0MHACKLV" || compact == "ROMHACKLV" || compact == "ROMHACK"
}

/// Encode a data id into its canonical code. Inverse of [`validate`] for
/// well-formed ids.
pub fn encode(data_id: u32, kind: CodeKind) -> String {
    let obfuscated = data_id ^ DATA_ID_XOR_KEY;
    let low = u64::from(obfuscated & 0xFFF);
    let high = u64::from(obfuscated >> 12);
    let is_maker = u64::from(kind == CodeKind::Maker);

    let mut value = (TAG << 40)
        | (expected_checksum(data_id) << 34)
        | (is_maker << 33)
        | (1 << 32)
        | (low << 20)
        | high;

    let alphabet = CODE_ALPHABET.as_bytes();
    let mut symbols = Vec::with_capacity(9);
    for _ in 0..9 {
        symbols.push(alphabet[(value % 30) as usize]);
        value /= 30;
    }
    canonical(&symbols)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn expected_checksum(data_id: u32) -> u64 {
    (i64::from(data_id) - 31).rem_euclid(64) as u64
}

/// Every triplet starting at a word start whose symbols all belong to the
/// alphabet after look-alike normalization, in message order. Candidates
/// may overlap.
fn candidate_symbols(raw: &str) -> impl Iterator<Item = Vec<u8>> + '_ {
    raw.char_indices()
        .filter(move |&(idx, c)| {
            c.is_alphanumeric()
                && raw[..idx]
                    .chars()
                    .next_back()
                    .is_none_or(|prev| !prev.is_alphanumeric())
        })
        .filter_map(move |(idx, _)| {
            let caps = TRIPLET_RE.captures(&raw[idx..])?;
            let joined = format!("{}{}{}", &caps[1], &caps[2], &caps[3]);
            joined
                .chars()
                .map(normalize_glyph)
                .map(|c| CODE_ALPHABET.find(c).map(|_| c as u8))
                .collect::<Option<Vec<u8>>>()
        })
}

/// Map glyphs that chat users confuse onto the code alphabet.
fn normalize_glyph(c: char) -> char {
    match c.to_ascii_uppercase() {
        'O' => '0',
        'I' => '1',
        'Z' => '2',
        other => other,
    }
}

fn canonical(symbols: &[u8]) -> String {
    let s = String::from_utf8_lossy(symbols);
    format!("{}-{}-{}", &s[0..3], &s[3..6], &s[6..9])
}

/// Read symbols as base-30, first symbol least significant. `None` when the
/// value does not fit the 44-bit layout.
fn decode_value(symbols: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    for &symbol in symbols.iter().rev() {
        let digit = CODE_ALPHABET.find(symbol as char)? as u64;
        value = value * 30 + digit;
    }
    (value < (1u64 << CODE_BITS)).then_some(value)
}

fn split_fields(value: u64) -> Option<CodeFields> {
    let low = ((value >> 20) & 0xFFF) as u32;
    let high = (value & 0xF_FFFF) as u32;
    let obfuscated = (high << 12) | low;

    Some(CodeFields {
        tag: (value >> 40) & 0xF,
        checksum: (value >> 34) & 0x3F,
        is_maker: (value >> 33) & 1 == 1,
        marker: (value >> 32) & 1 == 1,
        data_id: obfuscated ^ DATA_ID_XOR_KEY,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
