/*!
 * Area identifiers for the two-tier statistical geography
 *
 * Fine areas (LSOAs) are keyed by a fixed-length code such as `E01000001`,
 * usually written with a namespace as `LSOA::E01000001`. Coarse areas (MSOAs)
 * are keyed by their code when one is known and by their name otherwise.
 * Every coarse key goes through [`AreaKeyCodec::resolve_coarse`], so a name
 * with a known code always yields the code key.
 */

use std::collections::HashMap;
use std::fmt;
use regex::Regex;

use crate::config::DesertConfig;
use crate::constants::{FINE_AREA_PATTERN, POSTCODE_PATTERN};

lazy_static::lazy_static! {
    static ref FINE_AREA_RE: Regex = Regex::new(FINE_AREA_PATTERN).expect("valid fine area pattern");
    static ref POSTCODE_RE: Regex = Regex::new(POSTCODE_PATTERN).expect("valid postcode pattern");
    // "Wandsworth 026B" -> "Wandsworth 026"
    static ref FINE_NAME_SUFFIX_RE: Regex = Regex::new(r"^(.*\b\d{3})[A-Z]$").expect("valid suffix pattern");
}

/// Bare fine-area code, without namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FineAreaCode(String);

impl FineAreaCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FineAreaCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse-area identity: authoritative code, else display name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CoarseKey {
    Code(String),
    Name(String),
}

impl CoarseKey {
    /// The code or name, without namespace
    pub fn value(&self) -> &str {
        match self {
            CoarseKey::Code(v) | CoarseKey::Name(v) => v,
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self, CoarseKey::Code(_))
    }
}

/// Any area key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AreaKey {
    Fine(FineAreaCode),
    Coarse(CoarseKey),
}

/// Parses, canonicalises and scopes area identifiers
#[derive(Debug, Clone)]
pub struct AreaKeyCodec {
    in_scope_prefix: char,
    fine_namespace: String,
    coarse_namespace: String,
    /// Uppercased coarse name -> coarse code, from boundary metadata
    coarse_codes_by_name: HashMap<String, String>,
}

impl Default for AreaKeyCodec {
    fn default() -> Self {
        Self::from_config(&DesertConfig::default())
    }
}

impl AreaKeyCodec {
    /// Create a codec from configuration
    pub fn from_config(config: &DesertConfig) -> Self {
        Self {
            in_scope_prefix: config.in_scope_prefix.chars().next().unwrap_or('E'),
            fine_namespace: config.fine_namespace.clone(),
            coarse_namespace: config.coarse_namespace.clone(),
            coarse_codes_by_name: HashMap::new(),
        }
    }

    /// Register authoritative coarse `(name, code)` pairs
    ///
    /// Pairs with a blank name or code are ignored; later pairs win.
    pub fn with_coarse_codes<I, N, C>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, C)>,
        N: AsRef<str>,
        C: AsRef<str>,
    {
        for (name, code) in pairs {
            let (name, code) = (name.as_ref().trim(), code.as_ref().trim());
            if !name.is_empty() && !code.is_empty() {
                self.coarse_codes_by_name.insert(name.to_uppercase(), code.to_string());
            }
        }
        self
    }

    pub fn in_scope_prefix(&self) -> char {
        self.in_scope_prefix
    }

    /// Number of known coarse name -> code pairs
    pub fn known_coarse_codes(&self) -> usize {
        self.coarse_codes_by_name.len()
    }

    fn strip_fine_namespace<'a>(&self, raw: &'a str) -> &'a str {
        let text = raw.trim();
        text.strip_prefix(self.fine_namespace.as_str())
            .map(str::trim)
            .unwrap_or(text)
    }

    /// Strict canonicalisation: strip namespace, trim, and require the code pattern
    pub fn canonicalize_fine_area(&self, raw: &str) -> Option<FineAreaCode> {
        let code = self.strip_fine_namespace(raw);
        FINE_AREA_RE.is_match(code).then(|| FineAreaCode(code.to_string()))
    }

    /// Lenient parse used for table keys: strip namespace and trim, no pattern check
    pub fn fine_code_from_area(&self, raw: &str) -> Option<FineAreaCode> {
        let code = self.strip_fine_namespace(raw);
        (!code.is_empty()).then(|| FineAreaCode(code.to_string()))
    }

    /// Namespaced form of a fine code (`LSOA::E01000001`)
    pub fn fine_key(&self, code: &FineAreaCode) -> String {
        format!("{}{}", self.fine_namespace, code.0)
    }

    /// Namespaced canonical fine key, if the raw value is a well-formed code
    pub fn canonical_fine_key(&self, raw: &str) -> Option<String> {
        self.canonicalize_fine_area(raw).map(|code| self.fine_key(&code))
    }

    fn leads_with_prefix(&self, value: &str) -> bool {
        value.starts_with(self.in_scope_prefix)
    }

    pub fn is_in_scope_fine(&self, code: &FineAreaCode) -> bool {
        self.leads_with_prefix(&code.0)
    }

    /// Code keys must carry the prefix; name keys carry no country and
    /// inherit scope from the fine areas they were derived from
    pub fn is_in_scope_coarse(&self, key: &CoarseKey) -> bool {
        match key {
            CoarseKey::Code(code) => self.leads_with_prefix(code),
            CoarseKey::Name(name) => !name.is_empty(),
        }
    }

    /// In-scope check for any key
    pub fn is_in_scope(&self, key: &AreaKey) -> bool {
        match key {
            AreaKey::Fine(code) => self.is_in_scope_fine(code),
            AreaKey::Coarse(key) => self.is_in_scope_coarse(key),
        }
    }

    pub fn coarse_key_from_code(&self, code: &str) -> CoarseKey {
        CoarseKey::Code(code.trim().to_string())
    }

    pub fn coarse_key_from_name(&self, name: &str) -> CoarseKey {
        CoarseKey::Name(name.trim().to_string())
    }

    /// Authoritative code for a coarse name (case-insensitive)
    pub fn coarse_code_for_name(&self, name: &str) -> Option<&str> {
        self.coarse_codes_by_name
            .get(&name.trim().to_uppercase())
            .map(String::as_str)
    }

    /// Code key when the name has a known code, name key otherwise
    pub fn resolve_coarse(&self, name: &str) -> CoarseKey {
        match self.coarse_code_for_name(name) {
            Some(code) => self.coarse_key_from_code(code),
            None => self.coarse_key_from_name(name),
        }
    }

    /// Key for a raw table value
    ///
    /// Values in the coarse namespace become coarse keys (code first, as
    /// [`resolve_coarse`](Self::resolve_coarse)); anything else is read
    /// leniently as a fine code.
    pub fn classify(&self, raw: &str) -> Option<AreaKey> {
        let text = raw.trim();
        match text.strip_prefix(self.coarse_namespace.as_str()).map(str::trim) {
            Some("") => None,
            Some(rest) if self.coarse_codes_by_name.values().any(|code| code == rest) => {
                Some(AreaKey::Coarse(self.coarse_key_from_code(rest)))
            }
            Some(rest) => Some(AreaKey::Coarse(self.resolve_coarse(rest))),
            None => self.fine_code_from_area(text).map(AreaKey::Fine),
        }
    }

    /// Namespaced form of a coarse key (`MSOA::E02000001`)
    pub fn coarse_key_string(&self, key: &CoarseKey) -> String {
        format!("{}{}", self.coarse_namespace, key.value())
    }

    /// Coarse name implied by a fine-area display name
    ///
    /// Strips the trailing single-letter suffix after a three-digit group:
    /// `"Fooborough 026B"` gives `"Fooborough 026"`.
    pub fn derive_coarse_name(&self, fine_name: &str) -> Option<String> {
        let text = fine_name.trim();
        FINE_NAME_SUFFIX_RE.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty())
    }

    /// Whether a normalised postcode has a valid shape
    pub fn is_valid_postcode(&self, postcode_norm: &str) -> bool {
        POSTCODE_RE.is_match(postcode_norm)
    }
}
