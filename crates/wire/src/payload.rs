//! Typed key/value payload with mergeable layering
//!
//! A payload is six independent namespaces, each mapping a unique string
//! key to a value of exactly one kind. The same key string may live in
//! several namespaces at once; within one namespace the last write wins.
//!
//! A payload built locally is writable; one produced by [`Payload::decode`]
//! is used read-only through the getters. A payload may be constructed over
//! an *affiliate* payload whose keys are folded in at compile time under a
//! [`MergeMode`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{CodecError, Result};

/// Value kind selecting one of the six payload namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Object,
    Text,
    Boolean,
    Number,
    Chars,
    Bytes,
}

impl Kind {
    /// All namespaces, in serialization order
    pub const ALL: [Kind; 6] = [
        Kind::Object,
        Kind::Text,
        Kind::Boolean,
        Kind::Number,
        Kind::Chars,
        Kind::Bytes,
    ];
}

/// How affiliate keys are folded into the local payload at compile time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Ignore the affiliate entirely
    #[default]
    None,
    /// Copy affiliate keys absent locally; local values are never overwritten
    Difference,
    /// Affiliate values overwrite local values for keys present in both;
    /// nothing is added
    Replace,
    /// Union of `Replace` and `Difference`
    ReplaceOrAdd,
}

/// The six namespaces; keys sort deterministically so compiling the same
/// payload twice yields byte-identical output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Sections {
    objects: BTreeMap<String, Value>,
    texts: BTreeMap<String, String>,
    booleans: BTreeMap<String, bool>,
    numbers: BTreeMap<String, Number>,
    chars: BTreeMap<String, Vec<char>>,
    bytes: BTreeMap<String, Vec<u8>>,
}

fn merge_section<V: Clone>(
    local: &mut BTreeMap<String, V>,
    affiliate: &BTreeMap<String, V>,
    mode: MergeMode,
) {
    match mode {
        MergeMode::None => {}
        MergeMode::Difference => {
            for (key, value) in affiliate {
                local
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        MergeMode::Replace => {
            for (key, value) in affiliate {
                if local.contains_key(key) {
                    local.insert(key.clone(), value.clone());
                }
            }
        }
        MergeMode::ReplaceOrAdd => {
            for (key, value) in affiliate {
                local.insert(key.clone(), value.clone());
            }
        }
    }
}

impl Sections {
    fn merged_with(&self, affiliate: &Sections, mode: MergeMode) -> Sections {
        let mut out = self.clone();
        merge_section(&mut out.objects, &affiliate.objects, mode);
        merge_section(&mut out.texts, &affiliate.texts, mode);
        merge_section(&mut out.booleans, &affiliate.booleans, mode);
        merge_section(&mut out.numbers, &affiliate.numbers, mode);
        merge_section(&mut out.chars, &affiliate.chars, mode);
        merge_section(&mut out.bytes, &affiliate.bytes, mode);
        out
    }
}

/// A typed key/value payload
///
/// Equality compares the compiled view (local namespaces with the affiliate
/// merge applied), so `decode(compile(p)) == p` holds for affiliated
/// payloads as well.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    sections: Sections,
    affiliate: Option<Box<Sections>>,
    mode: MergeMode,
}

impl Payload {
    /// Create an empty writable payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writable payload layered over an affiliate payload
    ///
    /// The affiliate's keys are folded in when [`compile`](Self::compile)
    /// runs, under the given merge mode.
    pub fn merging(affiliate: &Payload, mode: MergeMode) -> Self {
        Payload {
            sections: Sections::default(),
            affiliate: Some(Box::new(affiliate.merged())),
            mode,
        }
    }

    /// Write a structured object value
    pub fn write_object(&mut self, key: impl Into<String>, value: Value) {
        self.sections.objects.insert(key.into(), value);
    }

    /// Write a text value
    pub fn write_text(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.sections.texts.insert(key.into(), value.into());
    }

    /// Write a boolean value
    pub fn write_boolean(&mut self, key: impl Into<String>, value: bool) {
        self.sections.booleans.insert(key.into(), value);
    }

    /// Write a numeric value
    pub fn write_number(&mut self, key: impl Into<String>, value: impl Into<Number>) {
        self.sections.numbers.insert(key.into(), value.into());
    }

    /// Write a floating point value
    ///
    /// Returns `false` (and stores nothing) if the value is not a finite
    /// number, which the wire encoding cannot carry.
    pub fn write_float(&mut self, key: impl Into<String>, value: f64) -> bool {
        match Number::from_f64(value) {
            Some(number) => {
                self.sections.numbers.insert(key.into(), number);
                true
            }
            None => false,
        }
    }

    /// Write a character array value
    pub fn write_chars(&mut self, key: impl Into<String>, value: impl Into<Vec<char>>) {
        self.sections.chars.insert(key.into(), value.into());
    }

    /// Write a byte array value
    pub fn write_bytes(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.sections.bytes.insert(key.into(), value.into());
    }

    /// Get an object value
    pub fn object(&self, key: &str) -> Option<&Value> {
        self.sections.objects.get(key)
    }

    /// Get a text value
    pub fn text(&self, key: &str) -> Option<&str> {
        self.sections.texts.get(key).map(String::as_str)
    }

    /// Get a boolean value
    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.sections.booleans.get(key).copied()
    }

    /// Get a numeric value
    pub fn number(&self, key: &str) -> Option<&Number> {
        self.sections.numbers.get(key)
    }

    /// Get a character array value
    pub fn chars(&self, key: &str) -> Option<&[char]> {
        self.sections.chars.get(key).map(Vec::as_slice)
    }

    /// Get a byte array value
    pub fn bytes(&self, key: &str) -> Option<&[u8]> {
        self.sections.bytes.get(key).map(Vec::as_slice)
    }

    /// Check whether a key is present in the given namespace
    pub fn contains(&self, key: &str, kind: Kind) -> bool {
        match kind {
            Kind::Object => self.sections.objects.contains_key(key),
            Kind::Text => self.sections.texts.contains_key(key),
            Kind::Boolean => self.sections.booleans.contains_key(key),
            Kind::Number => self.sections.numbers.contains_key(key),
            Kind::Chars => self.sections.chars.contains_key(key),
            Kind::Bytes => self.sections.bytes.contains_key(key),
        }
    }

    /// Current key set of the given namespace
    pub fn keys(&self, kind: Kind) -> Vec<&str> {
        match kind {
            Kind::Object => self.sections.objects.keys().map(String::as_str).collect(),
            Kind::Text => self.sections.texts.keys().map(String::as_str).collect(),
            Kind::Boolean => self.sections.booleans.keys().map(String::as_str).collect(),
            Kind::Number => self.sections.numbers.keys().map(String::as_str).collect(),
            Kind::Chars => self.sections.chars.keys().map(String::as_str).collect(),
            Kind::Bytes => self.sections.bytes.keys().map(String::as_str).collect(),
        }
    }

    /// Remove a key from the given namespace; returns whether it was present
    pub fn remove(&mut self, key: &str, kind: Kind) -> bool {
        match kind {
            Kind::Object => self.sections.objects.remove(key).is_some(),
            Kind::Text => self.sections.texts.remove(key).is_some(),
            Kind::Boolean => self.sections.booleans.remove(key).is_some(),
            Kind::Number => self.sections.numbers.remove(key).is_some(),
            Kind::Chars => self.sections.chars.remove(key).is_some(),
            Kind::Bytes => self.sections.bytes.remove(key).is_some(),
        }
    }

    /// True when no namespace holds any key
    pub fn is_empty(&self) -> bool {
        let s = &self.sections;
        s.objects.is_empty()
            && s.texts.is_empty()
            && s.booleans.is_empty()
            && s.numbers.is_empty()
            && s.chars.is_empty()
            && s.bytes.is_empty()
    }

    /// Local namespaces with the affiliate merge applied
    fn merged(&self) -> Sections {
        match &self.affiliate {
            Some(affiliate) => self.sections.merged_with(affiliate, self.mode),
            None => self.sections.clone(),
        }
    }

    /// Compile the payload to self-describing bytes
    ///
    /// Applies the affiliate merge without mutating the payload, so
    /// compiling twice with the same affiliate and mode yields
    /// byte-identical output.
    pub fn compile(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.merged()).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    /// Decode compiled bytes back into a payload
    ///
    /// Malformed input yields an error, never a partially populated payload.
    pub fn decode(bytes: &[u8]) -> Result<Payload> {
        let sections: Sections =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
        Ok(Payload {
            sections,
            affiliate: None,
            mode: MergeMode::None,
        })
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.merged() == other.merged()
    }
}
