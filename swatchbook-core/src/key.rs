//! Composite cache keys for the theme tier.
//!
//! A `CompositeKey` is a pure function of a base key and a full set of
//! generation parameters. Two keys are equal iff all five inputs are equal.
//!
//! # Encoded Format
//!
//! `{base_key}|{selector}|{schema}|{contrast}|{spec_version}`
//!
//! `\` and `|` inside the base key are backslash-escaped so that distinct
//! inputs can never encode to the same string.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::params::{ColorSelector, ContrastLevel, GenerationParameters, Schema, SpecVersion};

const SEPARATOR: char = '|';
const ESCAPE: char = '\\';

/// Theme-tier cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    base_key: String,
    params: GenerationParameters,
}

impl CompositeKey {
    /// The swatch-tier key this composite key was derived from.
    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    pub fn params(&self) -> GenerationParameters {
        self.params
    }

    /// Encode to the stable string form used by the disk tier.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.base_key.len() + 40);
        for c in self.base_key.chars() {
            if c == SEPARATOR || c == ESCAPE {
                out.push(ESCAPE);
            }
            out.push(c);
        }
        let p = &self.params;
        out.push(SEPARATOR);
        out.push_str(&p.color_selector.to_string());
        out.push(SEPARATOR);
        out.push_str(&p.schema.to_string());
        out.push(SEPARATOR);
        out.push_str(&p.contrast.to_string());
        out.push(SEPARATOR);
        out.push_str(&p.spec_version.to_string());
        out
    }

    /// Decode a key produced by [`CompositeKey::encode`].
    ///
    /// Returns `None` for anything that is not exactly five segments with
    /// valid parameter tokens.
    pub fn decode(encoded: &str) -> Option<Self> {
        let mut segments = Vec::with_capacity(5);
        let mut current = String::new();
        let mut chars = encoded.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => current.push(chars.next()?),
                SEPARATOR => segments.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
        segments.push(current);

        let [base_key, selector, schema, contrast, spec] = <[String; 5]>::try_from(segments).ok()?;
        Some(Self {
            base_key,
            params: GenerationParameters {
                color_selector: selector.parse().ok()?,
                schema: schema.parse().ok()?,
                contrast: contrast.parse().ok()?,
                spec_version: spec.parse().ok()?,
            },
        })
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Builds [`CompositeKey`]s.
pub struct CacheKeyBuilder;

impl CacheKeyBuilder {
    pub fn build(
        base_key: &str,
        color_selector: ColorSelector,
        schema: Schema,
        contrast: ContrastLevel,
        spec_version: SpecVersion,
    ) -> CompositeKey {
        CompositeKey {
            base_key: base_key.to_string(),
            params: GenerationParameters {
                color_selector,
                schema,
                contrast,
                spec_version,
            },
        }
    }

    pub fn build_with(base_key: &str, params: &GenerationParameters) -> CompositeKey {
        Self::build(
            base_key,
            params.color_selector,
            params.schema,
            params.contrast,
            params.spec_version,
        )
    }

    /// Key under which the default-parameter theme for `base_key` lives.
    pub fn build_default(base_key: &str) -> CompositeKey {
        Self::build_with(base_key, &GenerationParameters::default())
    }
}
