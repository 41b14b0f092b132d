//! Localized user-facing strings.
//!
//! Locale tables are JSON objects embedded at compile time. Keys use dot
//! notation (`response.paused`) and values may contain `{name}` placeholders.

use anyhow::{Context, Result};
use serde_json::Value;
use std::{collections::BTreeMap, fmt::Display};

pub const DEFAULT_LOCALE: &str = "en";

const EMBEDDED: &[(&str, &str)] = &[
    ("de", include_str!("locales/de.json")),
    ("en", include_str!("locales/en.json")),
    ("es", include_str!("locales/es.json")),
];

/// Every translation table the bot knows, keyed by locale code.
#[derive(Debug, Clone)]
pub struct Catalog {
    tables: BTreeMap<String, Value>,
}

impl Catalog {
    /// Loads the tables compiled into the binary.
    pub fn embedded() -> Result<Self> {
        let mut tables = BTreeMap::new();
        for (locale, raw) in EMBEDDED {
            let table: Value = serde_json::from_str(raw)
                .with_context(|| format!("locale table `{}` is not valid JSON", locale))?;
            tables.insert(locale.to_string(), table);
        }
        Ok(Self { tables })
    }

    /// Sorted locale codes.
    pub fn available_locales(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    pub fn is_valid_locale(&self, locale: &str) -> bool {
        self.tables.contains_key(locale)
    }

    /// Translation of `key` without substitutions.
    pub fn get(&self, locale: &str, key: &str) -> String {
        self.format(locale, key, &[])
    }

    /// Translation of `key` in `locale`, falling back to the default locale
    /// and then to the key itself. Placeholders without a matching argument
    /// are left as they are.
    pub fn format(&self, locale: &str, key: &str, args: &[(&str, &(dyn Display + Sync))]) -> String {
        let Some(template) = self
            .lookup(locale, key)
            .or_else(|| self.lookup(DEFAULT_LOCALE, key))
        else {
            return key.to_string();
        };

        args.iter().fold(template.to_string(), |text, (name, value)| {
            text.replace(&format!("{{{}}}", name), &value.to_string())
        })
    }

    fn lookup(&self, locale: &str, key: &str) -> Option<&str> {
        key.split('.')
            .try_fold(self.tables.get(locale)?, |node, part| node.get(part))?
            .as_str()
    }
}
