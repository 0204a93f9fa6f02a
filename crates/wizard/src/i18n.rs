//! Localized strings. Tables for en/it/de are embedded; a directory of
//! `{lang}.json` files may override them key by key. Anything missing falls
//! back to English, then to the key itself.

use std::collections::HashMap;
use std::path::Path;

use civis_core::Language;
use serde_json::Value;
use tracing::{debug, warn};

const EMBEDDED: [(Language, &str); 3] = [
    (Language::En, include_str!("../translations/en.json")),
    (Language::It, include_str!("../translations/it.json")),
    (Language::De, include_str!("../translations/de.json")),
];

#[derive(Debug, Clone, Default)]
pub struct Translations {
    tables: HashMap<Language, Value>,
}

impl Translations {
    pub fn embedded() -> Self {
        let mut tables = HashMap::new();
        for (lang, text) in EMBEDDED {
            match serde_json::from_str::<Value>(text) {
                Ok(v) => {
                    tables.insert(lang, v);
                }
                Err(e) => warn!(lang = %lang, error = %e, "i18n: embedded table unreadable"),
            }
        }
        Self { tables }
    }

    /// Embedded tables with `{dir}/{lang}.json` merged on top where present.
    pub fn with_overrides(dir: &Path) -> Self {
        let mut me = Self::embedded();
        for lang in Language::ALL {
            let path = dir.join(format!("{}.json", lang.code()));
            let Ok(text) = std::fs::read_to_string(&path) else { continue };
            match serde_json::from_str::<Value>(&text) {
                Ok(over) => {
                    let base = me.tables.entry(lang).or_insert_with(|| Value::Object(Default::default()));
                    merge(base, over);
                    debug!(path = %path.display(), "i18n: override loaded");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "i18n: ignoring unreadable override"),
            }
        }
        me
    }

    fn lookup(&self, lang: Language, key: &str) -> Option<&str> {
        let pointer = format!("/{}", key.replace('.', "/"));
        self.tables.get(&lang)?.pointer(&pointer)?.as_str()
    }

    /// Dotted key (`errors.no_rows`) in `lang`, falling back to English.
    pub fn text(&self, lang: Language, key: &str) -> String {
        self.lookup(lang, key).or_else(|| self.lookup(Language::En, key)).unwrap_or(key).to_string()
    }

    /// [`text`](Self::text) with `{name}` placeholders filled.
    pub fn fill(&self, lang: Language, key: &str, params: &[(&str, &str)]) -> String {
        let mut out = self.text(lang, key);
        for (name, value) in params {
            out = out.replace(&format!("{{{name}}}"), value);
        }
        out
    }

    /// Localized name of a catalog group, when the table knows it.
    pub fn group_label(&self, lang: Language, group_name: &str) -> Option<String> {
        let key = format!("groups.{group_name}");
        self.lookup(lang, &key).or_else(|| self.lookup(Language::En, &key)).map(str::to_string)
    }
}

fn merge(base: &mut Value, over: Value) {
    match (base, over) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(slot) => merge(slot, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}
