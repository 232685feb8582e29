//! Model type to REST resource naming.

use std::collections::HashMap;

use crate::config::ResourceConfig;
use crate::schema::ModelType;

const IRREGULAR: &[(&str, &str)] = &[
    ("person", "people"),
    ("child", "children"),
    ("man", "men"),
    ("woman", "women"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    /// Root key for a single resource (`photo`).
    pub singular: String,
    /// Path segment and root key for collections (`photos`).
    pub plural: String,
}

/// Naming table, fixed once the adapter is built.
#[derive(Debug, Clone, Default)]
pub struct ResourceMapping {
    overrides: HashMap<ModelType, ResourceNames>,
}

impl ResourceMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(resources: &[ResourceConfig]) -> Self {
        let mut mapping = Self::new();
        for resource in resources {
            let model = ModelType::new(&resource.model);
            let inferred = infer(&model);
            mapping.overrides.insert(
                model,
                ResourceNames {
                    singular: resource.singular.clone().unwrap_or(inferred.singular),
                    plural: resource.plural.clone().unwrap_or(inferred.plural),
                },
            );
        }
        mapping
    }

    pub fn with_override(
        mut self,
        model: impl Into<ModelType>,
        singular: impl Into<String>,
        plural: impl Into<String>,
    ) -> Self {
        self.overrides.insert(
            model.into(),
            ResourceNames {
                singular: singular.into(),
                plural: plural.into(),
            },
        );
        self
    }

    pub fn names(&self, model: &ModelType) -> ResourceNames {
        self.overrides
            .get(model)
            .cloned()
            .unwrap_or_else(|| infer(model))
    }

    pub fn singular(&self, model: &ModelType) -> String {
        self.names(model).singular
    }

    pub fn plural(&self, model: &ModelType) -> String {
        self.names(model).plural
    }

    /// Which of `models` uses `key` as its singular or plural root.
    pub fn model_for_root<'a>(
        &self,
        models: impl IntoIterator<Item = &'a ModelType>,
        key: &str,
    ) -> Option<ModelType> {
        models.into_iter().find_map(|model| {
            let names = self.names(model);
            (names.singular == key || names.plural == key).then(|| model.clone())
        })
    }
}

fn infer(model: &ModelType) -> ResourceNames {
    let singular = underscore(model.as_str());
    let plural = pluralize(&singular);
    ResourceNames { singular, plural }
}

/// `BlogPost` -> `blog_post`, `blog-post` -> `blog_post`.
pub fn underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for ch in name.chars() {
        if ch == '-' || ch == ' ' {
            out.push('_');
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// English pluralization of the last `_`-separated word.
pub fn pluralize(word: &str) -> String {
    let (head, last) = match word.rfind('_') {
        Some(idx) => word.split_at(idx + 1),
        None => ("", word),
    };

    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == last) {
        return format!("{}{}", head, plural);
    }

    let plural = if let Some(stem) = last.strip_suffix('y') {
        match stem.chars().last() {
            Some(c) if !"aeiou".contains(c) => format!("{}ies", stem),
            _ => format!("{}s", last),
        }
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| last.ends_with(s)) {
        format!("{}es", last)
    } else {
        format!("{}s", last)
    };
    format!("{}{}", head, plural)
}
