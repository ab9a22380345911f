//! The catalog of message templates, looked up by name or wire number.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::error::{ProtocolError, TemplateError};
use crate::parser;
use crate::template::{MessageNumber, MessageTemplate, MsgFrequency};

const BUILTIN_TEMPLATE: &str = include_str!("../templates/message_template.msg");

/// An immutable set of message templates.
///
/// Load it once at startup and share it behind an `Arc`; nothing mutates
/// it afterwards.
#[derive(Debug)]
pub struct TemplateDictionary {
    version: Option<String>,
    templates: Vec<Arc<MessageTemplate>>,
    by_name: HashMap<String, usize>,
    by_number: HashMap<MessageNumber, usize>,
}

impl TemplateDictionary {
    /// Parses template source text.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let parsed = parser::parse(text)?;
        let mut dict = Self {
            version: parsed.version,
            templates: Vec::with_capacity(parsed.messages.len()),
            by_name: HashMap::new(),
            by_number: HashMap::new(),
        };
        for template in parsed.messages {
            let index = dict.templates.len();
            dict.by_name.insert(template.name.clone(), index);
            dict.by_number.insert(template.number, index);
            dict.templates.push(Arc::new(template));
        }
        tracing::debug!(
            templates = dict.templates.len(),
            version = dict.version.as_deref().unwrap_or("-"),
            "template dictionary parsed"
        );
        Ok(dict)
    }

    /// Reads and parses a template file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let dict = Self::parse(&text)?;
        tracing::info!(path = %path.display(), templates = dict.len(), "template file loaded");
        Ok(dict)
    }

    /// The dictionary compiled into this crate.
    ///
    /// It covers the circuit plumbing messages and a handful of common
    /// agent, chat and region messages.
    pub fn builtin() -> &'static Arc<TemplateDictionary> {
        static BUILTIN: OnceLock<Arc<TemplateDictionary>> = OnceLock::new();
        BUILTIN.get_or_init(|| match Self::parse(BUILTIN_TEMPLATE) {
            Ok(dict) => Arc::new(dict),
            Err(err) => {
                // The embedded file is covered by tests; an empty
                // dictionary still decodes everything as unknown.
                tracing::error!(%err, "builtin template failed to parse");
                Arc::new(Self::empty())
            }
        })
    }

    fn empty() -> Self {
        Self {
            version: None,
            templates: Vec::new(),
            by_name: HashMap::new(),
            by_number: HashMap::new(),
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Arc<MessageTemplate>> {
        self.by_name.get(name).map(|&i| &self.templates[i])
    }

    pub fn get_by_id(
        &self,
        frequency: MsgFrequency,
        id: u16,
    ) -> Option<&Arc<MessageTemplate>> {
        self.by_number
            .get(&MessageNumber { frequency, id })
            .map(|&i| &self.templates[i])
    }

    /// The `version` directive, if the source had one.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Templates in source order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<MessageTemplate>> {
        self.templates.iter()
    }
}
