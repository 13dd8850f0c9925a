//! 🗝️ Object keys: where in the container a batch lands.
//!
//! The template is plain text with `%{...}` tokens, substituted literally:
//!
//! | token              | filled in          |
//! |--------------------|--------------------|
//! | `%{path}`          | once, at startup   |
//! | `%{file_extension}`| once, at startup   |
//! | `%{hostname}`      | every flush        |
//! | `%{uuid}`          | every flush        |
//! | `%{time_slice}`    | every flush        |
//!
//! Tokens we don't know stay exactly where they are. Nobody gets to be clever.

use uuid::Uuid;

pub const DEFAULT_OBJECT_KEY_FORMAT: &str = "%{path}%{time_slice}_%{uuid}.%{file_extension}";

/// 🧩 A key template with the static parts already baked in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKeyTemplate {
    template: String,
}

impl ObjectKeyTemplate {
    /// Bakes `%{path}` and `%{file_extension}` into the template.
    pub fn new(format: &str, path: &str, file_extension: &str) -> Self {
        let template = format
            .replace("%{path}", path)
            .replace("%{file_extension}", file_extension);
        Self { template }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// 🚀 Renders one key with a fresh random UUID.
    pub fn render(&self, hostname: &str, time_slice: &str) -> String {
        self.render_with_uuid(hostname, time_slice, Uuid::new_v4())
    }

    /// Renders with a caller-chosen UUID. Handy when you need to predict the answer.
    pub fn render_with_uuid(&self, hostname: &str, time_slice: &str, uuid: Uuid) -> String {
        self.template
            .replace("%{hostname}", hostname)
            .replace("%{uuid}", &uuid.to_string())
            .replace("%{time_slice}", time_slice)
    }
}
