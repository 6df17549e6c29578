//! Collection field-schema introspection.
//!
//! The host describes its user collection with a [`CollectionSchema`]. The
//! bridge reads it to decide which fields go into session tokens, and
//! installs the fields it needs itself (the subject field and, in hidden
//! credential mode, the credential field).

use serde::{Deserialize, Serialize};

use crate::config::CollectionAuthSettings;

/// A field that stores data on the document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DataField {
    /// Field name (document key).
    pub name: String,

    /// Include the field's value in session tokens.
    #[serde(default)]
    pub save_to_jwt: bool,

    /// Hidden fields are only visible to internal reads.
    #[serde(default)]
    pub hidden: bool,

    /// Read-only fields are not editable from the host UI.
    #[serde(default)]
    pub read_only: bool,
}

impl DataField {
    /// Creates a plain data field.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            save_to_jwt: false,
            hidden: false,
            read_only: false,
        }
    }

    /// Marks the field for inclusion in session tokens.
    #[must_use]
    pub fn saved_to_jwt(mut self) -> Self {
        self.save_to_jwt = true;
        self
    }

    /// Marks the field as hidden.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Marks the field as read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// A field in a collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldSchema {
    /// A field that stores a value.
    Data(DataField),

    /// A presentational container (row, collapsible, ...) that stores
    /// nothing itself but holds nested fields.
    Layout {
        /// Nested fields.
        fields: Vec<FieldSchema>,
    },
}

impl FieldSchema {
    /// Returns the field name if this field stores data.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Data(field) => Some(&field.name),
            Self::Layout { .. } => None,
        }
    }
}

impl From<DataField> for FieldSchema {
    fn from(field: DataField) -> Self {
        Self::Data(field)
    }
}

/// Schema of the host's user collection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionSchema {
    /// Collection slug.
    pub slug: String,

    /// Top-level fields.
    #[serde(default)]
    pub fields: Vec<FieldSchema>,

    /// Auth settings (token lifetime and cookie attributes).
    #[serde(default)]
    pub auth: CollectionAuthSettings,
}

impl CollectionSchema {
    /// Creates an empty schema for a collection.
    #[must_use]
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            fields: Vec::new(),
            auth: CollectionAuthSettings::default(),
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<FieldSchema>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Sets the auth settings.
    #[must_use]
    pub fn with_auth(mut self, auth: CollectionAuthSettings) -> Self {
        self.auth = auth;
        self
    }

    /// Returns `true` if a top-level data field with this name exists.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name() == Some(name))
    }

    /// Names of data fields that are included in session tokens.
    ///
    /// Top-level data fields are checked directly. Layout fields are
    /// descended exactly one level; layouts nested inside layouts are not
    /// traversed.
    #[must_use]
    pub fn jwt_field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for field in &self.fields {
            match field {
                FieldSchema::Data(data) if data.save_to_jwt => names.push(data.name.as_str()),
                FieldSchema::Data(_) => {}
                FieldSchema::Layout { fields } => {
                    for nested in fields {
                        if let FieldSchema::Data(data) = nested
                            && data.save_to_jwt
                        {
                            names.push(data.name.as_str());
                        }
                    }
                }
            }
        }
        names
    }

    /// Names of hidden data fields, at any depth.
    #[must_use]
    pub fn hidden_field_names(&self) -> Vec<String> {
        fn collect(fields: &[FieldSchema], out: &mut Vec<String>) {
            for field in fields {
                match field {
                    FieldSchema::Data(data) if data.hidden => out.push(data.name.clone()),
                    FieldSchema::Data(_) => {}
                    FieldSchema::Layout { fields } => collect(fields, out),
                }
            }
        }
        let mut out = Vec::new();
        collect(&self.fields, &mut out);
        out
    }

    /// Installs the subject field if the collection does not declare it.
    ///
    /// The injected field is read-only and not included in session tokens.
    /// Returns `true` if the field was added.
    pub fn ensure_subject_field(&mut self, subject_field: &str) -> bool {
        if self.has_field(subject_field) {
            return false;
        }
        self.fields
            .push(DataField::new(subject_field).read_only().into());
        true
    }

    /// Installs an arbitrary data field if no field with its name exists.
    ///
    /// Returns `true` if the field was added.
    pub fn ensure_field(&mut self, field: DataField) -> bool {
        if self.has_field(&field.name) {
            return false;
        }
        self.fields.push(field.into());
        true
    }
}
