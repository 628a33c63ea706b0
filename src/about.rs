//! About metadata object.
//!
//! The announcement payload built from the raw metadata document under the
//! digested default language. Every child element of the `About` root is
//! passed through verbatim; the recognized set includes `AppId`, `DeviceId`,
//! `Manufacturer`, `ModelNumber`, `Description`, `SoftwareVersion`,
//! `DeviceName` and, for older protocol revisions, `DateOfManufacture`,
//! `HardwareVersion` and `SupportUrl`.

use std::collections::BTreeMap;

/// Result type for about metadata operations.
pub type Result<T> = std::result::Result<T, AboutError>;

/// Errors from building or validating the about metadata object.
#[derive(Debug, thiserror::Error)]
pub enum AboutError {
    #[error("metadata document is not well-formed")]
    Malformed(#[source] roxmltree::Error),

    #[error("metadata root element is '{found}', expected 'About'")]
    UnexpectedRoot { found: String },

    #[error("metadata is not valid for language '{language}': {reason}")]
    Invalid { language: String, reason: String },
}

/// Announcement metadata under a single language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AboutData {
    language: String,
    fields: BTreeMap<String, String>,
}

impl AboutData {
    /// Build the metadata object from the raw document under `language`.
    pub fn from_document(document: &str, language: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(document).map_err(AboutError::Malformed)?;

        let root = doc.root_element();
        if root.tag_name().name() != "About" {
            return Err(AboutError::UnexpectedRoot {
                found: root.tag_name().name().to_string(),
            });
        }

        let mut fields = BTreeMap::new();
        for child in root.children().filter(|c| c.is_element()) {
            fields.insert(
                child.tag_name().name().to_string(),
                child.text().unwrap_or_default().to_string(),
            );
        }

        Ok(Self {
            language: language.to_string(),
            fields,
        })
    }

    /// The language this metadata object was built under.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Look up a field by element name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// The advertised application name, if present.
    pub fn app_name(&self) -> Option<&str> {
        self.field("AppName")
    }

    /// The document's default language, if present.
    pub fn default_language(&self) -> Option<&str> {
        self.field("DefaultLanguage")
    }

    /// All fields, in element-name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check the metadata is announceable under `language`.
    ///
    /// The document's `DefaultLanguage` must match and `AppName` must be
    /// non-empty; all other fields are advertised as provided.
    pub fn validate(&self, language: &str) -> Result<()> {
        match self.default_language() {
            Some(default) if default == language => {}
            _ => {
                return Err(AboutError::Invalid {
                    language: language.to_string(),
                    reason: "DefaultLanguage does not match".to_string(),
                })
            }
        }

        if self.app_name().map_or(true, str::is_empty) {
            return Err(AboutError::Invalid {
                language: language.to_string(),
                reason: "AppName is missing".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABOUT: &str = "<About>\
        <DefaultLanguage>en</DefaultLanguage>\
        <AppId>26892717-c00b-414a-a34f-d96b04260e56</AppId>\
        <DeviceId>8e2f1c0a-9f24-4e6f-9a77-0f2b9c3d4e5f</DeviceId>\
        <AppName>Higgns Button</AppName>\
        <Manufacturer>Two Bulls</Manufacturer>\
        <ModelNumber>001</ModelNumber>\
        <Description>A button you can Press</Description>\
        <SoftwareVersion>0.0.1</SoftwareVersion>\
        <DeviceName>Triggns</DeviceName>\
        <DateOfManufacture>01/06/2015</DateOfManufacture>\
        <HardwareVersion>0.0.1</HardwareVersion>\
        <SupportUrl>http://higgns.com/support</SupportUrl>\
        </About>";

    #[test]
    fn test_fields_pass_through_verbatim() {
        let about = AboutData::from_document(ABOUT, "en").unwrap();
        assert_eq!(about.field("Manufacturer"), Some("Two Bulls"));
        assert_eq!(about.field("ModelNumber"), Some("001"));
        assert_eq!(about.field("SupportUrl"), Some("http://higgns.com/support"));
        assert_eq!(about.app_name(), Some("Higgns Button"));
        assert_eq!(about.fields().count(), 12);
    }

    #[test]
    fn test_validate_matching_language() {
        let about = AboutData::from_document(ABOUT, "en").unwrap();
        assert!(about.validate("en").is_ok());
    }

    #[test]
    fn test_validate_language_mismatch() {
        let about = AboutData::from_document(ABOUT, "de").unwrap();
        assert!(matches!(
            about.validate("de"),
            Err(AboutError::Invalid { .. })
        ));
    }

    #[test]
    fn test_validate_missing_app_name() {
        let doc = "<About><DefaultLanguage>en</DefaultLanguage></About>";
        let about = AboutData::from_document(doc, "en").unwrap();
        assert!(matches!(about.validate("en"), Err(AboutError::Invalid { .. })));
    }

    #[test]
    fn test_malformed_document() {
        assert!(matches!(
            AboutData::from_document("<About>", "en"),
            Err(AboutError::Malformed(_))
        ));
    }

    #[test]
    fn test_wrong_root() {
        match AboutData::from_document("<Junk/>", "en") {
            Err(AboutError::UnexpectedRoot { found }) => assert_eq!(found, "Junk"),
            other => panic!("expected UnexpectedRoot, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_fields_are_kept() {
        let doc = "<About><AppName>X</AppName><DefaultLanguage>en</DefaultLanguage>\
            <VendorExtension>42</VendorExtension></About>";
        let about = AboutData::from_document(doc, "en").unwrap();
        assert_eq!(about.field("VendorExtension"), Some("42"));
    }
}
