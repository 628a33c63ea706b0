//! Metadata digestion.
//!
//! Derives the fields every later setup step depends on - application name,
//! interface name, description language - from the raw path identifier and
//! the about metadata document. Digestion runs at construction time; nothing
//! touches the bus until it has succeeded.

use tracing::debug;

/// Result type for digestion.
pub type Result<T> = std::result::Result<T, DigestError>;

/// Errors from digesting the construction-time configuration.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("path identifier {0:?} does not yield an interface name")]
    InvalidPath(String),

    #[error("about document is not well-formed")]
    MalformedMetadata(#[source] roxmltree::Error),

    #[error("about document has no root element")]
    MissingRootElement,

    #[error("about document root element is '{found}', expected 'About'")]
    UnexpectedRootName { found: String },

    #[error("about document is missing a non-empty AppName or DefaultLanguage")]
    IncompleteMetadata,
}

/// Fields derived from the raw configuration.
///
/// All three are guaranteed non-empty once digestion has succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    /// Application name, from the document's `AppName` element.
    pub application_name: String,
    /// Bus interface name derived from the path identifier.
    pub interface_name: String,
    /// Localization tag, from the document's `DefaultLanguage` element.
    pub description_language: String,
}

/// Derive the interface name from a forward-slash delimited path identifier.
///
/// The leading separator is dropped and every remaining `/` becomes a `.`,
/// so `/org/example/button` yields `org.example.button`.
pub fn digest_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Err(DigestError::InvalidPath(path.to_string()));
    }

    let mut chars = path.chars();
    chars.next();
    let interface_name = chars.as_str().replace('/', ".");

    if interface_name.is_empty() {
        return Err(DigestError::InvalidPath(path.to_string()));
    }

    debug!(path, interface = %interface_name, "path digested");
    Ok(interface_name)
}

/// Extract `(AppName, DefaultLanguage)` from the about document.
///
/// The document must be well-formed markup with a root element named
/// `About`; only its immediate children are scanned.
pub fn digest_about_document(document: &str) -> Result<(String, String)> {
    let doc = roxmltree::Document::parse(document).map_err(|e| match e {
        roxmltree::Error::NoRootNode => DigestError::MissingRootElement,
        other => DigestError::MalformedMetadata(other),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "About" {
        return Err(DigestError::UnexpectedRootName {
            found: root.tag_name().name().to_string(),
        });
    }

    let mut application_name = String::new();
    let mut language = String::new();
    for child in root.children().filter(|c| c.is_element()) {
        match child.tag_name().name() {
            "AppName" => application_name = child.text().unwrap_or_default().to_string(),
            "DefaultLanguage" => language = child.text().unwrap_or_default().to_string(),
            _ => {}
        }
    }

    if application_name.is_empty() || language.is_empty() {
        return Err(DigestError::IncompleteMetadata);
    }

    debug!(application = %application_name, language = %language, "about document digested");
    Ok((application_name, language))
}

/// Digest the full construction-time configuration.
pub fn digest(path: &str, about_document: &str) -> Result<Digest> {
    let interface_name = digest_path(path)?;
    let (application_name, description_language) = digest_about_document(about_document)?;

    Ok(Digest {
        application_name,
        interface_name,
        description_language,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABOUT: &str = "<About>\
        <AppName>Higgns Button</AppName>\
        <DefaultLanguage>en</DefaultLanguage>\
        <Manufacturer>Two Bulls</Manufacturer>\
        </About>";

    #[test]
    fn test_digest_path_replaces_separators() {
        let name = digest_path("/org/example/service/device").unwrap();
        assert_eq!(name, "org.example.service.device");
    }

    #[test]
    fn test_digest_path_single_segment() {
        let name = digest_path("/button").unwrap();
        assert_eq!(name, "button");
    }

    #[test]
    fn test_digest_path_empty_fails() {
        assert!(matches!(digest_path(""), Err(DigestError::InvalidPath(_))));
    }

    #[test]
    fn test_digest_path_lone_separator_fails() {
        assert!(matches!(digest_path("/"), Err(DigestError::InvalidPath(_))));
    }

    #[test]
    fn test_digest_about_extracts_fields() {
        let (app, lang) = digest_about_document(ABOUT).unwrap();
        assert_eq!(app, "Higgns Button");
        assert_eq!(lang, "en");
    }

    #[test]
    fn test_digest_about_missing_app_name() {
        let doc = "<About><DefaultLanguage>en</DefaultLanguage></About>";
        assert!(matches!(
            digest_about_document(doc),
            Err(DigestError::IncompleteMetadata)
        ));
    }

    #[test]
    fn test_digest_about_missing_language() {
        let doc = "<About><AppName>Higgns Button</AppName></About>";
        assert!(matches!(
            digest_about_document(doc),
            Err(DigestError::IncompleteMetadata)
        ));
    }

    #[test]
    fn test_digest_about_empty_elements_fail() {
        let doc = "<About><AppName></AppName><DefaultLanguage>en</DefaultLanguage></About>";
        assert!(matches!(
            digest_about_document(doc),
            Err(DigestError::IncompleteMetadata)
        ));
    }

    #[test]
    fn test_digest_about_wrong_root() {
        let doc = "<Metadata><AppName>X</AppName><DefaultLanguage>en</DefaultLanguage></Metadata>";
        match digest_about_document(doc) {
            Err(DigestError::UnexpectedRootName { found }) => assert_eq!(found, "Metadata"),
            other => panic!("expected UnexpectedRootName, got {other:?}"),
        }
    }

    #[test]
    fn test_digest_about_malformed() {
        assert!(matches!(
            digest_about_document("<About><AppName>oops"),
            Err(DigestError::MalformedMetadata(_))
        ));
    }

    #[test]
    fn test_digest_about_empty_input() {
        assert!(matches!(
            digest_about_document(""),
            Err(DigestError::MissingRootElement)
        ));
    }

    #[test]
    fn test_digest_combines_both_sources() {
        let digest = digest("/org/example/button", ABOUT).unwrap();
        assert_eq!(digest.interface_name, "org.example.button");
        assert_eq!(digest.application_name, "Higgns Button");
        assert_eq!(digest.description_language, "en");
    }
}
