//! Validation and merging of scan definitions.
//!
//! Nothing here touches storage. The caller looks up the scan and the
//! candidate sources, hands them to the editor and persists what comes back.

use std::collections::BTreeSet;

use quipu_model::{NewScan, OptionalProduct, Scan, ScanType, Source, SourceId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ScanError};

/// Partial update of a scan. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanChanges {
    /// Replacement source set, by source name.
    pub sources: Option<Vec<String>>,
    /// New concurrency limit.
    pub max_concurrency: Option<u32>,
    /// Replacement set of disabled product tags. An empty list clears it.
    pub disabled_optional_products: Option<Vec<String>>,
}

impl ScanChanges {
    /// Sets the replacement source names.
    pub fn with_sources<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the new concurrency limit.
    pub fn with_max_concurrency(mut self, limit: u32) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Sets the replacement disabled product tags.
    pub fn with_disabled_products<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_optional_products =
            Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// True when no recognized field was supplied.
    pub fn is_empty(&self) -> bool {
        self.sources.is_none()
            && self.max_concurrency.is_none()
            && self.disabled_optional_products.is_none()
    }

    /// Every source name referenced by the change set.
    pub fn source_names(&self) -> &[String] {
        self.sources.as_deref().unwrap_or_default()
    }
}

/// Full definition used to create (or replace) a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDefinition {
    /// Unique scan name.
    pub name: String,
    /// Source names; at least one is required.
    pub sources: Vec<String>,
    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub max_concurrency: Option<u32>,
    /// Product tags to skip.
    #[serde(default)]
    pub disabled_optional_products: Vec<String>,
    /// Defaults to `inspect`.
    #[serde(default)]
    pub scan_type: Option<ScanType>,
}

/// Applies change sets to scans against a catalog of known sources.
#[derive(Debug, Clone, Copy)]
pub struct ScanConfigEditor<'a> {
    catalog: &'a [Source],
}

impl<'a> ScanConfigEditor<'a> {
    /// Editor resolving names against `catalog`.
    pub fn new(catalog: &'a [Source]) -> Self {
        Self { catalog }
    }

    /// Produces the updated scan, or the first failing check in this order:
    /// no changes, unknown scan, unknown sources, bad concurrency, unknown
    /// products.
    pub fn edit(
        &self,
        name: &str,
        existing: Option<&Scan>,
        changes: &ScanChanges,
    ) -> Result<Scan> {
        if changes.is_empty() {
            return Err(ScanError::NoChanges {
                name: name.to_string(),
            });
        }

        let existing = existing
            .filter(|scan| scan.name == name)
            .ok_or_else(|| ScanError::scan_not_found(name))?;

        let mut updated = existing.clone();

        if let Some(names) = &changes.sources {
            updated.sources = self.resolve_sources(names)?;
        }
        if let Some(limit) = changes.max_concurrency {
            updated.max_concurrency = validate_max_concurrency(limit)?;
        }
        if let Some(tags) = &changes.disabled_optional_products {
            updated.disabled_optional_products = parse_optional_products(tags)?;
        }

        debug!(
            target: "scan::editor",
            scan = %updated.name,
            sources = updated.sources.len(),
            max_concurrency = updated.max_concurrency,
            "scan edit validated"
        );
        Ok(updated)
    }

    /// Validates a create request. `default_max_concurrency` applies when the
    /// definition leaves the limit out.
    pub fn build(
        &self,
        definition: &ScanDefinition,
        default_max_concurrency: u32,
    ) -> Result<NewScan> {
        let name = definition.name.trim();
        if name.is_empty() {
            return Err(ScanError::Validation(
                "scan name must not be empty".into(),
            ));
        }

        let sources = self.resolve_sources(&definition.sources)?;
        let max_concurrency = validate_max_concurrency(
            definition.max_concurrency.unwrap_or(default_max_concurrency),
        )?;
        let disabled_optional_products =
            parse_optional_products(&definition.disabled_optional_products)?;

        Ok(NewScan {
            name: name.to_string(),
            scan_type: definition.scan_type.unwrap_or_default(),
            sources,
            max_concurrency,
            disabled_optional_products,
        })
    }

    /// Resolves every requested name and reports all missing ones together.
    /// Duplicate names collapse onto their first occurrence.
    pub fn resolve_sources(&self, names: &[String]) -> Result<Vec<SourceId>> {
        if names.is_empty() {
            return Err(ScanError::Validation(
                "a scan requires at least one source".into(),
            ));
        }

        let mut resolved = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.catalog.iter().find(|source| source.name == *name) {
                Some(source) => {
                    if !resolved.contains(&source.id) {
                        resolved.push(source.id);
                    }
                }
                None => {
                    if !missing.contains(name) {
                        missing.push(name.clone());
                    }
                }
            }
        }

        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(ScanError::InvalidSource { missing })
        }
    }
}

/// Rejects a zero limit.
pub fn validate_max_concurrency(limit: u32) -> Result<u32> {
    if limit == 0 {
        Err(ScanError::Validation(
            "max_concurrency must be greater than zero".into(),
        ))
    } else {
        Ok(limit)
    }
}

/// Parses optional product tags, collecting every unrecognized tag.
pub fn parse_optional_products(
    tags: &[String],
) -> Result<BTreeSet<OptionalProduct>> {
    let mut products = BTreeSet::new();
    let mut unknown = Vec::new();
    for tag in tags {
        match tag.parse::<OptionalProduct>() {
            Ok(product) => {
                products.insert(product);
            }
            Err(_) => unknown.push(tag.clone()),
        }
    }

    if unknown.is_empty() {
        Ok(products)
    } else {
        Err(ScanError::InvalidProduct { tags: unknown })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quipu_model::{ScanId, SourceType};

    fn source(id: u64, name: &str) -> Source {
        Source {
            id: SourceId(id),
            name: name.to_string(),
            source_type: SourceType::Network,
            hosts: vec![format!("10.0.0.{id}")],
            port: Some(22),
            credentials: vec![],
        }
    }

    fn catalog() -> Vec<Source> {
        vec![source(1, "src1"), source(2, "src2"), source(3, "src3")]
    }

    fn scan() -> Scan {
        Scan {
            id: ScanId(1),
            name: "S1".into(),
            scan_type: ScanType::Inspect,
            sources: vec![SourceId(1), SourceId(2)],
            max_concurrency: 4,
            disabled_optional_products: BTreeSet::from([
                OptionalProduct::JbossFuse,
            ]),
        }
    }

    #[test]
    fn max_concurrency_only_keeps_other_fields() {
        let catalog = catalog();
        let editor = ScanConfigEditor::new(&catalog);
        let existing = scan();

        let updated = editor
            .edit(
                "S1",
                Some(&existing),
                &ScanChanges::default().with_max_concurrency(10),
            )
            .expect("edit succeeds");

        assert_eq!(updated.max_concurrency, 10);
        assert_eq!(updated.sources, existing.sources);
        assert_eq!(
            updated.disabled_optional_products,
            existing.disabled_optional_products
        );
        assert_eq!(updated.id, existing.id);
    }

    #[test]
    fn empty_changes_fail_before_anything_else() {
        let catalog = catalog();
        let editor = ScanConfigEditor::new(&catalog);
        let existing = scan();

        for target in [Some(&existing), None] {
            let err = editor
                .edit("S1", target, &ScanChanges::default())
                .unwrap_err();
            assert!(matches!(err, ScanError::NoChanges { ref name } if name == "S1"));
        }
    }

    #[test]
    fn unknown_scan_is_not_found() {
        let catalog = catalog();
        let editor = ScanConfigEditor::new(&catalog);
        let err = editor
            .edit("ghost", None, &ScanChanges::default().with_max_concurrency(2))
            .unwrap_err();
        assert!(matches!(err, ScanError::NotFound(_)));
        assert_eq!(err.to_string(), "Scan \"ghost\" does not exist.");
    }

    #[test]
    fn reports_every_missing_source() {
        let catalog = catalog();
        let editor = ScanConfigEditor::new(&catalog);
        let existing = scan();
        let err = editor
            .edit(
                "S1",
                Some(&existing),
                &ScanChanges::default().with_sources(["src1", "lab", "dmz", "lab"]),
            )
            .unwrap_err();

        match err {
            ScanError::InvalidSource { missing } => {
                assert_eq!(missing, vec!["lab".to_string(), "dmz".to_string()])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn replaces_sources_in_request_order() {
        let catalog = catalog();
        let editor = ScanConfigEditor::new(&catalog);
        let existing = scan();
        let updated = editor
            .edit(
                "S1",
                Some(&existing),
                &ScanChanges::default().with_sources(["src3", "src1", "src3"]),
            )
            .unwrap();
        assert_eq!(updated.sources, vec![SourceId(3), SourceId(1)]);
        assert_eq!(updated.max_concurrency, 4);
    }

    #[test]
    fn rejects_unknown_products_and_zero_concurrency() {
        let catalog = catalog();
        let editor = ScanConfigEditor::new(&catalog);
        let existing = scan();

        let err = editor
            .edit(
                "S1",
                Some(&existing),
                &ScanChanges::default()
                    .with_disabled_products(["jboss_eap", "websphere"]),
            )
            .unwrap_err();
        assert!(
            matches!(err, ScanError::InvalidProduct { ref tags } if tags == &["websphere".to_string()])
        );

        let err = editor
            .edit(
                "S1",
                Some(&existing),
                &ScanChanges::default().with_max_concurrency(0),
            )
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn empty_product_list_clears_disabled_set() {
        let catalog = catalog();
        let editor = ScanConfigEditor::new(&catalog);
        let existing = scan();
        let updated = editor
            .edit(
                "S1",
                Some(&existing),
                &ScanChanges::default()
                    .with_disabled_products(Vec::<String>::new()),
            )
            .unwrap();
        assert!(updated.disabled_optional_products.is_empty());
    }

    #[test]
    fn build_applies_defaults() {
        let catalog = catalog();
        let editor = ScanConfigEditor::new(&catalog);
        let definition = ScanDefinition {
            name: " nightly ".into(),
            sources: vec!["src2".into()],
            ..Default::default()
        };
        let new_scan = editor.build(&definition, 50).unwrap();
        assert_eq!(new_scan.name, "nightly");
        assert_eq!(new_scan.max_concurrency, 50);
        assert_eq!(new_scan.scan_type, ScanType::Inspect);
        assert_eq!(new_scan.sources, vec![SourceId(2)]);
    }

    #[test]
    fn change_sets_deserialize_with_absent_fields() {
        let changes: ScanChanges =
            serde_json::from_str(r#"{"max_concurrency": 7}"#).unwrap();
        assert_eq!(changes.max_concurrency, Some(7));
        assert!(changes.sources.is_none());
        assert!(!changes.is_empty());

        let empty: ScanChanges = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }
}
