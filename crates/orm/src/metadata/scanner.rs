//! Metadata scanner
//!
//! Walks entity definitions in parallel and populates the metadata
//! registries. Types are scanned independently on the rayon pool and the
//! fields of each keyed type are scanned in parallel as well. A failure in one
//! type never stops the others; all failures are reported together once
//! the scan completes.

use rayon::prelude::*;
use std::ops::Add;
use tracing::{debug, info, warn};

use super::definition::{EntityDefinition, FieldDefinition, TypeCatalog};
use super::registry::{MetadataRegistry, Registration};
use crate::error::{OrmError, OrmResult, TypeScanFailure};
use crate::value::coerce;

/// Number of registrations a scan added (re-registrations are not counted)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub types_scanned: usize,
    pub keys: usize,
    pub max_lengths: usize,
    pub defaults: usize,
    pub schemas: usize,
    pub relationships: usize,
}

impl Add for ScanSummary {
    type Output = ScanSummary;

    fn add(self, other: ScanSummary) -> ScanSummary {
        ScanSummary {
            types_scanned: self.types_scanned + other.types_scanned,
            keys: self.keys + other.keys,
            max_lengths: self.max_lengths + other.max_lengths,
            defaults: self.defaults + other.defaults,
            schemas: self.schemas + other.schemas,
            relationships: self.relationships + other.relationships,
        }
    }
}

fn count(registration: Registration) -> usize {
    usize::from(registration.is_inserted())
}

/// Outcome of scanning a single type
struct TypeScan {
    summary: ScanSummary,
    failures: Vec<TypeScanFailure>,
}

/// Scans entity definitions into a [`MetadataRegistry`]
pub struct MetadataScanner<'a> {
    registry: &'a MetadataRegistry,
    parallelism: Option<usize>,
}

impl<'a> MetadataScanner<'a> {
    pub fn new(registry: &'a MetadataRegistry) -> Self {
        Self {
            registry,
            parallelism: None,
        }
    }

    /// Run the scan on a dedicated pool of `threads` workers instead of the global pool
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }

    /// Scan every type in the loaded-type catalog
    pub fn scan_loaded(&self) -> OrmResult<ScanSummary> {
        self.scan(&TypeCatalog::loaded_types())
    }

    /// Scan the given types, or every loaded type when `types` is empty
    pub fn scan(&self, types: &[EntityDefinition]) -> OrmResult<ScanSummary> {
        if types.is_empty() {
            let loaded = TypeCatalog::loaded_types();
            if loaded.is_empty() {
                debug!("metadata scan: no types supplied or loaded");
                return Ok(ScanSummary::default());
            }
            return self.scan_types(&loaded);
        }
        self.scan_types(types)
    }

    fn scan_types(&self, types: &[EntityDefinition]) -> OrmResult<ScanSummary> {
        info!(types = types.len(), "starting metadata scan");

        let outcomes: Vec<TypeScan> = match self.parallelism {
            Some(threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("orm-metadata-scan-{}", i))
                    .build()
                    .map_err(|e| OrmError::Configuration(format!("Failed to build scan pool: {}", e)))?;
                pool.install(|| types.par_iter().map(|def| self.scan_type(def)).collect())
            }
            None => types.par_iter().map(|def| self.scan_type(def)).collect(),
        };

        let mut summary = ScanSummary::default();
        let mut failures = Vec::new();
        for outcome in outcomes {
            summary = summary + outcome.summary;
            failures.extend(outcome.failures);
        }

        if failures.is_empty() {
            info!(
                types = summary.types_scanned,
                keys = summary.keys,
                max_lengths = summary.max_lengths,
                defaults = summary.defaults,
                schemas = summary.schemas,
                relationships = summary.relationships,
                "metadata scan complete"
            );
            Ok(summary)
        } else {
            warn!(failures = failures.len(), "metadata scan completed with failures");
            Err(OrmError::MetadataScan(failures))
        }
    }

    fn scan_type(&self, definition: &EntityDefinition) -> TypeScan {
        let entity_type = definition.name.as_str();
        let mut summary = ScanSummary {
            types_scanned: 1,
            ..ScanSummary::default()
        };
        let mut errors: Vec<OrmError> = Vec::new();

        // Field metadata is only registered for keyed types
        if let Some(key) = &definition.primary_key {
            match self.registry.keys.register_key(entity_type, key.clone()) {
                Ok(registration) => summary.keys += count(registration),
                Err(e) => {
                    // Nothing else is merged into a type whose key conflicts
                    warn!(entity_type, error = %e, "key conflict; skipping remaining metadata");
                    return TypeScan {
                        summary,
                        failures: vec![TypeScanFailure::new(entity_type, e)],
                    };
                }
            }

            let field_results: Vec<(ScanSummary, Vec<OrmError>)> = definition
                .fields
                .par_iter()
                .map(|field| self.scan_field(entity_type, field))
                .collect();
            for (field_summary, field_errors) in field_results {
                summary = summary + field_summary;
                errors.extend(field_errors);
            }
        }

        if let Some(schema) = &definition.schema {
            match self.registry.schemas.register_schema(entity_type, schema) {
                Ok(registration) => summary.schemas += count(registration),
                Err(e) => errors.push(e),
            }
        }

        if let Some(relationships) = &definition.relationships {
            match self
                .registry
                .relationships
                .register_relationships(entity_type, relationships.clone())
            {
                Ok(registration) => summary.relationships += count(registration),
                Err(e) => errors.push(e),
            }
        }

        for error in &errors {
            warn!(entity_type, error = %error, "metadata registration failed");
        }
        debug!(entity_type, fields = definition.fields.len(), "scanned entity type");

        TypeScan {
            summary,
            failures: errors
                .into_iter()
                .map(|error| TypeScanFailure::new(entity_type, error))
                .collect(),
        }
    }

    fn scan_field(&self, entity_type: &str, field: &FieldDefinition) -> (ScanSummary, Vec<OrmError>) {
        let mut summary = ScanSummary::default();
        let mut errors = Vec::new();

        if let Some(max_length) = field.max_length {
            match self
                .registry
                .validation
                .register_max_length(entity_type, &field.name, max_length)
            {
                Ok(registration) => summary.max_lengths += count(registration),
                Err(e) => errors.push(e),
            }
        }

        if let Some(default) = &field.default_value {
            let registered = coerce(&field.name, default.clone(), &field.field_type).and_then(|typed| {
                self.registry
                    .defaults
                    .register_default(entity_type, &field.name, typed)
            });
            match registered {
                Ok(registration) => summary.defaults += count(registration),
                Err(e) => errors.push(e),
            }
        }

        (summary, errors)
    }
}

/// Scan `types` (or every loaded type when empty) into the process-wide registry
pub fn scan_into_global(types: &[EntityDefinition]) -> OrmResult<ScanSummary> {
    let registry = MetadataRegistry::global();
    MetadataScanner::new(&registry).scan(types)
}
