//! Versioned schema migration.
//!
//! Each backend supplies a [`SchemaCatalog`] holding its dialect's DDL and
//! implements [`SchemaOps`]. The state machine in [`ensure_schema`] is the
//! same for all of them: read the stored version, then create the latest
//! schema from scratch or walk the upgrade list, one transaction per step.

use async_trait::async_trait;
use readvault_core::db::DatabaseError;
use tracing::{debug, info};

/// Schema version this build writes.
pub const CURRENT_VERSION: i64 = 2;

/// Settings row holding the applied schema version.
pub const VERSION_SETTING: &str = "version";

/// Stored version meaning "no schema yet".
pub const NO_SCHEMA: i64 = -1;

/// DDL that moves the schema to `version`.
#[derive(Debug, PartialEq, Eq)]
pub struct Upgrade {
    pub version: i64,
    pub statements: &'static [&'static str],
}

/// A dialect's full create script and its ordered upgrade steps.
#[derive(Debug)]
pub struct SchemaCatalog {
    /// Creates the latest schema. Every statement must tolerate objects
    /// that already exist.
    pub create: &'static [&'static str],
    /// Sorted by ascending version; the last one targets `CURRENT_VERSION`.
    pub upgrades: &'static [Upgrade],
}

#[derive(Debug, PartialEq, Eq)]
pub enum MigrationPlan<'a> {
    Create,
    Upgrade(Vec<&'a Upgrade>),
    UpToDate,
}

impl SchemaCatalog {
    /// Decide what to run for a database currently at `stored`.
    pub fn plan(&self, stored: i64) -> Result<MigrationPlan<'_>, DatabaseError> {
        if stored < 1 {
            return Ok(MigrationPlan::Create);
        }
        if stored == CURRENT_VERSION {
            return Ok(MigrationPlan::UpToDate);
        }
        if stored > CURRENT_VERSION {
            return Err(DatabaseError::Migration(format!(
                "database schema version {stored} is newer than supported version {CURRENT_VERSION}"
            )));
        }
        let steps: Vec<&Upgrade> = self
            .upgrades
            .iter()
            .filter(|u| u.version > stored && u.version <= CURRENT_VERSION)
            .collect();
        if steps.last().map(|u| u.version) != Some(CURRENT_VERSION) {
            return Err(DatabaseError::Migration(format!(
                "no upgrade path from schema version {stored} to {CURRENT_VERSION}"
            )));
        }
        Ok(MigrationPlan::Upgrade(steps))
    }
}

/// Backend hooks the migration runner drives.
#[async_trait]
pub trait SchemaOps: Send + Sync {
    /// Applied version; any failure or unparsable value reads as [`NO_SCHEMA`].
    async fn stored_version(&self) -> i64;

    /// Run `statements` and record `version`, all in one transaction.
    async fn apply(&self, statements: &[&str], version: i64) -> Result<(), DatabaseError>;
}

/// Bring the schema up to [`CURRENT_VERSION`].
pub async fn ensure_schema<S>(ops: &S, catalog: &SchemaCatalog) -> Result<(), DatabaseError>
where
    S: SchemaOps + ?Sized,
{
    let stored = ops.stored_version().await;
    match catalog.plan(stored)? {
        MigrationPlan::UpToDate => {
            debug!(version = stored, "Schema up to date");
        }
        MigrationPlan::Create => {
            ops.apply(catalog.create, CURRENT_VERSION)
                .await
                .map_err(|e| e.context("create schema"))?;
            info!(version = CURRENT_VERSION, "Schema created");
        }
        MigrationPlan::Upgrade(steps) => {
            for step in steps {
                ops.apply(step.statements, step.version)
                    .await
                    .map_err(|e| e.context(&format!("upgrade to version {}", step.version)))?;
                info!(version = step.version, "Schema upgraded");
            }
        }
    }
    Ok(())
}

/// Parse a stored version value.
pub(crate) fn parse_version(value: Option<&str>) -> i64 {
    value
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(NO_SCHEMA)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    static CATALOG: SchemaCatalog = SchemaCatalog {
        create: &["create a", "create b"],
        upgrades: &[Upgrade {
            version: 2,
            statements: &["create b"],
        }],
    };

    /// Records applied steps; fails any statement listed in `fail_on`.
    struct FakeSchema {
        version: Mutex<i64>,
        applied: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl FakeSchema {
        fn at(version: i64) -> Self {
            Self {
                version: Mutex::new(version),
                applied: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }
    }

    #[async_trait]
    impl SchemaOps for FakeSchema {
        async fn stored_version(&self) -> i64 {
            *self.version.lock().unwrap()
        }

        async fn apply(&self, statements: &[&str], version: i64) -> Result<(), DatabaseError> {
            if let Some(bad) = self.fail_on.filter(|bad| statements.contains(bad)) {
                return Err(DatabaseError::Migration(format!("{bad} failed")));
            }
            self.applied
                .lock()
                .unwrap()
                .extend(statements.iter().map(ToString::to_string));
            *self.version.lock().unwrap() = version;
            Ok(())
        }
    }

    #[test]
    fn plan_covers_every_state() {
        assert_eq!(CATALOG.plan(NO_SCHEMA).unwrap(), MigrationPlan::Create);
        assert_eq!(CATALOG.plan(0).unwrap(), MigrationPlan::Create);
        assert_eq!(CATALOG.plan(2).unwrap(), MigrationPlan::UpToDate);
        match CATALOG.plan(1).unwrap() {
            MigrationPlan::Upgrade(steps) => {
                assert_eq!(steps.len(), 1);
                assert_eq!(steps[0].version, 2);
            }
            other => panic!("expected upgrade, got {other:?}"),
        }
        assert!(matches!(
            CATALOG.plan(3),
            Err(DatabaseError::Migration(_))
        ));
    }

    #[test]
    fn parse_version_falls_back_to_sentinel() {
        assert_eq!(parse_version(Some("2")), 2);
        assert_eq!(parse_version(Some(" 1 ")), 1);
        assert_eq!(parse_version(Some("two")), NO_SCHEMA);
        assert_eq!(parse_version(None), NO_SCHEMA);
    }

    #[tokio::test]
    async fn fresh_database_gets_full_create() {
        let fake = FakeSchema::at(NO_SCHEMA);
        ensure_schema(&fake, &CATALOG).await.unwrap();
        assert_eq!(*fake.version.lock().unwrap(), CURRENT_VERSION);
        assert_eq!(*fake.applied.lock().unwrap(), vec!["create a", "create b"]);
    }

    #[tokio::test]
    async fn old_database_runs_upgrades_only() {
        let fake = FakeSchema::at(1);
        ensure_schema(&fake, &CATALOG).await.unwrap();
        assert_eq!(*fake.version.lock().unwrap(), 2);
        assert_eq!(*fake.applied.lock().unwrap(), vec!["create b"]);
    }

    #[tokio::test]
    async fn current_database_is_untouched() {
        let fake = FakeSchema::at(CURRENT_VERSION);
        ensure_schema(&fake, &CATALOG).await.unwrap();
        assert!(fake.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_upgrade_keeps_prior_version() {
        let fake = FakeSchema {
            fail_on: Some("create b"),
            ..FakeSchema::at(1)
        };
        let err = ensure_schema(&fake, &CATALOG).await.unwrap_err();
        assert!(err.to_string().contains("upgrade to version 2"));
        assert_eq!(*fake.version.lock().unwrap(), 1);
    }
}
