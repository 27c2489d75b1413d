use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{error, info};

use crate::engine::Engine;
use crate::limits::*;
use crate::reaper;

#[derive(Debug)]
pub enum TenantError {
    NameTooLong,
    /// Nothing usable left once the name is reduced to a file stem.
    InvalidName(String),
    TooManyTenants,
    Open { tenant: String, source: io::Error },
}

impl TenantError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            TenantError::NameTooLong | TenantError::InvalidName(_) => "3D000",
            TenantError::TooManyTenants => "53300",
            TenantError::Open { .. } => "58030",
        }
    }
}

impl fmt::Display for TenantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantError::NameTooLong => write!(f, "database name too long"),
            TenantError::InvalidName(name) => write!(f, "invalid database name {name:?}"),
            TenantError::TooManyTenants => write!(f, "too many databases"),
            TenantError::Open { tenant, source } => write!(f, "cannot open database {tenant}: {source}"),
        }
    }
}

impl std::error::Error for TenantError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TenantError::Open { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Reduce a database name to `[A-Za-z0-9_-]`. The result names both the
/// ledger file and the engine, so names that differ only in stripped
/// characters share one marketplace.
fn file_stem(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// One marketplace per database name, opened on first connect. Each gets
/// its own ledger, hold reaper, and compactor.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    pub fn get_or_create(&self, tenant: &str) -> Result<Arc<Engine>, TenantError> {
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(TenantError::NameTooLong);
        }
        let stem = file_stem(tenant);
        if stem.is_empty() {
            return Err(TenantError::InvalidName(tenant.to_string()));
        }
        if let Some(engine) = self.engines.get(&stem) {
            return Ok(engine.value().clone());
        }
        // Checked outside the entry; len() takes every shard lock.
        if self.engines.len() >= MAX_TENANTS {
            return Err(TenantError::TooManyTenants);
        }

        // Racing first connections must end up on the same engine.
        let entry = match self.engines.entry(stem.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => e,
        };
        let path = self.data_dir.join(format!("{stem}.wal"));
        let engine = match Engine::new(path) {
            Ok(engine) => Arc::new(engine),
            Err(source) => {
                error!("failed to open tenant {stem}: {source}");
                return Err(TenantError::Open { tenant: stem, source });
            }
        };
        entry.insert(engine.clone());

        tokio::spawn(reaper::run_reaper(engine.clone()));
        tokio::spawn(reaper::run_compactor(engine.clone(), self.compact_threshold));
        info!("opened tenant {stem}");
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.tenant_count() as f64);
        Ok(engine)
    }

    pub fn tenant_count(&self) -> usize {
        self.engines.len()
    }
}
