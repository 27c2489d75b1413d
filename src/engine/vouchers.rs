use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError, VoucherState};

/// Voucher codes are matched case-insensitively and stored uppercase.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn check_voucher(v: &Voucher) -> Result<(), EngineError> {
    if v.code.is_empty() {
        return Err(EngineError::InvalidArgument("voucher code is required".into()));
    }
    if v.code.len() > MAX_CODE_LEN {
        return Err(EngineError::LimitExceeded("voucher code too long"));
    }
    if !v.code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(EngineError::InvalidArgument(format!(
            "voucher code {} may only hold letters, digits, '-' and '_'",
            v.code
        )));
    }
    match v.kind {
        DiscountKind::Percentage { basis_points } if basis_points == 0 || basis_points > 10_000 => {
            return Err(EngineError::InvalidArgument(
                "percentage must be between 1 and 10000 basis points".into(),
            ));
        }
        DiscountKind::Fixed { amount } if amount <= 0 => {
            return Err(EngineError::InvalidArgument("fixed discount must be positive".into()));
        }
        _ => {}
    }
    if v.usage_limit == Some(0) {
        return Err(EngineError::InvalidArgument("usage_limit must be at least 1".into()));
    }
    if v.min_subtotal < 0 {
        return Err(EngineError::InvalidArgument("min_subtotal cannot be negative".into()));
    }
    if v.expires_at <= now_ms() {
        return Err(EngineError::InvalidArgument("voucher would already be expired".into()));
    }
    Ok(())
}

impl Engine {
    pub async fn create_voucher(&self, mut voucher: Voucher) -> Result<(), EngineError> {
        voucher.code = normalize_code(&voucher.code);
        check_voucher(&voucher)?;

        let _catalog = self.catalog.lock().await;
        if self.vouchers.len() >= MAX_VOUCHERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many vouchers"));
        }
        if self.vouchers.contains_key(&voucher.code) {
            return Err(EngineError::VoucherExists(voucher.code));
        }

        let event = Event::VoucherCreated {
            voucher: voucher.clone(),
            redemptions: Vec::new(),
        };
        self.wal_append(&event).await?;
        info!("created voucher {}", voucher.code);
        self.vouchers
            .insert(voucher.code.clone(), Arc::new(Mutex::new(VoucherState::new(voucher))));
        Ok(())
    }

    /// Remove a voucher. Stays that already redeemed it keep their discount.
    pub async fn delete_voucher(&self, code: &str) -> Result<(), EngineError> {
        let code = normalize_code(code);
        let _catalog = self.catalog.lock().await;
        let voucher = self
            .get_voucher(&code)
            .ok_or_else(|| EngineError::VoucherNotFound(code.clone()))?;
        // Wait out any redemption in flight.
        let _guard = voucher.lock().await;

        let event = Event::VoucherDeleted { code: code.clone() };
        self.wal_append(&event).await?;
        self.vouchers.remove(&code);
        info!("deleted voucher {code}");
        Ok(())
    }

    pub async fn list_vouchers(&self) -> Vec<VoucherInfo> {
        let shared: Vec<_> = self.vouchers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for v in shared {
            let vs = v.lock().await;
            let used = vs.used();
            out.push(VoucherInfo {
                voucher: vs.voucher.clone(),
                used,
                remaining: vs.voucher.usage_limit.map(|limit| limit.saturating_sub(used)),
            });
        }
        out.sort_by(|a, b| a.voucher.code.cmp(&b.voucher.code));
        out
    }

    /// Lock a voucher for a read-check-redeem sequence.
    pub(super) async fn lock_voucher(&self, code: &str) -> Result<OwnedMutexGuard<VoucherState>, EngineError> {
        let code = normalize_code(code);
        let voucher = self
            .get_voucher(&code)
            .ok_or(EngineError::VoucherNotFound(code))?;
        Ok(voucher.lock_owned().await)
    }
}
