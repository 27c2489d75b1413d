use ulid::Ulid;

use crate::model::*;

use super::conflict::validate_window;
use super::{Engine, EngineError};

impl Engine {
    /// Confirmed-booking revenue per homestay. A booking counts toward the
    /// window its check-in falls in.
    pub async fn revenue(
        &self,
        host_id: Option<&str>,
        window: Option<(Ms, Ms)>,
    ) -> Result<Vec<RevenueRow>, EngineError> {
        let window = window
            .map(|(start, end)| validate_window(start, end))
            .transpose()?;

        let mut rows = Vec::new();
        for homestay in self.list_homestays(host_id).await {
            let room_ids: Vec<Ulid> = self
                .children
                .get(&homestay.id)
                .map(|k| k.value().clone())
                .unwrap_or_default();
            let mut row = RevenueRow {
                homestay_id: homestay.id,
                host_id: homestay.host_id,
                ..RevenueRow::default()
            };

            for rid in room_ids {
                let Some(rs) = self.get_listing(&rid) else {
                    continue;
                };
                let guard = rs.read().await;
                for interval in &guard.intervals {
                    let IntervalKind::Booking { stay, .. } = &interval.kind else {
                        continue;
                    };
                    if window.is_some_and(|w| !w.contains_instant(interval.span.start)) {
                        continue;
                    }
                    let q = &stay.quote;
                    row.bookings += 1;
                    row.nights += q.nights;
                    row.gross += q.total;
                    row.discounts += q.discount;
                    row.service_fees += q.service_fee;
                    row.commission += q.commission;
                    row.host_payout += q.host_payout;
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }
}
