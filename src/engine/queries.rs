use chrono::NaiveDate;
use ulid::Ulid;

use crate::calendar::month_bounds;
use crate::limits::*;
use crate::model::*;
use crate::pricing::{resolve_price, PricingRuleSet, Quote};

use super::{Engine, EngineError};

impl Engine {
    /// Calendar days of one `YYYY-MM` month. Extends the horizon first, so a
    /// month inside `today + N months` is always fully covered.
    pub async fn get_calendar_month(
        &self,
        resource_id: Ulid,
        month: &str,
    ) -> Result<Vec<CalendarDay>, EngineError> {
        let (first, last) = month_bounds(month).map_err(EngineError::Invalid)?;
        let mut guard = self.write_resource(resource_id).await?;
        self.ensure_horizon_locked(&mut guard).await?;
        Ok(guard
            .days
            .range(first..=last)
            .map(|(_, day)| day.clone())
            .collect())
    }

    pub async fn get_resource_info(&self, id: Ulid) -> Result<ResourceInfo, EngineError> {
        let rs = self
            .get_resource(&id)
            .ok_or_else(|| EngineError::NotFound(format!("resource {id}")))?;
        let guard = rs.read().await;
        Ok(guard.info())
    }

    /// Every resource, ordered by id.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(resources.len());
        for rs in resources {
            out.push(rs.read().await.info());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let resource_id = self
            .get_resource_for_booking(&id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or_else(|| EngineError::NotFound(format!("resource {resource_id}")))?;
        let guard = rs.read().await;
        guard
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))
    }

    /// Bookings of a resource in any status, ordered by date then start.
    pub async fn list_bookings(
        &self,
        resource_id: Ulid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or_else(|| EngineError::NotFound(format!("resource {resource_id}")))?;
        let guard = rs.read().await;
        let mut bookings: Vec<Booking> = guard
            .bookings
            .values()
            .filter(|b| date.is_none_or(|d| b.date == d))
            .cloned()
            .collect();
        bookings.sort_by_key(|b| (b.date, b.start, b.id));
        Ok(bookings)
    }

    /// Price preview from the cached rule set. Takes no write lock.
    pub async fn quote(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        start: SlotTime,
        duration: BookingDuration,
        party_size: Option<u32>,
    ) -> Result<Quote, EngineError> {
        if let Some(n) = party_size
            && (n == 0 || n > MAX_PARTY_SIZE)
        {
            return Err(EngineError::Invalid(format!(
                "party size must be 1-{MAX_PARTY_SIZE}, got {n}"
            )));
        }
        let rules = self
            .pricing_cache
            .get_or_load(resource_id, || async {
                let rs = self.get_resource(&resource_id)?;
                let guard = rs.read().await;
                Some(guard.pricing.clone())
            })
            .await
            .ok_or_else(|| EngineError::NotFound(format!("resource {resource_id}")))?;
        Ok(resolve_price(&rules, date, start, duration, party_size))
    }

    /// Drop every cached rule set.
    pub fn clear_pricing_cache(&self) {
        self.pricing_cache.clear();
    }

    #[cfg(test)]
    pub(super) fn cached_pricing(&self) -> usize {
        self.pricing_cache.len()
    }

    /// Rule set currently stored for a resource.
    pub async fn pricing_rules(&self, resource_id: Ulid) -> Result<PricingRuleSet, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or_else(|| EngineError::NotFound(format!("resource {resource_id}")))?;
        let guard = rs.read().await;
        Ok(guard.pricing.clone())
    }
}
