use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::calendar::{project_day, year_end};
use crate::limits::*;
use crate::model::*;
use crate::pricing::{validate, PricingRuleSet};

use super::{apply_event, Engine, EngineError};

/// A resource as the owner registers it.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub id: Ulid,
    pub owner: String,
    pub name: Option<String>,
    pub sport: Option<String>,
    pub schedule: WeeklySchedule,
    pub pricing: PricingRuleSet,
}

/// Outcome of a weekly schedule edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleChange {
    pub reprojected: usize,
    /// Days left untouched because they hold confirmed bookings or were
    /// closed by the owner.
    pub skipped: Vec<NaiveDate>,
}

fn check_label(value: &Option<String>, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > MAX_NAME_LEN => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

impl Engine {
    fn check_not_past(&self, date: NaiveDate) -> Result<(), EngineError> {
        if date < self.clock.today() {
            return Err(EngineError::Invalid(format!("date {date} is in the past")));
        }
        Ok(())
    }

    /// Register a resource and project its initial horizon.
    pub async fn create_resource(&self, new: NewResource) -> Result<ResourceInfo, EngineError> {
        if new.owner.is_empty() {
            return Err(EngineError::Invalid("owner must not be empty".into()));
        }
        check_label(&new.name, "resource name too long")?;
        check_label(&new.sport, "sport name too long")?;
        let errors = validate(&new.pricing);
        if !errors.is_empty() {
            return Err(EngineError::ValidationFailed(errors));
        }
        let catalog = self.catalog.lock().await;
        if self.state.contains_key(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        if self.state.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }

        let id = new.id;
        let event = Event::ResourceCreated {
            id,
            owner: new.owner,
            name: new.name,
            sport: new.sport,
            schedule: new.schedule,
            pricing: new.pricing,
        };
        self.wal_append(&event).await?;
        apply_event(&self.state, &self.booking_to_resource, None, &event);
        drop(catalog);
        self.notify.send(id, &event);
        info!(resource = %id, "resource created");

        let mut guard = self.write_resource(id).await?;
        self.ensure_horizon_locked(&mut guard).await?;
        Ok(guard.info())
    }

    /// Soft-deactivate. Existing data stays readable; new bookings fail.
    pub async fn deactivate_resource(&self, id: Ulid, requester: &str) -> Result<(), EngineError> {
        let mut guard = self.write_resource(id).await?;
        self.require_admin(&guard, requester).await?;
        if !guard.active {
            return Err(EngineError::Inactive(id));
        }
        let event = Event::ResourceDeactivated { id };
        self.persist_and_apply(&mut guard, &event).await?;
        self.pricing_cache.invalidate(&id);
        info!(resource = %id, "resource deactivated");
        Ok(())
    }

    /// Replace the rule set. Existing bookings keep the price they were sold at.
    pub async fn update_pricing(
        &self,
        resource_id: Ulid,
        pricing: PricingRuleSet,
        requester: &str,
    ) -> Result<(), EngineError> {
        let errors = validate(&pricing);
        if !errors.is_empty() {
            return Err(EngineError::ValidationFailed(errors));
        }
        let mut guard = self.write_resource(resource_id).await?;
        self.require_admin(&guard, requester).await?;
        let event = Event::PricingUpdated {
            resource_id,
            pricing,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        self.pricing_cache.invalidate(&resource_id);
        Ok(())
    }

    /// Change one weekday's hours and re-project the affected days from today
    /// through the end of the year (or the horizon, when further out).
    pub async fn update_weekly_schedule(
        &self,
        resource_id: Ulid,
        weekday: u8,
        enabled: bool,
        open: Option<SlotTime>,
        close: Option<SlotTime>,
        requester: &str,
    ) -> Result<ScheduleChange, EngineError> {
        if weekday > 6 {
            return Err(EngineError::Invalid(format!(
                "bad weekday {weekday} (expected 0-6, Sunday first)"
            )));
        }
        let mut guard = self.write_resource(resource_id).await?;
        self.require_admin(&guard, requester).await?;
        if !guard.active {
            return Err(EngineError::Inactive(resource_id));
        }

        let current = guard.schedule.days[weekday as usize];
        let entry = match (enabled, open, close) {
            (true, Some(open), Some(close)) => DaySchedule { enabled, open, close },
            (true, _, _) => {
                return Err(EngineError::Invalid(
                    "an enabled weekday needs open and close times".into(),
                ));
            }
            (false, open, close) => DaySchedule {
                enabled,
                open: open.unwrap_or(current.open),
                close: close.unwrap_or(current.close),
            },
        };

        let mut schedule = guard.schedule;
        schedule.days[weekday as usize] = entry;

        let today = self.clock.today();
        let last = match guard.latest_day() {
            Some(latest) => latest.max(year_end(today)),
            None => year_end(today),
        };
        let mut days = Vec::new();
        let mut skipped = Vec::new();
        for date in today.iter_days().take_while(|d| *d <= last) {
            match guard.days.get(&date) {
                // Dates never projected are filled for every weekday so the
                // calendar stays contiguous.
                None => days.push(project_day(&schedule, date)),
                Some(_) if weekday_index(date) != weekday => {}
                Some(_) => {
                    if guard.owner_closed.contains(&date)
                        || guard.confirmed_on(date).next().is_some()
                    {
                        skipped.push(date);
                    } else {
                        days.push(project_day(&schedule, date));
                    }
                }
            }
        }

        let reprojected = days.len();
        let event = Event::ScheduleUpdated {
            resource_id,
            weekday,
            entry,
            days,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::DAYS_PROJECTED_TOTAL).increment(reprojected as u64);
        info!(
            resource = %resource_id,
            weekday,
            reprojected,
            skipped = skipped.len(),
            "weekly schedule updated"
        );
        Ok(ScheduleChange {
            reprojected,
            skipped,
        })
    }

    /// Close a day and cancel every confirmed booking on it. Returns how many
    /// bookings were cancelled.
    pub async fn close_day(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        requester: &str,
    ) -> Result<usize, EngineError> {
        self.check_not_past(date)?;
        let mut guard = self.write_resource(resource_id).await?;
        self.require_admin(&guard, requester).await?;
        self.ensure_horizon_locked(&mut guard).await?;
        if !guard.days.contains_key(&date) {
            return Err(EngineError::NotFound(format!("calendar day {date}")));
        }
        if guard.owner_closed.contains(&date) {
            return Ok(0);
        }

        let cancelled = guard.confirmed_on(date).count();
        let event = Event::DayClosed { resource_id, date };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(cancelled as u64);
        info!(resource = %resource_id, %date, cancelled, "day closed");
        Ok(cancelled)
    }

    /// Regenerate an owner-closed day from the weekly schedule. Bookings
    /// cancelled by the closure stay cancelled.
    pub async fn reopen_day(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        requester: &str,
    ) -> Result<CalendarDay, EngineError> {
        self.check_not_past(date)?;
        let mut guard = self.write_resource(resource_id).await?;
        self.require_admin(&guard, requester).await?;
        if !guard.days.contains_key(&date) {
            return Err(EngineError::NotFound(format!("calendar day {date}")));
        }
        if !guard.owner_closed.contains(&date) {
            return Err(EngineError::Invalid(format!("day {date} is not closed")));
        }

        let day = project_day(&guard.schedule, date);
        let event = Event::DayReopened {
            resource_id,
            day: day.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(resource = %resource_id, %date, "day reopened");
        Ok(day)
    }

    /// Toggle one slot. Disabling a booked slot cancels the booking holding
    /// it; enabling a booked slot is refused.
    pub async fn set_slot_enabled(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
        time: SlotTime,
        enabled: bool,
        requester: &str,
    ) -> Result<CalendarDay, EngineError> {
        self.check_not_past(date)?;
        let mut guard = self.write_resource(resource_id).await?;
        self.require_admin(&guard, requester).await?;
        let day = guard
            .days
            .get(&date)
            .ok_or_else(|| EngineError::NotFound(format!("calendar day {date}")))?;
        if day.closed {
            return Err(EngineError::Closed(date));
        }
        if day.slot(time).is_none() {
            return Err(EngineError::SlotNotFound { date, time });
        }
        let occupant = guard.occupant(date, time).map(|b| b.id);
        if enabled && let Some(booking) = occupant {
            return Err(EngineError::Conflict {
                date,
                time,
                booking,
            });
        }

        let event = Event::SlotToggled {
            resource_id,
            date,
            time,
            enabled,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        if let Some(booking) = occupant {
            metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
            info!(%booking, resource = %resource_id, %date, %time, "booking cancelled by slot closure");
        }
        guard
            .days
            .get(&date)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("calendar day {date}")))
    }
}
