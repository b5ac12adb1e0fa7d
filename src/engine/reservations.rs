use chrono::NaiveDate;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::pricing::resolve_price;

use super::{Engine, EngineError};

/// Inputs of a reservation.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub start: SlotTime,
    pub duration: BookingDuration,
    pub requester: String,
    pub party_size: Option<u32>,
}

/// Slots a new booking of `duration` starting at `start` would hold.
fn requested_slots(
    date: NaiveDate,
    start: SlotTime,
    duration: BookingDuration,
) -> Result<Vec<SlotTime>, EngineError> {
    let mut times = vec![start];
    if duration == BookingDuration::OneAndHalfHours {
        let next = start.next_slot().ok_or(EngineError::SlotNotFound {
            date,
            time: SlotTime::END_OF_DAY,
        })?;
        times.push(next);
    }
    Ok(times)
}

/// One slot must exist, hold no confirmed booking and be enabled.
fn check_slot(rs: &ResourceState, day: &CalendarDay, time: SlotTime) -> Result<(), EngineError> {
    let date = day.date;
    let slot = day.slot(time).ok_or(EngineError::SlotNotFound { date, time })?;
    if let Some(existing) = rs.occupant(date, time) {
        metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict {
            date,
            time,
            booking: existing.id,
        });
    }
    if !slot.enabled {
        return Err(EngineError::SlotUnavailable { date, time });
    }
    Ok(())
}

impl Engine {
    /// Reserve one or two consecutive slots. Every slot is checked before
    /// anything is written, and the whole sequence runs under the resource's
    /// write lock.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        if req.requester.is_empty() {
            return Err(EngineError::Invalid("requester must not be empty".into()));
        }
        if req.requester.len() > MAX_REQUESTER_LEN {
            return Err(EngineError::LimitExceeded("requester name too long"));
        }
        if let Some(n) = req.party_size
            && (n == 0 || n > MAX_PARTY_SIZE)
        {
            return Err(EngineError::Invalid(format!(
                "party size must be 1-{MAX_PARTY_SIZE}, got {n}"
            )));
        }
        if req.date < self.clock.today() {
            return Err(EngineError::Invalid(format!("date {} is in the past", req.date)));
        }

        let mut guard = self.write_resource(req.resource_id).await?;
        if !guard.active {
            return Err(EngineError::Inactive(req.resource_id));
        }
        if !self.authorizer.can_book(&req.requester, &guard.info()).await {
            return Err(EngineError::Forbidden(format!(
                "{} may not book resource {}",
                req.requester, req.resource_id
            )));
        }
        if self.booking_to_resource.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }

        self.ensure_horizon_locked(&mut guard).await?;

        let day = guard
            .days
            .get(&req.date)
            .ok_or_else(|| EngineError::NotFound(format!("calendar day {}", req.date)))?;
        if day.closed {
            return Err(EngineError::Closed(req.date));
        }
        for time in requested_slots(req.date, req.start, req.duration)? {
            check_slot(&guard, day, time)?;
        }
        let end = req
            .start
            .plus_minutes(req.duration.minutes())
            .ok_or_else(|| EngineError::Invalid(format!("booking at {} runs past midnight", req.start)))?;

        let quote = resolve_price(
            &guard.pricing,
            req.date,
            req.start,
            req.duration,
            req.party_size,
        );
        let booking = Booking {
            id: req.id,
            resource_id: req.resource_id,
            date: req.date,
            start: req.start,
            end,
            duration: req.duration,
            price: quote.total,
            per_person: quote.per_person,
            party_size: req.party_size,
            pricing_level: quote.level,
            requester: req.requester,
            status: BookingStatus::Confirmed,
        };

        let event = Event::BookingConfirmed {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            booking = %booking.id,
            resource = %booking.resource_id,
            date = %booking.date,
            start = %booking.start,
            duration = %booking.duration,
            price = %booking.price,
            "booking confirmed"
        );
        Ok(booking)
    }

    /// Cancel a confirmed booking and release its slots. The booker and the
    /// resource's administrators may cancel.
    pub async fn cancel_booking(&self, id: Ulid, requester: &str) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let booking = guard
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;

        if booking.requester != requester
            && !self.authorizer.can_administer(requester, &guard.info()).await
        {
            return Err(EngineError::Forbidden(format!(
                "{requester} may not cancel booking {id}"
            )));
        }
        if !booking.is_confirmed() {
            return Err(EngineError::AlreadyCancelled(id));
        }
        if !guard.days.contains_key(&booking.date) {
            warn!(
                booking = %id,
                resource = %booking.resource_id,
                date = %booking.date,
                "calendar day missing on cancel, slots not restored"
            );
        }

        let event = Event::BookingCancelled {
            id,
            resource_id: booking.resource_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(booking = %id, resource = %booking.resource_id, "booking cancelled");

        Ok(Booking {
            status: BookingStatus::Cancelled,
            ..booking
        })
    }
}
