use tracing::debug;
use ulid::Ulid;

use crate::calendar::{horizon_target, project_range};
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Extend the calendar of `resource_id` so it reaches `today + N months`.
    /// Returns the number of newly projected days.
    pub async fn ensure_horizon(&self, resource_id: Ulid) -> Result<usize, EngineError> {
        let mut guard = self.write_resource(resource_id).await?;
        self.ensure_horizon_locked(&mut guard).await
    }

    /// Same as [`Engine::ensure_horizon`] for a caller already holding the
    /// resource's write lock. Only dates after the current horizon are ever
    /// projected; existing days are left alone.
    pub(super) async fn ensure_horizon_locked(
        &self,
        rs: &mut ResourceState,
    ) -> Result<usize, EngineError> {
        if !rs.active {
            return Ok(0);
        }
        let today = self.clock.today();
        let target = horizon_target(today, self.horizon_months);
        // A fresh resource seeds from today, never from an earlier date.
        let from = match rs.latest_day() {
            Some(latest) if latest >= target => return Ok(0),
            Some(latest) => match latest.succ_opt() {
                Some(next) => next,
                None => return Ok(0),
            },
            None => today,
        };

        let days = project_range(&rs.schedule, from, target);
        let count = days.len();
        if count == 0 {
            return Ok(0);
        }
        debug!(resource = %rs.id, %from, %target, count, "extending horizon");
        let event = Event::DaysProjected {
            resource_id: rs.id,
            days,
        };
        self.persist_and_apply(rs, &event).await?;
        metrics::counter!(crate::observability::DAYS_PROJECTED_TOTAL).increment(count as u64);
        Ok(count)
    }
}
