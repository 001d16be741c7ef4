use time::{Duration, OffsetDateTime};

/// Runs the expiry sweep at most once per interval, piggybacking on requests.
#[derive(Debug, Clone)]
pub struct PurgeSchedule {
    pub interval: Duration,
    pub next_run: OffsetDateTime,
}

impl PurgeSchedule {
    pub fn new(interval: Duration, now: OffsetDateTime) -> Self {
        Self {
            interval,
            next_run: now + interval,
        }
    }

    /// True when a sweep is due; advances the next run if so.
    pub fn take_due(&mut self, now: OffsetDateTime) -> bool {
        if now < self.next_run {
            return false;
        }
        self.next_run = now + self.interval;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_once_per_interval() {
        let start = OffsetDateTime::now_utc();
        let mut schedule = PurgeSchedule::new(Duration::minutes(1), start);
        assert!(!schedule.take_due(start));
        assert!(schedule.take_due(start + Duration::minutes(1)));
        assert!(!schedule.take_due(start + Duration::seconds(90)));
        assert!(schedule.take_due(start + Duration::minutes(2)));
    }
}
