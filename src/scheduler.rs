use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{EventStore, StoreError};
use crate::images::ImageResolver;
use crate::message::{self, MessageKind};
use crate::models::Event;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("could not select events: {0}")]
    Store(#[from] StoreError),
    #[error("batch aborted after {sent} messages: {source}")]
    Aborted {
        sent: usize,
        #[source]
        source: TransportError,
    },
    #[error("look-ahead of {days_ahead} days leaves the calendar")]
    InvalidWindow { days_ahead: i64 },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub selected: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Runs the announcement passes and records which events were handled.
pub struct Notifier<S, T, I> {
    store: S,
    transport: T,
    images: I,
    tz: Tz,
    days_ahead: i64,
    dry_run: bool,
}

impl<S, T, I> Notifier<S, T, I>
where
    S: EventStore,
    T: Transport,
    I: ImageResolver,
{
    pub fn new(store: S, transport: T, images: I, tz: Tz, days_ahead: i64) -> Self {
        Self {
            store,
            transport,
            images,
            tz,
            days_ahead,
            dry_run: false,
        }
    }

    /// Sends without marking anything as reported.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Announces every event not yet announced as new. A fatal transport
    /// error stops the batch; any other send failure leaves the event for the
    /// next run.
    pub async fn send_fresh(
        &self,
        receiver: &str,
        now: DateTime<Utc>,
    ) -> Result<PassReport, NotifyError> {
        let events = self.store.list_fresh(now)?;
        let mut report = PassReport {
            selected: events.len(),
            ..PassReport::default()
        };

        for mut event in events {
            match self.deliver(receiver, &event, MessageKind::Fresh).await {
                Ok(()) => {
                    report.sent += 1;
                    event.reported_at_new = Some(now);
                    self.mark(&event, &mut report);
                }
                Err(err) if err.is_fatal() => {
                    warn!(link = %event.link, %err, "fatal send error, aborting fresh pass");
                    return Err(NotifyError::Aborted {
                        sent: report.sent,
                        source: err,
                    });
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(link = %event.link, %err, "could not announce new event");
                }
            }
        }

        info!(?report, "fresh pass finished");
        Ok(report)
    }

    /// Sends the digest of events inside the look-ahead window. Send failures
    /// never abort the batch.
    pub async fn send_upcoming(
        &self,
        receiver: &str,
        now: DateTime<Utc>,
    ) -> Result<PassReport, NotifyError> {
        let (from, to) =
            upcoming_window(now, self.tz, self.days_ahead).ok_or(NotifyError::InvalidWindow {
                days_ahead: self.days_ahead,
            })?;
        debug!(%from, %to, "upcoming window");

        let events = self.store.list_in_window(from, to)?;
        let mut report = PassReport {
            selected: events.len(),
            ..PassReport::default()
        };

        for mut event in events {
            match self.deliver(receiver, &event, MessageKind::Upcoming).await {
                Ok(()) => {
                    report.sent += 1;
                    event.reported_at_upcoming = Some(now);
                    self.mark(&event, &mut report);
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(link = %event.link, %err, "could not send upcoming event");
                }
            }
        }

        info!(?report, "upcoming pass finished");
        Ok(report)
    }

    async fn deliver(
        &self,
        receiver: &str,
        event: &Event,
        kind: MessageKind,
    ) -> Result<(), TransportError> {
        let image = self.images.resolve(event).await;
        let text = message::compose(event, kind, self.tz);
        self.transport.send_with_image(receiver, &text, image).await
    }

    fn mark(&self, event: &Event, report: &mut PassReport) {
        if self.dry_run {
            return;
        }
        if let Err(err) = self.store.save(event) {
            report.failed += 1;
            warn!(link = %event.link, %err, "sent but could not mark event as reported");
        }
    }
}

/// `[start of today, last second of the month that contains today + days_ahead]`,
/// with day and month boundaries taken in `tz`. `None` when `days_ahead` is
/// negative or runs past the representable calendar.
pub fn upcoming_window(
    now: DateTime<Utc>,
    tz: Tz,
    days_ahead: i64,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let today = now.with_timezone(&tz).date_naive();
    let target = u64::try_from(days_ahead)
        .ok()
        .and_then(|days| today.checked_add_days(Days::new(days)))?;
    let (year, month) = if target.month() == 12 {
        (target.year().checked_add(1)?, 1)
    } else {
        (target.year(), target.month() + 1)
    };
    let next_month = NaiveDate::from_ymd_opt(year, month, 1)?;

    let from = local_midnight(today, tz);
    let to = local_midnight(next_month, tz) - Duration::seconds(1);
    Some((from, to))
}

/// Start of `date` in `tz`. When a DST jump skips midnight the day starts at
/// the first local time that exists.
fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..=24 * 60)
        .find_map(|minutes| {
            tz.from_local_datetime(&(midnight + Duration::minutes(minutes)))
                .earliest()
        })
        .unwrap_or_else(|| tz.from_utc_datetime(&midnight))
        .with_timezone(&Utc)
}
