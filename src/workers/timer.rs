use super::traits::Worker;
use crate::channels::ReplySink;
use crate::config::TimerConfig;
use crate::event::InboundEvent;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    #[error("cannot parse duration '{0}', expected e.g. 1h 30m 20s")]
    CannotParse(String),
    #[error("duration too short, minimum is {0}")]
    TooShort(String),
    #[error("duration too long, maximum is {0}")]
    TooLong(String),
}

/// Parses `1h30m`, `1h 30m 20s`, `45s` into a duration within the
/// configured bounds. Every number needs an `h`, `m` or `s` suffix.
pub fn parse_duration(text: &str, bounds: &TimerConfig) -> Result<Duration, TimerError> {
    let cannot_parse = || TimerError::CannotParse(text.to_string());
    let mut total: u64 = 0;
    let mut number: Option<u64> = None;

    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            let n = number.unwrap_or(0);
            number = Some(
                n.checked_mul(10)
                    .and_then(|n| n.checked_add(u64::from(digit)))
                    .ok_or_else(cannot_parse)?,
            );
            continue;
        }
        if c.is_whitespace() {
            if number.is_some() {
                return Err(cannot_parse());
            }
            continue;
        }
        let unit = match c.to_ascii_lowercase() {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(cannot_parse()),
        };
        let n = number.take().ok_or_else(cannot_parse)?;
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(cannot_parse)?;
    }
    if number.is_some() {
        return Err(cannot_parse());
    }

    if total < bounds.min_secs {
        return Err(TimerError::TooShort(describe(Duration::from_secs(
            bounds.min_secs,
        ))));
    }
    if total > bounds.max_secs {
        return Err(TimerError::TooLong(describe(Duration::from_secs(
            bounds.max_secs,
        ))));
    }
    Ok(Duration::from_secs(total))
}

/// `01h 30m 05s`
pub fn describe(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!(
        "{:02}h {:02}m {:02}s",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// Countdown that reports progress to the chat it was started from.
pub struct TimerWorker {
    deadline: Instant,
    update_interval: Duration,
    origin: InboundEvent,
    reply: Arc<dyn ReplySink>,
}

impl TimerWorker {
    pub fn new(
        duration: Duration,
        update_interval: Duration,
        origin: InboundEvent,
        reply: Arc<dyn ReplySink>,
    ) -> Self {
        Self {
            deadline: Instant::now() + duration,
            update_interval,
            origin,
            reply,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn chat_id(&self) -> i64 {
        self.origin.chat_id
    }

    async fn post(&self, text: &str) {
        if let Err(e) = self.reply.reply(&self.origin, text).await {
            warn!(chat = self.origin.chat_id, "timer reply failed: {e:#}");
        }
    }
}

#[async_trait]
impl Worker for TimerWorker {
    async fn run(&self, token: CancellationToken) -> anyhow::Result<()> {
        self.post(&format!("Timer started: {}", describe(self.remaining())))
            .await;

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.update_interval, self.update_interval);
        let finished = tokio::time::sleep_until(self.deadline);
        tokio::pin!(finished);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => return Ok(()),
                () = &mut finished => break,
                _ = ticker.tick() => {
                    self.post(&format!("Time left: {}", describe(self.remaining()))).await;
                }
            }
        }

        self.post("Timer finished").await;
        Ok(())
    }

    async fn on_pre_stop(&self) {
        self.post(&format!(
            "Timer cancelled with {} left",
            describe(self.remaining())
        ))
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Sender;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl ReplySink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn reply(&self, _event: &InboundEvent, text: &str) -> anyhow::Result<()> {
            self.0.lock().push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn parses_suffixed_parts() {
        let bounds = TimerConfig::default();
        assert_eq!(
            parse_duration("1h 30m 20s", &bounds),
            Ok(Duration::from_secs(5420))
        );
        assert_eq!(parse_duration("1h30m", &bounds), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("45S", &bounds), Ok(Duration::from_secs(45)));
    }

    #[test]
    fn rejects_malformed_input() {
        let bounds = TimerConfig::default();
        for bad in ["", "abc", "10", "10x", "h", "1 h", "-5s"] {
            let result = parse_duration(bad, &bounds);
            assert!(result.is_err(), "{bad:?} should not parse");
        }
        assert!(matches!(
            parse_duration("10", &bounds),
            Err(TimerError::CannotParse(_))
        ));
    }

    #[test]
    fn enforces_bounds() {
        let bounds = TimerConfig::default();
        assert!(matches!(
            parse_duration("4s", &bounds),
            Err(TimerError::TooShort(_))
        ));
        assert!(matches!(
            parse_duration("31h", &bounds),
            Err(TimerError::TooLong(_))
        ));
        assert_eq!(parse_duration("30h", &bounds), Ok(Duration::from_secs(108_000)));
    }

    #[test]
    fn describe_pads_fields() {
        assert_eq!(describe(Duration::from_secs(3725)), "01h 02m 05s");
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_and_reports() {
        let sink = Arc::new(Recording::default());
        let origin = InboundEvent::text(5, Some(Sender::user(1)), "/timer 25s");
        let timer = TimerWorker::new(
            Duration::from_secs(25),
            Duration::from_secs(10),
            origin,
            Arc::clone(&sink) as Arc<dyn ReplySink>,
        );
        timer.run(CancellationToken::new()).await.unwrap();

        let replies = sink.0.lock().clone();
        assert_eq!(
            replies,
            vec![
                "Timer started: 00h 00m 25s".to_string(),
                "Time left: 00h 00m 15s".to_string(),
                "Time left: 00h 00m 05s".to_string(),
                "Timer finished".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_without_finish_message() {
        let sink = Arc::new(Recording::default());
        let origin = InboundEvent::text(5, Some(Sender::user(1)), "/timer 1h");
        let timer = TimerWorker::new(
            Duration::from_secs(3600),
            Duration::from_secs(10),
            origin,
            Arc::clone(&sink) as Arc<dyn ReplySink>,
        );
        let token = CancellationToken::new();
        token.cancel();
        timer.on_pre_stop().await;
        timer.run(token).await.unwrap();

        let replies = sink.0.lock().clone();
        assert!(replies[0].starts_with("Timer cancelled with"));
        assert!(!replies.iter().any(|r| r == "Timer finished"));
    }
}
