use super::*;

use tokio::sync::mpsc;
use tokio::time::Instant;

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

// =============================================================================
// refresh_delay
// =============================================================================

#[test]
fn delay_is_two_minutes_before_expiry() {
    let now = now();
    let expires = now + time::Duration::minutes(5);
    assert_eq!(refresh_delay(expires, now, DEFAULT_REFRESH_LEAD), Duration::from_secs(180));
}

#[test]
fn delay_exactly_at_lead_is_zero() {
    let now = now();
    let expires = now + time::Duration::minutes(2);
    assert_eq!(refresh_delay(expires, now, DEFAULT_REFRESH_LEAD), Duration::ZERO);
}

#[test]
fn delay_inside_lead_window_is_zero() {
    let now = now();
    let expires = now + time::Duration::seconds(30);
    assert_eq!(refresh_delay(expires, now, DEFAULT_REFRESH_LEAD), Duration::ZERO);
}

#[test]
fn delay_for_expired_token_is_zero() {
    let now = now();
    let expires = now - time::Duration::hours(1);
    assert_eq!(refresh_delay(expires, now, DEFAULT_REFRESH_LEAD), Duration::ZERO);
}

#[test]
fn delay_honours_custom_lead() {
    let now = now();
    let expires = now + time::Duration::minutes(10);
    assert_eq!(refresh_delay(expires, now, Duration::from_secs(60)), Duration::from_secs(540));
    assert_eq!(refresh_delay(expires, now, Duration::ZERO), Duration::from_secs(600));
}

// =============================================================================
// RefreshTimer
// =============================================================================

#[tokio::test(start_paused = true)]
async fn timer_fires_after_delay() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut timer = RefreshTimer::new();
    let start = Instant::now();

    timer.schedule(Duration::from_secs(180), move || async move {
        let _ = tx.send(Instant::now());
    });
    assert!(timer.is_pending());

    let fired_at = rx.recv().await.unwrap();
    let waited = fired_at - start;
    assert!(waited >= Duration::from_secs(180));
    assert!(waited < Duration::from_secs(181));
}

#[tokio::test(start_paused = true)]
async fn zero_delay_fires_immediately() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut timer = RefreshTimer::new();
    let start = Instant::now();

    timer.schedule(Duration::ZERO, move || async move {
        let _ = tx.send(Instant::now());
    });

    let fired_at = rx.recv().await.unwrap();
    assert_eq!(fired_at, start);
}

#[tokio::test(start_paused = true)]
async fn rescheduling_cancels_previous_task() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut timer = RefreshTimer::new();

    let first = tx.clone();
    timer.schedule(Duration::from_secs(60), move || async move {
        let _ = first.send("first");
    });
    timer.schedule(Duration::from_secs(120), move || async move {
        let _ = tx.send("second");
    });

    assert_eq!(rx.recv().await, Some("second"));
    // Both senders are gone once the second task ran and the first was aborted.
    assert_eq!(rx.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn cancel_reports_waiting_task() {
    let mut timer = RefreshTimer::new();
    assert!(!timer.cancel());

    timer.schedule(Duration::from_secs(10), || async {});
    assert!(timer.cancel());
    assert!(!timer.is_pending());
    assert!(!timer.cancel());
}

#[tokio::test(start_paused = true)]
async fn drop_cancels_pending_task() {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    {
        let mut timer = RefreshTimer::new();
        timer.schedule(Duration::from_secs(5), move || async move {
            let _ = tx.send(());
        });
    }

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn closed_timer_refuses_new_tasks() {
    let (tx, mut rx) = mpsc::unbounded_channel::<()>();
    let mut timer = RefreshTimer::new();
    timer.schedule(Duration::from_secs(5), || async {});

    assert!(timer.close());
    assert!(timer.is_closed());
    assert!(!timer.schedule(Duration::ZERO, move || async move {
        let _ = tx.send(());
    }));
    assert!(!timer.is_pending());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(rx.recv().await.is_none());
}
