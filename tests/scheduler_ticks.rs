// tests/scheduler_ticks.rs
// Tick-level behavior of the polling core: dedup, fail-closed keywords,
// error containment and the status snapshot.

mod common;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use common::{entry, scheduler, settings, RecordingDispatcher, ScriptedFeed, Step};
use faro_fino::scheduler::TickOutcome;
use faro_fino::seen::SeenItemStore;
use faro_fino::status::SchedulerState;

fn t(mins: i64) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 13, 12, 0, 0).unwrap() + ChronoDuration::minutes(mins)
}

#[tokio::test]
async fn duplicate_is_suppressed_on_next_tick() {
    let feed = ScriptedFeed::new(vec![
        Step::Entries(vec![entry("a", "Economy grows"), entry("b", "Sports update")]),
        Step::Entries(vec![entry("a", "Economy grows"), entry("c", "Economy slows")]),
    ]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = scheduler(feed, rec.clone(), &["economy"], settings());

    let r1 = sched.tick_at(t(0)).await;
    assert_eq!(r1.result.ids(), vec!["a"]);
    assert!(!sched.seen().is_new("a"));

    let r2 = sched.tick_at(t(5)).await;
    assert_eq!(r2.result.ids(), vec!["c"]);
    assert_eq!(
        r2.outcome,
        TickOutcome::Completed {
            fetched: 2,
            matched: 2,
            new: 1,
            dispatch_ok: true
        }
    );

    assert_eq!(rec.calls(), vec![vec!["a".to_string()], vec!["c".to_string()]]);
}

#[tokio::test]
async fn no_id_dispatched_twice_across_many_ticks() {
    let mut steps = Vec::new();
    for round in 0..10 {
        // the same three stories keep coming back, plus one fresh per round
        steps.push(Step::Entries(vec![
            entry("x", "Economia em alta"),
            entry("y", "Economia em baixa"),
            entry(&format!("n{round}"), "Economia hoje"),
            entry("x", "Economia em alta"),
        ]));
    }
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = scheduler(ScriptedFeed::new(steps), rec.clone(), &["economia"], settings());

    for i in 0..10 {
        sched.tick_at(t(i * 5)).await;
    }

    let ids = rec.all_ids();
    let mut uniq = ids.clone();
    uniq.sort();
    uniq.dedup();
    assert_eq!(ids.len(), uniq.len(), "an id was dispatched twice: {ids:?}");
    assert_eq!(ids.len(), 12);
}

#[tokio::test]
async fn empty_keyword_set_matches_nothing() {
    let feed = ScriptedFeed::new(vec![Step::Entries(vec![
        entry("a", "Economy grows"),
        entry("b", "Anything at all"),
    ])]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = scheduler(feed, rec.clone(), &[], settings());

    let r = sched.tick_at(t(0)).await;
    assert!(r.result.is_empty());
    assert!(sched.seen().is_empty());
    assert!(rec.calls().is_empty());
}

#[tokio::test]
async fn fetch_error_leaves_seen_state_untouched() {
    let feed = ScriptedFeed::new(vec![
        Step::Entries(vec![entry("a", "Economy grows")]),
        Step::Fail { retryable: true },
        Step::Fail { retryable: false },
        Step::Entries(vec![entry("a", "Economy grows"), entry("b", "Economy news")]),
    ]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = scheduler(feed, rec.clone(), &["economy"], settings());
    let core = sched.handle();

    sched.tick_at(t(0)).await;
    let first_success = core.status().last_success_at;
    assert_eq!(first_success, Some(t(0)));

    let r2 = sched.tick_at(t(5)).await;
    assert!(r2.result.is_empty());
    assert_eq!(r2.outcome, TickOutcome::FetchFailed { retryable: true });
    assert_eq!(sched.seen().len(), 1);

    let r3 = sched.tick_at(t(10)).await;
    assert_eq!(r3.outcome, TickOutcome::FetchFailed { retryable: false });
    let st = core.status();
    assert!(st.error);
    assert_eq!(st.consecutive_failures, 2);
    assert_eq!(st.last_success_at, first_success);
    assert_eq!(st.last_error.as_deref(), Some("feed endpoint returned HTTP 404"));

    let r4 = sched.tick_at(t(15)).await;
    assert_eq!(r4.result.ids(), vec!["b"]);
    let st = core.status();
    assert!(!st.error);
    assert_eq!(st.consecutive_failures, 0);
    assert_eq!(st.last_success_at, Some(t(15)));
}

#[tokio::test]
async fn retryable_failure_before_any_success_reports_never() {
    let feed = ScriptedFeed::new(vec![Step::Fail { retryable: true }]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = scheduler(feed, rec, &["economy"], settings());
    let core = sched.handle();

    sched.tick_at(t(0)).await;
    let st = core.status();
    assert!(st.last_success_at.is_none());
    assert!(st.error);
    assert_eq!(st.last_error.as_deref(), Some("feed endpoint returned HTTP 503"));
    assert_eq!(st.last_error_at, Some(t(0)));
    assert_eq!(st.state, SchedulerState::Idle);
}

#[tokio::test]
async fn dispatch_failure_does_not_unmark_seen() {
    let feed = ScriptedFeed::new(vec![
        Step::Entries(vec![entry("a", "Economy grows")]),
        Step::Entries(vec![entry("a", "Economy grows")]),
    ]);
    let rec = Arc::new(RecordingDispatcher::failing());
    let mut sched = scheduler(feed, rec.clone(), &["economy"], settings());
    let core = sched.handle();

    let r1 = sched.tick_at(t(0)).await;
    assert!(matches!(r1.outcome, TickOutcome::Completed { dispatch_ok: false, .. }));
    assert!(!sched.seen().is_new("a"));
    let st = core.status();
    assert!(st.error);
    assert!(st.last_error.unwrap().contains("chat not found"));
    // the fetch itself succeeded
    assert_eq!(st.last_success_at, Some(t(0)));

    let r2 = sched.tick_at(t(5)).await;
    assert!(r2.result.is_empty());
    assert_eq!(rec.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_dispatch_times_out_and_keeps_marks() {
    let feed = ScriptedFeed::new(vec![Step::Entries(vec![entry("a", "Economy grows")])]);
    let rec = Arc::new(RecordingDispatcher::stalling(Duration::from_secs(600)));
    let mut s = settings();
    s.dispatch_timeout = Duration::from_secs(5);
    let mut sched = scheduler(feed, rec, &["economy"], s);
    let core = sched.handle();

    let r = sched.tick_at(t(0)).await;
    assert!(matches!(r.outcome, TickOutcome::Completed { dispatch_ok: false, .. }));
    assert!(!sched.seen().is_new("a"));
    assert!(core.status().last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn same_id_twice_in_one_fetch_dispatches_once() {
    let feed = ScriptedFeed::new(vec![Step::Entries(vec![
        entry("a", "Economy grows"),
        entry("a", "Economy grows (updated)"),
    ])]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = scheduler(feed, rec.clone(), &["economy"], settings());

    let r = sched.tick_at(t(0)).await;
    assert_eq!(r.result.ids(), vec!["a"]);
    assert_eq!(r.result.entries[0].title, "Economy grows");
}

#[tokio::test]
async fn keyword_edits_apply_on_next_tick() {
    let feed = ScriptedFeed::new(vec![
        Step::Entries(vec![entry("a", "Petrobras anuncia dividendos")]),
        Step::Entries(vec![entry("a", "Petrobras anuncia dividendos")]),
    ]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = scheduler(feed, rec.clone(), &["economia"], settings());
    let core = sched.handle();

    assert!(sched.tick_at(t(0)).await.result.is_empty());
    core.add_keywords(&["Petrobras"]).unwrap();
    assert_eq!(sched.tick_at(t(5)).await.result.ids(), vec!["a"]);
    assert_eq!(core.status().keyword_count, 2);
}

#[tokio::test]
async fn results_keep_feed_order() {
    let feed = ScriptedFeed::new(vec![Step::Entries(vec![
        entry("3", "economy three"),
        entry("1", "economy one"),
        entry("skip", "weather"),
        entry("2", "economy two"),
    ])]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = scheduler(feed, rec.clone(), &["economy"], settings());

    let r = sched.tick_at(t(0)).await;
    assert_eq!(r.result.ids(), vec!["3", "1", "2"]);
    assert_eq!(rec.calls(), vec![vec!["3".to_string(), "1".into(), "2".into()]]);
}

#[tokio::test]
async fn seen_registry_stays_bounded_by_horizon() {
    // 20 fresh ids per tick, every 5 minutes, for 10 hours; horizon 1h
    let mut steps = Vec::new();
    for tick in 0..120 {
        let batch = (0..20)
            .map(|i| entry(&format!("{tick}-{i}"), "economia"))
            .collect();
        steps.push(Step::Entries(batch));
    }
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = faro_fino::PollingScheduler::new(
        Box::new(ScriptedFeed::new(steps)),
        rec,
        faro_fino::KeywordStore::new(faro_fino::KeywordSet::from_iter(["economia"])),
        SeenItemStore::new(ChronoDuration::hours(1), 10_000),
        settings(),
    );

    let mut max_seen = 0;
    for tick in 0..120 {
        sched.tick_at(t(tick * 5)).await;
        max_seen = max_seen.max(sched.seen().len());
    }
    // at most (60 / 5 + 1) ticks' worth of ids survive eviction
    assert!(max_seen <= 13 * 20, "seen grew to {max_seen}");
    assert_eq!(sched.handle().status().seen_count, sched.seen().len());
}

#[tokio::test]
async fn item_can_resurface_after_horizon() {
    let feed = ScriptedFeed::new(vec![
        Step::Entries(vec![entry("a", "Economy grows")]),
        Step::Entries(vec![entry("a", "Economy grows")]),
        Step::Entries(vec![entry("a", "Economy grows")]),
    ]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = faro_fino::PollingScheduler::new(
        Box::new(feed),
        rec.clone(),
        faro_fino::KeywordStore::new(faro_fino::KeywordSet::from_iter(["economy"])),
        SeenItemStore::new(ChronoDuration::hours(1), 100),
        settings(),
    );

    assert_eq!(sched.tick_at(t(0)).await.result.len(), 1);
    assert!(sched.tick_at(t(60)).await.result.is_empty());
    // horizon elapsed: accepted, bounded re-notification
    assert_eq!(sched.tick_at(t(61)).await.result.len(), 1);
}

#[tokio::test]
async fn seen_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.json");
    let mut s = settings();
    s.seen_path = Some(path.clone());

    let now = Utc::now();
    let rec = Arc::new(RecordingDispatcher::default());
    let mut first = scheduler(
        ScriptedFeed::new(vec![Step::Entries(vec![entry("a", "Economy grows")])]),
        rec.clone(),
        &["economy"],
        s.clone(),
    );
    first.tick_at(now).await;
    drop(first);

    let restored = SeenItemStore::load(&path, ChronoDuration::hours(96), 10_000);
    assert!(!restored.is_new("a"));

    let mut second = faro_fino::PollingScheduler::new(
        Box::new(ScriptedFeed::new(vec![Step::Entries(vec![entry("a", "Economy grows")])])),
        rec.clone(),
        faro_fino::KeywordStore::new(faro_fino::KeywordSet::from_iter(["economy"])),
        restored,
        s,
    );
    assert!(second.tick_at(now + ChronoDuration::minutes(5)).await.result.is_empty());
    assert_eq!(rec.calls().len(), 1);
}

#[tokio::test]
async fn entry_cap_never_causes_renotification() {
    // cap far below one batch; ids inside the horizon must still be honored
    let feed = ScriptedFeed::new(vec![
        Step::Entries(vec![
            entry("a", "Economy grows"),
            entry("b", "Economy slows"),
            entry("c", "Economy stalls"),
        ]),
        Step::Entries(vec![entry("a", "Economy grows"), entry("c", "Economy stalls")]),
    ]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = faro_fino::PollingScheduler::new(
        Box::new(feed),
        rec.clone(),
        faro_fino::KeywordStore::new(faro_fino::KeywordSet::from_iter(["economy"])),
        SeenItemStore::new(ChronoDuration::hours(96), 2),
        settings(),
    );

    assert_eq!(sched.tick_at(t(0)).await.result.len(), 3);
    assert!(sched.tick_at(t(5)).await.result.is_empty());
    assert_eq!(sched.seen().len(), 3);
    assert_eq!(
        rec.calls(),
        vec![vec!["a".to_string(), "b".into(), "c".into()]]
    );
}

#[tokio::test(start_paused = true)]
async fn large_batch_gets_time_to_drain() {
    let batch: Vec<_> = (0..100)
        .map(|i| entry(&format!("n{i}"), "Economia hoje"))
        .collect();
    let feed = ScriptedFeed::new(vec![Step::Entries(batch)]);
    // 2s per message makes 200s of sends against a 60s base timeout
    let rec = Arc::new(RecordingDispatcher::paced(Duration::from_secs(2)));
    let mut sched = scheduler(feed, rec.clone(), &["economia"], settings());

    assert!(sched.dispatch_limit(100) >= Duration::from_secs(200));
    assert_eq!(sched.dispatch_limit(0), Duration::from_secs(60));

    let r = sched.tick_at(t(0)).await;
    assert!(matches!(
        r.outcome,
        TickOutcome::Completed { new: 100, dispatch_ok: true, .. }
    ));
    assert_eq!(rec.all_ids().len(), 100);
    assert!(sched.handle().status().last_error.is_none());
}

#[tokio::test]
async fn fetch_uses_keywords_current_at_tick() {
    let feed = ScriptedFeed::new(vec![Step::Entries(vec![]), Step::Entries(vec![])]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = scheduler(feed.clone(), rec, &["economia"], settings());
    let core = sched.handle();

    sched.tick_at(t(0)).await;
    core.add_keywords(&["Selic"]).unwrap();
    sched.tick_at(t(5)).await;

    assert_eq!(
        feed.keywords_seen(),
        vec![
            vec!["economia".to_string()],
            vec!["economia".to_string(), "selic".into()],
        ]
    );
}

#[tokio::test]
async fn failed_fetch_still_evicts_expired_ids() {
    let feed = ScriptedFeed::new(vec![
        Step::Entries(vec![entry("a", "Economy grows")]),
        Step::Fail { retryable: true },
    ]);
    let rec = Arc::new(RecordingDispatcher::default());
    let mut sched = faro_fino::PollingScheduler::new(
        Box::new(feed),
        rec,
        faro_fino::KeywordStore::new(faro_fino::KeywordSet::from_iter(["economy"])),
        SeenItemStore::new(ChronoDuration::hours(1), 100),
        settings(),
    );
    let core = sched.handle();

    sched.tick_at(t(0)).await;
    assert_eq!(core.status().seen_count, 1);

    let r = sched.tick_at(t(61)).await;
    assert!(matches!(r.outcome, TickOutcome::FetchFailed { retryable: true }));
    assert_eq!(sched.seen().len(), 0);
    assert_eq!(core.status().seen_count, 0);
}
