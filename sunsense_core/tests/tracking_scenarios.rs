//! End-to-end scenarios for the tracking state machine.
//!
//! Every scenario runs at lat 51.5 / lon 0 around solar noon on the June
//! solstice unless it says otherwise.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use sunsense_core::tracking::{Collaborators, Orchestrator, TrackingEvent, TrackingState};
use sunsense_core::{
    Activity, Alert, ClearSkyUvModel, Config, Error, FixedUvSource, ForecastPoint, LocationMode,
    LocationObservation, MemoryBackend, Profile, RecordingNotifier, SessionStore, SkinType, UvIndexSource,
};

struct Fixture {
    orch: Orchestrator,
    backend: Arc<MemoryBackend>,
    notifier: RecordingNotifier,
}

fn fixture_with(uv_source: Arc<dyn UvIndexSource>, skin: u8) -> Fixture {
    let backend = Arc::new(MemoryBackend::with_profile(Profile::new(
        "u1",
        SkinType::new(skin).unwrap(),
    )));
    let notifier = RecordingNotifier::new();
    let orch = Orchestrator::new(
        Config::default(),
        Some("u1".into()),
        Collaborators {
            backend: backend.clone(),
            uv_source,
            notifier: Arc::new(notifier.clone()),
        },
    );
    Fixture {
        orch,
        backend,
        notifier,
    }
}

fn fixture(uv: f64) -> Fixture {
    fixture_with(Arc::new(FixedUvSource::new(uv)), 2)
}

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 21, 12, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    noon() + Duration::seconds(secs)
}

fn obs(mode: LocationMode, confidence: f64, timestamp: DateTime<Utc>) -> LocationObservation {
    LocationObservation {
        mode,
        confidence,
        latitude: 51.5,
        longitude: 0.0,
        accuracy: Some(10.0),
        activity: Activity::Other,
        speed: None,
        nearest_building_distance: None,
        is_inside_polygon: false,
        timestamp,
    }
}

fn active_sed(f: &Fixture) -> f64 {
    f.orch
        .session_store()
        .active_session()
        .map(|s| s.session_sed)
        .unwrap_or(0.0)
}

#[tokio::test]
async fn cold_start_needs_higher_confidence_than_continuation() {
    let mut f = fixture(6.0);

    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.70, at(0)))
        .await
        .unwrap();
    assert!(!f.orch.outdoor_locked());
    assert!(f.backend.sessions().is_empty());

    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.80, at(30)))
        .await
        .unwrap();
    assert!(f.orch.outdoor_locked());

    let state = f
        .orch
        .handle_observation(obs(LocationMode::Outside, 0.70, at(90)))
        .await
        .unwrap();
    assert_eq!(state, TrackingState::OutsideTracking);
    assert!(active_sed(&f) > 0.0);
}

#[tokio::test]
async fn short_unknown_blip_keeps_session() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.8, at(0)))
        .await
        .unwrap();
    let session_id = f.orch.session_store().active_session().unwrap().id;

    let state = f
        .orch
        .handle_observation(obs(LocationMode::Unknown, 0.4, at(10)))
        .await
        .unwrap();
    assert_eq!(state, TrackingState::OutsideLockedElsewhere);

    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.8, at(30)))
        .await
        .unwrap();
    assert!(f.orch.outdoor_locked());
    assert_eq!(f.orch.session_store().active_session().unwrap().id, session_id);
    assert_eq!(f.backend.sessions().len(), 1);
}

#[tokio::test]
async fn persistent_unknown_ends_session() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.8, at(0)))
        .await
        .unwrap();
    f.orch
        .handle_observation(obs(LocationMode::Unknown, 0.4, at(10)))
        .await
        .unwrap();

    let state = f
        .orch
        .handle_observation(obs(LocationMode::Unknown, 0.4, at(50)))
        .await
        .unwrap();
    assert_eq!(state, TrackingState::UnknownConfirmed);
    assert!(!f.orch.outdoor_locked());
    assert!(f.backend.sessions().iter().all(|s| !s.is_active()));
}

#[tokio::test]
async fn unknown_hold_expires_on_tick() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.8, at(0)))
        .await
        .unwrap();
    f.orch
        .handle_observation(obs(LocationMode::Unknown, 0.4, at(10)))
        .await
        .unwrap();

    // The paused timer asks to be woken just past the debounce window
    assert_eq!(f.orch.next_tick_due(at(10)), Some(at(41)));

    f.orch.run_exposure_tick(at(41)).await.unwrap();
    assert!(!f.orch.outdoor_locked());
    assert!(!f.orch.session_store().has_active_session());
}

#[tokio::test]
async fn paused_sampling_does_not_accumulate() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.8, at(0)))
        .await
        .unwrap();
    f.orch
        .handle_observation(obs(LocationMode::Unknown, 0.4, at(60)))
        .await
        .unwrap();
    let credited = active_sed(&f);
    assert!((credited - 0.09).abs() < 1e-9);

    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.8, at(80)))
        .await
        .unwrap();
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.8, at(140)))
        .await
        .unwrap();
    // Only the 60s after resuming is credited, not the 20s of uncertainty
    assert!((active_sed(&f) - 0.18).abs() < 1e-9, "sed {}", active_sed(&f));
}

#[tokio::test]
async fn vehicle_sample_ends_outdoor_session_immediately() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();

    // A weak vehicle sample changes nothing
    f.orch
        .handle_observation(obs(LocationMode::Vehicle, 0.6, at(20)))
        .await
        .unwrap();
    assert!(f.orch.outdoor_locked());

    let state = f
        .orch
        .handle_observation(obs(LocationMode::Vehicle, 0.90, at(30)))
        .await
        .unwrap();
    assert_eq!(state, TrackingState::Vehicle);
    assert!(f.orch.vehicle_locked());
    assert!(!f.orch.outdoor_locked());
    assert!(f.backend.sessions().iter().all(|s| !s.is_active()));
}

#[tokio::test]
async fn vehicle_lock_ignores_outside_until_user_walks_away() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Vehicle, 0.9, at(0)))
        .await
        .unwrap();

    let state = f
        .orch
        .handle_observation(obs(LocationMode::Outside, 0.95, at(30)))
        .await
        .unwrap();
    assert_eq!(state, TrackingState::Vehicle);
    assert!(f.backend.sessions().is_empty());

    let mut walking = obs(LocationMode::Outside, 0.9, at(60));
    walking.activity = Activity::Walking;
    let state = f.orch.handle_observation(walking).await.unwrap();
    assert_eq!(state, TrackingState::OutsideTracking);
    assert!(!f.orch.vehicle_locked());
    assert!(f.orch.session_store().has_active_session());
}

#[tokio::test]
async fn end_to_end_indoor_release() {
    let mut f = fixture(6.0);

    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.80, at(0)))
        .await
        .unwrap();
    assert!(f.orch.session_store().has_active_session());

    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.80, at(60)))
        .await
        .unwrap();
    // 60s at UV 6: 6 * 0.025 * 60 / 100
    assert!((active_sed(&f) - 0.09).abs() < 1e-9);

    let state = f
        .orch
        .handle_observation(obs(LocationMode::Inside, 0.65, at(90)))
        .await
        .unwrap();
    assert_eq!(state, TrackingState::OutsideLockedElsewhere);
    assert!(f.orch.session_store().has_active_session());

    let state = f
        .orch
        .handle_observation(obs(LocationMode::Inside, 0.95, at(120)))
        .await
        .unwrap();
    assert_eq!(state, TrackingState::Inside);

    let sessions = f.backend.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].end_time, Some(at(120)));
    assert!((sessions[0].session_sed - 0.09).abs() < 1e-9);
}

#[tokio::test]
async fn sunscreen_suppresses_accumulation() {
    let mut f = fixture(9.0);
    f.orch.apply_sunscreen(at(0)).await.unwrap();

    for i in 0..5 {
        f.orch
            .handle_observation(obs(LocationMode::Outside, 0.9, at(i * 60)))
            .await
            .unwrap();
        f.orch.run_exposure_tick(at(i * 60 + 30)).await.unwrap();
    }

    assert!(f.orch.outdoor_locked());
    assert!(f.backend.sessions().iter().all(|s| s.session_sed == 0.0));
    assert!(f.backend.vitamin_d_records().iter().all(|r| r.total_iu == 0.0));

    // Protection lapses after two hours and the held lock resumes tracking
    let lapse = f.orch.next_tick_due(at(300)).unwrap();
    assert_eq!(lapse, at(120 * 60));
    f.orch.run_exposure_tick(lapse).await.unwrap();
    assert!(f.orch.session_store().has_active_session());
}

#[tokio::test]
async fn sunscreen_closes_open_session() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();
    f.orch.apply_sunscreen(at(60)).await.unwrap();

    let sessions = f.backend.sessions();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].sunscreen_applied);
    assert!(!sessions[0].is_active());
}

#[tokio::test]
async fn outside_at_night_is_inside() {
    let mut f = fixture(6.0);
    let midnight = Utc.with_ymd_and_hms(2024, 6, 21, 23, 30, 0).unwrap();
    let state = f
        .orch
        .handle_observation(obs(LocationMode::Outside, 0.95, midnight))
        .await
        .unwrap();
    assert_eq!(state, TrackingState::Inside);
    assert!(!f.orch.outdoor_locked());
}

#[tokio::test]
async fn manual_override_forces_inside() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();
    f.orch.set_manual_override(true, at(10)).await;

    let state = f
        .orch
        .handle_observation(obs(LocationMode::Outside, 0.99, at(20)))
        .await
        .unwrap();
    assert_eq!(state, TrackingState::Inside);
    assert!(!f.orch.outdoor_locked());

    f.orch.set_manual_override(false, at(30)).await;
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(40)))
        .await
        .unwrap();
    assert!(f.orch.outdoor_locked());
}

#[tokio::test]
async fn invalid_and_out_of_order_observations_are_rejected() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(60)))
        .await
        .unwrap();

    let stale = f
        .orch
        .handle_observation(obs(LocationMode::Vehicle, 0.95, at(0)))
        .await;
    assert!(matches!(stale, Err(Error::InvalidObservation(_))));

    let bogus = f
        .orch
        .handle_observation(obs(LocationMode::Inside, 1.7, at(90)))
        .await;
    assert!(matches!(bogus, Err(Error::InvalidObservation(_))));

    assert!(f.orch.outdoor_locked());
    assert_eq!(f.orch.state(at(90)), TrackingState::OutsideTracking);
}

#[tokio::test]
async fn backend_failure_makes_tick_a_noop() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();

    f.backend.set_fail_reads(true);
    let result = f.orch.run_exposure_tick(at(60)).await;
    assert!(matches!(result, Err(Error::TransientBackend(_))));
    assert_eq!(active_sed(&f), 0.0);
    // A failed attempt still pushes the timer a full interval out
    assert_eq!(f.orch.next_tick_due(at(60)), Some(at(180)));

    // The next tick picks up the missed span (UV 6 samples every 120s)
    f.backend.set_fail_reads(false);
    f.orch.run_exposure_tick(at(120)).await.unwrap();
    assert!((active_sed(&f) - 0.18).abs() < 1e-9);
}

#[tokio::test]
async fn delayed_tick_is_capped() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();

    // An hour late: credit at most two 120s intervals
    f.orch.run_exposure_tick(at(3600)).await.unwrap();
    assert!((active_sed(&f) - 0.36).abs() < 1e-9, "sed {}", active_sed(&f));
}

#[tokio::test]
async fn low_uv_late_tick_hits_absolute_ceiling() {
    // UV 0.5 samples every 30 minutes, so two intervals would be a full hour
    let mut f = fixture(0.5);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();
    assert_eq!(f.orch.next_tick_due(at(0)), Some(at(1800)));

    f.orch.run_exposure_tick(at(3600)).await.unwrap();
    // Ten minutes at most: 0.5 * 0.025 * 600 / 100
    assert!((active_sed(&f) - 0.075).abs() < 1e-9, "sed {}", active_sed(&f));
}

#[tokio::test]
async fn alerts_escalate_with_exposure() {
    let mut f = fixture(10.0);
    f.backend
        .put_profile(Profile::new("u1", SkinType::new(1).unwrap()));

    for minute in 0..=15 {
        f.orch
            .handle_observation(obs(LocationMode::Outside, 0.9, at(minute * 60)))
            .await
            .unwrap();
    }

    let alerts = f.notifier.alerts();
    assert!(alerts.iter().any(|a| matches!(a, Alert::Warning { .. })));
    assert!(alerts.iter().any(|a| matches!(a, Alert::Danger { .. })));
    assert_eq!(
        alerts
            .iter()
            .filter(|a| matches!(a, Alert::VitaminDTargetReached))
            .count(),
        1
    );
}

#[tokio::test]
async fn events_are_published() {
    let mut f = fixture(6.0);
    let mut events = f.orch.subscribe();

    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert!(seen
        .iter()
        .any(|e| matches!(e, TrackingEvent::OutdoorLockAcquired { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, TrackingEvent::SessionStarted { .. })));
    assert!(seen.iter().any(|e| matches!(
        e,
        TrackingEvent::StateChanged {
            to: TrackingState::OutsideTracking,
            ..
        }
    )));
}

#[tokio::test]
async fn crash_recovery_closes_dangling_session() {
    let backend = Arc::new(MemoryBackend::with_profile(Profile::new(
        "u1",
        SkinType::default(),
    )));
    let collaborators = Collaborators {
        backend: backend.clone(),
        uv_source: Arc::new(FixedUvSource::new(5.0)),
        notifier: Arc::new(RecordingNotifier::new()),
    };

    let mut crashed = Orchestrator::new(Config::default(), Some("u1".into()), collaborators.clone());
    crashed
        .handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();
    drop(crashed);

    let mut restarted = Orchestrator::new(Config::default(), Some("u1".into()), collaborators);
    assert_eq!(restarted.recover(at(600)).await.unwrap(), 1);
    assert!(backend.sessions().iter().all(|s| !s.is_active()));
    assert!(!restarted.outdoor_locked());
}

#[tokio::test]
async fn missing_user_skips_without_side_effects() {
    let backend = Arc::new(MemoryBackend::new());
    let mut orch = Orchestrator::new(
        Config::default(),
        None,
        Collaborators {
            backend: backend.clone(),
            uv_source: Arc::new(FixedUvSource::new(5.0)),
            notifier: Arc::new(RecordingNotifier::new()),
        },
    );

    orch.handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();
    assert!(backend.sessions().is_empty());
    assert!(matches!(
        orch.run_daily_maintenance(at(60)).await,
        Err(Error::NoActiveUser)
    ));
}

#[tokio::test]
async fn daily_rollover_preserves_previous_total() {
    let backend = Arc::new(MemoryBackend::with_profile(Profile::new(
        "u1",
        SkinType::new(3).unwrap(),
    )));
    let profile = Profile::new("u1", SkinType::new(3).unwrap());
    let day_n = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
    let day_n1 = NaiveDate::from_ymd_opt(2024, 6, 22).unwrap();

    let mut store = SessionStore::new(
        backend.clone(),
        FixedOffset::east_opt(0).unwrap(),
        Duration::seconds(120),
    );
    store
        .load_or_create_daily_vitamin_d(&profile, at(-3 * 3600))
        .await
        .unwrap();
    // Inside the sync window, so this is only buffered
    store.record_vitamin_d(1500.0, at(-3 * 3600 + 30)).await;

    let next_morning = Utc.with_ymd_and_hms(2024, 6, 22, 6, 0, 0).unwrap();
    let fresh = store
        .load_or_create_daily_vitamin_d(&profile, next_morning)
        .await
        .unwrap();
    assert_eq!(fresh.date, day_n1);
    assert_eq!(fresh.total_iu, 0.0);

    let records = backend.vitamin_d_records();
    let previous = records.iter().find(|r| r.date == day_n).unwrap();
    assert_eq!(previous.total_iu, 1500.0);
    assert_eq!(records.iter().filter(|r| r.date == day_n1).count(), 1);

    // Maintenance on day N+1 folds day N into the streaks
    let mut orch = Orchestrator::new(
        Config::default(),
        Some("u1".into()),
        Collaborators {
            backend: backend.clone(),
            uv_source: Arc::new(FixedUvSource::new(2.0)),
            notifier: Arc::new(RecordingNotifier::new()),
        },
    );
    let report = orch.run_daily_maintenance(next_morning).await.unwrap();
    let streaks = report.streaks.unwrap();
    assert_eq!(streaks.vitamin_d_streak, 1);
    assert_eq!(streaks.uv_safe_streak, 1);
    assert_eq!(report.vitamin_d.unwrap().total_iu, 0.0);

    // Running it again the same day changes nothing
    let again = orch.run_daily_maintenance(next_morning + Duration::hours(1)).await.unwrap();
    assert_eq!(again.streaks.unwrap().vitamin_d_streak, 1);
    assert_eq!(backend.vitamin_d_records().len(), 2);
}

#[tokio::test]
async fn maintenance_closes_stale_session() {
    let mut f = fixture(6.0);
    f.orch
        .handle_observation(obs(LocationMode::Outside, 0.9, at(0)))
        .await
        .unwrap();
    let open = f.orch.session_store().active_session().unwrap().id;

    let next_day = Utc.with_ymd_and_hms(2024, 6, 22, 3, 0, 0).unwrap();
    let report = f.orch.run_daily_maintenance(next_day).await.unwrap();
    assert_eq!(report.closed_session, Some(open));

    let closed = f.backend.sessions().into_iter().find(|s| s.id == open).unwrap();
    assert!(!closed.is_active());
    // 03:00 UTC is still night in London, so nothing reopens
    assert!(!f.orch.session_store().has_active_session());
}

#[tokio::test]
async fn morning_peak_alert_scheduled_from_forecast() {
    let mut f = fixture_with(Arc::new(ClearSkyUvModel::default()), 2);
    f.orch.set_position(10.0, 0.0);

    let report = f.orch.run_daily_maintenance(at(-6 * 3600)).await.unwrap();
    let expected_at = Utc.with_ymd_and_hms(2024, 6, 22, 8, 0, 0).unwrap();
    match report.morning_alert {
        Some(Alert::MorningPeak { at, uv_index }) => {
            assert_eq!(at, expected_at);
            assert!(uv_index >= 6.0);
        }
        other => panic!("expected a morning alert, got {:?}", other),
    }
    assert_eq!(f.notifier.alerts().len(), 1);

    // Scheduled once per day
    let again = f.orch.run_daily_maintenance(at(-5 * 3600)).await.unwrap();
    assert!(again.morning_alert.is_none());
}

/// Flat UV 1 forecast with a single UV 9 hour at `peak_at`
struct SingleHourPeak {
    peak_at: DateTime<Utc>,
}

#[async_trait::async_trait]
impl UvIndexSource for SingleHourPeak {
    async fn current_uv_index(&self, _lat: f64, _lon: f64, _at: DateTime<Utc>) -> sunsense_core::Result<f64> {
        Ok(1.0)
    }

    async fn uv_forecast(
        &self,
        _lat: f64,
        _lon: f64,
        date: NaiveDate,
    ) -> sunsense_core::Result<Vec<ForecastPoint>> {
        Ok((0..24)
            .map(|hour| {
                let time = date.and_hms_opt(hour, 0, 0).unwrap().and_utc();
                let uv_index = if time == self.peak_at { 9.0 } else { 1.0 };
                ForecastPoint { time, uv_index }
            })
            .collect())
    }
}

async fn morning_alert_at_utc_plus_ten(peak_at: DateTime<Utc>) -> Option<Alert> {
    let mut config = Config::default();
    config.data.utc_offset_minutes = 600;
    let mut orch = Orchestrator::new(
        config,
        Some("u1".into()),
        Collaborators {
            backend: Arc::new(MemoryBackend::with_profile(Profile::new("u1", SkinType::default()))),
            uv_source: Arc::new(SingleHourPeak { peak_at }),
            notifier: Arc::new(RecordingNotifier::new()),
        },
    );
    orch.set_position(-27.5, 153.0);

    // 10:05 on June 21 local time
    let now = Utc.with_ymd_and_hms(2024, 6, 21, 0, 5, 0).unwrap();
    orch.run_daily_maintenance(now).await.unwrap().morning_alert
}

#[tokio::test]
async fn morning_peak_uses_the_local_day() {
    // 06:00 on June 22 local is still June 21 in UTC
    let alert = morning_alert_at_utc_plus_ten(Utc.with_ymd_and_hms(2024, 6, 21, 20, 0, 0).unwrap()).await;
    match alert {
        Some(Alert::MorningPeak { at, uv_index }) => {
            // 08:00 local on June 22
            assert_eq!(at, Utc.with_ymd_and_hms(2024, 6, 21, 22, 0, 0).unwrap());
            assert_eq!(uv_index, 9.0);
        }
        other => panic!("expected a morning alert, got {:?}", other),
    }

    // 06:00 on June 23 local falls outside tomorrow
    let alert = morning_alert_at_utc_plus_ten(Utc.with_ymd_and_hms(2024, 6, 22, 20, 0, 0).unwrap()).await;
    assert!(alert.is_none(), "unexpected alert {:?}", alert);
}

#[derive(Clone, Debug)]
struct Step {
    mode: LocationMode,
    confidence: f64,
    walking: bool,
    gap_secs: i64,
}

fn step() -> impl Strategy<Value = Step> {
    (
        prop_oneof![
            Just(LocationMode::Outside),
            Just(LocationMode::Inside),
            Just(LocationMode::Vehicle),
            Just(LocationMode::Unknown),
        ],
        0.0f64..=1.0,
        any::<bool>(),
        1i64..300,
    )
        .prop_map(|(mode, confidence, walking, gap_secs)| Step {
            mode,
            confidence,
            walking,
            gap_secs,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn locks_stay_exclusive_and_gate_the_session(steps in prop::collection::vec(step(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut f = fixture(6.0);
            let mut now = noon();
            for step in steps {
                now += Duration::seconds(step.gap_secs);
                let mut o = obs(step.mode, step.confidence, now);
                if step.walking {
                    o.activity = Activity::Walking;
                }
                f.orch.handle_observation(o).await.unwrap();

                prop_assert!(!(f.orch.outdoor_locked() && f.orch.vehicle_locked()));
                prop_assert_eq!(
                    f.orch.outdoor_locked(),
                    f.orch.session_store().has_active_session()
                );
                prop_assert!(f.backend.sessions().iter().filter(|s| s.is_active()).count() <= 1);
            }
            Ok(())
        })?;
    }
}
