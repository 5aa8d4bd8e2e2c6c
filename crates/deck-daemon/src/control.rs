//! The reconciliation loop: one tick at a time, the panel's knobs are
//! compared against the committed application state, quiescent changes are
//! committed to the engine and disk, and the display is repainted by diff.
//!
//! Debounce compares the panel against the *desired* value, so the timer
//! re-arms only when the knob actually moves again; a standing difference
//! from the committed value counts down undisturbed.  The display tracks the
//! knob, not the committed selection, so the user sees where they are while
//! the debounce runs.

use std::time::{Duration, Instant};

use chrono::Timelike;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use deck_proto::config::{DisplayConfig, TimingConfig};
use deck_proto::playlist::Station;
use deck_proto::protocol::{AlarmSetting, Frame};
use deck_proto::state::{PersistedState, StateStore};

use crate::display::{sanitize, title_rows, truncate, DisplayTracker, Field};
use crate::engine::Playback;
use crate::panel::{LinkPoll, PanelPort};

pub struct ControlLoop<P, E> {
    panel: P,
    engine: E,
    store: StateStore,
    stations: Vec<Station>,
    timing: TimingConfig,
    display: DisplayConfig,

    /// Where the knob points; may run ahead of `committed_index` while the
    /// debounce window counts down.
    desired_index: usize,
    committed_index: usize,
    volume: u8,
    alarm: AlarmSetting,
    alarm_dirty: bool,

    selection_changed_at: Instant,
    alarm_changed_at: Instant,
    last_title_poll: Option<Instant>,
    title: String,
    tracker: DisplayTracker,
}

impl<P: PanelPort, E: Playback> ControlLoop<P, E> {
    pub fn new(
        panel: P,
        engine: E,
        store: StateStore,
        stations: Vec<Station>,
        restored: PersistedState,
        timing: TimingConfig,
        display: DisplayConfig,
    ) -> Self {
        let now = Instant::now();
        Self {
            panel,
            engine,
            store,
            stations,
            timing,
            display,
            desired_index: restored.active_index,
            committed_index: restored.active_index,
            volume: 0,
            alarm: restored.alarm,
            alarm_dirty: false,
            selection_changed_at: now,
            alarm_changed_at: now,
            last_title_poll: None,
            title: String::new(),
            tracker: DisplayTracker::new(),
        }
    }

    pub async fn run(mut self) {
        info!("control loop running");
        loop {
            self.tick(Instant::now()).await;
            sleep(Duration::from_millis(self.timing.tick_ms)).await;
        }
    }

    pub async fn tick(&mut self, now: Instant) {
        if self.panel.poll().await == LinkPoll::HandshakeRequested {
            self.tracker.invalidate_all();
        }
        let observed = *self.panel.state();

        if observed.encoder_index != self.desired_index {
            self.desired_index = observed.encoder_index;
            self.selection_changed_at = now;
            debug!(index = self.desired_index, "selection knob moved");
        }
        // volume is display-only bookkeeping, adopted without debounce
        if observed.volume != self.volume {
            self.volume = observed.volume;
            debug!(volume = self.volume, "volume moved");
        }
        if self.display.alarm && observed.alarm != self.alarm {
            self.alarm = observed.alarm;
            self.alarm_changed_at = now;
            self.alarm_dirty = true;
            debug!(
                hours = self.alarm.hours,
                minutes = self.alarm.minutes,
                enabled = self.alarm.enabled,
                "alarm wheels moved"
            );
        }

        self.try_commit(now).await;

        self.write_field(Field::Clock, clock_frame()).await;

        let poll_due = self.last_title_poll.map_or(true, |at| {
            now.duration_since(at) >= Duration::from_millis(self.timing.now_playing_ms)
        });
        if poll_due {
            self.title = match self.engine.now_playing().await {
                Ok(title) => sanitize(&title.unwrap_or_default()),
                Err(e) => {
                    warn!(error = %e, "now-playing poll failed");
                    String::new()
                }
            };
            self.last_title_poll = Some(now);
        }

        let columns = self.display.columns;
        let station = sanitize(&self.stations[self.desired_index].name);
        self.write_field(
            Field::Station,
            Frame::Display {
                row: 0,
                text: truncate(&station, columns).to_string(),
            },
        )
        .await;

        let mut row = 1;
        if self.display.rows >= 4 {
            let position = format!("{}/{}", self.desired_index + 1, self.stations.len());
            self.write_field(
                Field::Position,
                Frame::Display {
                    row,
                    text: truncate(&position, columns).to_string(),
                },
            )
            .await;
            row += 1;
        }

        let (top, bottom) = title_rows(&self.title, columns);
        self.write_field(Field::TitleTop, Frame::Display { row, text: top })
            .await;
        self.write_field(
            Field::TitleBottom,
            Frame::Display {
                row: row + 1,
                text: bottom,
            },
        )
        .await;
    }

    /// Commit once everything pending has sat quiet for the full window.  An
    /// idle system gets past the pending check and performs no I/O at all.
    async fn try_commit(&mut self, now: Instant) {
        let window = Duration::from_millis(self.timing.debounce_ms);
        let selection_pending = self.desired_index != self.committed_index;
        if !selection_pending && !self.alarm_dirty {
            return;
        }
        if selection_pending && now.duration_since(self.selection_changed_at) < window {
            return;
        }
        if self.alarm_dirty && now.duration_since(self.alarm_changed_at) < window {
            return;
        }

        if selection_pending {
            if let Err(e) = self.engine.play_index(self.desired_index).await {
                // leave the whole commit pending; the next tick retries it
                warn!(error = %e, index = self.desired_index, "play failed, commit pending");
                return;
            }
            self.committed_index = self.desired_index;
            info!(
                index = self.committed_index,
                station = %self.stations[self.committed_index].name,
                "station committed"
            );
        }

        let state = PersistedState {
            active_index: self.committed_index,
            alarm: self.alarm,
        };
        if let Err(e) = self.store.save(&state).await {
            warn!(error = %e, "state save failed");
        }
        self.alarm_dirty = false;
    }

    async fn write_field(&mut self, field: Field, frame: Frame) {
        let text = frame.encode();
        if self.tracker.needs_write(field, &text) && self.panel.send(&frame).await {
            self.tracker.mark_written(field, &text);
        }
    }
}

fn clock_frame() -> Frame {
    let now = chrono::Local::now();
    Frame::Time {
        hours: now.hour() as u8,
        minutes: now.minute() as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    use async_trait::async_trait;

    use deck_proto::protocol::PanelState;

    use crate::engine::EngineError;

    struct FakePanel {
        polls: VecDeque<LinkPoll>,
        state: PanelState,
        sent: Vec<String>,
        fail_sends: bool,
    }

    impl FakePanel {
        fn new() -> Self {
            Self {
                polls: VecDeque::new(),
                state: PanelState::new(0, 0, AlarmSetting::default()),
                sent: Vec::new(),
                fail_sends: false,
            }
        }
    }

    #[async_trait]
    impl PanelPort for FakePanel {
        async fn poll(&mut self) -> LinkPoll {
            self.polls.pop_front().unwrap_or(LinkPoll::NoEvent)
        }

        async fn send(&mut self, frame: &Frame) -> bool {
            if self.fail_sends {
                return false;
            }
            self.sent.push(frame.encode());
            true
        }

        fn state(&self) -> &PanelState {
            &self.state
        }
    }

    struct FakeEngine {
        plays: Vec<usize>,
        fail_plays: usize,
        title: Option<String>,
        title_polls: usize,
    }

    impl FakeEngine {
        fn new() -> Self {
            Self {
                plays: Vec::new(),
                fail_plays: 0,
                title: None,
                title_polls: 0,
            }
        }

        fn down() -> EngineError {
            EngineError::Playback {
                op: "play_index",
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "engine down"),
            }
        }
    }

    #[async_trait]
    impl Playback for FakeEngine {
        async fn load_playlist(&mut self, _urls: &[String]) -> Result<(), EngineError> {
            Ok(())
        }

        async fn play_index(&mut self, index: usize) -> Result<(), EngineError> {
            if self.fail_plays > 0 {
                self.fail_plays -= 1;
                return Err(Self::down());
            }
            self.plays.push(index);
            Ok(())
        }

        async fn now_playing(&mut self) -> Result<Option<String>, EngineError> {
            self.title_polls += 1;
            Ok(self.title.clone())
        }
    }

    fn scratch(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("deck-control-{}-{}", std::process::id(), tag))
    }

    fn stations(names: &[&str]) -> Vec<Station> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| Station {
                name: name.to_string(),
                url: format!("http://stream.example/{}", i),
                payload: vec![format!("http://stream.example/{}", i)],
            })
            .collect()
    }

    fn looper(tag: &str) -> ControlLoop<FakePanel, FakeEngine> {
        let path = scratch(tag);
        let _ = std::fs::remove_file(&path);
        ControlLoop::new(
            FakePanel::new(),
            FakeEngine::new(),
            StateStore::new(path),
            stations(&["Radio A", "Radio B", "Radio C"]),
            PersistedState::default(),
            TimingConfig::default(),
            DisplayConfig::default(),
        )
    }

    /// Display writes without the clock, whose text depends on the wall time.
    fn display_writes(panel: &FakePanel) -> Vec<String> {
        panel
            .sent
            .iter()
            .filter(|line| !line.starts_with("TM:"))
            .cloned()
            .collect()
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test]
    async fn idle_system_performs_no_commits() {
        let mut looper = looper("idle");
        let t0 = Instant::now();
        for i in 0..5 {
            looper.tick(t0 + ms(i * 200)).await;
        }
        assert!(looper.engine.plays.is_empty());
        assert_eq!(looper.store.load(), None);
    }

    #[tokio::test]
    async fn knob_turns_commit_once_with_the_last_value() {
        let mut looper = looper("debounce");
        let t0 = Instant::now();

        looper.panel.state.encoder_index = 1;
        looper.tick(t0).await;
        looper.panel.state.encoder_index = 2;
        looper.tick(t0 + ms(300)).await;
        // only 300ms since the last turn; the timer restarted
        looper.tick(t0 + ms(600)).await;
        assert!(looper.engine.plays.is_empty());

        looper.tick(t0 + ms(900)).await;
        assert_eq!(looper.engine.plays, vec![2]);
        assert_eq!(looper.store.load().unwrap().active_index, 2);

        // quiet afterwards: nothing further
        looper.tick(t0 + ms(2000)).await;
        assert_eq!(looper.engine.plays, vec![2]);
    }

    #[tokio::test]
    async fn restored_selection_defaults_then_single_commit_on_turn() {
        // persisted state absent: index 0, no alarm, nothing committed until
        // the panel reports index 1 and the window elapses
        let mut looper = looper("end-to-end");
        let t0 = Instant::now();

        looper.tick(t0).await;
        assert!(looper.engine.plays.is_empty());

        looper.panel.state.encoder_index = 1;
        looper.tick(t0 + ms(100)).await;
        looper.tick(t0 + ms(700)).await;
        assert_eq!(looper.engine.plays, vec![1]);
        assert_eq!(
            looper.store.load(),
            Some(PersistedState {
                active_index: 1,
                alarm: AlarmSetting::default(),
            })
        );
    }

    #[tokio::test]
    async fn volume_is_adopted_without_commit() {
        let mut looper = looper("volume");
        let t0 = Instant::now();

        looper.panel.state.volume = 40;
        looper.tick(t0).await;
        assert_eq!(looper.volume, 40);

        looper.tick(t0 + ms(1000)).await;
        assert!(looper.engine.plays.is_empty());
        assert_eq!(looper.store.load(), None);
    }

    #[tokio::test]
    async fn alarm_changes_save_without_playing() {
        let mut looper = looper("alarm");
        let t0 = Instant::now();

        looper.panel.state.alarm = AlarmSetting {
            hours: 7,
            minutes: 30,
            enabled: true,
        };
        looper.tick(t0).await;
        looper.tick(t0 + ms(600)).await;

        assert!(looper.engine.plays.is_empty());
        assert_eq!(
            looper.store.load(),
            Some(PersistedState {
                active_index: 0,
                alarm: AlarmSetting {
                    hours: 7,
                    minutes: 30,
                    enabled: true,
                },
            })
        );
    }

    #[tokio::test]
    async fn selection_and_alarm_commit_together_with_one_save() {
        let mut looper = looper("combined");
        let t0 = Instant::now();

        looper.panel.state.encoder_index = 2;
        looper.panel.state.alarm = AlarmSetting {
            hours: 6,
            minutes: 15,
            enabled: true,
        };
        looper.tick(t0).await;
        looper.tick(t0 + ms(600)).await;

        assert_eq!(looper.engine.plays, vec![2]);
        assert_eq!(
            looper.store.load(),
            Some(PersistedState {
                active_index: 2,
                alarm: AlarmSetting {
                    hours: 6,
                    minutes: 15,
                    enabled: true,
                },
            })
        );
    }

    #[tokio::test]
    async fn alarm_ignored_when_the_panel_has_none() {
        let mut looper = looper("no-alarm");
        looper.display.alarm = false;
        let t0 = Instant::now();

        looper.panel.state.alarm = AlarmSetting {
            hours: 7,
            minutes: 0,
            enabled: true,
        };
        looper.tick(t0).await;
        looper.tick(t0 + ms(600)).await;

        assert!(!looper.alarm_dirty);
        assert_eq!(looper.store.load(), None);
    }

    #[tokio::test]
    async fn failed_play_leaves_the_whole_commit_pending() {
        let mut looper = looper("play-fail");
        looper.engine.fail_plays = 1;
        let t0 = Instant::now();

        looper.panel.state.encoder_index = 1;
        looper.tick(t0).await;
        looper.tick(t0 + ms(600)).await;
        // first attempt failed: no commit, no save
        assert!(looper.engine.plays.is_empty());
        assert_eq!(looper.committed_index, 0);
        assert_eq!(looper.store.load(), None);

        looper.tick(t0 + ms(700)).await;
        assert_eq!(looper.engine.plays, vec![1]);
        assert_eq!(looper.store.load().unwrap().active_index, 1);
    }

    #[tokio::test]
    async fn display_fields_are_written_once_and_diffed() {
        let mut looper = looper("diff");
        let t0 = Instant::now();

        looper.tick(t0).await;
        let first = display_writes(&looper.panel);
        assert_eq!(first, vec!["S0:RADIO A", "S1:", "S2:"]);

        looper.tick(t0 + ms(100)).await;
        assert_eq!(display_writes(&looper.panel), first);

        looper.panel.state.encoder_index = 1;
        looper.tick(t0 + ms(200)).await;
        let after = display_writes(&looper.panel);
        assert_eq!(after.len(), first.len() + 1);
        assert_eq!(after.last().unwrap(), "S0:RADIO B");
    }

    #[tokio::test]
    async fn display_tracks_the_knob_before_the_commit() {
        let mut looper = looper("knob-display");
        let t0 = Instant::now();

        looper.panel.state.encoder_index = 2;
        looper.tick(t0).await;
        assert!(looper.engine.plays.is_empty());
        assert!(display_writes(&looper.panel).contains(&"S0:RADIO C".to_string()));
    }

    #[tokio::test]
    async fn failed_write_is_retried_next_tick() {
        let mut looper = looper("retry");
        let t0 = Instant::now();

        looper.panel.fail_sends = true;
        looper.tick(t0).await;
        assert!(looper.panel.sent.is_empty());

        looper.panel.fail_sends = false;
        looper.tick(t0 + ms(100)).await;
        assert_eq!(
            display_writes(&looper.panel),
            vec!["S0:RADIO A", "S1:", "S2:"]
        );
    }

    #[tokio::test]
    async fn handshake_request_forces_a_full_repaint() {
        let mut looper = looper("repaint");
        let t0 = Instant::now();

        looper.tick(t0).await;
        looper.tick(t0 + ms(100)).await;
        assert_eq!(display_writes(&looper.panel).len(), 3);

        looper.panel.polls.push_back(LinkPoll::HandshakeRequested);
        looper.tick(t0 + ms(200)).await;
        assert_eq!(display_writes(&looper.panel).len(), 6);
    }

    #[tokio::test]
    async fn title_lands_on_the_bottom_rows() {
        let mut looper = looper("title");
        looper.engine.title = Some("Night Drive".to_string());
        looper.tick(Instant::now()).await;
        assert_eq!(
            display_writes(&looper.panel),
            vec!["S0:RADIO A", "S1:", "S2:NIGHT DRIVE"]
        );
    }

    #[tokio::test]
    async fn long_title_wraps_across_both_rows() {
        let mut looper = looper("title-wrap");
        looper.engine.title = Some("A Title That Is Rather Too Long".to_string());
        looper.tick(Instant::now()).await;
        assert_eq!(
            display_writes(&looper.panel),
            vec!["S0:RADIO A", "S1:A TITLE THAT IS", "S2:RATHER TOO LONG"]
        );
    }

    #[tokio::test]
    async fn tall_panel_gets_a_position_label() {
        let mut looper = looper("position");
        looper.display.rows = 5;
        looper.panel.state.encoder_index = 1;
        looper.tick(Instant::now()).await;
        assert_eq!(
            display_writes(&looper.panel),
            vec!["S0:RADIO B", "S1:2/3", "S2:", "S3:"]
        );
    }

    #[tokio::test]
    async fn now_playing_polls_at_its_own_cadence() {
        let mut looper = looper("cadence");
        let t0 = Instant::now();

        looper.tick(t0).await;
        assert_eq!(looper.engine.title_polls, 1);
        looper.tick(t0 + ms(100)).await;
        looper.tick(t0 + ms(300)).await;
        assert_eq!(looper.engine.title_polls, 1);
        looper.tick(t0 + ms(600)).await;
        assert_eq!(looper.engine.title_polls, 2);
    }
}
