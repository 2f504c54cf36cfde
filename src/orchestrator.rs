//! The event loop that keeps the pipelines and the downmix engine consistent.
//!
//! The orchestrator is the only consumer of the event bus and the only code
//! that touches pipeline lifecycles or downmix knobs. It handles one event
//! completely, including any teardown it triggers, before receiving the
//! next one.
//!
//! Every announcement goes through the same sequence: disengage mixing,
//! tear the old run down, select the tone, run, engage mixing. Status
//! reports carry the epoch of the run that produced them, so a completion
//! from a run that has already been torn down is recognised and dropped.

use crate::bus::{
    AudioInfo, BusError, BusEvent, ElementStatus, EventBus, EventPoster, PeripheralKind, SourceId,
};
use crate::config::Config;
use crate::downmix::{DownmixControl, GainPlan, SourceSlot, WorkMode};
use crate::element::ElementConfig;
use crate::error::{Result, TonemixError};
use crate::link::Peripheral;
use crate::pipeline::{AudioPipeline, names, sequencer};
use crate::tone::{ToneKind, ToneTable};
use crossbeam_channel::Sender;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// What is currently true about playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Starting,
    Announcing,
    BaseOnly,
    LinkLostAnnouncing,
    ShuttingDown,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorState::Starting => "starting",
            OrchestratorState::Announcing => "announcing",
            OrchestratorState::BaseOnly => "base-only",
            OrchestratorState::LinkLostAnnouncing => "link-lost-announcing",
            OrchestratorState::ShuttingDown => "shutting-down",
        };
        f.write_str(name)
    }
}

/// The event that caused a transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Startup,
    MusicInfo { info: AudioInfo },
    LinkDisconnected,
    AnnouncementDone { status: ElementStatus },
    OutputDone { status: ElementStatus },
    ShutdownRequested,
    BusClosed,
}

/// One processed event, as published to transition subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub from: OrchestratorState,
    pub to: OrchestratorState,
    pub trigger: Trigger,
    /// Tone started by this transition, if any.
    pub tone: Option<ToneKind>,
    pub link_down: bool,
}

/// Why the event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The output element stopped or finished.
    OutputFinished,
    /// The disconnect announcement played out.
    LinkLost,
    /// A shutdown sentinel arrived.
    Requested,
    /// Every poster is gone.
    BusClosed,
}

/// Whether the loop keeps going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit(ExitReason),
}

/// The three pipelines the orchestrator owns.
pub struct Pipelines {
    pub base: Box<dyn AudioPipeline>,
    pub announcement: Box<dyn AudioPipeline>,
    pub mix: Box<dyn AudioPipeline>,
}

/// Runtime parameters and the element names the orchestrator addresses.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub tones: ToneTable,
    /// Announcement reader that receives the tone locator.
    pub tone_reader: String,
    /// Base filter reconfigured when the link reports its format.
    pub base_resampler: String,
    /// Base reader whose MusicInfo reports are acted on.
    pub link_reader: String,
    /// Announcement element whose completion ends an announcement.
    pub announcement_tail: String,
    /// Mix element whose completion ends the loop.
    pub output: String,
    pub base_plan: GainPlan,
    pub announcement_plan: GainPlan,
    pub announcement_timeout: Duration,
    pub stop_timeout: Option<Duration>,
}

impl OrchestratorConfig {
    pub fn from_config(config: &Config) -> Self {
        let (base_plan, announcement_plan) =
            GainPlan::crossfade(config.downmix.duck_db, config.downmix.transition_ms);
        Self {
            tones: ToneTable::from_config(&config.tones),
            tone_reader: names::TONE_FILE.to_string(),
            base_resampler: names::BASE_FILTER.to_string(),
            link_reader: names::LINK_READER.to_string(),
            announcement_tail: names::TONE_RAW.to_string(),
            output: names::OUTPUT.to_string(),
            base_plan,
            announcement_plan,
            announcement_timeout: config.downmix.announcement_timeout(),
            stop_timeout: config.shutdown.stop_timeout(),
        }
    }
}

/// Event sources the state machine reacts to.
struct Watched {
    link: SourceId,
    link_reader: SourceId,
    announcement_tail: SourceId,
    output: SourceId,
}

pub struct Orchestrator {
    bus: EventBus,
    pipelines: Pipelines,
    downmix: Arc<dyn DownmixControl>,
    config: OrchestratorConfig,
    watched: Watched,
    state: OrchestratorState,
    link_down: bool,
    peripherals: Vec<Box<dyn Peripheral>>,
    transitions: Option<Sender<Transition>>,
}

fn resolve(pipeline: &dyn AudioPipeline, element: &str) -> Result<SourceId> {
    pipeline
        .source_id(element)
        .ok_or_else(|| TonemixError::UnknownElement {
            pipeline: pipeline.name().to_string(),
            element: element.to_string(),
        })
}

impl Orchestrator {
    /// Takes ownership of the bus and the pipelines. `link` is the source
    /// identity of the wireless link peripheral.
    pub fn new(
        bus: EventBus,
        pipelines: Pipelines,
        downmix: Arc<dyn DownmixControl>,
        config: OrchestratorConfig,
        link: SourceId,
    ) -> Result<Self> {
        let watched = Watched {
            link,
            link_reader: resolve(pipelines.base.as_ref(), &config.link_reader)?,
            announcement_tail: resolve(pipelines.announcement.as_ref(), &config.announcement_tail)?,
            output: resolve(pipelines.mix.as_ref(), &config.output)?,
        };
        Ok(Self {
            bus,
            pipelines,
            downmix,
            config,
            watched,
            state: OrchestratorState::Starting,
            link_down: false,
            peripherals: Vec::new(),
            transitions: None,
        })
    }

    /// Adds a peripheral, started after the pipelines and stopped after them.
    pub fn with_peripheral(mut self, peripheral: Box<dyn Peripheral>) -> Self {
        self.peripherals.push(peripheral);
        self
    }

    /// Publishes a [`Transition`] for every processed event.
    pub fn with_transition_sender(mut self, tx: Sender<Transition>) -> Self {
        self.transitions = Some(tx);
        self
    }

    /// A poster onto the orchestrator's bus, e.g. for a shutdown sentinel.
    pub fn poster(&self) -> EventPoster {
        self.bus.poster()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn link_down(&self) -> bool {
        self.link_down
    }

    /// Arms the crossfade, starts base and mix, plays the ready tone and
    /// starts the peripherals. Any error here is fatal.
    pub fn start(&mut self) -> Result<()> {
        self.downmix.set_gain_plan(SourceSlot::Base, self.config.base_plan)?;
        self.downmix.set_gain_plan(SourceSlot::Announcement, self.config.announcement_plan)?;
        for slot in SourceSlot::ALL {
            self.downmix.set_admission_timeout(slot, Duration::ZERO)?;
        }

        self.pipelines.base.run()?;
        self.pipelines.mix.run()?;
        self.downmix.set_work_mode(WorkMode::Bypass)?;

        self.play_announcement(ToneKind::ReadyToConnect)?;
        self.transition(
            OrchestratorState::Announcing,
            Trigger::Startup,
            Some(ToneKind::ReadyToConnect),
        );

        for peripheral in &mut self.peripherals {
            peripheral.start()?;
            debug!(peripheral = peripheral.name(), "peripheral started");
        }
        Ok(())
    }

    /// Consumes the bus until an event ends the loop.
    ///
    /// Malformed events are logged and dropped. Errors are only returned
    /// for downmix control failures, which leave the engine state unknown.
    pub fn run(&mut self) -> Result<ExitReason> {
        loop {
            let event = match self.bus.listen() {
                Ok(event) => event,
                Err(BusError::Disconnected) => {
                    self.transition(OrchestratorState::ShuttingDown, Trigger::BusClosed, None);
                    return Ok(ExitReason::BusClosed);
                }
                Err(e) => {
                    warn!(error = %e, "dropping bus event");
                    continue;
                }
            };

            if let Step::Exit(reason) = self.handle(event)? {
                info!(?reason, "event loop finished");
                return Ok(reason);
            }
        }
    }

    /// Processes one event to completion.
    pub fn handle(&mut self, event: BusEvent) -> Result<Step> {
        match event {
            BusEvent::Shutdown => {
                self.transition(
                    OrchestratorState::ShuttingDown,
                    Trigger::ShutdownRequested,
                    None,
                );
                Ok(Step::Exit(ExitReason::Requested))
            }
            BusEvent::ElementStatus { source, status, .. }
                if source == self.watched.output && status.is_terminal() =>
            {
                self.transition(
                    OrchestratorState::ShuttingDown,
                    Trigger::OutputDone { status },
                    None,
                );
                Ok(Step::Exit(ExitReason::OutputFinished))
            }
            BusEvent::ElementStatus {
                source,
                status,
                epoch,
            } if source == self.watched.announcement_tail && status.is_terminal() => {
                self.on_announcement_done(status, epoch)
            }
            BusEvent::MusicInfo { source, info } if source == self.watched.link_reader => {
                self.on_music_info(info)
            }
            BusEvent::Peripheral {
                source,
                kind: PeripheralKind::Disconnected,
            } if source == self.watched.link => self.on_link_lost(),
            other => {
                trace!(event = ?other, state = %self.state, "event ignored");
                Ok(Step::Continue)
            }
        }
    }

    fn on_announcement_done(&mut self, status: ElementStatus, epoch: u64) -> Result<Step> {
        if !matches!(
            self.state,
            OrchestratorState::Announcing | OrchestratorState::LinkLostAnnouncing
        ) {
            debug!(state = %self.state, ?status, "announcement completion ignored");
            return Ok(Step::Continue);
        }
        let current = self.pipelines.announcement.epoch();
        if epoch != current {
            debug!(epoch, current, "stale announcement completion ignored");
            return Ok(Step::Continue);
        }

        self.disengage()?;
        self.teardown_announcement();

        let trigger = Trigger::AnnouncementDone { status };
        if self.link_down {
            self.transition(OrchestratorState::ShuttingDown, trigger, None);
            Ok(Step::Exit(ExitReason::LinkLost))
        } else {
            self.transition(OrchestratorState::BaseOnly, trigger, None);
            Ok(Step::Continue)
        }
    }

    /// The reader's own info is authoritative; the report's payload is the
    /// fallback when the reader has none.
    fn on_music_info(&mut self, reported: AudioInfo) -> Result<Step> {
        let info = match self.pipelines.base.element_info(&self.config.link_reader) {
            Ok(Some(current)) => {
                if current != reported {
                    debug!(%reported, %current, "music info superseded by reader format");
                }
                current
            }
            Ok(None) => reported,
            Err(e) => {
                warn!(error = %e, "link reader info unavailable");
                reported
            }
        };

        let format = ElementConfig::SourceFormat {
            sample_rate: info.sample_rate,
            channels: info.channels,
        };
        if let Err(e) = self
            .pipelines
            .base
            .configure(&self.config.base_resampler, format)
        {
            warn!(error = %e, %info, "base resampler kept its previous format");
        }

        self.play_announcement(ToneKind::Connected)?;
        self.transition(
            OrchestratorState::Announcing,
            Trigger::MusicInfo { info },
            Some(ToneKind::Connected),
        );
        Ok(Step::Continue)
    }

    fn on_link_lost(&mut self) -> Result<Step> {
        self.link_down = true;
        self.play_announcement(ToneKind::Disconnected)?;
        self.transition(
            OrchestratorState::LinkLostAnnouncing,
            Trigger::LinkDisconnected,
            Some(ToneKind::Disconnected),
        );
        Ok(Step::Continue)
    }

    /// Disengage, tear down, select, run, engage.
    ///
    /// A run that fails to start is reported as a STOPPED of the tail so the
    /// state machine moves on through the normal completion path.
    fn play_announcement(&mut self, tone: ToneKind) -> Result<()> {
        if self.pipelines.announcement.epoch() > 0 {
            self.disengage()?;
            self.teardown_announcement();
        }

        let uri = self.config.tones.locator(tone).to_string();
        if let Err(e) = self
            .pipelines
            .announcement
            .configure(&self.config.tone_reader, ElementConfig::SourceUri(uri))
        {
            warn!(error = %e, %tone, "tone not selected");
        }

        if let Err(e) = self.pipelines.announcement.run() {
            warn!(error = %e, %tone, "announcement failed to start");
            let epoch = self.pipelines.announcement.epoch();
            self.bus
                .poster()
                .status(self.watched.announcement_tail, ElementStatus::Stopped, epoch);
        }

        self.engage()
    }

    fn teardown_announcement(&mut self) {
        if let Err(e) =
            sequencer::teardown(self.pipelines.announcement.as_mut(), self.config.stop_timeout)
        {
            warn!(error = %e, "announcement teardown incomplete");
        }
    }

    fn engage(&self) -> Result<()> {
        self.downmix.set_work_mode(WorkMode::SwitchOn)?;
        self.downmix.set_admission_timeout(SourceSlot::Base, Duration::ZERO)?;
        self.downmix.set_admission_timeout(
            SourceSlot::Announcement,
            self.config.announcement_timeout,
        )
    }

    fn disengage(&self) -> Result<()> {
        for slot in SourceSlot::ALL {
            self.downmix.set_admission_timeout(slot, Duration::ZERO)?;
        }
        self.downmix.set_work_mode(WorkMode::SwitchOff)
    }

    /// Nothing consumes the engine once the mix pipeline is down; leave it
    /// passing the base slot through with no slot blocking.
    fn quiesce_downmix(&self) -> Result<()> {
        for slot in SourceSlot::ALL {
            self.downmix.set_admission_timeout(slot, Duration::ZERO)?;
        }
        self.downmix.set_work_mode(WorkMode::Bypass)?;
        debug!("downmix engine quiesced");
        Ok(())
    }

    fn transition(&mut self, to: OrchestratorState, trigger: Trigger, tone: Option<ToneKind>) {
        let from = self.state;
        self.state = to;
        info!(%from, %to, ?trigger, ?tone, link_down = self.link_down, "state transition");

        let record = Transition {
            from,
            to,
            trigger,
            tone,
            link_down: self.link_down,
        };
        let closed = self
            .transitions
            .as_ref()
            .is_some_and(|tx| tx.send(record).is_err());
        if closed {
            self.transitions = None;
        }
    }

    /// Stops everything in dependency order: mix, base, announcement, the
    /// downmix engine, then peripherals. Failures are logged; shutdown always
    /// runs to the end.
    pub fn shutdown(mut self) {
        self.state = OrchestratorState::ShuttingDown;
        let timeout = self.config.stop_timeout;

        for pipeline in [
            &mut self.pipelines.mix,
            &mut self.pipelines.base,
            &mut self.pipelines.announcement,
        ] {
            if let Err(e) = sequencer::shut_down(pipeline.as_mut(), timeout) {
                warn!(pipeline = pipeline.name(), error = %e, "pipeline shutdown incomplete");
            }
        }
        if let Err(e) = self.quiesce_downmix() {
            warn!(error = %e, "downmix engine left engaged");
        }

        for peripheral in &mut self.peripherals {
            if let Err(e) = peripheral.stop() {
                warn!(
                    peripheral = peripheral.name(),
                    error = %e,
                    "peripheral did not stop cleanly"
                );
            }
        }
        info!("shutdown complete");
    }
}
