/// The poll loop: snapshot -> decode -> ChannelState -> inject / generate.
///
/// Built via `Orchestrator::builder()`. Each `tick` polls every watched
/// address once; `run` repeats ticks until asked to stop.
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bridge::capture::ScreenshotSource;
use crate::bridge::generator::{self, GenerationError, GenerationRequest, Generator};
use crate::bridge::transport::{Transport, TransportError};
use crate::config::{ConfigError, WatchConfig};
use crate::core::channel::ChannelState;
use crate::core::codec::{self, TaggedText};
use crate::core::gate::{GatePermit, GenerationGate};
use crate::core::menu;
use crate::schema::gossip::Gossip;
use crate::schema::persona::{self, ProfileError};

/// Written while the generator works, so the text box does not look frozen.
pub const THINKING_TEXT: &str = ".<Pause [0A]>.<Pause [0A]>.<Pause [0A]><Press A><Clear Text>";

/// Lets the game draw the placeholder before a screenshot is taken.
const SCREENSHOT_SETTLE: Duration = Duration::from_millis(150);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("persona error: {0}")]
    Profile(#[from] ProfileError),
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("orchestrator needs a {0}")]
    Missing(&'static str),
}

/// What happened on one address during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickEvent {
    /// Text was read and fed to the channel; nothing was written.
    Observed,
    /// The chatty option was written into a choice menu.
    Injected,
    /// A generation worker was started; its result shows up on a later tick.
    GenerationStarted,
    /// Generated text was written.
    Generated,
    /// Generation failed; a fallback line was written if possible.
    GenerationFailed,
}

/// Per-address tick summary, for display and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub address: u32,
    pub speaker: Option<String>,
    pub event: TickEvent,
    /// Text as it now stands in memory, as far as this tick knows.
    pub text: TaggedText,
}

impl TickReport {
    pub fn did_generate(&self) -> bool {
        self.event == TickEvent::Generated
    }
}

#[derive(Debug)]
struct Channel {
    address: u32,
    state: ChannelState,
    last_text: Option<TaggedText>,
}

/// A background generation still owed a result. The poll thread keeps the
/// permit: dropping the job frees the gate, whether the result was applied
/// or the job timed out. Workers never touch the transport.
#[derive(Debug)]
struct PendingJob {
    id: u64,
    started: Instant,
    worker: JoinHandle<()>,
    _permit: GatePermit,
}

/// A finished background generation.
struct Outcome {
    address: u32,
    job: u64,
    result: Result<String, GenerationError>,
}

/// Everything a generation attempt needs, detached from the orchestrator so
/// it can run on a worker thread.
struct GenerationJob {
    speaker: Option<String>,
    known: Vec<String>,
    generator: Arc<dyn Generator>,
    screenshots: Option<Arc<dyn ScreenshotSource>>,
    gossip: Option<Arc<dyn Gossip>>,
}

impl GenerationJob {
    fn run(self) -> Result<String, GenerationError> {
        let mut request = GenerationRequest::new(self.speaker.as_deref());
        if let Some(source) = &self.screenshots {
            thread::sleep(SCREENSHOT_SETTLE);
            if let Some(path) = source.capture() {
                debug!(path = %path.display(), "attaching screenshot");
                request.images.push(path);
            }
        }
        if let (Some(gossip), Some(speaker)) = (&self.gossip, self.speaker.as_deref()) {
            gossip.observe_interaction(speaker, &self.known);
            request.gossip = gossip.context_for(speaker, &self.known);
        }
        self.generator.generate(&request)
    }
}

/// Watches dialogue buffers and drives menu injection and generation.
pub struct Orchestrator {
    config: WatchConfig,
    transport: Arc<dyn Transport>,
    generator: Arc<dyn Generator>,
    screenshots: Option<Arc<dyn ScreenshotSource>>,
    gossip: Option<Arc<dyn Gossip>>,
    gate: Arc<GenerationGate>,
    channels: Vec<Channel>,
    known_speakers: BTreeSet<String>,
    rng: StdRng,
    pending: FxHashMap<u32, PendingJob>,
    next_job: u64,
    outcome_tx: Sender<Outcome>,
    outcome_rx: Receiver<Outcome>,
}

/// Builder for constructing an `Orchestrator`.
pub struct OrchestratorBuilder {
    config: WatchConfig,
    transport: Option<Arc<dyn Transport>>,
    generator: Option<Arc<dyn Generator>>,
    screenshots: Option<Arc<dyn ScreenshotSource>>,
    gossip: Option<Arc<dyn Gossip>>,
    gate: Option<Arc<GenerationGate>>,
    seed: Option<u64>,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn screenshots(mut self, source: Arc<dyn ScreenshotSource>) -> Self {
        self.screenshots = Some(source);
        self
    }

    pub fn gossip(mut self, gossip: Arc<dyn Gossip>) -> Self {
        self.gossip = Some(gossip);
        self
    }

    /// Share a gate with another orchestrator (or a test).
    pub fn gate(mut self, gate: Arc<GenerationGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Seed for fallback-line selection.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<Orchestrator, WatchError> {
        let config = self.config.validated()?;
        let transport = self.transport.ok_or(WatchError::Missing("transport"))?;
        let generator = self.generator.ok_or(WatchError::Missing("generator"))?;
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let channels = config
            .addresses
            .iter()
            .map(|&address| Channel {
                address,
                state: ChannelState::new(),
                last_text: None,
            })
            .collect();
        let (outcome_tx, outcome_rx) = mpsc::channel();
        Ok(Orchestrator {
            config,
            transport,
            generator,
            screenshots: self.screenshots,
            gossip: self.gossip,
            gate: self.gate.unwrap_or_else(GenerationGate::new),
            channels,
            known_speakers: BTreeSet::new(),
            rng,
            pending: FxHashMap::default(),
            next_job: 0,
            outcome_tx,
            outcome_rx,
        })
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder {
            config: WatchConfig::default(),
            transport: None,
            generator: None,
            screenshots: None,
            gossip: None,
            gate: None,
            seed: None,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<GenerationGate> {
        &self.gate
    }

    pub fn channel_state(&self, address: u32) -> Option<&ChannelState> {
        self.channel(address).map(|c| &c.state)
    }

    /// The text this orchestrator believes is at `address`.
    pub fn last_text(&self, address: u32) -> Option<&TaggedText> {
        self.channel(address).and_then(|c| c.last_text.as_ref())
    }

    pub fn known_speakers(&self) -> impl Iterator<Item = &str> {
        self.known_speakers.iter().map(String::as_str)
    }

    /// Whether a background generation is still outstanding anywhere.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    fn channel(&self, address: u32) -> Option<&Channel> {
        self.channels.iter().find(|c| c.address == address)
    }

    /// Connect the transport. Failure here is fatal.
    pub fn connect(&self) -> Result<(), WatchError> {
        self.transport.connect()?;
        Ok(())
    }

    /// Connect, then tick every poll interval until `running` goes false.
    pub fn run<F>(&mut self, running: &AtomicBool, mut on_report: F) -> Result<(), WatchError>
    where
        F: FnMut(&TickReport),
    {
        self.connect()?;
        info!(addresses = self.channels.len(), "watching dialogue");
        while running.load(Ordering::SeqCst) {
            for report in self.tick(Instant::now()) {
                on_report(&report);
            }
            thread::sleep(self.config.poll_interval());
        }
        info!("watch loop stopped");
        Ok(())
    }

    /// One poll cycle over every address.
    pub fn tick(&mut self, now: Instant) -> Vec<TickReport> {
        let mut reports = self.collect_outcomes(now);

        let speaker = self.read_speaker();
        if let Some(name) = &speaker {
            self.known_speakers.insert(name.clone());
        }
        if self.config.enable_gossip && !self.known_speakers.is_empty() {
            if let Some(gossip) = &self.gossip {
                let known: Vec<String> = self.known_speakers.iter().cloned().collect();
                gossip.refresh(&known);
            }
        }

        for idx in 0..self.channels.len() {
            if let Some(report) = self.poll_channel(idx, speaker.as_deref(), now) {
                reports.push(report);
            }
        }
        reports
    }

    fn read_speaker(&self) -> Option<String> {
        let address = self.config.speaker_address?;
        match self.transport.read(address, self.config.speaker_read_size) {
            Ok(raw) => persona::parse_speaker(&raw),
            Err(err) => {
                debug!(%err, "speaker read failed");
                None
            }
        }
    }

    fn poll_channel(&mut self, idx: usize, speaker: Option<&str>, now: Instant) -> Option<TickReport> {
        let address = self.channels[idx].address;
        if self.gate.is_in_flight(address) {
            return None;
        }

        let raw = match self.transport.read(address, self.config.read_size) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(address = format_args!("0x{address:08X}"), %err, "read failed, retrying next tick");
                return None;
            }
        };
        let text = codec::decode(&raw);

        let channel = &mut self.channels[idx];
        let changed = channel.last_text.as_ref() != Some(&text);
        if !changed && !self.config.print_all {
            return None;
        }
        channel.state.observe(&text);

        if self.gate.is_suppressed(address, now) {
            if text.ends_conversation() {
                self.gate.clear_suppression(address);
                channel.state.reset();
            }
            channel.last_text = Some(text.clone());
            return Some(self.report(address, speaker, TickEvent::Observed, text));
        }

        if let Some(predicted) = self.try_inject(idx, &text) {
            return Some(self.report(address, speaker, TickEvent::Injected, predicted));
        }

        let event = if self.channels[idx].state.wants_generation() {
            self.start_generation(idx, &text, speaker, now)
        } else {
            None
        };

        let channel = &mut self.channels[idx];
        match event {
            Some(event) => {
                let shown = channel.last_text.clone().unwrap_or_else(|| text.clone());
                Some(self.report(address, speaker, event, shown))
            }
            None => {
                channel.last_text = Some(text.clone());
                if text.ends_conversation() {
                    channel.state.reset();
                } else if !channel.state.awaiting_choice_resolution {
                    channel.state.chatty_requested = false;
                }
                Some(self.report(address, speaker, TickEvent::Observed, text))
            }
        }
    }

    /// Write the chatty option into an open menu when the channel allows it.
    /// Returns the text now in memory on success.
    fn try_inject(&mut self, idx: usize, text: &TaggedText) -> Option<TaggedText> {
        let channel = &mut self.channels[idx];
        let address = channel.address;
        let state = &mut channel.state;
        if !text.has_open_menu() || state.menu_injected {
            return None;
        }
        if !state.is_menu_eligible() {
            if !state.menu_skip_logged {
                info!(
                    address = format_args!("0x{address:08X}"),
                    lines_seen = state.lines_seen,
                    awaiting = state.awaiting_choice_resolution,
                    chatty_requested = state.chatty_requested,
                    "menu not eligible for chatty option yet"
                );
                state.menu_skip_logged = true;
            }
            return None;
        }

        let modified = menu::inject_chatty_option(&text.to_string())?;
        let bytes = codec::encode(&modified);
        if let Err(err) = self.transport.write(address, &bytes) {
            warn!(address = format_args!("0x{address:08X}"), %err, "menu injection write failed");
            return None;
        }
        let predicted = codec::decode(&bytes);
        state.mark_menu_injected();
        channel.last_text = Some(predicted.clone());
        info!(address = format_args!("0x{address:08X}"), "injected chatty option into choice menu");
        Some(predicted)
    }

    /// Acquire the gate and run (or start) one generation for channel `idx`.
    /// `None` means the gate was busy and nothing happened.
    fn start_generation(
        &mut self,
        idx: usize,
        text: &TaggedText,
        speaker: Option<&str>,
        now: Instant,
    ) -> Option<TickEvent> {
        let address = self.channels[idx].address;
        let Some(permit) = self.gate.try_acquire(address) else {
            debug!(address = format_args!("0x{address:08X}"), "generation gate busy");
            return None;
        };

        let channel = &mut self.channels[idx];
        channel.state.chatty_requested = false;
        channel.last_text = Some(text.clone());

        if let Err(err) = self.transport.write(address, &codec::encode(THINKING_TEXT)) {
            warn!(address = format_args!("0x{address:08X}"), %err, "placeholder write failed");
            channel.state.clear_menu();
            return Some(TickEvent::GenerationFailed);
        }

        let job = GenerationJob {
            speaker: speaker.map(str::to_string),
            known: self.known_speakers.iter().cloned().collect(),
            generator: Arc::clone(&self.generator),
            screenshots: self
                .config
                .enable_screenshot
                .then(|| self.screenshots.clone())
                .flatten(),
            gossip: self.config.enable_gossip.then(|| self.gossip.clone()).flatten(),
        };
        info!(
            address = format_args!("0x{address:08X}"),
            speaker = speaker.unwrap_or(generator::DEFAULT_SPEAKER),
            "generating dialogue"
        );

        if !self.config.background_generation {
            let result = job.run();
            let event = self.apply_result(idx, result, now);
            drop(permit);
            return Some(event);
        }

        let id = self.next_job;
        self.next_job += 1;
        let tx = self.outcome_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("generate-{address:08X}"))
            .spawn(move || {
                let result = job.run();
                // The orchestrator may already be gone.
                let _ = tx.send(Outcome {
                    address,
                    job: id,
                    result,
                });
            });
        match spawned {
            Ok(worker) => {
                self.pending.insert(
                    address,
                    PendingJob {
                        id,
                        started: now,
                        worker,
                        _permit: permit,
                    },
                );
                Some(TickEvent::GenerationStarted)
            }
            Err(err) => {
                warn!(%err, "could not spawn generation worker");
                self.channels[idx].state.clear_menu();
                Some(TickEvent::GenerationFailed)
            }
        }
    }

    /// Apply finished background work and enforce the generation timeout.
    ///
    /// A job leaves `pending` (and frees the gate) only after its result, or
    /// the fallback standing in for it, has been written. Results from jobs
    /// no longer pending are dropped.
    fn collect_outcomes(&mut self, now: Instant) -> Vec<TickReport> {
        let mut reports = Vec::new();

        // Workers send before they exit, so any job finished at this point
        // has its outcome queued already.
        let finished: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, job)| job.worker.is_finished())
            .map(|(&address, _)| address)
            .collect();

        while let Ok(outcome) = self.outcome_rx.try_recv() {
            let current = self
                .pending
                .get(&outcome.address)
                .is_some_and(|job| job.id == outcome.job);
            if !current {
                debug!(address = format_args!("0x{:08X}", outcome.address), "discarding late generation");
                continue;
            }
            self.finish_job(outcome.address, outcome.result, now, &mut reports);
        }

        for address in finished {
            if self.pending.contains_key(&address) {
                self.finish_job(address, Err(GenerationError::WorkerLost), now, &mut reports);
            }
        }

        let timeout = self.config.generation_timeout();
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, job)| now.saturating_duration_since(job.started) >= timeout)
            .map(|(&address, _)| address)
            .collect();
        for address in expired {
            self.finish_job(address, Err(GenerationError::Timeout(timeout)), now, &mut reports);
        }
        reports
    }

    /// Apply `result` for the pending job on `address`, then release it.
    fn finish_job(
        &mut self,
        address: u32,
        result: Result<String, GenerationError>,
        now: Instant,
        reports: &mut Vec<TickReport>,
    ) {
        if let Some(idx) = self.index_of(address) {
            let event = self.apply_result(idx, result, now);
            reports.push(self.report_current(idx, event));
        }
        self.pending.remove(&address);
    }

    /// Write the generated line, or a fallback on failure, and settle the
    /// channel's flags.
    fn apply_result(
        &mut self,
        idx: usize,
        result: Result<String, GenerationError>,
        now: Instant,
    ) -> TickEvent {
        let address = self.channels[idx].address;
        let event = match result {
            Ok(line) => {
                let bytes = codec::encode(&line);
                match self.transport.write(address, &bytes) {
                    Ok(()) => {
                        self.channels[idx].last_text = Some(codec::decode(&bytes));
                        match now.checked_add(self.config.suppress_window()) {
                            Some(until) => self.gate.suppress(address, until),
                            None => warn!("suppression window out of range, not suppressing"),
                        }
                        info!(address = format_args!("0x{address:08X}"), "wrote generated dialogue");
                        TickEvent::Generated
                    }
                    Err(err) => {
                        warn!(address = format_args!("0x{address:08X}"), %err, "generated text write failed");
                        TickEvent::GenerationFailed
                    }
                }
            }
            Err(err) => {
                warn!(address = format_args!("0x{address:08X}"), %err, "generation failed");
                let bytes = codec::encode(generator::fallback_line(&mut self.rng));
                match self.transport.write(address, &bytes) {
                    Ok(()) => self.channels[idx].last_text = Some(codec::decode(&bytes)),
                    Err(err) => warn!(%err, "fallback write failed"),
                }
                TickEvent::GenerationFailed
            }
        };
        self.channels[idx].state.clear_menu();
        event
    }

    fn index_of(&self, address: u32) -> Option<usize> {
        self.channels.iter().position(|c| c.address == address)
    }

    fn report(&self, address: u32, speaker: Option<&str>, event: TickEvent, text: TaggedText) -> TickReport {
        TickReport {
            address,
            speaker: speaker.map(str::to_string),
            event,
            text,
        }
    }

    fn report_current(&self, idx: usize, event: TickEvent) -> TickReport {
        let channel = &self.channels[idx];
        TickReport {
            address: channel.address,
            speaker: None,
            event,
            text: channel.last_text.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::transport::MemoryTransport;

    const ADDR: u32 = 0x8129_8360;

    fn setup(generator: Arc<dyn Generator>) -> (Arc<MemoryTransport>, Orchestrator) {
        let mem = Arc::new(MemoryTransport::new(0x8120_0000, 0x10_0000));
        let config = WatchConfig {
            speaker_address: None,
            background_generation: false,
            ..WatchConfig::default()
        };
        let orchestrator = Orchestrator::builder()
            .config(config)
            .transport(mem.clone())
            .generator(generator)
            .seed(7)
            .build()
            .unwrap();
        (mem, orchestrator)
    }

    fn show(mem: &MemoryTransport, text: &str) {
        mem.poke(ADDR, &codec::encode(text)).unwrap();
    }

    #[test]
    fn builder_requires_collaborators() {
        let missing = Orchestrator::builder().build();
        assert!(matches!(missing, Err(WatchError::Missing("transport"))));
    }

    #[test]
    fn unchanged_text_is_skipped() {
        let generator: Arc<dyn Generator> =
            Arc::new(|_: &GenerationRequest| -> Result<String, GenerationError> { Ok("x".into()) });
        let (mem, mut orch) = setup(generator);
        show(&mem, "Hello!");
        let now = Instant::now();
        assert_eq!(orch.tick(now).len(), 1);
        assert!(orch.tick(now).is_empty());
        assert_eq!(orch.channel_state(ADDR).unwrap().lines_seen, 1);
    }

    #[test]
    fn print_all_reports_every_tick() {
        let generator: Arc<dyn Generator> =
            Arc::new(|_: &GenerationRequest| -> Result<String, GenerationError> { Ok("x".into()) });
        let mem = Arc::new(MemoryTransport::new(0x8120_0000, 0x10_0000));
        let mut orch = Orchestrator::builder()
            .config(WatchConfig {
                print_all: true,
                speaker_address: None,
                background_generation: false,
                ..WatchConfig::default()
            })
            .transport(mem.clone())
            .generator(generator)
            .build()
            .unwrap();
        show(&mem, "Hello!");
        let now = Instant::now();
        assert_eq!(orch.tick(now).len(), 1);
        assert_eq!(orch.tick(now).len(), 1);
        assert_eq!(orch.channel_state(ADDR).unwrap().lines_seen, 1);
    }

    #[test]
    fn speaker_is_tracked() {
        let generator: Arc<dyn Generator> =
            Arc::new(|_: &GenerationRequest| -> Result<String, GenerationError> { Ok("x".into()) });
        let mem = Arc::new(MemoryTransport::new(0x8120_0000, 0x10_0000));
        let mut orch = Orchestrator::builder()
            .config(WatchConfig {
                background_generation: false,
                ..WatchConfig::default()
            })
            .transport(mem.clone())
            .generator(generator)
            .build()
            .unwrap();
        mem.poke(0x8129_A3EA, b"Rosie\0").unwrap();
        show(&mem, "Hi!");
        let reports = orch.tick(Instant::now());
        assert_eq!(reports[0].speaker.as_deref(), Some("Rosie"));
        assert_eq!(orch.known_speakers().collect::<Vec<_>>(), vec!["Rosie"]);
    }
}
