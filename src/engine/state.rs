use std::collections::HashMap;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::ErrorQueue;
use crate::host::{AssetLoader, AudioRequest, ImageDecoder};
use crate::stage::Stage;
use crate::vm::{
    opcode::{OpCode, UserFunction},
    sequencer::{GroupId, Sequencer, SequencerId, TimingMode},
    variable::{MESSAGE_PARAMS, VariableValue},
};

use super::handler::{EventHandler, EventType};

/// Everything the scheduler and the VM share: the task registry, handlers,
/// functions, and the script-visible world.
pub struct EngineState {
    sequencers: Vec<Sequencer>,
    handlers: Vec<EventHandler>,
    functions: HashMap<String, Arc<UserFunction>>,
    next_sequencer_id: SequencerId,
    next_group_id: GroupId,
    time_ticks_per_step: u64,
    midi_ticks_per_step: u64,
    /// Frame clock ticks since start.
    pub frame_tick: u64,
    /// MIDI clock ticks (32nd notes) since playback started.
    pub midi_tick: u64,
    pub faults: ErrorQueue,
    pub stage: Stage,
    pub assets: Option<Arc<dyn AssetLoader>>,
    pub decoder: Option<Arc<dyn ImageDecoder>>,
    audio_requests: Vec<AudioRequest>,
}

impl EngineState {
    pub fn new(config: &EngineConfig) -> Self {
        EngineState {
            sequencers: Vec::new(),
            handlers: Vec::new(),
            functions: HashMap::new(),
            next_sequencer_id: 1,
            next_group_id: 1,
            time_ticks_per_step: config.time_ticks_per_step as u64,
            midi_ticks_per_step: config.midi_ticks_per_step as u64,
            frame_tick: 0,
            midi_tick: 0,
            faults: ErrorQueue::default(),
            stage: Stage::new(),
            assets: None,
            decoder: None,
            audio_requests: Vec::new(),
        }
    }

    /// Ticks one script step lasts in `mode` before any `SetStep`.
    pub fn default_ticks_per_step(&self, mode: TimingMode) -> u64 {
        match mode {
            TimingMode::Time => self.time_ticks_per_step,
            TimingMode::MidiTime => self.midi_ticks_per_step,
        }
    }

    pub fn allocate_group(&mut self) -> GroupId {
        let group = self.next_group_id;
        self.next_group_id += 1;
        group
    }

    /// Adds a task to the registry. It is scheduled from the next tick on.
    pub fn spawn(&mut self, commands: Arc<[OpCode]>, mode: TimingMode, group: GroupId) -> SequencerId {
        self.spawn_with_params(commands, mode, group, None)
    }

    fn spawn_with_params(
        &mut self,
        commands: Arc<[OpCode]>,
        mode: TimingMode,
        group: GroupId,
        params: Option<&[VariableValue; 4]>,
    ) -> SequencerId {
        let id = self.next_sequencer_id;
        self.next_sequencer_id += 1;
        let mut seq = Sequencer::new(id, group, commands, mode, self.default_ticks_per_step(mode));
        if let Some(params) = params {
            for (name, value) in MESSAGE_PARAMS.iter().zip(params.iter()) {
                seq.vars.insert(name, value.clone());
            }
        }
        self.sequencers.push(seq);
        id
    }

    /// Stores a `mes()` handler under a fresh group. Clock handlers start right away.
    pub fn register_handler(
        &mut self,
        event_type: EventType,
        body: Arc<[OpCode]>,
        parent_group: GroupId,
        user_filter: Option<i64>,
    ) -> (GroupId, Option<SequencerId>) {
        let group = self.allocate_group();
        let mode = event_type.timing_mode();
        self.handlers.push(EventHandler {
            event_type,
            body: body.clone(),
            mode,
            group,
            parent_group,
            user_filter,
        });
        let spawned = if event_type.spawns_on_register() {
            Some(self.spawn_with_params(body, mode, group, Some(&Default::default())))
        } else {
            None
        };
        (group, spawned)
    }

    /// Spawns one task per handler accepting the event. Returns how many were spawned.
    pub fn dispatch(
        &mut self,
        event_type: EventType,
        user_id: Option<i64>,
        params: [VariableValue; 4],
    ) -> usize {
        let targets: Vec<(Arc<[OpCode]>, TimingMode, GroupId)> = self
            .handlers
            .iter()
            .filter(|h| h.accepts(event_type, user_id))
            .map(|h| (h.body.clone(), h.mode, h.group))
            .collect();
        for (body, mode, group) in targets.iter().cloned() {
            self.spawn_with_params(body, mode, group, Some(&params));
        }
        targets.len()
    }

    /// `PostMes`: fan a user message out to every matching `USER` handler.
    pub fn post_mes(&mut self, user_id: i64, params: [VariableValue; 4]) -> usize {
        self.dispatch(EventType::User, Some(user_id), params)
    }

    pub fn handlers(&self) -> &[EventHandler] {
        &self.handlers
    }

    pub fn register_function(&mut self, function: UserFunction) {
        self.functions
            .insert(function.name.to_lowercase(), Arc::new(function));
    }

    pub fn function(&self, name: &str) -> Option<Arc<UserFunction>> {
        self.functions.get(&name.to_lowercase()).cloned()
    }

    pub fn deactivate(&mut self, id: SequencerId) -> bool {
        match self.get_mut(id) {
            Some(seq) => {
                seq.deactivate();
                true
            }
            None => false,
        }
    }

    /// `DelUs`: deactivates every task of `group` and drops the handlers that spawn into it.
    pub fn deactivate_group(&mut self, group: GroupId) -> usize {
        if group == 0 {
            return 0;
        }
        let mut count = 0;
        for seq in self.sequencers.iter_mut().filter(|s| s.group == group && s.active) {
            seq.deactivate();
            count += 1;
        }
        self.handlers.retain(|h| h.group != group);
        count
    }

    /// `DelAll`: deactivates everything and forgets every handler.
    pub fn deactivate_all(&mut self) {
        for seq in self.sequencers.iter_mut() {
            seq.deactivate();
        }
        self.handlers.clear();
    }

    /// Drops inactive tasks. Returns how many were removed.
    pub fn cleanup(&mut self) -> usize {
        let before = self.sequencers.len();
        self.sequencers.retain(|s| s.active);
        before - self.sequencers.len()
    }

    pub fn all_complete(&self) -> bool {
        self.sequencers
            .iter()
            .all(|s| !s.active || s.is_complete())
    }

    pub fn get(&self, id: SequencerId) -> Option<&Sequencer> {
        self.sequencers.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: SequencerId) -> Option<&mut Sequencer> {
        self.sequencers.iter_mut().find(|s| s.id == id)
    }

    pub fn sequencers(&self) -> &[Sequencer] {
        &self.sequencers
    }

    pub(crate) fn sequencer_at(&mut self, index: usize) -> Option<&mut Sequencer> {
        self.sequencers.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.sequencers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequencers.is_empty()
    }

    pub fn queue_audio(&mut self, request: AudioRequest) {
        self.audio_requests.push(request);
    }

    pub fn drain_audio_requests(&mut self) -> Vec<AudioRequest> {
        std::mem::take(&mut self.audio_requests)
    }
}
